use moonlet_core::value::Value;
use moonlet_vm::Vm;

/// Compile and execute source, returning the chunk's results.
pub fn run_lua(source: &str) -> Vec<Value> {
    let mut vm = Vm::new();
    vm.exec(source.as_bytes(), "=test")
        .unwrap_or_else(|e| panic!("error: {e}"))
}

/// Compile and execute source, expecting an error; returns its message.
pub fn run_lua_err(source: &str) -> String {
    let mut vm = Vm::new();
    match vm.exec(source.as_bytes(), "=test") {
        Err(e) => e.to_string(),
        Ok(vals) => panic!("expected error, got {} results: {:?}", vals.len(), vals),
    }
}

/// Check that results[idx] is a number with the expected value.
pub fn assert_num(results: &[Value], idx: usize, expected: f64) {
    let val = &results[idx];
    let got = val
        .as_number()
        .unwrap_or_else(|| panic!("result[{idx}] = {val:?}, expected number {expected}"));
    assert!(
        got == expected || (got - expected).abs() < 1e-10,
        "result[{idx}] = {got}, expected {expected}"
    );
}

/// Check that results[idx] is a boolean with the expected value.
pub fn assert_bool(results: &[Value], idx: usize, expected: bool) {
    match &results[idx] {
        Value::Boolean(b) => assert_eq!(*b, expected, "result[{idx}] = {b}, expected {expected}"),
        other => panic!("result[{idx}] = {other:?}, expected bool {expected}"),
    }
}

/// Check that results[idx] is nil.
pub fn assert_nil(results: &[Value], idx: usize) {
    let val = &results[idx];
    assert!(val.is_nil(), "result[{idx}] = {val:?}, expected nil");
}

/// Check that results[idx] is a string with the expected contents.
pub fn assert_str(results: &[Value], idx: usize, expected: &str) {
    match &results[idx] {
        Value::String(s) => {
            let got = s.to_str_lossy();
            assert_eq!(got, expected, "result[{idx}] = \"{got}\", expected \"{expected}\"");
        }
        other => panic!("result[{idx}] = {other:?}, expected string \"{expected}\""),
    }
}

/// Run source and check the results against expected numbers.
pub fn run_check_nums(source: &str, expected: &[f64]) {
    let results = run_lua(source);
    assert_eq!(
        results.len(),
        expected.len(),
        "expected {} results, got {}",
        expected.len(),
        results.len()
    );
    for (i, &exp) in expected.iter().enumerate() {
        assert_num(&results, i, exp);
    }
}

/// Run source and check the results against expected strings.
pub fn run_check_strs(source: &str, expected: &[&str]) {
    let results = run_lua(source);
    assert_eq!(results.len(), expected.len(), "results: {results:?}");
    for (i, exp) in expected.iter().enumerate() {
        assert_str(&results, i, exp);
    }
}
