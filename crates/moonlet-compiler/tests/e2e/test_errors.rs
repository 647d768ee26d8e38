use super::helpers::*;

#[test]
fn e2e_error_unfinished_string() {
    let err = compile_str_err("local x = \"hello");
    assert_eq!(err, "test:1: unfinished string near <eof>");
}

#[test]
fn e2e_error_break_outside_loop() {
    assert_eq!(compile_str_err("break"), "test:1: <break> at line 1 not inside a loop");
}

#[test]
fn e2e_error_duplicate_label() {
    assert_eq!(compile_str_err("::x:: ::x::"), "test:1: label 'x' already defined on line 1");
}

#[test]
fn e2e_error_unexpected_symbol() {
    assert_eq!(compile_str_err("return )"), "test:1: unexpected symbol near ')'");
}

#[test]
fn e2e_error_malformed_number() {
    let err = compile_str_err("local x = 3x");
    assert!(err.contains("malformed number near '3x'"), "{err}");
}

#[test]
fn e2e_error_invalid_escape() {
    let err = compile_str_err("local x = \"\\q\"");
    assert!(err.contains("invalid escape sequence"), "{err}");
}

#[test]
fn e2e_error_missing_end_reports_opening_line() {
    let err = compile_str_err("function f()\n  return 1\n");
    assert_eq!(err, "test:3: 'end' expected (to close 'function' at line 1) near <eof>");
}

#[test]
fn e2e_error_for_without_assignment() {
    assert_eq!(compile_str_err("for x do end"), "test:1: '=' or 'in' expected near 'do'");
}

#[test]
fn e2e_error_bad_parameter() {
    assert_eq!(
        compile_str_err("function f(1) end"),
        "test:1: <name> or '...' expected near '1'"
    );
}

#[test]
fn e2e_error_goto_into_local_scope() {
    let err = compile_str_err("do goto l; local a; ::l:: print(a) end");
    assert_eq!(err, "test:1: <goto l> at line 1 jumps into the scope of local 'a'");
}

#[test]
fn e2e_error_call_without_arguments() {
    let err = compile_str_err("local t = {} t:m");
    assert_eq!(err, "test:1: function arguments expected near <eof>");
}

#[test]
fn e2e_error_too_many_locals() {
    let src: String = (0..201).map(|i| format!("local v{i} = {i}\n")).collect();
    let err = compile_str_err(&src);
    assert!(err.contains("too many local variables (limit is 200) in main function"), "{err}");
}
