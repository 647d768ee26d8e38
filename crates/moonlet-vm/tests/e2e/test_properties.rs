use moonlet_core::value::Value;
use moonlet_vm::Vm;
use proptest::prelude::*;

fn eval(src: &str) -> Vec<Value> {
    Vm::new()
        .exec(src.as_bytes(), "=prop")
        .unwrap_or_else(|e| panic!("{src}: {e}"))
}

fn same_number(a: &Value, b: &Value) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x.to_bits() == y.to_bits() || (x.is_nan() && y.is_nan()),
        _ => a == b,
    }
}

/// First result of a chunk, or the error message it raised.
fn outcome(src: &str) -> Result<Value, String> {
    Vm::new()
        .exec(src.as_bytes(), "=prop")
        .map(|r| r.into_iter().next().unwrap_or_default())
        .map_err(|e| e.to_string())
}

fn binary_op() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["+", "-", "*", "/", "%", "^", "//", "&", "|", "~", "<<", ">>"])
}

fn unary_op() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["-", "~"])
}

/// Operands around the edges the folder has to get right: shift widths,
/// fractions, and the ends of the exact integer range.
fn operand() -> impl Strategy<Value = f64> {
    prop_oneof![
        (-1000i32..1000).prop_map(f64::from),
        (64i32..=70, any::<bool>()).prop_map(|(n, neg)| if neg { -f64::from(n) } else { f64::from(n) }),
        (-40i32..40).prop_map(|n| f64::from(n) + 0.5),
        prop::sample::select(vec![
            2f64.powi(53),
            -(2f64.powi(53)),
            2f64.powi(53) - 1.0,
            2f64.powi(63),
            -(2f64.powi(63)),
            0.25,
            -0.0,
        ]),
    ]
}

fn agree(folded: &Result<Value, String>, runtime: &Result<Value, String>) -> bool {
    match (folded, runtime) {
        (Ok(a), Ok(b)) => same_number(a, b),
        (Err(a), Err(b)) => a == b,
        _ => false,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Folding constants at compile time gives the same result, or the same
    /// error, as computing on locals at run time.
    #[test]
    fn folded_matches_runtime(a in operand(), b in operand(), op in binary_op()) {
        let folded = outcome(&format!("return ({a}) {op} ({b})"));
        let runtime = outcome(&format!("local a, b = {a}, {b} return a {op} b"));
        prop_assert!(agree(&folded, &runtime), "{a} {op} {b}: {folded:?} vs {runtime:?}");
    }

    #[test]
    fn folded_unary_matches_runtime(a in operand(), op in unary_op()) {
        let folded = outcome(&format!("return {op}({a})"));
        let runtime = outcome(&format!("local a = {a} return {op}a"));
        prop_assert!(agree(&folded, &runtime), "{op}{a}: {folded:?} vs {runtime:?}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn comparisons_agree_with_rust(a in -50i32..50, b in -50i32..50) {
        let r = eval(&format!("local a, b = {a}, {b} return a < b, a <= b, a == b, a ~= b"));
        prop_assert_eq!(r, vec![
            Value::Boolean(a < b),
            Value::Boolean(a <= b),
            Value::Boolean(a == b),
            Value::Boolean(a != b),
        ]);
    }

    #[test]
    fn integer_tostring_round_trips(n in -1_000_000_000i64..1_000_000_000) {
        let r = eval(&format!("return tostring({n}), tonumber(tostring({n})) == {n}"));
        prop_assert_eq!(&r[0], &Value::from(n.to_string()));
        prop_assert_eq!(&r[1], &Value::Boolean(true));
    }

    #[test]
    fn sort_orders_any_sequence(xs in prop::collection::vec(-100i32..100, 0..40)) {
        let list = xs.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(", ");
        let r = eval(&format!("local t = {{ {list} }} table.sort(t) return table.unpack(t)"));
        let mut sorted = xs.clone();
        sorted.sort();
        let expected: Vec<Value> = sorted.into_iter().map(|x| Value::from(x as f64)).collect();
        prop_assert_eq!(r, expected);
    }

    #[test]
    fn string_sub_matches_byte_slices(s in "[a-z]{0,12}", i in -15i64..15, j in -15i64..15) {
        let r = eval(&format!("return ('{s}'):sub({i}, {j})"));
        let len = s.len() as i64;
        let start = if i < 0 { (len + i + 1).max(1) } else { i.max(1) };
        let end = if j < 0 { len + j + 1 } else { j.min(len) };
        let expected = if start > end { String::new() } else { s[(start - 1) as usize..end as usize].to_string() };
        prop_assert_eq!(&r[0], &Value::from(expected));
    }
}
