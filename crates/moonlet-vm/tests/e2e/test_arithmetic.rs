use super::helpers::*;

// ---- Basic operators ----

#[test]
fn test_basic_operators() {
    run_check_nums(
        "local a, b = 7, 2
         return a + b, a - b, a * b, a / b, a % b, a ^ b, a // b",
        &[9.0, 5.0, 14.0, 3.5, 1.0, 49.0, 3.0],
    );
}

#[test]
fn test_modulo_follows_divisor_sign() {
    run_check_nums(
        "local a, b = -7, 3
         return a % b, 7 % -3, a // b",
        &[2.0, -2.0, -3.0],
    );
}

#[test]
fn test_unary_minus_and_precedence() {
    run_check_nums("local x = 3 return -x ^ 2, 2 + 3 * 4, (2 + 3) * 4", &[-9.0, 14.0, 20.0]);
}

// ---- Bitwise ----

#[test]
fn test_bitwise_ops() {
    run_check_nums(
        "local a, b = 12, 10
         return a & b, a | b, a ~ b, ~a, a << 2, a >> 2",
        &[8.0, 14.0, 6.0, -13.0, 48.0, 3.0],
    );
}

#[test]
fn test_large_shifts_give_zero() {
    run_check_nums("local one = 1 return one << 64, one >> 64, one << -1", &[0.0, 0.0, 0.0]);
}

#[test]
fn test_bitwise_on_fraction_fails() {
    let err = run_lua_err("local x = 2.5 return x & 1");
    assert_eq!(err, "test:1: number has no integer representation");
}

// ---- Coercion ----

#[test]
fn test_string_arithmetic_coercion() {
    run_check_nums("local s = '10' return s + 1, '0x10' * 1, ' 2 ' ^ 2", &[11.0, 16.0, 4.0]);
}

#[test]
fn test_concat_numbers() {
    run_check_strs("local n = 1 return n .. '', 1.5 .. 'x', 'a' .. 2 .. 'b'", &["1", "1.5x", "a2b"]);
}

#[test]
fn test_arith_on_nil_names_the_variable() {
    let err = run_lua_err("local x\nreturn x + 1");
    assert_eq!(err, "test:2: attempt to perform arithmetic on a nil value (local 'x')");
    let err = run_lua_err("return 1 + undefined_thing");
    assert_eq!(err, "test:1: attempt to perform arithmetic on a nil value (global 'undefined_thing')");
}

#[test]
fn test_non_numeric_string_arith_fails() {
    let err = run_lua_err("local s = 'abc' return s * 2");
    assert_eq!(err, "test:1: attempt to perform arithmetic on a string value (local 's')");
}

// ---- Comparison ----

#[test]
fn test_comparisons() {
    let r = run_lua("local a, b = 1, 2 return a < b, a <= b, a > b, a >= b, a == b, a ~= b");
    for (i, expected) in [true, true, false, false, false, true].into_iter().enumerate() {
        assert_bool(&r, i, expected);
    }
}

#[test]
fn test_string_comparison_is_bytewise() {
    let r = run_lua("return 'a' < 'b', 'abc' < 'abd', 'Z' < 'a', '' < 'a', 'a' < 'a'");
    for (i, expected) in [true, true, true, true, false].into_iter().enumerate() {
        assert_bool(&r, i, expected);
    }
}

#[test]
fn test_mixed_comparison_fails() {
    let err = run_lua_err("local a, b = 1, 'x' return a < b");
    assert_eq!(err, "test:1: attempt to compare number with string");
    let err = run_lua_err("local a, b = {}, {} return a < b");
    assert_eq!(err, "test:1: attempt to compare two table values");
}

#[test]
fn test_number_equality_ignores_type_of_literal() {
    let r = run_lua("local a = 1 return a == 1.0, '1' == 1, 0.1 + 0.2 == 0.3");
    assert_bool(&r, 0, true);
    assert_bool(&r, 1, false);
    assert_bool(&r, 2, false);
}

#[test]
fn test_division_by_zero() {
    let r = run_lua("local z = 0 return 1 / z, -1 / z, z / z ~= z / z");
    assert_num(&r, 0, f64::INFINITY);
    assert_num(&r, 1, f64::NEG_INFINITY);
    assert_bool(&r, 2, true);
}
