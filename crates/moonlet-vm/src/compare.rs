//! Ordering and equality of values, before metamethods.

use moonlet_core::value::Value;

/// Result of a comparison that may need a metamethod fallback.
#[derive(Debug, PartialEq, Eq)]
pub enum CompareResult {
    Ok(bool),
    NeedMetamethod,
}

/// Whether `a == b` must consult `__eq`: both tables or both userdata, and not
/// the same object.
pub fn needs_eq_metamethod(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Table(x), Value::Table(y)) => !std::rc::Rc::ptr_eq(x, y),
        (Value::Userdata(x), Value::Userdata(y)) => !std::rc::Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// `a < b` for two numbers or two strings.
pub fn less_than(a: &Value, b: &Value) -> CompareResult {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => CompareResult::Ok(x < y),
        (Value::String(x), Value::String(y)) => CompareResult::Ok(x.as_bytes() < y.as_bytes()),
        _ => CompareResult::NeedMetamethod,
    }
}

/// `a <= b` for two numbers or two strings.
pub fn less_equal(a: &Value, b: &Value) -> CompareResult {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => CompareResult::Ok(x <= y),
        (Value::String(x), Value::String(y)) => CompareResult::Ok(x.as_bytes() <= y.as_bytes()),
        _ => CompareResult::NeedMetamethod,
    }
}

/// Message for an ordering of incomparable values.
pub fn compare_error(a: &Value, b: &Value) -> String {
    let (ta, tb) = (a.type_name(), b.type_name());
    if ta == tb {
        format!("attempt to compare two {ta} values")
    } else {
        format!("attempt to compare {ta} with {tb}")
    }
}
