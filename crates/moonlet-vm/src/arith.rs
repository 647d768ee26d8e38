//! Arithmetic, bitwise and concatenation semantics on values.

use moonlet_core::number::{self, ArithOp};
use moonlet_core::string::LuaString;
use moonlet_core::value::Value;

/// Result of an operation that may need a metamethod fallback.
#[derive(Debug, PartialEq)]
pub enum ArithResult {
    /// Operation succeeded with this value.
    Ok(Value),
    /// Some operand is not a number; the caller should try a metamethod.
    NeedMetamethod,
}

/// Apply `op` with string coercion. Unary operators pass the operand twice.
pub fn arith_op(op: ArithOp, a: &Value, b: &Value) -> ArithResult {
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        if let Some(r) = number::arith(op, *x, *y) {
            return ArithResult::Ok(Value::Number(r));
        }
        return ArithResult::NeedMetamethod;
    }
    match (a.to_number(), b.to_number()) {
        (Some(x), Some(y)) => match number::arith(op, x, y) {
            Some(r) => ArithResult::Ok(Value::Number(r)),
            None => ArithResult::NeedMetamethod,
        },
        _ => ArithResult::NeedMetamethod,
    }
}

/// Why an operation without a metamethod failed.
#[derive(Debug, PartialEq, Eq)]
pub struct OperandError {
    /// Which operand (0 or 1) is to blame, when one is.
    pub culprit: Option<usize>,
    pub message: String,
}

/// Error for `op` on operands that have no applicable metamethod.
pub fn operand_error(op: ArithOp, a: &Value, b: &Value) -> OperandError {
    let (na, nb) = (a.to_number(), b.to_number());
    if op.is_bitwise() && na.is_some() && nb.is_some() {
        return OperandError {
            culprit: None,
            message: "number has no integer representation".to_string(),
        };
    }
    let culprit = if na.is_none() { 0 } else { 1 };
    let bad = if culprit == 0 { a } else { b };
    let what = if op.is_bitwise() {
        "perform bitwise operation on"
    } else {
        "perform arithmetic on"
    };
    OperandError {
        culprit: Some(culprit),
        message: format!("attempt to {what} a {} value", bad.type_name()),
    }
}

/// Strings and numbers concatenate without metamethods.
pub fn is_concatenable(v: &Value) -> bool {
    matches!(v, Value::String(_) | Value::Number(_))
}

/// Join a run of strings and numbers.
pub fn concat_run(values: &[Value]) -> LuaString {
    let mut buf = Vec::new();
    for v in values {
        if let Some(s) = v.to_lua_string() {
            buf.extend_from_slice(s.as_bytes());
        }
    }
    LuaString::from(buf)
}
