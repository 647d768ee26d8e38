//! Runtime error type shared by the VM, the libraries and native functions.

use thiserror::Error;

use crate::value::Value;

/// An error raised while running code.
#[derive(Clone, Debug, Error)]
pub enum LuaError {
    /// A language-level error; any value can be the error object. Catchable by `pcall`.
    #[error("{}", error_text(.0))]
    Runtime(Value),
    /// Frame limit, stack-slot limit or native reentrancy limit exceeded.
    #[error("stack overflow")]
    StackOverflow,
    /// Malformed bytecode.
    #[error("bad bytecode: {0}")]
    Bytecode(String),
}

fn error_text(v: &Value) -> String {
    match v {
        Value::String(_) | Value::Number(_) => v.to_display_string(),
        Value::Nil => "nil".to_string(),
        other => format!("(error object is a {} value)", other.type_name()),
    }
}

impl LuaError {
    /// A runtime error with a string message.
    pub fn runtime(msg: impl Into<String>) -> Self {
        LuaError::Runtime(Value::from(msg.into()))
    }

    /// Whether `pcall` may catch this error.
    pub fn is_catchable(&self) -> bool {
        matches!(self, LuaError::Runtime(_))
    }

    /// The error object handed to error handlers.
    pub fn value(&self) -> Value {
        match self {
            LuaError::Runtime(v) => v.clone(),
            other => Value::from(other.to_string()),
        }
    }
}
