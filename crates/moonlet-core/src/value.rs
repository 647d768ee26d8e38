/// Dynamic values.
///
/// Numbers are always doubles. Strings are shared immutable byte strings and
/// every other heap object is shared through `Rc`, so cloning a value is cheap
/// and raw equality of objects is reference identity.
use std::fmt;
use std::rc::Rc;

use crate::number;
use crate::object::{Closure, NativeFunction, Userdata};
use crate::string::LuaString;
use crate::table::TableRef;
use crate::thread::ThreadRef;

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Number(f64),
    String(LuaString),
    Table(TableRef),
    Closure(Rc<Closure>),
    Native(Rc<NativeFunction>),
    Thread(ThreadRef),
    Userdata(Rc<Userdata>),
}

impl Value {
    /// Name of the value's type as reported by `type()`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Closure(_) | Value::Native(_) => "function",
            Value::Thread(_) => "thread",
            Value::Userdata(_) => "userdata",
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Everything except `nil` and `false` is true.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    #[inline]
    pub fn is_falsy(&self) -> bool {
        !self.is_truthy()
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::Native(_))
    }

    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Number, or a string that reads as a number.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => number::str_to_number(s.as_bytes()),
            _ => None,
        }
    }

    /// Integral value in `i64` range, with string coercion.
    pub fn to_integer(&self) -> Option<i64> {
        self.to_number().and_then(number::to_integer)
    }

    pub fn as_str(&self) -> Option<&LuaString> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// String view for concatenation: strings as is, numbers formatted.
    pub fn to_lua_string(&self) -> Option<LuaString> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(LuaString::from(number::fmt_number(*n))),
            _ => None,
        }
    }

    /// Identity of heap objects, used in `tostring` output and table keys.
    pub fn ptr_addr(&self) -> Option<usize> {
        match self {
            Value::Table(t) => Some(Rc::as_ptr(t) as *const u8 as usize),
            Value::Closure(c) => Some(Rc::as_ptr(c) as *const u8 as usize),
            Value::Native(f) => Some(Rc::as_ptr(f) as *const u8 as usize),
            Value::Thread(t) => Some(Rc::as_ptr(t) as *const u8 as usize),
            Value::Userdata(u) => Some(Rc::as_ptr(u) as *const u8 as usize),
            _ => None,
        }
    }

    /// Default textual form, without consulting `__tostring`.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Nil => "nil".into(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => number::fmt_number(*n),
            Value::String(s) => s.to_str_lossy().into_owned(),
            _ => format!("{}: {:#x}", self.type_name(), self.ptr_addr().unwrap_or(0)),
        }
    }
}

/// Raw equality: numbers by IEEE `==`, strings by content, other objects by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Thread(a), Value::Thread(b)) => Rc::ptr_eq(a, b),
            (Value::Userdata(a), Value::Userdata(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            _ => f.write_str(&self.to_display_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(LuaString::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(LuaString::from(s))
    }
}

impl From<LuaString> for Value {
    fn from(s: LuaString) -> Self {
        Value::String(s)
    }
}

impl From<TableRef> for Value {
    fn from(t: TableRef) -> Self {
        Value::Table(t)
    }
}
