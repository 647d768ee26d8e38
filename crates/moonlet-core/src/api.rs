//! Host call surface: how native functions see their arguments and call back
//! into the interpreter.

use std::rc::Rc;

use crate::error::LuaError;
use crate::number;
use crate::object::{NativeFunction, Userdata};
use crate::string::LuaString;
use crate::table::TableRef;
use crate::thread::{Thread, ThreadRef};
use crate::value::Value;

/// Signature of every native function. Results are written with
/// [`CallContext::returns`]; the return value is their count.
pub type NativeFn = fn(&mut CallContext<'_>) -> Result<usize, LuaError>;

/// Services the interpreter offers to native functions.
pub trait Runtime {
    /// Call `func` on `thread` and collect all of its results.
    fn call(&mut self, thread: &mut Thread, func: Value, args: Vec<Value>)
        -> Result<Vec<Value>, LuaError>;

    /// Resume a coroutine; returns the values it yielded or returned.
    fn resume(&mut self, co: &ThreadRef, args: Vec<Value>) -> Result<Vec<Value>, LuaError>;

    /// The running thread and whether it is the main thread.
    fn running(&self) -> (ThreadRef, bool);

    /// The global table.
    fn globals(&self) -> TableRef;

    /// `tostring` semantics, honouring `__tostring` and `__name`.
    fn tostring(&mut self, thread: &mut Thread, v: &Value) -> Result<LuaString, LuaError>;

    /// Compile (or undump) a chunk into a function. Errors are messages.
    fn load(&mut self, chunk: &[u8], chunkname: &str, env: Option<Value>) -> Result<Value, String>;

    /// Serialize a script function; `None` for natives.
    fn dump(&self, func: &Value, strip: bool) -> Option<Vec<u8>>;

    /// Metatable of any value, including the shared string metatable.
    fn metatable_of(&self, v: &Value) -> Option<TableRef>;

    /// `v[key]` with `__index`.
    fn index(&mut self, thread: &mut Thread, v: &Value, key: &Value) -> Result<Value, LuaError>;

    /// `a < b` with `__lt`.
    fn less_than(&mut self, thread: &mut Thread, a: &Value, b: &Value) -> Result<bool, LuaError>;
}

/// The view a native function gets of its activation.
pub struct CallContext<'a> {
    pub rt: &'a mut dyn Runtime,
    pub thread: &'a mut Thread,
    pub func: Rc<NativeFunction>,
    /// Stack slot of the first argument; results are written from here.
    pub base: usize,
    pub nargs: usize,
    /// Set when the function asked to yield.
    pub yielded: bool,
}

impl<'a> CallContext<'a> {
    pub fn new(
        rt: &'a mut dyn Runtime,
        thread: &'a mut Thread,
        func: Rc<NativeFunction>,
        base: usize,
        nargs: usize,
    ) -> Self {
        CallContext {
            rt,
            thread,
            func,
            base,
            nargs,
            yielded: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.func.name
    }

    /// Value bound to this native function.
    pub fn upvalue(&self, i: usize) -> Value {
        self.func.upvalues.get(i).cloned().unwrap_or_default()
    }

    // ---- Arguments (1-based) ----

    pub fn arg_count(&self) -> usize {
        self.nargs
    }

    /// Argument `i`, nil when absent.
    pub fn arg(&self, i: usize) -> Value {
        if i >= 1 && i <= self.nargs {
            self.thread.stack.get(self.base + i - 1)
        } else {
            Value::Nil
        }
    }

    /// All arguments from `i` on.
    pub fn args_from(&self, i: usize) -> Vec<Value> {
        (i.max(1)..=self.nargs).map(|k| self.arg(k)).collect()
    }

    /// Error with the calling script position prepended.
    pub fn error(&self, msg: impl AsRef<str>) -> LuaError {
        let loc = self.thread.location(1);
        if loc.is_empty() {
            LuaError::runtime(msg.as_ref())
        } else {
            LuaError::runtime(format!("{loc} {}", msg.as_ref()))
        }
    }

    /// `bad argument #i to 'name' (msg)`.
    pub fn arg_error(&self, i: usize, msg: impl AsRef<str>) -> LuaError {
        self.error(format!("bad argument #{} to '{}' ({})", i, self.name(), msg.as_ref()))
    }

    fn type_error(&self, i: usize, expected: &str) -> LuaError {
        let got = if i > self.nargs {
            "no value"
        } else {
            self.arg(i).type_name()
        };
        self.arg_error(i, format!("{expected} expected, got {got}"))
    }

    /// Any value, but the argument must be present.
    pub fn check_any(&self, i: usize) -> Result<Value, LuaError> {
        if i > self.nargs {
            return Err(self.arg_error(i, "value expected"));
        }
        Ok(self.arg(i))
    }

    /// A number, or a string convertible to one.
    pub fn expect_number(&self, i: usize) -> Result<f64, LuaError> {
        self.arg(i).to_number().ok_or_else(|| self.type_error(i, "number"))
    }

    /// A number with an integer representation.
    pub fn expect_integer(&self, i: usize) -> Result<i64, LuaError> {
        let n = self.expect_number(i).map_err(|_| self.type_error(i, "number"))?;
        number::to_integer(n).ok_or_else(|| self.arg_error(i, "number has no integer representation"))
    }

    /// A string; numbers are converted.
    pub fn expect_string(&self, i: usize) -> Result<LuaString, LuaError> {
        self.arg(i).to_lua_string().ok_or_else(|| self.type_error(i, "string"))
    }

    pub fn expect_table(&self, i: usize) -> Result<TableRef, LuaError> {
        match self.arg(i) {
            Value::Table(t) => Ok(t),
            _ => Err(self.type_error(i, "table")),
        }
    }

    pub fn expect_function(&self, i: usize) -> Result<Value, LuaError> {
        let v = self.arg(i);
        if v.is_function() {
            Ok(v)
        } else {
            Err(self.type_error(i, "function"))
        }
    }

    pub fn expect_thread(&self, i: usize) -> Result<ThreadRef, LuaError> {
        match self.arg(i) {
            Value::Thread(t) => Ok(t),
            _ => Err(self.type_error(i, "thread")),
        }
    }

    pub fn expect_userdata(&self, i: usize) -> Result<Rc<Userdata>, LuaError> {
        match self.arg(i) {
            Value::Userdata(u) => Ok(u),
            _ => Err(self.type_error(i, "userdata")),
        }
    }

    /// Optional integer argument; nil or absent gives `default`.
    pub fn opt_integer(&self, i: usize, default: i64) -> Result<i64, LuaError> {
        if self.arg(i).is_nil() {
            Ok(default)
        } else {
            self.expect_integer(i)
        }
    }

    /// Optional number argument; nil or absent gives `default`.
    pub fn opt_number(&self, i: usize, default: f64) -> Result<f64, LuaError> {
        if self.arg(i).is_nil() {
            Ok(default)
        } else {
            self.expect_number(i)
        }
    }

    // ---- Results ----

    /// Write results at the frame base. Read every argument you need first.
    pub fn returns<I>(&mut self, values: I) -> usize
    where
        I: IntoIterator<Item = Value>,
    {
        let mut n = 0;
        for v in values {
            self.thread.stack.set(self.base + n, v);
            n += 1;
        }
        n
    }

    pub fn return_one(&mut self, v: impl Into<Value>) -> usize {
        self.thread.stack.set(self.base, v.into());
        1
    }

    /// Suspend the running coroutine, handing `values` to the resumer.
    pub fn yield_values(&mut self, values: Vec<Value>) -> Result<usize, LuaError> {
        if self.thread.is_main {
            return Err(self.error("attempt to yield from outside a coroutine"));
        }
        if self.thread.non_yieldable > 0 {
            return Err(self.error("attempt to yield across a native call boundary"));
        }
        self.yielded = true;
        Ok(self.returns(values))
    }

    // ---- Callbacks ----

    pub fn call(&mut self, func: Value, args: Vec<Value>) -> Result<Vec<Value>, LuaError> {
        self.rt.call(self.thread, func, args)
    }

    pub fn tostring(&mut self, v: &Value) -> Result<LuaString, LuaError> {
        self.rt.tostring(self.thread, v)
    }

    pub fn index(&mut self, v: &Value, key: &Value) -> Result<Value, LuaError> {
        self.rt.index(self.thread, v, key)
    }

    pub fn less_than(&mut self, a: &Value, b: &Value) -> Result<bool, LuaError> {
        self.rt.less_than(self.thread, a, b)
    }
}
