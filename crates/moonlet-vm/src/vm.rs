//! The virtual machine: global state, embedding API and the semantic
//! operations (indexing, arithmetic, comparison) shared by the interpreter
//! loop and the native libraries.

use std::rc::Rc;

use moonlet_compiler::compile;
use moonlet_core::api::{NativeFn, Runtime};
use moonlet_core::error::LuaError;
use moonlet_core::number::{self, ArithOp};
use moonlet_core::object::{Closure, NativeFunction, Upvalue};
use moonlet_core::proto::Proto;
use moonlet_core::string::LuaString;
use moonlet_core::table::{Table, TableRef};
use moonlet_core::thread::{Coroutine, Thread, ThreadRef, ThreadStatus};
use moonlet_core::value::Value;
use tracing::debug;

use crate::arith::{self, ArithResult};
use crate::binary_chunk;
use crate::compare::{self, CompareResult};
use crate::config::VmConfig;
use crate::debuginfo;
use crate::error::VmError;
use crate::metamethod::{self, MetamethodNames, TagMethod};

/// Longest `__index` / `__newindex` chain followed before giving up.
const MAX_TAG_LOOP: usize = 2000;

/// Where an operand came from, for naming it in error messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Origin {
    Unknown,
    Register(u32),
    Upvalue(u32),
}

/// One interpreter instance: globals, the main thread and the running thread.
pub struct Vm {
    pub(crate) config: VmConfig,
    pub(crate) globals: TableRef,
    pub(crate) string_mt: Option<TableRef>,
    pub(crate) names: MetamethodNames,
    pub(crate) main: ThreadRef,
    pub(crate) current: ThreadRef,
    /// Rust-level nesting of reentrant calls and resumes.
    pub(crate) native_depth: usize,
    /// Address of a local in the outermost reentrant call, for measuring
    /// how much native stack the nested calls use.
    pub(crate) stack_origin: usize,
    /// `pcall` and `xpcall`, which the call protocol runs itself.
    pub(crate) pcall: Option<Rc<NativeFunction>>,
    pub(crate) xpcall: Option<Rc<NativeFunction>>,
}

impl Vm {
    /// A VM with the standard libraries and default limits.
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let globals = Table::new_ref();
        let string_mt = moonlet_stdlib::open_libs(&globals);
        let main = Coroutine::new(Thread::new_main(), ThreadStatus::Running);
        let native_global = |name: &str| match globals.borrow().get_field(name) {
            Value::Native(nf) => Some(nf),
            _ => None,
        };
        let (pcall, xpcall) = (native_global("pcall"), native_global("xpcall"));
        Vm {
            config,
            globals,
            string_mt: Some(string_mt),
            names: MetamethodNames::new(),
            current: main.clone(),
            main,
            native_depth: 0,
            stack_origin: 0,
            pcall,
            xpcall,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn globals(&self) -> TableRef {
        self.globals.clone()
    }

    // ---- Embedding API ----

    /// Compile source text, or undump a binary chunk, into a function whose
    /// `_ENV` is the global table.
    pub fn load(&mut self, chunk: &[u8], chunkname: &str) -> Result<Value, VmError> {
        let proto = self.load_proto(chunk, chunkname)?;
        Ok(self.instantiate(proto, Value::Table(self.globals.clone())))
    }

    fn load_proto(&self, chunk: &[u8], chunkname: &str) -> Result<Rc<Proto>, VmError> {
        if chunk.starts_with(binary_chunk::SIGNATURE) {
            return Ok(binary_chunk::undump(chunk, chunkname)?);
        }
        let proto = compile(chunk, chunkname)?;
        debug!(chunk = chunkname, instructions = proto.code.len(), "compiled chunk");
        Ok(proto)
    }

    /// Close a main prototype over `env`.
    fn instantiate(&self, proto: Rc<Proto>, env: Value) -> Value {
        let upvalues = proto.upvalues.iter().map(|_| Upvalue::closed(Value::Nil)).collect::<Vec<_>>();
        if let Some(first) = upvalues.first() {
            first.borrow_mut().set(env);
        }
        Value::Closure(Rc::new(Closure::new(proto, upvalues)))
    }

    /// Load and run a chunk, returning its results.
    pub fn exec(&mut self, chunk: &[u8], chunkname: &str) -> Result<Vec<Value>, VmError> {
        let f = self.load(chunk, chunkname)?;
        self.call(&f, Vec::new())
    }

    /// Call any callable value on the main thread.
    pub fn call(&mut self, f: &Value, args: Vec<Value>) -> Result<Vec<Value>, VmError> {
        let main = self.main.clone();
        let mut th = main
            .thread
            .try_borrow_mut()
            .map_err(|_| LuaError::runtime("main thread is already running"))?;
        Ok(self.call_value(&mut th, f.clone(), args)?)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.borrow_mut().set_field(name, value);
    }

    pub fn get_global(&self, name: &str) -> Value {
        self.globals.borrow().get_field(name)
    }

    /// Expose a native function as a global.
    pub fn register(&mut self, name: &'static str, func: NativeFn) {
        let f = Value::Native(Rc::new(NativeFunction::new(name, func)));
        self.set_global(name, f);
    }

    /// Binary chunk of a script function; `None` for natives and non-functions.
    pub fn dump(&self, f: &Value, strip: bool) -> Option<Vec<u8>> {
        match f {
            Value::Closure(c) => Some(binary_chunk::dump(&c.proto, strip)),
            _ => None,
        }
    }

    // ---- Errors ----

    /// Runtime error positioned at the running script instruction.
    pub(crate) fn rt_error(&self, th: &Thread, msg: impl AsRef<str>) -> LuaError {
        let loc = th.location(0);
        if loc.is_empty() {
            LuaError::runtime(msg.as_ref())
        } else {
            LuaError::runtime(format!("{loc} {}", msg.as_ref()))
        }
    }

    pub(crate) fn var_info(th: &Thread, origin: Origin) -> String {
        let Some(frame) = th.frames.last() else {
            return String::new();
        };
        let Some(cl) = &frame.closure else {
            return String::new();
        };
        let pc = frame.pc.saturating_sub(1);
        match origin {
            Origin::Register(r) => debuginfo::register_info(&cl.proto, pc, r),
            Origin::Upvalue(u) => debuginfo::upvalue_info(&cl.proto, u),
            Origin::Unknown => String::new(),
        }
    }

    /// `attempt to <op> a <type> value (<kind> '<name>')`.
    pub(crate) fn type_error(&self, th: &Thread, op: &str, v: &Value, origin: Origin) -> LuaError {
        let info = Self::var_info(th, origin);
        self.rt_error(th, format!("attempt to {op} a {} value{info}", v.type_name()))
    }

    // ---- Metamethods ----

    pub(crate) fn metamethod(&self, v: &Value, tm: TagMethod) -> Option<Value> {
        metamethod::get_metamethod(&self.names, self.string_mt.as_ref(), v, tm)
    }

    /// Call a metamethod and keep its first result.
    pub(crate) fn call_meta(&mut self, th: &mut Thread, mm: Value, args: Vec<Value>) -> Result<Value, LuaError> {
        let results = self.call_value(th, mm, args)?;
        Ok(results.into_iter().next().unwrap_or_default())
    }

    // ---- Semantic operations ----

    /// `obj[key]` honouring `__index`.
    pub(crate) fn index_value(
        &mut self,
        th: &mut Thread,
        obj: &Value,
        key: &Value,
        origin: Origin,
    ) -> Result<Value, LuaError> {
        let mut t = obj.clone();
        let mut origin = origin;
        for _ in 0..MAX_TAG_LOOP {
            let mm = if let Value::Table(tbl) = &t {
                let tb = tbl.borrow();
                let v = tb.get(key);
                if !v.is_nil() {
                    return Ok(v);
                }
                let mm = tb
                    .metatable
                    .as_ref()
                    .map(|mt| mt.borrow().get_str(self.names.get(TagMethod::Index)))
                    .unwrap_or_default();
                if mm.is_nil() {
                    return Ok(Value::Nil);
                }
                mm
            } else {
                match self.metamethod(&t, TagMethod::Index) {
                    Some(mm) => mm,
                    None => return Err(self.type_error(th, "index", &t, origin)),
                }
            };
            if mm.is_function() {
                return self.call_meta(th, mm, vec![t, key.clone()]);
            }
            t = mm;
            origin = Origin::Unknown;
        }
        Err(self.rt_error(th, "'__index' chain too long; possible loop"))
    }

    /// `obj[key] = val` honouring `__newindex`.
    pub(crate) fn set_index(
        &mut self,
        th: &mut Thread,
        obj: &Value,
        key: Value,
        val: Value,
        origin: Origin,
    ) -> Result<(), LuaError> {
        let mut t = obj.clone();
        let mut origin = origin;
        for _ in 0..MAX_TAG_LOOP {
            let mm = if let Value::Table(tbl) = &t {
                let mm = {
                    let tb = tbl.borrow();
                    if tb.get(&key).is_nil() {
                        tb.metatable
                            .as_ref()
                            .map(|mt| mt.borrow().get_str(self.names.get(TagMethod::NewIndex)))
                            .filter(|mm| !mm.is_nil())
                    } else {
                        None
                    }
                };
                match mm {
                    Some(mm) => mm,
                    None => {
                        let result = tbl.borrow_mut().set(key, val);
                        return result.map_err(|msg| self.rt_error(th, msg));
                    }
                }
            } else {
                match self.metamethod(&t, TagMethod::NewIndex) {
                    Some(mm) => mm,
                    None => return Err(self.type_error(th, "index", &t, origin)),
                }
            };
            if mm.is_function() {
                self.call_value(th, mm, vec![t, key, val])?;
                return Ok(());
            }
            t = mm;
            origin = Origin::Unknown;
        }
        Err(self.rt_error(th, "'__newindex' chain too long; possible loop"))
    }

    /// Arithmetic or bitwise operator with metamethod fallback.
    pub(crate) fn arith(
        &mut self,
        th: &mut Thread,
        op: ArithOp,
        a: &Value,
        b: &Value,
        origins: [Origin; 2],
    ) -> Result<Value, LuaError> {
        match arith::arith_op(op, a, b) {
            ArithResult::Ok(v) => Ok(v),
            ArithResult::NeedMetamethod => {
                let tm = TagMethod::for_arith(op);
                if let Some(mm) = self.metamethod(a, tm).or_else(|| self.metamethod(b, tm)) {
                    return self.call_meta(th, mm, vec![a.clone(), b.clone()]);
                }
                let e = arith::operand_error(op, a, b);
                let info = e.culprit.map(|i| Self::var_info(th, origins[i])).unwrap_or_default();
                Err(self.rt_error(th, format!("{}{info}", e.message)))
            }
        }
    }

    /// `#v`.
    pub(crate) fn len_of(&mut self, th: &mut Thread, v: &Value, origin: Origin) -> Result<Value, LuaError> {
        if let Value::String(s) = v {
            return Ok(Value::from(s.len()));
        }
        if let Some(mm) = self.metamethod(v, TagMethod::Len) {
            return self.call_meta(th, mm, vec![v.clone(), v.clone()]);
        }
        match v {
            Value::Table(t) => Ok(Value::from(t.borrow().len())),
            _ => Err(self.type_error(th, "get length of", v, origin)),
        }
    }

    /// Concatenate `values` right to left; `first_reg` names operands in errors.
    pub(crate) fn concat(
        &mut self,
        th: &mut Thread,
        mut values: Vec<Value>,
        first_reg: Option<u32>,
    ) -> Result<Value, LuaError> {
        while values.len() > 1 {
            let n = values.len();
            if arith::is_concatenable(&values[n - 2]) && arith::is_concatenable(&values[n - 1]) {
                let mut k = n - 2;
                while k > 0 && arith::is_concatenable(&values[k - 1]) {
                    k -= 1;
                }
                let joined = arith::concat_run(&values[k..]);
                values.truncate(k);
                values.push(Value::String(joined));
                continue;
            }
            let (x, y) = (values[n - 2].clone(), values[n - 1].clone());
            let mm = self
                .metamethod(&x, TagMethod::Concat)
                .or_else(|| self.metamethod(&y, TagMethod::Concat));
            let result = match mm {
                Some(mm) => self.call_meta(th, mm, vec![x, y])?,
                None => {
                    let (bad, pos) = if arith::is_concatenable(&x) { (y, n - 1) } else { (x, n - 2) };
                    let origin = first_reg.map_or(Origin::Unknown, |r| Origin::Register(r + pos as u32));
                    return Err(self.type_error(th, "concatenate", &bad, origin));
                }
            };
            values.truncate(n - 2);
            values.push(result);
        }
        Ok(values.pop().unwrap_or_default())
    }

    /// `a == b` with `__eq` for tables and userdata.
    pub(crate) fn equals(&mut self, th: &mut Thread, a: &Value, b: &Value) -> Result<bool, LuaError> {
        if a == b {
            return Ok(true);
        }
        if !compare::needs_eq_metamethod(a, b) {
            return Ok(false);
        }
        match self
            .metamethod(a, TagMethod::Eq)
            .or_else(|| self.metamethod(b, TagMethod::Eq))
        {
            Some(mm) => Ok(self.call_meta(th, mm, vec![a.clone(), b.clone()])?.is_truthy()),
            None => Ok(false),
        }
    }

    /// `a < b` with `__lt`.
    pub(crate) fn less_than_values(&mut self, th: &mut Thread, a: &Value, b: &Value) -> Result<bool, LuaError> {
        match compare::less_than(a, b) {
            CompareResult::Ok(r) => Ok(r),
            CompareResult::NeedMetamethod => {
                match self
                    .metamethod(a, TagMethod::Lt)
                    .or_else(|| self.metamethod(b, TagMethod::Lt))
                {
                    Some(mm) => Ok(self.call_meta(th, mm, vec![a.clone(), b.clone()])?.is_truthy()),
                    None => Err(self.rt_error(th, compare::compare_error(a, b))),
                }
            }
        }
    }

    /// `a <= b` with `__le`, falling back to `not (b < a)` through `__lt`.
    pub(crate) fn less_equal_values(&mut self, th: &mut Thread, a: &Value, b: &Value) -> Result<bool, LuaError> {
        match compare::less_equal(a, b) {
            CompareResult::Ok(r) => Ok(r),
            CompareResult::NeedMetamethod => {
                if let Some(mm) = self
                    .metamethod(a, TagMethod::Le)
                    .or_else(|| self.metamethod(b, TagMethod::Le))
                {
                    return Ok(self.call_meta(th, mm, vec![a.clone(), b.clone()])?.is_truthy());
                }
                match self
                    .metamethod(b, TagMethod::Lt)
                    .or_else(|| self.metamethod(a, TagMethod::Lt))
                {
                    Some(mm) => Ok(!self.call_meta(th, mm, vec![b.clone(), a.clone()])?.is_truthy()),
                    None => Err(self.rt_error(th, compare::compare_error(a, b))),
                }
            }
        }
    }

    /// `tostring` with `__tostring` and `__name`.
    pub(crate) fn tostring_value(&mut self, th: &mut Thread, v: &Value) -> Result<LuaString, LuaError> {
        if let Some(mm) = self.metamethod(v, TagMethod::ToString) {
            return match self.call_meta(th, mm, vec![v.clone()])? {
                Value::String(s) => Ok(s),
                Value::Number(n) => Ok(LuaString::from(number::fmt_number(n))),
                _ => Err(LuaError::runtime("'__tostring' must return a string")),
            };
        }
        if let Some(Value::String(name)) = self.metamethod(v, TagMethod::Name) {
            if let Some(addr) = v.ptr_addr() {
                return Ok(LuaString::from(format!("{name}: {addr:#x}")));
            }
        }
        Ok(LuaString::from(v.to_display_string()))
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for Vm {
    fn call(&mut self, thread: &mut Thread, func: Value, args: Vec<Value>) -> Result<Vec<Value>, LuaError> {
        self.call_value(thread, func, args)
    }

    fn resume(&mut self, co: &ThreadRef, args: Vec<Value>) -> Result<Vec<Value>, LuaError> {
        self.resume_thread(co, args)
    }

    fn running(&self) -> (ThreadRef, bool) {
        (self.current.clone(), Rc::ptr_eq(&self.current, &self.main))
    }

    fn globals(&self) -> TableRef {
        self.globals.clone()
    }

    fn tostring(&mut self, thread: &mut Thread, v: &Value) -> Result<LuaString, LuaError> {
        self.tostring_value(thread, v)
    }

    fn load(&mut self, chunk: &[u8], chunkname: &str, env: Option<Value>) -> Result<Value, String> {
        let proto = self.load_proto(chunk, chunkname).map_err(|e| e.to_string())?;
        let env = env.unwrap_or_else(|| Value::Table(self.globals.clone()));
        Ok(self.instantiate(proto, env))
    }

    fn dump(&self, func: &Value, strip: bool) -> Option<Vec<u8>> {
        Vm::dump(self, func, strip)
    }

    fn metatable_of(&self, v: &Value) -> Option<TableRef> {
        metamethod::metatable(v, self.string_mt.as_ref())
    }

    fn index(&mut self, thread: &mut Thread, v: &Value, key: &Value) -> Result<Value, LuaError> {
        self.index_value(thread, v, key, Origin::Unknown)
    }

    fn less_than(&mut self, thread: &mut Thread, a: &Value, b: &Value) -> Result<bool, LuaError> {
        self.less_than_values(thread, a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> Vec<Value> {
        Vm::new().exec(src.as_bytes(), "=t").unwrap()
    }

    #[test]
    fn test_globals_round_trip() {
        let mut vm = Vm::new();
        vm.set_global("answer", Value::from(42.0));
        assert_eq!(vm.get_global("answer"), Value::from(42.0));
        let r = vm.exec(b"return answer + 1", "=t").unwrap();
        assert_eq!(r, vec![Value::from(43.0)]);
    }

    fn host_double(ctx: &mut moonlet_core::api::CallContext<'_>) -> Result<usize, LuaError> {
        let n = ctx.expect_number(1)?;
        Ok(ctx.return_one(n * 2.0))
    }

    #[test]
    fn test_register_native() {
        let mut vm = Vm::new();
        vm.register("double", host_double);
        assert_eq!(vm.exec(b"return double(21)", "=t").unwrap(), vec![Value::from(42.0)]);
        let err = vm.exec(b"return double({})", "=t").unwrap_err();
        assert_eq!(err.to_string(), "t:1: bad argument #1 to 'double' (number expected, got table)");
    }

    #[test]
    fn test_call_host_side() {
        let mut vm = Vm::new();
        let f = vm.exec(b"return function(a, b) return b, a end", "=t").unwrap().remove(0);
        let r = vm.call(&f, vec![Value::from(1.0), Value::from("x")]).unwrap();
        assert_eq!(r, vec![Value::from("x"), Value::from(1.0)]);
    }

    #[test]
    fn test_load_reports_compile_and_chunk_errors() {
        let mut vm = Vm::new();
        assert!(matches!(vm.load(b"x = ", "=t"), Err(VmError::Compile(_))));
        assert!(matches!(vm.load(b"\x1bLua\x53", "=t"), Err(VmError::Chunk(_))));
    }

    #[test]
    fn test_dump_then_load() {
        let mut vm = Vm::new();
        let f = vm.load(b"local a = ... return a * 2", "=t").unwrap();
        let bytes = vm.dump(&f, false).unwrap();
        let g = vm.load(&bytes, "=bin").unwrap();
        assert_eq!(vm.call(&g, vec![Value::from(4.0)]).unwrap(), vec![Value::from(8.0)]);
        assert!(vm.dump(&vm.get_global("print"), false).is_none());
    }

    #[test]
    fn test_error_names_the_variable() {
        let mut vm = Vm::new();
        let e = vm.exec(b"local t = nil\nreturn t.x", "=t").unwrap_err();
        assert_eq!(e.to_string(), "t:2: attempt to index a nil value (local 't')");
        let e = vm.exec(b"return undefinedfn()", "=t").unwrap_err();
        assert_eq!(e.to_string(), "t:1: attempt to call a nil value (global 'undefinedfn')");
        let e = vm.exec(b"local a = {} return a .. 'x'", "=t").unwrap_err();
        assert_eq!(e.to_string(), "t:1: attempt to concatenate a table value (local 'a')");
    }

    #[test]
    fn test_tostring_uses_name_field() {
        let r = run("local t = setmetatable({}, {__name = 'Point'}) return tostring(t):sub(1, 6)");
        assert_eq!(r, vec![Value::from("Point:")]);
    }
}
