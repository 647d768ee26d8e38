//! Call protocol: frame setup, result delivery, reentrant calls and
//! coroutine resumption.
//!
//! Stack layout of a script frame with `n` actual arguments:
//!
//! ```text
//! func | fixed args ... | (vararg callee) extra args | base: registers ...
//! ```
//!
//! A vararg callee gets its fixed parameters copied above the actual
//! arguments, so `VARARG` reads the extras from `base - nvarargs`.

use std::rc::Rc;

use moonlet_core::api::CallContext;
use moonlet_core::error::LuaError;
use moonlet_core::object::NativeFunction;
use moonlet_core::thread::{CallFrame, CallStatus, Thread, ThreadRef, ThreadStatus};
use moonlet_core::value::Value;
use tracing::{debug, trace};

use crate::metamethod::TagMethod;
use crate::vm::{Origin, Vm};

/// What [`Vm::precall`] did.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CallKind {
    /// A script frame was pushed; the interpreter loop must run it.
    Lua,
    /// A native ran to completion and its results are in place.
    Native,
    /// A native asked to yield `n` values, left at its frame base.
    Yield(usize),
}

/// How an interpreter loop run ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Exec {
    /// The frame stack is back at the stop depth.
    Done,
    /// The coroutine yielded `n` values from its top (native) frame.
    Yield(usize),
}

impl Vm {
    /// Replace a non-function at `func_idx` by its `__call` metamethod,
    /// shifting the arguments up. Returns the new argument count.
    pub(crate) fn resolve_callable(
        &mut self,
        th: &mut Thread,
        func_idx: usize,
        mut nargs: usize,
    ) -> Result<usize, LuaError> {
        let mut f = th.stack.get(func_idx);
        let mut first = true;
        while !f.is_function() {
            let Some(mm) = self.metamethod(&f, TagMethod::Call) else {
                let origin = if first { self.slot_origin(th, func_idx) } else { Origin::Unknown };
                return Err(self.type_error(th, "call", &f, origin));
            };
            th.stack.copy_within(func_idx, func_idx + 1, nargs + 1);
            th.stack.set(func_idx, mm.clone());
            nargs += 1;
            f = mm;
            first = false;
        }
        Ok(nargs)
    }

    /// Register of the running script frame that holds stack slot `slot`.
    fn slot_origin(&self, th: &Thread, slot: usize) -> Origin {
        match th.frames.last() {
            Some(f) if f.is_lua() && slot >= f.base && slot < f.top => Origin::Register((slot - f.base) as u32),
            _ => Origin::Unknown,
        }
    }

    /// Start a call of the value at `func_idx` with `nargs` arguments above it.
    pub(crate) fn precall(
        &mut self,
        th: &mut Thread,
        func_idx: usize,
        nargs: usize,
        nresults: i32,
    ) -> Result<CallKind, LuaError> {
        let nargs = self.resolve_callable(th, func_idx, nargs)?;
        if th.frames.len() >= self.config.max_call_depth {
            return Err(LuaError::StackOverflow);
        }
        match th.stack.get(func_idx) {
            Value::Closure(cl) => {
                let p = &cl.proto;
                let nparams = p.num_params as usize;
                let stack = &th.stack;
                let (base, nvarargs) = if p.is_vararg {
                    let base = func_idx + 1 + nargs;
                    for i in 0..nparams {
                        if i < nargs {
                            stack.set(base + i, stack.get(func_idx + 1 + i));
                            stack.set(func_idx + 1 + i, Value::Nil);
                        } else {
                            stack.set(base + i, Value::Nil);
                        }
                    }
                    (base, nargs.saturating_sub(nparams))
                } else {
                    stack.fill_nil(func_idx + 1 + nargs.min(nparams), func_idx + 1 + nparams);
                    (func_idx + 1, 0)
                };
                let top = base + p.max_stack_size as usize;
                if top > self.config.max_stack_slots {
                    return Err(LuaError::StackOverflow);
                }
                stack.ensure(top);
                th.frames.push(CallFrame {
                    func: func_idx,
                    base,
                    top,
                    pc: 0,
                    nresults,
                    nvarargs,
                    closure: Some(cl),
                    native: None,
                    status: CallStatus::Normal,
                });
                Ok(CallKind::Lua)
            }
            Value::Native(nf) if self.is_protected_call(&nf) => {
                self.precall_protected(th, func_idx, nargs, nresults, nf)
            }
            Value::Native(nf) => {
                let base = func_idx + 1;
                th.frames.push(CallFrame {
                    func: func_idx,
                    base,
                    top: base + nargs,
                    pc: 0,
                    nresults,
                    nvarargs: 0,
                    closure: None,
                    native: Some(nf.clone()),
                    status: CallStatus::Normal,
                });
                let (n, yielded) = {
                    let mut ctx = CallContext::new(self, th, nf.clone(), base, nargs);
                    let n = (nf.func)(&mut ctx)?;
                    (n, ctx.yielded)
                };
                if yielded {
                    return Ok(CallKind::Yield(n));
                }
                self.post_call(th, base, n);
                Ok(CallKind::Native)
            }
            other => Err(self.type_error(th, "call", &other, Origin::Unknown)),
        }
    }

    fn is_protected_call(&self, nf: &Rc<NativeFunction>) -> bool {
        [&self.pcall, &self.xpcall]
            .into_iter()
            .any(|p| p.as_ref().is_some_and(|p| Rc::ptr_eq(p, nf)))
    }

    /// `pcall(f, ...)` and `xpcall(f, msgh, ...)`: push a protected frame and
    /// call `f` above it with all results kept. The frame is completed by
    /// [`Vm::finish_protected`] once `f` returns, or by [`Vm::recover`] when
    /// an error unwinds to it, so `f` runs in the caller's loop and may yield.
    fn precall_protected(
        &mut self,
        th: &mut Thread,
        func_idx: usize,
        nargs: usize,
        nresults: i32,
        nf: Rc<NativeFunction>,
    ) -> Result<CallKind, LuaError> {
        let base = func_idx + 1;
        let with_handler = self.xpcall.as_ref().is_some_and(|x| Rc::ptr_eq(x, &nf));
        let (status, callee) = if with_handler {
            let handler = if nargs < 2 { Value::Nil } else { th.stack.get(base + 1) };
            if !handler.is_function() {
                let got = if nargs < 2 { "no value" } else { handler.type_name() };
                let msg = format!("bad argument #2 to 'xpcall' (function expected, got {got})");
                return Err(self.rt_error(th, msg));
            }
            // The handler lives in the frame status; `f` moves up into its
            // slot so it stays next to its arguments.
            th.stack.set(base + 1, th.stack.get(base));
            th.stack.set(base, Value::Nil);
            (CallStatus::ProtectedWith { handler }, base + 1)
        } else {
            if nargs == 0 {
                return Err(self.rt_error(th, "bad argument #1 to 'pcall' (value expected)"));
            }
            (CallStatus::Protected, base)
        };
        th.frames.push(CallFrame {
            func: func_idx,
            base,
            top: base + nargs,
            pc: 0,
            nresults,
            nvarargs: 0,
            closure: None,
            native: Some(nf),
            status,
        });
        let frame_idx = th.frames.len() - 1;
        match self.precall(th, callee, nargs - (callee - base) - 1, -1) {
            Ok(CallKind::Native) => {
                self.finish_protected(th);
                Ok(CallKind::Native)
            }
            Ok(kind) => Ok(kind),
            Err(e) if e.is_catchable() => {
                self.recover(th, frame_idx, e)?;
                Ok(CallKind::Native)
            }
            Err(e) => Err(e),
        }
    }

    /// Complete the protected frame on top: `true` followed by every result
    /// its callee left between the callee slot and `th.top`.
    pub(crate) fn finish_protected(&mut self, th: &mut Thread) {
        let Some(frame) = th.frames.last() else {
            return;
        };
        // One slot below the callee; for `pcall` that is its own slot.
        let first = match frame.status {
            CallStatus::ProtectedWith { .. } => frame.base,
            _ => frame.func,
        };
        let nres = th.top.saturating_sub(first + 1);
        th.stack.set(first, Value::Boolean(true));
        self.post_call(th, first, nres + 1);
    }

    /// Catch `err` at the protected frame `frame_idx`: drop every frame above
    /// it and complete it with `false` and the error object, passed through
    /// the `xpcall` handler if there is one.
    pub(crate) fn recover(&mut self, th: &mut Thread, frame_idx: usize, err: LuaError) -> Result<(), LuaError> {
        th.unwind_to(frame_idx + 1);
        let Some(frame) = th.frames.get(frame_idx) else {
            return Err(err);
        };
        let (func, status) = (frame.func, frame.status.clone());
        debug!(depth = frame_idx, error = %err, "protected call caught an error");
        let mut value = err.value();
        if let CallStatus::ProtectedWith { handler } = status {
            value = match self.call_value(th, handler, vec![value]) {
                Ok(results) => results.into_iter().next().unwrap_or_default(),
                Err(e) if e.is_catchable() => e.value(),
                Err(e) => return Err(e),
            };
        }
        th.stack.set(func, Value::Boolean(false));
        th.stack.set(func + 1, value);
        self.post_call(th, func, 2);
        Ok(())
    }

    /// Account for one more level of Rust recursion. Fails once either the
    /// nesting limit or the native stack budget is used up.
    fn enter_native(&mut self) -> bool {
        let marker = 0u8;
        let here = std::hint::black_box(&marker) as *const u8 as usize;
        if self.native_depth == 0 {
            self.stack_origin = here;
        } else if self.native_depth >= self.config.max_native_depth
            || here.abs_diff(self.stack_origin) > self.config.max_native_stack
        {
            return false;
        }
        self.native_depth += 1;
        true
    }

    /// Pop the top frame and move its `nres` results from `first` to the
    /// frame's function slot, adjusted to the count the caller expects.
    pub(crate) fn post_call(&mut self, th: &mut Thread, first: usize, nres: usize) {
        let Some(frame) = th.frames.pop() else {
            return;
        };
        let dst = frame.func;
        let count = if frame.nresults < 0 { nres } else { frame.nresults as usize };
        th.stack.ensure(dst + count);
        th.stack.copy_within(first, dst, nres.min(count));
        if count > nres {
            th.stack.fill_nil(dst + nres, dst + count);
        }
        if frame.nresults < 0 {
            th.top = dst + count;
        }
        th.stack.fill_nil(dst + count, frame.top.max(first + nres));
    }

    /// Call `func` from Rust (a native, a metamethod or the host) and run it
    /// to completion. The thread's frames are unwound on error.
    pub(crate) fn call_value(
        &mut self,
        th: &mut Thread,
        func: Value,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, LuaError> {
        if !self.enter_native() {
            return Err(LuaError::StackOverflow);
        }
        let func_idx = th.frames.last().map_or(0, |f| f.top);
        let nargs = args.len();
        th.stack.set(func_idx, func);
        for (i, a) in args.into_iter().enumerate() {
            th.stack.set(func_idx + 1 + i, a);
        }
        let depth = th.frames.len();
        trace!(depth, nargs, "reentrant call");

        th.non_yieldable += 1;
        let result = self.run_call(th, func_idx, nargs, depth);
        th.non_yieldable -= 1;
        self.native_depth -= 1;

        let out = match result {
            Ok(()) => Ok(th.stack.slice(func_idx, th.top)),
            Err(e) => {
                th.unwind_to(depth);
                Err(e)
            }
        };
        th.stack.truncate(func_idx);
        out
    }

    fn run_call(&mut self, th: &mut Thread, func_idx: usize, nargs: usize, depth: usize) -> Result<(), LuaError> {
        let outcome = match self.precall(th, func_idx, nargs, -1)? {
            CallKind::Lua => self.execute(th, depth)?,
            CallKind::Native => Exec::Done,
            CallKind::Yield(n) => Exec::Yield(n),
        };
        match outcome {
            Exec::Done => Ok(()),
            Exec::Yield(_) => Err(LuaError::runtime("attempt to yield across a native call boundary")),
        }
    }

    /// Resume a suspended coroutine, returning what it yielded or returned.
    /// An error inside the coroutine kills it and is returned as `Err`.
    pub(crate) fn resume_thread(&mut self, co: &ThreadRef, args: Vec<Value>) -> Result<Vec<Value>, LuaError> {
        match co.status() {
            ThreadStatus::Suspended => {}
            ThreadStatus::Dead => return Err(LuaError::runtime("cannot resume dead coroutine")),
            _ => return Err(LuaError::runtime("cannot resume non-suspended coroutine")),
        }
        let Ok(mut th) = co.thread.try_borrow_mut() else {
            return Err(LuaError::runtime("cannot resume non-suspended coroutine"));
        };
        if !self.enter_native() {
            return Err(LuaError::runtime("C stack overflow"));
        }

        let prev = std::mem::replace(&mut self.current, co.clone());
        prev.set_status(ThreadStatus::Normal);
        co.set_status(ThreadStatus::Running);
        debug!(coroutine = ?Rc::as_ptr(co), nargs = args.len(), "resume");

        let outcome = self.run_coroutine(&mut th, args);
        self.native_depth -= 1;

        self.current = prev;
        self.current.set_status(ThreadStatus::Running);

        match outcome {
            Ok(Exec::Yield(n)) => {
                co.set_status(ThreadStatus::Suspended);
                let base = th.frames.last().map_or(0, |f| f.base);
                debug!(coroutine = ?Rc::as_ptr(co), nvalues = n, "yield");
                Ok(th.stack.slice(base, base + n))
            }
            Ok(Exec::Done) => {
                co.set_status(ThreadStatus::Dead);
                let results = th.stack.slice(0, th.top);
                th.stack.truncate(0);
                debug!(coroutine = ?Rc::as_ptr(co), "coroutine finished");
                Ok(results)
            }
            Err(e) => {
                co.set_status(ThreadStatus::Dead);
                th.unwind_to(0);
                th.stack.truncate(0);
                debug!(coroutine = ?Rc::as_ptr(co), error = %e, "coroutine died");
                Err(e)
            }
        }
    }

    fn run_coroutine(&mut self, th: &mut Thread, args: Vec<Value>) -> Result<Exec, LuaError> {
        let nargs = args.len();
        if let Some(body) = th.body.take() {
            th.stack.set(0, body);
            for (i, a) in args.into_iter().enumerate() {
                th.stack.set(1 + i, a);
            }
            return match self.precall(th, 0, nargs, -1)? {
                CallKind::Lua => self.execute(th, 0),
                CallKind::Native => Ok(Exec::Done),
                CallKind::Yield(n) => Ok(Exec::Yield(n)),
            };
        }
        // The top frame is the native that yielded; the resume arguments
        // become its results.
        let base = match th.frames.last() {
            Some(f) if !f.is_lua() => f.base,
            _ => return Err(LuaError::Bytecode("suspended coroutine has no yield frame".into())),
        };
        for (i, a) in args.into_iter().enumerate() {
            th.stack.set(base + i, a);
        }
        self.post_call(th, base, nargs);
        if th.frames.is_empty() {
            Ok(Exec::Done)
        } else {
            self.execute(th, 0)
        }
    }
}
