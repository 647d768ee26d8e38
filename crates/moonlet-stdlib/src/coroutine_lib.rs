//! Coroutine library.
//!
//! A coroutine is a [`Value::Thread`] wrapping its own stack and frames.
//! Resuming and yielding are done by the VM; `yield` only marks the call
//! context so the interpreter suspends once the native returns.

use std::rc::Rc;

use moonlet_core::api::CallContext;
use moonlet_core::error::LuaError;
use moonlet_core::object::NativeFunction;
use moonlet_core::table::TableRef;
use moonlet_core::thread::{Coroutine, Thread, ThreadRef, ThreadStatus};
use moonlet_core::value::Value;
use tracing::debug;

use crate::register_lib;

pub fn register(globals: &TableRef) {
    register_lib(
        globals,
        "coroutine",
        &[
            ("create", coroutine_create),
            ("resume", coroutine_resume),
            ("yield", coroutine_yield),
            ("status", coroutine_status),
            ("wrap", coroutine_wrap),
            ("running", coroutine_running),
            ("isyieldable", coroutine_isyieldable),
        ],
    );
}

fn new_coroutine(body: Value) -> ThreadRef {
    Coroutine::new(Thread::new_coroutine(body), ThreadStatus::Suspended)
}

fn coroutine_create(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let f = ctx.expect_function(1)?;
    let co = new_coroutine(f);
    debug!(coroutine = ?Rc::as_ptr(&co), "coroutine created");
    Ok(ctx.return_one(Value::Thread(co)))
}

fn coroutine_resume(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let co = ctx.expect_thread(1)?;
    let args = ctx.args_from(2);
    match ctx.rt.resume(&co, args) {
        Ok(values) => Ok(ctx.returns(std::iter::once(Value::Boolean(true)).chain(values))),
        Err(LuaError::Bytecode(msg)) => Err(LuaError::Bytecode(msg)),
        Err(e) => Ok(ctx.returns([Value::Boolean(false), e.value()])),
    }
}

fn coroutine_yield(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let values = ctx.args_from(1);
    ctx.yield_values(values)
}

fn coroutine_status(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let co = ctx.expect_thread(1)?;
    Ok(ctx.return_one(co.status().as_str()))
}

/// Body of the function returned by `coroutine.wrap`; upvalue 0 is the
/// coroutine. Errors propagate to the caller instead of being returned.
fn wrap_resume(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let Value::Thread(co) = ctx.upvalue(0) else {
        return Err(ctx.error("wrapped coroutine is missing"));
    };
    let args = ctx.args_from(1);
    let values = ctx.rt.resume(&co, args)?;
    Ok(ctx.returns(values))
}

fn coroutine_wrap(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let f = ctx.expect_function(1)?;
    let co = new_coroutine(f);
    let wrapped = NativeFunction::with_upvalues("wrap", wrap_resume, vec![Value::Thread(co)]);
    Ok(ctx.return_one(Value::Native(Rc::new(wrapped))))
}

fn coroutine_running(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let (co, is_main) = ctx.rt.running();
    Ok(ctx.returns([Value::Thread(co), Value::Boolean(is_main)]))
}

fn coroutine_isyieldable(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let yieldable = !ctx.thread.is_main && ctx.thread.non_yieldable == 0;
    Ok(ctx.return_one(yieldable))
}
