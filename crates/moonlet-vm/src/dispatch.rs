//! Main bytecode dispatch loop.

use std::cell::RefCell;
use std::rc::Rc;

use moonlet_core::error::LuaError;
use moonlet_core::number::ArithOp;
use moonlet_core::object::Closure;
use moonlet_core::opcode::{fb2int, index_k, is_k, OpCode, LFIELDS_PER_FLUSH};
use moonlet_core::proto::{Constant, Proto};
use moonlet_core::table::Table;
use moonlet_core::thread::{CallFrame, Thread, ValueStack};
use moonlet_core::value::Value;
use tracing::{trace, warn};

use crate::call::{CallKind, Exec};
use crate::vm::{Origin, Vm};

fn constant_value(k: &Constant) -> Value {
    match k {
        Constant::Nil => Value::Nil,
        Constant::Boolean(b) => Value::Boolean(*b),
        Constant::Number(n) => Value::Number(*n),
        Constant::String(s) => Value::String(s.clone()),
    }
}

fn bad(msg: impl Into<String>) -> LuaError {
    LuaError::Bytecode(msg.into())
}

#[inline]
fn konst(p: &Proto, idx: u32) -> Result<Value, LuaError> {
    p.constants
        .get(idx as usize)
        .map(constant_value)
        .ok_or_else(|| bad(format!("constant index {idx} out of range")))
}

/// Register or constant operand.
#[inline]
fn rk(stack: &ValueStack, base: usize, p: &Proto, x: u32) -> Result<Value, LuaError> {
    if is_k(x) {
        konst(p, index_k(x))
    } else {
        Ok(stack.get(base + x as usize))
    }
}

#[inline]
fn rk_origin(x: u32) -> Origin {
    if is_k(x) {
        Origin::Unknown
    } else {
        Origin::Register(x)
    }
}

/// Operand of the `EXTRAARG` following the instruction at `pc`.
fn extra_arg(p: &Proto, pc: usize) -> Result<u32, LuaError> {
    match p.code.get(pc) {
        Some(i) if i.opcode() == Some(OpCode::ExtraArg) => Ok(i.ax_field()),
        _ => Err(bad("missing EXTRAARG")),
    }
}

fn arith_of(op: OpCode) -> Option<ArithOp> {
    Some(match op {
        OpCode::Add => ArithOp::Add,
        OpCode::Sub => ArithOp::Sub,
        OpCode::Mul => ArithOp::Mul,
        OpCode::Mod => ArithOp::Mod,
        OpCode::Pow => ArithOp::Pow,
        OpCode::Div => ArithOp::Div,
        OpCode::IDiv => ArithOp::IDiv,
        OpCode::BAnd => ArithOp::BAnd,
        OpCode::BOr => ArithOp::BOr,
        OpCode::BXor => ArithOp::BXor,
        OpCode::Shl => ArithOp::Shl,
        OpCode::Shr => ArithOp::Shr,
        OpCode::Unm => ArithOp::Unm,
        OpCode::BNot => ArithOp::BNot,
        _ => return None,
    })
}

/// Numeric `for` control value (already checked by FORPREP).
fn for_value(v: Value) -> Result<f64, LuaError> {
    v.as_number().ok_or_else(|| bad("'for' control value is not a number"))
}

fn jump(frame: &mut CallFrame, sbx: i32) {
    frame.pc = (frame.pc as i64 + sbx as i64) as usize;
}

impl Vm {
    /// Run script frames until the frame stack shrinks to `stop_depth` or a
    /// native yields. Errors stop at the nearest protected frame at or above
    /// `stop_depth`, and execution carries on in the frame below it.
    pub(crate) fn execute(&mut self, th: &mut Thread, stop_depth: usize) -> Result<Exec, LuaError> {
        loop {
            let err = match self.run_frames(th, stop_depth) {
                Ok(exec) => return Ok(exec),
                Err(err) => err,
            };
            let Some(idx) = th.frames.iter().rposition(CallFrame::is_protected) else {
                return Err(err);
            };
            if idx < stop_depth {
                return Err(err);
            }
            if !err.is_catchable() {
                warn!(error = %err, "uncatchable error escaped a protected call");
                return Err(err);
            }
            self.recover(th, idx, err)?;
            if th.frames.len() <= stop_depth {
                return Ok(Exec::Done);
            }
        }
    }

    fn run_frames(&mut self, th: &mut Thread, stop_depth: usize) -> Result<Exec, LuaError> {
        'frame: loop {
            let (cl, base) = match th.frames.last() {
                Some(CallFrame {
                    closure: Some(cl),
                    base,
                    ..
                }) => (cl.clone(), *base),
                // A callee of `pcall`/`xpcall` returned to its protected frame.
                Some(f) if f.is_protected() => {
                    self.finish_protected(th);
                    if th.frames.len() <= stop_depth {
                        return Ok(Exec::Done);
                    }
                    continue 'frame;
                }
                _ => return Err(bad("no script frame to execute")),
            };
            let stack = th.stack.clone();
            let p: &Proto = &cl.proto;
            let fi = th.frames.len() - 1;

            loop {
                let pc = th.frames[fi].pc;
                let inst = *p.code.get(pc).ok_or_else(|| bad("pc out of range"))?;
                th.frames[fi].pc = pc + 1;
                let op = inst
                    .opcode()
                    .ok_or_else(|| bad(format!("invalid opcode {}", inst.op_bits())))?;
                let a = inst.a();
                let ra = base + a as usize;

                match op {
                    OpCode::Move => stack.set(ra, stack.get(base + inst.b() as usize)),
                    OpCode::LoadK => stack.set(ra, konst(p, inst.bx())?),
                    OpCode::LoadKx => {
                        let ax = extra_arg(p, pc + 1)?;
                        th.frames[fi].pc += 1;
                        stack.set(ra, konst(p, ax)?);
                    }
                    OpCode::LoadBool => {
                        stack.set(ra, Value::Boolean(inst.b() != 0));
                        if inst.c() != 0 {
                            th.frames[fi].pc += 1;
                        }
                    }
                    OpCode::LoadNil => stack.fill_nil(ra, ra + inst.b() as usize + 1),
                    OpCode::GetUpval => {
                        let uv = cl.upvalues.get(inst.b() as usize).ok_or_else(|| bad("upvalue index"))?;
                        let v = uv.borrow().get();
                        stack.set(ra, v);
                    }
                    OpCode::GetTabUp => {
                        let b = inst.b();
                        let t = cl.upvalues.get(b as usize).ok_or_else(|| bad("upvalue index"))?.borrow().get();
                        let key = rk(&stack, base, p, inst.c())?;
                        let v = self.index_value(th, &t, &key, Origin::Upvalue(b))?;
                        stack.set(ra, v);
                    }
                    OpCode::GetTable => {
                        let b = inst.b();
                        let t = stack.get(base + b as usize);
                        let key = rk(&stack, base, p, inst.c())?;
                        let v = self.index_value(th, &t, &key, Origin::Register(b))?;
                        stack.set(ra, v);
                    }
                    OpCode::SetTabUp => {
                        let t = cl.upvalues.get(a as usize).ok_or_else(|| bad("upvalue index"))?.borrow().get();
                        let key = rk(&stack, base, p, inst.b())?;
                        let val = rk(&stack, base, p, inst.c())?;
                        self.set_index(th, &t, key, val, Origin::Upvalue(a))?;
                    }
                    OpCode::SetUpval => {
                        let uv = cl.upvalues.get(inst.b() as usize).ok_or_else(|| bad("upvalue index"))?;
                        uv.borrow_mut().set(stack.get(ra));
                    }
                    OpCode::SetTable => {
                        let t = stack.get(ra);
                        let key = rk(&stack, base, p, inst.b())?;
                        let val = rk(&stack, base, p, inst.c())?;
                        self.set_index(th, &t, key, val, Origin::Register(a))?;
                    }
                    OpCode::NewTable => {
                        let t = Table::with_capacity(fb2int(inst.b()) as usize);
                        stack.set(ra, Value::Table(Rc::new(RefCell::new(t))));
                    }
                    OpCode::Self_ => {
                        let b = inst.b();
                        let obj = stack.get(base + b as usize);
                        let key = rk(&stack, base, p, inst.c())?;
                        stack.set(ra + 1, obj.clone());
                        let v = self.index_value(th, &obj, &key, Origin::Register(b))?;
                        stack.set(ra, v);
                    }
                    OpCode::Add
                    | OpCode::Sub
                    | OpCode::Mul
                    | OpCode::Mod
                    | OpCode::Pow
                    | OpCode::Div
                    | OpCode::IDiv
                    | OpCode::BAnd
                    | OpCode::BOr
                    | OpCode::BXor
                    | OpCode::Shl
                    | OpCode::Shr => {
                        let (b, c) = (inst.b(), inst.c());
                        let x = rk(&stack, base, p, b)?;
                        let y = rk(&stack, base, p, c)?;
                        let aop = arith_of(op).ok_or_else(|| bad("arithmetic opcode"))?;
                        let v = match (&x, &y, aop) {
                            (Value::Number(m), Value::Number(n), ArithOp::Add) => Value::Number(m + n),
                            (Value::Number(m), Value::Number(n), ArithOp::Sub) => Value::Number(m - n),
                            (Value::Number(m), Value::Number(n), ArithOp::Mul) => Value::Number(m * n),
                            _ => self.arith(th, aop, &x, &y, [rk_origin(b), rk_origin(c)])?,
                        };
                        stack.set(ra, v);
                    }
                    OpCode::Unm | OpCode::BNot => {
                        let b = inst.b();
                        let x = stack.get(base + b as usize);
                        let aop = arith_of(op).ok_or_else(|| bad("arithmetic opcode"))?;
                        let origin = Origin::Register(b);
                        let v = self.arith(th, aop, &x, &x, [origin, origin])?;
                        stack.set(ra, v);
                    }
                    OpCode::Not => {
                        let v = stack.get(base + inst.b() as usize);
                        stack.set(ra, Value::Boolean(v.is_falsy()));
                    }
                    OpCode::Len => {
                        let b = inst.b();
                        let v = stack.get(base + b as usize);
                        let n = self.len_of(th, &v, Origin::Register(b))?;
                        stack.set(ra, n);
                    }
                    OpCode::Concat => {
                        let (b, c) = (inst.b(), inst.c());
                        let values = stack.slice(base + b as usize, base + c as usize + 1);
                        let v = self.concat(th, values, Some(b))?;
                        stack.set(ra, v);
                    }
                    OpCode::Jmp => {
                        if a > 0 {
                            let n = th.close_upvalues(base + a as usize - 1);
                            if n > 0 {
                                trace!(closed = n, "closed upvalues on jump");
                            }
                        }
                        jump(&mut th.frames[fi], inst.sbx());
                    }
                    OpCode::Eq | OpCode::Lt | OpCode::Le => {
                        let x = rk(&stack, base, p, inst.b())?;
                        let y = rk(&stack, base, p, inst.c())?;
                        let r = match op {
                            OpCode::Eq => self.equals(th, &x, &y)?,
                            OpCode::Lt => self.less_than_values(th, &x, &y)?,
                            _ => self.less_equal_values(th, &x, &y)?,
                        };
                        // Matching the expected outcome falls through to the JMP.
                        if r != (a != 0) {
                            th.frames[fi].pc += 1;
                        }
                    }
                    OpCode::Test => {
                        if stack.get(ra).is_truthy() != (inst.c() != 0) {
                            th.frames[fi].pc += 1;
                        }
                    }
                    OpCode::TestSet => {
                        let v = stack.get(base + inst.b() as usize);
                        if v.is_truthy() != (inst.c() != 0) {
                            th.frames[fi].pc += 1;
                        } else {
                            stack.set(ra, v);
                        }
                    }
                    OpCode::Call => {
                        let b = inst.b() as usize;
                        let nargs = if b != 0 { b - 1 } else { th.top - ra - 1 };
                        let nresults = inst.c() as i32 - 1;
                        match self.precall(th, ra, nargs, nresults)? {
                            CallKind::Lua => continue 'frame,
                            CallKind::Native => {}
                            CallKind::Yield(n) => return Ok(Exec::Yield(n)),
                        }
                    }
                    OpCode::TailCall => {
                        let b = inst.b() as usize;
                        let nargs = if b != 0 { b - 1 } else { th.top - ra - 1 };
                        let nargs = self.resolve_callable(th, ra, nargs)?;
                        if let Value::Closure(_) = stack.get(ra) {
                            th.close_upvalues(base);
                            let Some(frame) = th.frames.pop() else {
                                return Err(bad("tail call without a frame"));
                            };
                            stack.copy_within(ra, frame.func, nargs + 1);
                            stack.fill_nil(frame.func + nargs + 1, frame.top.max(ra + nargs + 1));
                            self.precall(th, frame.func, nargs, frame.nresults)?;
                            continue 'frame;
                        }
                        // Natives run as a plain call; the RETURN that follows
                        // hands their results back.
                        match self.precall(th, ra, nargs, -1)? {
                            CallKind::Yield(n) => return Ok(Exec::Yield(n)),
                            CallKind::Lua => continue 'frame,
                            CallKind::Native => {}
                        }
                    }
                    OpCode::Return => {
                        let b = inst.b() as usize;
                        let n = if b != 0 { b - 1 } else { th.top.saturating_sub(ra) };
                        let closed = th.close_upvalues(base);
                        if closed > 0 {
                            trace!(closed, "closed upvalues on return");
                        }
                        self.post_call(th, ra, n);
                        if th.frames.len() <= stop_depth {
                            return Ok(Exec::Done);
                        }
                        continue 'frame;
                    }
                    OpCode::ForLoop => {
                        let step = for_value(stack.get(ra + 2))?;
                        let idx = for_value(stack.get(ra))? + step;
                        let limit = for_value(stack.get(ra + 1))?;
                        let more = if step > 0.0 { idx <= limit } else { limit <= idx };
                        if more {
                            jump(&mut th.frames[fi], inst.sbx());
                            stack.set(ra, Value::Number(idx));
                            stack.set(ra + 3, Value::Number(idx));
                        }
                    }
                    OpCode::ForPrep => {
                        let init = stack.get(ra).to_number();
                        let limit = stack.get(ra + 1).to_number();
                        let step = stack.get(ra + 2).to_number();
                        let Some(init) = init else {
                            return Err(self.rt_error(th, "'for' initial value must be a number"));
                        };
                        let Some(limit) = limit else {
                            return Err(self.rt_error(th, "'for' limit must be a number"));
                        };
                        let Some(step) = step else {
                            return Err(self.rt_error(th, "'for' step must be a number"));
                        };
                        if step == 0.0 {
                            return Err(self.rt_error(th, "'for' step is zero"));
                        }
                        stack.set(ra, Value::Number(init - step));
                        stack.set(ra + 1, Value::Number(limit));
                        stack.set(ra + 2, Value::Number(step));
                        jump(&mut th.frames[fi], inst.sbx());
                    }
                    OpCode::TForCall => {
                        let cb = ra + 3;
                        stack.set(cb, stack.get(ra));
                        stack.set(cb + 1, stack.get(ra + 1));
                        stack.set(cb + 2, stack.get(ra + 2));
                        match self.precall(th, cb, 2, inst.c() as i32)? {
                            CallKind::Lua => continue 'frame,
                            CallKind::Native => {}
                            CallKind::Yield(n) => return Ok(Exec::Yield(n)),
                        }
                    }
                    OpCode::TForLoop => {
                        let v = stack.get(ra + 1);
                        if !v.is_nil() {
                            stack.set(ra, v);
                            jump(&mut th.frames[fi], inst.sbx());
                        }
                    }
                    OpCode::SetList => {
                        let n = match inst.b() as usize {
                            0 => th.top.saturating_sub(ra + 1),
                            b => b,
                        };
                        let c = match inst.c() {
                            0 => {
                                let ax = extra_arg(p, pc + 1)?;
                                th.frames[fi].pc += 1;
                                ax
                            }
                            c => c,
                        };
                        let Value::Table(t) = stack.get(ra) else {
                            return Err(bad("SETLIST target is not a table"));
                        };
                        let offset = (c.saturating_sub(1) * LFIELDS_PER_FLUSH) as i64;
                        let mut t = t.borrow_mut();
                        for i in 1..=n {
                            t.set_int(offset + i as i64, stack.get(ra + i));
                        }
                    }
                    OpCode::Closure => {
                        let child = p
                            .protos
                            .get(inst.bx() as usize)
                            .ok_or_else(|| bad("closure index out of range"))?
                            .clone();
                        let mut upvalues = Vec::with_capacity(child.upvalues.len());
                        for desc in &child.upvalues {
                            let uv = if desc.in_stack {
                                th.find_or_create_upvalue(base + desc.index as usize)
                            } else {
                                cl.upvalues
                                    .get(desc.index as usize)
                                    .ok_or_else(|| bad("upvalue index"))?
                                    .clone()
                            };
                            upvalues.push(uv);
                        }
                        stack.set(ra, Value::Closure(Rc::new(Closure::new(child, upvalues))));
                    }
                    OpCode::VarArg => {
                        let nvarargs = th.frames[fi].nvarargs;
                        let n = match inst.b() as usize {
                            0 => {
                                th.top = ra + nvarargs;
                                nvarargs
                            }
                            b => b - 1,
                        };
                        for j in 0..n {
                            let v = if j < nvarargs {
                                stack.get(base - nvarargs + j)
                            } else {
                                Value::Nil
                            };
                            stack.set(ra + j, v);
                        }
                    }
                    OpCode::ExtraArg => return Err(bad("unexpected EXTRAARG")),
                }
            }
        }
    }
}
