//! Names for values in error messages, recovered from bytecode.
//!
//! `attempt to call a nil value (global 'f')`: the parenthesised part comes
//! from finding the instruction that last wrote the register and reading the
//! name off its operands.

use moonlet_core::opcode::{index_k, is_k, OpCode};
use moonlet_core::proto::{Constant, Proto};

/// The last pc before `lastpc` that writes `reg`, if it is not behind a jump
/// target (where the writer is ambiguous).
fn find_set_reg(p: &Proto, lastpc: usize, reg: u32) -> Option<usize> {
    let mut setreg = None;
    let mut jmptarget = 0;
    for pc in 0..lastpc.min(p.code.len()) {
        let i = p.code[pc];
        let Some(op) = i.opcode() else { continue };
        let a = i.a();
        let change = match op {
            OpCode::LoadNil => a <= reg && reg <= a + i.b(),
            OpCode::TForCall => reg >= a + 2,
            OpCode::Call | OpCode::TailCall => reg >= a,
            OpCode::Jmp => {
                let dest = pc as i64 + 1 + i.sbx() as i64;
                if (pc as i64) < dest && dest <= lastpc as i64 && dest as usize > jmptarget {
                    jmptarget = dest as usize;
                }
                false
            }
            _ => sets_a(op) && reg == a,
        };
        if change {
            setreg = if pc < jmptarget { None } else { Some(pc) };
        }
    }
    setreg
}

fn sets_a(op: OpCode) -> bool {
    !matches!(
        op,
        OpCode::SetTabUp
            | OpCode::SetUpval
            | OpCode::SetTable
            | OpCode::Jmp
            | OpCode::Eq
            | OpCode::Lt
            | OpCode::Le
            | OpCode::Test
            | OpCode::Return
            | OpCode::TForCall
            | OpCode::SetList
            | OpCode::ExtraArg
    )
}

fn constant_name(p: &Proto, rk: u32) -> String {
    if is_k(rk) {
        if let Some(Constant::String(s)) = p.constants.get(index_k(rk) as usize) {
            return s.to_str_lossy().into_owned();
        }
    }
    "?".to_string()
}

fn upvalue_name(p: &Proto, idx: u32) -> String {
    p.upvalues
        .get(idx as usize)
        .and_then(|u| u.name.as_ref())
        .map_or_else(|| "?".to_string(), |n| n.to_str_lossy().into_owned())
}

/// Kind and name of the value in `reg` at `lastpc`, e.g. `("global", "print")`.
pub fn object_name(p: &Proto, lastpc: usize, reg: u32) -> Option<(&'static str, String)> {
    if let Some(name) = p.local_name(reg as usize + 1, lastpc) {
        return Some(("local", name.to_str_lossy().into_owned()));
    }
    let pc = find_set_reg(p, lastpc, reg)?;
    let i = p.code[pc];
    match i.opcode()? {
        OpCode::Move => {
            let b = i.b();
            if b < i.a() {
                object_name(p, pc, b)
            } else {
                None
            }
        }
        OpCode::GetTabUp => {
            let key = constant_name(p, i.c());
            let kind = if upvalue_name(p, i.b()) == "_ENV" { "global" } else { "field" };
            Some((kind, key))
        }
        OpCode::GetTable => {
            let key = constant_name(p, i.c());
            let on_env = p
                .local_name(i.b() as usize + 1, pc)
                .is_some_and(|n| n.as_bytes() == b"_ENV");
            Some((if on_env { "global" } else { "field" }, key))
        }
        OpCode::GetUpval => Some(("upvalue", upvalue_name(p, i.b()))),
        OpCode::LoadK => match p.constants.get(i.bx() as usize) {
            Some(Constant::String(s)) => Some(("constant", s.to_str_lossy().into_owned())),
            _ => None,
        },
        OpCode::Self_ => Some(("method", constant_name(p, i.c()))),
        _ => None,
    }
}

/// ` (kind 'name')` for a register, or empty.
pub fn register_info(p: &Proto, lastpc: usize, reg: u32) -> String {
    match object_name(p, lastpc, reg) {
        Some((kind, name)) => format!(" ({kind} '{name}')"),
        None => String::new(),
    }
}

/// ` (upvalue 'name')` for an upvalue index.
pub fn upvalue_info(p: &Proto, idx: u32) -> String {
    format!(" (upvalue '{}')", upvalue_name(p, idx))
}
