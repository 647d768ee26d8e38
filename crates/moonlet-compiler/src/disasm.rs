/// Bytecode listing in the style of `luac -l -l`.
use std::fmt::Write;

use moonlet_core::number::fmt_number;
use moonlet_core::opcode::{index_k, is_k, ArgMode, Instruction, InstructionFormat, OpCode};
use moonlet_core::proto::{Constant, Proto};

/// List a prototype and all nested prototypes.
pub fn disassemble(proto: &Proto) -> String {
    let mut out = String::new();
    disassemble_proto(&mut out, proto, true);
    out
}

fn disassemble_proto(out: &mut String, proto: &Proto, main: bool) {
    let source = proto
        .source
        .as_ref()
        .map(|s| s.to_str_lossy().trim_start_matches(['@', '=']).to_string())
        .unwrap_or_else(|| "?".to_string());
    let kind = if main { "main" } else { "function" };
    let _ = writeln!(
        out,
        "\n{kind} <{source}:{},{}> ({} instructions)",
        proto.line_defined,
        proto.last_line_defined,
        proto.code.len()
    );
    let _ = writeln!(
        out,
        "{}{} params, {} slots, {} upvalues, {} locals, {} constants, {} functions",
        proto.num_params,
        if proto.is_vararg { "+" } else { "" },
        proto.max_stack_size,
        proto.upvalues.len(),
        proto.local_vars.len(),
        proto.constants.len(),
        proto.protos.len(),
    );

    for (pc, inst) in proto.code.iter().enumerate() {
        let line = proto.get_line(pc);
        let line_str = if line > 0 { format!("[{line}]") } else { "[-]".to_string() };
        let _ = write!(out, "\t{}\t{}\t", pc + 1, line_str);
        disasm_instruction(out, pc, *inst, proto);
        out.push('\n');
    }

    let _ = writeln!(out, "constants ({}):", proto.constants.len());
    for (i, k) in proto.constants.iter().enumerate() {
        let _ = writeln!(out, "\t{}\t{}", i + 1, constant_text(k));
    }
    let _ = writeln!(out, "locals ({}):", proto.local_vars.len());
    for (i, v) in proto.local_vars.iter().enumerate() {
        let _ = writeln!(out, "\t{}\t{}\t{}\t{}", i, v.name, v.start_pc + 1, v.end_pc + 1);
    }
    let _ = writeln!(out, "upvalues ({}):", proto.upvalues.len());
    for (i, up) in proto.upvalues.iter().enumerate() {
        let name = up.name.as_ref().map_or_else(|| "-".to_string(), |n| n.to_string());
        let _ = writeln!(out, "\t{}\t{}\t{}\t{}", i, name, u8::from(up.in_stack), up.index);
    }

    for p in &proto.protos {
        disassemble_proto(out, p, false);
    }
}

fn constant_text(k: &Constant) -> String {
    match k {
        Constant::Nil => "nil".to_string(),
        Constant::Boolean(b) => b.to_string(),
        Constant::Number(n) => fmt_number(*n),
        Constant::String(s) => format!("\"{}\"", s.to_str_lossy().escape_debug()),
    }
}

/// Operand as printed: constants are negative, 1-based.
fn rk_text(x: u32) -> String {
    if is_k(x) {
        format!("-{}", index_k(x) + 1)
    } else {
        x.to_string()
    }
}

/// Write one instruction, with a trailing comment for constants, upvalues
/// and jump targets.
pub fn disasm_instruction(out: &mut String, pc: usize, inst: Instruction, proto: &Proto) {
    let Some(op) = inst.opcode() else {
        let _ = write!(out, "??? {:#010x}", inst.0);
        return;
    };
    let _ = write!(out, "{:<9}\t", op.name());
    match op.format() {
        InstructionFormat::IABC => {
            let _ = write!(out, "{}", inst.a());
            if op.b_mode() != ArgMode::N {
                let b = if op.b_mode() == ArgMode::K { rk_text(inst.b()) } else { inst.b().to_string() };
                let _ = write!(out, " {b}");
            }
            if op.c_mode() != ArgMode::N {
                let c = if op.c_mode() == ArgMode::K { rk_text(inst.c()) } else { inst.c().to_string() };
                let _ = write!(out, " {c}");
            }
        }
        InstructionFormat::IABx => {
            let _ = write!(out, "{} {}", inst.a(), inst.bx());
        }
        InstructionFormat::IAsBx => {
            let _ = write!(out, "{} {}", inst.a(), inst.sbx());
        }
        InstructionFormat::IAx => {
            let _ = write!(out, "{}", inst.ax_field());
        }
    }

    let constant = |x: u32| proto.constants.get(index_k(x) as usize).map(constant_text);
    let upvalue = |i: u32| {
        proto
            .upvalues
            .get(i as usize)
            .and_then(|u| u.name.as_ref())
            .map_or_else(|| "-".to_string(), |n| n.to_string())
    };
    let comment = match op {
        OpCode::LoadK => proto.constants.get(inst.bx() as usize).map(constant_text),
        OpCode::GetUpval | OpCode::SetUpval => Some(upvalue(inst.b())),
        OpCode::GetTabUp => {
            let key = if is_k(inst.c()) { constant(inst.c()) } else { None };
            Some(format!("{} {}", upvalue(inst.b()), key.unwrap_or_default()))
        }
        OpCode::SetTabUp => {
            let key = if is_k(inst.b()) { constant(inst.b()) } else { None };
            Some(format!("{} {}", upvalue(inst.a()), key.unwrap_or_default()))
        }
        OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep | OpCode::TForLoop => {
            Some(format!("to {}", pc as i64 + inst.sbx() as i64 + 2))
        }
        OpCode::Closure => Some(format!("function [{}]", inst.bx())),
        _ if op.b_mode() == ArgMode::K || op.c_mode() == ArgMode::K => {
            let parts: Vec<String> = [inst.b(), inst.c()]
                .into_iter()
                .filter(|&x| is_k(x))
                .filter_map(constant)
                .collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        }
        _ => None,
    };
    if let Some(c) = comment {
        let _ = write!(out, "\t; {c}");
    }
}
