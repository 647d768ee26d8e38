use std::rc::Rc;

use moonlet_compiler::compile;
use moonlet_core::opcode::{Instruction, OpCode};
use moonlet_core::proto::{Constant, Proto};

/// Compile a source string, panicking with the message on failure.
pub fn compile_str(source: &str) -> Rc<Proto> {
    compile(source.as_bytes(), "=test").unwrap_or_else(|e| {
        panic!("compile failed: {e}\nsource:\n{source}");
    })
}

/// Compile a source string and return the full error text.
pub fn compile_str_err(source: &str) -> String {
    match compile(source.as_bytes(), "=test") {
        Err(e) => e.to_string(),
        Ok(_) => panic!("expected compile error, got success\nsource:\n{source}"),
    }
}

pub fn has_opcode(proto: &Proto, op: OpCode) -> bool {
    proto.code.iter().any(|i| i.opcode() == Some(op))
}

pub fn count_opcode(proto: &Proto, op: OpCode) -> usize {
    proto.code.iter().filter(|i| i.opcode() == Some(op)).count()
}

/// First instruction with a given opcode.
pub fn find_opcode(proto: &Proto, op: OpCode) -> Option<Instruction> {
    proto.code.iter().copied().find(|i| i.opcode() == Some(op))
}

pub fn string_constants(proto: &Proto) -> Vec<String> {
    proto
        .constants
        .iter()
        .filter_map(|k| match k {
            Constant::String(s) => Some(s.to_string()),
            _ => None,
        })
        .collect()
}

#[allow(dead_code)]
pub fn number_constants(proto: &Proto) -> Vec<f64> {
    proto
        .constants
        .iter()
        .filter_map(|k| match k {
            Constant::Number(n) => Some(*n),
            _ => None,
        })
        .collect()
}
