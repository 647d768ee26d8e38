//! Moonlet compiler: lexer, parser and register bytecode generator.
//!
//! The parser never builds a syntax tree. Each construct is compiled as it
//! is recognized, with pending operands kept on an explicit stack in the
//! function state until their final register or constant is known.

pub mod compiler;
pub mod disasm;
pub mod lexer;
pub mod token;

pub use compiler::{compile, CompileError};
pub use disasm::disassemble;
