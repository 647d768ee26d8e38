//! Moonlet virtual machine: register-based bytecode interpreter with
//! metamethods, coroutines and a binary chunk format.

pub mod arith;
pub mod binary_chunk;
mod call;
pub mod compare;
pub mod config;
mod debuginfo;
mod dispatch;
pub mod error;
pub mod metamethod;
pub mod vm;

pub use binary_chunk::ChunkError;
pub use config::VmConfig;
pub use error::VmError;
pub use vm::Vm;
