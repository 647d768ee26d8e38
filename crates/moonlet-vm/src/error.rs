//! Errors surfaced by the embedding API.

use moonlet_compiler::CompileError;
use moonlet_core::error::LuaError;
use thiserror::Error;

use crate::binary_chunk::ChunkError;

/// Anything that can go wrong loading or running a chunk from the host.
#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Runtime(#[from] LuaError),
}

impl VmError {
    /// Message as a script would see it through `pcall` or `load`.
    pub fn message(&self) -> String {
        self.to_string()
    }
}
