//! moonlet core types: values, strings, tables, prototypes and the host call surface.

pub mod api;
pub mod error;
pub mod llrb;
pub mod number;
pub mod object;
pub mod opcode;
pub mod proto;
pub mod string;
pub mod table;
pub mod thread;
pub mod value;

pub use error::LuaError;
pub use string::LuaString;
pub use value::Value;
