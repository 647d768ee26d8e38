//! Moonlet standard library: base functions plus the coroutine, table,
//! string and math libraries.
//!
//! Every function is a plain [`NativeFn`]; anything that needs the
//! interpreter (calls, `tostring`, loading) goes through the
//! [`Runtime`](moonlet_core::api::Runtime) handle in the call context.

pub mod base_lib;
pub mod coroutine_lib;
pub mod math;
pub mod string_lib;
pub mod table_lib;

use std::rc::Rc;

use moonlet_core::api::NativeFn;
use moonlet_core::object::NativeFunction;
use moonlet_core::table::{Table, TableRef};
use moonlet_core::value::Value;

/// Version string exposed as `_VERSION`.
pub const VERSION: &str = "Lua 5.3";

/// Register every library into `globals`. Returns the metatable shared by
/// all strings.
pub fn open_libs(globals: &TableRef) -> TableRef {
    base_lib::register(globals);
    coroutine_lib::register(globals);
    table_lib::register(globals);
    math::register(globals);
    string_lib::register(globals)
}

pub(crate) fn native(name: &'static str, func: NativeFn) -> Value {
    Value::Native(Rc::new(NativeFunction::new(name, func)))
}

pub(crate) fn register_fn(table: &TableRef, name: &'static str, func: NativeFn) {
    table.borrow_mut().set_field(name, native(name, func));
}

/// Create a library table from `(name, function)` pairs and store it in
/// `globals` under `libname`.
pub(crate) fn register_lib(globals: &TableRef, libname: &str, funcs: &[(&'static str, NativeFn)]) -> TableRef {
    let lib = Table::new_ref();
    for &(name, func) in funcs {
        register_fn(&lib, name, func);
    }
    globals.borrow_mut().set_field(libname, Value::Table(lib.clone()));
    lib
}
