use moonlet_core::value::Value;
use moonlet_vm::Vm;

use super::helpers::*;

// ---- load ----

#[test]
fn test_load_string_chunk() {
    run_check_nums("local f = load('return 1 + 2') return f()", &[3.0]);
    run_check_nums("local f = load('local a, b = ... return a * b') return f(6, 7)", &[42.0]);
}

#[test]
fn test_load_reader_function() {
    run_check_nums(
        "local parts = { 'return ', '10', ' * ', '4' }
         local i = 0
         local f = load(function() i = i + 1 return parts[i] end)
         return f()",
        &[40.0],
    );
}

#[test]
fn test_load_reader_must_return_strings() {
    let r = run_lua("return pcall(load, function() return 1 end)");
    assert_bool(&r, 0, false);
    assert_str(&r, 1, "test:1: reader function must return a string");
}

#[test]
fn test_load_compile_error_is_returned() {
    let r = run_lua("return load('x = = 1', '=chunk')");
    assert_nil(&r, 0);
    assert_str(&r, 1, "chunk:1: unexpected symbol near '='");
}

#[test]
fn test_load_default_chunkname_quotes_source() {
    let r = run_lua("return load('error(\"boom\")')");
    let Value::Closure(_) = &r[0] else {
        panic!("expected a function, got {:?}", r[0]);
    };
    let r = run_lua("return pcall(load('error(\"boom\")'))");
    assert_str(&r, 1, "[string \"error(\"boom\")\"]:1: boom");
}

#[test]
fn test_load_mode_restrictions() {
    let r = run_lua("return load('return 1', 'x', 'b')");
    assert_nil(&r, 0);
    assert_str(&r, 1, "attempt to load a text chunk (mode is 'b')");

    let r = run_lua("return load(string.dump(function() end), 'x', 't')");
    assert_nil(&r, 0);
    assert_str(&r, 1, "attempt to load a binary chunk (mode is 't')");
}

#[test]
fn test_load_with_custom_env() {
    run_check_nums(
        "local env = { y = 5 }
         local f = load('x = y * 2 return x', 'c', 't', env)
         return f(), env.x, x == nil and 1 or 0",
        &[10.0, 10.0, 1.0],
    );
}

#[test]
fn test_load_env_nil_hides_globals() {
    let r = run_lua("local f = load('return print', 'c', 't', nil) return pcall(f)");
    assert_bool(&r, 0, false);
    assert_str(&r, 1, "c:1: attempt to index a nil value (upvalue '_ENV')");
}

// ---- dump ----

#[test]
fn test_dump_and_reload() {
    run_check_nums(
        "local function fib(n) if n < 2 then return n end local a, b = 0, 1
            for _ = 2, n do a, b = b, a + b end return b end
         local g = load(string.dump(fib), '=dumped', 'b')
         return g(10), g(20)",
        &[55.0, 6765.0],
    );
}

#[test]
fn test_dump_keeps_nested_functions_and_constants() {
    run_check_strs(
        "local function mk() local t = {} for i = 1, 3 do t[i] = function() return 'v' .. i end end
            return t[1]() .. t[2]() .. t[3]() end
         return load(string.dump(mk))()",
        &["v1v2v3"],
    );
}

#[test]
fn test_dump_stripped_still_runs() {
    let r = run_lua(
        "local function f(a, b) return a .. b end
         local full, stripped = string.dump(f), string.dump(f, true)
         return #stripped < #full, load(stripped)('x', 'y')",
    );
    assert_bool(&r, 0, true);
    assert_str(&r, 1, "xy");
}

#[test]
fn test_dump_native_fails() {
    assert_eq!(
        run_lua_err("string.dump(print)"),
        "test:1: unable to dump given function"
    );
}

#[test]
fn test_truncated_binary_chunk_is_rejected() {
    let r = run_lua("local s = string.dump(function() return 1 end) return load(s:sub(1, 20), '=bin')");
    assert_nil(&r, 0);
    let Value::String(msg) = &r[1] else {
        panic!("expected message, got {:?}", r[1]);
    };
    assert!(msg.to_str_lossy().contains("truncated"), "{}", msg.to_str_lossy());
}

// ---- Embedding API ----

#[test]
fn test_host_dump_and_load_across_vms() {
    let mut a = Vm::new();
    let f = a.load(b"local n = ... return n * n", "=square").unwrap();
    let bytes = a.dump(&f, false).unwrap();

    let mut b = Vm::new();
    let g = b.load(&bytes, "=ignored").unwrap();
    let r = b.call(&g, vec![Value::from(9.0)]).unwrap();
    assert_eq!(r, vec![Value::from(81.0)]);
}

#[test]
fn test_host_globals() {
    let mut vm = Vm::new();
    vm.set_global("limit", Value::from(3.0));
    vm.exec(b"result = limit + 1", "=host").unwrap();
    assert_eq!(vm.get_global("result"), Value::from(4.0));
}
