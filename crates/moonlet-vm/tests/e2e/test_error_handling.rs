use super::helpers::*;

// ---- error / pcall ----

#[test]
fn test_pcall_success_returns_all_results() {
    let r = run_lua("return pcall(function(a, b) return a + b, 'x' end, 1, 2)");
    assert_bool(&r, 0, true);
    assert_num(&r, 1, 3.0);
    assert_str(&r, 2, "x");
}

#[test]
fn test_error_message_gets_position() {
    let r = run_lua("return pcall(function() error('bad thing') end)");
    assert_bool(&r, 0, false);
    assert_str(&r, 1, "test:1: bad thing");
}

#[test]
fn test_error_level_two_blames_caller() {
    let r = run_lua(
        "local function check(x) if not x then error('check failed', 2) end end
         local function caller()
            check(false)
         end
         return pcall(caller)",
    );
    assert_str(&r, 1, "test:3: check failed");
}

#[test]
fn test_error_level_zero_and_non_string_values() {
    let r = run_lua(
        "local _, a = pcall(error, 'plain', 0)
         local _, b = pcall(error, {code = 7})
         local _, c = pcall(error)
         return a, b.code, c",
    );
    assert_str(&r, 0, "plain");
    assert_num(&r, 1, 7.0);
    assert_nil(&r, 2);
}

#[test]
fn test_runtime_errors_are_catchable() {
    let r = run_lua(
        "local ok, err = pcall(function() local t = nil; return t.x end)
         return ok, err",
    );
    assert_bool(&r, 0, false);
    assert_str(&r, 1, "test:1: attempt to index a nil value (local 't')");
}

#[test]
fn test_stack_overflow_is_not_catchable() {
    let err = run_lua_err(
        "local function f() return 1 + f() end
         return pcall(f)",
    );
    assert_eq!(err, "stack overflow");
}

#[test]
fn test_recursion_through_index_metamethod_overflows() {
    let err = run_lua_err(
        "local t
         t = setmetatable({}, {__index = function(_, k)
            if k == 0 then return 'z' end
            return t[k - 1]
         end})
         return t[100000]",
    );
    assert_eq!(err, "stack overflow");
}

#[test]
fn test_recursion_through_tostring_overflows() {
    let err = run_lua_err(
        "local mt = {}
         mt.__tostring = function(v) return 'wrapped ' .. tostring(v) end
         return tostring(setmetatable({}, mt))",
    );
    assert_eq!(err, "stack overflow");
}

#[test]
fn test_recursion_through_pcall_overflows() {
    let err = run_lua_err(
        "local function f() return pcall(f) end
         return f()",
    );
    assert_eq!(err, "stack overflow");
}

#[test]
fn test_native_stack_budget_bounds_reentry_on_small_thread() {
    // 200 nested interpreter loops do not fit in 2 MiB; the byte budget has to stop it.
    let handle = std::thread::Builder::new()
        .stack_size(2 << 20)
        .spawn(|| {
            let config = moonlet_vm::VmConfig::default().max_native_stack(256 << 10);
            let mut vm = moonlet_vm::Vm::with_config(config);
            let src = "local t
                t = setmetatable({}, {__index = function(_, k) return t[k + 1] end})
                return t[1]";
            vm.exec(src.as_bytes(), "=test")
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .unwrap();
    assert_eq!(handle.join().unwrap().unwrap_err(), "stack overflow");
}

#[test]
fn test_nested_pcall_restores_state() {
    run_check_nums(
        "local depth = 0
         local function risky(n)
            depth = depth + 1
            if n == 0 then error('bottom') end
            local ok = pcall(risky, n - 1)
            return ok and 1 or 0
         end
         local ok = pcall(risky, 5)
         local t = {}
         for i = 1, 5 do t[i] = i * i end
         return depth, t[5], select('#', pcall(risky, 0))",
        &[6.0, 25.0, 2.0],
    );
}

#[test]
fn test_upvalues_closed_on_error_unwind() {
    run_check_nums(
        "local get
         pcall(function()
            local x = 41
            get = function() return x end
            x = x + 1
            error('leave')
         end)
         local filler = {1, 2, 3}
         return get()",
        &[42.0],
    );
}

// ---- xpcall ----

#[test]
fn test_xpcall_handler_transforms_error() {
    let r = run_lua(
        "return xpcall(function() error({msg = 'x'}) end, function(e) return 'handled ' .. e.msg end)",
    );
    assert_bool(&r, 0, false);
    assert_str(&r, 1, "handled x");
}

#[test]
fn test_xpcall_passes_arguments() {
    let r = run_lua("return xpcall(function(a, b) return a * b end, print, 6, 7)");
    assert_bool(&r, 0, true);
    assert_num(&r, 1, 42.0);
}

// ---- assert ----

#[test]
fn test_assert() {
    let r = run_lua(
        "local a, b = assert(1, 'unused')
         local ok1, e1 = pcall(assert, false)
         local ok2, e2 = pcall(assert, nil, 'custom')
         return a, b, e1, e2",
    );
    assert_num(&r, 0, 1.0);
    assert_str(&r, 1, "unused");
    assert_str(&r, 2, "assertion failed!");
    assert_str(&r, 3, "custom");
}

// ---- Messages ----

#[test]
fn test_uncaught_error_message() {
    assert_eq!(run_lua_err("error('top level')"), "test:1: top level");
    assert_eq!(run_lua_err("\n\nlocal x = {} .. 1"), "test:3: attempt to concatenate a table value");
}

#[test]
fn test_call_non_function() {
    assert_eq!(
        run_lua_err("local t = {}\nt.field()"),
        "test:2: attempt to call a nil value (field 'field')"
    );
    assert_eq!(run_lua_err("local n = 5\nn()"), "test:2: attempt to call a number value (local 'n')");
}

#[test]
fn test_bad_argument_messages() {
    assert_eq!(
        run_lua_err("string.rep()"),
        "test:1: bad argument #1 to 'rep' (string expected, got no value)"
    );
    assert_eq!(
        run_lua_err("setmetatable(1, {})"),
        "test:1: bad argument #1 to 'setmetatable' (table expected, got number)"
    );
    assert_eq!(run_lua_err("pcall()"), "test:1: bad argument #1 to 'pcall' (value expected)");
    assert_eq!(
        run_lua_err("xpcall(print, 1)"),
        "test:1: bad argument #2 to 'xpcall' (function expected, got number)"
    );
}

#[test]
fn test_index_upvalue_names_it() {
    assert_eq!(
        run_lua_err("local u\nlocal function f() return u.x end\nreturn f()"),
        "test:2: attempt to index a nil value (upvalue 'u')"
    );
}
