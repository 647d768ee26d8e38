use super::helpers::*;

// ---- Parameters and results ----

#[test]
fn test_missing_args_are_nil_extra_dropped() {
    let r = run_lua(
        "local function f(a, b) return a, b end
         local x, y = f(1)
         local p, q = f(1, 2, 3)
         return x, y, p, q",
    );
    assert_num(&r, 0, 1.0);
    assert_nil(&r, 1);
    assert_num(&r, 2, 1.0);
    assert_num(&r, 3, 2.0);
}

#[test]
fn test_multiple_results_expand_only_last() {
    run_check_nums(
        "local function three() return 1, 2, 3 end
         local t = {three(), three()}
         return #t, select('#', three(), three()), (three())",
        &[4.0, 4.0, 1.0],
    );
}

#[test]
fn test_results_truncated_to_one_in_middle_of_list() {
    run_check_nums(
        "local function two() return 10, 20 end
         local a, b, c = two(), 5
         return a, b, c == nil and 1 or 0",
        &[10.0, 5.0, 1.0],
    );
}

// ---- Varargs ----

#[test]
fn test_varargs_forwarding() {
    run_check_nums(
        "local function count(...) return select('#', ...) end
         local function fwd(...) return count(...) end
         return fwd(), fwd(nil), fwd(1, nil, nil)",
        &[0.0, 1.0, 3.0],
    );
}

#[test]
fn test_varargs_with_fixed_params() {
    run_check_nums(
        "local function f(a, b, ...)
            local x, y = ...
            return a + b + (x or 0) + (y or 0), select('#', ...)
         end
         return f(1, 2, 3, 4, 5)",
        &[10.0, 3.0],
    );
}

#[test]
fn test_varargs_in_table_constructor() {
    run_check_nums(
        "local function pack(...) return {n = select('#', ...), ...} end
         local t = pack(5, 6, 7)
         return t.n, t[1], t[3]",
        &[3.0, 5.0, 7.0],
    );
}

#[test]
fn test_main_chunk_is_vararg() {
    let mut vm = moonlet_vm::Vm::new();
    let f = vm.load(b"local a, b = ... return b, a", "=test").unwrap();
    let r = vm
        .call(&f, vec![moonlet_core::value::Value::from(1.0), moonlet_core::value::Value::from(2.0)])
        .unwrap();
    assert_num(&r, 0, 2.0);
    assert_num(&r, 1, 1.0);
}

// ---- Methods ----

#[test]
fn test_method_call_passes_self() {
    run_check_nums(
        "local obj = {v = 3}
         function obj:scale(k) return self.v * k end
         function obj.static(k) return k + 1 end
         return obj:scale(5), obj.static(1)",
        &[15.0, 2.0],
    );
}

#[test]
fn test_string_methods_via_metatable() {
    run_check_strs("local s = 'hello' return s:upper(), ('x'):rep(3)", &["HELLO", "xxx"]);
}

// ---- Tail calls ----

#[test]
fn test_deep_self_tail_recursion() {
    run_check_nums(
        "local function loop(n, acc)
            if n == 0 then return acc end
            return loop(n - 1, acc + 1)
         end
         return loop(100000, 0)",
        &[100000.0],
    );
}

#[test]
fn test_mutual_tail_recursion() {
    let r = run_lua(
        "local is_even, is_odd
         function is_even(n) if n == 0 then return true end return is_odd(n - 1) end
         function is_odd(n) if n == 0 then return false end return is_even(n - 1) end
         return is_even(50001)",
    );
    assert_bool(&r, 0, false);
}

#[test]
fn test_tail_call_to_native() {
    run_check_nums(
        "local function f(...) return select('#', ...) end
         local function g() return f(1, 2, 3) end
         return g()",
        &[3.0],
    );
}

#[test]
fn test_non_tail_recursion_overflows() {
    let err = run_lua_err("local function f(n) return 1 + f(n + 1) end return f(1)");
    assert_eq!(err, "stack overflow");
}

// ---- Globals ----

#[test]
fn test_global_functions_and_env() {
    run_check_nums(
        "function add(a, b) return a + b end
         x = add(2, 3)
         return x, _G.x, _ENV.add(1, 1)",
        &[5.0, 5.0, 2.0],
    );
}

#[test]
fn test_local_env_redirects_globals() {
    run_check_nums(
        "local print = print
         local _ENV = {y = 7}
         z = y * 2
         return z, y",
        &[14.0, 7.0],
    );
}
