use super::helpers::*;

// ---- Basic closure ----

#[test]
fn test_closure_counter() {
    run_check_nums(
        "local function counter()
            local n = 0
            return function()
                n = n + 1
                return n
            end
         end
         local c = counter()
         c()
         c()
         return c()",
        &[3.0],
    );
}

#[test]
fn test_independent_counters() {
    run_check_nums(
        "local function counter()
            local n = 0
            return function() n = n + 1 return n end
         end
         local a, b = counter(), counter()
         a() a()
         return a(), b()",
        &[3.0, 1.0],
    );
}

// ---- Upvalue sharing ----

#[test]
fn test_upvalue_mutation_visible_to_enclosing_scope() {
    run_check_nums(
        "local x = 1
         local f = function() x = x + 1; return x end
         return f(), f(), x",
        &[2.0, 3.0, 3.0],
    );
}

#[test]
fn test_sibling_closures_share_upvalue() {
    run_check_nums(
        "local function pair()
            local v = 0
            local function set(n) v = n end
            local function get() return v end
            return set, get
         end
         local set, get = pair()
         set(42)
         return get()",
        &[42.0],
    );
}

#[test]
fn test_nested_upvalue_through_two_levels() {
    run_check_nums(
        "local x = 5
         local function outer()
            return function() x = x * 2 return x end
         end
         local f = outer()
         f()
         return f(), x",
        &[20.0, 20.0],
    );
}

// ---- Loop variables ----

#[test]
fn test_numeric_for_fresh_variable_per_iteration() {
    run_check_nums(
        "local fs = {}
         for i = 1, 3 do fs[i] = function() return i end end
         return fs[1](), fs[2](), fs[3]()",
        &[1.0, 2.0, 3.0],
    );
}

#[test]
fn test_generic_for_fresh_variable_per_iteration() {
    run_check_nums(
        "local fs = {}
         for k, v in ipairs({10, 20, 30}) do fs[k] = function() return v end end
         return fs[1](), fs[2](), fs[3]()",
        &[10.0, 20.0, 30.0],
    );
}

#[test]
fn test_repeat_body_local_captured() {
    run_check_nums(
        "local fs, i = {}, 0
         repeat
            i = i + 1
            local j = i * 10
            fs[i] = function() return j end
         until j >= 30
         return fs[1](), fs[3]()",
        &[10.0, 30.0],
    );
}

#[test]
fn test_closure_outlives_frame() {
    run_check_nums(
        "local function make(a, b)
            local sum = a + b
            return function(c) return sum + c end
         end
         local f = make(1, 2)
         local g = make(10, 20)
         return f(100), g(100)",
        &[103.0, 130.0],
    );
}

#[test]
fn test_recursive_local_function() {
    run_check_nums(
        "local function fib(n) if n < 2 then return n end return fib(n - 1) + fib(n - 2) end
         return fib(20)",
        &[6765.0],
    );
}
