use super::helpers::*;

// ---- Resume / yield ----

#[test]
fn test_values_flow_both_ways() {
    let r = run_lua(
        "local co = coroutine.create(function(a, b)
            local c = coroutine.yield(a + b)
            local d, e = coroutine.yield(c * 2)
            return d + e
         end)
         local _, x = coroutine.resume(co, 1, 2)
         local _, y = coroutine.resume(co, 10)
         local ok, z = coroutine.resume(co, 3, 4)
         return x, y, z, ok, coroutine.status(co)",
    );
    assert_num(&r, 0, 3.0);
    assert_num(&r, 1, 20.0);
    assert_num(&r, 2, 7.0);
    assert_bool(&r, 3, true);
    assert_str(&r, 4, "dead");
}

#[test]
fn test_resume_dead_coroutine_reports_error() {
    let r = run_lua(
        "local co = coroutine.create(function() end)
         coroutine.resume(co)
         return coroutine.resume(co)",
    );
    assert_bool(&r, 0, false);
    assert_str(&r, 1, "cannot resume dead coroutine");
}

#[test]
fn test_error_inside_coroutine_kills_it() {
    let r = run_lua(
        "local co = coroutine.create(function() error('boom') end)
         local ok, err = coroutine.resume(co)
         return ok, err, coroutine.status(co)",
    );
    assert_bool(&r, 0, false);
    assert_str(&r, 1, "test:1: boom");
    assert_str(&r, 2, "dead");
}

#[test]
fn test_status_transitions() {
    run_check_strs(
        "local co
         local inner
         co = coroutine.create(function()
            inner = coroutine.status(co)
            coroutine.yield()
         end)
         local before = coroutine.status(co)
         coroutine.resume(co)
         local suspended = coroutine.status(co)
         coroutine.resume(co)
         return before, inner, suspended, coroutine.status(co)",
        &["suspended", "running", "suspended", "dead"],
    );
}

#[test]
fn test_normal_status_while_resuming_another() {
    run_check_strs(
        "local outer
         local seen
         outer = coroutine.create(function()
            local inner = coroutine.create(function() seen = coroutine.status(outer) end)
            coroutine.resume(inner)
         end)
         coroutine.resume(outer)
         return seen",
        &["normal"],
    );
}

#[test]
fn test_resume_running_coroutine_fails() {
    let r = run_lua(
        "local co
         co = coroutine.create(function() return coroutine.resume(co) end)
         local ok, inner_ok, msg = coroutine.resume(co)
         return ok, inner_ok, msg",
    );
    assert_bool(&r, 0, true);
    assert_bool(&r, 1, false);
    assert_str(&r, 2, "cannot resume non-suspended coroutine");
}

// ---- Generators ----

#[test]
fn test_wrap_generator() {
    run_check_nums(
        "local gen = coroutine.wrap(function()
            for i = 1, 3 do coroutine.yield(i) end
         end)
         return gen(), gen(), gen()",
        &[1.0, 2.0, 3.0],
    );
}

#[test]
fn test_wrap_in_generic_for() {
    run_check_nums(
        "local function range(n)
            return coroutine.wrap(function() for i = 1, n do coroutine.yield(i) end end)
         end
         local s = 0
         for i in range(10) do s = s + i end
         return s",
        &[55.0],
    );
}

#[test]
fn test_wrap_propagates_errors() {
    let err = run_lua_err(
        "local f = coroutine.wrap(function() error('inside') end)
         f()",
    );
    assert_eq!(err, "test:1: inside");
}

#[test]
fn test_yield_from_nested_lua_calls() {
    run_check_nums(
        "local function helper(x) coroutine.yield(x * 10) return x end
         local co = coroutine.wrap(function()
            local a = helper(1)
            local b = helper(2)
            return a + b
         end)
         return co(), co(), co()",
        &[10.0, 20.0, 3.0],
    );
}

#[test]
fn test_upvalues_shared_between_threads() {
    run_check_nums(
        "local shared = 0
         local co = coroutine.wrap(function()
            while true do shared = shared + 1; coroutine.yield() end
         end)
         co() co() co()
         shared = shared * 10
         co()
         return shared",
        &[31.0],
    );
}

// ---- Yield restrictions ----

#[test]
fn test_yield_outside_coroutine() {
    let err = run_lua_err("coroutine.yield(1)");
    assert_eq!(err, "test:1: attempt to yield from outside a coroutine");
}

#[test]
fn test_yield_across_native_boundary() {
    let r = run_lua(
        "local co = coroutine.create(function()
            local t = {3, 1, 2}
            table.sort(t, function(a, b) coroutine.yield() return a < b end)
         end)
         return coroutine.resume(co)",
    );
    assert_bool(&r, 0, false);
    assert_str(&r, 1, "test:3: attempt to yield across a native call boundary");
}

// ---- Yield through protected calls ----

#[test]
fn test_yield_inside_pcall() {
    let r = run_lua(
        "local co = coroutine.create(function(a)
            local ok, v = pcall(function(x)
                local got = coroutine.yield(x + 1)
                return got * 2
            end, a)
            return ok, v
         end)
         local _, first = coroutine.resume(co, 10)
         local done, ok, v = coroutine.resume(co, 21)
         return first, done, ok, v, coroutine.status(co)",
    );
    assert_num(&r, 0, 11.0);
    assert_bool(&r, 1, true);
    assert_bool(&r, 2, true);
    assert_num(&r, 3, 42.0);
    assert_str(&r, 4, "dead");
}

#[test]
fn test_yield_inside_xpcall_then_error() {
    let r = run_lua(
        "local co = coroutine.create(function()
            return xpcall(function()
                coroutine.yield('paused')
                error('boom', 0)
            end, function(e) return 'handled: ' .. e end)
         end)
         local _, tag = coroutine.resume(co)
         local done, ok, msg = coroutine.resume(co)
         return tag, done, ok, msg",
    );
    assert_str(&r, 0, "paused");
    assert_bool(&r, 1, true);
    assert_bool(&r, 2, false);
    assert_str(&r, 3, "handled: boom");
}

#[test]
fn test_several_yields_inside_nested_pcall() {
    let r = run_lua(
        "local co = coroutine.wrap(function()
            local sum = 0
            local ok = pcall(function()
                for i = 1, 3 do
                    local _, inner = pcall(coroutine.yield, i)
                    sum = sum + inner
                end
            end)
            return ok, sum
         end)
         local seen = {}
         seen[1] = co()
         seen[2] = co(10)
         seen[3] = co(20)
         local ok, sum = co(30)
         return seen[1], seen[2], seen[3], ok, sum",
    );
    assert_num(&r, 0, 1.0);
    assert_num(&r, 1, 2.0);
    assert_num(&r, 2, 3.0);
    assert_bool(&r, 3, true);
    assert_num(&r, 4, 60.0);
}

#[test]
fn test_pcall_of_yield_returns_resume_values() {
    let r = run_lua(
        "local co = coroutine.create(function()
            return pcall(coroutine.yield, 1)
         end)
         local _, y = coroutine.resume(co)
         local done, ok, a, b = coroutine.resume(co, 'x', 'y')
         return y, done, ok, a, b",
    );
    assert_num(&r, 0, 1.0);
    assert_bool(&r, 1, true);
    assert_bool(&r, 2, true);
    assert_str(&r, 3, "x");
    assert_str(&r, 4, "y");
}

#[test]
fn test_error_after_resume_is_caught_by_pcall() {
    let r = run_lua(
        "local co = coroutine.create(function()
            local ok, e = pcall(function()
                local v = coroutine.yield()
                return v.field
            end)
            return ok, e
         end)
         coroutine.resume(co)
         return coroutine.resume(co, nil)",
    );
    assert_bool(&r, 0, true);
    assert_bool(&r, 1, false);
    match &r[2] {
        moonlet_core::value::Value::String(s) => assert!(s.to_str_lossy().contains("attempt to index")),
        other => panic!("expected error string, got {other:?}"),
    }
}

#[test]
fn test_running_and_isyieldable() {
    let r = run_lua(
        "local main, is_main = coroutine.running()
         local inside
         local co = coroutine.create(function()
            local _, m = coroutine.running()
            inside = {m, coroutine.isyieldable()}
         end)
         coroutine.resume(co)
         return type(main), is_main, coroutine.isyieldable(), inside[1], inside[2]",
    );
    assert_str(&r, 0, "thread");
    assert_bool(&r, 1, true);
    assert_bool(&r, 2, false);
    assert_bool(&r, 3, false);
    assert_bool(&r, 4, true);
}
