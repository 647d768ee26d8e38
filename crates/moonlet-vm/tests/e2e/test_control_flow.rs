use super::helpers::*;

// ---- Conditionals ----

#[test]
fn test_if_elseif_else() {
    run_check_strs(
        "local function classify(n)
            if n < 0 then return 'neg' elseif n == 0 then return 'zero' else return 'pos' end
         end
         return classify(-1), classify(0), classify(5)",
        &["neg", "zero", "pos"],
    );
}

#[test]
fn test_and_or_short_circuit() {
    let r = run_lua(
        "local calls = 0
         local function bump() calls = calls + 1 return true end
         local a = false and error('never')
         local b = true or error('never')
         local c = nil and bump()
         local d = 1 and bump()
         return a, b, c, d, calls",
    );
    assert_bool(&r, 0, false);
    assert_bool(&r, 1, true);
    assert_nil(&r, 2);
    assert_bool(&r, 3, true);
    assert_num(&r, 4, 1.0);
}

#[test]
fn test_and_or_values() {
    let r = run_lua("local x, y = nil, 0 return x or 'd', y or 'd', x and 1, y and 2, not x, not y");
    assert_str(&r, 0, "d");
    assert_num(&r, 1, 0.0);
    assert_nil(&r, 2);
    assert_num(&r, 3, 2.0);
    assert_bool(&r, 4, true);
    assert_bool(&r, 5, false);
}

// ---- Loops ----

#[test]
fn test_while_and_break() {
    run_check_nums(
        "local i, s = 0, 0
         while true do
            i = i + 1
            if i > 10 then break end
            s = s + i
         end
         return s, i",
        &[55.0, 11.0],
    );
}

#[test]
fn test_repeat_until_sees_body_locals() {
    run_check_nums(
        "local n = 0
         repeat local done = n >= 4; n = n + 1 until done
         return n",
        &[5.0],
    );
}

#[test]
fn test_numeric_for_steps() {
    run_check_nums(
        "local up, down, frac = 0, 0, 0
         for i = 1, 10 do up = up + i end
         for i = 10, 1, -2 do down = down + i end
         for i = 0, 1, 0.25 do frac = frac + 1 end
         return up, down, frac",
        &[55.0, 30.0, 5.0],
    );
}

#[test]
fn test_for_with_string_bounds_coerces() {
    run_check_nums("local s = 0 for i = '1', '3' do s = s + i end return s", &[6.0]);
}

#[test]
fn test_for_errors() {
    assert_eq!(run_lua_err("for i = 1, 2, 0 do end"), "test:1: 'for' step is zero");
    assert_eq!(run_lua_err("for i = 1, {} do end"), "test:1: 'for' limit must be a number");
    assert_eq!(run_lua_err("for i = 1, 2, 'x' do end"), "test:1: 'for' step must be a number");
}

#[test]
fn test_generic_for_with_pairs_visits_everything() {
    run_check_nums(
        "local t = {1, 2, 3, x = 10, y = 20}
         local sum, count = 0, 0
         for k, v in pairs(t) do sum = sum + v; count = count + 1 end
         return sum, count",
        &[36.0, 5.0],
    );
}

#[test]
fn test_generic_for_with_custom_iterator() {
    run_check_nums(
        "local function range(n)
            return function(_, i) if i < n then return i + 1 end end, nil, 0
         end
         local s = 0
         for i in range(4) do s = s + i end
         return s",
        &[10.0],
    );
}

// ---- goto ----

#[test]
fn test_goto_continue() {
    run_check_nums(
        "local s = 0
         for i = 1, 10 do
            if i % 2 == 0 then goto continue end
            s = s + i
            ::continue::
         end
         return s",
        &[25.0],
    );
}

#[test]
fn test_goto_backward_loop() {
    run_check_nums(
        "local i = 0
         ::top::
         i = i + 1
         if i < 5 then goto top end
         return i",
        &[5.0],
    );
}

#[test]
fn test_nested_break_only_exits_inner() {
    run_check_nums(
        "local n = 0
         for i = 1, 3 do
            for j = 1, 3 do
               if j == 2 then break end
               n = n + 1
            end
         end
         return n",
        &[3.0],
    );
}
