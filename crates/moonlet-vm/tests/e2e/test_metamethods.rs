use super::helpers::*;

// ---- Indexing ----

#[test]
fn test_index_table_chain() {
    run_check_nums(
        "local base = {a = 1}
         local mid = setmetatable({b = 2}, {__index = base})
         local top = setmetatable({}, {__index = mid})
         return top.a, top.b",
        &[1.0, 2.0],
    );
}

#[test]
fn test_index_function() {
    run_check_strs(
        "local t = setmetatable({}, {__index = function(t, k) return k .. '!' end})
         return t.hello, t[1]",
        &["hello!", "1!"],
    );
}

#[test]
fn test_newindex_function_and_rawset() {
    run_check_nums(
        "local log = {}
         local t = setmetatable({}, {__newindex = function(t, k, v) rawset(t, k, v * 10) end})
         t.x = 1
         t.x = 2
         return t.x",
        &[2.0],
    );
}

#[test]
fn test_newindex_table_redirect() {
    run_check_nums(
        "local store = {}
         local t = setmetatable({}, {__newindex = store})
         t.a = 5
         return rawget(t, 'a') == nil and 1 or 0, store.a",
        &[1.0, 5.0],
    );
}

#[test]
fn test_index_loop_is_detected() {
    let err = run_lua_err(
        "local t = {}
         setmetatable(t, {__index = t})
         return t.missing",
    );
    assert_eq!(err, "test:3: '__index' chain too long; possible loop");
}

// ---- Arithmetic ----

#[test]
fn test_arith_metamethods() {
    run_check_nums(
        "local V = {}
         V.__index = V
         local function vec(x) return setmetatable({x = x}, V) end
         V.__add = function(a, b) return vec(a.x + b.x) end
         V.__sub = function(a, b) return vec(a.x - b.x) end
         V.__mul = function(a, b)
            if type(b) == 'number' then return vec(a.x * b) end
            return vec(a * b.x)
         end
         V.__unm = function(a) return vec(-a.x) end
         local a, b = vec(3), vec(4)
         return (a + b).x, (a - b).x, (a * 2).x, (-a).x",
        &[7.0, -1.0, 6.0, -3.0],
    );
}

#[test]
fn test_right_operand_metamethod() {
    run_check_nums(
        "local mt = {__add = function(a, b) return 100 end}
         local t = setmetatable({}, mt)
         return 1 + t, t + 1",
        &[100.0, 100.0],
    );
}

#[test]
fn test_bitwise_and_idiv_metamethods() {
    run_check_strs(
        "local mt = {}
         for _, name in ipairs({'__band', '__bor', '__bxor', '__shl', '__shr', '__idiv', '__mod', '__pow', '__div'}) do
            mt[name] = function() return name end
         end
         mt.__bnot = function() return '__bnot' end
         local t = setmetatable({}, mt)
         return t & 1, t | 1, t ~ 1, t << 1, t >> 1, t // 1, t % 1, t ^ 1, t / 1, ~t",
        &["__band", "__bor", "__bxor", "__shl", "__shr", "__idiv", "__mod", "__pow", "__div", "__bnot"],
    );
}

// ---- Concat and length ----

#[test]
fn test_concat_metamethod() {
    run_check_strs(
        "local mt = {__concat = function(a, b)
            local l = type(a) == 'table' and a.name or a
            local r = type(b) == 'table' and b.name or b
            return l .. '+' .. r
         end}
         local t = setmetatable({name = 'T'}, mt)
         return t .. 'x', 'x' .. t, 'a' .. 'b' .. t",
        &["T+x", "x+T", "ab+T"],
    );
}

#[test]
fn test_len_metamethod() {
    run_check_nums(
        "local t = setmetatable({1, 2, 3}, {__len = function() return 42 end})
         return #t, rawlen(t)",
        &[42.0, 3.0],
    );
}

// ---- Comparison ----

#[test]
fn test_eq_metamethod_only_for_tables() {
    let r = run_lua(
        "local mt = {__eq = function() return true end}
         local a, b = setmetatable({}, mt), setmetatable({}, mt)
         return a == b, a ~= b, a == 1, rawequal(a, b)",
    );
    assert_bool(&r, 0, true);
    assert_bool(&r, 1, false);
    assert_bool(&r, 2, false);
    assert_bool(&r, 3, false);
}

#[test]
fn test_lt_le_metamethods() {
    let r = run_lua(
        "local mt = {}
         mt.__lt = function(a, b) return a.v < b.v end
         local function v(x) return setmetatable({v = x}, mt) end
         local a, b = v(1), v(2)
         return a < b, b < a, a <= b, b <= a, a > b",
    );
    for (i, expected) in [true, false, true, false, false].into_iter().enumerate() {
        assert_bool(&r, i, expected);
    }
}

#[test]
fn test_explicit_le_metamethod() {
    let r = run_lua(
        "local mt = {__le = function(a, b) return 'yes' end}
         local a, b = setmetatable({}, mt), setmetatable({}, mt)
         return a <= b, a >= b",
    );
    assert_bool(&r, 0, true);
    assert_bool(&r, 1, true);
}

// ---- Call and tostring ----

#[test]
fn test_call_metamethod_receives_self() {
    run_check_nums(
        "local counter = setmetatable({n = 0}, {__call = function(self, by)
            self.n = self.n + by
            return self.n
         end})
         counter(2)
         return counter(3)",
        &[5.0],
    );
}

#[test]
fn test_tostring_metamethod() {
    run_check_strs(
        "local t = setmetatable({}, {__tostring = function() return 'custom' end})
         return tostring(t), string.format('%s!', t)",
        &["custom", "custom!"],
    );
}

#[test]
fn test_protected_metatable() {
    let r = run_lua(
        "local t = setmetatable({}, {__metatable = 'locked'})
         local ok, err = pcall(setmetatable, t, {})
         return getmetatable(t), ok, err",
    );
    assert_str(&r, 0, "locked");
    assert_bool(&r, 1, false);
    assert_str(&r, 2, "cannot change a protected metatable");
}

#[test]
fn test_string_metatable_is_shared() {
    let r = run_lua("return getmetatable('').__index == string, ('abc'):len()");
    assert_bool(&r, 0, true);
    assert_num(&r, 1, 3.0);
}
