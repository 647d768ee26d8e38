use super::helpers::*;

// ---- Constructors and access ----

#[test]
fn test_constructor_forms() {
    run_check_nums(
        "local k = 'dyn'
         local t = {1, 2, x = 3, [k] = 4, [10] = 5; 6}
         return t[1], t[2], t[3], t.x, t.dyn, t[10], #t",
        &[1.0, 2.0, 6.0, 3.0, 4.0, 5.0, 3.0],
    );
}

#[test]
fn test_float_keys_normalize() {
    run_check_strs(
        "local t = {}
         t[1] = 'one'
         t[2.0] = 'two'
         return t[1.0], t[2]",
        &["one", "two"],
    );
}

#[test]
fn test_nil_and_nan_keys_rejected() {
    assert_eq!(run_lua_err("local t = {} t[nil] = 1"), "test:1: table index is nil");
    assert_eq!(run_lua_err("local t, z = {}, 0 t[z / z] = 1"), "test:1: table index is NaN");
}

#[test]
fn test_length_grows_with_sequence() {
    run_check_nums(
        "local t = {}
         for i = 1, 100 do t[i] = i end
         local n1 = #t
         t[101] = 1
         t[50] = nil
         return n1, rawlen({}), #'abc'",
        &[100.0, 0.0, 3.0],
    );
}

#[test]
fn test_next_traversal_and_removal() {
    run_check_nums(
        "local t = {a = 1, b = 2, c = 3, 10, 20}
         local n = 0
         for k in pairs(t) do
            t[k] = nil
            n = n + 1
         end
         return n, next(t) == nil and 1 or 0",
        &[5.0, 1.0],
    );
}

#[test]
fn test_ipairs_stops_at_first_nil() {
    run_check_nums(
        "local t = {1, 2, nil, 4}
         local n = 0
         for _ in ipairs(t) do n = n + 1 end
         return n",
        &[2.0],
    );
}

// ---- table library ----

#[test]
fn test_insert_and_remove_keep_sequence() {
    run_check_nums(
        "local t = {}
         table.insert(t, 'a')
         table.insert(t, 'c')
         table.insert(t, 2, 'b')
         table.insert(t, 1, 'z')
         local removed = table.remove(t, 1)
         local last = table.remove(t)
         return #t, removed == 'z' and 1 or 0, last == 'c' and 1 or 0, t[1] == 'a' and t[2] == 'b' and 1 or 0",
        &[2.0, 1.0, 1.0, 1.0],
    );
}

#[test]
fn test_remove_from_empty_table() {
    let r = run_lua("local t = {} return table.remove(t), #t");
    assert_nil(&r, 0);
    assert_num(&r, 1, 0.0);
}

#[test]
fn test_insert_position_out_of_bounds() {
    assert_eq!(
        run_lua_err("table.insert({}, 5, 'x')"),
        "test:1: bad argument #2 to 'insert' (position out of bounds)"
    );
    assert_eq!(
        run_lua_err("table.insert({}, 1, 2, 3)"),
        "test:1: wrong number of arguments to 'insert'"
    );
}

#[test]
fn test_concat() {
    run_check_strs(
        "local t = {1, 'two', 3.5}
         return table.concat(t), table.concat(t, ', '), table.concat(t, '-', 2, 3), table.concat({})",
        &["1two3.5", "1, two, 3.5", "two-3.5", ""],
    );
}

#[test]
fn test_concat_invalid_value() {
    assert_eq!(
        run_lua_err("table.concat({1, {}, 3})"),
        "test:1: invalid value (at index 2) in table for 'concat'"
    );
}

#[test]
fn test_pack_and_unpack() {
    run_check_nums(
        "local p = table.pack(1, nil, 3)
         local a, b, c = table.unpack({10, 20, 30})
         local x, y = unpack({1, 2, 3}, 2)
         return p.n, p[3], a + b + c, x, y, select('#', table.unpack({}, 1, 3))",
        &[3.0, 3.0, 60.0, 2.0, 3.0, 3.0],
    );
}

#[test]
fn test_sort_default_and_comparator() {
    run_check_strs(
        "local nums = {5, 2, 8, 1, 9, 3}
         table.sort(nums)
         local words = {'pear', 'apple', 'fig'}
         table.sort(words, function(a, b) return #a < #b end)
         local desc = {3, 1, 2}
         table.sort(desc, function(a, b) return a > b end)
         return table.concat(nums, ','), table.concat(words, ','), table.concat(desc, ',')",
        &["1,2,3,5,8,9", "fig,pear,apple", "3,2,1"],
    );
}

#[test]
fn test_sort_uses_lt_metamethod() {
    run_check_strs(
        "local mt = {__lt = function(a, b) return a.k < b.k end}
         local t = {}
         for _, k in ipairs({'c', 'a', 'b'}) do t[#t + 1] = setmetatable({k = k}, mt) end
         table.sort(t)
         return t[1].k .. t[2].k .. t[3].k",
        &["abc"],
    );
}

#[test]
fn test_sort_comparator_error_propagates() {
    let err = run_lua_err("table.sort({3, 'x', 1})");
    assert!(err.starts_with("attempt to compare"), "{err}");
}
