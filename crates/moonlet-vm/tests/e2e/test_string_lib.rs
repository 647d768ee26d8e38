use super::helpers::*;

// ---- Basics ----

#[test]
fn test_len_sub_case() {
    run_check_strs(
        "local s = 'Hello World'
         return s:sub(1, 5), s:sub(-5), s:sub(7, -1), s:sub(0), s:sub(8, 3), s:upper(), s:lower()",
        &["Hello", "World", "World", "Hello World", "", "HELLO WORLD", "hello world"],
    );
}

#[test]
fn test_rep_reverse() {
    run_check_strs(
        "return ('ab'):rep(3), ('ab'):rep(3, ','), ('x'):rep(0), ('abc'):reverse()",
        &["ababab", "ab,ab,ab", "", "cba"],
    );
}

#[test]
fn test_byte_and_char() {
    run_check_nums("return ('ABC'):byte(), ('ABC'):byte(-1), ('ABC'):byte(1, 3)", &[65.0, 67.0, 65.0, 66.0, 67.0]);
    run_check_strs("return string.char(72, 105), string.char()", &["Hi", ""]);
    assert_eq!(
        run_lua_err("string.char(256)"),
        "test:1: bad argument #1 to 'char' (value out of range)"
    );
}

#[test]
fn test_len_counts_bytes() {
    run_check_nums("return string.len('h\\0i'), #'\\u{48}\\65'", &[3.0, 2.0]);
}

// ---- format ----

#[test]
fn test_format_integers() {
    run_check_strs(
        "return string.format('%d|%5d|%-5d|%05d|%x|%X|%o|%i', 42, 42, 42, -42, 255, 255, 8, 7)",
        &["42|   42|42   |-0042|ff|FF|10|7"],
    );
}

#[test]
fn test_format_floats() {
    run_check_strs(
        "return string.format('%.2f', 3.14159), string.format('%e', 1234.5), string.format('%g', 100000),
                string.format('%g', 1e20), string.format('%10.3f|', 2.5)",
        &["3.14", "1.234500e+03", "100000", "1e+20", "     2.500|"],
    );
}

#[test]
fn test_format_strings_and_misc() {
    run_check_strs(
        "return string.format('%s and %s', 'this', 12), string.format('%5s|%-5s|', 'ab', 'cd'),
                string.format('%.2s', 'abcdef'), string.format('%c%c', 72, 73), string.format('100%%')",
        &["this and 12", "   ab|cd   |", "ab", "HI", "100%"],
    );
}

#[test]
fn test_format_q_round_trips() {
    run_check_strs(
        "local s = 'say \"hi\"\\n\\\\ok'
         local q = string.format('%q', s)
         return tostring(load('return ' .. q)() == s)",
        &["true"],
    );
}

#[test]
fn test_format_q_line_breaks_and_control_bytes() {
    run_check_strs(
        "local s = 'a\\nb\\r1\\r\\0002\\1'
         local q = string.format('%q', s)
         return q, tostring(load('return ' .. q)() == s)",
        &["\"a\\\nb\\0131\\13\\0002\\1\"", "true"],
    );
}

#[test]
fn test_format_errors() {
    assert_eq!(
        run_lua_err("string.format('%d', 1.5)"),
        "test:1: bad argument #2 to 'format' (number has no integer representation)"
    );
    assert_eq!(
        run_lua_err("string.format('%d')"),
        "test:1: bad argument #2 to 'format' (no value)"
    );
    assert_eq!(
        run_lua_err("string.format('%y', 1)"),
        "test:1: invalid conversion '%y' to 'format'"
    );
}

// ---- tostring / tonumber ----

#[test]
fn test_tostring_numbers() {
    run_check_strs(
        "return tostring(10), tostring(-0.0), tostring(1e100), tostring(0.1), tostring(2^53), tostring(1/0)",
        &["10", "-0", "1e+100", "0.1", "9007199254740992", "inf"],
    );
}

#[test]
fn test_tonumber() {
    let r = run_lua(
        "return tonumber('42'), tonumber('0x1F'), tonumber('  3.5  '), tonumber('z'),
                tonumber('ff', 16), tonumber('777', 8), tonumber('12', 2), tonumber(nil)",
    );
    assert_num(&r, 0, 42.0);
    assert_num(&r, 1, 31.0);
    assert_num(&r, 2, 3.5);
    assert_nil(&r, 3);
    assert_num(&r, 4, 255.0);
    assert_num(&r, 5, 511.0);
    assert_nil(&r, 6);
    assert_nil(&r, 7);
}

// ---- math ----

#[test]
fn test_math_functions() {
    run_check_nums(
        "return math.floor(3.7), math.ceil(3.2), math.abs(-4), math.max(1, 9, 3), math.min(4, -2),
                math.sqrt(16), math.fmod(7, 3), math.fmod(-7, 3), math.huge > 0 and 1 or 0",
        &[3.0, 4.0, 4.0, 9.0, -2.0, 4.0, 1.0, -1.0, 1.0],
    );
}

#[test]
fn test_math_integer_helpers() {
    let r = run_lua("return math.tointeger(3.0), math.tointeger(3.5), math.type(1), math.type(1.5), math.type('1')");
    assert_num(&r, 0, 3.0);
    assert_nil(&r, 1);
    assert_str(&r, 2, "integer");
    assert_str(&r, 3, "float");
    assert_nil(&r, 4);
}

#[test]
fn test_math_modf_and_random_range() {
    let r = run_lua(
        "local i, f = math.modf(3.25)
         local ok = true
         for _ = 1, 100 do
            local x = math.random(5, 7)
            if x < 5 or x > 7 or x % 1 ~= 0 then ok = false end
         end
         return i, f, ok",
    );
    assert_num(&r, 0, 3.0);
    assert_num(&r, 1, 0.25);
    assert_bool(&r, 2, true);
}
