use super::helpers::*;
use moonlet_core::opcode::{fb2int, OpCode};

#[test]
fn e2e_arithmetic_opcodes() {
    let cases = [
        ("+", OpCode::Add),
        ("-", OpCode::Sub),
        ("*", OpCode::Mul),
        ("/", OpCode::Div),
        ("//", OpCode::IDiv),
        ("%", OpCode::Mod),
        ("^", OpCode::Pow),
        ("&", OpCode::BAnd),
        ("|", OpCode::BOr),
        ("~", OpCode::BXor),
        ("<<", OpCode::Shl),
        (">>", OpCode::Shr),
    ];
    for (sym, op) in cases {
        let proto = compile_str(&format!("local a, b; return a {sym} b"));
        assert!(has_opcode(&proto, op), "{sym}");
    }
}

#[test]
fn e2e_unary_opcodes() {
    let proto = compile_str("local a; return -a, not a, #a, ~a");
    for op in [OpCode::Unm, OpCode::Not, OpCode::Len, OpCode::BNot] {
        assert!(has_opcode(&proto, op), "{op:?}");
    }
}

#[test]
fn e2e_concat_chain_is_one_instruction() {
    let proto = compile_str("local a, b, c; return a .. b .. c");
    assert_eq!(count_opcode(&proto, OpCode::Concat), 1);
    let concat = find_opcode(&proto, OpCode::Concat).unwrap();
    assert_eq!(concat.c() - concat.b(), 2);
}

#[test]
fn e2e_comparisons() {
    let proto = compile_str("local a, b; return a < b, a <= b, a > b, a >= b, a == b, a ~= b");
    assert_eq!(count_opcode(&proto, OpCode::Lt), 2);
    assert_eq!(count_opcode(&proto, OpCode::Le), 2);
    assert_eq!(count_opcode(&proto, OpCode::Eq), 2);
    assert!(has_opcode(&proto, OpCode::LoadBool));
}

#[test]
fn e2e_constant_folding() {
    let proto = compile_str("return 1 + 2 * 3");
    assert!(!has_opcode(&proto, OpCode::Add));
    assert!(!has_opcode(&proto, OpCode::Mul));
    assert_eq!(number_constants(&proto), [7.0]);
    // strings are never folded
    let proto = compile_str("return 'a' .. 'b'");
    assert!(has_opcode(&proto, OpCode::Concat));
}

#[test]
fn e2e_or_uses_testset() {
    let proto = compile_str("local a, b; local c = a or b");
    assert!(has_opcode(&proto, OpCode::TestSet));
}

#[test]
fn e2e_table_constructor_sizes() {
    let proto = compile_str("return {1, 2, x = 3, [4] = 5}");
    let new_table = find_opcode(&proto, OpCode::NewTable).unwrap();
    assert_eq!(fb2int(new_table.b()), 2);
    assert_eq!(fb2int(new_table.c()), 2);
    assert_eq!(count_opcode(&proto, OpCode::SetTable), 2);
    assert_eq!(count_opcode(&proto, OpCode::SetList), 1);
}

#[test]
fn e2e_nested_field_access() {
    let proto = compile_str("local t; return t.a.b");
    assert_eq!(count_opcode(&proto, OpCode::GetTable), 2);
    assert_eq!(string_constants(&proto), ["a", "b"]);
}

#[test]
fn e2e_vararg_result_counts() {
    let proto = compile_str("return ...");
    assert_eq!(find_opcode(&proto, OpCode::VarArg).unwrap().b(), 0);
    let proto = compile_str("local a, b = ...");
    assert_eq!(find_opcode(&proto, OpCode::VarArg).unwrap().b(), 3);
}

#[test]
fn e2e_parentheses_truncate_calls() {
    let proto = compile_str("return (f())");
    assert_eq!(find_opcode(&proto, OpCode::Call).unwrap().c(), 2);
    assert!(!has_opcode(&proto, OpCode::TailCall));
}

#[test]
fn e2e_call_sugar() {
    let proto = compile_str("f 'x' f {} obj:m(1)");
    assert_eq!(count_opcode(&proto, OpCode::Call), 3);
    assert!(has_opcode(&proto, OpCode::Self_));
}
