use super::helpers::*;
use moonlet_core::opcode::OpCode;

#[test]
fn e2e_local_declaration() {
    let proto = compile_str("local x = 42");
    assert!(has_opcode(&proto, OpCode::LoadK));
    assert_eq!(number_constants(&proto), [42.0]);
}

#[test]
fn e2e_local_nil_default_is_one_instruction() {
    let proto = compile_str("local x, y, z");
    assert_eq!(count_opcode(&proto, OpCode::LoadNil), 1);
    assert_eq!(find_opcode(&proto, OpCode::LoadNil).unwrap().b(), 2);
}

#[test]
fn e2e_local_fewer_values() {
    let proto = compile_str("local a, b, c = 1");
    assert!(has_opcode(&proto, OpCode::LoadK));
    assert_eq!(find_opcode(&proto, OpCode::LoadNil).unwrap().a(), 1);
}

#[test]
fn e2e_global_assign_and_read() {
    let proto = compile_str("x = 42");
    assert!(has_opcode(&proto, OpCode::SetTabUp));
    let proto = compile_str("return x");
    assert!(has_opcode(&proto, OpCode::GetTabUp));
    assert_eq!(string_constants(&proto), ["x"]);
}

#[test]
fn e2e_local_env_overrides_globals() {
    let proto = compile_str("local _ENV = {}; x = 1");
    assert!(!has_opcode(&proto, OpCode::SetTabUp));
    assert!(has_opcode(&proto, OpCode::SetTable));
}

#[test]
fn e2e_if_constant_condition_has_no_test() {
    let proto = compile_str("if true then local x = 1 end");
    assert!(!has_opcode(&proto, OpCode::Test));
    let proto = compile_str("local y\nif y then local x = 1 end");
    assert!(has_opcode(&proto, OpCode::Test));
    assert!(has_opcode(&proto, OpCode::Jmp));
}

#[test]
fn e2e_if_elseif_else() {
    let proto = compile_str(
        "local x, r = 2
         if x == 1 then r = 'a' elseif x == 2 then r = 'b' else r = 'c' end",
    );
    assert_eq!(count_opcode(&proto, OpCode::Eq), 2);
    assert_eq!(string_constants(&proto), ["a", "b", "c"]);
}

#[test]
fn e2e_while_jumps_backward() {
    let proto = compile_str("local i = 0 while i < 10 do i = i + 1 end");
    assert!(has_opcode(&proto, OpCode::Lt));
    let back = proto
        .code
        .iter()
        .filter(|i| i.opcode() == Some(OpCode::Jmp))
        .any(|i| i.sbx() < 0);
    assert!(back);
}

#[test]
fn e2e_repeat_condition_sees_body_locals() {
    let proto = compile_str("repeat local done = true until done");
    assert!(has_opcode(&proto, OpCode::Test));
}

#[test]
fn e2e_numeric_for_default_step() {
    let proto = compile_str("for i = 1, 3 do end");
    assert!(has_opcode(&proto, OpCode::ForPrep));
    assert!(has_opcode(&proto, OpCode::ForLoop));
    assert_eq!(number_constants(&proto), [1.0, 3.0]);
}

#[test]
fn e2e_generic_for() {
    let proto = compile_str("for k, v in pairs(t) do end");
    let call = find_opcode(&proto, OpCode::TForCall).unwrap();
    assert_eq!(call.c(), 2);
    assert!(has_opcode(&proto, OpCode::TForLoop));
}

#[test]
fn e2e_goto_continue() {
    let proto = compile_str(
        "local s = 0
         for i = 1, 3 do
             if i == 2 then goto continue end
             s = s + i
             ::continue::
         end",
    );
    assert!(has_opcode(&proto, OpCode::ForLoop));
}

#[test]
fn e2e_break_out_of_nested_blocks() {
    let proto = compile_str("while true do do break end end");
    assert!(count_opcode(&proto, OpCode::Jmp) >= 2);
}

#[test]
fn e2e_swap_assignment() {
    let proto = compile_str("local a, b = 1, 2; a, b = b, a");
    assert!(count_opcode(&proto, OpCode::Move) >= 2);
}

#[test]
fn e2e_captured_local_closes_on_block_exit() {
    let proto = compile_str("do local x = 1; f = function() return x end end");
    let close = proto
        .code
        .iter()
        .find(|i| i.opcode() == Some(OpCode::Jmp))
        .expect("closing jump");
    assert_eq!(close.a(), 1);
    assert_eq!(close.sbx(), 0);
}

#[test]
fn e2e_call_statement_discards_results() {
    let proto = compile_str("print('hi')");
    assert_eq!(find_opcode(&proto, OpCode::Call).unwrap().c(), 1);
}
