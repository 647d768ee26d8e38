use super::helpers::*;
use moonlet_core::opcode::OpCode;

#[test]
fn e2e_local_function_recursion() {
    let proto = compile_str("local function f(n) if n > 0 then return f(n - 1) end end");
    assert_eq!(proto.protos.len(), 1);
    let child = &proto.protos[0];
    assert_eq!(child.num_params, 1);
    assert_eq!(child.upvalues.len(), 1);
    assert!(child.upvalues[0].in_stack);
    assert_eq!(child.upvalues[0].index, 0);
    assert!(has_opcode(child, OpCode::TailCall));
}

#[test]
fn e2e_vararg_function() {
    let proto = compile_str("local function f(a, ...) return select('#', ...) end");
    let child = &proto.protos[0];
    assert!(child.is_vararg);
    assert_eq!(child.num_params, 1);
}

#[test]
fn e2e_method_has_self() {
    let proto = compile_str("local obj = {} function obj:get() return self end");
    assert_eq!(proto.protos[0].num_params, 1);
    assert_eq!(proto.protos[0].local_vars[0].name.to_string(), "self");
}

#[test]
fn e2e_upvalue_through_two_levels() {
    let proto = compile_str(
        "local counter = 0
         local function outer()
             return function() counter = counter + 1 return counter end
         end",
    );
    let outer = &proto.protos[0];
    let inner = &outer.protos[0];
    assert!(outer.upvalues[0].in_stack);
    assert!(!inner.upvalues[0].in_stack);
    assert_eq!(inner.upvalues[0].index, 0);
    assert!(has_opcode(inner, OpCode::SetUpval));
}

#[test]
fn e2e_global_function_uses_env_upvalue() {
    let proto = compile_str("function f() return g end");
    let child = &proto.protos[0];
    assert_eq!(child.upvalues[0].name.as_ref().unwrap().to_string(), "_ENV");
    assert!(!child.upvalues[0].in_stack);
}

#[test]
fn e2e_multiple_returns() {
    let proto = compile_str("return 1, 2, 3");
    let ret = find_opcode(&proto, OpCode::Return).unwrap();
    assert_eq!(ret.b(), 4);
}

#[test]
fn e2e_line_ranges() {
    let proto = compile_str("local x\nlocal function f()\n  return x\nend");
    let child = &proto.protos[0];
    assert_eq!(child.line_defined, 2);
    assert_eq!(child.last_line_defined, 4);
}

#[test]
fn e2e_stack_size_covers_temporaries() {
    let proto = compile_str("local function f(a, b, c) return a + b + c end");
    assert!(proto.protos[0].max_stack_size >= 4);
}
