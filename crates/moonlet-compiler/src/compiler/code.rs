//! Per-function code generator: register allocation, jump lists, operand
//! discharge and constant folding over the virtual operand stack.
use indexmap::IndexSet;
use moonlet_core::number::{self, ArithOp};
use moonlet_core::opcode::{
    self, Instruction, OpCode, LFIELDS_PER_FLUSH, MAXINDEXRK, MAX_A, MAX_AX, MAX_B, MAX_BX,
    MAX_C, MAX_SBX,
};
use moonlet_core::proto::{Constant, Proto};
use moonlet_core::string::LuaString;

use super::expr::{BinOp, Operand, OperandKind, UnOp};
use super::scope::BlockScope;

/// Registers available to one function.
pub const MAX_REGS: u32 = 255;
/// "No register" marker for `TESTSET` patching.
const NO_REG: u32 = MAX_A;

/// State for a single function being compiled.
pub struct FuncState {
    pub proto: Proto,
    constants: IndexSet<Constant>,
    /// The virtual operand stack.
    operands: Vec<Operand>,
    pub blocks: Vec<BlockScope>,
    /// Declared locals (indices into `proto.local_vars`); the first
    /// `nactvar` are in scope.
    pub actvar: Vec<usize>,
    pub nactvar: u32,
    pub free_reg: u32,
    /// Jumps waiting for the next emitted instruction.
    jpc: Vec<usize>,
    last_target: usize,
    /// Line recorded for emitted instructions.
    pub line: u32,
    /// First error found while emitting; reported by the parser.
    pub error: Option<String>,
}

impl FuncState {
    pub fn new(source: Option<LuaString>, line_defined: u32) -> Self {
        FuncState {
            proto: Proto {
                source,
                line_defined,
                // registers 0 and 1 are always valid
                max_stack_size: 2,
                ..Proto::default()
            },
            constants: IndexSet::new(),
            operands: Vec::new(),
            blocks: Vec::new(),
            actvar: Vec::new(),
            nactvar: 0,
            free_reg: 0,
            jpc: Vec::new(),
            last_target: 0,
            line: line_defined.max(1),
            error: None,
        }
    }

    /// Move the constant pool into the prototype.
    pub fn finish(mut self) -> Proto {
        self.proto.constants = self.constants.into_iter().collect();
        self.proto
    }

    pub fn fail(&mut self, msg: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(msg.into());
        }
    }

    // ---- Operand stack ----

    pub fn push(&mut self, e: impl Into<Operand>) {
        self.operands.push(e.into());
    }

    pub fn pop(&mut self) -> Operand {
        self.operands.pop().expect("operand stack underflow")
    }

    pub fn top(&self) -> &Operand {
        self.operands.last().expect("operand stack underflow")
    }

    pub fn depth(&self) -> usize {
        self.operands.len()
    }

    /// Run a generator step on the top operand in place.
    pub fn apply<R>(&mut self, f: impl FnOnce(&mut Self, &mut Operand) -> R) -> R {
        let mut e = self.pop();
        let r = f(self, &mut e);
        self.push(e);
        r
    }

    /// Pop the top operand and consume it.
    pub fn consume<R>(&mut self, f: impl FnOnce(&mut Self, &mut Operand) -> R) -> R {
        let mut e = self.pop();
        f(self, &mut e)
    }

    // ---- Emission ----

    pub fn pc(&self) -> usize {
        self.proto.code.len()
    }

    fn code(&mut self, inst: Instruction) -> usize {
        self.discharge_jpc();
        self.proto.code.push(inst);
        self.proto.line_info.push(self.line);
        self.proto.code.len() - 1
    }

    pub fn code_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> usize {
        if a > MAX_A || b > MAX_B || c > MAX_C {
            self.fail("function or expression needs too many registers");
            return self.code(Instruction::abc(op, a & MAX_A, b & MAX_B, c & MAX_C));
        }
        self.code(Instruction::abc(op, a, b, c))
    }

    pub fn code_abx(&mut self, op: OpCode, a: u32, bx: u32) -> usize {
        self.code(Instruction::abx(op, a & MAX_A, bx & MAX_BX))
    }

    pub fn code_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> usize {
        self.code(Instruction::asbx(op, a & MAX_A, sbx))
    }

    fn code_extra_arg(&mut self, ax: u32) -> usize {
        self.code(Instruction::ax(OpCode::ExtraArg, ax & MAX_AX))
    }

    /// Load constant `k` into `reg`.
    pub fn code_k(&mut self, reg: u32, k: u32) -> usize {
        if k <= MAX_BX {
            self.code_abx(OpCode::LoadK, reg, k)
        } else {
            let pc = self.code_abx(OpCode::LoadKx, reg, 0);
            self.code_extra_arg(k);
            pc
        }
    }

    /// Attribute the last instruction to `line`.
    pub fn fix_line(&mut self, line: u32) {
        if let Some(l) = self.proto.line_info.last_mut() {
            *l = line;
        }
    }

    fn inst_mut(&mut self, pc: usize) -> &mut Instruction {
        &mut self.proto.code[pc]
    }

    pub fn ret(&mut self, first: u32, nret: i32) {
        self.code_abc(OpCode::Return, first, (nret + 1) as u32, 0);
    }

    // ---- Jumps ----

    /// Mark the current pc as a jump target.
    pub fn get_label(&mut self) -> usize {
        self.last_target = self.pc();
        self.pc()
    }

    /// Emit an unconditional jump. The returned list starts with the new
    /// jump and absorbs the jumps pending to this position.
    pub fn jump(&mut self) -> Vec<usize> {
        let pending = std::mem::take(&mut self.jpc);
        let j = self.code_asbx(OpCode::Jmp, 0, -1);
        let mut list = vec![j];
        list.extend(pending);
        list
    }

    /// Emit a test followed by its jump; returns the jump's pc.
    fn cond_jump(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> usize {
        self.code_abc(op, a, b, c);
        self.code_asbx(OpCode::Jmp, 0, -1)
    }

    fn fix_jump(&mut self, pc: usize, dest: usize) {
        let offset = dest as i64 - (pc as i64 + 1);
        if offset.abs() > MAX_SBX as i64 {
            self.fail("control structure too long");
            return;
        }
        self.inst_mut(pc).set_sbx(offset as i32);
    }

    /// Instruction controlling the jump at `pc` (the test before it, if any).
    fn jump_control(&self, pc: usize) -> usize {
        if pc >= 1 {
            if let Some(op) = self.proto.code[pc - 1].opcode() {
                if op.is_test() {
                    return pc - 1;
                }
            }
        }
        pc
    }

    fn patch_test_reg(&mut self, node: usize, reg: u32) -> bool {
        let ctl = self.jump_control(node);
        let i = self.proto.code[ctl];
        if i.opcode() != Some(OpCode::TestSet) {
            return false;
        }
        if reg != NO_REG && reg != i.b() {
            self.inst_mut(ctl).set_a(reg);
        } else {
            self.proto.code[ctl] = Instruction::abc(OpCode::Test, i.b(), 0, i.c());
        }
        true
    }

    fn remove_values(&mut self, list: &[usize]) {
        for &pc in list {
            self.patch_test_reg(pc, NO_REG);
        }
    }

    fn patch_list_aux(&mut self, list: &[usize], vtarget: usize, reg: u32, dtarget: usize) {
        for &pc in list {
            if self.patch_test_reg(pc, reg) {
                self.fix_jump(pc, vtarget);
            } else {
                self.fix_jump(pc, dtarget);
            }
        }
    }

    fn discharge_jpc(&mut self) {
        if self.jpc.is_empty() {
            return;
        }
        let list = std::mem::take(&mut self.jpc);
        let pc = self.pc();
        self.patch_list_aux(&list, pc, NO_REG, pc);
    }

    pub fn patch_to_here(&mut self, list: Vec<usize>) {
        self.get_label();
        self.jpc.extend(list);
    }

    pub fn patch_list(&mut self, list: Vec<usize>, target: usize) {
        if target == self.pc() {
            self.patch_to_here(list);
        } else {
            self.patch_list_aux(&list, target, NO_REG, target);
        }
    }

    /// Make the jumps in `list` close upvalues from register `level` up.
    pub fn patch_close(&mut self, list: &[usize], level: u32) {
        for &pc in list {
            self.inst_mut(pc).set_a(level + 1);
        }
    }

    /// Any jump in the list that does not produce its own value?
    fn need_value(&self, list: &[usize]) -> bool {
        list.iter().any(|&pc| {
            let ctl = self.jump_control(pc);
            self.proto.code[ctl].opcode() != Some(OpCode::TestSet)
        })
    }

    // ---- Registers ----

    pub fn check_stack(&mut self, n: u32) {
        let new_stack = self.free_reg + n;
        if new_stack > self.proto.max_stack_size as u32 {
            if new_stack >= MAX_REGS {
                self.fail("function or expression needs too many registers");
                return;
            }
            self.proto.max_stack_size = new_stack as u8;
        }
    }

    pub fn reserve_regs(&mut self, n: u32) {
        self.check_stack(n);
        self.free_reg += n;
    }

    fn free_register(&mut self, reg: u32) {
        if !opcode::is_k(reg) && reg >= self.nactvar {
            self.free_reg -= 1;
            debug_assert_eq!(reg, self.free_reg, "registers freed out of order");
        }
    }

    fn free_exp(&mut self, e: &Operand) {
        if let OperandKind::Register(r) = e.kind {
            self.free_register(r);
        }
    }

    fn free_exps(&mut self, e1: &Operand, e2: &Operand) {
        let r1 = match e1.kind {
            OperandKind::Register(r) => Some(r),
            _ => None,
        };
        let r2 = match e2.kind {
            OperandKind::Register(r) => Some(r),
            _ => None,
        };
        // Free the higher register first.
        if r1 > r2 {
            self.free_exp(e1);
            self.free_exp(e2);
        } else {
            self.free_exp(e2);
            self.free_exp(e1);
        }
    }

    // ---- Constants ----

    pub fn add_constant(&mut self, k: Constant) -> u32 {
        let (idx, _) = self.constants.insert_full(k);
        idx as u32
    }

    pub fn string_k(&mut self, s: LuaString) -> u32 {
        self.add_constant(Constant::String(s))
    }

    pub fn number_k(&mut self, n: f64) -> u32 {
        self.add_constant(Constant::Number(n))
    }

    /// Set `n` registers from `from` to nil, merging with a preceding `LOADNIL`.
    pub fn nil(&mut self, from: u32, n: u32) {
        let mut from = from;
        let mut last = from + n - 1;
        if self.pc() > self.last_target && self.pc() > 0 {
            let prev = self.proto.code[self.pc() - 1];
            if prev.opcode() == Some(OpCode::LoadNil) {
                let pfrom = prev.a();
                let plast = pfrom + prev.b();
                if (pfrom <= from && from <= plast + 1) || (from <= pfrom && pfrom <= last + 1) {
                    from = from.min(pfrom);
                    last = last.max(plast);
                    let pc = self.pc() - 1;
                    let inst = self.inst_mut(pc);
                    inst.set_a(from);
                    inst.set_b(last - from);
                    return;
                }
            }
        }
        self.code_abc(OpCode::LoadNil, from, n - 1, 0);
    }

    // ---- Discharging operands ----

    /// Fix the number of results of an open call or vararg.
    pub fn set_returns(&mut self, e: &mut Operand, nresults: i32) {
        match e.kind {
            OperandKind::Call(pc) => self.inst_mut(pc).set_c((nresults + 1) as u32),
            OperandKind::Vararg(pc) => {
                let free = self.free_reg;
                let inst = self.inst_mut(pc);
                inst.set_b((nresults + 1) as u32);
                inst.set_a(free);
                self.reserve_regs(1);
            }
            _ => debug_assert_eq!(nresults, -1),
        }
    }

    pub fn set_multret(&mut self, e: &mut Operand) {
        self.set_returns(e, -1);
    }

    /// Make a multi-value operand produce exactly one value.
    pub fn set_one_ret(&mut self, e: &mut Operand) {
        match e.kind {
            OperandKind::Call(pc) => {
                e.kind = OperandKind::Register(self.proto.code[pc].a());
            }
            OperandKind::Vararg(pc) => {
                self.inst_mut(pc).set_b(2);
                e.kind = OperandKind::Relocatable(pc);
            }
            _ => {}
        }
    }

    /// Turn variables into values (possibly still relocatable).
    pub fn discharge_vars(&mut self, e: &mut Operand) {
        match e.kind {
            OperandKind::Local(r) => e.kind = OperandKind::Register(r),
            OperandKind::NewTable { reg, .. } => e.kind = OperandKind::Register(reg),
            OperandKind::Upvalue(idx) => {
                let pc = self.code_abc(OpCode::GetUpval, 0, idx, 0);
                e.kind = OperandKind::Relocatable(pc);
            }
            OperandKind::Indexed {
                table,
                key,
                via_upvalue,
            } => {
                self.free_register(key);
                let op = if via_upvalue {
                    OpCode::GetTabUp
                } else {
                    self.free_register(table);
                    OpCode::GetTable
                };
                let pc = self.code_abc(op, 0, table, key);
                e.kind = OperandKind::Relocatable(pc);
            }
            OperandKind::Call(_) | OperandKind::Vararg(_) => self.set_one_ret(e),
            _ => {}
        }
    }

    fn discharge_to_reg(&mut self, e: &mut Operand, reg: u32) {
        self.discharge_vars(e);
        match e.kind {
            OperandKind::Nil => self.nil(reg, 1),
            OperandKind::False => {
                self.code_abc(OpCode::LoadBool, reg, 0, 0);
            }
            OperandKind::True => {
                self.code_abc(OpCode::LoadBool, reg, 1, 0);
            }
            OperandKind::Constant(k) => {
                self.code_k(reg, k);
            }
            OperandKind::Number(n) => {
                let k = self.number_k(n);
                self.code_k(reg, k);
            }
            OperandKind::Relocatable(pc) | OperandKind::Concat(pc) => {
                self.inst_mut(pc).set_a(reg);
            }
            OperandKind::Register(r) => {
                if r != reg {
                    self.code_abc(OpCode::Move, reg, r, 0);
                }
            }
            _ => {
                debug_assert!(matches!(e.kind, OperandKind::Jump(_)));
                return;
            }
        }
        e.kind = OperandKind::Register(reg);
    }

    fn discharge_to_any_reg(&mut self, e: &mut Operand) {
        if !matches!(e.kind, OperandKind::Register(_)) {
            self.reserve_regs(1);
            let reg = self.free_reg - 1;
            self.discharge_to_reg(e, reg);
        }
    }

    fn code_load_bool(&mut self, a: u32, b: u32, jump: u32) -> usize {
        self.get_label();
        self.code_abc(OpCode::LoadBool, a, b, jump)
    }

    /// Load `e` into `reg`, resolving its pending jumps.
    fn exp_to_reg(&mut self, e: &mut Operand, reg: u32) {
        self.discharge_to_reg(e, reg);
        if let OperandKind::Jump(pc) = e.kind {
            e.t.push(pc);
        }
        if e.has_jumps() {
            let t = std::mem::take(&mut e.t);
            let f = std::mem::take(&mut e.f);
            let mut p_f = None;
            let mut p_t = None;
            if self.need_value(&t) || self.need_value(&f) {
                let fj = if matches!(e.kind, OperandKind::Jump(_)) {
                    Vec::new()
                } else {
                    self.jump()
                };
                p_f = Some(self.code_load_bool(reg, 0, 1));
                p_t = Some(self.code_load_bool(reg, 1, 0));
                self.patch_to_here(fj);
            }
            let end = self.get_label();
            self.patch_list_aux(&f, end, reg, p_f.unwrap_or(end));
            self.patch_list_aux(&t, end, reg, p_t.unwrap_or(end));
        }
        e.t.clear();
        e.f.clear();
        e.kind = OperandKind::Register(reg);
    }

    /// Load `e` into the next free register.
    pub fn exp2nextreg(&mut self, e: &mut Operand) {
        self.discharge_vars(e);
        self.free_exp(e);
        self.reserve_regs(1);
        let reg = self.free_reg - 1;
        self.exp_to_reg(e, reg);
    }

    /// Load `e` into some register and return it.
    pub fn exp2anyreg(&mut self, e: &mut Operand) -> u32 {
        self.discharge_vars(e);
        if let OperandKind::Register(r) = e.kind {
            if !e.has_jumps() {
                return r;
            }
            if r >= self.nactvar {
                self.exp_to_reg(e, r);
                return r;
            }
        }
        self.exp2nextreg(e);
        e.reg().unwrap_or(0)
    }

    /// Upvalues can be used in place as a table base.
    pub fn exp2anyregup(&mut self, e: &mut Operand) {
        if !matches!(e.kind, OperandKind::Upvalue(_)) || e.has_jumps() {
            self.exp2anyreg(e);
        }
    }

    pub fn exp2val(&mut self, e: &mut Operand) {
        if e.has_jumps() {
            self.exp2anyreg(e);
        } else {
            self.discharge_vars(e);
        }
    }

    /// Register or constant operand (constants carry the K flag).
    pub fn exp2rk(&mut self, e: &mut Operand) -> u32 {
        self.exp2val(e);
        let k = match e.kind {
            OperandKind::True => Some(self.add_constant(Constant::Boolean(true))),
            OperandKind::False => Some(self.add_constant(Constant::Boolean(false))),
            OperandKind::Nil => Some(self.add_constant(Constant::Nil)),
            OperandKind::Number(n) => Some(self.number_k(n)),
            OperandKind::Constant(k) => Some(k),
            _ => None,
        };
        if let Some(k) = k {
            e.kind = OperandKind::Constant(k);
            if k <= MAXINDEXRK {
                return opcode::rk_ask(k);
            }
        }
        self.exp2anyreg(e)
    }

    /// Assign `ex` to the variable `var`.
    pub fn store_var(&mut self, var: &Operand, ex: &mut Operand) {
        match var.kind {
            OperandKind::Local(reg) => {
                self.free_exp(ex);
                self.exp_to_reg(ex, reg);
                return;
            }
            OperandKind::Upvalue(idx) => {
                let e = self.exp2anyreg(ex);
                self.code_abc(OpCode::SetUpval, e, idx, 0);
            }
            OperandKind::Indexed {
                table,
                key,
                via_upvalue,
            } => {
                let op = if via_upvalue {
                    OpCode::SetTabUp
                } else {
                    OpCode::SetTable
                };
                let e = self.exp2rk(ex);
                self.code_abc(op, table, key, e);
            }
            _ => panic!("invalid assignment target {:?}", var.kind),
        }
        self.free_exp(ex);
    }

    /// `e:key`: put method and self in two consecutive registers.
    pub fn self_op(&mut self, e: &mut Operand, key: &mut Operand) {
        self.exp2anyreg(e);
        let ereg = e.reg().unwrap_or(0);
        self.free_exp(e);
        let base = self.free_reg;
        e.kind = OperandKind::Register(base);
        self.reserve_regs(2);
        let k = self.exp2rk(key);
        self.code_abc(OpCode::Self_, base, ereg, k);
        self.free_exp(key);
    }

    /// `t[k]`; `t` must be in a register or an upvalue.
    pub fn indexed(&mut self, t: &mut Operand, k: &mut Operand) {
        debug_assert!(!t.has_jumps());
        let key = self.exp2rk(k);
        let (table, via_upvalue) = match t.kind {
            OperandKind::Upvalue(idx) => (idx, true),
            OperandKind::Local(r) | OperandKind::Register(r) => (r, false),
            ref other => panic!("cannot index operand {other:?}"),
        };
        t.kind = OperandKind::Indexed {
            table,
            key,
            via_upvalue,
        };
    }

    // ---- Conditions ----

    fn negate_condition(&mut self, pc: usize) {
        let ctl = self.jump_control(pc);
        let a = self.proto.code[ctl].a();
        self.inst_mut(ctl).set_a(u32::from(a == 0));
    }

    fn jump_on_cond(&mut self, e: &mut Operand, cond: bool) -> Vec<usize> {
        if let OperandKind::Relocatable(pc) = e.kind {
            let ie = self.proto.code[pc];
            if ie.opcode() == Some(OpCode::Not) && pc + 1 == self.pc() {
                // Drop the NOT and test its operand with the opposite sense.
                self.proto.code.pop();
                self.proto.line_info.pop();
                return vec![self.cond_jump(OpCode::Test, ie.b(), 0, u32::from(!cond))];
            }
        }
        self.discharge_to_any_reg(e);
        self.free_exp(e);
        let reg = e.reg().unwrap_or(0);
        vec![self.cond_jump(OpCode::TestSet, NO_REG, reg, u32::from(cond))]
    }

    /// Fall through when `e` is true, jump (via `e.f`) when false.
    pub fn go_if_true(&mut self, e: &mut Operand) {
        self.discharge_vars(e);
        let jumps = match e.kind {
            OperandKind::Jump(pc) => {
                self.negate_condition(pc);
                vec![pc]
            }
            OperandKind::Constant(_) | OperandKind::Number(_) | OperandKind::True => Vec::new(),
            _ => self.jump_on_cond(e, false),
        };
        e.f.extend(jumps);
        let t = std::mem::take(&mut e.t);
        self.patch_to_here(t);
    }

    /// Fall through when `e` is false, jump (via `e.t`) when true.
    pub fn go_if_false(&mut self, e: &mut Operand) {
        self.discharge_vars(e);
        let jumps = match e.kind {
            OperandKind::Jump(pc) => vec![pc],
            OperandKind::Nil | OperandKind::False => Vec::new(),
            _ => self.jump_on_cond(e, true),
        };
        e.t.extend(jumps);
        let f = std::mem::take(&mut e.f);
        self.patch_to_here(f);
    }

    fn code_not(&mut self, e: &mut Operand) {
        self.discharge_vars(e);
        match e.kind {
            OperandKind::Nil | OperandKind::False => e.kind = OperandKind::True,
            OperandKind::Constant(_) | OperandKind::Number(_) | OperandKind::True => {
                e.kind = OperandKind::False
            }
            OperandKind::Jump(pc) => self.negate_condition(pc),
            OperandKind::Relocatable(_) | OperandKind::Concat(_) | OperandKind::Register(_) => {
                self.discharge_to_any_reg(e);
                self.free_exp(e);
                let r = e.reg().unwrap_or(0);
                let pc = self.code_abc(OpCode::Not, 0, r, 0);
                e.kind = OperandKind::Relocatable(pc);
            }
            ref other => panic!("cannot negate operand {other:?}"),
        }
        std::mem::swap(&mut e.t, &mut e.f);
        let (t, f) = (e.t.clone(), e.f.clone());
        self.remove_values(&f);
        self.remove_values(&t);
    }

    // ---- Operators ----

    /// Fold `e1 op e2` when both are numerals and the result is safe.
    fn const_folding(&mut self, op: ArithOp, e1: &mut Operand, e2: &Operand) -> bool {
        let (Some(a), Some(b)) = (e1.numeral(), e2.numeral()) else {
            return false;
        };
        if op.is_division() && b == 0.0 {
            return false;
        }
        match number::arith(op, a, b) {
            Some(r) if !r.is_nan() => {
                e1.kind = OperandKind::Number(r);
                true
            }
            _ => false,
        }
    }

    fn code_un_exp_val(&mut self, op: OpCode, e: &mut Operand, line: u32) {
        let r = self.exp2anyreg(e);
        self.free_exp(e);
        let pc = self.code_abc(op, 0, r, 0);
        e.kind = OperandKind::Relocatable(pc);
        self.fix_line(line);
    }

    fn code_bin_exp_val(&mut self, op: OpCode, e1: &mut Operand, e2: &mut Operand, line: u32) {
        let rk2 = self.exp2rk(e2);
        let rk1 = self.exp2rk(e1);
        self.free_exps(e1, e2);
        let pc = self.code_abc(op, 0, rk1, rk2);
        e1.kind = if op == OpCode::Concat {
            OperandKind::Concat(pc)
        } else {
            OperandKind::Relocatable(pc)
        };
        self.fix_line(line);
    }

    fn code_comp(&mut self, op: BinOp, e1: &mut Operand, e2: &mut Operand) {
        let rk1 = match e1.kind {
            OperandKind::Constant(k) => opcode::rk_ask(k),
            OperandKind::Register(r) => r,
            ref other => panic!("bad comparison operand {other:?}"),
        };
        let rk2 = self.exp2rk(e2);
        self.free_exps(e1, e2);
        let pc = match op {
            BinOp::Ne => self.cond_jump(OpCode::Eq, 0, rk1, rk2),
            BinOp::Gt => self.cond_jump(OpCode::Lt, 1, rk2, rk1),
            BinOp::Ge => self.cond_jump(OpCode::Le, 1, rk2, rk1),
            BinOp::Eq => self.cond_jump(OpCode::Eq, 1, rk1, rk2),
            BinOp::Lt => self.cond_jump(OpCode::Lt, 1, rk1, rk2),
            BinOp::Le => self.cond_jump(OpCode::Le, 1, rk1, rk2),
            _ => unreachable!("not a comparison: {op:?}"),
        };
        e1.kind = OperandKind::Jump(pc);
    }

    /// Apply a unary operator to the top operand.
    pub fn prefix(&mut self, op: UnOp, line: u32) {
        self.apply(|fs, e| {
            let zero = Operand::new(OperandKind::Number(0.0));
            match op {
                UnOp::Minus => {
                    if !fs.const_folding(ArithOp::Unm, e, &zero) {
                        fs.code_un_exp_val(OpCode::Unm, e, line);
                    }
                }
                UnOp::BNot => {
                    if !fs.const_folding(ArithOp::BNot, e, &zero) {
                        fs.code_un_exp_val(OpCode::BNot, e, line);
                    }
                }
                UnOp::Len => fs.code_un_exp_val(OpCode::Len, e, line),
                UnOp::Not => fs.code_not(e),
            }
        });
    }

    /// Prepare the left operand (top of stack) before the right one is parsed.
    pub fn infix(&mut self, op: BinOp) {
        self.apply(|fs, v| match op {
            BinOp::And => fs.go_if_true(v),
            BinOp::Or => fs.go_if_false(v),
            BinOp::Concat => fs.exp2nextreg(v),
            _ if op.arith().is_some() => {
                if v.numeral().is_none() {
                    fs.exp2rk(v);
                }
            }
            _ => {
                fs.exp2rk(v);
            }
        });
    }

    /// Combine the two top operands.
    pub fn posfix(&mut self, op: BinOp, line: u32) {
        let mut e2 = self.pop();
        let mut e1 = self.pop();
        match op {
            BinOp::And => {
                debug_assert!(e1.t.is_empty());
                self.discharge_vars(&mut e2);
                e2.f.extend(std::mem::take(&mut e1.f));
                e1 = e2;
            }
            BinOp::Or => {
                debug_assert!(e1.f.is_empty());
                self.discharge_vars(&mut e2);
                e2.t.extend(std::mem::take(&mut e1.t));
                e1 = e2;
            }
            BinOp::Concat => {
                self.exp2val(&mut e2);
                match e2.kind {
                    OperandKind::Concat(pc) => {
                        debug_assert_eq!(e1.reg().map(|r| r + 1), Some(self.proto.code[pc].b()));
                        self.free_exp(&e1);
                        let r = e1.reg().unwrap_or(0);
                        self.inst_mut(pc).set_b(r);
                        e1.kind = OperandKind::Concat(pc);
                    }
                    _ => {
                        self.exp2nextreg(&mut e2);
                        self.code_bin_exp_val(OpCode::Concat, &mut e1, &mut e2, line);
                    }
                }
            }
            BinOp::Eq | BinOp::Lt | BinOp::Le | BinOp::Ne | BinOp::Gt | BinOp::Ge => {
                self.code_comp(op, &mut e1, &mut e2);
            }
            _ => {
                let (aop, opc) = op.arith().expect("arithmetic operator");
                if !self.const_folding(aop, &mut e1, &e2) {
                    self.code_bin_exp_val(opc, &mut e1, &mut e2, line);
                }
            }
        }
        self.push(e1);
    }

    /// In `a, a.x = ...` style assignments, earlier indexed targets that use
    /// the variable on top of the stack must read it from a copy.
    pub fn check_conflict(&mut self, first: usize) {
        let top = self.operands.len() - 1;
        let v = self.operands[top].kind.clone();
        let extra = self.free_reg;
        let mut conflict = false;
        for lh in &mut self.operands[first..top] {
            if let OperandKind::Indexed {
                table,
                key,
                via_upvalue,
            } = &mut lh.kind
            {
                let same_table = match v {
                    OperandKind::Upvalue(i) => *via_upvalue && *table == i,
                    OperandKind::Local(r) => !*via_upvalue && *table == r,
                    _ => false,
                };
                if same_table {
                    conflict = true;
                    *via_upvalue = false;
                    *table = extra;
                }
                if let OperandKind::Local(r) = v {
                    if *key == r {
                        conflict = true;
                        *key = extra;
                    }
                }
            }
        }
        if conflict {
            match v {
                OperandKind::Local(r) => {
                    self.code_abc(OpCode::Move, extra, r, 0);
                }
                OperandKind::Upvalue(i) => {
                    self.code_abc(OpCode::GetUpval, extra, i, 0);
                }
                _ => {}
            }
            self.reserve_regs(1);
        }
    }

    /// Flush `tostore` list items into the table at `base` (`-1` = up to top).
    pub fn set_list(&mut self, base: u32, nelems: u32, tostore: i32) {
        let c = (nelems.saturating_sub(1)) / LFIELDS_PER_FLUSH + 1;
        let b = if tostore < 0 { 0 } else { tostore as u32 };
        if c <= MAX_C {
            self.code_abc(OpCode::SetList, base, b, c);
        } else if c <= MAX_AX {
            self.code_abc(OpCode::SetList, base, b, 0);
            self.code_extra_arg(c);
        } else {
            self.fail("constructor too long");
        }
        self.free_reg = base + 1;
    }

    /// Patch the `NEWTABLE` size hints.
    pub fn set_table_size(&mut self, pc: usize, narray: u32, nhash: u32) {
        let inst = self.inst_mut(pc);
        inst.set_b(opcode::int2fb(narray));
        inst.set_c(opcode::int2fb(nhash));
    }

    /// Turn an open call into a statement (no results) or a tail call.
    pub fn set_call_results(&mut self, pc: usize, c: u32) {
        self.inst_mut(pc).set_c(c);
    }

    pub fn make_tail_call(&mut self, pc: usize) {
        self.inst_mut(pc).set_op(OpCode::TailCall);
    }

    pub fn instruction(&self, pc: usize) -> Instruction {
        self.proto.code[pc]
    }
}
