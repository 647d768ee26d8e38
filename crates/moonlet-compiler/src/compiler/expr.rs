//! Operands of the virtual operand stack and the operator tables.
use moonlet_core::number::ArithOp;
use moonlet_core::opcode::OpCode;

/// Where an operand's value currently lives.
#[derive(Clone, Debug, PartialEq)]
pub enum OperandKind {
    /// No value (empty expression list).
    Void,
    Nil,
    True,
    False,
    /// Numeric literal, still foldable.
    Number(f64),
    /// Constant pool index.
    Constant(u32),
    /// Active local in a fixed register.
    Local(u32),
    /// Upvalue index.
    Upvalue(u32),
    /// `table[key]`; `key` is an RK operand, `table` a register or upvalue.
    Indexed { table: u32, key: u32, via_upvalue: bool },
    /// Comparison: the conditional jump at this pc.
    Jump(usize),
    /// Instruction at this pc whose destination register is not set yet.
    Relocatable(usize),
    /// `CONCAT` at this pc; the next operand to its left can merge into it.
    Concat(usize),
    /// Value fixed in a register.
    Register(u32),
    /// Open call at this pc.
    Call(usize),
    /// `VARARG` at this pc.
    Vararg(usize),
    /// Table constructor in progress: `NEWTABLE` at `pc`, table in `reg`.
    NewTable { pc: usize, reg: u32 },
}

/// An operand plus its pending "exit when true" / "exit when false" jumps.
#[derive(Clone, Debug, PartialEq)]
pub struct Operand {
    pub kind: OperandKind,
    pub t: Vec<usize>,
    pub f: Vec<usize>,
}

impl Operand {
    pub fn new(kind: OperandKind) -> Self {
        Operand {
            kind,
            t: Vec::new(),
            f: Vec::new(),
        }
    }

    pub fn has_jumps(&self) -> bool {
        !self.t.is_empty() || !self.f.is_empty()
    }

    /// Numeric literal without pending jumps.
    pub fn numeral(&self) -> Option<f64> {
        match self.kind {
            OperandKind::Number(n) if !self.has_jumps() => Some(n),
            _ => None,
        }
    }

    /// Calls and varargs can produce any number of values.
    pub fn has_multret(&self) -> bool {
        matches!(self.kind, OperandKind::Call(_) | OperandKind::Vararg(_))
    }

    /// Can appear on the left of `=`.
    pub fn is_var(&self) -> bool {
        matches!(
            self.kind,
            OperandKind::Local(_) | OperandKind::Upvalue(_) | OperandKind::Indexed { .. }
        )
    }

    /// Register holding the value, for locals and fixed registers.
    pub fn reg(&self) -> Option<u32> {
        match self.kind {
            OperandKind::Local(r) | OperandKind::Register(r) => Some(r),
            OperandKind::NewTable { reg, .. } => Some(reg),
            _ => None,
        }
    }
}

impl From<OperandKind> for Operand {
    fn from(kind: OperandKind) -> Self {
        Operand::new(kind)
    }
}

/// Binary operators in priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Concat,
    Eq,
    Lt,
    Le,
    Ne,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    /// (left, right) priority; right < left means right-associative.
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOp::Add | BinOp::Sub => (10, 10),
            BinOp::Mul | BinOp::Mod | BinOp::Div | BinOp::IDiv => (11, 11),
            BinOp::Pow => (14, 13),
            BinOp::BAnd => (6, 6),
            BinOp::BOr => (4, 4),
            BinOp::BXor => (5, 5),
            BinOp::Shl | BinOp::Shr => (7, 7),
            BinOp::Concat => (9, 8),
            BinOp::Eq | BinOp::Lt | BinOp::Le | BinOp::Ne | BinOp::Gt | BinOp::Ge => (3, 3),
            BinOp::And => (2, 2),
            BinOp::Or => (1, 1),
        }
    }

    /// The arithmetic operator and its opcode, for foldable operators.
    pub fn arith(self) -> Option<(ArithOp, OpCode)> {
        Some(match self {
            BinOp::Add => (ArithOp::Add, OpCode::Add),
            BinOp::Sub => (ArithOp::Sub, OpCode::Sub),
            BinOp::Mul => (ArithOp::Mul, OpCode::Mul),
            BinOp::Mod => (ArithOp::Mod, OpCode::Mod),
            BinOp::Pow => (ArithOp::Pow, OpCode::Pow),
            BinOp::Div => (ArithOp::Div, OpCode::Div),
            BinOp::IDiv => (ArithOp::IDiv, OpCode::IDiv),
            BinOp::BAnd => (ArithOp::BAnd, OpCode::BAnd),
            BinOp::BOr => (ArithOp::BOr, OpCode::BOr),
            BinOp::BXor => (ArithOp::BXor, OpCode::BXor),
            BinOp::Shl => (ArithOp::Shl, OpCode::Shl),
            BinOp::Shr => (ArithOp::Shr, OpCode::Shr),
            _ => return None,
        })
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Minus,
    BNot,
    Not,
    Len,
}

/// Priority of all unary operators.
pub const UNARY_PRIORITY: u8 = 12;
