/// Opcodes and instruction encoding.
///
/// Instruction format (32 bits):
/// - Bits 0-5: OpCode (6 bits)
/// - Bits 6-13: A (8 bits)
/// - For iABC format:
///   - Bits 14-22: C (9 bits)
///   - Bits 23-31: B (9 bits)
/// - For iABx: Bx = bits 14-31 (unsigned 18 bits)
/// - For iAsBx: sBx = Bx - MAX_SBX (signed interpretation)
/// - For iAx: Ax = bits 6-31 (26 bits, unsigned)
///
/// B and C operands of RK kind address a constant when bit 8 is set.
use std::fmt;

const SIZE_OP: u32 = 6;
const SIZE_A: u32 = 8;
const SIZE_B: u32 = 9;
const SIZE_C: u32 = 9;
const SIZE_BX: u32 = SIZE_B + SIZE_C; // 18
const SIZE_AX: u32 = SIZE_A + SIZE_B + SIZE_C; // 26

const POS_OP: u32 = 0;
const POS_A: u32 = POS_OP + SIZE_OP; // 6
const POS_C: u32 = POS_A + SIZE_A; // 14
const POS_B: u32 = POS_C + SIZE_C; // 23
const POS_BX: u32 = POS_C;
const POS_AX: u32 = POS_A;

const fn mask(n: u32) -> u32 {
    (1 << n) - 1
}

pub const MAX_A: u32 = mask(SIZE_A); // 255
pub const MAX_B: u32 = mask(SIZE_B); // 511
pub const MAX_C: u32 = mask(SIZE_C); // 511
pub const MAX_BX: u32 = mask(SIZE_BX); // 262143
pub const MAX_SBX: i32 = (MAX_BX >> 1) as i32; // 131071
pub const MAX_AX: u32 = mask(SIZE_AX);

/// Bit that marks a B/C operand as a constant index.
pub const BITRK: u32 = 1 << (SIZE_B - 1);
/// Largest constant index that fits in an RK operand.
pub const MAXINDEXRK: u32 = BITRK - 1;

/// List items flushed per SETLIST.
pub const LFIELDS_PER_FLUSH: u32 = 50;

/// Returns true if an RK operand refers to a constant.
#[inline]
pub fn is_k(x: u32) -> bool {
    x & BITRK != 0
}

/// Constant index of an RK operand.
#[inline]
pub fn index_k(x: u32) -> u32 {
    x & !BITRK
}

/// Encode a constant index as an RK operand.
#[inline]
pub fn rk_ask(x: u32) -> u32 {
    x | BITRK
}

/// All 47 opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,
    LoadK,
    LoadKx,
    LoadBool,
    LoadNil,
    GetUpval,
    GetTabUp,
    GetTable,
    SetTabUp,
    SetUpval,
    SetTable,
    NewTable,
    Self_,
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
    Unm,
    BNot,
    Not,
    Len,
    Concat,
    Jmp,
    Eq,
    Lt,
    Le,
    Test,
    TestSet,
    Call,
    TailCall,
    Return,
    ForLoop,
    ForPrep,
    TForCall,
    TForLoop,
    SetList,
    Closure,
    VarArg,
    ExtraArg,
}

use OpCode::*;

const ALL_OPCODES: [OpCode; OpCode::COUNT] = [
    Move, LoadK, LoadKx, LoadBool, LoadNil, GetUpval, GetTabUp, GetTable, SetTabUp, SetUpval,
    SetTable, NewTable, Self_, Add, Sub, Mul, Mod, Pow, Div, IDiv, BAnd, BOr, BXor, Shl, Shr,
    Unm, BNot, Not, Len, Concat, Jmp, Eq, Lt, Le, Test, TestSet, Call, TailCall, Return,
    ForLoop, ForPrep, TForCall, TForLoop, SetList, Closure, VarArg, ExtraArg,
];

impl OpCode {
    /// Number of opcodes.
    pub const COUNT: usize = 47;

    /// Get the opcode from a u8 value.
    pub fn from_u8(val: u8) -> Option<OpCode> {
        ALL_OPCODES.get(val as usize).copied()
    }

    /// Get the instruction format for this opcode.
    pub fn format(&self) -> InstructionFormat {
        use InstructionFormat::*;
        match self {
            ExtraArg => IAx,
            LoadK | LoadKx | Closure => IABx,
            Jmp | ForLoop | ForPrep | TForLoop => IAsBx,
            _ => IABC,
        }
    }

    /// Operand kind of B.
    pub fn b_mode(&self) -> ArgMode {
        use ArgMode::*;
        match self {
            Move | GetTable | Self_ | Unm | BNot | Not | Len | Concat | Jmp | TestSet | ForLoop
            | ForPrep | TForLoop => R,
            LoadK | SetTabUp | SetTable | Add | Sub | Mul | Mod | Pow | Div | IDiv | BAnd | BOr
            | BXor | Shl | Shr | Eq | Lt | Le => K,
            LoadKx | Test | TForCall => N,
            _ => U,
        }
    }

    /// Operand kind of C.
    pub fn c_mode(&self) -> ArgMode {
        use ArgMode::*;
        match self {
            GetTabUp | GetTable | SetTabUp | SetTable | Self_ | Add | Sub | Mul | Mod | Pow
            | Div | IDiv | BAnd | BOr | BXor | Shl | Shr | Eq | Lt | Le => K,
            Concat => R,
            LoadBool | NewTable | Test | TestSet | Call | TailCall | TForCall | SetList
            | ExtraArg => U,
            _ => N,
        }
    }

    /// Get the name of this opcode.
    pub fn name(&self) -> &'static str {
        match self {
            Move => "MOVE",
            LoadK => "LOADK",
            LoadKx => "LOADKX",
            LoadBool => "LOADBOOL",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            GetTabUp => "GETTABUP",
            GetTable => "GETTABLE",
            SetTabUp => "SETTABUP",
            SetUpval => "SETUPVAL",
            SetTable => "SETTABLE",
            NewTable => "NEWTABLE",
            Self_ => "SELF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Mod => "MOD",
            Pow => "POW",
            Div => "DIV",
            IDiv => "IDIV",
            BAnd => "BAND",
            BOr => "BOR",
            BXor => "BXOR",
            Shl => "SHL",
            Shr => "SHR",
            Unm => "UNM",
            BNot => "BNOT",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            ForLoop => "FORLOOP",
            ForPrep => "FORPREP",
            TForCall => "TFORCALL",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Closure => "CLOSURE",
            VarArg => "VARARG",
            ExtraArg => "EXTRAARG",
        }
    }

    /// Returns true if this opcode is a test (the next instruction is a jump).
    pub fn is_test(&self) -> bool {
        matches!(self, Eq | Lt | Le | Test | TestSet)
    }
}

/// Instruction format types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstructionFormat {
    IABC,
    IABx,
    IAsBx,
    IAx,
}

/// How an instruction uses its B or C field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgMode {
    /// Not used.
    N,
    /// Used as a plain number.
    U,
    /// A register or a jump offset.
    R,
    /// A register or a constant (RK).
    K,
}

/// A 32-bit bytecode instruction.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

impl Instruction {
    // ---- Constructors ----

    /// Create an iABC instruction.
    pub fn abc(op: OpCode, a: u32, b: u32, c: u32) -> Self {
        debug_assert!(a <= MAX_A && b <= MAX_B && c <= MAX_C);
        Instruction(
            ((op as u32) << POS_OP) | (a << POS_A) | (b << POS_B) | (c << POS_C),
        )
    }

    /// Create an iABx instruction.
    pub fn abx(op: OpCode, a: u32, bx: u32) -> Self {
        debug_assert!(bx <= MAX_BX, "Bx out of range: {bx}");
        Instruction(((op as u32) << POS_OP) | (a << POS_A) | (bx << POS_BX))
    }

    /// Create an iAsBx instruction (signed Bx).
    pub fn asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        debug_assert!(
            (-MAX_SBX..=MAX_SBX + 1).contains(&sbx),
            "sBx out of range: {sbx}"
        );
        Self::abx(op, a, (sbx + MAX_SBX) as u32)
    }

    /// Create an iAx instruction.
    pub fn ax(op: OpCode, ax: u32) -> Self {
        debug_assert!(ax <= MAX_AX, "Ax out of range: {ax}");
        Instruction(((op as u32) << POS_OP) | (ax << POS_AX))
    }

    // ---- Decoders ----

    /// Raw opcode bits.
    #[inline]
    pub fn op_bits(&self) -> u8 {
        ((self.0 >> POS_OP) & mask(SIZE_OP)) as u8
    }

    /// Get the opcode, or `None` for an out-of-range value.
    #[inline]
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u8(self.op_bits())
    }

    #[inline]
    pub fn a(&self) -> u32 {
        (self.0 >> POS_A) & mask(SIZE_A)
    }

    #[inline]
    pub fn b(&self) -> u32 {
        (self.0 >> POS_B) & mask(SIZE_B)
    }

    #[inline]
    pub fn c(&self) -> u32 {
        (self.0 >> POS_C) & mask(SIZE_C)
    }

    #[inline]
    pub fn bx(&self) -> u32 {
        (self.0 >> POS_BX) & mask(SIZE_BX)
    }

    #[inline]
    pub fn sbx(&self) -> i32 {
        self.bx() as i32 - MAX_SBX
    }

    #[inline]
    pub fn ax_field(&self) -> u32 {
        (self.0 >> POS_AX) & mask(SIZE_AX)
    }

    // ---- Mutators (for backpatching) ----

    pub fn set_op(&mut self, op: OpCode) {
        self.0 = (self.0 & !(mask(SIZE_OP) << POS_OP)) | ((op as u32) << POS_OP);
    }

    pub fn set_a(&mut self, a: u32) {
        self.0 = (self.0 & !(mask(SIZE_A) << POS_A)) | ((a & mask(SIZE_A)) << POS_A);
    }

    pub fn set_b(&mut self, b: u32) {
        self.0 = (self.0 & !(mask(SIZE_B) << POS_B)) | ((b & mask(SIZE_B)) << POS_B);
    }

    pub fn set_c(&mut self, c: u32) {
        self.0 = (self.0 & !(mask(SIZE_C) << POS_C)) | ((c & mask(SIZE_C)) << POS_C);
    }

    pub fn set_bx(&mut self, bx: u32) {
        self.0 = (self.0 & !(mask(SIZE_BX) << POS_BX)) | ((bx & mask(SIZE_BX)) << POS_BX);
    }

    pub fn set_sbx(&mut self, sbx: i32) {
        self.set_bx((sbx + MAX_SBX) as u32);
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(op) = self.opcode() else {
            return write!(f, "<bad opcode {}>", self.op_bits());
        };
        write!(f, "{}", op.name())?;
        match op.format() {
            InstructionFormat::IABC => write!(f, " A={} B={} C={}", self.a(), self.b(), self.c()),
            InstructionFormat::IABx => write!(f, " A={} Bx={}", self.a(), self.bx()),
            InstructionFormat::IAsBx => write!(f, " A={} sBx={}", self.a(), self.sbx()),
            InstructionFormat::IAx => write!(f, " Ax={}", self.ax_field()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Encode a table size hint as a "floating point byte" (`eeeeexxx`).
pub fn int2fb(mut x: u32) -> u32 {
    let mut e = 0;
    if x < 8 {
        return x;
    }
    while x >= 8 << 4 {
        x = (x + 0xf) >> 4;
        e += 4;
    }
    while x >= 8 << 1 {
        x = (x + 1) >> 1;
        e += 1;
    }
    ((e + 1) << 3) | (x - 8)
}

/// Decode a "floating point byte".
pub fn fb2int(x: u32) -> u32 {
    if x < 8 {
        x
    } else {
        ((x & 7) + 8) << ((x >> 3) - 1)
    }
}
