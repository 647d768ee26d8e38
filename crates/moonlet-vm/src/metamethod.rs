//! Metamethod names and lookup.

use moonlet_core::number::ArithOp;
use moonlet_core::string::LuaString;
use moonlet_core::table::TableRef;
use moonlet_core::value::Value;

/// Events that can be overridden through a metatable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagMethod {
    Index,
    NewIndex,
    Len,
    Eq,
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
    Lt,
    Le,
    Concat,
    Call,
    ToString,
    Name,
}

impl TagMethod {
    pub const ALL: [TagMethod; 24] = [
        TagMethod::Index,
        TagMethod::NewIndex,
        TagMethod::Len,
        TagMethod::Eq,
        TagMethod::Add,
        TagMethod::Sub,
        TagMethod::Mul,
        TagMethod::Mod,
        TagMethod::Pow,
        TagMethod::Div,
        TagMethod::IDiv,
        TagMethod::BAnd,
        TagMethod::BOr,
        TagMethod::BXor,
        TagMethod::Shl,
        TagMethod::Shr,
        TagMethod::Unm,
        TagMethod::BNot,
        TagMethod::Lt,
        TagMethod::Le,
        TagMethod::Concat,
        TagMethod::Call,
        TagMethod::ToString,
        TagMethod::Name,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TagMethod::Index => "__index",
            TagMethod::NewIndex => "__newindex",
            TagMethod::Len => "__len",
            TagMethod::Eq => "__eq",
            TagMethod::Add => "__add",
            TagMethod::Sub => "__sub",
            TagMethod::Mul => "__mul",
            TagMethod::Mod => "__mod",
            TagMethod::Pow => "__pow",
            TagMethod::Div => "__div",
            TagMethod::IDiv => "__idiv",
            TagMethod::BAnd => "__band",
            TagMethod::BOr => "__bor",
            TagMethod::BXor => "__bxor",
            TagMethod::Shl => "__shl",
            TagMethod::Shr => "__shr",
            TagMethod::Unm => "__unm",
            TagMethod::BNot => "__bnot",
            TagMethod::Lt => "__lt",
            TagMethod::Le => "__le",
            TagMethod::Concat => "__concat",
            TagMethod::Call => "__call",
            TagMethod::ToString => "__tostring",
            TagMethod::Name => "__name",
        }
    }

    /// The event overriding an arithmetic or bitwise operator.
    pub fn for_arith(op: ArithOp) -> TagMethod {
        match op {
            ArithOp::Add => TagMethod::Add,
            ArithOp::Sub => TagMethod::Sub,
            ArithOp::Mul => TagMethod::Mul,
            ArithOp::Mod => TagMethod::Mod,
            ArithOp::Pow => TagMethod::Pow,
            ArithOp::Div => TagMethod::Div,
            ArithOp::IDiv => TagMethod::IDiv,
            ArithOp::BAnd => TagMethod::BAnd,
            ArithOp::BOr => TagMethod::BOr,
            ArithOp::BXor => TagMethod::BXor,
            ArithOp::Shl => TagMethod::Shl,
            ArithOp::Shr => TagMethod::Shr,
            ArithOp::Unm => TagMethod::Unm,
            ArithOp::BNot => TagMethod::BNot,
        }
    }
}

/// Pre-built metamethod name strings, so lookups don't allocate.
pub struct MetamethodNames {
    names: Vec<LuaString>,
}

impl MetamethodNames {
    pub fn new() -> Self {
        MetamethodNames {
            names: TagMethod::ALL.iter().map(|tm| LuaString::from(tm.name())).collect(),
        }
    }

    pub fn get(&self, tm: TagMethod) -> &LuaString {
        &self.names[tm as usize]
    }
}

impl Default for MetamethodNames {
    fn default() -> Self {
        Self::new()
    }
}

/// Metatable of `v`. Strings share `string_mt`.
pub fn metatable(v: &Value, string_mt: Option<&TableRef>) -> Option<TableRef> {
    match v {
        Value::Table(t) => t.borrow().metatable.clone(),
        Value::Userdata(u) => u.metatable.borrow().clone(),
        Value::String(_) => string_mt.cloned(),
        _ => None,
    }
}

/// Non-nil field `tm` of `v`'s metatable.
pub fn get_metamethod(
    names: &MetamethodNames,
    string_mt: Option<&TableRef>,
    v: &Value,
    tm: TagMethod,
) -> Option<Value> {
    let mt = metatable(v, string_mt)?;
    let mm = mt.borrow().get_str(names.get(tm));
    (!mm.is_nil()).then_some(mm)
}
