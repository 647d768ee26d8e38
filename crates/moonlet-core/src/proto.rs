/// Function prototype: holds compiled bytecode, constants, and debug info.
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::opcode::Instruction;
use crate::string::LuaString;

/// A constant value in the constant pool.
///
/// Numbers compare and hash by bit pattern so the pool can deduplicate them
/// without merging `0.0` with `-0.0` or losing NaN.
#[derive(Clone, Debug)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Number(f64),
    String(LuaString),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Nil, Constant::Nil) => true,
            (Constant::Boolean(a), Constant::Boolean(b)) => a == b,
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constant::Nil => {}
            Constant::Boolean(b) => b.hash(state),
            Constant::Number(n) => n.to_bits().hash(state),
            Constant::String(s) => s.hash(state),
        }
    }
}

/// Description of an upvalue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpvalDesc {
    /// Name of the upvalue (for debug info).
    pub name: Option<LuaString>,
    /// True if this upvalue is in the enclosing function's stack (not another upvalue).
    pub in_stack: bool,
    /// Index: register index if in_stack, upvalue index in parent otherwise.
    pub index: u8,
    /// Reserved; always 0 for chunks we produce.
    pub kind: u8,
}

/// A local variable debug entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVar {
    pub name: LuaString,
    /// First PC where the variable is active.
    pub start_pc: u32,
    /// First PC where the variable is dead.
    pub end_pc: u32,
}

/// A compiled function prototype.
#[derive(Clone, Debug, Default)]
pub struct Proto {
    /// Bytecode instructions.
    pub code: Vec<Instruction>,
    /// Constant pool.
    pub constants: Vec<Constant>,
    /// Nested function prototypes.
    pub protos: Vec<Rc<Proto>>,
    /// Upvalue descriptors.
    pub upvalues: Vec<UpvalDesc>,
    /// Number of fixed parameters.
    pub num_params: u8,
    /// Whether this function accepts varargs.
    pub is_vararg: bool,
    /// Maximum stack size needed.
    pub max_stack_size: u8,
    /// Source name (for error messages).
    pub source: Option<LuaString>,
    pub line_defined: u32,
    pub last_line_defined: u32,

    // --- Debug info ---
    /// Source line of each instruction.
    pub line_info: Vec<u32>,
    /// Local variable debug info.
    pub local_vars: Vec<LocalVar>,
}

impl Proto {
    /// Line of the instruction at `pc`, or 0 when debug info was stripped.
    pub fn get_line(&self, pc: usize) -> u32 {
        self.line_info.get(pc).copied().unwrap_or(0)
    }

    /// Name of the `n`-th local (1-based) active at `pc`.
    pub fn local_name(&self, n: usize, pc: usize) -> Option<&LuaString> {
        self.local_vars
            .iter()
            .filter(|v| (v.start_pc as usize) <= pc && pc < v.end_pc as usize)
            .nth(n.checked_sub(1)?)
            .map(|v| &v.name)
    }

    /// Short source name used in messages.
    pub fn chunk_id(&self) -> String {
        match &self.source {
            Some(s) => chunk_id(s.as_bytes()),
            None => "?".to_string(),
        }
    }

    /// Drop all debug information, recursively.
    pub fn strip(&self) -> Proto {
        Proto {
            code: self.code.clone(),
            constants: self.constants.clone(),
            protos: self.protos.iter().map(|p| Rc::new(p.strip())).collect(),
            upvalues: self
                .upvalues
                .iter()
                .map(|u| UpvalDesc {
                    name: None,
                    ..u.clone()
                })
                .collect(),
            num_params: self.num_params,
            is_vararg: self.is_vararg,
            max_stack_size: self.max_stack_size,
            source: None,
            line_defined: self.line_defined,
            last_line_defined: self.last_line_defined,
            line_info: Vec::new(),
            local_vars: Vec::new(),
        }
    }
}

const ID_SIZE: usize = 60;

/// Format a chunk name: `=name` is used verbatim, `@file` names a file and
/// anything else is shown as a quoted source excerpt.
pub fn chunk_id(source: &[u8]) -> String {
    let s = String::from_utf8_lossy(source);
    if let Some(rest) = s.strip_prefix('=') {
        rest.chars().take(ID_SIZE - 1).collect()
    } else if let Some(rest) = s.strip_prefix('@') {
        let n = rest.chars().count();
        if n < ID_SIZE {
            rest.to_string()
        } else {
            let tail: String = rest.chars().skip(n - (ID_SIZE - 4)).collect();
            format!("...{tail}")
        }
    } else {
        let first = s.lines().next().unwrap_or("");
        let limit = ID_SIZE - 15;
        if first.len() < s.len() || first.chars().count() > limit {
            let head: String = first.chars().take(limit).collect();
            format!("[string \"{head}...\"]")
        } else {
            format!("[string \"{first}\"]")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::OpCode;
    use std::collections::HashSet;

    #[test]
    fn test_empty_proto() {
        let p = Proto::default();
        assert!(p.code.is_empty());
        assert!(p.protos.is_empty());
        assert_eq!(p.get_line(0), 0);
    }

    #[test]
    fn test_constant_equality_by_bits() {
        assert_eq!(Constant::Number(1.5), Constant::Number(1.5));
        assert_ne!(Constant::Number(0.0), Constant::Number(-0.0));
        assert_eq!(Constant::Number(f64::NAN), Constant::Number(f64::NAN));
        assert_ne!(Constant::Nil, Constant::Boolean(false));
        let ks = [
            Constant::Number(1.0),
            Constant::Number(1.0),
            Constant::String("a".into()),
            Constant::String("a".into()),
            Constant::Boolean(true),
        ];
        assert_eq!(ks.iter().cloned().collect::<HashSet<_>>().len(), 3);
    }

    #[test]
    fn test_line_lookup() {
        let p = Proto {
            code: vec![Instruction::abc(OpCode::Return, 0, 1, 0)],
            line_info: vec![7],
            ..Default::default()
        };
        assert_eq!(p.get_line(0), 7);
        assert_eq!(p.get_line(1), 0);
    }

    #[test]
    fn test_local_name() {
        let p = Proto {
            local_vars: vec![
                LocalVar { name: "a".into(), start_pc: 0, end_pc: 4 },
                LocalVar { name: "b".into(), start_pc: 2, end_pc: 4 },
            ],
            ..Default::default()
        };
        assert_eq!(p.local_name(1, 0).map(|s| s.to_string()), Some("a".into()));
        assert_eq!(p.local_name(2, 3).map(|s| s.to_string()), Some("b".into()));
        assert!(p.local_name(2, 1).is_none());
        assert!(p.local_name(0, 1).is_none());
    }

    #[test]
    fn test_strip_removes_debug_info() {
        let child = Proto {
            source: Some("@x.lua".into()),
            line_info: vec![1],
            ..Default::default()
        };
        let p = Proto {
            source: Some("@x.lua".into()),
            protos: vec![Rc::new(child)],
            upvalues: vec![UpvalDesc { name: Some("_ENV".into()), in_stack: true, index: 0, kind: 0 }],
            line_info: vec![1, 2],
            ..Default::default()
        };
        let s = p.strip();
        assert!(s.source.is_none());
        assert!(s.line_info.is_empty());
        assert!(s.upvalues[0].name.is_none());
        assert!(s.protos[0].line_info.is_empty());
    }

    #[test]
    fn test_chunk_id() {
        assert_eq!(chunk_id(b"=stdin"), "stdin");
        assert_eq!(chunk_id(b"@test.lua"), "test.lua");
        assert_eq!(chunk_id(b"return 1"), "[string \"return 1\"]");
        assert_eq!(chunk_id(b"x = 1\ny = 2"), "[string \"x = 1...\"]");
    }
}
