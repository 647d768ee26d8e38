//! Blocks, local variables, labels and pending gotos.
use moonlet_core::proto::LocalVar;
use moonlet_core::string::LuaString;

use super::code::FuncState;

/// Most locals one function may have active.
pub const MAX_VARS: usize = 200;

/// Block scope tracking.
#[derive(Clone, Debug)]
pub struct BlockScope {
    /// Index of the first label of this block in the label list.
    pub first_label: usize,
    /// Index of the first pending goto of this block.
    pub first_goto: usize,
    /// Active locals outside the block.
    pub nactvar: u32,
    /// Some local of this block is captured by a closure.
    pub upval: bool,
    /// `break` may target this block.
    pub is_loop: bool,
}

/// A visible label.
#[derive(Clone, Debug)]
pub struct LabelDesc {
    pub name: LuaString,
    pub pc: usize,
    pub line: u32,
    /// Active locals at the label.
    pub nactvar: u32,
}

/// A goto (or break) whose label has not been seen yet.
#[derive(Clone, Debug)]
pub struct GotoDesc {
    pub name: LuaString,
    /// Jump instructions to patch.
    pub jumps: Vec<usize>,
    pub line: u32,
    pub nactvar: u32,
}

impl FuncState {
    pub fn enter_block(&mut self, is_loop: bool, first_label: usize, first_goto: usize) {
        debug_assert_eq!(self.free_reg, self.nactvar);
        self.blocks.push(BlockScope {
            first_label,
            first_goto,
            nactvar: self.nactvar,
            upval: false,
            is_loop,
        });
    }

    /// Declare a local; it becomes visible with [`FuncState::adjust_locals`].
    /// Returns false when the limit is exceeded.
    pub fn new_local(&mut self, name: LuaString) -> bool {
        if self.actvar.len() + 1 > MAX_VARS {
            return false;
        }
        self.proto.local_vars.push(LocalVar {
            name,
            start_pc: 0,
            end_pc: 0,
        });
        self.actvar.push(self.proto.local_vars.len() - 1);
        true
    }

    /// Activate the last `n` declared locals.
    pub fn adjust_locals(&mut self, n: u32) {
        let pc = self.pc() as u32;
        for _ in 0..n {
            let idx = self.actvar[self.nactvar as usize];
            self.proto.local_vars[idx].start_pc = pc;
            self.nactvar += 1;
        }
    }

    /// Deactivate locals down to `level`.
    pub fn remove_locals(&mut self, level: u32) {
        let pc = self.pc() as u32;
        let removed = self.nactvar.saturating_sub(level) as usize;
        while self.nactvar > level {
            self.nactvar -= 1;
            let idx = self.actvar[self.nactvar as usize];
            self.proto.local_vars[idx].end_pc = pc;
        }
        let keep = self.actvar.len() - removed;
        self.actvar.truncate(keep);
    }

    /// Debug entry of active local `i`.
    pub fn local_var(&mut self, i: u32) -> &mut LocalVar {
        let idx = self.actvar[i as usize];
        &mut self.proto.local_vars[idx]
    }

    /// Register of the innermost active local called `name`.
    pub fn search_local(&self, name: &LuaString) -> Option<u32> {
        (0..self.nactvar)
            .rev()
            .find(|&i| &self.proto.local_vars[self.actvar[i as usize]].name == name)
    }

    /// Flag the block owning local `level` as having a captured variable.
    pub fn mark_upval(&mut self, level: u32) {
        if let Some(bl) = self.blocks.iter_mut().rev().find(|bl| bl.nactvar <= level) {
            bl.upval = true;
        }
    }

    pub fn search_upvalue(&self, name: &LuaString) -> Option<u32> {
        self.proto
            .upvalues
            .iter()
            .position(|u| u.name.as_ref() == Some(name))
            .map(|i| i as u32)
    }
}
