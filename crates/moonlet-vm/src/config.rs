//! Interpreter limits.

/// Resource limits for one [`crate::Vm`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmConfig {
    /// Frames on one thread's call stack.
    pub max_call_depth: usize,
    /// Nested reentrant calls (natives calling back, metamethods, resumes).
    pub max_native_depth: usize,
    /// Bytes of native stack the nested reentrant calls may use. Keeps
    /// small host threads from overflowing before `max_native_depth`.
    pub max_native_stack: usize,
    /// Value slots on one thread's stack.
    pub max_stack_slots: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 10_000,
            max_native_depth: 200,
            max_native_stack: 1 << 20,
            max_stack_slots: 1_000_000,
        }
    }
}

impl VmConfig {
    pub fn max_call_depth(mut self, n: usize) -> Self {
        self.max_call_depth = n;
        self
    }

    pub fn max_native_depth(mut self, n: usize) -> Self {
        self.max_native_depth = n;
        self
    }

    pub fn max_native_stack(mut self, bytes: usize) -> Self {
        self.max_native_stack = bytes;
        self
    }

    pub fn max_stack_slots(mut self, n: usize) -> Self {
        self.max_stack_slots = n;
        self
    }
}
