//! Threads: value stacks, call frames and coroutine state.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::object::{Closure, NativeFunction, Upvalue, UpvalueRef};
use crate::value::Value;

/// A thread's value stack.
///
/// Borrows are kept internal and short so an open upvalue can read or write a
/// slot while the owning thread's frame state is borrowed elsewhere.
#[derive(Default)]
pub struct ValueStack {
    slots: RefCell<Vec<Value>>,
}

impl ValueStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of allocated slots.
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    /// Read a slot; slots beyond the end read as nil.
    #[inline]
    pub fn get(&self, i: usize) -> Value {
        self.slots.borrow().get(i).cloned().unwrap_or_default()
    }

    /// Write a slot, growing the stack if needed.
    #[inline]
    pub fn set(&self, i: usize, v: Value) {
        let mut slots = self.slots.borrow_mut();
        if i >= slots.len() {
            slots.resize(i + 1, Value::Nil);
        }
        slots[i] = v;
    }

    /// Make sure at least `n` slots exist.
    pub fn ensure(&self, n: usize) {
        let mut slots = self.slots.borrow_mut();
        if slots.len() < n {
            slots.resize(n, Value::Nil);
        }
    }

    /// Set slots `from..to` to nil.
    pub fn fill_nil(&self, from: usize, to: usize) {
        let mut slots = self.slots.borrow_mut();
        let to = to.min(slots.len());
        if from < to {
            slots[from..to].fill(Value::Nil);
        }
    }

    /// Copy of slots `from..to`.
    pub fn slice(&self, from: usize, to: usize) -> Vec<Value> {
        (from..to).map(|i| self.get(i)).collect()
    }

    /// Move `n` values from `src` to `dst` (ranges may overlap).
    pub fn copy_within(&self, src: usize, dst: usize, n: usize) {
        if n == 0 || src == dst {
            return;
        }
        self.ensure(src.max(dst) + n);
        let mut slots = self.slots.borrow_mut();
        if dst < src {
            for i in 0..n {
                let v = slots[src + i].clone();
                slots[dst + i] = v;
            }
        } else {
            for i in (0..n).rev() {
                let v = slots[src + i].clone();
                slots[dst + i] = v;
            }
        }
    }

    /// Drop slots at and above `n`.
    pub fn truncate(&self, n: usize) {
        self.slots.borrow_mut().truncate(n);
    }
}

/// What a frame does with the results of the call it is waiting on.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum CallStatus {
    #[default]
    Normal,
    /// A `pcall` frame: the callee's results get a leading `true`, and an
    /// error raised above this frame becomes `false, err`.
    Protected,
    /// An `xpcall` frame: like `Protected`, with the error object passed
    /// through `handler` first.
    ProtectedWith { handler: Value },
}

/// One activation record.
#[derive(Clone, Debug)]
pub struct CallFrame {
    /// Slot holding the called function; results are written here.
    pub func: usize,
    /// First register.
    pub base: usize,
    /// End of the frame's registers (natives: end of arguments).
    pub top: usize,
    /// Next instruction to execute.
    pub pc: usize,
    /// Results the caller wants, -1 for all.
    pub nresults: i32,
    /// Extra arguments stored below `base`.
    pub nvarargs: usize,
    pub closure: Option<Rc<Closure>>,
    pub native: Option<Rc<NativeFunction>>,
    pub status: CallStatus,
}

impl CallFrame {
    pub fn is_lua(&self) -> bool {
        self.closure.is_some()
    }

    /// Whether an error raised above this frame stops here.
    pub fn is_protected(&self) -> bool {
        self.status != CallStatus::Normal
    }
}

/// Execution state of one thread.
pub struct Thread {
    pub stack: Rc<ValueStack>,
    pub frames: Vec<CallFrame>,
    /// First free slot after the last multi-value producer.
    pub top: usize,
    /// Open upvalues keyed by stack slot.
    pub open_upvalues: BTreeMap<usize, UpvalueRef>,
    /// Nesting of reentrant native calls; yields need this to be zero.
    pub non_yieldable: u32,
    pub is_main: bool,
    /// Coroutine body that has not started yet.
    pub body: Option<Value>,
}

impl Thread {
    pub fn new_main() -> Self {
        Thread {
            stack: Rc::new(ValueStack::new()),
            frames: Vec::new(),
            top: 0,
            open_upvalues: BTreeMap::new(),
            non_yieldable: 0,
            is_main: true,
            body: None,
        }
    }

    pub fn new_coroutine(body: Value) -> Self {
        Thread {
            is_main: false,
            body: Some(body),
            ..Thread::new_main()
        }
    }

    /// Upvalue for a stack slot, shared with any closure that already captured it.
    pub fn find_or_create_upvalue(&mut self, index: usize) -> UpvalueRef {
        let stack = &self.stack;
        self.open_upvalues
            .entry(index)
            .or_insert_with(|| Upvalue::new_ref(stack.clone(), index))
            .clone()
    }

    /// Close every open upvalue at or above `level`. Returns how many were closed.
    pub fn close_upvalues(&mut self, level: usize) -> usize {
        if self.open_upvalues.is_empty() {
            return 0;
        }
        let closing = self.open_upvalues.split_off(&level);
        let n = closing.len();
        for uv in closing.into_values() {
            uv.borrow_mut().close();
        }
        n
    }

    /// Position prefix (`chunk:line:`) of the `level`-th frame from the top, or an
    /// empty string if that frame is not a script function.
    pub fn location(&self, level: usize) -> String {
        let Some(frame) = self.frames.len().checked_sub(level + 1).map(|i| &self.frames[i]) else {
            return String::new();
        };
        match &frame.closure {
            Some(c) => {
                let line = c.proto.get_line(frame.pc.saturating_sub(1));
                format!("{}:{}:", c.proto.chunk_id(), line)
            }
            None => String::new(),
        }
    }

    /// Unwind to `depth` frames, closing upvalues of the removed frames.
    pub fn unwind_to(&mut self, depth: usize) {
        if let Some(frame) = self.frames.get(depth) {
            let level = frame.func;
            self.close_upvalues(level);
        }
        self.frames.truncate(depth);
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Thread {{ frames: {}, top: {}, open_upvalues: {} }}",
            self.frames.len(),
            self.top,
            self.open_upvalues.len()
        )
    }
}

/// Coroutine status as reported by `coroutine.status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    Suspended,
    Running,
    Normal,
    Dead,
}

impl ThreadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadStatus::Suspended => "suspended",
            ThreadStatus::Running => "running",
            ThreadStatus::Normal => "normal",
            ThreadStatus::Dead => "dead",
        }
    }
}

/// A thread handle: status readable at any time, state behind a `RefCell`.
pub struct Coroutine {
    pub status: Cell<ThreadStatus>,
    pub thread: RefCell<Thread>,
}

/// Shared thread handle.
pub type ThreadRef = Rc<Coroutine>;

impl Coroutine {
    pub fn new(thread: Thread, status: ThreadStatus) -> ThreadRef {
        Rc::new(Coroutine {
            status: Cell::new(status),
            thread: RefCell::new(thread),
        })
    }

    pub fn status(&self) -> ThreadStatus {
        self.status.get()
    }

    pub fn set_status(&self, s: ThreadStatus) {
        self.status.set(s);
    }
}
