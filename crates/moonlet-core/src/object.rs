//! Heap objects: closures, upvalues, native functions and userdata.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::api::NativeFn;
use crate::proto::Proto;
use crate::table::TableRef;
use crate::thread::ValueStack;
use crate::value::Value;

/// Shared upvalue handle. Closures over the same variable share one handle.
pub type UpvalueRef = Rc<RefCell<Upvalue>>;

/// A captured variable.
pub enum Upvalue {
    /// Still lives in a stack slot of its owning thread.
    Open { stack: Rc<ValueStack>, index: usize },
    /// The slot went out of scope; the upvalue owns the value.
    Closed(Value),
}

impl Upvalue {
    pub fn new_ref(stack: Rc<ValueStack>, index: usize) -> UpvalueRef {
        Rc::new(RefCell::new(Upvalue::Open { stack, index }))
    }

    pub fn closed(value: Value) -> UpvalueRef {
        Rc::new(RefCell::new(Upvalue::Closed(value)))
    }

    pub fn get(&self) -> Value {
        match self {
            Upvalue::Open { stack, index } => stack.get(*index),
            Upvalue::Closed(v) => v.clone(),
        }
    }

    pub fn set(&mut self, value: Value) {
        match self {
            Upvalue::Open { stack, index } => stack.set(*index, value),
            Upvalue::Closed(v) => *v = value,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Upvalue::Open { .. })
    }

    /// Copy the slot's value into the upvalue. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Upvalue::Open { stack, index } = self {
            let v = stack.get(*index);
            *self = Upvalue::Closed(v);
        }
    }
}

impl fmt::Debug for Upvalue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upvalue::Open { index, .. } => write!(f, "Open({index})"),
            Upvalue::Closed(v) => write!(f, "Closed({v:?})"),
        }
    }
}

/// A function prototype instantiated with its upvalues.
pub struct Closure {
    pub proto: Rc<Proto>,
    pub upvalues: Vec<UpvalueRef>,
}

impl Closure {
    pub fn new(proto: Rc<Proto>, upvalues: Vec<UpvalueRef>) -> Self {
        Closure { proto, upvalues }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure({}:{})", self.proto.chunk_id(), self.proto.line_defined)
    }
}

/// A host function callable from scripts.
pub struct NativeFunction {
    /// Name used in argument error messages.
    pub name: &'static str,
    pub func: NativeFn,
    /// Values bound to this function (e.g. the coroutine of `coroutine.wrap`).
    pub upvalues: Vec<Value>,
}

impl NativeFunction {
    pub fn new(name: &'static str, func: NativeFn) -> Self {
        NativeFunction {
            name,
            func,
            upvalues: Vec::new(),
        }
    }

    pub fn with_upvalues(name: &'static str, func: NativeFn, upvalues: Vec<Value>) -> Self {
        NativeFunction {
            name,
            func,
            upvalues,
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// An opaque host object.
pub struct Userdata {
    pub data: RefCell<Box<dyn Any>>,
    pub metatable: RefCell<Option<TableRef>>,
}

impl Userdata {
    pub fn new<T: Any>(data: T) -> Self {
        Userdata {
            data: RefCell::new(Box::new(data)),
            metatable: RefCell::new(None),
        }
    }
}
