//! The tagged runtime value and the opaque pointer handle it carries.

use crate::error::{TrapKind, VmError};

/// A 32-bit machine word in either of its two senses. The opcode executing,
/// never the value itself, decides which sense is in play; reading a `Value`
/// as the wrong sense is a bytecode-level type error the interpreter detects
/// defensively (see `VmFault::TypeMismatch`) rather than reinterpreting bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Ptr(Ptr),
}

impl Value {
    pub fn as_int(self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(i),
            Value::Ptr(_) => None,
        }
    }

    pub fn as_ptr(self) -> Option<Ptr> {
        match self {
            Value::Ptr(p) => Some(p),
            Value::Int(_) => None,
        }
    }
}

/// Heap object identity, scoped to one `Heap`.
pub type HeapId = u32;

/// An opaque pointer: either null, an offset into the immutable string pool,
/// or a heap object id plus a byte offset into that object (an interior
/// pointer). The offset lets `AADDF`/`AADDS` hand back a pointer further into
/// the same object without exposing raw host addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ptr {
    Null,
    Str { offset: u32 },
    Heap { object: HeapId, offset: u32 },
}

/// `val_equal`: identity for pointers (same object/offset, or both null),
/// bit equality for ints. Comparing an `Int` to a `Ptr` is the one case a
/// well-typed program never produces; we define it as unequal rather than
/// reinterpreting bits, matching "not detected here" in the design notes.
pub fn val_equal(a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Ptr(x), Value::Ptr(y)) => x == y,
        _ => false,
    }
}

/// Pointer arithmetic shared by `AADDF` (struct field offset) and the
/// string-pool iteration idiom (repeated `AADDF` + `CMLOAD` over a C string).
/// Bounds are not checked here; they are checked at the point of dereference.
pub fn offset_ptr(ptr: Ptr, delta: u32) -> Result<Ptr, VmError> {
    match ptr {
        Ptr::Null => Err(TrapKind::memory("null pointer dereference in AADDF").into()),
        Ptr::Str { offset } => Ok(Ptr::Str {
            offset: offset + delta,
        }),
        Ptr::Heap { object, offset } => Ok(Ptr::Heap {
            object,
            offset: offset + delta,
        }),
    }
}
