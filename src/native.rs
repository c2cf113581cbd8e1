//! The native function registry: the host-side table of functions bytecode
//! can call out to by name. Natives are plain `fn` pointers, assumed total
//! and synchronous, so nothing here can block, fail asynchronously, or
//! re-enter the interpreter.

use crate::error::{TrapKind, VmError, VmFault};
use crate::heap::Heap;
use crate::value::{Ptr, Value};

/// Read access a native needs to interpret pointer arguments: the heap (for
/// pointers into struct/array blocks) and the string pool (for `ALDC`
/// string-literal pointers).
pub struct NativeContext<'a> {
    pub heap: &'a Heap,
    pub string_pool: &'a [u8],
}

impl<'a> NativeContext<'a> {
    pub fn read_c_string(&self, ptr: Ptr) -> Result<String, VmError> {
        read_c_string(self.heap, self.string_pool, ptr)
    }
}

pub type NativeFn = fn(&NativeContext, &[Value]) -> Result<Value, VmError>;

pub struct NativeRegistry {
    functions: Vec<(String, NativeFn)>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        NativeRegistry { functions: Vec::new() }
    }

    pub fn register(&mut self, name: &str, f: NativeFn) -> u32 {
        let index = self.functions.len() as u32;
        self.functions.push((name.to_string(), f));
        index
    }

    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.functions.iter().position(|(n, _)| n == name).map(|i| i as u32)
    }

    pub fn call(&self, index: u32, ctx: &NativeContext, args: &[Value]) -> Result<Value, VmError> {
        let (_, f) = self
            .functions
            .get(index as usize)
            .ok_or(VmFault::BadNativeIndex(index as u16))?;
        f(ctx, args)
    }

    /// The three natives provided out of the box.
    pub fn standard() -> Self {
        let mut registry = NativeRegistry::new();
        registry.register("print_int", native_print_int);
        registry.register("print_string", native_print_string);
        registry.register("print_char", native_print_char);
        registry
    }
}

impl Default for NativeRegistry {
    fn default() -> Self {
        NativeRegistry::standard()
    }
}

/// Scans `string_pool`/the heap block at `ptr` for a NUL terminator, the way
/// C0's string library reads a `char*` under the hood.
pub fn read_c_string(heap: &Heap, string_pool: &[u8], ptr: Ptr) -> Result<String, VmError> {
    let bytes: &[u8] = match ptr {
        Ptr::Null => return Err(TrapKind::memory("null pointer passed to a string native").into()),
        Ptr::Str { offset } => {
            let start = offset as usize;
            string_pool
                .get(start..)
                .ok_or_else(|| VmFault::BadStringPoolOffset(offset as u16))?
        }
        Ptr::Heap { object, offset } => heap.bytes_from(object, offset)?,
    };
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

fn native_print_int(_ctx: &NativeContext, args: &[Value]) -> Result<Value, VmError> {
    let value = args
        .first()
        .and_then(|v| v.as_int())
        .ok_or_else(|| VmFault::TypeMismatch("print_int expects one int argument".into()))?;
    println!("{value}");
    Ok(Value::Int(0))
}

fn native_print_char(_ctx: &NativeContext, args: &[Value]) -> Result<Value, VmError> {
    let value = args
        .first()
        .and_then(|v| v.as_int())
        .ok_or_else(|| VmFault::TypeMismatch("print_char expects one int argument".into()))?;
    let c = (value & 0x7f) as u8 as char;
    print!("{c}");
    Ok(Value::Int(0))
}

fn native_print_string(ctx: &NativeContext, args: &[Value]) -> Result<Value, VmError> {
    let ptr = args
        .first()
        .and_then(|v| v.as_ptr())
        .ok_or_else(|| VmFault::TypeMismatch("print_string expects one pointer argument".into()))?;
    let s = ctx.read_c_string(ptr)?;
    println!("{s}");
    Ok(Value::Int(0))
}
