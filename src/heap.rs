//! The managed heap: zero-initialized struct blocks and array descriptors.
//!
//! Structs and the byte buffer backing an array are both modeled as `Block`s:
//! a flat, zero-initialized byte vector plus a side table recording which
//! byte offsets currently hold a pointer rather than raw int/char bytes.
//! Using a side table instead of a fixed pointer width sidesteps picking an
//! arbitrary serialized pointer size (see DESIGN.md); `AMLOAD` on a slot that
//! was never `AMSTORE`d reads back `Ptr::Null`, consistent with zero-init.

use std::collections::HashMap;

use crate::error::{TrapKind, VmError, VmFault};
use crate::value::{HeapId, Ptr, Value};

pub struct Block {
    pub bytes: Vec<u8>,
    ptr_slots: HashMap<u32, Ptr>,
}

impl Block {
    fn new(size: usize) -> Self {
        Block {
            bytes: vec![0u8; size],
            ptr_slots: HashMap::new(),
        }
    }
}

struct ArrayDescriptor {
    count: i32,
    elt_size: u8,
    elems: HeapId,
}

enum HeapObject {
    Block(Block),
    Array(ArrayDescriptor),
}

#[derive(Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            objects: Vec::new(),
        }
    }

    fn block(&self, id: HeapId) -> Result<&Block, VmError> {
        match self.objects.get(id as usize) {
            Some(HeapObject::Block(b)) => Ok(b),
            Some(HeapObject::Array(_)) => Err(VmFault::TypeMismatch(
                "pointer to an array descriptor used as a struct/array-element pointer".into(),
            )
            .into()),
            None => Err(VmFault::BadHeapId(id).into()),
        }
    }

    fn block_mut(&mut self, id: HeapId) -> Result<&mut Block, VmError> {
        match self.objects.get_mut(id as usize) {
            Some(HeapObject::Block(b)) => Ok(b),
            Some(HeapObject::Array(_)) => Err(VmFault::TypeMismatch(
                "pointer to an array descriptor used as a struct/array-element pointer".into(),
            )
            .into()),
            None => Err(VmFault::BadHeapId(id).into()),
        }
    }

    fn array(&self, id: HeapId) -> Result<&ArrayDescriptor, VmError> {
        match self.objects.get(id as usize) {
            Some(HeapObject::Array(a)) => Ok(a),
            Some(HeapObject::Block(_)) => {
                Err(VmFault::TypeMismatch("pointer used as an array is not an array".into()).into())
            }
            None => Err(VmFault::BadHeapId(id).into()),
        }
    }

    /// `NEW <size>`: allocate a zero-initialized struct block.
    pub fn alloc_block(&mut self, size: u8) -> Ptr {
        let id = self.objects.len() as HeapId;
        self.objects.push(HeapObject::Block(Block::new(size as usize)));
        Ptr::Heap { object: id, offset: 0 }
    }

    /// `NEWARRAY <elt_size>`: allocate the element buffer and its descriptor
    /// as two separate heap objects, per the design note on interior
    /// pointers; only the descriptor address is exposed to user code.
    pub fn alloc_array(&mut self, count: i32, elt_size: u8) -> Result<Ptr, VmError> {
        if count < 0 {
            return Err(TrapKind::memory(format!("negative array length {count}")).into());
        }
        let elems_id = self.objects.len() as HeapId;
        self.objects
            .push(HeapObject::Block(Block::new(count as usize * elt_size as usize)));
        let desc_id = self.objects.len() as HeapId;
        self.objects.push(HeapObject::Array(ArrayDescriptor {
            count,
            elt_size,
            elems: elems_id,
        }));
        Ok(Ptr::Heap {
            object: desc_id,
            offset: 0,
        })
    }

    /// `ARRAYLENGTH`.
    pub fn array_length(&self, ptr: Ptr) -> Result<i32, VmError> {
        let id = require_heap(ptr, "ARRAYLENGTH")?;
        Ok(self.array(id)?.count)
    }

    /// `AADDS`: bounds-checked pointer to element `index` of the array `ptr`
    /// points to.
    pub fn array_element_ptr(&self, ptr: Ptr, index: i32) -> Result<Ptr, VmError> {
        let id = require_heap(ptr, "AADDS")?;
        let descriptor = self.array(id)?;
        if index < 0 || index >= descriptor.count {
            return Err(TrapKind::memory(format!(
                "array index {index} out of bounds for length {}",
                descriptor.count
            ))
            .into());
        }
        Ok(Ptr::Heap {
            object: descriptor.elems,
            offset: index as u32 * descriptor.elt_size as u32,
        })
    }

    /// `IMLOAD`: four bytes at `ptr`, big-endian, as a signed int.
    pub fn load_i32(&self, ptr: Ptr) -> Result<i32, VmError> {
        let (id, offset) = require_heap_offset(ptr, "IMLOAD")?;
        let block = self.block(id)?;
        let start = offset as usize;
        let bytes = block
            .bytes
            .get(start..start + 4)
            .ok_or_else(|| TrapKind::memory("out-of-bounds int load"))?;
        Ok(i32::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// `IMSTORE`.
    pub fn store_i32(&mut self, ptr: Ptr, value: i32) -> Result<(), VmError> {
        let (id, offset) = require_heap_offset(ptr, "IMSTORE")?;
        let block = self.block_mut(id)?;
        let start = offset as usize;
        let slot = block
            .bytes
            .get_mut(start..start + 4)
            .ok_or_else(|| TrapKind::memory("out-of-bounds int store"))?;
        slot.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// `AMLOAD`: read back a pointer previously written with `AMSTORE` at
    /// this byte offset, or null if the slot was never written.
    pub fn load_ptr(&self, ptr: Ptr) -> Result<Ptr, VmError> {
        let (id, offset) = require_heap_offset(ptr, "AMLOAD")?;
        let block = self.block(id)?;
        if offset as usize >= block.bytes.len() {
            return Err(TrapKind::memory("out-of-bounds pointer load").into());
        }
        Ok(block.ptr_slots.get(&offset).copied().unwrap_or(Ptr::Null))
    }

    /// `AMSTORE`.
    pub fn store_ptr(&mut self, ptr: Ptr, value: Ptr) -> Result<(), VmError> {
        let (id, offset) = require_heap_offset(ptr, "AMSTORE")?;
        let block = self.block_mut(id)?;
        if offset as usize >= block.bytes.len() {
            return Err(TrapKind::memory("out-of-bounds pointer store").into());
        }
        block.ptr_slots.insert(offset, value);
        Ok(())
    }

    /// `CMSTORE`: low 7 bits of `value`, masking off the high bit as the
    /// design notes specify for character storage.
    pub fn store_char(&mut self, ptr: Ptr, value: i32) -> Result<(), VmError> {
        let (id, offset) = require_heap_offset(ptr, "CMSTORE")?;
        let block = self.block_mut(id)?;
        let slot = block
            .bytes
            .get_mut(offset as usize)
            .ok_or_else(|| TrapKind::memory("out-of-bounds char store"))?;
        *slot = (value & 0x7f) as u8;
        Ok(())
    }

    /// Raw bytes from `offset` to the end of the block, used by natives that
    /// read a NUL-terminated C string out of the heap.
    pub fn bytes_from(&self, id: HeapId, offset: u32) -> Result<&[u8], VmError> {
        let block = self.block(id)?;
        let start = offset as usize;
        if start > block.bytes.len() {
            return Err(TrapKind::memory("out-of-bounds string read").into());
        }
        Ok(&block.bytes[start..])
    }
}

/// `CMLOAD`: sign-extended low byte at `ptr`, which may point into the heap
/// or into the immutable string pool (the idiom for iterating a C string).
pub fn load_char(heap: &Heap, string_pool: &[u8], ptr: Ptr) -> Result<i32, VmError> {
    match ptr {
        Ptr::Null => Err(TrapKind::memory("null pointer dereference in CMLOAD").into()),
        Ptr::Str { offset } => {
            let byte = *string_pool
                .get(offset as usize)
                .ok_or_else(|| TrapKind::memory("out-of-bounds char load from string pool"))?;
            Ok(byte as i8 as i32)
        }
        Ptr::Heap { object, offset } => {
            let block = heap.block(object)?;
            let byte = *block
                .bytes
                .get(offset as usize)
                .ok_or_else(|| TrapKind::memory("out-of-bounds char load"))?;
            Ok(byte as i8 as i32)
        }
    }
}

fn require_heap(ptr: Ptr, op: &str) -> Result<HeapId, VmError> {
    match ptr {
        Ptr::Null => Err(TrapKind::memory(format!("null pointer dereference in {op}")).into()),
        Ptr::Str { .. } => Err(VmFault::TypeMismatch(format!(
            "{op} used on a string pool pointer, not a heap pointer"
        ))
        .into()),
        Ptr::Heap { object, .. } => Ok(object),
    }
}

fn require_heap_offset(ptr: Ptr, op: &str) -> Result<(HeapId, u32), VmError> {
    match ptr {
        Ptr::Null => Err(TrapKind::memory(format!("null pointer dereference in {op}")).into()),
        Ptr::Str { .. } => Err(VmFault::TypeMismatch(format!(
            "{op} used on a string pool pointer, not a heap pointer"
        ))
        .into()),
        Ptr::Heap { object, offset } => Ok((object, offset)),
    }
}

/// Convenience used by the interpreter to turn a popped `Value` into an
/// int, or a typed error if the compiler-guaranteed invariant was violated.
pub fn expect_int(v: Value, context: &str) -> Result<i32, VmError> {
    v.as_int()
        .ok_or_else(|| VmFault::TypeMismatch(format!("{context}: expected int, found pointer")).into())
}

/// As above, for a `Ptr`.
pub fn expect_ptr(v: Value, context: &str) -> Result<Ptr, VmError> {
    v.as_ptr()
        .ok_or_else(|| VmFault::TypeMismatch(format!("{context}: expected pointer, found int")).into())
}
