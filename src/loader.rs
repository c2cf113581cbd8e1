//! The on-disk image decoder: a minimal, non-validating reader that turns a
//! byte buffer into an `Image`. It trusts the byte stream's structure; a
//! truncated or malformed file is a `HostError`, never a silent miscompute.
//! Hand-rolled big-endian decoding rather than a `serde` derive, matching the
//! rest of this crate's byte-level encode/decode style.

use crate::error::{HostError, VmError};
use crate::image::{FunctionInfo, Image, NativeInfo};
use crate::native::NativeRegistry;

const MAGIC: &[u8; 4] = b"C0VM";

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], VmError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + n)
            .ok_or_else(|| HostError::MalformedImage("unexpected end of image".into()))?;
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, VmError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, VmError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, VmError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, VmError> {
        Ok(self.u32()? as i32)
    }
}

/// Decodes an image from `bytes`, resolving each native pool entry's name to
/// a `function_table_index` by looking it up in `natives`.
pub fn load_image(bytes: &[u8], natives: &NativeRegistry) -> Result<Image, VmError> {
    let mut r = Reader::new(bytes);

    let magic = r.take(4)?;
    if magic != MAGIC {
        return Err(HostError::MalformedImage("bad magic, expected \"C0VM\"".into()).into());
    }
    let _version = r.u16()?;

    let int_count = r.u32()?;
    let mut int_pool = Vec::with_capacity(int_count as usize);
    for _ in 0..int_count {
        int_pool.push(r.i32()?);
    }

    let string_len = r.u32()?;
    let string_pool = r.take(string_len as usize)?.to_vec();

    let func_count = r.u32()?;
    let mut functions = Vec::with_capacity(func_count as usize);
    for _ in 0..func_count {
        let num_args = r.u8()?;
        let num_vars = r.u8()?;
        let code_len = r.u32()?;
        let code = r.take(code_len as usize)?.to_vec();
        functions.push(FunctionInfo {
            num_args,
            num_vars,
            code,
        });
    }

    let native_count = r.u32()?;
    let mut native_infos = Vec::with_capacity(native_count as usize);
    for _ in 0..native_count {
        let num_args = r.u8()?;
        let name_len = r.u16()?;
        let name_bytes = r.take(name_len as usize)?;
        let name = String::from_utf8(name_bytes.to_vec())
            .map_err(|e| HostError::MalformedImage(format!("native name is not valid UTF-8: {e}")))?;
        let function_table_index = natives
            .index_of(&name)
            .ok_or_else(|| HostError::MalformedImage(format!("unknown native function '{name}'")))?;
        native_infos.push(NativeInfo {
            num_args,
            function_table_index,
        });
    }

    if functions.is_empty() {
        return Err(HostError::MalformedImage("image declares no functions".into()).into());
    }

    Ok(Image {
        functions,
        natives: native_infos,
        int_pool,
        string_pool,
    })
}
