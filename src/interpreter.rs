//! The dispatch loop: one `match` over the decoded opcode byte, each arm a
//! handful of `?`-propagated operations on the current frame, the call
//! stack, and the heap.

use log::{debug, trace};

use crate::bytecode::{read_i16, read_i8, read_u16, read_u8, Opcode};
use crate::error::{TrapKind, VmError, VmFault};
use crate::frame::Frame;
use crate::heap::{expect_int, expect_ptr, load_char, Heap};
use crate::image::Image;
use crate::native::{NativeContext, NativeRegistry};
use crate::value::{offset_ptr, val_equal, Value};

pub struct Vm<'a> {
    image: &'a Image,
    natives: &'a NativeRegistry,
    heap: Heap,
    call_stack: Vec<Frame>,
    current: Frame,
}

impl<'a> Vm<'a> {
    /// A fresh machine ready to execute `image.entry_point()` (function 0).
    pub fn new(image: &'a Image, natives: &'a NativeRegistry) -> Result<Self, VmError> {
        let entry = image.function(image.entry_point())?;
        Ok(Vm {
            image,
            natives,
            heap: Heap::new(),
            call_stack: Vec::new(),
            current: Frame::new(image.entry_point(), entry.num_vars),
        })
    }

    /// Runs to completion: either the entry function's top-level `RETURN`
    /// value, or the first trap/fault/host error encountered.
    pub fn run(mut self) -> Result<i32, VmError> {
        loop {
            if let Some(exit) = self.step()? {
                return Ok(exit);
            }
        }
    }

    fn push(&mut self, v: Value) {
        self.current.operand_stack.push(v);
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.current
            .operand_stack
            .pop()
            .ok_or_else(|| VmFault::StackUnderflow.into())
    }

    fn pop_int(&mut self) -> Result<i32, VmError> {
        let v = self.pop()?;
        expect_int(v, "operand stack")
    }

    fn pop_ptr(&mut self) -> Result<crate::value::Ptr, VmError> {
        let v = self.pop()?;
        expect_ptr(v, "operand stack")
    }

    /// Executes exactly one opcode. Returns `Some(exit_value)` once the
    /// entry function returns with an empty call stack, `None` to keep
    /// running.
    fn step(&mut self) -> Result<Option<i32>, VmError> {
        let func = self.image.function(self.current.func_index)?;
        let code = &func.code;
        let pc = self.current.pc;
        let raw = read_u8(code, pc)?;
        let opcode = Opcode::try_from(raw).map_err(|_| VmFault::InvalidOpcode(raw))?;
        trace!("pc={pc:04x} op={opcode:?}");

        match opcode {
            Opcode::Pop => {
                self.pop()?;
                self.current.pc += 1;
            }
            Opcode::Dup => {
                let v = self.pop()?;
                self.push(v);
                self.push(v);
                self.current.pc += 1;
            }
            Opcode::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b);
                self.push(a);
                self.current.pc += 1;
            }

            Opcode::IAdd => self.int_binop(|a, b| a.wrapping_add(b))?,
            Opcode::ISub => self.int_binop(|a, b| a.wrapping_sub(b))?,
            Opcode::IMul => self.int_binop(|a, b| a.wrapping_mul(b))?,
            Opcode::IDiv => self.div_or_rem(true)?,
            Opcode::IRem => self.div_or_rem(false)?,
            Opcode::IAnd => self.int_binop(|a, b| a & b)?,
            Opcode::IOr => self.int_binop(|a, b| a | b)?,
            Opcode::IXor => self.int_binop(|a, b| a ^ b)?,
            Opcode::IShl => self.shift(true)?,
            Opcode::IShr => self.shift(false)?,

            Opcode::BiPush => {
                let v = read_i8(code, pc + 1)?;
                self.push(Value::Int(v as i32));
                self.current.pc += 2;
            }
            Opcode::ILdc => {
                let idx = read_u16(code, pc + 1)?;
                let v = self.image.int(idx)?;
                self.push(Value::Int(v));
                self.current.pc += 3;
            }
            Opcode::ALdc => {
                let idx = read_u16(code, pc + 1)?;
                self.image.string_offset_in_range(idx)?;
                self.push(Value::Ptr(crate::value::Ptr::Str { offset: idx as u32 }));
                self.current.pc += 3;
            }
            Opcode::AConstNull => {
                self.push(Value::Ptr(crate::value::Ptr::Null));
                self.current.pc += 1;
            }

            Opcode::VLoad => {
                let i = read_u8(code, pc + 1)?;
                let v = *self
                    .current
                    .locals
                    .get(i as usize)
                    .ok_or(VmFault::LocalIndexOutOfRange(i))?;
                self.push(v);
                self.current.pc += 2;
            }
            Opcode::VStore => {
                let i = read_u8(code, pc + 1)?;
                let v = self.pop()?;
                let slot = self
                    .current
                    .locals
                    .get_mut(i as usize)
                    .ok_or(VmFault::LocalIndexOutOfRange(i))?;
                *slot = v;
                self.current.pc += 2;
            }

            Opcode::AThrow => {
                let p = self.pop_ptr()?;
                let msg = crate::native::read_c_string(&self.heap, &self.image.string_pool, p)?;
                return Err(TrapKind::user(msg).into());
            }
            Opcode::Assert => {
                let msg_ptr = self.pop_ptr()?;
                let predicate = self.pop_int()?;
                if predicate == 0 {
                    let msg = crate::native::read_c_string(&self.heap, &self.image.string_pool, msg_ptr)?;
                    return Err(TrapKind::assertion(msg).into());
                }
                self.current.pc += 1;
            }

            Opcode::Nop => {
                self.current.pc += 1;
            }
            Opcode::Goto => self.branch_always(code, pc)?,
            Opcode::IfCmpEq => self.branch_if(code, pc, val_equal)?,
            Opcode::IfCmpNe => self.branch_if(code, pc, |a, b| !val_equal(a, b))?,
            Opcode::IfICmpLt => self.branch_if_int(code, pc, |a, b| a < b)?,
            Opcode::IfICmpLe => self.branch_if_int(code, pc, |a, b| a <= b)?,
            Opcode::IfICmpGt => self.branch_if_int(code, pc, |a, b| a > b)?,
            Opcode::IfICmpGe => self.branch_if_int(code, pc, |a, b| a >= b)?,

            Opcode::InvokeStatic => self.invoke_static(code, pc)?,
            Opcode::InvokeNative => self.invoke_native(code, pc)?,
            Opcode::Return => {
                let result = self.pop()?;
                if !self.current.operand_stack.is_empty() {
                    return Err(VmFault::DirtyReturn.into());
                }
                debug!("return from function {}", self.current.func_index);
                if let Some(caller) = self.call_stack.pop() {
                    self.current = caller;
                    self.push(result);
                } else {
                    let exit = expect_int(result, "top-level RETURN")?;
                    return Ok(Some(exit));
                }
            }

            Opcode::New => {
                let size = read_u8(code, pc + 1)?;
                let p = self.heap.alloc_block(size);
                debug!("NEW size={size} -> {p:?}");
                self.push(Value::Ptr(p));
                self.current.pc += 2;
            }
            Opcode::IMLoad => {
                let p = self.pop_ptr()?;
                let v = self.heap.load_i32(p)?;
                self.push(Value::Int(v));
                self.current.pc += 1;
            }
            Opcode::IMStore => {
                let v = self.pop_int()?;
                let p = self.pop_ptr()?;
                self.heap.store_i32(p, v)?;
                self.current.pc += 1;
            }
            Opcode::AMLoad => {
                let p = self.pop_ptr()?;
                let v = self.heap.load_ptr(p)?;
                self.push(Value::Ptr(v));
                self.current.pc += 1;
            }
            Opcode::AMStore => {
                let v = self.pop_ptr()?;
                let p = self.pop_ptr()?;
                self.heap.store_ptr(p, v)?;
                self.current.pc += 1;
            }
            Opcode::CMLoad => {
                let p = self.pop_ptr()?;
                let v = load_char(&self.heap, &self.image.string_pool, p)?;
                self.push(Value::Int(v));
                self.current.pc += 1;
            }
            Opcode::CMStore => {
                let v = self.pop_int()?;
                let p = self.pop_ptr()?;
                self.heap.store_char(p, v)?;
                self.current.pc += 1;
            }
            Opcode::AAddF => {
                let delta = read_u8(code, pc + 1)?;
                let p = self.pop_ptr()?;
                let np = offset_ptr(p, delta as u32)?;
                self.push(Value::Ptr(np));
                self.current.pc += 2;
            }

            Opcode::NewArray => {
                let elt_size = read_u8(code, pc + 1)?;
                let n = self.pop_int()?;
                let p = self.heap.alloc_array(n, elt_size)?;
                debug!("NEWARRAY count={n} elt_size={elt_size} -> {p:?}");
                self.push(Value::Ptr(p));
                self.current.pc += 2;
            }
            Opcode::ArrayLength => {
                let p = self.pop_ptr()?;
                let len = self.heap.array_length(p)?;
                self.push(Value::Int(len));
                self.current.pc += 1;
            }
            Opcode::AAddS => {
                let i = self.pop_int()?;
                let p = self.pop_ptr()?;
                let np = self.heap.array_element_ptr(p, i)?;
                self.push(Value::Ptr(np));
                self.current.pc += 1;
            }

            Opcode::CheckTag
            | Opcode::HasTag
            | Opcode::AddTag
            | Opcode::AddrOfStatic
            | Opcode::AddrOfNative
            | Opcode::InvokeDynamic => {
                return Err(VmFault::InvalidOpcode(raw).into());
            }
        }
        Ok(None)
    }

    fn int_binop(&mut self, f: impl Fn(i32, i32) -> i32) -> Result<(), VmError> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Value::Int(f(a, b)));
        self.current.pc += 1;
        Ok(())
    }

    fn div_or_rem(&mut self, is_div: bool) -> Result<(), VmError> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        if b == 0 {
            return Err(TrapKind::arithmetic("division by zero").into());
        }
        if a == i32::MIN && b == -1 {
            return Err(TrapKind::arithmetic("integer overflow: i32::MIN / -1").into());
        }
        let r = if is_div { a.wrapping_div(b) } else { a.wrapping_rem(b) };
        self.push(Value::Int(r));
        self.current.pc += 1;
        Ok(())
    }

    fn shift(&mut self, is_left: bool) -> Result<(), VmError> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        if !(0..32).contains(&b) {
            return Err(TrapKind::arithmetic(format!("shift amount {b} out of range [0, 32)")).into());
        }
        let r = if is_left {
            a.wrapping_shl(b as u32)
        } else {
            a.wrapping_shr(b as u32)
        };
        self.push(Value::Int(r));
        self.current.pc += 1;
        Ok(())
    }

    /// `pc = a + 1 + d`, where `a` is the address of the branch opcode and
    /// `d` is the signed 16-bit displacement stored at `a+1`.
    fn branch_always(&mut self, code: &[u8], a: usize) -> Result<(), VmError> {
        let d = read_i16(code, a + 1)?;
        self.current.pc = (a as isize + 1 + d as isize) as usize;
        Ok(())
    }

    fn branch_if(
        &mut self,
        code: &[u8],
        a: usize,
        predicate: impl Fn(Value, Value) -> bool,
    ) -> Result<(), VmError> {
        let b = self.pop()?;
        let av = self.pop()?;
        let d = read_i16(code, a + 1)?;
        if predicate(av, b) {
            self.current.pc = (a as isize + 1 + d as isize) as usize;
        } else {
            self.current.pc = a + 3;
        }
        Ok(())
    }

    fn branch_if_int(
        &mut self,
        code: &[u8],
        a: usize,
        predicate: impl Fn(i32, i32) -> bool,
    ) -> Result<(), VmError> {
        let b = self.pop_int()?;
        let av = self.pop_int()?;
        let d = read_i16(code, a + 1)?;
        if predicate(av, b) {
            self.current.pc = (a as isize + 1 + d as isize) as usize;
        } else {
            self.current.pc = a + 3;
        }
        Ok(())
    }

    /// `INVOKESTATIC`: freeze the caller, pop `num_args` values off its
    /// operand stack in reverse into the callee's locals[0..num_args-1].
    fn invoke_static(&mut self, code: &[u8], pc: usize) -> Result<(), VmError> {
        let idx = read_u16(code, pc + 1)?;
        let target = self.image.function(idx)?;
        let num_args = target.num_args;
        let num_vars = target.num_vars;

        let mut args = vec![Value::Int(0); num_args as usize];
        for slot in args.iter_mut().rev() {
            *slot = self.pop()?;
        }

        if num_vars < num_args {
            return Err(VmFault::TypeMismatch(format!(
                "function {idx} declares num_vars {num_vars} < num_args {num_args}"
            ))
            .into());
        }
        self.current.pc = pc + 3;
        let mut callee = Frame::new(idx, num_vars);
        callee.locals[..num_args as usize].copy_from_slice(&args);
        let caller = std::mem::replace(&mut self.current, callee);
        debug!("INVOKESTATIC {idx} (num_args={num_args})");
        self.call_stack.push(caller);
        Ok(())
    }

    /// `INVOKENATIVE`: a synchronous host call, no frame freeze/restore.
    fn invoke_native(&mut self, code: &[u8], pc: usize) -> Result<(), VmError> {
        let idx = read_u16(code, pc + 1)?;
        let info = self.image.native(idx)?;
        let num_args = info.num_args;

        let mut args = vec![Value::Int(0); num_args as usize];
        for slot in args.iter_mut().rev() {
            *slot = self.pop()?;
        }

        let ctx = NativeContext {
            heap: &self.heap,
            string_pool: &self.image.string_pool,
        };
        debug!("INVOKENATIVE {idx} (num_args={num_args})");
        let result = self.natives.call(info.function_table_index, &ctx, &args)?;
        self.push(result);
        self.current.pc = pc + 3;
        Ok(())
    }
}

/// Convenience entry point used by the CLI and integration tests: build a
/// `Vm` for `image` against `natives` and run it to completion.
pub fn run(image: &Image, natives: &NativeRegistry) -> Result<i32, VmError> {
    Vm::new(image, natives)?.run()
}
