//! Activation frames: an operand stack, a locals vector, and a program
//! counter into the owning function's code. The call stack is simply a
//! `Vec<Frame>` of frozen callers; the currently-executing frame lives
//! outside it until a call freezes it in turn.

use crate::value::Value;

#[derive(Debug)]
pub struct Frame {
    pub operand_stack: Vec<Value>,
    pub locals: Vec<Value>,
    pub func_index: u16,
    pub pc: usize,
}

impl Frame {
    /// A fresh frame for `func_index`, with `num_vars` locals zero-initialized.
    pub fn new(func_index: u16, num_vars: u8) -> Self {
        Frame {
            operand_stack: Vec::new(),
            locals: vec![Value::Int(0); num_vars as usize],
            func_index,
            pc: 0,
        }
    }
}
