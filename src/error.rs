//! Typed errors for all three bands the interpreter can surface: traps
//! (program-level aborts a well-typed C0 program can trigger on purpose or
//! by bad luck), faults (an internal contract violation that should never
//! occur against a well-formed image), and host errors (the embedding
//! environment itself failed, e.g. a truncated image file).

use thiserror::Error;

/// A program-level abort. One of the four categories spec'd for C0:
/// arithmetic, memory, assertion, user (`ATHROW`).
#[derive(Debug, Clone, Error)]
pub enum TrapKind {
    #[error("arithmetic trap: {0}")]
    Arithmetic(String),
    #[error("memory trap: {0}")]
    Memory(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("user error: {0}")]
    User(String),
}

impl TrapKind {
    pub fn arithmetic(msg: impl Into<String>) -> Self {
        TrapKind::Arithmetic(msg.into())
    }

    pub fn memory(msg: impl Into<String>) -> Self {
        TrapKind::Memory(msg.into())
    }

    pub fn assertion(msg: impl Into<String>) -> Self {
        TrapKind::Assertion(msg.into())
    }

    pub fn user(msg: impl Into<String>) -> Self {
        TrapKind::User(msg.into())
    }
}

/// An internal contract violation: the image looked well-formed enough to
/// load, but the bytecode being executed is not well-typed. Never expected
/// against a real compiler's output; reported as `Err`, not a panic, so a
/// host can log it and exit cleanly instead of unwinding.
#[derive(Debug, Clone, Error)]
pub enum VmFault {
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("local variable index {0} out of range")]
    LocalIndexOutOfRange(u8),
    #[error("program counter ran past the end of function code")]
    CodeOutOfBounds,
    #[error("unknown or unimplemented opcode 0x{0:02x}")]
    InvalidOpcode(u8),
    #[error("function index {0} out of range")]
    BadFunctionIndex(u16),
    #[error("native function index {0} out of range")]
    BadNativeIndex(u16),
    #[error("integer pool index {0} out of range")]
    BadIntPoolIndex(u16),
    #[error("string pool offset {0} out of range")]
    BadStringPoolOffset(u16),
    #[error("heap object id {0} out of range")]
    BadHeapId(u32),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("operand stack not empty at RETURN")]
    DirtyReturn,
}

/// The embedding host failed, independent of any particular bytecode image.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("malformed image: {0}")]
    MalformedImage(String),
    #[error("heap allocation failure")]
    AllocationFailure,
}

/// The union of all three bands; this is what `Vm::run` and the image loader
/// return, and what the CLI matches on to choose a process exit code.
#[derive(Debug, Clone, Error)]
pub enum VmError {
    #[error(transparent)]
    Trap(#[from] TrapKind),
    #[error(transparent)]
    Fault(#[from] VmFault),
    #[error(transparent)]
    Host(#[from] HostError),
}

impl VmError {
    /// Exit-code band: normal returns truncate mod 256, like `exit()`; traps
    /// and faults get reserved codes above the `u8` range a normal return
    /// can produce (see DESIGN.md).
    pub fn exit_code(&self) -> i32 {
        match self {
            VmError::Trap(TrapKind::Arithmetic(_)) => 101,
            VmError::Trap(TrapKind::Memory(_)) => 102,
            VmError::Trap(TrapKind::Assertion(_)) => 103,
            VmError::Trap(TrapKind::User(_)) => 104,
            VmError::Fault(_) => 105,
            VmError::Host(_) => 106,
        }
    }
}
