//! An interpreter for the C0 virtual machine: a small, statically typed,
//! safe imperative language. This crate executes an already-assembled
//! bytecode image on a VM with an operand stack, typed local variables, a
//! call stack of activation frames, a managed heap of structs and arrays,
//! and a table of host-provided native functions.
//!
//! Library code never installs a logger; the `log` call sites in
//! [`interpreter`] are observational only, consistent with the "debug
//! tracing is ambient, not required for correctness" stance of the design.

pub mod bytecode;
pub mod error;
pub mod frame;
pub mod heap;
pub mod image;
pub mod interpreter;
pub mod loader;
pub mod native;
pub mod value;

pub use error::VmError;
pub use image::Image;
pub use interpreter::{run, Vm};
pub use loader::load_image;
pub use native::NativeRegistry;
pub use value::{Ptr, Value};
