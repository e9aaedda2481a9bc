//! An interpreter for the Uxn virtual processor: a stack-based 8-bit CPU
//! with a 16-bit address space, 256 opcodes, and a narrow device-I/O bridge.
//!
//! The entry point is [`Uxn::run`], which executes from a given program
//! counter until a `BRK` opcode is reached and returns the PC just past it.
//! Host peripherals are modeled by the [`Device`] trait, which `DEI`/`DEO`
//! opcodes call into; device code receives `&mut Uxn` and may reenter `run`
//! to invoke a vector before yielding control back.
//!
//! Every opcode is total: there is no panicking path through [`Uxn::run`].
//! Division by zero yields zero, and stack/memory arithmetic wraps rather
//! than traps, matching the processor's documented behavior. The only
//! fallible entry point in this crate is [`Uxn::new`], which rejects a ROM
//! image too large to place in the address space.

mod device;
mod error;
mod stack;
mod vm;

pub use device::{Device, NullDevice};
pub use error::UxnError;
pub use stack::Stack;
pub use vm::{Uxn, LOAD_ADDR};
