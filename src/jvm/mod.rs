//! In-memory model of JVM classes, along with the instruction codec
//!
//! Classes live in a [`ClassPool`], which is the entry point for all cross-class resolution.
//! A method's body is a [`CodeAttribute`]: a raw code array plus the tables that point into it.
//! Code is read with [`decode_code`] (or [`Instruction::decode_at`]) and written back with the
//! label-based [`assemble`], which computes every offset before encoding anything.

mod access_flags;
mod assembler;
mod binary_format;
mod bytecode;
mod class;
mod code;
mod constants;
mod descriptors;
mod errors;
pub mod opcodes;

pub use access_flags::*;
pub use assembler::*;
pub use binary_format::*;
pub use bytecode::*;
pub use class::*;
pub use code::*;
pub use constants::*;
pub use descriptors::*;
pub use errors::*;
