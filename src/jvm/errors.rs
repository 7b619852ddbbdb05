use super::{ConstantIndex, ConstantPoolOverflow};
use crate::util::Offset;

#[derive(Debug)]
pub enum Error {
    /// Code could not be decoded, or does not respect the structural rules of a code attribute
    MalformedBytecode {
        offset: Offset,
        kind: MalformedKind,
    },

    /// Constant index does not point to a usable entry in the pool
    MissingConstant(ConstantIndex),

    /// Constant index points to an entry of the wrong kind
    UnexpectedConstant {
        index: ConstantIndex,
        expected: &'static str,
    },

    BadDescriptor(String),
    ConstantPoolOverflow(ConstantPoolOverflow),

    /// Result would not fit in the class file format
    LimitExceeded(Limit),

    IoError(std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedKind {
    UnknownOpcode(u8),
    Truncated,
    InvalidWideOpcode(u8),
    InvalidArrayType(u8),
    InvalidSwitchBounds { low: i32, high: i32 },

    /// Jump target outside of the code array
    BranchOutOfBounds(i64),

    /// Offset that should be an instruction start falls in the middle of an instruction
    NotAnInstructionBoundary,

    /// Control flow reaches the end of the code array
    FallsOffEnd,

    StackUnderflow,

    /// Local variable slot at or past `max_locals`
    LocalOutOfRange(u16),

    InconsistentStackHeight { expected: u16, found: u16 },

    /// Table entry refers to offsets outside of the code range
    InvalidTableRange,

    /// An assembler label was referenced, but never placed
    UnplacedLabel,

    EmptyCode,
}

/// Class file format limits that a transformation might push a method past
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Limit {
    CodeLength,
    MaxLocals,
    MaxStack,
    BranchOffset,
    LineNumber,

    /// More than 65535 constant pool slots
    ConstantPool,
}

impl Error {
    /// Is this a limit being exceeded (which callers treat as a missed optimization)?
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Error::LimitExceeded(_))
    }

    pub(crate) fn malformed(offset: usize, kind: MalformedKind) -> Error {
        Error::MalformedBytecode {
            offset: Offset(offset),
            kind,
        }
    }
}

impl From<ConstantPoolOverflow> for Error {
    fn from(overflow: ConstantPoolOverflow) -> Error {
        Error::ConstantPoolOverflow(overflow)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}
