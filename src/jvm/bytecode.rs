//! This module contains the decoded form of JVM bytecode instructions. The representation is
//! slightly different from the raw encoding, to make rewriting code more convenient:
//!
//!   - The "wide" instruction doesn't show up at all, but instead gets merged into the
//!     instructions it is allowed to modify
//!
//!   - Loads and stores (including the `iload_0`-style short forms) are abstracted into one
//!     instruction with a slot operand. Similarly `ldc` covers both `ldc` and `ldc_w`. Encoding
//!     always picks the shortest form that fits the operand.
//!
//!   - Jump targets are labels instead of relative offsets. After decoding, the label is the
//!     absolute offset of the target in the code array.
//!

use super::opcodes::*;
use super::{ConstantIndex, Error, FieldType, Limit, MalformedKind};
use crate::jvm::binary_format::Serialize;
use crate::util::Offset;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::convert::{Infallible, TryFrom};

/// JVM bytecode instruction, with jump targets of type `L`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction<L> {
    /// Instruction without operands (arithmetic, array access, stack manipulation, returns...)
    Simple(u8),
    BiPush(i8),
    SiPush(i16),

    /// Covers short forms, the byte operand form, and `wide` forms
    Local(LocalOp, u16),

    /// Covers `iinc` and `wide iinc`
    IInc(u16, i16),

    /// Instruction whose only operand is a constant pool index (`ldc` covers `ldc` and `ldc_w`)
    Constant(u8, ConstantIndex),
    InvokeInterface(ConstantIndex, u8),
    InvokeDynamic(ConstantIndex),
    MultiANewArray(ConstantIndex, u8),
    NewArray(u8),

    /// Conditional and unconditional jumps, including `jsr`, `goto_w`, and `jsr_w`
    Branch(u8, L),
    TableSwitch {
        default: L,
        low: i32,
        targets: Vec<L>,
    },
    LookupSwitch {
        default: L,
        pairs: Vec<(i32, L)>,
    },
}

/// Instructions which read or write a local variable slot
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum LocalOp {
    ILoad,
    LLoad,
    FLoad,
    DLoad,
    ALoad,
    IStore,
    LStore,
    FStore,
    DStore,
    AStore,
    Ret,
}

impl LocalOp {
    const LOADS: [LocalOp; 5] = [
        LocalOp::ILoad,
        LocalOp::LLoad,
        LocalOp::FLoad,
        LocalOp::DLoad,
        LocalOp::ALoad,
    ];
    const STORES: [LocalOp; 5] = [
        LocalOp::IStore,
        LocalOp::LStore,
        LocalOp::FStore,
        LocalOp::DStore,
        LocalOp::AStore,
    ];

    pub fn is_store(self) -> bool {
        matches!(
            self,
            LocalOp::IStore | LocalOp::LStore | LocalOp::FStore | LocalOp::DStore | LocalOp::AStore
        )
    }

    /// Does the slot hold a `long` or `double` (and so also occupies the next slot)?
    pub fn is_wide_value(self) -> bool {
        matches!(
            self,
            LocalOp::LLoad | LocalOp::DLoad | LocalOp::LStore | LocalOp::DStore
        )
    }

    /// Instruction for storing a value of this type into a local
    pub fn store_for(typ: &FieldType) -> LocalOp {
        use super::BaseType;
        match typ {
            FieldType::Base(BaseType::Long) => LocalOp::LStore,
            FieldType::Base(BaseType::Float) => LocalOp::FStore,
            FieldType::Base(BaseType::Double) => LocalOp::DStore,
            FieldType::Base(_) => LocalOp::IStore,
            FieldType::Ref(_) => LocalOp::AStore,
        }
    }

    /// Opcode of the form taking a slot operand
    fn normal_form(self) -> u8 {
        match self {
            LocalOp::ILoad => ILOAD,
            LocalOp::LLoad => LLOAD,
            LocalOp::FLoad => FLOAD,
            LocalOp::DLoad => DLOAD,
            LocalOp::ALoad => ALOAD,
            LocalOp::IStore => ISTORE,
            LocalOp::LStore => LSTORE,
            LocalOp::FStore => FSTORE,
            LocalOp::DStore => DSTORE,
            LocalOp::AStore => ASTORE,
            LocalOp::Ret => RET,
        }
    }

    /// Opcode of the slot 0 short form, if there is one (`ret` has none)
    fn short_form_start(self) -> Option<u8> {
        match self {
            LocalOp::Ret => None,
            op if op.is_store() => Some(ISTORE_0 + 4 * (op.normal_form() - ISTORE)),
            op => Some(ILOAD_0 + 4 * (op.normal_form() - ILOAD)),
        }
    }

    fn from_normal_form(opcode: u8) -> Option<LocalOp> {
        match opcode {
            ILOAD..=ALOAD => Some(LocalOp::LOADS[(opcode - ILOAD) as usize]),
            ISTORE..=ASTORE => Some(LocalOp::STORES[(opcode - ISTORE) as usize]),
            RET => Some(LocalOp::Ret),
            _ => None,
        }
    }
}

/// Number of padding bytes after a switch opcode at the given offset
fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

impl Instruction<Offset> {
    /// Decode the instruction starting at `offset`, returning it along with the number of bytes
    /// it occupies
    ///
    /// Jump targets are checked to be inside the code array (but not that they are on an
    /// instruction boundary, since that requires a view of the whole method).
    pub fn decode_at(code: &[u8], offset: usize) -> Result<(Instruction<Offset>, usize), Error> {
        let truncated = move |_: std::io::Error| Error::malformed(offset, MalformedKind::Truncated);
        let target = move |relative: i64| -> Result<Offset, Error> {
            let absolute = offset as i64 + relative;
            if absolute < 0 || absolute >= code.len() as i64 {
                Err(Error::malformed(offset, MalformedKind::BranchOutOfBounds(absolute)))
            } else {
                Ok(Offset(absolute as usize))
            }
        };

        let mut reader: &[u8] = code
            .get(offset..)
            .ok_or_else(|| Error::malformed(offset, MalformedKind::Truncated))?;
        let available = reader.len();

        let opcode = reader.read_u8().map_err(truncated)?;
        let instruction = match opcode {
            BIPUSH => Instruction::BiPush(reader.read_i8().map_err(truncated)?),
            SIPUSH => Instruction::SiPush(reader.read_i16::<BigEndian>().map_err(truncated)?),
            LDC => {
                let index = reader.read_u8().map_err(truncated)?;
                Instruction::Constant(LDC, ConstantIndex(index as u16))
            }
            LDC_W => {
                let index = reader.read_u16::<BigEndian>().map_err(truncated)?;
                Instruction::Constant(LDC, ConstantIndex(index))
            }
            LDC2_W | GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
                let index = reader.read_u16::<BigEndian>().map_err(truncated)?;
                Instruction::Constant(opcode, ConstantIndex(index))
            }
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => {
                let slot = reader.read_u8().map_err(truncated)?;
                match LocalOp::from_normal_form(opcode) {
                    Some(op) => Instruction::Local(op, slot as u16),
                    None => {
                        return Err(Error::malformed(offset, MalformedKind::UnknownOpcode(opcode)))
                    }
                }
            }
            ILOAD_0..=ALOAD_3 => {
                let op = LocalOp::LOADS[((opcode - ILOAD_0) / 4) as usize];
                Instruction::Local(op, ((opcode - ILOAD_0) % 4) as u16)
            }
            ISTORE_0..=ASTORE_3 => {
                let op = LocalOp::STORES[((opcode - ISTORE_0) / 4) as usize];
                Instruction::Local(op, ((opcode - ISTORE_0) % 4) as u16)
            }
            IINC => {
                let slot = reader.read_u8().map_err(truncated)?;
                let delta = reader.read_i8().map_err(truncated)?;
                Instruction::IInc(slot as u16, delta as i16)
            }
            WIDE => {
                let modified = reader.read_u8().map_err(truncated)?;
                let slot = reader.read_u16::<BigEndian>().map_err(truncated)?;
                if modified == IINC {
                    let delta = reader.read_i16::<BigEndian>().map_err(truncated)?;
                    Instruction::IInc(slot, delta)
                } else {
                    match LocalOp::from_normal_form(modified) {
                        Some(op) => Instruction::Local(op, slot),
                        None => {
                            let kind = MalformedKind::InvalidWideOpcode(modified);
                            return Err(Error::malformed(offset, kind));
                        }
                    }
                }
            }
            IFEQ..=JSR | IFNULL | IFNONNULL => {
                let relative = reader.read_i16::<BigEndian>().map_err(truncated)?;
                Instruction::Branch(opcode, target(relative as i64)?)
            }
            GOTO_W | JSR_W => {
                let relative = reader.read_i32::<BigEndian>().map_err(truncated)?;
                Instruction::Branch(opcode, target(relative as i64)?)
            }
            TABLESWITCH => {
                for _ in 0..switch_padding(offset) {
                    reader.read_u8().map_err(truncated)?;
                }
                let default = target(reader.read_i32::<BigEndian>().map_err(truncated)? as i64)?;
                let low = reader.read_i32::<BigEndian>().map_err(truncated)?;
                let high = reader.read_i32::<BigEndian>().map_err(truncated)?;
                if low > high {
                    return Err(Error::malformed(
                        offset,
                        MalformedKind::InvalidSwitchBounds { low, high },
                    ));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                if reader.len() / 4 < count {
                    return Err(Error::malformed(offset, MalformedKind::Truncated));
                }
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    let relative = reader.read_i32::<BigEndian>().map_err(truncated)?;
                    targets.push(target(relative as i64)?);
                }
                Instruction::TableSwitch {
                    default,
                    low,
                    targets,
                }
            }
            LOOKUPSWITCH => {
                for _ in 0..switch_padding(offset) {
                    reader.read_u8().map_err(truncated)?;
                }
                let default = target(reader.read_i32::<BigEndian>().map_err(truncated)? as i64)?;
                let npairs = reader.read_i32::<BigEndian>().map_err(truncated)?;
                let count = usize::try_from(npairs).map_err(|_| {
                    let kind = MalformedKind::InvalidSwitchBounds { low: 0, high: npairs };
                    Error::malformed(offset, kind)
                })?;
                if reader.len() / 8 < count {
                    return Err(Error::malformed(offset, MalformedKind::Truncated));
                }
                let mut pairs = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = reader.read_i32::<BigEndian>().map_err(truncated)?;
                    let relative = reader.read_i32::<BigEndian>().map_err(truncated)?;
                    pairs.push((key, target(relative as i64)?));
                }
                Instruction::LookupSwitch { default, pairs }
            }
            INVOKEINTERFACE => {
                let index = reader.read_u16::<BigEndian>().map_err(truncated)?;
                let count = reader.read_u8().map_err(truncated)?;
                let _zero = reader.read_u8().map_err(truncated)?;
                Instruction::InvokeInterface(ConstantIndex(index), count)
            }
            INVOKEDYNAMIC => {
                let index = reader.read_u16::<BigEndian>().map_err(truncated)?;
                let _zero = reader.read_u16::<BigEndian>().map_err(truncated)?;
                Instruction::InvokeDynamic(ConstantIndex(index))
            }
            NEWARRAY => {
                let atype = reader.read_u8().map_err(truncated)?;
                if !(4..=11).contains(&atype) {
                    return Err(Error::malformed(offset, MalformedKind::InvalidArrayType(atype)));
                }
                Instruction::NewArray(atype)
            }
            MULTIANEWARRAY => {
                let index = reader.read_u16::<BigEndian>().map_err(truncated)?;
                let dimensions = reader.read_u8().map_err(truncated)?;
                Instruction::MultiANewArray(ConstantIndex(index), dimensions)
            }
            _ if simple_stack_effect(opcode).is_some() => Instruction::Simple(opcode),
            _ => return Err(Error::malformed(offset, MalformedKind::UnknownOpcode(opcode))),
        };

        Ok((instruction, available - reader.len()))
    }

    /// Encode the instruction, assuming it is placed at `offset`
    ///
    /// Jump targets get re-encoded relative to `offset`. A target that is too far away for the
    /// instruction's operand is reported as `LimitExceeded(BranchOffset)`.
    pub fn serialize_at<W: WriteBytesExt>(
        &self,
        offset: usize,
        writer: &mut W,
    ) -> Result<(), Error> {
        /* The load/store instructions follow the same pattern:
         *
         *   - short form (0-3) have special bytes
         *   - normal form (0-255) use `iload` plus a byte operand
         *   - wide form (255-65535) use `wide iload` plus two byte operands
         */
        fn serialize_local<W: WriteBytesExt>(
            op: LocalOp,
            slot: u16,
            writer: &mut W,
        ) -> Result<(), Error> {
            match (u8::try_from(slot), op.short_form_start()) {
                (Ok(n @ 0..=3), Some(short_form_start)) => {
                    (short_form_start + n).serialize(writer)?
                }
                (Ok(n), _) => {
                    op.normal_form().serialize(writer)?;
                    n.serialize(writer)?;
                }
                (Err(_), _) => {
                    WIDE.serialize(writer)?;
                    op.normal_form().serialize(writer)?;
                    slot.serialize(writer)?;
                }
            }
            Ok(())
        }

        let relative_i32 = |target: &Offset| -> Result<i32, Error> {
            i32::try_from(*target - Offset(offset))
                .map_err(|_| Error::LimitExceeded(Limit::BranchOffset))
        };

        match self {
            Instruction::Simple(opcode) => opcode.serialize(writer)?,
            Instruction::BiPush(b) => {
                BIPUSH.serialize(writer)?;
                b.serialize(writer)?;
            }
            Instruction::SiPush(s) => {
                SIPUSH.serialize(writer)?;
                s.serialize(writer)?;
            }
            Instruction::Local(op, slot) => serialize_local(*op, *slot, writer)?,
            Instruction::IInc(slot, delta) => match (u8::try_from(*slot), i8::try_from(*delta)) {
                (Ok(slot), Ok(delta)) => {
                    IINC.serialize(writer)?;
                    slot.serialize(writer)?;
                    delta.serialize(writer)?;
                }
                _ => {
                    WIDE.serialize(writer)?;
                    IINC.serialize(writer)?;
                    slot.serialize(writer)?;
                    delta.serialize(writer)?;
                }
            },
            Instruction::Constant(LDC, ConstantIndex(index)) => match u8::try_from(*index) {
                Ok(b) => {
                    LDC.serialize(writer)?;
                    b.serialize(writer)?;
                }
                Err(_) => {
                    LDC_W.serialize(writer)?;
                    index.serialize(writer)?;
                }
            },
            Instruction::Constant(opcode, ConstantIndex(index)) => {
                opcode.serialize(writer)?;
                index.serialize(writer)?;
            }
            Instruction::InvokeInterface(ConstantIndex(index), count) => {
                INVOKEINTERFACE.serialize(writer)?;
                index.serialize(writer)?;
                count.serialize(writer)?;
                0u8.serialize(writer)?;
            }
            Instruction::InvokeDynamic(ConstantIndex(index)) => {
                INVOKEDYNAMIC.serialize(writer)?;
                index.serialize(writer)?;
                0u16.serialize(writer)?;
            }
            Instruction::MultiANewArray(ConstantIndex(index), dimensions) => {
                MULTIANEWARRAY.serialize(writer)?;
                index.serialize(writer)?;
                dimensions.serialize(writer)?;
            }
            Instruction::NewArray(atype) => {
                NEWARRAY.serialize(writer)?;
                atype.serialize(writer)?;
            }
            Instruction::Branch(opcode @ (GOTO_W | JSR_W), target) => {
                opcode.serialize(writer)?;
                relative_i32(target)?.serialize(writer)?;
            }
            Instruction::Branch(opcode, target) => {
                let relative = i16::try_from(*target - Offset(offset))
                    .map_err(|_| Error::LimitExceeded(Limit::BranchOffset))?;
                opcode.serialize(writer)?;
                relative.serialize(writer)?;
            }
            Instruction::TableSwitch {
                default,
                low,
                targets,
            } => {
                TABLESWITCH.serialize(writer)?;
                for _ in 0..switch_padding(offset) {
                    0u8.serialize(writer)?;
                }
                let high = i32::try_from(*low as i64 + targets.len() as i64 - 1).map_err(|_| {
                    let kind = MalformedKind::InvalidSwitchBounds {
                        low: *low,
                        high: i32::MAX,
                    };
                    Error::malformed(offset, kind)
                })?;
                relative_i32(default)?.serialize(writer)?;
                low.serialize(writer)?;
                high.serialize(writer)?;
                for target in targets {
                    relative_i32(target)?.serialize(writer)?;
                }
            }
            Instruction::LookupSwitch { default, pairs } => {
                LOOKUPSWITCH.serialize(writer)?;
                for _ in 0..switch_padding(offset) {
                    0u8.serialize(writer)?;
                }
                relative_i32(default)?.serialize(writer)?;
                (pairs.len() as i32).serialize(writer)?;
                for (key, target) in pairs {
                    key.serialize(writer)?;
                    relative_i32(target)?.serialize(writer)?;
                }
            }
        }
        Ok(())
    }
}

impl<L> Instruction<L> {
    /// Encoded length of the instruction, when placed at `offset`
    ///
    /// Only switches depend on the offset (through their padding).
    pub fn width(&self, offset: usize) -> usize {
        match self {
            Instruction::Simple(_) => 1,
            Instruction::BiPush(_) | Instruction::NewArray(_) => 2,
            Instruction::SiPush(_) => 3,
            Instruction::Local(op, slot) => match *slot {
                0..=3 if op.short_form_start().is_some() => 1,
                0..=255 => 2,
                _ => 4,
            },
            Instruction::IInc(slot, delta) => {
                if *slot <= 255 && i8::try_from(*delta).is_ok() {
                    3
                } else {
                    6
                }
            }
            Instruction::Constant(LDC, ConstantIndex(index)) => {
                if *index <= 255 {
                    2
                } else {
                    3
                }
            }
            Instruction::Constant(_, _) => 3,
            Instruction::InvokeInterface(_, _) | Instruction::InvokeDynamic(_) => 5,
            Instruction::MultiANewArray(_, _) => 4,
            Instruction::Branch(GOTO_W | JSR_W, _) => 5,
            Instruction::Branch(_, _) => 3,
            Instruction::TableSwitch { targets, .. } => {
                1 + switch_padding(offset) + 12 + 4 * targets.len()
            }
            Instruction::LookupSwitch { pairs, .. } => {
                1 + switch_padding(offset) + 8 + 8 * pairs.len()
            }
        }
    }

    /// Change the type of jump targets, possibly failing
    pub fn try_map_labels<L2, E>(
        &self,
        mut map_label: impl FnMut(&L) -> Result<L2, E>,
    ) -> Result<Instruction<L2>, E> {
        Ok(match self {
            Instruction::Simple(opcode) => Instruction::Simple(*opcode),
            Instruction::BiPush(b) => Instruction::BiPush(*b),
            Instruction::SiPush(s) => Instruction::SiPush(*s),
            Instruction::Local(op, slot) => Instruction::Local(*op, *slot),
            Instruction::IInc(slot, delta) => Instruction::IInc(*slot, *delta),
            Instruction::Constant(opcode, index) => Instruction::Constant(*opcode, *index),
            Instruction::InvokeInterface(index, count) => {
                Instruction::InvokeInterface(*index, *count)
            }
            Instruction::InvokeDynamic(index) => Instruction::InvokeDynamic(*index),
            Instruction::MultiANewArray(index, dims) => Instruction::MultiANewArray(*index, *dims),
            Instruction::NewArray(atype) => Instruction::NewArray(*atype),
            Instruction::Branch(opcode, target) => Instruction::Branch(*opcode, map_label(target)?),
            Instruction::TableSwitch {
                default,
                low,
                targets,
            } => Instruction::TableSwitch {
                default: map_label(default)?,
                low: *low,
                targets: targets.iter().map(&mut map_label).collect::<Result<_, E>>()?,
            },
            Instruction::LookupSwitch { default, pairs } => Instruction::LookupSwitch {
                default: map_label(default)?,
                pairs: pairs
                    .iter()
                    .map(|(key, target)| Ok((*key, map_label(target)?)))
                    .collect::<Result<_, E>>()?,
            },
        })
    }

    /// Change the type of jump targets
    pub fn map_labels<L2>(&self, mut map_label: impl FnMut(&L) -> L2) -> Instruction<L2> {
        match self.try_map_labels(|label| Ok::<L2, Infallible>(map_label(label))) {
            Ok(instruction) => instruction,
            Err(never) => match never {},
        }
    }

    /// Every jump target (not including fallthrough)
    pub fn jump_targets(&self) -> Vec<&L> {
        match self {
            Instruction::Branch(_, target) => vec![target],
            Instruction::TableSwitch {
                default, targets, ..
            } => {
                let mut all = vec![default];
                all.extend(targets.iter());
                all
            }
            Instruction::LookupSwitch { default, pairs } => {
                let mut all = vec![default];
                all.extend(pairs.iter().map(|(_, target)| target));
                all
            }
            _ => vec![],
        }
    }

    /// Can control continue on to the next instruction?
    ///
    /// Subroutine calls count as falling through, since `ret` comes back to the next
    /// instruction.
    pub fn falls_through(&self) -> bool {
        match self {
            Instruction::Simple(opcode) => !matches!(*opcode, IRETURN..=RETURN | ATHROW),
            Instruction::Branch(opcode, _) => !matches!(*opcode, GOTO | GOTO_W),
            Instruction::Local(LocalOp::Ret, _) => false,
            Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => false,
            _ => true,
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Instruction::Simple(IRETURN..=RETURN))
    }

    /// `jsr`, `jsr_w`, or `ret`
    pub fn is_subroutine(&self) -> bool {
        matches!(
            self,
            Instruction::Branch(JSR | JSR_W, _) | Instruction::Local(LocalOp::Ret, _)
        )
    }

    /// Method invocation, either through a method reference or `invokedynamic`
    pub fn is_invocation(&self) -> bool {
        matches!(
            self,
            Instruction::Constant(INVOKEVIRTUAL..=INVOKESTATIC, _)
                | Instruction::InvokeInterface(_, _)
                | Instruction::InvokeDynamic(_)
        )
    }

    /// Constant pool index operand
    pub fn constant_index(&self) -> Option<ConstantIndex> {
        match self {
            Instruction::Constant(_, index)
            | Instruction::InvokeInterface(index, _)
            | Instruction::InvokeDynamic(index)
            | Instruction::MultiANewArray(index, _) => Some(*index),
            _ => None,
        }
    }

    /// Local variable slot accessed along with how many slots the value occupies
    pub fn local_slot(&self) -> Option<(u16, u16)> {
        match self {
            Instruction::Local(op, slot) if op.is_wide_value() => Some((*slot, 2)),
            Instruction::Local(_, slot) | Instruction::IInc(slot, _) => Some((*slot, 1)),
            _ => None,
        }
    }
}

impl<L: Clone> Instruction<L> {
    /// Same instruction, but with a different constant pool index operand
    pub fn with_constant_index(&self, new_index: ConstantIndex) -> Instruction<L> {
        match self {
            Instruction::Constant(opcode, _) => Instruction::Constant(*opcode, new_index),
            Instruction::InvokeInterface(_, count) => {
                Instruction::InvokeInterface(new_index, *count)
            }
            Instruction::InvokeDynamic(_) => Instruction::InvokeDynamic(new_index),
            Instruction::MultiANewArray(_, dims) => Instruction::MultiANewArray(new_index, *dims),
            other => other.clone(),
        }
    }

    /// Same instruction, but with the local variable slot operand remapped
    pub fn map_slot(&self, map: impl FnOnce(u16) -> u16) -> Instruction<L> {
        match self {
            Instruction::Local(op, slot) => Instruction::Local(*op, map(*slot)),
            Instruction::IInc(slot, delta) => Instruction::IInc(map(*slot), *delta),
            other => other.clone(),
        }
    }
}

/// Decode a full code array in one linear sweep
///
/// Returns the offset, instruction, and encoded length of each instruction in order.
pub fn decode_code(code: &[u8]) -> Result<Vec<(Offset, Instruction<Offset>, usize)>, Error> {
    let mut instructions = vec![];
    let mut offset = 0;
    while offset < code.len() {
        let (instruction, length) = Instruction::decode_at(code, offset)?;
        instructions.push((Offset(offset), instruction, length));
        offset += length;
    }
    Ok(instructions)
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode(instruction: &Instruction<Offset>, offset: usize) -> Vec<u8> {
        let mut bytes = vec![];
        instruction.serialize_at(offset, &mut bytes).unwrap();
        bytes
    }

    #[test]
    fn decode_short_and_wide_locals() {
        let code = [ILOAD_0 + 2, ASTORE_3, DLOAD, 7, WIDE, ISTORE, 0x01, 0x00, RETURN];
        let decoded = decode_code(&code).unwrap();
        let instructions: Vec<_> = decoded.iter().map(|(_, i, len)| (i.clone(), *len)).collect();
        assert_eq!(
            instructions,
            vec![
                (Instruction::Local(LocalOp::ILoad, 2), 1),
                (Instruction::Local(LocalOp::AStore, 3), 1),
                (Instruction::Local(LocalOp::DLoad, 7), 2),
                (Instruction::Local(LocalOp::IStore, 256), 4),
                (Instruction::Simple(RETURN), 1),
            ]
        );
        assert_eq!(decoded[2].1.local_slot(), Some((7, 2)));
    }

    #[test]
    fn encoding_picks_shortest_form() {
        assert_eq!(encode(&Instruction::Local(LocalOp::ILoad, 3), 0), vec![ILOAD_0 + 3]);
        assert_eq!(encode(&Instruction::Local(LocalOp::ILoad, 4), 0), vec![ILOAD, 4]);
        assert_eq!(encode(&Instruction::Local(LocalOp::Ret, 0), 0), vec![RET, 0]);
        assert_eq!(
            encode(&Instruction::Local(LocalOp::LStore, 300), 0),
            vec![WIDE, LSTORE, 0x01, 0x2c]
        );
        assert_eq!(encode(&Instruction::IInc(3, -1), 0), vec![IINC, 3, 0xff]);
        assert_eq!(
            encode(&Instruction::IInc(3, 1000), 0),
            vec![WIDE, IINC, 0, 3, 0x03, 0xe8]
        );
        let ldc = Instruction::Constant(LDC, ConstantIndex(256));
        assert_eq!(encode(&ldc, 0), vec![LDC_W, 0x01, 0x00]);
        assert_eq!(ldc.width(0), 3);
    }

    #[test]
    fn widths_match_encodings() {
        let instructions: Vec<Instruction<Offset>> = vec![
            Instruction::Simple(NOP),
            Instruction::BiPush(-3),
            Instruction::SiPush(1000),
            Instruction::Local(LocalOp::FLoad, 255),
            Instruction::Local(LocalOp::Ret, 2),
            Instruction::Constant(LDC, ConstantIndex(3)),
            Instruction::Constant(INVOKESTATIC, ConstantIndex(3)),
            Instruction::InvokeInterface(ConstantIndex(9), 2),
            Instruction::InvokeDynamic(ConstantIndex(9)),
            Instruction::MultiANewArray(ConstantIndex(9), 2),
            Instruction::NewArray(10),
            Instruction::Branch(GOTO_W, Offset(40)),
        ];
        for instruction in &instructions {
            assert_eq!(encode(instruction, 20).len(), instruction.width(20), "{:?}", instruction);
        }
    }

    #[test]
    fn decode_tableswitch_with_padding() {
        let mut code = vec![NOP, TABLESWITCH, 0, 0];
        for word in [23i32, 0, 1, 23, 23] {
            code.extend_from_slice(&word.to_be_bytes());
        }
        code.push(RETURN);

        let (switch, len) = Instruction::decode_at(&code, 1).unwrap();
        assert_eq!(len, 23);
        assert_eq!(switch.width(1), 23);
        assert_eq!(
            switch,
            Instruction::TableSwitch {
                default: Offset(24),
                low: 0,
                targets: vec![Offset(24), Offset(24)],
            }
        );
        assert!(!switch.falls_through());
        assert_eq!(switch.jump_targets().len(), 3);
        assert_eq!(encode(&switch, 1), code[1..24].to_vec());

        // Placed elsewhere, the padding changes
        assert_eq!(switch.width(3), 21);
    }

    #[test]
    fn decode_errors() {
        assert!(matches!(
            Instruction::decode_at(&[SIPUSH, 0], 0),
            Err(Error::MalformedBytecode {
                kind: MalformedKind::Truncated,
                ..
            })
        ));
        assert!(matches!(
            Instruction::decode_at(&[0xfe], 0),
            Err(Error::MalformedBytecode {
                kind: MalformedKind::UnknownOpcode(0xfe),
                ..
            })
        ));
        assert!(matches!(
            Instruction::decode_at(&[GOTO, 0x00, 0x10], 0),
            Err(Error::MalformedBytecode {
                kind: MalformedKind::BranchOutOfBounds(16),
                ..
            })
        ));
        assert!(matches!(
            Instruction::decode_at(&[WIDE, GOTO, 0, 0], 0),
            Err(Error::MalformedBytecode {
                kind: MalformedKind::InvalidWideOpcode(GOTO),
                ..
            })
        ));
        assert!(matches!(
            Instruction::decode_at(&[NEWARRAY, 2], 0),
            Err(Error::MalformedBytecode {
                kind: MalformedKind::InvalidArrayType(2),
                ..
            })
        ));
    }

    #[test]
    fn branch_offset_overflow() {
        let far = Instruction::Branch(GOTO, Offset(40_000));
        let mut bytes = vec![];
        assert!(matches!(
            far.serialize_at(0, &mut bytes),
            Err(Error::LimitExceeded(Limit::BranchOffset))
        ));
        assert!(Instruction::Branch(GOTO_W, Offset(40_000))
            .serialize_at(0, &mut bytes)
            .is_ok());
    }

    #[test]
    fn control_flow_queries() {
        assert!(!Instruction::<Offset>::Simple(IRETURN).falls_through());
        assert!(Instruction::<Offset>::Simple(IRETURN).is_return());
        assert!(!Instruction::<Offset>::Simple(ATHROW).falls_through());
        assert!(Instruction::Branch(IFEQ, Offset(0)).falls_through());
        assert!(!Instruction::Branch(GOTO, Offset(0)).falls_through());
        assert!(Instruction::Branch(JSR, Offset(0)).is_subroutine());
        assert!(Instruction::<Offset>::Constant(INVOKEVIRTUAL, ConstantIndex(1)).is_invocation());
        assert!(!Instruction::<Offset>::Constant(GETFIELD, ConstantIndex(1)).is_invocation());
    }
}
