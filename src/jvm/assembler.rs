//! Label-based layout of instructions into a code array
//!
//! Code is assembled in two passes. The first pass places every label, computing the offset of
//! every instruction. The second pass encodes each instruction once, with its jump targets
//! resolved against the placed labels. Since no instruction gets resized based on its jump
//! distance, one layout pass is always enough: a jump too long for its encoding is an error.

use super::{Error, Instruction, Limit, MalformedKind};
use crate::util::Offset;
use std::collections::HashMap;
use std::hash::Hash;

/// Element of an instruction stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item<L> {
    /// Marks the offset of the next instruction
    Label(L),
    Instruction(Instruction<L>),
}

impl<L> From<Instruction<L>> for Item<L> {
    fn from(instruction: Instruction<L>) -> Item<L> {
        Item::Instruction(instruction)
    }
}

#[derive(Debug)]
pub struct Assembled<L> {
    pub code: Vec<u8>,

    /// Offset of every placed label
    pub labels: HashMap<L, Offset>,
}

impl<L: Eq + Hash> Assembled<L> {
    pub fn offset_of(&self, label: &L) -> Option<Offset> {
        self.labels.get(label).copied()
    }
}

/// Lay out and encode an instruction stream
///
/// Labels may be placed more than once, in which case the last placement wins.
pub fn assemble<L: Eq + Hash + Clone>(items: &[Item<L>]) -> Result<Assembled<L>, Error> {
    let mut labels = HashMap::new();
    let mut offset = 0;
    for item in items {
        match item {
            Item::Label(label) => {
                labels.insert(label.clone(), Offset(offset));
            }
            Item::Instruction(instruction) => {
                offset += instruction.width(offset);
                if offset > u16::MAX as usize {
                    return Err(Error::LimitExceeded(Limit::CodeLength));
                }
            }
        }
    }

    let mut code = Vec::with_capacity(offset);
    for item in items {
        if let Item::Instruction(instruction) = item {
            let at = code.len();
            let resolved = instruction.try_map_labels(|label| {
                labels
                    .get(label)
                    .copied()
                    .ok_or_else(|| Error::malformed(at, MalformedKind::UnplacedLabel))
            })?;
            resolved.serialize_at(at, &mut code)?;
        }
    }

    Ok(Assembled { code, labels })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{decode_code, opcodes::*, LocalOp};

    #[test]
    fn forward_and_backward_jumps() {
        let items = vec![
            Item::Label("top"),
            Instruction::Local(LocalOp::ILoad, 0).into(),
            Instruction::Branch(IFEQ, "done").into(),
            Instruction::IInc(0, -1).into(),
            Instruction::Branch(GOTO, "top").into(),
            Item::Label("done"),
            Instruction::Simple(RETURN).into(),
        ];
        let assembled = assemble(&items).unwrap();
        assert_eq!(assembled.offset_of(&"done"), Some(Offset(10)));
        assert_eq!(
            assembled.code,
            vec![ILOAD_0, IFEQ, 0, 9, IINC, 0, 0xff, GOTO, 0xff, 0xf9, RETURN]
        );

        let decoded = decode_code(&assembled.code).unwrap();
        assert_eq!(decoded[1].1, Instruction::Branch(IFEQ, Offset(10)));
        assert_eq!(decoded[3].1, Instruction::Branch(GOTO, Offset(0)));
    }

    #[test]
    fn unplaced_label() {
        let items = vec![Item::Instruction(Instruction::Branch(GOTO, 1u32))];
        assert!(matches!(
            assemble(&items),
            Err(Error::MalformedBytecode {
                kind: MalformedKind::UnplacedLabel,
                ..
            })
        ));
    }

    #[test]
    fn code_too_long() {
        let items: Vec<Item<u32>> = (0..70_000)
            .map(|_| Item::Instruction(Instruction::Simple(NOP)))
            .collect();
        assert!(matches!(
            assemble(&items),
            Err(Error::LimitExceeded(Limit::CodeLength))
        ));
    }
}
