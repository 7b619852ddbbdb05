use crate::jvm::{CodeAttribute, Error, Instruction, MalformedKind};
use crate::util::Offset;

/// Marks which offsets of a method's code can be executed
///
/// Traversal starts at offset 0 and at every exception handler whose protected range is
/// non-empty, and follows jumps and fallthroughs.
///
/// A marker that hasn't marked any code reports nothing as reachable.
#[derive(Default, Debug, Clone)]
pub struct ReachableCodeMarker {
    reachable: Vec<bool>,
}

impl ReachableCodeMarker {
    pub fn new() -> ReachableCodeMarker {
        ReachableCodeMarker::default()
    }

    /// Mark all reachable offsets of the code, forgetting the results of any previous marking
    ///
    /// Fails if a jump lands outside the code or off an instruction boundary, or if control can
    /// run off the end of the code array.
    pub fn mark(&mut self, code: &CodeAttribute) -> Result<(), Error> {
        self.reachable = vec![false; code.len()];
        if code.is_empty() {
            return Err(Error::malformed(0, MalformedKind::EmptyCode));
        }

        // Decoding up front also rules out any undecodable code, reachable or not
        let mut instructions: Vec<Option<(Instruction<Offset>, usize)>> = vec![None; code.len()];
        for (offset, instruction, length) in code.instructions()? {
            instructions[offset.0] = Some((instruction, length));
        }

        let mut work_list: Vec<(usize, usize)> = vec![(0, 0)];
        for handler in &code.exception_table {
            let (start, end) = (handler.start_pc as usize, handler.end_pc as usize);
            if start >= end {
                continue;
            }
            let handler_pc = handler.handler_pc as usize;
            if handler_pc >= code.len() {
                let kind = MalformedKind::BranchOutOfBounds(handler_pc as i64);
                return Err(Error::malformed(start, kind));
            }
            work_list.push((handler_pc, start));
        }

        while let Some((offset, from)) = work_list.pop() {
            if self.reachable[offset] {
                continue;
            }
            let (instruction, length) = match &instructions[offset] {
                Some(decoded) => decoded,
                None => {
                    return Err(Error::malformed(from, MalformedKind::NotAnInstructionBoundary))
                }
            };
            self.reachable[offset] = true;

            for target in instruction.jump_targets() {
                work_list.push((target.0, offset));
            }
            if instruction.falls_through() {
                let next = offset + length;
                if next >= code.len() {
                    return Err(Error::malformed(offset, MalformedKind::FallsOffEnd));
                }
                work_list.push((next, offset));
            }
        }
        Ok(())
    }

    /// Was this exact offset marked as reachable?
    pub fn is_reachable(&self, offset: usize) -> bool {
        self.reachable.get(offset).copied().unwrap_or(false)
    }

    /// Is any offset in `[start, end)` reachable?
    pub fn is_reachable_range(&self, start: usize, end: usize) -> bool {
        let end = end.min(self.reachable.len());
        start < end && self.reachable[start..end].iter().any(|reachable| *reachable)
    }

    /// Reachable instruction offsets, in increasing order
    pub fn reachable_offsets(&self) -> impl Iterator<Item = Offset> + '_ {
        self.reachable
            .iter()
            .enumerate()
            .filter(|(_, reachable)| **reachable)
            .map(|(offset, _)| Offset(offset))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::opcodes::*;
    use crate::jvm::{assemble, ExceptionHandler, Item, LocalOp};

    fn code_of(items: &[Item<u32>]) -> CodeAttribute {
        CodeAttribute::new(2, 1, assemble(items).unwrap().code)
    }

    #[test]
    fn fresh_marker_reports_nothing() {
        let marker = ReachableCodeMarker::new();
        assert!(!marker.is_reachable(0));
        assert!(!marker.is_reachable_range(0, 100));
        assert_eq!(marker.reachable_offsets().count(), 0);
    }

    #[test]
    fn dead_code_after_return() {
        // 0: iload_0, 1: ifeq 6, 4: iconst_1, 5: ireturn, 6: iconst_0, 7: ireturn,
        // 8: nop, 9: return
        let code = code_of(&[
            Instruction::Local(LocalOp::ILoad, 0).into(),
            Instruction::Branch(IFEQ, 0).into(),
            Instruction::Simple(ICONST_1).into(),
            Instruction::Simple(IRETURN).into(),
            Item::Label(0),
            Instruction::Simple(ICONST_0).into(),
            Instruction::Simple(IRETURN).into(),
            Instruction::Simple(NOP).into(),
            Instruction::Simple(RETURN).into(),
        ]);

        let mut marker = ReachableCodeMarker::new();
        marker.mark(&code).unwrap();
        let reachable: Vec<usize> = marker.reachable_offsets().map(|offset| offset.0).collect();
        assert_eq!(reachable, vec![0, 1, 4, 5, 6, 7]);
        assert!(!marker.is_reachable(2));
        assert!(!marker.is_reachable_range(8, 10));
        assert!(marker.is_reachable_range(7, 10));
    }

    #[test]
    fn handlers_of_non_empty_ranges() {
        // 0: nop, 1: return, 2: astore_0 (handler), 3: return, 4: pop (handler), 5: return,
        // 6: pop, 7: return
        let mut code = code_of(&[
            Instruction::Simple(NOP).into(),
            Instruction::Simple(RETURN).into(),
            Instruction::Local(LocalOp::AStore, 0).into(),
            Instruction::Simple(RETURN).into(),
            Instruction::Simple(POP).into(),
            Instruction::Simple(RETURN).into(),
            Instruction::Simple(POP).into(),
            Instruction::Simple(RETURN).into(),
        ]);
        code.exception_table = vec![
            ExceptionHandler {
                start_pc: 0,
                end_pc: 1,
                handler_pc: 2,
                catch_type: None,
            },
            // Protects only dead code
            ExceptionHandler {
                start_pc: 5,
                end_pc: 6,
                handler_pc: 4,
                catch_type: None,
            },
            // Protects nothing
            ExceptionHandler {
                start_pc: 3,
                end_pc: 3,
                handler_pc: 6,
                catch_type: None,
            },
        ];

        let mut marker = ReachableCodeMarker::new();
        marker.mark(&code).unwrap();
        let reachable: Vec<usize> = marker.reachable_offsets().map(|offset| offset.0).collect();
        assert_eq!(reachable, vec![0, 1, 2, 3, 4, 5]);
        assert!(!marker.is_reachable_range(6, 8));
    }

    #[test]
    fn malformed_control_flow() {
        let mut marker = ReachableCodeMarker::new();

        // Falls off the end
        let code = CodeAttribute::new(1, 0, vec![NOP]);
        assert!(matches!(
            marker.mark(&code),
            Err(Error::MalformedBytecode {
                kind: MalformedKind::FallsOffEnd,
                ..
            })
        ));

        // Jumps into the middle of `sipush`
        let code = CodeAttribute::new(1, 0, vec![GOTO, 0, 4, SIPUSH, 0, 1, RETURN]);
        assert!(matches!(
            marker.mark(&code),
            Err(Error::MalformedBytecode {
                kind: MalformedKind::NotAnInstructionBoundary,
                ..
            })
        ));

        // Jumps outside the code
        let code = CodeAttribute::new(1, 0, vec![GOTO, 0, 9, RETURN]);
        assert!(matches!(
            marker.mark(&code),
            Err(Error::MalformedBytecode {
                kind: MalformedKind::BranchOutOfBounds(9),
                ..
            })
        ));

        let empty = CodeAttribute::new(0, 0, vec![]);
        assert!(marker.mark(&empty).is_err());
        assert!(!marker.is_reachable(0));
    }
}
