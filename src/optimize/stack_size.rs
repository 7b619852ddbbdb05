use crate::jvm::opcodes::*;
use crate::jvm::{
    CodeAttribute, Constant, ConstantPool, Error, FieldType, Instruction, MalformedKind,
    MethodDescriptor, ParseDescriptor,
};
use crate::util::Width;

/// Operand stack depth (in slots) before each instruction of a method
#[derive(Debug, Clone)]
pub struct StackSizes {
    depths: Vec<Option<u16>>,
    max_depth: u16,
}

impl StackSizes {
    /// Depth before the instruction at `offset`, if it was reached
    pub fn before(&self, offset: usize) -> Option<u16> {
        self.depths.get(offset).copied().flatten()
    }

    /// Largest depth reached at any point (including in the middle of instructions)
    pub fn max_depth(&self) -> u16 {
        self.max_depth
    }
}

/// Computes operand stack depths by abstract interpretation of stack heights
///
/// Only heights are tracked, not types. Every path into an instruction must agree on the height
/// there. Exception handlers are entered with just the exception on the stack.
pub struct StackSizeComputer;

impl StackSizeComputer {
    pub fn compute(code: &CodeAttribute, constants: &ConstantPool) -> Result<StackSizes, Error> {
        if code.is_empty() {
            return Err(Error::malformed(0, MalformedKind::EmptyCode));
        }

        let mut instructions = vec![None; code.len()];
        for (offset, instruction, length) in code.instructions()? {
            instructions[offset.0] = Some((instruction, length));
        }

        let mut depths: Vec<Option<u16>> = vec![None; code.len()];
        let mut max_depth = 0;
        let mut work_list: Vec<(usize, u16, usize)> = vec![(0, 0, 0)];
        for handler in &code.exception_table {
            if handler.start_pc < handler.end_pc {
                work_list.push((handler.handler_pc as usize, 1, handler.start_pc as usize));
            }
        }

        while let Some((offset, depth, from)) = work_list.pop() {
            let (instruction, length) = match instructions.get(offset) {
                Some(Some(decoded)) => decoded,
                Some(None) => {
                    return Err(Error::malformed(from, MalformedKind::NotAnInstructionBoundary))
                }
                None => {
                    let kind = MalformedKind::BranchOutOfBounds(offset as i64);
                    return Err(Error::malformed(from, kind));
                }
            };
            match depths[offset] {
                Some(expected) if expected == depth => continue,
                Some(expected) => {
                    let kind = MalformedKind::InconsistentStackHeight {
                        expected,
                        found: depth,
                    };
                    return Err(Error::malformed(offset, kind));
                }
                None => depths[offset] = Some(depth),
            }

            let (pops, pushes) = Self::stack_effect(offset, instruction, constants)?;
            let after = depth
                .checked_sub(pops)
                .ok_or_else(|| Error::malformed(offset, MalformedKind::StackUnderflow))?
                + pushes;
            max_depth = max_depth.max(depth).max(after);

            for target in instruction.jump_targets() {
                work_list.push((target.0, after, offset));
            }
            if instruction.falls_through() {
                let next = offset + length;
                if next >= code.len() {
                    return Err(Error::malformed(offset, MalformedKind::FallsOffEnd));
                }

                // Execution resumes after `jsr` once the subroutine has popped its return address
                let resumed = match instruction {
                    Instruction::Branch(JSR | JSR_W, _) => depth,
                    _ => after,
                };
                work_list.push((next, resumed, offset));
            }
        }

        Ok(StackSizes { depths, max_depth })
    }

    /// Slots popped and pushed by an instruction
    pub fn stack_effect<L>(
        offset: usize,
        instruction: &Instruction<L>,
        constants: &ConstantPool,
    ) -> Result<(u16, u16), Error> {
        let effect = match instruction {
            Instruction::Simple(opcode) => simple_stack_effect(*opcode)
                .ok_or_else(|| Error::malformed(offset, MalformedKind::UnknownOpcode(*opcode)))?,
            Instruction::BiPush(_) | Instruction::SiPush(_) => (0, 1),
            Instruction::Local(op, _) => {
                let width = if op.is_wide_value() { 2 } else { 1 };
                match op {
                    crate::jvm::LocalOp::Ret => (0, 0),
                    op if op.is_store() => (width, 0),
                    _ => (0, width),
                }
            }
            Instruction::IInc(_, _) => (0, 0),
            Instruction::Constant(LDC, index) => match constants.get(*index)? {
                Constant::Long(_) | Constant::Double(_) => (0, 2),
                _ => (0, 1),
            },
            Instruction::Constant(LDC2_W, _) => (0, 2),
            Instruction::Constant(opcode @ GETSTATIC..=PUTFIELD, index) => {
                let member = constants.member_ref(*index)?;
                let width = FieldType::parse(member.descriptor)?.width() as u16;
                match *opcode {
                    GETSTATIC => (0, width),
                    PUTSTATIC => (width, 0),
                    GETFIELD => (1, width),
                    _ => (1 + width, 0),
                }
            }
            Instruction::Constant(opcode @ INVOKEVIRTUAL..=INVOKESTATIC, index) => {
                let member = constants.member_ref(*index)?;
                let descriptor = MethodDescriptor::parse(member.descriptor)?;
                let has_this = *opcode != INVOKESTATIC;
                Self::invoke_effect(&descriptor, has_this)
            }
            Instruction::InvokeInterface(index, _) => {
                let member = constants.member_ref(*index)?;
                let descriptor = MethodDescriptor::parse(member.descriptor)?;
                Self::invoke_effect(&descriptor, true)
            }
            Instruction::InvokeDynamic(index) => {
                let descriptor = constants.invoke_dynamic_descriptor(*index)?;
                let descriptor = MethodDescriptor::parse(descriptor)?;
                Self::invoke_effect(&descriptor, false)
            }
            Instruction::Constant(NEW, _) => (0, 1),
            Instruction::Constant(_, _) => (1, 1), // `anewarray`, `checkcast`, `instanceof`
            Instruction::NewArray(_) => (1, 1),
            Instruction::MultiANewArray(_, dimensions) => (*dimensions as u16, 1),
            Instruction::Branch(opcode @ (JSR | JSR_W), _) => (branch_pops(*opcode), 1),
            Instruction::Branch(opcode, _) => (branch_pops(*opcode), 0),
            Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => (1, 0),
        };
        Ok(effect)
    }

    fn invoke_effect(descriptor: &MethodDescriptor, has_this: bool) -> (u16, u16) {
        (
            descriptor.parameter_length(has_this) as u16,
            descriptor.return_width() as u16,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{assemble, ExceptionHandler, Item, LocalOp};

    #[test]
    fn depths_along_paths() {
        let mut constants = ConstantPool::new();
        let callee = constants.get_method_ref("a/B", "f", "(JI)D", false).unwrap();
        let items: Vec<Item<u32>> = vec![
            Instruction::Simple(LCONST_1).into(),
            Instruction::Simple(ICONST_2).into(),
            Instruction::Constant(INVOKESTATIC, callee).into(),
            Instruction::Simple(D2I).into(),
            Instruction::Branch(IFEQ, 0).into(),
            Instruction::Simple(RETURN).into(),
            Item::Label(0),
            Instruction::Simple(RETURN).into(),
        ];
        let code = CodeAttribute::new(3, 0, assemble(&items).unwrap().code);
        let sizes = StackSizeComputer::compute(&code, &constants).unwrap();

        assert_eq!(sizes.before(0), Some(0));
        assert_eq!(sizes.before(2), Some(3));
        assert_eq!(sizes.before(5), Some(2));
        assert_eq!(sizes.before(6), Some(1));
        assert_eq!(sizes.before(9), Some(0));
        assert_eq!(sizes.before(10), Some(0));
        assert_eq!(sizes.max_depth(), 3);
    }

    #[test]
    fn handler_starts_with_exception() {
        let items: Vec<Item<u32>> = vec![
            Instruction::Simple(NOP).into(),
            Instruction::Simple(RETURN).into(),
            Instruction::Local(LocalOp::AStore, 0).into(),
            Instruction::Simple(RETURN).into(),
        ];
        let mut code = CodeAttribute::new(1, 1, assemble(&items).unwrap().code);
        code.exception_table.push(ExceptionHandler {
            start_pc: 0,
            end_pc: 1,
            handler_pc: 2,
            catch_type: None,
        });
        let sizes = StackSizeComputer::compute(&code, &ConstantPool::new()).unwrap();
        assert_eq!(sizes.before(2), Some(1));
        assert_eq!(sizes.before(3), Some(0));
    }

    #[test]
    fn inconsistent_and_underflowing_stacks() {
        let constants = ConstantPool::new();

        // 0: iload_0, 1: ifeq 5, 4: iconst_1, 5: return (reached with heights 0 and 1)
        let code = CodeAttribute::new(1, 1, vec![ILOAD_0, IFEQ, 0, 4, ICONST_1, RETURN]);
        assert!(matches!(
            StackSizeComputer::compute(&code, &constants),
            Err(Error::MalformedBytecode {
                kind: MalformedKind::InconsistentStackHeight { .. },
                ..
            })
        ));

        let code = CodeAttribute::new(1, 1, vec![POP, RETURN]);
        assert!(matches!(
            StackSizeComputer::compute(&code, &constants),
            Err(Error::MalformedBytecode {
                kind: MalformedKind::StackUnderflow,
                ..
            })
        ));
    }
}
