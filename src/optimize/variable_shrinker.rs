use crate::jvm::{assemble, Assembled, CodeAttribute, Error, Item, Limit, MalformedKind};
use crate::util::Offset;

/// Gets told where every surviving local variable moved
pub trait VariableVisitor {
    fn visit_variable(&mut self, old_slot: u16, new_slot: u16);
}

/// Old to new local variable slots, as computed by [`VariableShrinker::shrink`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableMapping {
    new_slots: Vec<Option<u16>>,
    max_locals: u16,
}

impl VariableMapping {
    /// New slot of a variable, or `None` if the slot was never used
    pub fn get(&self, old_slot: u16) -> Option<u16> {
        self.new_slots.get(old_slot as usize).copied().flatten()
    }

    /// Does every used slot keep its number?
    pub fn is_identity(&self) -> bool {
        self.new_slots
            .iter()
            .enumerate()
            .all(|(old, new)| new.map_or(true, |new| new as usize == old))
    }

    /// Number of slots after compaction
    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    /// Old slot count
    pub fn old_max_locals(&self) -> u16 {
        self.new_slots.len() as u16
    }
}

/// Compacts local variable slots after inlining
///
/// Inlining gives every callee its own fresh range of slots, which often ends up partially unused
/// (eg. when the callee ignored some parameter). The shrinker renumbers used slots densely,
/// preserving order, so that the frame is as small as it can be with the slots it has.
pub struct VariableShrinker;

impl VariableShrinker {
    /// Renumber the local variable slots of the code
    ///
    /// The first `parameter_size` slots are always kept in place, since they are assigned by the
    /// method descriptor. Code is only rewritten if some slot actually moves, so shrinking twice
    /// has the same effect as shrinking once.
    pub fn shrink(
        code: &mut CodeAttribute,
        parameter_size: usize,
        mut visitor: Option<&mut dyn VariableVisitor>,
    ) -> Result<VariableMapping, Error> {
        let max_locals = code.max_locals as usize;
        if parameter_size > max_locals {
            return Err(Error::LimitExceeded(Limit::MaxLocals));
        }
        let instructions = code.instructions()?;

        let mut used = vec![false; max_locals];
        used[..parameter_size].iter_mut().for_each(|slot| *slot = true);
        for (offset, instruction, _) in &instructions {
            if let Some((slot, width)) = instruction.local_slot() {
                let end = slot as usize + width as usize;
                if end > max_locals {
                    return Err(Error::malformed(offset.0, MalformedKind::LocalOutOfRange(slot)));
                }
                used[slot as usize..end].iter_mut().for_each(|slot| *slot = true);
            }
        }

        let mut new_slots = Vec::with_capacity(max_locals);
        let mut next_slot: u16 = 0;
        for (old_slot, used) in used.iter().enumerate() {
            if *used {
                if let Some(visitor) = visitor.as_mut() {
                    visitor.visit_variable(old_slot as u16, next_slot);
                }
                new_slots.push(Some(next_slot));
                next_slot += 1;
            } else {
                new_slots.push(None);
            }
        }
        let mapping = VariableMapping {
            new_slots,
            max_locals: next_slot,
        };

        let mut local_variables = code.local_variables.clone();
        if let Some(local_variables) = local_variables.as_mut() {
            local_variables.retain(|local| mapping.get(local.slot).is_some());
        }
        if mapping.is_identity() {
            code.local_variables = local_variables;
            code.max_locals = mapping.max_locals;
            return Ok(mapping);
        }

        // Shorter slot encodings move every following offset
        let mut items: Vec<Item<Offset>> = Vec::with_capacity(instructions.len() * 2 + 1);
        for (offset, instruction, _) in &instructions {
            items.push(Item::Label(*offset));
            let instruction = match instruction.local_slot() {
                Some((slot, _)) => {
                    let new_slot = mapping.get(slot).unwrap_or(slot);
                    instruction.map_slot(|_| new_slot)
                }
                None => instruction.clone(),
            };
            items.push(Item::Instruction(instruction));
        }
        items.push(Item::Label(Offset(code.len())));
        let assembled = assemble(&items)?;

        // Nothing is written back until every offset has been moved
        let at = |offset: u16| moved(&assembled, offset as usize);
        let mut exception_table = code.exception_table.clone();
        for handler in &mut exception_table {
            handler.start_pc = at(handler.start_pc)?;
            handler.end_pc = at(handler.end_pc)?;
            handler.handler_pc = at(handler.handler_pc)?;
        }
        let mut line_numbers = code.line_numbers.clone();
        for line in line_numbers.iter_mut().flatten() {
            line.start_pc = at(line.start_pc)?;
        }
        for local in local_variables.iter_mut().flatten() {
            let end_pc = moved(&assembled, local.start_pc as usize + local.length as usize)?;
            local.start_pc = at(local.start_pc)?;
            local.length = end_pc - local.start_pc;
            local.slot = mapping.get(local.slot).unwrap_or(local.slot);
        }

        code.code = assembled.code;
        code.max_locals = mapping.max_locals;
        code.exception_table = exception_table;
        code.line_numbers = line_numbers;
        code.local_variables = local_variables;
        Ok(mapping)
    }
}

fn moved(assembled: &Assembled<Offset>, offset: usize) -> Result<u16, Error> {
    let new_offset = assembled
        .offset_of(&Offset(offset))
        .ok_or_else(|| Error::malformed(offset, MalformedKind::NotAnInstructionBoundary))?;
    u16::try_from(new_offset.0).map_err(|_| Error::LimitExceeded(Limit::CodeLength))
}
