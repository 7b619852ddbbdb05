//! Rewriting of caller code with a callee body in place of the call
//!
//! The caller and callee are both turned back into instruction streams, with every jump target
//! and table offset expressed as a label. After the invocation is replaced by the callee block,
//! the stream is assembled once and every table is rebuilt by looking up its labels.

use crate::jvm::opcodes::*;
use crate::jvm::{
    assemble, Assembled, ClassConstantIndex, CodeAttribute, ConstantIndex, ConstantPool, Error,
    ExceptionHandler, Instruction, Item, Limit, LineNumber, LineSource, LocalOp, LocalVariable,
    MalformedKind, MethodDescriptor, Utf8ConstantIndex,
};
use crate::util::{Offset, Width};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum SpliceLabel {
    /// Offset in the original caller code
    Caller(Offset),

    /// Offset in the original callee code
    Callee(Offset),

    /// Receiver is known to be non-null
    NullChecked,
}

/// Method body being inlined
pub struct Callee<'a> {
    pub code: &'a CodeAttribute,
    pub instructions: &'a [(Offset, Instruction<Offset>, usize)],
    pub descriptor: &'a MethodDescriptor,
    pub is_static: bool,
    pub source: LineSource,

    /// Constants of the callee's class, if that isn't the caller's class
    pub foreign_constants: Option<&'a ConstantPool>,
}

pub struct Spliced {
    pub code: CodeAttribute,

    /// Start of the inlined block, including the argument stores
    pub block_start: usize,

    /// First instruction after the inlined block
    pub block_end: usize,
}

struct Splicer<'a, 'b> {
    constants: &'a mut ConstantPool,
    callee: &'a Callee<'b>,
}

impl<'a, 'b> Splicer<'a, 'b> {
    fn import(&mut self, index: ConstantIndex) -> Result<ConstantIndex, Error> {
        match self.callee.foreign_constants {
            Some(foreign) => self.constants.import(foreign, index),
            None => Ok(index),
        }
    }

    fn import_utf8(&mut self, index: Utf8ConstantIndex) -> Result<Utf8ConstantIndex, Error> {
        match self.callee.foreign_constants {
            Some(foreign) => self.constants.import_utf8(foreign, index),
            None => Ok(index),
        }
    }
}

/// Replace the invocation at `call_site` with the body of the callee
///
/// New constants may get added to `constants` even if this fails, so callers should be ready
/// to roll the pool back.
pub fn splice(
    constants: &mut ConstantPool,
    caller: &CodeAttribute,
    caller_instructions: &[(Offset, Instruction<Offset>, usize)],
    call_site: usize,
    callee: &Callee,
    max_stack: u16,
) -> Result<Spliced, Error> {
    let base = caller.max_locals;
    let max_locals = base
        .checked_add(callee.code.max_locals)
        .ok_or(Error::LimitExceeded(Limit::MaxLocals))?;
    let site_length = caller_instructions
        .iter()
        .find(|(offset, _, _)| offset.0 == call_site)
        .map(|(_, _, length)| *length)
        .ok_or_else(|| Error::malformed(call_site, MalformedKind::NotAnInstructionBoundary))?;
    let after_site = SpliceLabel::Caller(Offset(call_site + site_length));

    let mut splicer = Splicer { constants, callee };
    let mut items: Vec<Item<SpliceLabel>> =
        Vec::with_capacity(caller_instructions.len() + callee.instructions.len() + 16);
    for (offset, instruction, _) in caller_instructions {
        items.push(Item::Label(SpliceLabel::Caller(*offset)));
        if offset.0 == call_site {
            splicer.inline_block(&mut items, base, after_site)?;
        } else {
            let instruction = instruction.map_labels(|target| SpliceLabel::Caller(*target));
            items.push(Item::Instruction(instruction));
        }
    }
    items.push(Item::Label(SpliceLabel::Caller(Offset(caller.len()))));

    let assembled = assemble(&items)?;
    let at = |label: SpliceLabel| resolve(&assembled, label);
    let block_start = at(SpliceLabel::Caller(Offset(call_site)))?;
    let block_end = at(after_site)?;

    // Exception handlers
    let mut exception_table =
        Vec::with_capacity(caller.exception_table.len() + callee.code.exception_table.len());
    for handler in &caller.exception_table {
        exception_table.push(ExceptionHandler {
            start_pc: at(SpliceLabel::Caller(Offset(handler.start_pc as usize)))?,
            end_pc: at(SpliceLabel::Caller(Offset(handler.end_pc as usize)))?,
            handler_pc: at(SpliceLabel::Caller(Offset(handler.handler_pc as usize)))?,
            catch_type: handler.catch_type,
        });
    }
    let mut callee_handlers = Vec::with_capacity(callee.code.exception_table.len());
    for handler in &callee.code.exception_table {
        let catch_type = match handler.catch_type {
            Some(ClassConstantIndex(index)) => Some(ClassConstantIndex(splicer.import(index)?)),
            None => None,
        };
        callee_handlers.push(ExceptionHandler {
            start_pc: at(SpliceLabel::Callee(Offset(handler.start_pc as usize)))?,
            end_pc: at(SpliceLabel::Callee(Offset(handler.end_pc as usize)))?,
            handler_pc: at(SpliceLabel::Callee(Offset(handler.handler_pc as usize)))?,
            catch_type,
        });
    }

    // Callee handlers take precedence over caller handlers around the call site
    let insert_at = caller
        .exception_table
        .iter()
        .position(|handler| handler.covers(call_site))
        .unwrap_or(exception_table.len());
    let outer_handlers = exception_table.split_off(insert_at);
    exception_table.extend(callee_handlers);
    exception_table.extend(outer_handlers);
    exception_table.retain(|handler| handler.start_pc < handler.end_pc);

    // Line numbers
    let line_numbers = match (&caller.line_numbers, &callee.code.line_numbers) {
        (None, None) => None,
        (caller_lines, callee_lines) => {
            let mut lines = vec![];
            for line in caller_lines.iter().flatten() {
                lines.push(LineNumber {
                    start_pc: at(SpliceLabel::Caller(Offset(line.start_pc as usize)))?,
                    line_number: line.line_number,
                    source: line.source.clone(),
                });
            }

            let mut inlined_lines = false;
            for line in callee_lines.iter().flatten() {
                let start_pc = at(SpliceLabel::Callee(Offset(line.start_pc as usize)))?;

                // Only possible for a dropped trailing return
                if start_pc >= block_end {
                    continue;
                }
                inlined_lines = true;
                lines.push(LineNumber {
                    start_pc,
                    line_number: line.line_number,
                    source: Some(line.source.clone().unwrap_or_else(|| callee.source.clone())),
                });
            }

            // Code after the block is back to the line of the call
            if let Some(resumed) = caller.line_at(call_site) {
                let restarts = caller_lines
                    .iter()
                    .flatten()
                    .any(|line| line.start_pc as usize == call_site + site_length);
                if inlined_lines && !restarts && (block_end as usize) < assembled.code.len() {
                    lines.push(LineNumber {
                        start_pc: block_end,
                        line_number: resumed.line_number,
                        source: resumed.source.clone(),
                    });
                }
            }

            lines.sort_by_key(|line| line.start_pc);
            Some(lines)
        }
    };

    // Local variables
    let local_variables = match (&caller.local_variables, &callee.code.local_variables) {
        (None, None) => None,
        (caller_locals, callee_locals) => {
            let mut locals = vec![];
            for local in caller_locals.iter().flatten() {
                let start = local.start_pc as usize;
                let start_pc = at(SpliceLabel::Caller(Offset(start)))?;
                let end_pc = at(SpliceLabel::Caller(Offset(start + local.length as usize)))?;
                locals.push(LocalVariable {
                    start_pc,
                    length: end_pc - start_pc,
                    ..local.clone()
                });
            }
            for local in callee_locals.iter().flatten() {
                let start = local.start_pc as usize;
                let start_pc = at(SpliceLabel::Callee(Offset(start)))?;
                let end_pc = at(SpliceLabel::Callee(Offset(start + local.length as usize)))?;
                let slot = local
                    .slot
                    .checked_add(base)
                    .ok_or(Error::LimitExceeded(Limit::MaxLocals))?;
                locals.push(LocalVariable {
                    start_pc,
                    length: end_pc - start_pc,
                    slot,
                    name_index: splicer.import_utf8(local.name_index)?,
                    descriptor_index: splicer.import_utf8(local.descriptor_index)?,
                });
            }
            locals.sort_by_key(|local| local.start_pc);
            Some(locals)
        }
    };

    Ok(Spliced {
        code: CodeAttribute {
            max_stack,
            max_locals,
            code: assembled.code,
            exception_table,
            line_numbers,
            local_variables,
        },
        block_start: block_start as usize,
        block_end: block_end as usize,
    })
}

impl<'a, 'b> Splicer<'a, 'b> {
    /// Emit the argument stores, the receiver null check, and the adapted callee body
    fn inline_block(
        &mut self,
        items: &mut Vec<Item<SpliceLabel>>,
        base: u16,
        after_site: SpliceLabel,
    ) -> Result<(), Error> {
        let callee = self.callee;
        let slot = |slot: usize| -> Result<u16, Error> {
            u16::try_from(slot).map_err(|_| Error::LimitExceeded(Limit::MaxLocals))
        };

        // Arguments are on the stack in order, so they get popped into their slots last to first
        let mut next_slot = base as usize + if callee.is_static { 0 } else { 1 };
        let mut parameter_slots = Vec::with_capacity(callee.descriptor.parameters.len());
        for parameter in &callee.descriptor.parameters {
            parameter_slots.push(slot(next_slot)?);
            next_slot += parameter.width();
        }
        for (parameter, slot) in callee.descriptor.parameters.iter().zip(&parameter_slots).rev() {
            let store = Instruction::Local(LocalOp::store_for(parameter), *slot);
            items.push(Item::Instruction(store));
        }

        // Invoking a method on `null` throws, whether or not the body uses the receiver
        if !callee.is_static {
            items.push(Item::Instruction(Instruction::Simple(DUP)));
            items.push(Item::Instruction(Instruction::Branch(IFNONNULL, SpliceLabel::NullChecked)));
            items.push(Item::Instruction(Instruction::Simple(ACONST_NULL)));
            items.push(Item::Instruction(Instruction::Simple(ATHROW)));
            items.push(Item::Label(SpliceLabel::NullChecked));
            items.push(Item::Instruction(Instruction::Local(LocalOp::AStore, base)));
        }

        let callee_end = callee.code.len();
        for (offset, instruction, length) in callee.instructions {
            items.push(Item::Label(SpliceLabel::Callee(*offset)));
            if instruction.is_return() {
                // Trailing return just falls through to the code after the block
                if offset.0 + length < callee_end {
                    items.push(Item::Instruction(Instruction::Branch(GOTO, after_site)));
                }
                continue;
            }

            let mut rewritten = instruction.map_labels(|target| SpliceLabel::Callee(*target));
            if let Some((local, _)) = rewritten.local_slot() {
                let shifted = slot(local as usize + base as usize)?;
                rewritten = rewritten.map_slot(|_| shifted);
            }
            if let Some(index) = rewritten.constant_index() {
                rewritten = rewritten.with_constant_index(self.import(index)?);
            }
            items.push(Item::Instruction(rewritten));
        }
        items.push(Item::Label(SpliceLabel::Callee(Offset(callee_end))));
        Ok(())
    }
}

fn resolve(assembled: &Assembled<SpliceLabel>, label: SpliceLabel) -> Result<u16, Error> {
    let offset = assembled
        .offset_of(&label)
        .ok_or_else(|| Error::malformed(0, MalformedKind::UnplacedLabel))?;
    u16::try_from(offset.0).map_err(|_| Error::LimitExceeded(Limit::CodeLength))
}
