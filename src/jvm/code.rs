use super::{decode_code, ClassConstantIndex, Error, Instruction, Utf8ConstantIndex};
use crate::util::Offset;
use std::collections::HashSet;

/// Body of a method, along with the tables that refer to offsets in it
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.3
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,

    /// Handlers, in the order in which the JVM searches them
    pub exception_table: Vec<ExceptionHandler>,

    /// `LineNumberTable`, sorted by start offset
    pub line_numbers: Option<Vec<LineNumber>>,

    /// `LocalVariableTable`, sorted by start offset
    pub local_variables: Option<Vec<LocalVariable>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of exception handler range (inclusive)
    pub start_pc: u16,

    /// End of exception handler range (exclusive)
    pub end_pc: u16,

    /// Start of the exception handler
    pub handler_pc: u16,

    /// `None` catches everything (eg. for `finally` blocks)
    pub catch_type: Option<ClassConstantIndex>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line_number: u16,

    /// Method the line originally came from, when it was inlined from elsewhere
    pub source: Option<LineSource>,
}

/// Identity of the method some code was originally written in
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LineSource {
    pub class_name: String,
    pub method_name: String,
    pub descriptor: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub slot: u16,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
}

impl ExceptionHandler {
    pub fn covers(&self, offset: usize) -> bool {
        (self.start_pc as usize) <= offset && offset < (self.end_pc as usize)
    }
}

impl CodeAttribute {
    /// Code attribute with no exception handlers or debug tables
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> CodeAttribute {
        CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table: vec![],
            line_numbers: None,
            local_variables: None,
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Decode every instruction in the code array
    pub fn instructions(&self) -> Result<Vec<(Offset, Instruction<Offset>, usize)>, Error> {
        decode_code(&self.code)
    }

    /// Line number in effect at an offset
    pub fn line_at(&self, offset: usize) -> Option<&LineNumber> {
        self.line_numbers
            .as_ref()?
            .iter()
            .take_while(|line| (line.start_pc as usize) <= offset)
            .last()
    }

    /// Check the structural invariants that every transformation must preserve
    ///
    /// The returned message describes the first violation found.
    pub fn check_consistency(&self) -> Result<(), String> {
        let len = self.code.len();
        if len == 0 || len > u16::MAX as usize {
            return Err(format!("code length {} out of range", len));
        }

        let instructions =
            decode_code(&self.code).map_err(|err| format!("undecodable code: {:?}", err))?;
        let boundaries: HashSet<usize> =
            instructions.iter().map(|(offset, _, _)| offset.0).collect();
        let is_boundary = |offset: usize| boundaries.contains(&offset);
        let is_boundary_or_end = |offset: usize| offset == len || boundaries.contains(&offset);

        for (offset, instruction, _) in &instructions {
            for target in instruction.jump_targets() {
                if !is_boundary(target.0) {
                    return Err(format!("jump at {} to non-boundary offset {}", offset.0, target.0));
                }
            }
        }

        for (idx, handler) in self.exception_table.iter().enumerate() {
            let (start, end, pc) = (
                handler.start_pc as usize,
                handler.end_pc as usize,
                handler.handler_pc as usize,
            );
            if !(start < end && end <= len && pc < len) {
                return Err(format!("exception entry {} out of bounds: {:?}", idx, handler));
            }
            if !(is_boundary(start) && is_boundary_or_end(end) && is_boundary(pc)) {
                return Err(format!(
                    "exception entry {} off instruction boundary: {:?}",
                    idx, handler
                ));
            }
        }

        if let Some(lines) = &self.line_numbers {
            for (idx, line) in lines.iter().enumerate() {
                if !is_boundary(line.start_pc as usize) {
                    return Err(format!("line entry {} off instruction boundary: {:?}", idx, line));
                }
            }
            if lines.windows(2).any(|pair| pair[0].start_pc > pair[1].start_pc) {
                return Err("line number table is not sorted".to_owned());
            }
        }

        if let Some(locals) = &self.local_variables {
            for (idx, local) in locals.iter().enumerate() {
                let start = local.start_pc as usize;
                let end = start + local.length as usize;
                if !(is_boundary(start) && is_boundary_or_end(end)) {
                    return Err(format!("local variable entry {} out of bounds: {:?}", idx, local));
                }
                if local.slot >= self.max_locals {
                    return Err(format!("local variable entry {} uses slot past max_locals", idx));
                }
            }
            if locals.windows(2).any(|pair| pair[0].start_pc > pair[1].start_pc) {
                return Err("local variable table is not sorted".to_owned());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::opcodes::*;

    fn sample() -> CodeAttribute {
        // 0: iload_0, 1: ifeq 5, 4: return, 5: return
        let mut code = CodeAttribute::new(1, 1, vec![ILOAD_0, IFEQ, 0, 4, RETURN, RETURN]);
        code.line_numbers = Some(vec![
            LineNumber {
                start_pc: 0,
                line_number: 10,
                source: None,
            },
            LineNumber {
                start_pc: 4,
                line_number: 11,
                source: None,
            },
        ]);
        code
    }

    #[test]
    fn consistent_code() {
        let code = sample();
        assert_eq!(code.check_consistency(), Ok(()));
        assert_eq!(code.line_at(3).map(|line| line.line_number), Some(10));
        assert_eq!(code.line_at(5).map(|line| line.line_number), Some(11));
    }

    #[test]
    fn detect_unsorted_lines() {
        let mut code = sample();
        if let Some(lines) = code.line_numbers.as_mut() {
            lines.swap(0, 1);
        }
        assert!(code.check_consistency().is_err());
    }

    #[test]
    fn detect_bad_exception_range() {
        let mut code = sample();
        code.exception_table.push(ExceptionHandler {
            start_pc: 2,
            end_pc: 4,
            handler_pc: 5,
            catch_type: None,
        });
        assert!(code.check_consistency().is_err());

        code.exception_table[0].start_pc = 4;
        assert!(code.check_consistency().is_err());

        code.exception_table[0].end_pc = 6;
        assert_eq!(code.check_consistency(), Ok(()));
    }
}
