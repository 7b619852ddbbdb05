//! Disambiguation of line numbers of inlined code
//!
//! After inlining, a method's line number table mixes lines of its own source with lines from the
//! sources of its callees. Each inlined block of lines is moved to its own range above every line
//! used in the class, so that a stack trace line identifies one block (and the source it came
//! from) unambiguously.

use crate::jvm::{Error, LineNumber, LineSource, ProgramClass};

pub struct LineNumberRangeFinder;

impl LineNumberRangeFinder {
    /// Largest line number in any method of the class (`0` if there are none)
    pub fn find(class: &ProgramClass) -> u16 {
        class
            .methods
            .iter()
            .filter_map(|method| method.code.as_ref()?.line_numbers.as_ref())
            .flatten()
            .map(|line| line.line_number)
            .max()
            .unwrap_or(0)
    }
}

pub struct LineNumberLinearizer;

impl LineNumberLinearizer {
    /// Shift every block of inlined lines in the class into a range of its own
    ///
    /// A block is a maximal run of consecutive table entries with the same source. The `k`-th
    /// inlined block in the class is shifted up by `k * (max + 1)`, where `max` is the largest
    /// line in the class before shifting. Lines native to their method are left alone. A method
    /// whose shifted lines would not fit is left unchanged.
    ///
    /// Returns how many methods had lines shifted.
    pub fn linearize(class: &mut ProgramClass) -> Result<usize, Error> {
        let stride = LineNumberRangeFinder::find(class) as u64 + 1;
        let mut block_count: u64 = 0;
        let mut linearized = 0;

        for method in &mut class.methods {
            let lines = match method.code.as_mut().and_then(|code| code.line_numbers.as_mut()) {
                Some(lines) => lines,
                None => continue,
            };
            match Self::shift_blocks(lines, stride, block_count) {
                Some((shifted, blocks)) if blocks > 0 => {
                    *lines = shifted;
                    block_count += blocks;
                    linearized += 1;
                    log::debug!(
                        "Linearized {} inlined line blocks in {}.{}",
                        blocks,
                        class.name,
                        method.name
                    );
                }
                Some(_) => (),
                None => log::warn!(
                    "Leaving lines of {}.{}{} unchanged: shifted lines would not fit",
                    class.name,
                    method.name,
                    method.descriptor
                ),
            }
        }

        Ok(linearized)
    }

    /// Shifted copy of a line table along with the number of inlined blocks in it
    fn shift_blocks(
        lines: &[LineNumber],
        stride: u64,
        blocks_before: u64,
    ) -> Option<(Vec<LineNumber>, u64)> {
        let mut shifted = Vec::with_capacity(lines.len());
        let mut blocks = 0;
        let mut previous: Option<&Option<LineSource>> = None;

        for line in lines {
            let starts_block = previous != Some(&line.source);
            previous = Some(&line.source);
            if line.source.is_none() {
                shifted.push(line.clone());
                continue;
            }
            if starts_block {
                blocks += 1;
            }

            let shift = (blocks_before + blocks).checked_mul(stride)?;
            let line_number = u16::try_from(line.line_number as u64 + shift).ok()?;
            shifted.push(LineNumber { line_number, ..line.clone() });
        }

        Some((shifted, blocks))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{ClassAccessFlags, CodeAttribute, Method, MethodAccessFlags};

    fn source(method_name: &str) -> Option<LineSource> {
        Some(LineSource {
            class_name: "a/Util".to_owned(),
            method_name: method_name.to_owned(),
            descriptor: "()V".to_owned(),
        })
    }

    fn line(start_pc: u16, line_number: u16, source: Option<LineSource>) -> LineNumber {
        LineNumber {
            start_pc,
            line_number,
            source,
        }
    }

    fn class_with_lines(tables: Vec<Vec<LineNumber>>) -> ProgramClass {
        let mut class = ProgramClass::new("a/A", None, ClassAccessFlags::PUBLIC);
        for (idx, lines) in tables.into_iter().enumerate() {
            let mut code = CodeAttribute::new(0, 0, vec![0; 20]);
            code.line_numbers = Some(lines);
            let name = format!("m{}", idx);
            class.add_method(Method::new(MethodAccessFlags::STATIC, &name, "()V").with_code(code));
        }
        class
    }

    fn lines_of(class: &ProgramClass, method: usize) -> Vec<u16> {
        let lines = class.methods[method].code.as_ref().unwrap().line_numbers.as_ref().unwrap();
        lines.iter().map(|line| line.line_number).collect()
    }

    #[test]
    fn max_line() {
        let class = class_with_lines(vec![vec![line(0, 12, None)], vec![line(0, 30, source("f"))]]);
        assert_eq!(LineNumberRangeFinder::find(&class), 30);
        let empty = ProgramClass::new("a/B", None, ClassAccessFlags::PUBLIC);
        assert_eq!(LineNumberRangeFinder::find(&empty), 0);
    }

    #[test]
    fn blocks_get_separate_ranges() {
        let mut class = class_with_lines(vec![
            vec![
                line(0, 10, None),
                line(2, 3, source("f")),
                line(4, 4, source("f")),
                line(6, 11, None),
                line(8, 3, source("f")),
                line(10, 7, source("g")),
            ],
            vec![line(0, 20, None)],
            vec![line(0, 5, source("g"))],
        ]);
        assert_eq!(LineNumberLinearizer::linearize(&mut class).unwrap(), 2);

        // Largest line is 20, so blocks are shifted by multiples of 21
        assert_eq!(lines_of(&class, 0), vec![10, 24, 25, 11, 45, 70]);
        assert_eq!(lines_of(&class, 1), vec![20]);
        assert_eq!(lines_of(&class, 2), vec![89]);
    }

    #[test]
    fn overflowing_method_is_unchanged() {
        let mut class = class_with_lines(vec![
            vec![line(0, 40000, None), line(2, 30000, source("f"))],
            vec![line(0, 1, source("g"))],
        ]);
        assert_eq!(LineNumberLinearizer::linearize(&mut class).unwrap(), 1);
        assert_eq!(lines_of(&class, 0), vec![40000, 30000]);
        assert_eq!(lines_of(&class, 1), vec![40002]);
    }
}
