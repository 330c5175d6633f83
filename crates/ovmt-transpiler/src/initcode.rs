// SPDX-License-Identifier: AGPL-3.0

//! Init code layout and CODECOPY offset relocation.
//!
//! Compiled init code is laid out as constructor logic, then the deployed
//! body, then constants only the constructor reads. Constructor arguments are
//! appended after all of it at deployment time. Code reaches into this layout
//! with CODECOPY, using offsets and lengths pushed as literals; once sections
//! are rewritten those literals are stale. The PUSHes feeding a CODECOPY are
//! recognised by the patterns compilers emit and tagged, and their operands
//! are rewritten after transpilation.

use ovmt_exceptions::{TranspilationError, TranspilationErrorKind};
use ovmt_opcodes::{Bytecode, Instruction, Located, Opcode};
use std::collections::BTreeMap;
use tracing::debug;

/// What a tagged PUSH operand points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeTag {
    /// Offset of a CODECOPY'd constant; holds the constant's bytes so its new
    /// position can be searched for
    ConstantOffset(Vec<u8>),
    /// Length of the deployed body
    DeployedLength,
    /// Offset of the deployed body, which is the constructor's length
    DeployedOffset,
    /// Offset of the constructor arguments, which is the whole init code's length
    ConstructorInputsOffset,
}

/// Tags keyed by the byte offset of the tagged PUSH
pub type CodeTags = BTreeMap<usize, CodeTag>;

/// A tagged PUSH in transpiled code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Instruction position in the transpiled sequence
    pub position: usize,
    /// Byte offset of the PUSH in the original input
    pub index: usize,
    pub tag: CodeTag,
}

/// Byte lengths of the transpiled init code sections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub constructor: usize,
    pub deployed: usize,
    pub constants: usize,
}

impl Layout {
    pub fn total(&self) -> usize {
        self.constructor + self.deployed + self.constants
    }
}

/// Start of the first occurrence of `needle` in `haystack`
pub fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A PUSH operand as an offset, if it fits
fn operand_value(instruction: &Instruction) -> Option<usize> {
    let operand = instruction.operand();
    let first = operand.iter().position(|b| *b != 0).unwrap_or(operand.len());
    let significant = &operand[first..];
    if significant.len() > std::mem::size_of::<usize>() {
        return None;
    }
    Some(significant.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize))
}

fn is_push(located: &Located) -> bool {
    located.instruction.opcode.is_push()
}

fn opcode_at(window: &[Located], i: usize) -> Opcode {
    window[i].instruction.opcode
}

fn out_of_bounds(index: usize, message: String) -> TranspilationError {
    TranspilationError::new(index, TranspilationErrorKind::DetectedConstantOob, message)
}

/// `PUSH offset, PUSH length, _, CODECOPY`: a constant copied out of `code`.
///
/// `base` is the byte offset of `instructions` within the input, for error
/// indices. A pattern that reads past the end of `code` is an error.
pub fn tag_constants(
    instructions: &[Located],
    code: &[u8],
    base: usize,
    tags: &mut CodeTags,
    errors: &mut Vec<TranspilationError>,
) {
    for window in instructions.windows(4) {
        if !(is_push(&window[0]) && is_push(&window[1]) && opcode_at(window, 3) == Opcode::CODECOPY) {
            continue;
        }
        let index = window[0].index;
        let range = operand_value(&window[0].instruction)
            .zip(operand_value(&window[1].instruction))
            .and_then(|(offset, length)| Some(offset..offset.checked_add(length)?))
            .filter(|range| range.end <= code.len());
        match range {
            Some(range) => {
                debug!(
                    "CODECOPY of constant 0x{} at pc 0x{:x}",
                    hex::encode(&code[range.clone()]),
                    index
                );
                tags.insert(index, CodeTag::ConstantOffset(code[range].to_vec()));
            }
            None => errors.push(out_of_bounds(
                base + index,
                format!(
                    "CODECOPY(constant) pattern at pc 0x{:x} reads past the end of the {} byte code",
                    index,
                    code.len()
                ),
            )),
        }
    }
}

/// `PUSH total, CODESIZE, SUB, _, PUSH total, _, CODECOPY`: constructor
/// arguments copied from the end of the init code, whose original length is
/// `total`.
pub fn tag_constructor_inputs(
    instructions: &[Located],
    total: usize,
    tags: &mut CodeTags,
    errors: &mut Vec<TranspilationError>,
) {
    for window in instructions.windows(7) {
        if !(is_push(&window[0])
            && opcode_at(window, 1) == Opcode::CODESIZE
            && opcode_at(window, 2) == Opcode::SUB
            && is_push(&window[4])
            && opcode_at(window, 6) == Opcode::CODECOPY)
        {
            continue;
        }
        let pushed = operand_value(&window[0].instruction);
        if pushed != Some(total) {
            errors.push(out_of_bounds(
                window[0].index,
                format!(
                    "CODECOPY(constructor arguments) pattern at pc 0x{:x} pushes {}, but the init code is 0x{:x} bytes",
                    window[0].index,
                    hex::encode(window[0].instruction.operand()),
                    total
                ),
            ));
        }
        debug!("CODECOPY of constructor arguments at pc 0x{:x}", window[0].index);
        tags.insert(window[0].index, CodeTag::ConstructorInputsOffset);
        tags.insert(window[4].index, CodeTag::ConstructorInputsOffset);
    }
}

/// The CODECOPY that copies the deployed body out for RETURN.
///
/// Contracts use `PUSH len, DUP1, PUSH offset, PUSH dest, CODECOPY, PUSH 0, RETURN`;
/// libraries use `PUSH len, PUSH offset, PUSH dest, DUP3, DUP3, DUP3, CODECOPY`.
pub fn tag_deployed_returner(instructions: &[Located], tags: &mut CodeTags) {
    for window in instructions.windows(7) {
        let (length, offset) = if is_push(&window[0])
            && is_push(&window[2])
            && opcode_at(window, 4) == Opcode::CODECOPY
            && opcode_at(window, 6) == Opcode::RETURN
        {
            (&window[0], &window[2])
        } else if is_push(&window[0])
            && is_push(&window[1])
            && is_push(&window[2])
            && opcode_at(window, 6) == Opcode::CODECOPY
        {
            (&window[0], &window[1])
        } else {
            continue;
        };
        debug!("CODECOPY of the deployed body at pc 0x{:x}", length.index);
        tags.insert(length.index, CodeTag::DeployedLength);
        tags.insert(offset.index, CodeTag::DeployedOffset);
    }
}

/// Overwrite a tagged PUSH operand with `value`, keeping the PUSH width
fn patch(code: &mut Bytecode, relocation: &Relocation, value: usize) -> Result<(), TranspilationError> {
    let instruction = &mut code[relocation.position];
    let width = instruction.opcode.operand_width();
    let bytes = value.to_be_bytes();
    let significant = bytes.len() - value.leading_zeros() as usize / 8;
    if significant > width {
        return Err(out_of_bounds(
            relocation.index,
            format!(
                "relocated offset 0x{:x} does not fit in {} at pc 0x{:x}",
                value, instruction.opcode, relocation.index
            ),
        ));
    }
    let mut operand = vec![0u8; width];
    operand[width - significant..].copy_from_slice(&bytes[bytes.len() - significant..]);
    instruction.consumed_bytes = Some(operand);
    Ok(())
}

/// Rewrite the constant offsets among `relocations` to where each constant
/// now sits in `haystack`.
pub fn relocate_constants(
    code: &mut Bytecode,
    relocations: &[Relocation],
    haystack: &[u8],
    errors: &mut Vec<TranspilationError>,
) {
    for relocation in relocations {
        let CodeTag::ConstantOffset(constant) = &relocation.tag else {
            continue;
        };
        let result = match find_subslice(haystack, constant) {
            Some(offset) => patch(code, relocation, offset),
            None => Err(TranspilationError::new(
                relocation.index,
                TranspilationErrorKind::MissingConstant,
                format!(
                    "constant 0x{} copied at pc 0x{:x} is not in the transpiled code",
                    hex::encode(constant),
                    relocation.index
                ),
            )),
        };
        if let Err(err) = result {
            errors.push(err);
        }
    }
}

/// Rewrite the section lengths and offsets among `relocations` for `layout`
pub fn relocate_sections(
    code: &mut Bytecode,
    relocations: &[Relocation],
    layout: Layout,
    errors: &mut Vec<TranspilationError>,
) {
    for relocation in relocations {
        let value = match relocation.tag {
            CodeTag::ConstantOffset(_) => continue,
            CodeTag::DeployedLength => layout.deployed,
            CodeTag::DeployedOffset => layout.constructor,
            CodeTag::ConstructorInputsOffset => layout.total(),
        };
        if let Err(err) = patch(code, relocation, value) {
            errors.push(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovmt_opcodes::{disassemble, encode, parse_program};

    fn located(source: &str) -> Vec<Located> {
        disassemble(&encode(&parse_program(source).unwrap())).instructions
    }

    #[test]
    fn test_find_subslice() {
        assert_eq!(find_subslice(&[1, 2, 3, 2, 3], &[2, 3]), Some(1));
        assert_eq!(find_subslice(&[1, 2, 3], &[4]), None);
        assert_eq!(find_subslice(&[1, 2, 3], &[]), Some(0));
        assert_eq!(find_subslice(&[1], &[1, 2]), None);
    }

    #[test]
    fn test_constant_is_tagged_with_its_bytes() {
        let code = encode(
            &parse_program(
                "PUSH1 0x20
                 PUSH1 0x0a
                 PUSH1 0x02
                 SWAP2
                 CODECOPY
                 STOP
                 PUSH2 0xbeef",
            )
            .unwrap(),
        );
        let mut tags = CodeTags::new();
        let mut errors = Vec::new();
        tag_constants(&disassemble(&code).instructions, &code, 0, &mut tags, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(tags.get(&2), Some(&CodeTag::ConstantOffset(vec![0xbe, 0xef])));
    }

    #[test]
    fn test_constant_past_the_end_is_an_error() {
        let instructions = located(
            "PUSH1 0x20
             PUSH1 0xf0
             PUSH1 0x20
             SWAP2
             CODECOPY",
        );
        let mut tags = CodeTags::new();
        let mut errors = Vec::new();
        tag_constants(&instructions, &[0u8; 9], 100, &mut tags, &mut errors);
        assert!(tags.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, 102);
        assert_eq!(errors[0].kind, TranspilationErrorKind::DetectedConstantOob);
    }

    #[test]
    fn test_contract_and_library_returners() {
        let contract = located(
            "PUSH2 0x0100
             DUP1
             PUSH2 0x0020
             PUSH1 0x00
             CODECOPY
             PUSH1 0x00
             RETURN",
        );
        let mut tags = CodeTags::new();
        tag_deployed_returner(&contract, &mut tags);
        assert_eq!(tags.get(&0), Some(&CodeTag::DeployedLength));
        assert_eq!(tags.get(&4), Some(&CodeTag::DeployedOffset));

        let library = located(
            "PUSH2 0x0100
             PUSH2 0x0020
             PUSH1 0x00
             DUP3
             DUP3
             DUP3
             CODECOPY",
        );
        let mut tags = CodeTags::new();
        tag_deployed_returner(&library, &mut tags);
        assert_eq!(tags.get(&0), Some(&CodeTag::DeployedLength));
        assert_eq!(tags.get(&3), Some(&CodeTag::DeployedOffset));
    }

    #[test]
    fn test_constructor_inputs_length_is_checked() {
        let source = "PUSH2 0x0140
             CODESIZE
             SUB
             DUP1
             PUSH2 0x0140
             DUP4
             CODECOPY";
        let mut tags = CodeTags::new();
        let mut errors = Vec::new();
        tag_constructor_inputs(&located(source), 0x140, &mut tags, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(tags.get(&0), Some(&CodeTag::ConstructorInputsOffset));
        assert_eq!(tags.get(&6), Some(&CodeTag::ConstructorInputsOffset));

        let mut errors = Vec::new();
        tag_constructor_inputs(&located(source), 0x141, &mut CodeTags::new(), &mut errors);
        assert_eq!(errors[0].kind, TranspilationErrorKind::DetectedConstantOob);
    }

    #[test]
    fn test_relocation_keeps_push_width() {
        let mut code = parse_program("PUSH2 0x0001\nPUSH1 0x05\nPUSH1 0x07").unwrap();
        let relocations = vec![
            Relocation {
                position: 0,
                index: 0,
                tag: CodeTag::ConstructorInputsOffset,
            },
            Relocation {
                position: 1,
                index: 3,
                tag: CodeTag::DeployedLength,
            },
            Relocation {
                position: 2,
                index: 5,
                tag: CodeTag::DeployedOffset,
            },
        ];
        let layout = Layout {
            constructor: 0x30,
            deployed: 0x1ff,
            constants: 2,
        };
        let mut errors = Vec::new();
        relocate_sections(&mut code, &relocations, layout, &mut errors);

        assert_eq!(code[0].operand(), &[0x02, 0x31]);
        assert_eq!(code[2].operand(), &[0x30]);
        // 0x1ff does not fit in PUSH1: reported, operand untouched
        assert_eq!(code[1].operand(), &[0x05]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, 3);
        assert_eq!(errors[0].kind, TranspilationErrorKind::DetectedConstantOob);
    }

    #[test]
    fn test_missing_constant() {
        let mut code = parse_program("PUSH1 0x00").unwrap();
        let relocations = vec![Relocation {
            position: 0,
            index: 9,
            tag: CodeTag::ConstantOffset(vec![0xaa, 0xbb]),
        }];
        let mut errors = Vec::new();
        relocate_constants(&mut code, &relocations, &[0x00, 0xaa, 0xbb], &mut errors);
        assert_eq!(code[0].operand(), &[0x01]);
        assert!(errors.is_empty());

        relocate_constants(&mut code, &relocations, &[0xbb, 0xaa], &mut errors);
        assert_eq!(errors[0].kind, TranspilationErrorKind::MissingConstant);
        assert_eq!(errors[0].index, 9);
    }
}
