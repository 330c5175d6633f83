// SPDX-License-Identifier: AGPL-3.0

//! Jump target resolution.
//!
//! Replacements change instruction lengths, so original jump targets no longer
//! point at the right JUMPDESTs. Every JUMP/JUMPI is redirected to a dispatch
//! footer appended to the program, carrying its original target on the stack
//! as a key. The footer binary-searches the original JUMPDEST offsets and jumps
//! to the matching rewritten JUMPDEST, which pops the key.
//!
//! ```text
//! JUMP      ->  PUSH footer, JUMP
//! JUMPI     ->  SWAP1, PUSH footer, JUMPI, POP
//! JUMPDEST  ->  [PUSH1 0x00,] JUMPDEST, POP
//! ```
//!
//! The `PUSH1 0x00` is emitted where the JUMPDEST can be reached by falling
//! through, so the `POP` is balanced on both paths. A key that matches no
//! original JUMPDEST ends in `INVALID`.

use crate::helpers::{dup_op, op, push_usize, swap_op};
use crate::initcode::{CodeTag, Relocation};
use ovmt_opcodes::{Bytecode, Instruction, Opcode};
use std::collections::BTreeMap;
use tracing::debug;

/// Code emitted for one instruction of the original program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Byte offset of the original instruction
    pub index: usize,
    pub code: Bytecode,
    /// Unreachable bytes carried through untouched
    pub verbatim: bool,
    /// Set on a PUSH whose operand is rewritten after assembly
    pub tag: Option<CodeTag>,
}

impl Segment {
    pub fn new(index: usize, code: Bytecode) -> Self {
        Self {
            index,
            code,
            verbatim: false,
            tag: None,
        }
    }

    pub fn tagged(index: usize, instruction: Instruction, tag: CodeTag) -> Self {
        Self {
            index,
            code: vec![instruction],
            verbatim: false,
            tag: Some(tag),
        }
    }

    pub fn verbatim(index: usize, instruction: Instruction) -> Self {
        Self {
            index,
            code: vec![instruction],
            verbatim: true,
            tag: None,
        }
    }

    /// The opcode of a segment that is a single, rewritable instruction
    fn sole_opcode(&self) -> Option<Opcode> {
        match self.code.as_slice() {
            [insn] if !self.verbatim => Some(insn.opcode),
            _ => None,
        }
    }

    fn falls_through(&self) -> bool {
        !self.verbatim
            && self
                .code
                .last()
                .map_or(true, |insn| !insn.opcode.is_halting())
    }
}

type Label = usize;

#[derive(Debug, Clone)]
enum Item {
    Insn(Instruction),
    /// PUSH of a label's final byte offset
    PushLabel(Label),
    /// A JUMPDEST that defines a label
    Mark(Label),
}

#[derive(Default)]
struct Assembler {
    items: Vec<Item>,
    labels: usize,
    relocations: Vec<Relocation>,
}

impl Assembler {
    fn label(&mut self) -> Label {
        self.labels += 1;
        self.labels - 1
    }

    fn insn(&mut self, instruction: Instruction) {
        self.items.push(Item::Insn(instruction));
    }

    fn op(&mut self, opcode: Opcode) {
        self.insn(op(opcode));
    }

    /// Emit a segment's code, remembering where a tagged PUSH lands
    fn segment(&mut self, segment: &Segment) {
        if let Some(tag) = &segment.tag {
            self.relocations.push(Relocation {
                position: self.items.len(),
                index: segment.index,
                tag: tag.clone(),
            });
        }
        segment.code.iter().cloned().for_each(|insn| self.insn(insn));
    }

    fn push_label(&mut self, label: Label) {
        self.items.push(Item::PushLabel(label));
    }

    fn mark(&mut self, label: Label) {
        self.items.push(Item::Mark(label));
    }

    fn offsets(&self, width: usize) -> (Vec<usize>, usize) {
        let mut offsets = vec![0; self.labels];
        let mut pc = 0;
        for item in &self.items {
            match item {
                Item::Insn(insn) => pc += insn.len(),
                Item::PushLabel(_) => pc += 1 + width,
                Item::Mark(label) => {
                    offsets[*label] = pc;
                    pc += 1;
                }
            }
        }
        (offsets, pc)
    }

    /// Resolve labels with the narrowest PUSH width every offset fits in
    fn finish(self) -> (Bytecode, Vec<Relocation>) {
        let mut width = 1;
        let offsets = loop {
            let (offsets, total) = self.offsets(width);
            if width >= std::mem::size_of::<usize>() || total < 1usize << (8 * width) {
                break offsets;
            }
            width += 1;
        };

        let code = self
            .items
            .into_iter()
            .map(|item| match item {
                Item::Insn(insn) => insn,
                Item::PushLabel(label) => {
                    let bytes = offsets[label].to_be_bytes();
                    Instruction::push_bytes(&bytes[bytes.len() - width..])
                }
                Item::Mark(_) => op(Opcode::JUMPDEST),
            })
            .collect();
        (code, self.relocations)
    }
}

/// Concatenate the segments, rewriting jumps through a dispatch footer.
///
/// A program with no JUMP or JUMPI is returned unchanged: its JUMPDESTs
/// cannot be reached by a jump.
pub fn resolve_jumps(segments: &[Segment]) -> Bytecode {
    resolve_jumps_with_relocations(segments).0
}

/// [`resolve_jumps`], also reporting where each tagged segment ended up
pub fn resolve_jumps_with_relocations(segments: &[Segment]) -> (Bytecode, Vec<Relocation>) {
    let has_jumps = segments
        .iter()
        .any(|segment| segment.sole_opcode().map_or(false, Opcode::is_jump));

    let mut asm = Assembler::default();
    if !has_jumps {
        segments.iter().for_each(|segment| asm.segment(segment));
        return asm.finish();
    }

    let footer = asm.label();
    let mut destinations: BTreeMap<usize, Label> = BTreeMap::new();
    let mut reachable_by_fallthrough = true;
    let mut jump_sites = 0;

    for segment in segments {
        match segment.sole_opcode() {
            Some(Opcode::JUMPDEST) => {
                let label = asm.label();
                destinations.insert(segment.index, label);
                if reachable_by_fallthrough {
                    asm.insn(push_usize(0));
                }
                asm.mark(label);
                asm.op(Opcode::POP);
            }
            Some(Opcode::JUMP) => {
                jump_sites += 1;
                asm.push_label(footer);
                asm.op(Opcode::JUMP);
            }
            Some(Opcode::JUMPI) => {
                jump_sites += 1;
                asm.insn(swap_op(1));
                asm.push_label(footer);
                asm.op(Opcode::JUMPI);
                asm.op(Opcode::POP);
            }
            _ => asm.segment(segment),
        }
        reachable_by_fallthrough = segment.falls_through();
    }

    asm.op(Opcode::STOP);
    asm.mark(footer);
    let entries: Vec<(usize, Label)> = destinations.into_iter().collect();
    emit_dispatch(&mut asm, &entries);

    debug!(
        "resolved {} jump sites against {} jump destinations",
        jump_sites,
        entries.len()
    );
    asm.finish()
}

/// Binary search over `entries` (sorted by original offset) with the key on top of the stack
fn emit_dispatch(asm: &mut Assembler, entries: &[(usize, Label)]) {
    match entries {
        [] => asm.op(Opcode::INVALID),
        [(original, label)] => {
            asm.insn(dup_op(1));
            asm.insn(push_usize(*original));
            asm.op(Opcode::EQ);
            asm.push_label(*label);
            asm.op(Opcode::JUMPI);
            asm.op(Opcode::INVALID);
        }
        _ => {
            let mid = entries.len() / 2;
            let lower = asm.label();
            // key < pivot -> lower half
            asm.insn(dup_op(1));
            asm.insn(push_usize(entries[mid].0));
            asm.op(Opcode::GT);
            asm.push_label(lower);
            asm.op(Opcode::JUMPI);
            emit_dispatch(asm, &entries[mid..]);
            asm.mark(lower);
            emit_dispatch(asm, &entries[..mid]);
        }
    }
}
