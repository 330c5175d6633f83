// SPDX-License-Identifier: AGPL-3.0

//! The end-to-end pipeline: decode, check the whitelist, substitute, resolve jumps.

use crate::initcode::{
    find_subslice, relocate_constants, relocate_sections, tag_constants, tag_constructor_inputs,
    tag_deployed_returner, CodeTags, Layout, Relocation,
};
use crate::jumps::{resolve_jumps_with_relocations, Segment};
use crate::replacer::OpcodeReplacer;
use crate::whitelist::OpcodeWhitelist;
use ovmt_exceptions::{TranspilationError, TranspilationErrorKind};
use ovmt_opcodes::{bytecode_len, disassemble, encode, Bytecode, Decoder, Instruction, Opcode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Outcome of a transpilation: new bytecode, or every error found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TranspilationResult {
    Success {
        #[serde(with = "hex_bytes")]
        bytecode: Vec<u8>,
    },
    Error {
        errors: Vec<TranspilationError>,
    },
}

impl TranspilationResult {
    fn from_errors(mut errors: Vec<TranspilationError>) -> Self {
        errors.sort_by_key(|err| err.index);
        debug!("transpilation failed with {} errors", errors.len());
        TranspilationResult::Error { errors }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TranspilationResult::Success { .. })
    }

    pub fn bytecode(&self) -> Option<&[u8]> {
        match self {
            TranspilationResult::Success { bytecode } => Some(bytecode),
            TranspilationResult::Error { .. } => None,
        }
    }

    pub fn errors(&self) -> &[TranspilationError] {
        match self {
            TranspilationResult::Success { .. } => &[],
            TranspilationResult::Error { errors } => errors,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone)]
pub struct Transpiler {
    whitelist: OpcodeWhitelist,
    replacer: OpcodeReplacer,
}

impl Transpiler {
    pub fn new(whitelist: OpcodeWhitelist, replacer: OpcodeReplacer) -> Self {
        Self {
            whitelist,
            replacer,
        }
    }

    pub fn whitelist(&self) -> &OpcodeWhitelist {
        &self.whitelist
    }

    pub fn replacer(&self) -> &OpcodeReplacer {
        &self.replacer
    }

    /// Transpile a program. Every byte must decode and be whitelisted.
    pub fn transpile(&self, bytecode: &[u8]) -> TranspilationResult {
        self.run(bytecode, false)
    }

    /// Transpile deployed bytecode. Bytes that cannot execute, those after a
    /// halting instruction (once the program has jumped) up to the next
    /// JUMPDEST, are carried through untouched instead of being checked, so
    /// trailing compiler metadata does not fail the transpilation.
    pub fn transpile_raw_bytecode(&self, bytecode: &[u8]) -> TranspilationResult {
        self.run(bytecode, true)
    }

    fn run(&self, bytecode: &[u8], tolerate_unreachable: bool) -> TranspilationResult {
        match self.assemble(bytecode, tolerate_unreachable, &CodeTags::new()) {
            Ok((code, _)) => {
                let bytecode = encode(&code);
                debug!("transpiled into {} bytes", bytecode.len());
                TranspilationResult::Success { bytecode }
            }
            Err(errors) => TranspilationResult::from_errors(errors),
        }
    }

    /// Transpile init code: constructor logic followed by `deployed`, then
    /// any constants the constructor reads.
    ///
    /// Each section is transpiled on its own, then reassembled. CODECOPYs of
    /// constants, of the deployed body and of the constructor arguments are
    /// recognised and their offsets and lengths rewritten for the new layout.
    /// Error indices refer to `bytecode`.
    pub fn transpile_init_code(&self, bytecode: &[u8], deployed: &[u8]) -> TranspilationResult {
        let start = match find_subslice(bytecode, deployed) {
            Some(start) if !deployed.is_empty() => start,
            _ => {
                return TranspilationResult::from_errors(vec![TranspilationError::new(
                    0,
                    TranspilationErrorKind::MissingDeployedBytecode,
                    format!(
                        "Could not find deployed bytecode (0x{}) within the init code.",
                        hex::encode(deployed)
                    ),
                )])
            }
        };
        let constructor = &bytecode[..start];
        let constants = &bytecode[start + deployed.len()..];
        debug!(
            "init code sections: {} byte constructor, {} byte body, {} bytes of constants",
            constructor.len(),
            deployed.len(),
            constants.len()
        );

        let mut errors = Vec::new();

        let mut body_tags = CodeTags::new();
        let body_instructions = disassemble(deployed).instructions;
        tag_constants(&body_instructions, deployed, start, &mut body_tags, &mut errors);
        let body = self
            .assemble(deployed, true, &body_tags)
            .map_err(|errs| {
                errs.into_iter()
                    .map(|err| TranspilationError { index: err.index + start, ..err })
                    .collect::<Vec<_>>()
            });

        let mut constructor_tags = CodeTags::new();
        let constructor_instructions = disassemble(constructor).instructions;
        tag_constants(&constructor_instructions, bytecode, 0, &mut constructor_tags, &mut errors);
        tag_constructor_inputs(
            &constructor_instructions,
            bytecode.len(),
            &mut constructor_tags,
            &mut errors,
        );
        tag_deployed_returner(&constructor_instructions, &mut constructor_tags);
        let constructor = self.assemble(constructor, true, &constructor_tags);

        let ((mut body, body_relocations), (mut constructor, constructor_relocations)) =
            match (body, constructor) {
                (Ok(body), Ok(constructor)) if errors.is_empty() => (body, constructor),
                (body, constructor) => {
                    errors.extend(body.err().into_iter().flatten());
                    errors.extend(constructor.err().into_iter().flatten());
                    return TranspilationResult::from_errors(errors);
                }
            };

        let body_bytes = encode(&body);
        relocate_constants(&mut body, &body_relocations, &body_bytes, &mut errors);
        let body_bytes = encode(&body);

        let layout = Layout {
            constructor: bytecode_len(&constructor),
            deployed: body_bytes.len(),
            constants: constants.len(),
        };
        relocate_sections(&mut constructor, &constructor_relocations, layout, &mut errors);
        let mut full = encode(&constructor);
        full.extend_from_slice(&body_bytes);
        full.extend_from_slice(constants);
        relocate_constants(&mut constructor, &constructor_relocations, &full, &mut errors);

        if !errors.is_empty() {
            return TranspilationResult::from_errors(errors);
        }
        let mut bytecode = encode(&constructor);
        bytecode.extend_from_slice(&body_bytes);
        bytecode.extend_from_slice(constants);
        debug!("transpiled init code into {} bytes", bytecode.len());
        TranspilationResult::Success { bytecode }
    }

    /// Decode, check and substitute, then resolve jumps. PUSHes at the byte
    /// offsets in `tags` are reported back if they survive unchanged.
    fn assemble(
        &self,
        bytecode: &[u8],
        tolerate_unreachable: bool,
        tags: &CodeTags,
    ) -> Result<(Bytecode, Vec<Relocation>), Vec<TranspilationError>> {
        let mut errors = Vec::new();
        let mut segments = Vec::new();
        let mut reachable = true;
        let mut seen_jump = false;

        for step in Decoder::new(bytecode) {
            match step {
                Ok(located) => {
                    let index = located.index;
                    let instruction = located.instruction;
                    let opcode = instruction.opcode;

                    if !reachable {
                        if opcode != Opcode::JUMPDEST {
                            segments.push(Segment::verbatim(index, instruction));
                            continue;
                        }
                        reachable = true;
                    }

                    if !self.whitelist.is_whitelisted(&opcode) {
                        errors.push(TranspilationError::not_whitelisted(index, opcode.name()));
                        continue;
                    }
                    let segment = match tags.get(&index) {
                        Some(tag) if !self.replacer.has_replacement(opcode) => {
                            Segment::tagged(index, instruction, tag.clone())
                        }
                        _ => Segment::new(index, self.replacer.get_replacement(&instruction)),
                    };
                    segments.push(segment);

                    if tolerate_unreachable {
                        seen_jump |= opcode.is_jump();
                        if seen_jump && opcode.is_halting() {
                            reachable = false;
                        }
                    }
                }
                Err(undecodable) if !reachable => {
                    segments.push(Segment::verbatim(
                        undecodable.index,
                        pad_undecodable(&undecodable.bytes),
                    ));
                }
                Err(undecodable) => errors.push(undecodable.error.into()),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        debug!("rewriting {} instructions", segments.len());
        Ok(resolve_jumps_with_relocations(&segments))
    }
}

/// Unreachable bytes that do not decode: an unknown byte is kept as is, a PUSH
/// cut off by the end of input is zero-padded to its full width.
fn pad_undecodable(bytes: &[u8]) -> Instruction {
    let opcode = Opcode::from_u8(bytes[0]);
    let width = opcode.operand_width();
    if width == 0 {
        return Instruction {
            opcode,
            consumed_bytes: None,
        };
    }
    warn!(
        "zero-padding truncated {} in unreachable code ({} of {} bytes present)",
        opcode,
        bytes.len() - 1,
        width
    );
    let mut operand = bytes[1..].to_vec();
    operand.resize(width, 0);
    Instruction {
        opcode,
        consumed_bytes: Some(operand),
    }
}
