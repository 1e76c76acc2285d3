//! Control-flow graph construction.
//!
//! Partitions an instruction stream into basic blocks at every branch target
//! and after every branch or unconditional exit, then records successor
//! edges. Construction fails (malformed control flow) when a branch targets
//! an out-of-range offset or when some path can fall off the end of the
//! code.

use smallvec::SmallVec;
use verifier_types::{CodeOffset, Instruction};

pub(crate) type BlockId = usize;

#[derive(Debug)]
pub(crate) struct BasicBlock {
    /// Offset of the first instruction.
    pub start: CodeOffset,
    /// Offset one past the last instruction.
    pub end: CodeOffset,
    pub successors: SmallVec<[BlockId; 2]>,
}

#[derive(Debug)]
pub(crate) struct ControlFlowGraph {
    pub blocks: Vec<BasicBlock>,
}

impl ControlFlowGraph {
    /// Block 0 always starts at offset 0.
    pub const ENTRY: BlockId = 0;

    pub fn build(code: &[Instruction]) -> Result<ControlFlowGraph, String> {
        if code.is_empty() {
            return Err("function has an empty code stream".to_string());
        }
        let len = code.len();
        if !code[len - 1].is_unconditional_exit() {
            return Err(format!(
                "control can fall off the end of the function (offset {} is not a terminator)",
                len - 1
            ));
        }

        let mut leaders: Vec<bool> = vec![false; len];
        leaders[0] = true;
        for (i, instr) in code.iter().enumerate() {
            if let Some(target) = instr.branch_target() {
                if target as usize >= len {
                    return Err(format!(
                        "branch at offset {} targets non-existent offset {}",
                        i, target
                    ));
                }
                leaders[target as usize] = true;
            }
            let splits = instr.branch_target().is_some() || instr.is_unconditional_exit();
            if splits && i + 1 < len {
                leaders[i + 1] = true;
            }
        }

        let starts: Vec<CodeOffset> = leaders
            .iter()
            .enumerate()
            .filter(|(_, l)| **l)
            .map(|(i, _)| i as CodeOffset)
            .collect();
        let block_at = |offset: CodeOffset| -> BlockId {
            // every successor offset is a leader by construction
            starts.binary_search(&offset).unwrap_or_else(|_| {
                debug_assert!(false, "offset {} is not a block leader", offset);
                0
            })
        };

        let mut blocks = Vec::with_capacity(starts.len());
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(len as CodeOffset);
            let last = &code[end as usize - 1];
            let mut successors: SmallVec<[BlockId; 2]> = SmallVec::new();
            match last {
                Instruction::Branch(target) => successors.push(block_at(*target)),
                Instruction::BrTrue(target) | Instruction::BrFalse(target) => {
                    successors.push(block_at(*target));
                    successors.push(block_at(end));
                }
                Instruction::Ret | Instruction::Abort => {}
                _ => successors.push(block_at(end)),
            }
            blocks.push(BasicBlock {
                start,
                end,
                successors,
            });
        }

        Ok(ControlFlowGraph { blocks })
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// The block's instructions paired with their absolute offsets.
    pub fn instructions<'a>(
        &self,
        code: &'a [Instruction],
        id: BlockId,
    ) -> impl Iterator<Item = (CodeOffset, &'a Instruction)> {
        let block = &self.blocks[id];
        let range = block.start as usize..block.end as usize;
        let start = block.start;
        code[range]
            .iter()
            .enumerate()
            .map(move |(i, instr)| (start + i as CodeOffset, instr))
    }
}
