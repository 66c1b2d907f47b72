use std::collections::BTreeSet;

use anyhow::Result;

use crate::classfile::code::ExceptionEntry;
use crate::decode::branch_labels;
use crate::ir::{BasicBlock, ControlFlowGraph, EdgeKind, FlowEdge, Insn, Instruction};
use crate::opcodes;

/// Build a control flow graph from decoded bytecode instructions.
pub(crate) fn build_cfg(
    code_len: u32,
    instructions: &[Instruction],
    handlers: &[ExceptionEntry],
) -> Result<ControlFlowGraph> {
    let mut leaders = BTreeSet::new();
    let mut frame_offsets = BTreeSet::new();
    leaders.insert(0u32);
    for handler in handlers {
        leaders.insert(handler.handler_pc as u32);
        frame_offsets.insert(handler.handler_pc as u32);
    }
    for (index, inst) in instructions.iter().enumerate() {
        let next = instructions
            .get(index + 1)
            .map(|next| next.offset)
            .unwrap_or(code_len);
        let targets = branch_targets(inst);
        if !targets.is_empty() {
            for target in targets {
                if target >= code_len {
                    anyhow::bail!("branch at {} targets {} past end of code", inst.offset, target);
                }
                leaders.insert(target);
                frame_offsets.insert(target);
            }
            leaders.insert(next);
        }
        if is_exit(inst) || is_unconditional_branch(inst.opcode) {
            leaders.insert(next);
            frame_offsets.insert(next);
        }
    }

    let mut leader_list: Vec<u32> = leaders.into_iter().collect();
    leader_list.retain(|offset| *offset < code_len);

    let mut blocks = Vec::new();
    for (index, start) in leader_list.iter().copied().enumerate() {
        let end = leader_list.get(index + 1).copied().unwrap_or(code_len);
        let block_instructions: Vec<Instruction> = instructions
            .iter()
            .filter(|inst| inst.offset >= start && inst.offset < end)
            .cloned()
            .collect();
        if block_instructions.first().map(|inst| inst.offset) != Some(start) {
            anyhow::bail!("block boundary {} is not an instruction start", start);
        }
        blocks.push(BasicBlock {
            start_offset: start,
            end_offset: end,
            instructions: block_instructions,
            needs_frame: frame_offsets.contains(&start),
        });
    }

    let mut edges = Vec::new();
    for block in &blocks {
        let Some(last_inst) = block.instructions.last() else {
            continue;
        };
        let targets = branch_targets(last_inst);
        for target in &targets {
            edges.push(FlowEdge {
                from: block.start_offset,
                to: *target,
                kind: EdgeKind::Branch,
            });
        }
        if !is_exit(last_inst) && !is_unconditional_branch(last_inst.opcode) {
            if let Some(next) = next_block_start(&blocks, block.end_offset) {
                edges.push(FlowEdge {
                    from: block.start_offset,
                    to: next,
                    kind: EdgeKind::FallThrough,
                });
            }
        }
        for handler in handlers {
            let start = handler.start_pc as u32;
            let end = handler.end_pc as u32;
            if block.start_offset < end && start < block.end_offset {
                edges.push(FlowEdge {
                    from: block.start_offset,
                    to: handler.handler_pc as u32,
                    kind: EdgeKind::Exception,
                });
            }
        }
    }

    Ok(ControlFlowGraph { blocks, edges })
}

fn next_block_start(blocks: &[BasicBlock], offset: u32) -> Option<u32> {
    blocks
        .iter()
        .find(|block| block.start_offset == offset)
        .map(|block| block.start_offset)
}

/// Returns, `athrow` and switches never fall through.
fn is_exit(inst: &Instruction) -> bool {
    match &inst.insn {
        Insn::Simple(opcode) => opcodes::is_return(*opcode) || *opcode == opcodes::ATHROW,
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => true,
        Insn::Var { opcode, .. } => *opcode == opcodes::RET,
        _ => false,
    }
}

fn is_unconditional_branch(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::GOTO | opcodes::JSR | opcodes::GOTO_W | opcodes::JSR_W
    )
}

fn branch_targets(inst: &Instruction) -> Vec<u32> {
    branch_labels(&inst.insn)
        .into_iter()
        .map(|label| label.0)
        .collect()
}
