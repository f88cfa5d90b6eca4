//! Program verification pass.
//!
//! Verifies the structural invariants of a lowered program:
//! - Every logical/linear edge has a matching reverse edge
//! - Phi operand counts and ordering match the predecessor list of the
//!   phi's own graph (logical for `p_phi`, linear for `p_linear_phi`)
//! - Phis appear only at the head of a block
//! - Branch instructions target recorded linear successors
//!
//! Used by tests after selection; a failure indicates a pass bug, never a
//! property of the input program.

use super::{BlockId, InstrExtra, Opcode, Program};

/// Verification error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// A successor edge has no matching predecessor edge (or vice versa).
    AsymmetricEdge {
        linear: bool,
        from: BlockId,
        to: BlockId,
    },
    /// A phi's operand count differs from its predecessor count.
    PhiOperandCountMismatch {
        block: BlockId,
        linear: bool,
        operands: usize,
        preds: usize,
    },
    /// A phi appears after a non-phi instruction.
    MisplacedPhi { block: BlockId },
    /// A branch targets a block that is not a linear successor.
    BranchTargetNotSuccessor { block: BlockId, target: BlockId },
    /// An edge references a block index outside the program.
    DanglingEdge { from: BlockId, to: BlockId },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::AsymmetricEdge { linear, from, to } => {
                let graph = if *linear { "linear" } else { "logical" };
                write!(f, "{} edge {} -> {} has no matching reverse edge", graph, from, to)
            }
            VerifyError::PhiOperandCountMismatch {
                block,
                linear,
                operands,
                preds,
            } => {
                let graph = if *linear { "linear" } else { "logical" };
                write!(
                    f,
                    "phi in {} has {} operands but {} {} predecessors",
                    block, operands, preds, graph
                )
            }
            VerifyError::MisplacedPhi { block } => {
                write!(f, "phi after non-phi instruction in {}", block)
            }
            VerifyError::BranchTargetNotSuccessor { block, target } => {
                write!(f, "branch in {} targets {} which is not a linear successor", block, target)
            }
            VerifyError::DanglingEdge { from, to } => {
                write!(f, "edge {} -> {} references a block outside the program", from, to)
            }
        }
    }
}

/// Count occurrences of `needle` in an edge list.
fn edge_count(edges: &[BlockId], needle: BlockId) -> usize {
    edges.iter().filter(|&&e| e == needle).count()
}

fn logical_succs(b: &super::Block) -> &[BlockId] {
    &b.logical_succs
}

fn logical_preds(b: &super::Block) -> &[BlockId] {
    &b.logical_preds
}

fn linear_succs(b: &super::Block) -> &[BlockId] {
    &b.linear_succs
}

fn linear_preds(b: &super::Block) -> &[BlockId] {
    &b.linear_preds
}

/// Check one direction of one graph: every edge out of `from` (per
/// `fwd`) must appear equally often in the reverse list of its target
/// (per `rev`).
#[allow(clippy::too_many_arguments)]
fn check_edges(
    program: &Program,
    from: &super::Block,
    fwd: fn(&super::Block) -> &[BlockId],
    rev: fn(&super::Block) -> &[BlockId],
    linear: bool,
    reversed: bool,
    errors: &mut Vec<VerifyError>,
) {
    let num_blocks = program.blocks.len() as u32;
    for &other in fwd(from) {
        if other.0 >= num_blocks {
            let (f, t) = if reversed { (other, from.id) } else { (from.id, other) };
            errors.push(VerifyError::DanglingEdge { from: f, to: t });
            continue;
        }
        let here = edge_count(fwd(from), other);
        let there = edge_count(rev(program.block(other)), from.id);
        if here != there {
            let (f, t) = if reversed { (other, from.id) } else { (from.id, other) };
            errors.push(VerifyError::AsymmetricEdge {
                linear,
                from: f,
                to: t,
            });
        }
    }
}

/// Verify a lowered program, returning all violations found.
pub fn verify(program: &Program) -> Result<(), Vec<VerifyError>> {
    let mut errors = Vec::new();

    for block in &program.blocks {
        // Edge symmetry, both graphs, both directions.
        check_edges(program, block, logical_succs, logical_preds, false, false, &mut errors);
        check_edges(program, block, logical_preds, logical_succs, false, true, &mut errors);
        check_edges(program, block, linear_succs, linear_preds, true, false, &mut errors);
        check_edges(program, block, linear_preds, linear_succs, true, true, &mut errors);

        // Phi placement and operand alignment.
        let mut seen_non_phi = false;
        for instr in &block.instrs {
            match instr.opcode {
                Opcode::PPhi | Opcode::PLinearPhi => {
                    if seen_non_phi {
                        errors.push(VerifyError::MisplacedPhi { block: block.id });
                    }
                    let linear = instr.opcode == Opcode::PLinearPhi;
                    let preds = if linear {
                        block.linear_preds.len()
                    } else {
                        block.logical_preds.len()
                    };
                    if instr.operands.len() != preds {
                        errors.push(VerifyError::PhiOperandCountMismatch {
                            block: block.id,
                            linear,
                            operands: instr.operands.len(),
                            preds,
                        });
                    }
                }
                _ => seen_non_phi = true,
            }
        }

        // Branch targets must be recorded linear successors.
        for instr in &block.instrs {
            if matches!(instr.opcode, Opcode::PBranch | Opcode::PCbranchZ | Opcode::PCbranchNz) {
                if let InstrExtra::Branch(target) = instr.extra {
                    if edge_count(&block.linear_succs, target) == 0 {
                        errors.push(VerifyError::BranchTargetNotSuccessor {
                            block: block.id,
                            target,
                        });
                    }
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
