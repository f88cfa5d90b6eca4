//! Divergence-aware control-flow construction.
//!
//! Walks the structured control-flow tree of the input and builds the
//! dual-graph block structure:
//! - Uniform conditionals become plain scalar branches present in both
//!   graphs.
//! - Divergent conditionals become an exec-mask dance: the branch block
//!   narrows exec to the then-lanes, an *invert* block (linear-only)
//!   flips the surviving mask to the else-lanes, and the merge block
//!   restores the saved mask. With an empty else the merge still has two
//!   linear predecessors (then-end and invert) but its second logical
//!   predecessor is the branch block itself.
//! - Loops get a preheader, a header carrying the back-edge phis, a
//!   single latch all continue paths funnel through, and an exit block
//!   all breaks target. A whole-wave break branches straight to the
//!   exit; a divergent break only leaves *logically* — its lanes are
//!   parked in a per-loop accumulator mask, erased from the saved masks
//!   of the enclosing ifs, and the emptied wave falls through the
//!   remaining joins in linear order. A divergent break or discard also
//!   forces the latch to test for an all-empty mask and leave early, and
//!   the exit block ors the parked lanes back into exec. Divergent
//!   continues work the same way, except the latch revives their lanes
//!   for the next iteration.
//!
//! Phi operands follow source order (then-value first, else-value second;
//! preheader-value first, back-edge value second) and edges into merge
//! points are pushed in the same order, keeping operands aligned with
//! predecessor lists. Operands for predecessors that never materialized
//! are trimmed.

use log::trace;

use crate::error::Result;
use crate::isa::{BlockId, BlockKind, Definition, Instruction, Opcode, Operand, Temp};
use crate::sir::{CfNode, InstrId, InstrKind, ValueId};
use crate::{bail_internal, err_internal};

use super::values::bool_to_mask;
use super::{select_instr, Context, LoopInfo, PendingPhis};

/// How a structured region ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exit {
    /// Control reaches the end of the region.
    Fallthrough,
    /// The whole wave branched away: a uniform break/continue or a
    /// program termination.
    Jumped,
    /// The region ended under divergence: its lanes were masked off and
    /// the wave itself continues linearly into the enclosing join.
    Masked,
}

fn emit_in(ctx: &mut Context, block: BlockId, instr: Instruction) {
    ctx.program.block_mut(block).instrs.push(instr);
}

fn branch(target: BlockId) -> Instruction {
    Instruction::with_extra(Opcode::PBranch, vec![], vec![], crate::isa::InstrExtra::Branch(target))
}

fn cbranch_z(cond: Operand, target: BlockId) -> Instruction {
    Instruction::with_extra(
        Opcode::PCbranchZ,
        vec![cond],
        vec![],
        crate::isa::InstrExtra::Branch(target),
    )
}

fn mask_or(wave64: bool) -> Opcode {
    if wave64 { Opcode::SOrB64 } else { Opcode::SOrB32 }
}

fn mask_mov(wave64: bool) -> Opcode {
    if wave64 { Opcode::SMovB64 } else { Opcode::SMovB32 }
}

fn mask_zero(wave64: bool) -> Operand {
    if wave64 { Operand::c64(0) } else { Operand::c32(0) }
}

// =============================================================================
// Region walking
// =============================================================================

/// Lower a list of structured nodes into the current block chain.
pub(crate) fn walk_body(ctx: &mut Context, nodes: &[CfNode]) -> Result<Exit> {
    for node in nodes {
        match node {
            CfNode::Block(instrs) => {
                if walk_block(ctx, instrs)? == Exit::Jumped {
                    return Ok(Exit::Jumped);
                }
            }
            CfNode::If {
                cond,
                then_body,
                else_body,
            } => {
                lower_if(ctx, *cond, then_body, else_body)?;
            }
            CfNode::Loop { body } => {
                lower_loop(ctx, body)?;
            }
            CfNode::Break => {
                let masked = lower_break(ctx)?;
                return Ok(if masked { Exit::Masked } else { Exit::Jumped });
            }
            CfNode::Continue => {
                let masked = lower_continue(ctx)?;
                return Ok(if masked { Exit::Masked } else { Exit::Jumped });
            }
        }
    }
    Ok(Exit::Fallthrough)
}

/// Lower one straight-line block node: leading phis against the pending
/// merge info, then ordinary instructions.
fn walk_block(ctx: &mut Context, instrs: &[InstrId]) -> Result<Exit> {
    let mut pending = ctx.pending_phis.take();
    for &id in instrs {
        let instr = ctx.func.instr(id);
        if let InstrKind::Phi { .. } = instr.kind {
            emit_phi(ctx, instr, pending.as_mut())?;
        } else {
            pending = None;
            if select_instr(ctx, instr)? {
                return Ok(Exit::Jumped);
            }
        }
    }
    Ok(Exit::Fallthrough)
}

fn emit_phi(ctx: &mut Context, instr: &crate::sir::Instr, pending: Option<&mut PendingPhis>) -> Result<()> {
    let InstrKind::Phi { srcs } = &instr.kind else {
        bail_internal!("emit_phi on a non-phi");
    };
    let pending = pending.ok_or_else(|| err_internal!("phi outside a merge position"))?;
    if pending.reachable.len() != srcs.len() {
        bail_internal!(
            "phi has {} operands for {} predecessors",
            srcs.len(),
            pending.reachable.len()
        );
    }

    let def = instr.def.ok_or_else(|| err_internal!("phi without a definition"))?;
    let dst = ctx.get_temp(def)?;
    let mut ops = Vec::new();
    for (i, &src) in srcs.iter().enumerate() {
        if pending.reachable[i] {
            ops.push(ctx.get_operand(src));
        }
    }
    // Vector-bank phis merge per-lane values along the logical graph;
    // scalar-bank phis follow actual execution order.
    let opcode = if dst.rc.is_vector() { Opcode::PPhi } else { Opcode::PLinearPhi };
    let phi = Instruction::new(opcode, ops, vec![Definition::Temp(dst)]);

    // Phis go at the block head, ahead of any mask-restore code the
    // merge construction already placed there.
    let block = ctx.program.block_mut(ctx.current);
    block.instrs.insert(pending.insert_at, phi);
    pending.insert_at += 1;
    Ok(())
}

// =============================================================================
// Conditionals
// =============================================================================

fn lower_if(ctx: &mut Context, cond: ValueId, then_body: &[CfNode], else_body: &[CfNode]) -> Result<Exit> {
    if ctx.divergent(cond) {
        lower_divergent_if(ctx, cond, then_body, else_body)
    } else {
        lower_uniform_if(ctx, cond, then_body, else_body)
    }
}

fn lower_uniform_if(ctx: &mut Context, cond: ValueId, then_body: &[CfNode], else_body: &[CfNode]) -> Result<Exit> {
    trace!("uniform if");
    let bb_branch = ctx.current;
    ctx.program.block_mut(bb_branch).kind |= BlockKind::UNIFORM | BlockKind::BRANCH;
    let cond_op = ctx.get_operand(cond);

    let bb_then = ctx.start_block(BlockKind::UNIFORM);
    ctx.program.add_logical_edge(bb_branch, bb_then);
    ctx.program.add_linear_edge(bb_branch, bb_then);
    let exit_then = walk_body(ctx, then_body)?;
    let then_end = ctx.current;

    if else_body.is_empty() {
        let bb_merge = ctx.start_block(BlockKind::UNIFORM | BlockKind::MERGE);
        // Then-path edge first; phi operands are [then-value, else-value].
        if exit_then == Exit::Fallthrough {
            ctx.program.add_logical_edge(then_end, bb_merge);
            ctx.program.add_linear_edge(then_end, bb_merge);
            emit_in(ctx, then_end, branch(bb_merge));
        } else if exit_then == Exit::Masked {
            // The lanes left; the wave still travels through the merge.
            ctx.program.add_linear_edge(then_end, bb_merge);
            emit_in(ctx, then_end, branch(bb_merge));
        }
        ctx.program.add_logical_edge(bb_branch, bb_merge);
        ctx.program.add_linear_edge(bb_branch, bb_merge);
        emit_in(ctx, bb_branch, cbranch_z(cond_op, bb_merge));

        ctx.pending_phis = Some(PendingPhis {
            reachable: vec![exit_then == Exit::Fallthrough, true],
            insert_at: 0,
        });
    } else {
        let bb_else = ctx.start_block(BlockKind::UNIFORM);
        ctx.program.add_logical_edge(bb_branch, bb_else);
        ctx.program.add_linear_edge(bb_branch, bb_else);
        emit_in(ctx, bb_branch, cbranch_z(cond_op, bb_else));
        let exit_else = walk_body(ctx, else_body)?;
        let else_end = ctx.current;

        let bb_merge = ctx.start_block(BlockKind::UNIFORM | BlockKind::MERGE);
        if exit_then != Exit::Jumped {
            if exit_then == Exit::Fallthrough {
                ctx.program.add_logical_edge(then_end, bb_merge);
            }
            ctx.program.add_linear_edge(then_end, bb_merge);
            emit_in(ctx, then_end, branch(bb_merge));
        }
        if exit_else != Exit::Jumped {
            if exit_else == Exit::Fallthrough {
                ctx.program.add_logical_edge(else_end, bb_merge);
            }
            ctx.program.add_linear_edge(else_end, bb_merge);
            emit_in(ctx, else_end, branch(bb_merge));
        }

        ctx.pending_phis = Some(PendingPhis {
            reachable: vec![exit_then == Exit::Fallthrough, exit_else == Exit::Fallthrough],
            insert_at: 0,
        });
    }
    Ok(Exit::Fallthrough)
}

fn lower_divergent_if(ctx: &mut Context, cond: ValueId, then_body: &[CfNode], else_body: &[CfNode]) -> Result<Exit> {
    trace!("divergent if");
    let config = ctx.config();
    let wave64 = config.wave64;
    let bb_branch = ctx.current;
    ctx.program.block_mut(bb_branch).kind |= BlockKind::BRANCH;

    // Save the incoming mask and narrow exec to the then-lanes.
    let mask_op = bool_to_mask(ctx, cond)?;
    let saved = ctx.new_temp(config.lane_mask_rc());
    let saveexec = if wave64 {
        Opcode::SAndSaveexecB64
    } else {
        Opcode::SAndSaveexecB32
    };
    ctx.emit(Instruction::new(
        saveexec,
        vec![mask_op],
        vec![Definition::Temp(saved), Definition::Exec],
    ));

    let was_divergent = ctx.cf.in_divergent_cf;
    let was_parent_divergent = ctx.cf.parent_if_divergent;
    ctx.cf.in_divergent_cf = true;
    ctx.cf.parent_if_divergent = true;
    ctx.cf.saved_masks.push(saved);

    // Scope state is restored below before the error path propagates.
    let walked = (|| -> Result<(bool, bool)> {
        let bb_then = ctx.start_block(BlockKind::NONE);
        ctx.program.add_logical_edge(bb_branch, bb_then);
        ctx.program.add_linear_edge(bb_branch, bb_then);
        let exit_then = walk_body(ctx, then_body)?;
        let then_end = ctx.current;

        // The invert block exists only in the linear graph. It flips exec
        // to the lanes the branch masked off.
        let bb_invert = ctx.start_block(BlockKind::INVERT);
        ctx.program.add_linear_edge(bb_branch, bb_invert);
        emit_in(ctx, bb_branch, cbranch_z(Operand::Exec, bb_invert));
        if exit_then == Exit::Masked {
            // The then-lanes broke out; the wave itself keeps going.
            ctx.program.add_linear_edge(then_end, bb_invert);
            emit_in(ctx, then_end, branch(bb_invert));
        }
        let andn2 = if wave64 { Opcode::SAndn2B64 } else { Opcode::SAndn2B32 };
        ctx.emit(Instruction::new(
            andn2,
            vec![Operand::Temp(saved), mask_op],
            vec![Definition::Exec],
        ));

        let then_reachable = exit_then == Exit::Fallthrough;
        let else_reachable;
        if else_body.is_empty() {
            let bb_merge = ctx.start_block(BlockKind::MERGE);
            if then_reachable {
                ctx.program.add_logical_edge(then_end, bb_merge);
                ctx.program.add_linear_edge(then_end, bb_merge);
                emit_in(ctx, then_end, branch(bb_merge));
            }
            ctx.program.add_linear_edge(bb_invert, bb_merge);
            emit_in(ctx, bb_invert, branch(bb_merge));
            // With no else body, the else-path value flows logically from
            // the branch block itself.
            ctx.program.add_logical_edge(bb_branch, bb_merge);
            else_reachable = true;
        } else {
            let bb_else = ctx.start_block(BlockKind::NONE);
            ctx.program.add_logical_edge(bb_branch, bb_else);
            ctx.program.add_linear_edge(bb_invert, bb_else);
            emit_in(ctx, bb_invert, branch(bb_else));
            let exit_else = walk_body(ctx, else_body)?;
            let else_end = ctx.current;
            else_reachable = exit_else == Exit::Fallthrough;

            let bb_merge = ctx.start_block(BlockKind::MERGE);
            if then_reachable {
                ctx.program.add_logical_edge(then_end, bb_merge);
                ctx.program.add_linear_edge(then_end, bb_merge);
                emit_in(ctx, then_end, branch(bb_merge));
            }
            if else_reachable {
                ctx.program.add_logical_edge(else_end, bb_merge);
                ctx.program.add_linear_edge(else_end, bb_merge);
                emit_in(ctx, else_end, branch(bb_merge));
            } else if exit_else == Exit::Masked {
                ctx.program.add_linear_edge(else_end, bb_merge);
                emit_in(ctx, else_end, branch(bb_merge));
            }
        }

        // Restore the full incoming mask. Phis are inserted ahead of this.
        let smov = if wave64 { Opcode::SMovB64 } else { Opcode::SMovB32 };
        ctx.emit(Instruction::new(smov, vec![Operand::Temp(saved)], vec![Definition::Exec]));
        Ok((then_reachable, else_reachable))
    })();

    ctx.cf.in_divergent_cf = was_divergent;
    ctx.cf.parent_if_divergent = was_parent_divergent;
    ctx.cf.saved_masks.pop();
    let (then_reachable, else_reachable) = walked?;

    ctx.pending_phis = Some(PendingPhis {
        reachable: vec![then_reachable, else_reachable],
        insert_at: 0,
    });
    Ok(Exit::Fallthrough)
}

// =============================================================================
// Loops
// =============================================================================

fn lower_loop(ctx: &mut Context, body: &[CfNode]) -> Result<Exit> {
    trace!("loop");
    let bb_preheader = ctx.current;
    ctx.program.block_mut(bb_preheader).kind |= BlockKind::LOOP_PREHEADER;

    let bb_header = ctx.start_block(BlockKind::LOOP_HEADER);
    ctx.program.add_logical_edge(bb_preheader, bb_header);
    ctx.program.add_linear_edge(bb_preheader, bb_header);
    emit_in(ctx, bb_preheader, branch(bb_header));

    let outer_loop = ctx.cf.parent_loop.replace(LoopInfo::new(ctx.cf.saved_masks.len()));
    ctx.cf.loop_depth += 1;

    // Header phis: [preheader-value, back-edge value]. Trimmed below if
    // the back edge never materializes.
    ctx.pending_phis = Some(PendingPhis {
        reachable: vec![true, true],
        insert_at: 0,
    });

    // Scope state is restored before the error path propagates.
    let walked = walk_body(ctx, body);
    let bottom = ctx.current;
    let inner_loop = ctx.cf.parent_loop.take();
    ctx.cf.parent_loop = outer_loop;
    ctx.cf.loop_depth -= 1;

    let exit = walked?;
    let loop_info = inner_loop.ok_or_else(|| err_internal!("loop info lost"))?;
    let wave64 = ctx.config().wave64;

    // The departed-lane accumulators start every trip through the loop
    // at zero; seed them in the preheader, ahead of its branch.
    for mask in [loop_info.break_mask, loop_info.cont_mask].into_iter().flatten() {
        let init = Instruction::new(mask_mov(wave64), vec![mask_zero(wave64)], vec![Definition::Temp(mask)]);
        let pre = ctx.program.block_mut(bb_preheader);
        let at = pre.instrs.len() - 1;
        pre.instrs.insert(at, init);
    }

    // Funnel the fallthrough bottom and every continue through a single
    // latch so the header keeps exactly one back edge.
    let has_back_edge = exit == Exit::Fallthrough
        || !loop_info.continue_sources.is_empty()
        || !loop_info.masked_continue_sources.is_empty();
    let bb_latch = if has_back_edge {
        let latch = ctx.start_block(BlockKind::CONTINUE);
        if exit == Exit::Fallthrough {
            ctx.program.add_logical_edge(bottom, latch);
            ctx.program.add_linear_edge(bottom, latch);
            emit_in(ctx, bottom, branch(latch));
        } else if exit == Exit::Masked {
            // The body's tail lanes left; the wave still reaches the latch.
            ctx.program.add_linear_edge(bottom, latch);
            emit_in(ctx, bottom, branch(latch));
        }
        for &c in &loop_info.continue_sources {
            ctx.program.add_logical_edge(c, latch);
            ctx.program.add_linear_edge(c, latch);
            emit_in(ctx, c, branch(latch));
        }
        // Masked continues reach the latch linearly through the joins of
        // the structures they sat in; only the logical edge is theirs.
        for &c in &loop_info.masked_continue_sources {
            ctx.program.add_logical_edge(c, latch);
        }
        ctx.program.add_logical_edge(latch, bb_header);
        ctx.program.add_linear_edge(latch, bb_header);
        Some(latch)
    } else {
        // The body always leaves the loop; drop the back-edge operand of
        // every header phi.
        let header = ctx.program.block_mut(bb_header);
        for instr in header.instrs.iter_mut() {
            match instr.opcode {
                Opcode::PPhi | Opcode::PLinearPhi => instr.operands.truncate(1),
                _ => break,
            }
        }
        None
    };

    let bb_exit = ctx.start_block(BlockKind::LOOP_EXIT);
    if bb_latch.is_none() && exit == Exit::Masked {
        ctx.program.add_linear_edge(bottom, bb_exit);
        emit_in(ctx, bottom, branch(bb_exit));
    }
    for &b in &loop_info.break_sources {
        ctx.program.add_logical_edge(b, bb_exit);
        ctx.program.add_linear_edge(b, bb_exit);
        emit_in(ctx, b, branch(bb_exit));
    }
    for &b in &loop_info.masked_break_sources {
        ctx.program.add_logical_edge(b, bb_exit);
    }
    // Lanes parked in the accumulators rejoin the wave past the loop.
    for mask in [loop_info.break_mask, loop_info.cont_mask].into_iter().flatten() {
        ctx.emit(Instruction::new(
            mask_or(wave64),
            vec![Operand::Exec, Operand::Temp(mask)],
            vec![Definition::Exec],
        ));
    }
    if let Some(latch) = bb_latch {
        if let Some(cont) = loop_info.cont_mask {
            // Continued lanes resume at the top of the next iteration.
            emit_in(
                ctx,
                latch,
                Instruction::new(
                    mask_or(wave64),
                    vec![Operand::Exec, Operand::Temp(cont)],
                    vec![Definition::Exec],
                ),
            );
            emit_in(
                ctx,
                latch,
                Instruction::new(mask_mov(wave64), vec![mask_zero(wave64)], vec![Definition::Temp(cont)]),
            );
        }
        if loop_info.has_divergent_break {
            // Some lanes may have left; bail out of the loop once the
            // mask is entirely empty.
            ctx.program.add_linear_edge(latch, bb_exit);
            emit_in(ctx, latch, cbranch_z(Operand::Exec, bb_exit));
        }
        emit_in(ctx, latch, branch(bb_header));
    }

    Ok(Exit::Fallthrough)
}

/// Record a `break`. Under uniform control the whole wave branches to
/// the loop exit. Under divergence only the active lanes leave: they are
/// parked in the loop's break accumulator, erased from every enclosing
/// if's saved mask so no merge restore revives them, and exec is cleared
/// so the wave passes the remaining joins empty.
///
/// Returns `true` for the divergent (masked) form.
fn lower_break(ctx: &mut Context) -> Result<bool> {
    let divergent = ctx.cf.in_divergent_cf;
    let block = ctx.current;
    ctx.program.block_mut(block).kind |= BlockKind::BREAK;
    let loop_info = ctx
        .cf
        .parent_loop
        .as_mut()
        .ok_or_else(|| err_internal!("break outside a loop"))?;
    // Once any lanes have departed this loop body, exec no longer covers
    // the whole wave and even a structurally uniform break must mask.
    if !divergent && !loop_info.lanes_departed() {
        loop_info.break_sources.push(block);
        return Ok(false);
    }
    loop_info.has_divergent_break = true;
    loop_info.masked_break_sources.push(block);
    let saved_depth = loop_info.saved_depth;
    let mask = match loop_info.break_mask {
        Some(m) => m,
        None => {
            let m = ctx.new_temp(ctx.config().lane_mask_rc());
            if let Some(l) = ctx.cf.parent_loop.as_mut() {
                l.break_mask = Some(m);
            }
            m
        }
    };
    ctx.cf.exec_potentially_empty = true;
    mask_off_departed(ctx, mask, saved_depth);
    Ok(true)
}

/// Record a `continue`. The divergent form parks the active lanes in the
/// loop's continue accumulator; the latch folds them back into exec
/// before taking the back edge.
fn lower_continue(ctx: &mut Context) -> Result<bool> {
    let divergent = ctx.cf.in_divergent_cf;
    let block = ctx.current;
    ctx.program.block_mut(block).kind |= BlockKind::CONTINUE;
    let loop_info = ctx
        .cf
        .parent_loop
        .as_mut()
        .ok_or_else(|| err_internal!("continue outside a loop"))?;
    if !divergent && !loop_info.lanes_departed() {
        loop_info.continue_sources.push(block);
        return Ok(false);
    }
    loop_info.masked_continue_sources.push(block);
    let saved_depth = loop_info.saved_depth;
    let mask = match loop_info.cont_mask {
        Some(m) => m,
        None => {
            let m = ctx.new_temp(ctx.config().lane_mask_rc());
            if let Some(l) = ctx.cf.parent_loop.as_mut() {
                l.cont_mask = Some(m);
            }
            m
        }
    };
    ctx.cf.exec_potentially_empty = true;
    mask_off_departed(ctx, mask, saved_depth);
    Ok(true)
}

/// Park the active lanes in `mask`, erase them from the saved masks of
/// the enclosing ifs inside the loop (the merges downstream restore from
/// those), and clear exec for the fall through to the next join.
fn mask_off_departed(ctx: &mut Context, mask: Temp, saved_depth: usize) {
    let wave64 = ctx.config().wave64;
    ctx.emit(Instruction::new(
        mask_or(wave64),
        vec![Operand::Temp(mask), Operand::Exec],
        vec![Definition::Temp(mask)],
    ));
    let andn2 = if wave64 { Opcode::SAndn2B64 } else { Opcode::SAndn2B32 };
    let saved: Vec<Temp> = ctx.cf.saved_masks[saved_depth..].to_vec();
    for s in saved {
        ctx.emit(Instruction::new(
            andn2,
            vec![Operand::Temp(s), Operand::Exec],
            vec![Definition::Temp(s)],
        ));
    }
    ctx.emit(Instruction::new(
        mask_mov(wave64),
        vec![mask_zero(wave64)],
        vec![Definition::Exec],
    ));
}

// =============================================================================
// Discards
// =============================================================================

/// Lower a lane kill. Under uniform top-level control flow this ends the
/// whole program; anywhere else it demotes the affected lanes and leaves
/// control flow intact.
///
/// Returns `true` when the program was terminated.
pub(crate) fn emit_discard(ctx: &mut Context, cond: Option<ValueId>) -> Result<bool> {
    ctx.program.needs_exact = true;
    let top_level_uniform = ctx.cf.loop_depth == 0 && !ctx.cf.in_divergent_cf;

    match cond {
        None if top_level_uniform => {
            // Every lane dies; finish the wave here.
            ctx.program.block_mut(ctx.current).kind |= BlockKind::DISCARD;
            ctx.emit(Instruction::new(Opcode::ExpNull, vec![], vec![]));
            ctx.emit(Instruction::new(Opcode::SEndpgm, vec![], vec![]));
            Ok(true)
        }
        None => {
            ctx.emit(Instruction::new(Opcode::PDemote, vec![Operand::Exec], vec![]));
            ctx.cf.exec_potentially_empty = true;
            if let Some(l) = ctx.cf.parent_loop.as_mut() {
                l.has_divergent_break = true;
            }
            Ok(false)
        }
        Some(c) if top_level_uniform && !ctx.divergent(c) => {
            // Uniform conditional kill: branch around a terminating block.
            let bb = ctx.current;
            ctx.program.block_mut(bb).kind |= BlockKind::UNIFORM | BlockKind::BRANCH;
            let cond_op = ctx.get_operand(c);

            let bb_discard = ctx.start_block(BlockKind::DISCARD);
            ctx.program.add_logical_edge(bb, bb_discard);
            ctx.program.add_linear_edge(bb, bb_discard);
            ctx.emit(Instruction::new(Opcode::ExpNull, vec![], vec![]));
            ctx.emit(Instruction::new(Opcode::SEndpgm, vec![], vec![]));

            let bb_merge = ctx.start_block(BlockKind::UNIFORM | BlockKind::MERGE);
            ctx.program.add_logical_edge(bb, bb_merge);
            ctx.program.add_linear_edge(bb, bb_merge);
            emit_in(ctx, bb, cbranch_z(cond_op, bb_merge));
            Ok(false)
        }
        Some(c) => {
            let mask = bool_to_mask(ctx, c)?;
            ctx.emit(Instruction::new(Opcode::PDemote, vec![mask], vec![]));
            ctx.cf.exec_potentially_empty = true;
            if let Some(l) = ctx.cf.parent_loop.as_mut() {
                l.has_divergent_break = true;
            }
            Ok(false)
        }
    }
}
