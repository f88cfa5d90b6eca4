#![cfg(test)]

use crate::isa::{verify::verify, BlockId, BlockKind, Config, Definition, GpuGeneration, Opcode, Program};
use crate::sir::builder::FunctionBuilder;
use crate::sir::{AluOp, Intrinsic};

use super::select_program;

fn select(f: crate::sir::Function) -> Program {
    let p = select_program(&f, Config::default()).expect("selection succeeds");
    verify(&p).expect("selected program verifies");
    p
}

fn opcodes_in(p: &Program, b: u32) -> Vec<Opcode> {
    p.blocks[b as usize].instrs.iter().map(|i| i.opcode).collect()
}

#[test]
fn straight_line_is_one_block() {
    let mut b = FunctionBuilder::new("simple");
    let x = b.param(32, 1, false);
    b.alu(AluOp::IAdd, &[x, x]);
    let p = select(b.finish());

    assert_eq!(p.blocks.len(), 1);
    let ops = opcodes_in(&p, 0);
    assert_eq!(ops.first(), Some(&Opcode::PStartpgm));
    assert_eq!(ops.last(), Some(&Opcode::SEndpgm));
}

#[test]
fn uniform_if_else_shape() {
    let mut b = FunctionBuilder::new("uniform_if");
    let cond = b.param(1, 1, false);
    let x = b.param(32, 1, false);
    b.begin_if(cond);
    let t = b.alu(AluOp::IAdd, &[x, x]);
    b.begin_else();
    let e = b.alu(AluOp::ISub, &[x, x]);
    b.end_if();
    let info = b.value_info(t);
    b.phi(&[t, e], info);
    let p = select(b.finish());

    // Branch, then, else, merge.
    assert_eq!(p.blocks.len(), 4);
    assert!(p.blocks[0].kind.contains(BlockKind::UNIFORM | BlockKind::BRANCH));
    assert_eq!(p.blocks[0].linear_succs, vec![BlockId(1), BlockId(2)]);
    assert_eq!(p.blocks[0].logical_succs, vec![BlockId(1), BlockId(2)]);
    let merge = &p.blocks[3];
    assert!(merge.kind.contains(BlockKind::MERGE));
    assert_eq!(merge.logical_preds, vec![BlockId(1), BlockId(2)]);
    assert_eq!(merge.linear_preds, vec![BlockId(1), BlockId(2)]);
    // Uniform phi at the merge head.
    assert_eq!(merge.instrs[0].opcode, Opcode::PLinearPhi);
    assert_eq!(merge.instrs[0].operands.len(), 2);
}

#[test]
fn divergent_if_with_empty_else_keeps_invert_block() {
    let mut b = FunctionBuilder::new("divergent_if");
    let cond = b.param(1, 1, true);
    let x = b.param(32, 1, true);
    b.begin_if(cond);
    let t = b.alu(AluOp::IAdd, &[x, x]);
    b.end_if();
    let info = b.value_info(t);
    b.phi(&[t, x], info);
    let p = select(b.finish());

    // Branch, then, invert, merge.
    assert_eq!(p.blocks.len(), 4);
    let branch = &p.blocks[0];
    let invert = &p.blocks[2];
    let merge = &p.blocks[3];
    assert!(invert.kind.contains(BlockKind::INVERT));
    assert!(merge.kind.contains(BlockKind::MERGE));

    // The invert block exists only linearly.
    assert!(invert.logical_preds.is_empty());
    assert!(invert.logical_succs.is_empty());
    assert_eq!(invert.linear_preds, vec![BlockId(0)]);

    // Merge: linear preds are then-end and invert; the second logical
    // pred is the branch block.
    assert_eq!(merge.linear_preds, vec![BlockId(1), BlockId(2)]);
    assert_eq!(merge.logical_preds, vec![BlockId(1), BlockId(0)]);

    // Exec dance: save/narrow at the branch, flip in the invert,
    // restore at the merge after the phi.
    assert!(opcodes_in(&p, 0).contains(&Opcode::SAndSaveexecB64));
    assert!(opcodes_in(&p, 2).contains(&Opcode::SAndn2B64));
    assert_eq!(merge.instrs[0].opcode, Opcode::PPhi);
    assert_eq!(merge.instrs[0].operands.len(), 2);
    assert!(merge.instrs.iter().any(|i| i.opcode == Opcode::SMovB64));
    let _ = branch;
}

#[test]
fn divergent_if_else_merges_both_arms() {
    let mut b = FunctionBuilder::new("divergent_if_else");
    let cond = b.param(1, 1, true);
    let x = b.param(32, 1, true);
    b.begin_if(cond);
    let t = b.alu(AluOp::IAdd, &[x, x]);
    b.begin_else();
    let e = b.alu(AluOp::ISub, &[x, x]);
    b.end_if();
    let info = b.value_info(t);
    b.phi(&[t, e], info);
    let p = select(b.finish());

    // Branch, then, invert, else, merge.
    assert_eq!(p.blocks.len(), 5);
    let merge = &p.blocks[4];
    assert_eq!(merge.logical_preds, vec![BlockId(1), BlockId(3)]);
    assert_eq!(merge.linear_preds, vec![BlockId(1), BlockId(3)]);
    // The else block is entered linearly through the invert block.
    assert_eq!(p.blocks[3].linear_preds, vec![BlockId(2)]);
    assert_eq!(p.blocks[3].logical_preds, vec![BlockId(0)]);
}

#[test]
fn loop_shape_and_back_edge() {
    let mut b = FunctionBuilder::new("counted");
    let n = b.param(32, 1, false);
    let zero = b.const_u32(0);
    b.begin_loop();
    let i_info = b.value_info(zero);
    let i = b.phi(&[zero, zero], i_info);
    let one = b.const_u32(1);
    let next = b.alu(AluOp::IAdd, &[i, one]);
    let done = b.alu(AluOp::IGe, &[next, n]);
    b.begin_if(done);
    b.brk();
    b.end_if();
    b.end_loop();
    let p = select(b.finish());

    let header = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::LOOP_HEADER))
        .expect("loop header exists");
    let latch = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::CONTINUE))
        .expect("latch exists");
    let exit = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::LOOP_EXIT))
        .expect("exit exists");

    // Single back edge through the latch.
    assert_eq!(header.logical_preds.len(), 2);
    assert!(header.logical_preds.contains(&latch.id));
    // The uniform break block targets the exit in both graphs.
    assert_eq!(exit.logical_preds.len(), 1);
    assert_eq!(exit.linear_preds.len(), 1);
    // Header phi sees preheader and back-edge values.
    assert_eq!(header.instrs[0].opcode, Opcode::PLinearPhi);
    assert_eq!(header.instrs[0].operands.len(), 2);
}

#[test]
fn divergent_break_adds_mask_empty_test_to_latch() {
    let mut b = FunctionBuilder::new("divergent_break");
    let cond = b.param(1, 1, true);
    b.begin_loop();
    b.begin_if(cond);
    b.brk();
    b.end_if();
    b.end_loop();
    let p = select(b.finish());

    let latch = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::CONTINUE))
        .expect("latch exists");
    let exit = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::LOOP_EXIT))
        .expect("exit exists");

    // The latch leaves early once no lanes remain.
    assert!(latch.linear_succs.contains(&exit.id));
    let cbranch = latch
        .instrs
        .iter()
        .find(|i| i.opcode == Opcode::PCbranchZ)
        .expect("mask-empty test");
    assert_eq!(cbranch.branch_target(), Some(exit.id));
    assert_eq!(latch.instrs.last().unwrap().opcode, Opcode::PBranch);
}

#[test]
fn divergent_break_leaves_only_logically() {
    let mut b = FunctionBuilder::new("masked_break");
    let cond = b.param(1, 1, true);
    b.begin_loop();
    b.begin_if(cond);
    b.brk();
    b.end_if();
    b.end_loop();
    let p = select(b.finish());

    let brk = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::BREAK))
        .expect("break block");
    let invert = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::INVERT))
        .expect("invert block");
    let exit = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::LOOP_EXIT))
        .expect("exit block");

    // The breaking lanes leave the loop logically; the wave itself falls
    // through to the invert block with them masked off.
    assert!(brk.logical_succs.contains(&exit.id));
    assert_eq!(brk.linear_succs, vec![invert.id]);
    let last = brk.instrs.last().expect("break block not empty");
    assert_eq!(last.opcode, Opcode::PBranch);
    assert_eq!(last.branch_target(), Some(invert.id));

    // Departed lanes are accumulated, erased from the enclosing if's
    // saved mask, and cleared out of exec before the fall-through.
    assert!(brk.instrs.iter().any(|i| i.opcode == Opcode::SOrB64));
    assert!(brk.instrs.iter().any(|i| i.opcode == Opcode::SAndn2B64));
    assert!(brk
        .instrs
        .iter()
        .any(|i| i.opcode == Opcode::SMovB64 && i.defs.contains(&Definition::Exec)));

    // They rejoin the wave past the loop.
    assert!(exit
        .instrs
        .iter()
        .any(|i| i.opcode == Opcode::SOrB64 && i.defs.contains(&Definition::Exec)));
}

#[test]
fn divergent_continue_rejoins_at_the_latch() {
    let mut b = FunctionBuilder::new("masked_continue");
    let cond = b.param(1, 1, true);
    b.begin_loop();
    b.begin_if(cond);
    b.cont();
    b.end_if();
    b.brk();
    b.end_loop();
    let p = select(b.finish());

    let header = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::LOOP_HEADER))
        .expect("loop header exists");
    let latch = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::CONTINUE) && blk.logical_succs.contains(&header.id))
        .expect("latch exists");

    // The continue source reaches the latch only logically.
    assert_eq!(latch.logical_preds.len(), 1);
    let source = &p.blocks[latch.logical_preds[0].index()];
    assert!(source.kind.contains(BlockKind::CONTINUE));
    assert!(!latch.linear_preds.contains(&source.id));

    // The latch folds the parked lanes back in before the back edge.
    assert_eq!(latch.instrs[0].opcode, Opcode::SOrB64);
    assert_eq!(latch.instrs[0].defs, vec![Definition::Exec]);

    // The trailing break runs with lanes already gone, so it masks too
    // instead of carrying the whole wave out.
    let exit = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::LOOP_EXIT))
        .expect("exit exists");
    assert!(latch.linear_succs.contains(&exit.id));
    let bottom = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::BREAK))
        .expect("break block");
    assert!(bottom.logical_succs.contains(&exit.id));
    assert!(!bottom.linear_succs.contains(&exit.id));
}

#[test]
fn continue_funnels_through_the_latch() {
    let mut b = FunctionBuilder::new("skip");
    let cond = b.param(1, 1, false);
    b.begin_loop();
    b.begin_if(cond);
    b.cont();
    b.end_if();
    b.brk();
    b.end_loop();
    let p = select(b.finish());

    let header = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::LOOP_HEADER))
        .expect("loop header exists");
    // Both the continue source and the latch carry the kind; the latch is
    // the one owning the back edge.
    let latch = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::CONTINUE) && blk.logical_succs.contains(&header.id))
        .expect("latch exists");
    assert_eq!(latch.logical_preds.len(), 1);
    let source = &p.blocks[latch.logical_preds[0].index()];
    assert!(source.kind.contains(BlockKind::CONTINUE));
    assert_eq!(header.logical_preds.len(), 2);
}

#[test]
fn loop_that_always_breaks_trims_header_phis() {
    let mut b = FunctionBuilder::new("one_shot");
    let x = b.param(32, 1, false);
    b.begin_loop();
    let info = b.value_info(x);
    b.phi(&[x, x], info);
    b.brk();
    b.end_loop();
    let p = select(b.finish());

    let header = p
        .blocks
        .iter()
        .find(|blk| blk.kind.contains(BlockKind::LOOP_HEADER))
        .expect("loop header exists");
    // No back edge materialized; the trailing operand is trimmed.
    assert_eq!(header.logical_preds.len(), 1);
    assert_eq!(header.instrs[0].operands.len(), 1);
}

#[test]
fn top_level_discard_ends_the_program() {
    let mut b = FunctionBuilder::new("kill");
    b.intrinsic(Intrinsic::Discard, &[], None);
    let p = select(b.finish());

    assert!(p.needs_exact);
    assert!(p.blocks[0].kind.contains(BlockKind::DISCARD));
    let ops = opcodes_in(&p, 0);
    assert!(ops.contains(&Opcode::ExpNull));
    assert_eq!(ops.last(), Some(&Opcode::SEndpgm));
}

#[test]
fn divergent_conditional_discard_demotes() {
    let mut b = FunctionBuilder::new("demote");
    let cond = b.param(1, 1, true);
    let x = b.param(32, 1, true);
    b.intrinsic(Intrinsic::DiscardIf, &[cond], None);
    b.alu(AluOp::IAdd, &[x, x]);
    let p = select(b.finish());

    assert!(p.needs_exact);
    let ops = opcodes_in(&p, 0);
    assert!(ops.contains(&Opcode::PDemote));
    // Control flow continues afterwards.
    assert_eq!(ops.last(), Some(&Opcode::SEndpgm));
    assert_eq!(p.blocks.len(), 1);
}

#[test]
fn uniform_conditional_discard_branches_around_exit() {
    let mut b = FunctionBuilder::new("uniform_kill");
    let cond = b.param(1, 1, false);
    b.intrinsic(Intrinsic::DiscardIf, &[cond], None);
    let x = b.param(32, 1, false);
    b.alu(AluOp::IAdd, &[x, x]);
    let p = select(b.finish());

    // Branch, discard, continuation.
    assert_eq!(p.blocks.len(), 3);
    assert!(p.blocks[1].kind.contains(BlockKind::DISCARD));
    let ops = opcodes_in(&p, 1);
    assert!(ops.contains(&Opcode::ExpNull));
    assert_eq!(ops.last(), Some(&Opcode::SEndpgm));
    // The discard block terminates; only the merge continues.
    assert!(p.blocks[1].linear_succs.is_empty());
    assert_eq!(p.blocks[2].linear_preds, vec![BlockId(0)]);
}

#[test]
fn nested_divergent_in_uniform_verifies() {
    let mut b = FunctionBuilder::new("nested");
    let ucond = b.param(1, 1, false);
    let dcond = b.param(1, 1, true);
    let x = b.param(32, 1, true);
    b.begin_if(ucond);
    b.begin_if(dcond);
    let t = b.alu(AluOp::IAdd, &[x, x]);
    b.end_if();
    let info = b.value_info(t);
    b.phi(&[t, x], info);
    b.end_if();
    let p = select(b.finish());
    assert!(p.blocks.len() >= 6);
}

#[test]
fn selection_targets_other_generations() {
    let mut b = FunctionBuilder::new("gen_check");
    let cond = b.param(1, 1, true);
    let x = b.param(32, 1, true);
    b.begin_if(cond);
    b.alu(AluOp::IAdd, &[x, x]);
    b.end_if();
    let f = b.finish();
    for gen in [GpuGeneration::Gfx6, GpuGeneration::Gfx8, GpuGeneration::Gfx10] {
        let p = select_program(&f, Config::new(gen)).expect("selection succeeds");
        verify(&p).expect("verifies");
    }
}
