#![cfg(test)]

use crate::isa::{verify::verify, Config, Instruction, Opcode, Operand, Program};
use crate::sir::builder::FunctionBuilder;
use crate::sir::{AluOp, Function};

use super::select_program;

fn select(f: &Function) -> Program {
    let p = select_program(f, Config::default()).expect("selection succeeds");
    verify(&p).expect("selected program verifies");
    p
}

fn instrs(p: &Program) -> Vec<&Instruction> {
    p.blocks.iter().flat_map(|b| b.instrs.iter()).collect()
}

fn count(p: &Program, opcode: Opcode) -> usize {
    instrs(p).iter().filter(|i| i.opcode == opcode).count()
}

fn has(p: &Program, opcode: Opcode) -> bool {
    count(p, opcode) > 0
}

#[test]
fn extract_from_a_built_vector_reuses_the_components() {
    let mut b = FunctionBuilder::new("vec_extract");
    let x = b.param(32, 1, true);
    let y = b.param(32, 1, true);
    let v = b.vec(&[x, y]);
    b.extract(v, 1);
    let f = b.finish();

    let p = select(&f);
    // The component is already known; no extract instruction appears.
    assert!(has(&p, Opcode::PCreateVector));
    assert!(!has(&p, Opcode::PExtractVector));
    assert!(has(&p, Opcode::PParallelcopy));
}

#[test]
fn extract_from_an_opaque_vector_emits_the_extract() {
    let mut b = FunctionBuilder::new("param_extract");
    let v = b.param(32, 2, true);
    b.extract(v, 1);
    let f = b.finish();

    let p = select(&f);
    let extracts: Vec<_> = instrs(&p)
        .into_iter()
        .filter(|i| i.opcode == Opcode::PExtractVector)
        .collect();
    assert_eq!(extracts.len(), 1);
    assert_eq!(extracts[0].operands[1], Operand::c32(1));
}

#[test]
fn repeated_wide_ops_split_each_source_once() {
    let mut b = FunctionBuilder::new("split_cache");
    let x = b.param(64, 1, true);
    let y = b.param(64, 1, true);
    b.alu(AluOp::IAdd, &[x, y]);
    b.alu(AluOp::ISub, &[x, y]);
    let f = b.finish();

    let p = select(&f);
    // One split per source, shared by both chains.
    assert_eq!(count(&p, Opcode::PSplitVector), 2);
}

#[test]
fn vector_destinations_copy_scalar_components_up() {
    let mut b = FunctionBuilder::new("mixed_vec");
    let d = b.param(32, 1, true);
    let u = b.param(32, 1, false);
    let c = b.const_u32(5);
    b.vec(&[d, u, c]);
    let f = b.finish();

    let p = select(&f);
    // The scalar parameter and the literal both land in vgprs first.
    assert_eq!(count(&p, Opcode::VMovB32), 2);
    assert!(instrs(&p)
        .iter()
        .any(|i| i.opcode == Opcode::VMovB32 && i.operands.contains(&Operand::c32(5))));
    let create = instrs(&p)
        .into_iter()
        .find(|i| i.opcode == Opcode::PCreateVector)
        .expect("vector is assembled");
    assert_eq!(create.operands.len(), 3);
}

#[test]
fn uniform_vector_stays_on_the_scalar_bank() {
    let mut b = FunctionBuilder::new("uniform_vec");
    let x = b.param(32, 1, false);
    let y = b.param(32, 1, false);
    b.vec(&[x, y]);
    let f = b.finish();

    let p = select(&f);
    // No per-component vgpr copies are needed.
    assert!(!has(&p, Opcode::VMovB32));
    assert!(has(&p, Opcode::PCreateVector));
}
