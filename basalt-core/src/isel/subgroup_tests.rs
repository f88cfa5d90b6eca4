#![cfg(test)]

use crate::isa::{
    verify::verify, Config, GpuGeneration, InstrExtra, Instruction, Opcode, Operand, Program,
};
use crate::sir::builder::FunctionBuilder;
use crate::sir::{Function, Intrinsic, ReduceOp, ValueInfo};
use crate::CompilerError;

use super::select_program;

fn select_cfg(f: &Function, config: Config) -> Program {
    let p = select_program(f, config).expect("selection succeeds");
    verify(&p).expect("selected program verifies");
    p
}

fn select(f: &Function) -> Program {
    select_cfg(f, Config::default())
}

fn instrs(p: &Program) -> Vec<&Instruction> {
    p.blocks.iter().flat_map(|b| b.instrs.iter()).collect()
}

fn find(p: &Program, opcode: Opcode) -> &Instruction {
    instrs(p)
        .into_iter()
        .find(|i| i.opcode == opcode)
        .unwrap_or_else(|| panic!("no {:?} emitted", opcode))
}

fn count(p: &Program, opcode: Opcode) -> usize {
    instrs(p).iter().filter(|i| i.opcode == opcode).count()
}

fn has(p: &Program, opcode: Opcode) -> bool {
    count(p, opcode) > 0
}

fn vinfo(bit_size: u32, num_components: u32, divergent: bool) -> ValueInfo {
    ValueInfo {
        bit_size,
        num_components,
        divergent,
    }
}

#[test]
fn ballot_masks_out_inactive_lanes() {
    let mut b = FunctionBuilder::new("ballot");
    let cond = b.param(1, 1, true);
    b.intrinsic(Intrinsic::Ballot, &[cond], Some(vinfo(64, 1, false)));
    let f = b.finish();

    let p = select(&f);
    let and = find(&p, Opcode::SAndB64);
    assert!(and.operands.contains(&Operand::Exec));
}

#[test]
fn ballot_of_a_uniform_bool_expands_it_first() {
    let mut b = FunctionBuilder::new("ballot_uniform");
    let cond = b.param(1, 1, false);
    b.intrinsic(Intrinsic::Ballot, &[cond], Some(vinfo(64, 1, false)));
    let f = b.finish();

    let p = select(&f);
    // 0/1 scalar bool to full/empty mask, then the exec mask-off.
    assert!(has(&p, Opcode::SCselectB64));
    assert!(has(&p, Opcode::SAndB64));
}

#[test]
fn lane_index_counts_bits_below_the_lane() {
    let mut b = FunctionBuilder::new("lane_index");
    b.intrinsic(Intrinsic::LaneIndex, &[], Some(vinfo(32, 1, true)));
    let f = b.finish();

    let p = select(&f);
    let lo = find(&p, Opcode::VMbcntLoU32B32);
    assert_eq!(lo.operands[0], Operand::c32(u32::MAX));
    assert!(has(&p, Opcode::VMbcntHiU32B32));

    // Wave32 needs no high half.
    let p32 = select_cfg(
        &f,
        Config {
            gen: GpuGeneration::Gfx10,
            wave64: false,
        },
    );
    assert!(has(&p32, Opcode::VMbcntLoU32B32));
    assert!(!has(&p32, Opcode::VMbcntHiU32B32));
}

#[test]
fn shuffle_goes_through_lds_permute() {
    let mut b = FunctionBuilder::new("shuffle");
    let val = b.param(32, 1, true);
    let lane = b.param(32, 1, true);
    b.intrinsic(Intrinsic::Shuffle, &[val, lane], Some(vinfo(32, 1, true)));
    let f = b.finish();

    let p = select_cfg(&f, Config::new(GpuGeneration::Gfx8));
    // Lane index scaled to a byte address.
    let shl = find(&p, Opcode::VLshlrevB32);
    assert_eq!(shl.operands[0], Operand::c32(2));
    assert!(has(&p, Opcode::DsBpermuteB32));

    let err = select_program(&f, Config::new(GpuGeneration::Gfx7)).unwrap_err();
    assert!(matches!(err, CompilerError::Unsupported(_)));
}

#[test]
fn read_first_lane_moves_to_the_scalar_bank() {
    let mut b = FunctionBuilder::new("rfl");
    let val = b.param(32, 1, true);
    b.intrinsic(Intrinsic::ReadFirstLane, &[val], Some(vinfo(32, 1, false)));
    let f = b.finish();

    let p = select(&f);
    assert!(has(&p, Opcode::VReadfirstlaneB32));
}

#[test]
fn read_lane_rejects_a_divergent_index() {
    let mut b = FunctionBuilder::new("read_lane");
    let val = b.param(32, 1, true);
    let lane = b.param(32, 1, true);
    b.intrinsic(Intrinsic::ReadLane, &[val, lane], Some(vinfo(32, 1, false)));
    let f = b.finish();

    let err = select_program(&f, Config::default()).unwrap_err();
    assert!(matches!(err, CompilerError::Unsupported(_)));
}

#[test]
fn arithmetic_reductions_stay_pseudo() {
    let mut b = FunctionBuilder::new("reduce");
    let val = b.param(32, 1, true);
    b.intrinsic(
        Intrinsic::Reduce {
            op: ReduceOp::IAdd,
            cluster: 0,
        },
        &[val],
        Some(vinfo(32, 1, false)),
    );
    b.intrinsic(
        Intrinsic::InclusiveScan { op: ReduceOp::UMax },
        &[val],
        Some(vinfo(32, 1, true)),
    );
    let f = b.finish();

    let p = select(&f);
    // Cluster zero means the whole wave.
    let reduce = find(&p, Opcode::PReduce);
    assert_eq!(
        reduce.extra,
        InstrExtra::Reduction {
            op: ReduceOp::IAdd,
            cluster: 64,
        }
    );
    assert!(has(&p, Opcode::PInclusiveScan));
}

#[test]
fn reduction_clusters_round_up_to_a_power_of_two() {
    let mut b = FunctionBuilder::new("cluster_six");
    let val = b.param(32, 1, true);
    b.intrinsic(
        Intrinsic::Reduce {
            op: ReduceOp::UMax,
            cluster: 6,
        },
        &[val],
        Some(vinfo(32, 1, true)),
    );
    let f = b.finish();

    let p = select(&f);
    let reduce = find(&p, Opcode::PReduce);
    assert_eq!(
        reduce.extra,
        InstrExtra::Reduction {
            op: ReduceOp::UMax,
            cluster: 8,
        }
    );
}

#[test]
fn bool_or_reduce_tests_the_ballot_against_zero() {
    let mut b = FunctionBuilder::new("any");
    let cond = b.param(1, 1, true);
    b.intrinsic(
        Intrinsic::Reduce {
            op: ReduceOp::Or,
            cluster: 0,
        },
        &[cond],
        Some(vinfo(1, 1, true)),
    );
    let f = b.finish();

    let p = select(&f);
    let cmp = find(&p, Opcode::SCmpLgU64);
    assert!(cmp.operands.contains(&Operand::c64(0)));
    // Broadcast back to a per-lane boolean.
    assert!(has(&p, Opcode::SCselectB64));
}

#[test]
fn bool_and_reduce_tests_the_ballot_against_exec() {
    let mut b = FunctionBuilder::new("all");
    let cond = b.param(1, 1, true);
    b.intrinsic(
        Intrinsic::Reduce {
            op: ReduceOp::And,
            cluster: 0,
        },
        &[cond],
        Some(vinfo(1, 1, true)),
    );
    let f = b.finish();

    let p = select(&f);
    let cmp = find(&p, Opcode::SCmpEqU64);
    assert!(cmp.operands.contains(&Operand::Exec));
}

#[test]
fn bool_xor_reduce_takes_popcount_parity() {
    let mut b = FunctionBuilder::new("parity");
    let cond = b.param(1, 1, true);
    b.intrinsic(
        Intrinsic::Reduce {
            op: ReduceOp::Xor,
            cluster: 0,
        },
        &[cond],
        Some(vinfo(1, 1, true)),
    );
    let f = b.finish();

    let p = select(&f);
    assert!(has(&p, Opcode::SBcnt1I32B64));
    let parity = find(&p, Opcode::SAndB32);
    assert!(parity.operands.contains(&Operand::c32(1)));
}

#[test]
fn bool_cluster4_reduce_folds_nibbles() {
    let mut b = FunctionBuilder::new("quad_any");
    let cond = b.param(1, 1, true);
    b.intrinsic(
        Intrinsic::Reduce {
            op: ReduceOp::Or,
            cluster: 4,
        },
        &[cond],
        Some(vinfo(1, 1, true)),
    );
    let f = b.finish();

    let p = select(&f);
    // Two fold steps down, two broadcast steps up.
    assert_eq!(count(&p, Opcode::SLshrB64), 2);
    assert_eq!(count(&p, Opcode::SLshlB64), 2);
    assert!(instrs(&p)
        .iter()
        .any(|i| i.operands.contains(&Operand::c64(0x1111_1111_1111_1111))));
}

#[test]
fn bool_or_scan_counts_set_lanes_below() {
    let mut b = FunctionBuilder::new("bool_or_scan");
    let cond = b.param(1, 1, true);
    b.intrinsic(
        Intrinsic::InclusiveScan { op: ReduceOp::Or },
        &[cond],
        Some(vinfo(1, 1, true)),
    );
    let f = b.finish();

    let p = select(&f);
    // Masked popcount below the lane, tested against zero.
    assert!(has(&p, Opcode::VMbcntLoU32B32));
    assert!(has(&p, Opcode::VMbcntHiU32B32));
    let cmp = find(&p, Opcode::VCmpLgU32);
    assert!(cmp.operands.contains(&Operand::c32(0)));
    // Inclusive form folds the lane's own bit back in.
    assert!(has(&p, Opcode::SOrB64));
}

#[test]
fn bool_and_exclusive_scan_compares_against_active_count() {
    let mut b = FunctionBuilder::new("bool_and_scan");
    let cond = b.param(1, 1, true);
    b.intrinsic(
        Intrinsic::ExclusiveScan { op: ReduceOp::And },
        &[cond],
        Some(vinfo(1, 1, true)),
    );
    let f = b.finish();

    let p = select(&f);
    // One count for the ballot, one for the active-lane mask.
    assert_eq!(count(&p, Opcode::VMbcntLoU32B32), 2);
    assert!(has(&p, Opcode::SMovB64));
    assert!(has(&p, Opcode::VCmpEqU32));
}

#[test]
fn bool_xor_scan_takes_below_count_parity() {
    let mut b = FunctionBuilder::new("bool_xor_scan");
    let cond = b.param(1, 1, true);
    b.intrinsic(
        Intrinsic::ExclusiveScan { op: ReduceOp::Xor },
        &[cond],
        Some(vinfo(1, 1, true)),
    );
    let f = b.finish();

    let p = select(&f);
    let parity = find(&p, Opcode::VAndB32);
    assert!(parity.operands.contains(&Operand::c32(1)));
    assert!(has(&p, Opcode::VCmpLgU32));
}
