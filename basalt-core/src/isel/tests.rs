#![cfg(test)]

use crate::isa::{verify::verify, BlockKind, Config, GpuGeneration, Opcode, Program};
use crate::sir::builder::FunctionBuilder;
use crate::sir::{
    AluOp, AtomicOp, Function, Intrinsic, ResourceBinding, Tex, TexDim, TexOp, ValueInfo,
};

use super::select_program;

fn select_for(f: &Function, gen: GpuGeneration) -> Program {
    let p = select_program(f, Config::new(gen)).expect("selection succeeds");
    verify(&p).expect("selected program verifies");
    p
}

fn vinfo(bit_size: u32, num_components: u32, divergent: bool) -> ValueInfo {
    ValueInfo {
        bit_size,
        num_components,
        divergent,
    }
}

fn has(p: &Program, opcode: Opcode) -> bool {
    p.blocks
        .iter()
        .flat_map(|b| b.instrs.iter())
        .any(|i| i.opcode == opcode)
}

/// A fragment-style program: a demoting discard, an implicit-lod
/// sample, a counted loop and a final global store.
fn fragment_like() -> Function {
    let mut b = FunctionBuilder::new("frag");
    let coord = b.param(32, 2, true);
    let kill = b.param(1, 1, true);
    let out_addr = b.param(64, 1, true);

    let limit = b.intrinsic(
        Intrinsic::LoadUniform {
            binding: ResourceBinding::simple(0, 0),
            offset: 0,
        },
        &[],
        Some(vinfo(32, 1, false)),
    );
    let limit = limit.expect("load defines a value");

    b.intrinsic(Intrinsic::DiscardIf, &[kill], None);

    let color = b.tex(
        Tex {
            op: TexOp::Sample,
            dim: TexDim::D2,
            is_array: false,
            resource: ResourceBinding::simple(0, 16),
            sampler: ResourceBinding::simple(0, 80),
            coord,
            offset: None,
            bias: None,
            compare: None,
            ddx: None,
            ddy: None,
            lod: None,
            sample_index: None,
            level_zero: false,
        },
        4,
    );
    let red = b.extract(color, 0);

    let zero = b.const_u32(0);
    let one = b.const_u32(1);
    b.begin_loop();
    let i_info = b.value_info(zero);
    let i = b.phi(&[zero, zero], i_info);
    let next = b.alu(AluOp::IAdd, &[i, one]);
    let done = b.alu(AluOp::IGe, &[next, limit]);
    b.begin_if(done);
    b.brk();
    b.end_if();
    b.end_loop();

    let sum = b.alu(AluOp::FAdd, &[red, red]);
    b.intrinsic(
        Intrinsic::StoreGlobal {
            byte_size: 4,
            coherent: false,
        },
        &[out_addr, sum],
        None,
    );
    b.finish()
}

#[test]
fn fragment_pipeline_selects_across_generations() {
    let f = fragment_like();
    for gen in [
        GpuGeneration::Gfx7,
        GpuGeneration::Gfx8,
        GpuGeneration::Gfx9,
        GpuGeneration::Gfx10,
    ] {
        let p = select_for(&f, gen);
        assert!(p.needs_exact, "discard taints the program on {:?}", gen);
        assert!(has(&p, Opcode::PDemote));
        assert!(has(&p, Opcode::ImageSample));

        let first = &p.blocks[0].instrs[0];
        assert_eq!(first.opcode, Opcode::PStartpgm);
        let last = p.blocks.last().unwrap().instrs.last().unwrap();
        assert_eq!(last.opcode, Opcode::SEndpgm);

        assert!(p.blocks.iter().any(|b| b.kind.contains(BlockKind::LOOP_HEADER)));
        assert!(p.blocks.iter().any(|b| b.kind.contains(BlockKind::LOOP_EXIT)));
    }
}

#[test]
fn fragment_pipeline_picks_the_store_family_per_generation() {
    let f = fragment_like();
    assert!(has(&select_for(&f, GpuGeneration::Gfx8), Opcode::FlatStoreDword));
    assert!(has(&select_for(&f, GpuGeneration::Gfx10), Opcode::GlobalStoreDword));
}

/// A compute-style program: per-lane index feeding a shared-memory
/// histogram bump under a divergent condition.
fn compute_like() -> Function {
    let mut b = FunctionBuilder::new("histogram");
    let n = b.param(32, 1, false);
    let lane = b.intrinsic(Intrinsic::LaneIndex, &[], Some(vinfo(32, 1, true)));
    let lane = lane.expect("lane index defines a value");
    let in_range = b.alu(AluOp::ILt, &[lane, n]);
    let one = b.const_u32(1);
    b.begin_if(in_range);
    b.intrinsic(
        Intrinsic::SharedAtomic { op: AtomicOp::Add },
        &[lane, one],
        Some(vinfo(32, 1, true)),
    );
    b.end_if();
    b.finish()
}

#[test]
fn compute_pipeline_counts_lanes_into_shared_memory() {
    let f = compute_like();
    let p = select_for(&f, GpuGeneration::Gfx10);
    assert!(has(&p, Opcode::VMbcntLoU32B32));
    assert!(has(&p, Opcode::DsAtomic(AtomicOp::Add)));
    // Divergent branch machinery around the atomic.
    assert!(has(&p, Opcode::SAndSaveexecB64));
    assert!(p.blocks.iter().any(|b| b.kind.contains(BlockKind::INVERT)));
}

#[test]
fn compute_pipeline_selects_in_wave32() {
    let f = compute_like();
    let config = Config {
        gen: GpuGeneration::Gfx10,
        wave64: false,
    };
    let p = select_program(&f, config).expect("selection succeeds");
    verify(&p).expect("selected program verifies");
    // The exec dance narrows to 32-bit mask arithmetic.
    assert!(has(&p, Opcode::SAndSaveexecB32));
    assert!(!has(&p, Opcode::SAndSaveexecB64));
    assert!(!has(&p, Opcode::VMbcntHiU32B32));
}

#[test]
fn display_names_blocks_and_flags() {
    let f = compute_like();
    let p = select_for(&f, GpuGeneration::Gfx10);
    let text = format!("{}", p);
    assert!(text.contains("BB0"));
    assert!(text.contains("needs_exact"));
}
