#![cfg(test)]

use crate::isa::{
    verify::verify, Config, GpuGeneration, InstrExtra, Instruction, Opcode, Operand, Program,
};
use crate::sir::builder::FunctionBuilder;
use crate::sir::{AtomicOp, Function, Intrinsic, ResourceBinding, ResourceIndex, TexDim, ValueInfo, VtxFormat};
use crate::CompilerError;

use super::select_program;

fn select_for(f: &Function, gen: GpuGeneration) -> Program {
    let p = select_program(f, Config::new(gen)).expect("selection succeeds");
    verify(&p).expect("selected program verifies");
    p
}

fn select(f: &Function) -> Program {
    select_for(f, GpuGeneration::Gfx10)
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

// =============================================================================
// Shared memory
// =============================================================================

#[test]
fn shared_load_12_bytes_narrows_before_gfx7() {
    let mut b = FunctionBuilder::new("lds12");
    let addr = b.param(32, 1, true);
    b.intrinsic(
        Intrinsic::LoadShared {
            byte_size: 12,
            align: 16,
            offset: 0,
        },
        &[addr],
        Some(vinfo(32, 3, true)),
    );
    let f = b.finish();

    // b96 transfers need GFX7; GFX6 splits into b64 + b32.
    let p6 = select_for(&f, GpuGeneration::Gfx6);
    assert!(has(&p6, Opcode::DsReadB64));
    assert!(has(&p6, Opcode::DsReadB32));
    assert!(!has(&p6, Opcode::DsReadB96));
    assert_eq!(find(&p6, Opcode::DsReadB32).memory().unwrap().offset, 8);

    let p7 = select_for(&f, GpuGeneration::Gfx7);
    assert_eq!(count(&p7, Opcode::DsReadB96), 1);
    assert!(!has(&p7, Opcode::PCreateVector));
}

#[test]
fn shared_load_16_bytes_at_align_8_pairs_b64() {
    let mut b = FunctionBuilder::new("lds16");
    let addr = b.param(32, 1, true);
    b.intrinsic(
        Intrinsic::LoadShared {
            byte_size: 16,
            align: 8,
            offset: 0,
        },
        &[addr],
        Some(vinfo(32, 4, true)),
    );
    let f = b.finish();

    let p = select(&f);
    let load = find(&p, Opcode::DsRead2B64);
    let mem = load.memory().unwrap();
    // Offsets are in element units for the paired forms.
    assert_eq!(mem.offset, 0);
    assert_eq!(mem.offset1, 1);
    assert!(!has(&p, Opcode::DsReadB128));
}

#[test]
fn shared_load_folds_constant_address_into_offset() {
    let mut b = FunctionBuilder::new("lds_const");
    let addr = b.const_u32(64);
    b.intrinsic(
        Intrinsic::LoadShared {
            byte_size: 4,
            align: 4,
            offset: 4,
        },
        &[addr],
        Some(vinfo(32, 1, true)),
    );
    let f = b.finish();

    let p = select(&f);
    let load = find(&p, Opcode::DsReadB32);
    assert_eq!(load.memory().unwrap().offset, 68);
    // The address register collapses to zero.
    assert!(find(&p, Opcode::VMovB32).operands.contains(&Operand::c32(0)));
}

#[test]
fn shared_load_offset_past_16_bits_moves_into_the_address() {
    let mut b = FunctionBuilder::new("lds_far");
    let addr = b.const_u32(0x1_0000);
    b.intrinsic(
        Intrinsic::LoadShared {
            byte_size: 4,
            align: 4,
            offset: 0,
        },
        &[addr],
        Some(vinfo(32, 1, true)),
    );
    let f = b.finish();

    let p = select(&f);
    // The folded constant no longer fits the immediate field.
    let add = find(&p, Opcode::VAddU32);
    assert!(add.operands.contains(&Operand::c32(0x1_0000)));
    assert_eq!(find(&p, Opcode::DsReadB32).memory().unwrap().offset, 0);
}

#[test]
fn shared_store_uses_paired_dwords_at_align_4() {
    let mut b = FunctionBuilder::new("lds_store");
    let addr = b.param(32, 1, true);
    let data = b.param(64, 1, true);
    b.intrinsic(
        Intrinsic::StoreShared {
            byte_size: 8,
            align: 4,
            offset: 0,
        },
        &[addr, data],
        None,
    );
    let f = b.finish();

    let p = select(&f);
    let store = find(&p, Opcode::DsWrite2B32);
    // Address plus the two element slots.
    assert_eq!(store.operands.len(), 3);
    assert_eq!(store.memory().unwrap().offset1, 1);
    assert!(has(&p, Opcode::PSplitVector));
}

#[test]
fn shared_atomic_with_result_needs_exact_dispatch() {
    let mut b = FunctionBuilder::new("lds_atomic");
    let addr = b.param(32, 1, true);
    let data = b.param(32, 1, true);
    b.intrinsic(
        Intrinsic::SharedAtomic { op: AtomicOp::Add },
        &[addr, data],
        Some(vinfo(32, 1, true)),
    );
    let f = b.finish();

    let p = select(&f);
    assert!(p.needs_exact);
    let atomic = find(&p, Opcode::DsAtomic(AtomicOp::Add));
    assert!(atomic.memory().unwrap().glc);
    assert_eq!(atomic.defs.len(), 1);
}

// =============================================================================
// Global memory
// =============================================================================

#[test]
fn global_load_picks_the_address_family_by_generation() {
    let mut b = FunctionBuilder::new("global");
    let addr = b.param(64, 1, true);
    b.intrinsic(
        Intrinsic::LoadGlobal {
            byte_size: 4,
            coherent: false,
        },
        &[addr],
        Some(vinfo(32, 1, true)),
    );
    let f = b.finish();

    assert!(has(&select_for(&f, GpuGeneration::Gfx7), Opcode::FlatLoadDword));
    assert!(has(&select_for(&f, GpuGeneration::Gfx9), Opcode::GlobalLoadDword));
    let err = select_program(&f, Config::new(GpuGeneration::Gfx6)).unwrap_err();
    assert!(matches!(err, CompilerError::Unsupported(_)));
}

#[test]
fn coherent_global_access_sets_cache_flags() {
    let mut b = FunctionBuilder::new("coherent");
    let addr = b.param(64, 1, true);
    let data = b.param(32, 1, true);
    b.intrinsic(
        Intrinsic::StoreGlobal {
            byte_size: 4,
            coherent: true,
        },
        &[addr, data],
        None,
    );
    let f = b.finish();

    let p10 = select(&f);
    let mem = find(&p10, Opcode::GlobalStoreDword).memory().unwrap().to_owned();
    assert!(mem.glc);
    assert!(mem.dlc);

    // dlc exists only on GFX10+.
    let p9 = select_for(&f, GpuGeneration::Gfx9);
    let mem = find(&p9, Opcode::GlobalStoreDword).memory().unwrap().to_owned();
    assert!(mem.glc);
    assert!(!mem.dlc);
}

#[test]
fn global_cmpswap_packs_data_and_compare() {
    let mut b = FunctionBuilder::new("cmpswap");
    let addr = b.param(64, 1, true);
    let data = b.param(32, 1, true);
    let cmp = b.param(32, 1, true);
    b.intrinsic(
        Intrinsic::GlobalAtomic { op: AtomicOp::CmpSwap },
        &[addr, data, cmp],
        Some(vinfo(32, 1, true)),
    );
    let f = b.finish();

    let p = select(&f);
    assert!(p.needs_exact);
    let pack = find(&p, Opcode::PCreateVector);
    assert_eq!(pack.operands.len(), 2);
    assert!(has(&p, Opcode::GlobalAtomic(AtomicOp::CmpSwap)));
}

// =============================================================================
// Buffers
// =============================================================================

#[test]
fn uniform_buffer_load_stays_on_the_scalar_bus() {
    let mut b = FunctionBuilder::new("sbuffer");
    let offset = b.param(32, 1, false);
    b.intrinsic(
        Intrinsic::LoadBuffer {
            binding: ResourceBinding::simple(0, 0),
            byte_size: 16,
            coherent: false,
        },
        &[offset],
        Some(vinfo(32, 4, false)),
    );
    let f = b.finish();

    let p = select(&f);
    assert!(has(&p, Opcode::SLoadDwordx4));
    assert!(has(&p, Opcode::SBufferLoadDwordx4));
    assert!(!has(&p, Opcode::BufferLoadDwordx4));
    // The descriptor-set pointer joined the wave inputs.
    assert_eq!(p.blocks[0].instrs[0].defs.len(), 2);
}

#[test]
fn divergent_buffer_offset_forces_mubuf() {
    let mut b = FunctionBuilder::new("vbuffer");
    let offset = b.param(32, 1, true);
    b.intrinsic(
        Intrinsic::LoadBuffer {
            binding: ResourceBinding::simple(0, 0),
            byte_size: 16,
            coherent: false,
        },
        &[offset],
        Some(vinfo(32, 4, true)),
    );
    let f = b.finish();

    let p = select(&f);
    assert!(has(&p, Opcode::BufferLoadDwordx4));
    assert!(!has(&p, Opcode::SBufferLoadDwordx4));
}

#[test]
fn buffer_load_chunks_past_four_dwords() {
    let mut b = FunctionBuilder::new("vbuffer_wide");
    let offset = b.param(32, 1, true);
    b.intrinsic(
        Intrinsic::LoadBuffer {
            binding: ResourceBinding::simple(0, 0),
            byte_size: 24,
            coherent: false,
        },
        &[offset],
        Some(vinfo(32, 6, true)),
    );
    let f = b.finish();

    let p = select(&f);
    assert!(has(&p, Opcode::BufferLoadDwordx4));
    let tail = find(&p, Opcode::BufferLoadDwordx2);
    assert_eq!(tail.memory().unwrap().offset, 16);
}

#[test]
fn dynamic_descriptor_index_scales_by_stride() {
    let mut b = FunctionBuilder::new("desc_array");
    let idx = b.param(32, 1, false);
    let offset = b.param(32, 1, true);
    b.intrinsic(
        Intrinsic::LoadBuffer {
            binding: ResourceBinding {
                set: 0,
                binding_offset: 32,
                stride: 16,
                index: ResourceIndex::Dynamic(idx),
            },
            byte_size: 4,
            coherent: false,
        },
        &[offset],
        Some(vinfo(32, 1, true)),
    );
    let f = b.finish();

    let p = select(&f);
    let mul = find(&p, Opcode::SMulI32);
    assert!(mul.operands.contains(&Operand::c32(16)));
    let desc = find(&p, Opcode::SLoadDwordx4);
    // Base pointer plus the scaled index.
    assert_eq!(desc.operands.len(), 2);
    assert_eq!(desc.memory().unwrap().offset, 32);
}

#[test]
fn load_uniform_reads_at_the_binding_offset() {
    let mut b = FunctionBuilder::new("ubo");
    b.intrinsic(
        Intrinsic::LoadUniform {
            binding: ResourceBinding::simple(1, 0),
            offset: 48,
        },
        &[],
        Some(vinfo(32, 2, false)),
    );
    let f = b.finish();

    let p = select(&f);
    let load = find(&p, Opcode::SBufferLoadDwordx2);
    assert_eq!(load.memory().unwrap().offset, 48);
}

// =============================================================================
// Attributes and images
// =============================================================================

#[test]
fn attribute_fetch_widens_missing_channels() {
    let mut b = FunctionBuilder::new("attr");
    let index = b.param(32, 1, true);
    b.intrinsic(
        Intrinsic::LoadAttribute {
            binding: ResourceBinding::simple(0, 0),
            format: VtxFormat {
                channels: 2,
                channel_bytes: 4,
            },
            num_channels: 4,
            offset: 12,
        },
        &[index],
        Some(vinfo(32, 4, true)),
    );
    let f = b.finish();

    let p = select(&f);
    let fetch = find(&p, Opcode::TbufferLoadFormatXy);
    assert_eq!(fetch.memory().unwrap().offset, 12);
    // .z defaults to 0.0, .w to 1.0.
    assert!(instrs(&p)
        .iter()
        .any(|i| i.opcode == Opcode::VMovB32 && i.operands.contains(&Operand::c32(0x3f80_0000))));
    let widen = instrs(&p)
        .into_iter()
        .find(|i| i.opcode == Opcode::PCreateVector && i.operands.len() == 4)
        .expect("widened vector");
    assert_eq!(widen.operands.len(), 4);
}

#[test]
fn off_dword_attribute_fetches_channels_one_at_a_time() {
    let mut b = FunctionBuilder::new("attr_packed");
    let index = b.param(32, 1, true);
    b.intrinsic(
        Intrinsic::LoadAttribute {
            binding: ResourceBinding::simple(0, 0),
            format: VtxFormat {
                channels: 2,
                channel_bytes: 2,
            },
            num_channels: 2,
            offset: 2,
        },
        &[index],
        Some(vinfo(32, 2, true)),
    );
    let f = b.finish();

    let p = select(&f);
    assert!(!has(&p, Opcode::TbufferLoadFormatXy));
    let fetches: Vec<_> = instrs(&p)
        .into_iter()
        .filter(|i| i.opcode == Opcode::TbufferLoadFormatX)
        .collect();
    assert_eq!(fetches.len(), 2);
    assert_eq!(fetches[0].memory().unwrap().offset, 2);
    assert_eq!(fetches[1].memory().unwrap().offset, 4);
    assert!(has(&p, Opcode::PCreateVector));
}

#[test]
fn three_channel_attribute_promotes_on_gfx6() {
    let mut b = FunctionBuilder::new("attr3");
    let index = b.param(32, 1, true);
    b.intrinsic(
        Intrinsic::LoadAttribute {
            binding: ResourceBinding::simple(0, 0),
            format: VtxFormat {
                channels: 3,
                channel_bytes: 4,
            },
            num_channels: 3,
            offset: 0,
        },
        &[index],
        Some(vinfo(32, 3, true)),
    );
    let f = b.finish();

    // GFX6 fetches four channels and drops the format-expanded fourth.
    let p6 = select_for(&f, GpuGeneration::Gfx6);
    assert!(has(&p6, Opcode::TbufferLoadFormatXyzw));
    assert!(!has(&p6, Opcode::TbufferLoadFormatXyz));
    assert!(has(&p6, Opcode::PSplitVector));

    let p7 = select_for(&f, GpuGeneration::Gfx7);
    assert!(has(&p7, Opcode::TbufferLoadFormatXyz));
    assert!(!has(&p7, Opcode::PCreateVector));
}

#[test]
fn image_load_masks_the_requested_components() {
    let mut b = FunctionBuilder::new("img");
    let cx = b.param(32, 1, true);
    let cy = b.param(32, 1, true);
    let coords = b.vec(&[cx, cy]);
    b.intrinsic(
        Intrinsic::ImageLoad {
            binding: ResourceBinding::simple(0, 0),
            dim: TexDim::D2,
            array: false,
            ms: false,
        },
        &[coords],
        Some(vinfo(32, 4, true)),
    );
    let f = b.finish();

    let p = select(&f);
    let load = find(&p, Opcode::ImageLoad);
    let InstrExtra::Image(info) = load.extra else {
        panic!("image instruction without image info");
    };
    assert_eq!(info.dmask, 0xf);
    assert_eq!(info.dim, TexDim::D2);
    // Image descriptors are eight dwords, two scalar fetches.
    assert_eq!(count(&p, Opcode::SLoadDwordx4), 2);
}
