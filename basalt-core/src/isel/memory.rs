//! Memory access lowering.
//!
//! - Workgroup-shared memory uses DS ops with greedy chunk sizing: the
//!   widest transfer the remaining size, the effective alignment and the
//!   generation allow. 96/128-bit DS transfers need GFX7 and 16-byte
//!   alignment; 8-byte-aligned pairs use the two-offset forms. Immediate
//!   offsets past the 16-bit field fold into the address register.
//! - Global memory uses FLAT (GFX7/8) or GLOBAL (GFX9+) ops.
//! - Structured buffers go through a four-dword descriptor fetched with
//!   scalar loads from the descriptor-set base pointer; wave-uniform
//!   non-coherent loads stay on the scalar bus.
//! - Vertex attributes are typed buffer fetches; channels the format
//!   does not store are widened with 0.0 and 1.0 defaults.
//!
//! Value-returning atomics set the program's `needs_exact` flag since
//! helper lanes must not perform them.

use crate::error::Result;
use crate::isa::{
    Definition, GpuGeneration, ImageInfo, InstrExtra, Instruction, MemoryInfo, Opcode, Operand, RegClass, Temp,
};
use crate::sir::{self, AtomicOp, Intrinsic, ResourceBinding, ResourceIndex, ValueId, VtxFormat};
use crate::{bail_internal, bail_isel};

use super::alu::emit_vadd32;
use super::values::{as_uniform, as_vgpr, create_vector, emit_split_vector, expand_vector};
use super::Context;

pub(crate) fn lower_memory(ctx: &mut Context, instr: &sir::Instr, op: &Intrinsic, srcs: &[ValueId]) -> Result<()> {
    match op {
        Intrinsic::LoadShared {
            byte_size,
            align,
            offset,
        } => lower_load_shared(ctx, instr, srcs[0], *byte_size, *align, *offset),
        Intrinsic::StoreShared {
            byte_size,
            align,
            offset,
        } => lower_store_shared(ctx, srcs[0], srcs[1], *byte_size, *align, *offset),
        Intrinsic::SharedAtomic { op } => lower_shared_atomic(ctx, instr, *op, srcs),
        Intrinsic::LoadGlobal { byte_size, coherent } => {
            lower_load_global(ctx, instr, srcs[0], *byte_size, *coherent)
        }
        Intrinsic::StoreGlobal { byte_size, coherent } => {
            lower_store_global(ctx, srcs[0], srcs[1], *byte_size, *coherent)
        }
        Intrinsic::GlobalAtomic { op } => lower_global_atomic(ctx, instr, *op, srcs),
        Intrinsic::LoadBuffer {
            binding,
            byte_size,
            coherent,
        } => lower_load_buffer(ctx, instr, binding, srcs[0], *byte_size, *coherent),
        Intrinsic::StoreBuffer {
            binding,
            byte_size,
            coherent,
        } => lower_store_buffer(ctx, binding, srcs[0], srcs[1], *byte_size, *coherent),
        Intrinsic::BufferAtomic { binding, op } => lower_buffer_atomic(ctx, instr, binding, *op, srcs),
        Intrinsic::LoadUniform { binding, offset } => lower_load_uniform(ctx, instr, binding, srcs, *offset),
        Intrinsic::LoadAttribute {
            binding,
            format,
            num_channels,
            offset,
        } => lower_load_attribute(ctx, instr, binding, srcs[0], *format, *num_channels, *offset),
        Intrinsic::ImageLoad { binding, dim, array, ms } => {
            lower_image_load(ctx, instr, binding, srcs, *dim, *array, *ms)
        }
        Intrinsic::ImageStore { binding, dim, array } => lower_image_store(ctx, binding, srcs, *dim, *array),
        _ => bail_internal!("not a memory intrinsic: {:?}", op),
    }
}

// =============================================================================
// Descriptors
// =============================================================================

/// Scalar register pair holding the base address of a descriptor set,
/// modeled as an extra wave-preloaded input.
fn set_ptr(ctx: &mut Context, set: u32) -> Temp {
    if let Some(&t) = ctx.set_ptrs.get(&set) {
        return t;
    }
    let t = ctx.new_temp(RegClass::S2);
    ctx.set_ptrs.insert(set, t);
    // The entry block opens with the start pseudo-instruction.
    ctx.program.blocks[0].instrs[0].defs.push(Definition::Temp(t));
    t
}

/// Fetch a resource descriptor (4 or 8 dwords) into scalar registers.
pub(crate) fn load_descriptor(ctx: &mut Context, binding: &ResourceBinding, dwords: u32) -> Result<Temp> {
    let ptr = set_ptr(ctx, binding.set);
    let (const_off, soffset) = match binding.index {
        ResourceIndex::Const(i) => (binding.binding_offset + i * binding.stride, None),
        ResourceIndex::Dynamic(v) => {
            if ctx.divergent(v) {
                bail_isel!("divergent resource index");
            }
            let idx = ctx.get_operand(v);
            let idx = as_uniform(ctx, idx)?;
            let byte_idx = ctx.new_temp(RegClass::S1);
            ctx.emit(Instruction::new(
                Opcode::SMulI32,
                vec![Operand::Temp(idx), Operand::c32(binding.stride)],
                vec![Definition::Temp(byte_idx)],
            ));
            (binding.binding_offset, Some(byte_idx))
        }
    };

    let mut ops = vec![Operand::Temp(ptr)];
    if let Some(s) = soffset {
        ops.push(Operand::Temp(s));
    }
    match dwords {
        4 => {
            let desc = ctx.new_temp(RegClass::S4);
            ctx.emit(Instruction::with_extra(
                Opcode::SLoadDwordx4,
                ops,
                vec![Definition::Temp(desc)],
                InstrExtra::Memory(MemoryInfo::offset(const_off)),
            ));
            Ok(desc)
        }
        8 => {
            let lo = ctx.new_temp(RegClass::S4);
            let hi = ctx.new_temp(RegClass::S4);
            ctx.emit(Instruction::with_extra(
                Opcode::SLoadDwordx4,
                ops.clone(),
                vec![Definition::Temp(lo)],
                InstrExtra::Memory(MemoryInfo::offset(const_off)),
            ));
            ctx.emit(Instruction::with_extra(
                Opcode::SLoadDwordx4,
                ops,
                vec![Definition::Temp(hi)],
                InstrExtra::Memory(MemoryInfo::offset(const_off + 16)),
            ));
            let desc = ctx.new_temp(RegClass::S8);
            create_vector(ctx, desc, vec![Operand::Temp(lo), Operand::Temp(hi)]);
            Ok(desc)
        }
        _ => bail_internal!("descriptor width {} dwords", dwords),
    }
}

// =============================================================================
// Shared memory
// =============================================================================

/// Alignment that actually holds at `base_align + offset`.
fn effective_align(align: u32, offset: u32) -> u32 {
    if offset == 0 {
        align
    } else {
        align.min(1 << offset.trailing_zeros())
    }
}

/// One DS transfer chunk: byte size and the read/write opcodes, with the
/// paired forms flagged (they split the offset into two element slots).
struct DsChunk {
    bytes: u32,
    read: Opcode,
    write: Opcode,
    paired_elem_bytes: Option<u32>,
}

/// Pick the widest DS transfer for `remaining` bytes at `align`.
fn ds_chunk(remaining: u32, align: u32, offset: u32, gen: GpuGeneration) -> DsChunk {
    let wide_ok = gen >= GpuGeneration::Gfx7 && align % 16 == 0;
    if remaining >= 16 && wide_ok {
        DsChunk {
            bytes: 16,
            read: Opcode::DsReadB128,
            write: Opcode::DsWriteB128,
            paired_elem_bytes: None,
        }
    } else if remaining >= 16 && align % 8 == 0 && offset % 8 == 0 && offset / 8 + 1 <= 255 {
        DsChunk {
            bytes: 16,
            read: Opcode::DsRead2B64,
            write: Opcode::DsWrite2B64,
            paired_elem_bytes: Some(8),
        }
    } else if remaining >= 12 && wide_ok {
        DsChunk {
            bytes: 12,
            read: Opcode::DsReadB96,
            write: Opcode::DsWriteB96,
            paired_elem_bytes: None,
        }
    } else if remaining >= 8 && align % 8 == 0 {
        DsChunk {
            bytes: 8,
            read: Opcode::DsReadB64,
            write: Opcode::DsWriteB64,
            paired_elem_bytes: None,
        }
    } else if remaining >= 8 && offset % 4 == 0 && offset / 4 + 1 <= 255 {
        DsChunk {
            bytes: 8,
            read: Opcode::DsRead2B32,
            write: Opcode::DsWrite2B32,
            paired_elem_bytes: Some(4),
        }
    } else {
        DsChunk {
            bytes: 4,
            read: Opcode::DsReadB32,
            write: Opcode::DsWriteB32,
            paired_elem_bytes: None,
        }
    }
}

/// Shared-memory address operand, folding a constant address into the
/// instruction offset.
fn shared_address(ctx: &mut Context, addr: ValueId, offset: &mut u32) -> Operand {
    if let Some(c) = ctx.constant_of(addr) {
        if let crate::sir::ConstValue::U32(v) = c {
            *offset += v;
            return as_vgpr(ctx, Operand::c32(0));
        }
    }
    let op = ctx.get_operand(addr);
    as_vgpr(ctx, op)
}

/// The DS offset field is 16 bits. When the accumulated immediate would
/// not fit, add it to the address register and start over from zero.
fn fold_ds_offset(ctx: &mut Context, vaddr: Operand, offset: &mut u32, byte_size: u32) -> Operand {
    if u64::from(*offset) + u64::from(byte_size) <= 0x1_0000 {
        return vaddr;
    }
    let gen = ctx.config().gen;
    let folded = ctx.new_temp(RegClass::V1);
    emit_vadd32(ctx, folded, Operand::c32(*offset), vaddr, gen, false);
    *offset = 0;
    Operand::Temp(folded)
}

fn lower_load_shared(
    ctx: &mut Context,
    instr: &sir::Instr,
    addr: ValueId,
    byte_size: u32,
    align: u32,
    offset: u32,
) -> Result<()> {
    if byte_size % 4 != 0 || align % 4 != 0 {
        bail_isel!("sub-dword shared access");
    }
    let def = instr.def.expect("load defines a value");
    let dst = ctx.get_temp(def)?;
    let mut base_off = offset;
    let vaddr = shared_address(ctx, addr, &mut base_off);
    let vaddr = fold_ds_offset(ctx, vaddr, &mut base_off, byte_size);
    let gen = ctx.config().gen;

    let mut parts: Vec<Operand> = Vec::new();
    let mut done = 0u32;
    while done < byte_size {
        let off = base_off + done;
        let chunk = ds_chunk(byte_size - done, effective_align(align, off), off, gen);
        let part = ctx.new_temp(RegClass::vector(chunk.bytes / 4));
        let mem = match chunk.paired_elem_bytes {
            Some(elem) => MemoryInfo {
                offset: off / elem,
                offset1: off / elem + 1,
                ..Default::default()
            },
            None => MemoryInfo::offset(off),
        };
        ctx.emit(Instruction::with_extra(
            chunk.read,
            vec![vaddr],
            vec![Definition::Temp(part)],
            InstrExtra::Memory(mem),
        ));
        parts.push(Operand::Temp(part));
        done += chunk.bytes;
    }

    if parts.len() == 1 {
        if let Some(t) = parts[0].as_temp() {
            if t.rc == dst.rc {
                // Retarget a single full-width chunk directly.
                if let Some(Definition::Temp(d)) = ctx.last_instr_mut().defs.first_mut() {
                    *d = dst;
                }
                return Ok(());
            }
        }
    }
    create_vector(ctx, dst, parts);
    Ok(())
}

fn lower_store_shared(
    ctx: &mut Context,
    addr: ValueId,
    data: ValueId,
    byte_size: u32,
    align: u32,
    offset: u32,
) -> Result<()> {
    if byte_size % 4 != 0 || align % 4 != 0 {
        bail_isel!("sub-dword shared access");
    }
    let mut base_off = offset;
    let vaddr = shared_address(ctx, addr, &mut base_off);
    let vaddr = fold_ds_offset(ctx, vaddr, &mut base_off, byte_size);
    let data_op = ctx.get_operand(data);
    let data_op = as_vgpr(ctx, data_op);
    let Some(data_temp) = data_op.as_temp() else {
        bail_internal!("store data not in registers");
    };
    let dwords = emit_split_vector(ctx, data_temp, data_temp.rc.size)?;
    let gen = ctx.config().gen;

    let mut done = 0u32;
    while done < byte_size {
        let off = base_off + done;
        let chunk = ds_chunk(byte_size - done, effective_align(align, off), off, gen);
        let first = (done / 4) as usize;
        let count = (chunk.bytes / 4) as usize;
        let (ops, mem) = match chunk.paired_elem_bytes {
            Some(elem) => {
                let half = count / 2;
                let d0 = gather_dwords(ctx, &dwords[first..first + half]);
                let d1 = gather_dwords(ctx, &dwords[first + half..first + count]);
                (
                    vec![vaddr, d0, d1],
                    MemoryInfo {
                        offset: off / elem,
                        offset1: off / elem + 1,
                        ..Default::default()
                    },
                )
            }
            None => {
                let d = gather_dwords(ctx, &dwords[first..first + count]);
                (vec![vaddr, d], MemoryInfo::offset(off))
            }
        };
        ctx.emit(Instruction::with_extra(chunk.write, ops, vec![], InstrExtra::Memory(mem)));
        done += chunk.bytes;
    }
    Ok(())
}

/// Regroup contiguous dword temps into one operand.
fn gather_dwords(ctx: &mut Context, dwords: &[Temp]) -> Operand {
    if dwords.len() == 1 {
        return Operand::Temp(dwords[0]);
    }
    let dst = ctx.new_temp(RegClass::vector(dwords.len() as u32));
    create_vector(ctx, dst, dwords.iter().map(|&t| Operand::Temp(t)).collect());
    Operand::Temp(dst)
}

fn lower_shared_atomic(ctx: &mut Context, instr: &sir::Instr, op: AtomicOp, srcs: &[ValueId]) -> Result<()> {
    let addr = ctx.get_operand(srcs[0]);
    let vaddr = as_vgpr(ctx, addr);
    let data = ctx.get_operand(srcs[1]);
    let data = as_vgpr(ctx, data);
    let mut ops = vec![vaddr, data];
    if op == AtomicOp::CmpSwap {
        let cmp = ctx.get_operand(srcs[2]);
        ops.push(as_vgpr(ctx, cmp));
    }
    let mut mem = MemoryInfo::default();
    let defs = match instr.def {
        Some(def) => {
            ctx.program.needs_exact = true;
            mem.glc = true;
            vec![Definition::Temp(ctx.get_temp(def)?)]
        }
        None => vec![],
    };
    ctx.emit(Instruction::with_extra(
        Opcode::DsAtomic(op),
        ops,
        defs,
        InstrExtra::Memory(mem),
    ));
    Ok(())
}

// =============================================================================
// Global memory
// =============================================================================

/// Load/store opcode tables for the flat and global families, indexed by
/// dword count.
fn global_opcodes(gen: GpuGeneration) -> Result<(&'static [Opcode; 4], &'static [Opcode; 4])> {
    const FLAT_LOAD: [Opcode; 4] = [
        Opcode::FlatLoadDword,
        Opcode::FlatLoadDwordx2,
        Opcode::FlatLoadDwordx3,
        Opcode::FlatLoadDwordx4,
    ];
    const FLAT_STORE: [Opcode; 4] = [
        Opcode::FlatStoreDword,
        Opcode::FlatStoreDwordx2,
        Opcode::FlatStoreDwordx3,
        Opcode::FlatStoreDwordx4,
    ];
    const GLOBAL_LOAD: [Opcode; 4] = [
        Opcode::GlobalLoadDword,
        Opcode::GlobalLoadDwordx2,
        Opcode::GlobalLoadDwordx3,
        Opcode::GlobalLoadDwordx4,
    ];
    const GLOBAL_STORE: [Opcode; 4] = [
        Opcode::GlobalStoreDword,
        Opcode::GlobalStoreDwordx2,
        Opcode::GlobalStoreDwordx3,
        Opcode::GlobalStoreDwordx4,
    ];
    match gen {
        GpuGeneration::Gfx6 => bail_isel!("global addressing needs GFX7 or later"),
        GpuGeneration::Gfx7 | GpuGeneration::Gfx8 => Ok((&FLAT_LOAD, &FLAT_STORE)),
        _ => Ok((&GLOBAL_LOAD, &GLOBAL_STORE)),
    }
}

fn coherent_flags(ctx: &Context, coherent: bool) -> MemoryInfo {
    MemoryInfo {
        glc: coherent,
        dlc: coherent && ctx.config().gen >= GpuGeneration::Gfx10,
        ..Default::default()
    }
}

fn lower_load_global(ctx: &mut Context, instr: &sir::Instr, addr: ValueId, byte_size: u32, coherent: bool) -> Result<()> {
    if byte_size % 4 != 0 {
        bail_isel!("sub-dword global access");
    }
    let def = instr.def.expect("load defines a value");
    let dst = ctx.get_temp(def)?;
    let (loads, _) = global_opcodes(ctx.config().gen)?;
    let addr_op = ctx.get_operand(addr);
    let vaddr = as_vgpr(ctx, addr_op);
    let mem = coherent_flags(ctx, coherent);

    let mut parts = Vec::new();
    let mut done = 0u32;
    while done < byte_size {
        let dwords = ((byte_size - done) / 4).min(4);
        let part = ctx.new_temp(RegClass::vector(dwords));
        ctx.emit(Instruction::with_extra(
            loads[dwords as usize - 1],
            vec![vaddr],
            vec![Definition::Temp(part)],
            InstrExtra::Memory(MemoryInfo {
                offset: done,
                ..mem
            }),
        ));
        parts.push(Operand::Temp(part));
        done += dwords * 4;
    }
    if parts.len() == 1 {
        if let Some(Definition::Temp(d)) = ctx.last_instr_mut().defs.first_mut() {
            *d = dst;
        }
        return Ok(());
    }
    create_vector(ctx, dst, parts);
    Ok(())
}

fn lower_store_global(ctx: &mut Context, addr: ValueId, data: ValueId, byte_size: u32, coherent: bool) -> Result<()> {
    if byte_size % 4 != 0 {
        bail_isel!("sub-dword global access");
    }
    let (_, stores) = global_opcodes(ctx.config().gen)?;
    let addr_op = ctx.get_operand(addr);
    let vaddr = as_vgpr(ctx, addr_op);
    let data_op = ctx.get_operand(data);
    let data_op = as_vgpr(ctx, data_op);
    let Some(data_temp) = data_op.as_temp() else {
        bail_internal!("store data not in registers");
    };
    let dwords = emit_split_vector(ctx, data_temp, data_temp.rc.size)?;
    let mem = coherent_flags(ctx, coherent);

    let mut done = 0u32;
    while done < byte_size {
        let n = ((byte_size - done) / 4).min(4);
        let first = (done / 4) as usize;
        let d = gather_dwords(ctx, &dwords[first..first + n as usize]);
        ctx.emit(Instruction::with_extra(
            stores[n as usize - 1],
            vec![vaddr, d],
            vec![],
            InstrExtra::Memory(MemoryInfo {
                offset: done,
                ..mem
            }),
        ));
        done += n * 4;
    }
    Ok(())
}

fn lower_global_atomic(ctx: &mut Context, instr: &sir::Instr, op: AtomicOp, srcs: &[ValueId]) -> Result<()> {
    let gen = ctx.config().gen;
    global_opcodes(gen)?; // generation check
    let opcode = if gen >= GpuGeneration::Gfx9 {
        Opcode::GlobalAtomic(op)
    } else {
        Opcode::FlatAtomic(op)
    };
    let addr = ctx.get_operand(srcs[0]);
    let vaddr = as_vgpr(ctx, addr);
    let data = atomic_data(ctx, op, &srcs[1..])?;
    let mut mem = MemoryInfo::default();
    let defs = match instr.def {
        Some(def) => {
            ctx.program.needs_exact = true;
            mem.glc = true;
            vec![Definition::Temp(ctx.get_temp(def)?)]
        }
        None => vec![],
    };
    ctx.emit(Instruction::with_extra(opcode, vec![vaddr, data], defs, InstrExtra::Memory(mem)));
    Ok(())
}

/// Atomic data operand; compare-and-swap packs [data, compare] into one
/// contiguous pair.
fn atomic_data(ctx: &mut Context, op: AtomicOp, srcs: &[ValueId]) -> Result<Operand> {
    let data = ctx.get_operand(srcs[0]);
    let data = as_vgpr(ctx, data);
    if op != AtomicOp::CmpSwap {
        return Ok(data);
    }
    let cmp = ctx.get_operand(srcs[1]);
    let cmp = as_vgpr(ctx, cmp);
    let size = data.rc().map(|rc| rc.size).unwrap_or(1);
    let pair = ctx.new_temp(RegClass::vector(size * 2));
    create_vector(ctx, pair, vec![data, cmp]);
    Ok(Operand::Temp(pair))
}

// =============================================================================
// Structured buffers
// =============================================================================

fn lower_load_buffer(
    ctx: &mut Context,
    instr: &sir::Instr,
    binding: &ResourceBinding,
    offset: ValueId,
    byte_size: u32,
    coherent: bool,
) -> Result<()> {
    if byte_size % 4 != 0 {
        bail_isel!("sub-dword buffer access");
    }
    let def = instr.def.expect("load defines a value");
    let dst = ctx.get_temp(def)?;
    let desc = load_descriptor(ctx, binding, 4)?;

    if !ctx.divergent(offset) && !coherent {
        // Uniform data can stay on the scalar bus.
        let soffset = ctx.get_operand(offset);
        let soffset = as_uniform(ctx, soffset)?;
        let mut parts = Vec::new();
        let mut done = 0u32;
        while done < byte_size {
            let remaining = (byte_size - done) / 4;
            let (dwords, opcode) = if remaining >= 4 {
                (4, Opcode::SBufferLoadDwordx4)
            } else if remaining >= 2 {
                (2, Opcode::SBufferLoadDwordx2)
            } else {
                (1, Opcode::SBufferLoadDword)
            };
            let part = ctx.new_temp(RegClass::scalar(dwords));
            ctx.emit(Instruction::with_extra(
                opcode,
                vec![Operand::Temp(desc), Operand::Temp(soffset)],
                vec![Definition::Temp(part)],
                InstrExtra::Memory(MemoryInfo::offset(done)),
            ));
            parts.push(Operand::Temp(part));
            done += dwords * 4;
        }
        if parts.len() == 1 {
            if let Some(Definition::Temp(d)) = ctx.last_instr_mut().defs.first_mut() {
                *d = dst;
            }
            return Ok(());
        }
        create_vector(ctx, dst, parts);
        return Ok(());
    }

    const LOADS: [Opcode; 4] = [
        Opcode::BufferLoadDword,
        Opcode::BufferLoadDwordx2,
        Opcode::BufferLoadDwordx3,
        Opcode::BufferLoadDwordx4,
    ];
    let voffset = ctx.get_operand(offset);
    let voffset = as_vgpr(ctx, voffset);
    let mem = coherent_flags(ctx, coherent);
    let mut parts = Vec::new();
    let mut done = 0u32;
    while done < byte_size {
        let dwords = ((byte_size - done) / 4).min(4);
        let part = ctx.new_temp(RegClass::vector(dwords));
        ctx.emit(Instruction::with_extra(
            LOADS[dwords as usize - 1],
            vec![Operand::Temp(desc), voffset],
            vec![Definition::Temp(part)],
            InstrExtra::Memory(MemoryInfo {
                offset: done,
                ..mem
            }),
        ));
        parts.push(Operand::Temp(part));
        done += dwords * 4;
    }
    if parts.len() == 1 {
        if let Some(Definition::Temp(d)) = ctx.last_instr_mut().defs.first_mut() {
            *d = dst;
        }
        return Ok(());
    }
    create_vector(ctx, dst, parts);
    Ok(())
}

fn lower_store_buffer(
    ctx: &mut Context,
    binding: &ResourceBinding,
    offset: ValueId,
    data: ValueId,
    byte_size: u32,
    coherent: bool,
) -> Result<()> {
    if byte_size % 4 != 0 {
        bail_isel!("sub-dword buffer access");
    }
    const STORES: [Opcode; 4] = [
        Opcode::BufferStoreDword,
        Opcode::BufferStoreDwordx2,
        Opcode::BufferStoreDwordx3,
        Opcode::BufferStoreDwordx4,
    ];
    let desc = load_descriptor(ctx, binding, 4)?;
    let voffset = ctx.get_operand(offset);
    let voffset = as_vgpr(ctx, voffset);
    let data_op = ctx.get_operand(data);
    let data_op = as_vgpr(ctx, data_op);
    let Some(data_temp) = data_op.as_temp() else {
        bail_internal!("store data not in registers");
    };
    let dwords = emit_split_vector(ctx, data_temp, data_temp.rc.size)?;
    let mem = coherent_flags(ctx, coherent);

    let mut done = 0u32;
    while done < byte_size {
        let n = ((byte_size - done) / 4).min(4);
        let first = (done / 4) as usize;
        let d = gather_dwords(ctx, &dwords[first..first + n as usize]);
        ctx.emit(Instruction::with_extra(
            STORES[n as usize - 1],
            vec![Operand::Temp(desc), voffset, d],
            vec![],
            InstrExtra::Memory(MemoryInfo {
                offset: done,
                ..mem
            }),
        ));
        done += n * 4;
    }
    Ok(())
}

fn lower_buffer_atomic(
    ctx: &mut Context,
    instr: &sir::Instr,
    binding: &ResourceBinding,
    op: AtomicOp,
    srcs: &[ValueId],
) -> Result<()> {
    let desc = load_descriptor(ctx, binding, 4)?;
    let voffset = ctx.get_operand(srcs[0]);
    let voffset = as_vgpr(ctx, voffset);
    let data = atomic_data(ctx, op, &srcs[1..])?;
    let mut mem = MemoryInfo::default();
    let defs = match instr.def {
        Some(def) => {
            ctx.program.needs_exact = true;
            mem.glc = true;
            vec![Definition::Temp(ctx.get_temp(def)?)]
        }
        None => vec![],
    };
    ctx.emit(Instruction::with_extra(
        Opcode::BufferAtomic(op),
        vec![Operand::Temp(desc), voffset, data],
        defs,
        InstrExtra::Memory(mem),
    ));
    Ok(())
}

// =============================================================================
// Uniform buffers
// =============================================================================

fn lower_load_uniform(
    ctx: &mut Context,
    instr: &sir::Instr,
    binding: &ResourceBinding,
    srcs: &[ValueId],
    offset: u32,
) -> Result<()> {
    let def = instr.def.expect("load defines a value");
    let dst = ctx.get_temp(def)?;
    if dst.rc.is_vector() {
        bail_isel!("uniform-buffer load with a divergent destination");
    }
    let desc = load_descriptor(ctx, binding, 4)?;
    let mut ops = vec![Operand::Temp(desc)];
    if let Some(&dyn_off) = srcs.first() {
        let s = ctx.get_operand(dyn_off);
        let s = as_uniform(ctx, s)?;
        ops.push(Operand::Temp(s));
    }

    let byte_size = dst.rc.bytes();
    let mut parts = Vec::new();
    let mut done = 0u32;
    while done < byte_size {
        let remaining = (byte_size - done) / 4;
        let (dwords, opcode) = if remaining >= 4 {
            (4, Opcode::SBufferLoadDwordx4)
        } else if remaining >= 2 {
            (2, Opcode::SBufferLoadDwordx2)
        } else {
            (1, Opcode::SBufferLoadDword)
        };
        let part = ctx.new_temp(RegClass::scalar(dwords));
        ctx.emit(Instruction::with_extra(
            opcode,
            ops.clone(),
            vec![Definition::Temp(part)],
            InstrExtra::Memory(MemoryInfo::offset(offset + done)),
        ));
        parts.push(Operand::Temp(part));
        done += dwords * 4;
    }
    if parts.len() == 1 {
        if let Some(Definition::Temp(d)) = ctx.last_instr_mut().defs.first_mut() {
            *d = dst;
        }
        return Ok(());
    }
    create_vector(ctx, dst, parts);
    Ok(())
}

// =============================================================================
// Vertex attributes
// =============================================================================

fn lower_load_attribute(
    ctx: &mut Context,
    instr: &sir::Instr,
    binding: &ResourceBinding,
    index: ValueId,
    format: VtxFormat,
    num_channels: u32,
    offset: u32,
) -> Result<()> {
    let def = instr.def.expect("load defines a value");
    let dst = ctx.get_temp(def)?;
    let desc = load_descriptor(ctx, binding, 4)?;
    let vindex = ctx.get_operand(index);
    let vindex = as_vgpr(ctx, vindex);

    let mut fetched = format.channels.min(num_channels);

    // Multi-channel tbuffer fetches need a dword-aligned start. When the
    // attribute begins off-dword, fetch the channels one at a time and
    // pad the rest with the format defaults.
    if fetched > 1 && offset % 4 != 0 {
        let mut parts: Vec<Operand> = Vec::new();
        for chan in 0..fetched {
            let part = ctx.new_temp(RegClass::V1);
            ctx.emit(Instruction::with_extra(
                Opcode::TbufferLoadFormatX,
                vec![Operand::Temp(desc), vindex],
                vec![Definition::Temp(part)],
                InstrExtra::Memory(MemoryInfo::offset(offset + chan * format.channel_bytes)),
            ));
            parts.push(Operand::Temp(part));
        }
        for chan in fetched..num_channels {
            let fill = Operand::c32(if chan == 3 { 0x3f80_0000 } else { 0 });
            parts.push(as_vgpr(ctx, fill));
        }
        create_vector(ctx, dst, parts);
        return Ok(());
    }

    // No 3-channel transfer on GFX6; fetch four (the format expands the
    // missing source channel) and drop the extra below.
    if fetched == 3 && ctx.config().gen == GpuGeneration::Gfx6 {
        fetched = 4;
    }
    let opcode = match fetched {
        1 => Opcode::TbufferLoadFormatX,
        2 => Opcode::TbufferLoadFormatXy,
        3 => Opcode::TbufferLoadFormatXyz,
        4 => Opcode::TbufferLoadFormatXyzw,
        n => bail_isel!("attribute with {} channels", n),
    };
    let loaded = ctx.new_temp(RegClass::vector(fetched));
    ctx.emit(Instruction::with_extra(
        opcode,
        vec![Operand::Temp(desc), vindex],
        vec![Definition::Temp(loaded)],
        InstrExtra::Memory(MemoryInfo::offset(offset)),
    ));

    if fetched == num_channels {
        if loaded.rc == dst.rc {
            if let Some(Definition::Temp(d)) = ctx.last_instr_mut().defs.first_mut() {
                *d = dst;
            }
            return Ok(());
        }
    }

    if fetched > num_channels {
        let elems = emit_split_vector(ctx, loaded, fetched)?;
        let comps: Vec<Operand> = elems[..num_channels as usize]
            .iter()
            .map(|&t| Operand::Temp(t))
            .collect();
        create_vector(ctx, dst, comps);
        return Ok(());
    }

    // Widen missing channels: .xyz default to 0.0, .w to 1.0.
    let defaults: Vec<Operand> = (fetched..num_channels)
        .map(|chan| Operand::c32(if chan == 3 { 0x3f80_0000 } else { 0 }))
        .collect();
    expand_vector(ctx, loaded, dst, &defaults)
}

// =============================================================================
// Images
// =============================================================================

/// Pack image address components (coords, layer, sample index) into one
/// contiguous vector operand.
pub(crate) fn pack_image_address(ctx: &mut Context, comps: Vec<Operand>) -> Operand {
    if comps.len() == 1 {
        return comps[0];
    }
    let total: u32 = comps.iter().map(|c| c.rc().map(|rc| rc.size).unwrap_or(1)).sum();
    let packed = ctx.new_temp(RegClass::vector(total));
    create_vector(ctx, packed, comps);
    Operand::Temp(packed)
}

fn image_coords(ctx: &mut Context, coord: ValueId, ms_index: Option<ValueId>) -> Result<Vec<Operand>> {
    let coord_temp = ctx.get_temp(coord)?;
    let n = ctx.func.num_components(coord);
    let coord_v = if coord_temp.rc.is_vector() {
        coord_temp
    } else {
        let v = as_vgpr(ctx, Operand::Temp(coord_temp));
        v.as_temp().expect("vgpr copy is a temp")
    };
    let elems = emit_split_vector(ctx, coord_v, n)?;
    let mut comps: Vec<Operand> = elems.into_iter().map(Operand::Temp).collect();
    if let Some(ms) = ms_index {
        let s = ctx.get_operand(ms);
        comps.push(as_vgpr(ctx, s));
    }
    Ok(comps)
}

fn lower_image_load(
    ctx: &mut Context,
    instr: &sir::Instr,
    binding: &ResourceBinding,
    srcs: &[ValueId],
    dim: crate::sir::TexDim,
    array: bool,
    ms: bool,
) -> Result<()> {
    let def = instr.def.expect("load defines a value");
    let dst = ctx.get_temp(def)?;
    let desc = load_descriptor(ctx, binding, 8)?;
    let ms_index = if ms { Some(srcs[1]) } else { None };
    let comps = image_coords(ctx, srcs[0], ms_index)?;
    let vaddr = pack_image_address(ctx, comps);
    let dmask = ((1u32 << ctx.func.num_components(def)) - 1) as u8;
    ctx.emit(Instruction::with_extra(
        Opcode::ImageLoad,
        vec![Operand::Temp(desc), vaddr],
        vec![Definition::Temp(dst)],
        InstrExtra::Image(ImageInfo { dim, array, dmask }),
    ));
    Ok(())
}

fn lower_image_store(
    ctx: &mut Context,
    binding: &ResourceBinding,
    srcs: &[ValueId],
    dim: crate::sir::TexDim,
    array: bool,
) -> Result<()> {
    let desc = load_descriptor(ctx, binding, 8)?;
    let comps = image_coords(ctx, srcs[0], None)?;
    let vaddr = pack_image_address(ctx, comps);
    let data = ctx.get_operand(srcs[1]);
    let data = as_vgpr(ctx, data);
    let dmask = ((1u32 << ctx.func.num_components(srcs[1])) - 1) as u8;
    ctx.emit(Instruction::with_extra(
        Opcode::ImageStore,
        vec![Operand::Temp(desc), vaddr, data],
        vec![],
        InstrExtra::Image(ImageInfo { dim, array, dmask }),
    ));
    Ok(())
}
