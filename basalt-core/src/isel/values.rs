//! SSA-value materialization and vector surgery.
//!
//! Selection keeps a cache of already-split vector components so that a
//! vector built from known temps never pays for a split, and repeated
//! extracts of the same source reuse one split. Cache entries are
//! replaced wholesale, never mutated in place.

use crate::error::Result;
use crate::isa::{Definition, Instruction, Opcode, Operand, RegBank, RegClass, Temp};
use crate::sir::{self, ValueId};
use crate::{bail_internal, bail_isel};

use super::Context;

/// Fetch a SIR value as an ALU source with the requested component count.
///
/// When the value is wider than requested, the leading components are
/// taken; the value's width must be divisible by the request.
pub(crate) fn get_alu_src(ctx: &mut Context, val: ValueId, requested: u32) -> Result<Operand> {
    let info = ctx.func.value(val);
    if info.num_components == requested {
        return Ok(ctx.get_operand(val));
    }
    if info.num_components < requested || info.num_components % requested != 0 {
        bail_internal!(
            "cannot take {} components from a {}-component value",
            requested,
            info.num_components
        );
    }

    let src = ctx.get_temp(val)?;
    let elem_size = info.bit_size / 32;
    let elems = emit_split_vector(ctx, src, info.num_components)?;
    if requested == 1 {
        return Ok(Operand::Temp(elems[0]));
    }
    let rc = RegClass {
        bank: src.rc.bank,
        size: elem_size * requested,
    };
    let dst = ctx.new_temp(rc);
    let comps: Vec<Operand> = elems[..requested as usize].iter().map(|&t| Operand::Temp(t)).collect();
    create_vector(ctx, dst, comps);
    Ok(Operand::Temp(dst))
}

/// Split a vector temp into its components, reusing a previous split.
pub(crate) fn emit_split_vector(ctx: &mut Context, src: Temp, num_elems: u32) -> Result<Vec<Temp>> {
    if let Some(cached) = ctx.allocated_vec.get(&src.id) {
        if cached.len() == num_elems as usize {
            return Ok(cached.clone());
        }
    }
    if src.rc.size % num_elems != 0 {
        bail_internal!("cannot split {} dwords into {} elements", src.rc.size, num_elems);
    }
    let elem_rc = RegClass {
        bank: src.rc.bank,
        size: src.rc.size / num_elems,
    };
    let elems: Vec<Temp> = (0..num_elems).map(|_| ctx.new_temp(elem_rc)).collect();
    ctx.emit(Instruction::new(
        Opcode::PSplitVector,
        vec![Operand::Temp(src)],
        elems.iter().map(|&t| Definition::Temp(t)).collect(),
    ));
    ctx.allocated_vec.insert(src.id, elems.clone());
    Ok(elems)
}

/// Extract one element of a vector temp, consulting the split cache.
pub(crate) fn emit_extract_vector(ctx: &mut Context, src: Temp, idx: u32, elem_rc: RegClass) -> Result<Temp> {
    if src.rc.size == elem_rc.size {
        if idx != 0 {
            bail_internal!("extract index {} out of range", idx);
        }
        return Ok(src);
    }
    if let Some(cached) = ctx.allocated_vec.get(&src.id) {
        if let Some(&t) = cached.get(idx as usize) {
            if t.rc.size == elem_rc.size {
                return Ok(t);
            }
        }
    }
    let dst = ctx.new_temp(elem_rc);
    ctx.emit(Instruction::new(
        Opcode::PExtractVector,
        vec![Operand::Temp(src), Operand::c32(idx)],
        vec![Definition::Temp(dst)],
    ));
    Ok(dst)
}

/// Build a vector into `dst` and register its components in the cache
/// when they are all temps of uniform width.
pub(crate) fn create_vector(ctx: &mut Context, dst: Temp, comps: Vec<Operand>) {
    let cacheable: Option<Vec<Temp>> = comps
        .iter()
        .map(|op| op.as_temp())
        .collect::<Option<Vec<_>>>()
        .filter(|ts| ts.windows(2).all(|w| w[0].rc.size == w[1].rc.size));
    ctx.emit(Instruction::new(Opcode::PCreateVector, comps, vec![Definition::Temp(dst)]));
    if let Some(ts) = cacheable {
        ctx.allocated_vec.insert(dst.id, ts);
    }
}

/// Widen a vector into `dst`, filling the missing trailing channels with
/// the given per-channel default operands.
pub(crate) fn expand_vector(ctx: &mut Context, src: Temp, dst: Temp, defaults: &[Operand]) -> Result<()> {
    if src.rc.size == dst.rc.size {
        if src != dst {
            ctx.emit(Instruction::new(
                Opcode::PParallelcopy,
                vec![Operand::Temp(src)],
                vec![Definition::Temp(dst)],
            ));
        }
        return Ok(());
    }
    if src.rc.size > dst.rc.size {
        bail_internal!("expand target narrower than source");
    }
    let missing = (dst.rc.size - src.rc.size) as usize;
    if defaults.len() < missing {
        bail_internal!("expand is short {} fill channels", missing - defaults.len());
    }
    let elems = emit_split_vector(ctx, src, src.rc.size)?;
    let mut comps: Vec<Operand> = elems.into_iter().map(Operand::Temp).collect();
    for &d in &defaults[..missing] {
        let d = if dst.rc.is_vector() { as_vgpr(ctx, d) } else { d };
        comps.push(d);
    }
    create_vector(ctx, dst, comps);
    Ok(())
}

/// Force an operand into the vector bank. VALU sources past the first
/// slot cannot encode scalars or literals, and address/data operands of
/// memory instructions must live in vector registers.
pub(crate) fn as_vgpr(ctx: &mut Context, op: Operand) -> Operand {
    match op {
        Operand::Temp(t) if t.rc.bank == RegBank::Vector => op,
        Operand::Undef(rc) if rc.is_vector() => op,
        Operand::Temp(t) => {
            let dst = ctx.new_temp(RegClass::vector(t.rc.size));
            let opcode = if t.rc.size == 1 {
                Opcode::VMovB32
            } else {
                Opcode::PParallelcopy
            };
            ctx.emit(Instruction::new(opcode, vec![op], vec![Definition::Temp(dst)]));
            Operand::Temp(dst)
        }
        Operand::Const { size, .. } => {
            let dst = ctx.new_temp(RegClass::vector(size));
            let opcode = if size == 1 { Opcode::VMovB32 } else { Opcode::PParallelcopy };
            ctx.emit(Instruction::new(opcode, vec![op], vec![Definition::Temp(dst)]));
            Operand::Temp(dst)
        }
        Operand::Undef(rc) => Operand::Undef(RegClass::vector(rc.size)),
        Operand::Exec => op,
    }
}

/// Force an operand into a scalar temp. For vector-bank sources the
/// caller guarantees the data is wave-uniform; the copy is a
/// `p_as_uniform` resolved to `v_readfirstlane` later.
pub(crate) fn as_uniform(ctx: &mut Context, op: Operand) -> Result<Temp> {
    match op {
        Operand::Temp(t) if t.rc.bank == RegBank::Scalar => Ok(t),
        Operand::Temp(t) => {
            let dst = ctx.new_temp(RegClass::scalar(t.rc.size));
            ctx.emit(Instruction::new(Opcode::PAsUniform, vec![op], vec![Definition::Temp(dst)]));
            Ok(dst)
        }
        Operand::Const { size, .. } => {
            let dst = ctx.new_temp(RegClass::scalar(size));
            let opcode = if size == 1 { Opcode::SMovB32 } else { Opcode::SMovB64 };
            ctx.emit(Instruction::new(opcode, vec![op], vec![Definition::Temp(dst)]));
            Ok(dst)
        }
        Operand::Undef(rc) => {
            let dst = ctx.new_temp(RegClass::scalar(rc.size));
            ctx.emit(Instruction::new(
                Opcode::PParallelcopy,
                vec![Operand::Undef(RegClass::scalar(rc.size))],
                vec![Definition::Temp(dst)],
            ));
            Ok(dst)
        }
        Operand::Exec => bail_internal!("exec is not a data operand here"),
    }
}

/// A boolean condition as a lane mask. Divergent booleans already are
/// masks; a uniform boolean (0/1 in one scalar register) selects between
/// the full active mask and zero.
pub(crate) fn bool_to_mask(ctx: &mut Context, val: ValueId) -> Result<Operand> {
    let info = ctx.func.value(val);
    if info.bit_size != 1 {
        bail_internal!("expected a boolean value");
    }
    if info.divergent {
        return Ok(ctx.get_operand(val));
    }
    let cond = ctx.get_operand(val);
    let mask_rc = ctx.config().lane_mask_rc();
    let dst = ctx.new_temp(mask_rc);
    let opcode = if mask_rc.size == 2 {
        Opcode::SCselectB64
    } else {
        Opcode::SCselectB32
    };
    let zero = if mask_rc.size == 2 { Operand::c64(0) } else { Operand::c32(0) };
    // Operand order: value-if-true, value-if-false, condition.
    ctx.emit(Instruction::new(
        opcode,
        vec![Operand::Exec, zero, cond],
        vec![Definition::Temp(dst)],
    ));
    Ok(Operand::Temp(dst))
}

// =============================================================================
// Vector-shaped SIR instructions
// =============================================================================

pub(crate) fn lower_vec(ctx: &mut Context, instr: &sir::Instr, comps: &[ValueId]) -> Result<()> {
    let def = instr.def.expect("vec has a definition");
    let dst = ctx.get_temp(def)?;
    let mut ops = Vec::with_capacity(comps.len());
    for &c in comps {
        let mut op = ctx.get_operand(c);
        // A vector-bank destination cannot be assembled from scalar parts.
        if dst.rc.is_vector() {
            op = as_vgpr(ctx, op);
        }
        ops.push(op);
    }
    create_vector(ctx, dst, ops);
    Ok(())
}

pub(crate) fn lower_extract_comp(ctx: &mut Context, instr: &sir::Instr, src: ValueId, comp: u32) -> Result<()> {
    let def = instr.def.expect("extract has a definition");
    let dst = ctx.get_temp(def)?;
    let src_info = ctx.func.value(src);
    if comp >= src_info.num_components {
        bail_isel!("component {} out of range for {}-component vector", comp, src_info.num_components);
    }
    let src_temp = ctx.get_temp(src)?;
    let elem_rc = RegClass {
        bank: src_temp.rc.bank,
        size: src_info.bit_size / 32,
    };
    let elem = emit_extract_vector(ctx, src_temp, comp, elem_rc)?;
    if elem == dst {
        return Ok(());
    }
    ctx.emit(Instruction::new(
        Opcode::PParallelcopy,
        vec![Operand::Temp(elem)],
        vec![Definition::Temp(dst)],
    ));
    Ok(())
}
