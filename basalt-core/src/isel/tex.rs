//! Texture and image-sampling lowering.
//!
//! The address operand is assembled in hardware field order: packed
//! constant offsets, lod bias, depth-compare reference, derivatives,
//! coordinates (with the array layer last), then an explicit lod. Cube
//! maps replace the 3-component direction with face coordinates via the
//! cube helper instructions. Multisample fetches resolve the fragment
//! index through the FMASK plane first, falling back to the raw sample
//! index when the FMASK descriptor is null.

use crate::error::Result;
use crate::isa::{
    Definition, GpuGeneration, ImageInfo, InstrExtra, Instruction, Opcode, Operand, RegClass, Temp,
};
use crate::sir::{self, ResourceBinding, Tex, TexDim, TexOp, ValueId};
use crate::bail_isel;

use super::memory::{load_descriptor, pack_image_address};
use super::values::{as_vgpr, emit_extract_vector, emit_split_vector};
use super::Context;

pub(crate) fn lower_tex(ctx: &mut Context, instr: &sir::Instr, tex: &Tex) -> Result<()> {
    let def = instr.def.expect("tex defines a value");
    let dst = ctx.get_temp(def)?;
    let dmask = ((1u32 << ctx.func.num_components(def)) - 1) as u8;
    let image = ImageInfo {
        dim: tex.dim,
        array: tex.is_array,
        dmask,
    };

    match tex.op {
        TexOp::Fetch => lower_fetch(ctx, tex, dst, image),
        TexOp::Sample | TexOp::Gather4 => lower_sample(ctx, tex, dst, image),
    }
}

// =============================================================================
// Address assembly
// =============================================================================

/// Pack 2-3 small signed texel offsets into one dword
/// (6 bits per component, 8-bit fields).
fn pack_tex_offset(ctx: &mut Context, offset: ValueId) -> Result<Operand> {
    let n = ctx.func.num_components(offset);
    let temp = ctx.get_temp(offset)?;
    let elems = if n == 1 {
        vec![temp]
    } else {
        emit_split_vector(ctx, temp, n)?
    };

    let mut packed: Option<Temp> = None;
    for (i, &e) in elems.iter().enumerate() {
        let field = ctx.new_temp(RegClass::V1);
        let ev = as_vgpr(ctx, Operand::Temp(e));
        ctx.emit(Instruction::new(
            Opcode::VAndB32,
            vec![Operand::c32(0x3f), ev],
            vec![Definition::Temp(field)],
        ));
        let shifted = if i == 0 {
            field
        } else {
            let s = ctx.new_temp(RegClass::V1);
            ctx.emit(Instruction::new(
                Opcode::VLshlrevB32,
                vec![Operand::c32(8 * i as u32), Operand::Temp(field)],
                vec![Definition::Temp(s)],
            ));
            s
        };
        packed = Some(match packed {
            None => shifted,
            Some(acc) => {
                let merged = ctx.new_temp(RegClass::V1);
                ctx.emit(Instruction::new(
                    Opcode::VOrB32,
                    vec![Operand::Temp(acc), Operand::Temp(shifted)],
                    vec![Definition::Temp(merged)],
                ));
                merged
            }
        });
    }
    Ok(Operand::Temp(packed.expect("offset has at least one component")))
}

/// Coordinate components as vgpr operands, applying the cube-face
/// transform for cube maps.
fn coords(ctx: &mut Context, tex: &Tex) -> Result<Vec<Operand>> {
    let n = ctx.func.num_components(tex.coord);
    let temp = ctx.get_temp(tex.coord)?;
    let vtemp = as_vgpr(ctx, Operand::Temp(temp));
    let vtemp = vtemp.as_temp().expect("vgpr copy is a temp");
    let elems = emit_split_vector(ctx, vtemp, n)?;

    if tex.dim == TexDim::Cube && tex.op != TexOp::Fetch {
        return cube_coords(ctx, tex, &elems);
    }
    Ok(elems.into_iter().map(Operand::Temp).collect())
}

/// Cube direction -> face coordinates:
/// s = sc * rcp(|ma|) + 1.5, t = tc * rcp(|ma|) + 1.5, face = id
/// (plus layer * 8 folded into the face for arrays).
fn cube_coords(ctx: &mut Context, tex: &Tex, elems: &[Temp]) -> Result<Vec<Operand>> {
    let one = RegClass::V1;
    let dir: Vec<Operand> = elems[..3].iter().map(|&t| Operand::Temp(t)).collect();
    let ma = ctx.new_temp(one);
    let sc = ctx.new_temp(one);
    let tc = ctx.new_temp(one);
    let id = ctx.new_temp(one);
    ctx.emit(Instruction::new(Opcode::VCubemaF32, dir.clone(), vec![Definition::Temp(ma)]));
    ctx.emit(Instruction::new(Opcode::VCubescF32, dir.clone(), vec![Definition::Temp(sc)]));
    ctx.emit(Instruction::new(Opcode::VCubetcF32, dir.clone(), vec![Definition::Temp(tc)]));
    ctx.emit(Instruction::new(Opcode::VCubeidF32, dir, vec![Definition::Temp(id)]));

    let rcp_ma = ctx.new_temp(one);
    ctx.emit(Instruction::with_extra(
        Opcode::VRcpF32,
        vec![Operand::Temp(ma)],
        vec![Definition::Temp(rcp_ma)],
        InstrExtra::Modifiers {
            neg: [false; 3],
            abs: [true, false, false],
        },
    ));

    let half_three = Operand::c32(0x3fc0_0000); // 1.5
    let s = ctx.new_temp(one);
    let t = ctx.new_temp(one);
    ctx.emit(Instruction::new(
        Opcode::VMadF32,
        vec![Operand::Temp(sc), Operand::Temp(rcp_ma), half_three],
        vec![Definition::Temp(s)],
    ));
    ctx.emit(Instruction::new(
        Opcode::VMadF32,
        vec![Operand::Temp(tc), Operand::Temp(rcp_ma), half_three],
        vec![Definition::Temp(t)],
    ));

    let face = if tex.is_array {
        // Eight cube faces per layer; the layer is rounded first, and
        // GFX8 dropped the hardware clamp of negative layers.
        let rounded = ctx.new_temp(one);
        ctx.emit(Instruction::new(
            Opcode::VRndneF32,
            vec![Operand::Temp(elems[3])],
            vec![Definition::Temp(rounded)],
        ));
        let layer = if ctx.config().gen >= GpuGeneration::Gfx8 {
            let clamped = ctx.new_temp(one);
            ctx.emit(Instruction::new(
                Opcode::VMaxF32,
                vec![Operand::c32(0), Operand::Temp(rounded)],
                vec![Definition::Temp(clamped)],
            ));
            clamped
        } else {
            rounded
        };
        let combined = ctx.new_temp(one);
        ctx.emit(Instruction::new(
            Opcode::VMadF32,
            vec![Operand::Temp(layer), Operand::c32(0x4100_0000), Operand::Temp(id)],
            vec![Definition::Temp(combined)],
        ));
        combined
    } else {
        id
    };
    Ok(vec![Operand::Temp(s), Operand::Temp(t), Operand::Temp(face)])
}

// =============================================================================
// Sampling
// =============================================================================

/// Which lod-control variant a sample/gather uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LodVariant {
    Implicit,
    Lod,
    LodZero,
    Bias,
    Derivatives,
}

fn lod_variant(tex: &Tex) -> Result<LodVariant> {
    let mut v = LodVariant::Implicit;
    let mut count = 0;
    if tex.lod.is_some() {
        v = LodVariant::Lod;
        count += 1;
    }
    if tex.level_zero {
        v = LodVariant::LodZero;
        count += 1;
    }
    if tex.bias.is_some() {
        v = LodVariant::Bias;
        count += 1;
    }
    if tex.ddx.is_some() || tex.ddy.is_some() {
        if tex.ddx.is_none() || tex.ddy.is_none() {
            bail_isel!("sample with only one derivative");
        }
        v = LodVariant::Derivatives;
        count += 1;
    }
    if count > 1 {
        bail_isel!("sample with conflicting lod controls");
    }
    Ok(v)
}

fn sample_opcode(compare: bool, variant: LodVariant, offset: bool) -> Opcode {
    use LodVariant::*;
    use Opcode::*;
    match (compare, variant, offset) {
        (false, Implicit, false) => ImageSample,
        (false, Lod, false) => ImageSampleL,
        (false, LodZero, false) => ImageSampleLz,
        (false, Bias, false) => ImageSampleB,
        (false, Derivatives, false) => ImageSampleD,
        (true, Implicit, false) => ImageSampleC,
        (true, Lod, false) => ImageSampleCL,
        (true, LodZero, false) => ImageSampleCLz,
        (true, Bias, false) => ImageSampleCB,
        (true, Derivatives, false) => ImageSampleCD,
        (false, Implicit, true) => ImageSampleO,
        (false, Lod, true) => ImageSampleLO,
        (false, LodZero, true) => ImageSampleLzO,
        (false, Bias, true) => ImageSampleBO,
        (false, Derivatives, true) => ImageSampleDO,
        (true, Implicit, true) => ImageSampleCO,
        (true, Lod, true) => ImageSampleCLO,
        (true, LodZero, true) => ImageSampleCLzO,
        (true, Bias, true) => ImageSampleCBO,
        (true, Derivatives, true) => ImageSampleCDO,
    }
}

fn gather_opcode(compare: bool, variant: LodVariant, offset: bool) -> Result<Opcode> {
    use LodVariant::*;
    use Opcode::*;
    let opcode = match (compare, variant, offset) {
        (false, Implicit, false) => ImageGather4,
        (false, Lod, false) => ImageGather4L,
        (false, LodZero, false) => ImageGather4Lz,
        (false, Bias, false) => ImageGather4B,
        (true, Implicit, false) => ImageGather4C,
        (true, Lod, false) => ImageGather4CL,
        (true, LodZero, false) => ImageGather4CLz,
        (false, Implicit, true) => ImageGather4O,
        (false, Lod, true) => ImageGather4LO,
        (false, LodZero, true) => ImageGather4LzO,
        (false, Bias, true) => ImageGather4BO,
        (true, Implicit, true) => ImageGather4CO,
        (true, Lod, true) => ImageGather4CLO,
        (true, LodZero, true) => ImageGather4CLzO,
        _ => bail_isel!("gather with unsupported lod control"),
    };
    Ok(opcode)
}

fn lower_sample(ctx: &mut Context, tex: &Tex, dst: Temp, image: ImageInfo) -> Result<()> {
    let variant = lod_variant(tex)?;
    let opcode = match tex.op {
        TexOp::Sample => sample_opcode(tex.compare.is_some(), variant, tex.offset.is_some()),
        TexOp::Gather4 => gather_opcode(tex.compare.is_some(), variant, tex.offset.is_some())?,
        TexOp::Fetch => unreachable!(),
    };

    // Address fields in hardware order.
    let mut comps: Vec<Operand> = Vec::new();
    if let Some(off) = tex.offset {
        comps.push(pack_tex_offset(ctx, off)?);
    }
    if let Some(bias) = tex.bias {
        let b = ctx.get_operand(bias);
        comps.push(as_vgpr(ctx, b));
    }
    if let Some(compare) = tex.compare {
        let c = ctx.get_operand(compare);
        comps.push(as_vgpr(ctx, c));
    }
    if variant == LodVariant::Derivatives {
        for d in [tex.ddx, tex.ddy] {
            let d = d.expect("checked by lod_variant");
            let t = ctx.get_temp(d)?;
            let v = as_vgpr(ctx, Operand::Temp(t));
            comps.push(v);
        }
    }
    comps.extend(coords(ctx, tex)?);
    if let Some(lod) = tex.lod {
        let l = ctx.get_operand(lod);
        comps.push(as_vgpr(ctx, l));
    }
    let vaddr = pack_image_address(ctx, comps);

    let resource = load_descriptor(ctx, &tex.resource, 8)?;
    let sampler = load_descriptor(ctx, &tex.sampler, 4)?;
    ctx.emit(Instruction::with_extra(
        opcode,
        vec![Operand::Temp(resource), Operand::Temp(sampler), vaddr],
        vec![Definition::Temp(dst)],
        InstrExtra::Image(image),
    ));
    Ok(())
}

// =============================================================================
// Fetches
// =============================================================================

fn lower_fetch(ctx: &mut Context, tex: &Tex, dst: Temp, image: ImageInfo) -> Result<()> {
    let resource = load_descriptor(ctx, &tex.resource, 8)?;
    let mut comps = coords(ctx, tex)?;

    if let Some(sample) = tex.sample_index {
        let frag = resolve_fmask(ctx, tex, &comps, sample)?;
        comps.push(Operand::Temp(frag));
        let vaddr = pack_image_address(ctx, comps);
        ctx.emit(Instruction::with_extra(
            Opcode::ImageLoad,
            vec![Operand::Temp(resource), vaddr],
            vec![Definition::Temp(dst)],
            InstrExtra::Image(image),
        ));
        return Ok(());
    }

    let opcode = if let Some(lod) = tex.lod {
        let l = ctx.get_operand(lod);
        comps.push(as_vgpr(ctx, l));
        Opcode::ImageLoadMip
    } else {
        Opcode::ImageLoad
    };
    let vaddr = pack_image_address(ctx, comps);
    ctx.emit(Instruction::with_extra(
        opcode,
        vec![Operand::Temp(resource), vaddr],
        vec![Definition::Temp(dst)],
        InstrExtra::Image(image),
    ));
    Ok(())
}

/// Resolve a multisample fragment index through the FMASK plane: each
/// sample's 4-bit field in the FMASK texel names the stored fragment.
/// A null FMASK descriptor (first word zero) means the image is not
/// compressed and the raw sample index is used as-is.
fn resolve_fmask(ctx: &mut Context, tex: &Tex, coords: &[Operand], sample: ValueId) -> Result<Temp> {
    // The FMASK descriptor sits right after the image descriptor.
    let fmask_binding = ResourceBinding {
        binding_offset: tex.resource.binding_offset + 32,
        ..tex.resource
    };
    let fmask_desc = load_descriptor(ctx, &fmask_binding, 8)?;

    let vaddr = pack_image_address(ctx, coords.to_vec());
    let fmask_val = ctx.new_temp(RegClass::V1);
    ctx.emit(Instruction::with_extra(
        Opcode::ImageLoad,
        vec![Operand::Temp(fmask_desc), vaddr],
        vec![Definition::Temp(fmask_val)],
        InstrExtra::Image(ImageInfo {
            dim: tex.dim,
            array: tex.is_array,
            dmask: 0x1,
        }),
    ));

    let sample_op = ctx.get_operand(sample);
    let sample_v = as_vgpr(ctx, sample_op);

    // frag = fmask >> (sample * 4) & 0xf
    let shift = ctx.new_temp(RegClass::V1);
    ctx.emit(Instruction::new(
        Opcode::VLshlrevB32,
        vec![Operand::c32(2), sample_v],
        vec![Definition::Temp(shift)],
    ));
    let frag = ctx.new_temp(RegClass::V1);
    ctx.emit(Instruction::new(
        Opcode::VBfeU32,
        vec![Operand::Temp(fmask_val), Operand::Temp(shift), Operand::c32(4)],
        vec![Definition::Temp(frag)],
    ));

    // Null FMASK descriptor: keep the raw sample index.
    let word0 = emit_extract_vector(ctx, fmask_desc, 0, RegClass::S1)?;
    let valid = ctx.new_temp(RegClass::S1);
    ctx.emit(Instruction::new(
        Opcode::SCmpLgU32,
        vec![Operand::Temp(word0), Operand::c32(0)],
        vec![Definition::Temp(valid)],
    ));
    let mask_rc = ctx.config().lane_mask_rc();
    let select = if mask_rc.size == 2 { Opcode::SCselectB64 } else { Opcode::SCselectB32 };
    let zero = if mask_rc.size == 2 { Operand::c64(0) } else { Operand::c32(0) };
    let valid_mask = ctx.new_temp(mask_rc);
    ctx.emit(Instruction::new(
        select,
        vec![Operand::Exec, zero, Operand::Temp(valid)],
        vec![Definition::Temp(valid_mask)],
    ));
    let resolved = ctx.new_temp(RegClass::V1);
    ctx.emit(Instruction::new(
        Opcode::VCndmaskB32,
        vec![sample_v, Operand::Temp(frag), Operand::Temp(valid_mask)],
        vec![Definition::Temp(resolved)],
    ));
    Ok(resolved)
}
