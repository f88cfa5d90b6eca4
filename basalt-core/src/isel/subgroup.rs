//! Cross-lane operation lowering.
//!
//! Boolean subgroup operations are pure mask algebra on the scalar unit;
//! clustered boolean reductions (cluster size 4) use closed-form
//! shift/mask sequences that fold each nibble of the mask and broadcast
//! the result back, and boolean scans come out of the masked popcount
//! below the lane. Arithmetic reductions and scans stay as `p_reduce`
//! pseudo-instructions carrying operator and cluster size; a later pass
//! expands them into swizzle/permute sequences.

use crate::error::Result;
use crate::isa::{Definition, GpuGeneration, InstrExtra, Instruction, Opcode, Operand, RegClass, Temp};
use crate::sir::{self, Intrinsic, ReduceOp, ValueId};
use crate::{bail_internal, bail_isel};

use super::values::{as_vgpr, bool_to_mask, emit_split_vector};
use super::Context;

pub(crate) fn lower_subgroup(ctx: &mut Context, instr: &sir::Instr, op: &Intrinsic, srcs: &[ValueId]) -> Result<()> {
    match op {
        Intrinsic::Ballot => lower_ballot(ctx, instr, srcs[0]),
        Intrinsic::ReadFirstLane => lower_read_first_lane(ctx, instr, srcs[0]),
        Intrinsic::ReadLane => lower_read_lane(ctx, instr, srcs[0], srcs[1]),
        Intrinsic::Shuffle => lower_shuffle(ctx, instr, srcs[0], srcs[1]),
        Intrinsic::LaneIndex => lower_lane_index(ctx, instr),
        Intrinsic::Reduce { op, cluster } => lower_reduce(ctx, instr, Opcode::PReduce, *op, *cluster, srcs[0]),
        Intrinsic::InclusiveScan { op } => lower_reduce(ctx, instr, Opcode::PInclusiveScan, *op, 0, srcs[0]),
        Intrinsic::ExclusiveScan { op } => lower_reduce(ctx, instr, Opcode::PExclusiveScan, *op, 0, srcs[0]),
        _ => bail_internal!("not a cross-lane intrinsic: {:?}", op),
    }
}

/// Lane-mask opcode set sized for the configured wave.
struct MaskOps {
    and: Opcode,
    or: Opcode,
    xor: Opcode,
    lshr: Opcode,
    lshl: Opcode,
    zero: Operand,
    nibble: Operand,
}

fn mask_ops(ctx: &Context) -> MaskOps {
    if ctx.config().wave64 {
        MaskOps {
            and: Opcode::SAndB64,
            or: Opcode::SOrB64,
            xor: Opcode::SXorB64,
            lshr: Opcode::SLshrB64,
            lshl: Opcode::SLshlB64,
            zero: Operand::c64(0),
            nibble: Operand::c64(0x1111_1111_1111_1111),
        }
    } else {
        MaskOps {
            and: Opcode::SAndB32,
            or: Opcode::SOrB32,
            xor: Opcode::SXorB32,
            lshr: Opcode::SLshrB32,
            lshl: Opcode::SLshlB32,
            zero: Operand::c32(0),
            nibble: Operand::c32(0x1111_1111),
        }
    }
}

fn lower_ballot(ctx: &mut Context, instr: &sir::Instr, cond: ValueId) -> Result<()> {
    let def = instr.def.expect("ballot defines a value");
    let dst = ctx.get_temp(def)?;
    let mask = bool_to_mask(ctx, cond)?;
    let ops = mask_ops(ctx);
    // Inactive lanes must read as zero.
    ctx.emit(Instruction::new(
        ops.and,
        vec![mask, Operand::Exec],
        vec![Definition::Temp(dst)],
    ));
    Ok(())
}

fn lower_read_first_lane(ctx: &mut Context, instr: &sir::Instr, val: ValueId) -> Result<()> {
    let def = instr.def.expect("read_first_lane defines a value");
    let dst = ctx.get_temp(def)?;
    let src = ctx.get_operand(val);
    match src.rc() {
        Some(rc) if rc.is_vector() && rc.size == 1 => {
            ctx.emit(Instruction::new(
                Opcode::VReadfirstlaneB32,
                vec![src],
                vec![Definition::Temp(dst)],
            ));
        }
        Some(rc) if rc.is_vector() => {
            bail_isel!("read_first_lane on a {}-dword value", rc.size);
        }
        _ => {
            // Already uniform.
            ctx.emit(Instruction::new(
                Opcode::PParallelcopy,
                vec![src],
                vec![Definition::Temp(dst)],
            ));
        }
    }
    Ok(())
}

fn lower_read_lane(ctx: &mut Context, instr: &sir::Instr, val: ValueId, lane: ValueId) -> Result<()> {
    let def = instr.def.expect("read_lane defines a value");
    let dst = ctx.get_temp(def)?;
    if ctx.divergent(lane) {
        bail_isel!("read_lane with a divergent lane index");
    }
    let src = ctx.get_operand(val);
    let src = as_vgpr(ctx, src);
    let lane_op = ctx.get_operand(lane);
    ctx.emit(Instruction::new(
        Opcode::VReadlaneB32,
        vec![src, lane_op],
        vec![Definition::Temp(dst)],
    ));
    Ok(())
}

fn lower_shuffle(ctx: &mut Context, instr: &sir::Instr, val: ValueId, lane: ValueId) -> Result<()> {
    if ctx.config().gen < GpuGeneration::Gfx8 {
        bail_isel!("lane shuffle needs GFX8 or later");
    }
    let def = instr.def.expect("shuffle defines a value");
    let dst = ctx.get_temp(def)?;
    let lane_op = ctx.get_operand(lane);
    let lane_op = as_vgpr(ctx, lane_op);
    // Byte address: lane index times four.
    let addr = ctx.new_temp(RegClass::V1);
    ctx.emit(Instruction::new(
        Opcode::VLshlrevB32,
        vec![Operand::c32(2), lane_op],
        vec![Definition::Temp(addr)],
    ));
    let src = ctx.get_operand(val);
    let src = as_vgpr(ctx, src);
    ctx.emit(Instruction::new(
        Opcode::DsBpermuteB32,
        vec![Operand::Temp(addr), src],
        vec![Definition::Temp(dst)],
    ));
    Ok(())
}

fn lower_lane_index(ctx: &mut Context, instr: &sir::Instr) -> Result<()> {
    let def = instr.def.expect("lane_index defines a value");
    let dst = ctx.get_temp(def)?;
    let all = Operand::c32(u32::MAX);
    if ctx.config().wave64 {
        let lo = ctx.new_temp(RegClass::V1);
        ctx.emit(Instruction::new(
            Opcode::VMbcntLoU32B32,
            vec![all, Operand::c32(0)],
            vec![Definition::Temp(lo)],
        ));
        ctx.emit(Instruction::new(
            Opcode::VMbcntHiU32B32,
            vec![all, Operand::Temp(lo)],
            vec![Definition::Temp(dst)],
        ));
    } else {
        ctx.emit(Instruction::new(
            Opcode::VMbcntLoU32B32,
            vec![all, Operand::c32(0)],
            vec![Definition::Temp(dst)],
        ));
    }
    Ok(())
}

// =============================================================================
// Reductions
// =============================================================================

fn lower_reduce(
    ctx: &mut Context,
    instr: &sir::Instr,
    opcode: Opcode,
    op: ReduceOp,
    cluster: u32,
    val: ValueId,
) -> Result<()> {
    let def = instr.def.expect("reduction defines a value");
    let dst = ctx.get_temp(def)?;

    if ctx.func.bit_size(val) == 1 {
        return match opcode {
            Opcode::PReduce => lower_bool_reduce(ctx, dst, op, cluster, val),
            Opcode::PInclusiveScan => lower_bool_scan(ctx, dst, op, val, true),
            Opcode::PExclusiveScan => lower_bool_scan(ctx, dst, op, val, false),
            _ => bail_internal!("unexpected reduction opcode {:?}", opcode),
        };
    }

    // The hardware reduction family only exists for power-of-two
    // clusters; zero stands for the whole wave.
    let wave = ctx.config().wave_size();
    let cluster = if cluster == 0 {
        wave
    } else {
        cluster.next_power_of_two().min(wave)
    };

    let src = ctx.get_operand(val);
    let src = as_vgpr(ctx, src);
    ctx.emit(Instruction::with_extra(
        opcode,
        vec![src],
        vec![Definition::Temp(dst)],
        InstrExtra::Reduction { op, cluster },
    ));
    Ok(())
}

/// Boolean reductions as mask algebra. Whole-wave forms compare the
/// ballot against zero or exec; cluster-4 forms fold each nibble with
/// shift/mask steps and broadcast it back.
fn lower_bool_reduce(ctx: &mut Context, dst: Temp, op: ReduceOp, cluster: u32, val: ValueId) -> Result<()> {
    let wave = ctx.config().wave_size();
    let ops = mask_ops(ctx);
    let mask_rc = ctx.config().lane_mask_rc();
    let cond = bool_to_mask(ctx, val)?;
    let active = ctx.new_temp(mask_rc);
    ctx.emit(Instruction::new(
        ops.and,
        vec![cond, Operand::Exec],
        vec![Definition::Temp(active)],
    ));

    if cluster == 0 || cluster == wave {
        let (cmp_lg, cmp_eq) = if ctx.config().wave64 {
            (Opcode::SCmpLgU64, Opcode::SCmpEqU64)
        } else {
            (Opcode::SCmpLgU32, Opcode::SCmpEqU32)
        };
        let bit = ctx.new_temp(RegClass::S1);
        match op {
            ReduceOp::Or => {
                // Any lane set?
                ctx.emit(Instruction::new(
                    cmp_lg,
                    vec![Operand::Temp(active), ops.zero],
                    vec![Definition::Temp(bit)],
                ));
            }
            ReduceOp::And => {
                // All active lanes set?
                ctx.emit(Instruction::new(
                    cmp_eq,
                    vec![Operand::Temp(active), Operand::Exec],
                    vec![Definition::Temp(bit)],
                ));
            }
            ReduceOp::Xor => {
                // Parity of the set-lane count.
                let count = ctx.new_temp(RegClass::S1);
                let bcnt = if ctx.config().wave64 {
                    Opcode::SBcnt1I32B64
                } else {
                    Opcode::SBcnt1I32B32
                };
                ctx.emit(Instruction::new(bcnt, vec![Operand::Temp(active)], vec![Definition::Temp(count)]));
                ctx.emit(Instruction::new(
                    Opcode::SAndB32,
                    vec![Operand::Temp(count), Operand::c32(1)],
                    vec![Definition::Temp(bit)],
                ));
            }
            _ => bail_isel!("boolean reduction with {:?}", op),
        }
        // Broadcast the scalar result back to a per-lane boolean.
        let select = if ctx.config().wave64 { Opcode::SCselectB64 } else { Opcode::SCselectB32 };
        ctx.emit(Instruction::new(
            select,
            vec![Operand::Exec, ops.zero, Operand::Temp(bit)],
            vec![Definition::Temp(dst)],
        ));
        return Ok(());
    }

    if cluster != 4 {
        bail_isel!("boolean reduction with cluster size {}", cluster);
    }

    // Fold each nibble onto its lowest bit.
    let combine = match op {
        ReduceOp::Or => ops.or,
        ReduceOp::And => ops.and,
        ReduceOp::Xor => ops.xor,
        _ => bail_isel!("boolean reduction with {:?}", op),
    };
    let shifted1 = ctx.new_temp(mask_rc);
    let fold1 = ctx.new_temp(mask_rc);
    let shifted2 = ctx.new_temp(mask_rc);
    let fold2 = ctx.new_temp(mask_rc);
    let low = ctx.new_temp(mask_rc);
    ctx.emit(Instruction::new(
        ops.lshr,
        vec![Operand::Temp(active), Operand::c32(1)],
        vec![Definition::Temp(shifted1)],
    ));
    ctx.emit(Instruction::new(
        combine,
        vec![Operand::Temp(active), Operand::Temp(shifted1)],
        vec![Definition::Temp(fold1)],
    ));
    ctx.emit(Instruction::new(
        ops.lshr,
        vec![Operand::Temp(fold1), Operand::c32(2)],
        vec![Definition::Temp(shifted2)],
    ));
    ctx.emit(Instruction::new(
        combine,
        vec![Operand::Temp(fold1), Operand::Temp(shifted2)],
        vec![Definition::Temp(fold2)],
    ));
    ctx.emit(Instruction::new(
        ops.and,
        vec![Operand::Temp(fold2), ops.nibble],
        vec![Definition::Temp(low)],
    ));

    // Broadcast the low bit across its nibble.
    let up1 = ctx.new_temp(mask_rc);
    let b1 = ctx.new_temp(mask_rc);
    let up2 = ctx.new_temp(mask_rc);
    ctx.emit(Instruction::new(
        ops.lshl,
        vec![Operand::Temp(low), Operand::c32(1)],
        vec![Definition::Temp(up1)],
    ));
    ctx.emit(Instruction::new(
        ops.or,
        vec![Operand::Temp(low), Operand::Temp(up1)],
        vec![Definition::Temp(b1)],
    ));
    ctx.emit(Instruction::new(
        ops.lshl,
        vec![Operand::Temp(b1), Operand::c32(2)],
        vec![Definition::Temp(up2)],
    ));
    ctx.emit(Instruction::new(
        ops.or,
        vec![Operand::Temp(b1), Operand::Temp(up2)],
        vec![Definition::Temp(dst)],
    ));
    Ok(())
}

// =============================================================================
// Boolean scans
// =============================================================================

/// Per-lane count of bits set below the lane in a scalar mask.
fn mbcnt_of(ctx: &mut Context, mask: Temp) -> Result<Temp> {
    let dst = ctx.new_temp(RegClass::V1);
    if ctx.config().wave64 {
        let halves = emit_split_vector(ctx, mask, 2)?;
        let lo = ctx.new_temp(RegClass::V1);
        ctx.emit(Instruction::new(
            Opcode::VMbcntLoU32B32,
            vec![Operand::Temp(halves[0]), Operand::c32(0)],
            vec![Definition::Temp(lo)],
        ));
        ctx.emit(Instruction::new(
            Opcode::VMbcntHiU32B32,
            vec![Operand::Temp(halves[1]), Operand::Temp(lo)],
            vec![Definition::Temp(dst)],
        ));
    } else {
        ctx.emit(Instruction::new(
            Opcode::VMbcntLoU32B32,
            vec![Operand::Temp(mask), Operand::c32(0)],
            vec![Definition::Temp(dst)],
        ));
    }
    Ok(dst)
}

/// Boolean scans need no shuffle network: the masked popcount below the
/// lane already decides the result. With `below` the count of set active
/// lanes under this one,
/// - exclusive OR-scan is `below != 0`,
/// - exclusive AND-scan is `below == active lanes under this one`,
/// - exclusive XOR-scan is the parity of `below`.
/// Inclusive forms combine the lane's own bit with one mask operation.
fn lower_bool_scan(ctx: &mut Context, dst: Temp, op: ReduceOp, val: ValueId, inclusive: bool) -> Result<()> {
    let ops = mask_ops(ctx);
    let mask_rc = ctx.config().lane_mask_rc();
    let cond = bool_to_mask(ctx, val)?;
    let active = ctx.new_temp(mask_rc);
    ctx.emit(Instruction::new(
        ops.and,
        vec![cond, Operand::Exec],
        vec![Definition::Temp(active)],
    ));
    let below = mbcnt_of(ctx, active)?;

    let excl = if inclusive { ctx.new_temp(mask_rc) } else { dst };
    match op {
        ReduceOp::Or => {
            ctx.emit(Instruction::new(
                Opcode::VCmpLgU32,
                vec![Operand::c32(0), Operand::Temp(below)],
                vec![Definition::Temp(excl)],
            ));
        }
        ReduceOp::And => {
            // Compare against the count of active lanes below.
            let smov = if ctx.config().wave64 { Opcode::SMovB64 } else { Opcode::SMovB32 };
            let exec_copy = ctx.new_temp(mask_rc);
            ctx.emit(Instruction::new(smov, vec![Operand::Exec], vec![Definition::Temp(exec_copy)]));
            let active_below = mbcnt_of(ctx, exec_copy)?;
            ctx.emit(Instruction::new(
                Opcode::VCmpEqU32,
                vec![Operand::Temp(active_below), Operand::Temp(below)],
                vec![Definition::Temp(excl)],
            ));
        }
        ReduceOp::Xor => {
            let parity = ctx.new_temp(RegClass::V1);
            ctx.emit(Instruction::new(
                Opcode::VAndB32,
                vec![Operand::c32(1), Operand::Temp(below)],
                vec![Definition::Temp(parity)],
            ));
            ctx.emit(Instruction::new(
                Opcode::VCmpLgU32,
                vec![Operand::c32(0), Operand::Temp(parity)],
                vec![Definition::Temp(excl)],
            ));
        }
        _ => bail_isel!("boolean scan with {:?}", op),
    }

    if inclusive {
        let combine = match op {
            ReduceOp::Or => ops.or,
            ReduceOp::And => ops.and,
            ReduceOp::Xor => ops.xor,
            _ => unreachable!(),
        };
        ctx.emit(Instruction::new(
            combine,
            vec![Operand::Temp(excl), Operand::Temp(active)],
            vec![Definition::Temp(dst)],
        ));
    }
    Ok(())
}
