//! ALU lowering rules.
//!
//! The destination's register bank (driven by the divergence bit of the
//! SSA def) selects between the scalar and vector unit. Operations are
//! expected to be scalarized upstream; a multi-component ALU def has no
//! rule here.
//!
//! Notable translations:
//! - 64-bit integer add/sub/neg chain 32-bit carry/borrow primitives.
//! - Vector shifts put the shift amount in the first source (`*rev`
//!   forms); 64-bit vector shifts are non-rev before GFX8.
//! - Greater-than comparisons become the less-than form with swapped
//!   operands; ordered 64-bit integer compares are decomposed into
//!   high/low 32-bit compares.
//! - Float ops only exist on the vector unit; a uniform float def is
//!   computed there and copied back to the scalar bank.
//! - `v_rcp/v_rsq/v_sqrt/v_log` flush denormal inputs before GFX9, so
//!   the input is pre-scaled by 2^24 and the result compensated.

use crate::error::Result;
use crate::isa::{
    Definition, GpuGeneration, InstrExtra, Instruction, Opcode, Operand, RegClass, Temp,
};
use crate::sir::{self, AluOp, ValueId};
use crate::{bail_internal, bail_isel};

use super::values::{as_uniform, as_vgpr, create_vector, emit_split_vector, get_alu_src};
use super::Context;

// Denormal-workaround constants.
const F32_SCALE_UP: u32 = 0x4b80_0000; // 2^24
const F32_RCP_FIXUP: u32 = 0x4b80_0000; // 2^24
const F32_RSQ_FIXUP: u32 = 0x4580_0000; // 2^12
const F32_SQRT_FIXUP: u32 = 0x3980_0000; // 2^-12
const F32_LOG2_FIXUP: u32 = 0x41c0_0000; // 24.0
const F32_SMALLEST_NORMAL: u32 = 0x0080_0000;

pub(crate) fn lower_alu(ctx: &mut Context, instr: &sir::Instr, op: AluOp, srcs: &[ValueId]) -> Result<()> {
    let def = instr.def.expect("ALU instruction has a definition");
    let dst = ctx.get_temp(def)?;
    let info = ctx.func.value(def);
    if info.num_components != 1 {
        bail_isel!("ALU on a multi-component value; scalarize upstream");
    }

    if op.is_comparison() {
        return lower_comparison(ctx, def, dst, op, srcs);
    }
    if op == AluOp::BCSel {
        return lower_bcsel(ctx, dst, srcs);
    }

    let bits = info.bit_size;
    let vector = dst.rc.is_vector();
    let gen = ctx.config().gen;

    match op {
        AluOp::Mov => {
            let a = get_alu_src(ctx, srcs[0], 1)?;
            emit_copy(ctx, dst, a);
        }

        // --- Bit-size 1: lane-mask / scalar-bool logic ---
        AluOp::IAnd | AluOp::IOr | AluOp::IXor if bits == 1 => {
            let a = ctx.get_operand(srcs[0]);
            let b = ctx.get_operand(srcs[1]);
            let wide = dst.rc.size == 2;
            let opcode = match (op, wide) {
                (AluOp::IAnd, true) => Opcode::SAndB64,
                (AluOp::IAnd, false) => Opcode::SAndB32,
                (AluOp::IOr, true) => Opcode::SOrB64,
                (AluOp::IOr, false) => Opcode::SOrB32,
                (AluOp::IXor, true) => Opcode::SXorB64,
                (AluOp::IXor, false) => Opcode::SXorB32,
                _ => unreachable!(),
            };
            if ctx.divergent(def) {
                // Xor of masks produced at different exec levels can set
                // bits for inactive lanes; keep those pinned to zero.
                let raw = ctx.new_temp(dst.rc);
                ctx.emit(Instruction::new(opcode, vec![a, b], vec![Definition::Temp(raw)]));
                let and = if wide { Opcode::SAndB64 } else { Opcode::SAndB32 };
                ctx.emit(Instruction::new(
                    and,
                    vec![Operand::Temp(raw), Operand::Exec],
                    vec![Definition::Temp(dst)],
                ));
            } else {
                ctx.emit(Instruction::new(opcode, vec![a, b], vec![Definition::Temp(dst)]));
            }
        }
        AluOp::Not if bits == 1 => {
            let a = ctx.get_operand(srcs[0]);
            if ctx.divergent(def) {
                // Flip only the active lanes of the mask.
                let opcode = if dst.rc.size == 2 { Opcode::SXorB64 } else { Opcode::SXorB32 };
                ctx.emit(Instruction::new(opcode, vec![a, Operand::Exec], vec![Definition::Temp(dst)]));
            } else {
                ctx.emit(Instruction::new(
                    Opcode::SXorB32,
                    vec![a, Operand::c32(1)],
                    vec![Definition::Temp(dst)],
                ));
            }
        }

        // --- 32-bit integer ---
        AluOp::IAdd if bits == 32 => {
            let (a, b) = (ctx.get_operand(srcs[0]), ctx.get_operand(srcs[1]));
            if vector {
                emit_vadd32(ctx, dst, a, b, gen, false);
            } else {
                ctx.emit(Instruction::new(Opcode::SAddU32, vec![a, b], vec![Definition::Temp(dst)]));
            }
        }
        AluOp::ISub if bits == 32 => {
            let (a, b) = (ctx.get_operand(srcs[0]), ctx.get_operand(srcs[1]));
            if vector {
                emit_vadd32(ctx, dst, a, b, gen, true);
            } else {
                ctx.emit(Instruction::new(Opcode::SSubU32, vec![a, b], vec![Definition::Temp(dst)]));
            }
        }
        AluOp::INeg if bits == 32 => {
            let a = ctx.get_operand(srcs[0]);
            if vector {
                emit_vadd32(ctx, dst, Operand::c32(0), a, gen, true);
            } else {
                ctx.emit(Instruction::new(
                    Opcode::SSubU32,
                    vec![Operand::c32(0), a],
                    vec![Definition::Temp(dst)],
                ));
            }
        }
        AluOp::IMul if bits == 32 => {
            let (a, b) = (ctx.get_operand(srcs[0]), ctx.get_operand(srcs[1]));
            if vector {
                emit_valu2(ctx, Opcode::VMulLoU32, dst, a, b, true);
            } else {
                ctx.emit(Instruction::new(Opcode::SMulI32, vec![a, b], vec![Definition::Temp(dst)]));
            }
        }
        AluOp::IMulHi | AluOp::UMulHi if bits == 32 => {
            let signed = op == AluOp::IMulHi;
            let (a, b) = (ctx.get_operand(srcs[0]), ctx.get_operand(srcs[1]));
            if vector {
                let opcode = if signed { Opcode::VMulHiI32 } else { Opcode::VMulHiU32 };
                emit_valu2(ctx, opcode, dst, a, b, true);
            } else if gen >= GpuGeneration::Gfx9 {
                let opcode = if signed { Opcode::SMulHiI32 } else { Opcode::SMulHiU32 };
                ctx.emit(Instruction::new(opcode, vec![a, b], vec![Definition::Temp(dst)]));
            } else {
                // No scalar mul_hi before GFX9; compute on the vector
                // unit and read the (uniform) result back.
                let opcode = if signed { Opcode::VMulHiI32 } else { Opcode::VMulHiU32 };
                let vdst = ctx.new_temp(RegClass::V1);
                emit_valu2(ctx, opcode, vdst, a, b, true);
                let u = as_uniform(ctx, Operand::Temp(vdst))?;
                emit_copy(ctx, dst, Operand::Temp(u));
            }
        }
        AluOp::IMin | AluOp::IMax | AluOp::UMin | AluOp::UMax if bits == 32 => {
            let (a, b) = (ctx.get_operand(srcs[0]), ctx.get_operand(srcs[1]));
            let (sop, vop) = match op {
                AluOp::IMin => (Opcode::SMinI32, Opcode::VMinI32),
                AluOp::IMax => (Opcode::SMaxI32, Opcode::VMaxI32),
                AluOp::UMin => (Opcode::SMinU32, Opcode::VMinU32),
                AluOp::UMax => (Opcode::SMaxU32, Opcode::VMaxU32),
                _ => unreachable!(),
            };
            if vector {
                emit_valu2(ctx, vop, dst, a, b, true);
            } else {
                ctx.emit(Instruction::new(sop, vec![a, b], vec![Definition::Temp(dst)]));
            }
        }
        AluOp::IAnd | AluOp::IOr | AluOp::IXor if bits == 32 => {
            let (a, b) = (ctx.get_operand(srcs[0]), ctx.get_operand(srcs[1]));
            let (sop, vop) = match op {
                AluOp::IAnd => (Opcode::SAndB32, Opcode::VAndB32),
                AluOp::IOr => (Opcode::SOrB32, Opcode::VOrB32),
                AluOp::IXor => (Opcode::SXorB32, Opcode::VXorB32),
                _ => unreachable!(),
            };
            if vector {
                emit_valu2(ctx, vop, dst, a, b, true);
            } else {
                ctx.emit(Instruction::new(sop, vec![a, b], vec![Definition::Temp(dst)]));
            }
        }
        AluOp::Not if bits == 32 => {
            let a = ctx.get_operand(srcs[0]);
            if vector {
                emit_valu1(ctx, Opcode::VNotB32, dst, a);
            } else {
                ctx.emit(Instruction::new(Opcode::SNotB32, vec![a], vec![Definition::Temp(dst)]));
            }
        }
        AluOp::IShl | AluOp::IShr | AluOp::UShr if bits == 32 => {
            let (val, amount) = (ctx.get_operand(srcs[0]), ctx.get_operand(srcs[1]));
            if vector {
                // The *rev forms take the shift amount first.
                let opcode = match op {
                    AluOp::IShl => Opcode::VLshlrevB32,
                    AluOp::IShr => Opcode::VAshrrevI32,
                    AluOp::UShr => Opcode::VLshrrevB32,
                    _ => unreachable!(),
                };
                let val = as_vgpr(ctx, val);
                ctx.emit(Instruction::new(opcode, vec![amount, val], vec![Definition::Temp(dst)]));
            } else {
                let opcode = match op {
                    AluOp::IShl => Opcode::SLshlB32,
                    AluOp::IShr => Opcode::SAshrI32,
                    AluOp::UShr => Opcode::SLshrB32,
                    _ => unreachable!(),
                };
                ctx.emit(Instruction::new(opcode, vec![val, amount], vec![Definition::Temp(dst)]));
            }
        }

        // --- 64-bit integer ---
        AluOp::IAdd | AluOp::ISub if bits == 64 => {
            let a = ctx.get_operand(srcs[0]);
            let b = ctx.get_operand(srcs[1]);
            lower_addsub64(ctx, dst, a, b, op == AluOp::ISub)?;
        }
        AluOp::INeg if bits == 64 => {
            let a = ctx.get_operand(srcs[0]);
            lower_addsub64(ctx, dst, Operand::c64(0), a, true)?;
        }
        AluOp::IAnd | AluOp::IOr | AluOp::IXor if bits == 64 => {
            let a = ctx.get_operand(srcs[0]);
            let b = ctx.get_operand(srcs[1]);
            if vector {
                let vop = match op {
                    AluOp::IAnd => Opcode::VAndB32,
                    AluOp::IOr => Opcode::VOrB32,
                    AluOp::IXor => Opcode::VXorB32,
                    _ => unreachable!(),
                };
                let (alo, ahi) = split64(ctx, a)?;
                let (blo, bhi) = split64(ctx, b)?;
                let lo = ctx.new_temp(RegClass::V1);
                let hi = ctx.new_temp(RegClass::V1);
                emit_valu2(ctx, vop, lo, alo, blo, true);
                emit_valu2(ctx, vop, hi, ahi, bhi, true);
                create_vector(ctx, dst, vec![Operand::Temp(lo), Operand::Temp(hi)]);
            } else {
                let sop = match op {
                    AluOp::IAnd => Opcode::SAndB64,
                    AluOp::IOr => Opcode::SOrB64,
                    AluOp::IXor => Opcode::SXorB64,
                    _ => unreachable!(),
                };
                ctx.emit(Instruction::new(sop, vec![a, b], vec![Definition::Temp(dst)]));
            }
        }
        AluOp::Not if bits == 64 => {
            let a = ctx.get_operand(srcs[0]);
            if vector {
                let (alo, ahi) = split64(ctx, a)?;
                let lo = ctx.new_temp(RegClass::V1);
                let hi = ctx.new_temp(RegClass::V1);
                emit_valu1(ctx, Opcode::VNotB32, lo, alo);
                emit_valu1(ctx, Opcode::VNotB32, hi, ahi);
                create_vector(ctx, dst, vec![Operand::Temp(lo), Operand::Temp(hi)]);
            } else {
                ctx.emit(Instruction::new(Opcode::SNotB64, vec![a], vec![Definition::Temp(dst)]));
            }
        }
        AluOp::IShl | AluOp::IShr | AluOp::UShr if bits == 64 => {
            let (val, amount) = (ctx.get_operand(srcs[0]), ctx.get_operand(srcs[1]));
            if vector {
                let val = as_vgpr(ctx, val);
                if gen >= GpuGeneration::Gfx8 {
                    let opcode = match op {
                        AluOp::IShl => Opcode::VLshlrevB64,
                        AluOp::IShr => Opcode::VAshrrevI64,
                        AluOp::UShr => Opcode::VLshrrevB64,
                        _ => unreachable!(),
                    };
                    ctx.emit(Instruction::new(opcode, vec![amount, val], vec![Definition::Temp(dst)]));
                } else {
                    let opcode = match op {
                        AluOp::IShl => Opcode::VLshlB64,
                        AluOp::IShr => Opcode::VAshrI64,
                        AluOp::UShr => Opcode::VLshrB64,
                        _ => unreachable!(),
                    };
                    ctx.emit(Instruction::new(opcode, vec![val, amount], vec![Definition::Temp(dst)]));
                }
            } else {
                let opcode = match op {
                    AluOp::IShl => Opcode::SLshlB64,
                    AluOp::IShr => Opcode::SAshrI64,
                    AluOp::UShr => Opcode::SLshrB64,
                    _ => unreachable!(),
                };
                ctx.emit(Instruction::new(opcode, vec![val, amount], vec![Definition::Temp(dst)]));
            }
        }
        AluOp::IMul if bits == 64 => {
            let a = ctx.get_operand(srcs[0]);
            let b = ctx.get_operand(srcs[1]);
            lower_mul64(ctx, dst, a, b)?;
        }

        // --- f32 ---
        AluOp::FAdd | AluOp::FSub | AluOp::FMul | AluOp::FMin | AluOp::FMax if bits == 32 => {
            let (a, b) = (ctx.get_operand(srcs[0]), ctx.get_operand(srcs[1]));
            let opcode = match op {
                AluOp::FAdd => Opcode::VAddF32,
                AluOp::FSub => Opcode::VSubF32,
                AluOp::FMul => Opcode::VMulF32,
                AluOp::FMin => Opcode::VMinF32,
                AluOp::FMax => Opcode::VMaxF32,
                _ => unreachable!(),
            };
            let vdst = valu_dst(ctx, dst);
            emit_valu2(ctx, opcode, vdst, a, b, op.is_commutative());
            finish_valu_dst(ctx, dst, vdst)?;
        }
        AluOp::FNeg if bits == 32 => {
            let a = ctx.get_operand(srcs[0]);
            if vector {
                emit_valu2(ctx, Opcode::VXorB32, dst, Operand::c32(0x8000_0000), a, false);
            } else {
                ctx.emit(Instruction::new(
                    Opcode::SXorB32,
                    vec![a, Operand::c32(0x8000_0000)],
                    vec![Definition::Temp(dst)],
                ));
            }
        }
        AluOp::FAbs if bits == 32 => {
            let a = ctx.get_operand(srcs[0]);
            if vector {
                emit_valu2(ctx, Opcode::VAndB32, dst, Operand::c32(0x7fff_ffff), a, false);
            } else {
                ctx.emit(Instruction::new(
                    Opcode::SAndB32,
                    vec![a, Operand::c32(0x7fff_ffff)],
                    vec![Definition::Temp(dst)],
                ));
            }
        }
        AluOp::FFloor | AluOp::FCeil | AluOp::FTrunc | AluOp::FRound | AluOp::FFract | AluOp::FExp2
            if bits == 32 =>
        {
            let a = ctx.get_operand(srcs[0]);
            let opcode = match op {
                AluOp::FFloor => Opcode::VFloorF32,
                AluOp::FCeil => Opcode::VCeilF32,
                AluOp::FTrunc => Opcode::VTruncF32,
                AluOp::FRound => Opcode::VRndneF32,
                AluOp::FFract => Opcode::VFractF32,
                AluOp::FExp2 => Opcode::VExpF32,
                _ => unreachable!(),
            };
            let vdst = valu_dst(ctx, dst);
            emit_valu1(ctx, opcode, vdst, a);
            finish_valu_dst(ctx, dst, vdst)?;
        }
        AluOp::FRcp | AluOp::FRsq | AluOp::FSqrt | AluOp::FLog2 if bits == 32 => {
            let a = ctx.get_operand(srcs[0]);
            let vdst = valu_dst(ctx, dst);
            emit_transcendental(ctx, op, vdst, a)?;
            finish_valu_dst(ctx, dst, vdst)?;
        }

        // --- f64 (subset) ---
        AluOp::FAdd | AluOp::FSub | AluOp::FMul if bits == 64 => {
            let (a, b) = (ctx.get_operand(srcs[0]), ctx.get_operand(srcs[1]));
            let vdst = valu_dst(ctx, dst);
            let av = as_vgpr(ctx, a);
            let bv = as_vgpr(ctx, b);
            match op {
                AluOp::FAdd => {
                    ctx.emit(Instruction::new(Opcode::VAddF64, vec![av, bv], vec![Definition::Temp(vdst)]));
                }
                AluOp::FMul => {
                    ctx.emit(Instruction::new(Opcode::VMulF64, vec![av, bv], vec![Definition::Temp(vdst)]));
                }
                AluOp::FSub => {
                    // No v_sub_f64; add with the second source negated.
                    ctx.emit(Instruction::with_extra(
                        Opcode::VAddF64,
                        vec![av, bv],
                        vec![Definition::Temp(vdst)],
                        InstrExtra::Modifiers {
                            neg: [false, true, false],
                            abs: [false, false, false],
                        },
                    ));
                }
                _ => unreachable!(),
            }
            finish_valu_dst(ctx, dst, vdst)?;
        }
        AluOp::FNeg | AluOp::FAbs if bits == 64 => {
            // Sign manipulation touches only the high dword.
            let a = ctx.get_operand(srcs[0]);
            let (lo, hi) = split64(ctx, a)?;
            let (opc_v, opc_s, c) = if op == AluOp::FNeg {
                (Opcode::VXorB32, Opcode::SXorB32, 0x8000_0000u32)
            } else {
                (Opcode::VAndB32, Opcode::SAndB32, 0x7fff_ffffu32)
            };
            if vector {
                let hi_dst = ctx.new_temp(RegClass::V1);
                emit_valu2(ctx, opc_v, hi_dst, Operand::c32(c), hi, false);
                let lo = as_vgpr(ctx, lo);
                create_vector(ctx, dst, vec![lo, Operand::Temp(hi_dst)]);
            } else {
                let hi_dst = ctx.new_temp(RegClass::S1);
                ctx.emit(Instruction::new(opc_s, vec![hi, Operand::c32(c)], vec![Definition::Temp(hi_dst)]));
                create_vector(ctx, dst, vec![lo, Operand::Temp(hi_dst)]);
            }
        }
        AluOp::FFloor | AluOp::FCeil | AluOp::FTrunc | AluOp::FRound if bits == 64 => {
            let a = ctx.get_operand(srcs[0]);
            let opcode = match op {
                AluOp::FFloor => Opcode::VFloorF64,
                AluOp::FCeil => Opcode::VCeilF64,
                AluOp::FTrunc => Opcode::VTruncF64,
                AluOp::FRound => Opcode::VRndneF64,
                _ => unreachable!(),
            };
            if gen < GpuGeneration::Gfx7 && op != AluOp::FTrunc {
                bail_isel!("64-bit round/floor/ceil need GFX7 or later");
            }
            let vdst = valu_dst(ctx, dst);
            let av = as_vgpr(ctx, a);
            ctx.emit(Instruction::new(opcode, vec![av], vec![Definition::Temp(vdst)]));
            finish_valu_dst(ctx, dst, vdst)?;
        }

        // --- Conversions ---
        AluOp::I2F | AluOp::U2F | AluOp::F2I | AluOp::F2U | AluOp::F32ToF64 | AluOp::F64ToF32 => {
            let a = ctx.get_operand(srcs[0]);
            let opcode = match op {
                AluOp::I2F => Opcode::VCvtF32I32,
                AluOp::U2F => Opcode::VCvtF32U32,
                AluOp::F2I => Opcode::VCvtI32F32,
                AluOp::F2U => Opcode::VCvtU32F32,
                AluOp::F32ToF64 => Opcode::VCvtF64F32,
                AluOp::F64ToF32 => Opcode::VCvtF32F64,
                _ => unreachable!(),
            };
            let vdst = valu_dst(ctx, dst);
            let av = as_vgpr(ctx, a);
            ctx.emit(Instruction::new(opcode, vec![av], vec![Definition::Temp(vdst)]));
            finish_valu_dst(ctx, dst, vdst)?;
        }

        _ => bail_isel!("no rule for {:?} at {} bits", op, bits),
    }
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn emit_copy(ctx: &mut Context, dst: Temp, src: Operand) {
    let opcode = if dst.rc == RegClass::V1 {
        Opcode::VMovB32
    } else if dst.rc == RegClass::S1 {
        Opcode::SMovB32
    } else {
        Opcode::PParallelcopy
    };
    ctx.emit(Instruction::new(opcode, vec![src], vec![Definition::Temp(dst)]));
}

/// Emit a two-source VALU op. Only the first source slot can hold a
/// scalar or constant; commutative ops swap instead of copying.
fn emit_valu2(ctx: &mut Context, opcode: Opcode, dst: Temp, a: Operand, b: Operand, commutative: bool) {
    let (a, b) = if commutative && !is_vgpr(b) && is_vgpr(a) {
        (b, a)
    } else {
        (a, b)
    };
    let b = as_vgpr(ctx, b);
    ctx.emit(Instruction::new(opcode, vec![a, b], vec![Definition::Temp(dst)]));
}

fn emit_valu1(ctx: &mut Context, opcode: Opcode, dst: Temp, a: Operand) {
    let a = as_vgpr(ctx, a);
    ctx.emit(Instruction::new(opcode, vec![a], vec![Definition::Temp(dst)]));
}

fn is_vgpr(op: Operand) -> bool {
    op.rc().map(|rc| rc.is_vector()).unwrap_or(false)
}

/// Vector destination for a VALU-only operation; uniform defs get a
/// staging temp that is copied back to the scalar bank afterwards.
fn valu_dst(ctx: &mut Context, dst: Temp) -> Temp {
    if dst.rc.is_vector() {
        dst
    } else {
        ctx.new_temp(RegClass::vector(dst.rc.size))
    }
}

fn finish_valu_dst(ctx: &mut Context, dst: Temp, vdst: Temp) -> Result<()> {
    if dst != vdst {
        let u = as_uniform(ctx, Operand::Temp(vdst))?;
        if u != dst {
            ctx.emit(Instruction::new(
                Opcode::PParallelcopy,
                vec![Operand::Temp(u)],
                vec![Definition::Temp(dst)],
            ));
        }
    }
    Ok(())
}

/// 32-bit vector add/sub. GFX9 added the carry-less forms; earlier
/// generations always define a carry mask.
pub(crate) fn emit_vadd32(ctx: &mut Context, dst: Temp, a: Operand, b: Operand, gen: GpuGeneration, sub: bool) {
    if gen >= GpuGeneration::Gfx9 {
        let opcode = if sub { Opcode::VSubU32 } else { Opcode::VAddU32 };
        emit_valu2(ctx, opcode, dst, a, b, !sub);
    } else {
        let carry = ctx.new_temp(ctx.config().lane_mask_rc());
        let opcode = if sub { Opcode::VSubCoU32 } else { Opcode::VAddCoU32 };
        let b = as_vgpr(ctx, b);
        ctx.emit(Instruction::new(
            opcode,
            vec![a, b],
            vec![Definition::Temp(dst), Definition::Temp(carry)],
        ));
    }
}

/// Split a 64-bit operand into (lo, hi) dword operands.
pub(crate) fn split64(ctx: &mut Context, op: Operand) -> Result<(Operand, Operand)> {
    match op {
        Operand::Temp(t) => {
            let elems = emit_split_vector(ctx, t, 2)?;
            Ok((Operand::Temp(elems[0]), Operand::Temp(elems[1])))
        }
        Operand::Const { bits, .. } => Ok((Operand::c32(bits as u32), Operand::c32((bits >> 32) as u32))),
        Operand::Undef(rc) => {
            let half = RegClass {
                bank: rc.bank,
                size: 1,
            };
            Ok((Operand::Undef(half), Operand::Undef(half)))
        }
        Operand::Exec => bail_internal!("exec is not a 64-bit data operand"),
    }
}

/// 64-bit add/sub through 32-bit carry/borrow chains.
fn lower_addsub64(ctx: &mut Context, dst: Temp, a: Operand, b: Operand, sub: bool) -> Result<()> {
    let (alo, ahi) = split64(ctx, a)?;
    let (blo, bhi) = split64(ctx, b)?;
    if dst.rc.is_vector() {
        let lo = ctx.new_temp(RegClass::V1);
        let hi = ctx.new_temp(RegClass::V1);
        let mask_rc = ctx.config().lane_mask_rc();
        let carry = ctx.new_temp(mask_rc);
        let carry2 = ctx.new_temp(mask_rc);
        let (lo_op, hi_op) = if sub {
            (Opcode::VSubCoU32, Opcode::VSubbCoU32)
        } else {
            (Opcode::VAddCoU32, Opcode::VAddcCoU32)
        };
        let blo = as_vgpr(ctx, blo);
        let bhi = as_vgpr(ctx, bhi);
        ctx.emit(Instruction::new(
            lo_op,
            vec![alo, blo],
            vec![Definition::Temp(lo), Definition::Temp(carry)],
        ));
        ctx.emit(Instruction::new(
            hi_op,
            vec![ahi, bhi, Operand::Temp(carry)],
            vec![Definition::Temp(hi), Definition::Temp(carry2)],
        ));
        create_vector(ctx, dst, vec![Operand::Temp(lo), Operand::Temp(hi)]);
    } else {
        let lo = ctx.new_temp(RegClass::S1);
        let hi = ctx.new_temp(RegClass::S1);
        let carry = ctx.new_temp(RegClass::S1);
        let carry2 = ctx.new_temp(RegClass::S1);
        let (lo_op, hi_op) = if sub {
            (Opcode::SSubU32, Opcode::SSubbU32)
        } else {
            (Opcode::SAddU32, Opcode::SAddcU32)
        };
        ctx.emit(Instruction::new(
            lo_op,
            vec![alo, blo],
            vec![Definition::Temp(lo), Definition::Temp(carry)],
        ));
        ctx.emit(Instruction::new(
            hi_op,
            vec![ahi, bhi, Operand::Temp(carry)],
            vec![Definition::Temp(hi), Definition::Temp(carry2)],
        ));
        create_vector(ctx, dst, vec![Operand::Temp(lo), Operand::Temp(hi)]);
    }
    Ok(())
}

/// 64-bit multiply from 32-bit pieces:
/// lo = a.lo * b.lo
/// hi = mulhi(a.lo, b.lo) + a.lo * b.hi + a.hi * b.lo
fn lower_mul64(ctx: &mut Context, dst: Temp, a: Operand, b: Operand) -> Result<()> {
    let (alo, ahi) = split64(ctx, a)?;
    let (blo, bhi) = split64(ctx, b)?;
    if dst.rc.is_vector() {
        let one = RegClass::V1;
        let lo = ctx.new_temp(one);
        let carry_hi = ctx.new_temp(one);
        let cross0 = ctx.new_temp(one);
        let cross1 = ctx.new_temp(one);
        let sum0 = ctx.new_temp(one);
        let hi = ctx.new_temp(one);
        emit_valu2(ctx, Opcode::VMulLoU32, lo, alo, blo, true);
        emit_valu2(ctx, Opcode::VMulHiU32, carry_hi, alo, blo, true);
        emit_valu2(ctx, Opcode::VMulLoU32, cross0, alo, bhi, true);
        emit_valu2(ctx, Opcode::VMulLoU32, cross1, ahi, blo, true);
        emit_valu2(ctx, Opcode::VAddU32, sum0, Operand::Temp(carry_hi), Operand::Temp(cross0), true);
        emit_valu2(ctx, Opcode::VAddU32, hi, Operand::Temp(sum0), Operand::Temp(cross1), true);
        create_vector(ctx, dst, vec![Operand::Temp(lo), Operand::Temp(hi)]);
    } else {
        let one = RegClass::S1;
        let lo = ctx.new_temp(one);
        let carry_hi = ctx.new_temp(one);
        let cross0 = ctx.new_temp(one);
        let cross1 = ctx.new_temp(one);
        let sum0 = ctx.new_temp(one);
        let hi = ctx.new_temp(one);
        let sop2 = |ctx: &mut Context, opc, d, x, y| {
            ctx.emit(Instruction::new(opc, vec![x, y], vec![Definition::Temp(d)]));
        };
        sop2(ctx, Opcode::SMulI32, lo, alo, blo);
        sop2(ctx, Opcode::SMulHiU32, carry_hi, alo, blo);
        sop2(ctx, Opcode::SMulI32, cross0, alo, bhi);
        sop2(ctx, Opcode::SMulI32, cross1, ahi, blo);
        sop2(ctx, Opcode::SAddU32, sum0, Operand::Temp(carry_hi), Operand::Temp(cross0));
        sop2(ctx, Opcode::SAddU32, hi, Operand::Temp(sum0), Operand::Temp(cross1));
        create_vector(ctx, dst, vec![Operand::Temp(lo), Operand::Temp(hi)]);
    }
    Ok(())
}

/// Transcendentals that flush denormal inputs before GFX9: the input is
/// scaled into the normal range and the result compensated, selected per
/// lane on whether the input actually was denormal.
fn emit_transcendental(ctx: &mut Context, op: AluOp, dst: Temp, a: Operand) -> Result<()> {
    let opcode = match op {
        AluOp::FRcp => Opcode::VRcpF32,
        AluOp::FRsq => Opcode::VRsqF32,
        AluOp::FSqrt => Opcode::VSqrtF32,
        AluOp::FLog2 => Opcode::VLogF32,
        _ => unreachable!(),
    };
    if ctx.config().gen >= GpuGeneration::Gfx9 {
        emit_valu1(ctx, opcode, dst, a);
        return Ok(());
    }

    let one = RegClass::V1;
    let mask_rc = ctx.config().lane_mask_rc();
    let av = as_vgpr(ctx, a);

    // |x| < smallest normal?
    let absx = ctx.new_temp(one);
    emit_valu2(ctx, Opcode::VAndB32, absx, Operand::c32(0x7fff_ffff), av, false);
    let is_denorm = ctx.new_temp(mask_rc);
    let threshold = as_vgpr(ctx, Operand::c32(F32_SMALLEST_NORMAL));
    ctx.emit(Instruction::new(
        Opcode::VCmpLtU32,
        vec![Operand::Temp(absx), threshold],
        vec![Definition::Temp(is_denorm)],
    ));

    // Scale denormal inputs by 2^24.
    let scaled = ctx.new_temp(one);
    emit_valu2(ctx, Opcode::VMulF32, scaled, Operand::c32(F32_SCALE_UP), av, true);
    let input = ctx.new_temp(one);
    ctx.emit(Instruction::new(
        Opcode::VCndmaskB32,
        vec![av, Operand::Temp(scaled), Operand::Temp(is_denorm)],
        vec![Definition::Temp(input)],
    ));

    let raw = ctx.new_temp(one);
    emit_valu1(ctx, opcode, raw, Operand::Temp(input));

    // Compensate the scale in the result.
    let fixed = ctx.new_temp(one);
    match op {
        AluOp::FRcp => emit_valu2(ctx, Opcode::VMulF32, fixed, Operand::c32(F32_RCP_FIXUP), Operand::Temp(raw), true),
        AluOp::FRsq => emit_valu2(ctx, Opcode::VMulF32, fixed, Operand::c32(F32_RSQ_FIXUP), Operand::Temp(raw), true),
        AluOp::FSqrt => emit_valu2(ctx, Opcode::VMulF32, fixed, Operand::c32(F32_SQRT_FIXUP), Operand::Temp(raw), true),
        AluOp::FLog2 => {
            emit_valu2(ctx, Opcode::VSubF32, fixed, Operand::Temp(raw), Operand::c32(F32_LOG2_FIXUP), false)
        }
        _ => unreachable!(),
    }
    ctx.emit(Instruction::new(
        Opcode::VCndmaskB32,
        vec![Operand::Temp(raw), Operand::Temp(fixed), Operand::Temp(is_denorm)],
        vec![Definition::Temp(dst)],
    ));
    Ok(())
}

// =============================================================================
// Comparisons
// =============================================================================

/// Vector-compare opcode plus an operand-swap flag for directions the
/// hardware does not encode directly.
fn vopc_for(op: AluOp, bits: u32) -> Result<(Opcode, bool)> {
    use AluOp::*;
    let r = match (op, bits) {
        (IEq, 32) => (Opcode::VCmpEqU32, false),
        (INe, 32) => (Opcode::VCmpLgU32, false),
        (ILt, 32) => (Opcode::VCmpLtI32, false),
        (ILe, 32) => (Opcode::VCmpLeI32, false),
        (IGt, 32) => (Opcode::VCmpLtI32, true),
        (IGe, 32) => (Opcode::VCmpLeI32, true),
        (ULt, 32) => (Opcode::VCmpLtU32, false),
        (ULe, 32) => (Opcode::VCmpLeU32, false),
        (UGt, 32) => (Opcode::VCmpLtU32, true),
        (UGe, 32) => (Opcode::VCmpLeU32, true),
        (IEq, 64) => (Opcode::VCmpEqU64, false),
        (INe, 64) => (Opcode::VCmpLgU64, false),
        (FEq, 32) => (Opcode::VCmpEqF32, false),
        (FNe, 32) => (Opcode::VCmpNeqF32, false),
        (FLt, 32) => (Opcode::VCmpLtF32, false),
        (FLe, 32) => (Opcode::VCmpLeF32, false),
        (FGt, 32) => (Opcode::VCmpLtF32, true),
        (FGe, 32) => (Opcode::VCmpLeF32, true),
        (FEq, 64) => (Opcode::VCmpEqF64, false),
        (FNe, 64) => (Opcode::VCmpNeqF64, false),
        (FLt, 64) => (Opcode::VCmpLtF64, false),
        (FLe, 64) => (Opcode::VCmpLeF64, false),
        (FGt, 64) => (Opcode::VCmpLtF64, true),
        (FGe, 64) => (Opcode::VCmpLeF64, true),
        _ => bail_isel!("no vector compare for {:?} at {} bits", op, bits),
    };
    Ok(r)
}

fn sopc_for(op: AluOp) -> Option<Opcode> {
    use AluOp::*;
    match op {
        IEq => Some(Opcode::SCmpEqU32),
        INe => Some(Opcode::SCmpLgU32),
        ILt => Some(Opcode::SCmpLtI32),
        ILe => Some(Opcode::SCmpLeI32),
        IGt => Some(Opcode::SCmpGtI32),
        IGe => Some(Opcode::SCmpGeI32),
        ULt => Some(Opcode::SCmpLtU32),
        ULe => Some(Opcode::SCmpLeU32),
        UGt => Some(Opcode::SCmpGtU32),
        UGe => Some(Opcode::SCmpGeU32),
        _ => None,
    }
}

fn lower_comparison(ctx: &mut Context, def: ValueId, dst: Temp, op: AluOp, srcs: &[ValueId]) -> Result<()> {
    use AluOp::*;
    let bits = ctx.func.bit_size(srcs[0]);
    let divergent = ctx.divergent(def);
    let a = get_alu_src(ctx, srcs[0], 1)?;
    let b = get_alu_src(ctx, srcs[1], 1)?;

    // Ordered 64-bit integer compares have no single instruction.
    if bits == 64 && matches!(op, ILt | ILe | IGt | IGe | ULt | ULe | UGt | UGe) {
        let (op, a, b) = match op {
            IGt => (ILt, b, a),
            IGe => (ILe, b, a),
            UGt => (ULt, b, a),
            UGe => (ULe, b, a),
            _ => (op, a, b),
        };
        return lower_cmp64_ordered(ctx, dst, op, a, b, divergent);
    }

    if !divergent {
        if op_is_float(op) {
            // Float compares only exist on the vector unit; reduce the
            // resulting mask to a scalar boolean.
            let mask = ctx.new_temp(ctx.config().lane_mask_rc());
            emit_vopc(ctx, op, bits, mask, a, b)?;
            emit_mask_nonzero(ctx, dst, mask);
            return Ok(());
        }
        match bits {
            32 => {
                let opcode = sopc_for(op)
                    .ok_or_else(|| crate::err_isel!("no scalar compare for {:?}", op))?;
                ctx.emit(Instruction::new(opcode, vec![a, b], vec![Definition::Temp(dst)]));
            }
            64 => {
                let opcode = match op {
                    IEq => Opcode::SCmpEqU64,
                    INe => Opcode::SCmpLgU64,
                    _ => bail_isel!("no scalar compare for {:?} at 64 bits", op),
                };
                ctx.emit(Instruction::new(opcode, vec![a, b], vec![Definition::Temp(dst)]));
            }
            1 => {
                // Boolean equality on scalar bools.
                let x = ctx.new_temp(RegClass::S1);
                ctx.emit(Instruction::new(Opcode::SXorB32, vec![a, b], vec![Definition::Temp(x)]));
                let opcode = match op {
                    IEq => Opcode::SCmpEqU32,
                    INe => Opcode::SCmpLgU32,
                    _ => bail_isel!("no rule for {:?} on booleans", op),
                };
                ctx.emit(Instruction::new(
                    opcode,
                    vec![Operand::Temp(x), Operand::c32(0)],
                    vec![Definition::Temp(dst)],
                ));
            }
            _ => bail_isel!("no compare rule at {} bits", bits),
        }
        return Ok(());
    }

    emit_vopc(ctx, op, bits, dst, a, b)
}

fn op_is_float(op: AluOp) -> bool {
    use AluOp::*;
    matches!(op, FEq | FNe | FLt | FLe | FGt | FGe)
}

fn emit_vopc(ctx: &mut Context, op: AluOp, bits: u32, mask_dst: Temp, a: Operand, b: Operand) -> Result<()> {
    let (opcode, swap) = vopc_for(op, bits)?;
    let (a, b) = if swap { (b, a) } else { (a, b) };
    let b = as_vgpr(ctx, b);
    ctx.emit(Instruction::new(opcode, vec![a, b], vec![Definition::Temp(mask_dst)]));
    Ok(())
}

/// Scalar boolean from "any bit set in a lane mask".
fn emit_mask_nonzero(ctx: &mut Context, dst: Temp, mask: Temp) {
    let (opcode, zero) = if ctx.config().wave64 {
        (Opcode::SCmpLgU64, Operand::c64(0))
    } else {
        (Opcode::SCmpLgU32, Operand::c32(0))
    };
    ctx.emit(Instruction::new(
        opcode,
        vec![Operand::Temp(mask), zero],
        vec![Definition::Temp(dst)],
    ));
}

/// Ordered 64-bit integer compare decomposed into 32-bit halves:
/// `lt(a, b) = a.hi <s b.hi || (a.hi == b.hi && a.lo <u b.lo)`.
fn lower_cmp64_ordered(ctx: &mut Context, dst: Temp, op: AluOp, a: Operand, b: Operand, divergent: bool) -> Result<()> {
    use AluOp::*;
    let (alo, ahi) = split64(ctx, a)?;
    let (blo, bhi) = split64(ctx, b)?;
    let (hi_op, lo_op) = match op {
        ILt => (ILt, ULt),
        ILe => (ILt, ULe),
        ULt => (ULt, ULt),
        ULe => (ULt, ULe),
        _ => bail_internal!("unexpected 64-bit compare {:?}", op),
    };

    if divergent {
        let mask_rc = ctx.config().lane_mask_rc();
        let hi_lt = ctx.new_temp(mask_rc);
        let hi_eq = ctx.new_temp(mask_rc);
        let lo_cmp = ctx.new_temp(mask_rc);
        let both = ctx.new_temp(mask_rc);
        emit_vopc(ctx, hi_op, 32, hi_lt, ahi, bhi)?;
        emit_vopc(ctx, IEq, 32, hi_eq, ahi, bhi)?;
        emit_vopc(ctx, lo_op, 32, lo_cmp, alo, blo)?;
        let (and_op, or_op) = if mask_rc.size == 2 {
            (Opcode::SAndB64, Opcode::SOrB64)
        } else {
            (Opcode::SAndB32, Opcode::SOrB32)
        };
        ctx.emit(Instruction::new(
            and_op,
            vec![Operand::Temp(hi_eq), Operand::Temp(lo_cmp)],
            vec![Definition::Temp(both)],
        ));
        ctx.emit(Instruction::new(
            or_op,
            vec![Operand::Temp(hi_lt), Operand::Temp(both)],
            vec![Definition::Temp(dst)],
        ));
    } else {
        let one = RegClass::S1;
        let hi_lt = ctx.new_temp(one);
        let hi_eq = ctx.new_temp(one);
        let lo_cmp = ctx.new_temp(one);
        let both = ctx.new_temp(one);
        let scmp = |op: AluOp| sopc_for(op).expect("32-bit scalar compare exists");
        ctx.emit(Instruction::new(scmp(hi_op), vec![ahi, bhi], vec![Definition::Temp(hi_lt)]));
        ctx.emit(Instruction::new(scmp(IEq), vec![ahi, bhi], vec![Definition::Temp(hi_eq)]));
        ctx.emit(Instruction::new(scmp(lo_op), vec![alo, blo], vec![Definition::Temp(lo_cmp)]));
        ctx.emit(Instruction::new(
            Opcode::SAndB32,
            vec![Operand::Temp(hi_eq), Operand::Temp(lo_cmp)],
            vec![Definition::Temp(both)],
        ));
        ctx.emit(Instruction::new(
            Opcode::SOrB32,
            vec![Operand::Temp(hi_lt), Operand::Temp(both)],
            vec![Definition::Temp(dst)],
        ));
    }
    Ok(())
}

// =============================================================================
// Select
// =============================================================================

fn lower_bcsel(ctx: &mut Context, dst: Temp, srcs: &[ValueId]) -> Result<()> {
    let cond = srcs[0];
    let t = ctx.get_operand(srcs[1]);
    let e = ctx.get_operand(srcs[2]);

    if dst.rc.is_vector() {
        let mask = super::values::bool_to_mask(ctx, cond)?;
        if dst.rc.size == 1 {
            let t = as_vgpr(ctx, t);
            ctx.emit(Instruction::new(
                Opcode::VCndmaskB32,
                vec![e, t, mask],
                vec![Definition::Temp(dst)],
            ));
        } else {
            // Per-dword select, recombined.
            let (tlo, thi) = split64(ctx, t)?;
            let (elo, ehi) = split64(ctx, e)?;
            let lo = ctx.new_temp(RegClass::V1);
            let hi = ctx.new_temp(RegClass::V1);
            let tlo = as_vgpr(ctx, tlo);
            let thi = as_vgpr(ctx, thi);
            ctx.emit(Instruction::new(
                Opcode::VCndmaskB32,
                vec![elo, tlo, mask],
                vec![Definition::Temp(lo)],
            ));
            ctx.emit(Instruction::new(
                Opcode::VCndmaskB32,
                vec![ehi, thi, mask],
                vec![Definition::Temp(hi)],
            ));
            create_vector(ctx, dst, vec![Operand::Temp(lo), Operand::Temp(hi)]);
        }
        return Ok(());
    }

    // Scalar select. A lane-mask-typed destination (boolean select)
    // becomes mask algebra instead.
    if ctx.func.bit_size(srcs[1]) == 1 && ctx.divergent(srcs[1]) {
        let c = super::values::bool_to_mask(ctx, cond)?;
        let mask_rc = ctx.config().lane_mask_rc();
        let (and_op, andn2_op, or_op) = if mask_rc.size == 2 {
            (Opcode::SAndB64, Opcode::SAndn2B64, Opcode::SOrB64)
        } else {
            (Opcode::SAndB32, Opcode::SAndn2B32, Opcode::SOrB32)
        };
        let picked_t = ctx.new_temp(mask_rc);
        let picked_e = ctx.new_temp(mask_rc);
        ctx.emit(Instruction::new(and_op, vec![t, c], vec![Definition::Temp(picked_t)]));
        ctx.emit(Instruction::new(andn2_op, vec![e, c], vec![Definition::Temp(picked_e)]));
        ctx.emit(Instruction::new(
            or_op,
            vec![Operand::Temp(picked_t), Operand::Temp(picked_e)],
            vec![Definition::Temp(dst)],
        ));
        return Ok(());
    }

    let cond_op = ctx.get_operand(cond);
    let opcode = if dst.rc.size == 2 { Opcode::SCselectB64 } else { Opcode::SCselectB32 };
    // Operand order: value-if-true, value-if-false, condition.
    ctx.emit(Instruction::new(opcode, vec![t, e, cond_op], vec![Definition::Temp(dst)]));
    Ok(())
}
