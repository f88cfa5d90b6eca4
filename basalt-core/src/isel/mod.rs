//! Instruction selection: SIR to wave-ISA lowering.
//!
//! This pass performs one synchronous walk of the input function's
//! structured control-flow tree and emits target pseudo-instructions into
//! basic blocks, building the logical and linear CFGs as it goes. Control
//! flow shape depends on per-value divergence, which is why CFG
//! construction happens here and not in a separate pass.
//!
//! Submodules, one per lowering family:
//! - [`values`]: SSA-value materialization and vector split/extract/build
//! - [`alu`]: scalar/vector ALU rules
//! - [`memory`]: shared/global/buffer/attribute/uniform access
//! - [`tex`]: texture sampling and image access
//! - [`subgroup`]: cross-lane operations
//! - [`cfg`]: the divergence-aware control-flow builder (drives the walk)

pub mod alu;
pub mod cfg;
pub mod memory;
pub mod subgroup;
pub mod tex;
pub mod values;

#[cfg(test)]
mod cfg_tests;
#[cfg(test)]
mod memory_tests;
#[cfg(test)]
mod subgroup_tests;
#[cfg(test)]
mod tests;
#[cfg(test)]
mod values_tests;

use indexmap::IndexMap;
use log::{debug, trace};

use crate::error::Result;
use crate::isa::{
    BlockId, BlockKind, Config, Definition, Instruction, Opcode, Operand, Program, RegClass, Temp,
};
use crate::sir::{self, ConstValue, InstrKind, Intrinsic, ValueId, ValueInfo};
use crate::{bail_internal, IdSource};

// =============================================================================
// Control-flow bookkeeping
// =============================================================================

/// State of the innermost enclosing loop.
#[derive(Debug)]
pub(crate) struct LoopInfo {
    /// Blocks that ended in a whole-wave `break`; branch to the loop exit.
    pub break_sources: Vec<BlockId>,
    /// Blocks where part of the wave broke out: logical predecessors of
    /// the exit whose lanes are masked off while the wave falls through
    /// linearly toward the enclosing join.
    pub masked_break_sources: Vec<BlockId>,
    /// Blocks that ended in a whole-wave `continue`; wired to the latch.
    pub continue_sources: Vec<BlockId>,
    /// Blocks where part of the wave continued; logical predecessors of
    /// the latch, masked off for the rest of the iteration.
    pub masked_continue_sources: Vec<BlockId>,
    /// A divergent break or discard was seen; the latch must test for an
    /// all-empty mask and exit early.
    pub has_divergent_break: bool,
    /// Lanes that broke out; or'd back into exec at the loop exit.
    pub break_mask: Option<Temp>,
    /// Lanes that continued this iteration; or'd back into exec at the
    /// latch (and at the exit, for a whole-wave break mid-iteration).
    pub cont_mask: Option<Temp>,
    /// Length of [`ControlFlowInfo::saved_masks`] at loop entry; a break
    /// inside the loop only edits masks above this mark.
    pub saved_depth: usize,
}

impl LoopInfo {
    /// Some lanes left the current iteration early (masked break or
    /// continue, or a demote), so exec may not cover the whole wave.
    pub fn lanes_departed(&self) -> bool {
        self.has_divergent_break || self.break_mask.is_some() || self.cont_mask.is_some()
    }

    pub fn new(saved_depth: usize) -> Self {
        LoopInfo {
            break_sources: Vec::new(),
            masked_break_sources: Vec::new(),
            continue_sources: Vec::new(),
            masked_continue_sources: Vec::new(),
            has_divergent_break: false,
            break_mask: None,
            cont_mask: None,
            saved_depth,
        }
    }
}

/// Per-function control-flow info, reset per function and mutated with
/// strict push/pop discipline matching the lexical nesting of the input.
#[derive(Debug, Default)]
pub(crate) struct ControlFlowInfo {
    pub loop_depth: u32,
    /// Inside a divergent if (or a loop containing one).
    pub in_divergent_cf: bool,
    /// The innermost enclosing `if` is divergent.
    pub parent_if_divergent: bool,
    /// A divergent break/discard may have emptied the mask.
    pub exec_potentially_empty: bool,
    /// Saved exec masks of the enclosing divergent ifs, innermost last.
    /// A divergent break edits these so the merge restores cannot revive
    /// the lanes that left.
    pub saved_masks: Vec<Temp>,
    pub parent_loop: Option<LoopInfo>,
}

/// Predecessor-reachability info for the phis of a just-created block.
///
/// `reachable[i]` states whether the i-th source-order predecessor of the
/// block materialized; phi operands for unreachable predecessors are
/// trimmed.
#[derive(Debug, Clone)]
pub(crate) struct PendingPhis {
    pub reachable: Vec<bool>,
    /// Insertion cursor keeping phis ahead of any mask-restore code the
    /// merge construction already placed at the block head.
    pub insert_at: usize,
}

// =============================================================================
// Selection context
// =============================================================================

/// All state of one function lowering.
pub(crate) struct Context<'a> {
    pub func: &'a sir::Function,
    pub program: Program,
    /// Block instructions are currently appended to.
    pub current: BlockId,
    temp_ids: IdSource<u32>,
    /// SIR value -> machine temp, pre-populated for every non-constant def.
    val_map: IndexMap<ValueId, Temp>,
    /// SIR value -> compile-time constant.
    const_map: IndexMap<ValueId, ConstValue>,
    /// SIR values defined by `Undef`.
    undef_set: indexmap::IndexSet<ValueId>,
    /// Vector-component cache: temp id -> already-materialized components.
    /// Entries are replaced wholesale, never mutated.
    pub allocated_vec: IndexMap<u32, Vec<Temp>>,
    /// Descriptor-set base pointers, materialized as extra wave inputs on
    /// first use.
    pub set_ptrs: IndexMap<u32, Temp>,
    pub cf: ControlFlowInfo,
    pub pending_phis: Option<PendingPhis>,
}

impl<'a> Context<'a> {
    fn new(func: &'a sir::Function, config: Config) -> Result<Self> {
        let mut ctx = Context {
            func,
            program: Program::new(config),
            current: BlockId(0),
            temp_ids: IdSource::new(),
            val_map: IndexMap::new(),
            const_map: IndexMap::new(),
            undef_set: indexmap::IndexSet::new(),
            allocated_vec: IndexMap::new(),
            set_ptrs: IndexMap::new(),
            cf: ControlFlowInfo::default(),
            pending_phis: None,
        };
        ctx.current = ctx.program.create_block(BlockKind::TOP_LEVEL | BlockKind::UNIFORM);
        ctx.prepare_values()?;
        Ok(ctx)
    }

    /// Pre-create temps for every non-constant SSA def so that loop-header
    /// phis can reference back-edge values before their defining
    /// instruction has been visited.
    fn prepare_values(&mut self) -> Result<()> {
        let mut params: Vec<(u32, Temp)> = Vec::new();
        for instr in &self.func.instrs {
            let Some(def) = instr.def else { continue };
            match &instr.kind {
                InstrKind::Const(c) => {
                    self.const_map.insert(def, *c);
                }
                InstrKind::Undef => {
                    self.undef_set.insert(def);
                }
                InstrKind::Param { index } => {
                    let temp = self.new_temp(self.rc_for(self.func.value(def)));
                    self.val_map.insert(def, temp);
                    params.push((*index, temp));
                }
                _ => {
                    let temp = self.new_temp(self.rc_for(self.func.value(def)));
                    self.val_map.insert(def, temp);
                }
            }
        }

        // The entry block starts with the wave's pre-loaded inputs.
        params.sort_by_key(|&(index, _)| index);
        let defs = params.into_iter().map(|(_, t)| Definition::Temp(t)).collect();
        self.emit(Instruction::new(Opcode::PStartpgm, vec![], defs));
        Ok(())
    }

    /// Register class for a SIR value layout.
    pub fn rc_for(&self, info: ValueInfo) -> RegClass {
        if info.bit_size == 1 {
            if info.divergent {
                self.program.config.lane_mask_rc()
            } else {
                RegClass::S1
            }
        } else {
            let dwords = info.num_components * (info.bit_size / 32);
            if info.divergent {
                RegClass::vector(dwords)
            } else {
                RegClass::scalar(dwords)
            }
        }
    }

    pub fn new_temp(&mut self, rc: RegClass) -> Temp {
        let id = self.temp_ids.next();
        Temp::new(id, rc)
    }

    /// Append an instruction to the current block; returns its index for
    /// later flag fixup within the same lowering rule.
    pub fn emit(&mut self, instr: Instruction) -> usize {
        let block = self.program.block_mut(self.current);
        block.instrs.push(instr);
        block.instrs.len() - 1
    }

    pub fn last_instr_mut(&mut self) -> &mut Instruction {
        self.program
            .block_mut(self.current)
            .instrs
            .last_mut()
            .expect("no instruction emitted yet")
    }

    /// Create a new block and make it current.
    pub fn start_block(&mut self, kind: BlockKind) -> BlockId {
        let id = self.program.create_block(kind);
        self.current = id;
        id
    }

    /// The machine temp holding a SIR value. Constants and undefs have no
    /// temp; use [`Context::get_operand`] for those.
    pub fn get_temp(&self, val: ValueId) -> Result<Temp> {
        match self.val_map.get(&val) {
            Some(&t) => Ok(t),
            None => Err(crate::err_internal!("no temp for value {}", val)),
        }
    }

    /// Materialize a SIR value reference as an operand: inline constant,
    /// explicit undef, or temp.
    pub fn get_operand(&mut self, val: ValueId) -> Operand {
        if let Some(&c) = self.const_map.get(&val) {
            return match c {
                ConstValue::U32(v) => Operand::c32(v),
                ConstValue::F32(v) => Operand::c32(v.to_bits()),
                ConstValue::U64(v) => Operand::c64(v),
                ConstValue::F64(v) => Operand::c64(v.to_bits()),
                ConstValue::Bool(v) => Operand::c32(v as u32),
            };
        }
        if self.undef_set.contains(&val) {
            return Operand::Undef(self.rc_for(self.func.value(val)));
        }
        Operand::Temp(self.val_map[&val])
    }

    /// Compile-time constant for a value, if it is one.
    pub fn constant_of(&self, val: ValueId) -> Option<ConstValue> {
        self.const_map.get(&val).copied()
    }

    pub fn config(&self) -> Config {
        self.program.config
    }

    pub fn divergent(&self, val: ValueId) -> bool {
        self.func.divergent(val)
    }
}

// =============================================================================
// Pass entry
// =============================================================================

/// Lower a SIR function to a wave-ISA program.
///
/// Fails with [`crate::CompilerError::Unsupported`] when the input uses an
/// opcode/width/bank/generation combination with no lowering rule, and
/// with [`crate::CompilerError::Internal`] on pass-internal contract
/// violations. Either failure invalidates the whole compilation unit;
/// there is no partial output.
pub fn select_program(func: &sir::Function, config: Config) -> Result<Program> {
    debug!("selecting function `{}` for {:?}", func.name, config.gen);
    let mut ctx = Context::new(func, config)?;

    let exit = cfg::walk_body(&mut ctx, &func.body)?;

    // Normal fallthrough off the end of the function ends the program.
    if exit == cfg::Exit::Fallthrough {
        ctx.emit(Instruction::new(Opcode::SEndpgm, vec![], vec![]));
    }

    ctx.program.temp_count = ctx.temp_ids.count();
    debug!(
        "selected {} blocks, {} temps, needs_exact: {}",
        ctx.program.blocks.len(),
        ctx.program.temp_count,
        ctx.program.needs_exact
    );
    Ok(ctx.program)
}

/// Lower one non-phi SIR instruction into the current block.
///
/// Returns `true` when the instruction terminated the program (top-level
/// discard), making the rest of the block unreachable.
pub(crate) fn select_instr(ctx: &mut Context, instr: &sir::Instr) -> Result<bool> {
    trace!("select {:?}", instr.kind);
    match &instr.kind {
        // Handled during context preparation.
        InstrKind::Const(_) | InstrKind::Undef | InstrKind::Param { .. } => Ok(false),

        InstrKind::Alu { op, srcs } => {
            alu::lower_alu(ctx, instr, *op, srcs)?;
            Ok(false)
        }
        InstrKind::Vec(comps) => {
            values::lower_vec(ctx, instr, comps)?;
            Ok(false)
        }
        InstrKind::ExtractComp { src, comp } => {
            values::lower_extract_comp(ctx, instr, *src, *comp)?;
            Ok(false)
        }
        InstrKind::Tex(tex) => {
            tex::lower_tex(ctx, instr, tex)?;
            Ok(false)
        }
        InstrKind::Intrinsic { op, srcs } => select_intrinsic(ctx, instr, op, srcs),
        InstrKind::Phi { .. } => {
            bail_internal!("phi outside a merge position")
        }
    }
}

fn select_intrinsic(ctx: &mut Context, instr: &sir::Instr, op: &Intrinsic, srcs: &[ValueId]) -> Result<bool> {
    match op {
        Intrinsic::LoadShared { .. }
        | Intrinsic::StoreShared { .. }
        | Intrinsic::SharedAtomic { .. }
        | Intrinsic::LoadGlobal { .. }
        | Intrinsic::StoreGlobal { .. }
        | Intrinsic::GlobalAtomic { .. }
        | Intrinsic::LoadBuffer { .. }
        | Intrinsic::StoreBuffer { .. }
        | Intrinsic::BufferAtomic { .. }
        | Intrinsic::LoadUniform { .. }
        | Intrinsic::LoadAttribute { .. }
        | Intrinsic::ImageLoad { .. }
        | Intrinsic::ImageStore { .. } => {
            memory::lower_memory(ctx, instr, op, srcs)?;
            Ok(false)
        }

        Intrinsic::Ballot
        | Intrinsic::ReadFirstLane
        | Intrinsic::ReadLane
        | Intrinsic::Shuffle
        | Intrinsic::LaneIndex
        | Intrinsic::Reduce { .. }
        | Intrinsic::InclusiveScan { .. }
        | Intrinsic::ExclusiveScan { .. } => {
            subgroup::lower_subgroup(ctx, instr, op, srcs)?;
            Ok(false)
        }

        Intrinsic::Discard => cfg::emit_discard(ctx, None),
        Intrinsic::DiscardIf => cfg::emit_discard(ctx, Some(srcs[0])),
    }
}
