//! Wave-ISA intermediate representation (output of instruction selection).
//!
//! This is the vocabulary the register allocator, scheduler and encoder
//! consume:
//! - **Temps** carry a register class: a bank (scalar or vector) and a
//!   width in 32-bit units. Scalar-bank values are wave-uniform; vector-
//!   bank values hold one value per lane.
//! - **Instructions** are opcode + ordered operands + ordered definitions,
//!   plus per-kind payloads (memory flags, image metadata, branch targets,
//!   reduction parameters, source modifiers).
//! - **Blocks** carry two independent edge sets: the *logical* graph
//!   mirrors source-level nesting and is what phi placement follows; the
//!   *linear* graph mirrors actual execution order under a divergent exec
//!   mask, including invert blocks that exist only linearly.
//!
//! Blocks are never merged or deleted once created; a block that ends up
//! unreachable simply stays empty.

pub mod display;
pub mod verify;


use crate::sir::{AtomicOp, ReduceOp, TexDim};

// =============================================================================
// Register classes and temporaries
// =============================================================================

/// The two register files of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegBank {
    /// One value shared by the whole wave.
    Scalar,
    /// One value per lane.
    Vector,
}

/// A register class: bank plus width in 32-bit units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegClass {
    pub bank: RegBank,
    pub size: u32,
}

impl RegClass {
    pub const fn scalar(size: u32) -> Self {
        RegClass {
            bank: RegBank::Scalar,
            size,
        }
    }

    pub const fn vector(size: u32) -> Self {
        RegClass {
            bank: RegBank::Vector,
            size,
        }
    }

    pub const S1: RegClass = RegClass::scalar(1);
    pub const S2: RegClass = RegClass::scalar(2);
    pub const S4: RegClass = RegClass::scalar(4);
    pub const S8: RegClass = RegClass::scalar(8);
    pub const V1: RegClass = RegClass::vector(1);
    pub const V2: RegClass = RegClass::vector(2);
    pub const V3: RegClass = RegClass::vector(3);
    pub const V4: RegClass = RegClass::vector(4);

    pub fn bytes(self) -> u32 {
        self.size * 4
    }

    pub fn is_vector(self) -> bool {
        self.bank == RegBank::Vector
    }

    pub fn is_scalar(self) -> bool {
        self.bank == RegBank::Scalar
    }
}

/// A machine value: unique id plus register class.
///
/// Created fresh for every definition; ids come from the compilation
/// unit's single monotonically increasing counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Temp {
    pub id: u32,
    pub rc: RegClass,
}

impl Temp {
    pub fn new(id: u32, rc: RegClass) -> Self {
        Temp { id, rc }
    }
}

// =============================================================================
// Operands and definitions
// =============================================================================

/// An instruction input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Temp(Temp),
    /// Inline constant / literal; `size` in 32-bit units.
    Const { bits: u64, size: u32 },
    /// Read of the active-lane mask.
    Exec,
    /// Explicitly undefined input of the given class.
    Undef(RegClass),
}

impl Operand {
    pub fn c32(v: u32) -> Self {
        Operand::Const {
            bits: v as u64,
            size: 1,
        }
    }

    pub fn c64(v: u64) -> Self {
        Operand::Const { bits: v, size: 2 }
    }

    pub fn as_temp(&self) -> Option<Temp> {
        match self {
            Operand::Temp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Operand::Const { .. })
    }

    /// Register class of the operand as the consumer sees it.
    pub fn rc(&self) -> Option<RegClass> {
        match self {
            Operand::Temp(t) => Some(t.rc),
            Operand::Undef(rc) => Some(*rc),
            _ => None,
        }
    }
}

/// An instruction output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Definition {
    Temp(Temp),
    /// Write of the active-lane mask.
    Exec,
}

impl Definition {
    pub fn as_temp(&self) -> Option<Temp> {
        match self {
            Definition::Temp(t) => Some(*t),
            _ => None,
        }
    }
}

// =============================================================================
// Opcodes
// =============================================================================

/// Target opcodes: pseudo-instructions (`P*`) resolved by later passes,
/// plus the machine instruction families needed by selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Opcode {
    // --- Pseudo ---
    /// Defines the wave's pre-loaded inputs at function entry.
    PStartpgm,
    /// Logical phi (operands follow logical predecessors).
    PPhi,
    /// Linear phi (operands follow linear predecessors).
    PLinearPhi,
    PParallelcopy,
    PSplitVector,
    PCreateVector,
    PExtractVector,
    /// Vector-bank to scalar-bank copy; legal only for non-divergent data.
    PAsUniform,
    /// Narrow the active mask without terminating control flow.
    PDemote,
    PBranch,
    /// Branch if the condition operand is all-zero.
    PCbranchZ,
    /// Branch if the condition operand is not all-zero.
    PCbranchNz,
    PReduce,
    PInclusiveScan,
    PExclusiveScan,

    // --- SALU ---
    SMovB32,
    SMovB64,
    SAddU32,
    SAddcU32,
    SSubU32,
    SSubbU32,
    SMulI32,
    SMulHiU32,
    SMulHiI32,
    SAndB32,
    SAndB64,
    SOrB32,
    SOrB64,
    SXorB32,
    SXorB64,
    SNotB32,
    SNotB64,
    SAndn2B32,
    SAndn2B64,
    SAndSaveexecB32,
    SAndSaveexecB64,
    SLshlB32,
    SLshlB64,
    SLshrB32,
    SLshrB64,
    SAshrI32,
    SAshrI64,
    SMinI32,
    SMaxI32,
    SMinU32,
    SMaxU32,
    SCselectB32,
    SCselectB64,
    SBcnt1I32B32,
    SBcnt1I32B64,
    SCmpEqU32,
    SCmpLgU32,
    SCmpLtI32,
    SCmpLeI32,
    SCmpGtI32,
    SCmpGeI32,
    SCmpLtU32,
    SCmpLeU32,
    SCmpGtU32,
    SCmpGeU32,
    SCmpEqU64,
    SCmpLgU64,
    SEndpgm,

    // --- SMEM ---
    SLoadDword,
    SLoadDwordx2,
    SLoadDwordx4,
    SBufferLoadDword,
    SBufferLoadDwordx2,
    SBufferLoadDwordx4,

    // --- VALU ---
    VMovB32,
    VAddU32,
    VSubU32,
    VAddCoU32,
    VAddcCoU32,
    VSubCoU32,
    VSubbCoU32,
    VMulLoU32,
    VMulHiU32,
    VMulHiI32,
    VAndB32,
    VOrB32,
    VXorB32,
    VNotB32,
    VLshlrevB32,
    VLshrrevB32,
    VAshrrevI32,
    VLshlB64,
    VLshrB64,
    VAshrI64,
    VLshlrevB64,
    VLshrrevB64,
    VAshrrevI64,
    VMinI32,
    VMaxI32,
    VMinU32,
    VMaxU32,
    VCndmaskB32,
    VBfeU32,
    VMbcntLoU32B32,
    VMbcntHiU32B32,
    VReadfirstlaneB32,
    VReadlaneB32,

    VAddF32,
    VSubF32,
    VMulF32,
    VMadF32,
    VMinF32,
    VMaxF32,
    VRcpF32,
    VRsqF32,
    VSqrtF32,
    VLogF32,
    VExpF32,
    VFloorF32,
    VCeilF32,
    VTruncF32,
    VRndneF32,
    VFractF32,
    VCubeidF32,
    VCubescF32,
    VCubetcF32,
    VCubemaF32,

    VAddF64,
    VMulF64,
    VTruncF64,
    VCeilF64,
    VFloorF64,
    VRndneF64,

    VCvtF32I32,
    VCvtF32U32,
    VCvtI32F32,
    VCvtU32F32,
    VCvtF64F32,
    VCvtF32F64,

    // --- VOPC (vector compares, defining a lane mask) ---
    // Only the lt/le directions exist; gt/ge are expressed by swapping
    // operands during selection.
    VCmpEqU32,
    VCmpLgU32,
    VCmpLtI32,
    VCmpLeI32,
    VCmpLtU32,
    VCmpLeU32,
    VCmpEqU64,
    VCmpLgU64,
    VCmpEqF32,
    VCmpNeqF32,
    VCmpLtF32,
    VCmpLeF32,
    VCmpEqF64,
    VCmpNeqF64,
    VCmpLtF64,
    VCmpLeF64,

    // --- DS (workgroup-shared memory) ---
    DsReadB32,
    DsRead2B32,
    DsReadB64,
    DsRead2B64,
    DsReadB96,
    DsReadB128,
    DsWriteB32,
    DsWrite2B32,
    DsWriteB64,
    DsWrite2B64,
    DsWriteB96,
    DsWriteB128,
    DsAtomic(AtomicOp),
    DsBpermuteB32,

    // --- MUBUF / MTBUF ---
    BufferLoadDword,
    BufferLoadDwordx2,
    BufferLoadDwordx3,
    BufferLoadDwordx4,
    BufferStoreDword,
    BufferStoreDwordx2,
    BufferStoreDwordx3,
    BufferStoreDwordx4,
    BufferAtomic(AtomicOp),
    TbufferLoadFormatX,
    TbufferLoadFormatXy,
    TbufferLoadFormatXyz,
    TbufferLoadFormatXyzw,

    // --- FLAT / GLOBAL ---
    FlatLoadDword,
    FlatLoadDwordx2,
    FlatLoadDwordx3,
    FlatLoadDwordx4,
    FlatStoreDword,
    FlatStoreDwordx2,
    FlatStoreDwordx3,
    FlatStoreDwordx4,
    FlatAtomic(AtomicOp),
    GlobalLoadDword,
    GlobalLoadDwordx2,
    GlobalLoadDwordx3,
    GlobalLoadDwordx4,
    GlobalStoreDword,
    GlobalStoreDwordx2,
    GlobalStoreDwordx3,
    GlobalStoreDwordx4,
    GlobalAtomic(AtomicOp),

    // --- MIMG ---
    ImageLoad,
    ImageLoadMip,
    ImageStore,
    ImageStoreMip,
    ImageAtomic(AtomicOp),
    ImageSample,
    ImageSampleL,
    ImageSampleLz,
    ImageSampleB,
    ImageSampleD,
    ImageSampleC,
    ImageSampleCL,
    ImageSampleCLz,
    ImageSampleCB,
    ImageSampleCD,
    ImageSampleO,
    ImageSampleLO,
    ImageSampleLzO,
    ImageSampleBO,
    ImageSampleDO,
    ImageSampleCO,
    ImageSampleCLO,
    ImageSampleCLzO,
    ImageSampleCBO,
    ImageSampleCDO,
    ImageGather4,
    ImageGather4L,
    ImageGather4Lz,
    ImageGather4B,
    ImageGather4C,
    ImageGather4CL,
    ImageGather4CLz,
    ImageGather4O,
    ImageGather4LO,
    ImageGather4LzO,
    ImageGather4BO,
    ImageGather4CO,
    ImageGather4CLO,
    ImageGather4CLzO,

    // --- Export ---
    ExpNull,
}

// =============================================================================
// Instructions
// =============================================================================

/// Memory-operation flags and encoded offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryInfo {
    /// Byte offset baked into the instruction encoding. Paired DS ops
    /// reinterpret this as the first element offset.
    pub offset: u32,
    /// Second element offset for paired DS ops.
    pub offset1: u32,
    /// Coherent access (bypass L0/L1 as the generation defines).
    pub glc: bool,
    /// Device-coherent access (bypass L1 on GFX10).
    pub dlc: bool,
}

impl MemoryInfo {
    pub fn offset(offset: u32) -> Self {
        MemoryInfo {
            offset,
            ..Default::default()
        }
    }
}

/// Image-operation metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub dim: TexDim,
    pub array: bool,
    /// Component write/read mask.
    pub dmask: u8,
}

/// Extra per-kind payload attached to an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InstrExtra {
    None,
    Memory(MemoryInfo),
    Image(ImageInfo),
    /// Branch target block.
    Branch(BlockId),
    Reduction { op: ReduceOp, cluster: u32 },
    /// VOP3 source modifiers, indexed by operand position.
    Modifiers { neg: [bool; 3], abs: [bool; 3] },
}

/// A target instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub defs: Vec<Definition>,
    pub extra: InstrExtra,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<Operand>, defs: Vec<Definition>) -> Self {
        Instruction {
            opcode,
            operands,
            defs,
            extra: InstrExtra::None,
        }
    }

    pub fn with_extra(opcode: Opcode, operands: Vec<Operand>, defs: Vec<Definition>, extra: InstrExtra) -> Self {
        Instruction {
            opcode,
            operands,
            defs,
            extra,
        }
    }

    pub fn memory(&self) -> Option<&MemoryInfo> {
        match &self.extra {
            InstrExtra::Memory(m) => Some(m),
            _ => None,
        }
    }

    pub fn branch_target(&self) -> Option<BlockId> {
        match self.extra {
            InstrExtra::Branch(t) => Some(t),
            _ => None,
        }
    }
}

// =============================================================================
// Blocks
// =============================================================================

/// Basic block within a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for BlockId {
    fn from(id: u32) -> Self {
        BlockId(id)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BB{}", self.0)
    }
}

/// Block kind tags; a block may carry several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockKind(pub u16);

impl BlockKind {
    pub const NONE: BlockKind = BlockKind(0);
    pub const TOP_LEVEL: BlockKind = BlockKind(1 << 0);
    pub const UNIFORM: BlockKind = BlockKind(1 << 1);
    pub const BRANCH: BlockKind = BlockKind(1 << 2);
    pub const MERGE: BlockKind = BlockKind(1 << 3);
    pub const INVERT: BlockKind = BlockKind(1 << 4);
    pub const LOOP_PREHEADER: BlockKind = BlockKind(1 << 5);
    pub const LOOP_HEADER: BlockKind = BlockKind(1 << 6);
    pub const LOOP_EXIT: BlockKind = BlockKind(1 << 7);
    pub const BREAK: BlockKind = BlockKind(1 << 8);
    pub const CONTINUE: BlockKind = BlockKind(1 << 9);
    pub const DISCARD: BlockKind = BlockKind(1 << 10);

    pub fn contains(self, other: BlockKind) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BlockKind {
    type Output = BlockKind;
    fn bitor(self, rhs: BlockKind) -> BlockKind {
        BlockKind(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BlockKind {
    fn bitor_assign(&mut self, rhs: BlockKind) {
        self.0 |= rhs.0;
    }
}

/// A basic block with its dual edge sets.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    pub instrs: Vec<Instruction>,
    pub logical_preds: Vec<BlockId>,
    pub logical_succs: Vec<BlockId>,
    pub linear_preds: Vec<BlockId>,
    pub linear_succs: Vec<BlockId>,
}

impl Block {
    fn new(id: BlockId, kind: BlockKind) -> Self {
        Block {
            id,
            kind,
            instrs: Vec::new(),
            logical_preds: Vec::new(),
            logical_succs: Vec::new(),
            linear_preds: Vec::new(),
            linear_succs: Vec::new(),
        }
    }
}

// =============================================================================
// Program and configuration
// =============================================================================

/// Target GPU generation. Ordering is chronological, so range checks like
/// `gen >= GpuGeneration::Gfx8` select generation-dependent lowerings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GpuGeneration {
    Gfx6,
    Gfx7,
    Gfx8,
    Gfx9,
    Gfx10,
}

/// Pass configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub gen: GpuGeneration,
    /// 64-lane waves (32-lane is GFX10+ only).
    pub wave64: bool,
}

impl Config {
    pub fn new(gen: GpuGeneration) -> Self {
        Config { gen, wave64: true }
    }

    pub fn wave_size(&self) -> u32 {
        if self.wave64 {
            64
        } else {
            32
        }
    }

    /// Register class of a divergent boolean (one mask bit per lane).
    pub fn lane_mask_rc(&self) -> RegClass {
        if self.wave64 {
            RegClass::S2
        } else {
            RegClass::S1
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gen: GpuGeneration::Gfx10,
            wave64: true,
        }
    }
}

/// A lowered program: the block graph plus unit-wide flags.
#[derive(Debug, Clone)]
pub struct Program {
    pub config: Config,
    pub blocks: Vec<Block>,
    /// Set when any lowering required exact per-lane masking (discards,
    /// value-returning atomics). Later passes must then keep the wave's
    /// execution exact.
    pub needs_exact: bool,
    /// Number of temp ids allocated.
    pub temp_count: u32,
}

impl Program {
    pub fn new(config: Config) -> Self {
        Program {
            config,
            blocks: Vec::new(),
            needs_exact: false,
            temp_count: 0,
        }
    }

    pub fn create_block(&mut self, kind: BlockKind) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(id, kind));
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// Add a logical edge (and its reverse) between two blocks.
    pub fn add_logical_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.index()].logical_succs.push(to);
        self.blocks[to.index()].logical_preds.push(from);
    }

    /// Add a linear edge (and its reverse) between two blocks.
    pub fn add_linear_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.index()].linear_succs.push(to);
        self.blocks[to.index()].linear_preds.push(from);
    }
}
