//! SIR: the portable SSA shader IR consumed by instruction selection.
//!
//! This is the front-end-facing half of the pass boundary:
//! - **SSA values** (`ValueId`) defined exactly once, carrying a bit width
//!   (1, 32 or 64), a component count (1-4) and a divergence bit computed
//!   by upstream analysis. The backend never creates SIR values, only
//!   consumes them.
//! - **Instructions** stored in a flat arena indexed by `InstrId`.
//! - **Structured control flow**: a tree of blocks, if/else nodes and loop
//!   nodes. Jumps (`Break`/`Continue`) appear only as tree leaves inside
//!   loops.
//!
//! ## Phi convention
//!
//! Phi instructions appear at the head of the first block node following an
//! `If` (operands ordered `[then_value, else_value]`) or at the head of the
//! first block node inside a `Loop` (operands ordered
//! `[preheader_value, continue_value]`). Instruction selection trims phi
//! operands whose predecessor turned out to be unreachable.

pub mod builder;

#[cfg(test)]
mod builder_tests;

// =============================================================================
// ID Types
// =============================================================================

/// SSA value - defined exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for ValueId {
    fn from(id: u32) -> Self {
        ValueId(id)
    }
}

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Instruction within a function, indexing the flat instruction arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstrId(pub u32);

impl InstrId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for InstrId {
    fn from(id: u32) -> Self {
        InstrId(id)
    }
}

impl std::fmt::Display for InstrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "i{}", self.0)
    }
}

// =============================================================================
// Values
// =============================================================================

/// Per-value metadata.
///
/// `divergent` is the upstream divergence classification: `true` means the
/// value may differ across lanes of a wave, `false` means it is provably
/// wave-uniform. The backend treats this as read-only input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueInfo {
    /// Bit width of one component: 1 (boolean), 32 or 64.
    pub bit_size: u32,
    /// Number of components (1-4).
    pub num_components: u32,
    /// May this value differ across lanes?
    pub divergent: bool,
}

impl ValueInfo {
    pub fn scalar(bit_size: u32, divergent: bool) -> Self {
        ValueInfo {
            bit_size,
            num_components: 1,
            divergent,
        }
    }
}

/// A compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
}

// =============================================================================
// ALU opcodes
// =============================================================================

/// Scalar/vector ALU operations.
///
/// The same opcode is used for 32- and 64-bit forms; the definition's bit
/// width selects the lowering. Comparisons produce 1-bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    // Moves / unary
    Mov,
    INeg,
    Not,
    FNeg,
    FAbs,

    // Integer arithmetic
    IAdd,
    ISub,
    IMul,
    IMulHi,
    UMulHi,
    IMin,
    IMax,
    UMin,
    UMax,

    // Bitwise / shifts (also 1-bit boolean logic for And/Or/Xor)
    IAnd,
    IOr,
    IXor,
    IShl,
    IShr,
    UShr,

    // Float arithmetic
    FAdd,
    FSub,
    FMul,
    FMin,
    FMax,
    FRcp,
    FRsq,
    FSqrt,
    FLog2,
    FExp2,
    FFloor,
    FCeil,
    FTrunc,
    FRound,
    FFract,

    // Comparisons (def bit_size == 1)
    IEq,
    INe,
    ILt,
    ILe,
    IGt,
    IGe,
    ULt,
    ULe,
    UGt,
    UGe,
    FEq,
    FNe,
    FLt,
    FLe,
    FGt,
    FGe,

    // Select: srcs = [cond (1-bit), a, b]
    BCSel,

    // Conversions
    I2F,
    U2F,
    F2I,
    F2U,
    F32ToF64,
    F64ToF32,
}

impl AluOp {
    /// Is this a comparison producing a 1-bit result?
    pub fn is_comparison(self) -> bool {
        use AluOp::*;
        matches!(
            self,
            IEq | INe | ILt | ILe | IGt | IGe | ULt | ULe | UGt | UGe | FEq | FNe | FLt | FLe | FGt | FGe
        )
    }

    /// Is this op commutative in its two sources?
    pub fn is_commutative(self) -> bool {
        use AluOp::*;
        matches!(
            self,
            IAdd | IMul | IMulHi | UMulHi | IMin | IMax | UMin | UMax | IAnd | IOr | IXor | FAdd | FMul
                | FMin
                | FMax
                | IEq
                | INe
                | FEq
                | FNe
        )
    }
}

// =============================================================================
// Resources
// =============================================================================

/// How a resource array is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceIndex {
    /// Compile-time-constant element index.
    Const(u32),
    /// Dynamically computed element index (must be wave-uniform).
    Dynamic(ValueId),
}

/// Location of a buffer/image/sampler descriptor.
///
/// The descriptor lives at `set_base + binding_offset + index * stride` and
/// is loaded into scalar registers before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBinding {
    pub set: u32,
    pub binding_offset: u32,
    pub stride: u32,
    pub index: ResourceIndex,
}

impl ResourceBinding {
    pub fn simple(set: u32, binding_offset: u32) -> Self {
        ResourceBinding {
            set,
            binding_offset,
            stride: 16,
            index: ResourceIndex::Const(0),
        }
    }
}

/// Vertex-attribute format description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VtxFormat {
    /// Channels stored in the buffer (1-4).
    pub channels: u32,
    /// Bytes per channel (1, 2 or 4).
    pub channel_bytes: u32,
}

/// Atomic read-modify-write operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Add,
    And,
    Or,
    Xor,
    SMin,
    SMax,
    UMin,
    UMax,
    Exchange,
    CmpSwap,
}

/// Combining operator for subgroup reductions and scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    IAdd,
    IMul,
    SMin,
    SMax,
    UMin,
    UMax,
    FAdd,
    FMin,
    FMax,
    And,
    Or,
    Xor,
}

// =============================================================================
// Intrinsics
// =============================================================================

/// Memory, resource, subgroup and control intrinsics.
///
/// Operand values are carried in the instruction's `srcs` list; the
/// per-intrinsic fields hold compile-time metadata only.
#[derive(Debug, Clone, PartialEq)]
pub enum Intrinsic {
    // Workgroup-shared memory. srcs: [byte_address] / [byte_address, data]
    LoadShared { byte_size: u32, align: u32, offset: u32 },
    StoreShared { byte_size: u32, align: u32, offset: u32 },
    SharedAtomic { op: AtomicOp },

    // Global memory via 64-bit address. srcs: [addr] / [addr, data]
    LoadGlobal { byte_size: u32, coherent: bool },
    StoreGlobal { byte_size: u32, coherent: bool },
    GlobalAtomic { op: AtomicOp },

    // Structured buffers. srcs: [byte_offset] / [byte_offset, data]
    LoadBuffer { binding: ResourceBinding, byte_size: u32, coherent: bool },
    StoreBuffer { binding: ResourceBinding, byte_size: u32, coherent: bool },
    BufferAtomic { binding: ResourceBinding, op: AtomicOp },

    // Constant/uniform buffer load at a fixed byte offset. srcs: [] or
    // [dynamic_byte_offset] (uniform).
    LoadUniform { binding: ResourceBinding, offset: u32 },

    // Vertex attribute fetch. srcs: [element_index]
    LoadAttribute { binding: ResourceBinding, format: VtxFormat, num_channels: u32, offset: u32 },

    // Images. srcs: [coords..., data?]
    ImageLoad { binding: ResourceBinding, dim: TexDim, array: bool, ms: bool },
    ImageStore { binding: ResourceBinding, dim: TexDim, array: bool },

    // Fragment kill. srcs: [] / [cond]
    Discard,
    DiscardIf,

    // Cross-lane. srcs as noted.
    Ballot,            // [bool]
    ReadFirstLane,     // [value]
    ReadLane,          // [value, lane (uniform)]
    Shuffle,           // [value, lane (divergent)]
    LaneIndex,         // []
    Reduce { op: ReduceOp, cluster: u32 },  // [value]
    InclusiveScan { op: ReduceOp },         // [value]
    ExclusiveScan { op: ReduceOp },         // [value]
}

// =============================================================================
// Texture instructions
// =============================================================================

/// Sampler dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexDim {
    D1,
    D2,
    D3,
    Cube,
}

impl TexDim {
    /// Coordinate components, not counting an array layer.
    pub fn coord_components(self) -> u32 {
        match self {
            TexDim::D1 => 1,
            TexDim::D2 => 2,
            TexDim::D3 | TexDim::Cube => 3,
        }
    }
}

/// Texture operation family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexOp {
    /// Filtered sample through a sampler.
    Sample,
    /// Four-texel gather of one channel.
    Gather4,
    /// Unfiltered texel fetch by integer coordinate.
    Fetch,
}

/// A texture/sampling instruction.
///
/// Optional address sources are packed into a single contiguous operand in
/// hardware field order during selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Tex {
    pub op: TexOp,
    pub dim: TexDim,
    pub is_array: bool,
    pub resource: ResourceBinding,
    pub sampler: ResourceBinding,

    /// Coordinate vector (dim components, plus array layer if `is_array`).
    pub coord: ValueId,
    pub offset: Option<ValueId>,
    pub bias: Option<ValueId>,
    pub compare: Option<ValueId>,
    pub ddx: Option<ValueId>,
    pub ddy: Option<ValueId>,
    pub lod: Option<ValueId>,
    /// Multisample index; requires an FMASK resolve for `Fetch` on MS images.
    pub sample_index: Option<ValueId>,
    /// Force level 0 without an explicit lod operand.
    pub level_zero: bool,
}

// =============================================================================
// Instructions
// =============================================================================

/// A SIR instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    /// The value this instruction defines, if any.
    pub def: Option<ValueId>,
    pub kind: InstrKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstrKind {
    Const(ConstValue),
    Undef,
    /// Function input (system value or user data), pre-loaded by the
    /// hardware at wave launch. Lowered into the entry block's start
    /// pseudo-instruction.
    Param { index: u32 },
    Alu { op: AluOp, srcs: Vec<ValueId> },
    /// Vector construction from per-component scalars.
    Vec(Vec<ValueId>),
    /// Extract one component of a vector value.
    ExtractComp { src: ValueId, comp: u32 },
    Intrinsic { op: Intrinsic, srcs: Vec<ValueId> },
    Tex(Box<Tex>),
    /// Merge/loop-header phi; see the module docs for operand ordering.
    Phi { srcs: Vec<ValueId> },
}

// =============================================================================
// Structured control flow
// =============================================================================

/// A node in the structured control-flow tree.
#[derive(Debug, Clone, PartialEq)]
pub enum CfNode {
    /// Straight-line instruction sequence.
    Block(Vec<InstrId>),
    If {
        cond: ValueId,
        then_body: Vec<CfNode>,
        else_body: Vec<CfNode>,
    },
    Loop {
        body: Vec<CfNode>,
    },
    /// Jump to the innermost loop's exit.
    Break,
    /// Jump to the innermost loop's header.
    Continue,
}

// =============================================================================
// Function
// =============================================================================

/// A SIR function: value table, instruction arena and control-flow tree.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub values: Vec<ValueInfo>,
    pub instrs: Vec<Instr>,
    pub body: Vec<CfNode>,
}

impl Function {
    pub fn value(&self, id: ValueId) -> ValueInfo {
        self.values[id.index()]
    }

    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instrs[id.index()]
    }

    pub fn bit_size(&self, id: ValueId) -> u32 {
        self.values[id.index()].bit_size
    }

    pub fn num_components(&self, id: ValueId) -> u32 {
        self.values[id.index()].num_components
    }

    pub fn divergent(&self, id: ValueId) -> bool {
        self.values[id.index()].divergent
    }
}
