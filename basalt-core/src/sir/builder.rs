//! SIR function builder.
//!
//! Provides a safe API for constructing SIR functions, ensuring:
//! - Control-flow scopes (if/else, loop) nest properly
//! - Straight-line instructions are grouped into block nodes
//! - Every value is defined before the function is finished
//!
//! Misuse (unbalanced scopes, `else` without `if`) is a programming error
//! and panics; the builder is the front-end/test-facing construction path,
//! not a consumer of untrusted input.

use super::{
    AluOp, CfNode, ConstValue, Function, Instr, InstrId, InstrKind, Intrinsic, Tex, ValueId, ValueInfo,
};

enum FrameKind {
    Top,
    Then {
        cond: ValueId,
    },
    Else {
        cond: ValueId,
        then_body: Vec<CfNode>,
    },
    Loop,
}

struct Frame {
    kind: FrameKind,
    nodes: Vec<CfNode>,
}

/// Builder for constructing SIR functions.
///
/// # Example
///
/// ```ignore
/// let mut b = FunctionBuilder::new("add");
/// let a = b.param(32, 1, false);
/// let c = b.param(32, 1, false);
/// let sum = b.alu(AluOp::IAdd, &[a, c]);
/// let func = b.finish();
/// ```
pub struct FunctionBuilder {
    name: String,
    values: Vec<ValueInfo>,
    instrs: Vec<Instr>,
    frames: Vec<Frame>,
    /// Open straight-line sequence, flushed into a `CfNode::Block` when
    /// control flow starts or the current scope closes.
    current: Vec<InstrId>,
    num_params: u32,
}

impl FunctionBuilder {
    pub fn new(name: &str) -> Self {
        FunctionBuilder {
            name: name.to_string(),
            values: Vec::new(),
            instrs: Vec::new(),
            frames: vec![Frame {
                kind: FrameKind::Top,
                nodes: Vec::new(),
            }],
            current: Vec::new(),
            num_params: 0,
        }
    }

    fn alloc_value(&mut self, info: ValueInfo) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(info);
        id
    }

    fn push(&mut self, def: Option<ValueId>, kind: InstrKind) {
        let id = InstrId(self.instrs.len() as u32);
        self.instrs.push(Instr { def, kind });
        self.current.push(id);
    }

    fn push_def(&mut self, info: ValueInfo, kind: InstrKind) -> ValueId {
        let def = self.alloc_value(info);
        self.push(Some(def), kind);
        def
    }

    /// Flush the open straight-line sequence into the enclosing scope.
    fn flush_block(&mut self) {
        if !self.current.is_empty() {
            let instrs = std::mem::take(&mut self.current);
            self.frames.last_mut().unwrap().nodes.push(CfNode::Block(instrs));
        }
    }

    // =========================================================================
    // Values and instructions
    // =========================================================================

    /// Declare a function input with the given layout and divergence.
    pub fn param(&mut self, bit_size: u32, num_components: u32, divergent: bool) -> ValueId {
        let index = self.num_params;
        self.num_params += 1;
        self.push_def(
            ValueInfo {
                bit_size,
                num_components,
                divergent,
            },
            InstrKind::Param { index },
        )
    }

    pub fn const_u32(&mut self, v: u32) -> ValueId {
        self.push_def(ValueInfo::scalar(32, false), InstrKind::Const(ConstValue::U32(v)))
    }

    pub fn const_u64(&mut self, v: u64) -> ValueId {
        self.push_def(ValueInfo::scalar(64, false), InstrKind::Const(ConstValue::U64(v)))
    }

    pub fn const_f32(&mut self, v: f32) -> ValueId {
        self.push_def(ValueInfo::scalar(32, false), InstrKind::Const(ConstValue::F32(v)))
    }

    pub fn const_f64(&mut self, v: f64) -> ValueId {
        self.push_def(ValueInfo::scalar(64, false), InstrKind::Const(ConstValue::F64(v)))
    }

    pub fn const_bool(&mut self, v: bool) -> ValueId {
        self.push_def(ValueInfo::scalar(1, false), InstrKind::Const(ConstValue::Bool(v)))
    }

    pub fn undef(&mut self, info: ValueInfo) -> ValueId {
        self.push_def(info, InstrKind::Undef)
    }

    /// Push an ALU instruction, inferring the definition's layout from the
    /// opcode and sources; divergence is the OR of the sources'.
    pub fn alu(&mut self, op: AluOp, srcs: &[ValueId]) -> ValueId {
        let divergent = srcs.iter().any(|&s| self.values[s.index()].divergent);
        let (bit_size, num_components) = self.infer_alu_layout(op, srcs);
        self.push_def(
            ValueInfo {
                bit_size,
                num_components,
                divergent,
            },
            InstrKind::Alu {
                op,
                srcs: srcs.to_vec(),
            },
        )
    }

    fn infer_alu_layout(&self, op: AluOp, srcs: &[ValueId]) -> (u32, u32) {
        use AluOp::*;
        let src = |i: usize| self.values[srcs[i].index()];
        match op {
            _ if op.is_comparison() => (1, src(0).num_components),
            I2F | U2F | F2I | F2U | F64ToF32 => (32, src(0).num_components),
            F32ToF64 => (64, src(0).num_components),
            BCSel => (src(1).bit_size, src(1).num_components),
            _ => (src(0).bit_size, src(0).num_components),
        }
    }

    /// Push an intrinsic; `def` describes the result, if the intrinsic
    /// produces one.
    pub fn intrinsic(&mut self, op: Intrinsic, srcs: &[ValueId], def: Option<ValueInfo>) -> Option<ValueId> {
        match def {
            Some(info) => Some(self.push_def(
                info,
                InstrKind::Intrinsic {
                    op,
                    srcs: srcs.to_vec(),
                },
            )),
            None => {
                self.push(
                    None,
                    InstrKind::Intrinsic {
                        op,
                        srcs: srcs.to_vec(),
                    },
                );
                None
            }
        }
    }

    /// Build a vector from per-component scalars.
    pub fn vec(&mut self, comps: &[ValueId]) -> ValueId {
        assert!((1..=4).contains(&comps.len()), "vector arity out of range");
        let first = self.values[comps[0].index()];
        let divergent = comps.iter().any(|&c| self.values[c.index()].divergent);
        self.push_def(
            ValueInfo {
                bit_size: first.bit_size,
                num_components: comps.len() as u32,
                divergent,
            },
            InstrKind::Vec(comps.to_vec()),
        )
    }

    /// Extract one component of a vector value.
    pub fn extract(&mut self, src: ValueId, comp: u32) -> ValueId {
        let info = self.values[src.index()];
        assert!(comp < info.num_components, "component index out of range");
        self.push_def(
            ValueInfo {
                bit_size: info.bit_size,
                num_components: 1,
                divergent: info.divergent,
            },
            InstrKind::ExtractComp { src, comp },
        )
    }

    pub fn phi(&mut self, srcs: &[ValueId], info: ValueInfo) -> ValueId {
        self.push_def(
            info,
            InstrKind::Phi {
                srcs: srcs.to_vec(),
            },
        )
    }

    pub fn tex(&mut self, tex: Tex, num_components: u32) -> ValueId {
        self.push_def(
            ValueInfo {
                bit_size: 32,
                num_components,
                divergent: true,
            },
            InstrKind::Tex(Box::new(tex)),
        )
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    pub fn begin_if(&mut self, cond: ValueId) {
        self.flush_block();
        self.frames.push(Frame {
            kind: FrameKind::Then { cond },
            nodes: Vec::new(),
        });
    }

    pub fn begin_else(&mut self) {
        self.flush_block();
        let frame = self.frames.pop().expect("begin_else without begin_if");
        match frame.kind {
            FrameKind::Then { cond } => {
                self.frames.push(Frame {
                    kind: FrameKind::Else {
                        cond,
                        then_body: frame.nodes,
                    },
                    nodes: Vec::new(),
                });
            }
            _ => panic!("begin_else without matching begin_if"),
        }
    }

    pub fn end_if(&mut self) {
        self.flush_block();
        let frame = self.frames.pop().expect("end_if without begin_if");
        let node = match frame.kind {
            FrameKind::Then { cond } => CfNode::If {
                cond,
                then_body: frame.nodes,
                else_body: Vec::new(),
            },
            FrameKind::Else { cond, then_body } => CfNode::If {
                cond,
                then_body,
                else_body: frame.nodes,
            },
            _ => panic!("end_if without matching begin_if"),
        };
        self.frames.last_mut().unwrap().nodes.push(node);
    }

    pub fn begin_loop(&mut self) {
        self.flush_block();
        self.frames.push(Frame {
            kind: FrameKind::Loop,
            nodes: Vec::new(),
        });
    }

    pub fn end_loop(&mut self) {
        self.flush_block();
        let frame = self.frames.pop().expect("end_loop without begin_loop");
        match frame.kind {
            FrameKind::Loop => {
                self.frames.last_mut().unwrap().nodes.push(CfNode::Loop { body: frame.nodes });
            }
            _ => panic!("end_loop without matching begin_loop"),
        }
    }

    /// Jump to the innermost loop's exit.
    pub fn brk(&mut self) {
        self.flush_block();
        self.frames.last_mut().unwrap().nodes.push(CfNode::Break);
    }

    /// Jump to the innermost loop's header.
    pub fn cont(&mut self) {
        self.flush_block();
        self.frames.last_mut().unwrap().nodes.push(CfNode::Continue);
    }

    // =========================================================================
    // Finishing
    // =========================================================================

    pub fn finish(mut self) -> Function {
        self.flush_block();
        assert!(self.frames.len() == 1, "unbalanced control-flow scopes at finish");
        let body = self.frames.pop().unwrap().nodes;
        Function {
            name: self.name,
            values: self.values,
            instrs: self.instrs,
            body,
        }
    }

    /// Divergence/layout info for an already-created value.
    pub fn value_info(&self, id: ValueId) -> ValueInfo {
        self.values[id.index()]
    }
}
