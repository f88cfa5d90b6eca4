#![cfg(test)]

use super::builder::FunctionBuilder;
use super::*;

#[test]
fn straight_line_function() {
    let mut b = FunctionBuilder::new("add");
    let x = b.param(32, 1, false);
    let y = b.param(32, 1, false);
    let sum = b.alu(AluOp::IAdd, &[x, y]);
    let f = b.finish();

    assert_eq!(f.name, "add");
    assert_eq!(f.body.len(), 1);
    let CfNode::Block(instrs) = &f.body[0] else {
        panic!("expected a single block node");
    };
    assert_eq!(instrs.len(), 3);
    assert_eq!(f.bit_size(sum), 32);
    assert!(!f.divergent(sum));
}

#[test]
fn divergence_is_or_of_sources() {
    let mut b = FunctionBuilder::new("div");
    let u = b.param(32, 1, false);
    let d = b.param(32, 1, true);
    let uu = b.alu(AluOp::IMul, &[u, u]);
    let ud = b.alu(AluOp::IAdd, &[u, d]);
    let f = b.finish();
    assert!(!f.divergent(uu));
    assert!(f.divergent(ud));
}

#[test]
fn comparison_produces_boolean() {
    let mut b = FunctionBuilder::new("cmp");
    let x = b.param(32, 1, true);
    let zero = b.const_u32(0);
    let c = b.alu(AluOp::ILt, &[x, zero]);
    let f = b.finish();
    assert_eq!(f.bit_size(c), 1);
    assert!(f.divergent(c));
}

#[test]
fn bcsel_takes_layout_from_selected_values() {
    let mut b = FunctionBuilder::new("sel");
    let cond = b.param(1, 1, false);
    let x = b.param(64, 1, false);
    let y = b.param(64, 1, false);
    let s = b.alu(AluOp::BCSel, &[cond, x, y]);
    let f = b.finish();
    assert_eq!(f.bit_size(s), 64);
}

#[test]
fn conversions_set_target_width() {
    let mut b = FunctionBuilder::new("cvt");
    let x = b.param(32, 1, true);
    let wide = b.alu(AluOp::F32ToF64, &[x]);
    let narrow = b.alu(AluOp::F64ToF32, &[wide]);
    let f = b.finish();
    assert_eq!(f.bit_size(wide), 64);
    assert_eq!(f.bit_size(narrow), 32);
}

#[test]
fn if_else_produces_two_bodies() {
    let mut b = FunctionBuilder::new("branchy");
    let cond = b.param(1, 1, true);
    let x = b.param(32, 1, true);
    b.begin_if(cond);
    let t = b.alu(AluOp::IAdd, &[x, x]);
    b.begin_else();
    let e = b.alu(AluOp::ISub, &[x, x]);
    b.end_if();
    let info = b.value_info(t);
    b.phi(&[t, e], info);
    let f = b.finish();

    assert_eq!(f.body.len(), 3);
    let CfNode::If {
        then_body, else_body, ..
    } = &f.body[1]
    else {
        panic!("expected an if node");
    };
    assert_eq!(then_body.len(), 1);
    assert_eq!(else_body.len(), 1);
}

#[test]
fn loop_with_break_keeps_jump_as_leaf() {
    let mut b = FunctionBuilder::new("looped");
    let cond = b.param(1, 1, false);
    b.begin_loop();
    b.begin_if(cond);
    b.brk();
    b.end_if();
    b.cont();
    b.end_loop();
    let f = b.finish();

    let CfNode::Loop { body } = &f.body[1] else {
        panic!("expected a loop node");
    };
    assert!(matches!(body[0], CfNode::If { .. }));
    assert!(matches!(body[1], CfNode::Continue));
    let CfNode::If { then_body, .. } = &body[0] else {
        unreachable!();
    };
    assert!(matches!(then_body[0], CfNode::Break));
}

#[test]
fn vec_and_extract_round_layout() {
    let mut b = FunctionBuilder::new("vectors");
    let x = b.param(32, 1, true);
    let y = b.param(32, 1, true);
    let v = b.vec(&[x, y]);
    let c = b.extract(v, 1);
    let f = b.finish();
    assert_eq!(f.num_components(v), 2);
    assert_eq!(f.num_components(c), 1);
    assert!(f.divergent(c));
}

#[test]
#[should_panic(expected = "unbalanced")]
fn unbalanced_scopes_panic() {
    let mut b = FunctionBuilder::new("broken");
    let cond = b.param(1, 1, false);
    b.begin_if(cond);
    let _ = b.finish();
}
