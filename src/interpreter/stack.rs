//! Reified activation frames.
//!
//! Execution is a tree walk made iterative: every partially-evaluated AST
//! node lives on the job's evaluation stack as a [`StackNode`]. A step
//! handler performs one unit of work against the top node and reports what
//! to do next through [`StepResult`]; nothing ever recurses into a child
//! node on the native call stack, so a job can suspend between any two
//! units of work.

use std::rc::Rc;

use crate::ast::{
    Assign, Block, ElemList, Exp, Factor, For, FuncCallNode, FuncDef, FuncSuffix, If, Locate,
    LogicHigh, LogicLow, Move, MulDiv, RelativeHigh, RelativeLow, SetDef, Spec, Stm, Suffix,
    Switch, While,
};
use crate::ast::AddSub;
use crate::memory::value::Value;
use crate::memory::var::RetExpr;

/// Which AST form an activation represents, together with the node itself.
#[derive(Debug)]
pub enum NodeForm {
    Stm(Rc<Stm>),
    FuncDef(Rc<FuncDef>),
    SetDef(Rc<SetDef>),
    SetStm(Rc<SetDef>),
    Block(Rc<Block>),
    While(Rc<While>),
    Switch(Rc<Switch>),
    SwitchStm(Rc<Switch>),
    For(Rc<For>),
    If(Rc<If>),
    Exp(Rc<Exp>),
    Assign(Rc<Assign>),
    LogicLow(Rc<LogicLow>),
    LogicHigh(Rc<LogicHigh>),
    RelativeLow(Rc<RelativeLow>),
    RelativeHigh(Rc<RelativeHigh>),
    Move(Rc<Move>),
    AddSub(Rc<AddSub>),
    MulDiv(Rc<MulDiv>),
    Suffix(Rc<Suffix>),
    Locate(Rc<Locate>),
    Spec(Rc<Spec>),
    Factor(Rc<Factor>),
    ElemList(Rc<ElemList>),
    FuncSuffix(Rc<FuncSuffix>),
    FuncCall(Rc<FuncCallNode>),
}

/// One activation frame of the evaluation stack.
#[derive(Debug)]
pub struct StackNode {
    pub form: NodeForm,
    /// Sub-step counter; meaning depends on the form.
    pub step: u32,
    /// Resume position (next child, statement index, switch arm, ...).
    pub pos: usize,
    /// The partial return-expression being built.
    pub ret: Option<RetExpr>,
    /// Scratch value carried across sub-steps (method receiver, array
    /// literal key).
    pub scratch: Option<Value>,
    /// A child call activation is currently in progress.
    pub call: bool,
}

impl StackNode {
    pub fn new(form: NodeForm) -> StackNode {
        StackNode { form, step: 0, pos: 0, ret: None, scratch: None, call: false }
    }
}

/// What a step handler asks the driver to do with its node.
pub(crate) enum StepResult {
    /// Keep the node on the stack; its counters were updated in place.
    Stay,
    /// Keep the node and push a child activation on top of it.
    Child(StackNode),
    /// Pop the node, handing its return-expression to the parent.
    Done(RetExpr),
    /// Keep the node as-is and move the job to the blocked queue; the same
    /// sub-step re-runs when the job is re-queued.
    Block,
    /// Keep the node as-is and move the job to the wait queue.
    Wait,
    /// Pop the node and unwind to the nearest enclosing loop, inclusive.
    BreakLoop,
    /// Pop the node and unwind to the nearest enclosing loop, exclusive.
    ContinueLoop,
    /// Pop the node and unwind the enclosing function call.
    Return(RetExpr),
}

/// Outcome of one driver step, surfaced to the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFlow {
    Continue,
    Block,
    Wait,
}
