//! Step handlers for statement-level forms.
//!
//! Every handler performs one unit of work against its activation and
//! reports the next move through [`StepResult`]: push a child, stay with an
//! updated counter, or pop with a return-expression. Loop re-entry is
//! encoded in the sub-step counter *before* the body is pushed, so `continue`
//! only has to unwind to the loop activation and let it resume.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{Block, For, FuncDef, If, SetDef, SetMember, Stm, Switch, While};
use crate::interpreter::engine::Job;
use crate::interpreter::errors::RuntimeError;
use crate::interpreter::ops::{compare, datum};
use crate::interpreter::scope::{ScopeKind, Symbol};
use crate::interpreter::stack::{NodeForm, StackNode, StepResult};
use crate::memory::func::FuncDetail;
use crate::memory::set::SetDetail;
use crate::memory::value::Value;
use crate::memory::var::{RetExpr, Variable};

impl Job {
    pub(crate) fn step_stm(
        &mut self,
        node: &mut StackNode,
        stm: &Rc<Stm>,
    ) -> Result<StepResult, RuntimeError> {
        if node.pos >= stm.stmts.len() {
            // A statement list hands its last statement's result upward;
            // that is how a job's final value surfaces.
            return Ok(StepResult::Done(self.take_ret()));
        }
        let pos = node.pos;
        node.pos += 1;
        match &stm.stmts[pos] {
            crate::ast::Statement::Exp(e) => {
                Ok(StepResult::Child(StackNode::new(NodeForm::Exp(Rc::clone(e)))))
            }
            crate::ast::Statement::FuncDef(d) => {
                Ok(StepResult::Child(StackNode::new(NodeForm::FuncDef(Rc::clone(d)))))
            }
            crate::ast::Statement::SetDef(d) => {
                Ok(StepResult::Child(StackNode::new(NodeForm::SetDef(Rc::clone(d)))))
            }
            crate::ast::Statement::While(w) => {
                Ok(StepResult::Child(StackNode::new(NodeForm::While(Rc::clone(w)))))
            }
            crate::ast::Statement::Switch(s) => {
                Ok(StepResult::Child(StackNode::new(NodeForm::Switch(Rc::clone(s)))))
            }
            crate::ast::Statement::For(f) => {
                Ok(StepResult::Child(StackNode::new(NodeForm::For(Rc::clone(f)))))
            }
            crate::ast::Statement::If(i) => {
                Ok(StepResult::Child(StackNode::new(NodeForm::If(Rc::clone(i)))))
            }
            crate::ast::Statement::Block(b) => {
                Ok(StepResult::Child(StackNode::new(NodeForm::Block(Rc::clone(b)))))
            }
            crate::ast::Statement::Label(name) => {
                self.scopes.join(Rc::clone(name), Symbol::Label(Rc::clone(stm)));
                Ok(StepResult::Stay)
            }
        }
    }

    pub(crate) fn step_block(
        &mut self,
        node: &mut StackNode,
        blk: &Rc<Block>,
    ) -> Result<StepResult, RuntimeError> {
        match (&**blk, node.step) {
            (Block::Stm(s), 0) => {
                node.step = 1;
                Ok(StepResult::Child(StackNode::new(NodeForm::Stm(Rc::clone(s)))))
            }
            (Block::Exp(e), 0) => {
                node.step = 1;
                Ok(StepResult::Child(StackNode::new(NodeForm::Exp(Rc::clone(e)))))
            }
            (Block::Stm(_) | Block::Exp(_), _) => Ok(StepResult::Done(self.take_ret())),
            (Block::Break, _) => Ok(StepResult::BreakLoop),
            (Block::Continue, _) => Ok(StepResult::ContinueLoop),
            (Block::Return(None), _) => Ok(StepResult::Return(RetExpr::nil())),
            (Block::Return(Some(e)), 0) => {
                node.step = 1;
                Ok(StepResult::Child(StackNode::new(NodeForm::Exp(Rc::clone(e)))))
            }
            (Block::Return(Some(_)), _) => Ok(StepResult::Return(self.take_ret())),
        }
    }

    pub(crate) fn step_while(
        &mut self,
        node: &mut StackNode,
        w: &Rc<While>,
    ) -> Result<StepResult, RuntimeError> {
        if node.step == 0 {
            node.step = 1;
            return Ok(StepResult::Child(StackNode::new(NodeForm::Exp(Rc::clone(&w.condition)))));
        }
        if self.take_ret().truthy() {
            // Re-enter at the condition once the body completes.
            node.step = 0;
            Ok(StepResult::Child(StackNode::new(NodeForm::Block(Rc::clone(&w.body)))))
        } else {
            Ok(StepResult::Done(RetExpr::nil()))
        }
    }

    // Four sub-steps: init, condition, body, update.
    pub(crate) fn step_for(
        &mut self,
        node: &mut StackNode,
        f: &Rc<For>,
    ) -> Result<StepResult, RuntimeError> {
        match node.step {
            0 => {
                node.step = 1;
                match &f.init {
                    Some(init) => {
                        Ok(StepResult::Child(StackNode::new(NodeForm::Exp(Rc::clone(init)))))
                    }
                    None => Ok(StepResult::Stay),
                }
            }
            1 => {
                let _ = self.take_ret();
                node.step = 2;
                match &f.condition {
                    Some(cond) => {
                        Ok(StepResult::Child(StackNode::new(NodeForm::Exp(Rc::clone(cond)))))
                    }
                    None => Ok(StepResult::Stay),
                }
            }
            2 => {
                let truthy = match &f.condition {
                    Some(_) => self.take_ret().truthy(),
                    None => true,
                };
                if truthy {
                    node.step = 3;
                    Ok(StepResult::Child(StackNode::new(NodeForm::Block(Rc::clone(&f.body)))))
                } else {
                    Ok(StepResult::Done(RetExpr::nil()))
                }
            }
            _ => {
                let _ = self.take_ret();
                node.step = 1;
                match &f.update {
                    Some(update) => {
                        Ok(StepResult::Child(StackNode::new(NodeForm::Exp(Rc::clone(update)))))
                    }
                    None => Ok(StepResult::Stay),
                }
            }
        }
    }

    pub(crate) fn step_if(
        &mut self,
        node: &mut StackNode,
        i: &Rc<If>,
    ) -> Result<StepResult, RuntimeError> {
        match node.step {
            0 => {
                node.step = 1;
                Ok(StepResult::Child(StackNode::new(NodeForm::Exp(Rc::clone(&i.condition)))))
            }
            1 => {
                node.step = 2;
                if self.take_ret().truthy() {
                    Ok(StepResult::Child(StackNode::new(NodeForm::Block(Rc::clone(&i.then_blk)))))
                } else if let Some(else_blk) = &i.else_blk {
                    Ok(StepResult::Child(StackNode::new(NodeForm::Block(Rc::clone(else_blk)))))
                } else {
                    Ok(StepResult::Done(RetExpr::nil()))
                }
            }
            _ => {
                let _ = self.take_ret();
                Ok(StepResult::Done(RetExpr::nil()))
            }
        }
    }

    pub(crate) fn step_switch(
        &mut self,
        node: &mut StackNode,
        sw: &Rc<Switch>,
    ) -> Result<StepResult, RuntimeError> {
        match node.step {
            0 => {
                node.step = 1;
                Ok(StepResult::Child(StackNode::new(NodeForm::Exp(Rc::clone(&sw.subject)))))
            }
            1 => {
                let subject = self.take_ret();
                let mut arms = StackNode::new(NodeForm::SwitchStm(Rc::clone(sw)));
                arms.ret = Some(subject);
                node.step = 2;
                Ok(StepResult::Child(arms))
            }
            _ => {
                let _ = self.take_ret();
                Ok(StepResult::Done(RetExpr::nil()))
            }
        }
    }

    /// Arm scanning and execution. Scanning skips default arms; the default
    /// is entered only when the scan exhausts every labelled arm. Once an
    /// arm matches, execution falls through subsequent arm bodies without
    /// further tests until the list ends or a `break` unwinds this node.
    pub(crate) fn step_switchstm(
        &mut self,
        node: &mut StackNode,
        sw: &Rc<Switch>,
    ) -> Result<StepResult, RuntimeError> {
        match node.step {
            0 => {
                if node.pos >= sw.arms.len() {
                    return match sw.arms.iter().position(|a| a.value.is_none()) {
                        Some(default) => {
                            node.pos = default;
                            node.step = 2;
                            Ok(StepResult::Stay)
                        }
                        None => Ok(StepResult::Done(RetExpr::nil())),
                    };
                }
                match &sw.arms[node.pos].value {
                    None => {
                        node.pos += 1;
                        Ok(StepResult::Stay)
                    }
                    Some(v) => {
                        node.step = 1;
                        Ok(StepResult::Child(StackNode::new(NodeForm::Factor(Rc::clone(v)))))
                    }
                }
            }
            1 => {
                let arm_value = datum(&self.take_ret())?;
                let subject = match &node.ret {
                    Some(r) => datum(r)?,
                    None => Value::Nil,
                };
                if compare::values_equal(&subject, &arm_value) {
                    node.step = 2;
                } else {
                    node.pos += 1;
                    node.step = 0;
                }
                Ok(StepResult::Stay)
            }
            2 => {
                if node.pos >= sw.arms.len() {
                    return Ok(StepResult::Done(RetExpr::nil()));
                }
                match &sw.arms[node.pos].body {
                    Some(stm) => {
                        node.step = 3;
                        Ok(StepResult::Child(StackNode::new(NodeForm::Stm(Rc::clone(stm)))))
                    }
                    None => {
                        node.pos += 1;
                        Ok(StepResult::Stay)
                    }
                }
            }
            _ => {
                let _ = self.take_ret();
                node.pos += 1;
                node.step = 2;
                Ok(StepResult::Stay)
            }
        }
    }

    pub(crate) fn step_funcdef(
        &mut self,
        _node: &mut StackNode,
        def: &Rc<FuncDef>,
    ) -> Result<StepResult, RuntimeError> {
        let detail = FuncDetail::external(def);
        let var = Variable::new(Some(Rc::clone(&def.name)), Value::Func(detail));
        self.scopes.join(Rc::clone(&def.name), Symbol::Var(var.into_ref()));
        Ok(StepResult::Done(RetExpr::nil()))
    }

    pub(crate) fn step_setdef(
        &mut self,
        node: &mut StackNode,
        def: &Rc<SetDef>,
    ) -> Result<StepResult, RuntimeError> {
        if node.step == 0 {
            let detail = Rc::new(RefCell::new(SetDetail::new(Rc::clone(&def.name))));
            self.scopes.join(Rc::clone(&def.name), Symbol::Set(detail));
            let cur_stack = self.stack.len();
            self.scopes.push(ScopeKind::Set, Some(Rc::clone(&def.name)), cur_stack);
            node.step = 1;
            Ok(StepResult::Child(StackNode::new(NodeForm::SetStm(Rc::clone(def)))))
        } else {
            self.scopes.pop();
            Ok(StepResult::Done(RetExpr::nil()))
        }
    }

    /// One member declaration per step.
    pub(crate) fn step_setstm(
        &mut self,
        node: &mut StackNode,
        def: &Rc<SetDef>,
    ) -> Result<StepResult, RuntimeError> {
        if node.pos >= def.members.len() {
            return Ok(StepResult::Done(RetExpr::nil()));
        }
        let detail = match self.scopes.search(&def.name, false) {
            Some(Symbol::Set(d)) => d,
            _ => return Err(RuntimeError::MissingSymbol { name: def.name.to_string() }),
        };
        match &def.members[node.pos] {
            SetMember::Var(name) => {
                let var = Variable::new(Some(Rc::clone(name)), Value::Nil);
                detail.borrow_mut().add_member(Rc::clone(name), var);
            }
            SetMember::Func(fd) => {
                let func = FuncDetail::external(fd);
                let var = Variable::new(Some(Rc::clone(&fd.name)), Value::Func(func));
                detail.borrow_mut().add_member(Rc::clone(&fd.name), var);
            }
        }
        node.pos += 1;
        Ok(StepResult::Stay)
    }
}
