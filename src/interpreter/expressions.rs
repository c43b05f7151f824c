//! Step handlers for the expression precedence chain.
//!
//! Binary levels share one shape: evaluate the left child, then (if an
//! operator is present) the right chain, then combine through the operator
//! dispatch. The `locate` handler walks subscript/property/call suffixes,
//! carrying the current base in its partial return-expression and a pending
//! method receiver in its scratch slot.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{
    Assign, ElemList, Exp, Factor, FuncCallNode, FuncSuffix, Locate, LocatePart, LogicHigh,
    LogicLow, Move, MulDiv, RelativeHigh, RelativeLow, Spec, Suffix, SuffixOp,
};
use crate::ast::AddSub;
use crate::interpreter::engine::Job;
use crate::interpreter::errors::RuntimeError;
use crate::interpreter::ops::{access, arith, assign, compare, datum, logic, unary};
use crate::interpreter::scope::{ScopeKind, Symbol};
use crate::interpreter::stack::{NodeForm, StackNode, StepResult};
use crate::memory::func::{FuncBody, FuncCall};
use crate::memory::set::SetDetail;
use crate::memory::value::Value;
use crate::memory::var::{RetExpr, Variable};

/// What invoking a captured call produced.
pub(crate) enum Invoke {
    /// External function: a function scope was pushed and the body
    /// activation should go on the stack.
    Pushed(StackNode),
    /// Internal function returned synchronously, or a set was instantiated.
    Immediate(RetExpr),
    /// Internal function asked to block; the capture is preserved so the
    /// same call re-runs when the job is re-queued.
    Blocked(Box<FuncCall>),
}

macro_rules! chain_step {
    ($self:ident, $node:ident, $ast:ident, $lower:ident, $same:ident, |$op:ident, $l:ident, $r:ident| $apply:expr) => {{
        match $node.step {
            0 => {
                $node.step = 1;
                Ok(StepResult::Child(StackNode::new(NodeForm::$lower(Rc::clone(&$ast.lhs)))))
            }
            1 => match ($ast.op, &$ast.rhs) {
                (Some(_), Some(rhs)) => {
                    $node.ret = Some($self.take_ret());
                    $node.step = 2;
                    Ok(StepResult::Child(StackNode::new(NodeForm::$same(Rc::clone(rhs)))))
                }
                _ => Ok(StepResult::Done($self.take_ret())),
            },
            _ => {
                let right = $self.take_ret();
                let left = $node.ret.take().unwrap_or_else(RetExpr::nil);
                match $ast.op {
                    Some($op) => {
                        let $l = datum(&left)?;
                        let $r = datum(&right)?;
                        Ok(StepResult::Done(RetExpr::from_value($apply?)))
                    }
                    None => unreachable!("chain node reached combine step without operator"),
                }
            }
        }
    }};
}

impl Job {
    pub(crate) fn step_exp(
        &mut self,
        node: &mut StackNode,
        e: &Rc<Exp>,
    ) -> Result<StepResult, RuntimeError> {
        if node.pos >= e.list.len() {
            return Ok(StepResult::Done(self.take_ret()));
        }
        if node.pos > 0 {
            // Comma expression: earlier element results are discarded.
            let _ = self.take_ret();
        }
        let next = Rc::clone(&e.list[node.pos]);
        node.pos += 1;
        Ok(StepResult::Child(StackNode::new(NodeForm::Assign(next))))
    }

    pub(crate) fn step_assign(
        &mut self,
        node: &mut StackNode,
        a: &Rc<Assign>,
    ) -> Result<StepResult, RuntimeError> {
        match node.step {
            0 => {
                node.step = 1;
                Ok(StepResult::Child(StackNode::new(NodeForm::LogicLow(Rc::clone(&a.lhs)))))
            }
            1 => match (a.op, &a.rhs) {
                (Some(_), Some(rhs)) => {
                    node.ret = Some(self.take_ret());
                    node.step = 2;
                    Ok(StepResult::Child(StackNode::new(NodeForm::Assign(Rc::clone(rhs)))))
                }
                _ => Ok(StepResult::Done(self.take_ret())),
            },
            _ => {
                let rhs = self.take_ret();
                let lhs = node.ret.take().unwrap_or_else(RetExpr::nil);
                match a.op {
                    Some(op) => Ok(StepResult::Done(assign::apply(op, &lhs, &rhs)?)),
                    None => unreachable!("assign node reached combine step without operator"),
                }
            }
        }
    }

    pub(crate) fn step_logic_low(
        &mut self,
        node: &mut StackNode,
        ast: &Rc<LogicLow>,
    ) -> Result<StepResult, RuntimeError> {
        chain_step!(self, node, ast, LogicHigh, LogicLow, |op, l, r| Ok::<_, RuntimeError>(
            logic::logic_low(op, &l, &r)
        ))
    }

    pub(crate) fn step_logic_high(
        &mut self,
        node: &mut StackNode,
        ast: &Rc<LogicHigh>,
    ) -> Result<StepResult, RuntimeError> {
        chain_step!(self, node, ast, RelativeLow, LogicHigh, |op, l, r| Ok::<_, RuntimeError>(
            logic::logic_high(op, &l, &r)
        ))
    }

    pub(crate) fn step_relative_low(
        &mut self,
        node: &mut StackNode,
        ast: &Rc<RelativeLow>,
    ) -> Result<StepResult, RuntimeError> {
        chain_step!(self, node, ast, RelativeHigh, RelativeLow, |op, l, r| Ok::<_, RuntimeError>(
            compare::relative_low(op, &l, &r)
        ))
    }

    pub(crate) fn step_relative_high(
        &mut self,
        node: &mut StackNode,
        ast: &Rc<RelativeHigh>,
    ) -> Result<StepResult, RuntimeError> {
        chain_step!(self, node, ast, Move, RelativeHigh, |op, l, r| compare::relative_high(
            op, &l, &r
        ))
    }

    pub(crate) fn step_move(
        &mut self,
        node: &mut StackNode,
        ast: &Rc<Move>,
    ) -> Result<StepResult, RuntimeError> {
        chain_step!(self, node, ast, AddSub, Move, |op, l, r| arith::shift(op, &l, &r))
    }

    pub(crate) fn step_addsub(
        &mut self,
        node: &mut StackNode,
        ast: &Rc<AddSub>,
    ) -> Result<StepResult, RuntimeError> {
        chain_step!(self, node, ast, MulDiv, AddSub, |op, l, r| arith::addsub(op, &l, &r))
    }

    pub(crate) fn step_muldiv(
        &mut self,
        node: &mut StackNode,
        ast: &Rc<MulDiv>,
    ) -> Result<StepResult, RuntimeError> {
        chain_step!(self, node, ast, Suffix, MulDiv, |op, l, r| arith::muldiv(op, &l, &r))
    }

    pub(crate) fn step_suffix(
        &mut self,
        node: &mut StackNode,
        s: &Rc<Suffix>,
    ) -> Result<StepResult, RuntimeError> {
        if node.step == 0 {
            node.step = 1;
            return Ok(StepResult::Child(StackNode::new(NodeForm::Locate(Rc::clone(&s.lhs)))));
        }
        let operand = self.take_ret();
        match s.op {
            None => Ok(StepResult::Done(operand)),
            Some(SuffixOp::Inc) => Ok(StepResult::Done(unary::suffix_step(&operand, 1)?)),
            Some(SuffixOp::Dec) => Ok(StepResult::Done(unary::suffix_step(&operand, -1)?)),
        }
    }

    pub(crate) fn step_spec(
        &mut self,
        node: &mut StackNode,
        sp: &Rc<Spec>,
    ) -> Result<StepResult, RuntimeError> {
        if node.step == 0 {
            node.step = 1;
            let child = match &**sp {
                Spec::Negative(inner)
                | Spec::Reverse(inner)
                | Spec::Not(inner)
                | Spec::PreInc(inner)
                | Spec::PreDec(inner) => StackNode::new(NodeForm::Spec(Rc::clone(inner))),
                Spec::Paren(e) => StackNode::new(NodeForm::Exp(Rc::clone(e))),
                Spec::Factor(f) => StackNode::new(NodeForm::Factor(Rc::clone(f))),
                Spec::FuncCall(fc) => StackNode::new(NodeForm::FuncCall(Rc::clone(fc))),
            };
            return Ok(StepResult::Child(child));
        }
        let inner = self.take_ret();
        let out = match &**sp {
            Spec::Negative(_) => unary::negative(&inner)?,
            Spec::Reverse(_) => unary::reverse(&inner)?,
            Spec::Not(_) => unary::not(&inner)?,
            Spec::PreInc(_) => unary::prefix_step(&inner, 1)?,
            Spec::PreDec(_) => unary::prefix_step(&inner, -1)?,
            Spec::Paren(_) | Spec::Factor(_) | Spec::FuncCall(_) => inner,
        };
        Ok(StepResult::Done(out))
    }

    pub(crate) fn step_factor(
        &mut self,
        node: &mut StackNode,
        f: &Rc<Factor>,
    ) -> Result<StepResult, RuntimeError> {
        if let Factor::Array(el) = &**f {
            return if node.step == 0 {
                node.step = 1;
                Ok(StepResult::Child(StackNode::new(NodeForm::ElemList(Rc::clone(el)))))
            } else {
                Ok(StepResult::Done(self.take_ret()))
            };
        }
        if let Factor::Id(name) = &**f {
            return match self.scopes.search(name, false) {
                Some(Symbol::Var(v)) => Ok(StepResult::Done(RetExpr::Var(v))),
                Some(Symbol::Set(_)) | Some(Symbol::Label(_)) => {
                    Err(RuntimeError::NotAValue { name: name.to_string() })
                }
                None => {
                    // First use defines the variable as nil in the innermost
                    // scope; the language has no declarations.
                    let var = Variable::new(Some(Rc::clone(name)), Value::Nil).into_ref();
                    self.scopes.join(Rc::clone(name), Symbol::Var(Rc::clone(&var)));
                    Ok(StepResult::Done(RetExpr::Var(var)))
                }
            };
        }
        match Value::from_literal(f) {
            Some(v) => Ok(StepResult::Done(RetExpr::from_value(v))),
            None => unreachable!("non-literal factors handled above"),
        }
    }

    pub(crate) fn step_elemlist(
        &mut self,
        node: &mut StackNode,
        el: &Rc<ElemList>,
    ) -> Result<StepResult, RuntimeError> {
        match node.step {
            0 => {
                let arr = crate::memory::array::Array::new();
                node.ret =
                    Some(RetExpr::from_value(Value::Array(Rc::new(RefCell::new(arr)))));
                node.step = 1;
                Ok(StepResult::Stay)
            }
            1 => {
                if node.pos >= el.elems.len() {
                    let out = node.ret.take().unwrap_or_else(RetExpr::nil);
                    return Ok(StepResult::Done(out));
                }
                let elem = &el.elems[node.pos];
                match &elem.key {
                    Some(key) => {
                        node.step = 2;
                        Ok(StepResult::Child(StackNode::new(NodeForm::Assign(Rc::clone(key)))))
                    }
                    None => {
                        node.step = 4;
                        Ok(StepResult::Child(StackNode::new(NodeForm::Assign(Rc::clone(
                            &elem.value,
                        )))))
                    }
                }
            }
            2 => {
                node.scratch = Some(datum(&self.take_ret())?);
                node.step = 3;
                let elem = &el.elems[node.pos];
                Ok(StepResult::Child(StackNode::new(NodeForm::Assign(Rc::clone(&elem.value)))))
            }
            3 => {
                let value = datum(&self.take_ret())?;
                let key = node.scratch.take().unwrap_or(Value::Nil);
                self.elemlist_insert(node, Some(&key), value)?;
                node.pos += 1;
                node.step = 1;
                Ok(StepResult::Stay)
            }
            _ => {
                let value = datum(&self.take_ret())?;
                self.elemlist_insert(node, None, value)?;
                node.pos += 1;
                node.step = 1;
                Ok(StepResult::Stay)
            }
        }
    }

    fn elemlist_insert(
        &mut self,
        node: &mut StackNode,
        key: Option<&Value>,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let arr = match node.ret.as_ref().and_then(RetExpr::value) {
            Some(Value::Array(a)) => a,
            _ => return Err(RuntimeError::NotAssignable),
        };
        let slot = arr.borrow_mut().get_or_insert(key)?;
        slot.borrow_mut().set_value(value);
        Ok(())
    }

    pub(crate) fn step_locate(
        &mut self,
        node: &mut StackNode,
        l: &Rc<Locate>,
    ) -> Result<StepResult, RuntimeError> {
        match node.step {
            0 => {
                node.step = 1;
                Ok(StepResult::Child(StackNode::new(NodeForm::Spec(Rc::clone(&l.base)))))
            }
            1 => {
                node.ret = Some(self.take_ret());
                node.step = 2;
                Ok(StepResult::Stay)
            }
            2 => {
                if node.pos >= l.parts.len() {
                    let out = node.ret.take().unwrap_or_else(RetExpr::nil);
                    return Ok(StepResult::Done(out));
                }
                let base = node.ret.take().unwrap_or_else(RetExpr::nil);
                match &l.parts[node.pos] {
                    LocatePart::Index(Some(e)) => {
                        node.ret = Some(base);
                        node.step = 3;
                        Ok(StepResult::Child(StackNode::new(NodeForm::Exp(Rc::clone(e)))))
                    }
                    LocatePart::Index(None) => {
                        let slot = access::index(&base, None)?;
                        node.ret = Some(RetExpr::Var(slot));
                        node.scratch = None;
                        node.pos += 1;
                        Ok(StepResult::Stay)
                    }
                    LocatePart::Property(name) => {
                        let (member, recv) = access::property(&base, name)?;
                        node.ret = Some(RetExpr::Var(member));
                        node.scratch = Some(recv);
                        node.pos += 1;
                        Ok(StepResult::Stay)
                    }
                    LocatePart::Call(fs) => {
                        let capture = self.capture_call(&base, node.scratch.take())?;
                        let mut child = StackNode::new(NodeForm::FuncSuffix(Rc::clone(fs)));
                        child.ret = Some(RetExpr::Call(capture));
                        node.step = 4;
                        Ok(StepResult::Child(child))
                    }
                }
            }
            3 => {
                let key = datum(&self.take_ret())?;
                let base = node.ret.take().unwrap_or_else(RetExpr::nil);
                let slot = access::index(&base, Some(&key))?;
                node.ret = Some(RetExpr::Var(slot));
                node.scratch = None;
                node.pos += 1;
                node.step = 2;
                Ok(StepResult::Stay)
            }
            4 => {
                let capture = match self.take_ret() {
                    RetExpr::Call(c) => c,
                    other => {
                        // A completed call result; treat as the new base.
                        node.ret = Some(other);
                        node.pos += 1;
                        node.step = 2;
                        return Ok(StepResult::Stay);
                    }
                };
                match self.invoke(*capture)? {
                    Invoke::Immediate(r) => {
                        node.ret = Some(r);
                        node.pos += 1;
                        node.step = 2;
                        Ok(StepResult::Stay)
                    }
                    Invoke::Pushed(body) => {
                        node.call = true;
                        node.step = 5;
                        Ok(StepResult::Child(body))
                    }
                    Invoke::Blocked(c) => {
                        self.ret = Some(RetExpr::Call(c));
                        Ok(StepResult::Block)
                    }
                }
            }
            _ => {
                node.call = false;
                self.scopes.pop();
                node.ret = Some(self.take_ret());
                node.pos += 1;
                node.step = 2;
                Ok(StepResult::Stay)
            }
        }
    }

    fn capture_call(
        &mut self,
        callee: &RetExpr,
        recv: Option<Value>,
    ) -> Result<Box<FuncCall>, RuntimeError> {
        let var = match callee.var() {
            Some(v) => v,
            None => return Err(RuntimeError::NotCallable { name: "<call>".into() }),
        };
        let name = var.borrow().name().cloned().unwrap_or_else(|| Rc::from("<anonymous>"));
        match var.borrow().value() {
            Value::Func(proto) => {
                let mut capture = FuncCall::new(name);
                capture.prototype = Some(proto);
                if let Some(obj) = recv {
                    capture.add_object(obj);
                }
                Ok(Box::new(capture))
            }
            _ => Err(RuntimeError::NotCallable { name: name.to_string() }),
        }
    }

    /// Argument evaluation for a call suffix; the capture being filled
    /// travels in the node's partial return-expression.
    pub(crate) fn step_funcsuffix(
        &mut self,
        node: &mut StackNode,
        fs: &Rc<FuncSuffix>,
    ) -> Result<StepResult, RuntimeError> {
        if node.step == 1 {
            let arg = self.take_ret();
            self.push_capture_arg(node, arg)?;
            node.pos += 1;
            node.step = 0;
            return Ok(StepResult::Stay);
        }
        if node.pos >= fs.args.len() {
            let out = node.ret.take().unwrap_or_else(RetExpr::nil);
            return Ok(StepResult::Done(out));
        }
        node.step = 1;
        Ok(StepResult::Child(StackNode::new(NodeForm::Assign(Rc::clone(&fs.args[node.pos])))))
    }

    fn push_capture_arg(
        &mut self,
        node: &mut StackNode,
        arg: RetExpr,
    ) -> Result<(), RuntimeError> {
        let var = match arg {
            RetExpr::Var(v) => v,
            RetExpr::Call(_) => return Err(RuntimeError::NotAssignable),
        };
        match node.ret.as_mut() {
            Some(RetExpr::Call(capture)) => {
                capture.args.push(var);
                Ok(())
            }
            _ => Err(RuntimeError::NotAssignable),
        }
    }

    /// A direct named call: resolve the symbol, evaluate arguments, invoke.
    /// Resolving to a set instantiates an object of that set instead.
    pub(crate) fn step_funccall(
        &mut self,
        node: &mut StackNode,
        fc: &Rc<FuncCallNode>,
    ) -> Result<StepResult, RuntimeError> {
        match node.step {
            0 => match self.scopes.search(&fc.name, false) {
                Some(Symbol::Set(detail)) => {
                    let obj = SetDetail::instantiate(&detail);
                    Ok(StepResult::Done(RetExpr::from_value(Value::Obj(Rc::new(RefCell::new(
                        obj,
                    ))))))
                }
                Some(Symbol::Var(v)) => match v.borrow().value() {
                    Value::Func(proto) => {
                        let mut capture = FuncCall::new(Rc::clone(&fc.name));
                        capture.prototype = Some(proto);
                        node.ret = Some(RetExpr::Call(Box::new(capture)));
                        node.step = 1;
                        Ok(StepResult::Stay)
                    }
                    other => Err(RuntimeError::NotCallable {
                        name: format!("{} ({})", fc.name, other.type_name()),
                    }),
                },
                Some(Symbol::Label(_)) => {
                    Err(RuntimeError::NotCallable { name: fc.name.to_string() })
                }
                None => Err(RuntimeError::MissingSymbol { name: fc.name.to_string() }),
            },
            1 => {
                if node.pos >= fc.args.len() {
                    node.step = 3;
                    return Ok(StepResult::Stay);
                }
                node.step = 2;
                Ok(StepResult::Child(StackNode::new(NodeForm::Assign(Rc::clone(
                    &fc.args[node.pos],
                )))))
            }
            2 => {
                let arg = self.take_ret();
                self.push_capture_arg(node, arg)?;
                node.pos += 1;
                node.step = 1;
                Ok(StepResult::Stay)
            }
            3 => {
                let capture = match node.ret.take() {
                    Some(RetExpr::Call(c)) => c,
                    _ => return Err(RuntimeError::NotCallable { name: fc.name.to_string() }),
                };
                match self.invoke(*capture)? {
                    Invoke::Immediate(r) => {
                        node.ret = Some(r);
                        node.step = 5;
                        Ok(StepResult::Stay)
                    }
                    Invoke::Pushed(body) => {
                        node.call = true;
                        node.step = 4;
                        Ok(StepResult::Child(body))
                    }
                    Invoke::Blocked(c) => {
                        node.ret = Some(RetExpr::Call(c));
                        Ok(StepResult::Block)
                    }
                }
            }
            4 => {
                node.call = false;
                self.scopes.pop();
                node.ret = Some(self.take_ret());
                node.step = 5;
                Ok(StepResult::Stay)
            }
            _ => Ok(StepResult::Done(node.ret.take().unwrap_or_else(RetExpr::nil))),
        }
    }

    /// Invoke a captured call. Internal functions run synchronously and
    /// bypass scope creation; external functions get a fresh function scope
    /// with formals bound to duplicated actuals (defaults fill omitted
    /// trailing arguments) and their body pushed as a new activation.
    pub(crate) fn invoke(&mut self, capture: FuncCall) -> Result<Invoke, RuntimeError> {
        let proto = match &capture.prototype {
            Some(p) => Rc::clone(p),
            None => {
                return Err(RuntimeError::NotCallable { name: capture.name.to_string() })
            }
        };
        match &proto.body {
            FuncBody::Internal(process) => match process(self, &capture.args)? {
                Some(ret) => Ok(Invoke::Immediate(ret)),
                None => Ok(Invoke::Blocked(Box::new(capture))),
            },
            FuncBody::External(body) => {
                if capture.args.len() > proto.params.len() {
                    return Err(RuntimeError::ArityMismatch {
                        name: proto.name.to_string(),
                        expected: proto.params.len(),
                        got: capture.args.len(),
                    });
                }
                let cur_stack = self.stack.len();
                self.scopes.push(ScopeKind::Func, Some(Rc::clone(&proto.name)), cur_stack);
                for (i, param) in proto.params.iter().enumerate() {
                    let value = match capture.args.get(i) {
                        Some(actual) => actual.borrow().value().deep_clone(),
                        None => param.default.clone().unwrap_or(Value::Nil),
                    };
                    let var = Variable::new(Some(Rc::clone(&param.name)), value);
                    self.scopes.join(Rc::clone(&param.name), Symbol::Var(var.into_ref()));
                }
                if let Some(obj) = capture.object {
                    let this = Variable::new(Some(Rc::from("this")), obj);
                    self.scopes.join(Rc::from("this"), Symbol::Var(this.into_ref()));
                }
                Ok(Invoke::Pushed(StackNode::new(NodeForm::Stm(Rc::clone(body)))))
            }
        }
    }
}
