//! Function details and captured calls.

use std::rc::Rc;

use crate::ast::{FuncDef, Param, Stm};
use crate::interpreter::engine::Job;
use crate::interpreter::errors::RuntimeError;
use crate::memory::value::Value;
use crate::memory::var::{RetExpr, VarRef};

/// A host-implemented callable. Receives the job context and the evaluated
/// actual arguments; returns the call's return-expression, or `None` to
/// block the job and be re-invoked when it is re-queued.
pub type InternalFn = fn(&mut Job, &[VarRef]) -> Result<Option<RetExpr>, RuntimeError>;

#[derive(Debug)]
pub enum FuncBody {
    Internal(InternalFn),
    External(Rc<Stm>),
}

/// A formal parameter with an optional default supplied for omitted
/// trailing arguments.
#[derive(Debug)]
pub struct FormalParam {
    pub name: Rc<str>,
    pub default: Option<Value>,
}

#[derive(Debug)]
pub struct FuncDetail {
    pub name: Rc<str>,
    pub params: Vec<FormalParam>,
    pub body: FuncBody,
}

impl FuncDetail {
    /// Build an external function from its AST definition. Parameter
    /// defaults must be literal factors.
    pub fn external(def: &FuncDef) -> Rc<FuncDetail> {
        let params = def
            .params
            .iter()
            .map(|Param { name, default }| FormalParam {
                name: Rc::clone(name),
                default: default.as_deref().and_then(Value::from_literal),
            })
            .collect();
        Rc::new(FuncDetail {
            name: Rc::clone(&def.name),
            params,
            body: FuncBody::External(Rc::clone(&def.body)),
        })
    }

    /// Build a host-implemented function taking up to `nargs` arguments.
    pub fn internal(name: Rc<str>, nargs: usize, process: InternalFn) -> Rc<FuncDetail> {
        let params = (0..nargs)
            .map(|i| FormalParam { name: Rc::from(format!("arg{i}").as_str()), default: None })
            .collect();
        Rc::new(FuncDetail { name, params, body: FuncBody::Internal(process) })
    }
}

/// A not-yet-invoked callable capture: the callee resolved to a prototype,
/// an optional bound receiver, and the evaluated actual arguments.
#[derive(Debug)]
pub struct FuncCall {
    pub name: Rc<str>,
    pub prototype: Option<Rc<FuncDetail>>,
    pub object: Option<Value>,
    pub args: Vec<VarRef>,
}

impl FuncCall {
    pub fn new(name: Rc<str>) -> FuncCall {
        FuncCall { name, prototype: None, object: None, args: Vec::new() }
    }

    /// Bind a receiver onto the capture (method invocation).
    pub fn add_object(&mut self, obj: Value) {
        self.object = Some(obj);
    }
}
