use std::rc::Rc;

use crate::interpreter::errors::RuntimeError;
use crate::interpreter::ops::datum;
use crate::memory::value::Value;
use crate::memory::var::{RetExpr, Variable};

pub(crate) fn negative(operand: &RetExpr) -> Result<RetExpr, RuntimeError> {
    match datum(operand)? {
        Value::Int(n) => Ok(RetExpr::from_value(Value::Int(n.wrapping_neg()))),
        Value::Real(r) => Ok(RetExpr::from_value(Value::Real(-r))),
        other => Err(RuntimeError::OperatorUndefined { op: "-", ty: other.type_name() }),
    }
}

pub(crate) fn reverse(operand: &RetExpr) -> Result<RetExpr, RuntimeError> {
    match datum(operand)? {
        Value::Int(n) => Ok(RetExpr::from_value(Value::Int(!n))),
        other => Err(RuntimeError::OperatorUndefined { op: "~", ty: other.type_name() }),
    }
}

pub(crate) fn not(operand: &RetExpr) -> Result<RetExpr, RuntimeError> {
    Ok(RetExpr::from_value(Value::Bool(!datum(operand)?.truthy())))
}

/// Prefix `++`/`--`: step the variable, then yield the variable itself.
pub(crate) fn prefix_step(operand: &RetExpr, delta: i64) -> Result<RetExpr, RuntimeError> {
    let op = if delta > 0 { "++" } else { "--" };
    let var = operand.var().ok_or(RuntimeError::NotAssignable)?;
    let next = stepped(op, &var.borrow().value(), delta)?;
    var.borrow_mut().set_value(next);
    Ok(RetExpr::Var(Rc::clone(var)))
}

/// Suffix `++`/`--`: step the variable, but yield its previous value.
pub(crate) fn suffix_step(operand: &RetExpr, delta: i64) -> Result<RetExpr, RuntimeError> {
    let op = if delta > 0 { "++" } else { "--" };
    let var = operand.var().ok_or(RuntimeError::NotAssignable)?;
    let old = var.borrow().value();
    let next = stepped(op, &old, delta)?;
    var.borrow_mut().set_value(next);
    Ok(RetExpr::Var(Variable::new(None, old).into_ref()))
}

fn stepped(op: &'static str, value: &Value, delta: i64) -> Result<Value, RuntimeError> {
    match value {
        Value::Int(n) => Ok(Value::Int(n.wrapping_add(delta))),
        Value::Real(r) => Ok(Value::Real(r + delta as f64)),
        other => Err(RuntimeError::OperatorUndefined { op, ty: other.type_name() }),
    }
}
