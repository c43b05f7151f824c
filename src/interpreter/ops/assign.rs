use std::rc::Rc;

use crate::ast::{AddSubOp, AssignOp, MoveOp, MulDivOp};
use crate::interpreter::errors::RuntimeError;
use crate::interpreter::ops::{arith, datum};
use crate::memory::value::Value;
use crate::memory::var::RetExpr;

/// Apply an assignment operator. The destination must be a variable
/// reference; the result is that same reference, so chained assignments
/// (`a = b = c`) observe the written variable.
pub(crate) fn apply(op: AssignOp, lhs: &RetExpr, rhs: &RetExpr) -> Result<RetExpr, RuntimeError> {
    let dest = lhs.var().ok_or(RuntimeError::NotAssignable)?;
    let src = datum(rhs)?;

    let value = match op {
        AssignOp::Assign => src,
        AssignOp::PlusEq => arith::addsub(AddSubOp::Plus, &dest.borrow().value(), &src)?,
        AssignOp::SubEq => arith::addsub(AddSubOp::Minus, &dest.borrow().value(), &src)?,
        AssignOp::MulEq => arith::muldiv(MulDivOp::Mul, &dest.borrow().value(), &src)?,
        AssignOp::DivEq => arith::muldiv(MulDivOp::Div, &dest.borrow().value(), &src)?,
        AssignOp::ModEq => arith::muldiv(MulDivOp::Mod, &dest.borrow().value(), &src)?,
        AssignOp::LShiftEq => arith::shift(MoveOp::Shl, &dest.borrow().value(), &src)?,
        AssignOp::RShiftEq => arith::shift(MoveOp::Shr, &dest.borrow().value(), &src)?,
        AssignOp::OrEq => bitwise("|=", dest.borrow().value(), src, |a, b| a | b)?,
        AssignOp::AndEq => bitwise("&=", dest.borrow().value(), src, |a, b| a & b)?,
        AssignOp::XorEq => bitwise("^=", dest.borrow().value(), src, |a, b| a ^ b)?,
    };
    dest.borrow_mut().set_value(value);
    Ok(RetExpr::Var(Rc::clone(dest)))
}

fn bitwise(
    op: &'static str,
    l: Value,
    r: Value,
    f: impl Fn(i64, i64) -> i64,
) -> Result<Value, RuntimeError> {
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(f(*a, *b))),
        _ => Err(RuntimeError::MixedOperands { op, left: l.type_name(), right: r.type_name() }),
    }
}
