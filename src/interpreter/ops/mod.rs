//! Operator dispatch.
//!
//! Every operator resolves through a closed match on the operand value tags;
//! a missing combination is a typed runtime error, never a fallback. The
//! modules split by operator family:
//! - [`arith`]: `+ - * / % << >>`
//! - [`compare`]: `== != < <= > >=`
//! - [`logic`]: `|| && ^^`
//! - [`assign`]: `=` and the ten compound assignments
//! - [`unary`]: prefix `- ~ ! ++ --` and suffix `++ --`
//! - [`access`]: subscript and property

pub mod access;
pub mod arith;
pub mod assign;
pub mod compare;
pub mod logic;
pub mod unary;

use crate::interpreter::errors::RuntimeError;
use crate::memory::value::Value;
use crate::memory::var::RetExpr;

/// The evaluated datum behind a return-expression. Captured calls are
/// invoked by the locate/spec handlers before operators ever see them, so
/// meeting one here is an assignment-shaped misuse.
pub(crate) fn datum(ret: &RetExpr) -> Result<Value, RuntimeError> {
    ret.value().ok_or(RuntimeError::NotAssignable)
}
