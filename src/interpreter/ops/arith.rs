use std::rc::Rc;

use crate::ast::{AddSubOp, MoveOp, MulDivOp};
use crate::interpreter::errors::RuntimeError;
use crate::memory::value::Value;

/// Numeric pair after promotion; strings and the rest are rejected by the
/// caller with the operator's name.
enum Promoted {
    Int(i64, i64),
    Real(f64, f64),
}

fn promote(op: &'static str, l: &Value, r: &Value) -> Result<Promoted, RuntimeError> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Ok(Promoted::Int(*a, *b)),
        (Value::Int(a), Value::Real(b)) => Ok(Promoted::Real(*a as f64, *b)),
        (Value::Real(a), Value::Int(b)) => Ok(Promoted::Real(*a, *b as f64)),
        (Value::Real(a), Value::Real(b)) => Ok(Promoted::Real(*a, *b)),
        _ => Err(RuntimeError::MixedOperands { op, left: l.type_name(), right: r.type_name() }),
    }
}

pub(crate) fn addsub(op: AddSubOp, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
    // String concatenation rides the plus operator.
    if let (AddSubOp::Plus, Value::Str(a), Value::Str(b)) = (op, l, r) {
        let mut s = String::with_capacity(a.len() + b.len());
        s.push_str(a);
        s.push_str(b);
        return Ok(Value::Str(Rc::from(s.as_str())));
    }
    let name = match op {
        AddSubOp::Plus => "+",
        AddSubOp::Minus => "-",
    };
    Ok(match (op, promote(name, l, r)?) {
        (AddSubOp::Plus, Promoted::Int(a, b)) => Value::Int(a.wrapping_add(b)),
        (AddSubOp::Minus, Promoted::Int(a, b)) => Value::Int(a.wrapping_sub(b)),
        (AddSubOp::Plus, Promoted::Real(a, b)) => Value::Real(a + b),
        (AddSubOp::Minus, Promoted::Real(a, b)) => Value::Real(a - b),
    })
}

pub(crate) fn muldiv(op: MulDivOp, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
    let name = match op {
        MulDivOp::Mul => "*",
        MulDivOp::Div => "/",
        MulDivOp::Mod => "%",
    };
    match (op, promote(name, l, r)?) {
        (MulDivOp::Mul, Promoted::Int(a, b)) => Ok(Value::Int(a.wrapping_mul(b))),
        (MulDivOp::Mul, Promoted::Real(a, b)) => Ok(Value::Real(a * b)),
        (MulDivOp::Div, Promoted::Int(a, b)) => {
            if b == 0 {
                Err(RuntimeError::DivisionByZero)
            } else {
                Ok(Value::Int(a.wrapping_div(b)))
            }
        }
        (MulDivOp::Div, Promoted::Real(a, b)) => {
            if b == 0.0 {
                Err(RuntimeError::DivisionByZero)
            } else {
                Ok(Value::Real(a / b))
            }
        }
        (MulDivOp::Mod, Promoted::Int(a, b)) => {
            if b == 0 {
                Err(RuntimeError::DivisionByZero)
            } else {
                Ok(Value::Int(a.wrapping_rem(b)))
            }
        }
        (MulDivOp::Mod, Promoted::Real(a, b)) => {
            if b == 0.0 {
                Err(RuntimeError::DivisionByZero)
            } else {
                Ok(Value::Real(a % b))
            }
        }
    }
}

pub(crate) fn shift(op: MoveOp, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
    let name = match op {
        MoveOp::Shl => "<<",
        MoveOp::Shr => ">>",
    };
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => {
            let amount = (*b as u32) & 63;
            Ok(Value::Int(match op {
                MoveOp::Shl => a.wrapping_shl(amount),
                MoveOp::Shr => a.wrapping_shr(amount),
            }))
        }
        _ => Err(RuntimeError::MixedOperands { op: name, left: l.type_name(), right: r.type_name() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_real_promotion() {
        let v = addsub(AddSubOp::Plus, &Value::Int(2), &Value::Real(0.5)).unwrap();
        assert!(matches!(v, Value::Real(r) if r == 2.5));
    }

    #[test]
    fn division_by_zero_is_typed() {
        assert!(matches!(
            muldiv(MulDivOp::Div, &Value::Int(1), &Value::Int(0)),
            Err(RuntimeError::DivisionByZero)
        ));
    }

    #[test]
    fn string_concat() {
        let v = addsub(
            AddSubOp::Plus,
            &Value::Str(Rc::from("ab")),
            &Value::Str(Rc::from("cd")),
        )
        .unwrap();
        assert_eq!(&*v.to_str(), "abcd");
    }

    #[test]
    fn strings_reject_minus() {
        assert!(addsub(AddSubOp::Minus, &Value::Str(Rc::from("a")), &Value::Str(Rc::from("b")))
            .is_err());
    }
}
