use crate::ast::{LogicHighOp, LogicLowOp};
use crate::memory::value::Value;

// Logical operators are total: they act on truthiness, which every value
// type defines. Both operands are evaluated before dispatch (no
// short-circuit), which is what lets `^^` live at the same level as `||`.

pub(crate) fn logic_low(op: LogicLowOp, l: &Value, r: &Value) -> Value {
    let (a, b) = (l.truthy(), r.truthy());
    Value::Bool(match op {
        LogicLowOp::Or => a || b,
        LogicLowOp::Xor => a != b,
    })
}

pub(crate) fn logic_high(op: LogicHighOp, l: &Value, r: &Value) -> Value {
    let (a, b) = (l.truthy(), r.truthy());
    Value::Bool(match op {
        LogicHighOp::And => a && b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_differs_from_or() {
        let t = Value::Bool(true);
        assert!(logic_low(LogicLowOp::Or, &t, &t).truthy());
        assert!(!logic_low(LogicLowOp::Xor, &t, &t).truthy());
    }

    #[test]
    fn logic_is_total_over_types() {
        assert!(logic_high(LogicHighOp::And, &Value::Int(3), &Value::Str(std::rc::Rc::from("x")))
            .truthy());
        assert!(!logic_high(LogicHighOp::And, &Value::Nil, &Value::Int(1)).truthy());
    }
}
