use std::rc::Rc;

use crate::interpreter::errors::RuntimeError;
use crate::interpreter::ops::datum;
use crate::memory::value::Value;
use crate::memory::var::{RetExpr, VarRef};

/// Subscript: look up (or create) the element variable for `key`. A `key`
/// of `None` appends at the next insertion index. The returned handle
/// writes through to the array, so `a[k] = v` works.
pub(crate) fn index(base: &RetExpr, key: Option<&Value>) -> Result<VarRef, RuntimeError> {
    match datum(base)? {
        Value::Array(arr) => arr.borrow_mut().get_or_insert(key),
        other => Err(RuntimeError::OperatorUndefined { op: "[]", ty: other.type_name() }),
    }
}

/// Property access on an object. Absent members are created as nil so that
/// writes through the returned handle land in the instance. The receiver is
/// handed back so a following call suffix can bind it as `this`.
pub(crate) fn property(base: &RetExpr, name: &Rc<str>) -> Result<(VarRef, Value), RuntimeError> {
    match datum(base)? {
        Value::Obj(obj) => {
            let member = obj.borrow_mut().member_or_insert(Rc::clone(name));
            Ok((member, Value::Obj(obj)))
        }
        other => {
            Err(RuntimeError::NoSuchProperty { ty: other.type_name(), name: name.to_string() })
        }
    }
}
