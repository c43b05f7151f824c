//! Dual-indexed arrays.
//!
//! An array holds one underlying element collection reached through two
//! trees: one ordered by a monotonically increasing insertion index, one
//! keyed by the element's key variable. Both trees always contain exactly
//! the same elements; an element removed by key disappears from both.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::interpreter::errors::RuntimeError;
use crate::memory::value::Value;
use crate::memory::var::{VarRef, Variable};

/// Array keys are integers or strings; bools and reals are narrowed to
/// integers on use.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArrayKey {
    Int(i64),
    Str(Rc<str>),
}

impl ArrayKey {
    /// Narrow a value to a key, or report the offending type.
    pub fn from_value(v: &Value) -> Result<ArrayKey, RuntimeError> {
        match v {
            Value::Int(n) => Ok(ArrayKey::Int(*n)),
            Value::Bool(b) => Ok(ArrayKey::Int(*b as i64)),
            Value::Real(r) => Ok(ArrayKey::Int(*r as i64)),
            Value::Str(s) => Ok(ArrayKey::Str(Rc::clone(s))),
            other => Err(RuntimeError::InvalidArrayKey { ty: other.type_name() }),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            ArrayKey::Int(n) => Value::Int(*n),
            ArrayKey::Str(s) => Value::Str(Rc::clone(s)),
        }
    }
}

#[derive(Debug)]
pub struct ArrayElem {
    pub index: u64,
    pub key: Variable,
    pub value: VarRef,
}

type ElemRef = Rc<RefCell<ArrayElem>>;

#[derive(Debug, Default)]
pub struct Array {
    by_index: BTreeMap<u64, ElemRef>,
    by_key: BTreeMap<ArrayKey, ElemRef>,
    next_index: u64,
}

impl Array {
    pub fn new() -> Array {
        Array::default()
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    /// Look up the element variable for `key`, inserting a nil element if
    /// absent. `key` of `None` appends at the next insertion index. The
    /// returned handle writes through to the stored element.
    pub fn get_or_insert(&mut self, key: Option<&Value>) -> Result<VarRef, RuntimeError> {
        let key = match key {
            Some(v) => ArrayKey::from_value(v)?,
            None => ArrayKey::Int(self.next_index as i64),
        };
        if let Some(elem) = self.by_key.get(&key) {
            return Ok(Rc::clone(&elem.borrow().value));
        }
        let index = self.next_index;
        self.next_index += 1;
        let elem = Rc::new(RefCell::new(ArrayElem {
            index,
            key: Variable::new(None, key.to_value()),
            value: Variable::new(None, Value::Nil).into_ref(),
        }));
        self.by_index.insert(index, Rc::clone(&elem));
        self.by_key.insert(key, elem.clone());
        let value = Rc::clone(&elem.borrow().value);
        Ok(value)
    }

    /// Look up an existing element variable without inserting.
    pub fn get(&self, key: &Value) -> Option<VarRef> {
        let key = ArrayKey::from_value(key).ok()?;
        self.by_key.get(&key).map(|e| Rc::clone(&e.borrow().value))
    }

    /// Remove the element for `key` from both trees. Returns whether an
    /// element was removed.
    pub fn remove(&mut self, key: &Value) -> Result<bool, RuntimeError> {
        let key = ArrayKey::from_value(key)?;
        match self.by_key.remove(&key) {
            Some(elem) => {
                self.by_index.remove(&elem.borrow().index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Elements in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ElemRef> {
        self.by_index.values()
    }

    /// Both trees hold the same element identities.
    pub fn is_consistent(&self) -> bool {
        self.by_index.len() == self.by_key.len()
            && self.by_key.values().all(|e| {
                self.by_index
                    .get(&e.borrow().index)
                    .is_some_and(|other| Rc::ptr_eq(other, e))
            })
    }

    pub fn deep_clone(&self) -> Array {
        let mut out = Array { next_index: self.next_index, ..Array::default() };
        for elem in self.by_index.values() {
            let e = elem.borrow();
            let copy = Rc::new(RefCell::new(ArrayElem {
                index: e.index,
                key: e.key.dup(),
                value: e.value.borrow().dup().into_ref(),
            }));
            let key = ArrayKey::from_value(&e.key.value()).expect("stored key is valid");
            out.by_index.insert(e.index, Rc::clone(&copy));
            out.by_key.insert(key, copy);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_insert_and_lookup() {
        let mut a = Array::new();
        let v = a.get_or_insert(Some(&Value::Str(Rc::from("a")))).unwrap();
        v.borrow_mut().set_value(Value::Int(1));
        assert_eq!(a.get(&Value::Str(Rc::from("a"))).unwrap().borrow().value().to_int(), 1);
        assert!(a.is_consistent());
    }

    #[test]
    fn removal_drops_both_trees() {
        let mut a = Array::new();
        a.get_or_insert(Some(&Value::Str(Rc::from("a")))).unwrap();
        a.get_or_insert(Some(&Value::Str(Rc::from("b")))).unwrap();
        assert!(a.remove(&Value::Str(Rc::from("a"))).unwrap());
        assert_eq!(a.len(), 1);
        assert!(a.get(&Value::Str(Rc::from("a"))).is_none());
        assert!(a.is_consistent());
    }

    #[test]
    fn append_uses_running_index() {
        let mut a = Array::new();
        a.get_or_insert(None).unwrap().borrow_mut().set_value(Value::Int(10));
        a.get_or_insert(None).unwrap().borrow_mut().set_value(Value::Int(20));
        let collected: Vec<i64> =
            a.iter().map(|e| e.borrow().value.borrow().value().to_int()).collect();
        assert_eq!(collected, vec![10, 20]);
    }

    #[test]
    fn bad_key_type_is_reported() {
        let mut a = Array::new();
        assert!(a.get_or_insert(Some(&Value::Nil)).is_err());
    }
}
