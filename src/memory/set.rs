//! Set details and objects.
//!
//! A set is a class-like template: a named table of member variables
//! (including member functions). An object instantiates a set by duplicating
//! the template members into a per-instance table; the template itself stays
//! shared behind `Rc` for as long as any object or symbol binding holds it.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::memory::value::Value;
use crate::memory::var::{VarRef, Variable};

#[derive(Debug)]
pub struct SetDetail {
    name: Rc<str>,
    members: FxHashMap<Rc<str>, VarRef>,
}

impl SetDetail {
    pub fn new(name: Rc<str>) -> SetDetail {
        SetDetail { name, members: FxHashMap::default() }
    }

    pub fn name(&self) -> &Rc<str> {
        &self.name
    }

    /// Insert a template member, replacing any previous member of the same
    /// name.
    pub fn add_member(&mut self, name: Rc<str>, var: Variable) {
        self.members.insert(name, var.into_ref());
    }

    pub fn member(&self, name: &str) -> Option<VarRef> {
        self.members.get(name).map(Rc::clone)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Instantiate an object of this set with duplicated members.
    pub fn instantiate(detail: &Rc<RefCell<SetDetail>>) -> Object {
        let members = detail
            .borrow()
            .members
            .iter()
            .map(|(name, var)| (Rc::clone(name), var.borrow().dup().into_ref()))
            .collect();
        Object { set: Rc::clone(detail), members }
    }
}

/// An instance of a set with its own member table.
#[derive(Debug)]
pub struct Object {
    set: Rc<RefCell<SetDetail>>,
    members: FxHashMap<Rc<str>, VarRef>,
}

impl Object {
    pub fn set_detail(&self) -> &Rc<RefCell<SetDetail>> {
        &self.set
    }

    pub fn set_name(&self) -> Rc<str> {
        Rc::clone(self.set.borrow().name())
    }

    pub fn member(&self, name: &str) -> Option<VarRef> {
        self.members.get(name).map(Rc::clone)
    }

    /// Property access creates absent members as nil so that writes through
    /// the returned handle land in the instance table.
    pub fn member_or_insert(&mut self, name: Rc<str>) -> VarRef {
        Rc::clone(
            self.members
                .entry(Rc::clone(&name))
                .or_insert_with(|| Variable::new(Some(name), Value::Nil).into_ref()),
        )
    }

    pub fn deep_clone(&self) -> Object {
        let members = self
            .members
            .iter()
            .map(|(name, var)| (Rc::clone(name), var.borrow().dup().into_ref()))
            .collect();
        Object { set: Rc::clone(&self.set), members }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instances_do_not_share_members() {
        let detail = Rc::new(RefCell::new(SetDetail::new(Rc::from("point"))));
        detail
            .borrow_mut()
            .add_member(Rc::from("x"), Variable::new(Some(Rc::from("x")), Value::Int(0)));

        let mut a = SetDetail::instantiate(&detail);
        let b = SetDetail::instantiate(&detail);
        a.member_or_insert(Rc::from("x")).borrow_mut().set_value(Value::Int(9));

        assert_eq!(a.member("x").unwrap().borrow().value().to_int(), 9);
        assert_eq!(b.member("x").unwrap().borrow().value().to_int(), 0);
        // Template refcount: the detail plus two instances.
        assert_eq!(Rc::strong_count(&detail), 3);
    }
}
