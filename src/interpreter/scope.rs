//! Scope chain and symbol tables.
//!
//! Each job owns a chain of scopes, innermost last. Lookup walks from the
//! innermost scope outward unless restricted to the innermost by the `local`
//! flag; joining a binding always inserts into the innermost scope, so
//! shadowing is permitted. Variables, sets and labels share one namespace
//! and are distinguished by their symbol tag.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::Stm;
use crate::memory::set::SetDetail;
use crate::memory::var::VarRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Set,
    Func,
}

#[derive(Debug, Clone)]
pub enum Symbol {
    Var(VarRef),
    Set(Rc<RefCell<SetDetail>>),
    Label(Rc<Stm>),
}

#[derive(Debug)]
pub struct Scope {
    kind: ScopeKind,
    name: Option<Rc<str>>,
    symbols: FxHashMap<Rc<str>, Symbol>,
    /// Index of the evaluation-stack activation that opened this scope.
    cur_stack: usize,
}

impl Scope {
    fn new(kind: ScopeKind, name: Option<Rc<str>>, cur_stack: usize) -> Scope {
        Scope { kind, name, symbols: FxHashMap::default(), cur_stack }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn name(&self) -> Option<&Rc<str>> {
        self.name.as_ref()
    }

    pub fn cur_stack(&self) -> usize {
        self.cur_stack
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }
}

#[derive(Debug)]
pub struct ScopeChain {
    scopes: Vec<Scope>,
}

impl ScopeChain {
    /// A chain with the job's root function scope.
    pub fn new(root_name: Rc<str>) -> ScopeChain {
        ScopeChain { scopes: vec![Scope::new(ScopeKind::Func, Some(root_name), 0)] }
    }

    pub fn push(&mut self, kind: ScopeKind, name: Option<Rc<str>>, cur_stack: usize) {
        self.scopes.push(Scope::new(kind, name, cur_stack));
    }

    /// Pop the innermost scope. The root scope is never popped.
    pub fn pop(&mut self) -> Option<Scope> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn innermost(&self) -> &Scope {
        self.scopes.last().expect("scope chain is never empty")
    }

    /// Search for `name`, innermost scope first. With `local` set only the
    /// innermost scope is consulted.
    pub fn search(&self, name: &str, local: bool) -> Option<Symbol> {
        if local {
            return self.innermost().symbols.get(name).cloned();
        }
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.symbols.get(name).cloned())
    }

    /// Bind `name` in the innermost scope, shadowing any outer binding.
    pub fn join(&mut self, name: Rc<str>, symbol: Symbol) {
        self.scopes
            .last_mut()
            .expect("scope chain is never empty")
            .symbols
            .insert(name, symbol);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.iter()
    }
}
