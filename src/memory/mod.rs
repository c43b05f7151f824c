//! Memory model for the script runtime
//!
//! This module provides the refcounted value graph:
//! - [`value`]: Tagged runtime values (nil, int, bool, real, string, object,
//!   function, array) stored in shared cells
//! - [`var`]: Variables binding names to value cells, and the
//!   return-expression slot produced by evaluation
//! - [`array`]: Arrays indexed both by insertion order and by key
//! - [`set`]: Set details (class-like templates) and their object instances
//! - [`func`]: Function details and captured, not-yet-invoked calls
//!
//! # Reference counting
//!
//! Every value cell is an `Rc<RefCell<Value>>`; the `Rc` strong count is the
//! value's reference count. Cycles cannot form: arrays own their element
//! variables, objects own their member variables, and functions own their
//! argument defaults, while evaluation contexts hold variables but are never
//! held by them.

pub mod array;
pub mod func;
pub mod set;
pub mod value;
pub mod var;

pub use array::{Array, ArrayElem, ArrayKey};
pub use func::{FormalParam, FuncBody, FuncCall, FuncDetail, InternalFn};
pub use set::{Object, SetDetail};
pub use value::{Value, ValueCell};
pub use var::{RetExpr, VarKind, VarRef, Variable};
