//! Script runtime execution core
//!
//! This module provides the cooperative interpreter:
//! - [`engine`]: The [`engine::Runtime`] with its run/blocked/wait queues,
//!   jobs and the bounded-step pump driven from a reactor heartbeat
//! - [`stack`]: Reified activation frames of the evaluation stack
//! - [`statements`] / [`expressions`]: Step handlers per AST form
//! - [`ops`]: Operator dispatch over value tags
//! - [`scope`]: The per-job scope chain and symbol tables
//! - [`channel`]: Named rendezvous between jobs and host code
//! - [`errors`]: Runtime error types
//!
//! # Execution model
//!
//! A job never holds a native call stack across a suspension: every
//! partially-evaluated AST node is an explicit activation. The driver
//! advances the top activation one unit of work at a time, and after at
//! most [`constants::DEFAULT_STEP`] units control returns to the reactor.

pub mod channel;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod ops;
pub mod scope;
pub mod stack;

mod expressions;
mod statements;
