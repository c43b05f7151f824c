//! # Introduction
//!
//! riptide is a single-threaded I/O event reactor paired with a cooperative
//! script runtime. The reactor multiplexes fd readiness, timers and POSIX
//! signals over the best kernel primitive on the host; the interpreter
//! executes scripted jobs by advancing a heap-allocated evaluation stack in
//! bounded-work slices, driven as an ordinary timer-handler the reactor
//! re-arms. The two share one thread: parallelism comes from running more
//! threads, each with its own reactor and runtime, never from sharing.
//!
//! ## Execution pipeline
//!
//! ```text
//! AST → Job → run queue → heartbeat tick → step slices → reactor → ...
//! ```
//!
//! 1. [`ast`] — the node forms an external front end produces; there is no
//!    parser here.
//! 2. [`event`] — the reactor: fd table, timeout heap, signal bridge and
//!    the dispatch loop.
//! 3. [`interpreter`] — jobs, scopes, the evaluation stack and the
//!    bounded-step driver with its run/blocked/wait queues.
//! 4. [`memory`] — the refcounted value graph: tagged values, variables,
//!    dual-indexed arrays, sets and functions.
//!
//! A job never holds a native call stack across a suspension point, so it
//! can yield between any two units of evaluation work and resume on the
//! next heartbeat.

pub mod ast;
pub mod event;
pub mod interpreter;
pub mod memory;
