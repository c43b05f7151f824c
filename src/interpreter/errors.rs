//! Runtime error types for the script runtime
//!
//! This module defines [`RuntimeError`], which represents all errors that can
//! occur while a job executes (as opposed to reactor registration errors or
//! host-integration errors).
//!
//! A runtime error sets a formatted message on the job and unwinds its
//! evaluation stack; an uncaught error destroys the job.

use std::fmt;

/// Runtime errors that can occur during script execution
#[derive(Debug, Clone)]
pub enum RuntimeError {
    /// An operator has no entry for the operand's type
    OperatorUndefined { op: &'static str, ty: &'static str },

    /// A binary operator was applied to an incompatible pair of types
    MixedOperands {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    /// Symbol lookup failed in every scope
    MissingSymbol { name: String },

    /// A call target is neither a function nor a set
    NotCallable { name: String },

    /// Assignment target is not a variable reference
    NotAssignable,

    /// A set or label symbol was used where a value is required
    NotAValue { name: String },

    /// More actual arguments than formal parameters
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    /// Division or modulo by zero
    DivisionByZero,

    /// A value of this type cannot serve as an array key
    InvalidArrayKey { ty: &'static str },

    /// Property access on a non-object value
    NoSuchProperty { ty: &'static str, name: String },

    /// Message channel does not exist for this job
    NoSuchChannel { name: String },

    /// A second value was posted before the previous one was read
    ChannelBusy { name: String },

    /// The per-job open-file budget is exhausted
    OpenFileLimit { limit: usize },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::OperatorUndefined { op, ty } => {
                write!(f, "operator '{}' is not defined for {}", op, ty)
            }
            RuntimeError::MixedOperands { op, left, right } => {
                write!(f, "operator '{}' cannot combine {} and {}", op, left, right)
            }
            RuntimeError::MissingSymbol { name } => {
                write!(f, "undefined symbol '{}'", name)
            }
            RuntimeError::NotCallable { name } => {
                write!(f, "'{}' is not callable", name)
            }
            RuntimeError::NotAssignable => {
                write!(f, "left side of assignment is not assignable")
            }
            RuntimeError::NotAValue { name } => {
                write!(f, "symbol '{}' does not name a value", name)
            }
            RuntimeError::ArityMismatch { name, expected, got } => {
                write!(
                    f,
                    "function '{}' takes {} argument{}, got {}",
                    name,
                    expected,
                    if *expected == 1 { "" } else { "s" },
                    got
                )
            }
            RuntimeError::DivisionByZero => {
                write!(f, "division by zero")
            }
            RuntimeError::InvalidArrayKey { ty } => {
                write!(f, "{} cannot be used as an array key", ty)
            }
            RuntimeError::NoSuchProperty { ty, name } => {
                write!(f, "cannot read property '{}' of {}", name, ty)
            }
            RuntimeError::NoSuchChannel { name } => {
                write!(f, "no message channel named '{}'", name)
            }
            RuntimeError::ChannelBusy { name } => {
                write!(f, "channel '{}' already holds an unread value", name)
            }
            RuntimeError::OpenFileLimit { limit } => {
                write!(f, "open-file budget exhausted (limit {})", limit)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}
