//! Instruction interpreter
//!
//! The runtime hands every DSL execution to an [`Interpreter`] together with
//! its [`ProcAnalysis`]. The interpreter reports a status code that the
//! runtime records but does not act on.

mod local;
mod params;

pub use local::LocalInterpreter;
pub use params::*;

use std::fmt;

use futures::future::BoxFuture;

use crate::analyze::ProcAnalysis;
use crate::proc::Procedure;
use crate::slot::Slot;

/// Status code of a finished execution; zero is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecStatus(pub i32);

impl ExecStatus {
    pub const OK: ExecStatus = ExecStatus(0);

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    pub fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            write!(f, "ok")
        } else {
            write!(f, "failed ({})", self.0)
        }
    }
}

impl From<&InterpError> for ExecStatus {
    fn from(err: &InterpError) -> Self {
        ExecStatus(err.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpError {
    Param(ParamError),
    /// A `Set` literal that is not an integer.
    InvalidLiteral { param: String, value: String },
    DivideByZero { result: String },
    ShiftOutOfRange { amount: i64 },
    BlockTimeout { cond: String, waited_ms: u64 },
    /// A `Call` target missing from the analysis.
    UnresolvedCall { slot: Slot },
    CompiledFailed { slot: Slot, status: i32 },
    RecursionLimit { depth: usize },
}

impl InterpError {
    /// Non-zero status reported for this failure.
    pub fn code(&self) -> i32 {
        match self {
            InterpError::Param(_) => 1,
            InterpError::InvalidLiteral { .. } => 2,
            InterpError::DivideByZero { .. } => 3,
            InterpError::ShiftOutOfRange { .. } => 4,
            InterpError::BlockTimeout { .. } => 5,
            InterpError::UnresolvedCall { .. } => 6,
            InterpError::CompiledFailed { .. } => 7,
            InterpError::RecursionLimit { .. } => 8,
        }
    }
}

impl fmt::Display for InterpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpError::Param(err) => write!(f, "{}", err),
            InterpError::InvalidLiteral { param, value } => {
                write!(f, "cannot assign '{}' to '{}': not an integer", value, param)
            }
            InterpError::DivideByZero { result } => write!(f, "division by zero computing '{}'", result),
            InterpError::ShiftOutOfRange { amount } => write!(f, "shift amount {} out of range", amount),
            InterpError::BlockTimeout { cond, waited_ms } => {
                write!(f, "block on '{}' timed out after {} ms", cond, waited_ms)
            }
            InterpError::UnresolvedCall { slot } => write!(f, "call to slot {} was not analyzed", slot),
            InterpError::CompiledFailed { slot, status } => {
                write!(f, "compiled procedure in slot {} returned {}", slot, status)
            }
            InterpError::RecursionLimit { depth } => write!(f, "maximum call depth {} exceeded", depth),
        }
    }
}

impl std::error::Error for InterpError {}

impl From<ParamError> for InterpError {
    fn from(value: ParamError) -> Self {
        InterpError::Param(value)
    }
}

pub trait Interpreter: Send + Sync {
    /// Run `proc` to completion. Dropping the future cancels the execution at
    /// the next instruction boundary.
    fn execute<'a>(&'a self, proc: &'a Procedure, analysis: &'a ProcAnalysis) -> BoxFuture<'a, ExecStatus>;
}
