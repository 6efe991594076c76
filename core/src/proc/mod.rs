//! Procedure data model
//!
//! Passive value types: instructions, operators and the bounded procedure
//! that the store keeps and the runtime detaches before execution.

mod instruction;
mod procedure;

pub use instruction::*;
pub use procedure::*;

#[cfg(test)]
mod proc_test;
