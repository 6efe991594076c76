pub mod analyze;
pub mod config;
pub mod interp;
pub mod proc;
pub mod rt;
pub mod slot;
pub mod store;

pub use config::ProcConfig;
pub use proc::{Instruction, Procedure};
pub use rt::{ExecId, ProcRuntime, RuntimeError};
pub use slot::Slot;
pub use store::{ProcStore, StoreError};
