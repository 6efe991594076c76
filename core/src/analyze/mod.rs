//! Static call-graph analysis run before a DSL procedure executes.
//!
//! The analyzer resolves every procedure reachable through `Call`
//! instructions into a per-run [`AnalysisSession`], marks tail calls, and
//! rejects call cycles that would grow the frame stack without bound.

mod graph;
mod summary;

pub use graph::CallGraphAnalyzer;
pub use summary::*;

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::proc::Procedure;
use crate::slot::Slot;
use crate::store::{CompiledProc, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzeError {
    /// A `Call` targets a slot with nothing in it.
    MissingCallee { caller: Slot, slot: Slot },
    /// A call cycle passes through at least one non-tail call. `cycle` starts and ends on the same slot.
    UnsafeRecursion { cycle: Vec<Slot> },
    Store(StoreError),
}

impl fmt::Display for AnalyzeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyzeError::MissingCallee { caller, slot } => {
                write!(f, "procedure {} calls empty slot {}", caller, slot)
            }
            AnalyzeError::UnsafeRecursion { cycle } => {
                let path: Vec<String> = cycle.iter().map(|s| s.to_string()).collect();
                write!(f, "non-tail recursive call cycle: {}", path.join(" -> "))
            }
            AnalyzeError::Store(err) => write!(f, "store error during analysis: {}", err),
        }
    }
}

impl std::error::Error for AnalyzeError {}

impl From<StoreError> for AnalyzeError {
    fn from(value: StoreError) -> Self {
        AnalyzeError::Store(value)
    }
}

/// A procedure reachable from the analyzed root.
#[derive(Debug, Clone)]
pub enum Callee {
    Compiled(CompiledProc),
    Dsl {
        proc: Arc<Procedure>,
        summary: Arc<ProcSummary>,
    },
}

/// Per-run cache of already analyzed slots, so each slot is fetched and summarized once.
#[derive(Debug, Default)]
pub struct AnalysisSession {
    entries: FxHashMap<Slot, Callee>,
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: Slot) -> Option<&Callee> {
        self.entries.get(&slot)
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.entries.contains_key(&slot)
    }

    pub fn insert(&mut self, slot: Slot, callee: Callee) {
        self.entries.insert(slot, callee);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything the interpreter needs to run one procedure.
#[derive(Debug, Clone)]
pub struct ProcAnalysis {
    root_slot: Slot,
    root: Arc<ProcSummary>,
    callees: FxHashMap<Slot, Callee>,
}

impl ProcAnalysis {
    pub fn root_slot(&self) -> Slot {
        self.root_slot
    }

    pub fn root(&self) -> &Arc<ProcSummary> {
        &self.root
    }

    pub fn callee(&self, slot: Slot) -> Option<&Callee> {
        self.callees.get(&slot)
    }

    /// Reachable callee slots in ascending order.
    pub fn callee_slots(&self) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self.callees.keys().copied().collect();
        slots.sort_unstable();
        slots
    }
}

pub trait Analyzer: Send + Sync {
    /// Analyze `proc`, which is the run's detached copy of `root_slot`.
    fn analyze(
        &self,
        root_slot: Slot,
        proc: Arc<Procedure>,
        session: &mut AnalysisSession,
    ) -> Result<ProcAnalysis, AnalyzeError>;
}
