use std::fmt;

use serde::{Deserialize, Serialize};

use crate::proc::Procedure;

/// Storage strategy behind a [`super::ProcStore`].
///
/// A deployment-time choice; both give the same caller-visible behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Fixed table of procedure values allocated once at init.
    Static,
    /// Table of boxed procedures that grows and shrinks with occupancy.
    #[default]
    Dynamic,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Static => "static",
            BackendKind::Dynamic => "dynamic",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "static" => Some(BackendKind::Static),
            "dynamic" => Some(BackendKind::Dynamic),
            _ => None,
        }
    }

    pub(crate) fn build(self, capacity: usize) -> Box<dyn StoreBackend> {
        match self {
            BackendKind::Static => Box::new(super::StaticTable::new(capacity)),
            BackendKind::Dynamic => Box::new(super::DynamicTable::new(capacity)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// DSL-range table, indexed from zero (the store strips the reserved offset).
///
/// Implementations never see the store lock; the store serializes every call.
pub trait StoreBackend: Send + fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Number of addressable indices.
    fn capacity(&self) -> usize;

    /// Occupied procedure at `index`, `None` when empty.
    fn get(&self, index: usize) -> Option<&Procedure>;

    fn is_occupied(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Store `proc` at `index`, releasing whatever was there.
    fn put(&mut self, index: usize, proc: Procedure);

    /// Release the procedure at `index`. No-op when already empty.
    fn clear(&mut self, index: usize);

    /// Occupied indices in ascending order.
    fn occupied(&self) -> Vec<usize>;

    /// Release everything.
    fn clear_all(&mut self) {
        for index in self.occupied() {
            self.clear(index);
        }
    }
}
