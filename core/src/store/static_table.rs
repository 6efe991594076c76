use super::{BackendKind, StoreBackend};
use crate::proc::Procedure;

/// Fixed-size table of procedure values.
///
/// A slot is empty when its procedure holds no instructions. Clearing drops
/// the instructions (and their parameter names) but keeps the slot's buffer,
/// and storing reuses it.
#[derive(Debug)]
pub struct StaticTable {
    slots: Box<[Procedure]>,
}

impl StaticTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Procedure::new(); capacity].into_boxed_slice(),
        }
    }
}

impl StoreBackend for StaticTable {
    fn kind(&self) -> BackendKind {
        BackendKind::Static
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn get(&self, index: usize) -> Option<&Procedure> {
        self.slots.get(index).filter(|proc| !proc.is_empty())
    }

    fn put(&mut self, index: usize, proc: Procedure) {
        if let Some(entry) = self.slots.get_mut(index) {
            entry.refill(proc);
        }
    }

    fn clear(&mut self, index: usize) {
        if let Some(entry) = self.slots.get_mut(index) {
            entry.clear();
        }
    }

    fn occupied(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, proc)| !proc.is_empty())
            .map(|(idx, _)| idx)
            .collect()
    }
}
