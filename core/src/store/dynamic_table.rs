use super::{BackendKind, StoreBackend};
use crate::proc::Procedure;

/// Table of boxed procedures.
///
/// The backing vector only extends to the highest occupied index: it grows on
/// `put` and is truncated past the last occupied entry on `clear`.
#[derive(Debug)]
pub struct DynamicTable {
    slots: Vec<Option<Box<Procedure>>>,
    capacity: usize,
}

impl DynamicTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
        }
    }

    /// Length of the backing vector.
    #[cfg(test)]
    pub(crate) fn allocated(&self) -> usize {
        self.slots.len()
    }

    fn shrink_tail(&mut self) {
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        if self.slots.capacity() > self.slots.len() * 2 {
            self.slots.shrink_to_fit();
        }
    }
}

impl StoreBackend for DynamicTable {
    fn kind(&self) -> BackendKind {
        BackendKind::Dynamic
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn get(&self, index: usize) -> Option<&Procedure> {
        self.slots.get(index).and_then(|entry| entry.as_deref())
    }

    fn put(&mut self, index: usize, proc: Procedure) {
        if index >= self.capacity {
            return;
        }
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index] = Some(Box::new(proc));
    }

    fn clear(&mut self, index: usize) {
        if let Some(entry) = self.slots.get_mut(index) {
            *entry = None;
        }
        self.shrink_tail();
    }

    fn occupied(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| entry.as_ref().map(|_| idx))
            .collect()
    }

    fn clear_all(&mut self) {
        self.slots.clear();
        self.slots.shrink_to_fit();
    }
}
