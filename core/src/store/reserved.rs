use std::fmt;
use std::sync::Arc;

use super::StoreError;
use crate::slot::Slot;

/// Status reported when a native body panics.
pub const PANIC_STATUS: i32 = -1;

/// Natively compiled procedure addressed through the reserved slot range.
///
/// Returns a status code, zero meaning success.
#[derive(Clone)]
pub struct CompiledProc {
    name: Arc<str>,
    func: Arc<dyn Fn() -> i32 + Send + Sync>,
}

impl CompiledProc {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn() -> i32 + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self) -> i32 {
        (self.func)()
    }

    /// Run the body on tokio's blocking pool so it never holds a scheduler worker.
    ///
    /// A native body cannot be interrupted. Dropping this future stops the
    /// wait at once; the body itself keeps its thread until it returns.
    pub async fn call_blocking(&self) -> i32 {
        let func = Arc::clone(&self.func);
        match tokio::task::spawn_blocking(move || func()).await {
            Ok(status) => status,
            Err(_) => PANIC_STATUS,
        }
    }

    pub fn ptr_eq(&self, other: &CompiledProc) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for CompiledProc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledProc").field("name", &self.name).finish()
    }
}

/// Process-wide table of compiled procedures, immutable once handed to a store.
#[derive(Debug, Clone, Default)]
pub struct ReservedTable {
    entries: Vec<Option<CompiledProc>>,
}

impl ReservedTable {
    pub fn new(reserved_slots: usize) -> Self {
        Self {
            entries: vec![None; reserved_slots],
        }
    }

    pub fn register(&mut self, slot: Slot, proc: CompiledProc) -> Result<(), StoreError> {
        let len = self.entries.len();
        let entry = self
            .entries
            .get_mut(slot as usize)
            .ok_or(StoreError::NotReserved { slot, reserved: len })?;
        *entry = Some(proc);
        Ok(())
    }

    pub fn with(mut self, slot: Slot, proc: CompiledProc) -> Result<Self, StoreError> {
        self.register(slot, proc)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CompiledProc> {
        self.entries.get(index).and_then(|entry| entry.as_ref())
    }

    pub(crate) fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| entry.as_ref().map(|_| idx))
    }
}
