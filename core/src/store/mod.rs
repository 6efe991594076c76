//! Slot-indexed procedure store
//!
//! [`ProcStore`] owns every DSL procedure it holds behind one mutex and only
//! exposes whole operations: callers get clones (or a closure-scoped borrow
//! through [`ProcStore::with_proc`]), never a handle into the table. The
//! reserved range is served from an immutable [`ReservedTable`].

mod backend;
mod dynamic_table;
mod reserved;
mod static_table;

pub use backend::*;
pub use dynamic_table::DynamicTable;
pub use reserved::*;
pub use static_table::StaticTable;

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::config::StoreConfig;
use crate::proc::Procedure;
use crate::slot::{LayoutError, Slot, SlotLayout, SlotList, SlotRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Slot beyond the configured slot space.
    OutOfRange { slot: Slot, max_slot: Slot },
    /// DSL operation aimed at a reserved slot.
    Reserved { slot: Slot },
    /// Compiled procedure registered outside the reserved range.
    NotReserved { slot: Slot, reserved: usize },
    /// `set` without overwrite on an occupied slot.
    Occupied { slot: Slot },
    /// Procedures without instructions read as empty and are not stored.
    EmptyProcedure { slot: Slot },
    /// The store mutex was poisoned by a panicking holder.
    Lock,
    Destroyed,
    Layout(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::OutOfRange { slot, max_slot } => {
                write!(f, "slot {} is out of range (max {})", slot, max_slot)
            }
            StoreError::Reserved { slot } => write!(f, "slot {} is reserved for compiled procedures", slot),
            StoreError::NotReserved { slot, reserved } => {
                write!(f, "slot {} is outside the {} reserved slots", slot, reserved)
            }
            StoreError::Occupied { slot } => write!(f, "slot {} is occupied", slot),
            StoreError::EmptyProcedure { slot } => write!(f, "refusing to store an empty procedure in slot {}", slot),
            StoreError::Lock => write!(f, "procedure store lock is poisoned"),
            StoreError::Destroyed => write!(f, "procedure store has been destroyed"),
            StoreError::Layout(msg) => write!(f, "invalid store layout: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<LayoutError> for StoreError {
    fn from(value: LayoutError) -> Self {
        StoreError::Layout(value.to_string())
    }
}

/// Result of resolving a slot.
#[derive(Debug, Clone)]
pub enum Lookup {
    Compiled(CompiledProc),
    /// Private copy of the stored procedure.
    Dsl(Procedure),
    Empty,
}

impl Lookup {
    pub fn is_empty(&self) -> bool {
        matches!(self, Lookup::Empty)
    }

    pub fn as_dsl(&self) -> Option<&Procedure> {
        match self {
            Lookup::Dsl(proc) => Some(proc),
            _ => None,
        }
    }

    pub fn as_compiled(&self) -> Option<&CompiledProc> {
        match self {
            Lookup::Compiled(proc) => Some(proc),
            _ => None,
        }
    }
}

type Table = Option<Box<dyn StoreBackend>>;

#[derive(Debug)]
pub struct ProcStore {
    layout: SlotLayout,
    kind: BackendKind,
    reserved: ReservedTable,
    table: Mutex<Table>,
}

impl ProcStore {
    /// Allocate backend storage for `layout`.
    ///
    /// The reserved table must cover exactly the layout's reserved range.
    pub fn new(layout: SlotLayout, kind: BackendKind, reserved: ReservedTable) -> Result<Self, StoreError> {
        if reserved.len() != layout.reserved() {
            return Err(StoreError::Layout(format!(
                "reserved table has {} entries, layout reserves {}",
                reserved.len(),
                layout.reserved()
            )));
        }

        let backend = kind.build(layout.dsl_capacity());
        debug!(
            target: "procrt::store",
            backend = %kind,
            reserved = layout.reserved(),
            max_slot = layout.max_slot(),
            "procedure store initialized"
        );

        Ok(Self {
            layout,
            kind,
            reserved,
            table: Mutex::new(Some(backend)),
        })
    }

    pub fn from_config(config: &StoreConfig, reserved: ReservedTable) -> Result<Self, StoreError> {
        let layout = SlotLayout::new(config.reserved_slots, config.max_slot)?;
        Self::new(layout, config.backend, reserved)
    }

    pub fn layout(&self) -> SlotLayout {
        self.layout
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    fn lock(&self) -> Result<MutexGuard<'_, Table>, StoreError> {
        self.table.lock().map_err(|_| StoreError::Lock)
    }

    fn dsl_index(&self, slot: Slot) -> Result<usize, StoreError> {
        match self.layout.resolve(slot) {
            Some(SlotRef::Dsl(index)) => Ok(index),
            Some(SlotRef::Compiled(_)) => Err(StoreError::Reserved { slot }),
            None => Err(StoreError::OutOfRange {
                slot,
                max_slot: self.layout.max_slot(),
            }),
        }
    }

    /// Store `proc` at `slot`, returning the slot.
    ///
    /// An occupied slot is replaced only when `overwrite` is set; otherwise the
    /// call fails and the stored value is untouched.
    pub fn set(&self, proc: Procedure, slot: Slot, overwrite: bool) -> Result<Slot, StoreError> {
        let index = self.dsl_index(slot)?;
        if proc.is_empty() {
            return Err(StoreError::EmptyProcedure { slot });
        }

        let mut guard = self.lock()?;
        let table = guard.as_mut().ok_or(StoreError::Destroyed)?;
        if table.is_occupied(index) && !overwrite {
            return Err(StoreError::Occupied { slot });
        }
        table.put(index, proc);
        debug!(target: "procrt::store", slot, overwrite, "procedure stored");
        Ok(slot)
    }

    /// Resolve `slot`. Out-of-range slots resolve to [`Lookup::Empty`].
    pub fn get(&self, slot: Slot) -> Result<Lookup, StoreError> {
        match self.layout.resolve(slot) {
            None => Ok(Lookup::Empty),
            Some(SlotRef::Compiled(index)) => Ok(self
                .reserved
                .get(index)
                .cloned()
                .map_or(Lookup::Empty, Lookup::Compiled)),
            Some(SlotRef::Dsl(index)) => {
                let guard = self.lock()?;
                let table = guard.as_ref().ok_or(StoreError::Destroyed)?;
                Ok(table.get(index).cloned().map_or(Lookup::Empty, Lookup::Dsl))
            }
        }
    }

    /// Borrow the DSL procedure at `slot` for the duration of `f`, under the store lock.
    ///
    /// Reserved and out-of-range slots yield `None`.
    pub fn with_proc<R>(&self, slot: Slot, f: impl FnOnce(Option<&Procedure>) -> R) -> Result<R, StoreError> {
        let guard = self.lock()?;
        let table = guard.as_ref().ok_or(StoreError::Destroyed)?;
        let proc = match self.layout.resolve(slot) {
            Some(SlotRef::Dsl(index)) => table.get(index),
            _ => None,
        };
        Ok(f(proc))
    }

    /// Release the procedure at `slot`. Deleting an empty slot is not an error.
    pub fn delete(&self, slot: Slot) -> Result<(), StoreError> {
        let index = self.dsl_index(slot)?;
        let mut guard = self.lock()?;
        let table = guard.as_mut().ok_or(StoreError::Destroyed)?;
        if table.is_occupied(index) {
            table.clear(index);
            debug!(target: "procrt::store", slot, "procedure deleted");
        }
        Ok(())
    }

    /// Delete every DSL procedure. Compiled entries are not owned and stay.
    pub fn reset(&self) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let table = guard.as_mut().ok_or(StoreError::Destroyed)?;
        table.clear_all();
        debug!(target: "procrt::store", "procedure store reset");
        Ok(())
    }

    /// Tear down DSL storage. Every later operation reports [`StoreError::Destroyed`].
    pub fn destroy(&self) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if let Some(mut table) = guard.take() {
            table.clear_all();
        }
        debug!(target: "procrt::store", "procedure store destroyed");
        Ok(())
    }

    /// Snapshot of occupied slots in ascending order.
    pub fn get_slots(&self) -> Result<SlotList, StoreError> {
        let guard = self.lock()?;
        let table = guard.as_ref().ok_or(StoreError::Destroyed)?;

        let mut slots: Vec<Slot> = self
            .reserved
            .occupied()
            .map(|index| self.layout.slot_of(SlotRef::Compiled(index)))
            .collect();
        slots.extend(
            table
                .occupied()
                .into_iter()
                .map(|index| self.layout.slot_of(SlotRef::Dsl(index))),
        );
        Ok(SlotList::from_sorted(slots))
    }
}
