//! Slot space and its split into reserved (natively compiled) and DSL ranges.
//!
//! Slots `0..reserved` address compiled procedures, `reserved..=max_slot`
//! address DSL procedures held by the store. [`SlotLayout::resolve`] turns a
//! raw slot into a typed [`SlotRef`] once at the boundary; nothing past that
//! point does offset arithmetic.

use std::fmt;

/// Integer index addressing one procedure.
pub type Slot = u8;

pub const DEFAULT_MAX_SLOT: Slot = 255;
pub const DEFAULT_RESERVED_SLOTS: u16 = 0;

/// Terminator of [`SlotList::to_terminated`], distinguishable from every valid slot.
pub const SLOT_SENTINEL: i16 = -1;

/// A slot resolved against a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRef {
    /// Index into the reserved table.
    Compiled(usize),
    /// Index into the DSL table.
    Dsl(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    ReservedExceedsSpace { reserved: u16, max_slot: Slot },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::ReservedExceedsSpace { reserved, max_slot } => write!(
                f,
                "{} reserved slots do not fit in slot space 0..={}",
                reserved, max_slot
            ),
        }
    }
}

impl std::error::Error for LayoutError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    reserved: u16,
    max_slot: Slot,
}

impl Default for SlotLayout {
    fn default() -> Self {
        Self {
            reserved: DEFAULT_RESERVED_SLOTS,
            max_slot: DEFAULT_MAX_SLOT,
        }
    }
}

impl SlotLayout {
    /// `reserved` may equal `max_slot + 1`, leaving no DSL range at all.
    pub fn new(reserved: u16, max_slot: Slot) -> Result<Self, LayoutError> {
        if reserved > max_slot as u16 + 1 {
            return Err(LayoutError::ReservedExceedsSpace { reserved, max_slot });
        }
        Ok(Self { reserved, max_slot })
    }

    pub fn reserved(&self) -> usize {
        self.reserved as usize
    }

    pub fn max_slot(&self) -> Slot {
        self.max_slot
    }

    /// Number of slots addressable as DSL procedures.
    pub fn dsl_capacity(&self) -> usize {
        self.max_slot as usize + 1 - self.reserved as usize
    }

    pub fn is_reserved(&self, slot: Slot) -> bool {
        (slot as u16) < self.reserved
    }

    /// `None` when the slot lies beyond `max_slot`.
    pub fn resolve(&self, slot: Slot) -> Option<SlotRef> {
        if slot > self.max_slot {
            return None;
        }
        let raw = slot as usize;
        if self.is_reserved(slot) {
            Some(SlotRef::Compiled(raw))
        } else {
            Some(SlotRef::Dsl(raw - self.reserved as usize))
        }
    }

    /// Inverse of [`SlotLayout::resolve`].
    pub fn slot_of(&self, slot_ref: SlotRef) -> Slot {
        match slot_ref {
            SlotRef::Compiled(idx) => idx as Slot,
            SlotRef::Dsl(idx) => (idx + self.reserved as usize) as Slot,
        }
    }
}

/// Ascending snapshot of occupied slots, owned by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotList {
    slots: Vec<Slot>,
}

impl SlotList {
    pub(crate) fn from_sorted(slots: Vec<Slot>) -> Self {
        debug_assert!(slots.windows(2).all(|w| w[0] < w[1]));
        Self { slots }
    }

    pub fn as_slice(&self) -> &[Slot] {
        &self.slots
    }

    pub fn iter(&self) -> impl Iterator<Item = Slot> + '_ {
        self.slots.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.slots.binary_search(&slot).is_ok()
    }

    /// Slots followed by [`SLOT_SENTINEL`].
    pub fn to_terminated(&self) -> Vec<i16> {
        let mut out: Vec<i16> = self.slots.iter().map(|s| *s as i16).collect();
        out.push(SLOT_SENTINEL);
        out
    }
}

impl IntoIterator for SlotList {
    type Item = Slot;
    type IntoIter = std::vec::IntoIter<Slot>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.into_iter()
    }
}
