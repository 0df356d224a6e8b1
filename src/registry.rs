// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Fixed-pool session registry.
//
// Ids run 1..=capacity (0 is reserved on the wire for the map service).
// Allocation is first-fit under one registry-wide lock, so the lowest free
// id always wins. Every slot carries a generation counter bumped on release;
// handles remember the generation they were issued under and go stale once
// the slot is recycled.

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Opaque reference to an allocated registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: u8,
    generation: u32,
}

impl SessionHandle {
    /// Wire-level session id (1-based).
    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    value: Option<T>,
    generation: u32,
}

/// Session registry holding one `T` per live session.
pub struct SessionRegistry<T> {
    slots: Mutex<Vec<Slot<T>>>,
}

impl<T> SessionRegistry<T> {
    /// A registry with `capacity` slots (clamped to `1..=255`).
    pub fn new(capacity: usize) -> Self {
        let n = capacity.clamp(1, u8::MAX as usize);
        let slots = (0..n).map(|_| Slot { value: None, generation: 0 }).collect();
        Self { slots: Mutex::new(slots) }
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Bind `value` to the lowest free slot.
    pub fn allocate(&self, value: T) -> Result<SessionHandle> {
        let mut slots = self.slots.lock();
        let (idx, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.value.is_none())
            .ok_or_else(|| Error::exhausted("no free session slot"))?;
        slot.value = Some(value);
        let handle = SessionHandle { id: idx as u8 + 1, generation: slot.generation };
        tracing::debug!(session = handle.id, generation = handle.generation, "session slot allocated");
        Ok(handle)
    }

    /// Same as [`allocate`](Self::allocate) but builds the value from the
    /// handle it is about to receive.
    pub fn allocate_with<F>(&self, make: F) -> Result<(SessionHandle, T)>
    where
        F: FnOnce(SessionHandle) -> Result<T>,
        T: Clone,
    {
        let mut slots = self.slots.lock();
        let idx = slots
            .iter()
            .position(|s| s.value.is_none())
            .ok_or_else(|| Error::exhausted("no free session slot"))?;
        let handle = SessionHandle { id: idx as u8 + 1, generation: slots[idx].generation };
        let value = make(handle)?;
        slots[idx].value = Some(value.clone());
        tracing::debug!(session = handle.id, generation = handle.generation, "session slot allocated");
        Ok((handle, value))
    }

    /// Free the slot, returning its value. A handle from an earlier
    /// generation is rejected with [`Error::StaleHandle`].
    pub fn release(&self, handle: SessionHandle) -> Result<T> {
        let mut slots = self.slots.lock();
        let slot = Self::slot_mut(&mut slots, handle)?;
        let value = slot.value.take().ok_or(Error::StaleHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        tracing::debug!(session = handle.id, "session slot released");
        Ok(value)
    }

    pub fn is_live(&self, handle: SessionHandle) -> bool {
        let mut slots = self.slots.lock();
        Self::slot_mut(&mut slots, handle).map_or(false, |s| s.value.is_some())
    }

    /// Number of occupied slots.
    pub fn live_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.value.is_some()).count()
    }

    fn slot_mut(slots: &mut [Slot<T>], handle: SessionHandle) -> Result<&mut Slot<T>> {
        let idx = (handle.id as usize).checked_sub(1).ok_or(Error::StaleHandle)?;
        let slot = slots.get_mut(idx).ok_or(Error::StaleHandle)?;
        if slot.generation != handle.generation {
            return Err(Error::StaleHandle);
        }
        Ok(slot)
    }
}

impl<T: Clone> SessionRegistry<T> {
    /// The value bound to a live handle.
    pub fn get(&self, handle: SessionHandle) -> Result<T> {
        let mut slots = self.slots.lock();
        Self::slot_mut(&mut slots, handle)?.value.clone().ok_or(Error::StaleHandle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one() {
        let r = SessionRegistry::new(2);
        assert_eq!(r.allocate(()).unwrap().id(), 1);
        assert_eq!(r.allocate(()).unwrap().id(), 2);
    }

    #[test]
    fn generation_bumps_on_release() {
        let r = SessionRegistry::new(1);
        let a = r.allocate(1).unwrap();
        r.release(a).unwrap();
        let b = r.allocate(2).unwrap();
        assert_eq!(a.id(), b.id());
        assert_ne!(a.generation(), b.generation());
        assert_eq!(r.get(a), Err(Error::StaleHandle));
        assert_eq!(r.get(b), Ok(2));
    }

    #[test]
    fn failed_constructor_leaves_slot_free() {
        let r: SessionRegistry<u32> = SessionRegistry::new(1);
        assert!(r.allocate_with(|_| Err(Error::invalid("nope"))).is_err());
        assert_eq!(r.live_count(), 0);
        let (h, v) = r.allocate_with(|h| Ok(h.id() as u32 * 10)).unwrap();
        assert_eq!((h.id(), v), (1, 10));
    }
}
