/// Block: the finest shard. Owns a map of slots keyed by slot key.
///
/// Each Block has its own lock, so requests for keys that route to different
/// Blocks never contend. Slots live in a `BTreeMap` so iteration is always in
/// slot-key order, which is what makes [`Block::checksum`] independent of
/// insertion order.
use ident::{Checksum, Id};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// The logical key the slot was written under (kept for listing).
    pub key: String,
    pub value: Vec<u8>,
    /// Unix seconds; 0 means never.
    pub expires: u64,
}

impl Slot {
    pub fn new(key: impl Into<String>, value: Vec<u8>, expires: u64) -> Self {
        Self {
            key: key.into(),
            value,
            expires,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires != 0 && self.expires <= now
    }
}

pub struct Block {
    id: Id,
    slots: RwLock<BTreeMap<String, Slot>>,
    /// Set on every mutation, cleared when the block is written back.
    dirty: AtomicBool,
}

impl Block {
    /// Creates an empty block.
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self::with_slots(id, BTreeMap::new())
    }

    /// Creates a block pre-filled with `slots` (e.g. read from its data file).
    #[must_use]
    pub fn with_slots(id: Id, slots: BTreeMap<String, Slot>) -> Self {
        Self {
            id,
            slots: RwLock::new(slots),
            dirty: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> &Id {
        &self.id
    }

    // slot maps hold plain data, so a panic elsewhere cannot leave them torn
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Slot>> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Slot>> {
        self.slots.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the live slot stored under `slot_key`.
    #[must_use]
    pub fn get(&self, slot_key: &str, now: u64) -> Option<Slot> {
        self.read()
            .get(slot_key)
            .filter(|s| !s.is_expired(now))
            .cloned()
    }

    /// Inserts or overwrites a slot.
    pub fn set(&self, slot_key: String, slot: Slot) {
        let mut slots = self.write();
        slots.insert(slot_key, slot);
        self.dirty.store(true, Ordering::Release);
    }

    /// Removes a slot, returning `true` if it existed and was live.
    pub fn del(&self, slot_key: &str, now: u64) -> bool {
        let mut slots = self.write();
        match slots.remove(slot_key) {
            Some(old) => {
                self.dirty.store(true, Ordering::Release);
                !old.is_expired(now)
            }
            None => false,
        }
    }

    /// Drops every expired slot, returning how many were removed.
    pub fn evict_expired(&self, now: u64) -> usize {
        let mut slots = self.write();
        let before = slots.len();
        slots.retain(|_, s| !s.is_expired(now));
        let evicted = before - slots.len();
        if evicted > 0 {
            self.dirty.store(true, Ordering::Release);
        }
        evicted
    }

    /// Logical keys of live slots starting with `prefix`.
    #[must_use]
    pub fn keys_with_prefix(&self, prefix: &str, now: u64) -> Vec<String> {
        self.read()
            .values()
            .filter(|s| !s.is_expired(now) && s.key.starts_with(prefix))
            .map(|s| s.key.clone())
            .collect()
    }

    /// Number of slots, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Content hash over all slots.
    ///
    /// Slots are fed to the hasher in slot-key order with every field
    /// length-prefixed, so equal contents give equal checksums no matter how
    /// they were inserted, and any change to a key, value or expiry changes
    /// the result. The block id is not part of the hash.
    #[must_use]
    pub fn checksum(&self) -> Checksum {
        let slots = self.read();
        let mut h = blake3::Hasher::new();
        h.update(&(slots.len() as u64).to_le_bytes());
        for (slot_key, slot) in slots.iter() {
            for field in [slot_key.as_bytes(), slot.key.as_bytes(), slot.value.as_slice()] {
                h.update(&(field.len() as u64).to_le_bytes());
                h.update(field);
            }
            h.update(&slot.expires.to_le_bytes());
        }
        h.finalize().into()
    }

    /// Copies the current slots out, in slot-key order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Slot)> {
        self.read()
            .iter()
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect()
    }

    /// Replaces all slots (used when loading the block's data file).
    pub fn replace_slots(&self, slots: BTreeMap<String, Slot>) {
        *self.write() = slots;
        self.dirty.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Clears the dirty flag, returning whether it was set.
    ///
    /// Write-back calls this *before* taking its snapshot so that a mutation
    /// racing with the write sets the flag again.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Re-marks the block dirty after a failed write-back.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("slots", &self.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
