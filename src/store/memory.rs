//! In-process clip store
//!
//! Same contract as the file store, without durability. Supports fault
//! injection so failure paths can be exercised.

use super::{ClipRef, ClipStore};
use crate::engine::ClipData;
use crate::slot::SlotId;
use crate::{Result, SoundboardError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Clip store backed by a map
#[derive(Default)]
pub struct MemoryClipStore {
    records: RwLock<HashMap<SlotId, (ClipRef, ClipData)>>,
    // Serializes put/delete per slot
    slot_locks: Mutex<HashMap<SlotId, std::sync::Arc<Mutex<()>>>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryClipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put`/`delete` fail with `WriteFailed`
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `get` fail with `StoreUnavailable`
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Seed a record directly, bypassing the write path
    pub fn insert(&self, slot: SlotId, clip: ClipData) -> ClipRef {
        let clip_ref = ClipRef::new(format!("mem://slot-{}/{}", slot, Uuid::new_v4()));
        self.records.write().insert(slot, (clip_ref.clone(), clip));
        clip_ref
    }

    /// Clip data stored for a slot
    pub fn clip_data(&self, slot: SlotId) -> Option<ClipData> {
        self.records.read().get(&slot).map(|(_, data)| data.clone())
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn slot_lock(&self, slot: SlotId) -> std::sync::Arc<Mutex<()>> {
        self.slot_locks.lock().entry(slot).or_default().clone()
    }

    fn check_writable(&self, slot: SlotId) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SoundboardError::WriteFailed(format!(
                "Write rejected for slot {}",
                slot
            )));
        }
        Ok(())
    }
}

impl ClipStore for MemoryClipStore {
    fn get(&self, slot: SlotId) -> Result<Option<ClipRef>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SoundboardError::StoreUnavailable(format!(
                "Read rejected for slot {}",
                slot
            )));
        }
        Ok(self.records.read().get(&slot).map(|(clip_ref, _)| clip_ref.clone()))
    }

    fn put(&self, slot: SlotId, clip: &ClipData) -> Result<ClipRef> {
        let lock = self.slot_lock(slot);
        let _guard = lock.lock();
        self.check_writable(slot)?;

        let clip_ref = ClipRef::new(format!("mem://slot-{}/{}", slot, Uuid::new_v4()));
        self.records
            .write()
            .insert(slot, (clip_ref.clone(), clip.clone()));
        Ok(clip_ref)
    }

    fn delete(&self, slot: SlotId) -> Result<bool> {
        let lock = self.slot_lock(slot);
        let _guard = lock.lock();
        self.check_writable(slot)?;
        Ok(self.records.write().remove(&slot).is_some())
    }

    fn read(&self, clip: &ClipRef) -> Result<ClipData> {
        self.records
            .read()
            .values()
            .find(|(clip_ref, _)| clip_ref == clip)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| SoundboardError::StoreUnavailable(format!("No clip at {}", clip)))
    }
}
