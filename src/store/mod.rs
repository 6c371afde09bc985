//! Durable slot → clip mapping
//!
//! A [`ClipStore`] owns the clip references; slots only hold read-only copies.
//! Writes are executed off the control thread by the [`StoreWorker`].

pub mod file;
pub mod memory;
pub mod worker;

pub use file::FileClipStore;
pub use memory::MemoryClipStore;
pub use worker::{StoreClient, StoreCommand, StoreEvent, StoreWorker};

use crate::engine::ClipData;
use crate::slot::SlotId;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Opaque locator of a persisted clip
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipRef(String);

impl ClipRef {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClipRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The durable record kept for a slot that has a clip
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClipRecord {
    pub slot_id: SlotId,
    pub clip_ref: ClipRef,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_secs: f32,
}

impl ClipRecord {
    pub fn new(slot_id: SlotId, clip_ref: ClipRef, clip: &ClipData) -> Self {
        Self {
            slot_id,
            clip_ref,
            recorded_at: Utc::now(),
            duration_secs: clip.duration_seconds(),
        }
    }
}

/// Persistence contract for slot clips
///
/// Operations on different slots are independent. Operations on the same
/// slot are linearized by the implementation.
pub trait ClipStore: Send + Sync {
    /// The slot's clip, `None` when it has no record
    fn get(&self, slot: SlotId) -> Result<Option<ClipRef>>;

    /// Persist a new or replacement clip, atomically superseding the old one
    ///
    /// On failure the previous reference stays intact.
    fn put(&self, slot: SlotId, clip: &ClipData) -> Result<ClipRef>;

    /// Remove the slot's record, returning whether one existed
    fn delete(&self, slot: SlotId) -> Result<bool>;

    /// Audio behind a reference this store handed out
    fn read(&self, clip: &ClipRef) -> Result<ClipData>;

    /// Rehydrate every slot at startup
    ///
    /// A failure on one slot is logged and treated as "no clip" for that slot.
    fn load_all(&self, slots: &[SlotId]) -> BTreeMap<SlotId, Option<ClipRef>> {
        slots
            .iter()
            .map(|&slot| {
                let clip = self.get(slot).unwrap_or_else(|e| {
                    warn!("Failed to load clip for slot {}: {}", slot, e);
                    None
                });
                (slot, clip)
            })
            .collect()
    }
}
