//! Shared soundboard state
//!
//! The control thread is the only writer. It publishes a fresh
//! [`SessionSnapshot`] after every transition; the UI and tests read it from
//! any thread through [`SharedSessionState`] and use [`AppEvent`] only as a
//! repaint trigger.

use crate::effects::EffectView;
use crate::slot::{SlotId, SlotPhase, SlotView};
use parking_lot::RwLock;
use std::sync::Arc;

/// Global status line
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionStatus {
    /// Effects not (all) loaded yet
    #[default]
    Unloaded,
    Loaded,
    Recording,
    /// Playing the named effect or slot clip
    Playing(String),
    Stopped,
    /// The last press was rejected because the device is in use
    Busy,
    /// The last command failed
    Error(String),
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Unloaded => write!(f, "Unloaded"),
            SessionStatus::Loaded => write!(f, "Loaded"),
            SessionStatus::Recording => write!(f, "Recording"),
            SessionStatus::Playing(what) => write!(f, "Playing {}", what),
            SessionStatus::Stopped => write!(f, "Stopped"),
            SessionStatus::Busy => write!(f, "Busy"),
            SessionStatus::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Immutable view of the whole board
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub slots: Vec<SlotView>,
    pub effects: Vec<EffectView>,
    /// Holder of the recording lock
    pub recording_slot: Option<SlotId>,
}

impl SessionSnapshot {
    pub fn slot(&self, id: SlotId) -> Option<&SlotView> {
        self.slots.iter().find(|slot| slot.id == id)
    }

    /// Nothing recording or playing
    pub fn is_idle(&self) -> bool {
        self.slots.iter().all(|slot| slot.phase == SlotPhase::Idle)
            && self.effects.iter().all(|effect| !effect.playing)
    }

    /// Any save or delete still outstanding
    pub fn has_pending_writes(&self) -> bool {
        self.slots.iter().any(|slot| slot.write_pending)
    }
}

/// Thread-safe shared session state
#[derive(Clone, Default)]
pub struct SharedSessionState {
    inner: Arc<RwLock<SessionSnapshot>>,
}

impl SharedSessionState {
    pub fn new(snapshot: SessionSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    /// Get a read lock on the state
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, SessionSnapshot> {
        self.inner.read()
    }

    /// Copy of the current state (no lock held after return)
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().clone()
    }

    pub(crate) fn publish(&self, snapshot: SessionSnapshot) {
        *self.inner.write() = snapshot;
    }

    // === Convenience read methods ===

    pub fn status(&self) -> SessionStatus {
        self.inner.read().status.clone()
    }

    pub fn slot_phase(&self, id: SlotId) -> Option<SlotPhase> {
        self.inner.read().slot(id).map(|slot| slot.phase)
    }

    pub fn has_clip(&self, id: SlotId) -> bool {
        self.inner.read().slot(id).is_some_and(|slot| slot.has_clip)
    }

    pub fn recording_slot(&self) -> Option<SlotId> {
        self.inner.read().recording_slot
    }

    pub fn is_idle(&self) -> bool {
        self.inner.read().is_idle()
    }

    pub fn has_pending_writes(&self) -> bool {
        self.inner.read().has_pending_writes()
    }
}

/// Commands accepted by the control thread
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    Press(SlotId),
    LongPress(SlotId),
    PlayEffect(String),
    StopAll,
    Shutdown,
}

/// Notifications for the presentation layer
///
/// State should be read from [`SharedSessionState`], not rebuilt from events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppEvent {
    /// Something changed (trigger a repaint)
    StateChanged,
    /// A slot's view changed
    SlotUpdated(SlotId),
    /// A command or completion failed
    Error(String),
    /// The control thread has exited
    Shutdown,
}
