//! Slot identity and per-slot state
//!
//! A slot is one record/playback unit. Its state is a single enum carrying the
//! engine handle of whatever it is doing, so "recording without a capture" or
//! "playing without a token" cannot be represented.

use crate::engine::{PlaybackToken, RecordingHandle};
use serde::{Deserialize, Serialize};

/// Identifier of a recordable slot, `1..=slot_count`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(u8);

impl SlotId {
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// All ids for a board with `count` slots
    pub fn range(count: u8) -> impl Iterator<Item = SlotId> {
        (1..=count).map(SlotId)
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SlotId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u8>().map(SlotId)
    }
}

/// Live state of a slot, including the engine handle it owns
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing in progress
    #[default]
    Idle,
    /// Capturing into the given engine recording
    Recording(RecordingHandle),
    /// Playing the slot's own clip
    PlayingOwnClip(PlaybackToken),
}

impl SlotState {
    pub fn phase(&self) -> SlotPhase {
        match self {
            SlotState::Idle => SlotPhase::Idle,
            SlotState::Recording(_) => SlotPhase::Recording,
            SlotState::PlayingOwnClip(_) => SlotPhase::PlayingOwnClip,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SlotState::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, SlotState::Recording(_))
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, SlotState::PlayingOwnClip(_))
    }
}

/// Handle-free view of [`SlotState`] for snapshots and assertions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum SlotPhase {
    #[default]
    Idle,
    Recording,
    PlayingOwnClip,
}

impl std::fmt::Display for SlotPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotPhase::Idle => write!(f, "Idle"),
            SlotPhase::Recording => write!(f, "Recording"),
            SlotPhase::PlayingOwnClip => write!(f, "Playing"),
        }
    }
}

/// What the slot's button should show
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotDisplay {
    /// Empty slot, pressing records
    Record,
    /// Recording, pressing stops
    Stop,
    /// Slot holds a clip, pressing plays it
    HasClip(SlotId),
}

impl SlotDisplay {
    pub fn for_slot(id: SlotId, phase: SlotPhase, has_clip: bool) -> Self {
        match phase {
            SlotPhase::Recording => SlotDisplay::Stop,
            _ if has_clip => SlotDisplay::HasClip(id),
            _ => SlotDisplay::Record,
        }
    }

    pub fn label(&self) -> String {
        match self {
            SlotDisplay::Record => "Record".to_string(),
            SlotDisplay::Stop => "Stop".to_string(),
            SlotDisplay::HasClip(id) => format!("Recording {}", id),
        }
    }
}

/// Read-only slot view published to the UI
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotView {
    pub id: SlotId,
    pub phase: SlotPhase,
    pub has_clip: bool,
    /// A save or delete for this slot has not returned yet
    pub write_pending: bool,
    pub display: SlotDisplay,
}
