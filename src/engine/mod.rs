//! Audio engine boundary
//!
//! The engine performs the actual capture and playback. The core only sees
//! the [`AudioEngine`] trait: short synchronous calls that return handles, plus
//! [`EngineEvent`] completions delivered over a channel to the control thread.

#[cfg(feature = "audio-io")]
pub mod device;
pub mod simulated;

#[cfg(feature = "audio-io")]
pub use device::DeviceEngine;
pub use simulated::SimulatedEngine;

use crate::store::ClipRef;
use crate::Result;
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Handle of a preloaded effect
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EffectHandle(pub usize);

/// Completion token of a started playback
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlaybackToken(pub u64);

/// Handle of an in-progress capture
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordingHandle(pub u64);

/// What [`AudioEngine::stop`] should stop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopTarget {
    Playback(PlaybackToken),
    /// Stops and discards a capture
    Capture(RecordingHandle),
}

/// Asynchronous notifications from the engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// Playback ran to its end. Never sent for playback stopped via `stop`.
    Finished(PlaybackToken),
}

/// Captured audio handed from the engine to the clip store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipData {
    /// Interleaved samples in `-1.0..=1.0`
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl ClipData {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / (self.sample_rate as f32 * self.channels as f32)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Capture and playback primitives consumed by the slot controllers
///
/// Every call returns once the engine has acted on it; `stop` returning `Ok`
/// is the engine's acknowledgement. `stop` must be safe to call on a handle
/// whose start is still settling and on handles that already finished.
pub trait AudioEngine: Send {
    /// Give the engine the channel it reports completions on
    fn attach(&mut self, events: Sender<EngineEvent>);

    /// Preload a bundled effect
    fn load_effect(&mut self, name: &str, asset: &Path) -> Result<EffectHandle>;

    /// Play a preloaded effect from the start
    fn play_effect(&mut self, effect: EffectHandle) -> Result<PlaybackToken>;

    /// Start microphone capture
    fn start_capture(&mut self) -> Result<RecordingHandle>;

    /// Finish a capture and return what was recorded
    fn stop_capture(&mut self, handle: RecordingHandle) -> Result<ClipData>;

    /// Play a persisted clip
    fn play_clip(&mut self, clip: &ClipRef) -> Result<PlaybackToken>;

    /// Stop a playback or discard a capture
    fn stop(&mut self, target: StopTarget) -> Result<()>;
}
