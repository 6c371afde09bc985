//! Device-free audio engine
//!
//! Behaves like a real engine at the boundary (handles, tokens, completion
//! events, capture/playback exclusivity) without touching audio hardware.
//! Clones share state, so a test can keep a clone to complete playbacks and
//! inject faults while the coordinator owns the boxed engine.

use super::{
    AudioEngine, ClipData, EffectHandle, EngineEvent, PlaybackToken, RecordingHandle, StopTarget,
};
use crate::store::ClipRef;
use crate::{Result, SoundboardError};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sample rate of synthesized captures
const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Shortest capture the engine produces, in milliseconds
const MIN_CAPTURE_MS: u128 = 100;

/// What a playback token is playing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimulatedPlayback {
    Effect(String),
    Clip(ClipRef),
}

#[derive(Default)]
struct SimState {
    next_id: u64,
    events: Option<Sender<EngineEvent>>,
    effects: Vec<String>,
    capture: Option<(RecordingHandle, Instant)>,
    playbacks: HashMap<PlaybackToken, SimulatedPlayback>,
    auto_finish: Option<Duration>,
    require_assets: bool,
    fail_effect_loads: bool,
    next_capture_error: Option<SoundboardError>,
    next_stop_capture_error: Option<SoundboardError>,
    next_play_error: Option<SoundboardError>,
    stop_calls: usize,
}

impl SimState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Simulated engine with manual or timed playback completion
#[derive(Clone, Default)]
pub struct SimulatedEngine {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatedEngine {
    /// Engine whose playbacks only finish when [`finish`](Self::finish) is called
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose playbacks finish on their own after `duration`
    pub fn with_auto_finish(duration: Duration) -> Self {
        let engine = Self::new();
        engine.inner.lock().auto_finish = Some(duration);
        engine
    }

    /// Refuse to load effects whose asset file does not exist
    pub fn require_assets(self, require: bool) -> Self {
        self.inner.lock().require_assets = require;
        self
    }

    /// Make every subsequent `load_effect` fail
    pub fn fail_effect_loads(&self, fail: bool) {
        self.inner.lock().fail_effect_loads = fail;
    }

    /// Make the next `start_capture` fail with `error`
    pub fn fail_next_capture(&self, error: SoundboardError) {
        self.inner.lock().next_capture_error = Some(error);
    }

    /// Make the next `stop_capture` fail with `error`
    pub fn fail_next_stop_capture(&self, error: SoundboardError) {
        self.inner.lock().next_stop_capture_error = Some(error);
    }

    /// Make the next `play_effect` or `play_clip` fail with `error`
    pub fn fail_next_play(&self, error: SoundboardError) {
        self.inner.lock().next_play_error = Some(error);
    }

    /// Complete a playback as if it ran to its end
    ///
    /// Returns false if the token is not playing (already finished or stopped).
    pub fn finish(&self, token: PlaybackToken) -> bool {
        finish_playback(&self.inner, token)
    }

    /// Tokens currently playing
    pub fn active_playbacks(&self) -> Vec<PlaybackToken> {
        self.inner.lock().playbacks.keys().copied().collect()
    }

    /// What a token is playing, if it is still active
    pub fn playback(&self, token: PlaybackToken) -> Option<SimulatedPlayback> {
        self.inner.lock().playbacks.get(&token).cloned()
    }

    /// Token of the active playback of `clip`, if any
    pub fn playing_clip(&self, clip: &ClipRef) -> Option<PlaybackToken> {
        self.inner
            .lock()
            .playbacks
            .iter()
            .find(|(_, playback)| matches!(playback, SimulatedPlayback::Clip(c) if c == clip))
            .map(|(token, _)| *token)
    }

    pub fn is_capturing(&self) -> bool {
        self.inner.lock().capture.is_some()
    }

    /// Number of `stop` calls received
    pub fn stop_calls(&self) -> usize {
        self.inner.lock().stop_calls
    }

    fn start_playback(&mut self, playback: SimulatedPlayback) -> Result<PlaybackToken> {
        let mut state = self.inner.lock();

        if let Some(error) = state.next_play_error.take() {
            return Err(error);
        }
        // Capture and playback share the device
        if state.capture.is_some() {
            return Err(SoundboardError::DeviceBusy);
        }

        let token = PlaybackToken(state.next_id());
        debug!("Simulated playback {:?} started: {:?}", token, playback);
        state.playbacks.insert(token, playback);

        if let Some(duration) = state.auto_finish {
            let inner = Arc::clone(&self.inner);
            thread::spawn(move || {
                thread::sleep(duration);
                finish_playback(&inner, token);
            });
        }

        Ok(token)
    }
}

fn finish_playback(inner: &Mutex<SimState>, token: PlaybackToken) -> bool {
    let mut state = inner.lock();
    if state.playbacks.remove(&token).is_none() {
        return false;
    }
    if let Some(events) = &state.events {
        if let Err(e) = events.send(EngineEvent::Finished(token)) {
            warn!("Failed to deliver finished event for {:?}: {}", token, e);
        }
    }
    true
}

/// Quiet 440 Hz tone standing in for microphone input
fn synthesize_capture(elapsed: Duration) -> ClipData {
    let millis = elapsed.as_millis().max(MIN_CAPTURE_MS);
    let frames = (CAPTURE_SAMPLE_RATE as u128 * millis / 1000) as usize;
    let samples = (0..frames)
        .map(|i| {
            let t = i as f32 / CAPTURE_SAMPLE_RATE as f32;
            (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.1
        })
        .collect();
    ClipData::new(samples, CAPTURE_SAMPLE_RATE, 1)
}

impl AudioEngine for SimulatedEngine {
    fn attach(&mut self, events: Sender<EngineEvent>) {
        self.inner.lock().events = Some(events);
    }

    fn load_effect(&mut self, name: &str, asset: &Path) -> Result<EffectHandle> {
        let mut state = self.inner.lock();
        if state.fail_effect_loads {
            return Err(SoundboardError::EngineUnavailable(format!(
                "Cannot load effect '{}'",
                name
            )));
        }
        if state.require_assets && !asset.exists() {
            return Err(SoundboardError::EngineUnavailable(format!(
                "Effect asset not found: {}",
                asset.display()
            )));
        }
        state.effects.push(name.to_string());
        Ok(EffectHandle(state.effects.len() - 1))
    }

    fn play_effect(&mut self, effect: EffectHandle) -> Result<PlaybackToken> {
        let name = self
            .inner
            .lock()
            .effects
            .get(effect.0)
            .cloned()
            .ok_or_else(|| SoundboardError::PlaybackError(format!("No effect {:?}", effect)))?;
        self.start_playback(SimulatedPlayback::Effect(name))
    }

    fn start_capture(&mut self) -> Result<RecordingHandle> {
        let mut state = self.inner.lock();
        if let Some(error) = state.next_capture_error.take() {
            return Err(error);
        }
        // Capture and playback share the device, in both directions
        if state.capture.is_some() || !state.playbacks.is_empty() {
            return Err(SoundboardError::DeviceBusy);
        }
        let handle = RecordingHandle(state.next_id());
        state.capture = Some((handle, Instant::now()));
        debug!("Simulated capture {:?} started", handle);
        Ok(handle)
    }

    fn stop_capture(&mut self, handle: RecordingHandle) -> Result<ClipData> {
        let mut state = self.inner.lock();
        let started = match state.capture {
            Some((active, started)) if active == handle => started,
            _ => {
                return Err(SoundboardError::CaptureError(format!(
                    "{:?} is not capturing",
                    handle
                )))
            }
        };
        state.capture = None;
        if let Some(error) = state.next_stop_capture_error.take() {
            return Err(error);
        }
        Ok(synthesize_capture(started.elapsed()))
    }

    fn play_clip(&mut self, clip: &ClipRef) -> Result<PlaybackToken> {
        self.start_playback(SimulatedPlayback::Clip(clip.clone()))
    }

    fn stop(&mut self, target: StopTarget) -> Result<()> {
        let mut state = self.inner.lock();
        state.stop_calls += 1;
        match target {
            StopTarget::Playback(token) => {
                state.playbacks.remove(&token);
            }
            StopTarget::Capture(handle) => {
                if matches!(state.capture, Some((active, _)) if active == handle) {
                    state.capture = None;
                }
            }
        }
        Ok(())
    }
}
