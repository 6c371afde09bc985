//! Per-slot record/playback state machine
//!
//! A [`SlotController`] owns one slot's transitions between Idle, Recording and
//! PlayingOwnClip. It never touches the recording lock directly; it goes
//! through the [`ExclusiveArbiter`] the coordinator lends it for each call.
//!
//! Store writes are asynchronous. While a save or delete for the slot is
//! outstanding, further presses are queued and replayed in order once the
//! write returns, so a press can never act on a clip state that is about to
//! change.

use crate::config::RecordingInterruptPolicy;
use crate::engine::{AudioEngine, PlaybackToken, RecordingHandle, StopTarget};
use crate::permission::{ensure_microphone, DeleteConfirmer, PermissionGate};
use crate::slot::{SlotDisplay, SlotId, SlotPhase, SlotState, SlotView};
use crate::store::{ClipRef, StoreClient};
use crate::{Result, SoundboardError};
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Access to the exclusive recording permit
pub trait ExclusiveArbiter {
    /// Grant the permit unless another slot holds it
    fn request_exclusive(&mut self, slot: SlotId) -> bool;

    /// Give the permit back; no-op if `slot` does not hold it
    fn release(&mut self, slot: SlotId);

    /// Whether a slot other than `slot` holds the permit
    fn is_held_by_other(&self, slot: SlotId) -> bool;
}

/// Collaborators a controller needs to apply one transition
pub struct SlotContext<'a> {
    pub engine: &'a mut dyn AudioEngine,
    pub store: &'a StoreClient,
    pub arbiter: &'a mut dyn ExclusiveArbiter,
    pub permission: &'a mut dyn PermissionGate,
    pub confirmer: &'a mut dyn DeleteConfirmer,
}

/// User input addressed to a slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotInput {
    Press,
    LongPress,
}

/// Result of a command, reported back to the UI
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    RecordingStarted,
    /// Capture stopped; the save is in flight
    RecordingStopped,
    PlaybackStarted,
    EffectStarted,
    /// Confirmed; the delete is in flight
    DeleteRequested,
    DeleteCancelled,
    ClipSaved,
    ClipDeleted,
    /// The slot has a write outstanding; the input runs after it
    Queued,
    /// Another slot is recording, or the device is in use
    Busy,
    /// Nothing to do in the current state
    Ignored,
    Stopped,
    Failed(SoundboardError),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingWrite {
    Save(Uuid),
    Delete(Uuid),
}

/// State machine for one slot
#[derive(Debug)]
pub struct SlotController {
    id: SlotId,
    state: SlotState,
    /// Valid iff the store has confirmed a record for this slot
    clip: Option<ClipRef>,
    pending: Option<PendingWrite>,
    backlog: VecDeque<SlotInput>,
}

impl SlotController {
    /// Controller rehydrated from the store snapshot
    pub fn new(id: SlotId, clip: Option<ClipRef>) -> Self {
        Self {
            id,
            state: SlotState::Idle,
            clip,
            pending: None,
            backlog: VecDeque::new(),
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn phase(&self) -> SlotPhase {
        self.state.phase()
    }

    pub fn has_clip(&self) -> bool {
        self.clip.is_some()
    }

    pub fn clip(&self) -> Option<&ClipRef> {
        self.clip.as_ref()
    }

    pub fn is_write_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_idle()
    }

    pub fn view(&self) -> SlotView {
        let phase = self.phase();
        SlotView {
            id: self.id,
            phase,
            has_clip: self.has_clip(),
            write_pending: self.is_write_pending(),
            display: SlotDisplay::for_slot(self.id, phase, self.has_clip()),
        }
    }

    /// Apply a user input, or queue it behind an outstanding write
    pub fn handle(&mut self, input: SlotInput, ctx: &mut SlotContext<'_>) -> Outcome {
        if self.pending.is_some() {
            debug!("Slot {} has a write outstanding, queueing {:?}", self.id, input);
            self.backlog.push_back(input);
            return Outcome::Queued;
        }

        match input {
            SlotInput::Press => self.press(ctx),
            SlotInput::LongPress => self.long_press(ctx),
        }
    }

    /// Next queued input, once no write is outstanding
    pub fn next_queued(&mut self) -> Option<SlotInput> {
        if self.pending.is_some() {
            return None;
        }
        self.backlog.pop_front()
    }

    /// Drop queued inputs; returns how many were dropped
    pub fn clear_queued(&mut self) -> usize {
        let dropped = self.backlog.len();
        self.backlog.clear();
        dropped
    }

    fn press(&mut self, ctx: &mut SlotContext<'_>) -> Outcome {
        match self.state {
            SlotState::Recording(handle) => self.stop_recording(handle, ctx),
            SlotState::PlayingOwnClip(token) => {
                debug!("Slot {} restarting playback", self.id);
                stop_engine(ctx.engine, StopTarget::Playback(token));
                self.state = SlotState::Idle;
                self.play_clip(ctx)
            }
            SlotState::Idle if self.clip.is_some() => self.play_clip(ctx),
            SlotState::Idle => self.start_recording(ctx),
        }
    }

    fn long_press(&mut self, ctx: &mut SlotContext<'_>) -> Outcome {
        if self.state.is_recording() || self.clip.is_none() {
            return Outcome::Ignored;
        }

        if !ctx.confirmer.confirm_delete(self.id) {
            info!("Delete of slot {} cancelled", self.id);
            return Outcome::DeleteCancelled;
        }

        if let SlotState::PlayingOwnClip(token) = self.state {
            stop_engine(ctx.engine, StopTarget::Playback(token));
            self.state = SlotState::Idle;
        }

        match ctx.store.delete(self.id) {
            Ok(request) => {
                self.pending = Some(PendingWrite::Delete(request));
                Outcome::DeleteRequested
            }
            Err(e) => Outcome::Failed(e),
        }
    }

    fn start_recording(&mut self, ctx: &mut SlotContext<'_>) -> Outcome {
        if !ctx.arbiter.request_exclusive(self.id) {
            debug!("Slot {} cannot record: another slot is recording", self.id);
            return Outcome::Busy;
        }

        if !ensure_microphone(ctx.permission) {
            ctx.arbiter.release(self.id);
            warn!("Slot {} cannot record: microphone permission denied", self.id);
            return Outcome::Failed(SoundboardError::PermissionDenied);
        }

        match ctx.engine.start_capture() {
            Ok(handle) => {
                self.state = SlotState::Recording(handle);
                info!("Slot {} recording", self.id);
                Outcome::RecordingStarted
            }
            Err(e) => {
                ctx.arbiter.release(self.id);
                warn!("Slot {} failed to start capture: {}", self.id, e);
                outcome_for(e)
            }
        }
    }

    fn stop_recording(&mut self, handle: RecordingHandle, ctx: &mut SlotContext<'_>) -> Outcome {
        let captured = ctx.engine.stop_capture(handle);
        self.state = SlotState::Idle;
        ctx.arbiter.release(self.id);

        match captured {
            Ok(clip) => {
                info!(
                    "Slot {} stopped recording ({:.2}s)",
                    self.id,
                    clip.duration_seconds()
                );
                match ctx.store.save(self.id, clip) {
                    Ok(request) => {
                        self.pending = Some(PendingWrite::Save(request));
                        Outcome::RecordingStopped
                    }
                    Err(e) => Outcome::Failed(e),
                }
            }
            Err(e) => {
                warn!("Slot {} failed to finish capture: {}", self.id, e);
                stop_engine(ctx.engine, StopTarget::Capture(handle));
                Outcome::Failed(e)
            }
        }
    }

    fn play_clip(&mut self, ctx: &mut SlotContext<'_>) -> Outcome {
        let Some(clip) = self.clip.as_ref() else {
            return Outcome::Ignored;
        };
        if ctx.arbiter.is_held_by_other(self.id) {
            return Outcome::Busy;
        }

        match ctx.engine.play_clip(clip) {
            Ok(token) => {
                self.state = SlotState::PlayingOwnClip(token);
                info!("Slot {} playing {}", self.id, clip);
                Outcome::PlaybackStarted
            }
            Err(e) => {
                warn!("Slot {} failed to play {}: {}", self.id, clip, e);
                outcome_for(e)
            }
        }
    }

    /// Stop whatever the slot is doing; returns whether it was active
    ///
    /// Always settles in Idle with the permit released, whatever the engine
    /// reports. A recording is saved or dropped according to `policy`.
    pub fn global_stop(
        &mut self,
        ctx: &mut SlotContext<'_>,
        policy: RecordingInterruptPolicy,
    ) -> bool {
        match self.state {
            SlotState::Idle => false,
            SlotState::PlayingOwnClip(token) => {
                stop_engine(ctx.engine, StopTarget::Playback(token));
                self.state = SlotState::Idle;
                true
            }
            SlotState::Recording(handle) => {
                match policy {
                    RecordingInterruptPolicy::Discard => {
                        info!("Slot {} recording discarded", self.id);
                        stop_engine(ctx.engine, StopTarget::Capture(handle));
                        self.state = SlotState::Idle;
                        ctx.arbiter.release(self.id);
                    }
                    RecordingInterruptPolicy::Save => {
                        if let Outcome::Failed(e) = self.stop_recording(handle, ctx) {
                            warn!("Slot {} interrupted take was not saved: {}", self.id, e);
                        }
                    }
                }
                true
            }
        }
    }

    /// Apply an engine finished event; returns whether it was this slot's
    pub fn playback_finished(&mut self, token: PlaybackToken) -> bool {
        if self.state == SlotState::PlayingOwnClip(token) {
            debug!("Slot {} playback finished", self.id);
            self.state = SlotState::Idle;
            true
        } else {
            false
        }
    }

    /// Apply a save completion
    ///
    /// Returns `None` for a completion this slot is not waiting for.
    pub fn save_completed(&mut self, request: Uuid, result: Result<ClipRef>) -> Option<Outcome> {
        if self.pending != Some(PendingWrite::Save(request)) {
            warn!("Slot {} ignoring unexpected save completion {}", self.id, request);
            return None;
        }
        self.pending = None;

        Some(match result {
            Ok(clip) => {
                info!("Slot {} clip saved", self.id);
                self.clip = Some(clip);
                Outcome::ClipSaved
            }
            // The previous clip, if any, is still the stored one
            Err(e) => Outcome::Failed(e),
        })
    }

    /// Apply a delete completion
    ///
    /// Returns `None` for a completion this slot is not waiting for.
    pub fn delete_completed(&mut self, request: Uuid, result: Result<bool>) -> Option<Outcome> {
        if self.pending != Some(PendingWrite::Delete(request)) {
            warn!("Slot {} ignoring unexpected delete completion {}", self.id, request);
            return None;
        }
        self.pending = None;

        Some(match result {
            Ok(existed) => {
                if !existed {
                    debug!("Slot {} had no stored record", self.id);
                }
                self.clip = None;
                Outcome::ClipDeleted
            }
            Err(e) => Outcome::Failed(e),
        })
    }
}

fn stop_engine(engine: &mut dyn AudioEngine, target: StopTarget) {
    if let Err(e) = engine.stop(target) {
        warn!("Engine failed to stop {:?}: {}", target, e);
    }
}

fn outcome_for(error: SoundboardError) -> Outcome {
    match error {
        SoundboardError::DeviceBusy => Outcome::Busy,
        e => Outcome::Failed(e),
    }
}
