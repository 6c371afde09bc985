//! Session coordinator
//!
//! Owns every slot controller, the effect channels and the single exclusive
//! recording permit. All user input and all asynchronous completions are
//! applied here, on the control thread, so no two transitions of a slot can
//! interleave.

use crate::config::{RecordingInterruptPolicy, SoundboardConfig};
use crate::controller::{ExclusiveArbiter, Outcome, SlotContext, SlotController, SlotInput};
use crate::effects::EffectChannel;
use crate::engine::{AudioEngine, EngineEvent};
use crate::permission::{DeleteConfirmer, PermissionGate};
use crate::slot::{SlotDisplay, SlotId};
use crate::state::{SessionSnapshot, SessionStatus};
use crate::store::{ClipRef, StoreClient, StoreEvent};
use crate::SoundboardError;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// The exclusive recording permit
///
/// At most one slot holds it; holding it is what "recording in progress"
/// means for the whole board.
#[derive(Debug, Default)]
pub struct RecordingLock {
    holder: Option<SlotId>,
}

impl RecordingLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self) -> Option<SlotId> {
        self.holder
    }
}

impl ExclusiveArbiter for RecordingLock {
    fn request_exclusive(&mut self, slot: SlotId) -> bool {
        match self.holder {
            Some(holder) => holder == slot,
            None => {
                self.holder = Some(slot);
                debug!("Recording lock granted to slot {}", slot);
                true
            }
        }
    }

    fn release(&mut self, slot: SlotId) {
        if self.holder == Some(slot) {
            self.holder = None;
            debug!("Recording lock released by slot {}", slot);
        }
    }

    fn is_held_by_other(&self, slot: SlotId) -> bool {
        self.holder.is_some_and(|holder| holder != slot)
    }
}

/// External collaborators of a session
pub struct SessionServices {
    pub engine: Box<dyn AudioEngine>,
    pub permission: Box<dyn PermissionGate>,
    pub confirmer: Box<dyn DeleteConfirmer>,
}

impl SessionServices {
    pub fn new(
        engine: impl AudioEngine + 'static,
        permission: impl PermissionGate + 'static,
        confirmer: impl DeleteConfirmer + 'static,
    ) -> Self {
        Self {
            engine: Box::new(engine),
            permission: Box::new(permission),
            confirmer: Box::new(confirmer),
        }
    }
}

/// Who a finished playback belonged to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackOwner {
    Effect(String),
    Slot(SlotId),
}

/// Board-wide state machine
pub struct SessionCoordinator {
    slots: Vec<SlotController>,
    effects: Vec<EffectChannel>,
    lock: RecordingLock,
    engine: Box<dyn AudioEngine>,
    store: StoreClient,
    permission: Box<dyn PermissionGate>,
    confirmer: Box<dyn DeleteConfirmer>,
    policy: RecordingInterruptPolicy,
    status: SessionStatus,
}

impl SessionCoordinator {
    /// Build the board from the persisted clip snapshot
    ///
    /// Effects are not loaded yet; call [`load_effects`](Self::load_effects).
    /// The engine must already be attached to the event channel.
    pub fn new(
        config: &SoundboardConfig,
        clips: BTreeMap<SlotId, Option<ClipRef>>,
        services: SessionServices,
        store: StoreClient,
    ) -> Self {
        let slots = config
            .slot_ids()
            .into_iter()
            .map(|id| SlotController::new(id, clips.get(&id).cloned().flatten()))
            .collect();
        let effects = config.effects.iter().map(EffectChannel::new).collect();

        Self {
            slots,
            effects,
            lock: RecordingLock::new(),
            engine: services.engine,
            store,
            permission: services.permission,
            confirmer: services.confirmer,
            policy: config.interrupt_policy,
            status: SessionStatus::Unloaded,
        }
    }

    /// Preload every effect; returns how many loaded
    ///
    /// Status becomes `Loaded` only if all of them did. Slots work either way.
    pub fn load_effects(&mut self) -> usize {
        let mut loaded = 0;
        for effect in &mut self.effects {
            match effect.load(self.engine.as_mut()) {
                Ok(()) => loaded += 1,
                Err(e) => warn!("Effect '{}' unavailable: {}", effect.name(), e),
            }
        }

        if loaded == self.effects.len() {
            info!("Loaded {} effects", loaded);
            self.status = SessionStatus::Loaded;
        } else {
            warn!("Loaded {} of {} effects", loaded, self.effects.len());
        }
        loaded
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn slot(&self, id: SlotId) -> Option<&SlotController> {
        self.slots.iter().find(|slot| slot.id() == id)
    }

    /// Slot currently holding the recording permit
    pub fn recording_slot(&self) -> Option<SlotId> {
        self.lock.holder()
    }

    pub fn has_pending_writes(&self) -> bool {
        self.slots.iter().any(SlotController::is_write_pending)
    }

    /// Any effect or slot playing or recording
    pub fn is_active(&self) -> bool {
        self.slots.iter().any(SlotController::is_active)
            || self.effects.iter().any(EffectChannel::is_playing)
    }

    pub fn request_exclusive(&mut self, slot: SlotId) -> bool {
        self.lock.request_exclusive(slot)
    }

    pub fn release(&mut self, slot: SlotId) {
        self.lock.release(slot)
    }

    pub fn press(&mut self, slot: SlotId) -> Outcome {
        self.dispatch(slot, SlotInput::Press)
    }

    pub fn long_press(&mut self, slot: SlotId) -> Outcome {
        self.dispatch(slot, SlotInput::LongPress)
    }

    /// Play an effect, interrupting any recording first
    pub fn play_effect(&mut self, name: &str) -> Outcome {
        let Some(index) = self.effects.iter().position(|effect| effect.matches(name)) else {
            return self.fail(SoundboardError::UnknownEffect(name.trim().to_string()));
        };
        if !self.effects[index].is_loaded() {
            return self.fail(SoundboardError::EngineUnavailable(format!(
                "Effect '{}' is not loaded",
                self.effects[index].name()
            )));
        }

        if let Some(holder) = self.lock.holder() {
            info!(
                "Effect '{}' interrupts recording on slot {}",
                self.effects[index].name(),
                holder
            );
            let policy = self.policy;
            self.with_slot(holder, |slot, ctx| slot.global_stop(ctx, policy));
        }

        let effect = &mut self.effects[index];
        match effect.play(self.engine.as_mut()) {
            Ok(_) => {
                info!("Playing effect '{}'", effect.name());
                self.status = SessionStatus::Playing(effect.name().to_string());
                Outcome::EffectStarted
            }
            Err(e) => {
                warn!("Effect '{}' failed to play: {}", effect.name(), e);
                self.fail(e)
            }
        }
    }

    /// Stop every effect, playback and recording
    ///
    /// With nothing active this changes nothing and returns `Ignored`.
    pub fn stop_all(&mut self) -> Outcome {
        let mut stopped = 0;
        for effect in &mut self.effects {
            if effect.stop(self.engine.as_mut()) {
                stopped += 1;
            }
        }

        let policy = self.policy;
        for id in self.slot_ids() {
            if self.with_slot(id, |slot, ctx| slot.global_stop(ctx, policy)) == Some(true) {
                stopped += 1;
            }
        }

        if stopped == 0 {
            debug!("Stop all: nothing active");
            return Outcome::Ignored;
        }

        info!("Stopped {} active channel(s)", stopped);
        self.status = SessionStatus::Stopped;
        Outcome::Stopped
    }

    /// Fold an engine completion into slot and effect state
    ///
    /// Returns `None` for a stale token.
    pub fn on_engine_event(&mut self, event: EngineEvent) -> Option<PlaybackOwner> {
        let EngineEvent::Finished(token) = event;

        let owner = if let Some(effect) = self
            .effects
            .iter_mut()
            .find_map(|e| e.finished(token).then_some(e))
        {
            debug!("Effect '{}' finished", effect.name());
            PlaybackOwner::Effect(effect.name().to_string())
        } else if let Some(slot) = self
            .slots
            .iter_mut()
            .find_map(|s| s.playback_finished(token).then_some(s))
        {
            PlaybackOwner::Slot(slot.id())
        } else {
            debug!("Ignoring finished event for stale {:?}", token);
            return None;
        };

        if !self.is_active() {
            self.status = SessionStatus::Stopped;
        }
        Some(owner)
    }

    /// Fold a store completion into its slot, then replay the slot's queue
    ///
    /// Returns every outcome produced, completion first.
    pub fn on_store_event(&mut self, event: StoreEvent) -> Vec<(SlotId, Outcome)> {
        let (id, completion) = match event {
            StoreEvent::Saved {
                request,
                slot,
                result,
            } => (
                slot,
                self.with_slot(slot, |s, _| s.save_completed(request, result)),
            ),
            StoreEvent::Deleted {
                request,
                slot,
                result,
            } => (
                slot,
                self.with_slot(slot, |s, _| s.delete_completed(request, result)),
            ),
            StoreEvent::Shutdown => return Vec::new(),
        };

        let Some(Some(outcome)) = completion else {
            return Vec::new();
        };
        if let Outcome::Failed(e) = &outcome {
            self.status = SessionStatus::Error(e.user_message());
        }

        let mut outcomes = vec![(id, outcome)];
        while let Some(input) = self.with_slot(id, |s, _| s.next_queued()).flatten() {
            debug!("Slot {} replaying queued {:?}", id, input);
            outcomes.push((id, self.dispatch(id, input)));
        }
        outcomes
    }

    /// Forget every queued input so nothing new starts
    pub fn cancel_queued(&mut self) {
        for slot in &mut self.slots {
            let dropped = slot.clear_queued();
            if dropped > 0 {
                debug!("Slot {} dropped {} queued input(s)", slot.id(), dropped);
            }
        }
    }

    /// Current view for the presentation layer
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status.clone(),
            slots: self.slots.iter().map(SlotController::view).collect(),
            effects: self.effects.iter().map(EffectChannel::view).collect(),
            recording_slot: self.lock.holder(),
        }
    }

    fn slot_ids(&self) -> Vec<SlotId> {
        self.slots.iter().map(SlotController::id).collect()
    }

    fn dispatch(&mut self, id: SlotId, input: SlotInput) -> Outcome {
        let Some(outcome) = self.with_slot(id, |slot, ctx| slot.handle(input, ctx)) else {
            return self.fail(SoundboardError::UnknownSlot(id));
        };

        match &outcome {
            Outcome::RecordingStarted => self.status = SessionStatus::Recording,
            Outcome::RecordingStopped => self.status = SessionStatus::Stopped,
            Outcome::PlaybackStarted => {
                self.status = SessionStatus::Playing(SlotDisplay::HasClip(id).label())
            }
            Outcome::Busy => self.status = SessionStatus::Busy,
            Outcome::Failed(e) => self.status = SessionStatus::Error(e.user_message()),
            _ => {}
        }
        outcome
    }

    fn fail(&mut self, error: SoundboardError) -> Outcome {
        self.status = SessionStatus::Error(error.user_message());
        Outcome::Failed(error)
    }

    /// Run `f` on one slot with the collaborators it needs
    fn with_slot<R>(
        &mut self,
        id: SlotId,
        f: impl FnOnce(&mut SlotController, &mut SlotContext<'_>) -> R,
    ) -> Option<R> {
        let Self {
            slots,
            lock,
            engine,
            store,
            permission,
            confirmer,
            ..
        } = self;

        let slot = slots.iter_mut().find(|slot| slot.id() == id)?;
        let mut ctx = SlotContext {
            engine: engine.as_mut(),
            store: &*store,
            arbiter: lock,
            permission: permission.as_mut(),
            confirmer: confirmer.as_mut(),
        };
        Some(f(slot, &mut ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EffectConfig;
    use crate::engine::SimulatedEngine;
    use crate::permission::{AlwaysConfirm, StaticPermission};
    use crate::slot::SlotPhase;
    use crate::store::{MemoryClipStore, StoreWorker};
    use crossbeam_channel::{unbounded, Receiver};
    use std::sync::Arc;
    use std::time::Duration;

    struct Board {
        coordinator: SessionCoordinator,
        engine: SimulatedEngine,
        engine_events: Receiver<EngineEvent>,
        store_events: Receiver<StoreEvent>,
    }

    fn board(policy: RecordingInterruptPolicy) -> Board {
        let config = SoundboardConfig::new()
            .without_persistence()
            .with_interrupt_policy(policy)
            .with_effects(vec![
                EffectConfig::new("Ding", "ding.mp3"),
                EffectConfig::new("Chime", "chime.mp3"),
            ]);
        let store = Arc::new(MemoryClipStore::new());
        let (client, worker) = StoreWorker::new(store, 16);
        worker.start();
        let store_events = client.event_receiver();

        let (tx, engine_events) = unbounded();
        let mut engine = SimulatedEngine::new();
        engine.attach(tx);

        let services = SessionServices::new(
            engine.clone(),
            StaticPermission::granted(),
            AlwaysConfirm,
        );
        let mut coordinator = SessionCoordinator::new(&config, BTreeMap::new(), services, client);
        coordinator.load_effects();

        Board {
            coordinator,
            engine,
            engine_events,
            store_events,
        }
    }

    impl Board {
        fn settle(&mut self) -> Vec<(SlotId, Outcome)> {
            let event = self
                .store_events
                .recv_timeout(Duration::from_secs(2))
                .expect("store completion");
            self.coordinator.on_store_event(event)
        }
    }

    #[test]
    fn test_lock_grants_one_holder() {
        let mut lock = RecordingLock::new();
        assert!(lock.request_exclusive(SlotId::new(1)));
        assert!(lock.request_exclusive(SlotId::new(1)));
        assert!(!lock.request_exclusive(SlotId::new(2)));
        assert!(lock.is_held_by_other(SlotId::new(2)));

        lock.release(SlotId::new(2));
        assert_eq!(lock.holder(), Some(SlotId::new(1)));
        lock.release(SlotId::new(1));
        lock.release(SlotId::new(1));
        assert_eq!(lock.holder(), None);
    }

    #[test]
    fn test_effects_loaded_status() {
        let b = board(RecordingInterruptPolicy::Discard);
        assert_eq!(b.coordinator.status(), &SessionStatus::Loaded);
    }

    #[test]
    fn test_failed_effect_load_keeps_unloaded() {
        let config = SoundboardConfig::new().without_persistence();
        let store = Arc::new(MemoryClipStore::new());
        let (client, _worker) = StoreWorker::new(store, 4);
        let engine = SimulatedEngine::new();
        engine.fail_effect_loads(true);

        let services = SessionServices::new(engine, StaticPermission::granted(), AlwaysConfirm);
        let mut coordinator = SessionCoordinator::new(&config, BTreeMap::new(), services, client);

        assert_eq!(coordinator.load_effects(), 0);
        assert_eq!(coordinator.status(), &SessionStatus::Unloaded);
        assert!(matches!(
            coordinator.play_effect("Ding"),
            Outcome::Failed(SoundboardError::EngineUnavailable(_))
        ));
        assert_eq!(coordinator.press(SlotId::new(1)), Outcome::RecordingStarted);
    }

    #[test]
    fn test_unknown_slot_and_effect() {
        let mut b = board(RecordingInterruptPolicy::Discard);
        assert_eq!(
            b.coordinator.press(SlotId::new(9)),
            Outcome::Failed(SoundboardError::UnknownSlot(SlotId::new(9)))
        );
        assert_eq!(
            b.coordinator.play_effect("airhorn"),
            Outcome::Failed(SoundboardError::UnknownEffect("airhorn".into()))
        );
        assert_eq!(
            b.coordinator.status(),
            &SessionStatus::Error("There is no effect 'airhorn'.".into())
        );
    }

    #[test]
    fn test_stop_all_without_activity_is_noop() {
        let mut b = board(RecordingInterruptPolicy::Discard);
        let before = b.coordinator.snapshot();
        assert_eq!(b.coordinator.stop_all(), Outcome::Ignored);
        assert_eq!(b.coordinator.snapshot(), before);
        assert_eq!(b.engine.stop_calls(), 0);
    }

    #[test]
    fn test_effects_play_concurrently_and_restart() {
        let mut b = board(RecordingInterruptPolicy::Discard);
        assert_eq!(b.coordinator.play_effect("ding"), Outcome::EffectStarted);
        assert_eq!(b.coordinator.play_effect("Chime"), Outcome::EffectStarted);
        assert_eq!(b.engine.active_playbacks().len(), 2);
        assert_eq!(
            b.coordinator.status(),
            &SessionStatus::Playing("Chime".into())
        );

        assert_eq!(b.coordinator.play_effect("Ding"), Outcome::EffectStarted);
        assert_eq!(b.engine.active_playbacks().len(), 2);

        assert_eq!(b.coordinator.stop_all(), Outcome::Stopped);
        assert!(b.engine.active_playbacks().is_empty());
        assert!(!b.coordinator.is_active());
        assert_eq!(b.coordinator.status(), &SessionStatus::Stopped);
    }

    #[test]
    fn test_effect_interrupts_recording() {
        let mut b = board(RecordingInterruptPolicy::Discard);
        b.coordinator.press(SlotId::new(1));
        assert_eq!(b.coordinator.recording_slot(), Some(SlotId::new(1)));

        assert_eq!(b.coordinator.play_effect("Ding"), Outcome::EffectStarted);
        assert_eq!(b.coordinator.recording_slot(), None);
        assert!(!b.engine.is_capturing());
        let slot = b.coordinator.slot(SlotId::new(1)).unwrap();
        assert_eq!(slot.phase(), SlotPhase::Idle);
        assert!(!slot.is_write_pending());
    }

    #[test]
    fn test_effect_interrupt_saves_take() {
        let mut b = board(RecordingInterruptPolicy::Save);
        b.coordinator.press(SlotId::new(2));
        b.coordinator.play_effect("Ding");

        assert!(b.coordinator.has_pending_writes());
        assert_eq!(b.settle(), vec![(SlotId::new(2), Outcome::ClipSaved)]);
        assert!(b.coordinator.slot(SlotId::new(2)).unwrap().has_clip());
    }

    #[test]
    fn test_finished_events() {
        let mut b = board(RecordingInterruptPolicy::Discard);
        b.coordinator.play_effect("Ding");
        let token = b.engine.active_playbacks()[0];
        assert!(b.engine.finish(token));

        let event = b.engine_events.try_recv().unwrap();
        assert_eq!(
            b.coordinator.on_engine_event(event.clone()),
            Some(PlaybackOwner::Effect("Ding".into()))
        );
        assert_eq!(b.coordinator.status(), &SessionStatus::Stopped);
        assert_eq!(b.coordinator.on_engine_event(event), None);
    }

    #[test]
    fn test_slot_playback_finished() {
        let mut b = board(RecordingInterruptPolicy::Discard);
        let slot = SlotId::new(2);
        b.coordinator.press(slot);
        b.coordinator.press(slot);
        b.settle();

        assert_eq!(b.coordinator.press(slot), Outcome::PlaybackStarted);
        let token = b.engine.active_playbacks()[0];
        assert!(b.engine.finish(token));

        let event = b.engine_events.try_recv().unwrap();
        assert_eq!(
            b.coordinator.on_engine_event(event.clone()),
            Some(PlaybackOwner::Slot(slot))
        );
        assert_eq!(
            b.coordinator.slot(slot).unwrap().phase(),
            SlotPhase::Idle
        );
        assert_eq!(b.coordinator.on_engine_event(event), None);
    }

    #[test]
    fn test_no_recording_while_audio_plays() {
        let mut b = board(RecordingInterruptPolicy::Discard);
        let (empty, other) = (SlotId::new(1), SlotId::new(2));
        b.coordinator.press(other);
        b.coordinator.press(other);
        b.settle();

        assert_eq!(b.coordinator.play_effect("Ding"), Outcome::EffectStarted);
        assert_eq!(b.coordinator.press(empty), Outcome::Busy);
        assert_eq!(b.coordinator.status(), &SessionStatus::Busy);

        assert_eq!(b.coordinator.press(other), Outcome::PlaybackStarted);
        assert_eq!(b.coordinator.press(empty), Outcome::Busy);
        assert_eq!(b.coordinator.recording_slot(), None);
        assert!(!b.engine.is_capturing());
        assert_eq!(
            b.coordinator.slot(empty).unwrap().phase(),
            SlotPhase::Idle
        );

        assert_eq!(b.coordinator.stop_all(), Outcome::Stopped);
        assert_eq!(b.coordinator.press(empty), Outcome::RecordingStarted);
    }

    #[test]
    fn test_queued_press_replays_after_save() {
        let mut b = board(RecordingInterruptPolicy::Discard);
        let slot = SlotId::new(1);
        b.coordinator.press(slot);
        assert_eq!(b.coordinator.press(slot), Outcome::RecordingStopped);
        assert_eq!(b.coordinator.press(slot), Outcome::Queued);

        let outcomes = b.settle();
        assert_eq!(
            outcomes,
            vec![(slot, Outcome::ClipSaved), (slot, Outcome::PlaybackStarted)]
        );
        assert_eq!(
            b.coordinator.status(),
            &SessionStatus::Playing("Recording 1".into())
        );
    }
}
