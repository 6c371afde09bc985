//! End-to-end tests for the soundboard session
//!
//! These drive a running orchestrator through its handle, with the simulated
//! engine standing in for audio hardware and an in-memory clip store.

use soundboard::permission::{AlwaysConfirm, StaticPermission};
use soundboard::{
    AppEvent, ClipData, ClipStore, DeleteConfirmer, MemoryClipStore, Orchestrator,
    OrchestratorHandle, Outcome, PermissionGate, RecordingInterruptPolicy, SessionServices,
    SessionStatus, SimulatedEngine, SlotId, SlotPhase, SoundboardConfig, SoundboardError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const S1: SlotId = SlotId::new(1);
const S2: SlotId = SlotId::new(2);
const S3: SlotId = SlotId::new(3);

struct Board {
    handle: OrchestratorHandle,
    engine: SimulatedEngine,
    store: Arc<MemoryClipStore>,
    threads: Vec<JoinHandle<()>>,
}

impl Board {
    fn shutdown(self) -> Arc<MemoryClipStore> {
        self.handle.shutdown().unwrap();
        for thread in self.threads {
            thread.join().unwrap();
        }
        self.store
    }
}

fn start_board(
    config: SoundboardConfig,
    store: Arc<MemoryClipStore>,
    permission: impl PermissionGate + 'static,
    confirmer: impl DeleteConfirmer + 'static,
) -> Board {
    let engine = SimulatedEngine::new();
    let services = SessionServices::new(engine.clone(), permission, confirmer);
    let (orchestrator, handle) =
        Orchestrator::new(config.without_persistence(), services, store.clone()).unwrap();
    let threads = orchestrator.start().unwrap();

    Board {
        handle,
        engine,
        store,
        threads,
    }
}

fn default_board() -> Board {
    start_board(
        SoundboardConfig::new(),
        Arc::new(MemoryClipStore::new()),
        StaticPermission::granted(),
        AlwaysConfirm,
    )
}

fn short_clip() -> ClipData {
    ClipData::new(vec![0.1; 1600], 16000, 1)
}

/// Poll `condition` until it holds or two seconds pass
fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn wait_for_writes(handle: &OrchestratorHandle) {
    assert!(
        wait_until(|| !handle.state().has_pending_writes()),
        "store writes did not complete"
    );
}

/// Record, stop and wait until the clip is stored
fn record_clip(board: &Board, slot: SlotId) {
    assert_eq!(board.handle.press(slot).unwrap(), Outcome::RecordingStarted);
    assert_eq!(board.handle.press(slot).unwrap(), Outcome::RecordingStopped);
    wait_for_writes(&board.handle);
    assert!(board.handle.state().has_clip(slot));
}

/// Walks a three-slot board through record, busy rejection, save and playback
#[test]
fn test_record_then_play_scenario() {
    let board = default_board();
    let state = board.handle.state().clone();

    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStarted);
    assert_eq!(state.slot_phase(S1), Some(SlotPhase::Recording));
    assert_eq!(state.recording_slot(), Some(S1));
    assert_eq!(state.status(), SessionStatus::Recording);

    assert_eq!(board.handle.press(S2).unwrap(), Outcome::Busy);
    assert_eq!(state.slot_phase(S2), Some(SlotPhase::Idle));
    assert_eq!(state.slot_phase(S1), Some(SlotPhase::Recording));
    assert_eq!(state.status(), SessionStatus::Busy);

    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStopped);
    assert_eq!(state.recording_slot(), None);
    wait_for_writes(&board.handle);
    assert!(state.has_clip(S1));
    assert!(board.store.get(S1).unwrap().is_some());

    assert_eq!(board.handle.press(S1).unwrap(), Outcome::PlaybackStarted);
    assert_eq!(state.slot_phase(S1), Some(SlotPhase::PlayingOwnClip));
    assert_eq!(state.status(), SessionStatus::Playing("Recording 1".into()));

    let tokens = board.engine.active_playbacks();
    assert_eq!(tokens.len(), 1);
    assert!(board.engine.finish(tokens[0]));
    assert!(wait_until(|| state.slot_phase(S1) == Some(SlotPhase::Idle)));
    assert!(wait_until(|| state.status() == SessionStatus::Stopped));
    assert!(state.has_clip(S1));
    assert_eq!(state.slot_phase(S3), Some(SlotPhase::Idle));

    board.shutdown();
}

/// A playback finishes exactly once
#[test]
fn test_playback_finishes_once() {
    let board = default_board();
    record_clip(&board, S1);

    assert_eq!(board.handle.press(S1).unwrap(), Outcome::PlaybackStarted);
    let token = board.engine.active_playbacks()[0];
    assert!(board.engine.finish(token));
    assert!(!board.engine.finish(token));
    assert!(wait_until(|| board.handle.state().is_idle()));

    // The slot is free for the next press
    assert_eq!(board.handle.press(S1).unwrap(), Outcome::PlaybackStarted);
    board.shutdown();
}

/// A refused delete keeps the clip; a confirmed one removes it and the next
/// press records
#[test]
fn test_long_press_delete() {
    let store = Arc::new(MemoryClipStore::new());
    store.insert(S1, short_clip());

    let answer = Arc::new(AtomicBool::new(false));
    let confirm = answer.clone();
    let board = start_board(
        SoundboardConfig::new(),
        store,
        StaticPermission::granted(),
        move |_slot: SlotId| confirm.load(Ordering::SeqCst),
    );
    let state = board.handle.state().clone();
    assert!(state.has_clip(S1));

    assert_eq!(board.handle.long_press(S1).unwrap(), Outcome::DeleteCancelled);
    assert!(state.has_clip(S1));
    assert!(board.store.get(S1).unwrap().is_some());

    answer.store(true, Ordering::SeqCst);
    assert_eq!(board.handle.long_press(S1).unwrap(), Outcome::DeleteRequested);
    wait_for_writes(&board.handle);
    assert!(!state.has_clip(S1));
    assert!(board.store.get(S1).unwrap().is_none());

    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStarted);
    board.shutdown();
}

/// Long-press on an empty slot does nothing
#[test]
fn test_long_press_without_clip_is_ignored() {
    let board = default_board();
    assert_eq!(board.handle.long_press(S2).unwrap(), Outcome::Ignored);
    assert_eq!(board.handle.state().slot_phase(S2), Some(SlotPhase::Idle));
    board.shutdown();
}

/// A press on another slot never interrupts the recording
#[test]
fn test_busy_leaves_recording_running() {
    let store = Arc::new(MemoryClipStore::new());
    store.insert(S2, short_clip());
    let board = start_board(
        SoundboardConfig::new(),
        store,
        StaticPermission::granted(),
        AlwaysConfirm,
    );

    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStarted);
    assert_eq!(board.handle.press(S2).unwrap(), Outcome::Busy);
    assert_eq!(board.handle.press(S3).unwrap(), Outcome::Busy);
    assert!(board.engine.is_capturing());
    assert!(board.engine.active_playbacks().is_empty());
    assert_eq!(board.handle.state().recording_slot(), Some(S1));

    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStopped);
    assert_eq!(board.handle.press(S2).unwrap(), Outcome::PlaybackStarted);
    board.shutdown();
}

/// Recording is refused while an effect or another slot is playing
#[test]
fn test_no_recording_while_audio_plays() {
    let store = Arc::new(MemoryClipStore::new());
    store.insert(S2, short_clip());
    let board = start_board(
        SoundboardConfig::new(),
        store,
        StaticPermission::granted(),
        AlwaysConfirm,
    );
    let state = board.handle.state().clone();

    assert_eq!(board.handle.play_effect("Ding").unwrap(), Outcome::EffectStarted);
    assert_eq!(board.handle.press(S1).unwrap(), Outcome::Busy);

    assert_eq!(board.handle.press(S2).unwrap(), Outcome::PlaybackStarted);
    assert_eq!(board.handle.press(S1).unwrap(), Outcome::Busy);
    assert_eq!(state.slot_phase(S1), Some(SlotPhase::Idle));
    assert_eq!(state.slot_phase(S2), Some(SlotPhase::PlayingOwnClip));
    assert_eq!(state.recording_slot(), None);
    assert!(!board.engine.is_capturing());

    // Once the audio has run out the slot records
    for token in board.engine.active_playbacks() {
        board.engine.finish(token);
    }
    assert!(wait_until(|| state.is_idle()));
    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStarted);
    board.shutdown();
}

/// Stop-all ends everything and is a no-op when repeated
#[test]
fn test_stop_all_idempotent() {
    let board = default_board();
    let state = board.handle.state().clone();

    let before = state.snapshot();
    assert_eq!(board.handle.stop_all().unwrap(), Outcome::Ignored);
    assert_eq!(state.snapshot(), before);

    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStarted);
    assert_eq!(board.handle.stop_all().unwrap(), Outcome::Stopped);
    assert!(state.is_idle());
    assert_eq!(state.recording_slot(), None);
    assert_eq!(state.status(), SessionStatus::Stopped);
    assert!(!board.engine.is_capturing());

    let after = state.snapshot();
    assert_eq!(board.handle.stop_all().unwrap(), Outcome::Ignored);
    assert_eq!(state.snapshot(), after);
    board.shutdown();
}

/// Effects play over slot playback and over each other
#[test]
fn test_effects_overlap_playback() {
    let store = Arc::new(MemoryClipStore::new());
    store.insert(S1, short_clip());
    let board = start_board(
        SoundboardConfig::new(),
        store,
        StaticPermission::granted(),
        AlwaysConfirm,
    );

    assert_eq!(board.handle.press(S1).unwrap(), Outcome::PlaybackStarted);
    assert_eq!(board.handle.play_effect("Ding").unwrap(), Outcome::EffectStarted);
    assert_eq!(board.handle.play_effect("Chime").unwrap(), Outcome::EffectStarted);
    assert_eq!(board.engine.active_playbacks().len(), 3);
    assert_eq!(board.handle.status(), SessionStatus::Playing("Chime".into()));
    assert_eq!(
        board.handle.state().slot_phase(S1),
        Some(SlotPhase::PlayingOwnClip)
    );

    assert_eq!(board.handle.stop_all().unwrap(), Outcome::Stopped);
    assert!(board.engine.active_playbacks().is_empty());
    board.shutdown();
}

/// Unknown effect names fail without touching slots
#[test]
fn test_unknown_effect() {
    let board = default_board();
    let outcome = board.handle.play_effect("Airhorn").unwrap();
    assert!(matches!(
        outcome,
        Outcome::Failed(SoundboardError::UnknownEffect(_))
    ));
    assert!(board.handle.state().is_idle());
    board.shutdown();
}

/// With the default policy an effect discards the take in progress
#[test]
fn test_effect_discards_recording() {
    let board = default_board();

    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStarted);
    assert_eq!(board.handle.play_effect("Ding").unwrap(), Outcome::EffectStarted);

    let state = board.handle.state().clone();
    assert_eq!(state.slot_phase(S1), Some(SlotPhase::Idle));
    assert_eq!(state.recording_slot(), None);
    assert!(!state.has_clip(S1));
    assert!(!board.engine.is_capturing());

    let store = board.shutdown();
    assert!(store.is_empty());
}

/// With the save policy an effect keeps the take in progress
#[test]
fn test_effect_saves_recording() {
    let board = start_board(
        SoundboardConfig::new().with_interrupt_policy(RecordingInterruptPolicy::Save),
        Arc::new(MemoryClipStore::new()),
        StaticPermission::granted(),
        AlwaysConfirm,
    );

    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStarted);
    assert_eq!(board.handle.play_effect("Ding").unwrap(), Outcome::EffectStarted);
    wait_for_writes(&board.handle);
    assert!(board.handle.state().has_clip(S1));
    assert!(board.store.get(S1).unwrap().is_some());
    board.shutdown();
}

/// A take still recording at shutdown is saved under the save policy
#[test]
fn test_shutdown_saves_recording() {
    let board = start_board(
        SoundboardConfig::new().with_interrupt_policy(RecordingInterruptPolicy::Save),
        Arc::new(MemoryClipStore::new()),
        StaticPermission::granted(),
        AlwaysConfirm,
    );

    assert_eq!(board.handle.press(S2).unwrap(), Outcome::RecordingStarted);
    let store = board.shutdown();
    assert!(store.get(S2).unwrap().is_some());
}

/// Denied microphone access leaves the slot idle and the lock free
#[test]
fn test_permission_denied() {
    let board = start_board(
        SoundboardConfig::new(),
        Arc::new(MemoryClipStore::new()),
        StaticPermission::denied(),
        AlwaysConfirm,
    );
    let state = board.handle.state().clone();

    let outcome = board.handle.press(S1).unwrap();
    assert_eq!(outcome, Outcome::Failed(SoundboardError::PermissionDenied));
    assert_eq!(state.slot_phase(S1), Some(SlotPhase::Idle));
    assert_eq!(state.recording_slot(), None);
    assert_eq!(
        state.status(),
        SessionStatus::Error("Microphone access is required to record.".into())
    );
    assert!(!board.engine.is_capturing());
    board.shutdown();
}

/// A capture that fails to start leaves the lock free for another slot
#[test]
fn test_capture_failure_releases_lock() {
    let board = default_board();
    board
        .engine
        .fail_next_capture(SoundboardError::CaptureError("no input device".into()));

    assert!(board.handle.press(S1).unwrap().is_failure());
    assert_eq!(board.handle.state().recording_slot(), None);
    assert_eq!(board.handle.press(S2).unwrap(), Outcome::RecordingStarted);
    board.shutdown();
}

/// A failed save drops the take and reports the error
#[test]
fn test_write_failure_reverts() {
    let board = default_board();
    let state = board.handle.state().clone();
    board.store.fail_writes(true);

    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStarted);
    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStopped);
    wait_for_writes(&board.handle);
    assert!(wait_until(|| matches!(state.status(), SessionStatus::Error(_))));
    assert_eq!(
        state.status(),
        SessionStatus::Error("Could not save the recording.".into())
    );
    assert!(!state.has_clip(S1));
    assert_eq!(state.slot_phase(S1), Some(SlotPhase::Idle));

    board.store.fail_writes(false);
    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStarted);
    board.shutdown();
}

/// A press that arrives while the save is pending runs once it lands
#[test]
fn test_press_during_save_is_replayed() {
    let board = default_board();
    let state = board.handle.state().clone();

    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStarted);
    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStopped);
    let outcome = board.handle.press(S1).unwrap();
    assert!(
        matches!(outcome, Outcome::Queued | Outcome::PlaybackStarted),
        "unexpected outcome {:?}",
        outcome
    );
    assert!(wait_until(
        || state.slot_phase(S1) == Some(SlotPhase::PlayingOwnClip)
    ));
    board.shutdown();
}

/// Unknown slots are reported, not panicked on
#[test]
fn test_unknown_slot() {
    let board = default_board();
    let outcome = board.handle.press(SlotId::new(9)).unwrap();
    assert_eq!(
        outcome,
        Outcome::Failed(SoundboardError::UnknownSlot(SlotId::new(9)))
    );
    board.shutdown();
}

/// State changes are announced on the event channel and shutdown is last
#[test]
fn test_events_announce_changes() {
    let board = default_board();
    while board.handle.try_recv_event().is_some() {}

    assert_eq!(board.handle.press(S1).unwrap(), Outcome::RecordingStarted);
    let mut saw_slot = false;
    while let Some(event) = board.handle.recv_event_timeout(Duration::from_millis(200)) {
        if event == AppEvent::SlotUpdated(S1) {
            saw_slot = true;
            break;
        }
    }
    assert!(saw_slot);

    let handle = board.handle.clone();
    board.shutdown();
    let mut last = None;
    while let Some(event) = handle.try_recv_event() {
        last = Some(event);
    }
    assert_eq!(last, Some(AppEvent::Shutdown));
}
