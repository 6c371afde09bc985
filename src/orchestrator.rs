//! Control thread for the soundboard
//!
//! The orchestrator owns the [`SessionCoordinator`] and is the only thread
//! that mutates it. It multiplexes three inputs:
//! - commands from the UI (through an [`OrchestratorHandle`])
//! - playback completions from the audio engine
//! - write completions from the store worker
//!
//! After every change it publishes a snapshot to [`SharedSessionState`] and
//! emits an [`AppEvent`] so the presentation layer can repaint.

use crate::config::SoundboardConfig;
use crate::controller::Outcome;
use crate::coordinator::{PlaybackOwner, SessionCoordinator, SessionServices};
use crate::engine::EngineEvent;
use crate::slot::SlotId;
use crate::state::{AppEvent, SessionCommand, SessionStatus, SharedSessionState};
use crate::store::{ClipStore, StoreClient, StoreEvent, StoreWorker};
use crate::{Result, SoundboardError};
use crossbeam_channel::{bounded, never, select, unbounded, Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// A command plus where to send its outcome
struct Request {
    command: SessionCommand,
    reply: Option<Sender<Outcome>>,
}

/// Handle for driving the board from the UI or tests
#[derive(Clone)]
pub struct OrchestratorHandle {
    command_tx: Sender<Request>,
    event_rx: Receiver<AppEvent>,
    state: SharedSessionState,
    reply_timeout: Duration,
}

impl OrchestratorHandle {
    /// Send a command without waiting for its outcome
    pub fn send_command(&self, command: SessionCommand) -> Result<()> {
        self.command_tx
            .send(Request {
                command,
                reply: None,
            })
            .map_err(|e| SoundboardError::ChannelError(format!("Failed to send command: {}", e)))
    }

    /// Send a command and wait for its outcome
    pub fn request(&self, command: SessionCommand) -> Result<Outcome> {
        let (reply_tx, reply_rx) = bounded(1);
        self.command_tx
            .send(Request {
                command,
                reply: Some(reply_tx),
            })
            .map_err(|e| SoundboardError::ChannelError(format!("Failed to send command: {}", e)))?;

        reply_rx
            .recv_timeout(self.reply_timeout)
            .map_err(|e| SoundboardError::ChannelError(format!("No reply from control thread: {}", e)))
    }

    pub fn press(&self, slot: SlotId) -> Result<Outcome> {
        self.request(SessionCommand::Press(slot))
    }

    pub fn long_press(&self, slot: SlotId) -> Result<Outcome> {
        self.request(SessionCommand::LongPress(slot))
    }

    pub fn play_effect(&self, name: &str) -> Result<Outcome> {
        self.request(SessionCommand::PlayEffect(name.to_string()))
    }

    pub fn stop_all(&self) -> Result<Outcome> {
        self.request(SessionCommand::StopAll)
    }

    /// Request shutdown
    pub fn shutdown(&self) -> Result<()> {
        self.send_command(SessionCommand::Shutdown)
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<AppEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an event, giving up after `timeout`
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<AppEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Get the shared session state
    pub fn state(&self) -> &SharedSessionState {
        &self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }
}

/// Owner of the control loop
pub struct Orchestrator {
    config: SoundboardConfig,
    state: SharedSessionState,
    coordinator: SessionCoordinator,
    command_rx: Receiver<Request>,
    event_tx: Sender<AppEvent>,
    engine_rx: Receiver<EngineEvent>,
    store_client: StoreClient,
    store_worker: Option<StoreWorker>,
}

impl Orchestrator {
    /// Build the board: rehydrate slots from `store`, attach the engine and
    /// preload effects
    ///
    /// Nothing runs until [`start`](Self::start) is called.
    pub fn new(
        config: SoundboardConfig,
        mut services: SessionServices,
        store: Arc<dyn ClipStore>,
    ) -> Result<(Self, OrchestratorHandle)> {
        config.validate()?;
        let buffer_size = config.channel_buffer_size;

        let clips = store.load_all(&config.slot_ids());
        info!(
            "Rehydrated {} stored clip(s)",
            clips.values().filter(|clip| clip.is_some()).count()
        );

        let (store_client, store_worker) = StoreWorker::new(store, buffer_size);

        // Unbounded so the engine never blocks on the control thread
        let (engine_tx, engine_rx) = unbounded();
        services.engine.attach(engine_tx);

        let mut coordinator =
            SessionCoordinator::new(&config, clips, services, store_client.clone());
        coordinator.load_effects();

        let state = SharedSessionState::new(coordinator.snapshot());
        let (command_tx, command_rx) = bounded(buffer_size);
        let (event_tx, event_rx) = bounded(buffer_size);

        let handle = OrchestratorHandle {
            command_tx,
            event_rx,
            state: state.clone(),
            reply_timeout: Duration::from_millis(config.reply_timeout_ms),
        };

        let orchestrator = Self {
            config,
            state,
            coordinator,
            command_rx,
            event_tx,
            engine_rx,
            store_client,
            store_worker: Some(store_worker),
        };

        Ok((orchestrator, handle))
    }

    /// Start the store worker and the control loop
    ///
    /// This consumes the orchestrator and returns join handles for both threads.
    pub fn start(mut self) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        let store_worker = self
            .store_worker
            .take()
            .ok_or_else(|| SoundboardError::ChannelError("Store worker already taken".into()))?;
        handles.push(store_worker.start());
        info!("Store worker started");

        handles.push(thread::spawn(move || self.run()));
        info!("Control loop started");

        Ok(handles)
    }

    fn run(mut self) {
        let command_rx = self.command_rx.clone();
        let mut engine_rx = Some(self.engine_rx.clone());
        let mut store_rx = Some(self.store_client.event_receiver());

        loop {
            // A closed source is replaced by a channel that never fires
            let engine_events = engine_rx.clone().unwrap_or_else(never);
            let store_events = store_rx.clone().unwrap_or_else(never);

            select! {
                recv(command_rx) -> request => {
                    match request {
                        Ok(Request { command: SessionCommand::Shutdown, reply }) => {
                            self.shutdown();
                            if let Some(reply) = reply {
                                let _ = reply.send(Outcome::Stopped);
                            }
                            return;
                        }

                        Ok(Request { command, reply }) => {
                            let outcome = self.apply(command);
                            if let Some(reply) = reply {
                                let _ = reply.send(outcome);
                            }
                        }

                        Err(_) => {
                            warn!("Command channel disconnected");
                            break;
                        }
                    }
                }

                recv(engine_events) -> event => {
                    match event {
                        Ok(event) => {
                            if let Some(owner) = self.coordinator.on_engine_event(event) {
                                self.publish();
                                if let PlaybackOwner::Slot(id) = owner {
                                    self.emit(AppEvent::SlotUpdated(id));
                                }
                            }
                        }

                        Err(_) => {
                            warn!("Engine event channel disconnected");
                            engine_rx = None;
                        }
                    }
                }

                recv(store_events) -> event => {
                    match event {
                        Ok(StoreEvent::Shutdown) => {
                            error!("Store worker stopped unexpectedly");
                            store_rx = None;
                        }

                        Ok(event) => {
                            let outcomes = self.coordinator.on_store_event(event);
                            if !outcomes.is_empty() {
                                self.publish();
                                for (id, outcome) in outcomes {
                                    self.report(Some(id), &outcome);
                                }
                            }
                        }

                        Err(_) => {
                            error!("Store event channel disconnected");
                            store_rx = None;
                        }
                    }
                }
            }
        }

        // Every handle is gone; stop cleanly anyway
        self.shutdown();
    }

    fn apply(&mut self, command: SessionCommand) -> Outcome {
        debug!("Applying {:?}", command);
        let (slot, outcome) = match command {
            SessionCommand::Press(id) => (Some(id), self.coordinator.press(id)),
            SessionCommand::LongPress(id) => (Some(id), self.coordinator.long_press(id)),
            SessionCommand::PlayEffect(name) => (None, self.coordinator.play_effect(&name)),
            SessionCommand::StopAll => (None, self.coordinator.stop_all()),
            SessionCommand::Shutdown => (None, Outcome::Ignored),
        };

        if !matches!(outcome, Outcome::Ignored) {
            self.publish();
            self.report(slot, &outcome);
        }
        outcome
    }

    fn shutdown(&mut self) {
        info!("Shutdown requested");
        let store_rx = self.store_client.event_receiver();
        self.coordinator.cancel_queued();
        self.coordinator.stop_all();

        if let Err(e) = self.store_client.shutdown() {
            warn!("Failed to stop store worker: {}", e);
        }

        // Writes already queued still land before the worker acknowledges
        let deadline = Instant::now() + Duration::from_millis(self.config.shutdown_timeout_ms);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("Shutdown timeout reached, forcing exit");
                break;
            }

            match store_rx.recv_timeout(remaining) {
                Ok(StoreEvent::Shutdown) => {
                    debug!("Store worker shutdown confirmed");
                    break;
                }
                Ok(event) => {
                    self.coordinator.on_store_event(event);
                }
                Err(e) => {
                    warn!("Store worker did not confirm shutdown: {}", e);
                    break;
                }
            }
        }

        self.publish();
        self.emit(AppEvent::Shutdown);
        info!("Orchestrator shutdown complete");
    }

    fn publish(&self) {
        self.state.publish(self.coordinator.snapshot());
        self.emit(AppEvent::StateChanged);
    }

    fn report(&self, slot: Option<SlotId>, outcome: &Outcome) {
        if let Some(id) = slot {
            self.emit(AppEvent::SlotUpdated(id));
        }
        if let Outcome::Failed(e) = outcome {
            self.emit(AppEvent::Error(e.user_message()));
        }
    }

    fn emit(&self, event: AppEvent) {
        // The UI may not be draining events; never stall the control thread
        if let Err(TrySendError::Full(event)) = self.event_tx.try_send(event) {
            debug!("Event channel full, dropping {:?}", event);
        }
    }
}
