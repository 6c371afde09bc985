//! Background executor for clip store writes
//!
//! The control thread never waits on disk. It sends a [`StoreCommand`] through
//! the [`StoreClient`] and later receives the matching [`StoreEvent`], which
//! carries the request id so a stale completion can be told apart.

use super::{ClipRef, ClipStore};
use crate::engine::ClipData;
use crate::slot::SlotId;
use crate::{Result, SoundboardError};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Commands accepted by the store worker
#[derive(Debug)]
pub enum StoreCommand {
    /// Persist a clip for a slot
    Save {
        request: Uuid,
        slot: SlotId,
        clip: ClipData,
    },
    /// Remove a slot's clip
    Delete { request: Uuid, slot: SlotId },
    /// Stop the worker
    Shutdown,
}

/// Completions emitted by the store worker
#[derive(Clone, Debug)]
pub enum StoreEvent {
    Saved {
        request: Uuid,
        slot: SlotId,
        result: Result<ClipRef>,
    },
    Deleted {
        request: Uuid,
        slot: SlotId,
        result: Result<bool>,
    },
    /// Worker has shut down
    Shutdown,
}

/// Sending side used by the control thread
#[derive(Clone)]
pub struct StoreClient {
    command_tx: Sender<StoreCommand>,
    event_rx: Receiver<StoreEvent>,
}

impl StoreClient {
    /// Queue a save, returning its request id
    pub fn save(&self, slot: SlotId, clip: ClipData) -> Result<Uuid> {
        let request = Uuid::new_v4();
        self.command_tx
            .send(StoreCommand::Save {
                request,
                slot,
                clip,
            })
            .map_err(|e| SoundboardError::ChannelError(format!("Failed to send save: {}", e)))?;
        Ok(request)
    }

    /// Queue a delete, returning its request id
    pub fn delete(&self, slot: SlotId) -> Result<Uuid> {
        let request = Uuid::new_v4();
        self.command_tx
            .send(StoreCommand::Delete { request, slot })
            .map_err(|e| SoundboardError::ChannelError(format!("Failed to send delete: {}", e)))?;
        Ok(request)
    }

    /// Request shutdown
    pub fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(StoreCommand::Shutdown)
            .map_err(|e| SoundboardError::ChannelError(format!("Failed to send shutdown: {}", e)))
    }

    /// Get a receiver for completions
    pub fn event_receiver(&self) -> Receiver<StoreEvent> {
        self.event_rx.clone()
    }
}

/// Worker that executes store commands in a dedicated thread
pub struct StoreWorker {
    store: Arc<dyn ClipStore>,
    command_rx: Receiver<StoreCommand>,
    event_tx: Sender<StoreEvent>,
}

impl StoreWorker {
    /// Create the client/worker pair
    ///
    /// The worker does nothing until [`start`](Self::start) is called.
    /// Completions are unbounded: the worker must never block on a control
    /// thread that is itself blocked sending the next command.
    pub fn new(store: Arc<dyn ClipStore>, buffer_size: usize) -> (StoreClient, StoreWorker) {
        let (command_tx, command_rx) = bounded(buffer_size);
        let (event_tx, event_rx) = unbounded();

        let client = StoreClient {
            command_tx,
            event_rx,
        };
        let worker = StoreWorker {
            store,
            command_rx,
            event_tx,
        };

        (client, worker)
    }

    /// Start the worker thread
    pub fn start(self) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    fn run(self) {
        info!("Store worker starting");

        loop {
            match self.command_rx.recv() {
                Ok(StoreCommand::Save {
                    request,
                    slot,
                    clip,
                }) => {
                    debug!("Saving clip for slot {} ({:.2}s)", slot, clip.duration_seconds());
                    let result = self.store.put(slot, &clip);
                    if let Err(e) = &result {
                        error!("Save for slot {} failed: {}", slot, e);
                    }
                    if let Err(e) = self.event_tx.send(StoreEvent::Saved {
                        request,
                        slot,
                        result,
                    }) {
                        error!("Failed to send save completion: {}", e);
                        break;
                    }
                }

                Ok(StoreCommand::Delete { request, slot }) => {
                    debug!("Deleting clip for slot {}", slot);
                    let result = self.store.delete(slot);
                    if let Err(e) = &result {
                        error!("Delete for slot {} failed: {}", slot, e);
                    }
                    if let Err(e) = self.event_tx.send(StoreEvent::Deleted {
                        request,
                        slot,
                        result,
                    }) {
                        error!("Failed to send delete completion: {}", e);
                        break;
                    }
                }

                Ok(StoreCommand::Shutdown) => {
                    info!("Store worker received shutdown command");
                    let _ = self.event_tx.send(StoreEvent::Shutdown);
                    break;
                }

                Err(e) => {
                    error!("Store command channel error: {}", e);
                    break;
                }
            }
        }

        info!("Store worker stopped");
    }
}
