//! Soundboard core
//!
//! A fixed set of preloaded effects plus a fixed number of slots that each
//! record, persist, play back and delete one clip. The pieces, leaf first:
//!
//! - [`store`]: durable slot → clip mapping and its background writer
//! - [`engine`]: the audio engine boundary and a simulated engine
//! - [`controller`]: the per-slot record/playback state machine
//! - [`coordinator`]: the exclusive recording lock, effects and global stop
//! - [`orchestrator`]: the control thread and the handle the UI talks to

pub mod config;
pub mod console;
pub mod controller;
pub mod coordinator;
pub mod effects;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod permission;
pub mod slot;
pub mod state;
pub mod store;

pub use config::{EffectConfig, PermissionSetting, RecordingInterruptPolicy, SoundboardConfig};
pub use controller::{ExclusiveArbiter, Outcome, SlotController, SlotInput};
pub use coordinator::{RecordingLock, SessionCoordinator, SessionServices};
pub use engine::{AudioEngine, ClipData, EngineEvent, SimulatedEngine};
pub use error::{Result, SoundboardError};
pub use orchestrator::{Orchestrator, OrchestratorHandle};
pub use permission::{DeleteConfirmer, PermissionGate, PermissionState};
pub use slot::{SlotId, SlotPhase};
pub use state::{AppEvent, SessionCommand, SessionSnapshot, SessionStatus, SharedSessionState};
pub use store::{ClipRef, ClipStore, FileClipStore, MemoryClipStore};
