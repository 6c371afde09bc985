//! Microphone permission and delete confirmation hooks
//!
//! Both are supplied by the presentation layer. The core asks for microphone
//! access lazily, on the first recording attempt, and asks for confirmation
//! before deleting a slot's clip.

use crate::slot::SlotId;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Current microphone access state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    /// Never asked
    #[default]
    Undetermined,
}

/// Answer to a permission request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionResponse {
    Granted,
    Denied,
}

/// Platform permission boundary
pub trait PermissionGate: Send {
    fn state(&self) -> PermissionState;

    /// Prompt the user; the answer becomes the new state
    fn request(&mut self) -> PermissionResponse;
}

/// Permission gate with a fixed answer to every prompt
#[derive(Clone, Debug)]
pub struct StaticPermission {
    state: PermissionState,
    answer: PermissionResponse,
    requests: usize,
}

impl StaticPermission {
    /// Already granted, never prompts
    pub fn granted() -> Self {
        Self::with_state(PermissionState::Granted, PermissionResponse::Granted)
    }

    /// Already denied, a prompt is refused again
    pub fn denied() -> Self {
        Self::with_state(PermissionState::Denied, PermissionResponse::Denied)
    }

    /// Undetermined until the first prompt, which returns `answer`
    pub fn prompt(answer: PermissionResponse) -> Self {
        Self::with_state(PermissionState::Undetermined, answer)
    }

    fn with_state(state: PermissionState, answer: PermissionResponse) -> Self {
        Self {
            state,
            answer,
            requests: 0,
        }
    }

    /// Number of prompts shown so far
    pub fn requests(&self) -> usize {
        self.requests
    }
}

impl PermissionGate for StaticPermission {
    fn state(&self) -> PermissionState {
        self.state
    }

    fn request(&mut self) -> PermissionResponse {
        self.requests += 1;
        self.state = match self.answer {
            PermissionResponse::Granted => PermissionState::Granted,
            PermissionResponse::Denied => PermissionState::Denied,
        };
        info!("Microphone permission {:?}", self.answer);
        self.answer
    }
}

/// Resolve microphone access, prompting only if it was never asked
///
/// A previous denial is re-prompted, since the user may have changed their
/// mind; an unanswered or refused prompt yields `false`.
pub fn ensure_microphone(gate: &mut dyn PermissionGate) -> bool {
    match gate.state() {
        PermissionState::Granted => true,
        PermissionState::Denied | PermissionState::Undetermined => {
            gate.request() == PermissionResponse::Granted
        }
    }
}

/// Presentation hook consulted before a slot's clip is deleted
pub trait DeleteConfirmer: Send {
    fn confirm_delete(&mut self, slot: SlotId) -> bool;
}

impl<F> DeleteConfirmer for F
where
    F: FnMut(SlotId) -> bool + Send,
{
    fn confirm_delete(&mut self, slot: SlotId) -> bool {
        self(slot)
    }
}

/// Confirms every delete
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysConfirm;

impl DeleteConfirmer for AlwaysConfirm {
    fn confirm_delete(&mut self, _slot: SlotId) -> bool {
        true
    }
}

/// Refuses every delete
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverConfirm;

impl DeleteConfirmer for NeverConfirm {
    fn confirm_delete(&mut self, _slot: SlotId) -> bool {
        false
    }
}
