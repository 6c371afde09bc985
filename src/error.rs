//! Error types for the soundboard
//!
//! Every failure the engine, the clip store or the control loop can report is
//! one variant of [`SoundboardError`]. None of them is fatal: the slot
//! controller converts them into a status string and reverts the transition.

use crate::slot::SlotId;
use thiserror::Error;

/// Soundboard errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SoundboardError {
    /// Microphone access was refused
    #[error("Microphone permission denied")]
    PermissionDenied,

    /// The audio device is in use by another capture or playback
    #[error("Audio device busy")]
    DeviceBusy,

    /// Capture could not be started or finalized
    #[error("Capture error: {0}")]
    CaptureError(String),

    /// Playback of a clip or effect failed to start
    #[error("Playback error: {0}")]
    PlaybackError(String),

    /// The clip store could not persist or remove a record
    #[error("Clip store write failed: {0}")]
    WriteFailed(String),

    /// The clip store failed to initialize or could not be read
    #[error("Clip store unavailable: {0}")]
    StoreUnavailable(String),

    /// The audio engine could not load or play effects
    #[error("Audio engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Slot id outside the configured range
    #[error("Unknown slot: {0}")]
    UnknownSlot(SlotId),

    /// Effect name not in the configured set
    #[error("Unknown effect: {0}")]
    UnknownEffect(String),

    /// Channel communication error
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// File system I/O error
    #[error("IO error: {0}")]
    IOError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for SoundboardError {
    fn from(e: std::io::Error) -> Self {
        SoundboardError::IOError(e.to_string())
    }
}

impl SoundboardError {
    /// Check if this error is recoverable
    ///
    /// Recoverable errors are cleared by the user simply trying again.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // The UI may re-prompt for access
            SoundboardError::PermissionDenied => true,
            SoundboardError::DeviceBusy => true,
            SoundboardError::CaptureError(_) => true,
            SoundboardError::PlaybackError(_) => true,
            SoundboardError::WriteFailed(_) => true,
            // Backing store never came up
            SoundboardError::StoreUnavailable(_) => false,
            SoundboardError::EngineUnavailable(_) => false,
            SoundboardError::UnknownSlot(_) => true,
            SoundboardError::UnknownEffect(_) => true,
            SoundboardError::ChannelError(_) => false,
            SoundboardError::IOError(_) => false,
            SoundboardError::ConfigError(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            SoundboardError::PermissionDenied => {
                "Microphone access is required to record.".to_string()
            }
            SoundboardError::DeviceBusy => "Busy".to_string(),
            SoundboardError::CaptureError(_) => "Recording failed. Please try again.".to_string(),
            SoundboardError::PlaybackError(_) => "Playback failed. Please try again.".to_string(),
            SoundboardError::WriteFailed(_) => "Could not save the recording.".to_string(),
            SoundboardError::StoreUnavailable(_) => "Recordings are unavailable.".to_string(),
            SoundboardError::EngineUnavailable(_) => "Sound effects are unavailable.".to_string(),
            SoundboardError::UnknownSlot(slot) => format!("There is no slot {}.", slot),
            SoundboardError::UnknownEffect(name) => format!("There is no effect '{}'.", name),
            SoundboardError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            SoundboardError::IOError(_) => "File system error occurred.".to_string(),
            SoundboardError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
        }
    }
}

/// Result type alias for soundboard operations
pub type Result<T> = std::result::Result<T, SoundboardError>;
