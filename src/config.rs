//! Soundboard configuration
//!
//! Loaded from an optional TOML file; every field has a default so a missing
//! or partial file still yields a working board.

use crate::permission::{PermissionResponse, StaticPermission};
use crate::slot::SlotId;
use crate::{Result, SoundboardError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Largest supported number of slots
pub const MAX_SLOTS: u8 = 16;

/// What happens to an in-progress recording when something interrupts it
/// (global stop, or starting an effect)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingInterruptPolicy {
    /// Drop the take; the slot keeps whatever clip it had
    #[default]
    Discard,
    /// Finalize and persist the take as if the slot had been pressed
    Save,
}

/// Microphone permission answer used by the built-in gate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionSetting {
    #[default]
    Granted,
    Denied,
    /// Ask interactively on the first recording
    Prompt,
}

impl PermissionSetting {
    /// Non-interactive gate for this setting
    ///
    /// `Prompt` needs a presentation layer; without one it is granted on the
    /// first request.
    pub fn static_gate(self) -> StaticPermission {
        match self {
            PermissionSetting::Granted => StaticPermission::granted(),
            PermissionSetting::Denied => StaticPermission::denied(),
            PermissionSetting::Prompt => StaticPermission::prompt(PermissionResponse::Granted),
        }
    }
}

/// A bundled sound effect
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectConfig {
    /// Name shown on the button and in "Playing <name>"
    pub name: String,
    /// Path of the audio asset
    pub asset: PathBuf,
}

impl EffectConfig {
    pub fn new(name: impl Into<String>, asset: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            asset: asset.into(),
        }
    }
}

fn default_effects() -> Vec<EffectConfig> {
    vec![
        EffectConfig::new("Cha Ching", "assets/soundfx/01-chaching.mp3"),
        EffectConfig::new("Chime", "assets/soundfx/03-chime.mp3"),
        EffectConfig::new("Ding", "assets/soundfx/02-ding.mp3"),
    ]
}

fn default_data_dir() -> PathBuf {
    let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("soundboard");
    path
}

/// Configuration for the whole board
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundboardConfig {
    /// Number of recordable slots, ids `1..=slot_count`
    pub slot_count: u8,
    /// Root directory of the clip store
    pub data_dir: PathBuf,
    /// Keep clips on disk; when false clips live in memory only
    pub persist: bool,
    /// Bundled effects, in button order
    pub effects: Vec<EffectConfig>,
    pub interrupt_policy: RecordingInterruptPolicy,
    pub permission: PermissionSetting,
    /// Channel buffer size
    pub channel_buffer_size: usize,
    /// Shutdown timeout in milliseconds
    pub shutdown_timeout_ms: u64,
    /// How long a handle call waits for the control thread to answer
    pub reply_timeout_ms: u64,
    /// Playback length used by the simulated engine
    pub simulated_clip_ms: u64,
}

impl Default for SoundboardConfig {
    fn default() -> Self {
        Self {
            slot_count: 3,
            data_dir: default_data_dir(),
            persist: true,
            effects: default_effects(),
            interrupt_policy: RecordingInterruptPolicy::default(),
            permission: PermissionSetting::default(),
            channel_buffer_size: 100,
            shutdown_timeout_ms: 5000,
            reply_timeout_ms: 10_000,
            simulated_clip_ms: 1500,
        }
    }
}

impl SoundboardConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SoundboardError::ConfigError(format!("Failed to read '{}': {}", path.display(), e))
        })?;

        let config: SoundboardConfig = toml::from_str(&content).map_err(|e| {
            SoundboardError::ConfigError(format!("Failed to parse '{}': {}", path.display(), e))
        })?;

        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Slot ids of this board
    pub fn slot_ids(&self) -> Vec<SlotId> {
        SlotId::range(self.slot_count).collect()
    }

    /// Set the number of slots
    pub fn with_slot_count(mut self, count: u8) -> Self {
        self.slot_count = count;
        self
    }

    /// Set the clip store directory
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Keep clips in memory only
    pub fn without_persistence(mut self) -> Self {
        self.persist = false;
        self
    }

    /// Replace the effect set
    pub fn with_effects(mut self, effects: Vec<EffectConfig>) -> Self {
        self.effects = effects;
        self
    }

    /// Set the interrupt policy
    pub fn with_interrupt_policy(mut self, policy: RecordingInterruptPolicy) -> Self {
        self.interrupt_policy = policy;
        self
    }

    /// Set the permission answer
    pub fn with_permission(mut self, permission: PermissionSetting) -> Self {
        self.permission = permission;
        self
    }

    /// Set the channel buffer size
    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }

    /// Set the shutdown timeout
    pub fn with_shutdown_timeout_ms(mut self, timeout: u64) -> Self {
        self.shutdown_timeout_ms = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.slot_count == 0 || self.slot_count > MAX_SLOTS {
            return Err(SoundboardError::ConfigError(format!(
                "slot_count must be between 1 and {}, got {}",
                MAX_SLOTS, self.slot_count
            )));
        }

        if self.channel_buffer_size == 0 {
            return Err(SoundboardError::ConfigError(
                "channel_buffer_size must be positive".to_string(),
            ));
        }

        let mut names = std::collections::HashSet::new();
        for effect in &self.effects {
            if effect.name.trim().is_empty() {
                return Err(SoundboardError::ConfigError(
                    "Effect names must not be empty".to_string(),
                ));
            }
            if !names.insert(effect.name.to_lowercase()) {
                return Err(SoundboardError::ConfigError(format!(
                    "Duplicate effect name: {}",
                    effect.name
                )));
            }
        }

        Ok(())
    }
}
