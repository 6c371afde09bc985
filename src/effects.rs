//! Preloaded effect channels

use crate::config::EffectConfig;
use crate::engine::{AudioEngine, EffectHandle, PlaybackToken, StopTarget};
use crate::{Result, SoundboardError};
use std::path::PathBuf;
use tracing::{debug, warn};

/// One bundled effect and its playing flag
#[derive(Debug)]
pub struct EffectChannel {
    name: String,
    asset: PathBuf,
    handle: Option<EffectHandle>,
    playing: Option<PlaybackToken>,
}

impl EffectChannel {
    pub fn new(config: &EffectConfig) -> Self {
        Self {
            name: config.name.clone(),
            asset: config.asset.clone(),
            handle: None,
            playing: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-insensitive name match
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.trim())
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.is_some()
    }

    /// Preload through the engine
    pub fn load(&mut self, engine: &mut dyn AudioEngine) -> Result<()> {
        let handle = engine.load_effect(&self.name, &self.asset)?;
        debug!("Loaded effect '{}' from {}", self.name, self.asset.display());
        self.handle = Some(handle);
        Ok(())
    }

    /// Play from the start, restarting if already playing
    pub fn play(&mut self, engine: &mut dyn AudioEngine) -> Result<PlaybackToken> {
        let handle = self.handle.ok_or_else(|| {
            SoundboardError::EngineUnavailable(format!("Effect '{}' is not loaded", self.name))
        })?;
        self.stop(engine);
        let token = engine.play_effect(handle)?;
        self.playing = Some(token);
        Ok(token)
    }

    /// Stop playback; returns whether it was playing
    ///
    /// The channel reports not-playing afterwards even if the engine errs.
    pub fn stop(&mut self, engine: &mut dyn AudioEngine) -> bool {
        match self.playing.take() {
            Some(token) => {
                if let Err(e) = engine.stop(StopTarget::Playback(token)) {
                    warn!("Engine failed to stop effect '{}': {}", self.name, e);
                }
                true
            }
            None => false,
        }
    }

    /// Apply a finished event; returns whether the token was this channel's
    pub fn finished(&mut self, token: PlaybackToken) -> bool {
        if self.playing == Some(token) {
            self.playing = None;
            true
        } else {
            false
        }
    }

    pub fn view(&self) -> EffectView {
        EffectView {
            name: self.name.clone(),
            loaded: self.is_loaded(),
            playing: self.is_playing(),
        }
    }
}

/// Read-only effect view published to the UI
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EffectView {
    pub name: String,
    pub loaded: bool,
    pub playing: bool,
}
