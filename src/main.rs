//! Soundboard - record and play back clips from the terminal
//!
//! Usage: `soundboard [CONFIG.toml]`

use anyhow::{Context, Result};
use soundboard::console::{self, ConsolePermission};
use soundboard::permission::AlwaysConfirm;
use soundboard::{
    AppEvent, AudioEngine, ClipStore, FileClipStore, MemoryClipStore, Orchestrator,
    PermissionGate, PermissionSetting, SessionServices, SoundboardConfig,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Logs go to stderr so they do not interleave with the board
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "soundboard=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    tracing::info!("Starting soundboard");

    let config = match std::env::args().nth(1) {
        Some(path) => SoundboardConfig::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => SoundboardConfig::default(),
    };

    let store: Arc<dyn ClipStore> = if config.persist {
        let store = FileClipStore::open(&config.data_dir);
        if !store.is_available() {
            tracing::warn!(
                "Clip store at {} is unavailable; recordings will not be kept",
                config.data_dir.display()
            );
        }
        Arc::new(store)
    } else {
        Arc::new(MemoryClipStore::new())
    };

    // Prompts are asked by the console; the session only reads the answers
    let console_permission = match config.permission {
        PermissionSetting::Prompt => Some(ConsolePermission::new()),
        _ => None,
    };
    let permission: Box<dyn PermissionGate> = match &console_permission {
        Some(gate) => Box::new(gate.clone()),
        None => Box::new(config.permission.static_gate()),
    };

    let services = SessionServices {
        engine: build_engine(&config, Arc::clone(&store))?,
        permission,
        confirmer: Box::new(AlwaysConfirm),
    };

    let shutdown_timeout = Duration::from_millis(config.shutdown_timeout_ms);
    let (orchestrator, handle) = Orchestrator::new(config, services, store)?;
    let threads = orchestrator.start()?;

    console::run(
        &handle,
        console_permission.as_ref(),
        console::stdin_lines(),
        io::stdout(),
    )?;

    handle.shutdown()?;
    while let Some(event) = handle.recv_event_timeout(shutdown_timeout) {
        if event == AppEvent::Shutdown {
            break;
        }
    }
    for thread in threads {
        if thread.join().is_err() {
            tracing::error!("A worker thread panicked");
        }
    }

    tracing::info!("Soundboard stopped");
    Ok(())
}

#[cfg(feature = "audio-io")]
fn build_engine(
    _config: &SoundboardConfig,
    store: Arc<dyn ClipStore>,
) -> Result<Box<dyn AudioEngine>> {
    let engine = soundboard::engine::DeviceEngine::new(store)
        .context("Failed to open the audio device")?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "audio-io"))]
fn build_engine(
    config: &SoundboardConfig,
    _store: Arc<dyn ClipStore>,
) -> Result<Box<dyn AudioEngine>> {
    tracing::info!("Built without audio-io; using the simulated engine");
    Ok(Box::new(soundboard::SimulatedEngine::with_auto_finish(
        Duration::from_millis(config.simulated_clip_ms),
    )))
}
