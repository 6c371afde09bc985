//! Engine backed by the real audio devices
//!
//! cpal streams and the rodio output stream are not `Send`, so they live on a
//! dedicated audio thread. [`DeviceEngine`] is the sending side: every trait
//! call is a command plus a one-shot reply channel. The audio thread also
//! polls its sinks and reports playbacks that ran dry as
//! [`EngineEvent::Finished`].

use super::{
    AudioEngine, ClipData, EffectHandle, EngineEvent, PlaybackToken, RecordingHandle, StopTarget,
};
use crate::store::{ClipRef, ClipStore};
use crate::{Result, SoundboardError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Stream;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rodio::buffer::SamplesBuffer;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often finished sinks are detected
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long a call waits for the audio thread
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

enum AudioCommand {
    Attach(Sender<EngineEvent>),
    LoadEffect {
        name: String,
        asset: PathBuf,
        reply: Sender<Result<EffectHandle>>,
    },
    PlayEffect {
        effect: EffectHandle,
        reply: Sender<Result<PlaybackToken>>,
    },
    PlayClip {
        clip: ClipData,
        reply: Sender<Result<PlaybackToken>>,
    },
    StartCapture {
        reply: Sender<Result<RecordingHandle>>,
    },
    StopCapture {
        handle: RecordingHandle,
        reply: Sender<Result<ClipData>>,
    },
    Stop {
        target: StopTarget,
        reply: Sender<Result<()>>,
    },
    Shutdown,
}

/// Audio engine using the default input and output devices
pub struct DeviceEngine {
    command_tx: Sender<AudioCommand>,
    store: Arc<dyn ClipStore>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceEngine {
    /// Open the default output device and start the audio thread
    ///
    /// Clip references are resolved through `store` when played. The input
    /// device is opened lazily, on the first capture.
    pub fn new(store: Arc<dyn ClipStore>) -> Result<Self> {
        let (command_tx, command_rx) = bounded(32);
        let (ready_tx, ready_rx) = bounded(1);

        let thread = thread::Builder::new()
            .name("soundboard-audio".into())
            .spawn(move || AudioThread::run(command_rx, ready_tx))?;

        ready_rx.recv_timeout(REPLY_TIMEOUT).map_err(|e| {
            SoundboardError::EngineUnavailable(format!("Audio thread did not start: {}", e))
        })??;

        Ok(Self {
            command_tx,
            store,
            thread: Some(thread),
        })
    }

    fn call<T>(&self, command: impl FnOnce(Sender<Result<T>>) -> AudioCommand) -> Result<T> {
        let (reply_tx, reply_rx) = bounded(1);
        self.command_tx.send(command(reply_tx)).map_err(|e| {
            SoundboardError::EngineUnavailable(format!("Audio thread is gone: {}", e))
        })?;
        reply_rx.recv_timeout(REPLY_TIMEOUT).map_err(|e| {
            SoundboardError::EngineUnavailable(format!("Audio thread did not reply: {}", e))
        })?
    }
}

impl AudioEngine for DeviceEngine {
    fn attach(&mut self, events: Sender<EngineEvent>) {
        if self.command_tx.send(AudioCommand::Attach(events)).is_err() {
            warn!("Audio thread is gone; finished events will not be delivered");
        }
    }

    fn load_effect(&mut self, name: &str, asset: &Path) -> Result<EffectHandle> {
        self.call(|reply| AudioCommand::LoadEffect {
            name: name.to_string(),
            asset: asset.to_path_buf(),
            reply,
        })
    }

    fn play_effect(&mut self, effect: EffectHandle) -> Result<PlaybackToken> {
        self.call(|reply| AudioCommand::PlayEffect { effect, reply })
    }

    fn start_capture(&mut self) -> Result<RecordingHandle> {
        self.call(|reply| AudioCommand::StartCapture { reply })
    }

    fn stop_capture(&mut self, handle: RecordingHandle) -> Result<ClipData> {
        self.call(|reply| AudioCommand::StopCapture { handle, reply })
    }

    fn play_clip(&mut self, clip: &ClipRef) -> Result<PlaybackToken> {
        let data = self.store.read(clip).map_err(|e| {
            SoundboardError::PlaybackError(format!("Cannot read {}: {}", clip, e))
        })?;
        self.call(|reply| AudioCommand::PlayClip { clip: data, reply })
    }

    fn stop(&mut self, target: StopTarget) -> Result<()> {
        self.call(|reply| AudioCommand::Stop { target, reply })
    }
}

impl Drop for DeviceEngine {
    fn drop(&mut self) {
        let _ = self.command_tx.send(AudioCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Audio thread panicked");
            }
        }
    }
}

struct Capture {
    handle: RecordingHandle,
    // Dropping the stream stops the callback
    _stream: Stream,
    samples: Arc<Mutex<Vec<f32>>>,
    sample_rate: u32,
    channels: u16,
}

/// State owned by the audio thread
struct AudioThread {
    _stream: OutputStream,
    output: OutputStreamHandle,
    effects: Vec<ClipData>,
    sinks: HashMap<PlaybackToken, Sink>,
    capture: Option<Capture>,
    events: Option<Sender<EngineEvent>>,
    next_id: u64,
}

impl AudioThread {
    fn run(commands: Receiver<AudioCommand>, ready: Sender<Result<()>>) {
        let (stream, output) = match OutputStream::try_default() {
            Ok(pair) => pair,
            Err(e) => {
                let _ = ready.send(Err(SoundboardError::EngineUnavailable(format!(
                    "No output device: {}",
                    e
                ))));
                return;
            }
        };
        let _ = ready.send(Ok(()));
        info!("Audio thread started");

        let mut audio = AudioThread {
            _stream: stream,
            output,
            effects: Vec::new(),
            sinks: HashMap::new(),
            capture: None,
            events: None,
            next_id: 1,
        };

        loop {
            match commands.recv_timeout(POLL_INTERVAL) {
                Ok(AudioCommand::Shutdown) => break,
                Ok(command) => audio.handle(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            audio.reap_finished();
        }

        info!("Audio thread stopped");
    }

    fn handle(&mut self, command: AudioCommand) {
        match command {
            AudioCommand::Attach(events) => self.events = Some(events),
            AudioCommand::LoadEffect { name, asset, reply } => {
                let _ = reply.send(self.load_effect(&name, &asset));
            }
            AudioCommand::PlayEffect { effect, reply } => {
                let result = match self.effects.get(effect.0).cloned() {
                    Some(clip) => self.play(clip),
                    None => Err(SoundboardError::PlaybackError(format!(
                        "No effect {:?}",
                        effect
                    ))),
                };
                let _ = reply.send(result);
            }
            AudioCommand::PlayClip { clip, reply } => {
                let _ = reply.send(self.play(clip));
            }
            AudioCommand::StartCapture { reply } => {
                let _ = reply.send(self.start_capture());
            }
            AudioCommand::StopCapture { handle, reply } => {
                let _ = reply.send(self.stop_capture(handle));
            }
            AudioCommand::Stop { target, reply } => {
                self.stop(target);
                let _ = reply.send(Ok(()));
            }
            AudioCommand::Shutdown => {}
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn load_effect(&mut self, name: &str, asset: &Path) -> Result<EffectHandle> {
        let file = File::open(asset).map_err(|e| {
            SoundboardError::EngineUnavailable(format!("Cannot open {}: {}", asset.display(), e))
        })?;
        let decoder = Decoder::new(BufReader::new(file)).map_err(|e| {
            SoundboardError::EngineUnavailable(format!("Cannot decode {}: {}", asset.display(), e))
        })?;

        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        let samples: Vec<f32> = decoder.convert_samples().collect();
        let clip = ClipData::new(samples, sample_rate, channels);
        debug!("Decoded effect '{}' ({:.2}s)", name, clip.duration_seconds());

        self.effects.push(clip);
        Ok(EffectHandle(self.effects.len() - 1))
    }

    fn play(&mut self, clip: ClipData) -> Result<PlaybackToken> {
        if self.capture.is_some() {
            return Err(SoundboardError::DeviceBusy);
        }

        let sink = Sink::try_new(&self.output)
            .map_err(|e| SoundboardError::PlaybackError(format!("Cannot open sink: {}", e)))?;
        sink.append(SamplesBuffer::new(clip.channels, clip.sample_rate, clip.samples));

        let token = PlaybackToken(self.next_id());
        self.sinks.insert(token, sink);
        Ok(token)
    }

    fn start_capture(&mut self) -> Result<RecordingHandle> {
        // Sinks that ran dry since the last poll must not hold the device
        self.reap_finished();
        if self.capture.is_some() || !self.sinks.is_empty() {
            return Err(SoundboardError::DeviceBusy);
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| SoundboardError::CaptureError("No input device available".into()))?;
        info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config: cpal::StreamConfig = device
            .default_input_config()
            .map_err(|e| SoundboardError::CaptureError(format!("Failed to get input config: {}", e)))?
            .into();

        let samples = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&samples);
        let err_fn = |err| {
            error!("Audio input stream error: {}", err);
        };

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    sink.lock().extend_from_slice(data);
                },
                err_fn,
                None,
            )
            .map_err(|e| SoundboardError::CaptureError(format!("Failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| SoundboardError::CaptureError(format!("Failed to start input stream: {}", e)))?;

        let handle = RecordingHandle(self.next_id());
        self.capture = Some(Capture {
            handle,
            _stream: stream,
            samples,
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        });
        info!("Capture {:?} started", handle);
        Ok(handle)
    }

    fn stop_capture(&mut self, handle: RecordingHandle) -> Result<ClipData> {
        match self.capture.take() {
            Some(capture) if capture.handle == handle => {
                let Capture {
                    samples,
                    sample_rate,
                    channels,
                    ..
                } = capture;
                let samples = std::mem::take(&mut *samples.lock());
                let clip = ClipData::new(samples, sample_rate, channels);
                info!("Capture {:?} stopped ({:.2}s)", handle, clip.duration_seconds());
                Ok(clip)
            }
            other => {
                self.capture = other;
                Err(SoundboardError::CaptureError(format!(
                    "{:?} is not capturing",
                    handle
                )))
            }
        }
    }

    fn stop(&mut self, target: StopTarget) {
        match target {
            StopTarget::Playback(token) => {
                if let Some(sink) = self.sinks.remove(&token) {
                    sink.stop();
                }
            }
            StopTarget::Capture(handle) => {
                if self.capture.as_ref().is_some_and(|c| c.handle == handle) {
                    self.capture = None;
                    debug!("Capture {:?} discarded", handle);
                }
            }
        }
    }

    fn reap_finished(&mut self) {
        let finished: Vec<PlaybackToken> = self
            .sinks
            .iter()
            .filter(|(_, sink)| sink.empty())
            .map(|(token, _)| *token)
            .collect();

        for token in finished {
            self.sinks.remove(&token);
            if let Some(events) = &self.events {
                if events.send(EngineEvent::Finished(token)).is_err() {
                    debug!("No listener for finished {:?}", token);
                }
            }
        }
    }
}
