//! Directory-backed clip store
//!
//! Layout under the root directory:
//! - `clips/slot-<id>-<uuid>.wav`: captured audio, 16-bit PCM
//! - `records/slot-<id>.json`: the slot's [`ClipRecord`]
//!
//! A record is replaced by writing a temp file and renaming it over the old
//! one, so a reader sees either the old or the new reference, never a mix.

use super::{ClipRecord, ClipRef, ClipStore};
use crate::engine::ClipData;
use crate::slot::SlotId;
use crate::{Result, SoundboardError};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CLIPS_DIR: &str = "clips";
const RECORDS_DIR: &str = "records";

/// Clip store persisting WAV files and JSON records in a directory
pub struct FileClipStore {
    root: PathBuf,
    /// Set when the directories could not be created
    init_error: Option<String>,
    slot_locks: Mutex<HashMap<SlotId, Arc<Mutex<()>>>>,
}

impl FileClipStore {
    /// Open (creating if needed) a store rooted at `root`
    ///
    /// Never fails: if the directories cannot be created, the store is
    /// returned in an unavailable state and every operation reports
    /// `StoreUnavailable`.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let init_error = [CLIPS_DIR, RECORDS_DIR]
            .iter()
            .find_map(|dir| fs::create_dir_all(root.join(dir)).err())
            .map(|e| format!("Cannot initialize {}: {}", root.display(), e));

        match &init_error {
            Some(e) => warn!("Clip store unavailable: {}", e),
            None => info!("Clip store opened at {}", root.display()),
        }

        Self {
            root,
            init_error,
            slot_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_available(&self) -> bool {
        self.init_error.is_none()
    }

    /// Full record for a slot, including metadata
    pub fn record(&self, slot: SlotId) -> Result<Option<ClipRecord>> {
        self.ensure_available()?;
        self.read_record(slot)
    }

    fn ensure_available(&self) -> Result<()> {
        match &self.init_error {
            Some(e) => Err(SoundboardError::StoreUnavailable(e.clone())),
            None => Ok(()),
        }
    }

    fn slot_lock(&self, slot: SlotId) -> Arc<Mutex<()>> {
        self.slot_locks.lock().entry(slot).or_default().clone()
    }

    fn record_path(&self, slot: SlotId) -> PathBuf {
        self.root.join(RECORDS_DIR).join(format!("slot-{}.json", slot))
    }

    fn new_clip_path(&self, slot: SlotId) -> PathBuf {
        self.root
            .join(CLIPS_DIR)
            .join(format!("slot-{}-{}.wav", slot, Uuid::new_v4()))
    }

    /// Remove every clip file of `slot` except `keep`
    ///
    /// Called with the slot lock held.
    fn sweep_clips(&self, slot: SlotId, keep: Option<&Path>) {
        let prefix = format!("slot-{}-", slot);
        let entries = match fs::read_dir(self.root.join(CLIPS_DIR)) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list clips for slot {}: {}", slot, e);
                return;
            }
        };

        for entry in entries.filter_map(|entry| entry.ok()) {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let path = entry.path();
            if name.starts_with(&prefix) && name.ends_with(".wav") && keep != Some(path.as_path()) {
                remove_clip_file(&ClipRef::new(path.to_string_lossy()));
            }
        }
    }

    fn read_record(&self, slot: SlotId) -> Result<Option<ClipRecord>> {
        let path = self.record_path(slot);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SoundboardError::StoreUnavailable(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            SoundboardError::StoreUnavailable(format!("Corrupt record for slot {}: {}", slot, e))
        })
    }

    fn write_record(&self, record: &ClipRecord) -> Result<()> {
        let path = self.record_path(record.slot_id);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| SoundboardError::WriteFailed(format!("Failed to encode record: {}", e)))?;
        fs::write(&tmp, json).map_err(|e| {
            SoundboardError::WriteFailed(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            SoundboardError::WriteFailed(format!("Failed to replace {}: {}", path.display(), e))
        })
    }
}

fn remove_clip_file(clip: &ClipRef) {
    match fs::remove_file(clip.as_str()) {
        Ok(()) => debug!("Removed clip file {}", clip),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove clip file {}: {}", clip, e),
    }
}

impl ClipStore for FileClipStore {
    fn get(&self, slot: SlotId) -> Result<Option<ClipRef>> {
        self.ensure_available()?;
        Ok(self.read_record(slot)?.map(|record| record.clip_ref))
    }

    fn put(&self, slot: SlotId, clip: &ClipData) -> Result<ClipRef> {
        let lock = self.slot_lock(slot);
        let _guard = lock.lock();
        self.ensure_available()?;

        let clip_path = self.new_clip_path(slot);
        write_wav(&clip_path, clip)?;

        let clip_ref = ClipRef::new(clip_path.to_string_lossy());
        let record = ClipRecord::new(slot, clip_ref.clone(), clip);
        if let Err(e) = self.write_record(&record) {
            remove_clip_file(&clip_ref);
            return Err(e);
        }

        // The superseded clip goes, even when its record was unreadable
        self.sweep_clips(slot, Some(&clip_path));

        info!(
            "Saved {:.2}s clip for slot {} at {}",
            record.duration_secs, slot, clip_ref
        );
        Ok(clip_ref)
    }

    fn delete(&self, slot: SlotId) -> Result<bool> {
        let lock = self.slot_lock(slot);
        let _guard = lock.lock();
        self.ensure_available()?;

        let path = self.record_path(slot);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No record to delete for slot {}", slot);
                self.sweep_clips(slot, None);
                return Ok(false);
            }
            Err(e) => {
                return Err(SoundboardError::WriteFailed(format!(
                    "Failed to delete {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        self.sweep_clips(slot, None);
        info!("Deleted clip for slot {}", slot);
        Ok(true)
    }

    fn read(&self, clip: &ClipRef) -> Result<ClipData> {
        self.ensure_available()?;
        read_wav(Path::new(clip.as_str()))
    }
}

/// Write a clip as a 16-bit PCM WAV file
pub fn write_wav(path: &Path, clip: &ClipData) -> Result<()> {
    let spec = WavSpec {
        channels: clip.channels,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let write = || -> std::result::Result<(), hound::Error> {
        let mut writer = WavWriter::create(path, spec)?;
        for &sample in &clip.samples {
            let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(sample_i16)?;
        }
        writer.finalize()
    };

    write().map_err(|e| {
        let _ = fs::remove_file(path);
        SoundboardError::WriteFailed(format!("Failed to write WAV {}: {}", path.display(), e))
    })?;

    debug!("Wrote {} samples to {}", clip.samples.len(), path.display());
    Ok(())
}

/// Read a WAV file written by [`write_wav`]
pub fn read_wav(path: &Path) -> Result<ClipData> {
    let mut reader = WavReader::open(path)
        .map_err(|e| SoundboardError::IOError(format!("Failed to open WAV file: {}", e)))?;
    let spec = reader.spec();

    let samples: std::result::Result<Vec<f32>, hound::Error> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect(),
        SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample)?;
            reader
                .samples::<i32>()
                .map(|s| s.map(|sample| sample as f32 / scale))
                .collect()
        }
    };

    let samples =
        samples.map_err(|e| SoundboardError::IOError(format!("Failed to read sample: {}", e)))?;
    Ok(ClipData::new(samples, spec.sample_rate, spec.channels))
}

/// Full-scale value of a signed integer sample of `bits` bits
fn int_scale(bits: u16) -> Result<f32> {
    match bits {
        1..=32 => Ok((1i64 << (bits - 1)) as f32),
        _ => Err(SoundboardError::IOError(format!(
            "Unsupported sample width: {} bits",
            bits
        ))),
    }
}
