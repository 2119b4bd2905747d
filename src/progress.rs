//! Per-episode playback progress persistence
//!
//! Progress is a convenience, never a requirement of playback: every public
//! operation degrades to `None`/`false`/empty on failure and logs instead of
//! returning an error.

use crate::models::{ProgressKey, ProgressRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Positions below this are noise from immediate back-outs
pub const MIN_SAVE_SECS: f64 = 5.0;

/// Records untouched for longer than this are swept
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

const SCHEMA_NAME: &str = "series-progress";
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("progress store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("progress store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected store schema {name} v{version}")]
    Schema { name: String, version: u32 },
    #[error("progress writer is gone")]
    WriterGone,
}

/// Narrow persistence interface shared by the hydrator and the player
pub trait ProgressStore: Send + Sync {
    fn get(&self, id: &str) -> Option<ProgressRecord>;

    /// Store without the minimum-time check
    fn put(&self, record: ProgressRecord) -> bool;

    fn delete(&self, id: &str) -> bool;

    fn get_all(&self) -> Vec<ProgressRecord>;

    /// Store a record, refusing positions under [`MIN_SAVE_SECS`]
    fn set(&self, record: ProgressRecord) -> bool {
        if !record.time.is_finite() || record.time < MIN_SAVE_SECS {
            debug!(id = %record.id, time = record.time, "skipping progress below threshold");
            return false;
        }
        self.put(record)
    }

    /// Delete records of `series_id` whose `updated` is older than
    /// `retention_ms` before `now_ms`. Returns how many were removed.
    fn sweep(&self, series_id: &str, now_ms: i64, retention_ms: i64) -> usize {
        let cutoff = now_ms.saturating_sub(retention_ms);
        self.get_all()
            .into_iter()
            .filter(|r| r.updated < cutoff && ProgressKey::belongs_to(&r.id, series_id))
            .filter(|r| self.delete(&r.id))
            .count()
    }
}

pub fn retention_ms(days: i64) -> i64 {
    chrono::Duration::days(days).num_milliseconds()
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// On-disk layout, versioned by its embedded schema header
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    schema: String,
    version: u32,
    #[serde(default)]
    records: Vec<ProgressRecord>,
}

enum WriterMsg {
    Snapshot(Vec<ProgressRecord>),
    Flush(Sender<()>),
}

/// JSON-file store: reads come from memory, writes are handed to a
/// background thread so playback never waits on the disk.
pub struct JsonProgressStore {
    path: PathBuf,
    records: Mutex<HashMap<String, ProgressRecord>>,
    writer: Option<Sender<WriterMsg>>,
    writer_thread: Option<JoinHandle<()>>,
}

impl JsonProgressStore {
    pub fn default_path() -> PathBuf {
        crate::config::app_dir().join("progress.json")
    }

    pub fn open(path: PathBuf) -> Self {
        let records = match read_store(&path) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "starting with an empty progress store");
                if matches!(e, StoreError::Json(_) | StoreError::Schema { .. }) {
                    set_aside(&path);
                }
                HashMap::new()
            }
        };
        debug!(path = %path.display(), count = records.len(), "progress store opened");

        let (tx, rx) = channel::<WriterMsg>();
        let writer_path = path.clone();
        let spawned = thread::Builder::new()
            .name("progress-writer".to_string())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    let mut latest = None;
                    let mut acks = Vec::new();
                    let mut pending = Some(msg);
                    // Coalesce queued snapshots, only the newest matters
                    while let Some(msg) = pending.take().or_else(|| rx.try_recv().ok()) {
                        match msg {
                            WriterMsg::Snapshot(records) => latest = Some(records),
                            WriterMsg::Flush(ack) => acks.push(ack),
                        }
                    }
                    if let Some(records) = latest {
                        if let Err(e) = write_store(&writer_path, records) {
                            warn!(path = %writer_path.display(), error = %e, "failed to write progress");
                        }
                    }
                    for ack in acks {
                        let _ = ack.send(());
                    }
                }
            });

        let (writer, writer_thread) = match spawned {
            Ok(handle) => (Some(tx), Some(handle)),
            Err(e) => {
                warn!(error = %e, "progress writer unavailable, changes stay in memory");
                (None, None)
            }
        };

        Self {
            path,
            records: Mutex::new(records),
            writer,
            writer_thread,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until queued writes reach the disk (bounded)
    pub fn flush(&self) -> bool {
        let Some(writer) = &self.writer else {
            return false;
        };
        let (tx, rx) = channel();
        if writer.send(WriterMsg::Flush(tx)).is_err() {
            return false;
        }
        rx.recv_timeout(Duration::from_secs(2)).is_ok()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProgressRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, records: &HashMap<String, ProgressRecord>) -> Result<(), StoreError> {
        let writer = self.writer.as_ref().ok_or(StoreError::WriterGone)?;
        writer
            .send(WriterMsg::Snapshot(records.values().cloned().collect()))
            .map_err(|_| StoreError::WriterGone)
    }
}

impl ProgressStore for JsonProgressStore {
    fn get(&self, id: &str) -> Option<ProgressRecord> {
        self.lock().get(id).cloned()
    }

    fn put(&self, record: ProgressRecord) -> bool {
        let mut records = self.lock();
        records.insert(record.id.clone(), record);
        match self.persist(&records) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "progress kept in memory only");
                false
            }
        }
    }

    fn delete(&self, id: &str) -> bool {
        let mut records = self.lock();
        if records.remove(id).is_none() {
            return false;
        }
        match self.persist(&records) {
            Ok(()) => true,
            Err(e) => {
                warn!(id, error = %e, "progress delete kept in memory only");
                false
            }
        }
    }

    fn get_all(&self) -> Vec<ProgressRecord> {
        self.lock().values().cloned().collect()
    }
}

impl Drop for JsonProgressStore {
    fn drop(&mut self) {
        // Closing the channel ends the writer after its last write
        self.writer = None;
        if let Some(handle) = self.writer_thread.take() {
            let _ = handle.join();
        }
    }
}

fn read_store(path: &Path) -> Result<HashMap<String, ProgressRecord>, StoreError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = fs::read_to_string(path)?;
    let file: StoreFile = serde_json::from_str(&content)?;
    if file.schema != SCHEMA_NAME || file.version > SCHEMA_VERSION {
        return Err(StoreError::Schema {
            name: file.schema,
            version: file.version,
        });
    }
    Ok(file
        .records
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect())
}

/// Move an unusable file to `<name>.bak` so the next write can't destroy it
fn set_aside(path: &Path) -> Option<PathBuf> {
    let mut name = path.file_name()?.to_os_string();
    name.push(".bak");
    let backup = path.with_file_name(name);
    match fs::rename(path, &backup) {
        Ok(()) => {
            info!(backup = %backup.display(), "unreadable progress file kept aside");
            Some(backup)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not keep unreadable progress file");
            None
        }
    }
}

fn write_store(path: &Path, mut records: Vec<ProgressRecord>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    records.sort_by(|a, b| a.id.cmp(&b.id));
    let file = StoreFile {
        schema: SCHEMA_NAME.to_string(),
        version: SCHEMA_VERSION,
        records,
    };
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(&file)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// In-memory store for tests
#[cfg(test)]
#[derive(Default)]
pub struct MemoryProgressStore {
    records: Mutex<HashMap<String, ProgressRecord>>,
}

#[cfg(test)]
impl ProgressStore for MemoryProgressStore {
    fn get(&self, id: &str) -> Option<ProgressRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    fn put(&self, record: ProgressRecord) -> bool {
        self.records.lock().unwrap().insert(record.id.clone(), record);
        true
    }

    fn delete(&self, id: &str) -> bool {
        self.records.lock().unwrap().remove(id).is_some()
    }

    fn get_all(&self) -> Vec<ProgressRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }
}
