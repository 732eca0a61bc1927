//! JSON-lines store.
//!
//! One file per record kind, one JSON object per line. Every line is flushed
//! and synced before the call returns. Files rotate after a fixed number of
//! records.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::Store;
use crate::data::{AccelRecording, Message, Response, SerialOutput};
use crate::error::{Result, WaspiError};

/// Record families, each written to its own file series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    SensorValues,
    AccelRecordings,
    Messages,
    Responses,
}

impl RecordKind {
    pub fn prefix(self) -> &'static str {
        match self {
            RecordKind::SensorValues => "sensor_values",
            RecordKind::AccelRecordings => "accel_recordings",
            RecordKind::Messages => "messages",
            RecordKind::Responses => "responses",
        }
    }
}

/// Currently open file of one kind
#[derive(Debug)]
struct Segment {
    path: PathBuf,
    file: File,
    records: usize,
    ids: HashSet<Uuid>,
}

#[derive(Debug, Default)]
struct StoreState {
    segments: HashMap<RecordKind, Segment>,
    sequence: u32,
}

/// File-backed [`Store`]
#[derive(Debug)]
pub struct JsonlStore {
    data_dir: PathBuf,
    max_records_per_file: usize,
    state: Mutex<StoreState>,
}

impl JsonlStore {
    /// Create the store, creating `data_dir` if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn new(data_dir: impl Into<PathBuf>, max_records_per_file: usize) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        info!("Storing records under {}", data_dir.display());

        Ok(Self {
            data_dir,
            max_records_per_file: max_records_per_file.max(1),
            state: Mutex::new(StoreState::default()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Append one record unless its id is already in the current file
    ///
    /// # Returns
    ///
    /// * `Result<bool>` - `true` if a line was written, `false` for a duplicate
    pub fn append<T: Serialize>(&self, kind: RecordKind, id: Uuid, record: &T) -> Result<bool> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut state = self
            .state
            .lock()
            .map_err(|_| WaspiError::Store("store state poisoned".to_string()))?;
        let state = &mut *state;

        let rotate = state
            .segments
            .get(&kind)
            .map(|s| s.records >= self.max_records_per_file)
            .unwrap_or(true);
        if rotate {
            state.sequence = state.sequence.wrapping_add(1);
            let segment = self.open_segment(kind, state.sequence)?;
            debug!("Writing {} to {}", kind.prefix(), segment.path.display());
            state.segments.insert(kind, segment);
        }

        let segment = state
            .segments
            .get_mut(&kind)
            .ok_or_else(|| WaspiError::Store(format!("no open file for {}", kind.prefix())))?;

        if segment.ids.contains(&id) {
            debug!("Skipping duplicate {} record {}", kind.prefix(), id);
            return Ok(false);
        }

        write_line(&mut segment.file, &line)?;
        segment.ids.insert(id);
        segment.records += 1;

        Ok(true)
    }

    fn open_segment(&self, kind: RecordKind, sequence: u32) -> Result<Segment> {
        let name = format!(
            "{}-{}-{:04}.jsonl",
            kind.prefix(),
            Local::now().format("%Y%m%d_%H%M%S"),
            sequence
        );
        let path = self.data_dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Segment {
            path,
            file,
            records: 0,
            ids: HashSet::new(),
        })
    }

    fn log_append<T: Serialize>(&self, kind: RecordKind, id: Uuid, record: &T) {
        if let Err(e) = self.append(kind, id, record) {
            error!("Failed to store {} record {}: {}", kind.prefix(), id, e);
        }
    }
}

/// Append one line and sync it, truncating any partial write on failure
fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    let start = file.metadata()?.len();

    let written = file
        .write_all(line)
        .and_then(|()| file.flush())
        .and_then(|()| file.sync_data());

    if written.is_err() {
        if let Err(e) = file.set_len(start) {
            warn!("Could not roll back partial line: {}", e);
        }
    }
    written
}

impl Store for JsonlStore {
    fn store_sensor_value(&self, output: &SerialOutput) {
        self.log_append(RecordKind::SensorValues, output.id(), output);
    }

    fn store_accel_recording(&self, recording: &AccelRecording) {
        self.log_append(RecordKind::AccelRecordings, recording.id, recording);
    }

    fn store_message(&self, message: &Message) {
        self.log_append(RecordKind::Messages, message.id, message);
    }

    fn store_response(&self, response: &Response) {
        self.log_append(RecordKind::Responses, response.id(), response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ResponseStatus, SensorValue};
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn files_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(prefix))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        files
    }

    fn lines(path: &Path) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn output(value: f64) -> SerialOutput {
        let mut content = BTreeMap::new();
        content.insert(
            "temp_0".to_string(),
            SensorValue { hwid: "temp_0".to_string(), value, timestamp: 0.0 },
        );
        SerialOutput::new(Local::now(), content)
    }

    #[test]
    fn test_creates_data_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = JsonlStore::new(&nested, 10).unwrap();
        assert!(store.data_dir().is_dir());
    }

    #[test]
    fn test_sensor_value_written_as_json_line() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::new(dir.path(), 10).unwrap();
        let record = output(21.5);

        store.store_sensor_value(&record);

        let files = files_with_prefix(dir.path(), "sensor_values-");
        assert_eq!(files.len(), 1);
        let written = lines(&files[0]);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0]["id"], record.id().to_string());
        assert_eq!(written[0]["content"]["temp_0"]["value"], 21.5);
    }

    #[test]
    fn test_duplicate_id_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::new(dir.path(), 10).unwrap();
        let record = output(1.0);

        assert!(store.append(RecordKind::SensorValues, record.id(), &record).unwrap());
        assert!(!store.append(RecordKind::SensorValues, record.id(), &record).unwrap());

        let files = files_with_prefix(dir.path(), "sensor_values-");
        assert_eq!(lines(&files[0]).len(), 1);
    }

    #[test]
    fn test_failed_write_does_not_mark_id_written() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::new(dir.path(), 10).unwrap();
        let first = output(1.0);
        assert!(assert_ok!(store.append(RecordKind::SensorValues, first.id(), &first)));

        let path = files_with_prefix(dir.path(), "sensor_values-")[0].clone();
        let writable = {
            let mut state = store.state.lock().unwrap();
            let segment = state.segments.get_mut(&RecordKind::SensorValues).unwrap();
            std::mem::replace(&mut segment.file, File::open(&path).unwrap())
        };

        let record = output(2.0);
        assert_err!(store.append(RecordKind::SensorValues, record.id(), &record));

        store
            .state
            .lock()
            .unwrap()
            .segments
            .get_mut(&RecordKind::SensorValues)
            .unwrap()
            .file = writable;
        assert!(assert_ok!(store.append(RecordKind::SensorValues, record.id(), &record)));

        let written = lines(&path);
        assert_eq!(written.len(), 2);
        assert_eq!(written[1]["id"], record.id().to_string());
    }

    #[test]
    fn test_kinds_use_separate_files() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::new(dir.path(), 10).unwrap();

        let message = Message::new("{}".to_string());
        let response = Response::new(&message, ResponseStatus::Failed, "refused");
        store.store_message(&message);
        store.store_response(&response);

        let messages = files_with_prefix(dir.path(), "messages-");
        let responses = files_with_prefix(dir.path(), "responses-");
        assert_eq!(messages.len(), 1);
        assert_eq!(responses.len(), 1);

        let written = lines(&responses[0]);
        assert_eq!(written[0]["status"], "FAILED");
        assert_eq!(written[0]["message_id"], message.id.to_string());
    }

    #[test]
    fn test_rotation_after_max_records() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::new(dir.path(), 2).unwrap();

        for i in 0..5 {
            store.store_sensor_value(&output(i as f64));
        }

        let files = files_with_prefix(dir.path(), "sensor_values-");
        assert_eq!(files.len(), 3);
        let counts: Vec<usize> = files.iter().map(|f| lines(f).len()).collect();
        assert_eq!(counts.iter().sum::<usize>(), 5);
        assert!(counts.iter().all(|&c| c <= 2));
    }
}
