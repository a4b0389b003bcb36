//! Snapshot of the monitor's state, persisted for the `status` command.

use crate::error::BridgeError;
use crate::events::{MonitorEvent, MonitorEventPayload};
use crate::upload_queue::{FailedUpload, UploadStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    #[default]
    Stopped,
    Running,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub watched_folder: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
    #[serde(default)]
    pub failed_files: Vec<FailedUpload>,
    pub uploaded_files: u64,
    pub uploaded_entries: u64,
    pub rejected_files: u64,
    pub last_error: Option<String>,
}

impl MonitorStatus {
    pub fn running(pid: u32, watched_folder: PathBuf, endpoint: String) -> Self {
        let now = Utc::now();
        Self {
            state: MonitorState::Running,
            pid: Some(pid),
            started_at: Some(now),
            updated_at: Some(now),
            watched_folder: Some(watched_folder),
            endpoint: Some(endpoint),
            ..Default::default()
        }
    }

    /// Fold one monitor event into the counters
    pub fn apply(&mut self, event: &MonitorEvent) {
        match &event.payload {
            MonitorEventPayload::UploadSucceeded { entries, .. } => {
                self.uploaded_files += 1;
                self.uploaded_entries += *entries as u64;
            }
            MonitorEventPayload::FileRejected { file_name, reason } => {
                self.rejected_files += 1;
                self.last_error = Some(format!("{}: {}", file_name, reason));
            }
            MonitorEventPayload::UploadFailed {
                file_name, error, ..
            } => {
                self.last_error = Some(format!("{}: {}", file_name, error));
            }
            MonitorEventPayload::MonitoringStopped => {
                self.state = MonitorState::Stopped;
            }
            _ => {}
        }
        self.updated_at = Some(event.timestamp);
    }

    pub fn set_queue(&mut self, queue: UploadStatus) {
        self.pending = queue.pending;
        self.processing = queue.processing;
        self.failed = queue.failed;
        self.failed_files = queue.failed_files;
    }
}

/// Missing or unreadable snapshot reads as a stopped monitor
pub fn load_status(path: &Path) -> MonitorStatus {
    fs::read_to_string(path)
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default()
}

pub fn save_status(path: &Path, status: &MonitorStatus) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, serde_json::to_string_pretty(status)?)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
