//! Type definitions for the upload queue system.
//!
//! Defines core data structures: UploadItem, UploadStatus, UploadTarget, and constants.

use crate::config::BridgeConfig;
use crate::models::ClockEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

// One request in flight at a time; files are forwarded in detection order
pub const MAX_CONCURRENT_UPLOADS: usize = 1;

// How often the processor looks for ready items
pub const PROCESSOR_TICK: Duration = Duration::from_millis(200);

// Per-request timeout for the HTTP client
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One parsed export file waiting to be forwarded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadItem {
    pub id: String,
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_hash: String, // SHA256 of file content, ledger key
    pub entries: Vec<ClockEntry>,
    pub skipped_rows: usize,
    pub content_len: u64, // Bytes of the file version that was hashed
    pub last_row: usize,  // Last CSV line covered by this version
    pub queued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl UploadItem {
    pub fn new(
        file_path: PathBuf,
        file_name: String,
        file_hash: String,
        entries: Vec<ClockEntry>,
        skipped_rows: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_path,
            file_name,
            file_hash,
            entries,
            skipped_rows,
            content_len: 0,
            last_row: 0,
            queued_at: Utc::now(),
            retry_count: 0,
            next_retry_at: None,
            last_error: None,
        }
    }

    /// Record which version of the file this item was parsed from
    pub fn covering(mut self, content_len: u64, last_row: usize) -> Self {
        self.content_len = content_len;
        self.last_row = last_row;
        self
    }

    /// Not waiting on a backoff delay
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at.map_or(true, |at| at <= now)
    }

    /// Attempts made so far, counting the one in progress
    pub fn attempts(&self) -> u32 {
        self.retry_count + 1
    }
}

/// What happened to an item handed to the queue
#[derive(Debug)]
pub enum EnqueueOutcome {
    Added,
    /// A waiting version of the same file was dropped in its favour
    Replaced(UploadItem),
    /// An earlier version of the file is uploading; try again after it settles
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedUpload {
    pub file_name: String,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadStatus {
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
    pub failed_files: Vec<FailedUpload>,
}

/// Where and how to send records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub endpoint: String,
    pub api_key: String,
}

impl From<&BridgeConfig> for UploadTarget {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            endpoint: config.api_endpoint.trim().to_string(),
            api_key: config.api_key.trim().to_string(),
        }
    }
}
