//! Persistent record of export files already handled.
//!
//! Keyed by SHA256 of the file content and kept in insertion order so the
//! oldest records are evicted first once the ledger is full.

use crate::error::BridgeError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Maximum number of file hashes to remember
pub const MAX_LEDGER_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOutcome {
    /// Records were accepted by the endpoint
    Uploaded,
    /// File could not be parsed and will not be retried
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub file_name: String,
    pub outcome: LedgerOutcome,
    pub entries: usize,
    pub recorded_at: DateTime<Utc>,
}

/// The part of a still-growing export that has already been delivered.
///
/// Terminals append to the day's export, so a file may grow after an upload
/// of its earlier content. The next version is only sent from `last_row` on
/// when its first `content_len` bytes still hash to `file_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredPrefix {
    pub file_hash: String,
    pub content_len: u64,
    pub last_row: usize,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerData {
    records: IndexMap<String, LedgerRecord>,
    #[serde(default)]
    delivered: IndexMap<PathBuf, DeliveredPrefix>,
}

#[derive(Debug)]
pub struct ProcessedLedger {
    path: PathBuf,
    records: IndexMap<String, LedgerRecord>,
    delivered: IndexMap<PathBuf, DeliveredPrefix>,
    capacity: usize,
}

impl ProcessedLedger {
    /// Load the ledger, starting empty when the file is missing or unreadable
    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        let data = if path.exists() {
            let content = fs::read_to_string(path)?;
            match serde_json::from_str::<LedgerData>(&content) {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), "Ledger is corrupt, starting empty: {}", e);
                    LedgerData::default()
                }
            }
        } else {
            LedgerData::default()
        };

        debug!(
            entries = data.records.len(),
            growing = data.delivered.len(),
            "Loaded processed ledger"
        );

        Ok(Self {
            path: path.to_path_buf(),
            records: data.records,
            delivered: data.delivered,
            capacity: MAX_LEDGER_ENTRIES,
        })
    }

    #[cfg(test)]
    fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn get(&self, file_hash: &str) -> Option<&LedgerRecord> {
        self.records.get(file_hash)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record a handled file and persist the ledger
    pub fn record(
        &mut self,
        file_hash: &str,
        file_name: &str,
        outcome: LedgerOutcome,
        entries: usize,
    ) -> Result<(), BridgeError> {
        self.records.insert(
            file_hash.to_string(),
            LedgerRecord {
                file_name: file_name.to_string(),
                outcome,
                entries,
                recorded_at: Utc::now(),
            },
        );

        if self.records.len() > self.capacity {
            let excess = self.records.len() - self.capacity;
            debug!(excess, "Ledger exceeded capacity, evicting oldest records");
            let _ = self.records.drain(..excess);
        }

        self.save()
    }

    pub fn delivered_prefix(&self, file_path: &Path) -> Option<&DeliveredPrefix> {
        self.delivered.get(file_path)
    }

    /// Remember what was sent of a file that grew during its upload
    pub fn record_prefix(
        &mut self,
        file_path: &Path,
        prefix: DeliveredPrefix,
    ) -> Result<(), BridgeError> {
        self.delivered.insert(file_path.to_path_buf(), prefix);

        if self.delivered.len() > self.capacity {
            let excess = self.delivered.len() - self.capacity;
            let _ = self.delivered.drain(..excess);
        }

        self.save()
    }

    /// Forget the delivered prefix once the file is archived or rewritten
    pub fn clear_prefix(&mut self, file_path: &Path) -> Result<(), BridgeError> {
        if self.delivered.shift_remove(file_path).is_some() {
            self.save()?;
        }
        Ok(())
    }

    fn save(&self) -> Result<(), BridgeError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = LedgerData {
            records: self.records.clone(),
            delivered: self.delivered.clone(),
        };

        // Write then rename so a crash never leaves a half-written ledger
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_string_pretty(&data)?)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
