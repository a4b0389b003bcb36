use crate::logging::ActivityLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sequence number for ordering events
pub type EventSequence = u64;

/// Everything the monitor reports while running
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub sequence: EventSequence,
    pub timestamp: DateTime<Utc>,
    pub payload: MonitorEventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEventPayload {
    MonitoringStarted {
        folder: PathBuf,
        endpoint: String,
    },

    MonitoringStopped,

    /// New export file noticed in the watched folder
    FileDetected { file_name: String, file_size: u64 },

    /// Parsed and waiting for upload
    FileQueued {
        file_name: String,
        file_hash: String,
        entries: usize,
        skipped_rows: usize,
    },

    /// Content already uploaded or already queued
    FileSkipped { file_name: String, reason: String },

    /// Unparsable, moved aside and never retried
    FileRejected { file_name: String, reason: String },

    UploadSucceeded {
        file_name: String,
        entries: usize,
        attempts: u32,
    },

    UploadRetrying {
        file_name: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    UploadFailed {
        file_name: String,
        attempts: u32,
        error: String,
    },
}

impl MonitorEvent {
    pub fn file_name(&self) -> Option<&str> {
        match &self.payload {
            MonitorEventPayload::MonitoringStarted { .. }
            | MonitorEventPayload::MonitoringStopped => None,
            MonitorEventPayload::FileDetected { file_name, .. }
            | MonitorEventPayload::FileQueued { file_name, .. }
            | MonitorEventPayload::FileSkipped { file_name, .. }
            | MonitorEventPayload::FileRejected { file_name, .. }
            | MonitorEventPayload::UploadSucceeded { file_name, .. }
            | MonitorEventPayload::UploadRetrying { file_name, .. }
            | MonitorEventPayload::UploadFailed { file_name, .. } => Some(file_name),
        }
    }

    pub fn payload_type(&self) -> &str {
        match &self.payload {
            MonitorEventPayload::MonitoringStarted { .. } => "monitoring_started",
            MonitorEventPayload::MonitoringStopped => "monitoring_stopped",
            MonitorEventPayload::FileDetected { .. } => "file_detected",
            MonitorEventPayload::FileQueued { .. } => "file_queued",
            MonitorEventPayload::FileSkipped { .. } => "file_skipped",
            MonitorEventPayload::FileRejected { .. } => "file_rejected",
            MonitorEventPayload::UploadSucceeded { .. } => "upload_succeeded",
            MonitorEventPayload::UploadRetrying { .. } => "upload_retrying",
            MonitorEventPayload::UploadFailed { .. } => "upload_failed",
        }
    }

    pub fn level(&self) -> ActivityLevel {
        match &self.payload {
            MonitorEventPayload::FileRejected { .. }
            | MonitorEventPayload::UploadRetrying { .. } => ActivityLevel::Warn,
            MonitorEventPayload::UploadFailed { .. } => ActivityLevel::Error,
            MonitorEventPayload::FileQueued { skipped_rows, .. } if *skipped_rows > 0 => {
                ActivityLevel::Warn
            }
            _ => ActivityLevel::Info,
        }
    }

    /// Human readable line for the activity console
    pub fn message(&self) -> String {
        match &self.payload {
            MonitorEventPayload::MonitoringStarted { folder, endpoint } => format!(
                "Monitoring started: {} -> {}",
                folder.display(),
                endpoint
            ),
            MonitorEventPayload::MonitoringStopped => "Monitoring stopped".to_string(),
            MonitorEventPayload::FileDetected {
                file_name,
                file_size,
            } => format!("New file detected: {} ({} bytes)", file_name, file_size),
            MonitorEventPayload::FileQueued {
                file_name,
                entries,
                skipped_rows,
                ..
            } => {
                if *skipped_rows > 0 {
                    format!(
                        "Parsed {}: {} records queued, {} malformed rows skipped",
                        file_name, entries, skipped_rows
                    )
                } else {
                    format!("Parsed {}: {} records queued", file_name, entries)
                }
            }
            MonitorEventPayload::FileSkipped { file_name, reason } => {
                format!("Skipped {}: {}", file_name, reason)
            }
            MonitorEventPayload::FileRejected { file_name, reason } => {
                format!("Rejected {}: {}", file_name, reason)
            }
            MonitorEventPayload::UploadSucceeded {
                file_name,
                entries,
                attempts,
            } => format!(
                "Uploaded {} records from {} (attempt {})",
                entries, file_name, attempts
            ),
            MonitorEventPayload::UploadRetrying {
                file_name,
                attempt,
                delay_ms,
                error,
            } => format!(
                "Upload of {} failed (attempt {}), retrying in {:.1}s: {}",
                file_name,
                attempt,
                *delay_ms as f64 / 1000.0,
                error
            ),
            MonitorEventPayload::UploadFailed {
                file_name,
                attempts,
                error,
            } => format!(
                "Upload of {} failed after {} attempts: {}",
                file_name, attempts, error
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(payload: MonitorEventPayload) -> MonitorEvent {
        MonitorEvent {
            sequence: 1,
            timestamp: Utc::now(),
            payload,
        }
    }

    #[test]
    fn test_levels() {
        let failed = event(MonitorEventPayload::UploadFailed {
            file_name: "a.csv".to_string(),
            attempts: 4,
            error: "boom".to_string(),
        });
        assert_eq!(failed.level(), ActivityLevel::Error);
        assert_eq!(failed.file_name(), Some("a.csv"));

        let partial = event(MonitorEventPayload::FileQueued {
            file_name: "b.csv".to_string(),
            file_hash: "h".to_string(),
            entries: 3,
            skipped_rows: 1,
        });
        assert_eq!(partial.level(), ActivityLevel::Warn);
        assert!(partial.message().contains("1 malformed rows skipped"));

        assert_eq!(
            event(MonitorEventPayload::MonitoringStopped).level(),
            ActivityLevel::Info
        );
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let e = event(MonitorEventPayload::FileSkipped {
            file_name: "c.csv".to_string(),
            reason: "already processed".to_string(),
        });
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["payload"]["type"], "file_skipped");
        assert_eq!(e.payload_type(), "file_skipped");
    }
}
