//! Turns a settled export file into a queued upload.

use crate::csv_parser::parse_csv_bytes;
use crate::error::BridgeError;
use crate::events::{EventBus, MonitorEventPayload};
use crate::ledger::LedgerOutcome;
use crate::upload_queue::hashing::{calculate_bytes_hash_sha256, calculate_prefix_hash_sha256};
use crate::upload_queue::{EnqueueOutcome, UploadItem, UploadQueue};
use crate::validation::validate_export_file;
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Sub-folder receiving files whose records were delivered
pub const PROCESSED_DIR: &str = "processed";
/// Sub-folder receiving files that could not be parsed
pub const REJECTED_DIR: &str = "rejected";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Queued { entries: usize, skipped_rows: usize },
    AlreadyProcessed,
    AlreadyQueued,
    Rejected { reason: String },
    /// An earlier version of the file is uploading; look again once it settles
    Deferred,
}

pub struct FileIngestor {
    folder: PathBuf,
    queue: UploadQueue,
    event_bus: EventBus,
}

impl FileIngestor {
    pub fn new(folder: PathBuf, queue: UploadQueue, event_bus: EventBus) -> Self {
        Self {
            folder,
            queue,
            event_bus,
        }
    }

    /// Validate, dedupe and parse one file, then hand it to the upload queue
    pub fn ingest(&self, path: &Path) -> Result<IngestOutcome, BridgeError> {
        let (path, file_size) = validate_export_file(path, &self.folder)?;
        let file_name = display_name(&path);

        if self.queue.is_path_in_flight(&path) {
            debug!(file = %file_name, "Earlier version still uploading, deferring");
            return Ok(IngestOutcome::Deferred);
        }

        self.publish(MonitorEventPayload::FileDetected {
            file_name: file_name.clone(),
            file_size,
        });

        // Hash and parse the same bytes; the terminal may still append
        let content = fs::read(&path)?;
        let file_hash = calculate_bytes_hash_sha256(&content);

        // Queue before ledger: an upload leaves the in-flight set only after the ledger has it
        if self.queue.contains_hash(&file_hash) {
            self.publish(MonitorEventPayload::FileSkipped {
                file_name,
                reason: "identical content is already queued".to_string(),
            });
            return Ok(IngestOutcome::AlreadyQueued);
        }

        let (previous, delivered) = {
            let ledger = self.queue.ledger().lock()?;
            (
                ledger.get(&file_hash).map(|record| record.outcome),
                ledger.delivered_prefix(&path).cloned(),
            )
        };

        if let Some(outcome) = previous {
            // A re-exported copy goes where the original went
            let subdir = match outcome {
                LedgerOutcome::Uploaded => PROCESSED_DIR,
                LedgerOutcome::Rejected => REJECTED_DIR,
            };
            if let Err(e) = archive_file(&path, subdir) {
                warn!(file = %file_name, "Could not archive duplicate: {}", e);
            }
            if delivered.is_some() {
                self.queue.ledger().lock()?.clear_prefix(&path)?;
            }
            self.publish(MonitorEventPayload::FileSkipped {
                file_name,
                reason: "already processed".to_string(),
            });
            return Ok(IngestOutcome::AlreadyProcessed);
        }

        let resume_after = match delivered {
            Some(prefix)
                if calculate_prefix_hash_sha256(&content, prefix.content_len).as_deref()
                    == Some(prefix.file_hash.as_str()) =>
            {
                prefix.last_row
            }
            Some(_) => {
                warn!(file = %file_name, "File was rewritten since its last upload, sending it whole");
                self.queue.ledger().lock()?.clear_prefix(&path)?;
                0
            }
            None => 0,
        };

        let mut parsed = match parse_csv_bytes(&content) {
            Ok(parsed) => parsed,
            Err(e) => return self.reject(&path, file_name, &file_hash, e.to_string()),
        };
        let last_row = parsed.last_row();

        if resume_after > 0 {
            parsed.retain_after(resume_after);
            if parsed.entries.is_empty() {
                return self.complete_without_upload(&path, file_name, &file_hash);
            }
            debug!(file = %file_name, after_row = resume_after, "Sending rows appended since last upload");
        } else if parsed.entries.is_empty() {
            let reason = format!(
                "no valid records ({} malformed rows)",
                parsed.skipped.len()
            );
            return self.reject(&path, file_name, &file_hash, reason);
        }

        for row_error in &parsed.skipped {
            debug!(file = %file_name, row = row_error.row, "Skipped row: {}", row_error.reason);
        }

        let entries = parsed.entries.len();
        let skipped_rows = parsed.skipped.len();

        let item = UploadItem::new(
            path,
            file_name.clone(),
            file_hash.clone(),
            parsed.entries,
            skipped_rows,
        )
        .covering(content.len() as u64, last_row);

        match self.queue.enqueue(item)? {
            EnqueueOutcome::Added => {}
            EnqueueOutcome::Replaced(older) => {
                info!(file = %file_name, older = %older.file_hash, "Newer version replaces the queued one")
            }
            EnqueueOutcome::Deferred => {
                debug!(file = %file_name, "Earlier version started uploading, deferring");
                return Ok(IngestOutcome::Deferred);
            }
        }

        self.publish(MonitorEventPayload::FileQueued {
            file_name,
            file_hash,
            entries,
            skipped_rows,
        });

        Ok(IngestOutcome::Queued {
            entries,
            skipped_rows,
        })
    }

    /// Everything in a grown file was already sent; archive it as delivered
    fn complete_without_upload(
        &self,
        path: &Path,
        file_name: String,
        file_hash: &str,
    ) -> Result<IngestOutcome, BridgeError> {
        {
            let mut ledger = self.queue.ledger().lock()?;
            ledger.record(file_hash, &file_name, LedgerOutcome::Uploaded, 0)?;
            ledger.clear_prefix(path)?;
        }

        if let Err(e) = archive_file(path, PROCESSED_DIR) {
            warn!(file = %file_name, "Could not archive delivered file: {}", e);
        }

        self.publish(MonitorEventPayload::FileSkipped {
            file_name,
            reason: "no new records since the last upload".to_string(),
        });
        Ok(IngestOutcome::AlreadyProcessed)
    }

    fn reject(
        &self,
        path: &Path,
        file_name: String,
        file_hash: &str,
        reason: String,
    ) -> Result<IngestOutcome, BridgeError> {
        self.queue
            .ledger()
            .lock()?
            .record(file_hash, &file_name, LedgerOutcome::Rejected, 0)?;

        match archive_file(path, REJECTED_DIR) {
            Ok(destination) => info!(
                file = %file_name,
                to = %destination.display(),
                "Moved unparsable file aside"
            ),
            Err(e) => warn!(file = %file_name, "Could not move rejected file: {}", e),
        }

        self.publish(MonitorEventPayload::FileRejected {
            file_name,
            reason: reason.clone(),
        });

        Ok(IngestOutcome::Rejected { reason })
    }

    /// Log a file that could not be examined at all (too large, vanished, unreadable)
    pub fn report_failure(&self, path: &Path, error: &BridgeError) {
        warn!(path = %path.display(), "Could not process file: {}", error);
        self.publish(MonitorEventPayload::FileSkipped {
            file_name: display_name(path),
            reason: error.to_string(),
        });
    }

    fn publish(&self, payload: MonitorEventPayload) {
        let _ = self.event_bus.publish(payload);
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Move a file into `<its folder>/<subdir>/`, suffixing a timestamp on name collision
pub fn archive_file(path: &Path, subdir: &str) -> Result<PathBuf, BridgeError> {
    let parent = path
        .parent()
        .ok_or_else(|| BridgeError::Other(format!("No parent folder for {}", path.display())))?;
    let archive_dir = parent.join(subdir);
    fs::create_dir_all(&archive_dir)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| BridgeError::Other(format!("No file name in {}", path.display())))?;

    let mut destination = archive_dir.join(file_name);
    if destination.exists() {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let suffix = Local::now().format("%Y%m%d-%H%M%S%3f");
        let renamed = match path.extension() {
            Some(ext) => format!("{}-{}.{}", stem, suffix, ext.to_string_lossy()),
            None => format!("{}-{}", stem, suffix),
        };
        destination = archive_dir.join(renamed);
    }

    fs::rename(path, &destination)?;
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{DeliveredPrefix, ProcessedLedger};
    use chrono::Utc;
    use crate::upload_queue::upload::Uploader;
    use crate::upload_queue::DEFAULT_REQUEST_TIMEOUT;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    const GOOD_CSV: &str = "Terminal ID,Employee ID,Timestamp,Event\n\
                            T1,E1,2024-03-01 08:00:00,Check In\n\
                            T1,E2,2024-03-01 08:05:00,Check In\n\
                            T1,E3,garbage,Check In\n";

    fn setup(dir: &Path) -> (FileIngestor, UploadQueue) {
        let ledger = ProcessedLedger::load(&dir.join("ledger.json")).unwrap();
        let bus = EventBus::new(64);
        let queue = UploadQueue::new(
            Arc::new(Mutex::new(ledger)),
            bus.clone(),
            Uploader::new(DEFAULT_REQUEST_TIMEOUT).unwrap(),
        );
        let ingestor = FileIngestor::new(dir.to_path_buf(), queue.clone(), bus);
        (ingestor, queue)
    }

    #[test]
    fn test_ingest_queues_good_rows() {
        let temp_dir = tempdir().unwrap();
        let (ingestor, queue) = setup(temp_dir.path());
        let file = temp_dir.path().join("day1.csv");
        fs::write(&file, GOOD_CSV).unwrap();

        let outcome = ingestor.ingest(&file).unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Queued {
                entries: 2,
                skipped_rows: 1
            }
        );
        assert_eq!(queue.get_status().pending, 1);
        assert!(file.exists());

        // Same content again while the first copy is still queued
        let copy = temp_dir.path().join("day1-copy.csv");
        fs::write(&copy, GOOD_CSV).unwrap();
        assert_eq!(ingestor.ingest(&copy).unwrap(), IngestOutcome::AlreadyQueued);
    }

    #[test]
    fn test_ingest_rejects_unparsable_file() {
        let temp_dir = tempdir().unwrap();
        let (ingestor, queue) = setup(temp_dir.path());
        let file = temp_dir.path().join("bad.csv");
        fs::write(&file, "foo,bar\n1,2\n").unwrap();

        let outcome = ingestor.ingest(&file).unwrap();
        assert!(matches!(outcome, IngestOutcome::Rejected { .. }));
        assert!(!file.exists());
        assert!(temp_dir.path().join(REJECTED_DIR).join("bad.csv").exists());
        assert_eq!(queue.get_status().pending, 0);
        assert_eq!(queue.ledger().lock().unwrap().len(), 1);

        // The same broken export again follows the first into rejected/
        let again = temp_dir.path().join("bad-again.csv");
        fs::write(&again, "foo,bar\n1,2\n").unwrap();
        assert_eq!(
            ingestor.ingest(&again).unwrap(),
            IngestOutcome::AlreadyProcessed
        );
        assert!(temp_dir.path().join(REJECTED_DIR).join("bad-again.csv").exists());
    }

    #[test]
    fn test_ingest_skips_already_processed_content() {
        let temp_dir = tempdir().unwrap();
        let (ingestor, queue) = setup(temp_dir.path());
        let file = temp_dir.path().join("again.csv");
        fs::write(&file, GOOD_CSV).unwrap();

        let hash = calculate_bytes_hash_sha256(GOOD_CSV.as_bytes());
        queue
            .ledger()
            .lock()
            .unwrap()
            .record(&hash, "original.csv", LedgerOutcome::Uploaded, 2)
            .unwrap();

        assert_eq!(
            ingestor.ingest(&file).unwrap(),
            IngestOutcome::AlreadyProcessed
        );
        assert!(temp_dir.path().join(PROCESSED_DIR).join("again.csv").exists());
        assert_eq!(queue.get_status().pending, 0);
    }

    const DAY_START: &str = "Terminal ID,Employee ID,Timestamp,Event\n\
                             T1,E1,2024-03-01 08:00:00,Check In\n";

    fn delivered(file: &Path, content: &str, last_row: usize) -> (PathBuf, DeliveredPrefix) {
        (
            file.canonicalize().unwrap(),
            DeliveredPrefix {
                file_hash: calculate_bytes_hash_sha256(content.as_bytes()),
                content_len: content.len() as u64,
                last_row,
                recorded_at: Utc::now(),
            },
        )
    }

    #[test]
    fn test_grown_file_queues_only_appended_rows() {
        let temp_dir = tempdir().unwrap();
        let (ingestor, queue) = setup(temp_dir.path());
        let file = temp_dir.path().join("today.csv");
        fs::write(
            &file,
            format!("{}T1,E2,2024-03-01 08:05:00,Check In\n", DAY_START),
        )
        .unwrap();

        let (path, prefix) = delivered(&file, DAY_START, 2);
        queue.ledger().lock().unwrap().record_prefix(&path, prefix).unwrap();

        assert_eq!(
            ingestor.ingest(&file).unwrap(),
            IngestOutcome::Queued {
                entries: 1,
                skipped_rows: 0
            }
        );
        assert!(file.exists());
    }

    #[test]
    fn test_grown_file_without_new_rows_is_archived() {
        let temp_dir = tempdir().unwrap();
        let (ingestor, queue) = setup(temp_dir.path());
        let file = temp_dir.path().join("today.csv");
        fs::write(&file, format!("{}\n", DAY_START)).unwrap();

        let (path, prefix) = delivered(&file, DAY_START, 2);
        queue.ledger().lock().unwrap().record_prefix(&path, prefix).unwrap();

        assert_eq!(
            ingestor.ingest(&file).unwrap(),
            IngestOutcome::AlreadyProcessed
        );
        assert!(temp_dir.path().join(PROCESSED_DIR).join("today.csv").exists());
        assert_eq!(queue.get_status().pending, 0);
        assert!(queue.ledger().lock().unwrap().delivered_prefix(&path).is_none());
    }

    #[test]
    fn test_rewritten_file_is_sent_whole() {
        let temp_dir = tempdir().unwrap();
        let (ingestor, queue) = setup(temp_dir.path());
        let file = temp_dir.path().join("today.csv");
        // First row corrected by the terminal, so the sent prefix no longer matches
        fs::write(
            &file,
            format!(
                "{}T1,E2,2024-03-01 08:05:00,Check In\n",
                DAY_START.replace("E1", "E7")
            ),
        )
        .unwrap();

        let (path, prefix) = delivered(&file, DAY_START, 2);
        queue.ledger().lock().unwrap().record_prefix(&path, prefix).unwrap();

        assert_eq!(
            ingestor.ingest(&file).unwrap(),
            IngestOutcome::Queued {
                entries: 2,
                skipped_rows: 0
            }
        );
        assert!(queue.ledger().lock().unwrap().delivered_prefix(&path).is_none());
    }

    #[test]
    fn test_newer_version_replaces_queued_one() {
        let temp_dir = tempdir().unwrap();
        let (ingestor, queue) = setup(temp_dir.path());
        let file = temp_dir.path().join("today.csv");

        fs::write(&file, DAY_START).unwrap();
        ingestor.ingest(&file).unwrap();
        fs::write(&file, GOOD_CSV).unwrap();
        ingestor.ingest(&file).unwrap();

        assert_eq!(queue.get_status().pending, 1);
        assert!(!queue.contains_hash(&calculate_bytes_hash_sha256(DAY_START.as_bytes())));
        assert!(queue.contains_hash(&calculate_bytes_hash_sha256(GOOD_CSV.as_bytes())));
    }

    #[test]
    fn test_archive_file_handles_name_collision() {
        let temp_dir = tempdir().unwrap();
        let first = temp_dir.path().join("export.csv");
        fs::write(&first, "one").unwrap();
        let moved = archive_file(&first, PROCESSED_DIR).unwrap();
        assert_eq!(moved, temp_dir.path().join(PROCESSED_DIR).join("export.csv"));

        fs::write(&first, "two").unwrap();
        let moved_again = archive_file(&first, PROCESSED_DIR).unwrap();
        assert_ne!(moved_again, moved);
        assert!(moved_again
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("export-"));
        assert_eq!(fs::read_to_string(moved_again).unwrap(), "two");
    }
}
