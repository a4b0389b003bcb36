//! Queue operations - add, take, requeue, and query upload items.
//!
//! Lock order is always queue, then in_flight, then failed_items.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::types::{EnqueueOutcome, FailedUpload, UploadItem, UploadStatus};
use crate::error::BridgeError;

/// Shared queue state, cloned into the processor and its upload tasks
#[derive(Debug, Clone, Default)]
pub struct QueueState {
    queue: Arc<Mutex<VecDeque<UploadItem>>>,
    processing: Arc<Mutex<usize>>,
    in_flight: Arc<Mutex<HashMap<String, PathBuf>>>, // file hash -> source path
    failed_items: Arc<Mutex<Vec<UploadItem>>>,
}

impl QueueState {
    /// Queue a file version, superseding any waiting or failed version of the same path.
    ///
    /// Refused while an earlier version is in flight, since what remains to be
    /// sent depends on how that upload ends.
    pub fn add_item(&self, item: UploadItem) -> Result<EnqueueOutcome, BridgeError> {
        let mut queue = self.queue.lock()?;

        let in_flight = self
            .in_flight
            .lock()?
            .values()
            .any(|path| *path == item.file_path);
        if in_flight {
            return Ok(EnqueueOutcome::Deferred);
        }

        let replaced = queue
            .iter()
            .position(|queued| queued.file_path == item.file_path)
            .and_then(|index| queue.remove(index));

        self.failed_items
            .lock()?
            .retain(|failed| failed.file_path != item.file_path);

        queue.push_back(item);
        Ok(replaced.map_or(EnqueueOutcome::Added, EnqueueOutcome::Replaced))
    }

    /// Whether a file with this content is pending, uploading or failed
    pub fn contains_hash(&self, file_hash: &str) -> bool {
        let queued = self
            .queue
            .lock()
            .map(|q| q.iter().any(|item| item.file_hash == file_hash))
            .unwrap_or(false);
        let in_flight = self
            .in_flight
            .lock()
            .map(|map| map.contains_key(file_hash))
            .unwrap_or(false);
        let failed = self
            .failed_items
            .lock()
            .map(|items| items.iter().any(|item| item.file_hash == file_hash))
            .unwrap_or(false);

        queued || in_flight || failed
    }

    /// Whether some version of this file is being uploaded right now
    pub fn is_path_in_flight(&self, file_path: &Path) -> bool {
        self.in_flight
            .lock()
            .map(|map| map.values().any(|path| path == file_path))
            .unwrap_or(false)
    }

    /// Remove the oldest item not waiting on a backoff and mark it in flight
    pub fn take_ready_item(&self) -> Option<UploadItem> {
        let mut queue = self.queue.lock().ok()?;
        let now = Utc::now();
        let index = queue.iter().position(|item| item.is_ready(now))?;
        let item = queue.remove(index)?;

        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(item.file_hash.clone(), item.file_path.clone());
        }
        increment_counter(&self.processing);

        Some(item)
    }

    /// Put an item back for a later attempt
    pub fn requeue_item(&self, item: UploadItem) {
        if let Ok(mut q) = self.queue.lock() {
            q.push_back(item);
        }
    }

    pub fn move_to_failed(&self, item: UploadItem) {
        if let Ok(mut failed) = self.failed_items.lock() {
            failed.push(item);
        }
    }

    /// Called once an upload task has settled the item's fate
    pub fn finish(&self, file_hash: &str) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(file_hash);
        }
        decrement_counter(&self.processing);
    }

    pub fn processing_count(&self) -> usize {
        self.processing.lock().map(|count| *count).unwrap_or(0)
    }

    pub fn get_status(&self) -> UploadStatus {
        let pending = self.queue.lock().map(|q| q.len()).unwrap_or(0);
        let failed_files: Vec<FailedUpload> = self
            .failed_items
            .lock()
            .map(|items| {
                items
                    .iter()
                    .map(|item| FailedUpload {
                        file_name: item.file_name.clone(),
                        attempts: item.attempts(),
                        error: item.last_error.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        UploadStatus {
            pending,
            processing: self.processing_count(),
            failed: failed_files.len(),
            failed_files,
        }
    }
}

fn increment_counter(counter: &Arc<Mutex<usize>>) {
    if let Ok(mut count) = counter.lock() {
        *count += 1;
    }
}

fn decrement_counter(counter: &Arc<Mutex<usize>>) {
    if let Ok(mut count) = counter.lock() {
        *count = count.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, hash: &str) -> UploadItem {
        UploadItem::new(
            PathBuf::from(format!("/exports/{}", name)),
            name.to_string(),
            hash.to_string(),
            Vec::new(),
            0,
        )
    }

    #[test]
    fn test_take_skips_items_waiting_on_backoff() {
        let state = QueueState::default();

        let mut waiting = item("a.csv", "ha");
        waiting.next_retry_at = Some(Utc::now() + chrono::Duration::seconds(60));
        state.add_item(waiting).unwrap();
        state.add_item(item("b.csv", "hb")).unwrap();

        let taken = state.take_ready_item().unwrap();
        assert_eq!(taken.file_name, "b.csv");
        assert!(state.take_ready_item().is_none());

        let status = state.get_status();
        assert_eq!(status.pending, 1);
        assert_eq!(status.processing, 1);
    }

    #[test]
    fn test_contains_hash_tracks_every_stage() {
        let state = QueueState::default();
        state.add_item(item("a.csv", "ha")).unwrap();
        assert!(state.contains_hash("ha"));

        let taken = state.take_ready_item().unwrap();
        assert!(state.contains_hash("ha"));
        assert!(state.is_path_in_flight(Path::new("/exports/a.csv")));

        state.move_to_failed(taken);
        state.finish("ha");
        assert!(state.contains_hash("ha"));
        assert!(!state.contains_hash("other"));
        assert!(!state.is_path_in_flight(Path::new("/exports/a.csv")));

        let status = state.get_status();
        assert_eq!(status.processing, 0);
        assert_eq!(status.failed, 1);
        assert_eq!(status.failed_files[0].file_name, "a.csv");
    }

    #[test]
    fn test_newer_version_replaces_waiting_and_failed_versions() {
        let state = QueueState::default();
        state.move_to_failed(item("a.csv", "old-failed"));
        state.add_item(item("a.csv", "v1")).unwrap();
        state.add_item(item("b.csv", "hb")).unwrap();

        match state.add_item(item("a.csv", "v2")).unwrap() {
            EnqueueOutcome::Replaced(old) => assert_eq!(old.file_hash, "v1"),
            other => panic!("expected a replacement, got {:?}", other),
        }

        assert!(!state.contains_hash("v1"));
        assert!(!state.contains_hash("old-failed"));
        assert!(state.contains_hash("v2"));

        let status = state.get_status();
        assert_eq!(status.pending, 2);
        assert_eq!(status.failed, 0);
    }

    #[test]
    fn test_version_of_in_flight_file_is_deferred() {
        let state = QueueState::default();
        state.add_item(item("a.csv", "v1")).unwrap();
        let _taken = state.take_ready_item().unwrap();

        assert!(matches!(
            state.add_item(item("a.csv", "v2")).unwrap(),
            EnqueueOutcome::Deferred
        ));
        assert!(!state.contains_hash("v2"));

        state.finish("v1");
        assert!(matches!(
            state.add_item(item("a.csv", "v2")).unwrap(),
            EnqueueOutcome::Added
        ));
    }

    #[test]
    fn test_finish_releases_hash() {
        let state = QueueState::default();
        state.add_item(item("a.csv", "ha")).unwrap();
        let _taken = state.take_ready_item().unwrap();

        state.finish("ha");
        assert!(!state.contains_hash("ha"));
        assert_eq!(state.processing_count(), 0);
    }
}
