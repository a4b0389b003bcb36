//! Main upload processor with task management.
//!
//! Handles the processing loop and the success/failure bookkeeping for
//! each upload attempt.

use crate::error::BridgeError;
use crate::events::{EventBus, MonitorEventPayload};
use crate::ingest::{archive_file, PROCESSED_DIR};
use crate::ledger::{DeliveredPrefix, LedgerOutcome, ProcessedLedger};
use chrono::Utc;
use std::fs;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::hashing::{calculate_bytes_hash_sha256, calculate_prefix_hash_sha256};
use super::queue_manager::QueueState;
use super::types::{UploadItem, UploadTarget, PROCESSOR_TICK};
use super::upload::{ErrorType, RetryStrategy, UploadFailure, Uploader};

/// Main upload processor that manages the processing loop
#[derive(Clone)]
pub struct UploadProcessor {
    state: QueueState,
    ledger: Arc<Mutex<ProcessedLedger>>,
    is_running: Arc<Mutex<bool>>,
    target: Arc<Mutex<Option<UploadTarget>>>,
    semaphore: Arc<Semaphore>,
    uploader: Uploader,
    retry: Arc<RetryStrategy>,
    event_bus: EventBus,
}

impl UploadProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: QueueState,
        ledger: Arc<Mutex<ProcessedLedger>>,
        is_running: Arc<Mutex<bool>>,
        target: Arc<Mutex<Option<UploadTarget>>>,
        semaphore: Arc<Semaphore>,
        uploader: Uploader,
        retry: Arc<RetryStrategy>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            state,
            ledger,
            is_running,
            target,
            semaphore,
            uploader,
            retry,
            event_bus,
        }
    }

    /// Start the processing loop; `None` when it is already running
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if !self.try_start() {
            return None;
        }

        let processor = self.clone();

        Some(tokio::spawn(async move {
            info!("Upload processor started");
            processor.run_loop().await;
            info!("Upload processor stopped");
        }))
    }

    async fn run_loop(&self) {
        loop {
            if !self.should_continue() {
                break;
            }

            if self.current_target().is_some() {
                self.process_available_items();
            }

            // Brief sleep to avoid busy-waiting
            sleep(PROCESSOR_TICK).await;
        }
    }

    fn should_continue(&self) -> bool {
        self.is_running
            .lock()
            .map(|running| *running)
            .unwrap_or(false)
    }

    fn current_target(&self) -> Option<UploadTarget> {
        self.target.lock().ok().and_then(|t| t.clone())
    }

    /// Start uploads up to the semaphore limit
    fn process_available_items(&self) {
        loop {
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                break;
            };

            let Some(item) = self.state.take_ready_item() else {
                break;
            };

            self.spawn_upload_task(item, permit);
        }
    }

    fn spawn_upload_task(&self, item: UploadItem, permit: OwnedSemaphorePermit) {
        let processor = self.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let file_hash = item.file_hash.clone();

            match processor.current_target() {
                Some(target) => {
                    info!(
                        file = %item.file_name,
                        records = item.entries.len(),
                        "Uploading (attempt {})",
                        item.attempts()
                    );

                    match processor.uploader.upload(&item, &target).await {
                        Ok(()) => processor.handle_upload_success(item),
                        Err(failure) => processor.handle_upload_failure(item, failure),
                    }
                }
                None => processor.state.requeue_item(item),
            }

            processor.state.finish(&file_hash);
        });
    }

    fn handle_upload_success(&self, item: UploadItem) {
        let entries = item.entries.len();

        // Ledger first: a duplicate check that misses the in-flight set must hit the ledger
        match self.ledger.lock() {
            Ok(mut ledger) => {
                if let Err(e) = ledger.record(
                    &item.file_hash,
                    &item.file_name,
                    LedgerOutcome::Uploaded,
                    entries,
                ) {
                    error!(file = %item.file_name, "Failed to save processed ledger: {}", e);
                }
                if let Err(e) = Self::settle_source_file(&mut ledger, &item) {
                    error!(file = %item.file_name, "Failed to save processed ledger: {}", e);
                }
            }
            Err(e) => error!("Processed ledger lock poisoned: {}", e),
        }

        let _ = self
            .event_bus
            .publish(MonitorEventPayload::UploadSucceeded {
                file_name: item.file_name.clone(),
                entries,
                attempts: item.attempts(),
            });
    }

    /// Archive the delivered file, unless it changed while the request was out
    fn settle_source_file(
        ledger: &mut ProcessedLedger,
        item: &UploadItem,
    ) -> Result<(), BridgeError> {
        let content = match fs::read(&item.file_path) {
            Ok(content) => content,
            Err(e) => {
                warn!(file = %item.file_name, "Uploaded file is no longer readable: {}", e);
                return ledger.clear_prefix(&item.file_path);
            }
        };

        if calculate_bytes_hash_sha256(&content) == item.file_hash {
            match archive_file(&item.file_path, PROCESSED_DIR) {
                Ok(destination) => {
                    debug!(file = %item.file_name, to = %destination.display(), "Archived uploaded file")
                }
                Err(e) => warn!(file = %item.file_name, "Uploaded but could not archive: {}", e),
            }
            return ledger.clear_prefix(&item.file_path);
        }

        let grown = calculate_prefix_hash_sha256(&content, item.content_len).as_deref()
            == Some(item.file_hash.as_str());

        if grown {
            info!(file = %item.file_name, "File grew during upload, appended rows will follow");
            ledger.record_prefix(
                &item.file_path,
                DeliveredPrefix {
                    file_hash: item.file_hash.clone(),
                    content_len: item.content_len,
                    last_row: item.last_row,
                    recorded_at: Utc::now(),
                },
            )
        } else {
            warn!(file = %item.file_name, "File was rewritten during upload, leaving it in place");
            ledger.clear_prefix(&item.file_path)
        }
    }

    fn handle_upload_failure(&self, mut item: UploadItem, failure: UploadFailure) {
        item.last_error = Some(failure.message.clone());
        let attempts = item.attempts();

        if self.retry.should_retry(&item, failure.error_type) {
            let delay = self.retry.schedule_retry(&mut item);
            item.retry_count += 1;

            let _ = self
                .event_bus
                .publish(MonitorEventPayload::UploadRetrying {
                    file_name: item.file_name.clone(),
                    attempt: attempts,
                    delay_ms: delay.as_millis() as u64,
                    error: failure.message,
                });

            self.state.requeue_item(item);
            return;
        }

        if failure.error_type == ErrorType::Client {
            warn!(file = %item.file_name, "Endpoint refused the upload, not retrying");
        }

        let file_name = item.file_name.clone();
        self.state.move_to_failed(item);

        let _ = self
            .event_bus
            .publish(MonitorEventPayload::UploadFailed {
                file_name,
                attempts,
                error: failure.message,
            });
    }

    fn try_start(&self) -> bool {
        let Ok(mut is_running) = self.is_running.lock() else {
            return false;
        };

        if *is_running {
            return false;
        }

        *is_running = true;
        true
    }
}
