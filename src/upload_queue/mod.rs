// Module declarations
pub mod hashing;
mod processor;
mod queue_manager;
mod types;
pub mod upload;

pub use types::*;

use crate::error::BridgeError;
use crate::events::EventBus;
use crate::ledger::ProcessedLedger;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use upload::{RetryStrategy, Uploader};

use processor::UploadProcessor;
use queue_manager::QueueState;

#[derive(Clone)]
pub struct UploadQueue {
    state: QueueState,
    ledger: Arc<Mutex<ProcessedLedger>>,
    is_running: Arc<Mutex<bool>>,
    target: Arc<Mutex<Option<UploadTarget>>>,
    upload_semaphore: Arc<Semaphore>, // Limit concurrent uploads
    uploader: Uploader,
    retry: Arc<RetryStrategy>,
    event_bus: EventBus,
}

impl std::fmt::Debug for UploadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadQueue")
            .field("state", &self.state)
            .field("ledger", &"<ledger>")
            .field("is_running", &self.is_running)
            .field("target", &"<target>")
            .field("upload_semaphore", &"<semaphore>")
            .field("retry", &self.retry)
            .finish()
    }
}

impl UploadQueue {
    pub fn new(
        ledger: Arc<Mutex<ProcessedLedger>>,
        event_bus: EventBus,
        uploader: Uploader,
    ) -> Self {
        Self {
            state: QueueState::default(),
            ledger,
            is_running: Arc::new(Mutex::new(false)),
            target: Arc::new(Mutex::new(None)),
            upload_semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_UPLOADS)),
            uploader,
            retry: Arc::new(RetryStrategy::default()),
            event_bus,
        }
    }

    pub fn with_retry_strategy(mut self, retry: RetryStrategy) -> Self {
        self.retry = Arc::new(retry);
        self
    }

    pub fn set_target(&self, target: UploadTarget) {
        if let Ok(mut target_guard) = self.target.lock() {
            *target_guard = Some(target);
        }
    }

    pub fn enqueue(&self, item: UploadItem) -> Result<EnqueueOutcome, BridgeError> {
        self.state.add_item(item)
    }

    /// Whether content with this hash is already somewhere in the queue
    pub fn contains_hash(&self, file_hash: &str) -> bool {
        self.state.contains_hash(file_hash)
    }

    pub fn is_path_in_flight(&self, file_path: &Path) -> bool {
        self.state.is_path_in_flight(file_path)
    }

    pub fn ledger(&self) -> &Arc<Mutex<ProcessedLedger>> {
        &self.ledger
    }

    pub fn get_status(&self) -> UploadStatus {
        self.state.get_status()
    }

    pub fn start_processing(&self) -> Option<JoinHandle<()>> {
        let processor = UploadProcessor::new(
            self.state.clone(),
            Arc::clone(&self.ledger),
            Arc::clone(&self.is_running),
            Arc::clone(&self.target),
            Arc::clone(&self.upload_semaphore),
            self.uploader.clone(),
            Arc::clone(&self.retry),
            self.event_bus.clone(),
        );

        processor.start()
    }

    /// Stop picking up new items; uploads already started run to completion
    pub fn stop_processing(&self) {
        if let Ok(mut running) = self.is_running.lock() {
            *running = false;
        }
    }

    /// Wait for started uploads to finish, up to `timeout`
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.state.processing_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}
