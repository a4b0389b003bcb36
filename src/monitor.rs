//! Wires watcher, ingest, upload queue and event handlers into one running monitor.

use crate::config::{BridgeConfig, DataDir};
use crate::error::BridgeError;
use crate::events::{ActivityEventHandler, EventBus, MonitorEventPayload, StatusEventHandler};
use crate::file_watcher::{FolderWatcher, WatcherSettings};
use crate::ingest::FileIngestor;
use crate::instance::PidLock;
use crate::ledger::ProcessedLedger;
use crate::logging::ActivityLog;
use crate::status::MonitorStatus;
use crate::upload_queue::upload::{RetryStrategy, Uploader};
use crate::upload_queue::{UploadQueue, UploadStatus, UploadTarget, DEFAULT_REQUEST_TIMEOUT};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub watcher: WatcherSettings,
    pub retry: RetryStrategy,
    pub request_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            watcher: WatcherSettings::default(),
            retry: RetryStrategy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub struct Monitor {
    folder: PathBuf,
    queue: UploadQueue,
    event_bus: EventBus,
    /// Flipped to `true` once the event handlers should finish
    stop_tx: watch::Sender<bool>,
    watcher: FolderWatcher,
    processor_handle: Option<JoinHandle<()>>,
    activity_handle: JoinHandle<()>,
    status_handle: JoinHandle<MonitorStatus>,
    drain_timeout: Duration,
    _lock: PidLock,
}

impl Monitor {
    /// Validate the configuration and start monitoring; must run inside a tokio runtime
    pub fn start(
        data_dir: &DataDir,
        config: &BridgeConfig,
        settings: MonitorSettings,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        data_dir.ensure()?;

        let lock = PidLock::acquire(&data_dir.lock_file(), &data_dir.pid_file())?;
        let folder = config.watched_folder().canonicalize()?;
        let target = UploadTarget::from(config);

        let ledger = ProcessedLedger::load(&data_dir.ledger_file())?;
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        let uploader = Uploader::new(settings.request_timeout)?;
        let queue = UploadQueue::new(Arc::new(Mutex::new(ledger)), event_bus.clone(), uploader)
            .with_retry_strategy(settings.retry);
        queue.set_target(target.clone());

        // Handlers subscribe before anything can publish
        let activity_handle = ActivityEventHandler::new(
            event_bus.clone(),
            ActivityLog::new(data_dir.activity_log_file()),
            stop_rx.clone(),
        )
        .start();

        let status = MonitorStatus::running(
            std::process::id(),
            folder.clone(),
            target.endpoint.clone(),
        );
        let status_handle = StatusEventHandler::new(
            event_bus.clone(),
            queue.clone(),
            data_dir.status_file(),
            status,
            stop_rx,
        )
        .start();

        let processor_handle = queue.start_processing();

        let ingestor = FileIngestor::new(folder.clone(), queue.clone(), event_bus.clone());
        let watcher = match FolderWatcher::new(&folder, ingestor, settings.watcher) {
            Ok(watcher) => watcher,
            Err(e) => {
                queue.stop_processing();
                let _ = stop_tx.send(true);
                return Err(e);
            }
        };

        info!(
            folder = %folder.display(),
            endpoint = %target.endpoint,
            api_key = %config.masked_api_key(),
            "Monitor started"
        );

        let _ = event_bus.publish(MonitorEventPayload::MonitoringStarted {
            folder: folder.clone(),
            endpoint: target.endpoint,
        });

        Ok(Self {
            folder,
            queue,
            event_bus,
            stop_tx,
            watcher,
            processor_handle,
            activity_handle,
            status_handle,
            drain_timeout: settings.request_timeout + Duration::from_secs(1),
            _lock: lock,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn upload_status(&self) -> UploadStatus {
        self.queue.get_status()
    }

    /// Stop watching, let a started upload finish, and return the final status
    pub async fn stop(self) -> Result<MonitorStatus, BridgeError> {
        let Monitor {
            queue,
            event_bus,
            stop_tx,
            watcher,
            processor_handle,
            activity_handle,
            status_handle,
            drain_timeout,
            _lock,
            ..
        } = self;

        if let Some(handle) = watcher.shutdown() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }

        queue.stop_processing();
        if let Some(handle) = processor_handle {
            let _ = handle.await;
        }

        if !queue.wait_idle(drain_timeout).await {
            warn!("Stopping with an upload still in flight");
        }

        let _ = event_bus.publish(MonitorEventPayload::MonitoringStopped);
        let _ = stop_tx.send(true);

        let _ = activity_handle.await;
        let status = status_handle
            .await
            .map_err(|e| BridgeError::Other(format!("Status handler failed: {}", e)))?;

        info!("Monitor stopped");
        Ok(status)
    }
}

/// Run until Ctrl-C (or SIGTERM on Unix), then stop cleanly
pub async fn run_until_signal(monitor: Monitor) -> Result<MonitorStatus, BridgeError> {
    wait_for_shutdown_signal().await;
    info!("Shutdown requested");
    monitor.stop().await
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_start_requires_valid_config() {
        let temp_dir = tempdir().unwrap();
        let data_dir = DataDir::new(temp_dir.path().join("data"));

        let config = BridgeConfig::default();
        let err = Monitor::start(&data_dir, &config, MonitorSettings::default())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Configuration error: API Endpoint is required");
        assert!(!data_dir.pid_file().exists());
    }

    #[tokio::test]
    async fn test_start_and_stop_writes_status() {
        let temp_dir = tempdir().unwrap();
        let data_dir = DataDir::new(temp_dir.path().join("data"));
        let folder = temp_dir.path().join("exports");
        std::fs::create_dir_all(&folder).unwrap();

        let config = BridgeConfig {
            api_endpoint: "http://127.0.0.1:9/attendance".to_string(),
            api_key: "secret".to_string(),
            folder_path: folder.to_string_lossy().into_owned(),
            ..Default::default()
        };

        let monitor = Monitor::start(&data_dir, &config, MonitorSettings::default()).unwrap();
        assert!(data_dir.pid_file().exists());

        // A second monitor on the same data dir is refused
        assert!(Monitor::start(&data_dir, &config, MonitorSettings::default()).is_err());

        let status = monitor.stop().await.unwrap();
        assert_eq!(status.state, crate::status::MonitorState::Stopped);
        assert!(!data_dir.pid_file().exists());

        let saved = crate::status::load_status(&data_dir.status_file());
        assert_eq!(saved.state, crate::status::MonitorState::Stopped);

        let activity = ActivityLog::new(data_dir.activity_log_file())
            .read_recent(None)
            .unwrap();
        assert!(activity.iter().any(|e| e.message == "Monitoring stopped"));
    }
}
