use super::{EventBus, MonitorEvent};
use crate::logging::ActivityLog;
use crate::status::{save_status, MonitorStatus};
use crate::upload_queue::UploadQueue;
use std::path::PathBuf;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Handler that writes events to the activity log (and through it, tracing)
pub struct ActivityEventHandler {
    event_bus: EventBus,
    activity_log: ActivityLog,
    stop_rx: watch::Receiver<bool>,
}

impl ActivityEventHandler {
    pub fn new(event_bus: EventBus, activity_log: ActivityLog, stop_rx: watch::Receiver<bool>) -> Self {
        Self {
            event_bus,
            activity_log,
            stop_rx,
        }
    }

    pub fn start(mut self) -> JoinHandle<()> {
        let mut rx = self.event_bus.subscribe();

        tokio::spawn(async move {
            loop {
                // Drain queued events before honouring the stop signal
                tokio::select! {
                    biased;
                    result = rx.recv() => {
                        match result {
                            Ok(event) => self.handle_event(&event),
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Activity handler stopped (event bus closed)");
                                break;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Activity handler lagged {} events", n);
                            }
                        }
                    }
                    _ = self.stop_rx.changed() => {
                        debug!("Activity handler stopping");
                        break;
                    }
                }
            }
        })
    }

    fn handle_event(&self, event: &MonitorEvent) {
        if let Err(e) = self
            .activity_log
            .record(event.level(), &event.message(), event.file_name())
        {
            error!("Failed to write activity log: {}", e);
        }
    }
}

/// Handler that keeps `status.json` in step with the queue
pub struct StatusEventHandler {
    event_bus: EventBus,
    queue: UploadQueue,
    status_path: PathBuf,
    status: MonitorStatus,
    stop_rx: watch::Receiver<bool>,
}

impl StatusEventHandler {
    pub fn new(
        event_bus: EventBus,
        queue: UploadQueue,
        status_path: PathBuf,
        status: MonitorStatus,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            event_bus,
            queue,
            status_path,
            status,
            stop_rx,
        }
    }

    /// Runs until stopped and hands back the final snapshot
    pub fn start(mut self) -> JoinHandle<MonitorStatus> {
        let mut rx = self.event_bus.subscribe();

        tokio::spawn(async move {
            self.persist();

            loop {
                tokio::select! {
                    biased;
                    result = rx.recv() => {
                        match result {
                            Ok(event) => {
                                self.status.apply(&event);
                                self.persist();
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                // Counters may be short; queue sizes are refreshed regardless
                                warn!("Status handler lagged {} events", n);
                                self.persist();
                            }
                        }
                    }
                    _ = self.stop_rx.changed() => break,
                }
            }

            self.persist();
            self.status
        })
    }

    fn persist(&mut self) {
        self.status.set_queue(self.queue.get_status());
        if let Err(e) = save_status(&self.status_path, &self.status) {
            error!("Failed to save status snapshot: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MonitorEventPayload;
    use crate::ledger::ProcessedLedger;
    use crate::logging::ActivityLevel;
    use crate::status::{load_status, MonitorState};
    use crate::upload_queue::upload::Uploader;
    use crate::upload_queue::DEFAULT_REQUEST_TIMEOUT;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_activity_handler_drains_before_stopping() {
        let temp_dir = tempdir().unwrap();
        let bus = EventBus::new(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let log = ActivityLog::new(temp_dir.path().join("activity.log"));

        let handle = ActivityEventHandler::new(bus.clone(), log.clone(), stop_rx).start();

        bus.publish(MonitorEventPayload::FileRejected {
            file_name: "bad.csv".to_string(),
            reason: "no terminal column found".to_string(),
        })
        .unwrap();
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let entries = log.read_recent(None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, ActivityLevel::Warn);
        assert_eq!(entries[0].file.as_deref(), Some("bad.csv"));
    }

    #[tokio::test]
    async fn test_status_handler_folds_events_and_persists() {
        let temp_dir = tempdir().unwrap();
        let bus = EventBus::new(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let ledger = ProcessedLedger::load(&temp_dir.path().join("ledger.json")).unwrap();
        let queue = UploadQueue::new(
            Arc::new(Mutex::new(ledger)),
            bus.clone(),
            Uploader::new(DEFAULT_REQUEST_TIMEOUT).unwrap(),
        );
        let status_path = temp_dir.path().join("status.json");
        let initial = MonitorStatus::running(42, temp_dir.path().to_path_buf(), "http://x".into());

        let handle = StatusEventHandler::new(
            bus.clone(),
            queue,
            status_path.clone(),
            initial,
            stop_rx,
        )
        .start();

        bus.publish(MonitorEventPayload::UploadSucceeded {
            file_name: "day1.csv".to_string(),
            entries: 3,
            attempts: 1,
        })
        .unwrap();
        bus.publish(MonitorEventPayload::MonitoringStopped).unwrap();
        stop_tx.send(true).unwrap();

        let status = handle.await.unwrap();
        assert_eq!(status.uploaded_files, 1);
        assert_eq!(status.uploaded_entries, 3);
        assert_eq!(status.state, MonitorState::Stopped);

        let saved = load_status(&status_path);
        assert_eq!(saved.uploaded_files, 1);
        assert_eq!(saved.pid, Some(42));
    }

    #[tokio::test]
    async fn test_handler_stops_when_monitor_goes_away() {
        let temp_dir = tempdir().unwrap();
        let bus = EventBus::new(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let log = ActivityLog::new(temp_dir.path().join("activity.log"));

        let handle = ActivityEventHandler::new(bus.clone(), log, stop_rx).start();
        drop(stop_tx);

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("handler kept running without a stop sender")
            .unwrap();
    }
}
