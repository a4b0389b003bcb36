use crate::error::BridgeError;
use crate::ingest::{FileIngestor, IngestOutcome};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// How long a file's size must stay unchanged before it is read
    pub settle_delay: Duration,
    /// Full folder scan interval, catching anything notifications missed
    pub rescan_interval: Duration,
    /// Channel wait between checks of the running flag
    pub event_timeout: Duration,
    /// Only used when the platform falls back to polling
    pub poll_interval: Duration,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            rescan_interval: Duration::from_secs(30),
            event_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Export files are visible, regular `.csv` files
pub fn is_export_candidate(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|name| !name.starts_with('.'))
        .unwrap_or(false);

    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    visible && is_csv && path.is_file()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    size: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn read(path: &Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        Some(Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// Empty files get this many settle delays to gain content before ingest rejects them
const EMPTY_SETTLE_FACTOR: u32 = 5;

#[derive(Debug, Clone)]
struct PendingFile {
    stamp: FileStamp,
    last_change: Instant,
}

impl PendingFile {
    fn new(stamp: FileStamp) -> Self {
        Self {
            stamp,
            last_change: Instant::now(),
        }
    }

    /// Restart the settle clock when size or mtime moved
    fn refresh(&mut self, stamp: FileStamp) -> bool {
        if self.stamp == stamp {
            return false;
        }
        self.stamp = stamp;
        self.last_change = Instant::now();
        true
    }
}

/// Tracks files from first sighting until their size and mtime settle
#[derive(Debug, Default)]
pub struct PendingFiles {
    pending: HashMap<PathBuf, PendingFile>,
    handled: HashMap<PathBuf, FileStamp>,
}

impl PendingFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a file that was created or changed
    pub fn observe(&mut self, path: &Path) {
        if !is_export_candidate(path) {
            return;
        }

        let Some(stamp) = FileStamp::read(path) else {
            return;
        };

        // Unchanged since we last handed it on
        if self.handled.get(path) == Some(&stamp) {
            return;
        }

        self.pending
            .entry(path.to_path_buf())
            .or_insert_with(|| PendingFile::new(stamp))
            .refresh(stamp);
    }

    /// Look at a handed-on file again after a fresh settle delay
    pub fn retry_later(&mut self, path: &Path) {
        self.handled.remove(path);
        if let Some(stamp) = FileStamp::read(path) {
            self.pending.insert(path.to_path_buf(), PendingFile::new(stamp));
        }
    }

    /// Files whose size and mtime have held still for `settle_delay`.
    /// Empty files wait several delays, then go on to be rejected.
    pub fn take_ready(&mut self, settle_delay: Duration) -> Vec<PathBuf> {
        let mut ready = Vec::new();

        self.pending.retain(|path, file| {
            let Some(stamp) = FileStamp::read(path) else {
                // Deleted or moved away before it settled
                return false;
            };

            if file.refresh(stamp) {
                return true;
            }

            let required = if stamp.size == 0 {
                settle_delay * EMPTY_SETTLE_FACTOR
            } else {
                settle_delay
            };
            if file.last_change.elapsed() < required {
                return true;
            }

            self.handled.insert(path.clone(), stamp);
            ready.push(path.clone());
            false
        });

        ready.sort();
        ready
    }

    /// Forget handled files that have since been moved or deleted
    pub fn prune_handled(&mut self) {
        self.handled.retain(|path, _| path.exists());
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Watches one folder (non-recursively) and feeds settled exports to the ingestor
pub struct FolderWatcher {
    _watcher: RecommendedWatcher,
    thread_handle: Option<thread::JoinHandle<()>>,
    is_running: Arc<Mutex<bool>>,
}

impl FolderWatcher {
    pub fn new(
        folder: &Path,
        ingestor: FileIngestor,
        settings: WatcherSettings,
    ) -> Result<Self, BridgeError> {
        let folder = folder.canonicalize()?;

        // Create file system event channel
        let (tx, rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            tx,
            Config::default().with_poll_interval(settings.poll_interval),
        )?;
        watcher.watch(&folder, RecursiveMode::NonRecursive)?;

        info!(folder = %folder.display(), "Watching folder for export files");

        let is_running = Arc::new(Mutex::new(true));
        let is_running_clone = Arc::clone(&is_running);
        let folder_clone = folder.clone();

        let thread_handle = thread::Builder::new()
            .name("folder-watcher".to_string())
            .spawn(move || {
                Self::file_event_processor(rx, folder_clone, ingestor, settings, is_running_clone);
            })?;

        Ok(Self {
            _watcher: watcher,
            thread_handle: Some(thread_handle),
            is_running,
        })
    }

    fn file_event_processor(
        rx: mpsc::Receiver<Result<Event, notify::Error>>,
        folder: PathBuf,
        ingestor: FileIngestor,
        settings: WatcherSettings,
        is_running: Arc<Mutex<bool>>,
    ) {
        let mut pending = PendingFiles::new();
        let mut last_scan: Option<Instant> = None;

        loop {
            if !Self::still_running(&is_running) {
                break;
            }

            // The first pass picks up files exported while we were not running
            if last_scan.map_or(true, |at| at.elapsed() >= settings.rescan_interval) {
                if let Err(e) = Self::scan_folder(&folder, &mut pending) {
                    warn!(folder = %folder.display(), "Folder scan failed: {}", e);
                }
                pending.prune_handled();
                last_scan = Some(Instant::now());
            }

            match rx.recv_timeout(settings.event_timeout) {
                Ok(Ok(event)) => {
                    if Self::is_relevant_event(&event) {
                        for path in &event.paths {
                            pending.observe(path);
                        }
                    }
                }
                Ok(Err(error)) => {
                    error!("File watcher error: {:?}", error);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    // Timeout is normal, continue to check pending files
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    error!("File watcher channel disconnected");
                    break;
                }
            }

            for path in pending.take_ready(settings.settle_delay) {
                // Do not start new work once a stop was requested
                if !Self::still_running(&is_running) {
                    break;
                }

                match ingestor.ingest(&path) {
                    Ok(IngestOutcome::Queued {
                        entries,
                        skipped_rows,
                    }) => debug!(path = %path.display(), entries, skipped_rows, "File queued"),
                    Ok(IngestOutcome::Deferred) => pending.retry_later(&path),
                    Ok(outcome) => debug!(path = %path.display(), ?outcome, "File not queued"),
                    Err(e) => ingestor.report_failure(&path, &e),
                }
            }
        }

        info!("Folder monitoring stopped");
    }

    fn still_running(is_running: &Arc<Mutex<bool>>) -> bool {
        is_running.lock().map(|running| *running).unwrap_or(false)
    }

    fn is_relevant_event(event: &Event) -> bool {
        matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
    }

    fn scan_folder(folder: &Path, pending: &mut PendingFiles) -> Result<(), BridgeError> {
        for entry in std::fs::read_dir(folder)?.flatten() {
            pending.observe(&entry.path());
        }
        Ok(())
    }

    pub fn stop(&self) {
        if let Ok(mut running) = self.is_running.lock() {
            *running = false;
        }
    }

    /// Stop and hand back the worker thread so the caller can wait for it
    pub fn shutdown(mut self) -> Option<thread::JoinHandle<()>> {
        self.stop();
        self.thread_handle.take()
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
