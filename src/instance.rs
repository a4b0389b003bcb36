//! One monitor per data directory.
//!
//! The lock lives on `monitor.lock`; the PID goes in a separate
//! `monitor.pid` so it stays readable while the lock is held on Windows.

use crate::error::BridgeError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug)]
pub struct PidLock {
    file: File,
    pid_path: PathBuf,
}

impl PidLock {
    pub fn acquire(lock_path: &Path, pid_path: &Path) -> Result<Self, BridgeError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)?;

        if FileExt::try_lock_exclusive(&file).is_err() {
            let holder = read_pid(pid_path)
                .map(|pid| format!(" (pid {})", pid))
                .unwrap_or_default();
            return Err(BridgeError::Other(format!(
                "Monitoring is already running{}",
                holder
            )));
        }

        fs::write(pid_path, std::process::id().to_string())?;
        debug!(pid = std::process::id(), "Acquired monitor lock");

        Ok(Self {
            file,
            pid_path: pid_path.to_path_buf(),
        })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.pid_path);
        let _ = FileExt::unlock(&self.file);
    }
}

pub fn read_pid(pid_path: &Path) -> Option<u32> {
    fs::read_to_string(pid_path).ok()?.trim().parse().ok()
}

/// Whether some process currently holds the monitor lock
pub fn is_monitor_running(lock_path: &Path) -> bool {
    let Ok(file) = OpenOptions::new().read(true).write(true).open(lock_path) else {
        return false;
    };

    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(_) => true,
    }
}
