use crate::error::BridgeError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, Once};
use tracing::{error, info, warn};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Rotate the activity log once it grows past this size (10MB)
const MAX_ACTIVITY_LOG_SIZE: u64 = 10 * 1024 * 1024;
/// Number of rotated activity logs kept next to the live one
const MAX_ACTIVITY_LOG_BACKUPS: u32 = 5;

static LOGGER_INITIALIZED: Once = Once::new();

// Keep the guard alive for the lifetime of the program
static FILE_APPENDER_GUARD: LazyLock<Mutex<Option<tracing_appender::non_blocking::WorkerGuard>>> =
    LazyLock::new(|| Mutex::new(None));

/// Install console and `app.log` file logging
pub fn init_logging(logs_dir: &Path, verbose: bool) -> Result<(), BridgeError> {
    std::fs::create_dir_all(logs_dir)?;

    LOGGER_INITIALIZED.call_once(|| {
        let default_level = if verbose { "debug" } else { "info" };
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        // Console output doubles as the live status view
        let console_layer = fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_filter(env_filter.clone());

        // File logging for all application output
        let file_appender = tracing_appender::rolling::never(logs_dir, "app.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if let Ok(mut guard_mutex) = FILE_APPENDER_GUARD.lock() {
            *guard_mutex = Some(guard);
        }

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_filter(env_filter);

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .init();
    });

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivityLevel {
    Info,
    Warn,
    Error,
}

/// One line of the activity log shown by the status display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: String,
    pub level: ActivityLevel,
    pub message: String,
    pub file: Option<String>,
}

/// JSON-lines log of monitoring activity
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log to tracing and append to the activity file
    pub fn record(
        &self,
        level: ActivityLevel,
        message: &str,
        file: Option<&str>,
    ) -> Result<(), BridgeError> {
        let file_field = file.unwrap_or("-");
        match level {
            ActivityLevel::Error => error!(file = file_field, "{}", message),
            ActivityLevel::Warn => warn!(file = file_field, "{}", message),
            ActivityLevel::Info => info!(file = file_field, "{}", message),
        }

        let entry = ActivityEntry {
            timestamp: Utc::now().to_rfc3339(),
            level,
            message: message.to_string(),
            file: file.map(str::to_string),
        };
        self.append(&entry)
    }

    fn append(&self, entry: &ActivityEntry) -> Result<(), BridgeError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if should_rotate_log(&self.path)? {
            rotate_log_file(&self.path)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json_line = serde_json::to_string(entry)?;
        writeln!(file, "{}", json_line)?;
        file.flush()?;

        Ok(())
    }

    /// Most recent entries first, at most `max_lines` of them
    pub fn read_recent(&self, max_lines: Option<usize>) -> Result<Vec<ActivityEntry>, BridgeError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();

        for line in reader.lines() {
            let line = line?;
            // Lines from an interrupted write are not worth failing over
            if let Ok(entry) = serde_json::from_str::<ActivityEntry>(&line) {
                entries.push(entry);
            }
        }

        entries.reverse();

        if let Some(max) = max_lines {
            entries.truncate(max);
        }

        Ok(entries)
    }

    /// Empty the activity log (the "Clear Console" action)
    pub fn clear(&self) -> Result<(), BridgeError> {
        if self.path.exists() {
            File::create(&self.path)?;
        }
        Ok(())
    }
}

fn should_rotate_log(log_file_path: &Path) -> Result<bool, BridgeError> {
    if !log_file_path.exists() {
        return Ok(false);
    }

    let metadata = std::fs::metadata(log_file_path)?;
    Ok(metadata.len() > MAX_ACTIVITY_LOG_SIZE)
}

fn rotate_log_file(log_file_path: &Path) -> Result<(), BridgeError> {
    // Shift existing backups up by one (4 -> 5, 3 -> 4, etc.)
    for i in (1..MAX_ACTIVITY_LOG_BACKUPS).rev() {
        let current_backup = log_file_path.with_extension(format!("log.{}", i));
        let next_backup = log_file_path.with_extension(format!("log.{}", i + 1));

        if current_backup.exists() {
            std::fs::rename(&current_backup, &next_backup)?;
        }
    }

    if log_file_path.exists() {
        let first_backup = log_file_path.with_extension("log.1");
        std::fs::rename(log_file_path, first_backup)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_rotation() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("activity.log");

        {
            let mut file = File::create(&log_file).unwrap();
            let large_content = "x".repeat(11 * 1024 * 1024); // 11MB
            file.write_all(large_content.as_bytes()).unwrap();
        }

        assert!(should_rotate_log(&log_file).unwrap());

        rotate_log_file(&log_file).unwrap();

        let backup_file = log_file.with_extension("log.1");
        assert!(backup_file.exists());
        assert!(!log_file.exists());
    }

    #[test]
    fn test_record_and_read_recent() {
        let temp_dir = tempdir().unwrap();
        let log = ActivityLog::new(temp_dir.path().join("logs").join("activity.log"));

        log.record(ActivityLevel::Info, "Monitoring started", None)
            .unwrap();
        log.record(ActivityLevel::Warn, "Skipped 2 rows", Some("a.csv"))
            .unwrap();
        log.record(ActivityLevel::Error, "Upload failed", Some("b.csv"))
            .unwrap();

        let entries = log.read_recent(Some(2)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "Upload failed");
        assert_eq!(entries[0].level, ActivityLevel::Error);
        assert_eq!(entries[1].file.as_deref(), Some("a.csv"));
    }

    #[test]
    fn test_read_ignores_garbage_lines() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("activity.log");
        std::fs::write(
            &path,
            "not json\n{\"timestamp\":\"2024-01-01T00:00:00Z\",\"level\":\"INFO\",\"message\":\"ok\",\"file\":null}\n",
        )
        .unwrap();

        let entries = ActivityLog::new(&path).read_recent(None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "ok");
    }

    #[test]
    fn test_clear() {
        let temp_dir = tempdir().unwrap();
        let log = ActivityLog::new(temp_dir.path().join("activity.log"));
        log.record(ActivityLevel::Info, "hello", None).unwrap();

        log.clear().unwrap();
        assert!(log.read_recent(None).unwrap().is_empty());
    }
}
