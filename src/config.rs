use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Settings edited from the front-end and persisted to `config.json`.
///
/// Field names on disk match the files written by earlier HikiBridge
/// releases, so existing installs keep their settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub api_endpoint: String,
    pub api_key: String,
    pub folder_path: String,
    /// Start monitoring as soon as the application launches
    pub auto_start: bool,
    /// Register the application to launch at login
    #[serde(rename = "windows_startup")]
    pub launch_at_login: bool,
}

impl BridgeConfig {
    /// Watched folder with `~` expanded
    pub fn watched_folder(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(self.folder_path.trim()).as_ref())
    }

    /// API key with every character replaced, for display and logs
    pub fn masked_api_key(&self) -> String {
        "*".repeat(self.api_key.chars().count())
    }

    /// Check that monitoring can start with these settings
    pub fn validate(&self) -> Result<(), BridgeError> {
        let endpoint = self.api_endpoint.trim();
        if endpoint.is_empty() {
            return Err(BridgeError::Config("API Endpoint is required".to_string()));
        }

        let parsed = url::Url::parse(endpoint)
            .map_err(|e| BridgeError::Config(format!("API Endpoint is not a valid URL: {}", e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(BridgeError::Config(format!(
                "API Endpoint must use http or https, got '{}'",
                parsed.scheme()
            )));
        }

        if self.api_key.trim().is_empty() {
            return Err(BridgeError::Config("API Key is required".to_string()));
        }

        if self.folder_path.trim().is_empty() {
            return Err(BridgeError::Config("Folder Path is required".to_string()));
        }

        let folder = self.watched_folder();
        if !folder.exists() {
            return Err(BridgeError::Config(format!(
                "Selected folder does not exist: {}",
                folder.display()
            )));
        }
        if !folder.is_dir() {
            return Err(BridgeError::Config(format!(
                "Selected path is not a folder: {}",
                folder.display()
            )));
        }

        Ok(())
    }
}

/// Application data directory holding config, ledger, status and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Use the given directory, or `~/.hikibridge` when none is given
    pub fn resolve(override_dir: Option<PathBuf>) -> Result<Self, BridgeError> {
        if let Some(dir) = override_dir {
            return Ok(Self::new(shellexpand::tilde(&dir.to_string_lossy()).as_ref()));
        }

        dirs::home_dir()
            .map(|home| Self::new(home.join(".hikibridge")))
            .ok_or_else(|| BridgeError::Config("Could not find home directory".to_string()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.root.join("ledger.json")
    }

    pub fn status_file(&self) -> PathBuf {
        self.root.join("status.json")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("monitor.pid")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join("monitor.lock")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn activity_log_file(&self) -> PathBuf {
        self.logs_dir().join("activity.log")
    }

    /// Create the data and logs directories (owner-only on Unix)
    pub fn ensure(&self) -> Result<(), BridgeError> {
        for dir in [self.root.clone(), self.logs_dir()] {
            if !dir.exists() {
                fs::create_dir_all(&dir)?;
                set_owner_only(&dir, 0o700)?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path, mode: u32) -> Result<(), BridgeError> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(mode);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path, _mode: u32) -> Result<(), BridgeError> {
    Ok(())
}

pub fn load_config(data_dir: &DataDir) -> Result<BridgeConfig, BridgeError> {
    data_dir.ensure()?;

    let config_file = data_dir.config_file();

    if config_file.exists() {
        let content = fs::read_to_string(config_file)?;
        let config: BridgeConfig = serde_json::from_str(&content)?;
        Ok(config)
    } else {
        Ok(BridgeConfig::default())
    }
}

pub fn save_config(data_dir: &DataDir, config: &BridgeConfig) -> Result<(), BridgeError> {
    data_dir.ensure()?;

    let config_file = data_dir.config_file();
    let content = serde_json::to_string_pretty(config)?;

    // The file holds the API key: created owner-only, and tightened before
    // writing when an older release left it readable
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&config_file)?;
    set_owner_only(&config_file, 0o600)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

pub fn clear_config(data_dir: &DataDir) -> Result<(), BridgeError> {
    save_config(data_dir, &BridgeConfig::default())
}
