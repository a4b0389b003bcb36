//! Launch-at-login registration.
//!
//! Linux uses an XDG autostart entry, macOS a per-user LaunchAgent and
//! Windows the `HKCU\...\Run` registry key (driven through `reg.exe`).
//! The registered command starts the binary with no subcommand and the
//! data directory it was registered from, so monitoring begins when that
//! directory's `auto_start` is set.

use crate::error::BridgeError;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

pub const APP_NAME: &str = "HikiBridge";
const LAUNCH_AGENT_LABEL: &str = "com.hikibridge.agent";
const RUN_KEY: &str = r"HKCU\Software\Microsoft\Windows\CurrentVersion\Run";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupLocation {
    DesktopEntry(PathBuf),
    LaunchAgent(PathBuf),
    Registry,
}

impl std::fmt::Display for StartupLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupLocation::DesktopEntry(path) | StartupLocation::LaunchAgent(path) => {
                write!(f, "{}", path.display())
            }
            StartupLocation::Registry => write!(f, r"{}\{}", RUN_KEY, APP_NAME),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupCheck {
    /// Registered and pointing at this executable and data directory
    Configured,
    Missing,
    /// Registered, but for a different command (moved binary or another data directory)
    Mismatch { found: String },
}

#[derive(Debug, Clone)]
pub struct StartupManager {
    location: StartupLocation,
    executable: PathBuf,
    data_dir: PathBuf,
}

impl StartupManager {
    pub fn for_current_platform(data_dir: &Path) -> Result<Self, BridgeError> {
        let executable = std::env::current_exe()?;
        let data_dir = std::path::absolute(data_dir)?;
        Ok(Self::new(default_location()?, executable, data_dir))
    }

    pub fn new(location: StartupLocation, executable: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            location,
            executable,
            data_dir,
        }
    }

    pub fn location(&self) -> &StartupLocation {
        &self.location
    }

    pub fn enable(&self) -> Result<(), BridgeError> {
        match &self.location {
            StartupLocation::DesktopEntry(path) => {
                write_entry(path, &desktop_entry(&self.command_line()))?;
                set_executable(path)?;
            }
            StartupLocation::LaunchAgent(path) => {
                write_entry(path, &launch_agent_plist(&self.program_arguments()))?;
            }
            StartupLocation::Registry => {
                run_reg(&[
                    "add",
                    RUN_KEY,
                    "/v",
                    APP_NAME,
                    "/t",
                    "REG_SZ",
                    "/d",
                    &self.command_line(),
                    "/f",
                ])?;
            }
        }

        info!(location = %self.location, "Added to startup");
        Ok(())
    }

    pub fn disable(&self) -> Result<(), BridgeError> {
        match &self.location {
            StartupLocation::DesktopEntry(path) | StartupLocation::LaunchAgent(path) => {
                if path.exists() {
                    fs::remove_file(path)?;
                }
            }
            StartupLocation::Registry => {
                if self.registered_command()?.is_some() {
                    run_reg(&["delete", RUN_KEY, "/v", APP_NAME, "/f"])?;
                }
            }
        }

        info!(location = %self.location, "Removed from startup");
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.registered_command(), Ok(Some(_)))
    }

    /// Check that the registration exists and launches this executable
    pub fn verify(&self) -> Result<StartupCheck, BridgeError> {
        let Some(found) = self.registered_command()? else {
            return Ok(StartupCheck::Missing);
        };

        let expected = match &self.location {
            StartupLocation::LaunchAgent(_) => self
                .program_arguments()
                .iter()
                .map(|arg| xml_escape(arg))
                .collect::<Vec<_>>()
                .join(" "),
            _ => self.command_line(),
        };

        if found == expected {
            Ok(StartupCheck::Configured)
        } else {
            Ok(StartupCheck::Mismatch { found })
        }
    }

    fn program_arguments(&self) -> Vec<String> {
        vec![
            self.executable.to_string_lossy().into_owned(),
            "--data-dir".to_string(),
            self.data_dir.to_string_lossy().into_owned(),
        ]
    }

    /// `"<exe>" --data-dir "<dir>"`, as a desktop `Exec` line or `Run` value
    fn command_line(&self) -> String {
        format!("{} --data-dir {}", quoted(&self.executable), quoted(&self.data_dir))
    }

    /// The command currently registered, if any
    fn registered_command(&self) -> Result<Option<String>, BridgeError> {
        match &self.location {
            StartupLocation::DesktopEntry(path) => {
                if !path.exists() {
                    return Ok(None);
                }
                let content = fs::read_to_string(path)?;
                Ok(content
                    .lines()
                    .find_map(|line| line.strip_prefix("Exec="))
                    .map(|exec| exec.trim().to_string()))
            }
            StartupLocation::LaunchAgent(path) => {
                if !path.exists() {
                    return Ok(None);
                }
                let content = fs::read_to_string(path)?;
                Ok(program_arguments(&content))
            }
            StartupLocation::Registry => {
                let output = Command::new("reg")
                    .args(["query", RUN_KEY, "/v", APP_NAME])
                    .output()?;
                if !output.status.success() {
                    return Ok(None);
                }
                let stdout = String::from_utf8_lossy(&output.stdout);
                Ok(parse_reg_query_value(&stdout))
            }
        }
    }
}

fn default_location() -> Result<StartupLocation, BridgeError> {
    if cfg!(windows) {
        return Ok(StartupLocation::Registry);
    }

    let home = dirs::home_dir()
        .ok_or_else(|| BridgeError::Autostart("Could not find home directory".to_string()))?;

    if cfg!(target_os = "macos") {
        Ok(StartupLocation::LaunchAgent(
            home.join("Library")
                .join("LaunchAgents")
                .join(format!("{}.plist", LAUNCH_AGENT_LABEL)),
        ))
    } else {
        let config_dir = dirs::config_dir().unwrap_or_else(|| home.join(".config"));
        Ok(StartupLocation::DesktopEntry(
            config_dir.join("autostart").join("hikibridge.desktop"),
        ))
    }
}

fn quoted(path: &Path) -> String {
    format!("\"{}\"", path.display())
}

fn desktop_entry(command_line: &str) -> String {
    format!(
        "[Desktop Entry]\nName={}\nExec={}\nType=Application\nX-GNOME-Autostart-enabled=true\n",
        APP_NAME, command_line
    )
}

fn launch_agent_plist(arguments: &[String]) -> String {
    let arguments: String = arguments
        .iter()
        .map(|arg| format!("        <string>{}</string>\n", xml_escape(arg)))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{}</string>
    <key>ProgramArguments</key>
    <array>
{}    </array>
    <key>RunAtLoad</key>
    <true/>
</dict>
</plist>
"#,
        LAUNCH_AGENT_LABEL, arguments
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// The `ProgramArguments` strings, still escaped, joined by spaces
fn program_arguments(plist: &str) -> Option<String> {
    let after_key = plist.split("<key>ProgramArguments</key>").nth(1)?;
    let array = after_key.split("</array>").next()?;

    let arguments: Vec<&str> = array
        .split("<string>")
        .skip(1)
        .filter_map(|chunk| chunk.split_once("</string>"))
        .map(|(value, _)| value.trim())
        .collect();

    if arguments.is_empty() {
        None
    } else {
        Some(arguments.join(" "))
    }
}

/// Pull the data out of `reg query` output: `    HikiBridge    REG_SZ    "C:\...\hikibridge.exe"`
fn parse_reg_query_value(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let line = line.trim();
        if !line.starts_with(APP_NAME) {
            return None;
        }
        let (_, value) = line.split_once("REG_SZ")?;
        Some(value.trim().to_string())
    })
}

fn write_entry(path: &Path, content: &str) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), BridgeError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), BridgeError> {
    Ok(())
}

fn run_reg(args: &[&str]) -> Result<(), BridgeError> {
    let output = Command::new("reg").args(args).output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(BridgeError::Autostart(format!(
            "reg {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
