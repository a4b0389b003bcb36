use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use sysinfo::{Pid, Signal, System};

use crate::instance::{is_monitor_running, read_pid};

/// Ask the monitor holding the lock to shut down, then wait for it to let go
pub fn stop_running_monitor(lock_file: &Path, pid_file: &Path, wait: Duration) -> Result<bool> {
    if !is_monitor_running(lock_file) {
        return Ok(false);
    }

    let Some(pid) = read_pid(pid_file) else {
        bail!("Monitoring is running but its PID file is missing");
    };

    let system = System::new_all();
    let Some(process) = system.process(Pid::from_u32(pid)) else {
        bail!("Monitoring process {} not found", pid);
    };

    // On Windows this terminates immediately; elsewhere the monitor drains and exits
    if process.kill_with(Signal::Term).is_none() {
        process.kill();
    }

    let started = Instant::now();
    while is_monitor_running(lock_file) {
        if started.elapsed() >= wait {
            bail!("Monitoring process {} did not stop within {:?}", pid, wait);
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    Ok(true)
}
