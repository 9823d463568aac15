//! Launching the external tools (ffprobe, whisper, ffmpeg).
//!
//! Each tool runs in its own process group, so a terminal Ctrl+C reaches the
//! daemon only and in-flight jobs keep going after the first interrupt. The
//! groups are tracked until the child exits so a forced abort can kill them.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::io;
use std::process::{Output, Stdio};
use std::sync::{Mutex, OnceLock};
use log::{debug, warn};
use tokio::process::Command;

fn running() -> &'static Mutex<BTreeSet<u32>> {
    static RUNNING: OnceLock<Mutex<BTreeSet<u32>>> = OnceLock::new();
    RUNNING.get_or_init(Default::default)
}

/// A command for an external tool, detached from the terminal's process group
pub fn tool_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

struct Tracked(u32);

impl Tracked {
    fn new(pid: u32) -> Self {
        if let Ok(mut set) = running().lock() {
            set.insert(pid);
        }
        Tracked(pid)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        if let Ok(mut set) = running().lock() {
            set.remove(&self.0);
        }
    }
}

/// Spawn `cmd`, capture stdout and stderr, and wait for it to exit.
/// The child's process group is registered while it runs.
pub async fn run_tracked(mut cmd: Command) -> io::Result<Output> {
    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let _tracked = child.id().map(Tracked::new);
    child.wait_with_output().await
}

/// Number of tool processes currently running
pub fn running_tools() -> usize {
    running().lock().map(|set| set.len()).unwrap_or(0)
}

/// SIGKILL every running tool's process group. Returns how many were signalled.
pub fn kill_running_tools() -> usize {
    let groups: Vec<u32> = match running().lock() {
        Ok(set) => set.iter().copied().collect(),
        Err(_) => return 0,
    };
    for pgid in &groups {
        kill_group(*pgid);
    }
    groups.len()
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = i32::try_from(pgid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the group created for this child by `tool_command`.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == 0 {
        debug!("Killed tool process group {}", pgid);
    } else {
        warn!("Failed to kill tool process group {}: {}", pgid, io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Held by tests that spawn real tool processes, so they never see each other's children
#[cfg(test)]
pub(crate) static TOOL_TEST_LOCK: Mutex<()> = Mutex::new(());
