// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Process supervisor: single-instance pidfile, graceful stop, optional
//! browser launch, then handing off to the connection server (§2 "Process
//! supervisor", §4.6 "Single-instance guard" / "Graceful stop").

use std::{fs, path::Path, process, time::Instant};

use anyhow::Context;
use tracing::{info, warn};

pub mod server;
pub mod signals;

pub use server::ServerConfig;

/// Starts (or hands off to a running) instance, per §4.6.
pub fn run(config: ServerConfig) -> anyhow::Result<()> {
    if let Some((pid, port)) = read_pidfile(&config.pid_file)? {
        if process_alive(pid) {
            info!("instance already running as pid {pid} on port {port}; launching browser");
            launch_browser(port, config.start_page.as_deref().unwrap_or(crate::consts::DEFAULT_START_PAGE));
            return Ok(());
        }
        warn!("stale pidfile for dead pid {pid}; removing");
        let _ = fs::remove_file(&config.pid_file);
    }

    let srv = server::Server::new(config)?;
    let result = srv.serve();

    // Only the process that created the pidfile unlinks it; a child
    // checks its own pid against the one it wrote before the fork loop
    // started (children never reach this line, they exit from inside the
    // accept loop instead).
    if let Ok(Some((pid, _))) = read_pidfile(&srv.config.pid_file) {
        if pid == process::id() {
            let _ = fs::remove_file(&srv.config.pid_file);
        }
    }

    result
}

/// `--stop`: reads the pidfile, sends SIGTERM, polls for exit, escalates
/// to SIGKILL, then unlinks the pidfile (§4.6 "Graceful stop").
pub fn stop(pid_file: &str) -> anyhow::Result<()> {
    let (pid, _port) = read_pidfile(pid_file)?
        .ok_or_else(|| anyhow::anyhow!("no pidfile at {pid_file}; nothing to stop"))?;
    if !process_alive(pid) {
        anyhow::bail!("pidfile names pid {pid}, which is not running");
    }

    info!("sending SIGTERM to pid {pid}");
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }

    let deadline = Instant::now() + crate::consts::STOP_GRACE_PERIOD;
    while Instant::now() < deadline {
        if !process_alive(pid) {
            let _ = fs::remove_file(pid_file);
            return Ok(());
        }
        std::thread::sleep(crate::consts::STOP_POLL_INTERVAL);
    }

    warn!("pid {pid} did not exit within grace period; sending SIGKILL");
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
    let _ = fs::remove_file(pid_file);
    Ok(())
}

/// Writes `<pid>:<port>\n` to the pidfile (§6.6).
pub fn write_pidfile(pid_file: &str, pid: i32, port: u16) -> anyhow::Result<()> {
    fs::write(pid_file, format!("{pid}:{port}\n")).context("writing pidfile")
}

/// Reads and parses a pidfile, returning `None` if it does not exist.
fn read_pidfile(pid_file: &str) -> anyhow::Result<Option<(i32, u16)>> {
    if !Path::new(pid_file).exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(pid_file).context("reading pidfile")?;
    let (pid_str, port_str) =
        contents.trim().split_once(':').ok_or_else(|| anyhow::anyhow!("malformed pidfile"))?;
    Ok(Some((pid_str.parse().context("parsing pid")?, port_str.parse().context("parsing port")?)))
}

/// True if `pid` refers to a live process (`kill(pid, 0)`).
fn process_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Execs a browser against the recorded port, trying the usual suspects
/// in order. Mirrors the original's `check_running` candidate list
/// (SUPPLEMENTED FROM original_source/, see SPEC_FULL.md).
pub fn launch_browser(port: u16, page: &str) {
    let url = format!("http://localhost:{port}{page}");
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &["open"]
    } else {
        &["xdg-open", "gnome-open", "firefox", "google-chrome"]
    };
    for cmd in candidates {
        if process::Command::new(cmd).arg(&url).spawn().is_ok() {
            return;
        }
    }
    warn!("no browser launcher found; open {url} manually");
}
