// This module is used from multiple different test files, each of which
// gets compiled into its own binary. Not all the binaries use all the
// stuff here.
#![allow(dead_code)]

use std::{
    io::{Read, Write},
    net::TcpStream,
    path::{Path, PathBuf},
    process::{Child, Command},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};

pub mod tmpdir;

/// Path to the `wpp` binary built for this test run, as set by cargo for
/// every integration test belonging to the `wpp` package.
pub fn wpp_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_wpp"))
}

/// A running `wpp` instance bound to loopback, with its own scratch
/// document root and pidfile. Killed on drop.
pub struct Server {
    child: Child,
    pub port: u16,
    _dir: tmpdir::Dir,
    pub root: PathBuf,
}

impl Server {
    pub fn spawn() -> anyhow::Result<Self> {
        let dir = tmpdir::Dir::new("wpp-test")?;
        let root = dir.path().join("root");
        std::fs::create_dir_all(&root).context("creating test document root")?;
        Self::spawn_with_root(dir, root)
    }

    pub fn spawn_with_root(dir: tmpdir::Dir, root: PathBuf) -> anyhow::Result<Self> {
        let pid_file = dir.path().join("wpp.pid");
        let child = Command::new(wpp_bin())
            .arg("--root")
            .arg(&root)
            .arg("--listen-low")
            .arg("18080")
            .arg("--listen-high")
            .arg("18280")
            .arg("--pid-file")
            .arg(&pid_file)
            .arg("--localhost")
            .arg("--no-timeout")
            .spawn()
            .context("spawning wpp")?;

        let port = wait_for_pidfile(&pid_file, &child)?;
        Ok(Server { child, port, _dir: dir, root })
    }

    /// Sends a raw request (caller supplies CRLF framing) and returns
    /// whatever bytes the server sends back before closing the connection.
    /// Callers should include `Connection: close` so the read loop below
    /// terminates on EOF rather than a read timeout.
    pub fn request(&self, raw: &str) -> anyhow::Result<Vec<u8>> {
        let mut stream =
            TcpStream::connect(("127.0.0.1", self.port)).context("connecting to wpp")?;
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        stream.write_all(raw.as_bytes()).context("writing request")?;
        let mut out = Vec::new();
        stream.read_to_end(&mut out).context("reading response")?;
        Ok(out)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn wait_for_pidfile(pid_file: &Path, child: &Child) -> anyhow::Result<u16> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(contents) = std::fs::read_to_string(pid_file) {
            if let Some((_, port)) = contents.trim().split_once(':') {
                if let Ok(port) = port.parse::<u16>() {
                    return Ok(port);
                }
            }
        }
        if Instant::now() > deadline {
            return Err(anyhow!("wpp (pid {}) did not write a pidfile before the deadline", child.id()));
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Splits a raw HTTP response into `(head, body)` on the first blank line.
pub fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let sep = b"\r\n\r\n";
    if let Some(pos) = raw.windows(sep.len()).position(|w| w == sep) {
        let head = String::from_utf8_lossy(&raw[..pos]).to_string();
        (head, raw[pos + sep.len()..].to_vec())
    } else {
        (String::from_utf8_lossy(raw).to_string(), Vec::new())
    }
}

pub fn status_line(head: &str) -> &str {
    head.lines().next().unwrap_or("")
}
