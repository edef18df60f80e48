//! Virtual-file handle: an anonymous, seekable, readable OS file
//! descriptor backed by memory (§3 "Virtual-file handle", §4.2).

use std::os::unix::io::RawFd;

use anyhow::Context;
use nix::unistd;
use tracing::warn;

/// An `(fd, size, uri)` triple. The fd survives for the handle's lifetime;
/// consumers that need an independent lifetime must `dup` it (§4.2 "Fd
/// validity invariant").
pub struct VFile {
    fd: RawFd,
    size: usize,
    uri: String,
}

impl VFile {
    /// `open(uri) -> handle`: creates the backing fd, `write`s `bytes` into
    /// it, and repositions to offset zero (§4.2).
    pub fn open(uri: &str, bytes: &[u8]) -> anyhow::Result<Self> {
        let fd = create_anon_fd(uri)?;
        let mut handle = VFile { fd, size: 0, uri: uri.to_string() };
        handle.write(bytes)?;
        Ok(handle)
    }

    /// `write(bytes) -> ok|err`: truncates the backing store to exactly
    /// `len(bytes)`, writes in a loop until everything is placed, and
    /// repositions to offset zero.
    fn write(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        if unsafe { libc::ftruncate(self.fd, bytes.len() as libc::off_t) } != 0 {
            return Err(std::io::Error::last_os_error()).context("ftruncate on virtual file");
        }
        let mut written = 0usize;
        while written < bytes.len() {
            let n = unsafe {
                libc::write(
                    self.fd,
                    bytes[written..].as_ptr() as *const libc::c_void,
                    bytes.len() - written,
                )
            };
            if n < 0 {
                return Err(std::io::Error::last_os_error()).context("writing virtual file backing store");
            }
            written += n as usize;
        }
        rewind(self.fd)?;
        self.size = bytes.len();
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Returns an independent `dup`ed fd positioned at offset zero, so a
    /// later `release_vfile` tearing down the master handle does not
    /// invalidate the caller's copy (§9 "Fd handed across components").
    pub fn dup(&self) -> anyhow::Result<RawFd> {
        let dup_fd = unsafe { libc::dup(self.fd) };
        if dup_fd < 0 {
            return Err(std::io::Error::last_os_error()).context("dup'ing virtual file fd");
        }
        rewind(dup_fd)?;
        Ok(dup_fd)
    }

    /// Dev-mode probe: a zero-byte `read()` that logs (does not fail) if
    /// the fd looks dead, matching the original's debug-only liveness
    /// check on vfile reuse (SUPPLEMENTED FROM original_source/).
    pub fn probe_alive(&self) {
        let mut buf = [0u8; 0];
        if unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, 0) } < 0 {
            warn!("vfile probe: fd {} for {} looks dead: {}", self.fd, self.uri, std::io::Error::last_os_error());
        }
    }
}

impl Drop for VFile {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

/// `lseek(fd, 0, SEEK_SET)`.
fn rewind(fd: RawFd) -> anyhow::Result<()> {
    if unsafe { libc::lseek(fd, 0, libc::SEEK_SET) } < 0 {
        return Err(std::io::Error::last_os_error()).context("lseek to offset zero");
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn create_anon_fd(uri: &str) -> anyhow::Result<RawFd> {
    let name = std::ffi::CString::new(uri).unwrap_or_else(|_| std::ffi::CString::new("vfile").unwrap());
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return mkstemp_fallback();
    }
    Ok(fd)
}

#[cfg(not(target_os = "linux"))]
fn create_anon_fd(_uri: &str) -> anyhow::Result<RawFd> {
    mkstemp_fallback()
}

/// `mkstemp` immediately `unlink`ed: a private, anonymous-by-convention
/// temp file used where `memfd_create` is unavailable (§4.2 "fallback").
fn mkstemp_fallback() -> anyhow::Result<RawFd> {
    let template = std::env::temp_dir().join("wpp-vfile-XXXXXX");
    let (fd, path) = unistd::mkstemp(&template).context("mkstemp for virtual file fallback")?;
    unistd::unlink(&path).context("unlinking virtual file fallback temp path")?;
    Ok(fd)
}
