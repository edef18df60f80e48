//! Resolves user records and applies privilege drop / chroot, both
//! optional supervisor responsibilities (§2 Process supervisor, §6.1).

use std::ffi::CStr;
use std::{io, ptr};

use anyhow::{anyhow, Context};

#[derive(Debug)]
pub struct Info {
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    pub home_dir: String,
    pub user: String,
}

/// Looks up a user record by name via `getpwnam_r`.
pub fn info_by_name(name: &str) -> anyhow::Result<Info> {
    let cname = std::ffi::CString::new(name).context("user name contains a NUL byte")?;
    let mut buf: [libc::c_char; 1024 * 4] = [0; 1024 * 4];
    let mut passwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = ptr::null_mut();

    unsafe {
        // Safety: pure ffi, passwd/buf have valid backing memory for the
        // duration of the call.
        let errno = libc::getpwnam_r(
            cname.as_ptr(),
            &mut passwd,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result as *mut *mut libc::passwd,
        );
        if result.is_null() {
            if errno == 0 {
                return Err(anyhow!("no such user: {}", name));
            }
            return Err(anyhow!(
                "error resolving user {}: {}",
                name,
                io::Error::from_raw_os_error(errno)
            ));
        }

        Ok(Info {
            uid: passwd.pw_uid,
            gid: passwd.pw_gid,
            home_dir: String::from_utf8_lossy(CStr::from_ptr(passwd.pw_dir).to_bytes()).into_owned(),
            user: String::from_utf8_lossy(CStr::from_ptr(passwd.pw_name).to_bytes()).into_owned(),
        })
    }
}

/// `chroot(2)` into `dir`, then `chdir("/")` so relative path resolution
/// inside the new root behaves as expected. Must be called before
/// `drop_privileges`, while still root.
pub fn chroot_into(dir: &str) -> anyhow::Result<()> {
    let cdir = std::ffi::CString::new(dir).context("chroot path contains a NUL byte")?;
    let rc = unsafe { libc::chroot(cdir.as_ptr()) };
    if rc != 0 {
        return Err(anyhow!("chroot({}) failed: {}", dir, io::Error::last_os_error()));
    }
    let root = std::ffi::CString::new("/").unwrap();
    if unsafe { libc::chdir(root.as_ptr()) } != 0 {
        return Err(anyhow!("chdir(\"/\") after chroot failed: {}", io::Error::last_os_error()));
    }
    Ok(())
}

/// Drops from root to the given uid/gid, in the order `setgid` then
/// `setuid` (setgid first: once uid is dropped the process can no longer
/// change its gid).
pub fn drop_privileges(uid: libc::uid_t, gid: libc::gid_t) -> anyhow::Result<()> {
    if unsafe { libc::setgid(gid) } != 0 {
        return Err(anyhow!("setgid({}) failed: {}", gid, io::Error::last_os_error()));
    }
    if unsafe { libc::setuid(uid) } != 0 {
        return Err(anyhow!("setuid({}) failed: {}", uid, io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_user_is_an_error() {
        let result = info_by_name("wpp-test-user-that-should-not-exist-anywhere");
        assert!(result.is_err());
    }
}
