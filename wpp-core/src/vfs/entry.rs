//! `BuiltinEntry`: the canonical unit of the built-ins VFS (§3 "Built-in
//! entry", §4.1).

use std::{
    io::Read,
    os::unix::io::RawFd,
    sync::{Arc, Mutex, OnceLock},
};

use anyhow::{bail, Context};

use super::{builtins_data::BuiltinSource, vfile::VFile};
use crate::consts::DJB2_INITIAL;

/// DJB2 hash, 32-bit, initial 5381, `h = h*33 + c` (§3, §GLOSSARY).
pub fn djb2(s: &str) -> u32 {
    let mut h: u32 = DJB2_INITIAL;
    for b in s.bytes() {
        h = h.wrapping_mul(33).wrapping_add(b as u32);
    }
    h
}

struct VfileCache {
    handle: VFile,
    refcount: usize,
}

/// An immutable built-in plus its lazily-populated runtime caches
/// (decompressed buffer, materialized virtual-file handle). Entries are
/// constructed once at startup from `builtins_data::BUILTINS` and live for
/// process lifetime (§3 "Built-in entry" Lifecycle).
pub struct BuiltinEntry {
    source: &'static BuiltinSource,
    pub hash: u32,
    decompressed_cache: OnceLock<Arc<Vec<u8>>>,
    vfile: Mutex<Option<VfileCache>>,
}

impl BuiltinEntry {
    pub fn new(source: &'static BuiltinSource) -> Self {
        BuiltinEntry {
            source,
            hash: djb2(source.uri),
            decompressed_cache: OnceLock::new(),
            vfile: Mutex::new(None),
        }
    }

    pub fn uri(&self) -> &'static str {
        self.source.uri
    }

    pub fn is_dir(&self) -> bool {
        self.source.is_dir
    }

    pub fn orig_len(&self) -> usize {
        self.source.orig_len
    }

    pub fn compressed(&self) -> &'static [u8] {
        self.source.compressed
    }

    /// `decompressed(entry) -> buffer | null` (§4.1). Errors if called on
    /// a directory entry. A zero-length built-in returns a distinguished
    /// non-null empty buffer rather than treating the empty case as an
    /// error (§8 "Boundary behaviors").
    pub fn decompressed(&self) -> anyhow::Result<Arc<Vec<u8>>> {
        if self.source.is_dir {
            bail!("cannot decompress directory entry {}", self.source.uri);
        }
        if let Some(buf) = self.decompressed_cache.get() {
            return Ok(buf.clone());
        }
        if self.source.orig_len == 0 {
            let empty = Arc::new(Vec::new());
            let _ = self.decompressed_cache.set(empty.clone());
            return Ok(empty);
        }

        let mut decoder = flate2::read::GzDecoder::new(self.source.compressed);
        let mut buf = Vec::with_capacity(self.source.orig_len);
        decoder
            .read_to_end(&mut buf)
            .with_context(|| format!("inflating built-in {}", self.source.uri))?;
        if buf.len() != self.source.orig_len {
            bail!(
                "decompressed length mismatch for {}: expected {}, got {}",
                self.source.uri,
                self.source.orig_len,
                buf.len()
            );
        }

        let arc = Arc::new(buf);
        // Another thread/fork sibling may have raced us; OnceLock keeps
        // whichever buffer won, both are byte-identical so it doesn't matter.
        let _ = self.decompressed_cache.set(arc.clone());
        Ok(self.decompressed_cache.get().unwrap().clone())
    }

    /// `acquire_vfile(entry) -> handle | null` (§4.1 "Materialization").
    /// Returns a `dup`ed fd of the cached virtual-file handle, creating it
    /// on first acquisition. Increments the handle's reference count.
    pub fn acquire_vfile(&self) -> anyhow::Result<RawFd> {
        let mut guard = self.vfile.lock().unwrap();
        if let Some(cache) = guard.as_mut() {
            cache.refcount += 1;
            if cfg!(debug_assertions) {
                cache.handle.probe_alive();
            }
            return cache.handle.dup();
        }

        let bytes = self.decompressed()?;
        let handle = VFile::open(self.source.uri, &bytes)?;
        let fd = handle.dup()?;
        *guard = Some(VfileCache { handle, refcount: 1 });
        Ok(fd)
    }

    /// Decrements the cached handle's reference count, tearing it down at
    /// zero (§4.1 "Materialization", §8 ref-count invariant).
    pub fn release_vfile(&self) {
        let mut guard = self.vfile.lock().unwrap();
        let drop_it = match guard.as_mut() {
            Some(cache) => {
                cache.refcount = cache.refcount.saturating_sub(1);
                cache.refcount == 0
            }
            None => false,
        };
        if drop_it {
            *guard = None;
        }
    }

    /// Whether a materialized handle is currently cached (used by tests
    /// to observe the ref-count-zero invariant).
    pub fn has_vfile(&self) -> bool {
        self.vfile.lock().unwrap().is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn djb2_matches_known_vector() {
        // DJB2("") == 5381, DJB2("a") == 5381*33 + 'a' (0x61) = 177670 + 97
        assert_eq!(djb2(""), 5381);
        assert_eq!(djb2("a"), 5381u32.wrapping_mul(33).wrapping_add(b'a' as u32));
    }

    #[test]
    fn djb2_is_deterministic() {
        assert_eq!(djb2("/hello.html"), djb2("/hello.html"));
    }
}
