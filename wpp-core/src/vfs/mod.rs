//! The built-ins VFS: a content-addressed, read-only store of embedded
//! blobs that is lazily decompressed, reference-counted, and materialized
//! as an OS file descriptor (§2, §4.1).

mod builtins_data;
pub mod entry;
pub mod vfile;

use std::{
    io::Write,
    os::unix::io::RawFd,
    path::{Path, PathBuf},
};

use anyhow::Context;
use tempfile::NamedTempFile;

pub use entry::BuiltinEntry;
pub use vfile::VFile;

use crate::consts::HASH_TABLE_THRESHOLD;

enum Index {
    /// Array sorted by hash; `find` binary-searches, resolving ties with a
    /// full string compare (§4.1 "Lookup").
    Sorted(Vec<usize>),
    /// Closed-address hash table keyed by `hash mod table_size`, chained
    /// on collision (§4.1 "Lookup").
    HashTable { table_size: usize, buckets: Vec<Vec<usize>> },
}

/// The built-ins VFS formed by the embedded image plus the lookup index
/// chosen for it at startup (§4.1).
pub struct BuiltinsVfs {
    entries: Vec<BuiltinEntry>,
    index: Index,
}

impl BuiltinsVfs {
    /// Builds the VFS from the embedded `builtins_data::BUILTINS` table.
    /// The hash-table-vs-binary-search choice is a deterministic function
    /// of entry count (§4.1: "build-time parameter, ≥50 entries").
    pub fn new() -> Self {
        let mut entries: Vec<BuiltinEntry> =
            builtins_data::BUILTINS.iter().map(BuiltinEntry::new).collect();

        let index = if entries.len() >= HASH_TABLE_THRESHOLD {
            let table_size = entries.len().next_power_of_two().max(16);
            let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); table_size];
            for (i, e) in entries.iter().enumerate() {
                buckets[(e.hash as usize) % table_size].push(i);
            }
            Index::HashTable { table_size, buckets }
        } else {
            let mut order: Vec<usize> = (0..entries.len()).collect();
            order.sort_by(|&a, &b| {
                entries[a].hash.cmp(&entries[b].hash).then_with(|| entries[a].uri().cmp(entries[b].uri()))
            });
            Index::Sorted(order)
        };

        // Entries never move after this point; index positions above are
        // stable because `entries` is not mutated again.
        entries.shrink_to_fit();
        BuiltinsVfs { entries, index }
    }

    /// `find(uri) -> entry | not-found` (§4.1).
    pub fn find(&self, uri: &str) -> Option<&BuiltinEntry> {
        let hash = entry::djb2(uri);
        match &self.index {
            Index::HashTable { table_size, buckets } => {
                let bucket = &buckets[(hash as usize) % table_size];
                bucket.iter().map(|&i| &self.entries[i]).find(|e| e.uri() == uri)
            }
            Index::Sorted(order) => {
                let pos = order.binary_search_by(|&i| {
                    self.entries[i].hash.cmp(&hash).then_with(|| self.entries[i].uri().cmp(uri))
                });
                pos.ok().map(|p| &self.entries[order[p]])
            }
        }
    }

    /// The VFS file-open interception callback consumed by the JIT
    /// environment (§4.1 "File-open interception", §6.4). On a hit,
    /// `acquire_vfile`s the entry and returns a `dup`ed fd positioned at
    /// offset zero; on a miss returns `-1`.
    pub fn open_callback(&self, path: &str) -> RawFd {
        match self.find(path) {
            Some(entry) if !entry.is_dir() => entry.acquire_vfile().unwrap_or(-1),
            _ => -1,
        }
    }

    /// Releases a virtual-file handle previously acquired through `find`
    /// (directly or via `open_callback`).
    pub fn release_vfile(&self, uri: &str) {
        if let Some(entry) = self.find(uri) {
            entry.release_vfile();
        }
    }

    /// Alternate materialization path: writes the decompressed bytes to a
    /// *named*, real temp file rather than the cached anonymous vfile, for
    /// callers (the JIT's compiler-support-object loader) that need to
    /// `open` a real path rather than receive a pre-opened fd
    /// (SUPPLEMENTED FROM original_source/, see SPEC_FULL.md).
    pub fn materialize_to_tmp_path(&self, uri: &str) -> anyhow::Result<PathBuf> {
        let entry = self.find(uri).with_context(|| format!("no such built-in: {uri}"))?;
        let bytes = entry.decompressed()?;
        let mut tmp = NamedTempFile::new().context("creating temp file for built-in materialization")?;
        tmp.write_all(&bytes).context("writing built-in bytes to temp file")?;
        let (_, path) = tmp.keep().context("persisting built-in temp file")?;
        Ok(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for BuiltinsVfs {
    fn default() -> Self {
        Self::new()
    }
}

/// Combined VFS-then-filesystem probe used by resource resolution (§4.4):
/// tries the VFS first, then `stat`s the real path.
pub fn exists_on_disk(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn finds_known_builtin() {
        let vfs = BuiltinsVfs::new();
        let entry = vfs.find("/hello.html").expect("hello.html is a built-in");
        assert_eq!(entry.orig_len(), 96);
        assert!(!entry.is_dir());
    }

    #[test]
    fn missing_uri_is_not_found() {
        let vfs = BuiltinsVfs::new();
        assert!(vfs.find("/does/not/exist.html").is_none());
    }

    #[test]
    fn directory_markers_resolve_as_directories() {
        let vfs = BuiltinsVfs::new();
        let entry = vfs.find("/include").expect("/include is a built-in directory");
        assert!(entry.is_dir());
    }

    #[test]
    fn decompression_round_trips_exact_length() {
        let vfs = BuiltinsVfs::new();
        let entry = vfs.find("/hello.html").unwrap();
        let buf = entry.decompressed().unwrap();
        assert_eq!(buf.len(), entry.orig_len());
        // second call returns the cached buffer, not a fresh inflate
        let buf2 = entry.decompressed().unwrap();
        assert!(std::sync::Arc::ptr_eq(&buf, &buf2));
    }

    #[test]
    fn acquire_then_release_nets_to_no_cached_vfile() {
        let vfs = BuiltinsVfs::new();
        let entry = vfs.find("/hello.html").unwrap();
        let fd = entry.acquire_vfile().unwrap();
        assert!(entry.has_vfile());
        entry.release_vfile();
        assert!(!entry.has_vfile());
        unsafe { libc::close(fd) };
    }

    #[test]
    fn open_callback_misses_return_negative_one() {
        let vfs = BuiltinsVfs::new();
        assert_eq!(vfs.open_callback("/nope.h"), -1);
    }

    #[test]
    fn lookup_is_deterministic_across_calls() {
        let vfs = BuiltinsVfs::new();
        let a = vfs.find("/hello.html").map(|e| e.hash);
        let b = vfs.find("/hello.html").map(|e| e.hash);
        assert_eq!(a, b);
    }
}
