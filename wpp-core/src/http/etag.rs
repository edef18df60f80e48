//! ETag formatting (§4.4 "Caching / conditional GET").

/// `"m<hex-mtime>s<hex-size>"` for a filesystem file.
pub fn for_file(mtime_secs: u64, size: u64) -> String {
    format!("\"m{mtime_secs:x}s{size:x}\"")
}

/// `"b<hex-id>z<hex-origsize>"` for a VFS file, keyed by the built-in's
/// DJB2 hash (its stable "id" within the image) and its uncompressed size.
pub fn for_builtin(hash: u32, orig_size: usize) -> String {
    format!("\"b{hash:x}z{orig_size:x}\"")
}

/// True if `candidate` (from `If-None-Match`) matches `etag`, honoring the
/// bare `*` wildcard.
pub fn matches(candidate: &str, etag: &str) -> bool {
    candidate.trim() == "*" || candidate.split(',').any(|c| c.trim() == etag)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn file_etag_format() {
        assert_eq!(for_file(0x5f, 0x10), "\"m5fs10\"");
    }

    #[test]
    fn builtin_etag_format() {
        assert_eq!(for_builtin(0xabcd, 96), "\"babcdz60\"");
    }

    #[test]
    fn matches_exact_and_wildcard() {
        assert!(matches("\"m5fs10\"", "\"m5fs10\""));
        assert!(matches("*", "\"anything\""));
        assert!(!matches("\"other\"", "\"m5fs10\""));
    }
}
