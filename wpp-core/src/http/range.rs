//! `Range` header parsing (§4.4 "Range handling").

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64, // inclusive
}

/// Parses a single `bytes=<start>-<end>` or `bytes=<start>-` range against
/// a resource of `file_size` bytes. Returns `None` for anything
/// unparseable or multi-range (only a single range is supported, §4.4).
/// `end` is clamped to `file_size - 1`.
pub fn parse(header: &str, file_size: u64) -> Option<ByteRange> {
    if file_size == 0 {
        return None;
    }
    let spec = header.strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None; // multi-range not supported
    }
    let (start_str, end_str) = spec.split_once('-')?;
    let start: u64 = start_str.trim().parse().ok()?;
    if start >= file_size {
        return None;
    }
    let end = if end_str.trim().is_empty() {
        file_size - 1
    } else {
        end_str.trim().parse::<u64>().ok()?.min(file_size - 1)
    };
    if end < start {
        return None;
    }
    Some(ByteRange { start, end })
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Content-Range: bytes <start>-<end>/<size>`.
    pub fn content_range_header(&self, file_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, file_size)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn open_ended_range_covers_to_end() {
        let r = parse("bytes=0-", 100).unwrap();
        assert_eq!(r, ByteRange { start: 0, end: 99 });
        assert_eq!(r.content_range_header(100), "bytes 0-99/100");
    }

    #[test]
    fn closed_range_is_clamped_to_file_size() {
        let r = parse("bytes=10-1000", 100).unwrap();
        assert_eq!(r, ByteRange { start: 10, end: 99 });
    }

    #[test]
    fn start_past_end_of_file_is_rejected() {
        assert!(parse("bytes=200-", 100).is_none());
    }

    #[test]
    fn multi_range_is_rejected() {
        assert!(parse("bytes=0-10,20-30", 100).is_none());
    }
}
