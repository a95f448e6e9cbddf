use serde::Serialize;

/// Inclusive byte interval, `start <= end < size` of the object it was
/// resolved against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for a `Content-Range` response header.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }

    /// True when the range covers a whole object of `total` bytes.
    pub fn is_full(&self, total: u64) -> bool {
        self.start == 0 && self.end + 1 == total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_and_header() {
        let range = ByteRange::new(0, 0);
        assert_eq!(range.len(), 1);
        assert_eq!(range.content_range(100), "bytes 0-0/100");
        assert!(!range.is_full(100));
        assert!(ByteRange::new(0, 99).is_full(100));
    }
}
