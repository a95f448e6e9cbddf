//! HTTP `Range` header resolution for chunked media delivery.
//!
//! `resolve` is pure and deterministic: it validates a `bytes=start-end`
//! request against a known content length and fills in a default chunk when
//! the end is open.

use crate::models::range::ByteRange;
use thiserror::Error;

const UNIT_PREFIX: &str = "bytes=";

/// Why no byte range could be served.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RangeRejection {
    #[error("no range header")]
    Absent,
    #[error("range unit is not `bytes`")]
    UnknownUnit,
    #[error("range start is not a valid byte offset")]
    Malformed,
    #[error("range lies outside the content")]
    OutOfBounds,
}

impl RangeRejection {
    /// The caller should serve the full content instead of answering 416.
    pub fn falls_back_to_full(&self) -> bool {
        matches!(self, RangeRejection::Absent | RangeRejection::UnknownUnit)
    }
}

/// Resolve `range_header` against `content_length`.
///
/// An open-ended range (`bytes=500-`) spans `default_chunk_size` bytes; a
/// chunk size of 0 means "to the end". An end past the content (or one that
/// does not parse) is clamped to the last byte. Only the first range of a
/// multi-range header is considered.
pub fn resolve(
    range_header: Option<&str>,
    content_length: u64,
    default_chunk_size: u64,
) -> Result<ByteRange, RangeRejection> {
    let header = range_header.ok_or(RangeRejection::Absent)?.trim();
    let spec = header
        .strip_prefix(UNIT_PREFIX)
        .ok_or(RangeRejection::UnknownUnit)?;
    let first = spec.split(',').next().unwrap_or("").trim();
    let (start_str, end_str) = first.split_once('-').ok_or(RangeRejection::Malformed)?;

    let start = start_str
        .trim()
        .parse::<u64>()
        .map_err(|_| RangeRejection::Malformed)?;
    if start >= content_length {
        return Err(RangeRejection::OutOfBounds);
    }

    let last_byte = content_length - 1;
    let end_str = end_str.trim();
    let end = if end_str.is_empty() {
        if default_chunk_size == 0 {
            last_byte
        } else {
            start.saturating_add(default_chunk_size - 1)
        }
    } else {
        end_str.parse::<u64>().unwrap_or(last_byte)
    };
    let end = end.min(last_byte);

    if end < start {
        return Err(RangeRejection::OutOfBounds);
    }
    Ok(ByteRange::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CHUNK: u64 = 5 * 1024 * 1024;

    #[test]
    fn table() {
        let cases: &[(Option<&str>, u64, u64, Result<(u64, u64), RangeRejection>)] = &[
            (Some("bytes=0-0"), 100, CHUNK, Ok((0, 0))),
            (Some("bytes=10-19"), 100, CHUNK, Ok((10, 19))),
            (Some("bytes=10-"), 100, 20, Ok((10, 29))),
            (Some("bytes=90-"), 100, 20, Ok((90, 99))),
            (Some("bytes=10-"), 100, 0, Ok((10, 99))),
            (Some("bytes=10-500"), 100, CHUNK, Ok((10, 99))),
            (Some("bytes=10-abc"), 100, CHUNK, Ok((10, 99))),
            (Some("bytes=0-9, 20-29"), 100, CHUNK, Ok((0, 9))),
            (Some(" bytes=5-6 "), 100, CHUNK, Ok((5, 6))),
            (None, 100, CHUNK, Err(RangeRejection::Absent)),
            (Some("items=0-5"), 100, CHUNK, Err(RangeRejection::UnknownUnit)),
            (Some("bytes=abc-5"), 100, CHUNK, Err(RangeRejection::Malformed)),
            (Some("bytes=-5"), 100, CHUNK, Err(RangeRejection::Malformed)),
            (Some("bytes=-1-5"), 100, CHUNK, Err(RangeRejection::Malformed)),
            (Some("bytes=5"), 100, CHUNK, Err(RangeRejection::Malformed)),
            (Some("bytes=100-"), 100, CHUNK, Err(RangeRejection::OutOfBounds)),
            (Some("bytes=0-"), 0, CHUNK, Err(RangeRejection::OutOfBounds)),
            (Some("bytes=20-10"), 100, CHUNK, Err(RangeRejection::OutOfBounds)),
        ];

        for (header, len, chunk, expected) in cases {
            let got = resolve(*header, *len, *chunk).map(|r| (r.start, r.end));
            assert_eq!(&got, expected, "header {:?} len {}", header, len);
        }
    }

    #[test]
    fn only_missing_or_foreign_units_fall_back() {
        assert!(RangeRejection::Absent.falls_back_to_full());
        assert!(RangeRejection::UnknownUnit.falls_back_to_full());
        assert!(!RangeRejection::Malformed.falls_back_to_full());
        assert!(!RangeRejection::OutOfBounds.falls_back_to_full());
    }

    proptest! {
        #[test]
        fn explicit_ranges_round_trip(len in 1u64..1_000_000, a in any::<u64>(), b in any::<u64>()) {
            let x = a % len;
            let y = b % len;
            let (start, end) = if x <= y { (x, y) } else { (y, x) };
            let header = format!("bytes={}-{}", start, end);
            let range = resolve(Some(&header), len, CHUNK).unwrap();
            prop_assert_eq!((range.start, range.end), (start, end));
        }

        #[test]
        fn starts_past_the_end_are_unsatisfiable(len in 0u64..1_000_000, extra in 0u64..1_000) {
            let header = format!("bytes={}-", len + extra);
            prop_assert_eq!(resolve(Some(&header), len, CHUNK), Err(RangeRejection::OutOfBounds));
        }

        #[test]
        fn open_ranges_span_one_chunk(len in 1u64..10_000_000, a in any::<u64>(), chunk in 1u64..10_000_000) {
            let start = a % len;
            let header = format!("bytes={}-", start);
            let range = resolve(Some(&header), len, chunk).unwrap();
            prop_assert_eq!(range.end, (start + chunk - 1).min(len - 1));
        }
    }
}
