//! Byte-range parsing
//!
//! Only a single range per request is supported, in one of three forms
//! relative to the file size: `-N` (last N bytes), `N-` (from N to the end)
//! and `N-M`. The resolved range is clamped to the file and always satisfies
//! `start <= end <= size - 1`.

use std::fmt;
use thiserror::Error;

/// Why a `Range` header could not be honored
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// Not one of the supported single-range forms
    #[error("Malformed range: {0}")]
    Malformed(String),

    /// Well-formed, but outside the file
    #[error("Range not satisfiable for size {size}")]
    Unsatisfiable { size: u64 },
}

/// Inclusive byte range within a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered (`end - start + 1`)
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// A resolved range is never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Content-Range` value for a successful partial response
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// `Content-Range` value for a 416 response
pub fn unsatisfied_content_range(size: u64) -> String {
    format!("bytes */{}", size)
}

fn parse_number(s: &str, header: &str) -> Result<u64, RangeError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Malformed(header.to_string()));
    }
    s.parse::<u64>()
        .map_err(|_| RangeError::Malformed(header.to_string()))
}

/// Parse a `Range` header value (`bytes=<spec>`) against a file of `size`
/// bytes.
///
/// Everything after the first `=` is the range spec; the unit name is not
/// checked.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange, RangeError> {
    let spec = header
        .split_once('=')
        .map(|(_, spec)| spec)
        .ok_or_else(|| RangeError::Malformed(header.to_string()))?;
    let (first, second) = spec
        .split_once('-')
        .ok_or_else(|| RangeError::Malformed(header.to_string()))?;

    let (start, end) = if first.is_empty() {
        // -N: last N bytes
        let suffix = parse_number(second, header)?;
        if suffix == 0 {
            return Err(RangeError::Malformed(header.to_string()));
        }
        if suffix > size {
            return Err(RangeError::Unsatisfiable { size });
        }
        (size - suffix, size.saturating_sub(1))
    } else if second.is_empty() {
        // N-: from N to the end
        (parse_number(first, header)?, size.saturating_sub(1))
    } else {
        // N-M
        (parse_number(first, header)?, parse_number(second, header)?)
    };

    if size == 0 {
        return Err(RangeError::Unsatisfiable { size });
    }
    let end = end.min(size - 1);
    if start > end {
        return Err(RangeError::Unsatisfiable { size });
    }

    Ok(ByteRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_suffix_range() {
        assert_eq!(
            parse_range("bytes=-10", 100).unwrap(),
            ByteRange { start: 90, end: 99 }
        );
        assert_eq!(
            parse_range("bytes=-100", 100).unwrap(),
            ByteRange { start: 0, end: 99 }
        );
    }

    #[test]
    fn test_open_prefix_range() {
        assert_eq!(
            parse_range("bytes=50-", 100).unwrap(),
            ByteRange { start: 50, end: 99 }
        );
        assert_eq!(
            parse_range("bytes=0-", 100).unwrap(),
            ByteRange { start: 0, end: 99 }
        );
    }

    #[test]
    fn test_closed_range() {
        let range = parse_range("bytes=20-29", 100).unwrap();
        assert_eq!(range, ByteRange { start: 20, end: 29 });
        assert_eq!(range.len(), 10);
        assert_eq!(range.content_range(100), "bytes 20-29/100");
    }

    #[test]
    fn test_end_is_clamped() {
        assert_eq!(
            parse_range("bytes=60-200", 100).unwrap(),
            ByteRange { start: 60, end: 99 }
        );
    }

    #[test]
    fn test_zero_suffix_is_malformed() {
        assert!(matches!(
            parse_range("bytes=-0", 100),
            Err(RangeError::Malformed(_))
        ));
        assert!(matches!(
            parse_range("bytes=-", 100),
            Err(RangeError::Malformed(_))
        ));
    }

    #[test]
    fn test_malformed_forms() {
        for header in [
            "bytes",
            "bytes=",
            "bytes=abc",
            "bytes=10",
            "bytes=a-10",
            "bytes=10-b",
            "bytes=1-2,5-6",
            "bytes=+1-2",
            "bytes= 1-2",
        ] {
            assert!(
                matches!(parse_range(header, 100), Err(RangeError::Malformed(_))),
                "{header} should be malformed"
            );
        }
    }

    #[test]
    fn test_unsatisfiable() {
        assert_eq!(
            parse_range("bytes=100-", 100),
            Err(RangeError::Unsatisfiable { size: 100 })
        );
        assert_eq!(
            parse_range("bytes=50-40", 100),
            Err(RangeError::Unsatisfiable { size: 100 })
        );
        assert_eq!(
            parse_range("bytes=-101", 100),
            Err(RangeError::Unsatisfiable { size: 100 })
        );
        assert_eq!(
            parse_range("bytes=0-", 0),
            Err(RangeError::Unsatisfiable { size: 0 })
        );
        assert_eq!(unsatisfied_content_range(100), "bytes */100");
    }

    proptest! {
        #[test]
        fn prop_resolved_range_within_file(
            size in 1u64..1_000_000,
            a in 0u64..2_000_000,
            b in 0u64..2_000_000,
            form in 0u8..3,
        ) {
            let header = match form {
                0 => format!("bytes=-{}", a),
                1 => format!("bytes={}-", a),
                _ => format!("bytes={}-{}", a, b),
            };
            if let Ok(range) = parse_range(&header, size) {
                prop_assert!(range.start <= range.end);
                prop_assert!(range.end <= size - 1);
                prop_assert_eq!(range.len(), range.end - range.start + 1);
            }
        }

        #[test]
        fn prop_closed_range_inside_file_is_exact(size in 1u64..100_000, x in 0u64..100_000, y in 0u64..100_000) {
            let (start, end) = (x.min(y) % size, x.max(y) % size);
            prop_assume!(start <= end);
            let range = parse_range(&format!("bytes={}-{}", start, end), size).unwrap();
            prop_assert_eq!(range, ByteRange { start, end });
        }
    }
}
