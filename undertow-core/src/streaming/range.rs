//! HTTP `Range` header parsing (RFC 7233, single `bytes` ranges).

/// A byte range as written by the client, before the file size is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=start-` or `bytes=start-end`
    FromTo { start: u64, end: Option<u64> },
    /// `bytes=-N`, the last N bytes
    Suffix { length: u64 },
}

/// An inclusive byte range resolved against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes in the range.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for this range of a `total`-byte file.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Parses a `Range` header value.
///
/// Returns `None` for anything that is not a well-formed `bytes` range, in
/// which case the caller serves the whole file. Only the first range of a
/// multi-range header is used.
///
/// # Examples
/// ```
/// use undertow_core::streaming::range::{RangeSpec, parse_range_header};
///
/// assert_eq!(
///     parse_range_header("bytes=100-199"),
///     Some(RangeSpec::FromTo { start: 100, end: Some(199) })
/// );
/// assert_eq!(parse_range_header("items=0-1"), None);
/// ```
pub fn parse_range_header(value: &str) -> Option<RangeSpec> {
    let (unit, ranges) = value.trim().split_once('=')?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return None;
    }

    let first = ranges.split(',').next()?.trim();
    let (start, end) = first.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        let length = end.parse::<u64>().ok()?;
        return Some(RangeSpec::Suffix { length });
    }

    let start = start.parse::<u64>().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        let end = end.parse::<u64>().ok()?;
        if end < start {
            return None;
        }
        Some(end)
    };

    Some(RangeSpec::FromTo { start, end })
}

impl RangeSpec {
    /// Resolves the range against a file of `total` bytes.
    ///
    /// Returns `None` when the range is unsatisfiable: a start at or past the
    /// end of the file, an empty suffix, or any range of an empty file.
    pub fn resolve(self, total: u64) -> Option<ByteRange> {
        if total == 0 {
            return None;
        }
        let last = total - 1;

        match self {
            RangeSpec::FromTo { start, end } => {
                if start >= total {
                    return None;
                }
                let end = end.map_or(last, |end| end.min(last));
                Some(ByteRange { start, end })
            }
            RangeSpec::Suffix { length } => {
                if length == 0 {
                    return None;
                }
                Some(ByteRange {
                    start: total.saturating_sub(length),
                    end: last,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_parse_closed_and_open_ranges() {
        assert_eq!(
            parse_range_header("bytes=100-199"),
            Some(RangeSpec::FromTo {
                start: 100,
                end: Some(199)
            })
        );
        assert_eq!(
            parse_range_header("bytes=500-"),
            Some(RangeSpec::FromTo {
                start: 500,
                end: None
            })
        );
        assert_eq!(
            parse_range_header("bytes=-300"),
            Some(RangeSpec::Suffix { length: 300 })
        );
    }

    #[test]
    fn test_parse_uses_first_of_multiple_ranges() {
        assert_eq!(
            parse_range_header("bytes=0-9, 20-29"),
            Some(RangeSpec::FromTo {
                start: 0,
                end: Some(9)
            })
        );
    }

    #[test]
    fn test_parse_rejects_malformed_headers() {
        for header in [
            "",
            "bytes",
            "bytes=",
            "bytes=abc-",
            "bytes=10-5",
            "bytes=-",
            "pages=1-2",
            "bytes=1-2-3",
        ] {
            assert_eq!(parse_range_header(header), None, "header {header:?}");
        }
    }

    #[test]
    fn test_resolve_clamps_end_past_eof() {
        let range = RangeSpec::FromTo {
            start: 900,
            end: Some(5_000),
        };
        assert_eq!(
            range.resolve(1000),
            Some(ByteRange {
                start: 900,
                end: 999
            })
        );
    }

    #[test]
    fn test_resolve_rejects_start_past_eof() {
        let range = RangeSpec::FromTo {
            start: 2000,
            end: None,
        };
        assert_eq!(range.resolve(1000), None);
        assert_eq!(
            RangeSpec::FromTo {
                start: 1000,
                end: None
            }
            .resolve(1000),
            None
        );
    }

    #[test]
    fn test_resolve_suffix() {
        assert_eq!(
            RangeSpec::Suffix { length: 100 }.resolve(1000),
            Some(ByteRange {
                start: 900,
                end: 999
            })
        );
        assert_eq!(
            RangeSpec::Suffix { length: 5000 }.resolve(1000),
            Some(ByteRange { start: 0, end: 999 })
        );
        assert_eq!(RangeSpec::Suffix { length: 0 }.resolve(1000), None);
    }

    #[test]
    fn test_content_range_format() {
        let range = ByteRange {
            start: 100,
            end: 199,
        };
        assert_eq!(range.length(), 100);
        assert_eq!(range.content_range(1000), "bytes 100-199/1000");
    }

    proptest! {
        #[test]
        fn resolved_ranges_stay_inside_file(
            total in 1u64..10_000_000,
            start in 0u64..10_000_000,
            end in proptest::option::of(0u64..20_000_000),
        ) {
            let header = match end {
                Some(end) => format!("bytes={start}-{end}"),
                None => format!("bytes={start}-"),
            };
            if let Some(range) = parse_range_header(&header).and_then(|spec| spec.resolve(total)) {
                prop_assert!(range.start <= range.end);
                prop_assert!(range.end < total);
                prop_assert_eq!(range.start, start);
                prop_assert_eq!(range.length(), range.end - range.start + 1);
            } else {
                prop_assert!(start >= total || end.is_some_and(|end| end < start));
            }
        }
    }
}
