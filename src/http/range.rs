//! `Range` header parsing (RFC 7233, byte ranges only).

use thiserror::Error;

use crate::net::HttpRange;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid range")]
    Invalid,

    /// Syntactically valid, but every range starts past the end.
    #[error("invalid range: failed to overlap")]
    NoOverlap,
}

/// Parse a `Range` header against an object of `size` bytes.
///
/// Returns resolved ranges, each with a concrete length. An empty header
/// yields no ranges. Unsatisfiable entries are skipped as long as at least one
/// range overlaps the object.
pub fn parse_range(header: &str, size: u64) -> Result<Vec<HttpRange>, RangeError> {
    if header.is_empty() {
        return Ok(Vec::new());
    }
    let set = header.strip_prefix("bytes=").ok_or(RangeError::Invalid)?;

    let mut ranges = Vec::new();
    let mut no_overlap = false;
    for raw in set.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (first, last) = raw.split_once('-').ok_or(RangeError::Invalid)?;
        let (first, last) = (first.trim(), last.trim());

        if first.is_empty() {
            // Suffix range: the final `last` bytes.
            let suffix = parse_position(last)?;
            if suffix == 0 || size == 0 {
                no_overlap = true;
                continue;
            }
            let suffix = suffix.min(size);
            ranges.push(HttpRange::new(size - suffix, suffix));
            continue;
        }

        let start = parse_position(first)?;
        if start >= size {
            no_overlap = true;
            continue;
        }
        let length = if last.is_empty() {
            size - start
        } else {
            let end = parse_position(last)?;
            if start > end {
                return Err(RangeError::Invalid);
            }
            end.min(size - 1) - start + 1
        };
        ranges.push(HttpRange::new(start, length));
    }

    if no_overlap && ranges.is_empty() {
        return Err(RangeError::NoOverlap);
    }
    Ok(ranges)
}

fn parse_position(s: &str) -> Result<u64, RangeError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Invalid);
    }
    s.parse().map_err(|_| RangeError::Invalid)
}

/// Sum of all range lengths.
pub fn total_length(ranges: &[HttpRange]) -> u64 {
    ranges.iter().map(|r| r.length.unwrap_or(0)).sum()
}
