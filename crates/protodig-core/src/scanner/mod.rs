//! Binary scanning module for finding embedded protobuf descriptors.
//!
//! Compiled descriptors are stored in binaries without any index, so their
//! boundaries have to be guessed from the bytes themselves.
//!
//! ## Algorithm Overview
//!
//! 1. Search forward for the end marker `0x62 0x06 "proto3"` (field 12,
//!    `syntax`, which protoc serialises last).
//! 2. From the end of that marker, search backward for a `.proto` suffix,
//!    which every descriptor carries in its file name (field 1).
//! 3. From the suffix, search backward for the tag byte `0x0A`
//!    (field 1, wire type LEN).
//! 4. Accept the tag if the byte after it equals the length of the name
//!    running up to the end of the suffix. Otherwise retry with the next
//!    earlier suffix, and give up at the end of the previous match.
//!
//! The length is read as a single byte rather than a varint, so files whose
//! names are 128 bytes or longer are never found.
//!
//! ## Extensibility
//!
//! The [`ScanStrategy`] trait allows custom scanning algorithms:
//!
//! ```no_run
//! use bytes::Bytes;
//! use protodig_core::scanner::{RawCandidate, ScanStrategy};
//!
//! struct WholeBuffer;
//!
//! impl ScanStrategy for WholeBuffer {
//!     fn scan(&self, data: &Bytes) -> Vec<RawCandidate> {
//!         vec![RawCandidate::new(data, 0..data.len())]
//!     }
//! }
//! ```

use bytes::Bytes;
use std::ops::Range;
use tracing::{debug, trace};

/// Default end marker: field 12 (`syntax`), length 6, `proto3`
pub const PROTO3_END_MARKER: &[u8] = b"\x62\x06proto3";

/// Suffix found in the file name of every descriptor
pub const PROTO_SUFFIX: &[u8] = b".proto";

/// Tag byte of field 1 (`name`) with wire type LEN: (1 << 3) | 2 = 0x0A
pub const NAME_TAG: u8 = 0x0A;

/// A byte range of the scanned buffer that probably holds one descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandidate {
    /// Byte range in the original input
    pub range: Range<usize>,
    /// The bytes of that range, sharing the input's allocation
    pub data: Bytes,
}

impl RawCandidate {
    /// Creates a candidate covering `range` of `input`
    pub fn new(input: &Bytes, range: Range<usize>) -> Self {
        Self {
            data: input.slice(range.clone()),
            range,
        }
    }

    /// Returns the data as a slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Offset of the first byte in the original input
    pub fn offset(&self) -> usize {
        self.range.start
    }
}

/// Configuration for the scanner
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Byte sequence that terminates every descriptor
    pub end_marker: Vec<u8>,
    /// Byte sequence the file name of every descriptor ends with
    pub name_marker: Vec<u8>,
    /// Tag byte that opens the file name field
    pub name_tag: u8,
    /// Maximum number of descriptors to find (0 = unlimited)
    pub max_results: usize,
    /// Minimum size for a valid descriptor (filters noise)
    pub min_descriptor_size: usize,
    /// Maximum size for a valid descriptor (filters garbage)
    pub max_descriptor_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            end_marker: PROTO3_END_MARKER.to_vec(),
            name_marker: PROTO_SUFFIX.to_vec(),
            name_tag: NAME_TAG,
            max_results: 0,
            min_descriptor_size: 10,
            max_descriptor_size: 10 * 1024 * 1024, // 10 MB
        }
    }
}

impl ScannerConfig {
    /// Creates a new scanner config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the end marker
    pub fn end_marker(mut self, marker: impl Into<Vec<u8>>) -> Self {
        self.end_marker = marker.into();
        self
    }

    /// Sets the file name suffix
    pub fn name_marker(mut self, marker: impl Into<Vec<u8>>) -> Self {
        self.name_marker = marker.into();
        self
    }

    /// Sets the tag byte of the name field
    pub fn name_tag(mut self, tag: u8) -> Self {
        self.name_tag = tag;
        self
    }

    /// Sets the maximum number of results to return
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Sets the minimum descriptor size filter
    pub fn min_descriptor_size(mut self, size: usize) -> Self {
        self.min_descriptor_size = size;
        self
    }

    /// Sets the maximum descriptor size filter
    pub fn max_descriptor_size(mut self, size: usize) -> Self {
        self.max_descriptor_size = size;
        self
    }
}

/// Trait for implementing custom scanning strategies
///
/// Implementations return non-overlapping candidates in ascending offset
/// order. False positives are allowed; candidates that fail to decode are
/// dropped later.
pub trait ScanStrategy: Send + Sync {
    /// Scan the provided data for protobuf descriptors
    fn scan(&self, data: &Bytes) -> Vec<RawCandidate>;
}

/// Primary scanner for finding embedded protobuf descriptors
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    config: ScannerConfig,
}

impl Scanner {
    /// Creates a new scanner with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Returns the scanner configuration
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Lazily iterates over candidate ranges in `data`
    pub fn candidates<'a>(&'a self, data: &'a [u8]) -> Candidates<'a> {
        Candidates {
            config: &self.config,
            data,
            position: 0,
            found: 0,
        }
    }
}

impl ScanStrategy for Scanner {
    fn scan(&self, data: &Bytes) -> Vec<RawCandidate> {
        debug!("Starting scan of {} bytes", data.len());

        let results: Vec<_> = self
            .candidates(data)
            .map(|range| RawCandidate::new(data, range))
            .collect();

        debug!("Scan complete: found {} candidates", results.len());
        results
    }
}

/// Iterator over candidate ranges, see [`Scanner::candidates`]
#[derive(Debug)]
pub struct Candidates<'a> {
    config: &'a ScannerConfig,
    data: &'a [u8],
    position: usize,
    found: usize,
}

impl Iterator for Candidates<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        let config = self.config;

        if config.max_results > 0 && self.found >= config.max_results {
            return None;
        }

        while self.position < self.data.len() {
            let lower = self.position;
            let Some(relative_pos) =
                find_subsequence(&self.data[lower..], &config.end_marker)
            else {
                self.position = self.data.len();
                break;
            };

            let end = lower + relative_pos + config.end_marker.len();
            // Resume past this end marker whether or not it pans out
            self.position = end;

            let Some(start) = find_start(config, self.data, lower, end) else {
                trace!("Discarding end marker at position {}: no start found", end);
                continue;
            };

            let len = end - start;
            if len < config.min_descriptor_size || len > config.max_descriptor_size {
                trace!("Discarding candidate {}..{}: size {} out of bounds", start, end, len);
                continue;
            }

            debug!("Found candidate at {}..{} ({} bytes)", start, end, len);
            self.found += 1;
            return Some(start..end);
        }

        None
    }
}

/// Find the start of the descriptor ending at `end`, never looking below `lower`
fn find_start(config: &ScannerConfig, data: &[u8], lower: usize, end: usize) -> Option<usize> {
    let mut upper = end;

    loop {
        let marker_pos = lower + rfind_subsequence(&data[lower..upper], &config.name_marker)?;
        let name_end = marker_pos + config.name_marker.len();
        trace!("Found name marker at position {}", marker_pos);

        let tag_pos = lower
            + data[lower..marker_pos]
                .iter()
                .rposition(|&b| b == config.name_tag)?;

        if name_length_matches(data, tag_pos, name_end) {
            return Some(tag_pos);
        }

        // A 10-byte name has a length byte equal to the tag byte, so the
        // nearest tag is really the length of the field behind it.
        if tag_pos > lower
            && data[tag_pos - 1] == config.name_tag
            && name_length_matches(data, tag_pos - 1, name_end)
        {
            return Some(tag_pos - 1);
        }

        trace!("Rejected name tag at position {}", tag_pos);
        upper = marker_pos;
    }
}

/// Checks that the byte after `tag_pos` is the length of the name ending at `name_end`
fn name_length_matches(data: &[u8], tag_pos: usize, name_end: usize) -> bool {
    data.get(tag_pos + 1)
        .is_some_and(|&len| tag_pos + 2 + len as usize == name_end)
}

/// Find the first occurrence of a subsequence within a byte slice
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Find the last occurrence of a subsequence within a byte slice
fn rfind_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use prost::Message;
    use prost_types::FileDescriptorProto;

    fn descriptor(name: &str, deps: &[&str]) -> Vec<u8> {
        FileDescriptorProto {
            name: Some(name.to_string()),
            package: Some("test".to_string()),
            dependency: deps.iter().map(|d| d.to_string()).collect(),
            syntax: Some("proto3".to_string()),
            ..Default::default()
        }
        .encode_to_vec()
    }

    fn scan(data: &[u8]) -> Vec<Range<usize>> {
        Scanner::new().candidates(data).collect()
    }

    #[test]
    fn test_find_subsequence() {
        let data = b"hello.proto.world.proto";
        assert_eq!(find_subsequence(data, b".proto"), Some(5));
        assert_eq!(rfind_subsequence(data, b".proto"), Some(17));
        assert_eq!(find_subsequence(data, b"missing"), None);
        assert_eq!(find_subsequence(data, b""), None);
    }

    #[test]
    fn test_scanner_config_builder() {
        let config = ScannerConfig::new()
            .max_results(10)
            .min_descriptor_size(20)
            .max_descriptor_size(1000)
            .name_tag(0x12);

        assert_eq!(config.max_results, 10);
        assert_eq!(config.min_descriptor_size, 20);
        assert_eq!(config.max_descriptor_size, 1000);
        assert_eq!(config.name_tag, 0x12);
        assert_eq!(config.end_marker, PROTO3_END_MARKER);
    }

    #[test]
    fn test_empty_input() {
        assert!(scan(&[]).is_empty());
    }

    #[test]
    fn test_no_end_marker() {
        let data = b"random bytes mentioning foo.proto but never the syntax field";
        assert!(scan(data).is_empty());
    }

    #[test]
    fn test_single_descriptor_in_noise() {
        let desc = descriptor("foo/bar.proto", &[]);
        let mut data = b"\x00\x01garbage\xff".to_vec();
        let start = data.len();
        data.extend_from_slice(&desc);
        data.extend_from_slice(b"trailing\x00\x00");

        assert_eq!(scan(&data), vec![start..start + desc.len()]);
    }

    #[test]
    fn test_concatenated_descriptors() {
        let parts = [
            descriptor("a.proto", &[]),
            descriptor("b.proto", &["a.proto"]),
            descriptor("nested/c.proto", &["a.proto", "b.proto"]),
        ];
        let data = parts.concat();

        let ranges = scan(&data);
        assert_eq!(ranges.len(), parts.len());
        for (range, part) in ranges.iter().zip(&parts) {
            assert_eq!(&data[range.clone()], part.as_slice());
        }
    }

    #[test]
    fn test_ten_byte_name() {
        // Length byte 0x0A doubles as a tag byte
        let desc = descriptor("abcd.proto", &[]);
        assert_eq!(desc[1], NAME_TAG);
        assert_eq!(scan(&desc), vec![0..desc.len()]);
    }

    #[test]
    fn test_long_name_is_skipped() {
        let name = format!("{}.proto", "x".repeat(130));
        let desc = descriptor(&name, &[]);
        assert!(scan(&desc).is_empty());
    }

    #[test]
    fn test_false_positive_marker_is_skipped() {
        let mut data = b"no name here \x62\x06proto3 ".to_vec();
        let desc = descriptor("real.proto", &[]);
        let start = data.len();
        data.extend_from_slice(&desc);

        assert_eq!(scan(&data), vec![start..data.len()]);
    }

    #[test]
    fn test_start_search_stops_at_previous_match() {
        // The second marker has no name of its own; the first descriptor's
        // name must not be reused for it.
        let mut data = descriptor("first.proto", &[]);
        let first_len = data.len();
        data.extend_from_slice(b"\x62\x06proto3");

        assert_eq!(scan(&data), vec![0..first_len]);
    }

    #[test]
    fn test_max_results() {
        let data = [descriptor("a.proto", &[]), descriptor("b.proto", &[])].concat();
        let scanner = Scanner::with_config(ScannerConfig::new().max_results(1));
        assert_eq!(scanner.candidates(&data).count(), 1);
    }

    #[test]
    fn test_size_filter() {
        let desc = descriptor("a.proto", &[]);
        let scanner = Scanner::with_config(ScannerConfig::new().max_descriptor_size(desc.len() - 1));
        assert_eq!(scanner.candidates(&desc).count(), 0);
    }

    #[test]
    fn test_scan_shares_input() {
        let desc = Bytes::from(descriptor("a.proto", &[]));
        let results = Scanner::new().scan(&desc);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].offset(), 0);
        assert_eq!(results[0].as_bytes(), &desc[..]);
    }
}
