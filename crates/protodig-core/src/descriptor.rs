//! Parsed descriptors and the set of descriptors discovered in one input.

use crate::error::{Error, Result};
use crate::scanner::RawCandidate;
use bytes::Bytes;
use prost::Message;
use prost_types::FileDescriptorProto;
use std::collections::HashMap;
use tracing::{info, warn};

/// Extension given to compiled artifacts
pub const COMPILED_EXTENSION: &str = "pb";

/// One descriptor found in the input
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    name: String,
    compiled_name: String,
    proto: FileDescriptorProto,
    raw_bytes: Bytes,
    offset: usize,
    rendered_text: Option<String>,
}

impl SchemaDescriptor {
    /// Decodes a scanner candidate
    pub fn parse(candidate: RawCandidate) -> Result<Self> {
        let proto = FileDescriptorProto::decode(candidate.as_bytes())?;
        if proto.name().is_empty() {
            return Err(Error::UnnamedDescriptor {
                offset: candidate.offset(),
            });
        }

        Ok(Self {
            name: proto.name().to_string(),
            compiled_name: compiled_name(proto.name()),
            proto,
            offset: candidate.offset(),
            raw_bytes: candidate.data,
            rendered_text: None,
        })
    }

    /// Decodes a compiled artifact, e.g. one read back from disk
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let len = data.len();
        Self::parse(RawCandidate {
            range: 0..len,
            data,
        })
    }

    /// File name recorded in the descriptor, e.g. `foo/bar.proto`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of imported files, in declaration order
    pub fn dependencies(&self) -> &[String] {
        &self.proto.dependency
    }

    /// Name of the compiled artifact, e.g. `foo/bar.pb`
    pub fn compiled_name(&self) -> &str {
        &self.compiled_name
    }

    /// The exact bytes found by the scanner
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw_bytes
    }

    /// Offset of the descriptor in the scanned input
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The decoded descriptor
    pub fn proto(&self) -> &FileDescriptorProto {
        &self.proto
    }

    /// Canonical text, available once the descriptor has been registered
    pub fn rendered_text(&self) -> Option<&str> {
        self.rendered_text.as_deref()
    }

    pub(crate) fn set_rendered_text(&mut self, text: String) {
        debug_assert!(self.rendered_text.is_none(), "{} rendered twice", self.name);
        self.rendered_text = Some(text);
    }
}

/// Replaces the extension of the last path segment with `.pb`
pub fn compiled_name(name: &str) -> String {
    let segment_start = name.rfind('/').map_or(0, |i| i + 1);
    let stem = match name[segment_start..].rfind('.') {
        Some(dot) => &name[..segment_start + dot],
        None => name,
    };
    format!("{stem}.{COMPILED_EXTENSION}")
}

/// Descriptors keyed by name
///
/// A name found twice keeps the later descriptor. The earlier one is
/// dropped with a warning and counted in [`DescriptorSet::duplicates`].
#[derive(Debug, Default)]
pub struct DescriptorSet {
    descriptors: HashMap<String, SchemaDescriptor>,
    duplicates: usize,
}

impl DescriptorSet {
    /// Creates an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses candidates, dropping those that do not decode
    pub fn from_candidates(candidates: impl IntoIterator<Item = RawCandidate>) -> Self {
        let mut set = Self::new();

        for candidate in candidates {
            let range = candidate.range.clone();
            match SchemaDescriptor::parse(candidate) {
                Ok(descriptor) => {
                    info!("Found {} in binary file", descriptor.name());
                    set.insert(descriptor);
                }
                Err(e) => {
                    warn!(
                        "Dropping candidate at {}..{}: {}",
                        range.start, range.end, e
                    );
                }
            }
        }

        set
    }

    /// Inserts a descriptor, returning the one it replaced
    pub fn insert(&mut self, descriptor: SchemaDescriptor) -> Option<SchemaDescriptor> {
        let replaced = self
            .descriptors
            .insert(descriptor.name().to_string(), descriptor);

        if let Some(old) = &replaced {
            warn!(
                "Duplicate descriptor {} (offset {} replaced by a later copy)",
                old.name(),
                old.offset()
            );
            self.duplicates += 1;
        }

        replaced
    }

    /// Looks up a descriptor by name
    pub fn get(&self, name: &str) -> Option<&SchemaDescriptor> {
        self.descriptors.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut SchemaDescriptor> {
        self.descriptors.get_mut(name)
    }

    /// Returns true if a descriptor with this name was found
    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    /// Iterates over discovered names in no particular order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    /// Number of distinct names
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if nothing was found
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Number of descriptors that were replaced by a later one of the same name
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}
