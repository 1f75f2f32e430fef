//! Error types for the protodig-core library.
//!
//! Every fallible operation in the crate returns [`Result`], whose error
//! variants distinguish between problems that only drop a single scanner
//! candidate and problems that abort a whole run.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for protodig operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all protodig operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write an output file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to move a previous dump out of the way
    #[error("failed to rename '{from}' to '{to}': {source}")]
    FileRename {
        /// Existing file
        from: PathBuf,
        /// Backup destination
        to: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to create an output directory
    #[error("failed to create directory '{path}': {source}")]
    DirectoryCreate {
        /// Path to the directory that failed to create
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A descriptor name would place output outside the output directory
    #[error("path traversal detected: '{path}' would escape output directory")]
    PathTraversal {
        /// The offending path
        path: PathBuf,
    },

    /// Candidate bytes are not a valid FileDescriptorProto
    #[error("failed to parse FileDescriptorProto: {0}")]
    DescriptorParse(#[from] prost::DecodeError),

    /// A decoded descriptor carries no file name
    #[error("descriptor at offset {offset} has an empty file name")]
    UnnamedDescriptor {
        /// Offset of the candidate in the scanned buffer
        offset: usize,
    },

    /// The schema pool rejected a descriptor
    #[error("failed to register '{name}': {details}")]
    Registration {
        /// Descriptor name
        name: String,
        /// Pool diagnostic
        details: String,
    },

    /// A dependency was never discovered in the input
    #[error("unknown dependency '{name}'{}", imported_by(.importer))]
    UnknownDependency {
        /// The missing dependency
        name: String,
        /// The descriptor that imports it, if any
        importer: Option<String>,
    },

    /// Descriptors import each other in a loop
    #[error("cyclic dependency: {}", .chain.join(" -> "))]
    CyclicDependency {
        /// Names along the cycle; the first and last entries are equal
        chain: Vec<String>,
    },

    /// A descriptor was dumped before it was resolved
    #[error("descriptor '{name}' has not been resolved")]
    NotResolved {
        /// Descriptor name
        name: String,
    },

    /// Failed to serialise the load-order manifest
    #[error("failed to serialize manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

fn imported_by(importer: &Option<String>) -> String {
    match importer {
        Some(importer) => format!(" (imported by '{importer}')"),
        None => String::new(),
    }
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file write error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a new rename error
    pub fn file_rename(
        from: impl Into<PathBuf>,
        to: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::FileRename {
            from: from.into(),
            to: to.into(),
            source,
        }
    }

    /// Creates a new directory creation error
    pub fn directory_create(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryCreate {
            path: path.into(),
            source,
        }
    }

    /// Creates a new path traversal error
    pub fn path_traversal(path: impl Into<PathBuf>) -> Self {
        Self::PathTraversal { path: path.into() }
    }

    /// Creates a new registration error
    pub fn registration(name: impl Into<String>, details: impl ToString) -> Self {
        Self::Registration {
            name: name.into(),
            details: details.to_string(),
        }
    }

    /// Creates a new unknown dependency error
    pub fn unknown_dependency(name: impl Into<String>, importer: Option<&str>) -> Self {
        Self::UnknownDependency {
            name: name.into(),
            importer: importer.map(str::to_string),
        }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this error only invalidates a single scanner candidate
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DescriptorParse(_) | Self::UnnamedDescriptor { .. }
        )
    }
}
