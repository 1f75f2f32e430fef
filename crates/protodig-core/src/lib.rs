//! # protodig-core
//!
//! A library for recovering Protocol Buffer definitions embedded in compiled binaries.
//!
//! Code generators embed each `.proto` file as a serialized
//! `FileDescriptorProto`, with nothing pointing at where it starts or how
//! long it is. This crate:
//!
//! - Finds descriptor boundaries heuristically in an arbitrary byte buffer
//! - Builds the descriptors into a schema pool, dependencies first
//! - Dumps canonical `.proto` text plus the original bytes, archiving
//!   text that changed since the previous dump
//!
//! ## Architecture
//!
//! - [`scanner`]: Heuristic boundary detection
//! - [`descriptor`]: Parsed descriptors and the per-input descriptor set
//! - [`pool`]: The [`SchemaPool`] seam and its `prost-reflect` backend
//! - [`render`]: `.proto` text rendering
//! - [`resolver`]: Dependency-ordered registration
//! - [`dumper`]: Output tree writing with change detection
//! - [`manifest`]: JSON load-order manifest
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use protodig_core::{dumper, manifest, DumpOptions};
//! use std::path::Path;
//!
//! let extraction = protodig_core::extract_file("./target/release/my_app")?;
//! let out = Path::new("dump");
//!
//! dumper::dump_all(
//!     &extraction.load_order,
//!     &extraction.descriptors,
//!     out,
//!     DumpOptions::new().backup(true),
//! )?;
//! manifest::write(&out.join("load_order.json"), &extraction.load_order, &extraction.descriptors)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod descriptor;
pub mod dumper;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod pool;
pub mod render;
pub mod resolver;
pub mod scanner;

// Re-export primary types for convenience
pub use descriptor::{DescriptorSet, SchemaDescriptor};
pub use dumper::{DumpOptions, DumpReport, TextStatus};
pub use error::{Error, Result};
pub use pipeline::{extract, extract_file, Extraction};
pub use pool::{ReflectPool, SchemaPool};
pub use render::RenderConfig;
pub use resolver::{resolve_all, LoadOrder, Resolver};
pub use scanner::{RawCandidate, ScanStrategy, Scanner, ScannerConfig};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
