//! JSON manifest listing compiled artifacts in load order.
//!
//! ```text
//! [
//!     "foo.pb",
//!     "bar.pb"
//! ]
//! ```
//!
//! Tools that load the compiled files one by one can follow this order
//! without knowing anything about imports.

use crate::descriptor::DescriptorSet;
use crate::error::{Error, Result};
use crate::resolver::LoadOrder;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::fs;
use std::path::Path;
use tracing::info;

const INDENT: &[u8] = b"    ";

/// Serialises the compiled names of `load_order` as a JSON array
pub fn to_json(load_order: &LoadOrder, descriptors: &DescriptorSet) -> Result<String> {
    let names = load_order.compiled_names(descriptors);

    let mut buf = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(INDENT));
    names.serialize(&mut serializer)?;

    String::from_utf8(buf).map_err(|e| Error::internal(format!("manifest is not UTF-8: {e}")))
}

/// Writes the manifest to `path`, creating its parent directory
pub fn write(path: &Path, load_order: &LoadOrder, descriptors: &DescriptorSet) -> Result<()> {
    let json = to_json(load_order, descriptors)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::directory_create(parent, e))?;
    }
    fs::write(path, json).map_err(|e| Error::file_write(path, e))?;

    info!("Wrote load order of {} files to {}", load_order.len(), path.display());
    Ok(())
}
