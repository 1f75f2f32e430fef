//! Writing resolved descriptors to an output tree.
//!
//! ```text
//! <output>/text/<name>               canonical schema text
//! <output>/compiled/<compiled_name>  raw descriptor bytes
//! ```
//!
//! Text files are only rewritten when their content changes. With backups
//! enabled the previous version is kept next to it as `<name>.old`.
//! Compiled files are always overwritten.

use crate::descriptor::{DescriptorSet, SchemaDescriptor};
use crate::error::{Error, Result};
use crate::resolver::LoadOrder;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Directory under the output root holding schema text
pub const TEXT_DIR: &str = "text";

/// Directory under the output root holding compiled descriptors
pub const COMPILED_DIR: &str = "compiled";

/// Suffix appended to archived text files
pub const BACKUP_SUFFIX: &str = ".old";

/// Options for a dump run
#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    /// Keep the previous text of a changed file as `<name>.old`
    pub backup: bool,
}

impl DumpOptions {
    /// Creates options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether changed text files are archived
    pub fn backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }
}

/// What happened to a text file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStatus {
    /// The file did not exist before
    New,
    /// The file existed with different content and was replaced
    Changed,
    /// The file already had this content
    Unchanged,
}

/// Summary of a dump run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpReport {
    /// Text files written for the first time
    pub new: usize,
    /// Text files whose content changed
    pub changed: usize,
    /// Text files left untouched
    pub unchanged: usize,
    /// Compiled files written
    pub compiled: usize,
}

impl DumpReport {
    fn record(&mut self, status: TextStatus) {
        match status {
            TextStatus::New => self.new += 1,
            TextStatus::Changed => self.changed += 1,
            TextStatus::Unchanged => self.unchanged += 1,
        }
        self.compiled += 1;
    }
}

/// Dumps every descriptor in `load_order`, in order
///
/// Stops at the first failing file operation; files written before it stay.
pub fn dump_all(
    load_order: &LoadOrder,
    descriptors: &DescriptorSet,
    output_dir: &Path,
    options: DumpOptions,
) -> Result<DumpReport> {
    let mut report = DumpReport::default();

    for name in load_order.iter() {
        let descriptor = descriptors.get(name).ok_or_else(|| {
            Error::internal(format!("'{name}' is in the load order but was never found"))
        })?;
        let status = dump_descriptor(descriptor, output_dir, options)?;
        report.record(status);
    }

    info!(
        "Dump complete: {} new, {} changed, {} unchanged",
        report.new, report.changed, report.unchanged
    );
    Ok(report)
}

/// Writes the text and compiled artifacts of one resolved descriptor
pub fn dump_descriptor(
    descriptor: &SchemaDescriptor,
    output_dir: &Path,
    options: DumpOptions,
) -> Result<TextStatus> {
    let name = descriptor.name();
    let text = descriptor
        .rendered_text()
        .ok_or_else(|| Error::NotResolved {
            name: name.to_string(),
        })?;

    let text_path = output_dir.join(TEXT_DIR).join(relative_path(name)?);
    let compiled_path = output_dir
        .join(COMPILED_DIR)
        .join(relative_path(descriptor.compiled_name())?);

    info!("Extracting {}", name);
    create_parent(&text_path)?;
    create_parent(&compiled_path)?;

    let status = write_text(&text_path, text, options)?;
    match status {
        TextStatus::New => info!("New schema file: {}", name),
        TextStatus::Changed => info!("{} has changed", name),
        TextStatus::Unchanged => debug!("{} is unchanged", name),
    }

    fs::write(&compiled_path, descriptor.raw_bytes())
        .map_err(|e| Error::file_write(&compiled_path, e))?;

    Ok(status)
}

/// Writes `text` unless the file already holds exactly these bytes
fn write_text(path: &Path, text: &str, options: DumpOptions) -> Result<TextStatus> {
    let status = match fs::read(path) {
        Ok(existing) if existing == text.as_bytes() => return Ok(TextStatus::Unchanged),
        Ok(_) => TextStatus::Changed,
        Err(e) if e.kind() == ErrorKind::NotFound => TextStatus::New,
        Err(e) => return Err(Error::file_read(path, e)),
    };

    if status == TextStatus::Changed && options.backup {
        let backup = backup_path(path);
        fs::rename(path, &backup).map_err(|e| Error::file_rename(path, &backup, e))?;
        debug!("Archived previous version as {}", backup.display());
    }

    fs::write(path, text).map_err(|e| Error::file_write(path, e))?;
    Ok(status)
}

/// `foo.proto` becomes `foo.proto.old`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Turns a descriptor name into a path that stays below the output directory
fn relative_path(name: &str) -> Result<PathBuf> {
    let mut path = PathBuf::new();

    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::path_traversal(name));
            }
        }
    }

    if path.as_os_str().is_empty() {
        return Err(Error::path_traversal(name));
    }
    Ok(path)
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::directory_create(parent, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ReflectPool;
    use crate::resolver::resolve_all;
    use pretty_assertions::assert_eq;
    use prost::Message;
    use prost_types::FileDescriptorProto;
    use tempfile::TempDir;

    fn resolved(files: &[(&str, &str)]) -> (DescriptorSet, LoadOrder) {
        let mut set = DescriptorSet::new();
        for (name, package) in files {
            let bytes = FileDescriptorProto {
                name: Some(name.to_string()),
                package: Some(package.to_string()),
                syntax: Some("proto3".to_string()),
                ..Default::default()
            }
            .encode_to_vec();
            set.insert(SchemaDescriptor::from_bytes(bytes).unwrap());
        }
        let order = resolve_all(&mut set, &mut ReflectPool::new()).unwrap();
        (set, order)
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(relative_path("a/b/c.proto").unwrap(), PathBuf::from("a/b/c.proto"));
        assert_eq!(relative_path("./c.proto").unwrap(), PathBuf::from("c.proto"));
        assert!(matches!(relative_path("../c.proto"), Err(Error::PathTraversal { .. })));
        assert!(matches!(relative_path("a/../../c.proto"), Err(Error::PathTraversal { .. })));
        assert!(matches!(relative_path("/etc/c.proto"), Err(Error::PathTraversal { .. })));
        assert!(matches!(relative_path(""), Err(Error::PathTraversal { .. })));
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("out/text/a.proto")),
            PathBuf::from("out/text/a.proto.old")
        );
    }

    #[test]
    fn test_dump_layout() {
        let out = TempDir::new().unwrap();
        let (set, order) = resolved(&[("nested/dir/a.proto", "a")]);

        let report = dump_all(&order, &set, out.path(), DumpOptions::new()).unwrap();
        assert_eq!(report.new, 1);
        assert_eq!(report.compiled, 1);

        let descriptor = set.get("nested/dir/a.proto").unwrap();
        let text = fs::read_to_string(out.path().join("text/nested/dir/a.proto")).unwrap();
        assert_eq!(Some(text.as_str()), descriptor.rendered_text());

        let compiled = fs::read(out.path().join("compiled/nested/dir/a.pb")).unwrap();
        assert_eq!(compiled, descriptor.raw_bytes());
    }

    #[test]
    fn test_second_dump_is_unchanged() {
        let out = TempDir::new().unwrap();
        let (set, order) = resolved(&[("a.proto", "a"), ("b.proto", "b")]);
        let options = DumpOptions::new().backup(true);

        dump_all(&order, &set, out.path(), options).unwrap();
        let report = dump_all(&order, &set, out.path(), options).unwrap();

        assert_eq!(report.unchanged, 2);
        assert_eq!(report.changed, 0);
        assert!(!out.path().join("text/a.proto.old").exists());
    }

    #[test]
    fn test_changed_text_with_backup() {
        let out = TempDir::new().unwrap();
        let (set, order) = resolved(&[("a.proto", "a")]);
        let text_path = out.path().join("text/a.proto");
        fs::create_dir_all(text_path.parent().unwrap()).unwrap();
        fs::write(&text_path, "stale").unwrap();

        let report = dump_all(&order, &set, out.path(), DumpOptions::new().backup(true)).unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(fs::read_to_string(backup_path(&text_path)).unwrap(), "stale");
        assert_eq!(
            Some(fs::read_to_string(&text_path).unwrap().as_str()),
            set.get("a.proto").unwrap().rendered_text()
        );
    }

    #[test]
    fn test_changed_text_without_backup() {
        let out = TempDir::new().unwrap();
        let (set, order) = resolved(&[("a.proto", "a")]);
        let text_path = out.path().join("text/a.proto");
        fs::create_dir_all(text_path.parent().unwrap()).unwrap();
        fs::write(&text_path, "stale").unwrap();

        let report = dump_all(&order, &set, out.path(), DumpOptions::new()).unwrap();
        assert_eq!(report.changed, 1);
        assert!(!backup_path(&text_path).exists());
        assert_ne!(fs::read_to_string(&text_path).unwrap(), "stale");
    }

    #[test]
    fn test_same_length_different_content_is_changed() {
        let out = TempDir::new().unwrap();
        let (set, order) = resolved(&[("a.proto", "a")]);
        let text = set.get("a.proto").unwrap().rendered_text().unwrap();
        let text_path = out.path().join("text/a.proto");
        fs::create_dir_all(text_path.parent().unwrap()).unwrap();
        fs::write(&text_path, "x".repeat(text.len())).unwrap();

        let report = dump_all(&order, &set, out.path(), DumpOptions::new()).unwrap();
        assert_eq!(report.changed, 1);
    }

    #[test]
    fn test_unresolved_descriptor_is_rejected() {
        let out = TempDir::new().unwrap();
        let bytes = FileDescriptorProto {
            name: Some("a.proto".to_string()),
            ..Default::default()
        }
        .encode_to_vec();
        let descriptor = SchemaDescriptor::from_bytes(bytes).unwrap();

        let err = dump_descriptor(&descriptor, out.path(), DumpOptions::new()).unwrap_err();
        assert!(matches!(err, Error::NotResolved { .. }));
    }

    #[test]
    fn test_compiled_artifact_round_trip() {
        let out = TempDir::new().unwrap();
        let mut set = DescriptorSet::new();
        for (name, deps) in [("base.proto", vec![]), ("app/main.proto", vec!["base.proto"])] {
            let bytes = FileDescriptorProto {
                name: Some(name.to_string()),
                dependency: deps.iter().map(|d: &&str| d.to_string()).collect(),
                syntax: Some("proto3".to_string()),
                ..Default::default()
            }
            .encode_to_vec();
            set.insert(SchemaDescriptor::from_bytes(bytes).unwrap());
        }
        let order = resolve_all(&mut set, &mut ReflectPool::new()).unwrap();
        dump_all(&order, &set, out.path(), DumpOptions::new()).unwrap();

        let bytes = fs::read(out.path().join("compiled/app/main.pb")).unwrap();
        let reparsed = SchemaDescriptor::from_bytes(bytes).unwrap();
        let original = set.get("app/main.proto").unwrap();
        assert_eq!(reparsed.name(), original.name());
        assert_eq!(reparsed.dependencies(), original.dependencies());
    }
}
