//! Schema pool: the registry descriptors are built into, dependencies first.

use crate::descriptor::SchemaDescriptor;
use crate::error::{Error, Result};
use crate::render::{render_file, RenderConfig, Syntax};
use prost_reflect::DescriptorPool;

/// A registry of built schema files
///
/// Registration must fail if any dependency of the descriptor is not
/// already registered.
pub trait SchemaPool {
    /// Returns true if a file with this name is registered
    fn find(&self, name: &str) -> bool;

    /// Builds and registers a descriptor, returning its canonical text
    fn register(&mut self, descriptor: &SchemaDescriptor) -> Result<String>;
}

/// [`SchemaPool`] backed by a `prost_reflect::DescriptorPool`
pub struct ReflectPool {
    pool: DescriptorPool,
    config: RenderConfig,
}

impl Default for ReflectPool {
    fn default() -> Self {
        Self::with_config(RenderConfig::default())
    }
}

impl ReflectPool {
    /// Creates an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty pool with custom rendering
    pub fn with_config(config: RenderConfig) -> Self {
        Self {
            pool: DescriptorPool::new(),
            config,
        }
    }

    /// The underlying descriptor pool
    pub fn descriptor_pool(&self) -> &DescriptorPool {
        &self.pool
    }
}

impl SchemaPool for ReflectPool {
    fn find(&self, name: &str) -> bool {
        self.pool.get_file_by_name(name).is_some()
    }

    fn register(&mut self, descriptor: &SchemaDescriptor) -> Result<String> {
        let name = descriptor.name();

        // Checked before the pool sees the file, so nothing unrenderable gets registered
        Syntax::try_from(descriptor.proto().syntax()).map_err(|e| Error::registration(name, e))?;

        if let Some(missing) = descriptor.dependencies().iter().find(|dep| !self.find(dep)) {
            return Err(Error::registration(
                name,
                format!("dependency '{missing}' is not registered"),
            ));
        }

        self.pool
            .add_file_descriptor_proto(descriptor.proto().clone())
            .map_err(|e| Error::registration(name, e))?;

        let file = self.pool.get_file_by_name(name).ok_or_else(|| {
            Error::internal(format!("'{name}' missing from pool after registration"))
        })?;

        render_file(file.file_descriptor_proto(), &self.config)
    }
}
