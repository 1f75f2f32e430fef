//! Dependency-ordered registration of discovered descriptors.
//!
//! A descriptor can only be built once everything it imports is in the
//! pool. [`Resolver`] walks the import graph depth-first with an explicit
//! frame stack, registers each file after its dependencies, and records
//! the resulting load order. A file that imports itself through any chain
//! is reported as [`Error::CyclicDependency`] instead of recursing forever.

use crate::descriptor::DescriptorSet;
use crate::error::{Error, Result};
use crate::pool::SchemaPool;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Names in the order they were registered, dependencies first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOrder(Vec<String>);

impl LoadOrder {
    /// Iterates over names in load order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of registered names
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing was registered
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Position of a name in the load order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|n| n == name)
    }

    /// Returns true if the name was registered
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Compiled artifact names in load order
    pub fn compiled_names<'a>(&'a self, descriptors: &'a DescriptorSet) -> Vec<&'a str> {
        self.iter()
            .filter_map(|name| descriptors.get(name))
            .map(|descriptor| descriptor.compiled_name())
            .collect()
    }

    fn push(&mut self, name: String) {
        self.0.push(name);
    }
}

impl From<LoadOrder> for Vec<String> {
    fn from(order: LoadOrder) -> Self {
        order.0
    }
}

/// One descriptor whose imports are being walked
struct Frame {
    name: String,
    next_dependency: usize,
}

impl Frame {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_dependency: 0,
        }
    }
}

/// Drives registration of every discovered descriptor into a pool
#[derive(Debug)]
pub struct Resolver {
    pending: BTreeSet<String>,
    load_order: LoadOrder,
}

impl Resolver {
    /// Creates a resolver with every name in `descriptors` pending
    pub fn new(descriptors: &DescriptorSet) -> Self {
        Self {
            pending: descriptors.names().map(str::to_string).collect(),
            load_order: LoadOrder::default(),
        }
    }

    /// Names not yet registered
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    /// Names registered so far
    pub fn load_order(&self) -> &LoadOrder {
        &self.load_order
    }

    /// Resolves pending names until none are left
    ///
    /// Names that nothing imports are still resolved, since every pending
    /// name is eventually picked as a root.
    pub fn resolve_all<P>(
        mut self,
        descriptors: &mut DescriptorSet,
        pool: &mut P,
    ) -> Result<LoadOrder>
    where
        P: SchemaPool + ?Sized,
    {
        while let Some(name) = self.pending.first().cloned() {
            self.resolve(&name, descriptors, pool)?;
        }

        info!("Resolved {} descriptors", self.load_order.len());
        Ok(self.load_order)
    }

    /// Registers `root` after all of its transitive dependencies
    ///
    /// Does nothing if `root` is already in the pool. On error, files
    /// registered before the failure stay registered; the file whose
    /// dependency failed is not.
    pub fn resolve<P>(
        &mut self,
        root: &str,
        descriptors: &mut DescriptorSet,
        pool: &mut P,
    ) -> Result<()>
    where
        P: SchemaPool + ?Sized,
    {
        if pool.find(root) {
            self.pending.remove(root);
            return Ok(());
        }
        let Some(descriptor) = descriptors.get(root) else {
            return Err(Error::unknown_dependency(root, None));
        };

        info!(
            "Loading {} ({} dependencies)",
            root,
            descriptor.dependencies().len()
        );
        let mut stack = vec![Frame::new(root)];

        while let Some(frame) = stack.last_mut() {
            let Some(descriptor) = descriptors.get(&frame.name) else {
                return Err(vanished(&frame.name));
            };

            if let Some(dependency) = descriptor.dependencies().get(frame.next_dependency) {
                frame.next_dependency += 1;
                if pool.find(dependency) {
                    continue;
                }

                let dependency = dependency.clone();
                let importer = frame.name.clone();

                if let Some(cycle_start) = stack.iter().position(|f| f.name == dependency) {
                    let mut chain: Vec<String> =
                        stack[cycle_start..].iter().map(|f| f.name.clone()).collect();
                    chain.push(dependency);
                    return Err(Error::CyclicDependency { chain });
                }

                let Some(next) = descriptors.get(&dependency) else {
                    return Err(Error::unknown_dependency(dependency, Some(importer.as_str())));
                };

                debug!(
                    depth = stack.len(),
                    "Loading {} ({} dependencies), imported by {}",
                    dependency,
                    next.dependencies().len(),
                    importer
                );
                stack.push(Frame::new(dependency));
                continue;
            }

            // Every dependency of the top frame is registered now
            let name = frame.name.clone();
            stack.pop();
            self.register(name, descriptors, pool)?;
        }

        Ok(())
    }

    fn register<P>(
        &mut self,
        name: String,
        descriptors: &mut DescriptorSet,
        pool: &mut P,
    ) -> Result<()>
    where
        P: SchemaPool + ?Sized,
    {
        let descriptor = descriptors
            .get_mut(&name)
            .ok_or_else(|| vanished(&name))?;

        let text = pool.register(descriptor)?;
        descriptor.set_rendered_text(text);

        debug!("Registered {}", name);
        self.pending.remove(&name);
        self.load_order.push(name);
        Ok(())
    }
}

fn vanished(name: &str) -> Error {
    Error::internal(format!("'{name}' vanished from the descriptor set"))
}

/// Registers every descriptor in `descriptors` into `pool`, dependencies first
pub fn resolve_all<P>(descriptors: &mut DescriptorSet, pool: &mut P) -> Result<LoadOrder>
where
    P: SchemaPool + ?Sized,
{
    Resolver::new(descriptors).resolve_all(descriptors, pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SchemaDescriptor;
    use pretty_assertions::assert_eq;
    use prost::Message;
    use prost_types::FileDescriptorProto;
    use std::collections::HashSet;

    /// Pool that only tracks names and enforces dependency order
    #[derive(Default)]
    struct RecordingPool {
        registered: HashSet<String>,
        calls: Vec<String>,
    }

    impl SchemaPool for RecordingPool {
        fn find(&self, name: &str) -> bool {
            self.registered.contains(name)
        }

        fn register(&mut self, descriptor: &SchemaDescriptor) -> Result<String> {
            for dep in descriptor.dependencies() {
                if !self.find(dep) {
                    return Err(Error::registration(descriptor.name(), "dependency missing"));
                }
            }
            self.registered.insert(descriptor.name().to_string());
            self.calls.push(descriptor.name().to_string());
            Ok(format!("// {}\n", descriptor.name()))
        }
    }

    fn set(files: &[(&str, &[&str])]) -> DescriptorSet {
        let mut set = DescriptorSet::new();
        for (name, deps) in files {
            let bytes = FileDescriptorProto {
                name: Some(name.to_string()),
                dependency: deps.iter().map(|d| d.to_string()).collect(),
                syntax: Some("proto3".to_string()),
                ..Default::default()
            }
            .encode_to_vec();
            set.insert(SchemaDescriptor::from_bytes(bytes).unwrap());
        }
        set
    }

    fn assert_dependencies_first(order: &LoadOrder, descriptors: &DescriptorSet) {
        for name in order.iter() {
            let position = order.position(name).unwrap();
            for dep in descriptors.get(name).unwrap().dependencies() {
                assert!(
                    order.position(dep).unwrap() < position,
                    "{dep} must load before {name}"
                );
            }
        }
    }

    #[test]
    fn test_chain() {
        let mut descriptors = set(&[
            ("a.proto", &["b.proto"]),
            ("b.proto", &["c.proto"]),
            ("c.proto", &[]),
        ]);
        let mut pool = RecordingPool::default();

        let order = resolve_all(&mut descriptors, &mut pool).unwrap();
        assert_eq!(Vec::<String>::from(order), vec!["c.proto", "b.proto", "a.proto"]);
        assert_eq!(
            descriptors.get("a.proto").unwrap().rendered_text(),
            Some("// a.proto\n")
        );
    }

    #[test]
    fn test_independent_descriptors() {
        let mut descriptors = set(&[("x.proto", &[]), ("y.proto", &[])]);
        let mut pool = RecordingPool::default();

        let order = resolve_all(&mut descriptors, &mut pool).unwrap();
        assert_eq!(order.len(), 2);
        assert!(order.contains("x.proto"));
        assert!(order.contains("y.proto"));
    }

    #[test]
    fn test_diamond_registers_shared_dependency_once() {
        let mut descriptors = set(&[
            ("top.proto", &["left.proto", "right.proto"]),
            ("left.proto", &["base.proto"]),
            ("right.proto", &["base.proto"]),
            ("base.proto", &[]),
            ("lonely.proto", &[]),
        ]);
        let mut pool = RecordingPool::default();

        let order = resolve_all(&mut descriptors, &mut pool).unwrap();
        assert_eq!(order.len(), 5);
        assert_eq!(pool.calls.len(), 5);
        assert_dependencies_first(&order, &descriptors);
    }

    #[test]
    fn test_unknown_dependency() {
        let mut descriptors = set(&[("a.proto", &["missing.proto"])]);
        let mut pool = RecordingPool::default();

        let err = resolve_all(&mut descriptors, &mut pool).unwrap_err();
        match err {
            Error::UnknownDependency { name, importer } => {
                assert_eq!(name, "missing.proto");
                assert_eq!(importer.as_deref(), Some("a.proto"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!pool.find("a.proto"));
        assert!(descriptors.get("a.proto").unwrap().rendered_text().is_none());
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut descriptors = set(&[
            ("a.proto", &["b.proto"]),
            ("b.proto", &["c.proto"]),
            ("c.proto", &["a.proto"]),
        ]);
        let mut pool = RecordingPool::default();

        let err = resolve_all(&mut descriptors, &mut pool).unwrap_err();
        match err {
            Error::CyclicDependency { chain } => {
                assert_eq!(chain, vec!["a.proto", "b.proto", "c.proto", "a.proto"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(pool.calls.is_empty());
    }

    #[test]
    fn test_self_import_is_a_cycle() {
        let mut descriptors = set(&[("me.proto", &["me.proto"])]);
        let mut pool = RecordingPool::default();

        let err = resolve_all(&mut descriptors, &mut pool).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { ref chain } if chain.len() == 2));
    }

    #[test]
    fn test_already_registered_root_is_skipped() {
        let mut descriptors = set(&[("a.proto", &[])]);
        let mut pool = RecordingPool::default();
        pool.registered.insert("a.proto".to_string());

        let mut resolver = Resolver::new(&descriptors);
        resolver.resolve("a.proto", &mut descriptors, &mut pool).unwrap();
        assert!(resolver.load_order().is_empty());
        assert_eq!(resolver.pending().count(), 0);
    }

    #[test]
    fn test_resolve_unknown_root() {
        let mut descriptors = DescriptorSet::new();
        let mut pool = RecordingPool::default();

        let mut resolver = Resolver::new(&descriptors);
        let err = resolver
            .resolve("nope.proto", &mut descriptors, &mut pool)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDependency { importer: None, .. }));
    }

    #[test]
    fn test_compiled_names() {
        let mut descriptors = set(&[("dir/a.proto", &["b.proto"]), ("b.proto", &[])]);
        let mut pool = RecordingPool::default();

        let order = resolve_all(&mut descriptors, &mut pool).unwrap();
        assert_eq!(order.compiled_names(&descriptors), vec!["b.pb", "dir/a.pb"]);
    }
}
