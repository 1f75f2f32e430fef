//! Scan, parse and resolve in one call.

use crate::descriptor::DescriptorSet;
use crate::error::{Error, Result};
use crate::pool::{ReflectPool, SchemaPool};
use crate::resolver::{LoadOrder, Resolver};
use crate::scanner::{ScanStrategy, Scanner};
use bytes::Bytes;
use std::path::Path;
use tracing::debug;

/// Descriptors found in one input, resolved into a pool
#[derive(Debug)]
pub struct Extraction {
    /// Every descriptor found, with rendered text set
    pub descriptors: DescriptorSet,
    /// Registration order, dependencies first
    pub load_order: LoadOrder,
}

/// Scans `buffer`, parses the candidates and registers them into `pool`
pub fn extract<S, P>(buffer: Bytes, scanner: &S, pool: &mut P) -> Result<Extraction>
where
    S: ScanStrategy + ?Sized,
    P: SchemaPool + ?Sized,
{
    let candidates = scanner.scan(&buffer);
    debug!("{} candidates in {} bytes", candidates.len(), buffer.len());

    let mut descriptors = DescriptorSet::from_candidates(candidates);
    let load_order = Resolver::new(&descriptors).resolve_all(&mut descriptors, pool)?;

    Ok(Extraction {
        descriptors,
        load_order,
    })
}

/// Reads a file and extracts it with the default scanner and pool
pub fn extract_file(path: impl AsRef<Path>) -> Result<Extraction> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
    extract(Bytes::from(data), &Scanner::new(), &mut ReflectPool::new())
}
