//! Topology sources: static cluster directories and the dynamic
//! resource registry.

use std::fmt;
use std::path::PathBuf;

use rangeql::Cluster;

pub mod files;
pub mod registry;

/// Where a raw cluster record came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// A declarative file under this source directory.
    Directory(PathBuf),
    /// The dynamic resource registry.
    Registry,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Directory(dir) => write!(f, "{}", dir.display()),
            Provenance::Registry => write!(f, "registry"),
        }
    }
}

/// A decoded cluster record awaiting the merge into a snapshot,
/// carrying the warnings its decoding produced.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub name: String,
    pub cluster: Cluster,
    pub provenance: Provenance,
    pub warnings: u32,
}
