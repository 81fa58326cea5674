// src/db/layout.rs

//! Directory layout: where concrete specs live on disk
//!
//! `reindex` rebuilds the database from whatever the layout can find, so
//! the layout is the source of truth after index corruption. The default
//! layout stores each install under `<root>/<name>-<version>-<hash>/`
//! with the concrete spec serialized inside the prefix.

use crate::error::{Error, Result};
use crate::spec::Spec;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File holding the canonical spec inside each install prefix.
pub const SPEC_FILE_NAME: &str = ".strata-spec.yaml";

/// Enumerates installed specs and derives install paths.
pub trait DirectoryLayout {
    /// Every concrete spec discoverable on disk.
    fn all_specs(&self) -> Result<Vec<Spec>>;

    /// The canonical install prefix for a concrete spec.
    fn path_for_spec(&self, spec: &Spec) -> PathBuf;
}

/// The default on-disk layout.
#[derive(Debug, Clone)]
pub struct YamlDirectoryLayout {
    root: PathBuf,
}

impl YamlDirectoryLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a spec into its prefix, creating the directory. This is what
    /// an installer calls once a build lands; tests use it to fabricate
    /// install trees.
    pub fn register(&self, spec: &Spec) -> Result<PathBuf> {
        let prefix = self.path_for_spec(spec);
        fs::create_dir_all(&prefix)?;
        let text = serde_yaml::to_string(spec)?;
        fs::write(prefix.join(SPEC_FILE_NAME), text)?;
        Ok(prefix)
    }
}

impl DirectoryLayout for YamlDirectoryLayout {
    fn all_specs(&self) -> Result<Vec<Spec>> {
        let mut specs = Vec::new();
        if !self.root.exists() {
            return Ok(specs);
        }
        // Prefixes live directly under the root; anything deeper belongs
        // to the installs themselves
        for entry in WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                Error::Io(std::io::Error::other(format!("walking install tree: {}", e)))
            })?;
            if entry.file_name() == SPEC_FILE_NAME {
                let text = fs::read_to_string(entry.path())?;
                let spec: Spec = serde_yaml::from_str(&text)?;
                specs.push(spec);
            }
        }
        Ok(specs)
    }

    fn path_for_spec(&self, spec: &Spec) -> PathBuf {
        let version = spec
            .root()
            .versions
            .concrete()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let hash = spec.dag_hash();
        self.root
            .join(format!("{}-{}-{}", spec.name(), version, &hash[..10]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{DepTypes, SpecNode};
    use crate::version::VersionList;
    use tempfile::TempDir;

    fn concrete_spec(name: &str, version: &str) -> Spec {
        let mut spec = Spec::new(name);
        spec.root_mut().versions = VersionList::parse(&format!("={}", version)).unwrap();
        spec.mark_concrete();
        spec
    }

    #[test]
    fn test_register_and_enumerate() {
        let dir = TempDir::new().unwrap();
        let layout = YamlDirectoryLayout::new(dir.path());

        let zlib = concrete_spec("zlib", "1.2.13");
        let cmake = concrete_spec("cmake", "3.27.0");
        layout.register(&zlib).unwrap();
        layout.register(&cmake).unwrap();

        let found = layout.all_specs().unwrap();
        assert_eq!(found.len(), 2);
        let names: Vec<&str> = found.iter().map(|s| s.name()).collect();
        assert!(names.contains(&"zlib"));
        assert!(names.contains(&"cmake"));
    }

    #[test]
    fn test_path_embeds_name_version_hash() {
        let dir = TempDir::new().unwrap();
        let layout = YamlDirectoryLayout::new(dir.path());
        let spec = concrete_spec("zlib", "1.2.13");
        let path = layout.path_for_spec(&spec);
        let dirname = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(dirname.starts_with("zlib-1.2.13-"));
        assert_eq!(layout.path_for_spec(&spec), path);
    }

    #[test]
    fn test_empty_root_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let layout = YamlDirectoryLayout::new(dir.path().join("missing"));
        assert!(layout.all_specs().unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_preserves_graph() {
        let dir = TempDir::new().unwrap();
        let layout = YamlDirectoryLayout::new(dir.path());

        let mut spec = concrete_spec("app", "1.0");
        let root = spec.root_id();
        let dep = spec
            .graph_mut()
            .add_node(SpecNode::new("zlib"))
            .unwrap();
        spec.graph_mut()
            .add_edge(root, dep, DepTypes::LINK, None);
        spec.mark_concrete();

        layout.register(&spec).unwrap();
        let found = layout.all_specs().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].dag_hash(), spec.dag_hash());
    }
}
