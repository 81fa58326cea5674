// src/db/mod.rs

//! The installation database
//!
//! A YAML-backed record store mapping DAG hashes to install records, with
//! reference counting over link/run dependency edges. Every public
//! operation is a transaction: take the file lock, re-read the on-disk
//! index (another process may have written since), mutate, write back via
//! an atomic rename, release. The in-memory map is a per-process cache
//! and is never shared between processes.
//!
//! Corruption found while reading is recoverable: `reindex` rebuilds the
//! whole index from the directory layout. A ref-count mismatch found
//! right after reindexing is not recoverable, because it means the
//! bookkeeping itself is wrong, and raises instead.

mod layout;
mod lock;

pub use layout::{DirectoryLayout, YamlDirectoryLayout, SPEC_FILE_NAME};
pub use lock::LockFile;

use crate::error::{Error, Result};
use crate::repo::PackageRepository;
use crate::spec::{DepTypes, Spec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Database directory under the install root.
pub const DB_DIR_NAME: &str = ".strata-db";
pub const INDEX_FILE_NAME: &str = "index.yaml";
pub const LOCK_FILE_NAME: &str = "lock";

/// On-disk format version. Loading a newer index fails; an older one is
/// migrated by `reindex`.
pub const DB_VERSION: &str = "1.1";

/// One installation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub spec: Spec,
    pub path: String,
    pub installed: bool,
    pub ref_count: usize,
    pub explicit: bool,
}

/// The persisted index document:
/// `{database: {installs: {hash: record}, version: "..."}}`.
#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    database: IndexBody,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexBody {
    installs: BTreeMap<String, InstallRecord>,
    version: String,
}

/// Optional filters for [`Database::query`]. Every filter is independent;
/// `known` needs a repository to check names against.
#[derive(Default)]
pub struct QueryOptions<'a> {
    pub spec: Option<&'a Spec>,
    pub installed: Option<bool>,
    pub explicit: Option<bool>,
    pub known: Option<bool>,
    pub repo: Option<&'a dyn PackageRepository>,
}

/// The dependency types that participate in reference counting.
fn tracked_types() -> DepTypes {
    DepTypes::LINK.union(&DepTypes::RUN)
}

/// The lock-protected, YAML-backed installation database for one root.
pub struct Database {
    root: PathBuf,
    index_path: PathBuf,
    lock: LockFile,
    data: BTreeMap<String, InstallRecord>,
}

impl Database {
    /// Open (creating if needed) the database under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let db_dir = root.join(DB_DIR_NAME);
        fs::create_dir_all(&db_dir)?;
        let lock = LockFile::new(db_dir.join(LOCK_FILE_NAME))?;
        Ok(Self {
            index_path: db_dir.join(INDEX_FILE_NAME),
            root,
            lock,
            data: BTreeMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record a realized install. Every link/run dependency gets a record
    /// too (possibly not-yet-installed) and one ref-count increment per
    /// direct dependent edge.
    pub fn add(&mut self, spec: &Spec, path: &Path, explicit: bool) -> Result<()> {
        let spec = spec.clone();
        let path = path.to_path_buf();
        self.write_transaction(move |db| {
            db.record_add(&spec, Some(path.to_string_lossy().into_owned()), true, explicit);
            Ok(())
        })
    }

    /// Remove an install. With live dependents the record stays, marked
    /// not installed; otherwise it is deleted and its dependencies are
    /// decremented and possibly cascaded away.
    pub fn remove(&mut self, spec: &Spec) -> Result<()> {
        let hash = spec.dag_hash();
        self.write_transaction(move |db| db.record_remove(&hash))
    }

    /// Linear scan with independent filters, sorted by (name, hash) so
    /// output is stable for scripting.
    pub fn query(&mut self, options: &QueryOptions<'_>) -> Result<Vec<Spec>> {
        self.read_transaction(|db| {
            let mut out: Vec<Spec> = db
                .data
                .values()
                .filter(|record| {
                    if let Some(want) = options.installed {
                        if record.installed != want {
                            return false;
                        }
                    }
                    if let Some(want) = options.explicit {
                        if record.explicit != want {
                            return false;
                        }
                    }
                    if let Some(constraint) = options.spec {
                        if !record.spec.satisfies(constraint) {
                            return false;
                        }
                    }
                    if let (Some(want), Some(repo)) = (options.known, options.repo) {
                        let known = repo.get(record.spec.name()).is_some();
                        if known != want {
                            return false;
                        }
                    }
                    true
                })
                .map(|record| record.spec.clone())
                .collect();
            out.sort_by_key(|s| (s.name().to_string(), s.dag_hash()));
            Ok(out)
        })
    }

    /// Records that are referenced but not installed.
    pub fn missing(&mut self) -> Result<Vec<Spec>> {
        self.query(&QueryOptions {
            installed: Some(false),
            ..Default::default()
        })
    }

    /// The record for a hash, from the current in-memory view.
    pub fn get_record(&self, hash: &str) -> Option<&InstallRecord> {
        self.data.get(hash)
    }

    /// Rebuild the whole index from what the layout finds on disk.
    ///
    /// A corrupt or outdated on-disk index is swallowed (that is the
    /// self-healing path); `explicit` flags are carried over from the old
    /// data where it was readable. A ref-count mismatch after the rebuild
    /// is a bookkeeping bug and raises.
    pub fn reindex(&mut self, layout: &dyn DirectoryLayout) -> Result<()> {
        self.lock.acquire_write()?;
        let snapshot = self.data.clone();
        let result = self.reindex_body(layout);
        if result.is_err() {
            // restore the pre-transaction view
            self.data = snapshot;
        }
        let released = self.lock.release_write();
        result.and(released)
    }

    fn reindex_body(&mut self, layout: &dyn DirectoryLayout) -> Result<()> {
        let previous = match self.read_index_from_disk() {
            Ok(installs) => installs,
            Err(e @ Error::InvalidDatabaseVersion { .. }) => return Err(e),
            Err(e) => {
                warn!("discarding unreadable index during reindex: {}", e);
                BTreeMap::new()
            }
        };

        self.data.clear();
        let mut specs = layout.all_specs()?;
        specs.sort_by_key(|s| (s.name().to_string(), s.dag_hash()));
        info!(found = specs.len(), "reindexing install tree");
        for spec in specs {
            let hash = spec.dag_hash();
            let explicit = previous.get(&hash).map(|r| r.explicit).unwrap_or(false);
            let path = layout.path_for_spec(&spec).to_string_lossy().into_owned();
            self.record_add(&spec, Some(path), true, explicit);
        }

        self.check_ref_counts()?;
        self.write_index()
    }

    // --- record bookkeeping -------------------------------------------

    /// Insert or update one record. New records ensure a record for each
    /// link/run dependency first and bump its ref count once per direct
    /// edge; an existing record only has its install state refreshed.
    fn record_add(
        &mut self,
        spec: &Spec,
        path: Option<String>,
        installed: bool,
        explicit: bool,
    ) {
        let hash = spec.dag_hash();
        if let Some(record) = self.data.get_mut(&hash) {
            if installed {
                record.installed = true;
                record.explicit = record.explicit || explicit;
                if let Some(p) = path {
                    record.path = p;
                }
            }
            return;
        }

        for dep_id in spec.direct_dependencies(tracked_types()) {
            let dep_spec = spec.subspec(dep_id);
            let dep_hash = dep_spec.dag_hash();
            self.record_add(&dep_spec, None, false, false);
            if let Some(dep_record) = self.data.get_mut(&dep_hash) {
                dep_record.ref_count += 1;
            }
        }

        debug!(hash = %hash, name = spec.name(), installed, "adding install record");
        self.data.insert(
            hash,
            InstallRecord {
                spec: spec.clone(),
                path: path.unwrap_or_default(),
                installed,
                ref_count: 0,
                explicit,
            },
        );
    }

    fn record_remove(&mut self, hash: &str) -> Result<()> {
        let Some(record) = self.data.get_mut(hash) else {
            return Err(Error::CorruptDatabase {
                path: self.index_path.clone(),
                reason: format!("no record for hash {}", hash),
            });
        };
        if record.ref_count > 0 {
            // other records still depend on this one
            record.installed = false;
            debug!(hash = %hash, "keeping referenced record, marked not installed");
            return Ok(());
        }

        let record = self
            .data
            .remove(hash)
            .expect("record existence checked above");
        debug!(hash = %hash, name = record.spec.name(), "deleting install record");
        for dep_id in record.spec.direct_dependencies(tracked_types()) {
            let dep_spec = record.spec.subspec(dep_id);
            let dep_hash = dep_spec.dag_hash();
            if let Some(dep_record) = self.data.get_mut(&dep_hash) {
                dep_record.ref_count = dep_record.ref_count.saturating_sub(1);
                if dep_record.ref_count == 0 && !dep_record.installed {
                    self.record_remove(&dep_hash)?;
                }
            }
        }
        Ok(())
    }

    /// Hard integrity assertion: every ref count must equal the number of
    /// direct link/run in-edges from other records.
    fn check_ref_counts(&self) -> Result<()> {
        let mut expected: BTreeMap<String, usize> = BTreeMap::new();
        for record in self.data.values() {
            for dep_id in record.spec.direct_dependencies(tracked_types()) {
                let dep_hash = record.spec.subspec(dep_id).dag_hash();
                *expected.entry(dep_hash).or_insert(0) += 1;
            }
        }
        for (hash, record) in &self.data {
            let want = expected.get(hash).copied().unwrap_or(0);
            if record.ref_count != want {
                return Err(Error::RefCountMismatch {
                    hash: hash.clone(),
                    recorded: record.ref_count,
                    expected: want,
                });
            }
        }
        Ok(())
    }

    // --- transactions --------------------------------------------------

    fn write_transaction<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.lock.acquire_write()?;
        let result: Result<T> = (|| {
            self.read_fresh()?;
            let out = body(self)?;
            self.write_index()?;
            Ok(out)
        })();
        let released = self.lock.release_write();
        match (result, released) {
            (Ok(out), Ok(())) => Ok(out),
            (Err(e), _) => Err(e),
            (_, Err(e)) => Err(e),
        }
    }

    fn read_transaction<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.lock.acquire_read()?;
        let result: Result<T> = (|| {
            self.read_fresh()?;
            body(self)
        })();
        let released = self.lock.release_read();
        match (result, released) {
            (Ok(out), Ok(())) => Ok(out),
            (Err(e), _) => Err(e),
            (_, Err(e)) => Err(e),
        }
    }

    /// Refresh the in-memory cache from disk. Another process may have
    /// committed since our last transaction.
    fn read_fresh(&mut self) -> Result<()> {
        self.data = self.read_index_from_disk()?;
        Ok(())
    }

    fn read_index_from_disk(&self) -> Result<BTreeMap<String, InstallRecord>> {
        if !self.index_path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.index_path)?;
        let doc: IndexDocument =
            serde_yaml::from_str(&text).map_err(|e| Error::CorruptDatabase {
                path: self.index_path.clone(),
                reason: e.to_string(),
            })?;

        let found = version_key(&doc.database.version);
        let expected = version_key(DB_VERSION);
        if found > expected {
            // Forward-incompatible: written by newer code
            return Err(Error::InvalidDatabaseVersion {
                path: self.index_path.clone(),
                found: doc.database.version,
                expected: DB_VERSION.to_string(),
            });
        }
        if found < expected {
            // Migrated by a full rebuild from the layout
            return Err(Error::CorruptDatabase {
                path: self.index_path.clone(),
                reason: format!(
                    "index format {} is older than {}; reindex to migrate",
                    doc.database.version, DB_VERSION
                ),
            });
        }
        Ok(doc.database.installs)
    }

    /// Commit the index: write a host- and pid-unique temp file in the
    /// same directory, then atomically rename over the index. A crash
    /// between the two steps leaves the previous index intact.
    fn write_index(&self) -> Result<()> {
        let doc = IndexDocument {
            database: IndexBody {
                installs: self.data.clone(),
                version: DB_VERSION.to_string(),
            },
        };
        let text = serde_yaml::to_string(&doc)?;

        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let temp_path = self.index_path.with_file_name(format!(
            "{}.tmp.{}.{}",
            INDEX_FILE_NAME,
            host,
            std::process::id()
        ));
        fs::write(&temp_path, text)?;
        fs::rename(&temp_path, &self.index_path)?;
        Ok(())
    }
}

/// Numeric comparison key for dotted version strings like "1.1".
fn version_key(s: &str) -> Vec<u64> {
    s.split('.').filter_map(|p| p.parse().ok()).collect()
}
