// src/error.rs

//! Crate-wide error type
//!
//! One enum covers every failure the library surfaces. Parse and validation
//! errors are raised at construction time and carry the offending value;
//! constraint conflicts are raised at merge time and are never silently
//! resolved. Solver infeasibility is NOT an error; it is a normal
//! `SolveResult` outcome the caller inspects.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed version string
    #[error("invalid version '{0}': {1}")]
    InvalidVersion(String, String),

    /// A git ref could not be resolved to an ordering position
    #[error("cannot resolve git ref '{reference}' for package '{package}': {reason}")]
    UnresolvableGitRef {
        reference: String,
        package: String,
        reason: String,
    },

    /// Range construction with hi < lo
    #[error("invalid version range: upper bound {hi} is below lower bound {lo}")]
    InvalidVersionRange { lo: String, hi: String },

    /// Malformed spec, variant, or constraint text
    #[error("parse error: {0}")]
    Parse(String),

    /// A variant value outside the declared domain. Every offending value
    /// is reported at once, not just the first.
    #[error("invalid values for variant '{variant}' of package '{package}': {values:?} (allowed: {allowed})")]
    InvalidVariantValue {
        variant: String,
        package: String,
        values: Vec<String>,
        allowed: String,
    },

    /// More than one value supplied for a single-valued variant
    #[error("multiple values for exclusive variant '{variant}': {values:?}")]
    MultipleValuesInExclusiveVariant {
        variant: String,
        values: Vec<String>,
    },

    /// A variant definition was asked to validate a value with a different name
    #[error("validation of variant '{asked}' attempted with definition of '{definition}'")]
    InconsistentValidation { asked: String, definition: String },

    /// Two variant constraints that provably cannot coexist
    #[error("cannot constrain variant '{variant}': '{lhs}' conflicts with '{rhs}'")]
    UnsatisfiableVariantSpec {
        variant: String,
        lhs: String,
        rhs: String,
    },

    /// Plain insertion into a `VariantMap` over an existing key
    #[error("variant '{0}' already set; use substitute() to overwrite")]
    DuplicateVariant(String),

    /// Two nodes with the same package name in one spec graph
    #[error("package '{0}' occurs more than once in the dependency graph")]
    DuplicatePackage(String),

    /// Two spec constraints that provably cannot coexist
    #[error("cannot constrain spec '{lhs}' with '{rhs}': {reason}")]
    UnsatisfiableSpec {
        lhs: String,
        rhs: String,
        reason: String,
    },

    /// A package name referenced anywhere in the problem that the
    /// repository does not know and that is not a virtual name
    #[error("package '{name}' does not exist (required by '{required_by}')")]
    PackageNotFound { name: String, required_by: String },

    /// Invalid traversal configuration, caught before any traversal begins
    #[error("invalid traversal options: {0}")]
    InvalidTraversal(String),

    /// The external ASP solver could not be started or produced
    /// undecodable output
    #[error("solver backend error: {0}")]
    SolverBackend(String),

    /// The solver reported satisfiable but returned no model. This is a
    /// fact-generation bug, never a user error.
    #[error("internal solver error: satisfiable result carried no model")]
    NoModel,

    /// The on-disk index could not be parsed
    #[error("corrupt database index at {path}: {reason}")]
    CorruptDatabase { path: PathBuf, reason: String },

    /// The on-disk index was written by a newer format version
    #[error("database at {path} has format version {found}, newer than supported {expected}")]
    InvalidDatabaseVersion {
        path: PathBuf,
        found: String,
        expected: String,
    },

    /// Recorded ref counts disagree with the recorded dependency edges.
    /// Raised only after a fresh reindex, where it indicates a bookkeeping
    /// bug rather than on-disk corruption.
    #[error("ref count mismatch for {hash}: recorded {recorded}, expected {expected}")]
    RefCountMismatch {
        hash: String,
        recorded: usize,
        expected: usize,
    },

    /// Lock acquisition exceeded its timeout or attempt bound
    #[error("timed out acquiring lock on {path} after {attempts} attempts ({timeout:?})")]
    LockTimeout {
        path: PathBuf,
        attempts: usize,
        timeout: Option<Duration>,
    },

    /// Exclusive lock requested on a file this process cannot write.
    /// Distinct from a timeout because retrying can never succeed.
    #[error("cannot take exclusive lock on read-only file {0}")]
    LockReadOnlyFile(PathBuf),

    /// Write lock requested while holding only a read lock. The read
    /// transaction must finish first; upgrades are not supported.
    #[error("cannot upgrade held read lock on {0}; finish the read transaction first")]
    LockUpgrade(PathBuf),

    /// The lock file itself could not be created
    #[error("cannot create lock file {path}: {source}")]
    CantCreateLock {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
