// src/lib.rs

//! Strata Concretization Engine
//!
//! Turns abstract package requests into fully-specified, mutually
//! consistent dependency graphs and records realized installs in a
//! persistent database.
//!
//! # Architecture
//!
//! - Specs: typed dependency-graph nodes (versions, variants, compiler,
//!   architecture) stored in arenas with edges as id pairs
//! - Solver: the whole problem is compiled to a ground logic program and
//!   handed to an external ASP solver; the optimal model is decoded back
//!   into concrete specs, infeasibility into unsat-core rule text
//! - Database: YAML-backed install records keyed by DAG hash, reference
//!   counted over link/run edges, protected by an advisory file lock
//! - Traversal: deterministic visitor-based DFS/BFS/topological iteration
//!   the solver setup and the database both lean on

pub mod config;
pub mod db;
mod error;
pub mod repo;
pub mod solve;
pub mod spec;
pub mod traverse;
pub mod variant;
pub mod version;

pub use config::{CompilerDecl, ConcretizerConfig, ExternalDecl, PackagePrefs};
pub use db::{Database, DirectoryLayout, InstallRecord, LockFile, QueryOptions, YamlDirectoryLayout};
pub use error::{Error, Result};
pub use repo::{MemoryRepository, PackageDef, PackageRepository};
pub use solve::{concretize, AspBackend, ClingoBackend, SolveResult, Solver, SolverSetup, SpecBuilder};
pub use spec::{ArchSpec, CompilerSpec, DepTypes, Spec, SpecGraph, SpecNode};
pub use traverse::{traverse_edges, traverse_nodes, Cover, Direction, Order, TraverseOptions};
pub use variant::{VariantDef, VariantMap, VariantSpec};
pub use version::{ClosedOpenRange, GitVersion, StandardVersion, Version, VersionList};
