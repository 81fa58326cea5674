// src/solve/mod.rs

//! Concretization: compile the problem to a logic program, solve it,
//! decode the optimal model
//!
//! The pipeline: [`SolverSetup`] walks the package closure and emits
//! facts; [`Solver`] grounds them with the fixed base axioms, runs the
//! backend, and picks the lexicographically best model; [`SpecBuilder`]
//! replays the model tuples into concrete spec graphs. Infeasibility
//! comes back as a normal [`SolveResult`] carrying unsat-core rule text.

mod build;
mod driver;
mod program;
mod setup;

pub use build::SpecBuilder;
pub use driver::{
    AspBackend, BackendOutcome, ClingoBackend, Model, SolveResult, Solver, BASE_PROGRAM,
    DISPLAY_PROGRAM,
};
pub use program::{fun, parse_atom, AspArg, AspFunction, AspProgram, AspRule};
pub use setup::{target_ancestors, SolverSetup};

use crate::config::ConcretizerConfig;
use crate::error::Result;
use crate::repo::PackageRepository;
use crate::spec::Spec;

/// Concretize a set of abstract requests against a package repository.
///
/// This is the whole pipeline in one call: setup, solve, decode. The
/// result's `satisfiable` flag distinguishes a solved graph from an
/// infeasible request; only real failures (unknown packages, a broken
/// backend) surface as errors.
pub fn concretize(
    requests: &[Spec],
    repo: &dyn PackageRepository,
    config: &ConcretizerConfig,
    backend: &dyn AspBackend,
) -> Result<SolveResult> {
    let program = SolverSetup::new(repo, config).setup(requests)?;
    Solver::new(backend).solve(&program, repo, config)
}
