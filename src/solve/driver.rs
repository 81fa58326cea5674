// src/solve/driver.rs

//! Solver driver: owns the backend, selects the optimal model, extracts
//! unsatisfiable cores
//!
//! The backend boundary is deliberately narrow: program text in, stable
//! models (with cost vectors) or "unsatisfiable" out. Everything else
//! lives on this side of the boundary: joining the generated facts with
//! the fixed base and display programs, picking the lexicographically
//! best model, and re-solving a relaxed program to name the rules that
//! cannot hold together.

use crate::config::ConcretizerConfig;
use crate::error::{Error, Result};
use crate::repo::PackageRepository;
use crate::solve::build::SpecBuilder;
use crate::solve::program::{parse_atom, AspFunction, AspProgram};
use crate::spec::Spec;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Hand-authored core axioms, loaded with every solve.
pub const BASE_PROGRAM: &str = include_str!("concretize.lp");

/// Declarations of the atoms shown back to the spec builder.
pub const DISPLAY_PROGRAM: &str = include_str!("display.lp");

/// One stable model: its cost vector (most significant criterion first)
/// and shown atoms.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub cost: Vec<i64>,
    pub atoms: Vec<AspFunction>,
}

/// What a backend reports for one solve call.
#[derive(Debug, Clone)]
pub enum BackendOutcome {
    Satisfiable(Vec<Model>),
    Unsatisfiable,
}

/// The external ASP solver, reduced to its essentials.
pub trait AspBackend {
    /// Solve `program`, returning up to `max_models` models. Zero means
    /// "run until the optimum is proven", clingo's own convention.
    fn solve(&self, program: &str, max_models: u32) -> Result<BackendOutcome>;
}

/// The outcome of a concretization. Infeasibility is a normal result,
/// not an error: `satisfiable` is false and `cores` holds one or more
/// groups of rule texts that cannot hold together.
#[derive(Debug)]
pub struct SolveResult {
    pub satisfiable: bool,
    /// One concrete spec per requested root, in request order
    pub specs: Vec<Spec>,
    pub cores: Vec<Vec<String>>,
}

impl SolveResult {
    /// The grouped, human-readable core text shown for infeasibility.
    pub fn core_text(&self) -> String {
        let mut out = String::new();
        for (i, core) in self.cores.iter().enumerate() {
            out.push_str(&format!("conflict group {}:\n", i + 1));
            for rule in core {
                out.push_str(&format!("  {}\n", rule));
            }
        }
        out
    }
}

/// Drives one solve: ground, solve, pick the best model, decode.
pub struct Solver<'a> {
    backend: &'a dyn AspBackend,
    max_models: u32,
}

impl<'a> Solver<'a> {
    pub fn new(backend: &'a dyn AspBackend) -> Self {
        Self {
            backend,
            max_models: 500,
        }
    }

    pub fn with_max_models(mut self, max_models: u32) -> Self {
        self.max_models = max_models;
        self
    }

    /// Solve a compiled program and decode the result.
    pub fn solve(
        &self,
        program: &AspProgram,
        repo: &dyn PackageRepository,
        config: &ConcretizerConfig,
    ) -> Result<SolveResult> {
        let text = format!(
            "{}\n{}\n{}",
            program.strict_text(),
            BASE_PROGRAM,
            DISPLAY_PROGRAM
        );
        debug!(rules = program.rules().len(), "grounding and solving");

        match self.backend.solve(&text, self.max_models)? {
            BackendOutcome::Satisfiable(models) => {
                // Satisfiable with zero models is a fact-generation bug,
                // not a user error
                let best = models
                    .iter()
                    .min_by(|a, b| a.cost.cmp(&b.cost))
                    .ok_or(Error::NoModel)?;
                info!(
                    models = models.len(),
                    cost = ?best.cost,
                    "solve satisfiable"
                );
                let specs = SpecBuilder::new(repo, config).build(&best.atoms)?;
                Ok(SolveResult {
                    satisfiable: true,
                    specs,
                    cores: Vec::new(),
                })
            }
            BackendOutcome::Unsatisfiable => {
                info!("solve unsatisfiable, extracting core");
                Ok(SolveResult {
                    satisfiable: false,
                    specs: Vec::new(),
                    cores: self.extract_cores(program)?,
                })
            }
        }
    }

    /// Name the rules that cannot hold together: re-solve with every rule
    /// guarded by an assumable atom and as many rules on as possible. The
    /// rules the best relaxed model turns off form the reported core.
    fn extract_cores(&self, program: &AspProgram) -> Result<Vec<Vec<String>>> {
        let relaxed = format!(
            "{}\n{}\n{}",
            program.relaxed_text(),
            BASE_PROGRAM,
            DISPLAY_PROGRAM
        );
        // 0: the first model a relaxed solve finds may be suboptimal,
        // which would blame rules that are not actually in conflict
        match self.backend.solve(&relaxed, 0)? {
            BackendOutcome::Satisfiable(models) => {
                let best = match models.iter().min_by(|a, b| a.cost.cmp(&b.cost)) {
                    Some(m) => m,
                    None => return Ok(vec![vec!["(no conflicting rules found)".to_string()]]),
                };
                let enabled: BTreeSet<i64> = best
                    .atoms
                    .iter()
                    .filter(|a| a.name == "__rule")
                    .filter_map(|a| a.num_arg(0))
                    .collect();
                let core: Vec<String> = program
                    .rules()
                    .iter()
                    .filter(|r| !enabled.contains(&(r.id as i64)))
                    .map(|r| r.source_text())
                    .collect();
                if core.is_empty() {
                    // The conflict lives in the facts/base axioms alone
                    Ok(vec![vec![
                        "(package metadata is self-contradictory)".to_string(),
                    ]])
                } else {
                    Ok(vec![core])
                }
            }
            BackendOutcome::Unsatisfiable => Ok(vec![vec![
                "(package metadata is self-contradictory)".to_string(),
            ]]),
        }
    }
}

/// Backend that shells out to a `clingo` executable with JSON output.
#[derive(Debug, Clone)]
pub struct ClingoBackend {
    executable: PathBuf,
}

impl Default for ClingoBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ClingoBackend {
    pub fn new() -> Self {
        Self {
            executable: PathBuf::from("clingo"),
        }
    }

    pub fn with_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// True when the executable can be spawned. Lets callers (and tests)
    /// degrade gracefully on machines without a solver.
    pub fn available(&self) -> bool {
        Command::new(&self.executable)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl AspBackend for ClingoBackend {
    fn solve(&self, program: &str, max_models: u32) -> Result<BackendOutcome> {
        let mut child = Command::new(&self.executable)
            .arg(format!("--models={}", max_models))
            .arg("--outf=2")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::SolverBackend(format!(
                    "failed to spawn {}: {}",
                    self.executable.display(),
                    e
                ))
            })?;

        child
            .stdin
            .take()
            .ok_or_else(|| Error::SolverBackend("no stdin handle".to_string()))?
            .write_all(program.as_bytes())?;

        let output = child.wait_with_output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_clingo_json(&stdout)
    }
}

/// Decode clingo's `--outf=2` JSON document.
fn parse_clingo_json(text: &str) -> Result<BackendOutcome> {
    let doc: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::SolverBackend(format!("undecodable solver output: {}", e)))?;

    let result = doc
        .get("Result")
        .and_then(|r| r.as_str())
        .ok_or_else(|| Error::SolverBackend("solver output missing Result".to_string()))?;

    if result == "UNSATISFIABLE" {
        return Ok(BackendOutcome::Unsatisfiable);
    }

    let mut models = Vec::new();
    if let Some(calls) = doc.get("Call").and_then(|c| c.as_array()) {
        for call in calls {
            let Some(witnesses) = call.get("Witnesses").and_then(|w| w.as_array()) else {
                continue;
            };
            for witness in witnesses {
                let mut model = Model::default();
                if let Some(values) = witness.get("Value").and_then(|v| v.as_array()) {
                    for value in values {
                        if let Some(s) = value.as_str() {
                            model.atoms.push(parse_atom(s)?);
                        }
                    }
                }
                if let Some(costs) = witness.get("Costs").and_then(|c| c.as_array()) {
                    model.cost = costs.iter().filter_map(|c| c.as_i64()).collect();
                }
                models.push(model);
            }
        }
    }
    Ok(BackendOutcome::Satisfiable(models))
}
