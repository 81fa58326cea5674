// tests/concretize.rs

//! End-to-end concretization scenarios.
//!
//! The solver pipeline is exercised two ways: against a canned backend
//! that plays back model tuples (always runs), and against a real
//! `clingo` executable when one is installed (skipped silently
//! otherwise).

mod common;

use common::{sample_config, sample_repo};
use strata::solve::{fun, AspBackend, BackendOutcome, Model, SolverSetup};
use strata::{concretize, ClingoBackend, DepTypes, Error, Result, Spec, VariantSpec};

/// Backend returning fixed outcomes: one for the strict program, one for
/// the relaxed core-extraction program.
struct CannedBackend {
    strict: BackendOutcome,
    relaxed: BackendOutcome,
}

impl AspBackend for CannedBackend {
    fn solve(&self, program: &str, _max_models: u32) -> Result<BackendOutcome> {
        if program.contains("__rule(") {
            Ok(self.relaxed.clone())
        } else {
            Ok(self.strict.clone())
        }
    }
}

fn attr(args: Vec<&str>) -> strata::solve::AspFunction {
    fun("attr", args.into_iter().map(Into::into).collect())
}

/// The model a correct solver produces for `bar`: latest admissible foo,
/// default variant value.
fn bar_optimal_model() -> Model {
    Model {
        cost: vec![0, 0, 0],
        atoms: vec![
            fun("root", vec!["bar".into()]),
            attr(vec!["node", "bar"]),
            attr(vec!["node", "foo"]),
            attr(vec!["version", "bar", "0.9"]),
            attr(vec!["version", "foo", "2.0"]),
            attr(vec!["variant_value", "foo", "shared", "true"]),
            attr(vec!["depends_on", "bar", "foo", "link"]),
            attr(vec!["node_compiler", "bar", "gcc"]),
            attr(vec!["node_compiler_version", "bar", "gcc", "12.2.0"]),
            attr(vec!["node_compiler", "foo", "gcc"]),
            attr(vec!["node_compiler_version", "foo", "gcc", "12.2.0"]),
            attr(vec!["node_platform", "bar", "linux"]),
            attr(vec!["node_os", "bar", "ubuntu22"]),
            attr(vec!["node_target", "bar", "x86_64"]),
            attr(vec!["node_platform", "foo", "linux"]),
            attr(vec!["node_os", "foo", "ubuntu22"]),
            attr(vec!["node_target", "foo", "x86_64"]),
        ],
    }
}

#[test]
fn test_bar_concretizes_with_latest_foo() {
    let repo = sample_repo();
    let config = sample_config();
    let backend = CannedBackend {
        strict: BackendOutcome::Satisfiable(vec![bar_optimal_model()]),
        relaxed: BackendOutcome::Unsatisfiable,
    };

    let requests = vec![Spec::parse("bar").unwrap()];
    let result = concretize(&requests, &repo, &config, &backend).unwrap();
    assert!(result.satisfiable);
    assert_eq!(result.specs.len(), 1);

    let bar = &result.specs[0];
    assert!(bar.is_concrete());
    let foo_id = bar.graph().find("foo").unwrap();
    let foo = bar.graph().node(foo_id);

    // foo@1.0: admits 2.0, and 2.0 is the better (latest) choice
    assert_eq!(foo.versions.concrete().unwrap().to_string(), "2.0");
    match foo.variants.get("shared").unwrap() {
        VariantSpec::Bool(b) => assert!(b.value()),
        other => panic!("expected bool variant, got {:?}", other),
    }

    let deps = bar.graph().dependencies_of(bar.root_id());
    assert_eq!(deps.len(), 1);
    assert_eq!(bar.graph().node(deps[0].child).name, "foo");
    assert!(deps[0].types.intersects(&DepTypes::LINK));
}

#[test]
fn test_conflicting_request_yields_core() {
    let repo = sample_repo();
    let config = sample_config();

    // The relaxed solve keeps every request rule except one of the two
    // conflicting variant requests
    let repo2 = sample_repo();
    let program = SolverSetup::new(&repo2, &config)
        .setup(&[Spec::parse("baz+x+y").unwrap()])
        .unwrap();
    let kept: Vec<_> = program
        .rules()
        .iter()
        .filter(|r| !r.source_text().contains("\"x\""))
        .map(|r| fun("__rule", vec![(r.id as i64).into()]))
        .collect();

    let backend = CannedBackend {
        strict: BackendOutcome::Unsatisfiable,
        relaxed: BackendOutcome::Satisfiable(vec![Model {
            cost: vec![1],
            atoms: kept,
        }]),
    };

    let requests = vec![Spec::parse("baz+x+y").unwrap()];
    let result = concretize(&requests, &repo, &config, &backend).unwrap();
    assert!(!result.satisfiable);
    assert!(result.specs.is_empty());
    assert_eq!(result.cores.len(), 1);
    assert!(!result.cores[0].is_empty());
    // the dropped rule is the +x request
    assert!(result.cores[0]
        .iter()
        .any(|line| line.contains("requested_variant(\"baz\",\"x\",\"true\")")));
    assert!(result.core_text().contains("conflict group 1"));
}

#[test]
fn test_unknown_package_is_an_error_not_a_core() {
    let repo = sample_repo();
    let config = sample_config();
    let backend = CannedBackend {
        strict: BackendOutcome::Unsatisfiable,
        relaxed: BackendOutcome::Unsatisfiable,
    };
    let requests = vec![Spec::parse("no-such-package").unwrap()];
    let err = concretize(&requests, &repo, &config, &backend).unwrap_err();
    assert!(matches!(err, Error::PackageNotFound { .. }));
}

#[test]
fn test_program_prefers_latest_admissible_version() {
    // Solver-independent check of the emitted preference structure: any
    // correct optimizer must pick foo@2.0 for bar
    let repo = sample_repo();
    let config = sample_config();
    let program = SolverSetup::new(&repo, &config)
        .setup(&[Spec::parse("bar").unwrap()])
        .unwrap();
    let text = program.strict_text();

    assert!(text.contains("version_weight(\"foo\",\"2.0\",0)."));
    assert!(text.contains("version_weight(\"foo\",\"1.0\",1)."));
    assert!(text.contains("version_satisfies(\"foo\",\"1.0:\",\"2.0\")."));
    assert!(text.contains("variant_default_weight(\"foo\",\"shared\",\"true\",1)."));
}

#[test]
fn test_program_emission_is_reproducible() {
    let repo = sample_repo();
    let config = sample_config();
    let render = || {
        SolverSetup::new(&repo, &config)
            .setup(&[Spec::parse("mpiapp").unwrap(), Spec::parse("bar").unwrap()])
            .unwrap()
            .strict_text()
    };
    assert_eq!(render(), render());
}

// --- real-solver scenarios, skipped without a clingo executable --------

fn clingo() -> Option<ClingoBackend> {
    let backend = ClingoBackend::new();
    backend.available().then_some(backend)
}

#[test]
fn test_end_to_end_with_clingo_latest_version() {
    let Some(backend) = clingo() else { return };
    let repo = sample_repo();
    let config = sample_config();

    let requests = vec![Spec::parse("bar").unwrap()];
    let result = concretize(&requests, &repo, &config, &backend).unwrap();
    assert!(result.satisfiable, "core: {}", result.core_text());

    let bar = &result.specs[0];
    let foo_id = bar.graph().find("foo").unwrap();
    let foo = bar.graph().node(foo_id);
    assert_eq!(foo.versions.concrete().unwrap().to_string(), "2.0");
    match foo.variants.get("shared").unwrap() {
        VariantSpec::Bool(b) => assert!(b.value()),
        other => panic!("expected bool variant, got {:?}", other),
    }
}

#[test]
fn test_end_to_end_with_clingo_conflict_core() {
    let Some(backend) = clingo() else { return };
    let repo = sample_repo();
    let config = sample_config();

    let requests = vec![Spec::parse("baz+x+y").unwrap()];
    let result = concretize(&requests, &repo, &config, &backend).unwrap();
    assert!(!result.satisfiable);
    assert!(!result.cores.is_empty());
    assert!(!result.cores[0].is_empty());
}

#[test]
fn test_end_to_end_with_clingo_virtual_provider() {
    let Some(backend) = clingo() else { return };
    let repo = sample_repo();
    let config = sample_config();

    let requests = vec![Spec::parse("mpiapp").unwrap()];
    let result = concretize(&requests, &repo, &config, &backend).unwrap();
    assert!(result.satisfiable, "core: {}", result.core_text());

    let app = &result.specs[0];
    // exactly one provider was chosen, and the edge records the virtual
    let deps = app.graph().dependencies_of(app.root_id());
    assert_eq!(deps.len(), 1);
    let provider = &app.graph().node(deps[0].child).name;
    assert!(provider == "mpich" || provider == "openmpi");
    assert_eq!(deps[0].virtual_on.as_deref(), Some("mpi"));
}
