// src/solve/setup.rs

//! Facts compiler: package metadata and requests in, logic program out
//!
//! Walks the closure of packages reachable from the requested specs and
//! emits ground facts for everything the solver may need: possible
//! versions with preference weights, variant domains and defaults,
//! numbered dependency conditions (trigger clauses separate from imposed
//! clauses), conflicts, virtual providers, externals, compilers, and
//! target compatibility. Version-range satisfaction is emitted as a
//! derived fact table, one fact per (constraint, admitted version) pair,
//! so the program stays fully ground.
//!
//! User requests are registered as *rules* rather than facts: the driver
//! makes rules assumable, which is what lets an infeasible solve name the
//! requests that cannot hold together.

use crate::config::ConcretizerConfig;
use crate::error::{Error, Result};
use crate::repo::{PackageDef, PackageRepository};
use crate::solve::program::{fun, AspArg, AspProgram};
use crate::spec::{Spec, SpecNode};
use crate::variant::{VariantDef, VariantSpec};
use crate::version::{CommitLookup, Version, VersionList};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Microarchitecture ancestry: a target, then its generic ancestors in
/// order. A compiler that recognizes any entry can produce code for the
/// target.
pub fn target_ancestors(target: &str) -> Vec<String> {
    let chain: &[&str] = match target {
        "x86_64_v4" => &["x86_64_v4", "x86_64_v3", "x86_64_v2", "x86_64"],
        "x86_64_v3" => &["x86_64_v3", "x86_64_v2", "x86_64"],
        "x86_64_v2" => &["x86_64_v2", "x86_64"],
        "neoverse_v1" => &["neoverse_v1", "armv8_2a", "aarch64"],
        "armv8_2a" => &["armv8_2a", "aarch64"],
        "power10" => &["power10", "power9", "ppc64le"],
        "power9" => &["power9", "ppc64le"],
        other => return vec![other.to_string()],
    };
    chain.iter().map(|s| s.to_string()).collect()
}

/// Compiles the concretization problem into an [`AspProgram`].
pub struct SolverSetup<'a> {
    repo: &'a dyn PackageRepository,
    config: &'a ConcretizerConfig,
    commit_lookup: Option<&'a dyn CommitLookup>,

    program: AspProgram,
    /// Next condition id, shared by dependencies, provides, and conflicts
    next_condition: usize,
    /// (package, constraint) pairs needing a derived version_satisfies table
    version_constraints: BTreeMap<(String, String), VersionList>,
    /// (compiler, constraint) pairs needing a derived table
    compiler_constraints: BTreeMap<(String, String), VersionList>,
    /// Versions mentioned literally in requests, per package
    literal_versions: BTreeMap<String, BTreeSet<String>>,
    /// Extra variant values seen in requests/config for open domains
    extra_variant_values: BTreeMap<(String, String), BTreeSet<String>>,
    /// Targets/platforms/oses mentioned anywhere
    requested_targets: BTreeSet<String>,
    requested_platforms: BTreeSet<String>,
    requested_oses: BTreeSet<String>,
}

impl<'a> SolverSetup<'a> {
    pub fn new(repo: &'a dyn PackageRepository, config: &'a ConcretizerConfig) -> Self {
        Self {
            repo,
            config,
            commit_lookup: None,
            program: AspProgram::new(),
            next_condition: 0,
            version_constraints: BTreeMap::new(),
            compiler_constraints: BTreeMap::new(),
            literal_versions: BTreeMap::new(),
            extra_variant_values: BTreeMap::new(),
            requested_targets: BTreeSet::new(),
            requested_platforms: BTreeSet::new(),
            requested_oses: BTreeSet::new(),
        }
    }

    pub fn with_commit_lookup(mut self, lookup: &'a dyn CommitLookup) -> Self {
        self.commit_lookup = Some(lookup);
        self
    }

    /// Compile the whole problem. Fails fast on any package name that is
    /// neither a real package nor a known virtual.
    pub fn setup(mut self, roots: &[Spec]) -> Result<AspProgram> {
        let (packages, virtuals) = self.possible_packages(roots)?;
        debug!(
            packages = packages.len(),
            virtuals = virtuals.len(),
            "compiling concretization facts"
        );

        // Requests and condition clauses first: they register the literal
        // versions, extra variant values, and constraint tables the
        // per-package emission below must account for
        self.emit_requests(roots)?;

        for name in &virtuals {
            self.emit_virtual(name);
        }
        for name in &packages {
            let pkg = self
                .repo
                .get(name)
                .expect("possible_packages verified existence");
            self.program
                .fact(fun("package", vec![name.as_str().into()]));
            self.emit_dependencies(pkg);
            self.emit_conflicts(pkg);
            self.emit_provides(pkg);
            self.emit_externals(pkg)?;
        }
        for name in &packages {
            let pkg = self
                .repo
                .get(name)
                .expect("possible_packages verified existence");
            self.emit_versions(pkg)?;
            for variant in &pkg.variants {
                self.emit_variant(name, variant)?;
            }
        }
        self.emit_compilers();
        self.emit_arch();
        self.emit_derived_tables(&packages);

        Ok(self.program)
    }

    /// The closure of package names reachable from the roots, split into
    /// real packages and virtual interfaces.
    fn possible_packages(
        &self,
        roots: &[Spec],
    ) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
        let mut packages = BTreeSet::new();
        let mut virtuals = BTreeSet::new();
        let mut queue: VecDeque<(String, String)> = VecDeque::new();

        for spec in roots {
            for node in spec.graph().nodes() {
                queue.push_back((node.name.clone(), "input spec".to_string()));
            }
        }

        while let Some((name, required_by)) = queue.pop_front() {
            if packages.contains(&name) || virtuals.contains(&name) {
                continue;
            }
            if self.repo.is_virtual(&name) {
                virtuals.insert(name.clone());
                for provider in self.repo.providers_of(&name) {
                    queue.push_back((provider, format!("virtual {}", name)));
                }
                continue;
            }
            let pkg = self.repo.get_or_error(&name, &required_by)?;
            packages.insert(name.clone());
            for dep in &pkg.dependencies {
                queue.push_back((dep.dependency_name().to_string(), name.clone()));
            }
        }
        Ok((packages, virtuals))
    }

    // --- requests ------------------------------------------------------

    fn emit_requests(&mut self, roots: &[Spec]) -> Result<()> {
        for spec in roots {
            let root_name = spec.name().to_string();
            self.program
                .rule(fun("root", vec![root_name.as_str().into()]), vec![]);
            self.program.rule(
                fun("attr", vec!["node".into(), root_name.as_str().into()]),
                vec![],
            );
            self.emit_node_request(spec.root())?;

            for edge in spec.graph().dependencies_of(spec.root_id()) {
                let dep = spec.graph().node(edge.child);
                self.program.rule(
                    fun(
                        "requested_depends",
                        vec![root_name.as_str().into(), dep.name.as_str().into()],
                    ),
                    vec![],
                );
                self.emit_node_request(dep)?;
            }
        }
        Ok(())
    }

    /// Requested constraints for one node, each registered as a rule.
    fn emit_node_request(&mut self, node: &SpecNode) -> Result<()> {
        let name = node.name.clone();

        if !node.versions.is_any() && !node.versions.is_empty() {
            let constraint = self.register_version_constraint(&name, &node.versions);
            self.program.rule(
                fun(
                    "requested_version",
                    vec![name.as_str().into(), constraint.into()],
                ),
                vec![],
            );
            self.note_literal_versions(&name, &node.versions)?;
        }

        for (vname, vspec) in node.variants.iter() {
            for value in vspec.value_strings() {
                self.extra_variant_values
                    .entry((name.clone(), vname.clone()))
                    .or_default()
                    .insert(value.clone());
                self.program.rule(
                    fun(
                        "requested_variant",
                        vec![name.as_str().into(), vname.as_str().into(), value.into()],
                    ),
                    vec![],
                );
            }
        }

        if let Some(compiler) = &node.compiler {
            self.program.rule(
                fun(
                    "requested_compiler",
                    vec![name.as_str().into(), compiler.name.as_str().into()],
                ),
                vec![],
            );
            if !compiler.versions.is_any() {
                let constraint =
                    self.register_compiler_constraint(&compiler.name, &compiler.versions);
                self.program.rule(
                    fun(
                        "requested_compiler_version",
                        vec![
                            name.as_str().into(),
                            compiler.name.as_str().into(),
                            constraint.into(),
                        ],
                    ),
                    vec![],
                );
            }
        }

        if let Some(platform) = &node.arch.platform {
            self.requested_platforms.insert(platform.clone());
            self.program.rule(
                fun(
                    "requested_platform",
                    vec![name.as_str().into(), platform.as_str().into()],
                ),
                vec![],
            );
        }
        if let Some(os) = &node.arch.os {
            self.requested_oses.insert(os.clone());
            self.program.rule(
                fun(
                    "requested_os",
                    vec![name.as_str().into(), os.as_str().into()],
                ),
                vec![],
            );
        }
        if let Some(target) = &node.arch.target {
            self.requested_targets.insert(target.clone());
            self.program.rule(
                fun(
                    "requested_target",
                    vec![name.as_str().into(), target.as_str().into()],
                ),
                vec![],
            );
        }
        Ok(())
    }

    // --- per-package facts --------------------------------------------

    /// Possible versions: declared, plus literals from requests and
    /// externals, weighted by the default-choice ranking.
    fn emit_versions(&mut self, pkg: &PackageDef) -> Result<()> {
        let name = &pkg.name;
        struct Candidate {
            text: String,
            position: Version,
            preferred: bool,
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut seen = BTreeSet::new();
        for declared in &pkg.versions {
            let version = self.resolved(name, &declared.version)?;
            let text = declared.version.to_string();
            if seen.insert(text.clone()) {
                candidates.push(Candidate {
                    text,
                    position: version,
                    preferred: declared.preferred,
                });
            }
        }
        if let Some(literals) = self.literal_versions.get(name).cloned() {
            for text in literals {
                if seen.insert(text.clone()) {
                    let version = self.resolved(name, &Version::parse(&text)?)?;
                    candidates.push(Candidate {
                        text,
                        position: version,
                        preferred: false,
                    });
                }
            }
        }

        // Ranking: config order, then the preferred flag, then non-develop
        // over develop, then natural order newest-first
        let config_prefs: Vec<VersionList> = self
            .config
            .prefs_for(name)
            .map(|p| {
                p.version
                    .iter()
                    .filter_map(|s| VersionList::parse(s).ok())
                    .collect()
            })
            .unwrap_or_default();
        let config_rank = |v: &Version| -> usize {
            config_prefs
                .iter()
                .position(|pref| pref.contains_version(v))
                .unwrap_or(usize::MAX)
        };
        candidates.sort_by(|a, b| {
            config_rank(&a.position)
                .cmp(&config_rank(&b.position))
                .then_with(|| b.preferred.cmp(&a.preferred))
                .then_with(|| {
                    let a_dev = a
                        .position
                        .position()
                        .map(|p| p.is_infinite())
                        .unwrap_or(false);
                    let b_dev = b
                        .position
                        .position()
                        .map(|p| p.is_infinite())
                        .unwrap_or(false);
                    a_dev.cmp(&b_dev)
                })
                .then_with(|| b.position.cmp(&a.position))
        });

        for (weight, candidate) in candidates.iter().enumerate() {
            self.program.fact(fun(
                "possible_version",
                vec![name.as_str().into(), candidate.text.as_str().into()],
            ));
            self.program.fact(fun(
                "version_weight",
                vec![
                    name.as_str().into(),
                    candidate.text.as_str().into(),
                    weight.into(),
                ],
            ));
        }
        Ok(())
    }

    /// A version with its git position resolved where a lookup is present.
    fn resolved(&self, package: &str, version: &Version) -> Result<Version> {
        if let (Version::Git(git), Some(lookup)) = (version, self.commit_lookup) {
            git.ref_version(package, lookup)?;
        }
        Ok(version.clone())
    }

    fn emit_variant(&mut self, package: &str, def: &VariantDef) -> Result<()> {
        let vname = def.name.as_str();
        self.program
            .fact(fun("variant", vec![package.into(), vname.into()]));
        let multiplicity = if def.multi {
            "variant_multi"
        } else {
            "variant_single"
        };
        self.program
            .fact(fun(multiplicity, vec![package.into(), vname.into()]));

        // Value domain: enumerated, or what requests/config mention for
        // open domains
        let mut possible: BTreeSet<String> = def
            .enumerated_values()
            .unwrap_or_default()
            .into_iter()
            .collect();
        for part in def.default.split(',') {
            possible.insert(part.trim().to_string());
        }
        if let Some(extra) = self
            .extra_variant_values
            .get(&(package.to_string(), def.name.clone()))
        {
            possible.extend(extra.iter().cloned());
        }
        let config_pref = self
            .config
            .prefs_for(package)
            .and_then(|p| p.variants.get(&def.name))
            .cloned();
        if let Some(pref) = &config_pref {
            for part in pref.split(',') {
                possible.insert(part.trim().to_string());
            }
        }

        // Validate request-supplied values eagerly; domain errors should
        // surface before any solving happens
        if let Some(extra) = self
            .extra_variant_values
            .get(&(package.to_string(), def.name.clone()))
        {
            let vspec = if def.multi {
                def.make_variant(&extra.iter().cloned().collect::<Vec<_>>().join(","))?
            } else {
                // Single-valued: each request value must be valid alone
                let mut last: Option<VariantSpec> = None;
                for value in extra {
                    last = Some(def.make_variant(value)?);
                }
                match last {
                    Some(v) => v,
                    None => def.make_default()?,
                }
            };
            def.validate_or_raise(&vspec, package)?;
        }

        for value in &possible {
            self.program.fact(fun(
                "variant_possible_value",
                vec![package.into(), vname.into(), value.as_str().into()],
            ));
        }

        // Weighted defaults: a config preference outranks the package
        // default; both beat anything else
        if let Some(pref) = &config_pref {
            for part in pref.split(',') {
                self.program.fact(fun(
                    "variant_default_weight",
                    vec![
                        package.into(),
                        vname.into(),
                        part.trim().into(),
                        AspArg::Num(0),
                    ],
                ));
            }
        }
        for part in def.default.split(',') {
            self.program.fact(fun(
                "variant_default_weight",
                vec![
                    package.into(),
                    vname.into(),
                    part.trim().into(),
                    AspArg::Num(1),
                ],
            ));
        }
        Ok(())
    }

    /// Each `depends_on` becomes one numbered condition: trigger clauses
    /// and imposed clauses in separate fact groups, linked by the id.
    fn emit_dependencies(&mut self, pkg: &PackageDef) {
        let parent = pkg.name.clone();
        for dep in &pkg.dependencies {
            let id = self.fresh_condition();
            let dep_name = dep.dependency_name().to_string();
            self.program.fact(fun(
                "dependency_condition",
                vec![id.into(), parent.as_str().into(), dep_name.as_str().into()],
            ));
            for type_name in dep.types.names() {
                self.program.fact(fun(
                    "dependency_type",
                    vec![id.into(), type_name.into()],
                ));
            }
            if let Some(when) = &dep.when {
                self.emit_requirement_clauses(id, &parent, when);
            }
            self.emit_imposition_clauses(id, &dep_name, &dep.constraint);
        }
    }

    fn emit_conflicts(&mut self, pkg: &PackageDef) {
        let name = pkg.name.clone();
        for conflict in &pkg.conflicts {
            let trigger_id = self.fresh_condition();
            let constraint_id = self.fresh_condition();
            self.program.fact(fun(
                "conflict",
                vec![name.as_str().into(), trigger_id.into(), constraint_id.into()],
            ));
            match &conflict.when {
                Some(when) => self.emit_requirement_clauses(trigger_id, &name, when),
                // No trigger clauses: the condition always holds
                None => {}
            }
            self.emit_requirement_clauses(constraint_id, &name, &conflict.constraint);
        }
    }

    fn emit_provides(&mut self, pkg: &PackageDef) {
        let name = pkg.name.clone();
        for provide in &pkg.provides {
            match &provide.when {
                None => self.program.fact(fun(
                    "possible_provider",
                    vec![
                        provide.virtual_name.as_str().into(),
                        name.as_str().into(),
                    ],
                )),
                Some(when) => {
                    let id = self.fresh_condition();
                    self.program.fact(fun(
                        "provider_condition",
                        vec![
                            id.into(),
                            name.as_str().into(),
                            provide.virtual_name.as_str().into(),
                        ],
                    ));
                    self.emit_requirement_clauses(id, &name, when);
                }
            }
        }
    }

    fn emit_virtual(&mut self, virtual_name: &str) {
        self.program
            .fact(fun("virtual", vec![virtual_name.into()]));
        // Provider order gives the tie-breaking weight
        for (weight, provider) in self.repo.providers_of(virtual_name).iter().enumerate() {
            self.program.fact(fun(
                "provider_weight",
                vec![
                    virtual_name.into(),
                    provider.as_str().into(),
                    weight.into(),
                ],
            ));
        }
        // Exactly one provider per required virtual: raw ground logic,
        // richer than the rule builder models
        self.program.one_of(
            &format!(
                "provider(\"{v}\",P) : possible_provider(\"{v}\",P)",
                v = virtual_name
            ),
            &format!("virtual_required(\"{}\")", virtual_name),
        );
    }

    /// Externals from configuration become alternative realizations: an
    /// `external(P, I)` atom is equivalent to the conjunction of the
    /// external's concrete attributes. Earlier entries weigh less.
    fn emit_externals(&mut self, pkg: &PackageDef) -> Result<()> {
        let name = pkg.name.clone();
        let externals = self.config.externals_for(&name).to_vec();
        for (index, decl) in externals.iter().enumerate() {
            let node = SpecNode::parse(&decl.spec)?;
            if node.name != name {
                return Err(Error::Config(format!(
                    "external spec '{}' listed under package '{}'",
                    decl.spec, name
                )));
            }
            let version = match node.versions.concrete() {
                Some(v) => v.to_string(),
                None => {
                    return Err(Error::Config(format!(
                        "external spec '{}' must pin an exact version",
                        decl.spec
                    )))
                }
            };
            self.literal_versions
                .entry(name.clone())
                .or_default()
                .insert(version.clone());

            self.program.fact(fun(
                "external_weight",
                vec![name.as_str().into(), index.into(), index.into()],
            ));

            // The iff between the chosen-external atom and its attributes
            let mut clauses =
                vec![format!("attr(\"version\",\"{}\",\"{}\")", name, version)];
            for (vname, vspec) in node.variants.iter() {
                for value in vspec.value_strings() {
                    clauses.push(format!(
                        "attr(\"variant_value\",\"{}\",\"{}\",\"{}\")",
                        name, vname, value
                    ));
                }
            }
            for clause in &clauses {
                self.program
                    .raw(format!("{} :- external(\"{}\",{}).", clause, name, index));
            }
            self.program.raw(format!(
                "external(\"{}\",{}) :- attr(\"node\",\"{}\"), {}.",
                name,
                index,
                name,
                clauses.join(", ")
            ));
            self.program.raw(format!(
                "{{ external(\"{}\",{}) }} :- attr(\"node\",\"{}\").",
                name, index, name
            ));
        }

        if !self.config.is_buildable(&name) {
            // Only an external realization is admissible
            self.program.raw(format!(
                ":- attr(\"node\",\"{n}\"), #count {{ I : external(\"{n}\",I) }} = 0.",
                n = name
            ));
        }
        Ok(())
    }

    fn emit_compilers(&mut self) {
        for (weight, compiler) in self.config.compilers.iter().enumerate() {
            self.program.fact(fun(
                "compiler",
                vec![
                    compiler.name.as_str().into(),
                    compiler.version.as_str().into(),
                ],
            ));
            self.program.fact(fun(
                "compiler_weight",
                vec![
                    compiler.name.as_str().into(),
                    compiler.version.as_str().into(),
                    weight.into(),
                ],
            ));
        }
    }

    fn emit_arch(&mut self) {
        // Platforms and operating systems: the default plus anything a
        // request mentioned; unranked entries still get a total order
        let default_platform = self.config.arch.platform.clone();
        let mut platforms = vec![default_platform.clone()];
        platforms.extend(
            self.requested_platforms
                .iter()
                .filter(|p| **p != default_platform)
                .cloned(),
        );
        for (weight, platform) in platforms.iter().enumerate() {
            self.program
                .fact(fun("platform", vec![platform.as_str().into()]));
            self.program.fact(fun(
                "platform_weight",
                vec![platform.as_str().into(), weight.into()],
            ));
        }

        let default_os = self.config.arch.os.clone();
        let mut oses = vec![default_os.clone()];
        oses.extend(
            self.requested_oses
                .iter()
                .filter(|o| **o != default_os)
                .cloned(),
        );
        for (weight, os) in oses.iter().enumerate() {
            self.program.fact(fun("opsys", vec![os.as_str().into()]));
            self.program
                .fact(fun("os_weight", vec![os.as_str().into(), weight.into()]));
        }

        // Targets: the default target, its generic ancestors (less
        // specific is a worse choice), then requested extras
        let default_target = self.config.arch.target.clone();
        let mut targets = target_ancestors(&default_target);
        for t in &self.requested_targets {
            if !targets.contains(t) {
                targets.push(t.clone());
            }
        }
        for (weight, target) in targets.iter().enumerate() {
            self.program
                .fact(fun("target", vec![target.as_str().into()]));
            self.program.fact(fun(
                "target_weight",
                vec![target.as_str().into(), weight.into()],
            ));
        }
        for compiler in &self.config.compilers {
            for target in &targets {
                let compatible = compiler.supported_targets.is_empty()
                    || target_ancestors(target)
                        .iter()
                        .any(|t| compiler.supported_targets.contains(t));
                if compatible {
                    self.program.fact(fun(
                        "compiler_supports_target",
                        vec![
                            compiler.name.as_str().into(),
                            compiler.version.as_str().into(),
                            target.as_str().into(),
                        ],
                    ));
                }
            }
        }
    }

    // --- clause encoding ----------------------------------------------

    /// Trigger clauses: the condition holds only when every clause is met
    /// by the named package's assignment.
    fn emit_requirement_clauses(&mut self, id: usize, subject: &str, node: &SpecNode) {
        let subject = if node.name.is_empty() {
            subject.to_string()
        } else {
            node.name.clone()
        };
        for clause in self.constraint_clauses(&subject, node) {
            let (kind, a, b) = clause;
            self.program.fact(fun(
                "condition_requirement",
                vec![
                    id.into(),
                    kind.into(),
                    subject.as_str().into(),
                    a.into(),
                    b.into(),
                ],
            ));
        }
    }

    /// Imposed clauses: what the condition forces once it holds.
    fn emit_imposition_clauses(&mut self, id: usize, subject: &str, node: &SpecNode) {
        for clause in self.constraint_clauses(subject, node) {
            let (kind, a, b) = clause;
            self.program.fact(fun(
                "condition_imposition",
                vec![
                    id.into(),
                    kind.into(),
                    subject.into(),
                    a.into(),
                    b.into(),
                ],
            ));
        }
    }

    /// Decompose one node constraint into generic `(kind, arg, arg)`
    /// clauses; version and compiler constraints are registered for the
    /// derived satisfaction tables.
    fn constraint_clauses(
        &mut self,
        subject: &str,
        node: &SpecNode,
    ) -> Vec<(String, String, String)> {
        let mut out = Vec::new();
        if !node.versions.is_any() && !node.versions.is_empty() {
            let constraint = self.register_version_constraint(subject, &node.versions);
            out.push(("version_satisfies".to_string(), constraint, String::new()));
        }
        for (vname, vspec) in node.variants.iter() {
            for value in vspec.value_strings() {
                self.extra_variant_values
                    .entry((subject.to_string(), vname.clone()))
                    .or_default()
                    .insert(value.clone());
                out.push(("variant_value".to_string(), vname.clone(), value));
            }
        }
        if let Some(compiler) = &node.compiler {
            out.push((
                "node_compiler".to_string(),
                compiler.name.clone(),
                String::new(),
            ));
            if !compiler.versions.is_any() {
                let constraint =
                    self.register_compiler_constraint(&compiler.name, &compiler.versions);
                out.push((
                    "compiler_version_satisfies".to_string(),
                    compiler.name.clone(),
                    constraint,
                ));
            }
        }
        if let Some(platform) = &node.arch.platform {
            self.requested_platforms.insert(platform.clone());
            out.push(("node_platform".to_string(), platform.clone(), String::new()));
        }
        if let Some(os) = &node.arch.os {
            self.requested_oses.insert(os.clone());
            out.push(("node_os".to_string(), os.clone(), String::new()));
        }
        if let Some(target) = &node.arch.target {
            self.requested_targets.insert(target.clone());
            out.push(("node_target".to_string(), target.clone(), String::new()));
        }
        out
    }

    fn fresh_condition(&mut self) -> usize {
        let id = self.next_condition;
        self.next_condition += 1;
        self.program.fact(fun("condition", vec![id.into()]));
        id
    }

    fn register_version_constraint(&mut self, package: &str, list: &VersionList) -> String {
        let text = list.to_string();
        self.version_constraints
            .insert((package.to_string(), text.clone()), list.clone());
        text
    }

    fn register_compiler_constraint(&mut self, compiler: &str, list: &VersionList) -> String {
        let text = list.to_string();
        self.compiler_constraints
            .insert((compiler.to_string(), text.clone()), list.clone());
        text
    }

    fn note_literal_versions(&mut self, package: &str, list: &VersionList) -> Result<()> {
        for entry in list.entries() {
            if let crate::version::VersionListEntry::Version(v) = entry {
                self.literal_versions
                    .entry(package.to_string())
                    .or_default()
                    .insert(v.to_string());
            }
        }
        Ok(())
    }

    /// The derived fact tables: one `version_satisfies` fact per
    /// (constraint, admitted version) pair, computed here instead of
    /// symbolically in the solver.
    fn emit_derived_tables(&mut self, packages: &BTreeSet<String>) {
        let version_constraints = std::mem::take(&mut self.version_constraints);
        for ((package, text), list) in &version_constraints {
            // A constraint on a virtual applies to whichever provider is
            // chosen, so the table covers every provider's versions
            let subjects: Vec<String> = if packages.contains(package) {
                vec![package.clone()]
            } else {
                self.repo.providers_of(package)
            };
            for subject in subjects {
                for candidate in self.known_versions_of(&subject) {
                    if let Ok(v) = Version::parse(&candidate) {
                        if list.contains_version(&v) {
                            self.program.fact(fun(
                                "version_satisfies",
                                vec![
                                    subject.as_str().into(),
                                    text.as_str().into(),
                                    candidate.as_str().into(),
                                ],
                            ));
                        }
                    }
                }
            }
        }

        let compiler_constraints = std::mem::take(&mut self.compiler_constraints);
        for ((compiler, text), list) in &compiler_constraints {
            for decl in &self.config.compilers {
                if decl.name != *compiler {
                    continue;
                }
                if let Ok(v) = Version::parse(&decl.version) {
                    if list.contains_version(&v) {
                        self.program.fact(fun(
                            "compiler_version_satisfies",
                            vec![
                                compiler.as_str().into(),
                                text.as_str().into(),
                                decl.version.as_str().into(),
                            ],
                        ));
                    }
                }
            }
        }
    }

    /// Every version the program declares possible for a package.
    fn known_versions_of(&self, package: &str) -> Vec<String> {
        let mut out: BTreeSet<String> = BTreeSet::new();
        if let Some(pkg) = self.repo.get(package) {
            for declared in &pkg.versions {
                out.insert(declared.version.to_string());
            }
        }
        if let Some(literals) = self.literal_versions.get(package) {
            out.extend(literals.iter().cloned());
        }
        out.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompilerDecl, ExternalDecl, PackagePrefs};
    use crate::repo::MemoryRepository;
    use crate::repo::PackageDef;
    use crate::spec::DepTypes;
    use crate::variant::VariantDef;

    fn simple_repo() -> MemoryRepository {
        MemoryRepository::new()
            .with(
                PackageDef::new("foo")
                    .with_version("1.0")
                    .with_version("2.0")
                    .with_variant(VariantDef::bool("shared", true)),
            )
            .with(
                PackageDef::new("bar")
                    .with_version("0.5")
                    .depends_on_typed("foo@1.0:", DepTypes::LINK),
            )
    }

    fn default_config() -> ConcretizerConfig {
        ConcretizerConfig {
            compilers: vec![CompilerDecl::new("gcc", "12.2.0")],
            ..Default::default()
        }
    }

    fn program_for(request: &str) -> String {
        let repo = simple_repo();
        let config = default_config();
        let roots = vec![Spec::parse(request).unwrap()];
        SolverSetup::new(&repo, &config)
            .setup(&roots)
            .unwrap()
            .strict_text()
    }

    #[test]
    fn test_versions_weighted_newest_first() {
        let text = program_for("bar");
        assert!(text.contains("possible_version(\"foo\",\"1.0\")."));
        assert!(text.contains("possible_version(\"foo\",\"2.0\")."));
        assert!(text.contains("version_weight(\"foo\",\"2.0\",0)."));
        assert!(text.contains("version_weight(\"foo\",\"1.0\",1)."));
    }

    #[test]
    fn test_version_satisfies_table_is_derived() {
        let text = program_for("bar");
        // bar's dependency constraint foo@1.0: admits both versions
        assert!(text.contains("version_satisfies(\"foo\",\"1.0:\",\"1.0\")."));
        assert!(text.contains("version_satisfies(\"foo\",\"1.0:\",\"2.0\")."));
    }

    #[test]
    fn test_variant_facts() {
        let text = program_for("bar");
        assert!(text.contains("variant(\"foo\",\"shared\")."));
        assert!(text.contains("variant_single(\"foo\",\"shared\")."));
        assert!(text.contains("variant_possible_value(\"foo\",\"shared\",\"true\")."));
        assert!(text.contains("variant_possible_value(\"foo\",\"shared\",\"false\")."));
        assert!(text.contains("variant_default_weight(\"foo\",\"shared\",\"true\",1)."));
    }

    #[test]
    fn test_dependency_condition_decomposition() {
        let text = program_for("bar");
        assert!(text.contains("dependency_condition(0,\"bar\",\"foo\")."));
        assert!(text.contains("dependency_type(0,\"link\")."));
        assert!(text
            .contains("condition_imposition(0,\"version_satisfies\",\"foo\",\"1.0:\",\"\")."));
    }

    #[test]
    fn test_requests_become_rules() {
        let repo = simple_repo();
        let config = default_config();
        let roots = vec![Spec::parse("foo@2.0 +shared").unwrap()];
        let program = SolverSetup::new(&repo, &config).setup(&roots).unwrap();
        let rule_texts: Vec<String> = program
            .rules()
            .iter()
            .map(|r| r.source_text())
            .collect();
        assert!(rule_texts.iter().any(|t| t.contains("root(\"foo\")")));
        assert!(rule_texts
            .iter()
            .any(|t| t.contains("requested_version(\"foo\",\"2.0\")")));
        assert!(rule_texts
            .iter()
            .any(|t| t.contains("requested_variant(\"foo\",\"shared\",\"true\")")));
    }

    #[test]
    fn test_unknown_package_fails_fast() {
        let repo = simple_repo();
        let config = default_config();
        let roots = vec![Spec::parse("nosuchpkg").unwrap()];
        let err = SolverSetup::new(&repo, &config).setup(&roots).unwrap_err();
        assert!(matches!(err, Error::PackageNotFound { .. }));
    }

    #[test]
    fn test_unknown_transitive_dependency_fails_fast() {
        let repo = MemoryRepository::new().with(
            PackageDef::new("toplevel")
                .with_version("1.0")
                .depends_on("missing-dep"),
        );
        let config = default_config();
        let roots = vec![Spec::parse("toplevel").unwrap()];
        let err = SolverSetup::new(&repo, &config).setup(&roots).unwrap_err();
        match err {
            Error::PackageNotFound { name, required_by } => {
                assert_eq!(name, "missing-dep");
                assert_eq!(required_by, "toplevel");
            }
            other => panic!("expected PackageNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_virtual_providers_and_choice_rule() {
        let repo = MemoryRepository::new()
            .with(PackageDef::new("mpich").with_version("4.1").provides("mpi"))
            .with(
                PackageDef::new("openmpi")
                    .with_version("4.1.5")
                    .provides("mpi"),
            )
            .with(
                PackageDef::new("app")
                    .with_version("1.0")
                    .depends_on("mpi"),
            );
        let config = default_config();
        let roots = vec![Spec::parse("app").unwrap()];
        let text = SolverSetup::new(&repo, &config)
            .setup(&roots)
            .unwrap()
            .strict_text();
        assert!(text.contains("virtual(\"mpi\")."));
        assert!(text.contains("possible_provider(\"mpi\",\"mpich\")."));
        assert!(text.contains("provider_weight(\"mpi\",\"mpich\",0)."));
        assert!(text.contains("provider_weight(\"mpi\",\"openmpi\",1)."));
        assert!(text.contains(
            "1 { provider(\"mpi\",P) : possible_provider(\"mpi\",P) } 1 :- virtual_required(\"mpi\")."
        ));
    }

    #[test]
    fn test_version_constraint_on_virtual_covers_providers() {
        let repo = MemoryRepository::new()
            .with(PackageDef::new("mpich").with_version("4.1").provides("mpi"))
            .with(
                PackageDef::new("openmpi")
                    .with_version("3.1.6")
                    .with_version("4.1.5")
                    .provides("mpi"),
            )
            .with(
                PackageDef::new("app")
                    .with_version("1.0")
                    .depends_on("mpi@4:"),
            );
        let config = default_config();
        let roots = vec![Spec::parse("app").unwrap()];
        let text = SolverSetup::new(&repo, &config)
            .setup(&roots)
            .unwrap()
            .strict_text();
        // the constraint registered under the virtual is satisfiable by
        // either provider's admissible versions, and only those
        assert!(text.contains("version_satisfies(\"mpich\",\"4:\",\"4.1\")."));
        assert!(text.contains("version_satisfies(\"openmpi\",\"4:\",\"4.1.5\")."));
        assert!(!text.contains("version_satisfies(\"openmpi\",\"4:\",\"3.1.6\")."));
    }

    #[test]
    fn test_conflict_clause_groups() {
        let repo = MemoryRepository::new().with(
            PackageDef::new("baz")
                .with_version("1.0")
                .with_variant(VariantDef::bool("x", false))
                .with_variant(VariantDef::bool("y", false))
                .conflicts_with("+x", Some("+y")),
        );
        let config = default_config();
        let roots = vec![Spec::parse("baz").unwrap()];
        let text = SolverSetup::new(&repo, &config)
            .setup(&roots)
            .unwrap()
            .strict_text();
        assert!(text.contains("conflict(\"baz\",0,1)."));
        assert!(
            text.contains("condition_requirement(0,\"variant_value\",\"baz\",\"y\",\"true\").")
        );
        assert!(
            text.contains("condition_requirement(1,\"variant_value\",\"baz\",\"x\",\"true\").")
        );
    }

    #[test]
    fn test_externals_emit_iff_and_weight() {
        let repo = MemoryRepository::new().with(PackageDef::new("openssl").with_version("3.0.2"));
        let mut config = default_config();
        config.packages.insert(
            "openssl".to_string(),
            PackagePrefs {
                buildable: false,
                externals: vec![ExternalDecl {
                    spec: "openssl@=3.0.2".to_string(),
                    prefix: "/usr".to_string(),
                    modules: vec![],
                    extra_attributes: Default::default(),
                }],
                ..Default::default()
            },
        );
        let roots = vec![Spec::parse("openssl").unwrap()];
        let text = SolverSetup::new(&repo, &config)
            .setup(&roots)
            .unwrap()
            .strict_text();
        assert!(text.contains("external_weight(\"openssl\",0,0)."));
        assert!(text.contains(
            "attr(\"version\",\"openssl\",\"3.0.2\") :- external(\"openssl\",0)."
        ));
        assert!(text.contains("{ external(\"openssl\",0) } :- attr(\"node\",\"openssl\")."));
        // not buildable: a node with no external is inadmissible
        assert!(text.contains(
            ":- attr(\"node\",\"openssl\"), #count { I : external(\"openssl\",I) } = 0."
        ));
    }

    #[test]
    fn test_target_compatibility_via_ancestry() {
        let repo = simple_repo();
        let mut config = default_config();
        config.arch.target = "x86_64_v3".to_string();
        config.compilers = vec![CompilerDecl::new("gcc", "12.2.0").with_targets(&["x86_64"])];
        let roots = vec![Spec::parse("foo").unwrap()];
        let text = SolverSetup::new(&repo, &config)
            .setup(&roots)
            .unwrap()
            .strict_text();
        // v3 is supported through its x86_64 ancestor
        assert!(text.contains("compiler_supports_target(\"gcc\",\"12.2.0\",\"x86_64_v3\")."));
        assert!(text.contains("target_weight(\"x86_64_v3\",0)."));
        assert!(text.contains("target_weight(\"x86_64\",2)."));
    }

    #[test]
    fn test_config_version_preference_outranks_latest() {
        let repo = simple_repo();
        let mut config = default_config();
        config.packages.insert(
            "foo".to_string(),
            PackagePrefs {
                version: vec!["1.0".to_string()],
                ..Default::default()
            },
        );
        let roots = vec![Spec::parse("bar").unwrap()];
        let text = SolverSetup::new(&repo, &config)
            .setup(&roots)
            .unwrap()
            .strict_text();
        assert!(text.contains("version_weight(\"foo\",\"1.0\",0)."));
        assert!(text.contains("version_weight(\"foo\",\"2.0\",1)."));
    }

    #[test]
    fn test_emission_is_deterministic() {
        let a = program_for("bar +shared");
        let b = program_for("bar +shared");
        assert_eq!(a, b);
    }
}
