// src/solve/build.rs

//! Spec builder: replay solver tuples into concrete spec graphs
//!
//! The model comes back as a flat list of `attr(...)` tuples. They are
//! replayed as small mutations against a table of in-progress nodes, in a
//! fixed priority order: `node` establishes identity first, `node_compiler`
//! second, everything else in emission order. Tuples naming an action this
//! builder does not know are logged and skipped, so a newer solver
//! vocabulary cannot crash an older builder. Nodes are marked concrete
//! only after the whole graph is consistent.

use crate::config::ConcretizerConfig;
use crate::error::{Error, Result};
use crate::repo::PackageRepository;
use crate::solve::program::AspFunction;
use crate::spec::{
    CompilerSpec, DepTypes, ExternalAttrs, Spec, SpecGraph, SpecNode,
};
use crate::traverse::{traverse_nodes, Direction, Order, TraverseOptions};
use crate::variant::{
    BoolValuedVariant, MultiValuedVariant, SingleValuedVariant, VariantSpec,
};
use crate::version::{Version, VersionList, VersionListEntry};
use std::collections::BTreeMap;
use tracing::debug;

/// The closed set of tuple kinds this builder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Node,
    Version,
    VariantValue,
    NodeCompiler,
    NodeCompilerVersion,
    NodePlatform,
    NodeOs,
    NodeTarget,
    DependsOn,
    VirtualOnEdge,
    CompilerFlag,
}

impl Action {
    fn from_name(name: &str) -> Option<Action> {
        Some(match name {
            "node" => Action::Node,
            "version" => Action::Version,
            "variant_value" => Action::VariantValue,
            "node_compiler" => Action::NodeCompiler,
            "node_compiler_version" => Action::NodeCompilerVersion,
            "node_platform" => Action::NodePlatform,
            "node_os" => Action::NodeOs,
            "node_target" => Action::NodeTarget,
            "depends_on" => Action::DependsOn,
            "virtual_on_edge" => Action::VirtualOnEdge,
            "compiler_flag" => Action::CompilerFlag,
            _ => return None,
        })
    }

    /// Replay priority: identity first, compiler second, the rest in
    /// emission order.
    fn priority(self) -> u8 {
        match self {
            Action::Node => 0,
            Action::NodeCompiler => 1,
            _ => 2,
        }
    }
}

/// Rebuilds concrete specs from the flat tuple model.
pub struct SpecBuilder<'a> {
    repo: &'a dyn PackageRepository,
    config: &'a ConcretizerConfig,
}

impl<'a> SpecBuilder<'a> {
    pub fn new(repo: &'a dyn PackageRepository, config: &'a ConcretizerConfig) -> Self {
        Self { repo, config }
    }

    /// Decode one model into the concrete specs of its roots.
    pub fn build(&self, atoms: &[AspFunction]) -> Result<Vec<Spec>> {
        let mut roots: Vec<String> = Vec::new();
        let mut externals: Vec<(String, usize)> = Vec::new();
        let mut actions: Vec<(u8, usize, Action, &AspFunction)> = Vec::new();

        for (index, atom) in atoms.iter().enumerate() {
            match atom.name.as_str() {
                "root" => {
                    if let Some(name) = atom.str_arg(0) {
                        roots.push(name.to_string());
                    }
                }
                "external" => {
                    if let (Some(p), Some(i)) = (atom.str_arg(0), atom.num_arg(1)) {
                        externals.push((p.to_string(), i as usize));
                    }
                }
                "attr" => {
                    let Some(kind) = atom.str_arg(0) else { continue };
                    match Action::from_name(kind) {
                        Some(action) => {
                            actions.push((action.priority(), index, action, atom))
                        }
                        None => {
                            // Unknown solver vocabulary: skip, never crash
                            debug!(action = kind, "ignoring unknown model tuple");
                        }
                    }
                }
                // provider/2 is informational; virtual_on_edge carries the
                // graph-relevant part
                _ => {}
            }
        }

        // Stable sort: priority, then original emission order
        actions.sort_by_key(|(priority, index, _, _)| (*priority, *index));

        let mut nodes: BTreeMap<String, SpecNode> = BTreeMap::new();
        let mut edges: Vec<(String, String, DepTypes)> = Vec::new();
        let mut edge_virtuals: BTreeMap<(String, String), String> = BTreeMap::new();

        for (_, _, action, atom) in &actions {
            self.apply(*action, atom, &mut nodes, &mut edges, &mut edge_virtuals)?;
        }

        // Externals: attach path/modules/extra attributes from config
        for (package, index) in externals {
            let decls = self.config.externals_for(&package);
            let decl = decls.get(index).ok_or_else(|| {
                Error::Config(format!(
                    "model chose external {} #{} which is not configured",
                    package, index
                ))
            })?;
            if let Some(node) = nodes.get_mut(&package) {
                node.external = Some(ExternalAttrs {
                    path: decl.prefix.clone(),
                    modules: decl.modules.clone(),
                    extra_attributes: decl.extra_attributes.clone(),
                });
            }
        }

        // Assemble the shared graph
        let mut graph = SpecGraph::new();
        let mut ids = BTreeMap::new();
        for (name, node) in nodes {
            let id = graph.add_node(node)?;
            ids.insert(name, id);
        }
        for (parent, child, types) in edges {
            let (Some(&p), Some(&c)) = (ids.get(&parent), ids.get(&child)) else {
                return Err(Error::SolverBackend(format!(
                    "model has edge {} -> {} without both nodes",
                    parent, child
                )));
            };
            let virtual_on = edge_virtuals.get(&(parent, child)).cloned();
            graph.add_edge(p, c, types, virtual_on);
        }

        self.reconcile_compiler_flags(&mut graph)?;

        // Only now is the graph consistent enough to lock in
        for id in 0..graph.len() {
            graph.node_mut(id).concrete = true;
        }

        let mut specs = Vec::new();
        for root in roots {
            let id = graph.find(&root).ok_or_else(|| {
                Error::SolverBackend(format!("model names root '{}' but no node", root))
            })?;
            let whole = Spec::from_graph(graph.clone(), id);
            specs.push(whole.subspec(id));
        }
        Ok(specs)
    }

    fn apply(
        &self,
        action: Action,
        atom: &AspFunction,
        nodes: &mut BTreeMap<String, SpecNode>,
        edges: &mut Vec<(String, String, DepTypes)>,
        edge_virtuals: &mut BTreeMap<(String, String), String>,
    ) -> Result<()> {
        let package = atom
            .str_arg(1)
            .ok_or_else(|| {
                Error::SolverBackend(format!("tuple {} lacks a package argument", atom))
            })?
            .to_string();

        match action {
            Action::Node => {
                nodes.entry(package.clone()).or_insert_with(|| {
                    let mut node = SpecNode::new(&package);
                    node.versions = VersionList::new();
                    node
                });
            }
            Action::Version => {
                let version = Version::parse(self.arg(atom, 2)?)?;
                let node = self.node_mut(nodes, &package)?;
                node.versions =
                    VersionList::from_entries([VersionListEntry::Version(version)]);
            }
            Action::VariantValue => {
                let vname = self.arg(atom, 2)?.to_string();
                let value = self.arg(atom, 3)?.to_string();
                let vspec = self.typed_variant(&package, &vname, &value);
                let node = self.node_mut(nodes, &package)?;
                match node.variants.get(&vname) {
                    Some(existing) => {
                        // Multi-valued variants accumulate values
                        let mut merged = existing.clone();
                        merged.constrain(&vspec)?;
                        node.variants.substitute(merged);
                    }
                    None => node.variants.substitute(vspec),
                }
            }
            Action::NodeCompiler => {
                let name = self.arg(atom, 2)?.to_string();
                self.node_mut(nodes, &package)?.compiler =
                    Some(CompilerSpec::any_version(name));
            }
            Action::NodeCompilerVersion => {
                let name = self.arg(atom, 2)?.to_string();
                let version = Version::parse(self.arg(atom, 3)?)?;
                self.node_mut(nodes, &package)?.compiler = Some(CompilerSpec::new(
                    name,
                    VersionList::from_entries([VersionListEntry::Version(version)]),
                ));
            }
            Action::NodePlatform => {
                let value = self.arg(atom, 2)?.to_string();
                self.node_mut(nodes, &package)?.arch.platform = Some(value);
            }
            Action::NodeOs => {
                let value = self.arg(atom, 2)?.to_string();
                self.node_mut(nodes, &package)?.arch.os = Some(value);
            }
            Action::NodeTarget => {
                let value = self.arg(atom, 2)?.to_string();
                self.node_mut(nodes, &package)?.arch.target = Some(value);
            }
            Action::DependsOn => {
                let child = self.arg(atom, 2)?.to_string();
                let type_name = self.arg(atom, 3)?;
                let types = DepTypes::from_names(&[type_name])?;
                edges.push((package, child, types));
            }
            Action::VirtualOnEdge => {
                let child = self.arg(atom, 2)?.to_string();
                let virtual_name = self.arg(atom, 3)?.to_string();
                edge_virtuals.insert((package, child), virtual_name);
            }
            Action::CompilerFlag => {
                let flag_name = self.arg(atom, 2)?.to_string();
                let flag = self.arg(atom, 3)?.to_string();
                self.node_mut(nodes, &package)?
                    .compiler_flags
                    .entry(flag_name)
                    .or_default()
                    .push(flag);
            }
        }
        Ok(())
    }

    fn arg<'b>(&self, atom: &'b AspFunction, i: usize) -> Result<&'b str> {
        atom.str_arg(i).ok_or_else(|| {
            Error::SolverBackend(format!("tuple {} lacks argument {}", atom, i))
        })
    }

    fn node_mut<'b>(
        &self,
        nodes: &'b mut BTreeMap<String, SpecNode>,
        package: &str,
    ) -> Result<&'b mut SpecNode> {
        nodes.get_mut(package).ok_or_else(|| {
            Error::SolverBackend(format!(
                "tuple references package '{}' before its node tuple",
                package
            ))
        })
    }

    /// Type a variant value through the package declaration; fall back on
    /// the textual shape for packages the repository does not know.
    fn typed_variant(&self, package: &str, vname: &str, value: &str) -> VariantSpec {
        let def = self.repo.get(package).and_then(|p| p.variant_def(vname));
        match def {
            Some(def) if def.is_bool() => match BoolValuedVariant::parse(vname, value) {
                Ok(b) => VariantSpec::Bool(b),
                Err(_) => VariantSpec::Single(SingleValuedVariant::new(vname, value)),
            },
            Some(def) if def.multi => {
                VariantSpec::Multi(MultiValuedVariant::parse(vname, value))
            }
            Some(_) => VariantSpec::Single(SingleValuedVariant::new(vname, value)),
            None => match value {
                "true" | "false" => VariantSpec::Bool(
                    BoolValuedVariant::parse(vname, value).expect("literal true/false"),
                ),
                _ => VariantSpec::Single(SingleValuedVariant::new(vname, value)),
            },
        }
    }

    /// Compiler-flag fixup after the graph is assembled.
    ///
    /// A node whose flags were set explicitly keeps them, ordered so its
    /// own flags come before any inherited from ancestors (post-order over
    /// the parents direction). A node with no explicit flags adopts the
    /// flag sets declared for its chosen compiler literally.
    fn reconcile_compiler_flags(&self, graph: &mut SpecGraph) -> Result<()> {
        let own: Vec<BTreeMap<String, Vec<String>>> = graph
            .nodes()
            .iter()
            .map(|n| n.compiler_flags.clone())
            .collect();

        let opts = TraverseOptions {
            direction: Direction::Parents,
            order: Order::Post,
            root: false,
            ..Default::default()
        };
        for id in 0..graph.len() {
            let ancestors = traverse_nodes(graph, &[id], &opts)?;
            let mut merged: BTreeMap<String, Vec<String>> = own[id].clone();
            for ancestor in ancestors {
                for (flag_name, flags) in &own[ancestor] {
                    let list = merged.entry(flag_name.clone()).or_default();
                    for flag in flags {
                        if !list.contains(flag) {
                            list.push(flag.clone());
                        }
                    }
                }
            }

            if merged.is_empty() {
                // Compiler defaults, adopted literally
                if let Some(compiler) = &graph.node(id).compiler {
                    let version = compiler
                        .versions
                        .concrete()
                        .map(|v| v.to_string())
                        .unwrap_or_default();
                    if let Some(decl) = self
                        .config
                        .compilers
                        .iter()
                        .find(|c| c.name == compiler.name && c.version == version)
                    {
                        merged = decl.flags.clone();
                    }
                }
            }
            graph.node_mut(id).compiler_flags = merged;
        }
        Ok(())
    }
}
