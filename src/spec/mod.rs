// src/spec/mod.rs

//! Dependency specs: the graph nodes the concretizer reads and writes
//!
//! A [`Spec`] is a rooted DAG of [`SpecNode`]s. Nodes live in an arena and
//! edges are id pairs, so hashing, serialization, and cycle checks are
//! plain structural operations. Abstract specs carry constraints (version
//! lists, partial variants); concrete specs are fully assigned, hashed,
//! and immutable in the ways that matter.

mod parse;

pub use parse::{parse_constraint, parse_spec};

use crate::error::{Error, Result};
use crate::variant::VariantMap;
use crate::version::VersionList;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Stable node id inside one spec graph.
pub type NodeId = usize;

/// The edge type set: which roles a dependency plays for its parent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct DepTypes {
    pub build: bool,
    pub link: bool,
    pub run: bool,
    pub test: bool,
}

impl DepTypes {
    pub const BUILD: DepTypes = DepTypes {
        build: true,
        link: false,
        run: false,
        test: false,
    };
    pub const LINK: DepTypes = DepTypes {
        build: false,
        link: true,
        run: false,
        test: false,
    };
    pub const RUN: DepTypes = DepTypes {
        build: false,
        link: false,
        run: true,
        test: false,
    };
    pub const TEST: DepTypes = DepTypes {
        build: false,
        link: false,
        run: false,
        test: true,
    };

    /// The default for an unannotated `depends_on`: build + link.
    pub fn default_types() -> DepTypes {
        DepTypes {
            build: true,
            link: true,
            run: false,
            test: false,
        }
    }

    pub fn none() -> DepTypes {
        DepTypes::default()
    }

    pub fn is_empty(&self) -> bool {
        !(self.build || self.link || self.run || self.test)
    }

    pub fn union(&self, other: &DepTypes) -> DepTypes {
        DepTypes {
            build: self.build || other.build,
            link: self.link || other.link,
            run: self.run || other.run,
            test: self.test || other.test,
        }
    }

    /// True if any role in `other` is present here.
    pub fn intersects(&self, other: &DepTypes) -> bool {
        (self.build && other.build)
            || (self.link && other.link)
            || (self.run && other.run)
            || (self.test && other.test)
    }

    pub fn from_names(names: &[&str]) -> Result<DepTypes> {
        let mut out = DepTypes::none();
        for n in names {
            match *n {
                "build" => out.build = true,
                "link" => out.link = true,
                "run" => out.run = true,
                "test" => out.test = true,
                other => {
                    return Err(Error::Parse(format!("unknown dependency type '{}'", other)))
                }
            }
        }
        Ok(out)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.build {
            out.push("build");
        }
        if self.link {
            out.push("link");
        }
        if self.run {
            out.push("run");
        }
        if self.test {
            out.push("test");
        }
        out
    }
}

impl fmt::Display for DepTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(","))
    }
}

/// Architecture descriptor: platform, operating system, target. Each part
/// is independently optional and independently satisfiable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ArchSpec {
    pub platform: Option<String>,
    pub os: Option<String>,
    pub target: Option<String>,
}

impl ArchSpec {
    pub fn new(platform: &str, os: &str, target: &str) -> Self {
        Self {
            platform: Some(platform.to_string()),
            os: Some(os.to_string()),
            target: Some(target.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.platform.is_none() && self.os.is_none() && self.target.is_none()
    }

    pub fn is_concrete(&self) -> bool {
        self.platform.is_some() && self.os.is_some() && self.target.is_some()
    }

    fn part_satisfies(mine: &Option<String>, theirs: &Option<String>) -> bool {
        match theirs {
            None => true,
            Some(t) => mine.as_deref() == Some(t.as_str()),
        }
    }

    pub fn satisfies(&self, other: &ArchSpec) -> bool {
        Self::part_satisfies(&self.platform, &other.platform)
            && Self::part_satisfies(&self.os, &other.os)
            && Self::part_satisfies(&self.target, &other.target)
    }

    fn constrain_part(
        mine: &mut Option<String>,
        theirs: &Option<String>,
        what: &str,
    ) -> Result<bool> {
        match (mine.as_deref(), theirs.as_deref()) {
            (_, None) => Ok(false),
            (None, Some(t)) => {
                *mine = Some(t.to_string());
                Ok(true)
            }
            (Some(m), Some(t)) if m == t => Ok(false),
            (Some(m), Some(t)) => Err(Error::UnsatisfiableSpec {
                lhs: m.to_string(),
                rhs: t.to_string(),
                reason: format!("conflicting {}", what),
            }),
        }
    }

    pub fn constrain(&mut self, other: &ArchSpec) -> Result<bool> {
        let mut changed = Self::constrain_part(&mut self.platform, &other.platform, "platform")?;
        changed |= Self::constrain_part(&mut self.os, &other.os, "os")?;
        changed |= Self::constrain_part(&mut self.target, &other.target, "target")?;
        Ok(changed)
    }
}

impl fmt::Display for ArchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |p: &Option<String>| p.clone().unwrap_or_default();
        write!(
            f,
            "{}-{}-{}",
            part(&self.platform),
            part(&self.os),
            part(&self.target)
        )
    }
}

/// Compiler constraint: a name plus admissible versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompilerSpec {
    pub name: String,
    pub versions: VersionList,
}

impl CompilerSpec {
    pub fn new(name: impl Into<String>, versions: VersionList) -> Self {
        Self {
            name: name.into(),
            versions,
        }
    }

    pub fn any_version(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: VersionList::any(),
        }
    }

    pub fn satisfies(&self, other: &CompilerSpec) -> bool {
        self.name == other.name && self.versions.satisfies(&other.versions)
    }

    pub fn constrain(&mut self, other: &CompilerSpec) -> Result<bool> {
        if self.name != other.name {
            return Err(Error::UnsatisfiableSpec {
                lhs: self.to_string(),
                rhs: other.to_string(),
                reason: "different compilers".to_string(),
            });
        }
        let merged = self.versions.intersection(&other.versions);
        if merged.is_empty() {
            return Err(Error::UnsatisfiableSpec {
                lhs: self.to_string(),
                rhs: other.to_string(),
                reason: "no common compiler version".to_string(),
            });
        }
        let changed = merged != self.versions;
        self.versions = merged;
        Ok(changed)
    }
}

impl fmt::Display for CompilerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name)?;
        if !self.versions.is_any() {
            write!(f, "@{}", self.versions)?;
        }
        Ok(())
    }
}

/// Attributes of an externally provided installation chosen from
/// configuration instead of being built.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExternalAttrs {
    pub path: String,
    pub modules: Vec<String>,
    pub extra_attributes: BTreeMap<String, String>,
}

/// One node of a spec graph. The name may be a package or a virtual
/// interface; which one it is lives in the repository, not the node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpecNode {
    pub name: String,
    pub versions: VersionList,
    pub variants: VariantMap,
    pub compiler: Option<CompilerSpec>,
    pub compiler_flags: BTreeMap<String, Vec<String>>,
    pub arch: ArchSpec,
    pub external: Option<ExternalAttrs>,
    pub concrete: bool,
}

impl SpecNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: VersionList::any(),
            ..Default::default()
        }
    }

    /// Parse a single node constraint. The package name may be omitted
    /// (anonymous constraints like `+debug` used in conditions).
    pub fn parse(text: &str) -> Result<Self> {
        parse::parse_constraint(text)
    }

    /// Node-level satisfaction: name, versions, variants, compiler, arch.
    pub fn satisfies(&self, constraint: &SpecNode) -> bool {
        if !constraint.name.is_empty() && self.name != constraint.name {
            return false;
        }
        if !self.versions.satisfies(&constraint.versions) {
            return false;
        }
        if !self.variants.satisfies(&constraint.variants) {
            return false;
        }
        if let Some(theirs) = &constraint.compiler {
            match &self.compiler {
                Some(mine) if mine.satisfies(theirs) => {}
                _ => return false,
            }
        }
        self.arch.satisfies(&constraint.arch)
    }

    /// Can some concrete node satisfy both constraints at once? Unlike
    /// [`satisfies`](Self::satisfies) this is symmetric.
    pub fn intersects(&self, other: &SpecNode) -> bool {
        let mut merged = self.clone();
        merged.constrain(other).is_ok()
    }

    /// Merge `constraint` into this node, failing on any provable
    /// contradiction. Returns whether the node changed.
    pub fn constrain(&mut self, constraint: &SpecNode) -> Result<bool> {
        if !constraint.name.is_empty() && !self.name.is_empty() && self.name != constraint.name
        {
            return Err(Error::UnsatisfiableSpec {
                lhs: self.name.clone(),
                rhs: constraint.name.clone(),
                reason: "different package names".to_string(),
            });
        }
        let mut changed = false;
        let merged_versions = self.versions.intersection(&constraint.versions);
        if merged_versions.is_empty() && !constraint.versions.is_any() {
            return Err(Error::UnsatisfiableSpec {
                lhs: format!("{}@{}", self.name, self.versions),
                rhs: format!("{}@{}", constraint.name, constraint.versions),
                reason: "no common version".to_string(),
            });
        }
        if merged_versions != self.versions {
            self.versions = merged_versions;
            changed = true;
        }
        changed |= self.variants.constrain(&constraint.variants)?;
        match (&mut self.compiler, &constraint.compiler) {
            (_, None) => {}
            (Some(mine), Some(theirs)) => changed |= mine.constrain(theirs)?,
            (slot @ None, Some(theirs)) => {
                *slot = Some(theirs.clone());
                changed = true;
            }
        }
        changed |= self.arch.constrain(&constraint.arch)?;
        Ok(changed)
    }
}

impl fmt::Display for SpecNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.versions.is_any() && !self.versions.is_empty() {
            write!(f, "@{}", self.versions)?;
        }
        write!(f, "{}", self.variants)?;
        if let Some(c) = &self.compiler {
            write!(f, " {}", c)?;
        }
        if !self.arch.is_empty() {
            write!(f, " arch={}", self.arch)?;
        }
        Ok(())
    }
}

/// A typed edge between two nodes of a spec graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepEdge {
    pub parent: NodeId,
    pub child: NodeId,
    pub types: DepTypes,
    /// The virtual interface this edge satisfies, when the dependency was
    /// requested through one.
    pub virtual_on: Option<String>,
}

/// Arena of spec nodes plus their typed edges.
///
/// One node per package name per graph: duplicate names are rejected at
/// insertion, which is what keeps `find` and hashing well-defined.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpecGraph {
    nodes: Vec<SpecNode>,
    edges: Vec<DepEdge>,
}

impl SpecGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: SpecNode) -> Result<NodeId> {
        if self.nodes.iter().any(|n| n.name == node.name) {
            return Err(Error::DuplicatePackage(node.name));
        }
        self.nodes.push(node);
        Ok(self.nodes.len() - 1)
    }

    pub fn node(&self, id: NodeId) -> &SpecNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut SpecNode {
        &mut self.nodes[id]
    }

    pub fn nodes(&self) -> &[SpecNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[DepEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Add or widen an edge. An existing parent/child pair accumulates
    /// types rather than growing a parallel edge.
    pub fn add_edge(
        &mut self,
        parent: NodeId,
        child: NodeId,
        types: DepTypes,
        virtual_on: Option<String>,
    ) {
        if let Some(edge) = self
            .edges
            .iter_mut()
            .find(|e| e.parent == parent && e.child == child)
        {
            edge.types = edge.types.union(&types);
            if edge.virtual_on.is_none() {
                edge.virtual_on = virtual_on;
            }
            return;
        }
        self.edges.push(DepEdge {
            parent,
            child,
            types,
            virtual_on,
        });
    }

    /// Outgoing edges, deterministically ordered by child name.
    pub fn dependencies_of(&self, id: NodeId) -> Vec<&DepEdge> {
        let mut out: Vec<&DepEdge> = self.edges.iter().filter(|e| e.parent == id).collect();
        out.sort_by(|a, b| self.nodes[a.child].name.cmp(&self.nodes[b.child].name));
        out
    }

    /// Incoming edges, deterministically ordered by parent name.
    pub fn dependents_of(&self, id: NodeId) -> Vec<&DepEdge> {
        let mut out: Vec<&DepEdge> = self.edges.iter().filter(|e| e.child == id).collect();
        out.sort_by(|a, b| self.nodes[a.parent].name.cmp(&self.nodes[b.parent].name));
        out
    }
}

/// A rooted spec: the node a request names plus the closure of its
/// dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    graph: SpecGraph,
    root: NodeId,
}

impl Spec {
    pub fn from_graph(graph: SpecGraph, root: NodeId) -> Self {
        Self { graph, root }
    }

    pub fn new(name: impl Into<String>) -> Self {
        let mut graph = SpecGraph::new();
        let root = graph
            .add_node(SpecNode::new(name))
            .expect("first node of a fresh graph");
        Self { graph, root }
    }

    pub fn parse(text: &str) -> Result<Self> {
        parse_spec(text)
    }

    pub fn graph(&self) -> &SpecGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut SpecGraph {
        &mut self.graph
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn root(&self) -> &SpecNode {
        self.graph.node(self.root)
    }

    pub fn root_mut(&mut self) -> &mut SpecNode {
        self.graph.node_mut(self.root)
    }

    pub fn name(&self) -> &str {
        &self.root().name
    }

    pub fn is_concrete(&self) -> bool {
        self.graph.nodes().iter().all(|n| n.concrete)
    }

    /// Direct dependencies of the root carrying any of `types`.
    pub fn direct_dependencies(&self, types: DepTypes) -> Vec<NodeId> {
        self.graph
            .dependencies_of(self.root)
            .into_iter()
            .filter(|e| e.types.intersects(&types))
            .map(|e| e.child)
            .collect()
    }

    /// The sub-spec rooted at a dependency node: the node plus its own
    /// reachable closure, re-rooted in a fresh graph.
    pub fn subspec(&self, id: NodeId) -> Spec {
        let mut graph = SpecGraph::new();
        let mut map: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut stack = vec![id];
        while let Some(old) = stack.pop() {
            if map.contains_key(&old) {
                continue;
            }
            let new_id = graph
                .add_node(self.graph.node(old).clone())
                .expect("closure nodes are unique by name");
            map.insert(old, new_id);
            for edge in self.graph.dependencies_of(old) {
                stack.push(edge.child);
            }
        }
        for edge in self.graph.edges() {
            if let (Some(&p), Some(&c)) = (map.get(&edge.parent), map.get(&edge.child)) {
                graph.add_edge(p, c, edge.types, edge.virtual_on.clone());
            }
        }
        Spec::from_graph(graph, map[&id])
    }

    /// Graph-level satisfaction: the root satisfies the constraint root,
    /// and for every named dependency constraint there is a node here that
    /// satisfies it.
    pub fn satisfies(&self, constraint: &Spec) -> bool {
        if !self.root().satisfies(constraint.root()) {
            return false;
        }
        constraint
            .graph
            .nodes()
            .iter()
            .enumerate()
            .filter(|(id, _)| *id != constraint.root)
            .all(|(_, want)| {
                self.graph
                    .nodes()
                    .iter()
                    .any(|have| have.satisfies(want))
            })
    }

    /// The content hash of the root node plus its transitive closure.
    ///
    /// Hash-relevant data only: name, version, variants, compiler, arch,
    /// and each dependency's `(name, hash, types)` triple in name order.
    /// Stable across runs because every collection serializes in sorted
    /// order.
    pub fn dag_hash(&self) -> String {
        let mut memo = BTreeMap::new();
        self.node_hash(self.root, &mut memo)
    }

    fn node_hash(&self, id: NodeId, memo: &mut BTreeMap<NodeId, String>) -> String {
        if let Some(hash) = memo.get(&id) {
            return hash.clone();
        }
        let node = self.graph.node(id);
        let deps: Vec<serde_json::Value> = self
            .graph
            .dependencies_of(id)
            .into_iter()
            .map(|e| (e.child, e.types))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|(child, types)| {
                serde_json::json!({
                    "name": self.graph.node(child).name,
                    "hash": self.node_hash(child, memo),
                    "types": types.names(),
                })
            })
            .collect();
        let variants: BTreeMap<String, Vec<String>> = node
            .variants
            .iter()
            .map(|(k, v)| (k.clone(), v.value_strings()))
            .collect();
        let doc = serde_json::json!({
            "name": node.name,
            "versions": node.versions.to_string(),
            "variants": variants,
            "compiler": node.compiler.as_ref().map(|c| c.to_string()),
            "arch": node.arch.to_string(),
            "dependencies": deps,
        });
        let mut hasher = Sha256::new();
        hasher.update(doc.to_string().as_bytes());
        let hash = hex::encode(hasher.finalize());
        memo.insert(id, hash.clone());
        hash
    }

    /// Mark every node concrete. Callers must only do this once the whole
    /// graph is consistent; the hash is meaningful from then on.
    pub fn mark_concrete(&mut self) {
        for node in &mut self.graph.nodes {
            node.concrete = true;
        }
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root())?;
        for edge in self.graph.dependencies_of(self.root) {
            write!(f, " ^{}", self.graph.node(edge.child))?;
        }
        Ok(())
    }
}

impl FromStr for Spec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Spec::parse(s)
    }
}
