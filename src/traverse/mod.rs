// src/traverse/mod.rs

//! Deterministic traversal over spec graphs
//!
//! All orders (pre/post depth-first, breadth-first, topological) run over
//! one visitor abstraction: `accept` decides whether an edge is yielded,
//! `neighbors` decides what to explore next. Cover modes are visitor
//! decorators; direction reversal is another. Sibling edges are always
//! explored in name order, so two runs over the same graph yield
//! byte-identical sequences. Hash stability and reproducible solver fact
//! emission both lean on that.

use crate::error::{Error, Result};
use crate::spec::{DepTypes, NodeId, SpecGraph};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// An edge as seen during traversal. `parent` is `None` for the artificial
/// root edges pointing at the input specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRef {
    pub parent: Option<NodeId>,
    pub child: NodeId,
    pub types: DepTypes,
    pub virtual_on: Option<String>,
}

/// An edge plus its depth from the artificial root (root edges are depth 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeWithDepth {
    pub edge: EdgeRef,
    pub depth: usize,
}

/// Traversal behavior: which edges to yield and which to explore.
pub trait Visitor {
    fn accept(&mut self, item: &EdgeWithDepth) -> bool;
    fn neighbors(&mut self, item: &EdgeWithDepth) -> Vec<EdgeRef>;
}

impl<V: Visitor + ?Sized> Visitor for Box<V> {
    fn accept(&mut self, item: &EdgeWithDepth) -> bool {
        (**self).accept(item)
    }

    fn neighbors(&mut self, item: &EdgeWithDepth) -> Vec<EdgeRef> {
        (**self).neighbors(item)
    }
}

/// Follows dependency edges of a graph, filtered by type.
pub struct BaseVisitor<'a> {
    graph: &'a SpecGraph,
    deptypes: DepTypes,
}

impl<'a> BaseVisitor<'a> {
    pub fn new(graph: &'a SpecGraph, deptypes: DepTypes) -> Self {
        Self { graph, deptypes }
    }

    fn wanted(&self, types: &DepTypes) -> bool {
        // Depth-0 root edges carry no types and always pass
        types.is_empty() || types.intersects(&self.deptypes)
    }
}

impl Visitor for BaseVisitor<'_> {
    fn accept(&mut self, _item: &EdgeWithDepth) -> bool {
        true
    }

    fn neighbors(&mut self, item: &EdgeWithDepth) -> Vec<EdgeRef> {
        self.graph
            .dependencies_of(item.edge.child)
            .into_iter()
            .filter(|e| self.wanted(&e.types))
            .map(|e| EdgeRef {
                parent: Some(e.parent),
                child: e.child,
                types: e.types,
                virtual_on: e.virtual_on.clone(),
            })
            .collect()
    }
}

/// Yields each node once; a seen node is neither yielded nor re-expanded.
pub struct CoverNodesVisitor<V> {
    inner: V,
    seen: BTreeSet<NodeId>,
}

impl<V: Visitor> CoverNodesVisitor<V> {
    pub fn new(inner: V) -> Self {
        Self {
            inner,
            seen: BTreeSet::new(),
        }
    }
}

impl<V: Visitor> Visitor for CoverNodesVisitor<V> {
    fn accept(&mut self, item: &EdgeWithDepth) -> bool {
        !self.seen.contains(&item.edge.child) && self.inner.accept(item)
    }

    fn neighbors(&mut self, item: &EdgeWithDepth) -> Vec<EdgeRef> {
        self.seen.insert(item.edge.child);
        self.inner.neighbors(item)
    }
}

/// Yields every distinct in-edge of a node, but expands the node's own
/// neighbors only on first sight.
pub struct CoverEdgesVisitor<V> {
    inner: V,
    expanded: BTreeSet<NodeId>,
}

impl<V: Visitor> CoverEdgesVisitor<V> {
    pub fn new(inner: V) -> Self {
        Self {
            inner,
            expanded: BTreeSet::new(),
        }
    }
}

impl<V: Visitor> Visitor for CoverEdgesVisitor<V> {
    fn accept(&mut self, item: &EdgeWithDepth) -> bool {
        self.inner.accept(item)
    }

    fn neighbors(&mut self, item: &EdgeWithDepth) -> Vec<EdgeRef> {
        if !self.expanded.insert(item.edge.child) {
            return Vec::new();
        }
        self.inner.neighbors(item)
    }
}

/// Flips edge direction: a "children" traversal becomes a "dependents"
/// traversal. Parent and child are swapped on each produced edge before
/// the wrapped visitor sees anything else.
pub struct ReverseVisitor<'a, V> {
    graph: &'a SpecGraph,
    inner: V,
}

impl<'a, V: Visitor> ReverseVisitor<'a, V> {
    pub fn new(graph: &'a SpecGraph, inner: V) -> Self {
        Self { graph, inner }
    }
}

impl<V: Visitor> Visitor for ReverseVisitor<'_, V> {
    fn accept(&mut self, item: &EdgeWithDepth) -> bool {
        self.inner.accept(item)
    }

    fn neighbors(&mut self, item: &EdgeWithDepth) -> Vec<EdgeRef> {
        self.graph
            .dependents_of(item.edge.child)
            .into_iter()
            .map(|e| EdgeRef {
                parent: Some(e.child),
                child: e.parent,
                types: e.types,
                virtual_on: e.virtual_on.clone(),
            })
            .collect()
    }
}

/// Follows one type set only one level out from the roots while following
/// another transitively. A node's neighbors are computed once; later
/// arrivals do not re-expand it.
pub struct MixedDepthVisitor<'a> {
    graph: &'a SpecGraph,
    direct: DepTypes,
    transitive: DepTypes,
    expanded: BTreeSet<NodeId>,
}

impl<'a> MixedDepthVisitor<'a> {
    pub fn new(graph: &'a SpecGraph, direct: DepTypes, transitive: DepTypes) -> Self {
        Self {
            graph,
            direct,
            transitive,
            expanded: BTreeSet::new(),
        }
    }
}

impl Visitor for MixedDepthVisitor<'_> {
    fn accept(&mut self, _item: &EdgeWithDepth) -> bool {
        true
    }

    fn neighbors(&mut self, item: &EdgeWithDepth) -> Vec<EdgeRef> {
        if !self.expanded.insert(item.edge.child) {
            return Vec::new();
        }
        let at_root = item.depth == 0;
        let wanted = if at_root {
            self.direct.union(&self.transitive)
        } else {
            self.transitive
        };
        self.graph
            .dependencies_of(item.edge.child)
            .into_iter()
            .filter(|e| e.types.intersects(&wanted))
            .map(|e| EdgeRef {
                parent: Some(e.parent),
                child: e.child,
                types: e.types,
                virtual_on: e.virtual_on.clone(),
            })
            .collect()
    }
}

/// Yield order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Depth-first, yield on entry
    Pre,
    /// Depth-first, yield on exit
    Post,
    /// FIFO by depth
    Breadth,
    /// Every in-edge of a node yielded before any of its out-edges,
    /// as breadth-first as the DAG allows
    Topo,
}

/// How much of the DAG to yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cover {
    /// Each node once
    Nodes,
    /// Each distinct edge once
    Edges,
    /// Every path (no deduplication)
    Paths,
}

/// Edge direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Children,
    Parents,
}

/// Traversal configuration.
#[derive(Debug, Clone)]
pub struct TraverseOptions {
    pub order: Order,
    pub cover: Cover,
    pub direction: Direction,
    /// Yield the depth-0 root edges themselves
    pub root: bool,
    /// Edge types to follow
    pub deptypes: DepTypes,
    /// Nodes to treat as already seen. Not meaningful for topological
    /// order, where it is rejected.
    pub visited: Option<BTreeSet<NodeId>>,
}

impl Default for TraverseOptions {
    fn default() -> Self {
        Self {
            order: Order::Pre,
            cover: Cover::Nodes,
            direction: Direction::Children,
            root: true,
            deptypes: DepTypes {
                build: true,
                link: true,
                run: true,
                test: true,
            },
            visited: None,
        }
    }
}

/// Traverse `graph` from `roots` and collect edges in the configured
/// order. Invalid option combinations fail before any traversal begins.
pub fn traverse_edges(
    graph: &SpecGraph,
    roots: &[NodeId],
    opts: &TraverseOptions,
) -> Result<Vec<EdgeWithDepth>> {
    if opts.order == Order::Topo && opts.cover == Cover::Paths {
        return Err(Error::InvalidTraversal(
            "cover=paths cannot be combined with topological order".to_string(),
        ));
    }
    if opts.order == Order::Topo && opts.visited.is_some() {
        return Err(Error::InvalidTraversal(
            "an external visited set cannot be combined with topological order".to_string(),
        ));
    }

    // Root edges sorted by node name for run-to-run determinism,
    // regardless of the order roots were passed in
    let mut root_ids: Vec<NodeId> = roots.to_vec();
    root_ids.sort_by(|a, b| graph.node(*a).name.cmp(&graph.node(*b).name));
    root_ids.dedup();
    let root_edges: Vec<EdgeRef> = root_ids
        .iter()
        .map(|id| EdgeRef {
            parent: None,
            child: *id,
            types: DepTypes::none(),
            virtual_on: None,
        })
        .collect();

    let base = BaseVisitor::new(graph, opts.deptypes);
    let visitor: Box<dyn Visitor + '_> = match opts.direction {
        Direction::Children => Box::new(base),
        Direction::Parents => Box::new(ReverseVisitor::new(graph, base)),
    };
    let mut visitor: Box<dyn Visitor + '_> = match opts.cover {
        Cover::Nodes => {
            let mut v = CoverNodesVisitor::new(visitor);
            if let Some(seen) = &opts.visited {
                v.seen = seen.clone();
            }
            Box::new(v)
        }
        Cover::Edges => Box::new(CoverEdgesVisitor::new(visitor)),
        Cover::Paths => visitor,
    };

    let mut out = Vec::new();
    match opts.order {
        Order::Pre | Order::Post => {
            for edge in root_edges {
                dfs(
                    EdgeWithDepth { edge, depth: 0 },
                    visitor.as_mut(),
                    opts.order == Order::Post,
                    &mut out,
                );
            }
        }
        Order::Breadth => {
            let mut queue: VecDeque<EdgeWithDepth> = root_edges
                .into_iter()
                .map(|edge| EdgeWithDepth { edge, depth: 0 })
                .collect();
            while let Some(item) = queue.pop_front() {
                if !visitor.accept(&item) {
                    continue;
                }
                out.push(item.clone());
                for edge in visitor.neighbors(&item) {
                    queue.push_back(EdgeWithDepth {
                        edge,
                        depth: item.depth + 1,
                    });
                }
            }
        }
        Order::Topo => {
            out = topological(root_edges, visitor.as_mut());
        }
    }

    if !opts.root {
        out.retain(|item| item.depth != 0);
    }
    Ok(out)
}

/// Traverse and collect node ids in visit order.
pub fn traverse_nodes(
    graph: &SpecGraph,
    roots: &[NodeId],
    opts: &TraverseOptions,
) -> Result<Vec<NodeId>> {
    Ok(traverse_edges(graph, roots, opts)?
        .into_iter()
        .map(|item| item.edge.child)
        .collect())
}

fn dfs(
    item: EdgeWithDepth,
    visitor: &mut dyn Visitor,
    post: bool,
    out: &mut Vec<EdgeWithDepth>,
) {
    if !visitor.accept(&item) {
        return;
    }
    if !post {
        out.push(item.clone());
    }
    for edge in visitor.neighbors(&item) {
        dfs(
            EdgeWithDepth {
                edge,
                depth: item.depth + 1,
            },
            visitor,
            post,
            out,
        );
    }
    if post {
        out.push(item);
    }
}

/// Topological order: breadth-first collect the edge-covering sub-DAG,
/// count in-degrees, then release nodes as their last in-edge is yielded.
/// Releasing through a FIFO keeps the result as breadth-first as the DAG
/// allows, which is what keeps direct dependencies ahead of transitive
/// ones in search-path consumers.
fn topological(root_edges: Vec<EdgeRef>, visitor: &mut dyn Visitor) -> Vec<EdgeWithDepth> {
    // Pass 1: collect every distinct accepted edge breadth-first,
    // expanding each node once
    let mut expanded: BTreeSet<NodeId> = BTreeSet::new();
    let mut queue: VecDeque<EdgeWithDepth> = root_edges
        .into_iter()
        .map(|edge| EdgeWithDepth { edge, depth: 0 })
        .collect();
    let mut edges: Vec<EdgeWithDepth> = Vec::new();
    while let Some(item) = queue.pop_front() {
        if !visitor.accept(&item) {
            continue;
        }
        edges.push(item.clone());
        if !expanded.insert(item.edge.child) {
            continue;
        }
        for edge in visitor.neighbors(&item) {
            queue.push_back(EdgeWithDepth {
                edge,
                depth: item.depth + 1,
            });
        }
    }

    // Pass 2: in-degree release, FIFO from the artificial root
    let mut in_degree: BTreeMap<NodeId, usize> = BTreeMap::new();
    let mut outgoing: BTreeMap<Option<NodeId>, Vec<EdgeWithDepth>> = BTreeMap::new();
    for item in &edges {
        *in_degree.entry(item.edge.child).or_insert(0) += 1;
        outgoing
            .entry(item.edge.parent)
            .or_default()
            .push(item.clone());
    }

    let mut out = Vec::new();
    let mut ready: VecDeque<Option<NodeId>> = VecDeque::new();
    ready.push_back(None);
    while let Some(node) = ready.pop_front() {
        for item in outgoing.remove(&node).unwrap_or_default() {
            let child = item.edge.child;
            out.push(item);
            let degree = in_degree
                .get_mut(&child)
                .expect("collected edges have counted children");
            *degree -= 1;
            if *degree == 0 {
                ready.push_back(Some(child));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Spec, SpecNode};

    /// Diamond: app -> (libb, libc) -> libd
    fn diamond() -> Spec {
        let mut spec = Spec::new("app");
        let root = spec.root_id();
        let g = spec.graph_mut();
        let b = g.add_node(SpecNode::new("libb")).unwrap();
        let c = g.add_node(SpecNode::new("libc")).unwrap();
        let d = g.add_node(SpecNode::new("libd")).unwrap();
        g.add_edge(root, b, DepTypes::default_types(), None);
        g.add_edge(root, c, DepTypes::default_types(), None);
        g.add_edge(b, d, DepTypes::LINK, None);
        g.add_edge(c, d, DepTypes::LINK, None);
        spec
    }

    fn names(spec: &Spec, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|id| spec.graph().node(*id).name.clone()).collect()
    }

    #[test]
    fn test_cover_nodes_yields_shared_dep_once() {
        let spec = diamond();
        let opts = TraverseOptions::default();
        let visited = traverse_nodes(spec.graph(), &[spec.root_id()], &opts).unwrap();
        assert_eq!(names(&spec, &visited), vec!["app", "libb", "libd", "libc"]);
    }

    #[test]
    fn test_cover_edges_yields_both_in_edges() {
        let spec = diamond();
        let opts = TraverseOptions {
            cover: Cover::Edges,
            ..Default::default()
        };
        let edges = traverse_edges(spec.graph(), &[spec.root_id()], &opts).unwrap();
        let d = spec.graph().find("libd").unwrap();
        let into_d = edges.iter().filter(|e| e.edge.child == d).count();
        assert_eq!(into_d, 2);
        // but libd is expanded only once: 5 edges total (1 root + 4 deps)
        assert_eq!(edges.len(), 5);
    }

    #[test]
    fn test_cover_paths_counts_every_path() {
        let spec = diamond();
        let opts = TraverseOptions {
            cover: Cover::Paths,
            ..Default::default()
        };
        let edges = traverse_edges(spec.graph(), &[spec.root_id()], &opts).unwrap();
        let d = spec.graph().find("libd").unwrap();
        let into_d = edges.iter().filter(|e| e.edge.child == d).count();
        assert_eq!(into_d, 2);
        assert_eq!(edges.len(), 5);
    }

    #[test]
    fn test_post_order_yields_leaves_first() {
        let spec = diamond();
        let opts = TraverseOptions {
            order: Order::Post,
            ..Default::default()
        };
        let visited = traverse_nodes(spec.graph(), &[spec.root_id()], &opts).unwrap();
        assert_eq!(names(&spec, &visited), vec!["libd", "libb", "libc", "app"]);
    }

    #[test]
    fn test_breadth_first_by_depth() {
        let spec = diamond();
        let opts = TraverseOptions {
            order: Order::Breadth,
            ..Default::default()
        };
        let visited = traverse_nodes(spec.graph(), &[spec.root_id()], &opts).unwrap();
        assert_eq!(names(&spec, &visited), vec!["app", "libb", "libc", "libd"]);
    }

    #[test]
    fn test_topo_parents_before_children() {
        let spec = diamond();
        let opts = TraverseOptions {
            order: Order::Topo,
            cover: Cover::Edges,
            ..Default::default()
        };
        let edges = traverse_edges(spec.graph(), &[spec.root_id()], &opts).unwrap();
        let mut yielded: BTreeSet<Option<NodeId>> = BTreeSet::new();
        yielded.insert(None);
        for item in &edges {
            assert!(
                yielded.contains(&item.edge.parent),
                "edge into {} yielded before its parent",
                spec.graph().node(item.edge.child).name
            );
            yielded.insert(Some(item.edge.child));
        }
        assert_eq!(edges.len(), 5);
    }

    #[test]
    fn test_root_false_suppresses_depth_zero() {
        let spec = diamond();
        let opts = TraverseOptions {
            root: false,
            ..Default::default()
        };
        let visited = traverse_nodes(spec.graph(), &[spec.root_id()], &opts).unwrap();
        assert_eq!(names(&spec, &visited), vec!["libb", "libd", "libc"]);
    }

    #[test]
    fn test_parents_direction() {
        let spec = diamond();
        let d = spec.graph().find("libd").unwrap();
        let opts = TraverseOptions {
            direction: Direction::Parents,
            ..Default::default()
        };
        let visited = traverse_nodes(spec.graph(), &[d], &opts).unwrap();
        assert_eq!(names(&spec, &visited), vec!["libd", "libb", "app", "libc"]);
    }

    #[test]
    fn test_deptype_filter() {
        let spec = diamond();
        let opts = TraverseOptions {
            deptypes: DepTypes::BUILD,
            ..Default::default()
        };
        let visited = traverse_nodes(spec.graph(), &[spec.root_id()], &opts).unwrap();
        // libd is reachable only over link edges
        assert_eq!(names(&spec, &visited), vec!["app", "libb", "libc"]);
    }

    #[test]
    fn test_determinism_across_root_orders() {
        let mut spec = Spec::new("root1");
        let r1 = spec.root_id();
        let g = spec.graph_mut();
        let r2 = g.add_node(SpecNode::new("root2")).unwrap();
        let shared = g.add_node(SpecNode::new("shared")).unwrap();
        g.add_edge(r1, shared, DepTypes::default_types(), None);
        g.add_edge(r2, shared, DepTypes::default_types(), None);

        let opts = TraverseOptions::default();
        let a = traverse_nodes(spec.graph(), &[r1, r2], &opts).unwrap();
        let b = traverse_nodes(spec.graph(), &[r2, r1], &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_combinations_rejected_up_front() {
        let spec = diamond();
        let opts = TraverseOptions {
            order: Order::Topo,
            cover: Cover::Paths,
            ..Default::default()
        };
        assert!(traverse_edges(spec.graph(), &[spec.root_id()], &opts).is_err());

        let opts = TraverseOptions {
            order: Order::Topo,
            cover: Cover::Edges,
            visited: Some(BTreeSet::new()),
            ..Default::default()
        };
        assert!(traverse_edges(spec.graph(), &[spec.root_id()], &opts).is_err());
    }

    #[test]
    fn test_mixed_depth_visitor() {
        // app -(build)-> cmake -(link)-> ncurses, cmake -(build)-> gmake
        //   \-(link)-> zlib -(link)-> libz2
        let mut spec = Spec::new("app");
        let root = spec.root_id();
        let g = spec.graph_mut();
        let cmake = g.add_node(SpecNode::new("cmake")).unwrap();
        let ncurses = g.add_node(SpecNode::new("ncurses")).unwrap();
        let gmake = g.add_node(SpecNode::new("gmake")).unwrap();
        let zlib = g.add_node(SpecNode::new("zlib")).unwrap();
        let libz2 = g.add_node(SpecNode::new("libz2")).unwrap();
        g.add_edge(root, cmake, DepTypes::BUILD, None);
        g.add_edge(cmake, ncurses, DepTypes::LINK, None);
        g.add_edge(cmake, gmake, DepTypes::BUILD, None);
        g.add_edge(root, zlib, DepTypes::LINK, None);
        g.add_edge(zlib, libz2, DepTypes::LINK, None);

        // build edges only from the root; link edges transitively
        let mixed = MixedDepthVisitor::new(spec.graph(), DepTypes::BUILD, DepTypes::LINK);
        let mut visitor = CoverNodesVisitor::new(mixed);
        let mut out = Vec::new();
        dfs(
            EdgeWithDepth {
                edge: EdgeRef {
                    parent: None,
                    child: root,
                    types: DepTypes::none(),
                    virtual_on: None,
                },
                depth: 0,
            },
            &mut visitor,
            false,
            &mut out,
        );
        let visited: Vec<String> = out
            .iter()
            .map(|i| spec.graph().node(i.edge.child).name.clone())
            .collect();
        // cmake is reached (depth 1 via build) and its link closure is
        // followed, but its own build deps are not; zlib's link chain is
        // followed transitively
        assert!(visited.contains(&"cmake".to_string()));
        assert!(visited.contains(&"ncurses".to_string()));
        assert!(!visited.contains(&"gmake".to_string()));
        assert!(visited.contains(&"zlib".to_string()));
        assert!(visited.contains(&"libz2".to_string()));
    }
}
