// tests/database.rs

//! Installation database lifecycle scenarios.

use std::collections::BTreeMap;
use std::path::Path;
use strata::{
    Database, DepTypes, QueryOptions, Spec, SpecNode, VersionList, YamlDirectoryLayout,
};
use tempfile::TempDir;

fn concrete(name: &str, version: &str) -> Spec {
    let mut spec = Spec::new(name);
    spec.root_mut().versions = VersionList::parse(&format!("={}", version)).unwrap();
    spec.mark_concrete();
    spec
}

/// `parent@version` with a link edge onto a copy of `child`'s graph.
fn with_link_dep(parent: &str, version: &str, child: &Spec) -> Spec {
    let mut spec = Spec::new(parent);
    spec.root_mut().versions = VersionList::parse(&format!("={}", version)).unwrap();
    let root = spec.root_id();
    let mut map = BTreeMap::new();
    for (i, node) in child.graph().nodes().iter().enumerate() {
        let id = spec.graph_mut().add_node(node.clone()).unwrap();
        map.insert(i, id);
    }
    for edge in child.graph().edges() {
        spec.graph_mut().add_edge(
            map[&edge.parent],
            map[&edge.child],
            edge.types,
            edge.virtual_on.clone(),
        );
    }
    spec.graph_mut()
        .add_edge(root, map[&child.root_id()], DepTypes::LINK, None);
    spec.mark_concrete();
    spec
}

#[test]
fn test_remove_keeps_referenced_record_until_last_dependent() {
    let dir = TempDir::new().unwrap();
    let mut db = Database::new(dir.path()).unwrap();

    let spec_b = concrete("libb", "1.0");
    let spec_a = with_link_dep("appa", "2.0", &spec_b);

    db.add(&spec_a, Path::new("/opt/appa"), true).unwrap();
    db.add(&spec_b, Path::new("/opt/libb"), true).unwrap();

    // A still references B: removing B flips installed off but keeps the
    // record with its ref count
    db.remove(&spec_b).unwrap();
    let b_rec = db.get_record(&spec_b.dag_hash()).unwrap();
    assert!(!b_rec.installed);
    assert_eq!(b_rec.ref_count, 1);

    // removing A drops B's last reference; never re-installed, the
    // record is deleted
    db.remove(&spec_a).unwrap();
    assert!(db.get_record(&spec_a.dag_hash()).is_none());
    assert!(db.get_record(&spec_b.dag_hash()).is_none());
}

#[test]
fn test_two_processes_one_database() {
    // Two Database values over the same root model two processes: each
    // transaction re-reads the on-disk index, so writes interleave
    let dir = TempDir::new().unwrap();
    let mut first = Database::new(dir.path()).unwrap();
    let mut second = Database::new(dir.path()).unwrap();

    let spec_b = concrete("libb", "1.0");
    let spec_c = concrete("libc", "2.0");

    first.add(&spec_b, Path::new("/opt/libb"), true).unwrap();
    second.add(&spec_c, Path::new("/opt/libc"), true).unwrap();

    // the second writer must not have clobbered the first's record
    let all = first
        .query(&QueryOptions {
            installed: Some(true),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn test_query_is_sorted_and_stable() {
    let dir = TempDir::new().unwrap();
    let mut db = Database::new(dir.path()).unwrap();

    for (name, version) in [("zeta", "1.0"), ("alpha", "1.0"), ("midl", "3.0")] {
        db.add(&concrete(name, version), Path::new("/opt/x"), true)
            .unwrap();
    }
    let names: Vec<String> = db
        .query(&QueryOptions::default())
        .unwrap()
        .iter()
        .map(|s| s.name().to_string())
        .collect();
    assert_eq!(names, vec!["alpha", "midl", "zeta"]);
}

#[test]
fn test_reindex_round_trip_matches_incremental_adds() {
    let dir = TempDir::new().unwrap();
    let install_root = dir.path().join("opt");
    let layout = YamlDirectoryLayout::new(&install_root);

    let spec_b = concrete("libb", "1.0");
    let spec_a = with_link_dep("appa", "2.0", &spec_b);
    layout.register(&spec_a).unwrap();
    layout.register(&spec_b).unwrap();

    let mut db = Database::new(dir.path()).unwrap();
    db.reindex(&layout).unwrap();

    assert_eq!(db.get_record(&spec_b.dag_hash()).unwrap().ref_count, 1);
    assert!(db.get_record(&spec_a.dag_hash()).unwrap().installed);

    // a second reindex with no filesystem changes is a no-op
    db.reindex(&layout).unwrap();
    assert_eq!(db.get_record(&spec_b.dag_hash()).unwrap().ref_count, 1);
}

#[test]
fn test_deep_chain_cascade() {
    // app -> libmid -> libleaf: removing app cascades through both once
    // nothing else references them
    let dir = TempDir::new().unwrap();
    let mut db = Database::new(dir.path()).unwrap();

    let leaf = concrete("libleaf", "1.0");
    let mid = with_link_dep("libmid", "1.0", &leaf);
    let app = with_link_dep("app", "1.0", &mid);

    db.add(&app, Path::new("/opt/app"), true).unwrap();
    assert_eq!(db.get_record(&mid.dag_hash()).unwrap().ref_count, 1);
    assert_eq!(db.get_record(&leaf.dag_hash()).unwrap().ref_count, 1);

    db.remove(&app).unwrap();
    assert!(db.get_record(&app.dag_hash()).is_none());
    assert!(db.get_record(&mid.dag_hash()).is_none());
    assert!(db.get_record(&leaf.dag_hash()).is_none());
}

#[test]
fn test_shared_graph_spec_from_parse() {
    // the spec graph type used by the database is the same one the
    // parser produces; make sure a parsed constraint matches records
    let dir = TempDir::new().unwrap();
    let mut db = Database::new(dir.path()).unwrap();

    db.add(&concrete("zlib", "1.2.13"), Path::new("/opt/zlib"), true)
        .unwrap();
    db.add(&concrete("zstd", "1.5.5"), Path::new("/opt/zstd"), true)
        .unwrap();

    let constraint = Spec::parse("zlib@1.2:").unwrap();
    let found = db
        .query(&QueryOptions {
            spec: Some(&constraint),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name(), "zlib");
}

#[test]
fn test_database_add_then_layout_register_roundtrip() {
    // an install flow: concretized spec, registered on disk, recorded,
    // then rediscovered by reindex in a fresh database
    let dir = TempDir::new().unwrap();
    let install_root = dir.path().join("opt");
    let layout = YamlDirectoryLayout::new(&install_root);

    let mut spec = concrete("hdf5", "1.14.3");
    let root = spec.root_id();
    let z = spec.graph_mut().add_node(SpecNode::new("zlib")).unwrap();
    spec.graph_mut().add_edge(root, z, DepTypes::LINK, None);
    spec.mark_concrete();

    let prefix = layout.register(&spec).unwrap();
    let mut db = Database::new(dir.path()).unwrap();
    db.add(&spec, &prefix, true).unwrap();
    drop(db);

    let mut fresh = Database::new(dir.path()).unwrap();
    fresh.reindex(&layout).unwrap();
    let rec = fresh.get_record(&spec.dag_hash()).unwrap();
    assert!(rec.installed);
    assert!(rec.explicit);
}
