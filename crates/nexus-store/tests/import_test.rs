//! End-to-end import tests
//!
//! Tests cover:
//! - Relationship chains and degrees of sparse nodes
//! - Group layout of dense nodes after defragmentation
//! - Multiple linking rounds and defragmentation passes under a tight budget
//! - Counts store totals
//! - Deletion of duplicate and uniqueness-violating nodes

use nexus_store::counts::{CountsStore, ANY};
use nexus_store::import::{InMemoryInput, InputNode, InputRelationship, SilentImportMonitor};
use nexus_store::property::PropertyValue;
use nexus_store::schema::{ConstraintKind, ConstraintRule, SchemaDescriptor, SchemaRule};
use nexus_store::staging::SilentExecutionMonitor;
use nexus_store::store::chain::{group_chain, property_chain, RelationshipChain};
use nexus_store::store::labels::get_labels;
use nexus_store::store::record::{RelationshipRecord, NULL_REFERENCE};
use nexus_store::{BulkImporter, ImportConfig, ImportSummary, NeoStores};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tempfile::TempDir;

const DENSE_THRESHOLD: u64 = 20;

fn config() -> ImportConfig {
    ImportConfig {
        available_memory_bytes: Some(8 << 30),
        ..ImportConfig::default()
            .with_batch_size(50)
            .with_max_processors(4)
            .with_dense_node_threshold(DENSE_THRESHOLD)
    }
}

fn importer(config: ImportConfig) -> BulkImporter {
    BulkImporter::new(config)
        .with_monitor(Box::new(SilentImportMonitor))
        .with_execution_monitor(Box::new(SilentExecutionMonitor))
}

/// A graph with a few hubs, loops and several relationship types
fn random_graph(seed: u64, nodes: usize, relationships: usize) -> InMemoryInput {
    let mut rng = StdRng::seed_from_u64(seed);
    let input_nodes = (0..nodes)
        .map(|i| {
            let labels: Vec<u32> = (0..rng.gen_range(0..3)).map(|_| rng.gen_range(0..4)).collect();
            InputNode {
                input_id: format!("n{}", i),
                labels,
                properties: vec![(0, PropertyValue::from(i as i64))],
            }
        })
        .collect();
    let input_relationships = (0..relationships)
        .map(|_| {
            // a handful of hubs attract most relationships
            let start = if rng.gen_bool(0.4) { rng.gen_range(0..5) } else { rng.gen_range(0..nodes) };
            let end = if rng.gen_bool(0.05) { start } else { rng.gen_range(0..nodes) };
            InputRelationship {
                start: format!("n{}", start),
                end: format!("n{}", end),
                rel_type: rng.gen_range(0..6),
                properties: Vec::new(),
            }
        })
        .collect();
    InMemoryInput::new(input_nodes, input_relationships)
}

fn in_use_relationships(stores: &NeoStores) -> Vec<RelationshipRecord> {
    stores
        .relationships
        .scan(0..stores.relationships.high_id())
        .unwrap()
        .into_iter()
        .filter(|r| r.in_use)
        .collect()
}

/// Relationship ids per node, plus the degree with loops counted twice
fn expected_chains(relationships: &[RelationshipRecord]) -> HashMap<u64, (BTreeSet<u64>, u64)> {
    let mut chains: HashMap<u64, (BTreeSet<u64>, u64)> = HashMap::new();
    for r in relationships {
        for node in [r.first_node, r.second_node] {
            let entry = chains.entry(node).or_default();
            entry.0.insert(r.id);
            entry.1 += 1;
        }
    }
    chains
}

fn walk(stores: &NeoStores, node: u64, first: i64) -> (BTreeSet<u64>, Option<u64>) {
    let mut chain = RelationshipChain::new(&stores.relationships, node, first);
    let mut ids = BTreeSet::new();
    for record in chain.by_ref() {
        let record = record.unwrap();
        assert!(ids.insert(record.id), "relationship {} twice in chain of node {}", record.id, node);
    }
    (ids, chain.degree())
}

fn verify_store(stores: &NeoStores) {
    let relationships = in_use_relationships(stores);
    let expected = expected_chains(&relationships);
    let mut group_ids = Vec::new();

    for node in stores.nodes.scan(0..stores.nodes.high_id()).unwrap() {
        if !node.in_use {
            continue;
        }
        let Some((ids, degree)) = expected.get(&node.id) else {
            assert_eq!(node.next_rel, NULL_REFERENCE, "node {} has no relationships", node.id);
            continue;
        };

        if !node.dense {
            assert!(*degree < DENSE_THRESHOLD);
            let (chain, chain_degree) = walk(stores, node.id, node.next_rel);
            assert_eq!(&chain, ids, "chain of sparse node {}", node.id);
            assert_eq!(chain_degree, Some(*degree), "degree of sparse node {}", node.id);
            continue;
        }

        assert!(*degree >= DENSE_THRESHOLD);
        let groups = group_chain(&stores.groups, node.next_rel).unwrap();
        let mut seen = BTreeSet::new();
        for (i, group) in groups.iter().enumerate() {
            group_ids.push(group.id);
            assert_eq!(group.owning_node, node.id);
            if i + 1 < groups.len() {
                assert!(group.rel_type < groups[i + 1].rel_type, "groups of node {} out of order", node.id);
                assert_eq!(group.next, group.id as i64 + 1, "groups of node {} not contiguous", node.id);
            } else {
                assert_eq!(group.next, NULL_REFERENCE);
            }

            let mut typed = BTreeSet::new();
            for (first, outgoing, incoming) in [
                (group.first_out, true, false),
                (group.first_in, false, true),
                (group.first_loop, true, true),
            ] {
                let (chain, chain_degree) = walk(stores, node.id, first);
                for id in &chain {
                    let r = relationships.iter().find(|r| r.id == *id).unwrap();
                    assert_eq!(r.rel_type, group.rel_type);
                    assert_eq!(r.first_node == node.id, outgoing);
                    assert_eq!(r.second_node == node.id, incoming);
                }
                if !(outgoing && incoming) && !chain.is_empty() {
                    assert_eq!(chain_degree, Some(chain.len() as u64));
                }
                typed.extend(chain);
            }
            assert!(!typed.is_empty());
            seen.extend(typed);
        }
        assert_eq!(&seen, ids, "relationships of dense node {}", node.id);
    }

    // groups are laid out by owning node
    let mut sorted = group_ids.clone();
    sorted.sort_unstable();
    assert_eq!(group_ids, sorted);
}

fn verify_counts(stores: &NeoStores, counts: &CountsStore) {
    let nodes: Vec<_> = stores
        .nodes
        .scan(0..stores.nodes.high_id())
        .unwrap()
        .into_iter()
        .filter(|n| n.in_use)
        .collect();
    assert_eq!(counts.node_count(ANY), nodes.len() as i64);

    let mut per_label: BTreeMap<u32, i64> = BTreeMap::new();
    for node in &nodes {
        for label in get_labels(node, &stores.labels).unwrap() {
            *per_label.entry(label).or_default() += 1;
        }
    }
    for (label, count) in &per_label {
        assert_eq!(counts.node_count(*label as i64), *count, "label {}", label);
    }

    let relationships = in_use_relationships(stores);
    let total = relationships.len() as i64;
    assert_eq!(counts.relationship_count(ANY, ANY, ANY), total);
    let by_type: i64 = (0..6).map(|t| counts.relationship_count(ANY, t, ANY)).sum();
    assert_eq!(by_type, total);
}

fn import(config: ImportConfig, input: &InMemoryInput) -> (TempDir, ImportSummary) {
    let dir = TempDir::new().unwrap();
    let summary = importer(config).import_into(dir.path(), input).unwrap();
    (dir, summary)
}

#[test]
fn test_import_links_chains_and_groups() {
    let input = random_graph(7, 300, 3_000);
    let config = config();
    let (dir, summary) = import(config.clone(), &input);

    assert_eq!(summary.nodes, 300);
    assert_eq!(summary.relationships, 3_000);
    assert!(summary.dense_nodes >= 5);
    assert_eq!(summary.linking_rounds, 1);
    assert_eq!(summary.bad_entries, 0);

    let stores = NeoStores::open(dir.path(), &config.store_settings()).unwrap();
    verify_store(&stores);
    verify_counts(&stores, &CountsStore::open(dir.path()).unwrap());
}

#[test]
fn test_tight_memory_splits_rounds_and_passes() {
    let input = random_graph(11, 200, 2_000);
    let config = config().with_max_memory(1);
    let (dir, summary) = import(config.clone(), &input);

    assert_eq!(summary.linking_rounds, 6, "one type per round");
    assert!(summary.defragmentation_passes >= 2);
    assert_eq!(summary.defragmentation_passes as u64, summary.dense_nodes);

    let stores = NeoStores::open(dir.path(), &config.store_settings()).unwrap();
    verify_store(&stores);
    verify_counts(&stores, &CountsStore::open(dir.path()).unwrap());
}

#[test]
fn test_duplicates_and_violations_deleted() {
    let name = |n: &str| vec![(1, PropertyValue::from(n.repeat(40)))];
    let nodes = vec![
        InputNode {
            input_id: "a".to_string(),
            labels: vec![0],
            properties: name("alice"),
        },
        InputNode {
            input_id: "b".to_string(),
            labels: vec![0],
            properties: name("bob"),
        },
        InputNode {
            input_id: "a".to_string(),
            labels: (0..9).collect(),
            properties: name("again"),
        },
        InputNode {
            input_id: "c".to_string(),
            labels: vec![0],
            properties: name("bob"),
        },
    ];
    let relationships = vec![
        InputRelationship {
            start: "a".to_string(),
            end: "b".to_string(),
            rel_type: 0,
            properties: Vec::new(),
        },
        InputRelationship {
            start: "c".to_string(),
            end: "a".to_string(),
            rel_type: 0,
            properties: Vec::new(),
        },
    ];
    let unique_name = SchemaRule::Constraint(ConstraintRule {
        id: 0,
        descriptor: SchemaDescriptor::for_label(0, &[1]),
        kind: ConstraintKind::Unique { owned_index: None },
        name: "unique_name".to_string(),
    });

    let dir = TempDir::new().unwrap();
    let config = config();
    let stores = NeoStores::open(dir.path(), &config.store_settings()).unwrap();
    let input = InMemoryInput::new(nodes, relationships);
    let (summary, counts) = importer(config)
        .with_schema(vec![unique_name])
        .import(&stores, &input)
        .unwrap();

    // node 2 repeats input id "a", node 3 repeats the name of node 1
    assert_eq!(summary.nodes, 2);
    assert_eq!(summary.nodes_deleted, 2);
    assert_eq!(summary.relationships, 1);
    assert_eq!(summary.relationships_deleted, 1);
    assert_eq!(summary.bad_entries, 3);
    assert_eq!(counts.node_count(ANY), 2);

    for deleted in [2, 3] {
        let node = stores.nodes.get_record(deleted).unwrap();
        assert!(!node.in_use);
    }
    for kept in [0, 1] {
        let node = stores.nodes.get_record(kept).unwrap();
        assert!(node.in_use);
        assert_eq!(property_chain(&stores.properties, node.next_prop).unwrap().len(), 1);
    }
    let in_use_properties = stores
        .properties
        .scan(0..stores.properties.high_id())
        .unwrap()
        .into_iter()
        .filter(|p| p.in_use)
        .count();
    assert_eq!(in_use_properties, 2);
    let in_use_labels = stores
        .labels
        .scan(0..stores.labels.high_id())
        .unwrap()
        .into_iter()
        .filter(|l| l.in_use)
        .count();
    assert_eq!(in_use_labels, 0);

    let a = stores.nodes.get_record(0).unwrap();
    let (chain, degree) = walk(&stores, 0, a.next_rel);
    assert_eq!(chain.len(), 1);
    assert_eq!(degree, Some(1));
    assert_eq!(
        stores.read_properties(a.next_prop).unwrap(),
        vec![(1, PropertyValue::String("alice".repeat(40)))]
    );
}
