use std::collections::{BTreeMap, BTreeSet};

use hdag::bundle::fanout::FANOUT_LEN;
use hdag::bundle::Targets;
use hdag::{Bundle, Database, HdagFile, ListNodeSeq, Pathname};
use proptest::prelude::*;

type Records = Vec<([u8; 4], Vec<[u8; 4]>)>;

/// A random DAG over byte-sized ids: edges only go from larger to smaller
/// ids, so the result is acyclic. Some targets are never sources.
fn arb_dag() -> impl Strategy<Value = Records> {
    prop::collection::btree_map(any::<u8>(), prop::collection::btree_set(any::<u8>(), 0..6), 0..40).prop_map(
        |adjacency| {
            adjacency
                .into_iter()
                .map(|(src, targets)| {
                    let targets = targets.into_iter().filter(|&t| t < src).map(id).collect();
                    (id(src), targets)
                })
                .collect()
        },
    )
}

/// Spreads ids across first bytes to exercise the fanout
fn id(v: u8) -> [u8; 4] {
    [v.wrapping_mul(37), 0, 0, v]
}

fn organize(records: &Records) -> Bundle {
    Bundle::organized_from_node_seq(&mut ListNodeSeq::from_records(4, records.clone())).unwrap()
}

fn edge_set(bundle: &Bundle) -> BTreeSet<(Vec<u8>, Vec<u8>)> {
    let mut edges = BTreeSet::new();
    for idx in 0..bundle.node_count() {
        for k in 0..bundle.targets_count(idx) {
            edges.insert((bundle.node(idx).hash().to_vec(), bundle.targets_node_hash(idx, k).to_vec()));
        }
    }
    edges
}

/// Weakly-connected component labels by union-find over node indexes
fn weak_components(bundle: &Bundle) -> Vec<usize> {
    fn find(parent: &mut Vec<usize>, x: usize) -> usize {
        let mut root = x;
        while parent[root] != root {
            root = parent[root];
        }
        parent[x] = root;
        root
    }
    let mut parent: Vec<usize> = (0..bundle.node_count()).collect();
    for idx in 0..bundle.node_count() {
        for k in 0..bundle.targets_count(idx) {
            let a = find(&mut parent, idx);
            let b = find(&mut parent, bundle.targets_node_idx(idx, k));
            parent[a] = b;
        }
    }
    (0..bundle.node_count()).map(|x| find(&mut parent, x)).collect()
}

proptest! {
    #[test]
    fn prop_organize_sorts_dedups_and_fans_out(records in arb_dag()) {
        let bundle = organize(&records);
        let hashes: Vec<&[u8]> = bundle.iter_nodes().map(|n| n.hash()).collect();
        prop_assert!(hashes.windows(2).all(|w| w[0] < w[1]));

        if bundle.node_count() == 0 {
            prop_assert!(bundle.nodes_fanout().is_empty());
        } else {
            prop_assert_eq!(bundle.nodes_fanout().len(), FANOUT_LEN);
            for b in 0..FANOUT_LEN {
                let expected = hashes.iter().filter(|h| h[0] as usize <= b).count();
                prop_assert_eq!(bundle.nodes_fanout()[b] as usize, expected);
            }
        }
        prop_assert!(bundle.target_hashes().is_empty());
        bundle.check().unwrap();
    }

    #[test]
    fn prop_edges_survive_organize(records in arb_dag()) {
        let bundle = organize(&records);
        let expected: BTreeSet<(Vec<u8>, Vec<u8>)> = records
            .iter()
            .flat_map(|(src, targets)| targets.iter().map(move |t| (src.to_vec(), t.to_vec())))
            .collect();
        prop_assert_eq!(edge_set(&bundle), expected);

        let sources: BTreeSet<[u8; 4]> = records.iter().map(|(src, _)| *src).collect();
        for node in bundle.iter_nodes() {
            let known = sources.iter().any(|s| s.as_slice() == node.hash());
            prop_assert_eq!(node.is_known(), known);
            prop_assert_eq!(bundle.unknown_hashes().contains(node.hash()), !known);
        }
    }

    #[test]
    fn prop_enumeration_is_total_and_correct(records in arb_dag()) {
        let bundle = organize(&records);
        for idx in 0..bundle.node_count() {
            let node = bundle.node(idx);
            prop_assert!(node.component() > 0);
            prop_assert!(node.generation() > 0);
            if bundle.targets_count(idx) == 0 {
                prop_assert_eq!(node.generation(), 1);
            }
            for k in 0..bundle.targets_count(idx) {
                let target = bundle.node(bundle.targets_node_idx(idx, k));
                prop_assert!(node.generation() > target.generation());
            }
        }

        let weak = weak_components(&bundle);
        for a in 0..bundle.node_count() {
            for b in a + 1..bundle.node_count() {
                prop_assert_eq!(
                    weak[a] == weak[b],
                    bundle.node(a).component() == bundle.node(b).component()
                );
            }
        }
    }

    #[test]
    fn prop_invert_twice_restores_edges(records in arb_dag()) {
        let bundle = organize(&records);
        let inverse = bundle.invert(false).unwrap();
        let reverse: BTreeSet<(Vec<u8>, Vec<u8>)> = edge_set(&bundle).into_iter().map(|(a, b)| (b, a)).collect();
        prop_assert_eq!(edge_set(&inverse), reverse);

        let restored = inverse.invert(false).unwrap();
        prop_assert_eq!(edge_set(&restored), edge_set(&bundle));
        for idx in 0..bundle.node_count() {
            prop_assert_eq!(restored.node(idx).hash(), bundle.node(idx).hash());
            prop_assert_eq!(restored.targets_count(idx), bundle.targets_count(idx));
        }
    }

    #[test]
    fn prop_file_round_trip(records in arb_dag()) {
        let bundle = organize(&records);
        let file = bundle.to_file(Pathname::Anonymous, 0o644).unwrap();
        let filed = Bundle::from_file(file);
        filed.check().unwrap();
        prop_assert_eq!(filed.nodes().len(), bundle.nodes().len());
        for idx in 0..bundle.node_count() {
            prop_assert_eq!(filed.node(idx).hash(), bundle.node(idx).hash());
            prop_assert_eq!(filed.node(idx).targets(), bundle.node(idx).targets());
            prop_assert_eq!(filed.node(idx).generation(), bundle.node(idx).generation());
            prop_assert_eq!(filed.node(idx).component(), bundle.node(idx).component());
        }
        prop_assert_eq!(filed.nodes_fanout(), bundle.nodes_fanout());
        prop_assert_eq!(filed.extra_edges().to_vec(), bundle.extra_edges().to_vec());
        prop_assert_eq!(filed.unknown_hashes().as_bytes(), bundle.unknown_hashes().as_bytes());
    }

    #[test]
    fn prop_merge_is_idempotent(records in arb_dag()) {
        let db = Database::create(None, false, 0o755, 4).unwrap();
        db.merge(&mut ListNodeSeq::from_records(4, records.clone())).unwrap();
        let snapshot = |db: &Database| {
            db.with_bundles(|bundles| bundles.iter().map(edge_set).collect::<Vec<_>>())
        };
        let once = snapshot(&db);
        let stats = db.merge(&mut ListNodeSeq::from_records(4, records.clone())).unwrap();
        prop_assert_eq!(stats.committed, 0);
        prop_assert_eq!(snapshot(&db), once);
    }
}

#[test]
fn test_inline_and_indirect_targets() {
    let mut records: Records = Vec::new();
    let mut adjacency: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
    adjacency.insert(10, vec![1]);
    adjacency.insert(11, vec![1, 2]);
    adjacency.insert(12, vec![1, 2, 3]);
    for (src, targets) in adjacency {
        records.push((id(src), targets.into_iter().map(id).collect()));
    }
    let bundle = organize(&records);
    let kinds: Vec<Targets> = [10u8, 11, 12]
        .iter()
        .map(|&v| bundle.node(bundle.find_node_idx(&id(v)).unwrap()).targets())
        .collect();
    assert!(matches!(kinds[0], Targets::One(_)));
    assert!(matches!(kinds[1], Targets::Two(_, _)));
    assert!(matches!(kinds[2], Targets::Indirect { first: 0, last: 2 }));
}
