//! Edge reversal

use super::node;
use super::target::{Targets, MAX_INDIRECT_IDX};
use super::{Bundle, BundleState, Tables};
use crate::error::{HdagError, Result};

impl Bundle {
    /// Build a bundle with the same node order and every edge reversed.
    ///
    /// The result is compacted: incoming edges of each node are listed in
    /// ascending source order, inline when there are at most two. Unknown
    /// nodes become known. With `hashless` the node hashes are dropped; the
    /// result can then only be walked, not searched.
    pub fn invert(&self, hashless: bool) -> Result<Bundle> {
        assert!(self.state() >= BundleState::Compacted, "inversion requires a compacted bundle");
        let view = self.view();
        let count = view.nodes.len();
        let hash_len = if hashless { 0 } else { self.hash_len };

        let mut nodes = Vec::with_capacity(count * node::node_size(hash_len));
        for src in view.nodes.iter() {
            node::push(&mut nodes, if hashless { &[][..] } else { src.hash() }, Targets::Absent);
        }

        // Incoming edge counts live in the generation field until placement
        // finishes.
        let mut incoming = vec![0u32; count];
        for idx in 0..count {
            for k in 0..view.nodes.get(idx).targets().count() {
                incoming[view.targets_node_idx(idx, k)] += 1;
            }
        }
        let mut total = 0usize;
        for (idx, &c) in incoming.iter().enumerate() {
            let mut record = node::get_mut(&mut nodes, hash_len, idx);
            record.set_generation(c);
            if c > 2 {
                let start = total;
                total += c as usize;
                if total > MAX_INDIRECT_IDX as usize + 1 {
                    return Err(HdagError::out_of_memory());
                }
                record.set_targets(Targets::span(start, total));
            }
        }
        drop(incoming);

        let mut extra_edges = vec![0u32; total];
        for src in 0..count {
            for k in 0..view.nodes.get(src).targets().count() {
                let dst = view.targets_node_idx(src, k);
                let mut record = node::get_mut(&mut nodes, hash_len, dst);
                let remaining = record.as_node().generation();
                let targets = record.as_node().targets();
                match targets {
                    Targets::Indirect { last, .. } => {
                        extra_edges[last as usize + 1 - remaining as usize] = src as u32;
                    }
                    Targets::Absent => record.set_targets(Targets::One(src as u32)),
                    Targets::One(a) => record.set_targets(Targets::Two(a, src as u32)),
                    targets => unreachable!("unexpected inverse targets {:?}", targets),
                }
                record.set_generation(remaining - 1);
            }
        }

        let nodes_fanout = if hashless { Vec::new() } else { view.nodes_fanout.to_vec() };
        Ok(Bundle::from_tables(
            hash_len,
            Tables { nodes, nodes_fanout, target_hashes: Vec::new(), extra_edges, unknown_hashes: Vec::new() },
            BundleState::Compacted,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::ListNodeSeq;

    fn h(v: u32) -> [u8; 4] {
        v.to_be_bytes()
    }

    fn organized(records: Vec<([u8; 4], Vec<[u8; 4]>)>) -> Bundle {
        Bundle::organized_from_node_seq(&mut ListNodeSeq::from_records(4, records)).unwrap()
    }

    fn edges(bundle: &Bundle) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for idx in 0..bundle.node_count() {
            for k in 0..bundle.targets_count(idx) {
                out.push((idx, bundle.targets_node_idx(idx, k)));
            }
        }
        out.sort_unstable();
        out
    }

    #[test]
    fn test_invert_reverses_edges() {
        let bundle = organized(vec![(h(1), vec![h(2), h(3)]), (h(2), vec![h(3)])]);
        let inverse = bundle.invert(false).unwrap();
        assert_eq!(inverse.state(), BundleState::Compacted);
        assert!(inverse.unknown_hashes().is_empty());
        assert_eq!(inverse.find_node_idx(&h(3)), Some(2));

        let mut reversed: Vec<(usize, usize)> = edges(&bundle).into_iter().map(|(a, b)| (b, a)).collect();
        reversed.sort_unstable();
        assert_eq!(edges(&inverse), reversed);
        assert_eq!(inverse.targets(2), Targets::Two(0, 1));
        assert!(inverse.iter_nodes().all(|n| n.generation() == 0));
    }

    #[test]
    fn test_invert_many_sources_use_extra_edges() {
        let records: Vec<([u8; 4], Vec<[u8; 4]>)> = (1..=5).map(|v| (h(v), vec![h(100)])).collect();
        let bundle = organized(records);
        let inverse = bundle.invert(true).unwrap();
        assert!(inverse.is_hashless());
        assert!(inverse.nodes_fanout().is_empty());
        assert_eq!(inverse.targets(5), Targets::Indirect { first: 0, last: 4 });
        assert_eq!(inverse.extra_edges().to_vec(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_double_inversion_restores_edges() {
        let bundle = organized(vec![
            (h(1), vec![h(2), h(3), h(4)]),
            (h(2), vec![h(4)]),
            (h(3), vec![h(4)]),
            (h(5), vec![h(4)]),
        ]);
        let twice = bundle.invert(false).unwrap().invert(false).unwrap();
        assert_eq!(edges(&twice), edges(&bundle));
        for idx in 0..bundle.node_count() {
            assert_eq!(twice.node(idx).hash(), bundle.node(idx).hash());
        }
    }
}
