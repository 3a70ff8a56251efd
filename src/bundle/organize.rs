//! Building and canonicalizing bundles: sort, dedup, fanout, compact, deflate

use rayon::slice::ParallelSliceMut;
use tracing::{debug, info};

use super::node::{self, NodeArray};
use super::target::{Targets, MAX_INDIRECT_IDX};
use super::{fanout, Bundle, BundleState, Tables, MAX_NODES};
use crate::db::context::Context;
use crate::error::{HdagError, Result};
use crate::hash::{self, HashArray};
use crate::seq::{NodeSeq, Seq};

/// Append a hash list to a side table, returning the span covering it
fn append_span(table: &mut Vec<u8>, hash_len: usize, hashes: &[&[u8]]) -> Result<Targets> {
    let start = table.len() / hash_len;
    let end = start + hashes.len();
    if end > MAX_INDIRECT_IDX as usize + 1 {
        return Err(HdagError::out_of_memory());
    }
    for h in hashes {
        table.extend_from_slice(h);
    }
    Ok(Targets::span(start, end))
}

/// Target hashes referenced by a raw node
fn raw_target_hashes<'a>(targets: Targets, table: HashArray<'a>, out: &mut Vec<&'a [u8]>) {
    debug_assert!(
        !matches!(targets, Targets::One(_) | Targets::Two(..)),
        "direct targets before compaction"
    );
    if let Some(range) = targets.indirect_range() {
        out.extend(table.slice(range.start, range.end).iter());
    }
}

/// Push the records of `seq` onto raw tables
fn append_records<'a, S: NodeSeq<'a> + ?Sized>(tables: &mut Tables, hash_len: usize, seq: &mut S) -> Result<()> {
    let mut count = tables.nodes.len() / node::node_size(hash_len);
    while let Some(mut item) = seq.next()? {
        if item.hash.len() != hash_len {
            return Err(HdagError::InvalidFormat("node hash length mismatch".into()));
        }
        let start = tables.target_hashes.len() / hash_len;
        while let Some(target) = item.targets.next()? {
            if target.len() != hash_len {
                return Err(HdagError::InvalidFormat("target hash length mismatch".into()));
            }
            tables.target_hashes.extend_from_slice(&target);
            node::push(&mut tables.nodes, &target, Targets::Unknown);
            count += 1;
        }
        let end = tables.target_hashes.len() / hash_len;
        if end > MAX_INDIRECT_IDX as usize + 1 {
            return Err(HdagError::out_of_memory());
        }
        node::push(&mut tables.nodes, &item.hash, Targets::span(start, end));
        count += 1;
        if count >= MAX_NODES {
            return Err(HdagError::out_of_memory());
        }
    }
    Ok(())
}

impl Bundle {
    /// Append every record of a node sequence to a raw bundle.
    ///
    /// Each target hash is stored in `target_hashes` and also added as an
    /// unknown node, so every referenced hash exists as a node. If the
    /// sequence fails, the records appended by this call are removed again.
    pub fn append_node_seq<'a, S: NodeSeq<'a> + ?Sized>(&mut self, seq: &mut S) -> Result<()> {
        assert_eq!(self.state(), BundleState::Raw, "can only append to a raw bundle");
        let hash_len = self.hash_len;
        if seq.hash_len() != hash_len {
            return Err(HdagError::InvalidFormat(format!(
                "sequence hash length {} does not match bundle hash length {}",
                seq.hash_len(),
                hash_len
            )));
        }
        if !hash::is_valid_len(hash_len) {
            return Err(HdagError::InvalidFormat(format!("invalid hash length {}", hash_len)));
        }
        let tables = self.tables_mut();
        let (nodes_len, target_hashes_len) = (tables.nodes.len(), tables.target_hashes.len());
        let result = append_records(tables, hash_len, seq);
        if result.is_err() {
            tables.nodes.truncate(nodes_len);
            tables.target_hashes.truncate(target_hashes_len);
        }
        result
    }

    /// Raw bundle holding every record of a node sequence
    pub fn from_node_seq<'a, S: NodeSeq<'a> + ?Sized>(seq: &mut S) -> Result<Self> {
        if !hash::is_valid_len(seq.hash_len()) {
            return Err(HdagError::InvalidFormat(format!("invalid hash length {}", seq.hash_len())));
        }
        let mut bundle = Bundle::new(seq.hash_len());
        bundle.append_node_seq(seq)?;
        debug!(nodes = bundle.node_count(), "bundle ingested");
        Ok(bundle)
    }

    /// Sort nodes by hash and collapse runs of equal hashes into one node.
    ///
    /// Unknown duplicates vanish when a known duplicate exists. With
    /// `merge_targets` the target lists of known duplicates are unioned;
    /// otherwise they must all be equal or the call fails with
    /// `NodeConflict`. Known nodes are also checked against every known match
    /// in `ctx`. The bundle is left untouched on failure.
    pub fn sort_and_dedup(&mut self, merge_targets: bool, ctx: &Context<'_>) -> Result<()> {
        if self.state() >= BundleState::SortedDeduped {
            return Ok(());
        }
        let hash_len = self.hash_len;
        assert!(hash_len > 0, "cannot sort a hashless bundle");

        let (new_nodes, new_targets) = {
            let tables = self.tables();
            let nodes = NodeArray::new(&tables.nodes, hash_len);
            let target_hashes = HashArray::new(&tables.target_hashes, hash_len);
            let count = nodes.len();

            let mut order: Vec<u32> = (0..count as u32).collect();
            order.par_sort_by(|&a, &b| nodes.hash(a as usize).cmp(nodes.hash(b as usize)));

            let mut new_nodes = Vec::with_capacity(tables.nodes.len());
            let mut new_targets = Vec::with_capacity(tables.target_hashes.len());
            let mut list: Vec<&[u8]> = Vec::new();
            let mut other: Vec<&[u8]> = Vec::new();

            let mut start = 0;
            while start < count {
                let hash = nodes.hash(order[start] as usize);
                let mut end = start + 1;
                while end < count && nodes.hash(order[end] as usize) == hash {
                    end += 1;
                }

                let mut known = false;
                list.clear();
                for &idx in &order[start..end] {
                    let targets = nodes.get(idx as usize).targets();
                    if !targets.is_known() {
                        continue;
                    }
                    if merge_targets {
                        raw_target_hashes(targets, target_hashes, &mut list);
                    } else if !known {
                        raw_target_hashes(targets, target_hashes, &mut list);
                        hash::sort_and_dedup(&mut list);
                    } else {
                        other.clear();
                        raw_target_hashes(targets, target_hashes, &mut other);
                        hash::sort_and_dedup(&mut other);
                        if other != list {
                            return Err(HdagError::NodeConflict(hash::to_hex(hash)));
                        }
                    }
                    known = true;
                }

                let targets = if known {
                    hash::sort_and_dedup(&mut list);
                    if ctx.conflicts(hash, &list) {
                        return Err(HdagError::NodeConflict(hash::to_hex(hash)));
                    }
                    append_span(&mut new_targets, hash_len, &list)?
                } else {
                    Targets::Unknown
                };
                node::push(&mut new_nodes, hash, targets);
                start = end;
            }
            (new_nodes, new_targets)
        };

        let tables = self.tables_mut();
        tables.nodes = new_nodes;
        tables.target_hashes = new_targets;
        self.set_state(BundleState::SortedDeduped);
        Ok(())
    }

    /// Fill the fanout from the sorted node array
    pub fn fanout_fill(&mut self) {
        if self.state() >= BundleState::FannedOut {
            return;
        }
        assert!(self.state() >= BundleState::SortedDeduped, "fanout requires sorted nodes");
        let hash_len = self.hash_len;
        let tables = self.tables_mut();
        tables.nodes_fanout = fanout::fill(&NodeArray::new(&tables.nodes, hash_len), hash_len);
        self.set_state(BundleState::FannedOut);
    }

    /// Turn hash-referencing targets into node indexes.
    ///
    /// One or two targets are stored inline, more go to `extra_edges`.
    /// Hashes of unknown nodes are collected into `unknown_hashes` and
    /// `target_hashes` is released.
    pub fn compact(&mut self) -> Result<()> {
        if self.state() >= BundleState::Compacted {
            return Ok(());
        }
        assert!(self.state() >= BundleState::SortedDeduped, "compaction requires sorted nodes");
        self.fanout_fill();
        let hash_len = self.hash_len;

        let (compacted, extra_edges, unknown_hashes) = {
            let view = self.tables().view(hash_len);
            let count = view.nodes.len();
            let mut compacted = Vec::with_capacity(count);
            let mut extra_edges: Vec<u32> = Vec::new();
            let mut unknown_hashes = Vec::new();
            let mut list = Vec::new();

            for idx in 0..count {
                let node = view.nodes.get(idx);
                let targets = node.targets();
                if !targets.is_known() {
                    unknown_hashes.extend_from_slice(node.hash());
                    compacted.push(Targets::Unknown);
                    continue;
                }
                list.clear();
                for k in 0..targets.count() {
                    list.push(view.targets_node_idx(idx, k) as u32);
                }
                let new = match list.as_slice() {
                    [] => Targets::Absent,
                    [a] => Targets::One(*a),
                    [a, b] => Targets::Two(*a, *b),
                    _ => {
                        let start = extra_edges.len();
                        if start + list.len() > MAX_INDIRECT_IDX as usize + 1 {
                            return Err(HdagError::out_of_memory());
                        }
                        extra_edges.extend_from_slice(&list);
                        Targets::span(start, extra_edges.len())
                    }
                };
                compacted.push(new);
            }
            debug_assert!(count == 0 || unknown_hashes.len() / hash_len < count);
            (compacted, extra_edges, unknown_hashes)
        };

        let tables = self.tables_mut();
        for (idx, targets) in compacted.into_iter().enumerate() {
            node::get_mut(&mut tables.nodes, hash_len, idx).set_targets(targets);
        }
        tables.target_hashes = Vec::new();
        tables.extra_edges = extra_edges;
        tables.unknown_hashes = unknown_hashes;
        self.set_state(BundleState::Compacted);
        Ok(())
    }

    /// Release spare container capacity
    pub fn deflate(&mut self) {
        if self.is_filed() {
            return;
        }
        let tables = self.tables_mut();
        tables.nodes.shrink_to_fit();
        tables.nodes_fanout.shrink_to_fit();
        tables.target_hashes.shrink_to_fit();
        tables.extra_edges.shrink_to_fit();
        tables.unknown_hashes.shrink_to_fit();
        if self.state() == BundleState::Enumerated {
            self.set_state(BundleState::Organized);
        }
    }

    /// Run the whole canonicalization pipeline with no outside context
    pub fn organize(&mut self) -> Result<()> {
        self.organize_with(&Context::empty())
    }

    /// Sort and dedup (merging duplicate targets), fill the fanout, compact,
    /// enumerate and deflate. Idempotent. On failure the bundle keeps its
    /// previous contents.
    pub fn organize_with(&mut self, ctx: &Context<'_>) -> Result<()> {
        if self.is_organized() {
            return Ok(());
        }
        let mut work = Bundle::from_tables(self.hash_len, self.tables().clone(), self.state());
        work.sort_and_dedup(true, ctx)?;
        work.fanout_fill();
        work.compact()?;
        work.enumerate()?;
        work.deflate();
        info!(
            nodes = work.node_count(),
            extra_edges = work.extra_edges().len(),
            unknown = work.unknown_hashes().len(),
            "bundle organized"
        );
        *self = work;
        Ok(())
    }
}
