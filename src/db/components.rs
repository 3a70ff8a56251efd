//! Cross-bundle component graph
//!
//! Every (bundle, component) pair is a *piece*. Pieces become nodes of a
//! separate bundle, hashed by a 16-byte pseudohash of a representative node:
//!
//! `splitmix64(bundle_idx << 32 | node_idx) ++ bundle_idx ++ node_idx`,
//! all big-endian so byte order matches numeric order.
//!
//! Two pieces are linked when a hash unknown in one is present in the
//! other. Links point from the larger pseudohash to the smaller, so the graph
//! is acyclic, and its components are the database-wide components.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::bundle::Bundle;
use crate::error::Result;
use crate::seq::ListNodeSeq;

pub const PSEUDOHASH_LEN: usize = 16;

pub type Pseudohash = [u8; PSEUDOHASH_LEN];

pub fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

pub fn pseudohash(bundle_idx: u32, node_idx: u32) -> Pseudohash {
    let mut out = [0u8; PSEUDOHASH_LEN];
    let mixed = splitmix64(((bundle_idx as u64) << 32) | node_idx as u64);
    out[0..8].copy_from_slice(&mixed.to_be_bytes());
    out[8..12].copy_from_slice(&bundle_idx.to_be_bytes());
    out[12..16].copy_from_slice(&node_idx.to_be_bytes());
    out
}

/// Organized component graph of a bundle list
#[derive(Debug)]
pub struct Components {
    bundle: Bundle,
    /// Per bundle, per component id - 1: first node index in that component
    representatives: Vec<Vec<u32>>,
}

impl Components {
    /// Empty graph for an empty database
    pub fn empty() -> Result<Self> {
        Self::collect(&[])
    }

    /// Build the component graph from scratch
    pub fn collect(bundles: &[&Bundle]) -> Result<Self> {
        let mut representatives = Vec::with_capacity(bundles.len());
        for bundle in bundles {
            let mut reps: Vec<u32> = Vec::new();
            for (idx, node) in bundle.iter_nodes().enumerate() {
                let component = node.component() as usize;
                debug_assert!(component > 0, "bundle is not enumerated");
                if reps.len() < component {
                    reps.resize(component, u32::MAX);
                }
                if reps[component - 1] == u32::MAX {
                    reps[component - 1] = idx as u32;
                }
            }
            representatives.push(reps);
        }

        let piece = |b: usize, node_idx: usize| -> Pseudohash {
            let component = bundles[b].node(node_idx).component() as usize;
            pseudohash(b as u32, representatives[b][component - 1])
        };

        let mut links: BTreeMap<Pseudohash, BTreeSet<Pseudohash>> = BTreeMap::new();
        for (b, reps) in representatives.iter().enumerate() {
            for &rep in reps {
                links.entry(pseudohash(b as u32, rep)).or_default();
            }
        }
        for (b, bundle) in bundles.iter().enumerate() {
            for hash in bundle.unknown_hashes().iter() {
                let Some(idx) = bundle.find_node_idx(hash) else { continue };
                let from = piece(b, idx);
                for (other_b, other) in bundles.iter().enumerate() {
                    if other_b == b {
                        continue;
                    }
                    if let Some(other_idx) = other.find_node_idx(hash) {
                        let to = piece(other_b, other_idx);
                        let (hi, lo) = if from > to { (from, to) } else { (to, from) };
                        if hi != lo {
                            links.entry(hi).or_default().insert(lo);
                        }
                    }
                }
            }
        }

        let mut seq = ListNodeSeq::new(PSEUDOHASH_LEN);
        for (hash, targets) in &links {
            seq.push(hash, targets.iter());
        }
        let bundle = Bundle::organized_from_node_seq(&mut seq)?;
        debug!(pieces = links.len(), "components collected");
        Ok(Self { bundle, representatives })
    }

    /// The organized component graph
    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub fn piece_count(&self) -> usize {
        self.bundle.node_count()
    }

    /// Database-wide component id of a node
    pub fn component_of(&self, bundle: &Bundle, bundle_idx: usize, node_idx: usize) -> Option<u32> {
        let component = bundle.node(node_idx).component() as usize;
        let rep = *self.representatives.get(bundle_idx)?.get(component.checked_sub(1)?)?;
        let piece = self.bundle.find_node_idx(&pseudohash(bundle_idx as u32, rep))?;
        Some(self.bundle.node(piece).component())
    }

    /// Number of database-wide components
    pub fn count(&self) -> usize {
        self.bundle.iter_nodes().map(|n| n.component()).max().unwrap_or(0) as usize
    }
}
