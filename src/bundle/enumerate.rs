//! Generation and component enumeration
//!
//! Both passes are iterative depth-first walks that keep their stacks inside
//! the node records themselves. While a node is on the walk, its component
//! and generation fields hold scratch markers at or above [`MARKER_BASE`];
//! finished values are always below it.
//!
//! - **component** marker: `MARKER_BASE` for a walk root, otherwise
//!   `MARKER_BASE + 1 + parent index`
//! - **generation** marker: `MARKER_BASE + k`, the next edge to follow
//!
//! A generation walk reaching a node whose generation is still a marker has
//! found a cycle.

use tracing::debug;

use super::node::{self, NodeArray};
use super::target::Targets;
use super::{Bundle, BundleState, EdgeArray, MAX_NODES};
use crate::error::{HdagError, Result};

/// Smallest scratch value; node count is always below it
pub const MARKER_BASE: u32 = 1 << 31;

/// Whether a component or generation value is a finished one
#[inline]
pub fn is_final_value(value: u32) -> bool {
    value < MARKER_BASE
}

#[inline]
fn parent_marker(parent: Option<usize>) -> u32 {
    match parent {
        None => MARKER_BASE,
        Some(idx) => MARKER_BASE + 1 + idx as u32,
    }
}

#[inline]
fn marker_parent(marker: u32) -> Option<usize> {
    debug_assert!(!is_final_value(marker));
    match marker - MARKER_BASE {
        0 => None,
        offset => Some(offset as usize - 1),
    }
}

#[inline]
fn cursor_marker(k: usize) -> u32 {
    MARKER_BASE + k as u32
}

#[inline]
fn marker_cursor(marker: u32) -> usize {
    debug_assert!(!is_final_value(marker));
    (marker - MARKER_BASE) as usize
}

/// Node records plus the edge table of a compacted bundle
struct Graph<'a> {
    nodes: &'a mut [u8],
    hash_len: usize,
    extra_edges: EdgeArray<'a>,
}

impl<'a> Graph<'a> {
    fn len(&self) -> usize {
        self.nodes.len() / node::node_size(self.hash_len)
    }

    fn read(&self) -> NodeArray<'_> {
        NodeArray::new(&*self.nodes, self.hash_len)
    }

    fn component(&self, idx: usize) -> u32 {
        self.read().get(idx).component()
    }

    fn generation(&self, idx: usize) -> u32 {
        self.read().get(idx).generation()
    }

    fn set_component(&mut self, idx: usize, value: u32) {
        node::get_mut(&mut *self.nodes, self.hash_len, idx).set_component(value);
    }

    fn set_generation(&mut self, idx: usize, value: u32) {
        node::get_mut(&mut *self.nodes, self.hash_len, idx).set_generation(value);
    }

    fn targets(&self, idx: usize) -> Targets {
        self.read().get(idx).targets()
    }

    /// Node index of the `k`-th outgoing edge
    fn target(&self, idx: usize, k: usize) -> usize {
        match self.targets(idx) {
            Targets::One(a) => a as usize,
            Targets::Two(a, b) => [a, b][k] as usize,
            Targets::Indirect { first, .. } => self.extra_edges.get(first as usize + k) as usize,
            Targets::Unknown | Targets::Absent => unreachable!(),
        }
    }

    fn clear(&mut self) {
        for idx in 0..self.len() {
            self.set_component(idx, 0);
            self.set_generation(idx, 0);
        }
    }
}

/// Assign `generation = 1 + max(target generations)`, 1 for leaves
fn generations(graph: &mut Graph<'_>) -> Result<()> {
    for root in 0..graph.len() {
        if graph.generation(root) != 0 {
            continue;
        }
        graph.set_component(root, parent_marker(None));
        graph.set_generation(root, cursor_marker(0));
        let mut cur = root;
        loop {
            let k = marker_cursor(graph.generation(cur));
            if k < graph.targets(cur).count() {
                graph.set_generation(cur, cursor_marker(k + 1));
                let next = graph.target(cur, k);
                let generation = graph.generation(next);
                if generation == 0 {
                    graph.set_component(next, parent_marker(Some(cur)));
                    graph.set_generation(next, cursor_marker(0));
                    cur = next;
                } else if !is_final_value(generation) {
                    return Err(HdagError::GraphCycle);
                }
                continue;
            }

            let targets = graph.targets(cur).count();
            let max = (0..targets).map(|k| graph.generation(graph.target(cur, k))).max().unwrap_or(0);
            let parent = marker_parent(graph.component(cur));
            graph.set_generation(cur, max + 1);
            graph.set_component(cur, 0);
            match parent {
                Some(p) => cur = p,
                None => break,
            }
        }
    }
    Ok(())
}

/// Assign weakly-connected component ids starting from 1, walking edges
/// both ways. `inverse` holds the reversed edges of the same node set; its
/// component and generation fields hold the walk state.
fn components(graph: &mut Graph<'_>, inverse: &mut Graph<'_>) -> u32 {
    debug_assert_eq!(graph.len(), inverse.len());
    let mut next_id = 0u32;
    for root in 0..graph.len() {
        if graph.component(root) != 0 {
            continue;
        }
        next_id += 1;
        let id = next_id;
        graph.set_component(root, id);
        inverse.set_component(root, parent_marker(None));
        inverse.set_generation(root, cursor_marker(0));
        let mut cur = root;
        loop {
            let k = marker_cursor(inverse.generation(cur));
            let forward = graph.targets(cur).count();
            let backward = inverse.targets(cur).count();
            if k < forward + backward {
                inverse.set_generation(cur, cursor_marker(k + 1));
                let next = if k < forward { graph.target(cur, k) } else { inverse.target(cur, k - forward) };
                if graph.component(next) == 0 {
                    graph.set_component(next, id);
                    inverse.set_component(next, parent_marker(Some(cur)));
                    inverse.set_generation(next, cursor_marker(0));
                    cur = next;
                }
                continue;
            }
            match marker_parent(inverse.component(cur)) {
                Some(p) => cur = p,
                None => break,
            }
        }
    }
    next_id
}

impl Bundle {
    /// Compute generations for every node. Fails with `GraphCycle` when the
    /// graph has a cycle, leaving every component and generation zeroed.
    pub fn enumerate_generations(&mut self) -> Result<()> {
        assert!(self.state() >= BundleState::Compacted, "enumeration requires a compacted bundle");
        debug_assert!(self.node_count() < MAX_NODES);
        let hash_len = self.hash_len;
        let tables = self.tables_mut();
        let mut graph = Graph {
            nodes: &mut tables.nodes,
            hash_len,
            extra_edges: EdgeArray::Words(&tables.extra_edges),
        };
        graph.clear();
        if let Err(err) = generations(&mut graph) {
            graph.clear();
            return Err(err);
        }
        Ok(())
    }

    /// Compute component ids; generations must be assigned already
    pub fn enumerate_components(&mut self) -> Result<()> {
        let mut inverse = self.invert(true)?;
        let hash_len = self.hash_len;
        let tables = self.tables_mut();
        let inverse_tables = inverse.tables_mut();
        let mut graph = Graph {
            nodes: &mut tables.nodes,
            hash_len,
            extra_edges: EdgeArray::Words(&tables.extra_edges),
        };
        let mut reverse = Graph {
            nodes: &mut inverse_tables.nodes,
            hash_len: 0,
            extra_edges: EdgeArray::Words(&inverse_tables.extra_edges),
        };
        for idx in 0..graph.len() {
            graph.set_component(idx, 0);
        }
        let count = components(&mut graph, &mut reverse);
        debug!(components = count, "components enumerated");
        Ok(())
    }

    /// Generations, then components
    pub fn enumerate(&mut self) -> Result<()> {
        if self.state() >= BundleState::Enumerated {
            return Ok(());
        }
        self.enumerate_generations()?;
        self.enumerate_components()?;
        self.set_state(BundleState::Enumerated);
        Ok(())
    }
}
