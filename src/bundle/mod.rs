//! In-memory hash DAG bundles
//!
//! A bundle owns five containers:
//!
//! - **nodes**: packed node records, sorted by hash once organized
//! - **nodes_fanout**: 256 running counts over the first hash byte
//! - **target_hashes**: target hashes referenced by indirect spans before compaction
//! - **extra_edges**: node indexes referenced by indirect spans after compaction
//! - **unknown_hashes**: sorted hashes of every node with unknown targets
//!
//! The containers are either owned heap buffers or read-only views into the
//! mapping of the file the bundle was filed into.

pub mod fanout;
pub mod node;
pub mod target;

mod enumerate;
mod invert;
mod organize;

use std::borrow::Cow;

use crate::db::context::Context;
use crate::error::{HdagError, Result};
use crate::hash::{self, HashArray};
use crate::seq::{HashSeq, NodeItem, NodeSeq, Seq};
use crate::storage::file::{FileContents, HdagFile, Pathname};

pub use enumerate::{is_final_value, MARKER_BASE};
pub use node::{Node, NodeArray};
pub use target::{Target, Targets};

/// Node count must stay strictly below this
pub const MAX_NODES: usize = 1 << 31;

/// Canonicalization progress; every state implies the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BundleState {
    /// Built from a node sequence: unsorted, duplicated, hash targets
    Raw,
    SortedDeduped,
    FannedOut,
    /// Targets are node indexes; `target_hashes` is empty
    Compacted,
    /// Every node has nonzero component and generation
    Enumerated,
    /// Enumerated and deflated; the only state that can be filed
    Organized,
}

/// Read-only array of 32-bit node indexes, owned or mapped
#[derive(Debug, Clone, Copy)]
pub enum EdgeArray<'a> {
    Words(&'a [u32]),
    /// Little-endian words inside a file mapping
    Bytes(&'a [u8]),
}

impl<'a> EdgeArray<'a> {
    pub fn len(&self) -> usize {
        match self {
            EdgeArray::Words(words) => words.len(),
            EdgeArray::Bytes(bytes) => bytes.len() / 4,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> u32 {
        match self {
            EdgeArray::Words(words) => words[idx],
            EdgeArray::Bytes(bytes) => {
                let at = idx * 4;
                u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + 'a {
        let this = *self;
        (0..this.len()).map(move |idx| this.get(idx))
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }
}

/// Owned container storage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Tables {
    pub nodes: Vec<u8>,
    pub nodes_fanout: Vec<u32>,
    pub target_hashes: Vec<u8>,
    pub extra_edges: Vec<u32>,
    pub unknown_hashes: Vec<u8>,
}

impl Tables {
    pub fn view(&self, hash_len: usize) -> View<'_> {
        View {
            hash_len,
            nodes: NodeArray::new(&self.nodes, hash_len),
            nodes_fanout: &self.nodes_fanout,
            target_hashes: HashArray::new(&self.target_hashes, hash_len),
            extra_edges: EdgeArray::Words(&self.extra_edges),
            unknown_hashes: HashArray::new(&self.unknown_hashes, hash_len),
        }
    }
}

/// Borrowed view over all five containers, wherever they live
#[derive(Clone, Copy)]
pub(crate) struct View<'a> {
    pub hash_len: usize,
    pub nodes: NodeArray<'a>,
    pub nodes_fanout: &'a [u32],
    pub target_hashes: HashArray<'a>,
    pub extra_edges: EdgeArray<'a>,
    pub unknown_hashes: HashArray<'a>,
}

impl<'a> View<'a> {
    pub fn find_node_idx(&self, hash: &[u8]) -> Option<usize> {
        if self.hash_len == 0 || self.nodes.is_empty() {
            return None;
        }
        assert_eq!(hash.len(), self.hash_len, "hash length mismatch");
        let (start, end) = if self.nodes_fanout.is_empty() {
            (0, self.nodes.len())
        } else {
            fanout::window(self.nodes_fanout, hash[0])
        };
        let nodes = self.nodes;
        let (idx, found) = hash::search(start, end, hash, |i| nodes.hash(i));
        found.then_some(idx)
    }

    pub fn targets_node_idx(&self, node_idx: usize, k: usize) -> usize {
        let targets = self.nodes.get(node_idx).targets();
        assert!(k < targets.count(), "target {} out of range", k);
        match targets {
            Targets::One(a) => a as usize,
            Targets::Two(a, b) => {
                if k == 0 {
                    a as usize
                } else {
                    b as usize
                }
            }
            Targets::Indirect { first, .. } => {
                let at = first as usize + k;
                if self.target_hashes.is_empty() {
                    self.extra_edges.get(at) as usize
                } else {
                    let hash = self.target_hashes.get(at);
                    match self.find_node_idx(hash) {
                        Some(idx) => idx,
                        None => panic!("target {} missing from bundle", hash::to_hex(hash)),
                    }
                }
            }
            Targets::Unknown | Targets::Absent => unreachable!(),
        }
    }

    pub fn targets_node_hash(&self, node_idx: usize, k: usize) -> &'a [u8] {
        let targets = self.nodes.get(node_idx).targets();
        if let Targets::Indirect { first, .. } = targets {
            if !self.target_hashes.is_empty() {
                assert!(k < targets.count(), "target {} out of range", k);
                return self.target_hashes.get(first as usize + k);
            }
        }
        self.nodes.hash(self.targets_node_idx(node_idx, k))
    }
}

enum Store {
    Owned { tables: Tables, state: BundleState },
    Filed(HdagFile),
}

/// Mutable hash DAG, optionally backed by a file mapping
pub struct Bundle {
    hash_len: usize,
    store: Store,
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("hash_len", &self.hash_len)
            .field("state", &self.state())
            .field("nodes", &self.node_count())
            .field("extra_edges", &self.extra_edges().len())
            .field("unknown_hashes", &self.unknown_hashes().len())
            .field("filed", &self.is_filed())
            .finish()
    }
}

impl Bundle {
    /// Empty raw bundle; `hash_len == 0` makes it hashless
    pub fn new(hash_len: usize) -> Self {
        assert!(hash_len % 4 == 0, "hash length must be a multiple of 4");
        Self {
            hash_len,
            store: Store::Owned { tables: Tables::default(), state: BundleState::Raw },
        }
    }

    pub(crate) fn from_tables(hash_len: usize, tables: Tables, state: BundleState) -> Self {
        Self { hash_len, store: Store::Owned { tables, state } }
    }

    pub(crate) fn view(&self) -> View<'_> {
        match &self.store {
            Store::Owned { tables, .. } => tables.view(self.hash_len),
            Store::Filed(file) => View {
                hash_len: self.hash_len,
                nodes: NodeArray::new(file.nodes_bytes(), self.hash_len),
                nodes_fanout: if file.node_count() == 0 { &[][..] } else { file.nodes_fanout() },
                target_hashes: HashArray::new(&[], self.hash_len),
                extra_edges: EdgeArray::Bytes(file.extra_edges_bytes()),
                unknown_hashes: HashArray::new(file.unknown_hashes_bytes(), self.hash_len),
            },
        }
    }

    pub(crate) fn tables(&self) -> &Tables {
        match &self.store {
            Store::Owned { tables, .. } => tables,
            Store::Filed(_) => panic!("bundle is filed; unfile it before mutating"),
        }
    }

    pub(crate) fn tables_mut(&mut self) -> &mut Tables {
        match &mut self.store {
            Store::Owned { tables, .. } => tables,
            Store::Filed(_) => panic!("bundle is filed; unfile it before mutating"),
        }
    }

    pub(crate) fn set_state(&mut self, new_state: BundleState) {
        if let Store::Owned { state, .. } = &mut self.store {
            *state = new_state;
        }
    }

    pub fn hash_len(&self) -> usize {
        self.hash_len
    }

    pub fn is_hashless(&self) -> bool {
        self.hash_len == 0
    }

    pub fn state(&self) -> BundleState {
        match &self.store {
            Store::Owned { state, .. } => *state,
            Store::Filed(_) => BundleState::Organized,
        }
    }

    pub fn is_organized(&self) -> bool {
        self.state() == BundleState::Organized
    }

    /// Containers live in a file mapping
    pub fn is_filed(&self) -> bool {
        matches!(self.store, Store::Filed(_))
    }

    /// Filed and the file has a path on disk
    pub fn is_backed(&self) -> bool {
        match &self.store {
            Store::Filed(file) => file.is_backed(),
            Store::Owned { .. } => false,
        }
    }

    pub fn hdag_file(&self) -> Option<&HdagFile> {
        match &self.store {
            Store::Filed(file) => Some(file),
            Store::Owned { .. } => None,
        }
    }

    pub fn hdag_file_mut(&mut self) -> Option<&mut HdagFile> {
        match &mut self.store {
            Store::Filed(file) => Some(file),
            Store::Owned { .. } => None,
        }
    }

    // === CONTAINERS ===

    pub fn nodes(&self) -> NodeArray<'_> {
        self.view().nodes
    }

    pub fn node_count(&self) -> usize {
        self.view().nodes.len()
    }

    pub fn node(&self, idx: usize) -> Node<'_> {
        self.view().nodes.get(idx)
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = Node<'_>> + '_ {
        self.view().nodes.iter()
    }

    pub fn nodes_fanout(&self) -> &[u32] {
        self.view().nodes_fanout
    }

    pub fn target_hashes(&self) -> HashArray<'_> {
        self.view().target_hashes
    }

    pub fn extra_edges(&self) -> EdgeArray<'_> {
        self.view().extra_edges
    }

    pub fn unknown_hashes(&self) -> HashArray<'_> {
        self.view().unknown_hashes
    }

    // === LOOKUP ===

    /// Fanout-narrowed binary search for a node
    pub fn find_node_idx(&self, hash: &[u8]) -> Option<usize> {
        self.view().find_node_idx(hash)
    }

    pub fn targets(&self, node_idx: usize) -> Targets {
        self.node(node_idx).targets()
    }

    pub fn targets_count(&self, node_idx: usize) -> usize {
        self.targets(node_idx).count()
    }

    /// Node index of the `k`-th target
    pub fn targets_node_idx(&self, node_idx: usize, k: usize) -> usize {
        self.view().targets_node_idx(node_idx, k)
    }

    /// Hash of the `k`-th target
    pub fn targets_node_hash(&self, node_idx: usize, k: usize) -> &[u8] {
        self.view().targets_node_hash(node_idx, k)
    }

    /// Target hashes of one node as a sequence
    pub fn target_seq(&self, node_idx: usize) -> BundleTargetSeq<'_> {
        BundleTargetSeq { bundle: self, node_idx, k: 0, count: self.targets_count(node_idx) }
    }

    /// Known nodes as a node sequence. Unknown nodes are not emitted; they
    /// reappear as targets of the nodes referencing them.
    pub fn node_seq(&self) -> BundleNodeSeq<'_> {
        BundleNodeSeq { bundle: self, pos: 0, skip: None }
    }

    /// Like [`Bundle::node_seq`], additionally skipping nodes flagged in `skip`
    pub fn node_seq_skipping<'a>(&'a self, skip: &'a [bool]) -> BundleNodeSeq<'a> {
        assert_eq!(skip.len(), self.node_count());
        BundleNodeSeq { bundle: self, pos: 0, skip: Some(skip) }
    }

    /// Whether two nodes, possibly in different bundles, have the same
    /// outgoing hash set
    pub fn same_targets(&self, node_idx: usize, other: &Bundle, other_idx: usize) -> bool {
        let count = self.targets_count(node_idx);
        count == other.targets_count(other_idx)
            && (0..count).all(|k| {
                self.targets_node_hash(node_idx, k) == other.targets_node_hash(other_idx, k)
            })
    }

    // === FILING ===

    /// Write an organized bundle into a new file
    pub fn to_file(&self, pathname: Pathname<'_>, mode: u32) -> Result<HdagFile> {
        assert!(self.is_organized(), "only organized bundles can be written to a file");
        let view = self.view();
        let file = HdagFile::create(
            pathname,
            mode,
            &FileContents {
                hash_len: self.hash_len,
                nodes: view_nodes_bytes(self),
                nodes_fanout: view.nodes_fanout,
                extra_edges: view.extra_edges,
                unknown_hashes: view.unknown_hashes.as_bytes(),
            },
        )?;
        file.sync()?;
        Ok(file)
    }

    /// Move the containers into a new file and serve them from its mapping
    pub fn file(&mut self, pathname: Pathname<'_>, mode: u32) -> Result<()> {
        if self.is_filed() {
            return Ok(());
        }
        let file = self.to_file(pathname, mode)?;
        self.store = Store::Filed(file);
        Ok(())
    }

    /// Adopt an open file; its sections become the bundle's containers
    pub fn from_file(file: HdagFile) -> Self {
        Self { hash_len: file.hash_len(), store: Store::Filed(file) }
    }

    /// Copy the mapped containers back into owned storage and close the file
    pub fn unfile(&mut self) -> Result<()> {
        if !self.is_filed() {
            return Ok(());
        }
        let view = self.view();
        let tables = Tables {
            nodes: view_nodes_bytes(self).to_vec(),
            nodes_fanout: view.nodes_fanout.to_vec(),
            target_hashes: Vec::new(),
            extra_edges: view.extra_edges.to_vec(),
            unknown_hashes: view.unknown_hashes.as_bytes().to_vec(),
        };
        let previous =
            std::mem::replace(&mut self.store, Store::Owned { tables, state: BundleState::Organized });
        if let Store::Filed(file) = previous {
            file.close()?;
        }
        Ok(())
    }

    /// Release the bundle, syncing and unmapping its file if filed
    pub fn close(self) -> Result<()> {
        match self.store {
            Store::Filed(file) => file.close(),
            Store::Owned { .. } => Ok(()),
        }
    }

    // === VALIDATION ===

    /// Verify the invariants of a compacted or organized bundle.
    ///
    /// Meant for bundles of untrusted origin, e.g. opened from files.
    pub fn check(&self) -> Result<()> {
        let view = self.view();
        let count = view.nodes.len();
        if count >= MAX_NODES {
            return Err(HdagError::InvalidFormat(format!("too many nodes: {}", count)));
        }
        if !view.target_hashes.is_empty() {
            return Err(HdagError::InvalidFormat("uncompacted target hashes".into()));
        }

        if self.hash_len > 0 {
            for idx in 1..count {
                let (prev, cur) = (view.nodes.hash(idx - 1), view.nodes.hash(idx));
                if prev == cur {
                    return Err(HdagError::NodeDuplicate(hash::to_hex(cur)));
                }
                if prev > cur {
                    return Err(HdagError::InvalidFormat(format!(
                        "nodes out of order at {}",
                        hash::to_hex(cur)
                    )));
                }
            }
            if !fanout::is_consistent(view.nodes_fanout, &view.nodes, self.hash_len) {
                return Err(HdagError::InvalidFormat("inconsistent node fanout".into()));
            }
        }

        let mut unknown_count = 0usize;
        let mut edges = Vec::new();
        for idx in 0..count {
            let node = view.nodes.get(idx);
            let (first, last) = node.raw_targets();
            let targets = Targets::decode(first, last).ok_or_else(|| {
                HdagError::InvalidFormat(format!("invalid target pair ({:#x}, {:#x})", first, last))
            })?;
            match targets {
                Targets::Unknown => {
                    unknown_count += 1;
                    if self.hash_len > 0 && !view.unknown_hashes.contains(node.hash()) {
                        return Err(HdagError::InvalidFormat(format!(
                            "unknown node {} missing from unknown hashes",
                            hash::to_hex(node.hash())
                        )));
                    }
                }
                _ => {}
            }
            if targets.indirect_range().is_some_and(|range| range.end > view.extra_edges.len()) {
                return Err(HdagError::InvalidFormat("indirect span past extra edges".into()));
            }

            edges.clear();
            for k in 0..targets.count() {
                let target = view.targets_node_idx(idx, k);
                if target >= count {
                    return Err(HdagError::InvalidFormat(format!("target index {} out of range", target)));
                }
                edges.push(target);
            }
            edges.sort_unstable();
            if let Some(w) = edges.windows(2).find(|w| w[0] == w[1]) {
                return Err(HdagError::EdgeDuplicate {
                    src: describe(&view, idx),
                    dst: describe(&view, w[0]),
                });
            }

            if self.state() >= BundleState::Enumerated {
                let (component, generation) = (node.component(), node.generation());
                if component == 0 || generation == 0 || !is_final_value(component) || !is_final_value(generation) {
                    return Err(HdagError::InvalidFormat(format!(
                        "node {} is not enumerated",
                        describe(&view, idx)
                    )));
                }
                for &target in &edges {
                    let t = view.nodes.get(target);
                    if t.generation() >= generation || t.component() != component {
                        return Err(HdagError::InvalidFormat(format!(
                            "edge {} -> {} breaks enumeration",
                            describe(&view, idx),
                            describe(&view, target)
                        )));
                    }
                }
            }
        }

        if unknown_count != view.unknown_hashes.len() || !view.unknown_hashes.is_sorted_and_deduped() {
            return Err(HdagError::InvalidFormat("inconsistent unknown hashes".into()));
        }
        if count > 0 && unknown_count >= count {
            return Err(HdagError::InvalidFormat("bundle has no known nodes".into()));
        }
        Ok(())
    }

    /// Build a bundle from a node sequence and organize it
    pub fn organized_from_node_seq<'a, S: NodeSeq<'a> + ?Sized>(seq: &mut S) -> Result<Self> {
        let mut bundle = Self::from_node_seq(seq)?;
        bundle.organize_with(&Context::empty())?;
        Ok(bundle)
    }
}

fn view_nodes_bytes(bundle: &Bundle) -> &[u8] {
    match &bundle.store {
        Store::Owned { tables, .. } => &tables.nodes,
        Store::Filed(file) => file.nodes_bytes(),
    }
}

fn describe(view: &View<'_>, idx: usize) -> String {
    if view.hash_len == 0 {
        format!("#{}", idx)
    } else {
        hash::to_hex(view.nodes.hash(idx))
    }
}

/// Target hashes of one bundle node
pub struct BundleTargetSeq<'a> {
    bundle: &'a Bundle,
    node_idx: usize,
    k: usize,
    count: usize,
}

impl<'a> Seq for BundleTargetSeq<'a> {
    type Item = Cow<'a, [u8]>;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        if self.k >= self.count {
            return Ok(None);
        }
        let hash = self.bundle.targets_node_hash(self.node_idx, self.k);
        self.k += 1;
        Ok(Some(Cow::Borrowed(hash)))
    }

    fn is_resettable(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<()> {
        self.k = 0;
        Ok(())
    }
}

impl<'a> HashSeq<'a> for BundleTargetSeq<'a> {
    fn hash_len(&self) -> usize {
        self.bundle.hash_len
    }
}

/// Known nodes of a bundle as node records
pub struct BundleNodeSeq<'a> {
    bundle: &'a Bundle,
    pos: usize,
    skip: Option<&'a [bool]>,
}

impl<'a> Seq for BundleNodeSeq<'a> {
    type Item = NodeItem<'a>;

    fn next(&mut self) -> Result<Option<NodeItem<'a>>> {
        let bundle = self.bundle;
        while self.pos < bundle.node_count() {
            let idx = self.pos;
            self.pos += 1;
            if self.skip.map_or(false, |skip| skip[idx]) {
                continue;
            }
            let node = bundle.node(idx);
            if !node.is_known() {
                continue;
            }
            return Ok(Some(NodeItem {
                hash: Cow::Borrowed(node.hash()),
                targets: Box::new(bundle.target_seq(idx)),
            }));
        }
        Ok(None)
    }

    fn is_resettable(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }
}

impl<'a> NodeSeq<'a> for BundleNodeSeq<'a> {
    fn hash_len(&self) -> usize {
        self.bundle.hash_len
    }
}
