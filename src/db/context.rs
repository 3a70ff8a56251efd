//! Read-only view over a subset of a database's bundles

use crate::bundle::{Bundle, BundleTargetSeq};

/// One node found through a context
pub struct ContextNode<'a> {
    pub bundle_idx: usize,
    pub node_idx: usize,
    pub hash: &'a [u8],
    pub component: u32,
    pub generation: u32,
    /// Target hashes; `None` for an unknown node
    pub targets: Option<BundleTargetSeq<'a>>,
}

impl ContextNode<'_> {
    pub fn is_known(&self) -> bool {
        self.targets.is_some()
    }
}

/// Ordered set of bundles to resolve hashes against
#[derive(Clone)]
pub struct Context<'a> {
    bundles: &'a [Bundle],
    indexes: Vec<usize>,
}

impl<'a> Context<'a> {
    /// Context with no bundles
    pub fn empty() -> Context<'static> {
        Context { bundles: &[], indexes: Vec::new() }
    }

    pub fn all(bundles: &'a [Bundle]) -> Self {
        Self { bundles, indexes: (0..bundles.len()).collect() }
    }

    /// Every bundle not flagged in `excluded`
    pub fn excluding(bundles: &'a [Bundle], excluded: &[bool]) -> Self {
        assert_eq!(bundles.len(), excluded.len());
        let indexes = (0..bundles.len()).filter(|&i| !excluded[i]).collect();
        Self { bundles, indexes }
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    pub fn bundle_indexes(&self) -> &[usize] {
        &self.indexes
    }

    /// Every node with this hash, known or not, in bundle order
    pub fn matches<'h>(&'h self, hash: &'h [u8]) -> impl Iterator<Item = ContextNode<'a>> + 'h {
        let bundles = self.bundles;
        self.indexes.iter().filter_map(move |&bundle_idx| {
            let bundle = &bundles[bundle_idx];
            let node_idx = bundle.find_node_idx(hash)?;
            let node = bundle.node(node_idx);
            Some(ContextNode {
                bundle_idx,
                node_idx,
                hash: node.hash(),
                component: node.component(),
                generation: node.generation(),
                targets: node.is_known().then(|| bundle.target_seq(node_idx)),
            })
        })
    }

    /// First node with this hash
    pub fn get_node(&self, hash: &[u8]) -> Option<ContextNode<'a>> {
        self.matches(hash).next()
    }

    /// First known node with this hash
    pub fn get_known_node(&self, hash: &[u8]) -> Option<ContextNode<'a>> {
        self.matches(hash).find(|node| node.is_known())
    }

    /// Whether any known node with this hash has a target set other than
    /// `targets`, which must be sorted and deduplicated
    pub(crate) fn conflicts(&self, hash: &[u8], targets: &[&[u8]]) -> bool {
        let bundles = self.bundles;
        self.matches(hash).any(|node| {
            let bundle = &bundles[node.bundle_idx];
            let count = bundle.targets_count(node.node_idx);
            node.is_known()
                && (count != targets.len()
                    || (0..count).any(|k| bundle.targets_node_hash(node.node_idx, k) != targets[k]))
        })
    }
}
