//! Packed node records
//!
//! On disk and in memory a node is `16 + hash_len` bytes:
//! `component: u32, generation: u32, first: u32, last: u32, hash[hash_len]`,
//! all integers little-endian.

use super::target::Targets;

/// Bytes preceding the hash in a node record
pub const FIXED_SIZE: usize = 16;

const COMPONENT_OFFSET: usize = 0;
const GENERATION_OFFSET: usize = 4;
const FIRST_OFFSET: usize = 8;
const LAST_OFFSET: usize = 12;

pub fn node_size(hash_len: usize) -> usize {
    FIXED_SIZE + hash_len
}

// Helper: read u32 from potentially unaligned bytes
#[inline]
fn read_u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

#[inline]
fn write_u32_at(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Read view of one node record
#[derive(Clone, Copy)]
pub struct Node<'a> {
    bytes: &'a [u8],
}

impl<'a> Node<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        debug_assert!(bytes.len() >= FIXED_SIZE);
        Self { bytes }
    }

    pub fn component(&self) -> u32 {
        read_u32_at(self.bytes, COMPONENT_OFFSET)
    }

    pub fn generation(&self) -> u32 {
        read_u32_at(self.bytes, GENERATION_OFFSET)
    }

    pub fn raw_targets(&self) -> (u32, u32) {
        (read_u32_at(self.bytes, FIRST_OFFSET), read_u32_at(self.bytes, LAST_OFFSET))
    }

    pub fn try_targets(&self) -> Option<Targets> {
        let (first, last) = self.raw_targets();
        Targets::decode(first, last)
    }

    /// Decoded targets. A corrupt pair is an invariant violation.
    pub fn targets(&self) -> Targets {
        let (first, last) = self.raw_targets();
        match Targets::decode(first, last) {
            Some(targets) => targets,
            None => panic!("corrupt target pair ({:#x}, {:#x})", first, last),
        }
    }

    pub fn hash(&self) -> &'a [u8] {
        &self.bytes[FIXED_SIZE..]
    }

    pub fn is_known(&self) -> bool {
        self.targets().is_known()
    }

    pub fn is_enumerated(&self) -> bool {
        self.component() != 0 && self.generation() != 0
    }
}

impl std::fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("hash", &crate::hash::to_hex(self.hash()))
            .field("component", &self.component())
            .field("generation", &self.generation())
            .field("targets", &self.try_targets())
            .finish()
    }
}

/// Write view of one node record
pub struct NodeMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> NodeMut<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        debug_assert!(bytes.len() >= FIXED_SIZE);
        Self { bytes }
    }

    pub fn as_node(&self) -> Node<'_> {
        Node::new(self.bytes)
    }

    pub fn set_component(&mut self, component: u32) {
        write_u32_at(self.bytes, COMPONENT_OFFSET, component);
    }

    pub fn set_generation(&mut self, generation: u32) {
        write_u32_at(self.bytes, GENERATION_OFFSET, generation);
    }

    pub fn set_targets(&mut self, targets: Targets) {
        let (first, last) = targets.encode();
        write_u32_at(self.bytes, FIRST_OFFSET, first);
        write_u32_at(self.bytes, LAST_OFFSET, last);
    }
}

/// Read view of a packed node array
#[derive(Clone, Copy)]
pub struct NodeArray<'a> {
    bytes: &'a [u8],
    node_size: usize,
}

impl<'a> NodeArray<'a> {
    pub fn new(bytes: &'a [u8], hash_len: usize) -> Self {
        let node_size = node_size(hash_len);
        debug_assert_eq!(bytes.len() % node_size, 0);
        Self { bytes, node_size }
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.node_size
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, idx: usize) -> Node<'a> {
        let start = idx * self.node_size;
        Node::new(&self.bytes[start..start + self.node_size])
    }

    pub fn hash(&self, idx: usize) -> &'a [u8] {
        let start = idx * self.node_size;
        &self.bytes[start + FIXED_SIZE..start + self.node_size]
    }

    pub fn iter(&self) -> impl Iterator<Item = Node<'a>> + 'a {
        let this = *self;
        (0..this.len()).map(move |idx| this.get(idx))
    }
}

/// Append a node record to a packed buffer
pub fn push(buf: &mut Vec<u8>, hash: &[u8], targets: Targets) {
    let (first, last) = targets.encode();
    buf.reserve(FIXED_SIZE + hash.len());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&first.to_le_bytes());
    buf.extend_from_slice(&last.to_le_bytes());
    buf.extend_from_slice(hash);
}

/// Write view of node `idx` in a packed buffer
pub fn get_mut(buf: &mut [u8], hash_len: usize, idx: usize) -> NodeMut<'_> {
    let size = node_size(hash_len);
    let start = idx * size;
    NodeMut::new(&mut buf[start..start + size])
}
