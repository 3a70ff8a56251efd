//! HDAG file header
//!
//! Layout, all integers little-endian, 1040 bytes in total:
//!
//! | Offset | Size  | Field              |
//! |--------|-------|--------------------|
//! | 0      | 4     | signature `"HDAG"` |
//! | 4      | 1     | version major      |
//! | 5      | 1     | version minor      |
//! | 6      | 2     | hash length        |
//! | 8      | 1024  | node fanout        |
//! | 1032   | 4     | extra edge count   |
//! | 1036   | 4     | unknown hash count |

use crate::bundle::fanout::FANOUT_LEN;
use crate::bundle::node::node_size;
use crate::bundle::MAX_NODES;
use crate::error::{HdagError, Result};
use crate::hash;

pub const SIGNATURE: [u8; 4] = *b"HDAG";
pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 0;

pub const HEADER_SIZE: usize = 4 + 1 + 1 + 2 + FANOUT_LEN * 4 + 4 + 4;

const FANOUT_OFFSET: usize = 8;
const EXTRA_EDGE_NUM_OFFSET: usize = FANOUT_OFFSET + FANOUT_LEN * 4;
const UNKNOWN_HASH_NUM_OFFSET: usize = EXTRA_EDGE_NUM_OFFSET + 4;

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub signature: [u8; 4],
    pub version_major: u8,
    pub version_minor: u8,
    pub hash_len: u16,
    pub node_fanout: [u32; FANOUT_LEN],
    pub extra_edge_num: u32,
    pub unknown_hash_num: u32,
}

impl FileHeader {
    /// Header for the given contents; an empty fanout means no nodes.
    pub fn new(hash_len: usize, fanout: &[u32], extra_edge_num: usize, unknown_hash_num: usize) -> Result<Self> {
        if !hash::is_valid_len(hash_len) {
            return Err(HdagError::InvalidFormat(format!("invalid hash length {}", hash_len)));
        }
        let mut node_fanout = [0u32; FANOUT_LEN];
        if !fanout.is_empty() {
            if fanout.len() != FANOUT_LEN {
                return Err(HdagError::InvalidFormat(format!("fanout has {} entries", fanout.len())));
            }
            node_fanout.copy_from_slice(fanout);
        }
        let extra_edge_num = u32::try_from(extra_edge_num).map_err(|_| HdagError::out_of_memory())?;
        let unknown_hash_num = u32::try_from(unknown_hash_num).map_err(|_| HdagError::out_of_memory())?;
        Ok(Self {
            signature: SIGNATURE,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            hash_len: hash_len as u16,
            node_fanout,
            extra_edge_num,
            unknown_hash_num,
        })
    }

    /// Parse the first `HEADER_SIZE` bytes of a file, without validation
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(HdagError::InvalidFormat("file too small for header".into()));
        }
        let mut signature = [0u8; 4];
        signature.copy_from_slice(&bytes[0..4]);
        let mut node_fanout = [0u32; FANOUT_LEN];
        for (i, entry) in node_fanout.iter_mut().enumerate() {
            *entry = read_u32(bytes, FANOUT_OFFSET + i * 4);
        }
        Ok(Self {
            signature,
            version_major: bytes[4],
            version_minor: bytes[5],
            hash_len: u16::from_le_bytes([bytes[6], bytes[7]]),
            node_fanout,
            extra_edge_num: read_u32(bytes, EXTRA_EDGE_NUM_OFFSET),
            unknown_hash_num: read_u32(bytes, UNKNOWN_HASH_NUM_OFFSET),
        })
    }

    pub fn write_to(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.signature);
        out[4] = self.version_major;
        out[5] = self.version_minor;
        out[6..8].copy_from_slice(&self.hash_len.to_le_bytes());
        for (i, entry) in self.node_fanout.iter().enumerate() {
            let at = FANOUT_OFFSET + i * 4;
            out[at..at + 4].copy_from_slice(&entry.to_le_bytes());
        }
        out[EXTRA_EDGE_NUM_OFFSET..EXTRA_EDGE_NUM_OFFSET + 4].copy_from_slice(&self.extra_edge_num.to_le_bytes());
        out[UNKNOWN_HASH_NUM_OFFSET..UNKNOWN_HASH_NUM_OFFSET + 4]
            .copy_from_slice(&self.unknown_hash_num.to_le_bytes());
    }

    pub fn validate(&self) -> Result<()> {
        if self.signature != SIGNATURE {
            return Err(HdagError::InvalidFormat(format!("bad signature {:?}", self.signature)));
        }
        if (self.version_major, self.version_minor) != (VERSION_MAJOR, VERSION_MINOR) {
            return Err(HdagError::InvalidFormat(format!(
                "unsupported version {}.{}",
                self.version_major, self.version_minor
            )));
        }
        if !hash::is_valid_len(self.hash_len as usize) {
            return Err(HdagError::InvalidFormat(format!("invalid hash length {}", self.hash_len)));
        }
        if self.node_fanout.windows(2).any(|w| w[0] > w[1]) {
            return Err(HdagError::InvalidFormat("fanout is not monotonic".into()));
        }
        let node_num = self.node_num();
        if node_num >= MAX_NODES {
            return Err(HdagError::InvalidFormat(format!("too many nodes: {}", node_num)));
        }
        let unknown = self.unknown_hash_num as usize;
        if (node_num == 0 && unknown != 0) || (node_num > 0 && unknown >= node_num) {
            return Err(HdagError::InvalidFormat(format!(
                "{} unknown hashes for {} nodes",
                unknown, node_num
            )));
        }
        Ok(())
    }

    pub fn node_num(&self) -> usize {
        self.node_fanout[FANOUT_LEN - 1] as usize
    }

    // Section offsets

    pub fn nodes_offset(&self) -> usize {
        HEADER_SIZE
    }

    pub fn extra_edges_offset(&self) -> usize {
        self.nodes_offset() + self.node_num() * node_size(self.hash_len as usize)
    }

    pub fn unknown_hashes_offset(&self) -> usize {
        self.extra_edges_offset() + self.extra_edge_num as usize * 4
    }

    pub fn file_size(&self) -> usize {
        self.unknown_hashes_offset() + self.unknown_hash_num as usize * self.hash_len as usize
    }
}
