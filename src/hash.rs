//! Fixed-length hashes and sorted hash arrays
//!
//! A hash is an opaque byte string whose length is fixed per bundle/file.
//! Ordering is plain lexicographic byte order.

use std::cmp::Ordering;

/// Largest hash length representable in a file header
pub const MAX_LEN: usize = 65532;

/// Check a hash length is usable for a file: positive, a multiple of four and
/// within the header's range.
pub fn is_valid_len(len: usize) -> bool {
    len > 0 && len % 4 == 0 && len <= MAX_LEN
}

/// Binary search `[start, end)` of a sorted sequence of hashes.
///
/// Returns the stop index and whether the hash was found there. When not
/// found, the stop index is the insertion position.
pub fn search<'a, F>(start: usize, end: usize, hash: &[u8], hash_at: F) -> (usize, bool)
where
    F: Fn(usize) -> &'a [u8],
{
    let mut lo = start;
    let mut hi = end;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match hash_at(mid).cmp(hash) {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => return (mid, true),
        }
    }
    (lo, false)
}

/// Lowercase hex rendering used in errors and logs
pub fn to_hex(hash: &[u8]) -> String {
    hex::encode(hash)
}

/// Read-only view of concatenated fixed-length hashes
#[derive(Debug, Clone, Copy)]
pub struct HashArray<'a> {
    bytes: &'a [u8],
    hash_len: usize,
}

impl<'a> HashArray<'a> {
    pub fn new(bytes: &'a [u8], hash_len: usize) -> Self {
        debug_assert!(hash_len == 0 || bytes.len() % hash_len == 0);
        Self { bytes, hash_len }
    }

    pub fn hash_len(&self) -> usize {
        self.hash_len
    }

    pub fn len(&self) -> usize {
        if self.hash_len == 0 {
            0
        } else {
            self.bytes.len() / self.hash_len
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> &'a [u8] {
        let start = idx * self.hash_len;
        &self.bytes[start..start + self.hash_len]
    }

    /// Sub-array of hashes `[start, end)`
    pub fn slice(&self, start: usize, end: usize) -> HashArray<'a> {
        HashArray::new(&self.bytes[start * self.hash_len..end * self.hash_len], self.hash_len)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a [u8]> + 'a {
        let hash_len = self.hash_len;
        let bytes = self.bytes;
        (0..self.len()).map(move |i| &bytes[i * hash_len..(i + 1) * hash_len])
    }

    pub fn search(&self, hash: &[u8]) -> (usize, bool) {
        search(0, self.len(), hash, |i| self.get(i))
    }

    pub fn contains(&self, hash: &[u8]) -> bool {
        self.search(hash).1
    }

    /// Strictly increasing, i.e. sorted without duplicates
    pub fn is_sorted_and_deduped(&self) -> bool {
        (1..self.len()).all(|i| self.get(i - 1) < self.get(i))
    }

    /// Whether this sorted array shares any hash with another sorted array
    pub fn intersects(&self, other: &HashArray<'_>) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.len() && j < other.len() {
            match self.get(i).cmp(other.get(j)) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => return true,
            }
        }
        false
    }
}

/// Sort a list of hashes and drop duplicates
pub fn sort_and_dedup(hashes: &mut Vec<&[u8]>) {
    hashes.sort_unstable();
    hashes.dedup();
}
