//! Pull-based, possibly failing sequences
//!
//! Every bundle is built from a node sequence: items of `{hash, target hash
//! sequence}`. Sequences may fail mid-way (a parser hitting bad input) and
//! may or may not support restarting from the beginning.

use std::borrow::Cow;
use std::marker::PhantomData;

use crate::error::{HdagError, Result};
use crate::hash::HashArray;

/// A resettable-or-not stream of items that may fail on any pull
pub trait Seq {
    type Item;

    /// Produce the next item, `None` at the end
    fn next(&mut self) -> Result<Option<Self::Item>>;

    fn is_resettable(&self) -> bool {
        false
    }

    /// Restart from the beginning
    fn reset(&mut self) -> Result<()> {
        Err(HdagError::NotResettable)
    }
}

impl<S: Seq + ?Sized> Seq for Box<S> {
    type Item = S::Item;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        (**self).next()
    }

    fn is_resettable(&self) -> bool {
        (**self).is_resettable()
    }

    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }
}

/// Sequence of hashes of a fixed length
pub trait HashSeq<'a>: Seq<Item = Cow<'a, [u8]>> {
    fn hash_len(&self) -> usize;
}

/// One node record: its hash and the hashes it points to
pub struct NodeItem<'a> {
    pub hash: Cow<'a, [u8]>,
    pub targets: Box<dyn HashSeq<'a> + 'a>,
}

/// Sequence of node records; target sequences share its hash length
pub trait NodeSeq<'a>: Seq<Item = NodeItem<'a>> {
    fn hash_len(&self) -> usize;
}

impl<'a, S: HashSeq<'a> + ?Sized> HashSeq<'a> for Box<S> {
    fn hash_len(&self) -> usize {
        (**self).hash_len()
    }
}

impl<'a, S: NodeSeq<'a> + ?Sized> NodeSeq<'a> for Box<S> {
    fn hash_len(&self) -> usize {
        (**self).hash_len()
    }
}

/// Drain a hash sequence into concatenated bytes
pub fn collect_hashes<'a, S: HashSeq<'a> + ?Sized>(seq: &mut S) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(hash) = seq.next()? {
        bytes.extend_from_slice(&hash);
    }
    Ok(bytes)
}

/// Typed empty sequence
pub struct VoidSeq<T> {
    hash_len: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T> VoidSeq<T> {
    pub fn new(hash_len: usize) -> Self {
        Self { hash_len, _item: PhantomData }
    }
}

impl<T> Seq for VoidSeq<T> {
    type Item = T;

    fn next(&mut self) -> Result<Option<T>> {
        Ok(None)
    }

    fn is_resettable(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<'a> HashSeq<'a> for VoidSeq<Cow<'a, [u8]>> {
    fn hash_len(&self) -> usize {
        self.hash_len
    }
}

impl<'a> NodeSeq<'a> for VoidSeq<NodeItem<'a>> {
    fn hash_len(&self) -> usize {
        self.hash_len
    }
}

/// Borrowed hashes from a hash array
pub struct HashArraySeq<'a> {
    array: HashArray<'a>,
    pos: usize,
}

impl<'a> HashArraySeq<'a> {
    pub fn new(array: HashArray<'a>) -> Self {
        Self { array, pos: 0 }
    }
}

impl<'a> Seq for HashArraySeq<'a> {
    type Item = Cow<'a, [u8]>;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        if self.pos >= self.array.len() {
            return Ok(None);
        }
        let hash = self.array.get(self.pos);
        self.pos += 1;
        Ok(Some(Cow::Borrowed(hash)))
    }

    fn is_resettable(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }
}

impl<'a> HashSeq<'a> for HashArraySeq<'a> {
    fn hash_len(&self) -> usize {
        self.array.hash_len()
    }
}

/// Owned concatenated hashes
pub struct ListHashSeq<'a> {
    bytes: Vec<u8>,
    hash_len: usize,
    pos: usize,
    _lifetime: PhantomData<&'a ()>,
}

impl<'a> ListHashSeq<'a> {
    pub fn new(hash_len: usize, bytes: Vec<u8>) -> Self {
        debug_assert!(hash_len == 0 || bytes.len() % hash_len == 0);
        Self { bytes, hash_len, pos: 0, _lifetime: PhantomData }
    }
}

impl<'a> Seq for ListHashSeq<'a> {
    type Item = Cow<'a, [u8]>;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        if self.hash_len == 0 || self.pos + self.hash_len > self.bytes.len() {
            return Ok(None);
        }
        let hash = self.bytes[self.pos..self.pos + self.hash_len].to_vec();
        self.pos += self.hash_len;
        Ok(Some(Cow::Owned(hash)))
    }

    fn is_resettable(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }
}

impl<'a> HashSeq<'a> for ListHashSeq<'a> {
    fn hash_len(&self) -> usize {
        self.hash_len
    }
}

/// In-memory list of node records
pub struct ListNodeSeq<'a> {
    hash_len: usize,
    records: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
    _lifetime: PhantomData<&'a ()>,
}

impl<'a> ListNodeSeq<'a> {
    pub fn new(hash_len: usize) -> Self {
        Self { hash_len, records: Vec::new(), pos: 0, _lifetime: PhantomData }
    }

    /// Build from `(hash, targets)` pairs
    pub fn from_records<H, T>(hash_len: usize, records: impl IntoIterator<Item = (H, T)>) -> Self
    where
        H: AsRef<[u8]>,
        T: IntoIterator,
        T::Item: AsRef<[u8]>,
    {
        let mut seq = Self::new(hash_len);
        for (hash, targets) in records {
            seq.push(hash.as_ref(), targets);
        }
        seq
    }

    pub fn push<T>(&mut self, hash: &[u8], targets: T)
    where
        T: IntoIterator,
        T::Item: AsRef<[u8]>,
    {
        assert_eq!(hash.len(), self.hash_len, "node hash length mismatch");
        let mut bytes = Vec::new();
        for target in targets {
            let target = target.as_ref();
            assert_eq!(target.len(), self.hash_len, "target hash length mismatch");
            bytes.extend_from_slice(target);
        }
        self.records.push((hash.to_vec(), bytes));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> Seq for ListNodeSeq<'a> {
    type Item = NodeItem<'a>;

    fn next(&mut self) -> Result<Option<NodeItem<'a>>> {
        let Some((hash, targets)) = self.records.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        Ok(Some(NodeItem {
            hash: Cow::Owned(hash.clone()),
            targets: Box::new(ListHashSeq::new(self.hash_len, targets.clone())),
        }))
    }

    fn is_resettable(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }
}

impl<'a> NodeSeq<'a> for ListNodeSeq<'a> {
    fn hash_len(&self) -> usize {
        self.hash_len
    }
}

/// Items of several sequences, one after another
pub struct ConcatSeq<S> {
    hash_len: usize,
    seqs: Vec<S>,
    current: usize,
}

impl<S: Seq> ConcatSeq<S> {
    pub fn new(hash_len: usize, seqs: Vec<S>) -> Self {
        Self { hash_len, seqs, current: 0 }
    }
}

impl<S: Seq> Seq for ConcatSeq<S> {
    type Item = S::Item;

    fn next(&mut self) -> Result<Option<S::Item>> {
        while let Some(seq) = self.seqs.get_mut(self.current) {
            if let Some(item) = seq.next()? {
                return Ok(Some(item));
            }
            self.current += 1;
        }
        Ok(None)
    }

    fn is_resettable(&self) -> bool {
        self.seqs.iter().all(|s| s.is_resettable())
    }

    fn reset(&mut self) -> Result<()> {
        if !self.is_resettable() {
            return Err(HdagError::NotResettable);
        }
        for seq in &mut self.seqs {
            seq.reset()?;
        }
        self.current = 0;
        Ok(())
    }
}

impl<'a, S: HashSeq<'a>> HashSeq<'a> for ConcatSeq<S> {
    fn hash_len(&self) -> usize {
        self.hash_len
    }
}

impl<'a, S: NodeSeq<'a>> NodeSeq<'a> for ConcatSeq<S> {
    fn hash_len(&self) -> usize {
        self.hash_len
    }
}
