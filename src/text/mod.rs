//! Adjacency-list text format
//!
//! One node per line: the node hash followed by its target hashes, all in
//! hex and separated by whitespace. Blank lines are skipped. Hex values
//! shorter than the hash length are right-aligned, i.e. zero-padded on the
//! left, so `0f` reads as `0000000f` with a four-byte hash.

pub mod dot;

use std::borrow::Cow;
use std::io::{BufRead, Write};

use crate::bundle::Bundle;
use crate::error::{HdagError, Result};
use crate::seq::{ListHashSeq, NodeItem, NodeSeq, Seq};

/// Parse one hex token into a full-width hash
pub fn parse_hash(token: &str, hash_len: usize) -> Result<Vec<u8>> {
    let bytes = hex::decode(token)
        .map_err(|e| HdagError::InvalidFormat(format!("invalid hash {:?}: {}", token, e)))?;
    if bytes.len() > hash_len {
        return Err(HdagError::InvalidFormat(format!(
            "hash {:?} is longer than {} bytes",
            token, hash_len
        )));
    }
    let mut hash = vec![0u8; hash_len];
    hash[hash_len - bytes.len()..].copy_from_slice(&bytes);
    Ok(hash)
}

/// Single-pass node sequence over text input
pub struct TxtNodeSeq<R> {
    reader: R,
    hash_len: usize,
    line: Vec<u8>,
    line_no: usize,
}

impl<R: BufRead> TxtNodeSeq<R> {
    pub fn new(reader: R, hash_len: usize) -> Self {
        Self { reader, hash_len, line: Vec::new(), line_no: 0 }
    }
}

impl<R: BufRead> Seq for TxtNodeSeq<R> {
    type Item = NodeItem<'static>;

    fn next(&mut self) -> Result<Option<NodeItem<'static>>> {
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let text = std::str::from_utf8(&self.line).map_err(|e| {
                HdagError::InvalidFormat(format!("line {}: invalid character: {}", self.line_no, e))
            })?;
            let mut tokens = text.split_whitespace();
            let Some(first) = tokens.next() else { continue };

            let with_line = |e: HdagError, line_no: usize| match e {
                HdagError::InvalidFormat(msg) => HdagError::InvalidFormat(format!("line {}: {}", line_no, msg)),
                other => other,
            };
            let hash = parse_hash(first, self.hash_len).map_err(|e| with_line(e, self.line_no))?;
            let mut targets = Vec::new();
            for token in tokens {
                let target = parse_hash(token, self.hash_len).map_err(|e| with_line(e, self.line_no))?;
                targets.extend_from_slice(&target);
            }
            return Ok(Some(NodeItem {
                hash: Cow::Owned(hash),
                targets: Box::new(ListHashSeq::new(self.hash_len, targets)),
            }));
        }
    }
}

impl<R: BufRead> NodeSeq<'static> for TxtNodeSeq<R> {
    fn hash_len(&self) -> usize {
        self.hash_len
    }
}

/// Write the known nodes of a bundle in adjacency-list form
pub fn write_txt<W: Write>(bundle: &Bundle, out: &mut W) -> Result<()> {
    for (idx, node) in bundle.iter_nodes().enumerate() {
        if !node.is_known() {
            continue;
        }
        write!(out, "{}", hex::encode(node.hash()))?;
        for k in 0..bundle.targets_count(idx) {
            write!(out, " {}", hex::encode(bundle.targets_node_hash(idx, k)))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::collect_hashes;

    #[test]
    fn test_parse_hash_pads_on_the_left() {
        assert_eq!(parse_hash("0f", 4).unwrap(), vec![0, 0, 0, 0x0f]);
        assert_eq!(parse_hash("DEADBEEF", 4).unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(parse_hash("abc", 4), Err(HdagError::InvalidFormat(_))));
        assert!(matches!(parse_hash("zz", 4), Err(HdagError::InvalidFormat(_))));
        assert!(matches!(parse_hash("0102030405", 4), Err(HdagError::InvalidFormat(_))));
    }

    #[test]
    fn test_txt_node_seq_rejects_non_utf8() {
        let input: &[u8] = b"01 02\n01 \xff02\n";
        let mut seq = TxtNodeSeq::new(input, 4);
        assert!(seq.next().unwrap().is_some());
        let err = seq.next().err().unwrap();
        assert!(matches!(err, HdagError::InvalidFormat(ref msg) if msg.starts_with("line 2:")));
        assert_eq!(err.kind(), crate::error::FaultKind::InvalidFormat);
    }

    #[test]
    fn test_txt_node_seq() {
        let input = "01 02 03\n\n   \n02\n";
        let mut seq = TxtNodeSeq::new(input.as_bytes(), 4);
        let mut item = seq.next().unwrap().unwrap();
        assert_eq!(&*item.hash, &[0, 0, 0, 1]);
        assert_eq!(collect_hashes(&mut item.targets).unwrap(), vec![0, 0, 0, 2, 0, 0, 0, 3]);
        let item = seq.next().unwrap().unwrap();
        assert_eq!(&*item.hash, &[0, 0, 0, 2]);
        assert!(seq.next().unwrap().is_none());
        assert!(!seq.is_resettable());
        assert!(matches!(seq.reset(), Err(HdagError::NotResettable)));
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let mut seq = TxtNodeSeq::new("01\n02 xyz\n".as_bytes(), 4);
        assert!(seq.next().unwrap().is_some());
        match seq.next() {
            Err(HdagError::InvalidFormat(msg)) => assert!(msg.starts_with("line 2:"), "{}", msg),
            other => panic!("unexpected {:?}", other.map(|i| i.is_some())),
        }
    }

    #[test]
    fn test_write_txt_round_trip() {
        let input = "03\n01 02 03\n02 03\n";
        let mut seq = TxtNodeSeq::new(input.as_bytes(), 4);
        let bundle = Bundle::organized_from_node_seq(&mut seq).unwrap();
        let mut out = Vec::new();
        write_txt(&bundle, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "00000001 00000002 00000003\n00000002 00000003\n00000003\n"
        );
    }
}
