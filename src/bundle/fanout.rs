//! 256-entry fanout over the first hash byte

use super::node::NodeArray;

pub const FANOUT_LEN: usize = 256;

/// Build the fanout of a sorted node array: `fanout[b]` is the number of
/// nodes whose first hash byte is `<= b`. Hashless and empty arrays get an
/// empty fanout.
pub fn fill(nodes: &NodeArray<'_>, hash_len: usize) -> Vec<u32> {
    if hash_len == 0 || nodes.is_empty() {
        return Vec::new();
    }
    let mut fanout = vec![0u32; FANOUT_LEN];
    let mut idx = 0usize;
    let count = nodes.len();
    for byte in 0..FANOUT_LEN {
        while idx < count && (nodes.hash(idx)[0] as usize) <= byte {
            idx += 1;
        }
        fanout[byte] = idx as u32;
    }
    fanout
}

/// Node index window `[start, end)` holding every hash starting with `first_byte`
pub fn window(fanout: &[u32], first_byte: u8) -> (usize, usize) {
    let b = first_byte as usize;
    let start = if b == 0 { 0 } else { fanout[b - 1] as usize };
    (start, fanout[b] as usize)
}

/// Check the fanout describes the node array
pub fn is_consistent(fanout: &[u32], nodes: &NodeArray<'_>, hash_len: usize) -> bool {
    if hash_len == 0 || nodes.is_empty() {
        return fanout.is_empty();
    }
    fanout.len() == FANOUT_LEN
        && fanout.windows(2).all(|w| w[0] <= w[1])
        && fanout[FANOUT_LEN - 1] as usize == nodes.len()
        && fill(nodes, hash_len) == fanout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::node;
    use crate::bundle::target::Targets;

    fn nodes_with_first_bytes(bytes: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (i, &b) in bytes.iter().enumerate() {
            node::push(&mut buf, &[b, 0, 0, i as u8], Targets::Absent);
        }
        buf
    }

    #[test]
    fn test_fill_counts_by_first_byte() {
        let buf = nodes_with_first_bytes(&[0x00, 0x00, 0x10, 0xff]);
        let nodes = NodeArray::new(&buf, 4);
        let fanout = fill(&nodes, 4);
        assert_eq!(fanout.len(), FANOUT_LEN);
        assert_eq!(fanout[0x00], 2);
        assert_eq!(fanout[0x0f], 2);
        assert_eq!(fanout[0x10], 3);
        assert_eq!(fanout[0xfe], 3);
        assert_eq!(fanout[0xff], 4);
        assert!(is_consistent(&fanout, &nodes, 4));
    }

    #[test]
    fn test_window() {
        let buf = nodes_with_first_bytes(&[0x00, 0x00, 0x10, 0xff]);
        let nodes = NodeArray::new(&buf, 4);
        let fanout = fill(&nodes, 4);
        assert_eq!(window(&fanout, 0x00), (0, 2));
        assert_eq!(window(&fanout, 0x10), (2, 3));
        assert_eq!(window(&fanout, 0x11), (3, 3));
        assert_eq!(window(&fanout, 0xff), (3, 4));
    }

    #[test]
    fn test_single_node() {
        let buf = nodes_with_first_bytes(&[0x42]);
        let nodes = NodeArray::new(&buf, 4);
        let fanout = fill(&nodes, 4);
        assert!(fanout[..0x42].iter().all(|&c| c == 0));
        assert!(fanout[0x42..].iter().all(|&c| c == 1));
    }

    #[test]
    fn test_empty_and_hashless() {
        let nodes = NodeArray::new(&[], 4);
        assert!(fill(&nodes, 4).is_empty());
        let mut buf = Vec::new();
        node::push(&mut buf, &[], Targets::Absent);
        assert!(fill(&NodeArray::new(&buf, 0), 0).is_empty());
    }
}
