//! Graphviz DOT rendering

use std::io::Write;

use crate::bundle::Bundle;
use crate::error::Result;

fn node_id(bundle: &Bundle, idx: usize) -> String {
    if bundle.is_hashless() {
        format!("n{}", idx)
    } else {
        hex::encode(bundle.node(idx).hash())
    }
}

/// Render a compacted bundle as a DOT digraph; unknown nodes are dashed
pub fn write_dot<W: Write>(bundle: &Bundle, out: &mut W) -> Result<()> {
    writeln!(out, "digraph hdag {{")?;
    for (idx, node) in bundle.iter_nodes().enumerate() {
        let id = node_id(bundle, idx);
        if node.is_known() {
            writeln!(out, "    \"{}\";", id)?;
        } else {
            writeln!(out, "    \"{}\" [style=dashed];", id)?;
        }
    }
    for idx in 0..bundle.node_count() {
        let src = node_id(bundle, idx);
        for k in 0..bundle.targets_count(idx) {
            writeln!(out, "    \"{}\" -> \"{}\";", src, node_id(bundle, bundle.targets_node_idx(idx, k)))?;
        }
    }
    writeln!(out, "}}")?;
    Ok(())
}
