//! HDAG - hash-addressed directed acyclic graphs
//!
//! # Architecture
//!
//! - **Bundles**: in-memory graphs built from node sequences and organized
//!   into a canonical, compact, indexed form
//! - **Files**: memory-mapped, read-only images of organized bundles
//! - **Database**: a directory of files kept consistent by merging, plus a
//!   cross-file component graph
//!
//! # Usage example
//!
//! ```no_run
//! use hdag::{Database, ListNodeSeq};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::create(Some("./graph.db".as_ref()), false, 0o755, 4)?;
//!
//! let mut seq = ListNodeSeq::from_records(4, vec![
//!     ([0u8, 0, 0, 1], vec![[0u8, 0, 0, 2]]),
//!     ([0u8, 0, 0, 2], vec![]),
//! ]);
//! let stats = db.merge(&mut seq)?;
//! println!("committed {} nodes", stats.committed);
//!
//! let node = db.get_node(&[0, 0, 0, 1]).expect("node is stored");
//! println!("generation {}", node.generation);
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod db;
pub mod error;
pub mod hash;
pub mod seq;
pub mod storage;
pub mod text;

pub use bundle::{Bundle, BundleState, Node, Targets};
pub use db::{Context, Database, MergeStats, NodeInfo};
pub use error::{FaultKind, HdagError, Result};
pub use seq::{ConcatSeq, HashSeq, ListNodeSeq, NodeItem, NodeSeq, Seq};
pub use storage::{HdagFile, Pathname};
pub use text::TxtNodeSeq;
