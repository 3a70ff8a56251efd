//! Hash DAG database: a directory of organized bundle files
//!
//! Every merge ingests a node sequence into a new organized bundle, drops
//! nodes the database already has, rebuilds the bundles whose unknown nodes
//! got resolved, and commits the result as one new file. The bundle list is
//! swapped under a write lock only after the new file is in place.

pub mod components;
pub mod context;

use std::fs::{self, DirBuilder, Permissions};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tracing::{info, warn};

use crate::bundle::Bundle;
use crate::error::{HdagError, Result};
use crate::hash;
use crate::seq::{ConcatSeq, NodeSeq};
use crate::storage::{DatabaseMetadata, HdagFile, Pathname};

pub use components::Components;
pub use context::{Context, ContextNode};

/// Extension of committed bundle files
pub const FILE_EXTENSION: &str = "hdag";

/// Suffix of a bundle file being written by a merge
pub const NEW_FILE_SUFFIX: &str = ".hdag.new";

/// Default permission bits for new bundle files
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Owned copy of a node found in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub bundle_idx: usize,
    pub node_idx: usize,
    pub component: u32,
    pub generation: u32,
    /// Target hashes; `None` for an unknown node
    pub targets: Option<Vec<Vec<u8>>>,
}

/// What a merge did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Known nodes in the incoming sequence, after dedup
    pub incoming: usize,
    /// Incoming nodes already present with equal targets
    pub dropped: usize,
    /// Existing bundles folded into the new one
    pub rebuilt: usize,
    /// Nodes in the committed bundle; zero when nothing was committed
    pub committed: usize,
}

struct DbState {
    bundles: Vec<Bundle>,
    components: Components,
}

pub struct Database {
    dir: Option<PathBuf>,
    hash_len: usize,
    file_mode: u32,
    state: RwLock<DbState>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dir", &self.dir)
            .field("hash_len", &self.hash_len)
            .field("bundles", &self.bundle_count())
            .finish()
    }
}

/// Template directory name: a trailing run of `X` is the random part
fn template_prefix(name: &str) -> &str {
    name.trim_end_matches('X')
}

impl Database {
    /// Create an empty database.
    ///
    /// With no path the database lives in memory. With `template` the last
    /// path component is a name prefix and a unique directory is created
    /// next to it. `mode` is the directory's permission bits.
    pub fn create(path: Option<&Path>, template: bool, mode: u32, hash_len: usize) -> Result<Self> {
        if !hash::is_valid_len(hash_len) {
            return Err(HdagError::InvalidFormat(format!("invalid hash length {}", hash_len)));
        }
        let file_mode = mode & 0o666;

        let dir = match path {
            None => None,
            Some(path) if template => {
                let parent = match path.parent() {
                    Some(p) if !p.as_os_str().is_empty() => p,
                    _ => Path::new("."),
                };
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                let dir = tempfile::Builder::new()
                    .prefix(template_prefix(name))
                    .rand_bytes(6)
                    .tempdir_in(parent)?
                    .keep();
                fs::set_permissions(&dir, Permissions::from_mode(mode))?;
                Some(dir)
            }
            Some(path) => {
                DirBuilder::new().mode(mode).create(path)?;
                Some(path.to_path_buf())
            }
        };

        if let Some(dir) = &dir {
            if let Err(e) = DatabaseMetadata::new(hash_len, file_mode).write(dir) {
                let _ = fs::remove_dir_all(dir);
                return Err(e);
            }
            info!(dir = %dir.display(), hash_len, "created database");
        }

        Ok(Self {
            dir,
            hash_len,
            file_mode,
            state: RwLock::new(DbState { bundles: Vec::new(), components: Components::empty()? }),
        })
    }

    /// Open an existing database directory
    pub fn open(dir: &Path) -> Result<Self> {
        let metadata = DatabaseMetadata::read(dir)?;

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.ends_with(".new") {
                warn!(path = %path.display(), "removing stale merge file");
                fs::remove_file(&path)?;
            } else if path.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut bundles = Vec::with_capacity(paths.len());
        for path in &paths {
            let file = HdagFile::open(path)?;
            if file.hash_len() != metadata.hash_len {
                return Err(HdagError::InvalidFormat(format!(
                    "{}: hash length {} does not match database ({})",
                    path.display(),
                    file.hash_len(),
                    metadata.hash_len
                )));
            }
            let bundle = Bundle::from_file(file);
            bundle.check()?;
            bundles.push(bundle);
        }

        let components = Components::collect(&bundles.iter().collect::<Vec<_>>())?;
        info!(dir = %dir.display(), bundles = bundles.len(), "opened database");
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            hash_len: metadata.hash_len,
            file_mode: metadata.file_mode,
            state: RwLock::new(DbState { bundles, components }),
        })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn hash_len(&self) -> usize {
        self.hash_len
    }

    pub fn bundle_count(&self) -> usize {
        self.state.read().bundles.len()
    }

    /// Known and unknown nodes over all bundles
    pub fn node_count(&self) -> usize {
        self.state.read().bundles.iter().map(|b| b.node_count()).sum()
    }

    /// Paths of the committed bundle files, in bundle order
    pub fn bundle_paths(&self) -> Vec<PathBuf> {
        self.state
            .read()
            .bundles
            .iter()
            .filter_map(|b| b.hdag_file().and_then(|f| f.path()).map(Path::to_path_buf))
            .collect()
    }

    /// Run `f` with read access to the bundle list
    pub fn with_bundles<R>(&self, f: impl FnOnce(&[Bundle]) -> R) -> R {
        f(&self.state.read().bundles)
    }

    /// Number of database-wide components
    pub fn component_count(&self) -> usize {
        self.state.read().components.count()
    }

    /// First node with this hash in any bundle, preferring known nodes
    pub fn get_node(&self, hash: &[u8]) -> Option<NodeInfo> {
        let state = self.state.read();
        let ctx = Context::all(&state.bundles);
        let node = ctx.get_known_node(hash).or_else(|| ctx.get_node(hash))?;
        let bundle = &state.bundles[node.bundle_idx];
        let targets = node.is_known().then(|| {
            (0..bundle.targets_count(node.node_idx))
                .map(|k| bundle.targets_node_hash(node.node_idx, k).to_vec())
                .collect()
        });
        Some(NodeInfo {
            bundle_idx: node.bundle_idx,
            node_idx: node.node_idx,
            component: node.component,
            generation: node.generation,
            targets,
        })
    }

    /// Database-wide component id of the node with this hash
    pub fn component_of(&self, hash: &[u8]) -> Option<u32> {
        let state = self.state.read();
        let node = Context::all(&state.bundles).get_node(hash)?;
        state.components.component_of(&state.bundles[node.bundle_idx], node.bundle_idx, node.node_idx)
    }

    /// Merge a node sequence into the database.
    ///
    /// Fails with `NodeConflict` when an incoming known node has different
    /// targets than a known node already stored. Merging the same sequence
    /// twice commits nothing the second time.
    pub fn merge<'a, S: NodeSeq<'a> + ?Sized>(&self, seq: &mut S) -> Result<MergeStats> {
        if seq.hash_len() != self.hash_len {
            return Err(HdagError::InvalidFormat(format!(
                "sequence hash length {} does not match database ({})",
                seq.hash_len(),
                self.hash_len
            )));
        }
        let mut incoming = Bundle::from_node_seq(seq)?;
        incoming.organize()?;

        let guard = self.state.upgradable_read();
        let mut stats = MergeStats {
            incoming: incoming.iter_nodes().filter(|n| n.is_known()).count(),
            ..MergeStats::default()
        };

        let (mut merged, rebuild, components) = {
            let bundles = &guard.bundles;
            let mut dropped = vec![false; incoming.node_count()];
            let mut rebuild = vec![false; bundles.len()];

            for (idx, node) in incoming.iter_nodes().enumerate() {
                if !node.is_known() {
                    continue;
                }
                for (b, bundle) in bundles.iter().enumerate() {
                    let Some(existing) = bundle.find_node_idx(node.hash()) else { continue };
                    if !bundle.node(existing).is_known() {
                        rebuild[b] = true;
                    } else if incoming.same_targets(idx, bundle, existing) {
                        dropped[idx] = true;
                    } else {
                        return Err(HdagError::NodeConflict(hash::to_hex(node.hash())));
                    }
                }
            }
            stats.dropped = dropped.iter().filter(|&&d| d).count();

            // Bundles pointing into a rebuilt bundle get re-enumerated too
            loop {
                let mut changed = false;
                for b in 0..bundles.len() {
                    if rebuild[b] {
                        continue;
                    }
                    let resolved = (0..bundles.len())
                        .filter(|&r| rebuild[r])
                        .any(|r| resolves_unknowns(&bundles[r], &bundles[b]));
                    if resolved {
                        rebuild[b] = true;
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
            }
            stats.rebuilt = rebuild.iter().filter(|&&r| r).count();

            let mut seqs: Vec<Box<dyn NodeSeq<'_> + '_>> = vec![Box::new(incoming.node_seq_skipping(&dropped))];
            for (b, bundle) in bundles.iter().enumerate() {
                if rebuild[b] {
                    seqs.push(Box::new(bundle.node_seq()));
                }
            }
            let mut merged = Bundle::from_node_seq(&mut ConcatSeq::new(self.hash_len, seqs))?;
            merged.organize_with(&Context::excluding(bundles, &rebuild))?;

            if merged.iter_nodes().all(|n| !n.is_known()) {
                info!(dropped = stats.dropped, "merge found nothing new");
                return Ok(stats);
            }
            stats.committed = merged.node_count();

            match &self.dir {
                Some(dir) => merged.file(Pathname::Template { dir, suffix: NEW_FILE_SUFFIX }, self.file_mode)?,
                None => merged.file(Pathname::Anonymous, self.file_mode)?,
            }

            let collected = {
                let mut kept: Vec<&Bundle> =
                    bundles.iter().enumerate().filter(|(b, _)| !rebuild[*b]).map(|(_, bundle)| bundle).collect();
                kept.push(&merged);
                Components::collect(&kept)
            };
            match collected {
                Ok(components) => (merged, rebuild, components),
                Err(e) => {
                    discard(merged);
                    return Err(e);
                }
            }
        };

        if let Some(final_path) = merged.hdag_file().and_then(|f| f.path()).map(committed_path) {
            let renamed = match merged.hdag_file_mut() {
                Some(file) => file.rename(Some(&final_path)),
                None => Ok(()),
            };
            if let Err(e) = renamed {
                discard(merged);
                return Err(e);
            }
        }

        let mut state = RwLockUpgradableReadGuard::upgrade(guard);
        let previous = std::mem::take(&mut state.bundles);
        let mut bundles = Vec::with_capacity(previous.len() + 1);
        for (b, mut bundle) in previous.into_iter().enumerate() {
            if !rebuild[b] {
                bundles.push(bundle);
                continue;
            }
            if let Some(file) = bundle.hdag_file_mut() {
                if let Err(e) = file.unlink() {
                    warn!(error = %e, "failed to unlink replaced bundle file");
                }
            }
            if let Err(e) = bundle.close() {
                warn!(error = %e, "failed to close replaced bundle");
            }
        }
        bundles.push(merged);
        state.bundles = bundles;
        state.components = components;

        info!(
            incoming = stats.incoming,
            dropped = stats.dropped,
            rebuilt = stats.rebuilt,
            committed = stats.committed,
            bundles = state.bundles.len(),
            "merge committed"
        );
        Ok(stats)
    }

    /// Sync and unmap every bundle
    pub fn close(self) -> Result<()> {
        let state = self.state.into_inner();
        for bundle in state.bundles {
            bundle.close()?;
        }
        Ok(())
    }
}

/// Whether `target` has an unknown node that `source` knows
fn resolves_unknowns(source: &Bundle, target: &Bundle) -> bool {
    target
        .unknown_hashes()
        .iter()
        .any(|hash| source.find_node_idx(hash).map_or(false, |idx| source.node(idx).is_known()))
}

/// Final name of a merge file: the `.new` suffix stripped
fn committed_path(path: &Path) -> PathBuf {
    path.with_extension("")
}

/// Remove an uncommitted merge file
fn discard(mut bundle: Bundle) {
    if let Some(file) = bundle.hdag_file_mut() {
        if let Err(e) = file.unlink() {
            warn!(error = %e, "failed to remove uncommitted merge file");
        }
    }
    let _ = bundle.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::ListNodeSeq;
    use tempfile::TempDir;

    fn h(v: u32) -> [u8; 4] {
        v.to_be_bytes()
    }

    fn seq(records: Vec<([u8; 4], Vec<[u8; 4]>)>) -> ListNodeSeq<'static> {
        ListNodeSeq::from_records(4, records)
    }

    #[test]
    fn test_create_writes_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let db = Database::create(Some(&path), false, 0o755, 4).unwrap();
        assert_eq!(db.dir(), Some(path.as_path()));
        assert_eq!(DatabaseMetadata::read(&path).unwrap().hash_len, 4);
        assert!(Database::create(Some(&path), false, 0o755, 4).is_err());
    }

    #[test]
    fn test_create_from_template() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(Some(&dir.path().join("dbXXXXXX")), true, 0o700, 4).unwrap();
        let created = db.dir().unwrap();
        assert!(created.is_dir());
        let name = created.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("db") && name.len() == 8);
    }

    #[test]
    fn test_create_rejects_bad_hash_len() {
        assert!(matches!(Database::create(None, false, 0o755, 5), Err(HdagError::InvalidFormat(_))));
    }

    #[test]
    fn test_merge_in_memory() {
        let db = Database::create(None, false, 0o755, 4).unwrap();
        let stats = db.merge(&mut seq(vec![(h(1), vec![h(2)]), (h(2), vec![])])).unwrap();
        assert_eq!(stats.committed, 2);
        assert_eq!(db.bundle_count(), 1);
        let node = db.get_node(&h(1)).unwrap();
        assert_eq!(node.targets, Some(vec![h(2).to_vec()]));
        assert_eq!(node.generation, 2);
        assert!(db.get_node(&h(3)).is_none());
    }

    #[test]
    fn test_merge_conflict_leaves_database_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let db = Database::create(Some(&path), false, 0o755, 4).unwrap();
        db.merge(&mut seq(vec![(h(1), vec![h(2)])])).unwrap();
        let files = db.bundle_paths();

        let err = db.merge(&mut seq(vec![(h(1), vec![h(3)])])).unwrap_err();
        assert!(matches!(err, HdagError::NodeConflict(_)));
        assert_eq!(db.bundle_paths(), files);
        let entries: Vec<_> = fs::read_dir(&path).unwrap().collect();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let db = Database::create(None, false, 0o755, 4).unwrap();
        let records = vec![(h(1), vec![h(2)]), (h(2), vec![])];
        db.merge(&mut seq(records.clone())).unwrap();
        let stats = db.merge(&mut seq(records)).unwrap();
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.committed, 0);
        assert_eq!(db.bundle_count(), 1);
    }

    #[test]
    fn test_merge_rejects_hash_length_mismatch() {
        let db = Database::create(None, false, 0o755, 8).unwrap();
        assert!(matches!(db.merge(&mut seq(vec![(h(1), vec![])])), Err(HdagError::InvalidFormat(_))));
    }

    #[test]
    fn test_open_removes_stale_new_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let db = Database::create(Some(&path), false, 0o755, 4).unwrap();
        db.merge(&mut seq(vec![(h(1), vec![h(2)])])).unwrap();
        db.close().unwrap();
        let stale = path.join("abcdef.hdag.new");
        fs::write(&stale, b"partial").unwrap();

        let db = Database::open(&path).unwrap();
        assert!(!stale.exists());
        assert_eq!(db.bundle_count(), 1);
        assert_eq!(db.component_of(&h(1)), db.component_of(&h(2)));
    }

    #[test]
    fn test_committed_path() {
        assert_eq!(committed_path(Path::new("/d/abc123.hdag.new")), PathBuf::from("/d/abc123.hdag"));
    }
}
