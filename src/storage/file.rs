//! Memory-mapped HDAG files
//!
//! A file is written once at creation and never modified afterwards. The
//! mapping outlives the descriptor, which is closed as soon as the file is
//! mapped.

use std::fs::{self, OpenOptions, Permissions};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};
use tracing::{debug, info};

use super::header::{FileHeader, HEADER_SIZE};
use crate::bundle::EdgeArray;
use crate::error::{HdagError, Result};

/// Where a new file goes
#[derive(Debug, Clone, Copy)]
pub enum Pathname<'a> {
    /// Anonymous memory, no filesystem entry
    Anonymous,
    /// Exactly this path; it must not exist
    Exact(&'a Path),
    /// A fresh unique name inside `dir` ending with `suffix`
    Template { dir: &'a Path, suffix: &'a str },
}

/// Section contents of a file being created
pub struct FileContents<'a> {
    pub hash_len: usize,
    pub nodes: &'a [u8],
    pub nodes_fanout: &'a [u32],
    pub extra_edges: EdgeArray<'a>,
    pub unknown_hashes: &'a [u8],
}

/// Created files stay writable; opened files are mapped shared and read-only
enum Mapping {
    Writable(MmapMut),
    ReadOnly(Mmap),
}

impl std::ops::Deref for Mapping {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Mapping::Writable(mmap) => mmap,
            Mapping::ReadOnly(mmap) => mmap,
        }
    }
}

pub struct HdagFile {
    path: Option<PathBuf>,
    mmap: Mapping,
    header: FileHeader,
}

impl std::fmt::Debug for HdagFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdagFile")
            .field("path", &self.path)
            .field("size", &self.mmap.len())
            .field("nodes", &self.header.node_num())
            .finish()
    }
}

fn map_sized(file: &fs::File, size: usize) -> Result<MmapMut> {
    file.set_len(size as u64)?;
    let mmap = unsafe { MmapMut::map_mut(file)? };
    Ok(mmap)
}

impl HdagFile {
    /// Create a file holding `contents` and map it read-write.
    ///
    /// A partially created file is removed on failure.
    pub fn create(pathname: Pathname<'_>, mode: u32, contents: &FileContents<'_>) -> Result<Self> {
        let hash_len = contents.hash_len;
        let header = FileHeader::new(
            hash_len,
            contents.nodes_fanout,
            contents.extra_edges.len(),
            contents.unknown_hashes.len() / hash_len.max(1),
        )?;
        header.validate()?;
        let size = header.file_size();
        if header.extra_edges_offset() - header.nodes_offset() != contents.nodes.len() {
            return Err(HdagError::InvalidFormat("node table does not match fanout".into()));
        }

        let (mut mmap, path) = match pathname {
            Pathname::Anonymous => (MmapMut::map_anon(size)?, None),
            Pathname::Exact(path) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .mode(mode)
                    .open(path)?;
                match map_sized(&file, size) {
                    Ok(mmap) => (mmap, Some(path.to_path_buf())),
                    Err(e) => {
                        let _ = fs::remove_file(path);
                        return Err(e);
                    }
                }
            }
            Pathname::Template { dir, suffix } => {
                let tmp = tempfile::Builder::new()
                    .prefix("")
                    .suffix(suffix)
                    .rand_bytes(6)
                    .permissions(Permissions::from_mode(mode))
                    .tempfile_in(dir)?;
                // Dropping `tmp` on error removes the file
                let mmap = map_sized(tmp.as_file(), size)?;
                let (_file, path) = tmp.keep().map_err(|e| e.error)?;
                (mmap, Some(path))
            }
        };

        header.write_to(&mut mmap[..HEADER_SIZE]);
        let nodes_at = header.nodes_offset();
        mmap[nodes_at..nodes_at + contents.nodes.len()].copy_from_slice(contents.nodes);
        let mut at = header.extra_edges_offset();
        for edge in contents.extra_edges.iter() {
            mmap[at..at + 4].copy_from_slice(&edge.to_le_bytes());
            at += 4;
        }
        let unknown_at = header.unknown_hashes_offset();
        mmap[unknown_at..unknown_at + contents.unknown_hashes.len()].copy_from_slice(contents.unknown_hashes);

        match &path {
            Some(p) => info!(path = %p.display(), size, "created hdag file"),
            None => debug!(size, "created anonymous hdag file"),
        }
        Ok(Self { path, mmap: Mapping::Writable(mmap), header })
    }

    /// Map an existing file, validating its size and header
    pub fn open(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        let len = file.metadata()?.len();
        if len < HEADER_SIZE as u64 {
            return Err(HdagError::InvalidFormat(format!("{}: file too small", path.display())));
        }
        let mmap = unsafe { Mmap::map(&file)? };
        let header = FileHeader::parse(&mmap[..HEADER_SIZE])?;
        header.validate()?;
        if header.file_size() as u64 != len {
            return Err(HdagError::InvalidFormat(format!(
                "{}: size {} does not match header ({})",
                path.display(),
                len,
                header.file_size()
            )));
        }
        debug!(path = %path.display(), nodes = header.node_num(), "opened hdag file");
        Ok(Self { path: Some(path.to_path_buf()), mmap: Mapping::ReadOnly(mmap), header })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Has a filesystem entry
    pub fn is_backed(&self) -> bool {
        self.path.is_some()
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn hash_len(&self) -> usize {
        self.header.hash_len as usize
    }

    pub fn node_count(&self) -> usize {
        self.header.node_num()
    }

    pub fn nodes_fanout(&self) -> &[u32] {
        &self.header.node_fanout
    }

    pub fn nodes_bytes(&self) -> &[u8] {
        &self.mmap[self.header.nodes_offset()..self.header.extra_edges_offset()]
    }

    pub fn extra_edges_bytes(&self) -> &[u8] {
        &self.mmap[self.header.extra_edges_offset()..self.header.unknown_hashes_offset()]
    }

    pub fn unknown_hashes_bytes(&self) -> &[u8] {
        &self.mmap[self.header.unknown_hashes_offset()..self.header.file_size()]
    }

    /// The whole file image
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Flush a created file to disk. Anonymous files and files mapped by
    /// `open` have nothing to flush.
    pub fn sync(&self) -> Result<()> {
        if let (Mapping::Writable(mmap), true) = (&self.mmap, self.is_backed()) {
            mmap.flush()?;
        }
        Ok(())
    }

    /// Move the file to `new_path`, or unlink it when `None`
    pub fn rename(&mut self, new_path: Option<&Path>) -> Result<()> {
        let Some(new_path) = new_path else {
            return self.unlink();
        };
        let old = self.path.as_deref().ok_or_else(|| {
            HdagError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "file is anonymous"))
        })?;
        fs::rename(old, new_path)?;
        info!(from = %old.display(), to = %new_path.display(), "renamed hdag file");
        self.path = Some(new_path.to_path_buf());
        Ok(())
    }

    /// Remove the filesystem entry; the mapping stays valid
    pub fn unlink(&mut self) -> Result<()> {
        if let Some(path) = &self.path {
            fs::remove_file(path)?;
            info!(path = %path.display(), "unlinked hdag file");
            self.path = None;
        }
        Ok(())
    }

    /// Sync and unmap
    pub fn close(self) -> Result<()> {
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::fanout::FANOUT_LEN;
    use tempfile::TempDir;

    fn contents<'a>(nodes: &'a [u8], fanout: &'a [u32], edges: &'a [u32]) -> FileContents<'a> {
        FileContents {
            hash_len: 4,
            nodes,
            nodes_fanout: fanout,
            extra_edges: EdgeArray::Words(edges),
            unknown_hashes: &[],
        }
    }

    fn one_node() -> (Vec<u8>, Vec<u32>) {
        let mut nodes = Vec::new();
        crate::bundle::node::push(&mut nodes, &[1, 2, 3, 4], crate::bundle::Targets::Absent);
        let mut fanout = vec![0u32; FANOUT_LEN];
        fanout[1..].iter_mut().for_each(|c| *c = 1);
        (nodes, fanout)
    }

    #[test]
    fn test_create_exact_and_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.hdag");
        let (nodes, fanout) = one_node();
        let file = HdagFile::create(Pathname::Exact(&path), 0o644, &contents(&nodes, &fanout, &[])).unwrap();
        assert!(file.is_backed());
        file.close().unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & 0o600, 0o600);

        let opened = HdagFile::open(&path).unwrap();
        assert_eq!(opened.node_count(), 1);
        assert_eq!(opened.nodes_bytes(), nodes.as_slice());
        assert_eq!(opened.as_bytes().len(), HEADER_SIZE + 20);
        assert_eq!(&opened.as_bytes()[..4], b"HDAG");
    }

    #[test]
    fn test_open_read_only_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.hdag");
        let (nodes, fanout) = one_node();
        HdagFile::create(Pathname::Exact(&path), 0o444, &contents(&nodes, &fanout, &[]))
            .unwrap()
            .close()
            .unwrap();

        let opened = HdagFile::open(&path).unwrap();
        opened.sync().unwrap();
        assert_eq!(opened.nodes_bytes(), nodes.as_slice());
        assert_eq!(fs::read(&path).unwrap(), opened.as_bytes());
    }

    #[test]
    fn test_create_exact_refuses_existing_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.hdag");
        fs::write(&path, b"x").unwrap();
        let (nodes, fanout) = one_node();
        let err = HdagFile::create(Pathname::Exact(&path), 0o644, &contents(&nodes, &fanout, &[])).unwrap_err();
        assert!(matches!(err, HdagError::Io(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists));
    }

    #[test]
    fn test_template_rename_and_unlink() {
        let dir = TempDir::new().unwrap();
        let (nodes, fanout) = one_node();
        let mut file = HdagFile::create(
            Pathname::Template { dir: dir.path(), suffix: ".hdag.new" },
            0o644,
            &contents(&nodes, &fanout, &[]),
        )
        .unwrap();
        let tmp_path = file.path().unwrap().to_path_buf();
        assert!(tmp_path.to_string_lossy().ends_with(".hdag.new"));

        let final_path = dir.path().join("b.hdag");
        file.rename(Some(&final_path)).unwrap();
        assert!(!tmp_path.exists());
        assert!(final_path.exists());

        file.rename(None).unwrap();
        assert!(!final_path.exists());
        assert!(!file.is_backed());
        assert_eq!(file.node_count(), 1);
    }

    #[test]
    fn test_extra_edges_are_little_endian() {
        let (nodes, fanout) = one_node();
        let file =
            HdagFile::create(Pathname::Anonymous, 0o644, &contents(&nodes, &fanout, &[0x0102_0304])).unwrap();
        assert!(!file.is_backed());
        assert_eq!(file.extra_edges_bytes(), &[4, 3, 2, 1]);
    }

    #[test]
    fn test_open_rejects_bad_files() {
        let dir = TempDir::new().unwrap();
        let short = dir.path().join("short.hdag");
        fs::write(&short, b"HDAG").unwrap();
        assert!(matches!(HdagFile::open(&short), Err(HdagError::InvalidFormat(_))));

        let (nodes, fanout) = one_node();
        let file = HdagFile::create(Pathname::Anonymous, 0o644, &contents(&nodes, &fanout, &[])).unwrap();
        let mut image = file.as_bytes().to_vec();
        image.push(0);
        let long = dir.path().join("long.hdag");
        fs::write(&long, &image).unwrap();
        assert!(matches!(HdagFile::open(&long), Err(HdagError::InvalidFormat(_))));
    }
}
