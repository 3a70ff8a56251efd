//! On-disk storage: HDAG files and database metadata

pub mod file;
pub mod header;

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HdagError, Result};
use crate::hash;

pub use file::{FileContents, HdagFile, Pathname};
pub use header::{FileHeader, HEADER_SIZE};

/// Name of the metadata file inside a database directory
pub const METADATA_FILE: &str = "metadata.json";

/// Database metadata format version
pub const METADATA_VERSION: u32 = 1;

/// Database metadata, stored as JSON next to the bundle files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    pub format_version: u32,
    pub hash_len: usize,
    /// Permission bits for new bundle files
    pub file_mode: u32,
    pub created_at: u64,
}

impl DatabaseMetadata {
    pub fn new(hash_len: usize, file_mode: u32) -> Self {
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self { format_version: METADATA_VERSION, hash_len, file_mode, created_at }
    }

    pub fn read(dir: &Path) -> Result<Self> {
        let file = File::open(dir.join(METADATA_FILE))?;
        let metadata: Self = serde_json::from_reader(file)?;
        if metadata.format_version != METADATA_VERSION {
            return Err(HdagError::InvalidFormat(format!(
                "unsupported metadata version {}",
                metadata.format_version
            )));
        }
        if !hash::is_valid_len(metadata.hash_len) {
            return Err(HdagError::InvalidFormat(format!("invalid hash length {}", metadata.hash_len)));
        }
        Ok(metadata)
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let file = File::create(dir.join(METADATA_FILE))?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
