//! Error types for the bundle engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HdagError>;

#[derive(Error, Debug)]
pub enum HdagError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Graph cycle detected")]
    GraphCycle,

    #[error("Node conflict: {0} has different known targets")]
    NodeConflict(String),

    #[error("Duplicate node: {0}")]
    NodeDuplicate(String),

    #[error("Duplicate edge: {src} -> {dst}")]
    EdgeDuplicate { src: String, dst: String },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Metadata error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sequence cannot be reset")]
    NotResettable,
}

/// Fault classification shared by every failing operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Errno,
    GraphCycle,
    NodeConflict,
    NodeDuplicate,
    EdgeDuplicate,
    InvalidFormat,
}

impl HdagError {
    pub fn kind(&self) -> FaultKind {
        match self {
            HdagError::Io(_) | HdagError::NotResettable => FaultKind::Errno,
            HdagError::GraphCycle => FaultKind::GraphCycle,
            HdagError::NodeConflict(_) => FaultKind::NodeConflict,
            HdagError::NodeDuplicate(_) => FaultKind::NodeDuplicate,
            HdagError::EdgeDuplicate { .. } => FaultKind::EdgeDuplicate,
            HdagError::InvalidFormat(_) | HdagError::Json(_) => FaultKind::InvalidFormat,
        }
    }

    /// OS error number for `Errno` faults
    pub fn code(&self) -> Option<i32> {
        match self {
            HdagError::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }

    pub(crate) fn out_of_memory() -> Self {
        HdagError::Io(std::io::Error::from(std::io::ErrorKind::OutOfMemory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(HdagError::GraphCycle.kind(), FaultKind::GraphCycle);
        assert_eq!(HdagError::NodeConflict("01".into()).kind(), FaultKind::NodeConflict);
        assert_eq!(HdagError::InvalidFormat("x".into()).kind(), FaultKind::InvalidFormat);
        assert_eq!(HdagError::NotResettable.kind(), FaultKind::Errno);
    }

    #[test]
    fn test_io_code() {
        let err = HdagError::from(std::io::Error::from_raw_os_error(2));
        assert_eq!(err.kind(), FaultKind::Errno);
        assert_eq!(err.code(), Some(2));
        assert_eq!(HdagError::GraphCycle.code(), None);
    }
}
