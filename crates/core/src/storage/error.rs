use std::fmt;
use uuid::Uuid;

/// Per-operation store failures. None of these are fatal; every one is
/// recoverable by correcting and retrying the admin action.
#[derive(Debug)]
pub enum StoreError {
    /// Rejected before any mutation took place.
    Validation(String),
    NotFound(Uuid),
    /// A concurrent writer won the version compare-and-swap.
    Conflict { id: Uuid, expected_version: i64 },
    /// The persistence write failed; in-memory state is unchanged.
    Storage(anyhow::Error),
}

impl StoreError {
    pub fn validation(err: anyhow::Error) -> Self {
        StoreError::Validation(format!("{err:#}"))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Validation(msg) => write!(f, "validation failed: {msg}"),
            StoreError::NotFound(id) => write!(f, "recommendation not found: {id}"),
            StoreError::Conflict {
                id,
                expected_version,
            } => write!(
                f,
                "concurrent edit of {id} (expected version {expected_version})"
            ),
            StoreError::Storage(err) => write!(f, "persistence failure: {err:#}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Storage(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
