use protrack_core::{Collection, DomainError, RecordId};
use thiserror::Error;

use crate::backend::BackendError;
use crate::replay::ReplayError;
use crate::store::StoreError;

/// Errors surfaced by the offline layer to its callers.
///
/// Transient backend failures never show up here on the write path: they
/// are absorbed by falling back to the local mirror.
#[derive(Debug, Error)]
pub enum FallbackError {
    /// Invalid input, caught before anything was queued.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The backend refused the write (online path only).
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A write points at a locally-created record that never reached the
    /// backend (its create is still queued or was dead-lettered).
    #[error("{0} has not been replayed to the backend")]
    Unreplayed(RecordId),

    #[error("corrupt {collection} record: {message}")]
    Corrupt {
        collection: Collection,
        message: String,
    },
}

impl FallbackError {
    pub(crate) fn corrupt(collection: Collection, err: serde_json::Error) -> Self {
        FallbackError::Corrupt {
            collection,
            message: err.to_string(),
        }
    }
}

impl From<ReplayError> for FallbackError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::Backend(e) => FallbackError::Backend(e),
            ReplayError::Store(e) => FallbackError::Store(e),
            ReplayError::UnresolvedReference(id) => FallbackError::Unreplayed(id),
        }
    }
}

pub type FallbackResult<T> = Result<T, FallbackError>;
