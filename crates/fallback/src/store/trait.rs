use std::sync::Arc;

use async_trait::async_trait;
use protrack_core::{Collection, OperationId, RecordId};
use serde_json::Value;
use thiserror::Error;

use crate::types::{DeadLetter, PendingOperation};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("pending operation not found: {0}")]
    OperationNotFound(OperationId),
    #[error("dead letter not found: {0}")]
    DeadLetterNotFound(OperationId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Storage(format!("{err:#}"))
    }
}

/// Device-local state of the offline layer: the pending-operation queue,
/// parked (dead-lettered) operations, the record mirror, and the
/// local→remote id map.
///
/// Implementations must keep queue order stable: operations come back from
/// `pending_operations` in the order they were appended, and a requeued
/// dead letter goes to the tail.
#[async_trait]
pub trait OfflineStore: Send + Sync {
    async fn append_operation(&self, op: &PendingOperation) -> Result<(), StoreError>;

    /// All queued operations, oldest first.
    async fn pending_operations(&self) -> Result<Vec<PendingOperation>, StoreError>;

    /// The oldest queued operation.
    async fn head_operation(&self) -> Result<Option<PendingOperation>, StoreError>;

    async fn count_operations(&self) -> Result<usize, StoreError>;

    /// Drop an operation after its replay was confirmed.
    async fn remove_operation(&self, id: OperationId) -> Result<(), StoreError>;

    /// Bump `attempts` and remember the error of a failed replay.
    async fn record_failure(&self, id: OperationId, error: &str) -> Result<(), StoreError>;

    /// Move a queued operation to the dead-letter list.
    async fn dead_letter(&self, id: OperationId, reason: &str) -> Result<DeadLetter, StoreError>;

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError>;

    /// Put a dead letter back at the tail of the queue.
    async fn requeue_dead_letter(&self, id: OperationId) -> Result<PendingOperation, StoreError>;

    async fn discard_dead_letter(&self, id: OperationId) -> Result<(), StoreError>;

    /// Insert or replace a mirrored record. Replacing keeps its position.
    async fn put_record(
        &self,
        collection: Collection,
        id: &RecordId,
        data: &Value,
    ) -> Result<(), StoreError>;

    /// Store `data` under `to` in the position of the row keyed `from`, if
    /// there is one. Any other row already keyed `to` is dropped, so a record
    /// never appears under both its local and its remote id.
    async fn rekey_record(
        &self,
        collection: Collection,
        from: &RecordId,
        to: &RecordId,
        data: &Value,
    ) -> Result<(), StoreError>;

    async fn get_record(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<Option<Value>, StoreError>;

    /// Mirrored records of `collection`, in insertion order.
    async fn records(&self, collection: Collection) -> Result<Vec<Value>, StoreError>;

    async fn map_id(&self, local: &RecordId, remote: &RecordId) -> Result<(), StoreError>;

    async fn resolve_id(&self, local: &RecordId) -> Result<Option<RecordId>, StoreError>;

    async fn id_mappings(&self) -> Result<Vec<(RecordId, RecordId)>, StoreError>;

    /// Wipe everything (demo/test cleanup).
    async fn reset(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> OfflineStore for Arc<S>
where
    S: OfflineStore + ?Sized,
{
    async fn append_operation(&self, op: &PendingOperation) -> Result<(), StoreError> {
        (**self).append_operation(op).await
    }

    async fn pending_operations(&self) -> Result<Vec<PendingOperation>, StoreError> {
        (**self).pending_operations().await
    }

    async fn head_operation(&self) -> Result<Option<PendingOperation>, StoreError> {
        (**self).head_operation().await
    }

    async fn count_operations(&self) -> Result<usize, StoreError> {
        (**self).count_operations().await
    }

    async fn remove_operation(&self, id: OperationId) -> Result<(), StoreError> {
        (**self).remove_operation(id).await
    }

    async fn record_failure(&self, id: OperationId, error: &str) -> Result<(), StoreError> {
        (**self).record_failure(id, error).await
    }

    async fn dead_letter(&self, id: OperationId, reason: &str) -> Result<DeadLetter, StoreError> {
        (**self).dead_letter(id, reason).await
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        (**self).dead_letters().await
    }

    async fn requeue_dead_letter(&self, id: OperationId) -> Result<PendingOperation, StoreError> {
        (**self).requeue_dead_letter(id).await
    }

    async fn discard_dead_letter(&self, id: OperationId) -> Result<(), StoreError> {
        (**self).discard_dead_letter(id).await
    }

    async fn put_record(
        &self,
        collection: Collection,
        id: &RecordId,
        data: &Value,
    ) -> Result<(), StoreError> {
        (**self).put_record(collection, id, data).await
    }

    async fn rekey_record(
        &self,
        collection: Collection,
        from: &RecordId,
        to: &RecordId,
        data: &Value,
    ) -> Result<(), StoreError> {
        (**self).rekey_record(collection, from, to, data).await
    }

    async fn get_record(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<Option<Value>, StoreError> {
        (**self).get_record(collection, id).await
    }

    async fn records(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        (**self).records(collection).await
    }

    async fn map_id(&self, local: &RecordId, remote: &RecordId) -> Result<(), StoreError> {
        (**self).map_id(local, remote).await
    }

    async fn resolve_id(&self, local: &RecordId) -> Result<Option<RecordId>, StoreError> {
        (**self).resolve_id(local).await
    }

    async fn id_mappings(&self) -> Result<Vec<(RecordId, RecordId)>, StoreError> {
        (**self).id_mappings().await
    }

    async fn reset(&self) -> Result<(), StoreError> {
        (**self).reset().await
    }
}
