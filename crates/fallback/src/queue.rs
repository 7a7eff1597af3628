//! FIFO of mutations awaiting replay.

use std::sync::Arc;

use protrack_core::{OperationId, RecordId};
use serde_json::Value;

use crate::store::{OfflineStore, StoreError};
use crate::types::{DeadLetter, OperationKind, PendingOperation};

/// Ordered view over the store's pending operations.
///
/// Operations leave the queue only through `acknowledge` (replay confirmed)
/// or `dead_letter` (parked by policy).
#[derive(Clone)]
pub struct PendingQueue {
    store: Arc<dyn OfflineStore>,
}

impl PendingQueue {
    pub fn new(store: Arc<dyn OfflineStore>) -> Self {
        Self { store }
    }

    /// Append `op` to the tail.
    pub async fn push(&self, op: PendingOperation) -> Result<PendingOperation, StoreError> {
        self.store.append_operation(&op).await?;
        tracing::debug!(
            operation_id = %op.id,
            kind = %op.kind,
            entity_id = %op.entity_id,
            "queued pending operation"
        );
        Ok(op)
    }

    pub async fn enqueue(
        &self,
        kind: OperationKind,
        entity_id: RecordId,
        payload: Value,
    ) -> Result<PendingOperation, StoreError> {
        self.push(PendingOperation::new(kind, entity_id, payload)).await
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        self.store.count_operations().await
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }

    pub async fn peek(&self) -> Result<Option<PendingOperation>, StoreError> {
        self.store.head_operation().await
    }

    pub async fn list(&self) -> Result<Vec<PendingOperation>, StoreError> {
        self.store.pending_operations().await
    }

    pub async fn acknowledge(&self, id: OperationId) -> Result<(), StoreError> {
        self.store.remove_operation(id).await
    }

    pub async fn record_failure(&self, id: OperationId, error: &str) -> Result<(), StoreError> {
        self.store.record_failure(id, error).await
    }

    pub async fn dead_letter(&self, id: OperationId, reason: &str) -> Result<DeadLetter, StoreError> {
        self.store.dead_letter(id, reason).await
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        self.store.dead_letters().await
    }

    pub async fn requeue(&self, id: OperationId) -> Result<PendingOperation, StoreError> {
        self.store.requeue_dead_letter(id).await
    }

    pub async fn discard(&self, id: OperationId) -> Result<(), StoreError> {
        self.store.discard_dead_letter(id).await
    }
}
