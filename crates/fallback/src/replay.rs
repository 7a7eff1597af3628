//! Applying one queued operation to the backend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use protrack_core::{Collection, RecordId};
use serde_json::Value;
use thiserror::Error;

use crate::backend::{Backend, BackendError, CLIENT_REF_COLUMN, Filter, row_id};
use crate::store::{OfflineStore, StoreError};
use crate::types::{OperationKind, PendingOperation};

/// Field of child records pointing at their product.
const PARENT_COLUMN: &str = "product_id";

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The operation points at a locally-created record whose own create has
    /// not been replayed (or was dead-lettered).
    #[error("{0} has no remote id yet")]
    UnresolvedReference(RecordId),
}

impl ReplayError {
    /// Connectivity problem: retry later, the operation itself is fine.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReplayError::Backend(e) if e.is_transient())
    }

    /// The backend (or the id map) says this operation can never succeed as
    /// it stands.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ReplayError::Backend(BackendError::Rejected { .. } | BackendError::Duplicate(_))
                | ReplayError::UnresolvedReference(_)
        )
    }
}

enum Route {
    Insert(Collection),
    Patch(Collection),
}

/// Dispatch table: where each operation kind goes on the backend.
fn route(kind: OperationKind) -> Route {
    match kind {
        OperationKind::CreateProduct => Route::Insert(Collection::Products),
        OperationKind::CreateShipment => Route::Insert(Collection::Shipments),
        OperationKind::CreateIotData => Route::Insert(Collection::IotData),
        OperationKind::CreateQualityTest => Route::Insert(Collection::QualityTests),
        OperationKind::CreateComplianceRecord => Route::Insert(Collection::ComplianceRecords),
        OperationKind::CreateUser => Route::Insert(Collection::Users),
        OperationKind::UpdateProduct => Route::Patch(Collection::Products),
        OperationKind::UpdateShipment => Route::Patch(Collection::Shipments),
    }
}

/// Replays pending operations one at a time.
///
/// Every backend call is bounded by `timeout`. Local ids in the operation are
/// translated through the store's id map before sending, and a successful
/// create records its new mapping.
pub struct Replayer {
    backend: Arc<dyn Backend>,
    store: Arc<dyn OfflineStore>,
    timeout: Duration,
}

impl Replayer {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<dyn OfflineStore>, timeout: Duration) -> Self {
        Self {
            backend,
            store,
            timeout,
        }
    }

    /// Apply `op` and return the backend id of the record it touched.
    pub async fn apply(&self, op: &PendingOperation) -> Result<RecordId, ReplayError> {
        match route(op.kind) {
            Route::Insert(collection) => self.insert(collection, op).await,
            Route::Patch(collection) => self.patch(collection, op).await,
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(BackendError::Timeout(self.timeout)))
    }

    /// Local id → remote id; other ids pass through.
    async fn resolve(&self, id: &RecordId) -> Result<RecordId, ReplayError> {
        if !id.is_local() {
            return Ok(id.clone());
        }
        self.store
            .resolve_id(id)
            .await?
            .ok_or_else(|| ReplayError::UnresolvedReference(id.clone()))
    }

    /// Rewrite the parent reference (if any) to its remote id.
    async fn translate_parent(&self, body: &mut Value) -> Result<(), ReplayError> {
        let parent = match body.get(PARENT_COLUMN).and_then(Value::as_str) {
            Some(raw) => raw.parse::<RecordId>().ok(),
            None => None,
        };
        if let Some(parent) = parent {
            let remote = self.resolve(&parent).await?;
            if let Some(fields) = body.as_object_mut() {
                fields.insert(PARENT_COLUMN.to_string(), Value::String(remote.to_string()));
            }
        }
        Ok(())
    }

    async fn insert(
        &self,
        collection: Collection,
        op: &PendingOperation,
    ) -> Result<RecordId, ReplayError> {
        if let Some(remote) = self.store.resolve_id(&op.entity_id).await? {
            // Create already confirmed before a crash cut off the dequeue.
            tracing::debug!(operation_id = %op.id, remote_id = %remote, "create already mapped");
            self.adopt_remote_id(collection, &op.entity_id, &remote).await?;
            return Ok(remote);
        }

        let mut body = op.payload.clone();
        self.translate_parent(&mut body).await?;
        if let Some(fields) = body.as_object_mut() {
            fields.remove("id");
            fields.insert(
                CLIENT_REF_COLUMN.to_string(),
                Value::String(op.entity_id.to_string()),
            );
        }

        let inserted = self
            .bounded(self.backend.insert(collection, body, op.idempotency_key))
            .await;
        let remote = match inserted {
            Ok(row) => row_id(&row)?,
            Err(BackendError::Duplicate(message)) => self
                .find_by_client_ref(collection, &op.entity_id)
                .await?
                .ok_or(BackendError::Duplicate(message))?,
            Err(e) => return Err(e.into()),
        };

        if op.entity_id.is_local() {
            self.store.map_id(&op.entity_id, &remote).await?;
            self.adopt_remote_id(collection, &op.entity_id, &remote).await?;
        }
        Ok(remote)
    }

    /// Re-key the mirrored copy of a replayed create under its remote id,
    /// with its parent reference translated the same way.
    async fn adopt_remote_id(
        &self,
        collection: Collection,
        local: &RecordId,
        remote: &RecordId,
    ) -> Result<(), ReplayError> {
        let Some(mut row) = self.store.get_record(collection, local).await? else {
            return Ok(());
        };
        self.translate_parent(&mut row).await?;
        if let Some(fields) = row.as_object_mut() {
            fields.insert("id".to_string(), Value::String(remote.to_string()));
        }
        self.store.rekey_record(collection, local, remote, &row).await?;
        Ok(())
    }

    /// The row an earlier delivery of this create already produced.
    async fn find_by_client_ref(
        &self,
        collection: Collection,
        local: &RecordId,
    ) -> Result<Option<RecordId>, ReplayError> {
        let filter = Filter::eq(CLIENT_REF_COLUMN, local.as_str());
        let rows = self
            .bounded(self.backend.select(collection, Some(&filter), Some(1)))
            .await?;
        match rows.first() {
            Some(row) => {
                let remote = row_id(row)?;
                tracing::info!(
                    collection = %collection,
                    local_id = %local,
                    remote_id = %remote,
                    "replayed create already applied; reusing existing row"
                );
                Ok(Some(remote))
            }
            None => Ok(None),
        }
    }

    async fn patch(
        &self,
        collection: Collection,
        op: &PendingOperation,
    ) -> Result<RecordId, ReplayError> {
        let target = self.resolve(&op.entity_id).await?;
        let mut body = op.payload.clone();
        self.translate_parent(&mut body).await?;
        if let Some(fields) = body.as_object_mut() {
            fields.remove("id");
        }

        self.bounded(self.backend.update(collection, &target, body))
            .await?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::store::InMemoryStore;
    use serde_json::json;

    struct Harness {
        backend: Arc<InMemoryBackend>,
        store: Arc<InMemoryStore>,
        replayer: Replayer,
    }

    fn harness() -> Harness {
        let backend = Arc::new(InMemoryBackend::new());
        let store = InMemoryStore::arc();
        let replayer = Replayer::new(backend.clone(), store.clone(), Duration::from_secs(1));
        Harness {
            backend,
            store,
            replayer,
        }
    }

    fn create_product(name: &str) -> PendingOperation {
        let id = RecordId::new_local();
        PendingOperation::new(
            OperationKind::CreateProduct,
            id.clone(),
            json!({ "id": id, "name": name, "status": "manufactured" }),
        )
    }

    #[tokio::test]
    async fn create_strips_local_id_and_records_mapping() {
        let h = harness();
        let op = create_product("Coffee");

        let remote = h.replayer.apply(&op).await.unwrap();
        assert!(!remote.is_local());

        let rows = h.backend.rows(Collection::Products);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], remote.as_str());
        assert_eq!(rows[0]["client_ref"], op.entity_id.as_str());
        assert_eq!(rows[0]["name"], "Coffee");
        assert_eq!(h.store.resolve_id(&op.entity_id).await.unwrap(), Some(remote));
    }

    #[tokio::test]
    async fn create_moves_mirrored_copy_to_remote_id() {
        let h = harness();
        let product = create_product("Coffee");
        h.store
            .put_record(Collection::Products, &product.entity_id, &product.payload)
            .await
            .unwrap();
        let product_remote = h.replayer.apply(&product).await.unwrap();

        let shipment_id = RecordId::new_local();
        let payload = json!({ "id": shipment_id, "product_id": product.entity_id, "origin": "A" });
        h.store
            .put_record(Collection::Shipments, &shipment_id, &payload)
            .await
            .unwrap();
        let shipment = PendingOperation::new(OperationKind::CreateShipment, shipment_id.clone(), payload);
        let shipment_remote = h.replayer.apply(&shipment).await.unwrap();

        let products = h.store.records(Collection::Products).await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0]["id"], product_remote.as_str());
        assert_eq!(products[0]["name"], "Coffee");

        let shipments = h.store.records(Collection::Shipments).await.unwrap();
        assert_eq!(shipments.len(), 1);
        assert_eq!(shipments[0]["id"], shipment_remote.as_str());
        assert_eq!(shipments[0]["product_id"], product_remote.as_str());
        assert_eq!(h.store.get_record(Collection::Shipments, &shipment_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn child_create_points_at_remote_parent() {
        let h = harness();
        let product = create_product("Coffee");
        let product_remote = h.replayer.apply(&product).await.unwrap();

        let shipment_id = RecordId::new_local();
        let shipment = PendingOperation::new(
            OperationKind::CreateShipment,
            shipment_id.clone(),
            json!({ "id": shipment_id, "product_id": product.entity_id, "origin": "A" }),
        );
        h.replayer.apply(&shipment).await.unwrap();

        let rows = h.backend.rows(Collection::Shipments);
        assert_eq!(rows[0]["product_id"], product_remote.as_str());
    }

    #[tokio::test]
    async fn unmapped_local_parent_is_a_rejection() {
        let h = harness();
        let orphan = RecordId::new_local();
        let op = PendingOperation::new(
            OperationKind::CreateIotData,
            RecordId::new_local(),
            json!({ "product_id": orphan, "value": 1.0 }),
        );

        let err = h.replayer.apply(&op).await.unwrap_err();
        assert!(matches!(err, ReplayError::UnresolvedReference(ref id) if *id == orphan));
        assert!(err.is_rejection());
        assert_eq!(h.backend.len(Collection::IotData), 0);
    }

    #[tokio::test]
    async fn replaying_the_same_create_twice_does_not_duplicate() {
        let h = harness();
        let op = create_product("Coffee");

        let first = h.replayer.apply(&op).await.unwrap();
        let second = h.replayer.apply(&op).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.backend.len(Collection::Products), 1);
    }

    #[tokio::test]
    async fn duplicate_client_ref_resolves_to_existing_row() {
        let h = harness();
        let op = create_product("Coffee");
        let first = h.replayer.apply(&op).await.unwrap();

        // Same create, new idempotency key, mapping lost.
        let store = InMemoryStore::arc();
        let replayer = Replayer::new(h.backend.clone(), store.clone(), Duration::from_secs(1));
        let mut again = op.clone();
        again.idempotency_key = protrack_core::IdempotencyKey::new();

        let second = replayer.apply(&again).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.backend.len(Collection::Products), 1);
        assert_eq!(store.resolve_id(&op.entity_id).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn update_targets_remote_row() {
        let h = harness();
        let create = create_product("Coffee");
        let remote = h.replayer.apply(&create).await.unwrap();

        let update = PendingOperation::new(
            OperationKind::UpdateProduct,
            create.entity_id.clone(),
            json!({ "status": "packaged" }),
        );
        assert_eq!(h.replayer.apply(&update).await.unwrap(), remote);
        assert_eq!(h.backend.rows(Collection::Products)[0]["status"], "packaged");
    }

    #[tokio::test]
    async fn backend_failures_are_classified() {
        let h = harness();
        h.backend.reject_where(Collection::Products, Filter::eq("name", "Bad"));

        let rejected = h.replayer.apply(&create_product("Bad")).await.unwrap_err();
        assert!(rejected.is_rejection());
        assert!(!rejected.is_transient());

        h.backend.set_reachable(false);
        let down = h.replayer.apply(&create_product("Fine")).await.unwrap_err();
        assert!(down.is_transient());
        assert!(!down.is_rejection());
    }
}
