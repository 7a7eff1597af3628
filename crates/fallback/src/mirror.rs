//! Local copy of backend records, readable and writable while offline.

use std::sync::Arc;

use chrono::Utc;
use protrack_core::{
    Collection, ComplianceRecord, DomainError, IoTReading, NewComplianceRecord, NewIoTReading,
    NewProduct, NewQualityTest, NewShipment, NewUser, Product, ProductStatus, QualityTest, Record,
    RecordId, Shipment, ShipmentStatus, User,
};

use crate::error::{FallbackError, FallbackResult};
use crate::queue::PendingQueue;
use crate::seed;
use crate::store::OfflineStore;
use crate::types::{OperationKind, PendingOperation};

/// Offline reads and writes.
///
/// Every `*_offline` write lands in the mirror and appends the matching
/// pending operation, so it is visible both through the `get_mock_*` reads
/// and through the queue length.
#[derive(Clone)]
pub struct LocalMirror {
    store: Arc<dyn OfflineStore>,
    queue: PendingQueue,
}

impl LocalMirror {
    pub fn new(store: Arc<dyn OfflineStore>) -> Self {
        let queue = PendingQueue::new(store.clone());
        Self { store, queue }
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    /// Mirrored records of type `T`. An empty collection is filled with its
    /// demo fixtures first, so listed fixtures can be updated afterwards.
    pub async fn list<T: Record>(&self) -> FallbackResult<Vec<T>> {
        let mut rows = self.store.records(T::COLLECTION).await?;
        if rows.is_empty() && self.seed_collection(T::COLLECTION).await? > 0 {
            rows = self.store.records(T::COLLECTION).await?;
        }

        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| FallbackError::corrupt(T::COLLECTION, e))
            })
            .collect()
    }

    /// A mirrored record. Local ids of records that have since been
    /// replayed resolve to their remote row.
    pub async fn get<T: Record>(&self, id: &RecordId) -> FallbackResult<Option<T>> {
        let mut row = self.store.get_record(T::COLLECTION, id).await?;
        if row.is_none() && id.is_local() {
            if let Some(remote) = self.store.resolve_id(id).await? {
                row = self.store.get_record(T::COLLECTION, &remote).await?;
            }
        }
        match row {
            Some(row) => serde_json::from_value(row)
                .map(Some)
                .map_err(|e| FallbackError::corrupt(T::COLLECTION, e)),
            None => Ok(None),
        }
    }

    /// Insert or replace a record without queuing anything (online writes,
    /// fixtures).
    pub async fn put<T: Record>(&self, record: &T) -> FallbackResult<()> {
        let row =
            serde_json::to_value(record).map_err(|e| FallbackError::corrupt(T::COLLECTION, e))?;
        self.store.put_record(T::COLLECTION, record.id(), &row).await?;
        Ok(())
    }

    /// Mirror a record read from the backend. A `client_ref` naming a local
    /// record replaces that local row instead of adding a second one.
    pub async fn put_reconciled<T: Record>(
        &self,
        record: &T,
        client_ref: Option<&RecordId>,
    ) -> FallbackResult<()> {
        let Some(local) = client_ref.filter(|id| id.is_local() && *id != record.id()) else {
            return self.put(record).await;
        };
        let row =
            serde_json::to_value(record).map_err(|e| FallbackError::corrupt(T::COLLECTION, e))?;
        self.store
            .rekey_record(T::COLLECTION, local, record.id(), &row)
            .await?;
        Ok(())
    }

    /// The create operation that replays `record`.
    pub(crate) fn create_operation<T: Record>(record: &T) -> FallbackResult<PendingOperation> {
        let payload =
            serde_json::to_value(record).map_err(|e| FallbackError::corrupt(T::COLLECTION, e))?;
        Ok(PendingOperation::new(
            OperationKind::create_for(T::COLLECTION),
            record.id().clone(),
            payload,
        ))
    }

    /// Mirror `record` and queue `op` for it.
    pub(crate) async fn store_pending<T: Record>(
        &self,
        record: &T,
        op: PendingOperation,
    ) -> FallbackResult<()> {
        self.put(record).await?;
        self.queue.push(op).await?;
        Ok(())
    }

    async fn create_offline<T: Record>(&self, record: T) -> FallbackResult<T> {
        let op = Self::create_operation(&record)?;
        self.store_pending(&record, op).await?;

        tracing::info!(
            collection = %T::COLLECTION,
            record_id = %record.id(),
            "record created offline"
        );
        Ok(record)
    }

    pub async fn get_mock_products(&self) -> FallbackResult<Vec<Product>> {
        self.list().await
    }

    pub async fn get_mock_shipments(&self) -> FallbackResult<Vec<Shipment>> {
        self.list().await
    }

    pub async fn get_mock_iot_readings(&self) -> FallbackResult<Vec<IoTReading>> {
        self.list().await
    }

    pub async fn get_mock_quality_tests(&self) -> FallbackResult<Vec<QualityTest>> {
        self.list().await
    }

    pub async fn get_mock_compliance_records(&self) -> FallbackResult<Vec<ComplianceRecord>> {
        self.list().await
    }

    pub async fn get_mock_users(&self) -> FallbackResult<Vec<User>> {
        self.list().await
    }

    pub async fn create_product_offline(&self, new: NewProduct) -> FallbackResult<Product> {
        let product = new.into_record(RecordId::new_local(), Utc::now())?;
        self.create_offline(product).await
    }

    pub async fn create_shipment_offline(&self, new: NewShipment) -> FallbackResult<Shipment> {
        let shipment = new.into_record(RecordId::new_local(), Utc::now())?;
        self.create_offline(shipment).await
    }

    pub async fn create_iot_reading_offline(
        &self,
        new: NewIoTReading,
    ) -> FallbackResult<IoTReading> {
        let reading = new.into_record(RecordId::new_local(), Utc::now())?;
        self.create_offline(reading).await
    }

    pub async fn create_quality_test_offline(
        &self,
        new: NewQualityTest,
    ) -> FallbackResult<QualityTest> {
        let test = new.into_record(RecordId::new_local(), Utc::now())?;
        self.create_offline(test).await
    }

    pub async fn create_compliance_record_offline(
        &self,
        new: NewComplianceRecord,
    ) -> FallbackResult<ComplianceRecord> {
        let record = new.into_record(RecordId::new_local(), Utc::now())?;
        self.create_offline(record).await
    }

    pub async fn create_user_offline(&self, new: NewUser) -> FallbackResult<User> {
        let user = new.into_record(RecordId::new_local(), Utc::now())?;
        self.create_offline(user).await
    }

    /// Advance a mirrored product and queue the matching `UpdateProduct`.
    pub async fn update_product_status_offline(
        &self,
        id: &RecordId,
        status: ProductStatus,
    ) -> FallbackResult<Product> {
        let mut product: Product = self
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("product {id}")))?;
        product.transition(status, Utc::now())?;

        let op = PendingOperation::new(
            OperationKind::UpdateProduct,
            product.id.clone(),
            product.status_patch(),
        );
        self.store_pending(&product, op).await?;
        tracing::info!(product_id = %id, status = status.as_str(), "product updated offline");
        Ok(product)
    }

    pub async fn update_shipment_status_offline(
        &self,
        id: &RecordId,
        status: ShipmentStatus,
    ) -> FallbackResult<Shipment> {
        let mut shipment: Shipment = self
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("shipment {id}")))?;
        shipment.transition(status, Utc::now())?;

        let op = PendingOperation::new(
            OperationKind::UpdateShipment,
            shipment.id.clone(),
            shipment.status_patch(),
        );
        self.store_pending(&shipment, op).await?;
        tracing::info!(shipment_id = %id, status = status.as_str(), "shipment updated offline");
        Ok(shipment)
    }

    /// Write every fixture into the mirror. Nothing is queued.
    pub async fn seed_demo_data(&self) -> FallbackResult<usize> {
        let mut written = 0;
        for collection in Collection::ALL {
            written += self.seed_collection(collection).await?;
        }
        tracing::info!(records = written, "seeded demo data");
        Ok(written)
    }

    async fn seed_collection(&self, collection: Collection) -> FallbackResult<usize> {
        let fixtures = seed::records(collection);
        for (id, row) in &fixtures {
            self.store.put_record(collection, id, row).await?;
        }
        tracing::debug!(%collection, records = fixtures.len(), "fixtures written to mirror");
        Ok(fixtures.len())
    }
}
