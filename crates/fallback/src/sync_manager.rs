//! The offline layer's single owner of state.
//!
//! `FallbackManager` ties together:
//! - the connection monitor (is the backend reachable?)
//! - the local mirror (reads and writes while it is not)
//! - the pending-operation queue and its replay driver
//!
//! Writes try the backend while the layer is `Online` and fall back to the
//! mirror plus a queued operation on a transient failure. Draining the queue
//! is serialized: at most one drain runs at a time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use protrack_core::{
    ComplianceRecord, DomainError, IoTReading, NewComplianceRecord, NewIoTReading, NewProduct,
    NewQualityTest, NewShipment, NewUser, OperationId, Product, ProductStatus, QualityTest, Record,
    RecordId, Shipment, ShipmentStatus, User,
};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::backend::{Backend, BackendError, CLIENT_REF_COLUMN, Filter};
use crate::error::{FallbackError, FallbackResult};
use crate::mirror::LocalMirror;
use crate::monitor::ConnectionMonitor;
use crate::queue::PendingQueue;
use crate::replay::{ReplayError, Replayer};
use crate::store::OfflineStore;
use crate::types::{
    ConnectionStatus, DeadLetter, OperationKind, PendingOperation, RejectedPolicy, ReplayFailure,
    StatusReport, SyncReport, SyncState,
};

/// Default bound on every backend call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for a `FallbackManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackOptions {
    pub request_timeout: Duration,
    pub rejected_policy: RejectedPolicy,
}

impl Default for FallbackOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            rejected_policy: RejectedPolicy::Halt,
        }
    }
}

pub struct FallbackManager {
    backend: Arc<dyn Backend>,
    monitor: ConnectionMonitor,
    mirror: LocalMirror,
    replayer: Replayer,
    state: Mutex<SyncState>,
    drain: Mutex<()>,
    options: FallbackOptions,
}

impl FallbackManager {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<dyn OfflineStore>) -> Self {
        Self::with_options(backend, store, FallbackOptions::default())
    }

    pub fn with_options(
        backend: Arc<dyn Backend>,
        store: Arc<dyn OfflineStore>,
        options: FallbackOptions,
    ) -> Self {
        Self {
            replayer: Replayer::new(backend.clone(), store.clone(), options.request_timeout),
            mirror: LocalMirror::new(store),
            monitor: ConnectionMonitor::new(options.request_timeout),
            backend,
            // Nothing is known about the backend until the first check.
            state: Mutex::new(SyncState::Offline),
            drain: Mutex::new(()),
            options,
        }
    }

    pub fn mirror(&self) -> &LocalMirror {
        &self.mirror
    }

    fn queue(&self) -> &PendingQueue {
        self.mirror.queue()
    }

    pub fn options(&self) -> FallbackOptions {
        self.options
    }

    pub async fn state(&self) -> SyncState {
        *self.state.lock().await
    }

    async fn set_state(&self, next: SyncState) {
        let mut state = self.state.lock().await;
        if *state != next {
            tracing::info!(from = ?*state, to = ?next, "sync state changed");
            *state = next;
        }
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        self.monitor.status().await
    }

    pub async fn status(&self) -> FallbackResult<StatusReport> {
        Ok(StatusReport {
            state: self.state().await,
            connection: self.monitor.status().await,
            pending_operations: self.queue().len().await?,
            dead_letters: self.queue().dead_letters().await?.len(),
        })
    }

    /// Check the backend. A failed check takes an `Online` layer offline; a
    /// successful one changes nothing until the queue has been drained.
    pub async fn check_connection(&self) -> ConnectionStatus {
        let status = self.monitor.check(self.backend.as_ref()).await;
        if !status.backend_connected && self.state().await == SyncState::Online {
            self.set_state(SyncState::Offline).await;
        }
        status
    }

    /// "Go online" trigger: optimistically route writes to the backend, then
    /// verify with a real check and drain the queue.
    ///
    /// On return `is_online` is only set if the backend answered and the queue
    /// drained completely.
    pub async fn force_online_mode(&self) -> FallbackResult<SyncReport> {
        tracing::info!("forcing online mode");
        self.monitor.set_online_optimistic().await;

        let result = self.sync_pending_operations().await;
        if !matches!(&result, Ok(report) if report.state == SyncState::Online) {
            self.monitor.set_offline().await;
        }
        result
    }

    pub async fn add_pending_operation(
        &self,
        op: PendingOperation,
    ) -> FallbackResult<PendingOperation> {
        Ok(self.queue().push(op).await?)
    }

    pub async fn get_pending_operations_count(&self) -> FallbackResult<usize> {
        Ok(self.queue().len().await?)
    }

    pub async fn pending_operations(&self) -> FallbackResult<Vec<PendingOperation>> {
        Ok(self.queue().list().await?)
    }

    /// Drain the queue against the backend, oldest operation first.
    ///
    /// Stops at the first failure that is not handled by the rejected-operation
    /// policy; everything from that operation on stays queued in order.
    pub async fn sync_pending_operations(&self) -> FallbackResult<SyncReport> {
        let _drain = self.drain.lock().await;

        let status = self.monitor.check(self.backend.as_ref()).await;
        if !status.backend_connected {
            self.set_state(SyncState::Offline).await;
            let remaining = self.queue().len().await?;
            tracing::info!(remaining, "backend unreachable; pending operations kept");
            return Ok(SyncReport::unreachable(remaining));
        }

        self.set_state(SyncState::Reconciling).await;
        let mut report = SyncReport {
            state: SyncState::Reconciling,
            replayed: Vec::new(),
            dead_lettered: Vec::new(),
            remaining: 0,
            failure: None,
        };
        let drained = self.drain_queue(&mut report).await;

        let remaining = match self.queue().len().await {
            Ok(n) => n,
            Err(e) => {
                self.finish_drain(false).await;
                return Err(e.into());
            }
        };
        report.remaining = remaining;

        let complete = drained.is_ok() && report.failure.is_none() && remaining == 0;
        report.state = self.finish_drain(complete).await;
        drained?;

        tracing::info!(
            replayed = report.replayed.len(),
            dead_lettered = report.dead_lettered.len(),
            remaining = report.remaining,
            state = ?report.state,
            "sync finished"
        );
        Ok(report)
    }

    async fn finish_drain(&self, complete: bool) -> SyncState {
        if complete && self.monitor.set_online().await {
            self.set_state(SyncState::Online).await;
            SyncState::Online
        } else {
            self.monitor.set_offline().await;
            self.set_state(SyncState::Offline).await;
            SyncState::Offline
        }
    }

    async fn drain_queue(&self, report: &mut SyncReport) -> FallbackResult<()> {
        // Records whose operations were parked during this drain; anything
        // later that targets or references them is parked too.
        let mut poisoned: HashSet<RecordId> = HashSet::new();

        while let Some(op) = self.queue().peek().await? {
            if self.options.rejected_policy == RejectedPolicy::DeadLetter {
                if let Some(dep) = op.references().into_iter().find(|r| poisoned.contains(r)) {
                    let reason = format!("depends on dead-lettered record {dep}");
                    self.queue().dead_letter(op.id, &reason).await?;
                    tracing::warn!(
                        operation_id = %op.id,
                        kind = %op.kind,
                        %reason,
                        "operation dead-lettered"
                    );
                    poisoned.insert(op.entity_id.clone());
                    report.dead_lettered.push(op.id);
                    continue;
                }
            }

            match self.replayer.apply(&op).await {
                Ok(remote) => {
                    self.queue().acknowledge(op.id).await?;
                    tracing::debug!(
                        operation_id = %op.id,
                        kind = %op.kind,
                        entity_id = %op.entity_id,
                        remote_id = %remote,
                        "operation replayed"
                    );
                    report.replayed.push(op.id);
                }
                Err(e) => {
                    self.queue().record_failure(op.id, &e.to_string()).await?;

                    if e.is_rejection()
                        && self.options.rejected_policy == RejectedPolicy::DeadLetter
                    {
                        self.queue().dead_letter(op.id, &e.to_string()).await?;
                        tracing::warn!(
                            operation_id = %op.id,
                            kind = %op.kind,
                            error = %e,
                            "operation rejected; dead-lettered"
                        );
                        poisoned.insert(op.entity_id.clone());
                        report.dead_lettered.push(op.id);
                        continue;
                    }

                    if let ReplayError::Backend(backend_err) = &e {
                        if backend_err.is_transient() {
                            self.monitor.record_failure(backend_err).await;
                        }
                    }
                    tracing::warn!(
                        operation_id = %op.id,
                        kind = %op.kind,
                        attempts = op.attempts + 1,
                        error = %e,
                        "replay failed; draining paused"
                    );
                    report.failure = Some(ReplayFailure {
                        operation_id: op.id,
                        kind: op.kind,
                        error: e.to_string(),
                        transient: e.is_transient(),
                    });

                    if let ReplayError::Store(store_err) = e {
                        return Err(store_err.into());
                    }
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    pub async fn list_dead_letters(&self) -> FallbackResult<Vec<DeadLetter>> {
        Ok(self.queue().dead_letters().await?)
    }

    /// Put a dead letter back at the tail of the queue.
    pub async fn requeue_dead_letter(&self, id: OperationId) -> FallbackResult<PendingOperation> {
        let op = self.queue().requeue(id).await?;
        tracing::info!(operation_id = %id, kind = %op.kind, "dead letter requeued");
        Ok(op)
    }

    pub async fn discard_dead_letter(&self, id: OperationId) -> FallbackResult<()> {
        self.queue().discard(id).await?;
        tracing::info!(operation_id = %id, "dead letter discarded");
        Ok(())
    }

    pub async fn seed_demo_data(&self) -> FallbackResult<usize> {
        self.mirror.seed_demo_data().await
    }

    // ---- online write path ----

    /// Writes go straight to the backend only while online with nothing
    /// queued ahead of them.
    async fn writes_go_online(&self) -> FallbackResult<bool> {
        Ok(self.state().await == SyncState::Online && self.queue().is_empty().await?)
    }

    async fn go_offline(&self, error: &BackendError) {
        self.monitor.record_failure(error).await;
        self.set_state(SyncState::Offline).await;
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        let timeout = self.options.request_timeout;
        tokio::time::timeout(timeout, call)
            .await
            .unwrap_or(Err(BackendError::Timeout(timeout)))
    }

    /// Send `op` for `record` to the backend, or mirror and queue both when
    /// the backend cannot be reached.
    async fn write<T: Record>(&self, record: T, op: PendingOperation) -> FallbackResult<T> {
        if !self.writes_go_online().await? {
            let kind = op.kind;
            self.mirror.store_pending(&record, op).await?;
            tracing::info!(
                collection = %T::COLLECTION,
                record_id = %record.id(),
                kind = %kind,
                "write queued while offline"
            );
            return Ok(record);
        }

        match self.replayer.apply(&op).await {
            Ok(remote) => {
                let record = if op.kind.is_create() {
                    with_id(record, &remote)?
                } else {
                    record
                };
                self.mirror.put(&record).await?;
                tracing::info!(
                    collection = %T::COLLECTION,
                    record_id = %record.id(),
                    kind = %op.kind,
                    "write applied to backend"
                );
                Ok(record)
            }
            Err(e) if e.is_transient() => {
                if let ReplayError::Backend(backend_err) = &e {
                    self.go_offline(backend_err).await;
                }
                self.mirror.store_pending(&record, op).await?;
                tracing::info!(
                    collection = %T::COLLECTION,
                    record_id = %record.id(),
                    "backend unreachable; write queued"
                );
                Ok(record)
            }
            // The backend may have applied the write. Replay carries the
            // same idempotency key, so queuing it cannot duplicate the row.
            Err(ReplayError::Backend(BackendError::Decode(reason))) => {
                tracing::warn!(
                    collection = %T::COLLECTION,
                    record_id = %record.id(),
                    %reason,
                    "unreadable backend response; write queued"
                );
                self.mirror.store_pending(&record, op).await?;
                Ok(record)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create<T: Record>(&self, record: T) -> FallbackResult<T> {
        let op = LocalMirror::create_operation(&record)?;
        self.write(record, op).await
    }

    pub async fn create_product(&self, new: NewProduct) -> FallbackResult<Product> {
        self.create(new.into_record(RecordId::new_local(), Utc::now())?)
            .await
    }

    pub async fn create_shipment(&self, new: NewShipment) -> FallbackResult<Shipment> {
        self.create(new.into_record(RecordId::new_local(), Utc::now())?)
            .await
    }

    pub async fn create_iot_reading(&self, new: NewIoTReading) -> FallbackResult<IoTReading> {
        self.create(new.into_record(RecordId::new_local(), Utc::now())?)
            .await
    }

    pub async fn create_quality_test(&self, new: NewQualityTest) -> FallbackResult<QualityTest> {
        self.create(new.into_record(RecordId::new_local(), Utc::now())?)
            .await
    }

    pub async fn create_compliance_record(
        &self,
        new: NewComplianceRecord,
    ) -> FallbackResult<ComplianceRecord> {
        self.create(new.into_record(RecordId::new_local(), Utc::now())?)
            .await
    }

    pub async fn create_user(&self, new: NewUser) -> FallbackResult<User> {
        self.create(new.into_record(RecordId::new_local(), Utc::now())?)
            .await
    }

    /// Look a record up: mirror first, then the backend while online.
    pub async fn find<T: Record>(&self, id: &RecordId) -> FallbackResult<T> {
        if let Some(record) = self.mirror.get::<T>(id).await? {
            return Ok(record);
        }
        if id.is_local() || self.state().await != SyncState::Online {
            return Err(not_found::<T>(id).into());
        }

        let filter = Filter::eq("id", id.as_str());
        match self
            .bounded(self.backend.select(T::COLLECTION, Some(&filter), Some(1)))
            .await
        {
            Ok(rows) => {
                let row = rows
                    .into_iter()
                    .next()
                    .ok_or_else(|| not_found::<T>(id))?;
                let local = client_ref(&row);
                let record: T = serde_json::from_value(row)
                    .map_err(|e| BackendError::Decode(e.to_string()))?;
                self.mirror.put_reconciled(&record, local.as_ref()).await?;
                Ok(record)
            }
            Err(e) if e.is_transient() => {
                self.go_offline(&e).await;
                Err(not_found::<T>(id).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All records of `T`: from the backend while online (refreshing the
    /// mirror), otherwise from the mirror.
    pub async fn list<T: Record>(&self) -> FallbackResult<Vec<T>> {
        if self.state().await != SyncState::Online {
            return self.mirror.list().await;
        }

        match self
            .bounded(self.backend.select(T::COLLECTION, None, None))
            .await
        {
            Ok(rows) => {
                let mut records = Vec::with_capacity(rows.len());
                for row in rows {
                    let local = client_ref(&row);
                    match serde_json::from_value::<T>(row) {
                        Ok(record) => {
                            self.mirror.put_reconciled(&record, local.as_ref()).await?;
                            records.push(record);
                        }
                        Err(e) => {
                            tracing::warn!(
                                collection = %T::COLLECTION,
                                error = %e,
                                "skipping undecodable row"
                            );
                        }
                    }
                }
                Ok(records)
            }
            Err(e) if e.is_transient() => {
                self.go_offline(&e).await;
                self.mirror.list().await
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn update_product_status(
        &self,
        id: &RecordId,
        status: ProductStatus,
    ) -> FallbackResult<Product> {
        if !self.writes_go_online().await? {
            return self.mirror.update_product_status_offline(id, status).await;
        }

        let mut product: Product = self.find(id).await?;
        product.transition(status, Utc::now())?;
        let op = PendingOperation::new(
            OperationKind::UpdateProduct,
            product.id.clone(),
            product.status_patch(),
        );
        self.write(product, op).await
    }

    pub async fn update_shipment_status(
        &self,
        id: &RecordId,
        status: ShipmentStatus,
    ) -> FallbackResult<Shipment> {
        if !self.writes_go_online().await? {
            return self.mirror.update_shipment_status_offline(id, status).await;
        }

        let mut shipment: Shipment = self.find(id).await?;
        shipment.transition(status, Utc::now())?;
        let op = PendingOperation::new(
            OperationKind::UpdateShipment,
            shipment.id.clone(),
            shipment.status_patch(),
        );
        self.write(shipment, op).await
    }

    /// Move a product one step along its lifecycle.
    pub async fn advance_product(&self, id: &RecordId) -> FallbackResult<Product> {
        let current: Product = self.find(id).await?;
        let next = current.status.next().ok_or_else(|| {
            DomainError::invalid_transition(format!(
                "product {id} is already {}",
                current.status.as_str()
            ))
        })?;
        self.update_product_status(id, next).await
    }
}

fn not_found<T: Record>(id: &RecordId) -> DomainError {
    DomainError::not_found(format!("{} record {id}", T::COLLECTION))
}

/// The local id a backend row was created from, if it names one.
fn client_ref(row: &Value) -> Option<RecordId> {
    row.get(CLIENT_REF_COLUMN)?
        .as_str()?
        .parse::<RecordId>()
        .ok()
        .filter(RecordId::is_local)
}

/// `record` with its local id swapped for the backend's.
fn with_id<T: Record>(record: T, remote: &RecordId) -> FallbackResult<T> {
    let mut row =
        serde_json::to_value(&record).map_err(|e| FallbackError::corrupt(T::COLLECTION, e))?;
    if let Some(fields) = row.as_object_mut() {
        fields.insert("id".to_string(), Value::String(remote.to_string()));
    }
    serde_json::from_value(row).map_err(|e| FallbackError::corrupt(T::COLLECTION, e))
}
