//! Shared types for the offline layer.
//!
//! Everything here is plain data: serializable, IO-free, and safe to hand to
//! the CLI for printing.

use chrono::{DateTime, Utc};
use protrack_core::{Collection, DomainError, IdempotencyKey, OperationId, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where writes currently go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Backend reachable and queue empty; writes go straight to the backend.
    Online,
    /// Backend unreachable; writes go to the mirror and the queue.
    Offline,
    /// Draining the queue (transient).
    Reconciling,
}

/// Result of the most recent connectivity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Writes are routed to the backend.
    pub is_online: bool,
    /// The last check reached the backend.
    pub backend_connected: bool,
    pub last_checked: Option<DateTime<Utc>>,
    /// Consecutive failed checks; reset on success.
    pub error_count: u32,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            is_online: false,
            backend_connected: false,
            last_checked: None,
            error_count: 0,
        }
    }
}

/// Snapshot handed to status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: SyncState,
    pub connection: ConnectionStatus,
    pub pending_operations: usize,
    pub dead_letters: usize,
}

/// Kind of a queued mutation; selects the replay branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateProduct,
    UpdateProduct,
    CreateShipment,
    UpdateShipment,
    CreateIotData,
    CreateQualityTest,
    CreateComplianceRecord,
    CreateUser,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateProduct => "create_product",
            OperationKind::UpdateProduct => "update_product",
            OperationKind::CreateShipment => "create_shipment",
            OperationKind::UpdateShipment => "update_shipment",
            OperationKind::CreateIotData => "create_iot_data",
            OperationKind::CreateQualityTest => "create_quality_test",
            OperationKind::CreateComplianceRecord => "create_compliance_record",
            OperationKind::CreateUser => "create_user",
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            OperationKind::CreateProduct | OperationKind::UpdateProduct => Collection::Products,
            OperationKind::CreateShipment | OperationKind::UpdateShipment => Collection::Shipments,
            OperationKind::CreateIotData => Collection::IotData,
            OperationKind::CreateQualityTest => Collection::QualityTests,
            OperationKind::CreateComplianceRecord => Collection::ComplianceRecords,
            OperationKind::CreateUser => Collection::Users,
        }
    }

    pub fn is_create(&self) -> bool {
        !matches!(
            self,
            OperationKind::UpdateProduct | OperationKind::UpdateShipment
        )
    }

    /// The create kind for records of `collection`.
    pub fn create_for(collection: Collection) -> OperationKind {
        match collection {
            Collection::Products => OperationKind::CreateProduct,
            Collection::Shipments => OperationKind::CreateShipment,
            Collection::IotData => OperationKind::CreateIotData,
            Collection::QualityTests => OperationKind::CreateQualityTest,
            Collection::ComplianceRecords => OperationKind::CreateComplianceRecord,
            Collection::Users => OperationKind::CreateUser,
        }
    }
}

impl core::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OperationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_product" => Ok(OperationKind::CreateProduct),
            "update_product" => Ok(OperationKind::UpdateProduct),
            "create_shipment" => Ok(OperationKind::CreateShipment),
            "update_shipment" => Ok(OperationKind::UpdateShipment),
            "create_iot_data" => Ok(OperationKind::CreateIotData),
            "create_quality_test" => Ok(OperationKind::CreateQualityTest),
            "create_compliance_record" => Ok(OperationKind::CreateComplianceRecord),
            "create_user" => Ok(OperationKind::CreateUser),
            other => Err(DomainError::invalid_id(format!(
                "unknown operation kind '{other}'"
            ))),
        }
    }
}

/// A mutation recorded while the backend was unreachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    /// Record the operation creates or updates (local or remote id).
    pub entity_id: RecordId,
    /// Full record for creates, patch body for updates.
    pub payload: Value,
    pub idempotency_key: IdempotencyKey,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl PendingOperation {
    pub fn new(kind: OperationKind, entity_id: RecordId, payload: Value) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            entity_id,
            payload,
            idempotency_key: IdempotencyKey::new(),
            created_at: Utc::now(),
            attempts: 0,
            last_error: None,
        }
    }

    /// Every record id this operation depends on: its target plus the parent
    /// product it points at, if any.
    pub fn references(&self) -> Vec<RecordId> {
        let mut refs = vec![self.entity_id.clone()];
        if let Some(parent) = self.payload.get("product_id").and_then(Value::as_str) {
            if let Ok(parent) = parent.parse::<RecordId>() {
                if parent != self.entity_id {
                    refs.push(parent);
                }
            }
        }
        refs
    }
}

/// An operation the backend refused, parked until an operator acts on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub operation: PendingOperation,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// What to do when the backend rejects a replayed operation as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectedPolicy {
    /// Stop the drain at the rejected operation.
    #[default]
    Halt,
    /// Park the operation and everything depending on it, keep draining.
    DeadLetter,
}

impl core::str::FromStr for RejectedPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "halt" => Ok(RejectedPolicy::Halt),
            "dead_letter" | "dead-letter" => Ok(RejectedPolicy::DeadLetter),
            other => Err(DomainError::invalid_id(format!(
                "unknown rejected policy '{other}'"
            ))),
        }
    }
}

/// Why a drain stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayFailure {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub error: String,
    /// Connectivity problem (retry later) as opposed to a rejected payload.
    pub transient: bool,
}

/// Result of one drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// State the layer settled in once the drain ended.
    pub state: SyncState,
    pub replayed: Vec<OperationId>,
    pub dead_lettered: Vec<OperationId>,
    pub remaining: usize,
    pub failure: Option<ReplayFailure>,
}

impl SyncReport {
    /// Nothing was attempted: the backend could not be reached.
    pub fn unreachable(remaining: usize) -> Self {
        Self {
            state: SyncState::Offline,
            replayed: Vec::new(),
            dead_lettered: Vec::new(),
            remaining,
            failure: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.remaining == 0
    }
}
