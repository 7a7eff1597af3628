use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use protrack_core::{Collection, IdempotencyKey, RecordId};
use serde_json::Value;
use thiserror::Error;

/// Column that carries the local id of a record created offline.
///
/// The backend is expected to hold a unique constraint on it so a replayed
/// insert that already landed is reported as a duplicate instead of
/// creating a second row.
pub const CLIENT_REF_COLUMN: &str = "client_ref";

/// Equality filter on a single column (`column = value`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Does `row` satisfy this filter? Strings compare as-is, other JSON
    /// values by their rendered form.
    pub fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => s == &self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Network unreachable, connection refused, 5xx.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend request timed out after {0:?}")]
    Timeout(Duration),
    /// The backend understood the request and refused it.
    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// A unique constraint (usually `client_ref`) already holds this record.
    #[error("duplicate record: {0}")]
    Duplicate(String),
    #[error("failed to decode backend response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Worth retrying once connectivity returns.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::Timeout(_))
    }
}

/// Durable relational store the offline layer reconciles against.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Cheap reachability check.
    async fn health_check(&self) -> Result<(), BackendError> {
        self.select(Collection::Products, None, Some(1))
            .await
            .map(|_| ())
    }

    async fn select(
        &self,
        collection: Collection,
        filter: Option<&Filter>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, BackendError>;

    /// Insert `record` and return the stored row (with the backend's `id`).
    async fn insert(
        &self,
        collection: Collection,
        record: Value,
        idempotency_key: IdempotencyKey,
    ) -> Result<Value, BackendError>;

    /// Patch the row identified by `id` and return it.
    async fn update(
        &self,
        collection: Collection,
        id: &RecordId,
        patch: Value,
    ) -> Result<Value, BackendError>;
}

#[async_trait]
impl<B> Backend for Arc<B>
where
    B: Backend + ?Sized,
{
    async fn health_check(&self) -> Result<(), BackendError> {
        (**self).health_check().await
    }

    async fn select(
        &self,
        collection: Collection,
        filter: Option<&Filter>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, BackendError> {
        (**self).select(collection, filter, limit).await
    }

    async fn insert(
        &self,
        collection: Collection,
        record: Value,
        idempotency_key: IdempotencyKey,
    ) -> Result<Value, BackendError> {
        (**self).insert(collection, record, idempotency_key).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &RecordId,
        patch: Value,
    ) -> Result<Value, BackendError> {
        (**self).update(collection, id, patch).await
    }
}

/// Read the backend-assigned `id` out of a returned row.
pub fn row_id(row: &Value) -> Result<RecordId, BackendError> {
    match row.get("id") {
        Some(Value::String(s)) => s
            .parse()
            .map_err(|e| BackendError::Decode(format!("invalid id in row: {e}"))),
        Some(Value::Number(n)) => Ok(RecordId::remote(n.to_string())),
        _ => Err(BackendError::Decode("row has no id".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_strings_and_numbers() {
        let row = json!({ "id": 7, "status": "packaged", "note": null });

        assert!(Filter::eq("status", "packaged").matches(&row));
        assert!(Filter::eq("id", "7").matches(&row));
        assert!(!Filter::eq("note", "null").matches(&row));
        assert!(!Filter::eq("missing", "x").matches(&row));
    }

    #[test]
    fn row_id_accepts_string_and_numeric_keys() {
        assert_eq!(row_id(&json!({ "id": "abc" })).unwrap(), RecordId::remote("abc"));
        assert_eq!(row_id(&json!({ "id": 12 })).unwrap(), RecordId::remote("12"));
        assert!(matches!(row_id(&json!({})), Err(BackendError::Decode(_))));
    }

    #[test]
    fn only_connectivity_errors_are_transient() {
        assert!(BackendError::Unavailable("down".into()).is_transient());
        assert!(BackendError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!BackendError::Duplicate("x".into()).is_transient());
        assert!(
            !BackendError::Rejected {
                status: 422,
                message: "bad".into()
            }
            .is_transient()
        );
    }
}
