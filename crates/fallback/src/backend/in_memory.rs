use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use protrack_core::{Collection, IdempotencyKey, RecordId};
use serde_json::Value;
use uuid::Uuid;

use super::r#trait::{Backend, BackendError, CLIENT_REF_COLUMN, Filter};

/// In-memory backend for tests/dev.
///
/// Assigns its own ids, remembers idempotency keys, enforces a unique
/// `client_ref`, and can be switched off or told to reject rows to
/// simulate outages and constraint failures.
#[derive(Debug)]
pub struct InMemoryBackend {
    inner: RwLock<Inner>,
}

#[derive(Debug)]
struct Inner {
    reachable: bool,
    tables: HashMap<Collection, Vec<Value>>,
    applied: HashMap<IdempotencyKey, Value>,
    rejections: Vec<(Collection, Filter)>,
    writes_until_outage: Option<usize>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                reachable: true,
                tables: HashMap::new(),
                applied: HashMap::new(),
                rejections: Vec::new(),
                writes_until_outage: None,
            }),
        }
    }

    /// A backend that starts out unreachable.
    pub fn unreachable() -> Self {
        let backend = Self::new();
        backend.set_reachable(false);
        backend
    }

    pub fn set_reachable(&self, reachable: bool) {
        if let Ok(mut inner) = self.inner.write() {
            inner.reachable = reachable;
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.inner.read().map(|i| i.reachable).unwrap_or(false)
    }

    /// Reject (422) every write to `collection` whose row matches `filter`.
    pub fn reject_where(&self, collection: Collection, filter: Filter) {
        if let Ok(mut inner) = self.inner.write() {
            inner.rejections.push((collection, filter));
        }
    }

    pub fn clear_rejections(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.rejections.clear();
        }
    }

    /// Become unreachable after `writes` more successful writes.
    pub fn go_down_after_writes(&self, writes: usize) {
        if let Ok(mut inner) = self.inner.write() {
            if writes == 0 {
                inner.reachable = false;
                inner.writes_until_outage = None;
            } else {
                inner.writes_until_outage = Some(writes);
            }
        }
    }

    /// Rows currently stored in `collection`, in insertion order.
    pub fn rows(&self, collection: Collection) -> Vec<Value> {
        self.inner
            .read()
            .map(|i| i.tables.get(&collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.rows(collection).len()
    }

    fn guard(&self) -> Result<RwLockWriteGuard<'_, Inner>, BackendError> {
        self.inner
            .write()
            .map_err(|_| BackendError::Unavailable("backend state poisoned".to_string()))
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn ensure_reachable(&self) -> Result<(), BackendError> {
        if self.reachable {
            Ok(())
        } else {
            Err(BackendError::Unavailable("connection refused".to_string()))
        }
    }

    fn check_rejections(&self, collection: Collection, row: &Value) -> Result<(), BackendError> {
        let hit = self
            .rejections
            .iter()
            .find(|(c, f)| *c == collection && f.matches(row));
        match hit {
            Some((_, f)) => Err(BackendError::Rejected {
                status: 422,
                message: format!("{} violates constraint on {}", collection, f.column),
            }),
            None => Ok(()),
        }
    }

    fn record_write(&mut self) {
        if let Some(left) = self.writes_until_outage {
            if left <= 1 {
                self.reachable = false;
                self.writes_until_outage = None;
            } else {
                self.writes_until_outage = Some(left - 1);
            }
        }
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn select(
        &self,
        collection: Collection,
        filter: Option<&Filter>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, BackendError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| BackendError::Unavailable("backend state poisoned".to_string()))?;
        inner.ensure_reachable()?;

        let rows = inner
            .tables
            .get(&collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filter.is_none_or(|f| f.matches(row)))
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn insert(
        &self,
        collection: Collection,
        record: Value,
        idempotency_key: IdempotencyKey,
    ) -> Result<Value, BackendError> {
        let mut inner = self.guard()?;
        inner.ensure_reachable()?;

        if let Some(row) = inner.applied.get(&idempotency_key) {
            return Ok(row.clone());
        }

        let Value::Object(mut fields) = record else {
            return Err(BackendError::Rejected {
                status: 400,
                message: "record must be a JSON object".to_string(),
            });
        };

        if let Some(Value::String(client_ref)) = fields.get(CLIENT_REF_COLUMN) {
            let filter = Filter::eq(CLIENT_REF_COLUMN, client_ref.clone());
            let exists = inner
                .tables
                .get(&collection)
                .is_some_and(|rows| rows.iter().any(|r| filter.matches(r)));
            if exists {
                return Err(BackendError::Duplicate(format!(
                    "{collection}.{CLIENT_REF_COLUMN} = {client_ref}"
                )));
            }
        }

        fields.insert("id".to_string(), Value::String(Uuid::now_v7().to_string()));
        let row = Value::Object(fields);
        inner.check_rejections(collection, &row)?;

        inner.tables.entry(collection).or_default().push(row.clone());
        inner.applied.insert(idempotency_key, row.clone());
        inner.record_write();
        Ok(row)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &RecordId,
        patch: Value,
    ) -> Result<Value, BackendError> {
        let mut inner = self.guard()?;
        inner.ensure_reachable()?;

        let Value::Object(patch) = patch else {
            return Err(BackendError::Rejected {
                status: 400,
                message: "patch must be a JSON object".to_string(),
            });
        };

        let by_id = Filter::eq("id", id.as_str());
        let position = inner
            .tables
            .get(&collection)
            .and_then(|rows| rows.iter().position(|r| by_id.matches(r)))
            .ok_or_else(|| BackendError::Rejected {
                status: 404,
                message: format!("{collection} row {id} not found"),
            })?;

        let mut updated = inner.tables[&collection][position].clone();
        if let Value::Object(fields) = &mut updated {
            for (k, v) in patch {
                if k != "id" {
                    fields.insert(k, v);
                }
            }
        }
        inner.check_rejections(collection, &updated)?;

        if let Some(rows) = inner.tables.get_mut(&collection) {
            rows[position] = updated.clone();
        }
        inner.record_write();
        Ok(updated)
    }
}
