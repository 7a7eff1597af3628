use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use protrack_core::{Collection, OperationId, RecordId};
use serde_json::Value;

use super::r#trait::{OfflineStore, StoreError};
use crate::types::{DeadLetter, PendingOperation};

/// In-memory store for tests/dev. Nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<PendingOperation>,
    dead_letters: Vec<DeadLetter>,
    mirror: HashMap<Collection, Vec<(RecordId, Value)>>,
    id_map: BTreeMap<RecordId, RecordId>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Storage("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Storage("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl OfflineStore for InMemoryStore {
    async fn append_operation(&self, op: &PendingOperation) -> Result<(), StoreError> {
        self.write()?.queue.push_back(op.clone());
        Ok(())
    }

    async fn pending_operations(&self) -> Result<Vec<PendingOperation>, StoreError> {
        Ok(self.read()?.queue.iter().cloned().collect())
    }

    async fn head_operation(&self) -> Result<Option<PendingOperation>, StoreError> {
        Ok(self.read()?.queue.front().cloned())
    }

    async fn count_operations(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.queue.len())
    }

    async fn remove_operation(&self, id: OperationId) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let before = inner.queue.len();
        inner.queue.retain(|op| op.id != id);
        if inner.queue.len() == before {
            return Err(StoreError::OperationNotFound(id));
        }
        Ok(())
    }

    async fn record_failure(&self, id: OperationId, error: &str) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let op = inner
            .queue
            .iter_mut()
            .find(|op| op.id == id)
            .ok_or(StoreError::OperationNotFound(id))?;
        op.attempts += 1;
        op.last_error = Some(error.to_string());
        Ok(())
    }

    async fn dead_letter(&self, id: OperationId, reason: &str) -> Result<DeadLetter, StoreError> {
        let mut inner = self.write()?;
        let position = inner
            .queue
            .iter()
            .position(|op| op.id == id)
            .ok_or(StoreError::OperationNotFound(id))?;
        let operation = inner
            .queue
            .remove(position)
            .ok_or(StoreError::OperationNotFound(id))?;

        let letter = DeadLetter {
            operation,
            reason: reason.to_string(),
            dead_lettered_at: Utc::now(),
        };
        inner.dead_letters.push(letter.clone());
        Ok(letter)
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        Ok(self.read()?.dead_letters.clone())
    }

    async fn requeue_dead_letter(&self, id: OperationId) -> Result<PendingOperation, StoreError> {
        let mut inner = self.write()?;
        let position = inner
            .dead_letters
            .iter()
            .position(|d| d.operation.id == id)
            .ok_or(StoreError::DeadLetterNotFound(id))?;
        let letter = inner.dead_letters.remove(position);
        inner.queue.push_back(letter.operation.clone());
        Ok(letter.operation)
    }

    async fn discard_dead_letter(&self, id: OperationId) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let before = inner.dead_letters.len();
        inner.dead_letters.retain(|d| d.operation.id != id);
        if inner.dead_letters.len() == before {
            return Err(StoreError::DeadLetterNotFound(id));
        }
        Ok(())
    }

    async fn put_record(
        &self,
        collection: Collection,
        id: &RecordId,
        data: &Value,
    ) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let rows = inner.mirror.entry(collection).or_default();
        match rows.iter_mut().find(|(rid, _)| rid == id) {
            Some((_, existing)) => *existing = data.clone(),
            None => rows.push((id.clone(), data.clone())),
        }
        Ok(())
    }

    async fn rekey_record(
        &self,
        collection: Collection,
        from: &RecordId,
        to: &RecordId,
        data: &Value,
    ) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let rows = inner.mirror.entry(collection).or_default();
        if from != to && rows.iter().any(|(rid, _)| rid == from) {
            rows.retain(|(rid, _)| rid != to);
        }
        match rows.iter_mut().find(|(rid, _)| rid == from || rid == to) {
            Some(row) => *row = (to.clone(), data.clone()),
            None => rows.push((to.clone(), data.clone())),
        }
        Ok(())
    }

    async fn get_record(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<Option<Value>, StoreError> {
        Ok(self
            .read()?
            .mirror
            .get(&collection)
            .and_then(|rows| rows.iter().find(|(rid, _)| rid == id))
            .map(|(_, v)| v.clone()))
    }

    async fn records(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .read()?
            .mirror
            .get(&collection)
            .map(|rows| rows.iter().map(|(_, v)| v.clone()).collect())
            .unwrap_or_default())
    }

    async fn map_id(&self, local: &RecordId, remote: &RecordId) -> Result<(), StoreError> {
        self.write()?.id_map.insert(local.clone(), remote.clone());
        Ok(())
    }

    async fn resolve_id(&self, local: &RecordId) -> Result<Option<RecordId>, StoreError> {
        Ok(self.read()?.id_map.get(local).cloned())
    }

    async fn id_mappings(&self) -> Result<Vec<(RecordId, RecordId)>, StoreError> {
        Ok(self
            .read()?
            .id_map
            .iter()
            .map(|(l, r)| (l.clone(), r.clone()))
            .collect())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        *self.write()? = Inner::default();
        Ok(())
    }
}
