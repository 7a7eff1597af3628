//! PostgREST / Supabase REST client.

use std::time::Duration;

use async_trait::async_trait;
use protrack_core::{Collection, IdempotencyKey, RecordId};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use super::r#trait::{Backend, BackendError, Filter};

/// Backend speaking the PostgREST dialect exposed by Supabase
/// (`{base_url}/rest/v1/{table}`).
#[derive(Debug, Clone)]
pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl RestBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    fn table_url(&self, collection: Collection) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection.table_name())
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("apikey", key).bearer_auth(key),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, BackendError> {
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = resp.text().await.unwrap_or_default();
        Err(map_status(status, message))
    }

    fn map_transport_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Unavailable(err.to_string())
        }
    }
}

fn map_status(status: StatusCode, message: String) -> BackendError {
    match status {
        StatusCode::CONFLICT => BackendError::Duplicate(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            BackendError::Unavailable(format!("{status}: {message}"))
        }
        s if s.is_server_error() => BackendError::Unavailable(format!("{status}: {message}")),
        s => BackendError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

/// PostgREST answers writes with an array of affected rows.
async fn first_row(resp: Response) -> Result<Value, BackendError> {
    let body: Value = resp
        .json()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))?;

    match body {
        Value::Array(mut rows) if !rows.is_empty() => Ok(rows.swap_remove(0)),
        Value::Array(_) => Err(BackendError::Rejected {
            status: 404,
            message: "no rows affected".to_string(),
        }),
        row @ Value::Object(_) => Ok(row),
        other => Err(BackendError::Decode(format!("unexpected body: {other}"))),
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn select(
        &self,
        collection: Collection,
        filter: Option<&Filter>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, BackendError> {
        let mut query: Vec<(String, String)> = vec![("select".to_string(), "*".to_string())];
        if let Some(f) = filter {
            query.push((f.column.clone(), format!("eq.{}", f.value)));
        }
        if let Some(limit) = limit {
            query.push(("limit".to_string(), limit.to_string()));
        }

        let req = self.client.get(self.table_url(collection)).query(&query);
        let resp = self.send(req).await?;

        resp.json::<Vec<Value>>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn insert(
        &self,
        collection: Collection,
        record: Value,
        idempotency_key: IdempotencyKey,
    ) -> Result<Value, BackendError> {
        let req = self
            .client
            .post(self.table_url(collection))
            .header("Prefer", "return=representation")
            .header("Idempotency-Key", idempotency_key.to_string())
            .json(&record);

        let resp = self.send(req).await?;
        first_row(resp).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &RecordId,
        patch: Value,
    ) -> Result<Value, BackendError> {
        let req = self
            .client
            .patch(self.table_url(collection))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&patch);

        let resp = self.send(req).await?;
        first_row(resp).await
    }
}
