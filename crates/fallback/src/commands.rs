//! Administrative operations behind the `protrack` CLI.
//!
//! Each command returns a serializable value; the binary prints it as JSON.

use std::sync::Arc;

use anyhow::Context;
use protrack_core::{
    Collection, ComplianceRecord, IoTReading, NewComplianceRecord, NewIoTReading, NewProduct,
    NewQualityTest, NewShipment, NewUser, OperationId, Product, QualityTest, RecordId, SensorKind,
    Shipment, ShipmentStatus, User,
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::backend::{Backend, RestBackend};
use crate::config::Config;
use crate::store::{OfflineStore, SqliteStore};
use crate::sync_manager::FallbackManager;
use crate::sync_worker::SyncWorker;
use crate::types::SyncReport;

/// Everything a command needs, built once per process.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub manager: Arc<FallbackManager>,
}

impl AppState {
    /// Open the SQLite store and the REST backend described by `config`.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = match &config.db_path {
            Some(path) => SqliteStore::open(path).await?,
            None => SqliteStore::open_default().await?,
        };
        let backend = RestBackend::new(
            config.backend_url.clone(),
            config.api_key.clone(),
            config.request_timeout(),
        )
        .context("failed to build backend client")?;

        tracing::info!(
            backend_url = %config.backend_url,
            authenticated = config.api_key.is_some(),
            "initializing offline layer"
        );
        Ok(Self::with_parts(config, Arc::new(backend), Arc::new(store)))
    }

    pub fn with_parts(
        config: Config,
        backend: Arc<dyn Backend>,
        store: Arc<dyn OfflineStore>,
    ) -> Self {
        let manager = FallbackManager::with_options(backend, store, config.fallback_options());
        Self {
            config,
            manager: Arc::new(manager),
        }
    }

    /// Find out where writes should go: check the backend and replay anything
    /// left queued by earlier runs.
    pub async fn connect(&self) -> anyhow::Result<SyncReport> {
        let report = self.manager.sync_pending_operations().await?;
        if report.failure.is_some() || report.remaining > 0 {
            tracing::warn!(
                remaining = report.remaining,
                state = ?report.state,
                "pending operations could not all be replayed"
            );
        }
        Ok(report)
    }
}

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<Value> {
    serde_json::to_value(value).context("failed to serialize command output")
}

pub async fn status(app: &AppState) -> anyhow::Result<Value> {
    app.manager.check_connection().await;
    to_json(&app.manager.status().await?)
}

pub async fn check(app: &AppState) -> anyhow::Result<Value> {
    to_json(&app.manager.check_connection().await)
}

pub async fn force_online(app: &AppState) -> anyhow::Result<Value> {
    let report = app.manager.force_online_mode().await?;
    Ok(json!({
        "report": report,
        "connection": app.manager.connection_status().await,
    }))
}

pub async fn sync(app: &AppState) -> anyhow::Result<Value> {
    to_json(&app.manager.sync_pending_operations().await?)
}

pub async fn pending(app: &AppState) -> anyhow::Result<Value> {
    let ops = app.manager.pending_operations().await?;
    Ok(json!({
        "count": ops.len(),
        "operations": ops,
    }))
}

pub async fn dead_letters(app: &AppState) -> anyhow::Result<Value> {
    to_json(&app.manager.list_dead_letters().await?)
}

pub async fn requeue(app: &AppState, id: OperationId) -> anyhow::Result<Value> {
    to_json(&app.manager.requeue_dead_letter(id).await?)
}

pub async fn discard(app: &AppState, id: OperationId) -> anyhow::Result<Value> {
    app.manager.discard_dead_letter(id).await?;
    Ok(json!({ "discarded": id }))
}

pub async fn seed(app: &AppState) -> anyhow::Result<Value> {
    let written = app.manager.seed_demo_data().await?;
    Ok(json!({ "seeded": written }))
}

/// List a collection, from the backend when online and the mirror otherwise.
pub async fn list(app: &AppState, collection: Collection) -> anyhow::Result<Value> {
    app.connect().await?;
    let manager = &app.manager;
    match collection {
        Collection::Products => to_json(&manager.list::<Product>().await?),
        Collection::Shipments => to_json(&manager.list::<Shipment>().await?),
        Collection::IotData => to_json(&manager.list::<IoTReading>().await?),
        Collection::QualityTests => to_json(&manager.list::<QualityTest>().await?),
        Collection::ComplianceRecords => to_json(&manager.list::<ComplianceRecord>().await?),
        Collection::Users => to_json(&manager.list::<User>().await?),
    }
}

pub async fn create_product(app: &AppState, new: NewProduct) -> anyhow::Result<Value> {
    app.connect().await?;
    to_json(&app.manager.create_product(new).await?)
}

pub async fn create_shipment(app: &AppState, new: NewShipment) -> anyhow::Result<Value> {
    app.connect().await?;
    to_json(&app.manager.create_shipment(new).await?)
}

pub async fn record_iot(
    app: &AppState,
    product_id: RecordId,
    device_id: String,
    sensor: SensorKind,
    value: f64,
    unit: String,
) -> anyhow::Result<Value> {
    app.connect().await?;
    let reading: IoTReading = app
        .manager
        .create_iot_reading(NewIoTReading {
            product_id,
            device_id,
            sensor,
            value,
            unit,
            recorded_at: None,
        })
        .await?;
    to_json(&reading)
}

pub async fn record_quality_test(app: &AppState, new: NewQualityTest) -> anyhow::Result<Value> {
    app.connect().await?;
    let test: QualityTest = app.manager.create_quality_test(new).await?;
    to_json(&test)
}

pub async fn record_compliance(
    app: &AppState,
    new: NewComplianceRecord,
) -> anyhow::Result<Value> {
    app.connect().await?;
    let record: ComplianceRecord = app.manager.create_compliance_record(new).await?;
    to_json(&record)
}

pub async fn create_user(app: &AppState, new: NewUser) -> anyhow::Result<Value> {
    app.connect().await?;
    to_json(&app.manager.create_user(new).await?)
}

pub async fn advance_product(app: &AppState, id: RecordId) -> anyhow::Result<Value> {
    app.connect().await?;
    to_json(&app.manager.advance_product(&id).await?)
}

pub async fn advance_shipment(
    app: &AppState,
    id: RecordId,
    status: ShipmentStatus,
) -> anyhow::Result<Value> {
    app.connect().await?;
    to_json(&app.manager.update_shipment_status(&id, status).await?)
}

/// Run the background worker until Ctrl-C.
pub async fn watch(app: &AppState) -> anyhow::Result<Value> {
    let worker = SyncWorker::new(
        app.manager.clone(),
        app.config.sync_interval(),
        app.config.backoff(),
    );
    let shutdown = worker.shutdown_handle();
    let handle = worker.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    shutdown.notify_one();
    handle.await.context("sync worker panicked")?;

    to_json(&app.manager.status().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::store::InMemoryStore;

    fn app(backend: Arc<InMemoryBackend>) -> AppState {
        AppState::with_parts(Config::default(), backend, InMemoryStore::arc())
    }

    fn coffee() -> NewProduct {
        NewProduct {
            name: "Coffee".to_string(),
            batch_number: "B-1".to_string(),
            manufacturer: "Acme".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn offline_create_then_sync_via_commands() {
        let backend = Arc::new(InMemoryBackend::unreachable());
        let app = app(backend.clone());

        let created = create_product(&app, coffee()).await.unwrap();
        assert!(created["id"].as_str().unwrap().starts_with("local_"));
        assert_eq!(pending(&app).await.unwrap()["count"], 1);

        let status_out = status(&app).await.unwrap();
        assert_eq!(status_out["state"], "offline");
        assert_eq!(status_out["pending_operations"], 1);

        backend.set_reachable(true);
        let out = force_online(&app).await.unwrap();
        assert_eq!(out["report"]["state"], "online");
        assert_eq!(out["connection"]["is_online"], true);
        assert_eq!(backend.len(Collection::Products), 1);
    }

    #[tokio::test]
    async fn dead_letter_admin_round_trip() {
        let backend = Arc::new(InMemoryBackend::unreachable());
        let mut config = Config::default();
        config.rejected_policy = crate::types::RejectedPolicy::DeadLetter;
        let app = AppState::with_parts(config, backend.clone(), InMemoryStore::arc());

        create_product(&app, coffee()).await.unwrap();
        backend.reject_where(
            Collection::Products,
            crate::backend::Filter::eq("name", "Coffee"),
        );
        backend.set_reachable(true);
        sync(&app).await.unwrap();

        let letters = app.manager.list_dead_letters().await.unwrap();
        assert_eq!(letters.len(), 1);
        let id = letters[0].operation.id;

        backend.clear_rejections();
        requeue(&app, id).await.unwrap();
        let report = sync(&app).await.unwrap();
        assert_eq!(report["remaining"], 0);
        assert_eq!(dead_letters(&app).await.unwrap(), json!([]));
        assert_eq!(backend.len(Collection::Products), 1);
    }

    #[tokio::test]
    async fn seed_then_list_products_offline() {
        let app = app(Arc::new(InMemoryBackend::unreachable()));
        let seeded = seed(&app).await.unwrap();
        assert!(seeded["seeded"].as_u64().unwrap() > 0);

        let listed = list(&app, Collection::Products).await.unwrap();
        assert_eq!(listed.as_array().unwrap().len(), crate::seed::products().len());
    }
}
