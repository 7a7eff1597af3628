use std::sync::Arc;

use proptest::prelude::*;
use protrack_core::{Collection, NewProduct, NewShipment, Product, RecordId, Shipment};
use protrack_fallback::backend::{Filter, InMemoryBackend};
use protrack_fallback::{
    ConnectionStatus, FallbackManager, FallbackOptions, InMemoryStore, OfflineStore,
    RejectedPolicy, SqliteStore, SyncState,
};

fn product(name: &str) -> NewProduct {
    NewProduct {
        name: name.to_string(),
        batch_number: format!("B-{name}"),
        manufacturer: "Acme Farms".to_string(),
        ..Default::default()
    }
}

fn shipment(product_id: &RecordId) -> NewShipment {
    NewShipment {
        product_id: product_id.clone(),
        origin: "Huila".to_string(),
        destination: "Rotterdam".to_string(),
        carrier: "Maersk".to_string(),
        tracking_number: "MSK-1".to_string(),
        estimated_arrival: None,
    }
}

fn offline_manager(policy: RejectedPolicy) -> (Arc<InMemoryBackend>, FallbackManager) {
    let backend = Arc::new(InMemoryBackend::unreachable());
    let options = FallbackOptions {
        rejected_policy: policy,
        ..FallbackOptions::default()
    };
    let manager = FallbackManager::with_options(backend.clone(), InMemoryStore::arc(), options);
    (backend, manager)
}

fn names(backend: &InMemoryBackend) -> Vec<String> {
    backend
        .rows(Collection::Products)
        .iter()
        .map(|row| row["name"].as_str().unwrap_or_default().to_string())
        .collect()
}

fn assert_consistent(status: &ConnectionStatus) {
    assert!(
        !(status.is_online && !status.backend_connected),
        "online without a backend connection: {status:?}"
    );
}

#[tokio::test]
async fn offline_writes_replay_in_order_once_backend_returns() {
    let (backend, m) = offline_manager(RejectedPolicy::Halt);

    let mut created = Vec::new();
    for name in ["Arabica", "Robusta", "Liberica"] {
        created.push(m.create_product(product(name)).await.unwrap());
    }
    assert_eq!(m.get_pending_operations_count().await.unwrap(), 3);
    assert!(created.iter().all(|p| p.id.is_local()));
    assert_eq!(backend.len(Collection::Products), 0);

    // Offline reads see the queued writes.
    let listed: Vec<Product> = m.list().await.unwrap();
    assert_eq!(listed.len(), 3);

    backend.set_reachable(true);
    let report = m.sync_pending_operations().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.replayed.len(), 3);
    assert_eq!(report.state, SyncState::Online);
    assert_eq!(m.get_pending_operations_count().await.unwrap(), 0);

    assert_eq!(names(&backend), vec!["Arabica", "Robusta", "Liberica"]);
    for (row, local) in backend.rows(Collection::Products).iter().zip(&created) {
        assert_eq!(row["client_ref"], local.id.as_str());
        assert_ne!(row["id"], local.id.as_str());
    }
}

#[tokio::test]
async fn outage_mid_drain_keeps_the_unreplayed_tail_in_order() {
    let (backend, m) = offline_manager(RejectedPolicy::Halt);
    for name in ["p1", "p2", "p3", "p4", "p5"] {
        m.create_product(product(name)).await.unwrap();
    }
    let queued = m.pending_operations().await.unwrap();

    backend.set_reachable(true);
    backend.go_down_after_writes(2);
    let report = m.sync_pending_operations().await.unwrap();

    assert_eq!(report.replayed, vec![queued[0].id, queued[1].id]);
    assert_eq!(report.remaining, 3);
    assert_eq!(report.state, SyncState::Offline);
    assert!(report.failure.as_ref().is_some_and(|f| f.transient));

    let left: Vec<_> = m.pending_operations().await.unwrap().iter().map(|o| o.id).collect();
    assert_eq!(left, queued[2..].iter().map(|o| o.id).collect::<Vec<_>>());
    assert_consistent(&m.connection_status().await);

    backend.set_reachable(true);
    let report = m.sync_pending_operations().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(names(&backend), vec!["p1", "p2", "p3", "p4", "p5"]);
}

#[tokio::test]
async fn child_created_offline_points_at_the_remote_parent() {
    let (backend, m) = offline_manager(RejectedPolicy::Halt);
    let parent = m.create_product(product("Arabica")).await.unwrap();
    let child = m.create_shipment(shipment(&parent.id)).await.unwrap();
    assert_eq!(child.product_id, parent.id);

    backend.set_reachable(true);
    assert!(m.sync_pending_operations().await.unwrap().is_complete());

    let products = backend.rows(Collection::Products);
    let shipments = backend.rows(Collection::Shipments);
    assert_eq!(shipments.len(), 1);
    assert_eq!(shipments[0]["product_id"], products[0]["id"]);
    assert_eq!(shipments[0]["client_ref"], child.id.as_str());
}

#[tokio::test]
async fn sync_while_unreachable_changes_nothing() {
    let (backend, m) = offline_manager(RejectedPolicy::Halt);
    m.create_product(product("Arabica")).await.unwrap();
    m.create_product(product("Robusta")).await.unwrap();
    let before = m.pending_operations().await.unwrap();

    let report = m.sync_pending_operations().await.unwrap();
    assert_eq!(report.state, SyncState::Offline);
    assert!(report.replayed.is_empty());
    assert_eq!(report.remaining, 2);
    assert_eq!(m.pending_operations().await.unwrap(), before);
    assert_eq!(m.state().await, SyncState::Offline);
    assert_eq!(backend.len(Collection::Products), 0);
}

#[tokio::test]
async fn force_online_never_leaves_the_layer_online_without_a_backend() {
    let (backend, m) = offline_manager(RejectedPolicy::Halt);
    m.create_product(product("Arabica")).await.unwrap();

    m.force_online_mode().await.unwrap();
    let status = m.connection_status().await;
    assert_consistent(&status);
    assert!(!status.is_online);
    assert_eq!(m.get_pending_operations_count().await.unwrap(), 1);

    // Reachable but halted on a rejected operation: connected, not online.
    backend.set_reachable(true);
    backend.reject_where(Collection::Products, Filter::eq("name", "Arabica"));
    m.force_online_mode().await.unwrap();
    let status = m.connection_status().await;
    assert_consistent(&status);
    assert!(status.backend_connected);
    assert!(!status.is_online);

    backend.clear_rejections();
    let report = m.force_online_mode().await.unwrap();
    assert_eq!(report.state, SyncState::Online);
    let status = m.connection_status().await;
    assert_consistent(&status);
    assert!(status.is_online);
}

#[tokio::test]
async fn halt_policy_stops_at_the_rejected_operation() {
    let (backend, m) = offline_manager(RejectedPolicy::Halt);
    let bad = m.create_product(product("Bad")).await.unwrap();
    m.create_shipment(shipment(&bad.id)).await.unwrap();
    m.create_product(product("Good")).await.unwrap();
    backend.reject_where(Collection::Products, Filter::eq("name", "Bad"));

    backend.set_reachable(true);
    let report = m.sync_pending_operations().await.unwrap();
    let failure = report.failure.expect("drain should halt");
    assert!(!failure.transient);
    assert_eq!(report.remaining, 3);
    assert_eq!(report.state, SyncState::Offline);
    assert_eq!(backend.len(Collection::Products), 0);

    let head = &m.pending_operations().await.unwrap()[0];
    assert_eq!(head.entity_id, bad.id);
    assert_eq!(head.attempts, 1);
    assert!(head.last_error.is_some());
}

#[tokio::test]
async fn dead_letter_policy_parks_the_rejected_operation_and_its_dependents() {
    let (backend, m) = offline_manager(RejectedPolicy::DeadLetter);
    let bad = m.create_product(product("Bad")).await.unwrap();
    m.create_shipment(shipment(&bad.id)).await.unwrap();
    m.create_product(product("Good")).await.unwrap();
    backend.reject_where(Collection::Products, Filter::eq("name", "Bad"));

    backend.set_reachable(true);
    let report = m.sync_pending_operations().await.unwrap();
    assert_eq!(report.dead_lettered.len(), 2);
    assert_eq!(report.replayed.len(), 1);
    assert_eq!(report.state, SyncState::Online);
    assert_eq!(names(&backend), vec!["Good"]);
    assert_eq!(backend.len(Collection::Shipments), 0);

    let parked = m.list_dead_letters().await.unwrap();
    assert_eq!(parked.len(), 2);
    assert_eq!(parked[0].operation.entity_id, bad.id);
    assert!(parked[1].reason.contains(bad.id.as_str()));

    // Operator fixes the backend and replays both, parent first.
    backend.clear_rejections();
    for letter in &parked {
        m.requeue_dead_letter(letter.operation.id).await.unwrap();
    }
    let report = m.sync_pending_operations().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(backend.len(Collection::Shipments), 1);
    assert!(m.list_dead_letters().await.unwrap().is_empty());
}

#[tokio::test]
async fn replaying_an_already_applied_queue_does_not_duplicate_rows() {
    let (backend, m) = offline_manager(RejectedPolicy::Halt);
    let parent = m.create_product(product("Arabica")).await.unwrap();
    m.create_shipment(shipment(&parent.id)).await.unwrap();
    let ops = m.pending_operations().await.unwrap();

    backend.set_reachable(true);
    assert!(m.sync_pending_operations().await.unwrap().is_complete());

    // A second device state that lost its acknowledgements and id map
    // replays the very same operations.
    let replica = FallbackManager::new(backend.clone(), InMemoryStore::arc());
    for op in ops {
        replica.add_pending_operation(op).await.unwrap();
    }
    let report = replica.sync_pending_operations().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(backend.len(Collection::Products), 1);
    assert_eq!(backend.len(Collection::Shipments), 1);
}

#[tokio::test]
async fn reconciled_records_are_mirrored_once_under_their_remote_id() {
    let stores: Vec<Arc<dyn OfflineStore>> = vec![
        InMemoryStore::arc() as Arc<dyn OfflineStore>,
        Arc::new(SqliteStore::in_memory().await.unwrap()) as Arc<dyn OfflineStore>,
    ];
    for store in stores {
        let backend = Arc::new(InMemoryBackend::unreachable());
        let m = FallbackManager::new(backend.clone(), store);
        let parent = m.create_product(product("Arabica")).await.unwrap();
        let child = m.create_shipment(shipment(&parent.id)).await.unwrap();

        backend.set_reachable(true);
        assert!(m.sync_pending_operations().await.unwrap().is_complete());
        let online: Vec<Product> = m.list().await.unwrap();
        assert_eq!(online.len(), 1);
        let remote = online[0].id.clone();
        assert!(!remote.is_local());

        backend.set_reachable(false);
        m.check_connection().await;
        assert_eq!(m.state().await, SyncState::Offline);

        let offline: Vec<Product> = m.list().await.unwrap();
        assert_eq!(offline.len(), 1, "one mirrored row per record");
        assert_eq!(offline[0].id, remote);

        let by_local: Product = m.find(&parent.id).await.unwrap();
        let by_remote: Product = m.find(&remote).await.unwrap();
        assert_eq!(by_local, by_remote);

        let shipments: Vec<Shipment> = m.list().await.unwrap();
        assert_eq!(shipments.len(), 1);
        assert_eq!(shipments[0].product_id, remote);
        let shipment_by_local: Shipment = m.find(&child.id).await.unwrap();
        assert_eq!(shipment_by_local.id, shipments[0].id);
    }
}

#[tokio::test]
async fn queue_survives_a_restart_on_sqlite() {
    let path = std::env::temp_dir().join(format!("protrack-{}.db", uuid::Uuid::now_v7()));
    let backend = Arc::new(InMemoryBackend::unreachable());

    {
        let store: Arc<dyn OfflineStore> = Arc::new(SqliteStore::open(&path).await.unwrap());
        let m = FallbackManager::new(backend.clone(), store);
        let parent = m.create_product(product("Arabica")).await.unwrap();
        m.create_shipment(shipment(&parent.id)).await.unwrap();
    }

    let store: Arc<dyn OfflineStore> = Arc::new(SqliteStore::open(&path).await.unwrap());
    let m = FallbackManager::new(backend.clone(), store);
    assert_eq!(m.get_pending_operations_count().await.unwrap(), 2);

    backend.set_reachable(true);
    assert!(m.sync_pending_operations().await.unwrap().is_complete());
    assert_eq!(backend.len(Collection::Shipments), 1);

    let _ = std::fs::remove_file(&path);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        ..ProptestConfig::default()
    })]

    /// Property: whatever is written offline lands on the backend in the
    /// order it was written, exactly once, across any number of outages.
    #[test]
    fn offline_writes_land_in_write_order(
        count in 1usize..8,
        outage_after in prop::collection::vec(1usize..4, 0..4),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let landed = rt.block_on(async {
            let (backend, m) = offline_manager(RejectedPolicy::Halt);
            for i in 0..count {
                m.create_product(product(&format!("p{i}"))).await.unwrap();
            }

            for writes in &outage_after {
                backend.set_reachable(true);
                backend.go_down_after_writes(*writes);
                m.sync_pending_operations().await.unwrap();
                assert_consistent(&m.connection_status().await);
            }
            backend.set_reachable(true);
            backend.go_down_after_writes(usize::MAX);
            let report = m.sync_pending_operations().await.unwrap();
            assert!(report.is_complete());
            names(&backend)
        });

        let expected: Vec<String> = (0..count).map(|i| format!("p{i}")).collect();
        prop_assert_eq!(landed, expected);
    }
}
