//! End-to-end flow: ledger mutations while offline, then reconnection,
//! push, and pull-merge against a simulated backend.

use abrigo_ledger::{
    NewDistribution, NewDonation, Shelter, ShelterLedger, CENTRAL_LOCATION,
};
use abrigo_sync::{
    Connectivity, InMemoryRemote, LocalStore, LocalStoreConfig, RemoteStore, Stored, SyncConfig,
    SyncEngine,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tempfile::NamedTempFile;
use uuid::Uuid;

struct Harness {
    ledger: ShelterLedger,
    store: Arc<LocalStore>,
    remote: Arc<InMemoryRemote>,
    engine: Arc<SyncEngine>,
    _guard: NamedTempFile,
}

async fn harness(online: bool) -> Harness {
    let temp_file = NamedTempFile::new().unwrap();
    let config = LocalStoreConfig {
        db_path: temp_file.path().to_str().unwrap().to_string(),
        node_id: Uuid::new_v4(),
        max_connections: 5,
        enable_wal: true,
    };
    let store = Arc::new(LocalStore::open(config).await.unwrap());
    let remote = Arc::new(InMemoryRemote::new());
    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&store),
        Arc::clone(&remote) as Arc<dyn RemoteStore>,
        Connectivity::new(online),
        SyncConfig::default(),
    ));
    let ledger = ShelterLedger::with_sync(Arc::clone(&store), Arc::clone(&engine));

    Harness {
        ledger,
        store,
        remote,
        engine,
        _guard: temp_file,
    }
}

fn donation(description: &str, quantity: i64, unit: &str) -> NewDonation {
    NewDonation {
        shelter_id: None,
        item_description: description.to_string(),
        quantity: Decimal::from(quantity),
        unit: unit.to_string(),
        donor_name: None,
        category: None,
    }
}

#[tokio::test]
async fn example_run_stays_consistent() {
    let h = harness(false).await;

    // Donate 50 L of water into the central warehouse.
    h.ledger
        .add_donation(donation("Água mineral", 50, "L"))
        .await
        .unwrap();
    let inventory = h.ledger.get_inventory(Some(CENTRAL_LOCATION)).await.unwrap();
    assert_eq!(inventory[0].data.quantity, Decimal::from(50));

    // Distribute 20 to a shelter's families.
    h.ledger
        .add_distribution(NewDistribution {
            shelter_id: None,
            inventory_id: None,
            item_name: Some("Água mineral".to_string()),
            quantity: Decimal::from(20),
            unit: None,
            recipient_name: Some("Abrigo Escola Sul".to_string()),
        })
        .await
        .unwrap();

    // Transfer 10 to Shelter-7.
    let item_id = h.ledger.get_inventory(Some(CENTRAL_LOCATION)).await.unwrap()[0]
        .meta
        .business_id
        .clone();
    h.ledger
        .transfer_stock(&item_id, "ABR-7", Decimal::from(10))
        .await
        .unwrap();

    let central = h.ledger.get_inventory(Some(CENTRAL_LOCATION)).await.unwrap();
    assert_eq!(central[0].data.quantity, Decimal::from(20));
    let shelter7 = h.ledger.get_inventory(Some("ABR-7")).await.unwrap();
    assert_eq!(shelter7[0].data.quantity, Decimal::from(10));

    let report = h
        .ledger
        .get_data_consistency_report(Some(CENTRAL_LOCATION))
        .await
        .unwrap();
    assert_eq!(report.total_donated, Decimal::from(50));
    assert_eq!(report.total_distributed, Decimal::from(30));
    assert_eq!(report.expected_stock, Decimal::from(20));
    assert_eq!(report.current_stock, Decimal::from(20));
    assert_eq!(report.divergence, Decimal::ZERO);
    assert!(report.is_consistent);
}

#[tokio::test]
async fn offline_mutations_push_on_reconnect() {
    let h = harness(false).await;

    h.ledger
        .add_shelter(Shelter::new("Escola Municipal", 120))
        .await
        .unwrap();
    h.ledger
        .add_donation(donation("Água mineral", 50, "L"))
        .await
        .unwrap();

    // Everything is local-only while offline.
    assert_eq!(h.remote.record_count("shelters"), 0);
    assert_eq!(h.remote.record_count("donations"), 0);
    assert!(h.engine.sync_progress().await.unwrap() < 100);

    // Connectivity regained: one sync drains the backlog.
    h.engine.connectivity().set_online(true);
    h.engine.sync().await.unwrap();

    assert_eq!(h.remote.record_count("shelters"), 1);
    assert_eq!(h.remote.record_count("donations"), 1);
    assert_eq!(h.remote.record_count("inventory"), 1);
    assert_eq!(h.engine.sync_progress().await.unwrap(), 100);
}

#[tokio::test]
async fn online_mutation_pushes_immediately() {
    let h = harness(true).await;

    h.ledger
        .add_donation(donation("Cesta básica", 12, "un"))
        .await
        .unwrap();

    // The ledger's own push trigger already confirmed the records.
    assert_eq!(h.remote.record_count("donations"), 1);
    assert_eq!(h.remote.record_count("inventory"), 1);
    assert_eq!(h.store.list_unsynced("donations", 10).await.unwrap().len(), 0);
}

#[tokio::test]
async fn audit_log_is_never_pushed() {
    let h = harness(true).await;

    h.ledger
        .add_donation(donation("Cesta básica", 12, "un"))
        .await
        .unwrap();

    assert_eq!(h.ledger.get_audit_log(None, 50).await.unwrap().len(), 1);
    assert_eq!(h.remote.record_count("audit_log"), 0);
}

#[tokio::test]
async fn remote_edit_waits_behind_pending_local_edit() {
    let h = harness(true).await;

    let shelter = h
        .ledger
        .add_shelter(Shelter::new("Quadra Norte", 80))
        .await
        .unwrap();
    // Pushed on creation; now edit locally while the backend is down.
    h.remote.set_offline(true);
    h.ledger
        .update_shelter(&shelter.meta.business_id, |s| s.capacity = 90)
        .await
        .unwrap();

    // Another device meanwhile renamed the shelter remotely.
    h.remote.set_offline(false);
    let mut renamed = shelter.data.clone();
    renamed.name = "Quadra Norte (reformada)".to_string();
    h.remote.seed("shelters", remote_shelter(&shelter.meta.business_id, &renamed));

    // Pull while the local edit is still pending: local wins.
    h.engine.pull_and_merge("shelters").await.unwrap();
    let local: Stored<Shelter> = h
        .store
        .get_by_business_id(&shelter.meta.business_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(local.data.capacity, 90);
    assert_eq!(local.data.name, "Quadra Norte");
    assert!(!local.meta.synced);

    // Push the pending edit, then let the remote rename land on a clean
    // local copy.
    h.engine.push_pending().await.unwrap();
    h.remote.seed("shelters", remote_shelter(&shelter.meta.business_id, &renamed));
    h.engine.pull_and_merge("shelters").await.unwrap();

    let local: Stored<Shelter> = h
        .store
        .get_by_business_id(&shelter.meta.business_id)
        .await
        .unwrap()
        .unwrap();
    assert!(local.meta.synced);
    assert_eq!(local.data.name, "Quadra Norte (reformada)");
}

fn remote_shelter(business_id: &str, shelter: &Shelter) -> abrigo_sync::RemoteRecord {
    abrigo_sync::RemoteRecord {
        remote_id: None,
        business_id: business_id.to_string(),
        legacy_id: None,
        status: abrigo_sync::RecordStatus::Active,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        deleted_at: None,
        data: serde_json::to_value(shelter).unwrap(),
    }
}
