//! canvas-sync demo — two clients editing one document through an
//! in-process store.
//!
//! ```text
//! cargo run -p canvas-sync-demo [config.json]
//! RUST_LOG=canvas_sync=debug cargo run -p canvas-sync-demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use canvas_sync::{
    install_last_resort_handler, Camera, Canvas, EditingSurface, FaultReporter, MemoryStore,
    Record, RecordId, SessionDeps, SyncConfig, SyncError, SyncSession, UserProfile, Vec2,
};
use log::info;
use serde_json::json;
use uuid::Uuid;

struct Client {
    name: &'static str,
    canvas: Arc<Canvas>,
    session: SyncSession,
}

fn load_config(path: &str) -> Result<SyncConfig, SyncError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SyncError::Config(format!("cannot read {path}: {e}")))?;
    SyncConfig::from_json(&text)
}

async fn connect(
    name: &'static str,
    profile: UserProfile,
    doc_id: Uuid,
    config: &SyncConfig,
    store: &Arc<MemoryStore>,
    faults: &Arc<FaultReporter>,
) -> Result<Client, SyncError> {
    let canvas = Arc::new(Canvas::new());
    let deps = SessionDeps::memory(canvas.clone(), store.clone()).with_faults(faults.clone());
    let session = SyncSession::start(doc_id, profile, config.clone(), deps)?;
    session.wait_until_synced().await?;
    info!("{name} connected ({:?})", session.status());
    Ok(Client {
        name,
        canvas,
        session,
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), SyncError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let faults = Arc::new(FaultReporter::new());
    install_last_resort_handler(faults.clone());

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path)?,
        None => SyncConfig::default(),
    };
    config.validate()?;
    let window = config.debounce_window();
    info!("Debounce window {window:?}, presence every {:?}", config.presence_sample_interval());

    let store = Arc::new(MemoryStore::new());
    let doc_id = Uuid::new_v4();

    let alice_profile = UserProfile::new(Uuid::new_v4()).with_name("Alice");
    let bob_profile = UserProfile::new(Uuid::new_v4()).with_email("bob.builder@example.com");
    let alice = connect("Alice", alice_profile, doc_id, &config, &store, &faults).await?;
    let bob = connect("Bob", bob_profile, doc_id, &config, &store, &faults).await?;

    // A shape that lives and dies inside one debounce window never leaves.
    let r1 = RecordId::from("shape:r1");
    alice.canvas.put(Record::shape(r1.clone(), json!({ "x": 10, "y": 10 })))?;
    tokio::time::sleep(window / 2).await;
    alice.canvas.remove(&r1)?;
    tokio::time::sleep(window * 2).await;
    info!(
        "After add+delete of {r1}: {} pushes, Bob sees it: {}",
        store.stats().pushes,
        bob.canvas.contains(&r1)
    );

    // A shape that survives the window reaches Bob.
    let r2 = RecordId::from("shape:r2");
    alice.canvas.put(Record::shape(r2.clone(), json!({ "x": 40, "y": 25, "w": 120 })))?;
    tokio::time::sleep(window * 2).await;
    info!("Bob sees {r2}: {}", bob.canvas.contains(&r2));

    // Bob drags it; the drag folds into one update.
    for step in 1..=5 {
        bob.canvas.put(Record::shape(r2.clone(), json!({ "x": 40 + step * 10, "y": 25, "w": 120 })))?;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(window * 2).await;
    if let Some(record) = alice.canvas.record(&r2) {
        info!("Alice sees {r2} at x={}", record.payload["x"]);
    }

    // Presence: Alice points, Bob renders through a zoomed camera.
    alice.canvas.set_pointer(Vec2::new(120.4, 80.7));
    tokio::time::sleep(config.presence_sample_interval() * 3).await;
    let mut camera = Camera::new(1280.0, 800.0);
    camera.zoom_at(640.0, 400.0, 2.0);
    bob.session.advance_cursors(Duration::from_millis(16));
    for cursor in bob.session.visible_cursors(&camera) {
        info!(
            "Bob draws {} at ({:.1}, {:.1}) in {}",
            cursor.display_name,
            cursor.screen.x,
            cursor.screen.y,
            cursor.color.to_hex()
        );
    }
    for cursor in alice.session.visible_cursors(&camera) {
        info!("Alice draws {}", cursor.display_name);
    }

    let document = store.records(doc_id);
    match serde_json::to_string_pretty(&document) {
        Ok(text) => println!("{text}"),
        Err(e) => log::warn!("Cannot render document: {e}"),
    }

    for client in [alice, bob] {
        let stats = client.session.stats();
        let report = client.session.close().await?;
        info!(
            "{} closed: {} flushes sent, {} skipped empty, {} remote notifications dropped, {} discarded",
            client.name,
            stats.flush.sent,
            stats.flush.skipped_empty,
            stats.guard.dropped,
            report.discarded
        );
    }

    let store_stats = store.stats();
    info!(
        "Store: {} pushes, {} publishes, {} faults reported",
        store_stats.pushes,
        store_stats.publishes,
        faults.reported_count()
    );
    Ok(())
}
