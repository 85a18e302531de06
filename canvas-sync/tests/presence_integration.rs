//! Integration tests for presence: publish, fan-out, filtering and
//! projection across two sessions sharing one store.

use std::sync::Arc;

use canvas_sync::presence::epoch_millis;
use canvas_sync::{
    Camera, Canvas, CursorColor, LastActive, MemoryStore, PresenceRecord, PresenceStore, Record,
    SessionDeps, SyncConfig, SyncSession, SyncStatus, UserProfile, Vec2,
};
use tokio::time::{sleep, Duration};
use uuid::Uuid;

struct Client {
    user_id: Uuid,
    canvas: Arc<Canvas>,
    session: SyncSession,
}

async fn join(store: &Arc<MemoryStore>, doc_id: Uuid, profile: UserProfile) -> Client {
    let canvas = Arc::new(Canvas::new());
    let user_id = profile.user_id;
    let session = SyncSession::start(
        doc_id,
        profile,
        SyncConfig::default(),
        SessionDeps::memory(canvas.clone(), store.clone()),
    )
    .unwrap();
    session.wait_until_synced().await.unwrap();
    Client {
        user_id,
        canvas,
        session,
    }
}

fn named(name: &str) -> UserProfile {
    UserProfile::new(Uuid::new_v4()).with_name(name)
}

fn remote_record(user_id: Uuid, x: i64, y: i64, last_active: LastActive) -> PresenceRecord {
    PresenceRecord {
        user_id,
        display_name: "Remote".into(),
        color: CursorColor::from_uuid(user_id),
        x,
        y,
        last_active,
    }
}

// ─── Publish → subscribe ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_cursor_reaches_peer_rounded() {
    let store = Arc::new(MemoryStore::new());
    let doc = Uuid::new_v4();
    let alice = join(&store, doc, named("Alice")).await;
    let bob = join(&store, doc, named("Bob")).await;

    alice.canvas.set_pointer(Vec2::new(100.4, 50.6));
    sleep(Duration::from_millis(300)).await;

    let camera = Camera::new(800.0, 600.0);
    let cursors = bob.session.visible_cursors(&camera);
    assert_eq!(cursors.len(), 1);
    assert_eq!(cursors[0].user_id, alice.user_id);
    assert_eq!(cursors[0].display_name, "Alice");
    assert_eq!(cursors[0].screen, Vec2::new(100.0, 51.0));
    assert_eq!(cursors[0].color, CursorColor::from_uuid(alice.user_id));
}

#[tokio::test(start_paused = true)]
async fn test_own_cursor_never_shown() {
    let store = Arc::new(MemoryStore::new());
    let doc = Uuid::new_v4();
    let alice = join(&store, doc, named("Alice")).await;

    alice.canvas.set_pointer(Vec2::new(10.0, 10.0));
    sleep(Duration::from_millis(300)).await;

    assert!(!store.presence(doc).is_empty());
    assert!(alice.session.visible_cursors(&Camera::new(800.0, 600.0)).is_empty());
    assert_eq!(alice.session.stats().peers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_pointer_no_publish() {
    let store = Arc::new(MemoryStore::new());
    let doc = Uuid::new_v4();
    let alice = join(&store, doc, named("Alice")).await;

    sleep(Duration::from_millis(500)).await;
    assert_eq!(store.stats().publishes, 0);
    assert!(alice.session.stats().presence.skipped > 0);

    alice.canvas.set_pointer(Vec2::new(f64::NAN, 3.0));
    sleep(Duration::from_millis(500)).await;
    assert_eq!(store.stats().publishes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_publish_rate_bounded_by_throttle() {
    let store = Arc::new(MemoryStore::new());
    let doc = Uuid::new_v4();
    let alice = join(&store, doc, named("Alice")).await;
    alice.canvas.set_pointer(Vec2::new(1.0, 1.0));

    sleep(Duration::from_millis(1050)).await;
    let publishes = store.stats().publishes;
    // One tick every 100 ms, each at most one publish.
    assert!((10..=12).contains(&publishes), "publishes = {publishes}");
}

#[tokio::test(start_paused = true)]
async fn test_display_name_falls_back_to_email() {
    let store = Arc::new(MemoryStore::new());
    let doc = Uuid::new_v4();
    let anon = UserProfile::new(Uuid::new_v4()).with_email("ghost@example.com");
    let ghost = join(&store, doc, anon).await;
    let bob = join(&store, doc, named("Bob")).await;

    ghost.canvas.set_pointer(Vec2::new(0.0, 0.0));
    sleep(Duration::from_millis(300)).await;

    let cursors = bob.session.visible_cursors(&Camera::new(800.0, 600.0));
    assert_eq!(cursors[0].display_name, "ghost");
}

// ─── Staleness ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_stale_records_hidden() {
    let store = Arc::new(MemoryStore::new());
    let doc = Uuid::new_v4();
    let bob = join(&store, doc, named("Bob")).await;

    let now = epoch_millis();
    let old = Uuid::new_v4();
    let recent = Uuid::new_v4();
    store
        .publish(doc, old, remote_record(old, 1, 1, LastActive::EpochMillis(now - 61_000)))
        .await
        .unwrap();
    store
        .publish(doc, recent, remote_record(recent, 2, 2, LastActive::EpochMillis(now - 59_000)))
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    let cursors = bob.session.visible_cursors(&Camera::new(800.0, 600.0));
    assert_eq!(cursors.len(), 1);
    assert_eq!(cursors[0].user_id, recent);
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_timestamp_counts_as_fresh() {
    let store = Arc::new(MemoryStore::new());
    let doc = Uuid::new_v4();
    let bob = join(&store, doc, named("Bob")).await;

    let peer = Uuid::new_v4();
    store
        .publish(doc, peer, remote_record(peer, 5, 5, LastActive::Missing))
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(bob.session.visible_cursors(&Camera::new(800.0, 600.0)).len(), 1);
}

// ─── Projection ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_projection_follows_viewer_camera() {
    let store = Arc::new(MemoryStore::new());
    let doc = Uuid::new_v4();
    let bob = join(&store, doc, named("Bob")).await;

    let peer = Uuid::new_v4();
    store
        .publish(doc, peer, remote_record(peer, 300, 200, LastActive::EpochMillis(epoch_millis())))
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    let mut camera = Camera::new(800.0, 600.0);
    assert_eq!(bob.session.visible_cursors(&camera)[0].screen, Vec2::new(300.0, 200.0));

    // Pan 100 document units right, then zoom out to half size.
    camera.pan(-100.0, 0.0);
    camera.set_zoom(0.5);
    let moved = bob.session.visible_cursors(&camera)[0].screen;
    assert_eq!(moved, Vec2::new(100.0, 100.0));
}

#[tokio::test(start_paused = true)]
async fn test_cursor_eases_toward_new_position() {
    let store = Arc::new(MemoryStore::new());
    let doc = Uuid::new_v4();
    let alice = join(&store, doc, named("Alice")).await;
    let bob = join(&store, doc, named("Bob")).await;
    let camera = Camera::new(800.0, 600.0);

    alice.canvas.set_pointer(Vec2::new(0.0, 0.0));
    sleep(Duration::from_millis(150)).await;
    alice.canvas.set_pointer(Vec2::new(200.0, 0.0));
    sleep(Duration::from_millis(150)).await;

    bob.session.advance_cursors(Duration::from_millis(16));
    let x = bob.session.visible_cursors(&camera)[0].screen.x;
    assert!(x > 0.0 && x < 200.0, "eased position {x}");

    for _ in 0..200 {
        bob.session.advance_cursors(Duration::from_millis(16));
    }
    let x = bob.session.visible_cursors(&camera)[0].screen.x;
    assert!((x - 200.0).abs() < 0.5, "settled position {x}");
}

// ─── Failures ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_publish_failure_sets_error_status() {
    let store = Arc::new(MemoryStore::new());
    let doc = Uuid::new_v4();
    let alice = join(&store, doc, named("Alice")).await;

    store.set_fail_publishes(true);
    alice.canvas.set_pointer(Vec2::new(1.0, 1.0));
    sleep(Duration::from_millis(300)).await;

    assert!(matches!(alice.session.status(), SyncStatus::Error(_)));
    assert!(alice.session.stats().presence_failures >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_publish_recovery_clears_error_status() {
    let store = Arc::new(MemoryStore::new());
    let doc = Uuid::new_v4();
    let alice = join(&store, doc, named("Alice")).await;

    store.set_fail_publishes(true);
    alice.canvas.set_pointer(Vec2::new(1.0, 1.0));
    sleep(Duration::from_millis(300)).await;
    assert!(matches!(alice.session.status(), SyncStatus::Error(_)));

    // An idle session recovers on the next successful publish alone.
    store.set_fail_publishes(false);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(alice.session.status(), SyncStatus::Synced);
    assert!(alice.session.stats().presence.published > 0);
}

#[tokio::test(start_paused = true)]
async fn test_publish_success_keeps_push_error_visible() {
    let store = Arc::new(MemoryStore::new());
    let doc = Uuid::new_v4();
    let alice = join(&store, doc, named("Alice")).await;

    store.set_fail_pushes(true);
    alice.canvas.set_pointer(Vec2::new(1.0, 1.0));
    alice
        .canvas
        .put(Record::shape("r1", serde_json::json!({ "x": 1 })))
        .unwrap();
    sleep(Duration::from_secs(2)).await;

    assert!(store.stats().publishes > 0);
    match alice.session.status() {
        SyncStatus::Error(message) => assert!(message.starts_with("store rejected")),
        other => panic!("expected push error, got {other:?}"),
    }
}
