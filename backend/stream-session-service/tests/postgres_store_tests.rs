//! Coordinator against a real PostgreSQL schema
//!
//! Run with `DATABASE_URL=postgres://... cargo test -- --ignored`.

mod common;

use futures::future::join_all;
use std::sync::Arc;

use stream_session_service::config::DatabaseConfig;
use stream_session_service::domain::models::{
    Actor, ReactionChange, ReactionKind, StreamStatus, SwitchOutcome,
};
use stream_session_service::{db, PgStore, SessionError, StreamSessionCoordinator};
use uuid::Uuid;

use common::fast_config;

async fn pg_coordinator() -> (StreamSessionCoordinator, PgStore) {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::init_pool(&DatabaseConfig {
        url,
        max_connections: 10,
        min_connections: 1,
    })
    .await
    .expect("database should be reachable");

    let config = fast_config();
    let store = PgStore::new(pool, config.lock_wait());
    let coordinator = StreamSessionCoordinator::new(Arc::new(store.clone()), &config);
    (coordinator, store)
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_pg_full_broadcast() {
    let (coordinator, store) = pg_coordinator().await;
    store.health_check().await.unwrap();

    let stream = coordinator
        .create_stream(Uuid::new_v4(), "Postgres broadcast")
        .await
        .unwrap();
    let stream = coordinator.start(stream.id).await.unwrap();
    assert_eq!(stream.status, StreamStatus::Live);

    // Viewers
    let user = Uuid::new_v4();
    let first = coordinator.viewers().join(stream.id, user).await.unwrap();
    let again = coordinator.viewers().join(stream.id, user).await.unwrap();
    assert_eq!(first.id, again.id);
    assert_eq!(coordinator.viewers().active_count(stream.id).await.unwrap(), 1);

    // Chat
    let message = coordinator
        .chat()
        .post(stream.id, user, "hello", false)
        .await
        .unwrap();
    let recent = coordinator.chat().recent(stream.id, 10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, message.id);

    // Reactions
    let liked = coordinator
        .reactions()
        .react(stream.id, user, ReactionKind::Like)
        .await
        .unwrap();
    assert_eq!(liked.counters.likes_count, 1);
    let swapped = coordinator
        .reactions()
        .react(stream.id, user, ReactionKind::Dislike)
        .await
        .unwrap();
    assert!(matches!(swapped.change, ReactionChange::Replaced { .. }));
    assert_eq!(swapped.counters.likes_count, 0);
    assert_eq!(swapped.counters.dislikes_count, 1);

    // Cameras
    let admin = Actor::admin(stream.creator_id);
    let c1 = coordinator
        .cameras()
        .add_camera(stream.id, "Main", "pg-cam-1")
        .await
        .unwrap();
    let c2 = coordinator
        .cameras()
        .add_camera(stream.id, "Side", "pg-cam-2")
        .await
        .unwrap();
    assert!(c1.is_primary && !c2.is_primary);

    let outcome = coordinator
        .cameras()
        .switch_primary(stream.id, c2.id, &admin)
        .await
        .unwrap();
    assert!(matches!(outcome, SwitchOutcome::Switched { .. }));
    let err = coordinator.cameras().remove_camera(c2.id).await.unwrap_err();
    assert!(matches!(err, SessionError::PrimaryCameraRemoval(_)));

    // Counters agree with rows
    let repair = coordinator.reactions().reconcile(stream.id).await.unwrap();
    assert!(!repair.drifted());

    let summary = coordinator.stop(stream.id).await.unwrap();
    assert_eq!(summary.sessions_closed, 1);
    assert_eq!(summary.stream.current_viewer_count, 0);

    let err = coordinator
        .chat()
        .post(stream.id, user, "late", false)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::StreamEnded(_)));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_pg_concurrent_switches_keep_one_primary() {
    let (coordinator, _store) = pg_coordinator().await;
    let stream = coordinator
        .create_stream(Uuid::new_v4(), "Switch storm")
        .await
        .unwrap();
    coordinator.start(stream.id).await.unwrap();
    let admin = Actor::admin(stream.creator_id);

    let mut cameras = Vec::new();
    for i in 0..3 {
        let camera = coordinator
            .cameras()
            .add_camera(stream.id, &format!("Cam {}", i), &format!("pg-storm-{}", i))
            .await
            .unwrap();
        cameras.push(camera.id);
    }

    let switches = (0..12).map(|i| {
        coordinator
            .cameras()
            .switch_primary(stream.id, cameras[(i + 1) % 3], &admin)
    });
    for result in join_all(switches).await {
        result.unwrap();
    }

    let listed = coordinator.cameras().cameras(stream.id).await.unwrap();
    assert_eq!(listed.iter().filter(|c| c.is_primary).count(), 1);

    let history = coordinator.cameras().history(stream.id, 100).await.unwrap();
    for pair in history.windows(2) {
        assert_eq!(pair[0].from_camera_id, Some(pair[1].to_camera_id));
    }

    coordinator.stop(stream.id).await.unwrap();
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_pg_ending_closes_sessions_in_the_same_transaction() {
    use chrono::Utc;
    use stream_session_service::repository::{StreamRepository, ViewerRepository};

    let (coordinator, store) = pg_coordinator().await;
    let stream = coordinator
        .create_stream(Uuid::new_v4(), "Last call")
        .await
        .unwrap();
    coordinator.start(stream.id).await.unwrap();
    for _ in 0..3 {
        coordinator.viewers().join(stream.id, Uuid::new_v4()).await.unwrap();
    }

    let ended = store
        .transition_stream(stream.id, StreamStatus::Live, StreamStatus::Ended, Utc::now())
        .await
        .unwrap();
    assert_eq!(ended.sessions_closed, 3);
    assert_eq!(ended.stream.current_viewer_count, 0);
    assert_eq!(store.count_active_sessions(stream.id).await.unwrap(), 0);

    // A leave after the end is a no-op and takes the stream row first
    let left = coordinator.viewers().leave(stream.id, Uuid::new_v4()).await.unwrap();
    assert!(left.is_none());
}
