//! Shared fixtures for coordinator integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stream_session_service::config::CoordinatorConfig;
use stream_session_service::domain::models::Stream;
use stream_session_service::{MemoryStore, StreamSessionCoordinator};
use uuid::Uuid;

/// Short lock waits and backoff so contention tests finish quickly
pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        lock_wait_ms: 200,
        max_attempts: 3,
        initial_backoff_ms: 5,
        max_backoff_ms: 20,
        ..Default::default()
    }
}

pub fn coordinator() -> StreamSessionCoordinator {
    coordinator_with_store(Arc::new(MemoryStore::new()))
}

pub fn coordinator_with_store(store: Arc<MemoryStore>) -> StreamSessionCoordinator {
    StreamSessionCoordinator::new(store, &fast_config())
}

/// Every store write sleeps first, so overlapping requests really overlap
pub fn slow_coordinator(latency: Duration) -> StreamSessionCoordinator {
    coordinator_with_store(Arc::new(MemoryStore::with_write_latency(latency)))
}

pub async fn upcoming_stream(coordinator: &StreamSessionCoordinator) -> Stream {
    coordinator
        .create_stream(Uuid::new_v4(), "Friday night launch")
        .await
        .unwrap()
}

pub async fn live_stream(coordinator: &StreamSessionCoordinator) -> Stream {
    let stream = upcoming_stream(coordinator).await;
    coordinator.start(stream.id).await.unwrap()
}
