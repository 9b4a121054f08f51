//! Likes, dislikes and shares
//!
//! Identical react requests for one (stream, user, kind) that overlap in
//! flight are collapsed into a single toggle: the first caller applies it and
//! the rest receive its outcome. Requests that arrive after the first one
//! finished toggle again as usual. The toggle runs on its own task, so a
//! caller that goes away mid-request cannot abandon it.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, instrument, warn, Instrument, Span};
use uuid::Uuid;

use super::{LockKey, Shared};
use crate::domain::models::{CounterRepair, ReactionKind, ReactionOutcome, ShareEvent};
use crate::error::{Result, SessionError};
use crate::metrics;

const MAX_PLATFORM_CHARS: usize = 32;

type FlightKey = (Uuid, Uuid, ReactionKind);
type FlightResult = watch::Receiver<Option<ReactionOutcome>>;
type FlightMap = Arc<DashMap<FlightKey, FlightResult>>;

pub struct ReactionLedger {
    shared: Shared,
    in_flight: FlightMap,
}

/// Removes the in-flight entry however the toggle task ends.
struct FlightGuard {
    in_flight: FlightMap,
    key: FlightKey,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

enum Role {
    Leader(watch::Sender<Option<ReactionOutcome>>),
    Follower(FlightResult),
}

impl ReactionLedger {
    pub(crate) fn new(shared: Shared) -> Self {
        Self {
            shared,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Add, toggle off or replace the user's reaction.
    #[instrument(skip(self))]
    pub async fn react(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        kind: ReactionKind,
    ) -> Result<ReactionOutcome> {
        let key = (stream_id, user_id, kind);

        loop {
            let role = match self.in_flight.entry(key) {
                Entry::Occupied(entry) => Role::Follower(entry.get().clone()),
                Entry::Vacant(entry) => {
                    let (tx, rx) = watch::channel(None);
                    entry.insert(rx);
                    Role::Leader(tx)
                }
            };

            match role {
                Role::Leader(tx) => return self.lead(key, tx).await,
                Role::Follower(mut rx) => {
                    if let Some(outcome) = wait_for_leader(&mut rx).await {
                        metrics::record_coalesced_reaction();
                        debug!("Reaction coalesced with in-flight request");
                        return Ok(ReactionOutcome {
                            coalesced: true,
                            ..outcome
                        });
                    }
                    // Leader failed without toggling; the waiters elect a new one
                }
            }
        }
    }

    async fn lead(
        &self,
        key: FlightKey,
        tx: watch::Sender<Option<ReactionOutcome>>,
    ) -> Result<ReactionOutcome> {
        let guard = FlightGuard {
            in_flight: self.in_flight.clone(),
            key,
        };
        let shared = self.shared.clone();
        let (stream_id, user_id, kind) = key;

        let toggle = tokio::spawn(
            async move {
                let result = apply(&shared, stream_id, user_id, kind).await;
                // Unregister before publishing so later clicks start a fresh toggle
                drop(guard);
                if let Ok(outcome) = &result {
                    let _ = tx.send(Some(*outcome));
                }
                result
            }
            .instrument(Span::current()),
        );

        toggle
            .await
            .map_err(|e| SessionError::Internal(format!("reaction task failed: {}", e)))?
    }

    /// Record a share. Shares are never deduplicated.
    #[instrument(skip(self))]
    pub async fn record_share(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        platform: &str,
    ) -> Result<ShareEvent> {
        let platform = platform.trim();
        let len = platform.chars().count();
        if len == 0 || len > MAX_PLATFORM_CHARS {
            return Err(SessionError::InvalidInput(format!(
                "share platform must be 1..={} characters",
                MAX_PLATFORM_CHARS
            )));
        }

        let shared = &self.shared;
        let share = shared
            .contended("reaction.share", move || async move {
                shared
                    .store
                    .record_share(stream_id, user_id, platform, Utc::now())
                    .await
            })
            .await?;

        debug!(share_id = %share.id, "Share recorded");
        Ok(share)
    }

    pub async fn reaction_of(&self, stream_id: Uuid, user_id: Uuid) -> Result<Option<ReactionKind>> {
        self.shared.stream(stream_id).await?;
        self.shared.store.get_reaction(stream_id, user_id).await
    }

    /// Rewrite cached counters from the rows they summarize.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, stream_id: Uuid) -> Result<CounterRepair> {
        let shared = &self.shared;
        let repair = shared
            .contended("reaction.reconcile", move || async move {
                shared.store.recount(stream_id).await
            })
            .await?;

        if repair.drifted() {
            metrics::record_counter_repair();
            warn!(
                before = ?repair.before,
                after = ?repair.after,
                "Repaired drifted stream counters"
            );
        }
        Ok(repair)
    }
}

async fn apply(
    shared: &Shared,
    stream_id: Uuid,
    user_id: Uuid,
    kind: ReactionKind,
) -> Result<ReactionOutcome> {
    let outcome = shared
        .contended("reaction.react", move || async move {
            let _guard = shared.locks.acquire(LockKey::viewer(stream_id, user_id)).await?;
            shared
                .store
                .apply_reaction(stream_id, user_id, kind, Utc::now())
                .await
        })
        .await?;

    debug!(
        change = ?outcome.change,
        likes = outcome.counters.likes_count,
        dislikes = outcome.counters.dislikes_count,
        "Reaction applied"
    );
    Ok(outcome)
}

/// `None` when the leader finished without an outcome.
async fn wait_for_leader(rx: &mut FlightResult) -> Option<ReactionOutcome> {
    loop {
        let current = *rx.borrow();
        if current.is_some() {
            return current;
        }
        if rx.changed().await.is_err() {
            return *rx.borrow();
        }
    }
}
