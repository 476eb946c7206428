//! Best-effort fan-out of attendance events to live session observers
//!
//! The attendance table stays the source of truth. Observers that miss an
//! event reconcile by re-reading the session's attendance list.

use anyhow::Result;
use async_trait::async_trait;
use common::cache::RedisPool;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::AttendanceEntry;

pub const ATTENDANCE_MARKED: &str = "attendance:marked";

/// Redis channel pattern covering every session room
pub const SESSION_CHANNEL_PATTERN: &str = "attendance:session:*";

const ROOM_CAPACITY: usize = 64;

const RELAY_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const RELAY_MAX_BACKOFF: Duration = Duration::from_secs(30);

pub fn session_channel(session_id: Uuid) -> String {
    format!("attendance:session:{}", session_id)
}

/// Event pushed to observers of one session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub event: String,
    pub session_id: Uuid,
    pub attendance: AttendanceEntry,
}

impl SessionEvent {
    pub fn attendance_marked(attendance: AttendanceEntry) -> Self {
        Self {
            event: ATTENDANCE_MARKED.to_string(),
            session_id: attendance.attendance.session_id,
            attendance,
        }
    }
}

/// In-process rooms, one broadcast channel per session
#[derive(Default)]
pub struct NotificationHub {
    rooms: Mutex<HashMap<Uuid, broadcast::Sender<SessionEvent>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a session room, creating it on first use
    pub async fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<SessionEvent> {
        let mut rooms = self.rooms.lock().await;
        rooms
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Deliver an event to the room's current receivers
    ///
    /// Returns the number of receivers reached. A room without receivers is
    /// dropped along with the event.
    pub async fn deliver(&self, event: SessionEvent) -> usize {
        let mut rooms = self.rooms.lock().await;
        let session_id = event.session_id;
        let Some(sender) = rooms.get(&session_id) else {
            debug!("No observers for session {}, dropping event", session_id);
            return 0;
        };

        match sender.send(event) {
            Ok(reached) => reached,
            Err(_) => {
                rooms.remove(&session_id);
                0
            }
        }
    }

    /// Remove a room once its last receiver is gone
    pub async fn prune(&self, session_id: Uuid) {
        let mut rooms = self.rooms.lock().await;
        if rooms
            .get(&session_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            rooms.remove(&session_id);
        }
    }

    #[cfg(test)]
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }
}

/// Sink for session events emitted after a successful mark
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: SessionEvent) -> Result<()>;
}

/// Delivers straight into this replica's hub
pub struct LocalPublisher {
    hub: Arc<NotificationHub>,
}

impl LocalPublisher {
    pub fn new(hub: Arc<NotificationHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl EventPublisher for LocalPublisher {
    async fn publish(&self, event: SessionEvent) -> Result<()> {
        self.hub.deliver(event).await;
        Ok(())
    }
}

/// Publishes to Redis so every replica's relay can deliver locally
pub struct RedisPublisher {
    redis: RedisPool,
}

impl RedisPublisher {
    pub fn new(redis: RedisPool) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, event: SessionEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)?;
        let receivers = self
            .redis
            .publish(&session_channel(event.session_id), &payload)
            .await?;
        debug!(
            "Published {} for session {} to {} relays",
            event.event, event.session_id, receivers
        );
        Ok(())
    }
}

/// Forward events from Redis into the local hub until the subscription ends
pub async fn run_redis_relay(redis: RedisPool, hub: Arc<NotificationHub>) -> Result<()> {
    let mut pubsub = redis.subscribe_pattern(SESSION_CHANNEL_PATTERN).await?;
    info!("Attendance event relay started");

    let mut messages = Box::pin(pubsub.on_message());
    while let Some(message) = messages.next().await {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    "Unreadable payload on {}: {}",
                    message.get_channel_name(),
                    e
                );
                continue;
            }
        };

        match serde_json::from_str::<SessionEvent>(&payload) {
            Ok(event) => {
                hub.deliver(event).await;
            }
            Err(e) => warn!(
                "Discarding malformed event on {}: {}",
                message.get_channel_name(),
                e
            ),
        }
    }

    warn!("Attendance event relay subscription closed");
    Ok(())
}

/// Keep the Redis relay running for the life of the process
///
/// Every exit, clean or not, is followed by a restart after an exponential
/// backoff. A relay that stayed up longer than the backoff cap starts the
/// sequence over.
pub async fn supervise_redis_relay(redis: RedisPool, hub: Arc<NotificationHub>) {
    let mut failures = 0u32;
    loop {
        let started = Instant::now();
        if let Err(e) = run_redis_relay(redis.clone(), hub.clone()).await {
            error!("Attendance event relay failed: {}", e);
        }
        if started.elapsed() >= RELAY_MAX_BACKOFF {
            failures = 0;
        }

        let delay = relay_backoff(failures);
        failures = failures.saturating_add(1);
        warn!("Restarting attendance event relay in {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}

fn relay_backoff(failures: u32) -> Duration {
    RELAY_INITIAL_BACKOFF
        .saturating_mul(2u32.saturating_pow(failures))
        .min(RELAY_MAX_BACKOFF)
}
