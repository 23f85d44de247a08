// # Event Sink Trait
//
// Defines the interface toward the downstream telemetry consumer.
//
// ## Purpose
//
// The core publishes one event per distinct session-lifecycle, presence or
// observation transition. The sink delivers it somewhere (a queue, a file,
// a channel). Retry and backpressure belong to the sink's transport; the
// core attempts delivery once and logs every failure.
//
// ## Implementations
//
// - In-memory: `MemoryEventSink` (embedding, tests)
// - Channel: `ChannelEventSink` (bounded tokio mpsc)
// - JSON lines: `JsonLinesEventSink` (stdout or file)

use crate::codec::LogicalPath;
use crate::config::SinkConfig;
use crate::presence::Presence;
use crate::session::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Acknowledgement of a successful publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack;

/// Why a session was removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// Device deregistered (or the engine removed the registration)
    Deregistered,
    /// No update within lifetime + grace
    Expired,
    /// Removed to make room at `max_sessions`
    Evicted,
}

/// Event published downstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    /// Session the event belongs to
    pub session_id: SessionId,

    /// Device endpoint name
    pub endpoint: String,

    /// Wall-clock time the event was produced
    pub timestamp: DateTime<Utc>,

    /// What happened
    #[serde(flatten)]
    pub kind: EventKind,
}

impl DeviceEvent {
    /// Create an event stamped with the current time
    pub fn new(session_id: SessionId, endpoint: impl Into<String>, kind: EventKind) -> Self {
        Self {
            session_id,
            endpoint: endpoint.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Session created or superseded by a new registration
    SessionRegistered { generation: u64, superseded: bool },

    /// Registration update applied
    SessionUpdated { generation: u64 },

    /// Session removed; all of its observations are gone
    SessionRemoved { reason: RemovalReason },

    /// Presence transition (edge-triggered)
    PresenceChanged { state: Presence },

    /// New value for an observed resource
    ResourceUpdated {
        path: LogicalPath,
        payload: serde_json::Value,
        sequence: u64,
    },

    /// Observed value can no longer be trusted
    ResourceStale { path: LogicalPath, cause: String },

    /// Observe relationship established
    ObservationStarted { path: LogicalPath },

    /// Observe relationship cancelled
    ObservationCancelled { path: LogicalPath },
}

impl EventKind {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::SessionRegistered { .. } => "session_registered",
            EventKind::SessionUpdated { .. } => "session_updated",
            EventKind::SessionRemoved { .. } => "session_removed",
            EventKind::PresenceChanged { .. } => "presence_changed",
            EventKind::ResourceUpdated { .. } => "resource_updated",
            EventKind::ResourceStale { .. } => "resource_stale",
            EventKind::ObservationStarted { .. } => "observation_started",
            EventKind::ObservationCancelled { .. } => "observation_cancelled",
        }
    }
}

/// Trait for event sink implementations
///
/// Implementations must be thread-safe: per-session workers publish
/// concurrently. Publishing is the only operation in the core allowed to
/// suspend.
///
/// ## Implementation Guidelines
///
/// - **No internal retry in the core**: return the failure, the caller logs it
/// - **Order**: events handed over by one task must be delivered in that order
/// - **Explicit flush**: `flush()` must hand over anything buffered
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one event
    ///
    /// # Returns
    ///
    /// - `Ok(Ack)`: Accepted by the downstream transport
    /// - `Err(Error::Sink)`: Delivery failed
    async fn publish(&self, event: &DeviceEvent) -> Result<Ack, crate::Error>;

    /// Hand over any buffered events
    async fn flush(&self) -> Result<(), crate::Error> {
        Ok(())
    }

    /// Sink name for logging
    fn sink_name(&self) -> &'static str;
}

/// Helper trait for constructing sinks from configuration
pub trait EventSinkFactory: Send + Sync {
    /// Create an EventSink instance from configuration
    fn create(&self, config: &SinkConfig) -> Result<Arc<dyn EventSink>, crate::Error>;
}
