// # Observation Router
//
// Maps engine observation ids to the session and logical path they belong
// to, and turns raw notifications into ordered `NotificationEvent`s.
//
// ## Discarding
//
// Notifications for unknown, cancelled or invalidated observations are the
// expected result of asynchronous delivery racing with cancellation. They
// come back as `NotificationOutcome::Discarded` and are logged at debug
// level, never raised as errors.
//
// ## Ordering
//
// Each observation owns a `Sequencer` that releases notifications in
// increasing sequence order, buffering a bounded window of early arrivals.
// Entries held longer than the configured hold time are released by
// `release_expired`, giving up on the missing sequence numbers.

mod sequencer;

use crate::codec::{self, LogicalPath};
use crate::config::ObservationConfig;
use crate::error::Result;
use crate::session::{Session, SessionId};
use crate::traits::{DeviceEvent, EventKind, ObservationId, ObserveResponse};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sequencer::{Accepted, Sequencer};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A standing observe relationship
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: ObservationId,
    /// Owning session
    pub session_id: SessionId,
    pub endpoint: String,
    /// Path as reported by the engine
    pub raw_path: String,
    /// Resolved logical path; `None` when resolution failed
    pub path: Option<LogicalPath>,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
}

impl Observation {
    pub fn is_resolved(&self) -> bool {
        self.path.is_some()
    }
}

/// Notification content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Decoded resource value
    Value { value: serde_json::Value },
    /// Device answered with a failure code
    Error { code: u16 },
}

impl Payload {
    pub fn value(value: serde_json::Value) -> Self {
        Payload::Value { value }
    }
}

/// A notification as received from the engine
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub payload: Payload,
    /// CoAP observe sequence number, when known
    pub sequence: Option<u64>,
}

impl Notification {
    /// An unsequenced value notification
    pub fn value(value: serde_json::Value) -> Self {
        Self {
            payload: Payload::value(value),
            sequence: None,
        }
    }

    /// Attach an observe sequence number
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

impl From<ObserveResponse> for Notification {
    fn from(response: ObserveResponse) -> Self {
        let payload = if response.is_success() {
            Payload::value(response.content.unwrap_or(serde_json::Value::Null))
        } else {
            Payload::Error {
                code: response.code,
            }
        };
        Self {
            payload,
            sequence: response.sequence,
        }
    }
}

/// An ordered notification ready for publishing
///
/// Immutable once built; the sequence is strictly increasing per observation.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    session_id: SessionId,
    endpoint: String,
    observation_id: ObservationId,
    path: LogicalPath,
    payload: Payload,
    sequence: u64,
}

impl NotificationEvent {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn observation_id(&self) -> &ObservationId {
        &self.observation_id
    }

    pub fn path(&self) -> &LogicalPath {
        &self.path
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Convert into the downstream event
    ///
    /// Failure payloads become `ResourceStale`.
    pub fn into_device_event(self) -> DeviceEvent {
        let kind = match self.payload {
            Payload::Value { value } => EventKind::ResourceUpdated {
                path: self.path,
                payload: value,
                sequence: self.sequence,
            },
            Payload::Error { code } => EventKind::ResourceStale {
                path: self.path,
                cause: format!(
                    "notification failed with code {}.{:02}",
                    code / 100,
                    code % 100
                ),
            },
        };
        DeviceEvent::new(self.session_id, self.endpoint, kind)
    }
}

/// Why a notification was not published
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Cancelled, invalidated or never known
    UnknownObservation,
    /// Observation path could not be resolved
    Unresolved,
    /// Sequence at or below the last published one
    Duplicate,
    /// Engine delivered the response without a registration
    NoRegistration,
}

/// Result of routing one notification
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationOutcome {
    /// Events to publish, in order (more than one when the buffer drained)
    Published(Vec<NotificationEvent>),
    /// Held in the reorder buffer
    Buffered,
    Discarded(DiscardReason),
}

struct Entry {
    observation: Observation,
    sequencer: Sequencer,
}

impl Entry {
    fn events(&self, path: &LogicalPath, released: Vec<(u64, Payload)>) -> Vec<NotificationEvent> {
        released
            .into_iter()
            .map(|(sequence, payload)| NotificationEvent {
                session_id: self.observation.session_id,
                endpoint: self.observation.endpoint.clone(),
                observation_id: self.observation.id.clone(),
                path: path.clone(),
                payload,
                sequence,
            })
            .collect()
    }
}

/// Router from observation ids to sessions and logical paths
pub struct ObservationRouter {
    observations: DashMap<ObservationId, Entry>,
    reorder_window: usize,
    reorder_hold: chrono::Duration,
    default_version: Option<String>,
}

impl ObservationRouter {
    pub fn new(config: &ObservationConfig) -> Self {
        Self {
            observations: DashMap::new(),
            reorder_window: config.reorder_window,
            reorder_hold: config.reorder_hold(),
            default_version: config.default_object_version.clone(),
        }
    }

    /// Record a new observation for `session`
    ///
    /// The observation is recorded either way; on `Err(Error::PathResolution)`
    /// it is flagged unresolved.
    pub fn on_new_observation(
        &self,
        id: ObservationId,
        session: &Session,
        raw_path: &str,
    ) -> Result<Observation> {
        let resolved = codec::resolve(raw_path, &session.objects, self.default_version.as_deref());

        let observation = Observation {
            id: id.clone(),
            session_id: session.id,
            endpoint: session.endpoint.clone(),
            raw_path: raw_path.to_string(),
            path: resolved.as_ref().ok().cloned(),
            cancelled: false,
            created_at: Utc::now(),
        };

        let replaced = self.observations.insert(
            id,
            Entry {
                observation: observation.clone(),
                sequencer: Sequencer::new(self.reorder_window),
            },
        );
        if let Some(previous) = replaced {
            debug!(
                "Observation {} re-reported, replacing {}",
                observation.id, previous.observation.raw_path
            );
        }

        resolved.map(|_| observation)
    }

    /// Route one notification
    pub fn on_notification(
        &self,
        id: &ObservationId,
        notification: Notification,
    ) -> NotificationOutcome {
        let Some(mut entry) = self.observations.get_mut(id) else {
            debug!("Discarding notification for unknown observation {}", id);
            return NotificationOutcome::Discarded(DiscardReason::UnknownObservation);
        };
        let Some(path) = entry.observation.path.clone() else {
            debug!(
                "Discarding notification for unresolved observation {} ({})",
                id, entry.observation.raw_path
            );
            return NotificationOutcome::Discarded(DiscardReason::Unresolved);
        };

        match entry
            .sequencer
            .accept(notification.sequence, notification.payload)
        {
            Accepted::Released(released) => {
                NotificationOutcome::Published(entry.events(&path, released))
            }
            Accepted::Buffered => NotificationOutcome::Buffered,
            Accepted::Duplicate => {
                debug!(
                    "Discarding duplicate notification {:?} for observation {}",
                    notification.sequence, id
                );
                NotificationOutcome::Discarded(DiscardReason::Duplicate)
            }
        }
    }

    /// Endpoints with a notification held past the hold time at `now`
    pub fn endpoints_with_expired_holds(&self, now: DateTime<Utc>) -> Vec<String> {
        let Some(deadline) = now.checked_sub_signed(self.reorder_hold) else {
            return Vec::new();
        };
        let mut endpoints: Vec<String> = self
            .observations
            .iter()
            .filter(|entry| entry.sequencer.held_since().is_some_and(|since| since <= deadline))
            .map(|entry| entry.observation.endpoint.clone())
            .collect();
        endpoints.sort();
        endpoints.dedup();
        endpoints
    }

    /// Release notifications of `endpoint` held past the hold time at `now`
    ///
    /// The missing sequence numbers in front of them are given up; if they
    /// arrive later they are discarded as duplicates.
    pub fn release_expired(&self, endpoint: &str, now: DateTime<Utc>) -> Vec<NotificationEvent> {
        let Some(deadline) = now.checked_sub_signed(self.reorder_hold) else {
            return Vec::new();
        };
        let mut events = Vec::new();
        for mut entry in self.observations.iter_mut() {
            if entry.observation.endpoint != endpoint {
                continue;
            }
            let Some(path) = entry.observation.path.clone() else {
                continue;
            };
            let released = entry.sequencer.release_expired(deadline);
            if !released.is_empty() {
                debug!(
                    "Released {} held notification(s) of observation {} after the hold time",
                    released.len(),
                    entry.observation.id
                );
                events.extend(entry.events(&path, released));
            }
        }
        events
    }

    /// Remove a cancelled observation
    ///
    /// Buffered notifications are dropped. Returns the observation marked
    /// cancelled, or `None` if it was already gone.
    pub fn on_cancelled(&self, id: &ObservationId) -> Option<Observation> {
        let (_, mut entry) = self.observations.remove(id)?;
        let dropped = entry.sequencer.clear();
        if dropped > 0 {
            debug!(
                "Dropped {} buffered notification(s) of cancelled observation {}",
                dropped, id
            );
        }
        entry.observation.cancelled = true;
        Some(entry.observation)
    }

    /// Look up the observation an error refers to
    ///
    /// The observation is kept; whether to retry is the engine's decision.
    pub fn on_error(&self, id: &ObservationId, cause: &str) -> Option<Observation> {
        let Some(entry) = self.observations.get(id) else {
            debug!("Ignoring error for unknown observation {}: {}", id, cause);
            return None;
        };
        Some(entry.observation.clone())
    }

    /// Remove a batch of observations
    ///
    /// Returns how many were still present.
    pub fn invalidate(&self, ids: &[ObservationId]) -> usize {
        let mut removed = 0;
        for id in ids {
            if let Some((_, mut entry)) = self.observations.remove(id) {
                let dropped = entry.sequencer.clear();
                if dropped > 0 {
                    debug!(
                        "Dropped {} buffered notification(s) of invalidated observation {}",
                        dropped, id
                    );
                }
                removed += 1;
            }
        }
        removed
    }

    pub fn get(&self, id: &ObservationId) -> Option<Observation> {
        self.observations
            .get(id)
            .map(|entry| entry.observation.clone())
    }

    /// Endpoint owning an observation
    pub fn endpoint_of(&self, id: &ObservationId) -> Option<String> {
        self.observations
            .get(id)
            .map(|entry| entry.observation.endpoint.clone())
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}
