//! Device presence tracking
//!
//! Queue-mode devices alternate between sleeping and awake. The tracker
//! records the current presence of every live session and reports only
//! actual transitions, so repeated callbacks never produce duplicate events.

use crate::error::{Error, Result};
use crate::session::{LifecycleState, Session, SessionId, SessionRegistry};
use crate::traits::Registration;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Reachability of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Presence {
    Awake,
    Sleeping,
}

impl From<Presence> for LifecycleState {
    fn from(presence: Presence) -> Self {
        match presence {
            Presence::Awake => LifecycleState::Awake,
            Presence::Sleeping => LifecycleState::Sleeping,
        }
    }
}

/// An actual presence transition
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceChange {
    /// Session snapshot after the transition
    pub session: Session,
    pub previous: Presence,
    pub current: Presence,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct PresenceRecord {
    presence: Presence,
    since: DateTime<Utc>,
    transitions: u64,
}

impl PresenceRecord {
    fn awake(now: DateTime<Utc>) -> Self {
        Self {
            presence: Presence::Awake,
            since: now,
            transitions: 0,
        }
    }
}

/// Edge-triggered presence state per session
pub struct PresenceTracker {
    registry: Arc<SessionRegistry>,
    records: DashMap<SessionId, PresenceRecord>,
}

impl PresenceTracker {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            records: DashMap::new(),
        }
    }

    /// Device went to sleep
    ///
    /// # Returns
    ///
    /// - `Ok(Some(change))`: Presence changed
    /// - `Ok(None)`: Already sleeping
    /// - `Err(Error::UnknownSession)`: No live session matches
    pub fn on_sleep(&self, registration: &Registration) -> Result<Option<PresenceChange>> {
        self.transition(registration, Presence::Sleeping)
    }

    /// Device woke up; see [`PresenceTracker::on_sleep`]
    pub fn on_awake(&self, registration: &Registration) -> Result<Option<PresenceChange>> {
        self.transition(registration, Presence::Awake)
    }

    /// Mark a (re)registered session awake without reporting a transition
    pub fn reset(&self, id: &SessionId) {
        self.records.insert(*id, PresenceRecord::awake(Utc::now()));
    }

    /// Drop the record of a removed session
    pub fn forget(&self, id: &SessionId) {
        self.records.remove(id);
    }

    /// Current presence of a session
    pub fn presence(&self, id: &SessionId) -> Option<Presence> {
        self.records.get(id).map(|record| record.presence)
    }

    /// When the current presence began
    pub fn since(&self, id: &SessionId) -> Option<DateTime<Utc>> {
        self.records.get(id).map(|record| record.since)
    }

    /// Number of actual transitions recorded for a session
    pub fn transitions(&self, id: &SessionId) -> u64 {
        self.records
            .get(id)
            .map(|record| record.transitions)
            .unwrap_or(0)
    }

    /// Sessions currently asleep
    pub fn sleeping_sessions(&self) -> Vec<SessionId> {
        self.records
            .iter()
            .filter(|entry| entry.presence == Presence::Sleeping)
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn transition(
        &self,
        registration: &Registration,
        target: Presence,
    ) -> Result<Option<PresenceChange>> {
        let session = self.registry.lookup(registration)?;
        let now = Utc::now();

        let previous = {
            let mut record = self
                .records
                .entry(session.id)
                .or_insert_with(|| PresenceRecord::awake(now));
            if record.presence == target {
                debug!(
                    "{} already {:?}, no presence change",
                    session.endpoint, target
                );
                return Ok(None);
            }
            let previous = record.presence;
            record.presence = target;
            record.since = now;
            record.transitions += 1;
            previous
        };

        let Some(session) = self.registry.set_state(&session.id, target.into()) else {
            // Removed between lookup and transition
            self.records.remove(&session.id);
            return Err(Error::unknown_session(
                &registration.endpoint,
                &registration.registration_id,
            ));
        };

        debug!("{} presence {:?} -> {:?}", session.endpoint, previous, target);
        Ok(Some(PresenceChange {
            session,
            previous,
            current: target,
            at: now,
        }))
    }
}
