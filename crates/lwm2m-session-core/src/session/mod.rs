//! Device sessions
//!
//! A [`Session`] is the server-side record of one connected device. Sessions
//! are owned by the [`SessionRegistry`]; everything handed out of the
//! registry is a snapshot.

pub mod registry;

pub use registry::{Registered, SessionRegistry, Superseded};

use crate::codec::ObjectVersions;
use crate::traits::{ObservationId, Registration};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Whole seconds as a chrono duration
///
/// Saturates at the largest representable span, so absurd lifetimes mean
/// "never stale" rather than a panic.
pub(crate) fn duration_secs(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

/// Stable session identifier
///
/// Kept across re-registrations of an active endpoint; a new id is
/// allocated only when an endpoint registers with no live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Allocate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Registered,
    Updated,
    Sleeping,
    Awake,
    /// Terminal; the session is removed right after entering it
    Unregistered,
}

/// Server-side record of one connected device
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Stable session id
    pub id: SessionId,
    /// Incremented every time the endpoint re-registers while live
    pub generation: u64,
    /// Device endpoint name
    pub endpoint: String,
    /// Engine registration id of the current generation
    pub registration_id: String,
    /// Current lifecycle state
    pub state: LifecycleState,
    /// Last registration or update from the device
    pub last_seen: DateTime<Utc>,
    /// Registration lifetime
    pub lifetime: chrono::Duration,
    /// Objects and versions announced by the device
    pub objects: ObjectVersions,
    /// Whether the device uses queue mode
    pub queue_mode: bool,
    /// Transport address
    pub address: Option<String>,
    /// Active observations owned by this session
    pub observations: BTreeSet<ObservationId>,
}

impl Session {
    /// Create a first-generation session
    ///
    /// `pub(crate)`: sessions only come out of the registry.
    pub(crate) fn new(
        registration: &Registration,
        lifetime: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            generation: 1,
            endpoint: registration.endpoint.clone(),
            registration_id: registration.registration_id.clone(),
            state: LifecycleState::Registered,
            last_seen: now,
            lifetime,
            objects: registration.objects.clone(),
            queue_mode: registration.queue_mode,
            address: registration.address.clone(),
            observations: BTreeSet::new(),
        }
    }

    /// Whether a callback's registration refers to this generation
    pub fn matches(&self, registration: &Registration) -> bool {
        self.endpoint == registration.endpoint
            && self.registration_id == registration.registration_id
            && self.is_live()
    }

    /// Whether the session has not entered its terminal state
    pub fn is_live(&self) -> bool {
        self.state != LifecycleState::Unregistered
    }

    /// Whether the device has been silent past lifetime + grace
    pub fn is_stale(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        match self.lifetime.checked_add(&grace) {
            Some(limit) => now.signed_duration_since(self.last_seen) > limit,
            None => false,
        }
    }

    /// Replace this session's registration with a new generation
    pub(crate) fn supersede(
        &mut self,
        registration: &Registration,
        lifetime: chrono::Duration,
        now: DateTime<Utc>,
    ) {
        self.generation += 1;
        self.registration_id = registration.registration_id.clone();
        self.state = LifecycleState::Registered;
        self.last_seen = now;
        self.lifetime = lifetime;
        self.objects = registration.objects.clone();
        self.queue_mode = registration.queue_mode;
        self.address = registration.address.clone();
    }

    /// Apply a registration update
    ///
    /// Updates may omit unchanged attributes, so absent values keep the
    /// current ones.
    pub(crate) fn apply_update(&mut self, registration: &Registration, now: DateTime<Utc>) {
        self.state = LifecycleState::Updated;
        self.last_seen = now;
        if let Some(secs) = registration.lifetime_secs {
            self.lifetime = duration_secs(secs);
        }
        if !registration.objects.is_empty() {
            self.objects = registration.objects.clone();
        }
        if registration.address.is_some() {
            self.address = registration.address.clone();
        }
        self.queue_mode = registration.queue_mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            &Registration::new("dev-1", "r1"),
            chrono::Duration::seconds(60),
            Utc::now(),
        )
    }

    #[test]
    fn test_huge_lifetime_saturates() {
        assert_eq!(duration_secs(60), chrono::Duration::seconds(60));
        assert_eq!(duration_secs(10_000_000_000_000_000), chrono::Duration::MAX);
        assert_eq!(duration_secs(u64::MAX), chrono::Duration::MAX);

        let session = Session::new(
            &Registration::new("dev-1", "r1"),
            duration_secs(u64::MAX),
            Utc::now(),
        );
        let far_future = session.last_seen + chrono::Duration::days(365 * 1000);
        assert!(!session.is_stale(far_future, chrono::Duration::seconds(30)));
    }

    #[test]
    fn test_staleness_includes_grace() {
        let session = session();
        let grace = chrono::Duration::seconds(10);
        assert!(!session.is_stale(session.last_seen + chrono::Duration::seconds(70), grace));
        assert!(session.is_stale(session.last_seen + chrono::Duration::seconds(71), grace));
    }

    #[test]
    fn test_matches_requires_current_generation() {
        let mut session = session();
        assert!(session.matches(&Registration::new("dev-1", "r1")));

        session.supersede(
            &Registration::new("dev-1", "r2"),
            chrono::Duration::seconds(60),
            Utc::now(),
        );
        assert_eq!(session.generation, 2);
        assert!(!session.matches(&Registration::new("dev-1", "r1")));
        assert!(session.matches(&Registration::new("dev-1", "r2")));

        session.state = LifecycleState::Unregistered;
        assert!(!session.matches(&Registration::new("dev-1", "r2")));
    }

    #[test]
    fn test_update_keeps_omitted_attributes() {
        let mut session = session();
        session.objects = ObjectVersions::new().with(3, "1.1");

        session.apply_update(&Registration::new("dev-1", "r1").with_lifetime(120), Utc::now());
        assert_eq!(session.state, LifecycleState::Updated);
        assert_eq!(session.lifetime, chrono::Duration::seconds(120));
        assert_eq!(session.objects.get(3), Some("1.1"));
    }
}
