// # Session Registry
//
// Authoritative map of live device sessions.
//
// ## Indices
//
// - `sessions`: session id → session record
// - `endpoints`: endpoint name → session id
//
// Both are sharded `DashMap`s, so operations on unrelated devices never
// contend on a global lock.
//
// ## Cascading Invalidation
//
// Whenever a session is superseded or removed, its observations are
// invalidated in the `ObservationRouter` while the session's entry is still
// locked. A notification racing with the removal finds no observation and is
// discarded. Lock order is always registry entry → router entry; the router
// never calls back into the registry.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::observation::{Observation, ObservationRouter};
use crate::session::{LifecycleState, Session, SessionId, duration_secs};
use crate::traits::{ObservationId, ObservationInfo, Registration};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of [`SessionRegistry::register`]
#[derive(Debug, Clone)]
pub struct Registered {
    /// The live session after registration
    pub session: Session,
    /// Set when an active session for the endpoint was replaced
    pub superseded: Option<Superseded>,
    /// Session evicted to stay within `max_sessions`
    pub evicted: Option<Session>,
}

/// Details of a superseded generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superseded {
    pub previous_generation: u64,
    pub previous_registration_id: String,
    /// Observations of the previous generation that were invalidated
    pub invalidated: usize,
}

/// Registry of live device sessions
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
    endpoints: DashMap<String, SessionId>,
    router: Arc<ObservationRouter>,
    default_lifetime: chrono::Duration,
    expiry_grace: chrono::Duration,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Create an empty registry cascading into `router`
    pub fn new(config: &SessionConfig, router: Arc<ObservationRouter>) -> Self {
        Self {
            sessions: DashMap::new(),
            endpoints: DashMap::new(),
            router,
            default_lifetime: config.default_lifetime(),
            expiry_grace: config.expiry_grace(),
            max_sessions: config.max_sessions,
        }
    }

    /// The router this registry cascades into
    pub fn router(&self) -> &Arc<ObservationRouter> {
        &self.router
    }

    /// Register a device
    ///
    /// If the endpoint already has a live session it is superseded: the
    /// session id is kept, the generation incremented and every observation
    /// of the old generation invalidated. `prior_observations` (reported by
    /// the engine for the replaced registration) are invalidated as well.
    ///
    /// Always succeeds. At capacity, the least recently seen session is
    /// evicted first.
    pub fn register(
        &self,
        registration: &Registration,
        prior_observations: &[ObservationId],
    ) -> Registered {
        let now = Utc::now();
        let lifetime = self.lifetime_for(registration);

        let dropped = self.router.invalidate(prior_observations);
        if dropped > 0 {
            debug!(
                "Invalidated {} prior observation(s) of {}",
                dropped, registration.endpoint
            );
        }

        let existing = self.endpoints.get(&registration.endpoint).map(|id| *id);
        if let Some(id) = existing {
            if let Some(mut session) = self.sessions.get_mut(&id) {
                let previous_generation = session.generation;
                let previous_registration_id = session.registration_id.clone();
                let stale: Vec<ObservationId> =
                    std::mem::take(&mut session.observations).into_iter().collect();
                let invalidated = self.router.invalidate(&stale);

                session.supersede(registration, lifetime, now);
                info!(
                    "Session {} for {} superseded: generation {} -> {}, {} observation(s) invalidated",
                    session.id, session.endpoint, previous_generation, session.generation, invalidated
                );

                return Registered {
                    session: session.value().clone(),
                    superseded: Some(Superseded {
                        previous_generation,
                        previous_registration_id,
                        invalidated,
                    }),
                    evicted: None,
                };
            }
        }

        let evicted = if self.sessions.len() >= self.max_sessions {
            self.evict_least_recent()
        } else {
            None
        };

        let session = Session::new(registration, lifetime, now);
        self.sessions.insert(session.id, session.clone());
        self.endpoints
            .insert(registration.endpoint.clone(), session.id);
        info!("Session {} created for {}", session.id, session.endpoint);

        Registered {
            session,
            superseded: None,
            evicted,
        }
    }

    /// Apply a registration update
    ///
    /// # Returns
    ///
    /// - `Ok(Session)`: The refreshed session
    /// - `Err(Error::UnknownSession)`: No live session matches the registration
    pub fn update(&self, registration: &Registration) -> Result<Session> {
        let id = self.live_id(registration)?;
        let mut session = self
            .sessions
            .get_mut(&id)
            .filter(|session| session.matches(registration))
            .ok_or_else(|| unknown(registration))?;

        session.apply_update(registration, Utc::now());
        debug!("Session {} for {} updated", session.id, session.endpoint);
        Ok(session.value().clone())
    }

    /// Remove a device's session
    ///
    /// The engine-reported `observations` are invalidated even when the
    /// session is already gone.
    ///
    /// # Returns
    ///
    /// - `Some(Session)`: The removed session, in state `Unregistered`
    /// - `None`: Already removed, or the registration belongs to a superseded generation
    pub fn unregister(
        &self,
        registration: &Registration,
        observations: &[ObservationId],
    ) -> Option<Session> {
        self.router.invalidate(observations);

        let id = self.endpoints.get(&registration.endpoint).map(|id| *id)?;
        let removed = self.remove_session_if(&id, |session| session.matches(registration));
        if removed.is_none() {
            debug!(
                "Unregister for {} ({}) ignored: no matching live session",
                registration.endpoint, registration.registration_id
            );
        }
        removed
    }

    /// Remove every session silent past its lifetime + grace
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Vec<Session> {
        self.stale_endpoints(now)
            .iter()
            .filter_map(|endpoint| self.expire(endpoint, now))
            .collect()
    }

    /// Endpoints whose sessions are stale at `now`
    pub fn stale_endpoints(&self, now: DateTime<Utc>) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.is_stale(now, self.expiry_grace))
            .map(|entry| entry.endpoint.clone())
            .collect()
    }

    /// Expire one endpoint's session if it is still stale at `now`
    pub fn expire(&self, endpoint: &str, now: DateTime<Utc>) -> Option<Session> {
        let id = self.endpoints.get(endpoint).map(|id| *id)?;
        let grace = self.expiry_grace;
        let expired = self.remove_session_if(&id, |session| session.is_stale(now, grace))?;
        info!(
            "Session {} for {} expired (last seen {})",
            expired.id, expired.endpoint, expired.last_seen
        );
        Some(expired)
    }

    /// Find the live session a registration refers to
    pub fn lookup(&self, registration: &Registration) -> Result<Session> {
        let id = self.live_id(registration)?;
        self.sessions
            .get(&id)
            .filter(|session| session.matches(registration))
            .map(|session| session.value().clone())
            .ok_or_else(|| unknown(registration))
    }

    /// Snapshot of a session by id
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|session| session.value().clone())
    }

    /// Snapshot of an endpoint's live session
    pub fn find_by_endpoint(&self, endpoint: &str) -> Option<Session> {
        let id = self.endpoints.get(endpoint).map(|id| *id)?;
        self.get(&id)
    }

    /// Snapshot of all live sessions
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Record a new observation on the registration's session
    ///
    /// The observation is recorded even when its path cannot be resolved;
    /// it is then flagged unresolved and its notifications are dropped.
    ///
    /// # Returns
    ///
    /// - `Ok(Observation)`: Recorded and resolved
    /// - `Err(Error::UnknownSession)`: Nothing recorded
    /// - `Err(Error::PathResolution)`: Recorded, unresolved
    pub fn attach_observation(
        &self,
        registration: &Registration,
        observation: &ObservationInfo,
    ) -> Result<Observation> {
        let id = self.live_id(registration)?;
        let mut session = self
            .sessions
            .get_mut(&id)
            .filter(|session| session.matches(registration))
            .ok_or_else(|| unknown(registration))?;

        let resolved =
            self.router
                .on_new_observation(observation.id.clone(), session.value(), &observation.path);
        session.observations.insert(observation.id.clone());
        resolved
    }

    /// Cancel an observation and detach it from its session
    pub fn cancel_observation(&self, observation_id: &ObservationId) -> Option<Observation> {
        let observation = self.router.on_cancelled(observation_id)?;
        if let Some(mut session) = self.sessions.get_mut(&observation.session_id) {
            session.observations.remove(observation_id);
        }
        Some(observation)
    }

    /// Set a live session's lifecycle state
    ///
    /// Used by the presence tracker; returns the updated snapshot.
    pub(crate) fn set_state(&self, id: &SessionId, state: LifecycleState) -> Option<Session> {
        let mut session = self.sessions.get_mut(id).filter(|session| session.is_live())?;
        session.state = state;
        Some(session.value().clone())
    }

    fn remove_session_if(
        &self,
        id: &SessionId,
        predicate: impl FnOnce(&Session) -> bool,
    ) -> Option<Session> {
        let invalidated = {
            let mut session = self.sessions.get_mut(id).filter(|session| predicate(session.value()))?;
            session.state = LifecycleState::Unregistered;
            let observations = std::mem::take(&mut session.observations);
            let ids: Vec<ObservationId> = observations.iter().cloned().collect();
            let count = self.router.invalidate(&ids);
            if count != ids.len() {
                warn!(
                    "Session {} listed {} observation(s) but the router held {}",
                    session.id,
                    ids.len(),
                    count
                );
            }
            observations
        };

        let (_, mut session) = self.sessions.remove(id)?;
        self.endpoints
            .remove_if(&session.endpoint, |_, current| *current == session.id);
        session.observations = invalidated;
        Some(session)
    }

    fn evict_least_recent(&self) -> Option<Session> {
        let victim = self
            .sessions
            .iter()
            .min_by_key(|entry| entry.last_seen)
            .map(|entry| *entry.key())?;
        let evicted = self.remove_session_if(&victim, |_| true)?;
        warn!(
            "Session limit {} reached, evicted {} ({})",
            self.max_sessions, evicted.endpoint, evicted.id
        );
        Some(evicted)
    }

    fn live_id(&self, registration: &Registration) -> Result<SessionId> {
        self.endpoints
            .get(&registration.endpoint)
            .map(|id| *id)
            .ok_or_else(|| unknown(registration))
    }

    fn lifetime_for(&self, registration: &Registration) -> chrono::Duration {
        registration
            .lifetime_secs
            .map(duration_secs)
            .unwrap_or(self.default_lifetime)
    }
}

fn unknown(registration: &Registration) -> Error {
    Error::unknown_session(&registration.endpoint, &registration.registration_id)
}
