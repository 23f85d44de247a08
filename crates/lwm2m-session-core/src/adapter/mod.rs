//! Server event adapter
//!
//! Translates engine callbacks into registry, presence and router calls and
//! publishes the resulting events through the [`EventSink`].
//!
//! ```text
//! EngineCallback ──► ServerEventAdapter ──► SessionRegistry ──┐
//!                          │                PresenceTracker   │ (cascade)
//!                          │                ObservationRouter ◄┘
//!                          ▼
//!                     EventSink::publish
//! ```
//!
//! All registry work is synchronous; the sink call is the only suspension
//! point. The adapter expects the callbacks of one session to be handed to
//! it in engine order (see [`crate::dispatcher`]).

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::observation::{DiscardReason, Notification, NotificationOutcome, ObservationRouter};
use crate::presence::{PresenceChange, PresenceTracker};
use crate::session::{Registered, Session, SessionRegistry};
use crate::traits::{
    DeviceEvent, EngineCallback, EventKind, EventSink, ObservationId, ObservationInfo,
    ObserveResponse, Registration, RemovalReason,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Entry point for engine callbacks
pub struct ServerEventAdapter {
    registry: Arc<SessionRegistry>,
    presence: Arc<PresenceTracker>,
    router: Arc<ObservationRouter>,
    sink: Arc<dyn EventSink>,
    publish_lifecycle: bool,
}

impl ServerEventAdapter {
    /// Build the core from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Self)`: Ready to handle callbacks
    /// - `Err(Error::Config)`: Invalid configuration
    pub fn new(config: &CoreConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;

        let router = Arc::new(ObservationRouter::new(&config.observations));
        let registry = Arc::new(SessionRegistry::new(&config.sessions, router.clone()));
        let presence = Arc::new(PresenceTracker::new(registry.clone()));

        Ok(Self {
            registry,
            presence,
            router,
            sink,
            publish_lifecycle: config.observations.publish_lifecycle,
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn router(&self) -> &Arc<ObservationRouter> {
        &self.router
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Handle one engine callback
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Handled, or discarded as an expected race
    /// - `Err(Error::UnknownSession)`: The callback's session is gone
    /// - `Err(Error::PathResolution)`: Observation recorded as unresolved
    /// - `Err(Error::Sink)`: An event could not be published (already logged)
    pub async fn handle(&self, callback: EngineCallback) -> Result<()> {
        match callback {
            EngineCallback::Registered {
                registration,
                prior_observations,
            } => self.on_registered(&registration, &prior_observations).await,
            EngineCallback::Updated { registration } => self.on_updated(&registration).await,
            EngineCallback::Unregistered {
                registration,
                observations,
            } => self.on_unregistered(&registration, &observations).await,
            EngineCallback::Sleeping { registration } => self.on_sleeping(&registration).await,
            EngineCallback::Awake { registration } => self.on_awake(&registration).await,
            EngineCallback::NewObservation {
                observation,
                registration,
            } => self.on_new_observation(&observation, &registration).await,
            EngineCallback::ObservationCancelled { observation_id } => {
                self.on_observation_cancelled(&observation_id).await
            }
            EngineCallback::ObservationResponse {
                observation_id,
                registration,
                response,
            } => self
                .on_observation_response(&observation_id, registration.as_ref(), response)
                .await
                .map(|_| ()),
            EngineCallback::ObservationError {
                observation_id,
                registration,
                cause,
            } => {
                self.on_observation_error(&observation_id, registration.as_ref(), &cause)
                    .await
            }
        }
    }

    /// Device registered
    ///
    /// A session evicted to make room is reported before the registration.
    pub async fn on_registered(
        &self,
        registration: &Registration,
        prior_observations: &[ObservationId],
    ) -> Result<()> {
        let registered = self.admit(registration, prior_observations);
        let evicted = match &registered.evicted {
            Some(evicted) => self.publish_eviction(evicted).await,
            None => Ok(()),
        };
        let published = self.publish_registered(&registered).await;
        evicted.and(published)
    }

    /// Register without reporting an eviction
    ///
    /// Returns the evicted session, if any, so the caller can publish its
    /// removal in that session's own order via [`Self::publish_eviction`].
    pub(crate) async fn on_registered_deferring_eviction(
        &self,
        registration: &Registration,
        prior_observations: &[ObservationId],
    ) -> (Option<Session>, Result<()>) {
        let registered = self.admit(registration, prior_observations);
        let published = self.publish_registered(&registered).await;
        (registered.evicted, published)
    }

    /// Publish the removal of a session evicted at capacity
    pub async fn publish_eviction(&self, evicted: &Session) -> Result<()> {
        self.publish(removed(evicted, RemovalReason::Evicted)).await
    }

    fn admit(&self, registration: &Registration, prior_observations: &[ObservationId]) -> Registered {
        let registered = self.registry.register(registration, prior_observations);
        self.presence.reset(&registered.session.id);
        if let Some(evicted) = &registered.evicted {
            self.presence.forget(&evicted.id);
        }
        registered
    }

    async fn publish_registered(&self, registered: &Registered) -> Result<()> {
        let session = &registered.session;
        self.publish(DeviceEvent::new(
            session.id,
            &session.endpoint,
            EventKind::SessionRegistered {
                generation: session.generation,
                superseded: registered.superseded.is_some(),
            },
        ))
        .await
    }

    /// Device sent a registration update
    pub async fn on_updated(&self, registration: &Registration) -> Result<()> {
        let session = self.registry.update(registration)?;
        self.publish(DeviceEvent::new(
            session.id,
            &session.endpoint,
            EventKind::SessionUpdated {
                generation: session.generation,
            },
        ))
        .await
    }

    /// Device deregistered
    ///
    /// Unregistering a session that is already gone is a no-op.
    pub async fn on_unregistered(
        &self,
        registration: &Registration,
        observations: &[ObservationId],
    ) -> Result<()> {
        let Some(session) = self.registry.unregister(registration, observations) else {
            return Ok(());
        };
        self.presence.forget(&session.id);
        info!(
            "{} deregistered, {} observation(s) invalidated",
            session.endpoint,
            session.observations.len()
        );

        self.publish(removed(&session, RemovalReason::Deregistered))
            .await
    }

    /// Queue-mode device went to sleep
    pub async fn on_sleeping(&self, registration: &Registration) -> Result<()> {
        let change = self.presence.on_sleep(registration)?;
        self.publish_presence(change).await
    }

    /// Queue-mode device woke up
    pub async fn on_awake(&self, registration: &Registration) -> Result<()> {
        let change = self.presence.on_awake(registration)?;
        self.publish_presence(change).await
    }

    /// Observe relationship established
    pub async fn on_new_observation(
        &self,
        observation: &ObservationInfo,
        registration: &Registration,
    ) -> Result<()> {
        let recorded = match self.registry.attach_observation(registration, observation) {
            Ok(recorded) => recorded,
            Err(e @ Error::PathResolution { .. }) => {
                warn!(
                    "Observation {} of {} left unresolved: {}",
                    observation.id, registration.endpoint, e
                );
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        debug!(
            "Observation {} of {} started",
            recorded.id, recorded.endpoint
        );
        match (self.publish_lifecycle, recorded.path) {
            (true, Some(path)) => {
                self.publish(DeviceEvent::new(
                    recorded.session_id,
                    recorded.endpoint,
                    EventKind::ObservationStarted { path },
                ))
                .await
            }
            _ => Ok(()),
        }
    }

    /// Observe relationship cancelled
    pub async fn on_observation_cancelled(&self, observation_id: &ObservationId) -> Result<()> {
        let Some(cancelled) = self.registry.cancel_observation(observation_id) else {
            debug!("Cancel for unknown observation {} ignored", observation_id);
            return Ok(());
        };

        match (self.publish_lifecycle, cancelled.path) {
            (true, Some(path)) => {
                self.publish(DeviceEvent::new(
                    cancelled.session_id,
                    cancelled.endpoint,
                    EventKind::ObservationCancelled { path },
                ))
                .await
            }
            _ => Ok(()),
        }
    }

    /// Notification received
    ///
    /// Returns how the router handled it; only `Err(Error::Sink)` is an error.
    pub async fn on_observation_response(
        &self,
        observation_id: &ObservationId,
        registration: Option<&Registration>,
        response: ObserveResponse,
    ) -> Result<NotificationOutcome> {
        if registration.is_none() {
            debug!(
                "Ignoring response for observation {} without registration",
                observation_id
            );
            return Ok(NotificationOutcome::Discarded(
                DiscardReason::NoRegistration,
            ));
        }

        let outcome = self
            .router
            .on_notification(observation_id, Notification::from(response));
        if let NotificationOutcome::Published(events) = &outcome {
            let events = events
                .iter()
                .cloned()
                .map(|event| event.into_device_event())
                .collect();
            self.publish_all(events).await?;
        }
        Ok(outcome)
    }

    /// Engine could not handle a notification
    ///
    /// The observation is kept; a `ResourceStale` event marks its value.
    pub async fn on_observation_error(
        &self,
        observation_id: &ObservationId,
        registration: Option<&Registration>,
        cause: &str,
    ) -> Result<()> {
        let Some(observation) = self.router.on_error(observation_id, cause) else {
            return Ok(());
        };

        let endpoint = registration
            .map(|r| r.endpoint.as_str())
            .unwrap_or(&observation.endpoint);
        error!(
            "Unable to handle notification of [{}:{}]: {}",
            endpoint, observation.raw_path, cause
        );

        let Some(path) = observation.path else {
            return Ok(());
        };
        self.publish(DeviceEvent::new(
            observation.session_id,
            observation.endpoint,
            EventKind::ResourceStale {
                path,
                cause: cause.to_string(),
            },
        ))
        .await
    }

    /// Expire one endpoint's session if it is still stale at `now`
    pub async fn expire_session(&self, endpoint: &str, now: DateTime<Utc>) -> Result<Option<Session>> {
        let Some(session) = self.registry.expire(endpoint, now) else {
            return Ok(None);
        };
        self.presence.forget(&session.id);
        self.publish(removed(&session, RemovalReason::Expired))
            .await?;
        Ok(Some(session))
    }

    /// Expire every stale session
    ///
    /// Every expiry is published even when an earlier publish fails; the
    /// first failure is returned.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let expired = self.registry.expire_stale(now);
        let events = expired
            .iter()
            .map(|session| {
                self.presence.forget(&session.id);
                removed(session, RemovalReason::Expired)
            })
            .collect();
        self.publish_all(events).await?;
        Ok(expired)
    }

    /// Publish notifications of `endpoint` held past the reorder hold time
    ///
    /// Returns how many were released.
    pub async fn release_held(&self, endpoint: &str, now: DateTime<Utc>) -> Result<usize> {
        let events: Vec<DeviceEvent> = self
            .router
            .release_expired(endpoint, now)
            .into_iter()
            .map(|event| event.into_device_event())
            .collect();
        let released = events.len();
        self.publish_all(events).await?;
        Ok(released)
    }

    async fn publish_presence(&self, change: Option<PresenceChange>) -> Result<()> {
        let Some(change) = change else {
            return Ok(());
        };
        self.publish(DeviceEvent::new(
            change.session.id,
            change.session.endpoint,
            EventKind::PresenceChanged {
                state: change.current,
            },
        ))
        .await
    }

    async fn publish(&self, event: DeviceEvent) -> Result<()> {
        match self.sink.publish(&event).await {
            Ok(_) => {
                debug!(
                    "Published {} for {} via {}",
                    event.kind.name(),
                    event.endpoint,
                    self.sink.sink_name()
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to publish {} for {} via {}: {}",
                    event.kind.name(),
                    event.endpoint,
                    self.sink.sink_name(),
                    e
                );
                Err(Error::sink(self.sink.sink_name(), e.to_string()))
            }
        }
    }

    async fn publish_all(&self, events: Vec<DeviceEvent>) -> Result<()> {
        let mut first_error = None;
        for event in events {
            if let Err(e) = self.publish(event).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn removed(session: &Session, reason: RemovalReason) -> DeviceEvent {
    DeviceEvent::new(
        session.id,
        &session.endpoint,
        EventKind::SessionRemoved { reason },
    )
}
