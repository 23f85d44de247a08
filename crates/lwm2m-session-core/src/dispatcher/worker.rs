//! Per-session workers
//!
//! One tokio task per endpoint drains that endpoint's jobs in arrival order.
//! Workers for different endpoints run in parallel.
//!
//! A worker retires after its session ends (unregister, expiry or eviction)
//! or when the sweep finds it idle with no live session. If the endpoint comes
//! back before the retiring task has drained, the new worker first waits for
//! its predecessor so order is preserved across the gap.
//!
//! Cancellations carry no endpoint. The set remembers which endpoint each
//! observation was dispatched for, so a cancel always queues behind the
//! `NewObservation` it refers to even when that has not been handled yet.

use crate::adapter::ServerEventAdapter;
use crate::error::Error;
use crate::session::Session;
use crate::traits::{EngineCallback, ObservationId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Unit of work for a session worker
#[derive(Debug)]
pub(crate) enum Job {
    Callback(EngineCallback),
    /// Expire the session if it is still stale at the given time
    Expire(DateTime<Utc>),
    /// Release notifications held past the reorder hold time
    ReleaseHeld(DateTime<Utc>),
    /// Report a session evicted by another endpoint's registration
    Evicted(Session),
}

struct Worker {
    tx: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
}

/// Set of live per-endpoint workers
pub(crate) struct WorkerSet {
    adapter: Arc<ServerEventAdapter>,
    workers: HashMap<String, Worker>,
    retiring: HashMap<String, JoinHandle<()>>,
    /// Endpoint each dispatched observation belongs to
    owners: HashMap<ObservationId, String>,
    evictions: mpsc::UnboundedSender<Session>,
}

impl WorkerSet {
    /// Create an empty set
    ///
    /// Sessions evicted while registering are sent to `evictions`; the
    /// dispatcher hands them back through [`WorkerSet::evict`].
    pub(crate) fn new(
        adapter: Arc<ServerEventAdapter>,
        evictions: mpsc::UnboundedSender<Session>,
    ) -> Self {
        Self {
            adapter,
            workers: HashMap::new(),
            retiring: HashMap::new(),
            owners: HashMap::new(),
            evictions,
        }
    }

    /// Route a callback to the worker owning its endpoint
    pub(crate) fn dispatch(&mut self, callback: EngineCallback) {
        let Some(endpoint) = self.owner_of(&callback) else {
            debug!(
                "Discarding {} callback for unknown observation {:?}",
                callback.kind(),
                callback.observation_id().map(|id| id.as_str())
            );
            return;
        };

        match &callback {
            EngineCallback::NewObservation { observation, .. } => {
                self.owners.insert(observation.id.clone(), endpoint.clone());
            }
            EngineCallback::ObservationCancelled { observation_id } => {
                self.owners.remove(observation_id);
            }
            // Earlier observations of the endpoint die with these
            EngineCallback::Registered { .. } | EngineCallback::Unregistered { .. } => {
                self.owners.retain(|_, owner| *owner != endpoint);
            }
            _ => {}
        }

        let ends_session = callback.ends_session();
        self.send(&endpoint, Job::Callback(callback));
        if ends_session {
            self.retire(&endpoint);
        }
    }

    /// Queue the removal report of an evicted session on its own worker
    pub(crate) fn evict(&mut self, session: Session) {
        for id in &session.observations {
            self.owners.remove(id);
        }
        let endpoint = session.endpoint.clone();
        debug!("Queueing eviction of {} ({})", endpoint, session.id);
        self.send(&endpoint, Job::Evicted(session));
        self.retire(&endpoint);
    }

    /// Periodic maintenance at `now`
    ///
    /// - Releases notifications held past the reorder hold time
    /// - Queues expiry for every endpoint stale at `now`
    /// - Retires idle workers whose endpoint has no live session
    pub(crate) fn sweep(&mut self, now: DateTime<Utc>) {
        self.retiring.retain(|_, handle| !handle.is_finished());

        for endpoint in self.adapter.router().endpoints_with_expired_holds(now) {
            debug!("Queueing release of held notifications for {}", endpoint);
            self.send(&endpoint, Job::ReleaseHeld(now));
        }

        for endpoint in self.adapter.registry().stale_endpoints(now) {
            debug!("Queueing expiry check for {}", endpoint);
            self.send(&endpoint, Job::Expire(now));
            self.retire(&endpoint);
        }

        let registry = self.adapter.registry().clone();
        let idle: Vec<String> = self
            .workers
            .keys()
            .filter(|endpoint| registry.find_by_endpoint(endpoint).is_none())
            .cloned()
            .collect();
        for endpoint in idle {
            debug!("Retiring idle worker for {}", endpoint);
            self.retire(&endpoint);
        }

        // An endpoint with no task left has nothing queued that could still
        // create one of these observations
        let workers = &self.workers;
        let retiring = &self.retiring;
        self.owners.retain(|_, endpoint| {
            workers.contains_key(endpoint.as_str())
                || retiring.contains_key(endpoint.as_str())
                || registry.find_by_endpoint(endpoint).is_some()
        });
    }

    /// Number of live workers
    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    /// Number of remembered observation owners
    #[cfg(test)]
    pub(crate) fn owners(&self) -> usize {
        self.owners.len()
    }

    /// Close every queue and wait for all workers to drain
    pub(crate) async fn shutdown(self) {
        let mut handles: Vec<JoinHandle<()>> = self.retiring.into_values().collect();
        handles.extend(self.workers.into_values().map(|worker| {
            drop(worker.tx);
            worker.handle
        }));

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Session worker ended abnormally: {}", e);
            }
        }
    }

    fn owner_of(&self, callback: &EngineCallback) -> Option<String> {
        if let Some(endpoint) = callback.endpoint() {
            return Some(endpoint.to_string());
        }
        let id = callback.observation_id()?;
        self.owners
            .get(id)
            .cloned()
            .or_else(|| self.adapter.router().endpoint_of(id))
    }

    fn send(&mut self, endpoint: &str, job: Job) {
        let job = match self.workers.get(endpoint) {
            Some(worker) => match worker.tx.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let worker = self.spawn(endpoint);
        if worker.tx.send(job).is_err() {
            warn!("Session worker for {} closed before its first job", endpoint);
        }
        self.workers.insert(endpoint.to_string(), worker);
    }

    fn spawn(&mut self, endpoint: &str) -> Worker {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let predecessor = self.retiring.remove(endpoint);
        let adapter = self.adapter.clone();
        let evictions = self.evictions.clone();
        let endpoint = endpoint.to_string();

        let handle = tokio::spawn(async move {
            if let Some(predecessor) = predecessor {
                let _ = predecessor.await;
            }
            while let Some(job) = rx.recv().await {
                run_job(&adapter, &evictions, &endpoint, job).await;
            }
            debug!("Session worker for {} drained", endpoint);
        });

        Worker { tx, handle }
    }

    fn retire(&mut self, endpoint: &str) {
        if let Some(worker) = self.workers.remove(endpoint) {
            // Dropping the sender lets the task finish its queue and exit
            drop(worker.tx);
            self.retiring.insert(endpoint.to_string(), worker.handle);
        }
    }
}

async fn run_job(
    adapter: &ServerEventAdapter,
    evictions: &mpsc::UnboundedSender<Session>,
    endpoint: &str,
    job: Job,
) {
    let (kind, result) = match job {
        Job::Callback(EngineCallback::Registered {
            registration,
            prior_observations,
        }) => {
            let (evicted, result) = adapter
                .on_registered_deferring_eviction(&registration, &prior_observations)
                .await;
            if let Some(evicted) = evicted
                && let Err(mpsc::error::SendError(evicted)) = evictions.send(evicted)
            {
                // Dispatcher gone; nothing else will report it
                let _ = adapter.publish_eviction(&evicted).await;
            }
            ("registered", result)
        }
        Job::Callback(callback) => {
            let kind = callback.kind();
            (kind, adapter.handle(callback).await)
        }
        Job::Expire(now) => ("expire", adapter.expire_session(endpoint, now).await.map(|_| ())),
        Job::ReleaseHeld(now) => ("release", adapter.release_held(endpoint, now).await.map(|_| ())),
        Job::Evicted(session) => ("evicted", adapter.publish_eviction(&session).await),
    };

    match result {
        Ok(()) => {}
        Err(e @ Error::UnknownSession { .. }) => {
            debug!("Dropped {} for {}: {}", kind, endpoint, e);
        }
        // Already logged when the publish failed
        Err(Error::Sink { .. }) => {}
        Err(e) => {
            warn!("Failed to handle {} for {}: {}", kind, endpoint, e);
        }
    }
}
