//! Test doubles and common utilities for contract tests
//!
//! Provides a recording sink with controllable failure, callback builders
//! and a minimal configuration.

#![allow(dead_code)]

use async_trait::async_trait;
use lwm2m_session_core::config::CoreConfig;
use lwm2m_session_core::{
    Ack, DeviceEvent, EngineCallback, Error, EventKind, EventSink, ObservationId, ObservationInfo,
    ObserveResponse, Registration, ServerEventAdapter,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// An EventSink that records every accepted event
///
/// Can be switched into failure mode to simulate an unavailable downstream.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<DeviceEvent>>>,
    attempts: Arc<AtomicUsize>,
    flushes: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    delay: Option<Duration>,
    delayed_kind: Option<&'static str>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that sleeps before accepting each event
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// A sink that sleeps before accepting events of one kind only
    pub fn with_delay_on(kind: &'static str, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            delayed_kind: Some(kind),
            ..Self::default()
        }
    }

    /// Make subsequent publishes fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Accepted events of one endpoint
    pub fn events_for(&self, endpoint: &str) -> Vec<DeviceEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.endpoint == endpoint)
            .collect()
    }

    /// Kind names of all accepted events, in order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|event| event.kind.name()).collect()
    }

    pub fn kinds_for(&self, endpoint: &str) -> Vec<&'static str> {
        self.events_for(endpoint)
            .iter()
            .map(|event| event.kind.name())
            .collect()
    }

    /// Sequences of all accepted ResourceUpdated events
    pub fn published_sequences(&self) -> Vec<u64> {
        self.events()
            .iter()
            .filter_map(|event| match event.kind {
                EventKind::ResourceUpdated { sequence, .. } => Some(sequence),
                _ => None,
            })
            .collect()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, event: &DeviceEvent) -> Result<Ack, Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay
            && self.delayed_kind.is_none_or(|kind| kind == event.kind.name())
        {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::sink("recording", "downstream unavailable"));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(Ack)
    }

    async fn flush(&self) -> Result<(), Error> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sink_name(&self) -> &'static str {
        "recording"
    }
}

/// Minimal configuration for tests
pub fn test_config() -> CoreConfig {
    let mut config = CoreConfig::new();
    config.sessions.expiry_grace_secs = 0;
    config.sessions.sweep_interval_secs = 1;
    config.observations.reorder_window = 4;
    config
}

/// Test configuration that also publishes observation start/cancel events
pub fn lifecycle_config() -> CoreConfig {
    let mut config = test_config();
    config.observations.publish_lifecycle = true;
    config
}

/// Build an adapter publishing into `sink`
pub fn adapter_with(config: &CoreConfig, sink: &RecordingSink) -> ServerEventAdapter {
    ServerEventAdapter::new(config, Arc::new(sink.clone())).expect("valid test config")
}

/// A registration announcing the device object
pub fn device(endpoint: &str, registration_id: &str) -> Registration {
    Registration::new(endpoint, registration_id)
        .with_object_links("</1>;ver=1.1,</3/0>")
        .expect("valid object links")
}

pub fn registered(registration: &Registration) -> EngineCallback {
    EngineCallback::Registered {
        registration: registration.clone(),
        prior_observations: Vec::new(),
    }
}

pub fn updated(registration: &Registration) -> EngineCallback {
    EngineCallback::Updated {
        registration: registration.clone(),
    }
}

pub fn unregistered(registration: &Registration) -> EngineCallback {
    EngineCallback::Unregistered {
        registration: registration.clone(),
        observations: Vec::new(),
    }
}

pub fn sleeping(registration: &Registration) -> EngineCallback {
    EngineCallback::Sleeping {
        registration: registration.clone(),
    }
}

pub fn awake(registration: &Registration) -> EngineCallback {
    EngineCallback::Awake {
        registration: registration.clone(),
    }
}

pub fn observe(registration: &Registration, id: &str, path: &str) -> EngineCallback {
    EngineCallback::NewObservation {
        observation: ObservationInfo::new(id, path),
        registration: registration.clone(),
    }
}

pub fn cancel(id: &str) -> EngineCallback {
    EngineCallback::ObservationCancelled {
        observation_id: ObservationId::new(id),
    }
}

/// A 2.05 notification with an observe sequence number
pub fn notify(registration: &Registration, id: &str, sequence: u64, value: i64) -> EngineCallback {
    EngineCallback::ObservationResponse {
        observation_id: ObservationId::new(id),
        registration: Some(registration.clone()),
        response: ObserveResponse::content(serde_json::json!(value)).with_sequence(sequence),
    }
}

pub fn observation_error(registration: &Registration, id: &str, cause: &str) -> EngineCallback {
    EngineCallback::ObservationError {
        observation_id: ObservationId::new(id),
        registration: Some(registration.clone()),
        cause: cause.to_string(),
    }
}

/// Poll until `condition` holds or the timeout expires
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
