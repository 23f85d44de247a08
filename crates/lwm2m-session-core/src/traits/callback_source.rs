// # Callback Source Trait
//
// Defines the interface toward the LWM2M protocol engine.
//
// ## Purpose
//
// The engine owns the CoAP transport and the registration/observation
// protocol. It reports what happened through callbacks; this module models
// those callbacks as plain values so they can be queued, replayed, and
// routed to the per-session worker that owns them.
//
// ## Usage
//
// ```rust,ignore
// use lwm2m_session_core::CallbackSource;
// use tokio_stream::StreamExt;
//
// let source = /* CallbackSource implementation */;
// let mut callbacks = source.watch();
// while let Some(callback) = callbacks.next().await {
//     println!("{} for {:?}", callback.kind(), callback.endpoint());
// }
// ```

use crate::codec::{self, ObjectVersions};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use tokio_stream::Stream;

/// Engine-assigned observation identifier (opaque)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationId(String);

impl ObservationId {
    /// Wrap an engine observation id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObservationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The engine's view of one device registration
///
/// This is the session reference every callback carries. The registry
/// matches it against a live session by endpoint and registration id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Device endpoint name (stable device identity)
    pub endpoint: String,

    /// Engine registration id (changes on every full registration)
    pub registration_id: String,

    /// Objects and versions announced by the device
    #[serde(default)]
    pub objects: ObjectVersions,

    /// Registration lifetime in seconds, if the device sent one
    #[serde(default)]
    pub lifetime_secs: Option<u64>,

    /// Whether the device uses queue mode (may sleep)
    #[serde(default)]
    pub queue_mode: bool,

    /// Transport address of the device
    #[serde(default)]
    pub address: Option<String>,
}

impl Registration {
    /// Create a registration with no announced objects
    pub fn new(endpoint: impl Into<String>, registration_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            registration_id: registration_id.into(),
            objects: ObjectVersions::new(),
            lifetime_secs: None,
            queue_mode: false,
            address: None,
        }
    }

    /// Set the announced objects from a CoRE link-format list
    pub fn with_object_links(mut self, links: &str) -> crate::Result<Self> {
        self.objects = codec::parse_object_links(links)?;
        Ok(self)
    }

    /// Set the announced objects
    pub fn with_objects(mut self, objects: ObjectVersions) -> Self {
        self.objects = objects;
        self
    }

    /// Set the registration lifetime
    pub fn with_lifetime(mut self, lifetime_secs: u64) -> Self {
        self.lifetime_secs = Some(lifetime_secs);
        self
    }

    /// Enable or disable queue mode
    pub fn with_queue_mode(mut self, queue_mode: bool) -> Self {
        self.queue_mode = queue_mode;
        self
    }
}

/// A new standing observation reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationInfo {
    /// Engine observation id
    pub id: ObservationId,
    /// Raw observed path, e.g. `/3/0/9`
    pub path: String,
}

impl ObservationInfo {
    pub fn new(id: impl Into<ObservationId>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// An observe response (notification) from a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserveResponse {
    /// CoAP response code as `class * 100 + detail` (205 = 2.05 Content)
    pub code: u16,

    /// Decoded content, if any
    #[serde(default)]
    pub content: Option<serde_json::Value>,

    /// CoAP observe sequence number, if the engine exposes it
    #[serde(default)]
    pub sequence: Option<u64>,
}

impl ObserveResponse {
    /// A 2.05 Content response
    pub fn content(content: serde_json::Value) -> Self {
        Self {
            code: 205,
            content: Some(content),
            sequence: None,
        }
    }

    /// A failure response with the given code
    pub fn failure(code: u16) -> Self {
        Self {
            code,
            content: None,
            sequence: None,
        }
    }

    /// Attach an observe sequence number
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Whether the code is in the 2.xx success class
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Callbacks delivered by the protocol engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineCallback {
    /// Device registered (possibly replacing an earlier registration)
    Registered {
        registration: Registration,
        #[serde(default)]
        prior_observations: Vec<ObservationId>,
    },

    /// Device sent a registration update
    Updated { registration: Registration },

    /// Device deregistered or its registration was removed by the engine
    Unregistered {
        registration: Registration,
        #[serde(default)]
        observations: Vec<ObservationId>,
    },

    /// Queue-mode device went to sleep
    Sleeping { registration: Registration },

    /// Queue-mode device woke up
    Awake { registration: Registration },

    /// Observe relationship established
    NewObservation {
        observation: ObservationInfo,
        registration: Registration,
    },

    /// Observe relationship cancelled
    ObservationCancelled { observation_id: ObservationId },

    /// Notification received
    ObservationResponse {
        observation_id: ObservationId,
        #[serde(default)]
        registration: Option<Registration>,
        response: ObserveResponse,
    },

    /// Notification could not be handled by the engine
    ObservationError {
        observation_id: ObservationId,
        #[serde(default)]
        registration: Option<Registration>,
        cause: String,
    },
}

impl EngineCallback {
    /// Endpoint the callback belongs to, when the callback carries one
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            EngineCallback::Registered { registration, .. }
            | EngineCallback::Updated { registration }
            | EngineCallback::Unregistered { registration, .. }
            | EngineCallback::Sleeping { registration }
            | EngineCallback::Awake { registration }
            | EngineCallback::NewObservation { registration, .. } => Some(&registration.endpoint),
            EngineCallback::ObservationResponse { registration, .. }
            | EngineCallback::ObservationError { registration, .. } => {
                registration.as_ref().map(|r| r.endpoint.as_str())
            }
            EngineCallback::ObservationCancelled { .. } => None,
        }
    }

    /// Observation the callback refers to, if any
    pub fn observation_id(&self) -> Option<&ObservationId> {
        match self {
            EngineCallback::NewObservation { observation, .. } => Some(&observation.id),
            EngineCallback::ObservationCancelled { observation_id }
            | EngineCallback::ObservationResponse { observation_id, .. }
            | EngineCallback::ObservationError { observation_id, .. } => Some(observation_id),
            _ => None,
        }
    }

    /// Whether the callback ends the session it belongs to
    pub fn ends_session(&self) -> bool {
        matches!(self, EngineCallback::Unregistered { .. })
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            EngineCallback::Registered { .. } => "registered",
            EngineCallback::Updated { .. } => "updated",
            EngineCallback::Unregistered { .. } => "unregistered",
            EngineCallback::Sleeping { .. } => "sleeping",
            EngineCallback::Awake { .. } => "awake",
            EngineCallback::NewObservation { .. } => "new_observation",
            EngineCallback::ObservationCancelled { .. } => "observation_cancelled",
            EngineCallback::ObservationResponse { .. } => "observation_response",
            EngineCallback::ObservationError { .. } => "observation_error",
        }
    }
}

/// Trait for engine callback sources
///
/// The source hands out a single stream of callbacks in the order the
/// engine produced them. The stream ending means the engine is gone.
pub trait CallbackSource: Send + Sync {
    /// Stream engine callbacks
    ///
    /// Called once per dispatcher run.
    fn watch(&self) -> Pin<Box<dyn Stream<Item = EngineCallback> + Send + 'static>>;

    /// Source name for logging
    fn source_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_json_shape() {
        let json = r#"{
            "event": "observation_response",
            "observation_id": "7",
            "registration": {"endpoint": "dev-1", "registration_id": "r1"},
            "response": {"code": 205, "content": {"value": 42}, "sequence": 3}
        }"#;
        let callback: EngineCallback = serde_json::from_str(json).unwrap();
        assert_eq!(callback.endpoint(), Some("dev-1"));
        assert_eq!(callback.observation_id(), Some(&ObservationId::new("7")));
        assert_eq!(callback.kind(), "observation_response");

        let EngineCallback::ObservationResponse { response, .. } = callback else {
            panic!("wrong variant");
        };
        assert!(response.is_success());
        assert_eq!(response.sequence, Some(3));
    }

    #[test]
    fn test_cancelled_has_no_endpoint() {
        let callback = EngineCallback::ObservationCancelled {
            observation_id: "7".into(),
        };
        assert_eq!(callback.endpoint(), None);
        assert!(!callback.ends_session());
    }

    #[test]
    fn test_registration_with_links() {
        let registration = Registration::new("dev-1", "r1")
            .with_object_links("</1>;ver=1.1,</3/0>")
            .unwrap()
            .with_lifetime(300);
        assert_eq!(registration.objects.get(1), Some("1.1"));
        assert_eq!(registration.objects.get(3), Some("1.0"));
        assert_eq!(registration.lifetime_secs, Some(300));
    }

    #[test]
    fn test_failure_response() {
        assert!(!ObserveResponse::failure(404).is_success());
    }
}
