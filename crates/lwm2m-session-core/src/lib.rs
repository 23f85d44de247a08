// # lwm2m-session-core
//
// Device-session and observation-event core for LWM2M servers.
//
// ## Architecture Overview
//
// The protocol engine (CoAP transport, registration and observe handling)
// reports what happens through callbacks. This library turns those
// callbacks into an ordered stream of device events:
// - **CallbackSource**: Trait for the engine's callback stream
// - **SessionRegistry**: Authoritative map of live device sessions
// - **PresenceTracker**: Edge-triggered sleeping/awake state
// - **ObservationRouter**: Observation ids → logical resource paths, with reordering
// - **ServerEventAdapter**: Callback → registry/router → EventSink glue
// - **SessionDispatcher**: Per-session workers and the stale-session sweep
// - **EventSink**: Trait for the downstream consumer
//
// ## Design Principles
//
// 1. **Per-session order**: Callbacks of one device are handled in engine order
// 2. **No global lock**: Registry and router are sharded maps
// 3. **Cascading removal**: An observation never outlives its session
// 4. **Races are not errors**: Late notifications are discarded and logged
// 5. **Library-First**: The daemon is a thin wrapper around this crate

pub mod adapter;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod observation;
pub mod presence;
pub mod session;
pub mod sink;
pub mod source;
pub mod traits;

// Re-export core types for convenience
pub use adapter::ServerEventAdapter;
pub use codec::{LogicalPath, ObjectVersions, RawPath};
pub use config::{CoreConfig, ObservationConfig, SessionConfig, SinkConfig};
pub use dispatcher::SessionDispatcher;
pub use error::{Error, Result};
pub use observation::{
    DiscardReason, Notification, NotificationEvent, NotificationOutcome, Observation,
    ObservationRouter, Payload,
};
pub use presence::{Presence, PresenceChange, PresenceTracker};
pub use session::{LifecycleState, Session, SessionId, SessionRegistry};
pub use sink::{ChannelEventSink, JsonLinesEventSink, MemoryEventSink, SinkRegistry};
pub use source::ChannelCallbackSource;
pub use traits::{
    Ack, CallbackSource, DeviceEvent, EngineCallback, EventKind, EventSink, ObservationId,
    ObservationInfo, ObserveResponse, Registration, RemovalReason,
};
