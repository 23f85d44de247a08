//! Core traits for the session core
//!
//! This module defines the abstract interfaces toward the outside world.
//!
//! - [`CallbackSource`]: Callbacks from the LWM2M protocol engine
//! - [`EventSink`]: Events toward the downstream consumer

pub mod callback_source;
pub mod event_sink;

pub use callback_source::{
    CallbackSource, EngineCallback, ObservationId, ObservationInfo, ObserveResponse, Registration,
};
pub use event_sink::{Ack, DeviceEvent, EventKind, EventSink, EventSinkFactory, RemovalReason};
