// # Memory Event Sink
//
// In-memory implementation of EventSink.
//
// ## Purpose
//
// Keeps every published event in a Vec. Useful for embedding the core in a
// process that polls events, and for tests asserting on the exact event
// sequence.
//
// ## Delivery
//
// - Publishing never fails
// - Events are kept in publish order
// - Nothing survives a restart

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::SinkConfig;
use crate::traits::event_sink::{Ack, DeviceEvent, EventSink, EventSinkFactory};
use crate::Error;

/// In-memory event sink
///
/// Clones share the same buffer, so a test can keep one handle and give
/// another to the adapter.
///
/// # Example
///
/// ```rust,no_run
/// use lwm2m_session_core::sink::MemoryEventSink;
/// use lwm2m_session_core::{CoreConfig, ServerEventAdapter};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let sink = MemoryEventSink::new();
/// let adapter = ServerEventAdapter::new(&CoreConfig::new(), Arc::new(sink.clone()))?;
/// # let _ = adapter;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryEventSink {
    inner: Arc<RwLock<Vec<DeviceEvent>>>,
}

impl MemoryEventSink {
    /// Create a new empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all published events
    pub async fn events(&self) -> Vec<DeviceEvent> {
        self.inner.read().await.clone()
    }

    /// Names of all published event kinds, in order
    pub async fn kinds(&self) -> Vec<&'static str> {
        self.inner
            .read()
            .await
            .iter()
            .map(|event| event.kind.name())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Drop all recorded events
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, event: &DeviceEvent) -> Result<Ack, Error> {
        self.inner.write().await.push(event.clone());
        Ok(Ack)
    }

    fn sink_name(&self) -> &'static str {
        "memory"
    }
}

/// Factory for creating MemoryEventSink instances
pub struct MemoryEventSinkFactory;

impl EventSinkFactory for MemoryEventSinkFactory {
    fn create(&self, _config: &SinkConfig) -> Result<Arc<dyn EventSink>, Error> {
        Ok(Arc::new(MemoryEventSink::new()))
    }
}
