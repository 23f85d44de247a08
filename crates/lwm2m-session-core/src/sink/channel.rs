//! Channel event sink
//!
//! Hands events to a bounded tokio mpsc channel. A full channel makes
//! `publish` wait, so a slow consumer applies backpressure to the session
//! workers; a dropped receiver makes every publish fail.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::event_sink::{Ack, DeviceEvent, EventSink};
use crate::Error;

/// Event sink backed by a bounded channel
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<DeviceEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver its events arrive on
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DeviceEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn publish(&self, event: &DeviceEvent) -> Result<Ack, Error> {
        self.tx
            .send(event.clone())
            .await
            .map(|_| Ack)
            .map_err(|_| Error::sink(self.sink_name(), "receiver dropped"))
    }

    fn sink_name(&self) -> &'static str {
        "channel"
    }
}
