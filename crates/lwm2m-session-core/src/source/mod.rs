//! In-process callback source
//!
//! [`ChannelCallbackSource`] lets an engine running in the same process push
//! callbacks through an unbounded channel. Dropping every sender ends the
//! stream, which stops the dispatcher once in-flight work has drained.

use crate::traits::{CallbackSource, EngineCallback};
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::warn;

/// Callback source fed through a tokio channel
pub struct ChannelCallbackSource {
    rx: Mutex<Option<mpsc::UnboundedReceiver<EngineCallback>>>,
}

impl ChannelCallbackSource {
    /// Create a source and the sender the engine pushes callbacks into
    pub fn new() -> (Self, mpsc::UnboundedSender<EngineCallback>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl CallbackSource for ChannelCallbackSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = EngineCallback> + Send + 'static>> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match rx {
            Some(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
            None => {
                warn!("Channel callback source already watched, returning an empty stream");
                Box::pin(tokio_stream::empty())
            }
        }
    }

    fn source_name(&self) -> &'static str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Registration;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_stream_ends_when_senders_drop() {
        let (source, tx) = ChannelCallbackSource::new();
        let mut stream = source.watch();

        tx.send(EngineCallback::Updated {
            registration: Registration::new("dev-1", "r1"),
        })
        .unwrap();
        drop(tx);

        assert_eq!(stream.next().await.map(|c| c.kind()), Some("updated"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_second_watch_is_empty() {
        let (source, _tx) = ChannelCallbackSource::new();
        let _first = source.watch();
        let mut second = source.watch();
        assert!(second.next().await.is_none());
    }
}
