// # JSON Lines Event Sink
//
// Writes every event as one line of JSON to stdout or a file.
//
// ## Format
//
// ```json
// {"session_id":"9b2f…","endpoint":"dev-1","timestamp":"2026-01-09T12:00:00Z","type":"resource_updated","path":"/3_1.0/0/9","payload":87,"sequence":2}
// ```
//
// ## Delivery
//
// - Each publish writes and flushes one complete line before returning
// - Files are opened in append mode and never truncated
// - A failed write is reported as `Error::Sink`; the line may be partial

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::config::SinkConfig;
use crate::traits::event_sink::{Ack, DeviceEvent, EventSink, EventSinkFactory};
use crate::Error;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Newline-delimited JSON event sink
pub struct JsonLinesEventSink {
    writer: Mutex<Writer>,
    name: &'static str,
}

impl JsonLinesEventSink {
    /// Write events to stdout
    pub fn stdout() -> Self {
        Self::from_writer(tokio::io::stdout(), "stdout")
    }

    /// Append events to a file, creating it if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self::from_writer(tokio::fs::File::from_std(file), "file"))
    }

    /// Write events to any async writer
    pub fn from_writer(writer: impl AsyncWrite + Send + Unpin + 'static, name: &'static str) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer) as Writer),
            name,
        }
    }
}

#[async_trait]
impl EventSink for JsonLinesEventSink {
    async fn publish(&self, event: &DeviceEvent) -> Result<Ack, Error> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| Error::sink(self.name, e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::sink(self.name, e.to_string()))?;
        Ok(Ack)
    }

    async fn flush(&self) -> Result<(), Error> {
        self.writer.lock().await.flush().await?;
        Ok(())
    }

    fn sink_name(&self) -> &'static str {
        self.name
    }
}

/// Factory for the stdout sink
pub struct StdoutEventSinkFactory;

impl EventSinkFactory for StdoutEventSinkFactory {
    fn create(&self, _config: &SinkConfig) -> Result<Arc<dyn EventSink>, Error> {
        Ok(Arc::new(JsonLinesEventSink::stdout()))
    }
}

/// Factory for the file sink
pub struct FileEventSinkFactory;

impl EventSinkFactory for FileEventSinkFactory {
    fn create(&self, config: &SinkConfig) -> Result<Arc<dyn EventSink>, Error> {
        match config {
            SinkConfig::File { path } => Ok(Arc::new(JsonLinesEventSink::open(path)?)),
            other => Err(Error::config(format!(
                "File sink factory cannot build a {} sink",
                other.type_name()
            ))),
        }
    }
}
