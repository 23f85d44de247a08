//! Callback source reading newline-delimited JSON from stdin
//!
//! Each line is one serialized `EngineCallback`:
//!
//! ```json
//! {"event":"registered","registration":{"endpoint":"dev-1","registration_id":"r1"}}
//! ```
//!
//! Blank lines are skipped. Lines that do not parse are logged and skipped.
//! End of input ends the stream.

use lwm2m_session_core::{CallbackSource, EngineCallback};
use std::pin::Pin;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, warn};

/// Engine callbacks piped in on stdin
pub struct StdinCallbackSource;

impl CallbackSource for StdinCallbackSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = EngineCallback> + Send + 'static>> {
        let lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
        let callbacks = lines
            .map_while(|line| match line {
                Ok(line) => Some(line),
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    None
                }
            })
            .filter_map(|line| parse_line(&line));
        Box::pin(callbacks)
    }

    fn source_name(&self) -> &'static str {
        "stdin"
    }
}

/// Parse one input line
fn parse_line(line: &str) -> Option<EngineCallback> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(callback) => Some(callback),
        Err(e) => {
            warn!("Skipping invalid callback line: {}", e);
            None
        }
    }
}
