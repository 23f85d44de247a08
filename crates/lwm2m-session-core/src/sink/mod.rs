// # Event Sink Implementations
//
// Implementations of the EventSink trait for different delivery targets,
// plus the factory registry used to build one from configuration.

pub mod channel;
pub mod json_lines;
pub mod memory;
pub mod registry;

pub use channel::ChannelEventSink;
pub use json_lines::{FileEventSinkFactory, JsonLinesEventSink, StdoutEventSinkFactory};
pub use memory::{MemoryEventSink, MemoryEventSinkFactory};
pub use registry::SinkRegistry;
