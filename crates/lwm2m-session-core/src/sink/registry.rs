//! Plugin-based sink registry
//!
//! Maps sink type names to factories so the daemon (or an embedding
//! application) can build its sink from configuration.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lwm2m_session_core::sink::SinkRegistry;
//! use lwm2m_session_core::config::SinkConfig;
//!
//! let registry = SinkRegistry::with_builtin();
//! registry.register_sink("kafka", Box::new(KafkaSinkFactory));
//!
//! let sink = registry.create_sink(&SinkConfig::Stdout)?;
//! ```

use crate::config::SinkConfig;
use crate::error::{Error, Result};
use crate::traits::{EventSink, EventSinkFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::json_lines::{FileEventSinkFactory, StdoutEventSinkFactory};
use super::memory::MemoryEventSinkFactory;

/// Registry of event sink factories
///
/// ## Thread Safety
///
/// Interior mutability with RwLock: concurrent lookups, exclusive
/// registration.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: RwLock<HashMap<String, Box<dyn EventSinkFactory>>>,
}

impl SinkRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the memory, stdout and file sinks registered
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register_sink("memory", Box::new(MemoryEventSinkFactory));
        registry.register_sink("stdout", Box::new(StdoutEventSinkFactory));
        registry.register_sink("file", Box::new(FileEventSinkFactory));
        registry
    }

    /// Register a sink factory
    ///
    /// # Parameters
    ///
    /// - `name`: Sink type name (e.g., "stdout", "kafka")
    /// - `factory`: Factory object for creating sink instances
    pub fn register_sink(&self, name: impl Into<String>, factory: Box<dyn EventSinkFactory>) {
        let mut sinks = self.sinks.write().unwrap_or_else(PoisonError::into_inner);
        sinks.insert(name.into(), factory);
    }

    /// Create a sink from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn EventSink>)`: Created sink
    /// - `Err(Error)`: Unknown sink type or creation failed
    pub fn create_sink(&self, config: &SinkConfig) -> Result<Arc<dyn EventSink>> {
        config.validate()?;

        let sink_type = config.type_name();
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        let factory = sinks
            .get(sink_type)
            .ok_or_else(|| Error::config(format!("Unknown sink type: {}", sink_type)))?;

        factory.create(config)
    }

    /// List all registered sink types
    pub fn list_sinks(&self) -> Vec<String> {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        sinks.keys().cloned().collect()
    }

    /// Check if a sink type is registered
    pub fn has_sink(&self, name: &str) -> bool {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        sinks.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingFactory;

    impl EventSinkFactory for FailingFactory {
        fn create(&self, _config: &SinkConfig) -> Result<Arc<dyn EventSink>> {
            Err(Error::config("not available"))
        }
    }

    #[test]
    fn test_builtin_sinks() {
        let registry = SinkRegistry::with_builtin();
        assert!(registry.has_sink("memory"));
        assert!(registry.has_sink("stdout"));
        assert!(registry.has_sink("file"));

        let sink = registry.create_sink(&SinkConfig::Memory).unwrap();
        assert_eq!(sink.sink_name(), "memory");
    }

    #[test]
    fn test_custom_registration() {
        let registry = SinkRegistry::new();
        assert!(!registry.has_sink("kafka"));

        registry.register_sink("kafka", Box::new(FailingFactory));
        assert!(registry.list_sinks().contains(&"kafka".to_string()));

        let config = SinkConfig::Custom {
            factory: "kafka".to_string(),
            config: serde_json::json!({}),
        };
        assert!(registry.create_sink(&config).is_err());
    }

    #[test]
    fn test_unknown_type() {
        let registry = SinkRegistry::new();
        let err = registry.create_sink(&SinkConfig::Stdout).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
