//! Configuration types for the session core
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};

/// Main session core configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Session lifecycle settings
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Observation routing settings
    #[serde(default)]
    pub observations: ObservationConfig,

    /// Downstream event sink
    #[serde(default)]
    pub sink: SinkConfig,
}

impl CoreConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.sessions.validate()?;
        self.observations.validate()?;
        self.sink.validate()?;
        Ok(())
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lifetime applied when a registration does not carry one (in seconds)
    ///
    /// LWM2M clients default to 86400 seconds.
    #[serde(default = "default_lifetime_secs")]
    pub default_lifetime_secs: u64,

    /// Extra time past the lifetime before a silent session is expired (in seconds)
    #[serde(default = "default_expiry_grace_secs")]
    pub expiry_grace_secs: u64,

    /// Interval of the stale-session sweep (in seconds)
    ///
    /// The sweep runs on its own timer, independent of callback traffic.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Maximum number of live sessions
    ///
    /// Registering a new endpoint at capacity evicts the least recently
    /// seen session.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl SessionConfig {
    /// Validate the session configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.default_lifetime_secs == 0 {
            return Err(crate::Error::config("Default session lifetime must be > 0"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(crate::Error::config("Sweep interval must be > 0"));
        }
        if self.max_sessions == 0 {
            return Err(crate::Error::config("Max sessions must be > 0"));
        }
        Ok(())
    }

    /// Default lifetime as a chrono duration
    pub fn default_lifetime(&self) -> chrono::Duration {
        crate::session::duration_secs(self.default_lifetime_secs)
    }

    /// Expiry grace as a chrono duration
    pub fn expiry_grace(&self) -> chrono::Duration {
        crate::session::duration_secs(self.expiry_grace_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_lifetime_secs: default_lifetime_secs(),
            expiry_grace_secs: default_expiry_grace_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Observation routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationConfig {
    /// Maximum number of out-of-order notifications held per observation
    ///
    /// When the buffer overflows, the lowest pending notification is
    /// released and the gap before it is skipped. Zero disables reordering.
    #[serde(default = "default_reorder_window")]
    pub reorder_window: usize,

    /// Longest time a notification waits in the reorder buffer (in milliseconds)
    ///
    /// Once exceeded, the gap before it is given up and the buffer is
    /// released on the next sweep.
    #[serde(default = "default_reorder_hold_ms")]
    pub reorder_hold_ms: u64,

    /// Object version assumed for objects absent from a registration
    ///
    /// `None` makes path resolution strict: observing an object the device
    /// did not announce leaves the observation unresolved.
    #[serde(default = "default_object_version")]
    pub default_object_version: Option<String>,

    /// Publish `ObservationStarted` / `ObservationCancelled` events
    #[serde(default = "default_publish_lifecycle")]
    pub publish_lifecycle: bool,
}

impl ObservationConfig {
    /// Validate the observation configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if let Some(version) = &self.default_object_version {
            crate::codec::validate_version(version).map_err(|_| {
                crate::Error::config(format!("Invalid default object version: {}", version))
            })?;
        }
        Ok(())
    }

    /// Reorder hold time as a chrono duration
    pub fn reorder_hold(&self) -> chrono::Duration {
        i64::try_from(self.reorder_hold_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            reorder_window: default_reorder_window(),
            reorder_hold_ms: default_reorder_hold_ms(),
            default_object_version: default_object_version(),
            publish_lifecycle: default_publish_lifecycle(),
        }
    }
}

/// Event sink configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// In-memory sink (not delivered anywhere)
    #[default]
    Memory,

    /// Newline-delimited JSON on stdout
    Stdout,

    /// Newline-delimited JSON appended to a file
    File {
        /// Path to the output file
        path: String,
    },

    /// Custom sink
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl SinkConfig {
    /// Validate the sink configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            SinkConfig::File { path } => {
                if path.is_empty() {
                    return Err(crate::Error::config("File sink path cannot be empty"));
                }
                Ok(())
            }
            SinkConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom sink factory cannot be empty"));
                }
                Ok(())
            }
            SinkConfig::Memory | SinkConfig::Stdout => Ok(()),
        }
    }

    /// Get the sink type name
    pub fn type_name(&self) -> &str {
        match self {
            SinkConfig::Memory => "memory",
            SinkConfig::Stdout => "stdout",
            SinkConfig::File { .. } => "file",
            SinkConfig::Custom { factory, .. } => factory,
        }
    }
}

fn default_lifetime_secs() -> u64 {
    86_400
}

fn default_expiry_grace_secs() -> u64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    10
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_reorder_window() -> usize {
    8
}

fn default_reorder_hold_ms() -> u64 {
    2_000
}

fn default_object_version() -> Option<String> {
    Some(crate::codec::DEFAULT_OBJECT_VERSION.to_string())
}

fn default_publish_lifecycle() -> bool {
    false
}
