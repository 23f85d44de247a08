// # lwm2m-bridge - LWM2M Session Daemon
//
// Thin integration layer around lwm2m-session-core. All session, presence
// and observation logic lives in the core; this binary only wires it up.
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Building the event sink from the sink registry
// 4. Feeding engine callbacks from stdin through the dispatcher
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Sessions
// - `LWM2M_SESSION_LIFETIME_SECS`: Lifetime for registrations without one (default 86400)
// - `LWM2M_EXPIRY_GRACE_SECS`: Grace past the lifetime before expiry (default 30)
// - `LWM2M_SWEEP_INTERVAL_SECS`: Stale-session sweep interval (default 10)
// - `LWM2M_MAX_SESSIONS`: Live session limit (default 10000)
//
// ### Observations
// - `LWM2M_REORDER_WINDOW`: Out-of-order notifications held per observation (default 8)
// - `LWM2M_REORDER_HOLD_MS`: Longest wait for a missing notification (default 2000)
// - `LWM2M_DEFAULT_OBJECT_VERSION`: Version for unannounced objects (default 1.0, `none` for strict)
// - `LWM2M_PUBLISH_LIFECYCLE`: Publish observation started/cancelled events (default false)
//
// ### Sink
// - `LWM2M_SINK_TYPE`: stdout, file or memory (default stdout)
// - `LWM2M_SINK_PATH`: Output file (for file sink)
//
// ### Logging
// - `LWM2M_LOG_LEVEL`: trace, debug, info, warn, error (default info); logs go to stderr
//
// ## Example
//
// ```bash
// export LWM2M_SINK_TYPE=file
// export LWM2M_SINK_PATH=/var/lib/lwm2m/events.jsonl
// lwm2m-engine --emit-callbacks | lwm2m-bridge
// ```

mod stdin_source;

use anyhow::{Context, Result};
use lwm2m_session_core::{
    CoreConfig, ServerEventAdapter, SessionDispatcher, SinkConfig, SinkRegistry,
};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use stdin_source::StdinCallbackSource;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum BridgeExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<BridgeExitCode> for ExitCode {
    fn from(code: BridgeExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    core: CoreConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let mut core = CoreConfig::new();

        if let Some(secs) = parse_var("LWM2M_SESSION_LIFETIME_SECS")? {
            core.sessions.default_lifetime_secs = secs;
        }
        if let Some(secs) = parse_var("LWM2M_EXPIRY_GRACE_SECS")? {
            core.sessions.expiry_grace_secs = secs;
        }
        if let Some(secs) = parse_var("LWM2M_SWEEP_INTERVAL_SECS")? {
            core.sessions.sweep_interval_secs = secs;
        }
        if let Some(max) = parse_var("LWM2M_MAX_SESSIONS")? {
            core.sessions.max_sessions = max;
        }
        if let Some(window) = parse_var("LWM2M_REORDER_WINDOW")? {
            core.observations.reorder_window = window;
        }
        if let Some(hold) = parse_var("LWM2M_REORDER_HOLD_MS")? {
            core.observations.reorder_hold_ms = hold;
        }
        if let Ok(version) = env::var("LWM2M_DEFAULT_OBJECT_VERSION") {
            core.observations.default_object_version = match version.trim() {
                "" | "none" => None,
                version => Some(version.to_string()),
            };
        }
        if let Some(publish) = parse_var("LWM2M_PUBLISH_LIFECYCLE")? {
            core.observations.publish_lifecycle = publish;
        }

        let sink_type = env::var("LWM2M_SINK_TYPE").unwrap_or_else(|_| "stdout".to_string());
        core.sink = match sink_type.as_str() {
            "stdout" => SinkConfig::Stdout,
            "memory" => SinkConfig::Memory,
            "file" => SinkConfig::File {
                path: env::var("LWM2M_SINK_PATH").context(
                    "LWM2M_SINK_PATH is required when LWM2M_SINK_TYPE=file. \
                    Set it via: export LWM2M_SINK_PATH=/var/lib/lwm2m/events.jsonl",
                )?,
            },
            other => anyhow::bail!(
                "LWM2M_SINK_TYPE '{}' is not supported. \
                Supported types: stdout, file, memory",
                other
            ),
        };

        Ok(Self {
            core,
            log_level: env::var("LWM2M_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.core.validate()?;

        if let SinkConfig::File { path } = &self.core.sink
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "LWM2M_SINK_PATH parent directory does not exist: {}. \
                Create it first: mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        if !(1..=3600).contains(&self.core.sessions.sweep_interval_secs) {
            anyhow::bail!(
                "LWM2M_SWEEP_INTERVAL_SECS must be between 1 and 3600 seconds. Got: {}",
                self.core.sessions.sweep_interval_secs
            );
        }

        if self.core.observations.reorder_window > 1024 {
            anyhow::bail!(
                "LWM2M_REORDER_WINDOW must be at most 1024. Got: {}",
                self.core.observations.reorder_window
            );
        }

        self.level()?;
        Ok(())
    }

    fn level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "LWM2M_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }
}

/// Read and parse an optional environment variable
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} has an invalid value: '{}'", name, value)),
        Err(_) => Ok(None),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return BridgeExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return BridgeExitCode::ConfigError.into();
    }

    // Initialize tracing; stdout may carry the event stream
    let log_level = config.level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return BridgeExitCode::ConfigError.into();
    }

    info!("Starting lwm2m-bridge");
    info!(
        "Sink: {}, reorder window: {}, max sessions: {}",
        config.core.sink.type_name(),
        config.core.observations.reorder_window,
        config.core.sessions.max_sessions
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return BridgeExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            BridgeExitCode::RuntimeError
        } else {
            BridgeExitCode::CleanShutdown
        }
    });

    // A blocking stdin read must not hold up process exit
    rt.shutdown_timeout(Duration::from_secs(1));

    result.into()
}

/// Run the daemon until stdin closes or a shutdown signal arrives
async fn run_daemon(config: Config) -> Result<()> {
    let registry = SinkRegistry::with_builtin();
    let sink = registry
        .create_sink(&config.core.sink)
        .context("Failed to create event sink")?;

    let adapter = Arc::new(ServerEventAdapter::new(&config.core, sink)?);
    let dispatcher = SessionDispatcher::new(
        adapter,
        Box::new(StdinCallbackSource),
        &config.core.sessions,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let signals = tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => {
                info!("Received shutdown signal: {}", signal);
                let _ = shutdown_tx.send(());
            }
            Err(e) => {
                error!("Shutdown signal handling unavailable: {:#}", e);
                // Dropping the sender would stop the dispatcher
                let _sender = shutdown_tx;
                std::future::pending::<()>().await;
            }
        }
    });

    info!("Reading engine callbacks from stdin");
    let result = dispatcher.run_with_shutdown(Some(shutdown_rx)).await;
    signals.abort();

    result?;
    info!("Shutting down daemon");
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(signal)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
