//! Session dispatcher
//!
//! The dispatcher drives the core from a [`CallbackSource`]:
//! - Routes every callback to the worker of the session it belongs to
//! - Sweeps on a fixed interval: expires stale sessions, releases
//!   notifications held past the reorder hold time, retires idle workers
//! - Hands sessions evicted at capacity to their own worker
//! - Drains all workers and flushes the sink on shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐
//! │ CallbackSource │─── EngineCallback ───┐
//! └────────────────┘                      │
//!                                         ▼
//!                              ┌───────────────────┐   sweep tick
//!                              │ SessionDispatcher │◄──────────────
//!                              └───────────────────┘
//!                                         │ per endpoint
//!              ┌──────────────────────────┼──────────────────────────┐
//!              ▼                          ▼                          ▼
//!      ┌──────────────┐           ┌──────────────┐           ┌──────────────┐
//!      │ worker dev-1 │           │ worker dev-2 │           │ worker dev-n │
//!      └──────────────┘           └──────────────┘           └──────────────┘
//!              └───────────── ServerEventAdapter ─► EventSink ───────┘
//! ```
//!
//! ## Ordering
//!
//! Callbacks of one endpoint are handled strictly in the order the source
//! produced them. Nothing is ordered across endpoints.

mod worker;

use crate::adapter::ServerEventAdapter;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::traits::CallbackSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use worker::WorkerSet;

/// Runs the core against a callback source
pub struct SessionDispatcher {
    adapter: Arc<ServerEventAdapter>,
    source: Box<dyn CallbackSource>,
    sweep_interval: Duration,
}

impl SessionDispatcher {
    /// Create a dispatcher
    ///
    /// # Parameters
    ///
    /// - `adapter`: The core every callback is handed to
    /// - `source`: Where callbacks come from
    /// - `config`: Session configuration (sweep interval)
    pub fn new(
        adapter: Arc<ServerEventAdapter>,
        source: Box<dyn CallbackSource>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            adapter,
            source,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
        }
    }

    pub fn adapter(&self) -> &Arc<ServerEventAdapter> {
        &self.adapter
    }

    /// Run until the source closes or SIGINT is received
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: The final sink flush failed
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run until the source closes or `shutdown_rx` fires
    ///
    /// Intended for tests and embedding applications that manage their own
    /// shutdown; the daemon uses [`SessionDispatcher::run`].
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        info!(
            "Dispatching callbacks from {} to {}",
            self.source.source_name(),
            self.adapter.sink().sink_name()
        );

        let mut callbacks = self.source.watch();
        let (evictions_tx, mut evictions) = mpsc::unbounded_channel();
        let mut workers = WorkerSet::new(self.adapter.clone(), evictions_tx);

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        sweep.tick().await;

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("Unable to listen for shutdown signal: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                callback = callbacks.next() => match callback {
                    Some(callback) => workers.dispatch(callback),
                    None => {
                        info!("Callback source {} closed", self.source.source_name());
                        break;
                    }
                },

                Some(evicted) = evictions.recv() => {
                    workers.evict(evicted);
                }

                _ = sweep.tick() => {
                    workers.sweep(chrono::Utc::now());
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("Draining {} session worker(s)", workers.len());
        workers.shutdown().await;

        // Evictions reported while draining; every worker is gone now
        while let Some(evicted) = evictions.recv().await {
            let _ = self.adapter.publish_eviction(&evicted).await;
        }

        self.adapter.sink().flush().await?;
        info!("Sink flushed, dispatcher stopped");

        Ok(())
    }
}
