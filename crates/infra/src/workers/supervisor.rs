use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use aurasign_events::{BrokerConnector, BrokerError};

use super::{SessionWorker, wait_for_shutdown};

pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Fixed wait between a failed session and the next connect attempt.
    pub backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }
}

impl SupervisorConfig {
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Supervisor runtime statistics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SupervisorStats {
    pub connect_attempts: u64,
    pub sessions_started: u64,
    pub session_failures: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Counters {
    connect_attempts: AtomicU64,
    sessions_started: AtomicU64,
    session_failures: AtomicU64,
    started_at: DateTime<Utc>,
}

impl Counters {
    fn new() -> Self {
        Self {
            connect_attempts: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            session_failures: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    fn snapshot(&self) -> SupervisorStats {
        SupervisorStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            session_failures: self.session_failures.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }
}

/// Keeps a [`SessionWorker`] connected for the life of the process.
///
/// Loop: connect → run the worker on the session → on any failure wait a
/// fixed backoff → repeat. Startup failures take the same path; there is no
/// retry limit. In-flight state is the broker's concern: unacked deliveries
/// come back after reconnect.
///
/// Shutdown interrupts a connect attempt or backoff immediately. A message
/// already being handled is finished first.
pub struct ConnectionSupervisor<C, W> {
    connector: C,
    worker: W,
    config: SupervisorConfig,
}

/// Handle to stop and join a running supervisor.
#[derive(Debug)]
pub struct SupervisorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl SupervisorHandle {
    pub fn stats(&self) -> SupervisorStats {
        self.counters.snapshot()
    }

    /// Request graceful shutdown and wait for the supervisor to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            warn!(error = %err, "supervisor task did not stop cleanly");
        }
    }
}

impl<C, W> ConnectionSupervisor<C, W>
where
    C: BrokerConnector + 'static,
    W: SessionWorker + 'static,
{
    pub fn new(connector: C, worker: W, config: SupervisorConfig) -> Self {
        Self {
            connector,
            worker,
            config,
        }
    }

    /// Run on a background task.
    pub fn spawn(self) -> SupervisorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(Counters::new());
        let join = tokio::spawn(self.run_with(shutdown_rx, counters.clone()));

        SupervisorHandle {
            shutdown: shutdown_tx,
            join,
            counters,
        }
    }

    /// Run on the current task until `shutdown` flips to `true` (or its sender drops).
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> SupervisorStats {
        let counters = Arc::new(Counters::new());
        self.run_with(shutdown, counters.clone()).await;
        counters.snapshot()
    }

    async fn run_with(self, mut shutdown: watch::Receiver<bool>, counters: Arc<Counters>) {
        let name = self.worker.name();
        info!(worker = %name, "supervisor started");

        loop {
            counters.connect_attempts.fetch_add(1, Ordering::Relaxed);

            let connected = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                connected = self.connector.connect() => connected,
            };

            let result = match connected {
                Ok(session) => {
                    counters.sessions_started.fetch_add(1, Ordering::Relaxed);
                    info!(worker = %name, "broker session established");
                    let result = self.worker.run(session.clone(), &mut shutdown).await;
                    if let Err(err) = session.close().await {
                        warn!(worker = %name, error = %err, "closing broker session failed");
                    }
                    result
                }
                Err(err) => Err(err),
            };

            match result {
                Ok(()) => break,
                Err(err) => self.record_failure(&name, &counters, &err),
            }

            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = tokio::time::sleep(self.config.backoff) => {}
            }
        }

        info!(worker = %name, "supervisor stopped");
    }

    fn record_failure(&self, name: &str, counters: &Counters, err: &BrokerError) {
        counters.session_failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            worker = %name,
            error = %err,
            backoff_ms = self.config.backoff.as_millis() as u64,
            "broker session failed; reconnecting after backoff"
        );
    }
}
