//! Long-running workers and the supervisor that keeps them connected.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use aurasign_events::{BrokerError, BrokerSession};

pub mod stage_worker;
pub mod supervisor;

pub use stage_worker::{DEFAULT_PREFETCH, StageContext, StageWorker, WorkerStats};
pub use supervisor::{
    ConnectionSupervisor, DEFAULT_RECONNECT_BACKOFF, SupervisorConfig, SupervisorHandle,
    SupervisorStats,
};

/// Work that runs on top of one broker session.
///
/// `run` returns `Ok(())` only when shutdown was requested. Any `Err` means the
/// session is unusable and the supervisor should reconnect.
#[async_trait]
pub trait SessionWorker: Send + Sync {
    fn name(&self) -> String;

    async fn run(
        &self,
        session: Arc<dyn BrokerSession>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BrokerError>;
}

#[async_trait]
impl<W> SessionWorker for Arc<W>
where
    W: SessionWorker + ?Sized,
{
    fn name(&self) -> String {
        (**self).name()
    }

    async fn run(
        &self,
        session: Arc<dyn BrokerSession>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BrokerError> {
        (**self).run(session, shutdown).await
    }
}

/// Resolves once shutdown is requested. A dropped sender counts as a request.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
