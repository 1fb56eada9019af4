use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{Instrument, info, info_span, warn};

use aurasign_core::{PartNotification, StageKind, Validate};
use aurasign_events::{
    BrokerError, BrokerSession, Delivery, JobStateStore, MessageEnvelope, OutboundMessage,
    PIPELINE_EXCHANGE, Topology, routing,
};

use super::{SessionWorker, wait_for_shutdown};
use crate::stages::{Publication, Stage, StageError, StageOutcome};

/// One message in flight per worker instance.
pub const DEFAULT_PREFETCH: u16 = 1;

/// Dependencies shared by every message a worker processes.
///
/// Built once at startup and reused across reconnects.
#[derive(Clone)]
pub struct StageContext {
    pub store: Arc<dyn JobStateStore>,
    pub topology: Topology,
    pub prefetch: u16,
}

impl StageContext {
    pub fn new(store: Arc<dyn JobStateStore>, topology: Topology) -> Self {
        Self {
            store,
            topology,
            prefetch: DEFAULT_PREFETCH,
        }
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub received: u64,
    pub acked: u64,
    pub rejected_malformed: u64,
    pub rejected_capability: u64,
    pub rejected_store: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    acked: AtomicU64,
    rejected_malformed: AtomicU64,
    rejected_capability: AtomicU64,
    rejected_store: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            rejected_malformed: self.rejected_malformed.load(Ordering::Relaxed),
            rejected_capability: self.rejected_capability.load(Ordering::Relaxed),
            rejected_store: self.rejected_store.load(Ordering::Relaxed),
        }
    }
}

/// The consume → process → publish → ack loop for one stage.
///
/// Failure policy:
/// - malformed input, capability failure, store failure: reject without requeue
/// - broker failure (publish, ack, stream): return to the supervisor with the
///   message unacked, so the broker redelivers it after reconnect
pub struct StageWorker<S: Stage> {
    stage: S,
    ctx: StageContext,
    counters: Counters,
}

enum Rejection {
    Malformed,
    Capability,
    Store,
}

impl<S: Stage> StageWorker<S> {
    pub fn new(stage: S, ctx: StageContext) -> Self {
        Self {
            stage,
            ctx,
            counters: Counters::default(),
        }
    }

    pub fn kind(&self) -> StageKind {
        self.stage.kind()
    }

    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    /// Process one delivery to completion (ack or reject).
    ///
    /// Returns `Err` only for connection-level failures.
    pub async fn handle(
        &self,
        session: &dyn BrokerSession,
        delivery: Delivery,
    ) -> Result<(), BrokerError> {
        Counters::bump(&self.counters.received);
        let message = delivery.message();
        let span = info_span!(
            "stage_message",
            stage = %self.kind(),
            correlation_id = message.correlation_id.as_deref().unwrap_or("-"),
            redelivered = message.redelivered,
        );

        async {
            let envelope: MessageEnvelope<S::Input> = match message.decode() {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(error = %err, "undecodable message");
                    return self.reject(&delivery, Rejection::Malformed).await;
                }
            };

            if let Err(err) = envelope.payload().validate() {
                warn!(error = %err, "invalid payload");
                return self.reject(&delivery, Rejection::Malformed).await;
            }

            let outcome = match self.stage.process(envelope.payload()).await {
                Ok(outcome) => outcome,
                Err(err) => return self.fail(&delivery, err).await,
            };

            let outbound = match self.persist(&envelope, &outcome).await {
                Ok(outbound) => outbound,
                Err(err) => return self.fail(&delivery, err).await,
            };

            session.publish(outbound).await?;
            delivery.ack().await?;
            Counters::bump(&self.counters.acked);
            info!("message processed");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn persist(
        &self,
        envelope: &MessageEnvelope<S::Input>,
        outcome: &StageOutcome,
    ) -> Result<OutboundMessage, StageError> {
        // Only a field's owning stage may write it; check all before writing any.
        let foreign = outcome.writes.iter().find(|(f, _)| f.owner() != self.kind());
        if let Some((field, _)) = foreign {
            return Err(StageError::Malformed(format!(
                "stage `{}` may not write `{field}`, owned by `{}`",
                self.kind(),
                field.owner()
            )));
        }

        for (field, value) in &outcome.writes {
            self.ctx
                .store
                .set_field(envelope.correlation_id(), *field, value)
                .await?;
        }

        let outbound = match &outcome.publication {
            Publication::Notify(part) => envelope
                .relay(
                    routing::AGGREGATOR,
                    PartNotification {
                        part_received: *part,
                    },
                )
                .to_outbound(PIPELINE_EXCHANGE),
            Publication::Forward { routing_key, body } => envelope
                .relay(*routing_key, body)
                .to_outbound(PIPELINE_EXCHANGE),
            Publication::Reply(result) => envelope.reply(result),
        };
        outbound.map_err(|e| StageError::Malformed(e.to_string()))
    }

    async fn fail(&self, delivery: &Delivery, err: StageError) -> Result<(), BrokerError> {
        match err {
            StageError::Broker(err) => Err(err),
            StageError::Malformed(reason) => {
                warn!(reason = %reason, "message rejected as malformed");
                self.reject(delivery, Rejection::Malformed).await
            }
            StageError::Capability(err) => {
                warn!(error = %err, "capability failed");
                self.reject(delivery, Rejection::Capability).await
            }
            StageError::Store(err) => {
                warn!(error = %err, "job state write failed");
                self.reject(delivery, Rejection::Store).await
            }
        }
    }

    async fn reject(&self, delivery: &Delivery, why: Rejection) -> Result<(), BrokerError> {
        delivery.reject().await?;
        let counter = match why {
            Rejection::Malformed => &self.counters.rejected_malformed,
            Rejection::Capability => &self.counters.rejected_capability,
            Rejection::Store => &self.counters.rejected_store,
        };
        Counters::bump(counter);
        Ok(())
    }
}

#[async_trait]
impl<S: Stage> SessionWorker for StageWorker<S> {
    fn name(&self) -> String {
        format!("{}-worker", self.kind())
    }

    async fn run(
        &self,
        session: Arc<dyn BrokerSession>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BrokerError> {
        session.declare(&self.ctx.topology).await?;

        let queue = self.ctx.topology.intake(self.kind()).name;
        let mut deliveries = session.consume(&queue, self.ctx.prefetch).await?;
        info!(stage = %self.kind(), queue = %queue, prefetch = self.ctx.prefetch, "consuming");

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => return Ok(()),
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => self.handle(session.as_ref(), delivery).await?,
                    Some(Err(err)) => return Err(err),
                    None => return Err(BrokerError::ConnectionClosed),
                },
            }
        }
    }
}
