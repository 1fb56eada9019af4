//! In-memory broker for tests/dev.
//!
//! Models the broker behaviour the pipeline depends on:
//! - direct and fan-out exchanges, plus the default exchange (routes by queue name)
//! - idempotent declaration; conflicting re-declaration fails
//! - manual acknowledgement with a per-consumer prefetch limit
//! - queue message TTL measured on residency, expiring from the head
//! - dead-lettering of expired and rejected messages
//! - unacked deliveries return to the front of their queue when a session dies
//!
//! Time comes from `tokio::time`, so tests can pause and advance the clock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::broker::{
    Acknowledger, BrokerConnector, BrokerError, BrokerSession, Delivery, DeliveryStream,
};
use crate::envelope::{DeathReason, InboundMessage, OutboundMessage};
use crate::topology::{BindingSpec, ExchangeKind, ExchangeSpec, QueueSpec, Topology};

/// Upper bound on how long an idle consumer waits before re-checking TTLs.
const PUMP_TICK: Duration = Duration::from_millis(50);

/// Shared, cloneable handle to one in-memory broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

struct State {
    available: bool,
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<BindingSpec>,
    sessions: HashMap<u64, SessionState>,
    next_session: u64,
    next_consumer: u64,
    next_tag: u64,
    connections_opened: u64,
}

struct QueueState {
    spec: QueueSpec,
    messages: VecDeque<Stored>,
}

#[derive(Clone)]
struct Stored {
    message: InboundMessage,
    enqueued_at: Instant,
}

struct SessionState {
    open: bool,
    unacked: BTreeMap<u64, Unacked>,
}

struct Unacked {
    queue: String,
    consumer: u64,
    stored: Stored,
}

enum Next {
    Ready(Delivery),
    Idle,
    Closed,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// When `false`, `connect` fails as if the broker were unreachable.
    pub fn set_available(&self, available: bool) {
        if let Ok(mut state) = self.shared.lock() {
            state.available = available;
        }
    }

    /// Drop every open connection, as a broker restart or network partition would.
    ///
    /// Unacked deliveries go back to the front of their queues, flagged redelivered.
    pub fn disconnect_all(&self) {
        if let Ok(mut state) = self.shared.lock() {
            let open: Vec<u64> = state
                .sessions
                .iter()
                .filter(|(_, s)| s.open)
                .map(|(id, _)| *id)
                .collect();
            for id in open {
                state.close_session(id);
            }
        }
        self.shared.notify.notify_waiters();
    }

    /// Messages currently ready in `queue` (after applying TTL expiry).
    pub fn queue_len(&self, queue: &str) -> usize {
        let Ok(mut state) = self.shared.lock() else {
            return 0;
        };
        state.expire(Instant::now());
        state.queues.get(queue).map_or(0, |q| q.messages.len())
    }

    /// Remove and return every ready message in `queue`.
    pub fn drain(&self, queue: &str) -> Vec<InboundMessage> {
        let Ok(mut state) = self.shared.lock() else {
            return Vec::new();
        };
        state.expire(Instant::now());
        state
            .queues
            .get_mut(queue)
            .map(|q| q.messages.drain(..).map(|s| s.message).collect())
            .unwrap_or_default()
    }

    /// Deliveries handed out but not yet settled, across all sessions.
    pub fn unacked_len(&self) -> usize {
        self.shared
            .lock()
            .map(|s| s.sessions.values().map(|s| s.unacked.len()).sum())
            .unwrap_or(0)
    }

    /// Successful `connect` calls so far.
    pub fn connections_opened(&self) -> u64 {
        self.shared.lock().map(|s| s.connections_opened).unwrap_or(0)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    available: true,
                    exchanges: HashMap::new(),
                    queues: HashMap::new(),
                    bindings: Vec::new(),
                    sessions: HashMap::new(),
                    next_session: 1,
                    next_consumer: 1,
                    next_tag: 1,
                    connections_opened: 0,
                }),
                notify: Notify::new(),
            }),
        }
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerSession>, BrokerError> {
        let id = {
            let mut state = self.shared.lock()?;
            if !state.available {
                return Err(BrokerError::Connection("broker unavailable".into()));
            }
            let id = state.next_session;
            state.next_session += 1;
            state.connections_opened += 1;
            state.sessions.insert(
                id,
                SessionState {
                    open: true,
                    unacked: BTreeMap::new(),
                },
            );
            id
        };

        Ok(Arc::new(InMemorySession {
            shared: self.shared.clone(),
            id,
        }))
    }
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, State>, BrokerError> {
        self.state
            .lock()
            .map_err(|_| BrokerError::Protocol("in-memory broker state poisoned".into()))
    }

    fn next_delivery(
        self: &Arc<Self>,
        session: u64,
        queue: &str,
        consumer: u64,
        limit: usize,
    ) -> Next {
        let Ok(mut state) = self.lock() else {
            return Next::Closed;
        };
        if !state.is_open(session) {
            return Next::Closed;
        }

        state.expire(Instant::now());
        if state.inflight(consumer) >= limit {
            return Next::Idle;
        }

        let Some(stored) = state
            .queues
            .get_mut(queue)
            .and_then(|q| q.messages.pop_front())
        else {
            return Next::Idle;
        };

        let tag = state.next_tag;
        state.next_tag += 1;
        let message = stored.message.clone();
        if let Some(s) = state.sessions.get_mut(&session) {
            s.unacked.insert(
                tag,
                Unacked {
                    queue: queue.to_string(),
                    consumer,
                    stored,
                },
            );
        }

        Next::Ready(Delivery::new(
            message,
            Box::new(InMemoryAcker {
                shared: self.clone(),
                session,
                tag,
            }),
        ))
    }
}

impl State {
    fn is_open(&self, session: u64) -> bool {
        self.sessions.get(&session).is_some_and(|s| s.open)
    }

    fn ensure_open(&self, session: u64) -> Result<(), BrokerError> {
        if self.is_open(session) {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }

    fn inflight(&self, consumer: u64) -> usize {
        self.sessions
            .values()
            .flat_map(|s| s.unacked.values())
            .filter(|u| u.consumer == consumer)
            .count()
    }

    fn route(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: InboundMessage,
        now: Instant,
    ) -> Result<usize, BrokerError> {
        let targets: Vec<String> = if exchange.is_empty() {
            vec![routing_key.to_string()]
        } else {
            let spec = self
                .exchanges
                .get(exchange)
                .ok_or_else(|| BrokerError::NotFound(format!("exchange `{exchange}`")))?;
            let mut targets: Vec<String> = self
                .bindings
                .iter()
                .filter(|b| b.exchange == exchange)
                .filter(|b| spec.kind == ExchangeKind::Fanout || b.routing_key == routing_key)
                .map(|b| b.queue.clone())
                .collect();
            targets.dedup();
            targets
        };

        let mut delivered = 0;
        for name in targets {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.messages.push_back(Stored {
                    message: message.clone(),
                    enqueued_at: now,
                });
                delivered += 1;
            }
        }
        if delivered == 0 {
            debug!(exchange, routing_key, "unroutable message dropped");
        }
        Ok(delivered)
    }

    fn dead_letter(
        &mut self,
        queue: &str,
        mut message: InboundMessage,
        reason: DeathReason,
        now: Instant,
    ) {
        let dlx = self
            .queues
            .get(queue)
            .and_then(|q| q.spec.dead_letter_exchange.clone());

        let Some(dlx) = dlx else {
            debug!(queue, reason = reason.as_str(), "message discarded (no dead-letter exchange)");
            return;
        };

        message.death_reason = Some(reason);
        message.redelivered = false;
        let routing_key = message.routing_key.clone();
        if let Err(err) = self.route(&dlx, &routing_key, message, now) {
            debug!(queue, dlx = %dlx, error = %err, "dead-letter routing failed");
        }
    }

    fn expire(&mut self, now: Instant) {
        let mut expired = Vec::new();
        for (name, queue) in self.queues.iter_mut() {
            let Some(ttl) = queue.spec.message_ttl else {
                continue;
            };
            while queue
                .messages
                .front()
                .is_some_and(|m| m.enqueued_at + ttl <= now)
            {
                if let Some(stored) = queue.messages.pop_front() {
                    expired.push((name.clone(), stored.message));
                }
            }
        }
        for (queue, message) in expired {
            self.dead_letter(&queue, message, DeathReason::Expired, now);
        }
    }

    fn close_session(&mut self, id: u64) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        session.open = false;
        let unacked = std::mem::take(&mut session.unacked);

        // Highest tag first so the oldest delivery ends up at the very front.
        for (_, entry) in unacked.into_iter().rev() {
            if let Some(queue) = self.queues.get_mut(&entry.queue) {
                let mut stored = entry.stored;
                stored.message.redelivered = true;
                queue.messages.push_front(stored);
            }
        }
    }
}

struct InMemorySession {
    shared: Arc<Shared>,
    id: u64,
}

#[async_trait]
impl BrokerSession for InMemorySession {
    async fn declare(&self, topology: &Topology) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.lock()?;
            state.ensure_open(self.id)?;

            for exchange in topology.exchanges() {
                match state.exchanges.get(&exchange.name) {
                    Some(existing) if existing != exchange => {
                        return Err(BrokerError::PreconditionFailed(format!(
                            "exchange `{}` redeclared with different parameters",
                            exchange.name
                        )));
                    }
                    Some(_) => {}
                    None => {
                        state.exchanges.insert(exchange.name.clone(), exchange.clone());
                    }
                }
            }

            for queue in topology.queues() {
                match state.queues.get(&queue.name) {
                    Some(existing) if existing.spec != *queue => {
                        return Err(BrokerError::PreconditionFailed(format!(
                            "queue `{}` redeclared with different parameters",
                            queue.name
                        )));
                    }
                    Some(_) => {}
                    None => {
                        state.queues.insert(
                            queue.name.clone(),
                            QueueState {
                                spec: queue.clone(),
                                messages: VecDeque::new(),
                            },
                        );
                    }
                }
            }

            for binding in topology.bindings() {
                if !state.exchanges.contains_key(&binding.exchange) {
                    return Err(BrokerError::NotFound(format!("exchange `{}`", binding.exchange)));
                }
                if !state.queues.contains_key(&binding.queue) {
                    return Err(BrokerError::NotFound(format!("queue `{}`", binding.queue)));
                }
                if !state.bindings.contains(binding) {
                    state.bindings.push(binding.clone());
                }
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.lock()?;
            state.ensure_open(self.id)?;
            let now = Instant::now();
            state.expire(now);
            state.route(
                &message.exchange,
                &message.routing_key,
                InboundMessage::from_outbound(&message),
                now,
            )?;
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, BrokerError> {
        let consumer = {
            let mut state = self.shared.lock()?;
            state.ensure_open(self.id)?;
            if !state.queues.contains_key(queue) {
                return Err(BrokerError::NotFound(format!("queue `{queue}`")));
            }
            let consumer = state.next_consumer;
            state.next_consumer += 1;
            consumer
        };

        // AMQP semantics: a prefetch of zero means unlimited.
        let limit = if prefetch == 0 {
            usize::MAX
        } else {
            usize::from(prefetch)
        };

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(pump(
            self.shared.clone(),
            self.id,
            queue.to_string(),
            consumer,
            limit,
            tx,
        ));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.lock()?;
            state.close_session(self.id);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

async fn pump(
    shared: Arc<Shared>,
    session: u64,
    queue: String,
    consumer: u64,
    limit: usize,
    tx: mpsc::Sender<Result<Delivery, BrokerError>>,
) {
    loop {
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match shared.next_delivery(session, &queue, consumer, limit) {
            Next::Ready(delivery) => {
                if tx.send(Ok(delivery)).await.is_err() {
                    return;
                }
            }
            Next::Closed => {
                let _ = tx.send(Err(BrokerError::ConnectionClosed)).await;
                return;
            }
            Next::Idle => {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep(PUMP_TICK) => {}
                    _ = tx.closed() => return,
                }
            }
        }
    }
}

struct InMemoryAcker {
    shared: Arc<Shared>,
    session: u64,
    tag: u64,
}

impl InMemoryAcker {
    fn settle(&self) -> Result<Unacked, BrokerError> {
        let mut state = self.shared.lock()?;
        state.ensure_open(self.session)?;
        state
            .sessions
            .get_mut(&self.session)
            .and_then(|s| s.unacked.remove(&self.tag))
            .ok_or_else(|| BrokerError::Protocol(format!("unknown delivery tag {}", self.tag)))
    }
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.settle()?;
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn reject(&self) -> Result<(), BrokerError> {
        let entry = self.settle()?;
        {
            let mut state = self.shared.lock()?;
            state.dead_letter(
                &entry.queue,
                entry.stored.message,
                DeathReason::Rejected,
                Instant::now(),
            );
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}
