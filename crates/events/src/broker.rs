//! Broker port (mechanics only).
//!
//! A stage talks to the broker through three seams:
//!
//! - [`BrokerConnector`]: opens a session (one connection + channel). Called again
//!   by the connection supervisor after every failure.
//! - [`BrokerSession`]: declare topology, publish, consume.
//! - [`Acknowledger`]: settle one delivery (ack, or reject without requeue).
//!
//! ## Delivery guarantees
//!
//! At-least-once. A delivery that is neither acked nor rejected when its
//! session dies is returned to its queue by the broker and redelivered with
//! `redelivered = true`. Consumers therefore acknowledge only after their
//! downstream publish succeeded.
//!
//! ## Errors
//!
//! Every [`BrokerError`] is connection-level from the stage's point of view:
//! the current session is abandoned and the supervisor reconnects. Message-level
//! failures (bad payloads, model errors) never surface as `BrokerError`.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::Stream;

use crate::envelope::{InboundMessage, OutboundMessage};
use crate::topology::Topology;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("broker connection closed")]
    ConnectionClosed,

    /// Re-declaration with parameters that differ from the existing entity.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("publish was not confirmed: {0}")]
    PublishNotConfirmed(String),

    #[error("broker protocol error: {0}")]
    Protocol(String),
}

/// Stream of deliveries for one consumer. Ends when the session dies.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BrokerError>> + Send>>;

#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn BrokerSession>, BrokerError>;
}

#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Declare every exchange, queue and binding. Idempotent for identical parameters.
    async fn declare(&self, topology: &Topology) -> Result<(), BrokerError>;

    /// Publish and wait until the broker has taken responsibility for the message.
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError>;

    /// Start consuming `queue` with manual acknowledgement and the given prefetch.
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Reject without requeue. Queues with a dead-letter exchange forward it there.
    async fn reject(&self) -> Result<(), BrokerError>;
}

/// One message handed to a consumer, together with the handle that settles it.
pub struct Delivery {
    message: InboundMessage,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: InboundMessage, acker: Box<dyn Acknowledger>) -> Self {
        Self { message, acker }
    }

    pub fn message(&self) -> &InboundMessage {
        &self.message
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn reject(&self) -> Result<(), BrokerError> {
        self.acker.reject().await
    }
}

impl core::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<C> BrokerConnector for Arc<C>
where
    C: BrokerConnector + ?Sized,
{
    async fn connect(&self) -> Result<Arc<dyn BrokerSession>, BrokerError> {
        (**self).connect().await
    }
}
