//! Messaging mechanics shared by every stage.
//!
//! - `envelope`: the wire contract (correlation id, reply destination, routing key, payload)
//! - `topology`: declarative exchange/queue/binding layout, including the dead-letter path
//! - `broker`: transport-agnostic broker port (sessions, deliveries, acknowledgements)
//! - `job_state`: correlation-keyed partial-result store port and the join primitive
//!
//! In-memory implementations of both ports live here for tests/dev; the
//! infrastructure-backed ones (AMQP, Redis) live in `aurasign-infra`.

pub mod broker;
pub mod envelope;
pub mod in_memory_broker;
pub mod in_memory_job_state;
pub mod job_state;
pub mod topology;

pub use broker::{
    Acknowledger, BrokerConnector, BrokerError, BrokerSession, Delivery, DeliveryStream,
};
pub use envelope::{DeathReason, EnvelopeError, InboundMessage, MessageEnvelope, OutboundMessage};
pub use in_memory_broker::InMemoryBroker;
pub use in_memory_job_state::InMemoryJobStateStore;
pub use job_state::{JobJoin, JobStateStore, JoinStatus, StoreError};
pub use topology::{
    AGGREGATOR_QUEUE, BindingSpec, DEAD_LETTER_EXCHANGE, DEAD_LETTER_QUEUE,
    DEFAULT_SPEECH_MESSAGE_TTL, ExchangeKind, ExchangeSpec, PIPELINE_EXCHANGE, QueueSpec, Topology,
    TopologyConfig, TopologyError, intake_queue_name, intake_routing_key, routing,
};
