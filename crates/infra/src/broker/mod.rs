//! Broker adapters.
//!
//! The broker port and the in-memory implementation live in `aurasign-events`.
//! This module provides the production AMQP implementation.

#[cfg(feature = "amqp")]
pub mod amqp;

#[cfg(feature = "amqp")]
pub use amqp::AmqpConnector;
