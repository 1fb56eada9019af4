//! AMQP 0-9-1 broker adapter (RabbitMQ).
//!
//! One session is one connection with one channel, in publisher-confirm mode:
//! `publish` returns only after the broker has taken the message.
//!
//! Queue arguments:
//! - `x-message-ttl`: residency bound in milliseconds
//! - `x-dead-letter-exchange`: where expired and rejected messages go
//!
//! The first death reason of a dead-lettered message is read back from the
//! `x-first-death-reason` header.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lapin::acker::Acker;
use lapin::message::Delivery as AmqpDelivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio_stream::StreamExt;
use tracing::{debug, instrument};

use aurasign_events::{
    Acknowledger, BrokerConnector, BrokerError, BrokerSession, DeathReason, Delivery,
    DeliveryStream, ExchangeKind, InboundMessage, OutboundMessage, QueueSpec, Topology,
};

const CONTENT_TYPE_JSON: &str = "application/json";

/// Opens AMQP sessions against one broker URI.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    uri: String,
}

impl AmqpConnector {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    #[instrument(skip(self), err)]
    async fn connect(&self) -> Result<Arc<dyn BrokerSession>, BrokerError> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(map_lapin_error)?;

        Ok(Arc::new(AmqpSession {
            connection,
            channel,
        }))
    }
}

struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerSession for AmqpSession {
    #[instrument(skip_all, err)]
    async fn declare(&self, topology: &Topology) -> Result<(), BrokerError> {
        for exchange in topology.exchanges() {
            let kind = match exchange.kind {
                ExchangeKind::Direct => lapin::ExchangeKind::Direct,
                ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            };
            self.channel
                .exchange_declare(
                    &exchange.name,
                    kind,
                    ExchangeDeclareOptions {
                        durable: exchange.durable,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(map_lapin_error)?;
        }

        for queue in topology.queues() {
            self.channel
                .queue_declare(
                    &queue.name,
                    QueueDeclareOptions {
                        durable: queue.durable,
                        ..QueueDeclareOptions::default()
                    },
                    queue_arguments(queue),
                )
                .await
                .map_err(map_lapin_error)?;
        }

        for binding in topology.bindings() {
            self.channel
                .queue_bind(
                    &binding.queue,
                    &binding.exchange,
                    &binding.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(map_lapin_error)?;
        }

        debug!(
            exchanges = topology.exchanges().len(),
            queues = topology.queues().len(),
            bindings = topology.bindings().len(),
            "topology declared"
        );
        Ok(())
    }

    #[instrument(
        skip_all,
        fields(
            exchange = %message.exchange,
            routing_key = %message.routing_key,
            correlation_id = %message.correlation_id
        ),
        err
    )]
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let mut properties = BasicProperties::default()
            .with_content_type(ShortString::from(CONTENT_TYPE_JSON))
            .with_correlation_id(ShortString::from(message.correlation_id.as_str()))
            .with_timestamp(Utc::now().timestamp().max(0) as u64);
        if let Some(reply_to) = &message.reply_to {
            properties = properties.with_reply_to(ShortString::from(reply_to.as_str()));
        }

        let confirmation = self
            .channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(map_lapin_error)?
            .await
            .map_err(map_lapin_error)?;

        match confirmation {
            Confirmation::Nack(_) => Err(BrokerError::PublishNotConfirmed(format!(
                "broker nacked message for `{}`",
                message.routing_key
            ))),
            Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
        }
    }

    #[instrument(skip(self), err)]
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, BrokerError> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(map_lapin_error)?;

        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(map_lapin_error)?;

        let stream = consumer.map(|next| {
            next.map(into_delivery).map_err(map_lapin_error)
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(200, "worker shutting down")
            .await
            .map_err(map_lapin_error)
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(map_lapin_error)
    }

    async fn reject(&self) -> Result<(), BrokerError> {
        self.0
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map_err(map_lapin_error)
    }
}

fn into_delivery(delivery: AmqpDelivery) -> Delivery {
    let properties = &delivery.properties;
    let death_reason = properties
        .headers()
        .as_ref()
        .and_then(|headers| headers.inner().get(&ShortString::from("x-first-death-reason")))
        .and_then(|value| match value {
            AMQPValue::LongString(s) => DeathReason::parse(&String::from_utf8_lossy(s.as_bytes())),
            AMQPValue::ShortString(s) => DeathReason::parse(s.as_str()),
            _ => None,
        });

    let message = InboundMessage {
        routing_key: delivery.routing_key.as_str().to_string(),
        correlation_id: properties.correlation_id().as_ref().map(|s| s.as_str().to_string()),
        reply_to: properties.reply_to().as_ref().map(|s| s.as_str().to_string()),
        body: delivery.data,
        redelivered: delivery.redelivered,
        death_reason,
    };

    Delivery::new(message, Box::new(AmqpAcker(delivery.acker)))
}

fn queue_arguments(queue: &QueueSpec) -> FieldTable {
    let mut args = FieldTable::default();
    if let Some(ttl) = queue.message_ttl {
        let millis = i32::try_from(ttl.as_millis()).unwrap_or(i32::MAX);
        args.insert(ShortString::from("x-message-ttl"), AMQPValue::LongInt(millis));
    }
    if let Some(dlx) = &queue.dead_letter_exchange {
        args.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(LongString::from(dlx.as_str())),
        );
    }
    args
}

/// Map by reply code text; lapin surfaces channel closes as protocol errors.
fn map_lapin_error(err: lapin::Error) -> BrokerError {
    let text = err.to_string();
    if text.contains("PRECONDITION_FAILED") {
        BrokerError::PreconditionFailed(text)
    } else if text.contains("NOT_FOUND") {
        BrokerError::NotFound(text)
    } else {
        match err {
            lapin::Error::InvalidConnectionState(_) | lapin::Error::InvalidChannelState(_) => {
                BrokerError::ConnectionClosed
            }
            lapin::Error::IOError(_) => BrokerError::Connection(text),
            _ => BrokerError::Protocol(text),
        }
    }
}
