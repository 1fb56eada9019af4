use serde::{Serialize, de::DeserializeOwned};

use aurasign_core::{CorrelationId, DomainError, ReplyTo};

/// Envelope for one pipeline message.
///
/// This is the unit every stage reads and writes.
///
/// Notes:
/// - `correlation_id` and `reply_to` are fixed at ingress. The only way to build
///   the next hop's envelope is [`MessageEnvelope::relay`] / [`MessageEnvelope::reply`],
///   which copy both verbatim.
/// - `routing_key` is for the broker; payload logic never interprets it.
/// - On the wire the identifiers travel as message properties and `payload`
///   is the JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope<P> {
    correlation_id: CorrelationId,
    reply_to: ReplyTo,
    routing_key: String,
    payload: P,
}

impl<P> MessageEnvelope<P> {
    pub fn new(
        correlation_id: CorrelationId,
        reply_to: ReplyTo,
        routing_key: impl Into<String>,
        payload: P,
    ) -> Self {
        Self {
            correlation_id,
            reply_to,
            routing_key: routing_key.into(),
            payload,
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn reply_to(&self) -> &ReplyTo {
        &self.reply_to
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Envelope for the next hop, carrying this job's identity unchanged.
    pub fn relay<Q>(&self, routing_key: impl Into<String>, payload: Q) -> MessageEnvelope<Q> {
        MessageEnvelope {
            correlation_id: self.correlation_id.clone(),
            reply_to: self.reply_to.clone(),
            routing_key: routing_key.into(),
            payload,
        }
    }

    /// Encode the terminal delivery: default exchange, routed to `reply_to`.
    ///
    /// The caller matches on `correlation_id`; no further reply destination is set.
    pub fn reply<Q: Serialize>(&self, payload: &Q) -> Result<OutboundMessage, EnvelopeError> {
        Ok(OutboundMessage {
            exchange: String::new(),
            routing_key: self.reply_to.as_str().to_string(),
            correlation_id: self.correlation_id.clone(),
            reply_to: None,
            body: encode(payload)?,
        })
    }
}

impl<P: Serialize> MessageEnvelope<P> {
    /// Encode for publishing on `exchange` under this envelope's routing key.
    pub fn to_outbound(
        &self,
        exchange: impl Into<String>,
    ) -> Result<OutboundMessage, EnvelopeError> {
        Ok(OutboundMessage {
            exchange: exchange.into(),
            routing_key: self.routing_key.clone(),
            correlation_id: self.correlation_id.clone(),
            reply_to: Some(self.reply_to.clone()),
            body: encode(&self.payload)?,
        })
    }
}

fn encode<Q: Serialize>(payload: &Q) -> Result<Vec<u8>, EnvelopeError> {
    serde_json::to_vec(payload).map_err(|e| EnvelopeError::Encode(e.to_string()))
}

/// A message ready to hand to a broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Empty string is the broker's default exchange (routes by queue name).
    pub exchange: String,
    pub routing_key: String,
    pub correlation_id: CorrelationId,
    pub reply_to: Option<ReplyTo>,
    pub body: Vec<u8>,
}

/// Why the broker moved a message to a dead-letter exchange.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeathReason {
    /// Queue residency exceeded the queue's message TTL.
    Expired,
    /// A consumer rejected it without requeue.
    Rejected,
}

impl DeathReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeathReason::Expired => "expired",
            DeathReason::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "expired" => Some(DeathReason::Expired),
            "rejected" => Some(DeathReason::Rejected),
            _ => None,
        }
    }
}

/// A message as delivered by a broker, before any validation.
///
/// Identifiers are raw here: a message missing them is still delivered and
/// must be rejected by the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub body: Vec<u8>,
    pub redelivered: bool,
    pub death_reason: Option<DeathReason>,
}

impl InboundMessage {
    /// How a published message looks to the first consumer that receives it.
    pub fn from_outbound(message: &OutboundMessage) -> Self {
        Self {
            routing_key: message.routing_key.clone(),
            correlation_id: Some(message.correlation_id.as_str().to_string()),
            reply_to: message.reply_to.as_ref().map(|r| r.as_str().to_string()),
            body: message.body.clone(),
            redelivered: false,
            death_reason: None,
        }
    }

    /// Extract identifiers and decode the JSON body into a typed envelope.
    pub fn decode<P: DeserializeOwned>(&self) -> Result<MessageEnvelope<P>, EnvelopeError> {
        let correlation_id: CorrelationId = self
            .correlation_id
            .as_deref()
            .ok_or(EnvelopeError::MissingCorrelationId)?
            .parse()
            .map_err(EnvelopeError::InvalidHeader)?;

        let reply_to: ReplyTo = self
            .reply_to
            .as_deref()
            .ok_or(EnvelopeError::MissingReplyTo)?
            .parse()
            .map_err(EnvelopeError::InvalidHeader)?;

        let payload: P =
            serde_json::from_slice(&self.body).map_err(|e| EnvelopeError::Body(e.to_string()))?;

        Ok(MessageEnvelope::new(
            correlation_id,
            reply_to,
            self.routing_key.clone(),
            payload,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("message has no correlation_id")]
    MissingCorrelationId,

    #[error("message has no reply_to")]
    MissingReplyTo,

    #[error("invalid message property: {0}")]
    InvalidHeader(DomainError),

    #[error("payload did not decode: {0}")]
    Body(String),

    #[error("payload did not encode: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurasign_core::{LanguageJob, SpeechJob};
    use serde_json::json;

    fn inbound(
        correlation_id: Option<&str>,
        reply_to: Option<&str>,
        body: serde_json::Value,
    ) -> InboundMessage {
        InboundMessage {
            routing_key: "gemini_task".into(),
            correlation_id: correlation_id.map(str::to_string),
            reply_to: reply_to.map(str::to_string),
            body: serde_json::to_vec(&body).unwrap(),
            redelivered: false,
            death_reason: None,
        }
    }

    #[test]
    fn relay_copies_identity_verbatim() {
        let msg = inbound(
            Some("corr-1"),
            Some("amq.gen-reply"),
            json!({ "raw_gloss": "HELLO", "dominant_emotion": "happy" }),
        );
        let env: MessageEnvelope<LanguageJob> = msg.decode().unwrap();

        let next = env.relay(
            "tts_task",
            SpeechJob {
                sentence: "Hello!".into(),
                emotion: Some("happy".into()),
                tone: None,
            },
        );
        assert_eq!(next.correlation_id(), env.correlation_id());
        assert_eq!(next.reply_to().as_str().as_bytes(), b"amq.gen-reply");

        let out = next.to_outbound("aurasign_pipeline").unwrap();
        assert_eq!(out.routing_key, "tts_task");
        let seen = InboundMessage::from_outbound(&out);
        assert_eq!(seen.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(seen.reply_to.as_deref(), Some("amq.gen-reply"));
    }

    #[test]
    fn reply_routes_to_reply_destination_on_default_exchange() {
        let env = MessageEnvelope::new(
            "corr-2".parse().unwrap(),
            "caller-queue".parse().unwrap(),
            "tts_task",
            (),
        );
        let out = env.reply(&json!({ "sentence": "Hi." })).unwrap();
        assert_eq!(out.exchange, "");
        assert_eq!(out.routing_key, "caller-queue");
        assert_eq!(out.correlation_id.as_str(), "corr-2");
        assert!(out.reply_to.is_none());
    }

    #[test]
    fn reply_does_not_require_a_serializable_inbound_payload() {
        struct Decoded;

        let env = MessageEnvelope::new(
            "corr-3".parse().unwrap(),
            "caller-queue".parse().unwrap(),
            "tts_task",
            Decoded,
        );
        let out = env.reply(&json!({ "sentence": "Bye." })).unwrap();
        assert_eq!(out.routing_key, "caller-queue");
        assert_eq!(out.body, br#"{"sentence":"Bye."}"#.to_vec());
    }

    #[test]
    fn decode_rejects_missing_identity() {
        let body = json!({ "raw_gloss": "HELLO", "dominant_emotion": "happy" });
        assert_eq!(
            inbound(None, Some("r"), body.clone()).decode::<LanguageJob>().unwrap_err(),
            EnvelopeError::MissingCorrelationId
        );
        assert_eq!(
            inbound(Some("c"), None, body.clone()).decode::<LanguageJob>().unwrap_err(),
            EnvelopeError::MissingReplyTo
        );
        assert!(matches!(
            inbound(Some(""), Some("r"), body).decode::<LanguageJob>().unwrap_err(),
            EnvelopeError::InvalidHeader(_)
        ));
    }

    #[test]
    fn decode_rejects_missing_payload_fields() {
        let err = inbound(Some("c"), Some("r"), json!({ "raw_gloss": "HELLO" }))
            .decode::<LanguageJob>()
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::Body(_)));
    }

    #[test]
    fn death_reason_parses_broker_strings() {
        assert_eq!(DeathReason::parse("expired"), Some(DeathReason::Expired));
        assert_eq!(DeathReason::parse("maxlen"), None);
    }
}
