//! Declarative broker layout (exchanges, queues, bindings, dead-lettering).
//!
//! Every stage declares the *full* topology on every (re)connect. Declaration
//! is idempotent on the broker side, so there is no privileged bootstrapper.
//!
//! ```text
//!                      aurasign_pipeline (direct)
//!   recognition_task ──┬─▶ gesture_tasks_queue ──▶ gesture  ─┐
//!                      └─▶ emotion_tasks_queue ──▶ emotion  ─┤ aggregator_task
//!                                                            ▼
//!                          aggregator_tasks_queue ──▶ (external aggregator)
//!   gemini_task ─────────▶ gemini_tasks_queue ──▶ language ── tts_task
//!   tts_task ────────────▶ tts_tasks_queue [ttl, dlx] ──▶ speech ──▶ reply_to
//!                                 │ expired / rejected
//!                                 ▼
//!                      aurasign_dlx (fanout) ──▶ aurasign_tts_dead_letter
//! ```

use std::collections::HashSet;
use std::time::Duration;

use aurasign_core::StageKind;

pub const PIPELINE_EXCHANGE: &str = "aurasign_pipeline";
pub const DEAD_LETTER_EXCHANGE: &str = "aurasign_dlx";
pub const DEAD_LETTER_QUEUE: &str = "aurasign_tts_dead_letter";
pub const AGGREGATOR_QUEUE: &str = "aggregator_tasks_queue";

/// Default residency bound on the speech intake queue.
pub const DEFAULT_SPEECH_MESSAGE_TTL: Duration = Duration::from_millis(7000);

/// Routing keys on the pipeline exchange.
pub mod routing {
    pub const RECOGNITION: &str = "recognition_task";
    pub const AGGREGATOR: &str = "aggregator_task";
    pub const LANGUAGE: &str = "gemini_task";
    pub const SPEECH: &str = "tts_task";
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Fanout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub message_ttl: Option<Duration>,
    pub dead_letter_exchange: Option<String>,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
            message_ttl: None,
            dead_letter_exchange: None,
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Bound queue residency; expired messages go to `dead_letter_exchange`.
    pub fn with_ttl(mut self, ttl: Duration, dead_letter_exchange: impl Into<String>) -> Self {
        self.message_ttl = Some(ttl);
        self.dead_letter_exchange = Some(dead_letter_exchange.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingSpec {
    pub queue: String,
    pub exchange: String,
    /// Ignored by fan-out exchanges; kept empty for them.
    pub routing_key: String,
}

/// Knobs for [`Topology::pipeline`].
#[derive(Debug, Clone)]
pub struct TopologyConfig {
    pub durable: bool,
    pub speech_message_ttl: Duration,
    /// When set, gesture/emotion/language intake queues also get a TTL and
    /// dead-letter to the same fan-out exchange. Off by default.
    pub upstream_message_ttl: Option<Duration>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            durable: false,
            speech_message_ttl: DEFAULT_SPEECH_MESSAGE_TTL,
            upstream_message_ttl: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("binding references undeclared exchange `{0}`")]
    UnknownExchange(String),

    #[error("binding references undeclared queue `{0}`")]
    UnknownQueue(String),

    #[error("fan-out binding `{queue}` on `{exchange}` must not carry a routing key")]
    FanoutRoutingKey { queue: String, exchange: String },

    #[error(
        "queue `{queue}` TTL {ttl:?} does not exceed worst-case processing time {worst_case:?}"
    )]
    TtlBudget {
        queue: String,
        ttl: Duration,
        worst_case: Duration,
    },
}

/// The static routing graph all stages rely on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    exchanges: Vec<ExchangeSpec>,
    queues: Vec<QueueSpec>,
    bindings: Vec<BindingSpec>,
}

impl Topology {
    pub fn new(
        exchanges: Vec<ExchangeSpec>,
        queues: Vec<QueueSpec>,
        bindings: Vec<BindingSpec>,
    ) -> Self {
        Self {
            exchanges,
            queues,
            bindings,
        }
    }

    /// The AuraSign pipeline layout.
    pub fn pipeline(config: &TopologyConfig) -> Self {
        let exchanges = vec![
            ExchangeSpec {
                name: PIPELINE_EXCHANGE.into(),
                kind: ExchangeKind::Direct,
                durable: config.durable,
            },
            ExchangeSpec {
                name: DEAD_LETTER_EXCHANGE.into(),
                kind: ExchangeKind::Fanout,
                durable: config.durable,
            },
        ];

        let upstream = |name: &str| {
            let queue = QueueSpec::new(name).durable(config.durable);
            match config.upstream_message_ttl {
                Some(ttl) => queue.with_ttl(ttl, DEAD_LETTER_EXCHANGE),
                None => queue,
            }
        };

        let mut queues: Vec<QueueSpec> =
            [StageKind::Gesture, StageKind::Emotion, StageKind::Language]
                .into_iter()
                .map(|stage| upstream(intake_queue_name(stage)))
                .collect();
        queues.push(
            QueueSpec::new(intake_queue_name(StageKind::Speech))
                .durable(config.durable)
                .with_ttl(config.speech_message_ttl, DEAD_LETTER_EXCHANGE),
        );
        queues.push(QueueSpec::new(AGGREGATOR_QUEUE).durable(config.durable));
        queues.push(QueueSpec::new(DEAD_LETTER_QUEUE).durable(config.durable));

        let mut bindings: Vec<BindingSpec> = StageKind::ALL
            .into_iter()
            .map(|stage| BindingSpec {
                queue: intake_queue_name(stage).into(),
                exchange: PIPELINE_EXCHANGE.into(),
                routing_key: intake_routing_key(stage).into(),
            })
            .collect();
        bindings.push(BindingSpec {
            queue: AGGREGATOR_QUEUE.into(),
            exchange: PIPELINE_EXCHANGE.into(),
            routing_key: routing::AGGREGATOR.into(),
        });
        bindings.push(BindingSpec {
            queue: DEAD_LETTER_QUEUE.into(),
            exchange: DEAD_LETTER_EXCHANGE.into(),
            routing_key: String::new(),
        });

        Self::new(exchanges, queues, bindings)
    }

    pub fn exchanges(&self) -> &[ExchangeSpec] {
        &self.exchanges
    }

    pub fn queues(&self) -> &[QueueSpec] {
        &self.queues
    }

    pub fn bindings(&self) -> &[BindingSpec] {
        &self.bindings
    }

    pub fn exchange(&self, name: &str) -> Option<&ExchangeSpec> {
        self.exchanges.iter().find(|e| e.name == name)
    }

    pub fn queue(&self, name: &str) -> Option<&QueueSpec> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// The intake queue a stage consumes from.
    ///
    /// Falls back to a bare spec if a hand-built topology omitted it;
    /// `validate` is where omissions are reported.
    pub fn intake(&self, stage: StageKind) -> QueueSpec {
        let name = intake_queue_name(stage);
        self.queue(name)
            .cloned()
            .unwrap_or_else(|| QueueSpec::new(name))
    }

    /// Structural checks: every reference resolves, fan-out bindings carry no key.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let exchanges: HashSet<&str> = self.exchanges.iter().map(|e| e.name.as_str()).collect();
        let queues: HashSet<&str> = self.queues.iter().map(|q| q.name.as_str()).collect();

        for binding in &self.bindings {
            if !queues.contains(binding.queue.as_str()) {
                return Err(TopologyError::UnknownQueue(binding.queue.clone()));
            }
            let Some(exchange) = self.exchange(&binding.exchange) else {
                return Err(TopologyError::UnknownExchange(binding.exchange.clone()));
            };
            if exchange.kind == ExchangeKind::Fanout && !binding.routing_key.is_empty() {
                return Err(TopologyError::FanoutRoutingKey {
                    queue: binding.queue.clone(),
                    exchange: binding.exchange.clone(),
                });
            }
        }

        for queue in &self.queues {
            if let Some(dlx) = &queue.dead_letter_exchange {
                if !exchanges.contains(dlx.as_str()) {
                    return Err(TopologyError::UnknownExchange(dlx.clone()));
                }
            }
        }

        Ok(())
    }

    /// A queue's TTL must exceed the worst-case processing time of its stage,
    /// otherwise healthy jobs are dead-lettered. Queues without TTL always pass.
    pub fn check_ttl_budget(&self, queue: &str, worst_case: Duration) -> Result<(), TopologyError> {
        let spec = self
            .queue(queue)
            .ok_or_else(|| TopologyError::UnknownQueue(queue.to_string()))?;

        match spec.message_ttl {
            Some(ttl) if ttl <= worst_case => Err(TopologyError::TtlBudget {
                queue: queue.to_string(),
                ttl,
                worst_case,
            }),
            _ => Ok(()),
        }
    }
}

pub fn intake_queue_name(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Gesture => "gesture_tasks_queue",
        StageKind::Emotion => "emotion_tasks_queue",
        StageKind::Language => "gemini_tasks_queue",
        StageKind::Speech => "tts_tasks_queue",
    }
}

pub fn intake_routing_key(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Gesture | StageKind::Emotion => routing::RECOGNITION,
        StageKind::Language => routing::LANGUAGE,
        StageKind::Speech => routing::SPEECH,
    }
}
