//! Job origination.
//!
//! The correlation id is generated here, exactly once per end-user request.
//! Every later hop copies it.

use std::sync::Arc;

use tracing::{info, instrument};

use aurasign_core::{CorrelationId, DomainError, RecognitionJob, ReplyTo, Validate, Window};
use aurasign_events::{
    BrokerConnector, BrokerError, BrokerSession, EnvelopeError, MessageEnvelope, PIPELINE_EXCHANGE,
    Topology, routing,
};

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("invalid job: {0}")]
    Invalid(#[from] DomainError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Publishes new recognition jobs onto the pipeline exchange.
pub struct PipelineIngress {
    session: Arc<dyn BrokerSession>,
}

impl PipelineIngress {
    pub fn new(session: Arc<dyn BrokerSession>) -> Self {
        Self { session }
    }

    /// Open a session and declare the topology so the first publish is routable.
    pub async fn connect<C>(connector: &C, topology: &Topology) -> Result<Self, IngressError>
    where
        C: BrokerConnector + ?Sized,
    {
        let session = connector.connect().await?;
        session.declare(topology).await?;
        Ok(Self::new(session))
    }

    #[instrument(
        skip(self, landmark_data),
        fields(windows = landmark_data.len(), reply_to = %reply_to),
        err
    )]
    pub async fn submit(
        &self,
        landmark_data: Vec<Window>,
        reply_to: ReplyTo,
    ) -> Result<CorrelationId, IngressError> {
        let job = RecognitionJob { landmark_data };
        job.validate()?;

        let correlation_id = CorrelationId::generate();
        let envelope =
            MessageEnvelope::new(correlation_id.clone(), reply_to, routing::RECOGNITION, job);
        let outbound = envelope.to_outbound(PIPELINE_EXCHANGE)?;
        self.session.publish(outbound).await?;

        info!(correlation_id = %correlation_id, "job submitted");
        Ok(correlation_id)
    }
}
