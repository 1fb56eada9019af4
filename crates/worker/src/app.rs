//! Wiring of a configured stage onto real adapters.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use aurasign_ai::SentenceGenerator;
use aurasign_core::StageKind;
use aurasign_events::{BrokerConnector, JobStateStore};
use aurasign_infra::broker::AmqpConnector;
use aurasign_infra::capabilities::{GeminiGenerator, HttpCapabilityClient};
use aurasign_infra::job_state::RedisJobStateStore;
use aurasign_infra::{
    ConnectionSupervisor, EmotionStage, GestureStage, LanguageStage, SessionWorker, SpeechStage,
    Stage, StageContext, StageWorker, SupervisorConfig, SupervisorStats,
};

use crate::config::{LanguageBackend, WorkerConfig};

/// Run the configured stage until `shutdown` resolves.
///
/// The job store is connected eagerly: a worker that cannot persist would
/// reject every message it receives.
pub async fn run(
    config: WorkerConfig,
    shutdown: impl Future<Output = ()> + Send,
) -> anyhow::Result<SupervisorStats> {
    let store: Arc<dyn JobStateStore> = Arc::new(
        RedisJobStateStore::connect(&config.redis_url, config.job_state_ttl)
            .await
            .context("connecting to the job state store")?,
    );
    let ctx = StageContext::new(store, config.topology.clone());
    let connector = AmqpConnector::new(config.amqp_url.clone());
    let supervisor = SupervisorConfig::default().with_backoff(config.reconnect_backoff);
    let models = Arc::new(HttpCapabilityClient::new(config.capability_url.clone()));

    let stats = match config.stage {
        StageKind::Gesture => {
            supervise(connector, GestureStage::new(models), ctx, supervisor, shutdown).await
        }
        StageKind::Emotion => {
            supervise(connector, EmotionStage::new(models), ctx, supervisor, shutdown).await
        }
        StageKind::Language => {
            let generator = sentence_generator(&config.language, models);
            supervise(connector, LanguageStage::new(generator), ctx, supervisor, shutdown).await
        }
        StageKind::Speech => {
            supervise(connector, SpeechStage::new(models), ctx, supervisor, shutdown).await
        }
    };
    Ok(stats)
}

fn sentence_generator(
    backend: &LanguageBackend,
    models: Arc<HttpCapabilityClient>,
) -> Arc<dyn SentenceGenerator> {
    match backend {
        LanguageBackend::Gemini { api_key, model } => {
            let mut generator = GeminiGenerator::new(api_key.clone());
            if let Some(model) = model {
                generator = generator.with_model(model.clone());
            }
            Arc::new(generator)
        }
        LanguageBackend::ModelServer => models,
    }
}

/// Supervise one stage worker over `connector` until `shutdown` resolves.
///
/// A message already being processed when shutdown arrives is finished first.
pub async fn supervise<C, S>(
    connector: C,
    stage: S,
    ctx: StageContext,
    config: SupervisorConfig,
    shutdown: impl Future<Output = ()> + Send,
) -> SupervisorStats
where
    C: BrokerConnector + 'static,
    S: Stage,
{
    let worker = StageWorker::new(stage, ctx);
    info!(worker = %worker.name(), backoff_ms = config.backoff.as_millis() as u64, "starting");

    let (stop_tx, stop_rx) = watch::channel(false);
    let supervisor = ConnectionSupervisor::new(connector, worker, config).run(stop_rx);
    tokio::pin!(supervisor);

    tokio::select! {
        stats = &mut supervisor => stats,
        () = shutdown => {
            info!("shutdown requested");
            let _ = stop_tx.send(true);
            supervisor.await
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
