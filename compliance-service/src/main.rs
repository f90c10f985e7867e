// =====================================================================================
// File: compliance-service/src/main.rs
// Description: Entry point for the Sentinel compliance service
// =====================================================================================

use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use compliance_service::{configure_app, AppState};
use core_config::ConfigLoader;
use core_database::{
    create_pool, run_migrations, PersistenceRepository, PgEvaluationStore, TransactionRepository,
};
use core_llm::{ChatCompletionProvider, GatewayConfig, LlmGateway};
use core_monitoring::{BusinessMetrics, IntegrityMonitor};
use core_pipeline::{EvaluationJobProcessor, PipelineOrchestrator};
use core_queue::{InMemoryJobQueue, JobQueue, WorkerPool, WorkerPoolConfig};
use core_rulestore::RemoteRuleStore;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ConfigLoader::load()?;
    info!("Starting Sentinel compliance service");

    // Storage
    let pool = create_pool(&config.database).await?;
    run_migrations(&pool).await?;
    let store = Arc::new(PgEvaluationStore::new(
        TransactionRepository::new(pool.clone()),
        PersistenceRepository::new(pool.clone()),
    ));

    // Rule corpora
    let rule_store = Arc::new(RemoteRuleStore::new(
        config.rulestore.internal_endpoint.clone(),
        config.rulestore.external_endpoint.clone(),
        config.rulestore.timeout_seconds,
        config.rulestore.retry_attempts,
    )?);

    // Model gateway
    let provider = ChatCompletionProvider::new(
        config.llm.endpoint.clone(),
        config.llm.api_key.clone(),
        config.llm.model.clone(),
        config.llm.timeout_seconds,
    )?;
    let gateway = Arc::new(LlmGateway::new(
        Arc::new(provider),
        GatewayConfig {
            global_concurrency: config.llm.global_concurrency,
            ..GatewayConfig::default()
        },
    ));

    // Pipeline and workers
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        store.clone(),
        rule_store.clone(),
        gateway,
        config.pipeline.clone(),
        config.llm.per_evaluation_concurrency,
    ));
    let queue = Arc::new(InMemoryJobQueue::with_max_deliveries(
        config.queue.max_deliveries,
    ));
    queue
        .create_queue(&config.queue.queue_name)
        .await
        .map_err(|e| anyhow::anyhow!("queue setup failed: {}", e))?;
    let queue_dyn: Arc<dyn JobQueue> = queue.clone();

    let processor = Arc::new(EvaluationJobProcessor::new(orchestrator, store.clone()));
    let worker_config = WorkerPoolConfig::new(&config.queue.queue_name, config.queue.worker_count)
        .with_visibility_timeout(Duration::from_secs(config.queue.visibility_timeout_secs));
    let _workers = WorkerPool::start(queue_dyn.clone(), processor, worker_config);
    info!(workers = config.queue.worker_count, "Evaluation worker pool started");

    // Integrity monitor
    let metrics = Arc::new(BusinessMetrics::new());
    let monitor = Arc::new(IntegrityMonitor::new(
        store.clone(),
        metrics,
        config.monitoring.clone(),
    ));
    let (_monitor_handle, _monitor_stop) = Arc::clone(&monitor).start_scheduled();

    // HTTP surface
    let state = web::Data::new(AppState {
        store,
        queue: queue_dyn,
        rule_store,
        monitor,
        queue_name: config.queue.queue_name.clone(),
    });

    let bind_address = (config.server.host.clone(), config.server.port);
    info!(host = %bind_address.0, port = bind_address.1, "HTTP server listening");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(configure_app)
    });
    let server = match config.server.workers {
        Some(workers) => server.workers(workers),
        None => server,
    };
    server.bind(bind_address)?.run().await?;

    Ok(())
}
