use actix_cors::Cors;
use actix_web::{error, http::StatusCode, middleware, web, App, HttpResponse, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use job_ingest::config::{CacheSettings, LoggingSettings, PartitionSettings, Settings};
use job_ingest::core::{CurrencyTable, Matcher, Normalizer};
use job_ingest::models::ScoringWeights;
use job_ingest::pipeline::{Orchestrator, PipelineConfig, RunCoordinator, SourcePlan};
use job_ingest::routes::{self, AppState};
use job_ingest::services::{
    HttpEmbedder, HttpSubmissionExecutor, MemoryStore, PostgresStore, ReqwestTransport, ScoreCache, Store,
    UpstreamClient,
};

/// JSON error response for JSON payload errors
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for JsonError {}

impl error::ResponseError for JsonError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_REQUEST)).json(self)
    }
}

pub fn handle_json_payload_error(err: error::JsonPayloadError, req: &actix_web::HttpRequest) -> actix_web::Error {
    tracing::info!(path = %req.path(), error = %err, "JSON payload error");
    JsonError {
        error: "invalid_json".to_string(),
        message: format!("Invalid JSON: {}", err),
        status_code: 400,
    }
    .into()
}

pub fn handle_query_payload_error(err: error::QueryPayloadError, _req: &actix_web::HttpRequest) -> actix_web::Error {
    JsonError {
        error: "invalid_query".to_string(),
        message: format!("Invalid query: {}", err),
        status_code: 400,
    }
    .into()
}

/// LOG_LEVEL and LOG_FORMAT win over the logging section
fn init_tracing(logging: Option<&LoggingSettings>) {
    let level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| logging.map(|l| l.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let format = std::env::var("LOG_FORMAT")
        .ok()
        .or_else(|| logging.map(|l| l.format.clone()))
        .unwrap_or_default();

    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}

async fn build_cache(settings: &CacheSettings) -> Arc<ScoreCache> {
    let Some(url) = &settings.redis_url else {
        info!(l1_size = settings.l1_cache_size, "Score cache running in memory only");
        return Arc::new(ScoreCache::in_memory(settings.l1_cache_size, settings.ttl_secs));
    };

    match ScoreCache::with_redis(url, settings.l1_cache_size, settings.ttl_secs).await {
        Ok(cache) => {
            info!(
                l1_size = settings.l1_cache_size,
                ttl_secs = settings.ttl_secs,
                "Score cache initialized with Redis"
            );
            Arc::new(cache)
        }
        Err(e) => {
            // Scores are derived data, so losing L2 only costs recomputation
            warn!(error = %e, "Failed to connect to Redis, running with in-memory score cache");
            Arc::new(ScoreCache::in_memory(settings.l1_cache_size, settings.ttl_secs))
        }
    }
}

fn build_orchestrator<S: Store + 'static>(store: Arc<S>, settings: &Settings, matcher: Matcher) -> Orchestrator {
    let normalizer = Normalizer::new(CurrencyTable::with_overrides(settings.currency.rates.clone()));
    let mut orchestrator = Orchestrator::new(
        store,
        normalizer,
        matcher,
        settings.dedup.similarity_threshold,
        PipelineConfig::from(&settings.pipeline),
    );

    for source in &settings.sources {
        let transport = Arc::new(ReqwestTransport::new(source.timeout()));
        let client = Arc::new(UpstreamClient::new(source.upstream_config(), transport));
        info!(
            source = %source.source,
            partitions = source.partitions.len(),
            page_size = source.page_size,
            "Upstream source configured"
        );
        orchestrator = orchestrator.with_source(SourcePlan {
            client,
            partitions: source.partitions.iter().map(PartitionSettings::query).collect(),
        });
    }

    if let Some(embedding) = &settings.embedding {
        info!(model = %embedding.model, dimensions = embedding.dimensions, "Embedding provider configured");
        orchestrator = orchestrator.with_embedder(Arc::new(HttpEmbedder::new(
            embedding.api_key.clone(),
            embedding.model.clone(),
            embedding.base_url.clone(),
            embedding.dimensions,
            Duration::from_secs(embedding.timeout_secs),
        )));
    } else {
        info!("No embedding provider, semantic scoring disabled");
    }

    if let Some(executor) = &settings.executor {
        info!(endpoint = %executor.endpoint, "Submission executor configured");
        orchestrator = orchestrator.with_executor(Arc::new(HttpSubmissionExecutor::new(
            executor.endpoint.clone(),
            executor.api_key.clone(),
            settings.webhook.callback_base_url.clone(),
            Duration::from_secs(executor.timeout_secs),
        )));
    } else {
        warn!("No submission executor configured, intents stay pending");
    }

    orchestrator
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();

    let loaded = Settings::load();
    init_tracing(loaded.as_ref().ok().map(|s| &s.logging));

    let settings = loaded.map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    info!("Starting job ingestion service...");

    let cache = build_cache(&settings.cache).await;
    let matcher = Matcher::new(ScoringWeights::from(&settings.scoring.weights)).with_cache(cache);

    let orchestrator = match &settings.database {
        Some(db) => {
            let store = PostgresStore::new(
                &db.url,
                db.max_connections,
                db.min_connections,
                Duration::from_secs(db.acquire_timeout_secs),
            )
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to connect to PostgreSQL");
                std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
            })?;
            info!(max_connections = db.max_connections, "PostgreSQL store initialized");
            build_orchestrator(Arc::new(store), &settings, matcher)
        }
        None => {
            warn!("No database configured, using the in-memory store");
            build_orchestrator(Arc::new(MemoryStore::new()), &settings, matcher)
        }
    };

    let shutdown = CancellationToken::new();
    let coordinator = Arc::new(RunCoordinator::new(Arc::new(orchestrator), shutdown.clone()));

    let scheduler = settings.pipeline.interval_secs.map(|secs| {
        info!(interval_secs = secs, "Run scheduler enabled");
        actix_web::rt::spawn(coordinator.clone().run_every(Duration::from_secs(secs)))
    });

    if settings.webhook.secret.is_none() {
        warn!("webhook.secret not set, executor callbacks are accepted unsigned");
    }

    let app_state = AppState {
        coordinator,
        webhook_secret: settings.webhook.secret.clone(),
    };

    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!(%host, port, workers, "Starting HTTP server");

    let result = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(handle_json_payload_error))
            .app_data(web::QueryConfig::default().error_handler(handle_query_payload_error))
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await;

    info!("HTTP server stopped, cancelling in-flight run");
    shutdown.cancel();
    if let Some(scheduler) = scheduler {
        let _ = scheduler.await;
    }

    result
}
