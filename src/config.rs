use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::models::{ScoringWeights, SearchQuery, Source};
use crate::services::circuit_breaker::CircuitBreakerConfig;
use crate::services::rate_limiter::RateLimitConfig;
use crate::services::upstream::{RetryPolicy, UpstreamConfig};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    /// Absent means the in-memory store
    #[serde(default)]
    pub database: Option<DatabaseSettings>,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub sources: Vec<SourceSettings>,
    #[serde(default)]
    pub embedding: Option<EmbeddingSettings>,
    #[serde(default)]
    pub executor: Option<ExecutorSettings>,
    #[serde(default)]
    pub scoring: ScoringSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub dedup: DedupSettings,
    #[serde(default)]
    pub currency: CurrencySettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub workers: Option<usize>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
        }
    }
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_acquire_timeout_secs() -> u64 { 5 }

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    pub redis_url: Option<String>,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_l1_cache_size")]
    pub l1_cache_size: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl_secs: default_ttl_secs(),
            l1_cache_size: default_l1_cache_size(),
        }
    }
}

fn default_ttl_secs() -> u64 { 86_400 }
fn default_l1_cache_size() -> u64 { 100_000 }

/// One upstream job source
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSettings {
    pub source: Source,
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    #[serde(default = "default_api_key_prefix")]
    pub api_key_prefix: String,
    pub api_key_param: Option<String>,
    #[serde(default)]
    pub extra_params: HashMap<String, String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages_per_run")]
    pub max_pages_per_run: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub partitions: Vec<PartitionSettings>,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
}

fn default_api_key_header() -> String { "Authorization".to_string() }
fn default_api_key_prefix() -> String { "Bearer ".to_string() }
fn default_page_size() -> u32 { 50 }
fn default_max_pages_per_run() -> u32 { 20 }
fn default_request_timeout_secs() -> u64 { 30 }

impl SourceSettings {
    pub fn upstream_config(&self) -> UpstreamConfig {
        let mut extra_params: Vec<(String, String)> = self
            .extra_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        extra_params.sort();

        UpstreamConfig {
            source: self.source,
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            api_key_header: self.api_key_header.clone(),
            api_key_prefix: self.api_key_prefix.clone(),
            api_key_param: self.api_key_param.clone(),
            extra_params,
            page_size: self.page_size,
            max_pages_per_run: self.max_pages_per_run,
            retry: self.retry.policy(),
            rate_limit: self.rate_limit.config(),
            breaker: self.breaker.config(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A query partition of a source search
#[derive(Debug, Clone, Deserialize)]
pub struct PartitionSettings {
    pub name: String,
    pub keywords: String,
    pub location: Option<String>,
}

impl PartitionSettings {
    pub fn query(&self) -> SearchQuery {
        SearchQuery {
            partition: self.name.clone(),
            keywords: self.keywords.clone(),
            location: self.location.clone(),
            posted_after: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_rate_requests")]
    pub requests: u32,
    #[serde(default = "default_rate_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_rate_max_wait_secs")]
    pub max_wait_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests: default_rate_requests(),
            window_secs: default_rate_window_secs(),
            max_wait_secs: default_rate_max_wait_secs(),
        }
    }
}

impl RateLimitSettings {
    pub fn config(&self) -> RateLimitConfig {
        RateLimitConfig {
            requests: self.requests,
            window: Duration::from_secs(self.window_secs),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }
}

fn default_rate_requests() -> u32 { 60 }
fn default_rate_window_secs() -> u64 { 60 }
fn default_rate_max_wait_secs() -> u64 { 30 }

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
            max_retry_after_secs: default_max_retry_after_secs(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
            jitter: self.jitter.clamp(0.0, 1.0),
            max_retry_after: Duration::from_secs(self.max_retry_after_secs),
        }
    }
}

fn default_max_attempts() -> u32 { 5 }
fn default_initial_backoff_ms() -> u64 { 1_000 }
fn default_max_backoff_ms() -> u64 { 16_000 }
fn default_backoff_multiplier() -> f64 { 2.0 }
fn default_jitter() -> f64 { 0.3 }
fn default_max_retry_after_secs() -> u64 { 120 }

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cool_down_secs")]
    pub cool_down_secs: u64,
    #[serde(default = "default_max_cool_down_secs")]
    pub max_cool_down_secs: u64,
    #[serde(default = "default_max_open_secs")]
    pub max_open_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cool_down_secs: default_cool_down_secs(),
            max_cool_down_secs: default_max_cool_down_secs(),
            max_open_secs: default_max_open_secs(),
        }
    }
}

impl BreakerSettings {
    pub fn config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.max(1),
            cool_down: Duration::from_secs(self.cool_down_secs),
            max_cool_down: Duration::from_secs(self.max_cool_down_secs.max(self.cool_down_secs)),
            max_open_duration: Duration::from_secs(self.max_open_secs),
        }
    }
}

fn default_failure_threshold() -> u32 { 5 }
fn default_cool_down_secs() -> u64 { 300 }
fn default_max_cool_down_secs() -> u64 { 3_600 }
fn default_max_open_secs() -> u64 { 7_200 }

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_timeout_secs() -> u64 { 10 }

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    #[serde(default = "default_executor_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_executor_timeout_secs() -> u64 { 10 }

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScoringSettings {
    #[serde(default)]
    pub weights: WeightsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightsConfig {
    #[serde(default = "default_skills_weight")]
    pub skills: f64,
    #[serde(default = "default_title_weight")]
    pub title: f64,
    #[serde(default = "default_location_weight")]
    pub location: f64,
    #[serde(default = "default_salary_weight")]
    pub salary: f64,
    #[serde(default = "default_semantic_weight")]
    pub semantic: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            skills: default_skills_weight(),
            title: default_title_weight(),
            location: default_location_weight(),
            salary: default_salary_weight(),
            semantic: default_semantic_weight(),
        }
    }
}

impl From<&WeightsConfig> for ScoringWeights {
    fn from(w: &WeightsConfig) -> Self {
        ScoringWeights {
            skills: w.skills,
            title: w.title,
            location: w.location,
            salary: w.salary,
            semantic: w.semantic,
        }
    }
}

fn default_skills_weight() -> f64 { 0.40 }
fn default_title_weight() -> f64 { 0.20 }
fn default_location_weight() -> f64 { 0.15 }
fn default_salary_weight() -> f64 { 0.10 }
fn default_semantic_weight() -> f64 { 0.15 }

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,
    #[serde(default = "default_score_workers")]
    pub score_workers: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Listings not seen for this long are no longer eligible
    #[serde(default = "default_freshness_window_hours")]
    pub freshness_window_hours: i64,
    /// Listings not seen for this long are marked stale
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: i64,
    pub run_deadline_secs: Option<u64>,
    /// Scheduled run interval; absent disables the scheduler
    pub interval_secs: Option<u64>,
    #[serde(default = "default_redispatch_limit")]
    pub redispatch_limit: i64,
    /// Undispatched intents younger than this are left to the run that created them
    #[serde(default = "default_redispatch_grace_secs")]
    pub redispatch_grace_secs: u64,
    /// Listings left unscored by an earlier run, re-queued per run
    #[serde(default = "default_rescore_limit")]
    pub rescore_limit: i64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fetch_workers: default_fetch_workers(),
            score_workers: default_score_workers(),
            channel_capacity: default_channel_capacity(),
            freshness_window_hours: default_freshness_window_hours(),
            stale_after_hours: default_stale_after_hours(),
            run_deadline_secs: None,
            interval_secs: None,
            redispatch_limit: default_redispatch_limit(),
            redispatch_grace_secs: default_redispatch_grace_secs(),
            rescore_limit: default_rescore_limit(),
        }
    }
}

fn default_fetch_workers() -> usize { 4 }
fn default_score_workers() -> usize { 8 }
fn default_channel_capacity() -> usize { 256 }
fn default_freshness_window_hours() -> i64 { 72 }
fn default_stale_after_hours() -> i64 { 168 }
fn default_redispatch_limit() -> i64 { 500 }
fn default_redispatch_grace_secs() -> u64 { 600 }
fn default_rescore_limit() -> i64 { 1000 }

#[derive(Debug, Clone, Deserialize)]
pub struct DedupSettings {
    /// Description similarity needed to fold a near-duplicate; 1.0 is exact-only
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_similarity_threshold() -> f64 { 1.0 }

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CurrencySettings {
    /// USD value of one unit of each currency; merged over the built-in table
    #[serde(default)]
    pub rates: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    /// HS256 secret the executor signs callback tokens with
    pub secret: Option<String>,
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            secret: None,
            callback_base_url: default_callback_base_url(),
        }
    }
}

fn default_callback_base_url() -> String { "http://localhost:8080".to_string() }

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "compact".to_string() }

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Later sources override earlier ones:
    /// 1. Serde defaults
    /// 2. config/default.*, then config/local.*
    /// 3. Environment variables prefixed with JOBINGEST
    ///    (JOBINGEST__PIPELINE__FETCH_WORKERS -> pipeline.fetch_workers)
    /// 4. DATABASE_URL
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(env_source())
            .build()?;

        let settings = apply_env_overrides(settings)?;
        let settings: Settings = settings.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(env_source())
            .build()?;

        let settings: Settings = settings.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.scoring.weights;
        let weights = [w.skills, w.title, w.location, w.salary, w.semantic];
        if weights.iter().any(|w| *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::Message(
                "scoring weights must be non-negative with a positive sum".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.dedup.similarity_threshold) {
            return Err(ConfigError::Message(
                "dedup.similarity_threshold must be within [0, 1]".to_string(),
            ));
        }

        for source in &self.sources {
            if source.partitions.is_empty() {
                return Err(ConfigError::Message(format!(
                    "source {} has no partitions",
                    source.source
                )));
            }
            if source.page_size == 0 {
                return Err(ConfigError::Message(format!(
                    "source {} has page_size 0",
                    source.source
                )));
            }
        }

        Ok(())
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("JOBINGEST")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

/// DATABASE_URL wins over any configured database URL
fn apply_env_overrides(settings: Config) -> Result<Config, ConfigError> {
    match std::env::var("DATABASE_URL") {
        Ok(url) if !url.is_empty() => Config::builder()
            .add_source(settings)
            .set_override("database.url", url)?
            .build(),
        _ => Ok(settings),
    }
}
