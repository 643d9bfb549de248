// Service exports
pub mod cache;
pub mod circuit_breaker;
pub mod embedding;
pub mod memory;
pub mod postgres;
pub mod rate_limiter;
pub mod store;
pub mod submission;
pub mod upstream;

pub use cache::{CacheError, CacheKey, ScoreCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use embedding::{Embedder, EmbeddingError, HttpEmbedder};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use store::{CursorStore, IntentStore, IntentTransition, ListingStore, ProfileStore, Store, StoreError};
pub use submission::{HttpSubmissionExecutor, SubmissionError, SubmissionExecutor};
pub use upstream::{
    Page, ReqwestTransport, RetryPolicy, Transport, TransportError, TransportResponse, UpstreamClient,
    UpstreamConfig, UpstreamError,
};
