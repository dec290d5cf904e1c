//! Service dependency struct
//!
//! Every shared handle is constructed once at startup and carried here:
//! limiter, breaker, cache, router, executor, model host, stores, queues,
//! planner, and authenticator. Handlers and workers borrow what they need;
//! nothing is a global.

use redis::aio::ConnectionManager;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

use crate::auth::Authenticator;
use crate::config::Config;
use crate::jobs::JobQueue;
use crate::model::{build_model_host, ModelHost};
use crate::routing::{
    CaptionExecutor, CircuitBreaker, RateLimiter, RedisCacheStore, Router, SemanticCache,
};
use crate::search::SearchPlanner;
use crate::storage::{BlobStore, EmbedIndex, EmbedStore, FsBlobStore};
use crate::telemetry::MetricsRegistry;

/// Per-component liveness, each probed non-fatally
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub database: bool,
    pub redis: bool,
}

impl HealthSnapshot {
    /// Every component answered its probe
    pub fn all_ok(&self) -> bool {
        self.database && self.redis
    }
}

/// Process-scoped dependencies
pub struct Services {
    pub config: Config,
    pub metrics: Arc<MetricsRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub cache: Arc<SemanticCache>,
    pub router: Arc<Router>,
    pub executor: Arc<CaptionExecutor>,
    pub models: Arc<dyn ModelHost>,
    pub blobs: Arc<dyn BlobStore>,
    pub embed: Arc<dyn EmbedIndex>,
    pub ingestion_queue: Arc<JobQueue>,
    pub caption_queue: Arc<JobQueue>,
    pub embedding_queue: Arc<JobQueue>,
    pub planner: Arc<SearchPlanner>,
    pub auth: Arc<Authenticator>,
    redis: ConnectionManager,
}

impl Services {
    /// Connect to redis and Postgres, ensure the schema, and wire the full
    /// dependency graph.
    pub async fn connect(config: Config) -> anyhow::Result<Arc<Self>> {
        let metrics = Arc::new(MetricsRegistry::new());

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client).await?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;

        let embed_store = Arc::new(EmbedStore::new(
            pool,
            config.hybrid_text_boost,
            config.hybrid_text_weight,
        ));
        embed_store.ensure_schema().await?;
        let embed: Arc<dyn EmbedIndex> = embed_store;

        let blobs: Arc<dyn BlobStore> =
            Arc::new(FsBlobStore::new(&config.blob_root, &config.base_url)?);

        let models = build_model_host(
            config.cloud_provider,
            config.openrouter_api_key.as_deref(),
            &config.openrouter_model,
            config.local_model_url.as_deref(),
        )
        .map_err(|e| anyhow::anyhow!("model host construction failed: {}", e))?;

        let limiter = Arc::new(RateLimiter::new(config.limiter.clone()));
        let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
        let cache = Arc::new(SemanticCache::new(
            Arc::new(RedisCacheStore::new(redis.clone())),
            config.cache_ttl,
            metrics.clone(),
        ));

        let router = Arc::new(Router::new(cache.clone(), metrics.clone()));
        let executor = Arc::new(CaptionExecutor::new(
            models.clone(),
            limiter.clone(),
            breaker.clone(),
            cache.clone(),
            metrics.clone(),
        ));

        let ingestion_queue = Arc::new(JobQueue::new(
            redis.clone(),
            "ingestion",
            crate::jobs::RESULT_SLOT_TTL,
        ));
        let caption_queue = Arc::new(JobQueue::new(
            redis.clone(),
            "caption",
            crate::jobs::RESULT_SLOT_TTL,
        ));
        let embedding_queue = Arc::new(JobQueue::new(
            redis.clone(),
            "embedding",
            crate::jobs::RESULT_SLOT_TTL,
        ));

        let planner = Arc::new(SearchPlanner::new(
            models.clone(),
            embed.clone(),
            blobs.clone(),
            metrics.clone(),
        ));

        let auth = Arc::new(Authenticator::new(
            config.jwt_secret.clone(),
            config.seeding_api_key.clone(),
            config.admin_user_id,
        ));

        Ok(Arc::new(Self {
            config,
            metrics,
            limiter,
            breaker,
            cache,
            router,
            executor,
            models,
            blobs,
            embed,
            ingestion_queue,
            caption_queue,
            embedding_queue,
            planner,
            auth,
            redis,
        }))
    }

    /// Probe each backing component without failing. A dead store reports
    /// `false`; the process keeps serving.
    pub async fn health(&self) -> HealthSnapshot {
        let database = match self.embed.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(target: "prism::health", error = %e, "database probe failed");
                false
            }
        };

        let redis = match redis::cmd("PING")
            .query_async::<_, String>(&mut self.redis.clone())
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(target: "prism::health", error = %e, "redis probe failed");
                false
            }
        };

        HealthSnapshot { database, redis }
    }

    /// Fill the scrape-time gauges from component snapshots
    pub fn refresh_gauges(&self) {
        let limiter = self.limiter.stats();
        self.metrics
            .rate_limiter_requests_per_minute
            .set(limiter.requests_last_minute as f64);
        self.metrics
            .rate_limiter_requests_today
            .set(limiter.requests_today as f64);
        self.metrics
            .rate_limiter_budget_used_usd
            .set(limiter.cost_today_usd);
        self.metrics
            .rate_limiter_budget_remaining_usd
            .set(limiter.budget_remaining_usd);
        self.metrics
            .circuit_breaker_state
            .set(self.breaker.state().as_gauge_value());
    }
}
