//! Caption execution
//!
//! Runs a routing decision against the model host. The cloud tier is the
//! only one gated: the breaker is consulted first, then the limiter, then
//! the call runs under a hard timeout. Successes are recorded into the
//! limiter, the breaker, and the cache; failures fall through the decision's
//! fallback chain one tier at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::model::ModelHost;
use crate::routing::{
    breaker::CircuitBreaker, cache::SemanticCache, limiter::RateLimiter, BlockReason,
    CaptionRecord, DecisionMetadata, RoutingDecision, Tier,
};
use crate::telemetry::MetricsRegistry;

/// Conservative per-call estimate handed to the limiter before the actual
/// cost is known
const CLOUD_COST_ESTIMATE_USD: f64 = 0.001;

/// Hard cap on a single cloud call
pub const CLOUD_TIMEOUT: Duration = Duration::from_secs(30);

/// Executor errors. Admission and upstream failures are recovered via the
/// fallback chain; only a fully exhausted chain surfaces.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Every tier in the chain was tried and none produced a caption
    #[error("caption_unavailable: no tier produced a caption")]
    CaptionUnavailable,
}

/// Outcome of a single tier attempt
enum TierOutcome {
    Ok(CaptionRecord),
    FellThrough(Fallthrough),
}

/// Why a tier attempt did not produce a caption
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fallthrough {
    BreakerRejected,
    LimiterBlocked(BlockReason),
    Timeout,
    Upstream(String),
    /// Decision shape did not carry what the tier needs (no hint, no cached
    /// record); only reachable through fallback chains
    NotApplicable,
}

impl Fallthrough {
    fn error_class(&self) -> &'static str {
        match self {
            Fallthrough::BreakerRejected => "breaker_rejected",
            Fallthrough::LimiterBlocked(_) => "limiter_blocked",
            Fallthrough::Timeout => "timeout",
            Fallthrough::Upstream(_) => "upstream",
            Fallthrough::NotApplicable => "not_applicable",
        }
    }
}

/// Runs routing decisions against the model host and records every outcome
pub struct CaptionExecutor {
    models: Arc<dyn ModelHost>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<SemanticCache>,
    metrics: Arc<MetricsRegistry>,
    cloud_timeout: Duration,
}

impl CaptionExecutor {
    pub fn new(
        models: Arc<dyn ModelHost>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        cache: Arc<SemanticCache>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            models,
            limiter,
            breaker,
            cache,
            metrics,
            cloud_timeout: CLOUD_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_cloud_timeout(mut self, timeout: Duration) -> Self {
        self.cloud_timeout = timeout;
        self
    }

    /// Execute the decision's primary tier, then its fallback chain, each
    /// tier at most once. The returned record always carries a non-empty
    /// caption.
    pub async fn execute(
        &self,
        decision: &RoutingDecision,
        image_bytes: &[u8],
        text_hint: Option<&str>,
        client_confidence: Option<f64>,
    ) -> Result<CaptionRecord, ExecutorError> {
        let mut tiers = Vec::with_capacity(1 + decision.fallback_chain.len());
        tiers.push(decision.tier);
        tiers.extend(decision.fallback_chain.iter().copied());

        for tier in tiers {
            let outcome = match tier {
                Tier::Cache => self.attempt_cache(decision),
                Tier::Edge => self.attempt_edge(decision, text_hint, client_confidence),
                Tier::Local => self.attempt_local(image_bytes).await,
                Tier::Cloud => self.attempt_cloud(image_bytes).await,
            };

            match outcome {
                TierOutcome::Ok(record) => {
                    tracing::info!(
                        target: "prism::executor",
                        tier = tier.as_str(),
                        origin = record.origin.as_str(),
                        latency_ms = record.latency_ms,
                        cost_usd = record.cost_usd,
                        "caption produced"
                    );
                    return Ok(record);
                }
                TierOutcome::FellThrough(reason) => {
                    tracing::warn!(
                        target: "prism::executor",
                        tier = tier.as_str(),
                        error_class = reason.error_class(),
                        "tier fell through"
                    );
                }
            }
        }

        tracing::error!(target: "prism::executor", "all tiers exhausted");
        Err(ExecutorError::CaptionUnavailable)
    }

    /// Cache tier: the router already fetched the record; return it verbatim.
    fn attempt_cache(&self, decision: &RoutingDecision) -> TierOutcome {
        match &decision.metadata {
            DecisionMetadata::Cached(record) => TierOutcome::Ok(record.clone()),
            _ => TierOutcome::FellThrough(Fallthrough::NotApplicable),
        }
    }

    /// Edge tier: the client caption is the result; it costs nothing.
    fn attempt_edge(
        &self,
        decision: &RoutingDecision,
        text_hint: Option<&str>,
        client_confidence: Option<f64>,
    ) -> TierOutcome {
        let (hint, confidence) = match &decision.metadata {
            DecisionMetadata::Edge {
                hint,
                client_confidence,
            } => (Some(hint.as_str()), *client_confidence),
            _ => (text_hint, client_confidence),
        };

        match hint.filter(|h| !h.trim().is_empty()) {
            Some(hint) => TierOutcome::Ok(CaptionRecord {
                caption: hint.to_string(),
                confidence: confidence.unwrap_or(1.0),
                origin: Tier::Edge,
                latency_ms: 0,
                cost_usd: 0.0,
                tokens_in: 0,
                tokens_out: 0,
            }),
            None => TierOutcome::FellThrough(Fallthrough::NotApplicable),
        }
    }

    async fn attempt_local(&self, image_bytes: &[u8]) -> TierOutcome {
        match self.models.caption_local(image_bytes).await {
            Ok(local) => {
                let confidence = local
                    .confidence
                    .unwrap_or_else(|| local_confidence_proxy(&local.caption));
                TierOutcome::Ok(CaptionRecord {
                    caption: local.caption,
                    confidence,
                    origin: Tier::Local,
                    latency_ms: local.latency_ms,
                    cost_usd: 0.0,
                    tokens_in: 0,
                    tokens_out: 0,
                })
            }
            Err(e) => TierOutcome::FellThrough(Fallthrough::Upstream(e.to_string())),
        }
    }

    async fn attempt_cloud(&self, image_bytes: &[u8]) -> TierOutcome {
        let provider = self.models.provider_name();
        let model = self.models.cloud_model();

        if self.breaker.can_proceed().is_err() {
            self.metrics.circuit_breaker_rejected_total.inc();
            return TierOutcome::FellThrough(Fallthrough::BreakerRejected);
        }

        if let Err(reason) = self.limiter.admit(CLOUD_COST_ESTIMATE_USD) {
            self.metrics
                .rate_limiter_requests_blocked_total
                .inc(&[reason.as_str()]);
            return TierOutcome::FellThrough(Fallthrough::LimiterBlocked(reason));
        }
        self.metrics.rate_limiter_requests_allowed_total.inc();

        self.metrics.requests_in_flight.inc();
        self.metrics
            .cloud_request_size_bytes
            .observe(image_bytes.len() as f64);
        let started = Instant::now();
        let result = tokio::time::timeout(self.cloud_timeout, self.models.caption_cloud(image_bytes)).await;
        self.metrics.requests_in_flight.dec();
        self.metrics
            .cloud_request_duration_seconds
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(Ok(cloud)) => {
                self.breaker.record_success();
                self.metrics.circuit_breaker_success_total.inc();
                self.limiter.record(cloud.cost_usd);
                self.metrics
                    .cloud_requests_total
                    .inc(&[provider, &model, "success"]);
                self.metrics
                    .cloud_response_size_bytes
                    .observe(cloud.caption.len() as f64);

                let record = CaptionRecord {
                    caption: cloud.caption,
                    confidence: 1.0,
                    origin: Tier::Cloud,
                    latency_ms: cloud.latency_ms,
                    cost_usd: cloud.cost_usd,
                    tokens_in: cloud.tokens_in,
                    tokens_out: cloud.tokens_out,
                };
                // Write-through on cloud success only; free tiers would just
                // pollute the namespace
                self.cache.store(image_bytes, &record).await;
                TierOutcome::Ok(record)
            }
            Ok(Err(e)) => {
                self.record_cloud_failure(provider, &model, "upstream");
                TierOutcome::FellThrough(Fallthrough::Upstream(e.to_string()))
            }
            Err(_) => {
                self.record_cloud_failure(provider, &model, "timeout");
                TierOutcome::FellThrough(Fallthrough::Timeout)
            }
        }
    }

    fn record_cloud_failure(&self, provider: &str, model: &str, error_class: &str) {
        if self.breaker.record_failure() {
            self.metrics.circuit_breaker_opened_total.inc();
        }
        self.metrics.circuit_breaker_failure_total.inc();
        self.metrics
            .cloud_requests_total
            .inc(&[provider, model, "error"]);
        self.metrics
            .cloud_requests_failed_total
            .inc(&[provider, model, error_class]);
    }
}

/// Length-penalised confidence proxy for local captions: starts at 0.9 and
/// loses 0.005 per character past 15, clamped to `[0, 1]`.
fn local_confidence_proxy(caption: &str) -> f64 {
    let overage = caption.chars().count().saturating_sub(15) as f64;
    (0.9 - 0.005 * overage).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MockModelHost;
    use crate::routing::cache::MemoryCacheStore;
    use crate::routing::{
        BreakerState, CircuitBreakerConfig, RateLimiterConfig, RouteReason, Router,
    };

    struct Fixture {
        executor: CaptionExecutor,
        router: Router,
        models: Arc<MockModelHost>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        cache: Arc<SemanticCache>,
        metrics: Arc<MetricsRegistry>,
    }

    fn fixture() -> Fixture {
        fixture_with(RateLimiterConfig::default(), CircuitBreakerConfig::default())
    }

    fn fixture_with(
        limiter_config: RateLimiterConfig,
        breaker_config: CircuitBreakerConfig,
    ) -> Fixture {
        let metrics = Arc::new(MetricsRegistry::new());
        let models = Arc::new(MockModelHost::new());
        let limiter = Arc::new(RateLimiter::new(limiter_config));
        let breaker = Arc::new(CircuitBreaker::new(breaker_config));
        let cache = Arc::new(SemanticCache::new(
            Arc::new(MemoryCacheStore::new()),
            Duration::from_secs(3600),
            metrics.clone(),
        ));
        let executor = CaptionExecutor::new(
            models.clone(),
            limiter.clone(),
            breaker.clone(),
            cache.clone(),
            metrics.clone(),
        );
        let router = Router::new(cache.clone(), metrics.clone());
        Fixture {
            executor,
            router,
            models,
            limiter,
            breaker,
            cache,
            metrics,
        }
    }

    fn cloud_decision() -> RoutingDecision {
        RoutingDecision {
            tier: Tier::Cloud,
            reason: RouteReason::HighComplexity,
            fallback_chain: vec![Tier::Local],
            budget_ms: 600,
            metadata: DecisionMetadata::Complexity(0.8),
        }
    }

    #[tokio::test]
    async fn test_cache_tier_returns_record_verbatim() {
        let f = fixture();
        let prior = CaptionRecord {
            caption: "c".to_string(),
            confidence: 1.0,
            origin: Tier::Cloud,
            latency_ms: 200,
            cost_usd: 0.001,
            tokens_in: 1000,
            tokens_out: 5,
        };
        f.cache.store(b"img", &prior).await;

        let decision = f.router.route(b"img", 600, None, None).await;
        assert_eq!(decision.reason, RouteReason::CacheHit);

        let record = f.executor.execute(&decision, b"img", None, None).await.unwrap();
        assert_eq!(record, prior);
    }

    #[tokio::test]
    async fn test_edge_tier_uses_hint() {
        let f = fixture();
        let decision = f
            .router
            .route(b"img", 600, Some("a red shoe"), Some(0.95))
            .await;
        assert_eq!(decision.tier, Tier::Edge);

        let record = f
            .executor
            .execute(&decision, b"img", Some("a red shoe"), Some(0.95))
            .await
            .unwrap();
        assert_eq!(record.caption, "a red shoe");
        assert_eq!(record.confidence, 0.95);
        assert_eq!(record.origin, Tier::Edge);
        assert_eq!(record.cost_usd, 0.0);
    }

    #[tokio::test]
    async fn test_local_confidence_proxy() {
        assert_eq!(local_confidence_proxy("short"), 0.9);
        let long = "a".repeat(215);
        // 200 chars over the free length exactly exhausts the 0.9 budget
        assert_eq!(local_confidence_proxy(&long), 0.0);
        let mid = "a".repeat(35);
        assert!((local_confidence_proxy(&mid) - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_local_failure_falls_through_to_cloud() {
        let f = fixture();
        f.models.set_fail_local(true);

        let decision = f.router.route(b"img", 600, None, None).await;
        assert_eq!(decision.tier, Tier::Local);
        assert_eq!(decision.fallback_chain, vec![Tier::Cloud]);

        let record = f.executor.execute(&decision, b"img", None, None).await.unwrap();
        assert_eq!(record.origin, Tier::Cloud);
        assert!(record.cost_usd > 0.0);
    }

    #[tokio::test]
    async fn test_cloud_success_records_everywhere() {
        let f = fixture();
        let record = f
            .executor
            .execute(&cloud_decision(), b"img", None, None)
            .await
            .unwrap();
        assert_eq!(record.origin, Tier::Cloud);

        // Limiter saw the request and its actual cost
        let stats = f.limiter.stats();
        assert_eq!(stats.requests_today, 1);
        assert!(stats.cost_today_usd > 0.0);

        // The record was written through to the cache
        assert_eq!(f.cache.lookup(b"img").await, Some(record));

        assert_eq!(f.metrics.circuit_breaker_success_total.get(), 1);
        assert_eq!(
            f.metrics
                .cloud_requests_total
                .get(&["mock", "mock/test-model", "success"]),
            1
        );
    }

    #[tokio::test]
    async fn test_breaker_open_skips_cloud_without_counting() {
        let f = fixture_with(
            RateLimiterConfig::default(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        );
        // Trip the breaker
        f.breaker.record_failure();
        assert_eq!(f.breaker.state(), BreakerState::Open);
        let failures_before = f.metrics.circuit_breaker_failure_total.get();

        let record = f
            .executor
            .execute(&cloud_decision(), b"img", None, None)
            .await
            .unwrap();
        assert_eq!(record.origin, Tier::Local);

        // Rejection counted, but no new failure recorded on the breaker
        assert_eq!(f.metrics.circuit_breaker_rejected_total.get(), 1);
        assert_eq!(f.metrics.circuit_breaker_failure_total.get(), failures_before);
        assert_eq!(f.limiter.stats().requests_today, 0);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_falls_back_to_local() {
        let f = fixture_with(
            RateLimiterConfig {
                max_per_minute: 60,
                max_per_day: 10_000,
                daily_budget_usd: 0.001,
            },
            CircuitBreakerConfig::default(),
        );
        f.limiter.record(0.001);

        let record = f
            .executor
            .execute(&cloud_decision(), b"img", None, None)
            .await
            .unwrap();
        assert_eq!(record.origin, Tier::Local);
        assert_eq!(f.limiter.stats().budget_remaining_usd, 0.0);
        assert_eq!(
            f.metrics
                .rate_limiter_requests_blocked_total
                .get(&["budget_exceeded"]),
            1
        );
    }

    #[tokio::test]
    async fn test_cloud_failures_accumulate_on_breaker() {
        let f = fixture_with(
            RateLimiterConfig::default(),
            CircuitBreakerConfig {
                failure_threshold: 2,
                timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        );
        f.models.set_fail_cloud(true);
        f.models.set_fail_local(true);

        for _ in 0..2 {
            let result = f.executor.execute(&cloud_decision(), b"img", None, None).await;
            assert!(matches!(result, Err(ExecutorError::CaptionUnavailable)));
        }

        assert_eq!(f.breaker.state(), BreakerState::Open);
        assert_eq!(f.metrics.circuit_breaker_opened_total.get(), 1);
        assert_eq!(f.metrics.circuit_breaker_failure_total.get(), 2);
    }

    #[tokio::test]
    async fn test_cloud_timeout_counts_as_failure() {
        struct SlowHost(MockModelHost);

        #[async_trait::async_trait]
        impl crate::model::ModelHost for SlowHost {
            async fn caption_local(&self, image: &[u8]) -> crate::model::ModelResult<crate::model::LocalCaption> {
                self.0.caption_local(image).await
            }
            async fn caption_cloud(&self, image: &[u8]) -> crate::model::ModelResult<crate::model::CloudCaption> {
                tokio::time::sleep(Duration::from_millis(250)).await;
                self.0.caption_cloud(image).await
            }
            async fn embed_image(&self, image: &[u8]) -> crate::model::ModelResult<Vec<f32>> {
                self.0.embed_image(image).await
            }
            async fn embed_text(&self, text: &str) -> crate::model::ModelResult<Vec<f32>> {
                self.0.embed_text(text).await
            }
            fn provider_name(&self) -> &'static str {
                "mock"
            }
            fn cloud_model(&self) -> String {
                "mock/test-model".to_string()
            }
        }

        let metrics = Arc::new(MetricsRegistry::new());
        let cache = Arc::new(SemanticCache::new(
            Arc::new(MemoryCacheStore::new()),
            Duration::from_secs(3600),
            metrics.clone(),
        ));
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
        let executor = CaptionExecutor::new(
            Arc::new(SlowHost(MockModelHost::new())),
            Arc::new(RateLimiter::new(RateLimiterConfig::default())),
            breaker.clone(),
            cache,
            metrics.clone(),
        )
        .with_cloud_timeout(Duration::from_millis(20));

        let record = executor
            .execute(&cloud_decision(), b"img", None, None)
            .await
            .unwrap();
        // Timed out on cloud, recovered via local fallback
        assert_eq!(record.origin, Tier::Local);
        assert_eq!(
            metrics
                .cloud_requests_failed_total
                .get(&["mock", "mock/test-model", "timeout"]),
            1
        );
        assert_eq!(breaker.stats().failure_count, 1);
    }

    #[tokio::test]
    async fn test_exhausted_chain_surfaces_single_error() {
        let f = fixture();
        f.models.set_fail_local(true);
        f.models.set_fail_cloud(true);

        let decision = f.router.route(b"img", 600, None, None).await;
        let result = f.executor.execute(&decision, b"img", None, None).await;
        assert!(matches!(result, Err(ExecutorError::CaptionUnavailable)));
    }
}
