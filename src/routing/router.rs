//! Tier selection
//!
//! The router turns a caption request into a [`RoutingDecision`]: one cache
//! probe, one classifier pass over the hint, then a fixed decision ladder.
//! It calls no models and no limiters; cost controls are the executor's job.

use std::sync::Arc;
use std::time::Instant;

use crate::routing::{
    cache::SemanticCache, classifier::ComplexityClassifier, classifier::ComplexityLevel,
    DecisionMetadata, RouteReason, RoutingDecision, Tier,
};
use crate::telemetry::MetricsRegistry;

/// Edge hints are only trusted above this client confidence
const EDGE_CONFIDENCE_FLOOR: f64 = 0.8;

/// Classifier scores above this push the request to the cloud tier
const COMPLEXITY_CLOUD_THRESHOLD: f64 = 0.7;

/// Budgets below this skip the cloud tier as primary
const LOW_BUDGET_MS: u64 = 200;

/// The cascade decision point
pub struct Router {
    cache: Arc<SemanticCache>,
    classifier: ComplexityClassifier,
    metrics: Arc<MetricsRegistry>,
}

impl Router {
    pub fn new(cache: Arc<SemanticCache>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            cache,
            classifier: ComplexityClassifier::new(),
            metrics,
        }
    }

    /// Decide which tier should caption this image.
    ///
    /// Deterministic for identical inputs modulo cache state. First satisfied
    /// rule wins:
    ///
    /// 1. cache probe hit
    /// 2. edge hint accepted (high client confidence, simple hint)
    /// 3. complex hint pushed to cloud
    /// 4. tight budget floors to local
    /// 5. default local
    pub async fn route(
        &self,
        image_bytes: &[u8],
        budget_ms: u64,
        text_hint: Option<&str>,
        client_confidence: Option<f64>,
    ) -> RoutingDecision {
        let started = Instant::now();
        let decision = self
            .decide(image_bytes, budget_ms, text_hint, client_confidence)
            .await;

        self.metrics
            .routing_decisions_total
            .inc(&[decision.tier.as_str(), decision.reason.as_str()]);
        self.metrics
            .routing_decision_duration_seconds
            .observe(started.elapsed().as_secs_f64());

        tracing::debug!(
            target: "prism::router",
            tier = decision.tier.as_str(),
            reason = decision.reason.as_str(),
            budget_ms,
            "routing decision"
        );

        decision
    }

    async fn decide(
        &self,
        image_bytes: &[u8],
        budget_ms: u64,
        text_hint: Option<&str>,
        client_confidence: Option<f64>,
    ) -> RoutingDecision {
        if let Some(cached) = self.cache.lookup(image_bytes).await {
            return RoutingDecision {
                tier: Tier::Cache,
                reason: RouteReason::CacheHit,
                fallback_chain: vec![],
                budget_ms,
                metadata: DecisionMetadata::Cached(cached),
            };
        }

        if let Some(hint) = text_hint.filter(|h| !h.trim().is_empty()) {
            let complexity = self.classifier.classify(hint);

            let edge_confidence = client_confidence.unwrap_or(0.0);
            if edge_confidence > EDGE_CONFIDENCE_FLOOR
                && complexity.level == ComplexityLevel::Simple
            {
                return RoutingDecision {
                    tier: Tier::Edge,
                    reason: RouteReason::EdgeAccepted,
                    fallback_chain: vec![Tier::Local],
                    budget_ms,
                    metadata: DecisionMetadata::Edge {
                        hint: hint.to_string(),
                        client_confidence,
                    },
                };
            }

            if complexity.score > COMPLEXITY_CLOUD_THRESHOLD {
                return RoutingDecision {
                    tier: Tier::Cloud,
                    reason: RouteReason::HighComplexity,
                    fallback_chain: vec![Tier::Local],
                    budget_ms,
                    metadata: DecisionMetadata::Complexity(complexity.score),
                };
            }
        }

        if budget_ms < LOW_BUDGET_MS {
            return RoutingDecision {
                tier: Tier::Local,
                reason: RouteReason::LowLatencyBudget,
                fallback_chain: vec![Tier::Cloud],
                budget_ms,
                metadata: DecisionMetadata::None,
            };
        }

        RoutingDecision {
            tier: Tier::Local,
            reason: RouteReason::DefaultLocal,
            fallback_chain: vec![Tier::Cloud],
            budget_ms,
            metadata: DecisionMetadata::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::cache::MemoryCacheStore;
    use crate::routing::CaptionRecord;
    use std::time::Duration;

    fn router_with_metrics() -> (Router, Arc<SemanticCache>, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let cache = Arc::new(SemanticCache::new(
            Arc::new(MemoryCacheStore::new()),
            Duration::from_secs(3600),
            metrics.clone(),
        ));
        (Router::new(cache.clone(), metrics.clone()), cache, metrics)
    }

    #[tokio::test]
    async fn test_cache_hit_wins() {
        let (router, cache, _) = router_with_metrics();
        let bytes = b"cached-image";
        let prior = CaptionRecord {
            caption: "c".to_string(),
            confidence: 1.0,
            origin: Tier::Cloud,
            latency_ms: 300,
            cost_usd: 0.001,
            tokens_in: 900,
            tokens_out: 8,
        };
        cache.store(bytes, &prior).await;

        let decision = router.route(bytes, 600, None, None).await;
        assert_eq!(decision.tier, Tier::Cache);
        assert_eq!(decision.reason, RouteReason::CacheHit);
        assert!(decision.fallback_chain.is_empty());
        match decision.metadata {
            DecisionMetadata::Cached(record) => assert_eq!(record, prior),
            other => panic!("expected cached metadata, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_edge_accepted() {
        let (router, _, _) = router_with_metrics();
        let decision = router
            .route(b"img", 600, Some("a red shoe"), Some(0.95))
            .await;
        assert_eq!(decision.tier, Tier::Edge);
        assert_eq!(decision.reason, RouteReason::EdgeAccepted);
        assert_eq!(decision.fallback_chain, vec![Tier::Local]);
    }

    #[tokio::test]
    async fn test_edge_needs_confidence() {
        let (router, _, _) = router_with_metrics();
        // Simple hint but confidence at the floor: not accepted
        let decision = router.route(b"img", 600, Some("a red shoe"), Some(0.8)).await;
        assert_eq!(decision.tier, Tier::Local);
        assert_eq!(decision.reason, RouteReason::DefaultLocal);
    }

    #[tokio::test]
    async fn test_complexity_pushes_to_cloud() {
        let (router, _, _) = router_with_metrics();
        let decision = router
            .route(b"img", 600, Some("a melancholic cyberpunk atmosphere"), None)
            .await;
        assert_eq!(decision.tier, Tier::Cloud);
        assert_eq!(decision.reason, RouteReason::HighComplexity);
        assert_eq!(decision.fallback_chain, vec![Tier::Local]);
    }

    #[tokio::test]
    async fn test_complex_hint_beats_high_confidence() {
        let (router, _, _) = router_with_metrics();
        // High confidence does not rescue an abstract hint
        let decision = router
            .route(b"img", 600, Some("dreamlike vibe"), Some(0.99))
            .await;
        assert_eq!(decision.tier, Tier::Cloud);
        assert_eq!(decision.reason, RouteReason::HighComplexity);
    }

    #[tokio::test]
    async fn test_tight_budget_floors_to_local() {
        let (router, _, _) = router_with_metrics();
        let decision = router.route(b"img", 150, None, None).await;
        assert_eq!(decision.tier, Tier::Local);
        assert_eq!(decision.reason, RouteReason::LowLatencyBudget);
        assert_eq!(decision.fallback_chain, vec![Tier::Cloud]);
        assert_eq!(decision.budget_ms, 150);
    }

    #[tokio::test]
    async fn test_default_local() {
        let (router, _, _) = router_with_metrics();
        let decision = router.route(b"img", 600, None, None).await;
        assert_eq!(decision.tier, Tier::Local);
        assert_eq!(decision.reason, RouteReason::DefaultLocal);
        assert_eq!(decision.fallback_chain, vec![Tier::Cloud]);
    }

    #[tokio::test]
    async fn test_one_metric_sample_per_decision() {
        let (router, _, metrics) = router_with_metrics();
        router.route(b"img", 600, None, None).await;
        router.route(b"img2", 600, None, None).await;
        assert_eq!(
            metrics
                .routing_decisions_total
                .get(&["local", "default_local"]),
            2
        );
        assert_eq!(metrics.routing_decision_duration_seconds.count(), 2);
    }
}
