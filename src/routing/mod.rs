//! # AI Feature Routing
//!
//! The caption cascade: every request is dispatched to the cheapest tier
//! capable of producing an acceptable result.
//!
//! - `limiter`: per-minute / per-day / budget admission control for Cloud
//! - `breaker`: three-state fault isolator for the Cloud tier
//! - `cache`: content-addressed caption memo with TTL
//! - `classifier`: simple/moderate/complex hint classification
//! - `router`: tier selection and fallback chain construction
//! - `executor`: runs the chosen tier and records outcomes

pub mod breaker;
pub mod cache;
pub mod classifier;
pub mod executor;
pub mod limiter;
pub mod router;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use cache::{CacheStore, MemoryCacheStore, RedisCacheStore, SemanticCache};
pub use classifier::{ComplexityClassifier, ComplexityLevel};
pub use executor::{CaptionExecutor, ExecutorError};
pub use limiter::{BlockReason, RateLimiter, RateLimiterConfig};
pub use router::Router;

/// A caption producer. Ordered roughly by cost: edge and cache are free,
/// local costs compute, cloud costs money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Caption computed on the client and submitted as a hint
    Edge,
    /// Prior caption keyed by the image's content hash
    Cache,
    /// In-process (sidecar) caption model
    Local,
    /// External vision API; the only tier gated by limiter and breaker
    Cloud,
}

impl Tier {
    /// Stable label used in metrics and persisted records
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Edge => "edge",
            Tier::Cache => "cache",
            Tier::Local => "local",
            Tier::Cloud => "cloud",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the router picked a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    CacheHit,
    EdgeAccepted,
    DefaultLocal,
    LowLatencyBudget,
    HighComplexity,
}

impl RouteReason {
    /// Stable label used in metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteReason::CacheHit => "cache_hit",
            RouteReason::EdgeAccepted => "edge_accepted",
            RouteReason::DefaultLocal => "default_local",
            RouteReason::LowLatencyBudget => "low_latency_budget",
            RouteReason::HighComplexity => "high_complexity",
        }
    }
}

/// The outcome of a caption attempt, persisted to the embed store and the
/// job result slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionRecord {
    /// Caption text; non-empty on success
    pub caption: String,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// Which tier produced the caption
    pub origin: Tier,
    /// Wall-clock time to produce the caption
    pub latency_ms: u64,
    /// Actual spend; zero for non-cloud origins
    #[serde(default)]
    pub cost_usd: f64,
    /// Token usage; zero when not applicable
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
}

/// Decision-specific payload carried from the router into the executor
#[derive(Debug, Clone, Default)]
pub enum DecisionMetadata {
    #[default]
    None,
    /// The prior record found by the cache probe
    Cached(CaptionRecord),
    /// The accepted edge hint and the client's confidence in it
    Edge {
        hint: String,
        client_confidence: Option<f64>,
    },
    /// Classifier score that pushed the request to cloud
    Complexity(f64),
}

/// Routing decision emitted by [`Router::route`] and consumed by
/// [`CaptionExecutor::execute`].
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// Primary tier to attempt
    pub tier: Tier,
    /// Why this tier was chosen
    pub reason: RouteReason,
    /// Tiers attempted, in order, if the primary fails
    pub fallback_chain: Vec<Tier>,
    /// Latency budget carried from the request
    pub budget_ms: u64,
    /// Tier-specific payload
    pub metadata: DecisionMetadata,
}

/// Full SHA-256 of image bytes as lowercase hex. Cache keys use this value.
pub fn content_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// 16-hex-character prefix of SHA-256; the persistent image identity.
pub fn image_fingerprint(bytes: &[u8]) -> String {
    let mut id = content_sha256(bytes);
    id.truncate(16);
    id
}
