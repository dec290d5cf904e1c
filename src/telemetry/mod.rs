//! # Observability
//!
//! Metrics surfacing every routing decision, admission check, breaker
//! transition, executor outcome, and worker lifecycle event. Metric names and
//! label sets are the contract; the in-process registry renders them in
//! Prometheus text exposition format on `GET /metrics`.

pub mod metrics;

pub use metrics::{Counter, Gauge, Histogram, LabeledCounter, MetricsRegistry};
