//! # PRISM - Cost-Aware Caption Routing & Image Search
//!
//! A service that ingests images, captions them through a cost/latency-aware
//! tier cascade, embeds them into a joint image/text space, and serves
//! hybrid semantic+keyword search with multi-tenant access control.
//!
//! ## Architecture
//!
//! - `routing`: the caption cascade - rate limiter, circuit breaker,
//!   semantic cache, complexity classifier, router, executor
//! - `model`: the model host capability - local sidecar, cloud providers,
//!   deterministic mock
//! - `storage`: blob store (originals + thumbnails) and the hybrid
//!   vector+keyword index
//! - `jobs`: redis-backed job queues and bounded worker pools
//! - `search`: tenant-filtered search planning
//! - `api`: the HTTP gateway surface
//! - `auth`: JWT validation and per-image access rules
//! - `telemetry`: the metrics registry behind `/metrics`
//! - `config`: the environment envelope
//! - `services`: the process-scoped dependency struct

pub mod api;
pub mod auth;
pub mod config;
pub mod jobs;
pub mod model;
pub mod routing;
pub mod search;
pub mod services;
pub mod storage;
pub mod telemetry;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
