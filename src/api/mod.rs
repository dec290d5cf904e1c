//! # HTTP API
//!
//! The gateway surface: sync and async ingestion, job polling, search,
//! image metadata/lifecycle, health, metrics, and the router stats snapshot.
//!
//! - `routes`: router assembly and layering
//! - `handlers`: request handlers
//! - `middleware`: auth extractors
//! - `responses`: error body and conversions

pub mod handlers;
pub mod middleware;
pub mod responses;
pub mod routes;

pub use handlers::AppState;
pub use responses::ApiError;
pub use routes::create_router;
