//! # Search
//!
//! Translates a text query into a tenant-filtered vector+keyword plan
//! against the embed store. Independent of the caption router, but bound by
//! the same tenancy rules.

pub mod planner;

pub use planner::{SearchError, SearchPlanner, SearchResponse, SearchResult};
