//! Search planning
//!
//! Embed the query text, run one compound query against the hybrid index,
//! and decorate hits with download URLs. Scope validation happens here:
//! anonymous callers may only search `public`.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{ModelError, ModelHost};
use crate::storage::{BlobStore, EmbedIndex, SearchScope, StoreError};
use crate::telemetry::MetricsRegistry;

/// Search errors
#[derive(Error, Debug)]
pub enum SearchError {
    /// `mine` and `all` scopes require an authenticated caller
    #[error("unauthenticated: scope requires authentication")]
    Unauthenticated,

    #[error("embedding failed: {0}")]
    Model(#[from] ModelError),

    #[error("index query failed: {0}")]
    Store(#[from] StoreError),
}

/// One scored result with its content URLs
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f64,
    pub caption: Option<String>,
    pub download_url: String,
    pub thumbnail_url: String,
}

/// Response envelope for `GET /search`
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
}

/// Plans and executes tenant-filtered hybrid searches
pub struct SearchPlanner {
    models: Arc<dyn ModelHost>,
    store: Arc<dyn EmbedIndex>,
    blobs: Arc<dyn BlobStore>,
    metrics: Arc<MetricsRegistry>,
}

impl SearchPlanner {
    pub fn new(
        models: Arc<dyn ModelHost>,
        store: Arc<dyn EmbedIndex>,
        blobs: Arc<dyn BlobStore>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            models,
            store,
            blobs,
            metrics,
        }
    }

    /// Run a search. The final score per hit is
    /// `(1 - cosine_distance) + w * [query appears in caption]`.
    pub async fn search(
        &self,
        q_text: &str,
        k: i64,
        scope: SearchScope,
        caller: Option<Uuid>,
    ) -> Result<SearchResponse, SearchError> {
        require_auth_for_scope(scope, caller)?;

        let started = Instant::now();
        let q_vec = self.models.embed_text(q_text).await?;
        let hits = self
            .store
            .search(&q_vec, k, Some(q_text), caller, scope)
            .await?;
        self.metrics
            .search_duration_seconds
            .observe(started.elapsed().as_secs_f64());

        let results = hits
            .into_iter()
            .map(|hit| SearchResult {
                download_url: self.blobs.image_url(&hit.id),
                thumbnail_url: self.blobs.thumbnail_url(&hit.id),
                id: hit.id,
                score: hit.score,
                caption: hit.caption,
            })
            .collect();

        Ok(SearchResponse {
            query: q_text.to_string(),
            results,
        })
    }
}

/// Anonymous callers may only search `public`; `mine` and `all` need an
/// authenticated identity. Checked before any model or index work runs.
fn require_auth_for_scope(scope: SearchScope, caller: Option<Uuid>) -> Result<(), SearchError> {
    if caller.is_none() && scope != SearchScope::Public {
        return Err(SearchError::Unauthenticated);
    }
    Ok(())
}
