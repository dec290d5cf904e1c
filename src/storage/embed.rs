//! Hybrid vector+keyword index
//!
//! The durable per-image row lives behind the [`EmbedIndex`] trait: Postgres
//! with a pgvector column in production ([`EmbedStore`]), an in-memory fake
//! for tests ([`MemoryEmbedIndex`]). Search combines cosine similarity with
//! an optional keyword-containment boost; every query is filtered by the
//! tenancy rules of the caller's scope. Vectors cross the Postgres wire as
//! text literals cast to `vector` so the driver needs no pgvector-specific
//! codec.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::routing::Tier;

/// Embed store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for embed store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Per-image access class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Public,
    PublicAdmin,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
            Visibility::PublicAdmin => "public_admin",
        }
    }

    /// Whether anonymous callers may see images with this visibility
    pub fn is_public(&self) -> bool {
        matches!(self, Visibility::Public | Visibility::PublicAdmin)
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Visibility::Private),
            "public" => Ok(Visibility::Public),
            "public_admin" => Ok(Visibility::PublicAdmin),
            other => Err(format!(
                "visibility must be 'private', 'public', or 'public_admin', got '{}'",
                other
            )),
        }
    }
}

/// Caller-requested tenancy filter on search and listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Public images only; valid for anonymous callers
    Public,
    /// Caller's own images; authenticated only
    Mine,
    /// Caller's own plus public; authenticated only
    All,
}

impl FromStr for SearchScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(SearchScope::Public),
            "mine" => Ok(SearchScope::Mine),
            "all" => Ok(SearchScope::All),
            other => Err(format!(
                "scope must be 'all', 'mine', or 'public', got '{}'",
                other
            )),
        }
    }
}

/// The durable image row
#[derive(Debug, Clone, Serialize)]
pub struct ImageRow {
    pub id: String,
    pub caption: String,
    pub confidence: f64,
    pub origin: String,
    pub format: Option<String>,
    pub size_bytes: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub owner_user_id: Option<Uuid>,
    pub visibility: Visibility,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A scored search result
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub caption: Option<String>,
    pub score: f64,
}

/// Upsert payload for a freshly ingested image
#[derive(Debug)]
pub struct UpsertImage<'a> {
    pub image_id: &'a str,
    pub caption: &'a str,
    pub confidence: f64,
    pub origin: Tier,
    pub vector: &'a [f32],
    pub format: &'a str,
    pub size_bytes: i64,
    pub width: i32,
    pub height: i32,
    pub owner_user_id: Option<Uuid>,
    pub visibility: Visibility,
}

/// The hybrid index capability consumed by the workers, the API, and the
/// search planner. Tenancy filtering is part of this contract: no
/// implementation may return a row whose `(owner, visibility, deleted_at)`
/// fails the scope rule.
#[async_trait]
pub trait EmbedIndex: Send + Sync {
    /// Insert or update the image row keyed by fingerprint
    async fn upsert_image(&self, image: UpsertImage<'_>) -> StoreResult<()>;

    /// Fetch a row by id, deleted or not; access control is the caller's job
    async fn fetch_image(&self, image_id: &str) -> StoreResult<Option<ImageRow>>;

    /// Hybrid search: cosine similarity plus an optional case-insensitive
    /// keyword-containment boost, filtered by tenancy.
    async fn search(
        &self,
        query_vec: &[f32],
        k: i64,
        text_query: Option<&str>,
        caller: Option<Uuid>,
        scope: SearchScope,
    ) -> StoreResult<Vec<SearchHit>>;

    /// List non-deleted images visible to the caller, newest first
    async fn list_images(
        &self,
        caller: Option<Uuid>,
        is_admin: bool,
        limit: i64,
        offset: i64,
        visibility_filter: Option<Visibility>,
    ) -> StoreResult<Vec<ImageRow>>;

    async fn update_visibility(&self, image_id: &str, visibility: Visibility) -> StoreResult<()>;

    /// Mark the row deleted; search and listing stop returning it
    async fn soft_delete_image(&self, image_id: &str) -> StoreResult<()>;

    /// Cheap liveness probe against the backing store
    async fn ping(&self) -> StoreResult<()>;
}

/// pgvector text literal: `[v1,v2,...]`
fn vector_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Tenancy predicate for the given scope. `owner_param` names the bind slot
/// the caller id occupies when the clause needs one.
fn tenancy_predicate(scope: SearchScope, caller: Option<Uuid>, owner_param: usize) -> (String, bool) {
    const PUBLIC: &str = "visibility IN ('public', 'public_admin')";
    match (scope, caller) {
        (SearchScope::Public, _) | (_, None) => (PUBLIC.to_string(), false),
        (SearchScope::Mine, Some(_)) => (format!("owner_user_id = ${}", owner_param), true),
        (SearchScope::All, Some(_)) => (
            format!("(owner_user_id = ${} OR {})", owner_param, PUBLIC),
            true,
        ),
    }
}

/// The same scope rule as a predicate over a row, used by the in-memory
/// index and kept in lockstep with [`tenancy_predicate`].
fn scope_admits(scope: SearchScope, caller: Option<Uuid>, row: &ImageRow) -> bool {
    match (scope, caller) {
        (SearchScope::Public, _) | (_, None) => row.visibility.is_public(),
        (SearchScope::Mine, Some(caller)) => row.owner_user_id == Some(caller),
        (SearchScope::All, Some(caller)) => {
            row.owner_user_id == Some(caller) || row.visibility.is_public()
        }
    }
}

// ============================================================================
// Postgres implementation
// ============================================================================

/// Postgres-backed hybrid index
pub struct EmbedStore {
    pool: PgPool,
    text_boost_enabled: bool,
    text_boost_weight: f64,
}

impl EmbedStore {
    pub fn new(pool: PgPool, text_boost_enabled: bool, text_boost_weight: f64) -> Self {
        Self {
            pool,
            text_boost_enabled,
            text_boost_weight,
        }
    }

    /// Create the extension, table, and ANN index. Extension and index
    /// failures are tolerated so the service can start against a database
    /// it cannot alter; row operations will surface real errors.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        if let Err(e) = sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
        {
            tracing::warn!(target: "prism::embed", error = %e, "could not create pgvector extension");
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY,
                caption TEXT NOT NULL DEFAULT '',
                caption_confidence DOUBLE PRECISION NOT NULL DEFAULT 0,
                caption_origin TEXT NOT NULL DEFAULT 'local',
                embed_vector vector(512),
                format TEXT,
                size_bytes BIGINT,
                width INTEGER,
                height INTEGER,
                owner_user_id UUID,
                visibility TEXT NOT NULL DEFAULT 'private',
                deleted_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        if let Err(e) = sqlx::query(
            "CREATE INDEX IF NOT EXISTS images_vec_hnsw ON images \
             USING hnsw (embed_vector vector_cosine_ops)",
        )
        .execute(&self.pool)
        .await
        {
            tracing::warn!(target: "prism::embed", error = %e, "could not create HNSW index");
        }

        Ok(())
    }

    fn decode_row(row: sqlx::postgres::PgRow) -> Result<ImageRow, StoreError> {
        let visibility: String = row.try_get("visibility")?;
        Ok(ImageRow {
            id: row.try_get("id")?,
            caption: row.try_get("caption")?,
            confidence: row.try_get("caption_confidence")?,
            origin: row.try_get("caption_origin")?,
            format: row.try_get("format")?,
            size_bytes: row.try_get("size_bytes")?,
            width: row.try_get("width")?,
            height: row.try_get("height")?,
            owner_user_id: row.try_get("owner_user_id")?,
            visibility: visibility.parse().unwrap_or(Visibility::Private),
            deleted_at: row.try_get("deleted_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl EmbedIndex for EmbedStore {
    async fn upsert_image(&self, image: UpsertImage<'_>) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO images (
                id, caption, caption_confidence, caption_origin, embed_vector,
                format, size_bytes, width, height, owner_user_id, visibility, updated_at
            )
            VALUES ($1, $2, $3, $4, CAST($5 AS vector), $6, $7, $8, $9, $10, $11, now())
            ON CONFLICT (id) DO UPDATE SET
                caption = EXCLUDED.caption,
                caption_confidence = EXCLUDED.caption_confidence,
                caption_origin = EXCLUDED.caption_origin,
                embed_vector = EXCLUDED.embed_vector,
                format = EXCLUDED.format,
                size_bytes = EXCLUDED.size_bytes,
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                owner_user_id = EXCLUDED.owner_user_id,
                visibility = EXCLUDED.visibility,
                updated_at = now()
            "#,
        )
        .bind(image.image_id)
        .bind(image.caption)
        .bind(image.confidence)
        .bind(image.origin.as_str())
        .bind(vector_literal(image.vector))
        .bind(image.format)
        .bind(image.size_bytes)
        .bind(image.width)
        .bind(image.height)
        .bind(image.owner_user_id)
        .bind(image.visibility.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_image(&self, image_id: &str) -> StoreResult<Option<ImageRow>> {
        let row = sqlx::query(
            "SELECT id, caption, caption_confidence, caption_origin, format, size_bytes, \
             width, height, owner_user_id, visibility, deleted_at, created_at, updated_at \
             FROM images WHERE id = $1",
        )
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::decode_row).transpose()?)
    }

    async fn search(
        &self,
        query_vec: &[f32],
        k: i64,
        text_query: Option<&str>,
        caller: Option<Uuid>,
        scope: SearchScope,
    ) -> StoreResult<Vec<SearchHit>> {
        let qvec = vector_literal(query_vec);
        let hybrid = self.text_boost_enabled
            && text_query.map(|q| !q.trim().is_empty()).unwrap_or(false);

        let rows = if hybrid {
            let (tenancy, binds_owner) = tenancy_predicate(scope, caller, 4);
            let sql = format!(
                "SELECT id, caption, \
                 ((1 - (embed_vector <=> CAST($1 AS vector))) + \
                  CASE WHEN lower(caption) LIKE '%' || $2 || '%' THEN $3 ELSE 0 END) AS score \
                 FROM images \
                 WHERE deleted_at IS NULL AND {} \
                 ORDER BY score DESC LIMIT ${}",
                tenancy,
                if binds_owner { 5 } else { 4 }
            );
            let qterm = text_query.unwrap_or_default().trim().to_lowercase();
            let mut query = sqlx::query(&sql)
                .bind(&qvec)
                .bind(qterm)
                .bind(self.text_boost_weight);
            if binds_owner {
                query = query.bind(caller);
            }
            query.bind(k).fetch_all(&self.pool).await?
        } else {
            let (tenancy, binds_owner) = tenancy_predicate(scope, caller, 2);
            let sql = format!(
                "SELECT id, caption, (1 - (embed_vector <=> CAST($1 AS vector))) AS score \
                 FROM images \
                 WHERE deleted_at IS NULL AND {} \
                 ORDER BY embed_vector <=> CAST($1 AS vector) LIMIT ${}",
                tenancy,
                if binds_owner { 3 } else { 2 }
            );
            let mut query = sqlx::query(&sql).bind(&qvec);
            if binds_owner {
                query = query.bind(caller);
            }
            query.bind(k).fetch_all(&self.pool).await?
        };

        rows.into_iter()
            .map(|row| {
                Ok(SearchHit {
                    id: row.try_get("id")?,
                    caption: row.try_get("caption")?,
                    score: row.try_get("score")?,
                })
            })
            .collect()
    }

    async fn list_images(
        &self,
        caller: Option<Uuid>,
        is_admin: bool,
        limit: i64,
        offset: i64,
        visibility_filter: Option<Visibility>,
    ) -> StoreResult<Vec<ImageRow>> {
        let mut conditions = vec!["deleted_at IS NULL".to_string()];
        let mut next_param = 1;

        let tenancy_param = if is_admin {
            None
        } else {
            match caller {
                Some(_) => {
                    conditions.push(format!(
                        "(owner_user_id = ${} OR visibility IN ('public', 'public_admin'))",
                        next_param
                    ));
                    next_param += 1;
                    Some(())
                }
                None => {
                    conditions.push("visibility IN ('public', 'public_admin')".to_string());
                    None
                }
            }
        };

        let visibility_param = visibility_filter.map(|_| {
            conditions.push(format!("visibility = ${}", next_param));
            next_param += 1;
        });

        let sql = format!(
            "SELECT id, caption, caption_confidence, caption_origin, format, size_bytes, \
             width, height, owner_user_id, visibility, deleted_at, created_at, updated_at \
             FROM images WHERE {} ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
            conditions.join(" AND "),
            next_param,
            next_param + 1
        );

        let mut query = sqlx::query(&sql);
        if tenancy_param.is_some() {
            query = query.bind(caller);
        }
        if visibility_param.is_some() {
            query = query.bind(visibility_filter.map(|v| v.as_str()));
        }
        let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;

        rows.into_iter().map(Self::decode_row).collect()
    }

    async fn update_visibility(&self, image_id: &str, visibility: Visibility) -> StoreResult<()> {
        sqlx::query("UPDATE images SET visibility = $2, updated_at = now() WHERE id = $1")
            .bind(image_id)
            .bind(visibility.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn soft_delete_image(&self, image_id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE images SET deleted_at = now(), updated_at = now() WHERE id = $1")
            .bind(image_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

struct MemoryEntry {
    row: ImageRow,
    vector: Vec<f32>,
}

/// In-process index with the same scoring and tenancy semantics as the
/// Postgres store. Backs tests and single-node experiments; nothing
/// persists.
pub struct MemoryEmbedIndex {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    text_boost_enabled: bool,
    text_boost_weight: f64,
}

impl MemoryEmbedIndex {
    pub fn new(text_boost_enabled: bool, text_boost_weight: f64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            text_boost_enabled,
            text_boost_weight,
        }
    }
}

#[async_trait]
impl EmbedIndex for MemoryEmbedIndex {
    async fn upsert_image(&self, image: UpsertImage<'_>) -> StoreResult<()> {
        let mut entries = self.entries.write();
        let now = Utc::now();
        let created_at = entries
            .get(image.image_id)
            .and_then(|e| e.row.created_at)
            .unwrap_or(now);

        entries.insert(
            image.image_id.to_string(),
            MemoryEntry {
                row: ImageRow {
                    id: image.image_id.to_string(),
                    caption: image.caption.to_string(),
                    confidence: image.confidence,
                    origin: image.origin.as_str().to_string(),
                    format: Some(image.format.to_string()),
                    size_bytes: Some(image.size_bytes),
                    width: Some(image.width),
                    height: Some(image.height),
                    owner_user_id: image.owner_user_id,
                    visibility: image.visibility,
                    deleted_at: None,
                    created_at: Some(created_at),
                    updated_at: Some(now),
                },
                vector: image.vector.to_vec(),
            },
        );
        Ok(())
    }

    async fn fetch_image(&self, image_id: &str) -> StoreResult<Option<ImageRow>> {
        Ok(self.entries.read().get(image_id).map(|e| e.row.clone()))
    }

    async fn search(
        &self,
        query_vec: &[f32],
        k: i64,
        text_query: Option<&str>,
        caller: Option<Uuid>,
        scope: SearchScope,
    ) -> StoreResult<Vec<SearchHit>> {
        let qterm = text_query
            .filter(|_| self.text_boost_enabled)
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());

        let entries = self.entries.read();
        let mut hits: Vec<SearchHit> = entries
            .values()
            .filter(|e| e.row.deleted_at.is_none())
            .filter(|e| scope_admits(scope, caller, &e.row))
            .map(|e| {
                let mut score = cosine_similarity(query_vec, &e.vector);
                if let Some(qterm) = &qterm {
                    if e.row.caption.to_lowercase().contains(qterm.as_str()) {
                        score += self.text_boost_weight;
                    }
                }
                SearchHit {
                    id: e.row.id.clone(),
                    caption: Some(e.row.caption.clone()),
                    score,
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k.max(0) as usize);
        Ok(hits)
    }

    async fn list_images(
        &self,
        caller: Option<Uuid>,
        is_admin: bool,
        limit: i64,
        offset: i64,
        visibility_filter: Option<Visibility>,
    ) -> StoreResult<Vec<ImageRow>> {
        let entries = self.entries.read();
        let mut rows: Vec<ImageRow> = entries
            .values()
            .map(|e| &e.row)
            .filter(|row| row.deleted_at.is_none())
            .filter(|row| {
                is_admin || scope_admits(SearchScope::All, caller, row)
            })
            .filter(|row| visibility_filter.map_or(true, |v| row.visibility == v))
            .cloned()
            .collect();

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_visibility(&self, image_id: &str, visibility: Visibility) -> StoreResult<()> {
        if let Some(entry) = self.entries.write().get_mut(image_id) {
            entry.row.visibility = visibility;
            entry.row.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn soft_delete_image(&self, image_id: &str) -> StoreResult<()> {
        if let Some(entry) = self.entries.write().get_mut(image_id) {
            let now = Utc::now();
            entry.row.deleted_at = Some(now);
            entry.row.updated_at = Some(now);
        }
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[0.5, -1.0, 2.0]), "[0.5,-1,2]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn test_visibility_parsing() {
        assert_eq!("private".parse::<Visibility>(), Ok(Visibility::Private));
        assert_eq!("public_admin".parse::<Visibility>(), Ok(Visibility::PublicAdmin));
        assert!("protected".parse::<Visibility>().is_err());
        assert!(!Visibility::Private.is_public());
        assert!(Visibility::PublicAdmin.is_public());
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!("mine".parse::<SearchScope>(), Ok(SearchScope::Mine));
        assert!("everything".parse::<SearchScope>().is_err());
    }

    #[test]
    fn test_tenancy_public_scope() {
        let caller = Some(Uuid::new_v4());
        let (clause, binds) = tenancy_predicate(SearchScope::Public, caller, 2);
        assert_eq!(clause, "visibility IN ('public', 'public_admin')");
        assert!(!binds);
    }

    #[test]
    fn test_tenancy_anonymous_never_sees_private() {
        // Anonymous callers collapse every scope to the public filter;
        // the planner rejects mine/all before this layer
        for scope in [SearchScope::Public, SearchScope::Mine, SearchScope::All] {
            let (clause, binds) = tenancy_predicate(scope, None, 2);
            assert_eq!(clause, "visibility IN ('public', 'public_admin')");
            assert!(!binds);
        }
    }

    #[test]
    fn test_tenancy_mine_scope() {
        let (clause, binds) = tenancy_predicate(SearchScope::Mine, Some(Uuid::new_v4()), 4);
        assert_eq!(clause, "owner_user_id = $4");
        assert!(binds);
    }

    #[test]
    fn test_tenancy_all_scope() {
        let (clause, binds) = tenancy_predicate(SearchScope::All, Some(Uuid::new_v4()), 2);
        assert_eq!(
            clause,
            "(owner_user_id = $2 OR visibility IN ('public', 'public_admin'))"
        );
        assert!(binds);
    }

    #[test]
    fn test_scope_admits_matches_sql_predicate() {
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let row = |visibility: Visibility| ImageRow {
            id: "x".to_string(),
            caption: String::new(),
            confidence: 0.0,
            origin: "local".to_string(),
            format: None,
            size_bytes: None,
            width: None,
            height: None,
            owner_user_id: Some(owner),
            visibility,
            deleted_at: None,
            created_at: None,
            updated_at: None,
        };

        let private = row(Visibility::Private);
        let public = row(Visibility::Public);

        assert!(!scope_admits(SearchScope::Public, None, &private));
        assert!(scope_admits(SearchScope::Public, None, &public));
        assert!(scope_admits(SearchScope::Mine, Some(owner), &private));
        assert!(!scope_admits(SearchScope::Mine, Some(other), &private));
        assert!(scope_admits(SearchScope::All, Some(owner), &private));
        assert!(!scope_admits(SearchScope::All, Some(other), &private));
        assert!(scope_admits(SearchScope::All, Some(other), &public));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_memory_index_roundtrip() {
        let index = MemoryEmbedIndex::new(true, 0.2);
        let owner = Uuid::new_v4();
        index
            .upsert_image(UpsertImage {
                image_id: "abcd",
                caption: "a red shoe",
                confidence: 0.9,
                origin: Tier::Local,
                vector: &[1.0, 0.0],
                format: "jpeg",
                size_bytes: 10,
                width: 1,
                height: 1,
                owner_user_id: Some(owner),
                visibility: Visibility::Private,
            })
            .await
            .unwrap();

        let row = index.fetch_image("abcd").await.unwrap().unwrap();
        assert_eq!(row.caption, "a red shoe");
        assert_eq!(row.owner_user_id, Some(owner));

        index.soft_delete_image("abcd").await.unwrap();
        let deleted = index.fetch_image("abcd").await.unwrap().unwrap();
        assert!(deleted.deleted_at.is_some());
        // Deleted rows stay fetchable but never search
        let hits = index
            .search(&[1.0, 0.0], 10, None, Some(owner), SearchScope::Mine)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
