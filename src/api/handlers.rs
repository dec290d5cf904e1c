//! Request handlers
//!
//! The sync ingestion path runs the full cascade inline: route, execute,
//! embed, persist. The async path only validates and enqueues; workers do
//! the rest. Metadata and lifecycle routes enforce the per-image access
//! rules before touching blobs.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::middleware::{MaybeUser, RequireUser};
use super::responses::ApiError;
use crate::auth::CurrentUser;
use crate::jobs::{IngestionJob, JobPriority, JobStatus};
use crate::routing::image_fingerprint;
use crate::services::Services;
use crate::storage::{EmbedIndex, ImageRow, SearchScope, UpsertImage, Visibility};

/// Uploads past this size are rejected before any decoding
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Listing page size cap
const MAX_PAGE_SIZE: i64 = 100;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
}

// ============================================================================
// Upload parsing
// ============================================================================

struct Upload {
    bytes: Vec<u8>,
    filename: Option<String>,
    content_type: Option<String>,
    visibility: Visibility,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut bytes = None;
    let mut filename = None;
    let mut content_type = None;
    let mut visibility = Visibility::Private;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                filename = field.file_name().map(|s| s.to_string());
                content_type = field.content_type().map(|s| s.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("unreadable file field: {}", e)))?;
                bytes = Some(data.to_vec());
            }
            Some("visibility") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("unreadable visibility: {}", e)))?;
                visibility = text.parse().map_err(ApiError::bad_request)?;
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| ApiError::bad_request("missing 'file' field"))?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("uploaded file is empty"));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::bad_request(format!(
            "uploaded file exceeds {} bytes",
            MAX_UPLOAD_BYTES
        )));
    }

    Ok(Upload {
        bytes,
        filename,
        content_type,
        visibility,
    })
}

fn check_visibility_grant(visibility: Visibility, user: &CurrentUser) -> Result<(), ApiError> {
    if visibility == Visibility::PublicAdmin && !user.is_admin() {
        return Err(ApiError::forbidden(
            "Only admins can create public_admin images",
        ));
    }
    Ok(())
}

/// Edge hint headers: `x-client-caption` and `x-client-confidence`
fn edge_hint(headers: &HeaderMap) -> (Option<String>, Option<f64>) {
    let caption = headers
        .get("x-client-caption")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty());
    let confidence = headers
        .get("x-client-confidence")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<f64>().ok());
    (caption, confidence)
}

fn content_type_for(format: &str) -> &'static str {
    match format {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}

// ============================================================================
// Sync ingestion
// ============================================================================

/// Response body for `POST /images`
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub id: String,
    pub caption: String,
    pub origin: String,
    pub confidence: f64,
    pub download_url: String,
    pub thumbnail_url: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    pub format: String,
}

/// `POST /images`: caption, embed, and persist one image synchronously
pub async fn ingest_image(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    let started = Instant::now();
    let services = &state.services;

    let upload = read_upload(multipart).await?;
    check_visibility_grant(upload.visibility, &user)?;

    let image_id = image_fingerprint(&upload.bytes);
    // Blob write validates decodability and yields dimensions
    let blob = services.blobs.save(&image_id, &upload.bytes).await?;

    let (hint, client_confidence) = edge_hint(&headers);
    let decision = services
        .router
        .route(
            &upload.bytes,
            services.config.caption_latency_budget_ms,
            hint.as_deref(),
            client_confidence,
        )
        .await;
    let record = services
        .executor
        .execute(&decision, &upload.bytes, hint.as_deref(), client_confidence)
        .await?;

    let vector = services.models.embed_image(&upload.bytes).await?;

    services
        .embed
        .upsert_image(UpsertImage {
            image_id: &image_id,
            caption: &record.caption,
            confidence: record.confidence,
            origin: record.origin,
            vector: &vector,
            format: &blob.format,
            size_bytes: blob.size_bytes as i64,
            width: blob.width as i32,
            height: blob.height as i32,
            owner_user_id: Some(user.id),
            visibility: upload.visibility,
        })
        .await?;

    services
        .metrics
        .request_duration_seconds
        .observe(started.elapsed().as_secs_f64());

    Ok(Json(IngestResponse {
        download_url: services.blobs.image_url(&image_id),
        thumbnail_url: services.blobs.thumbnail_url(&image_id),
        id: image_id,
        caption: record.caption,
        origin: record.origin.as_str().to_string(),
        confidence: record.confidence,
        width: blob.width,
        height: blob.height,
        size_bytes: blob.size_bytes,
        format: blob.format,
    }))
}

// ============================================================================
// Async ingestion and job polling
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AsyncParams {
    #[serde(default)]
    pub priority: Option<String>,
}

/// `POST /images/async`: validate, enqueue, return a poll handle
pub async fn ingest_image_async(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Query(params): Query<AsyncParams>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    use base64::Engine;

    let services = &state.services;
    let upload = read_upload(multipart).await?;
    check_visibility_grant(upload.visibility, &user)?;

    let priority: JobPriority = match params.priority.as_deref() {
        Some(raw) => raw.parse().map_err(ApiError::bad_request)?,
        None => JobPriority::default(),
    };

    let (hint, client_confidence) = edge_hint(&headers);
    let job = IngestionJob {
        job_id: Uuid::new_v4(),
        image_b64: base64::engine::general_purpose::STANDARD.encode(&upload.bytes),
        owner_id: user.id,
        priority,
        filename: upload.filename,
        content_type: upload.content_type,
        text_hint: hint,
        client_confidence,
        visibility: upload.visibility,
        latency_budget_ms: crate::jobs::ASYNC_LATENCY_BUDGET_MS,
        submitted_at: Utc::now(),
    };

    services.ingestion_queue.enqueue(&job).await?;
    tracing::info!(target: "prism::api", job_id = %job.job_id, "ingestion job queued");

    Ok(Json(json!({
        "job_id": job.job_id,
        "status": "queued",
        "poll_url": format!("/jobs/{}", job.job_id),
    })))
}

/// `GET /jobs/{job_id}`: poll the result slot
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let slot = state.services.ingestion_queue.fetch_result(&job_id).await?;

    let (status, result) = match slot {
        Some(slot) if slot.status == JobStatus::Failed => (
            "failed",
            json!({ "error": slot.error.unwrap_or_else(|| "unknown error".to_string()) }),
        ),
        Some(slot) => (
            "completed",
            json!({ "image_id": slot.image_id, "caption": slot.caption }),
        ),
        // No slot yet: still queued or in flight
        None => ("processing", json!({})),
    };

    Ok(Json(json!({
        "job_id": job_id,
        "status": status,
        "result": result,
    })))
}

// ============================================================================
// Search
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default)]
    pub k: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// `GET /search`: tenant-filtered hybrid search
pub async fn search(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let scope: SearchScope = match params.scope.as_deref() {
        Some(raw) => raw.parse().map_err(ApiError::bad_request)?,
        None => SearchScope::All,
    };
    let k = params.k.unwrap_or(10).clamp(1, MAX_PAGE_SIZE);

    let response = state
        .services
        .planner
        .search(&params.q, k, scope, user.map(|u| u.id))
        .await?;
    Ok(Json(response))
}

// ============================================================================
// Image metadata and lifecycle
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub visibility: Option<String>,
}

/// Image row plus its content URLs
#[derive(Debug, Serialize)]
pub struct ImageDetail {
    #[serde(flatten)]
    pub row: ImageRow,
    pub download_url: String,
    pub thumbnail_url: String,
}

/// `GET /images`: list images visible to the caller, newest first
pub async fn list_images(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let services = &state.services;
    let limit = params.limit.unwrap_or(20).clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0).max(0);
    let visibility_filter = params
        .visibility
        .as_deref()
        .map(|raw| raw.parse::<Visibility>().map_err(ApiError::bad_request))
        .transpose()?;

    let caller = user.as_ref().map(|u| u.id);
    let is_admin = user.as_ref().map(|u| u.is_admin()).unwrap_or(false);

    let rows = services
        .embed
        .list_images(caller, is_admin, limit, offset, visibility_filter)
        .await?;

    let images: Vec<ImageDetail> = rows
        .into_iter()
        .map(|row| ImageDetail {
            download_url: services.blobs.image_url(&row.id),
            thumbnail_url: services.blobs.thumbnail_url(&row.id),
            row,
        })
        .collect();

    let count = images.len();
    Ok(Json(json!({
        "images": images,
        "limit": limit,
        "offset": offset,
        "count": count,
    })))
}

/// Fetch a live row and enforce read access
async fn fetch_accessible(
    services: &Services,
    image_id: &str,
    user: &Option<CurrentUser>,
) -> Result<ImageRow, ApiError> {
    let row = services
        .embed
        .fetch_image(image_id)
        .await?
        .filter(|row| row.deleted_at.is_none())
        .ok_or_else(|| ApiError::not_found("Image not found"))?;

    match user {
        None => {
            if !row.visibility.is_public() {
                return Err(ApiError::unauthorized("Authentication required"));
            }
        }
        Some(user) => {
            if !user.can_access_image(row.owner_user_id, row.visibility) {
                return Err(ApiError::forbidden("Access denied"));
            }
        }
    }

    Ok(row)
}

/// `GET /images/{id}`: metadata with access control
pub async fn get_image(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(image_id): Path<String>,
) -> Result<Json<ImageDetail>, ApiError> {
    let services = &state.services;
    let row = fetch_accessible(services, &image_id, &user).await?;
    Ok(Json(ImageDetail {
        download_url: services.blobs.image_url(&row.id),
        thumbnail_url: services.blobs.thumbnail_url(&row.id),
        row,
    }))
}

/// `GET /images/{id}/download`: original bytes
pub async fn download_image(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(image_id): Path<String>,
) -> Result<Response, ApiError> {
    let services = &state.services;
    let row = fetch_accessible(services, &image_id, &user).await?;

    let bytes = services
        .blobs
        .get(&image_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Image not found"))?;

    let mime = content_type_for(row.format.as_deref().unwrap_or("jpeg"));
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

/// `GET /images/{id}/thumbnail`: thumbnail bytes (always JPEG)
pub async fn download_thumbnail(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(image_id): Path<String>,
) -> Result<Response, ApiError> {
    let services = &state.services;
    fetch_accessible(services, &image_id, &user).await?;

    let bytes = services
        .blobs
        .get_thumbnail(&image_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Thumbnail not found"))?;

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpdateImageBody {
    #[serde(default)]
    pub visibility: Option<String>,
}

/// `PATCH /images/{id}`: update visibility
pub async fn update_image(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(image_id): Path<String>,
    Json(body): Json<UpdateImageBody>,
) -> Result<Json<ImageDetail>, ApiError> {
    let services = &state.services;
    let row = services
        .embed
        .fetch_image(&image_id)
        .await?
        .filter(|row| row.deleted_at.is_none())
        .ok_or_else(|| ApiError::not_found("Image not found"))?;

    if !user.can_modify_image(row.owner_user_id) {
        return Err(ApiError::forbidden(
            "You don't have permission to modify this image",
        ));
    }

    if let Some(raw) = body.visibility.as_deref() {
        let visibility: Visibility = raw.parse().map_err(ApiError::bad_request)?;
        if visibility == Visibility::PublicAdmin && !user.is_admin() {
            return Err(ApiError::forbidden(
                "Only admins can set visibility to 'public_admin'",
            ));
        }
        services.embed.update_visibility(&image_id, visibility).await?;
    }

    let updated = services
        .embed
        .fetch_image(&image_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Image not found"))?;

    Ok(Json(ImageDetail {
        download_url: services.blobs.image_url(&updated.id),
        thumbnail_url: services.blobs.thumbnail_url(&updated.id),
        row: updated,
    }))
}

/// `DELETE /images/{id}`: soft delete
pub async fn delete_image(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(image_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let services = &state.services;
    let row = services
        .embed
        .fetch_image(&image_id)
        .await?
        .filter(|row| row.deleted_at.is_none())
        .ok_or_else(|| ApiError::not_found("Image not found"))?;

    if !user.can_modify_image(row.owner_user_id) {
        return Err(ApiError::forbidden(
            "You don't have permission to delete this image",
        ));
    }

    services.embed.soft_delete_image(&image_id).await?;

    Ok(Json(json!({
        "message": "Image deleted successfully",
        "id": image_id,
    })))
}

// ============================================================================
// Health, metrics, stats
// ============================================================================

/// `GET /healthz`: component status without failing the process. A dead
/// backing store degrades the report, never the endpoint.
pub async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.services.health().await;
    let status = if health.all_ok() { "ok" } else { "degraded" };
    Json(json!({
        "status": status,
        "version": crate::VERSION,
        "components": {
            "database": health.database,
            "redis": health.redis,
            "cloud_provider": state.services.models.provider_name(),
        },
    }))
}

/// `GET /metrics`: Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> Response {
    state.services.refresh_gauges();
    let body = state.services.metrics.render_prometheus();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

/// `GET /stats/router`: operational snapshot of the cascade's guards
pub async fn router_stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let services = &state.services;
    let queue_depth = services.ingestion_queue.depth().await.unwrap_or(0);
    Ok(Json(json!({
        "rate_limiter": services.limiter.stats(),
        "circuit_breaker": services.breaker.stats(),
        "ingestion_queue_depth": queue_depth,
    })))
}
