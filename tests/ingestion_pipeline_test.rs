//! Integration tests for the ingestion pipeline's pure pieces
//!
//! The queue wire format, fingerprinting, result-slot semantics, and the
//! access rules the API and workers share. Redis/Postgres-backed paths are
//! exercised by their unit tests against fakes; this file pins down the
//! contracts both sides of the queue rely on.

use chrono::Utc;
use uuid::Uuid;

use prism::auth::{CurrentUser, Role};
use prism::jobs::{
    IngestionJob, JobPriority, JobQueue, JobResultSlot, JobStatus, ASYNC_LATENCY_BUDGET_MS,
};
use prism::model::{MockModelHost, ModelHost};
use prism::routing::{content_sha256, image_fingerprint, CaptionRecord, Tier};
use prism::storage::Visibility;

fn job(visibility: Visibility) -> IngestionJob {
    IngestionJob {
        job_id: Uuid::new_v4(),
        image_b64: "aGVsbG8gd29ybGQ=".to_string(),
        owner_id: Uuid::new_v4(),
        priority: JobPriority::Normal,
        filename: Some("photo.jpg".to_string()),
        content_type: Some("image/jpeg".to_string()),
        text_hint: None,
        client_confidence: None,
        visibility,
        latency_budget_ms: ASYNC_LATENCY_BUDGET_MS,
        submitted_at: Utc::now(),
    }
}

#[test]
fn test_job_wire_format_roundtrip() {
    let original = job(Visibility::Private);
    let payload = serde_json::to_string(&original).unwrap();
    let decoded: IngestionJob = JobQueue::decode(&payload).unwrap();

    assert_eq!(decoded.job_id, original.job_id);
    assert_eq!(decoded.owner_id, original.owner_id);
    assert_eq!(decoded.image_b64, original.image_b64);
    assert_eq!(decoded.visibility, Visibility::Private);
}

#[test]
fn test_producer_may_omit_optional_fields() {
    // A minimal producer payload decodes with defaults filled in
    let raw = format!(
        r#"{{"job_id":"{}","image_b64":"aGk=","owner_id":"{}","visibility":"public","submitted_at":"2026-07-01T12:00:00Z"}}"#,
        Uuid::new_v4(),
        Uuid::new_v4()
    );
    let decoded: IngestionJob = JobQueue::decode(&raw).unwrap();
    assert_eq!(decoded.priority, JobPriority::Normal);
    assert_eq!(decoded.latency_budget_ms, ASYNC_LATENCY_BUDGET_MS);
    assert!(decoded.text_hint.is_none());
}

#[test]
fn test_fingerprint_matches_hash_prefix() {
    let bytes = b"the exact image bytes";
    assert_eq!(image_fingerprint(bytes).len(), 16);
    assert!(content_sha256(bytes).starts_with(&image_fingerprint(bytes)));
    // The fingerprint is the durable image identity: stable across calls
    assert_eq!(image_fingerprint(bytes), image_fingerprint(bytes));
}

#[test]
fn test_result_slot_terminal_shapes() {
    let completed = JobResultSlot::completed_ingestion("abcd".into(), "a dog".into());
    assert_eq!(completed.status, JobStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert!(completed.error.is_none());

    let failed = JobResultSlot::failed("embed store unreachable".into());
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("embed store unreachable"));
    assert!(failed.image_id.is_none());

    // Both shapes survive the wire
    for slot in [completed, failed] {
        let raw = serde_json::to_string(&slot).unwrap();
        let back: JobResultSlot = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.status, slot.status);
    }
}

#[test]
fn test_caption_slot_carries_record_fields() {
    let record = CaptionRecord {
        caption: "a cat".to_string(),
        confidence: 0.85,
        origin: Tier::Local,
        latency_ms: 40,
        cost_usd: 0.0,
        tokens_in: 0,
        tokens_out: 0,
    };
    let slot = JobResultSlot::completed_caption(&record);
    assert_eq!(slot.caption.as_deref(), Some("a cat"));
    assert_eq!(slot.confidence, Some(0.85));
    assert_eq!(slot.origin, Some(Tier::Local));
}

#[tokio::test]
async fn test_embedding_matches_across_pipeline_stages() {
    // The worker embeds the same bytes the fingerprint was computed from;
    // identical bytes must produce identical vectors
    let host = MockModelHost::new();
    let bytes = b"image under test";
    let from_worker = host.embed_image(bytes).await.unwrap();
    let again = host.embed_image(bytes).await.unwrap();
    assert_eq!(from_worker, again);
    assert_eq!(from_worker.len(), 512);
}

#[test]
fn test_access_rules_match_scope_table() {
    let u1 = Uuid::new_v4();
    let u2 = Uuid::new_v4();
    let caller = CurrentUser {
        id: u1,
        email: String::new(),
        role: Role::User,
    };

    // A{owner=u1, private}: visible to u1, not to u2's images' audience
    assert!(caller.can_access_image(Some(u1), Visibility::Private));
    assert!(!caller.can_access_image(Some(u2), Visibility::Private));

    // B{owner=u2, public}: visible to anyone, including u1
    assert!(caller.can_access_image(Some(u2), Visibility::Public));

    // Modification never crosses ownership for plain users
    assert!(caller.can_modify_image(Some(u1)));
    assert!(!caller.can_modify_image(Some(u2)));
}
