//! # Background jobs
//!
//! Asynchronous ingestion: jobs are serialized JSON envelopes (image bytes
//! base64-encoded) pushed onto redis lists, consumed by bounded worker
//! pools, with per-job result slots that expire after an hour.
//!
//! - `queue`: durable FIFO plus result slots
//! - `worker`: the pool, the dequeue loop, and the per-queue handlers

pub mod queue;
pub mod worker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::routing::{CaptionRecord, Tier};
use crate::storage::Visibility;

pub use queue::{JobQueue, QueueError};
pub use worker::{CaptionHandler, EmbeddingHandler, IngestionHandler, JobHandler, WorkerPool};

/// Default latency budget for async jobs; the async path tolerates more
/// latency than sync ingestion
pub const ASYNC_LATENCY_BUDGET_MS: u64 = 2000;

/// How long terminal result slots stay readable
pub const RESULT_SLOT_TTL: std::time::Duration = std::time::Duration::from_secs(3600);

fn default_latency_budget() -> u64 {
    ASYNC_LATENCY_BUDGET_MS
}

/// Recorded on the job envelope; plain FIFO queues do not honor it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(JobPriority::Low),
            "normal" => Ok(JobPriority::Normal),
            "high" => Ok(JobPriority::High),
            other => Err(format!(
                "priority must be 'low', 'normal', or 'high', got '{}'",
                other
            )),
        }
    }
}

/// Full ingestion pipeline job: blob, caption, embed, upsert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub job_id: Uuid,
    pub image_b64: String,
    pub owner_id: Uuid,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub text_hint: Option<String>,
    #[serde(default)]
    pub client_confidence: Option<f64>,
    pub visibility: Visibility,
    #[serde(default = "default_latency_budget")]
    pub latency_budget_ms: u64,
    pub submitted_at: DateTime<Utc>,
}

/// Standalone caption job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionJob {
    pub job_id: Uuid,
    pub image_b64: String,
    #[serde(default)]
    pub text_hint: Option<String>,
    #[serde(default)]
    pub client_confidence: Option<f64>,
    #[serde(default = "default_latency_budget")]
    pub latency_budget_ms: u64,
}

/// Standalone embedding job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingJob {
    pub job_id: Uuid,
    pub image_b64: String,
}

/// Terminal job state. A missing result slot means the job is still queued
/// or processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

/// Result slot value written exactly once per dequeued job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultSlot {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobResultSlot {
    pub fn completed_ingestion(image_id: String, caption: String) -> Self {
        Self {
            status: JobStatus::Completed,
            image_id: Some(image_id),
            caption: Some(caption),
            confidence: None,
            origin: None,
            embedding: None,
            error: None,
            completed_at: Some(Utc::now()),
        }
    }

    pub fn completed_caption(record: &CaptionRecord) -> Self {
        Self {
            status: JobStatus::Completed,
            image_id: None,
            caption: Some(record.caption.clone()),
            confidence: Some(record.confidence),
            origin: Some(record.origin),
            embedding: None,
            error: None,
            completed_at: Some(Utc::now()),
        }
    }

    pub fn completed_embedding(embedding: Vec<f32>) -> Self {
        Self {
            status: JobStatus::Completed,
            image_id: None,
            caption: None,
            confidence: None,
            origin: None,
            embedding: Some(embedding),
            error: None,
            completed_at: Some(Utc::now()),
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            status: JobStatus::Failed,
            image_id: None,
            caption: None,
            confidence: None,
            origin: None,
            embedding: None,
            error: Some(error),
            completed_at: Some(Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_parsing() {
        assert_eq!("high".parse::<JobPriority>(), Ok(JobPriority::High));
        assert_eq!(JobPriority::default(), JobPriority::Normal);
        assert!("urgent".parse::<JobPriority>().is_err());
    }

    #[test]
    fn test_ingestion_job_roundtrip() {
        let job = IngestionJob {
            job_id: Uuid::new_v4(),
            image_b64: "aGVsbG8=".to_string(),
            owner_id: Uuid::new_v4(),
            priority: JobPriority::High,
            filename: Some("cat.jpg".to_string()),
            content_type: Some("image/jpeg".to_string()),
            text_hint: Some("a cat".to_string()),
            client_confidence: Some(0.9),
            visibility: Visibility::Public,
            latency_budget_ms: 2000,
            submitted_at: Utc::now(),
        };
        let json = serde_json::to_string(&job).unwrap();
        let back: IngestionJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.job_id, job.job_id);
        assert_eq!(back.priority, JobPriority::High);
        assert_eq!(back.visibility, Visibility::Public);
    }

    #[test]
    fn test_latency_budget_defaults_for_async() {
        // Producers may omit the budget; consumers fill in the async default
        let raw = format!(
            r#"{{"job_id":"{}","image_b64":"aGk=","owner_id":"{}","visibility":"private","submitted_at":"2026-01-01T00:00:00Z"}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let job: IngestionJob = serde_json::from_str(&raw).unwrap();
        assert_eq!(job.latency_budget_ms, ASYNC_LATENCY_BUDGET_MS);
        assert_eq!(job.priority, JobPriority::Normal);
    }

    #[test]
    fn test_failed_slot_shape() {
        let slot = JobResultSlot::failed("boom".to_string());
        let json = serde_json::to_string(&slot).unwrap();
        assert!(json.contains("\"status\":\"failed\""));
        assert!(json.contains("\"error\":\"boom\""));
        // Unset fields are omitted from the wire form
        assert!(!json.contains("image_id"));
    }
}
