//! Job queue with redis backend
//!
//! Jobs are JSON strings on a redis list: producers `LPUSH`, workers `BRPOP`
//! with a polling timeout so shutdown can run between waits. Terminal
//! results land in per-job slots (`<prefix>:result:<job_id>`) with a TTL;
//! pollers read the slot until it expires.

use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::JobResultSlot;

/// Queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// A named FIFO with result slots
pub struct JobQueue {
    redis: ConnectionManager,
    queue_key: String,
    result_prefix: String,
    result_ttl: Duration,
}

impl JobQueue {
    /// `name` is the queue family: `ingestion` yields the list
    /// `ingestion:jobs` and slots `ingestion:result:<job_id>`.
    pub fn new(redis: ConnectionManager, name: &str, result_ttl: Duration) -> Self {
        Self {
            redis,
            queue_key: format!("{}:jobs", name),
            result_prefix: format!("{}:result:", name),
            result_ttl,
        }
    }

    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    fn result_key(&self, job_id: &Uuid) -> String {
        format!("{}{}", self.result_prefix, job_id)
    }

    /// Push a job onto the queue
    pub async fn enqueue<J: Serialize>(&self, job: &J) -> QueueResult<()> {
        let payload = serde_json::to_string(job)?;
        redis::cmd("LPUSH")
            .arg(&self.queue_key)
            .arg(payload)
            .query_async::<_, ()>(&mut self.redis.clone())
            .await?;
        Ok(())
    }

    /// Blocking pop with a bounded wait. `None` on timeout, so callers can
    /// observe shutdown between waits.
    pub async fn dequeue(&self, timeout: Duration) -> QueueResult<Option<String>> {
        let result: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.queue_key)
            .arg(timeout.as_secs().max(1))
            .query_async(&mut self.redis.clone())
            .await?;
        Ok(result.map(|(_, payload)| payload))
    }

    /// Decode a dequeued payload
    pub fn decode<J: DeserializeOwned>(payload: &str) -> QueueResult<J> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Write the terminal result slot for a job
    pub async fn write_result(&self, job_id: &Uuid, slot: &JobResultSlot) -> QueueResult<()> {
        let payload = serde_json::to_string(slot)?;
        redis::cmd("SET")
            .arg(self.result_key(job_id))
            .arg(payload)
            .arg("EX")
            .arg(self.result_ttl.as_secs())
            .query_async::<_, ()>(&mut self.redis.clone())
            .await?;
        Ok(())
    }

    /// Read a job's result slot, if it exists and has not expired
    pub async fn fetch_result(&self, job_id: &Uuid) -> QueueResult<Option<JobResultSlot>> {
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.result_key(job_id))
            .query_async(&mut self.redis.clone())
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Current queue depth
    pub async fn depth(&self) -> QueueResult<usize> {
        let depth: usize = redis::cmd("LLEN")
            .arg(&self.queue_key)
            .query_async(&mut self.redis.clone())
            .await?;
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{EmbeddingJob, JobStatus};

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(JobQueue::decode::<EmbeddingJob>("not json").is_err());
    }

    #[test]
    fn test_decode_job() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"job_id":"{}","image_b64":"aGk="}}"#, id);
        let job: EmbeddingJob = JobQueue::decode(&raw).unwrap();
        assert_eq!(job.job_id, id);
    }

    #[test]
    fn test_result_slot_wire_shape() {
        let slot = JobResultSlot::completed_ingestion("abcd1234".to_string(), "a cat".to_string());
        let json = serde_json::to_string(&slot).unwrap();
        let back: JobResultSlot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, JobStatus::Completed);
        assert_eq!(back.image_id.as_deref(), Some("abcd1234"));
        assert_eq!(back.caption.as_deref(), Some("a cat"));
    }
}
