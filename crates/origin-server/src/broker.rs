//! Task broker for asynchronous evidence generation.
//!
//! A redis list carries the queue; per-task status records live under
//! `origin:task_status:{task_id}` with a bounded TTL. Connection and
//! timeout errors surface as [`BrokerError::Unavailable`], which the HTTP
//! layer maps to 503 + `Retry-After: 30` — they never move an evidence
//! pack into a terminal state.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use origin_core::task::TaskStatus;

/// Queue key for evidence generation tasks.
const QUEUE_KEY: &str = "origin:tasks:evidence";

/// TTL for task status records, in seconds.
const STATUS_TTL_SECS: u64 = 86_400;

/// Broker failures.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker is unreachable or the command failed.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// A queued message could not be decoded.
    #[error("corrupt task payload: {0}")]
    Corrupt(String),
}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// An enqueued evidence generation task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceTask {
    /// Deterministic task id (possibly with a `_retry_{ts}` suffix).
    pub task_id: String,

    /// Owning tenant.
    pub tenant_id: i64,

    /// Certificate the pack documents.
    pub certificate_id: String,

    /// Formats to render, sorted.
    pub formats: Vec<String>,

    /// Correlation id of the originating request.
    pub correlation_id: String,

    /// Worker-side transient retry counter.
    pub attempt: u32,
}

/// Status record for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task-framework lifecycle state.
    pub status: TaskStatus,

    /// Error code for FAILURE records.
    pub error_code: Option<String>,
}

/// Handle to the task broker.
#[derive(Clone)]
pub struct TaskBroker {
    conn: ConnectionManager,
}

impl TaskBroker {
    /// Wraps a shared cache connection.
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Enqueues a task and marks its status PENDING.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] if the broker is down; callers
    /// must leave the evidence row in `pending`.
    pub async fn enqueue(&self, task: &EvidenceTask) -> Result<(), BrokerError> {
        let payload =
            serde_json::to_string(task).map_err(|e| BrokerError::Corrupt(e.to_string()))?;
        let mut conn = self.conn.clone();

        self.write_status(
            &task.task_id,
            &TaskRecord {
                status: TaskStatus::Pending,
                error_code: None,
            },
        )
        .await?;
        let _: () = conn.lpush(QUEUE_KEY, payload).await?;
        Ok(())
    }

    /// Blocking pop for workers; returns `None` on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] on connection failure or a corrupt message.
    pub async fn pop(&self, timeout_secs: f64) -> Result<Option<EvidenceTask>, BrokerError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn.brpop(QUEUE_KEY, timeout_secs).await?;
        match popped {
            None => Ok(None),
            Some((_, payload)) => serde_json::from_str(&payload)
                .map(Some)
                .map_err(|e| BrokerError::Corrupt(e.to_string())),
        }
    }

    /// Reads a task's status record.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] if the broker cannot be
    /// consulted; the poll endpoint maps this to 503.
    pub async fn status(&self, task_id: &str) -> Result<Option<TaskRecord>, BrokerError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(status_key(task_id)).await?;
        match raw {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| BrokerError::Corrupt(e.to_string())),
        }
    }

    /// Writes a task's status record.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] on connection failure.
    pub async fn write_status(
        &self,
        task_id: &str,
        record: &TaskRecord,
    ) -> Result<(), BrokerError> {
        let json =
            serde_json::to_string(record).map_err(|e| BrokerError::Corrupt(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(status_key(task_id), json, STATUS_TTL_SECS).await?;
        Ok(())
    }
}

fn status_key(task_id: &str) -> String {
    format!("origin:task_status:{task_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_key_layout() {
        assert_eq!(
            status_key("evidence_pack_abc"),
            "origin:task_status:evidence_pack_abc"
        );
    }

    #[test]
    fn test_task_record_wire_form() {
        let record = TaskRecord {
            status: TaskStatus::Failure,
            error_code: Some("RENDER_FAILED".to_string()),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"FAILURE\""));
        let back: TaskRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, TaskStatus::Failure);
    }
}
