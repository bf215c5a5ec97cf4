//! Evidence-task state machines and deterministic task identity.
//!
//! Two distinct state spaces exist and are never conflated:
//!
//! - [`TaskStatus`] is the task framework's lifecycle state for a broker
//!   task. The deprecated `task_state` response field always mirrors it.
//! - [`PipelineEvent`] is an application-level marker of what the request
//!   handler observed (enqueued the task, polled it, requeued a stuck one,
//!   synced the row from a finished task result).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::hash::hex_encode;

/// Task-framework lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Enqueued, not yet picked up by a worker.
    #[serde(rename = "PENDING")]
    Pending,

    /// A worker is executing the task.
    #[serde(rename = "STARTED")]
    Started,

    /// The task failed transiently and will be retried by the framework.
    #[serde(rename = "RETRY")]
    Retry,

    /// The task finished successfully.
    #[serde(rename = "SUCCESS")]
    Success,

    /// The task finished with a deterministic failure.
    #[serde(rename = "FAILURE")]
    Failure,
}

impl TaskStatus {
    /// Wire form of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Retry => "RETRY",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    /// Parses the wire form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "STARTED" => Some(Self::Started),
            "RETRY" => Some(Self::Retry),
            "SUCCESS" => Some(Self::Success),
            "FAILURE" => Some(Self::Failure),
            _ => None,
        }
    }
}

/// What the request handler observed about the evidence pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// The handler enqueued a generation task.
    #[serde(rename = "ENQUEUED")]
    Enqueued,

    /// The handler consulted task state while the row was pending.
    #[serde(rename = "POLLING")]
    Polling,

    /// A stuck pending task was re-enqueued under a retry task id.
    #[serde(rename = "STUCK_REQUEUED")]
    StuckRequeued,

    /// The row was updated from a finished task result during a poll.
    #[serde(rename = "UPDATED_FROM_TASK_RESULT")]
    UpdatedFromTaskResult,
}

impl PipelineEvent {
    /// Wire form of the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enqueued => "ENQUEUED",
            Self::Polling => "POLLING",
            Self::StuckRequeued => "STUCK_REQUEUED",
            Self::UpdatedFromTaskResult => "UPDATED_FROM_TASK_RESULT",
        }
    }
}

/// Derives the deterministic evidence-pack task id.
///
/// The pre-image is `tenant_id | certificate_id | sorted_formats`, so two
/// requests for the same pack enqueue the same task regardless of the order
/// formats were listed in.
#[must_use]
pub fn evidence_task_id(tenant_id: i64, certificate_id: &str, formats: &[String]) -> String {
    let mut sorted = formats.to_vec();
    sorted.sort();
    let pre_image = format!("{tenant_id}|{certificate_id}|{}", sorted.join(","));
    let digest = Sha256::digest(pre_image.as_bytes());
    format!("evidence_pack_{}", &hex_encode(&digest)[..32])
}

/// Derives the retry task id for a stuck or explicitly requeued task.
#[must_use]
pub fn retry_task_id(task_id: &str, unix_ts: i64) -> String {
    format!("{task_id}_retry_{unix_ts}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_deterministic() {
        let a = evidence_task_id(1, "cert-abc", &["json".into(), "pdf".into()]);
        let b = evidence_task_id(1, "cert-abc", &["pdf".into(), "json".into()]);
        assert_eq!(a, b);
        assert!(a.starts_with("evidence_pack_"));
        assert_eq!(a.len(), "evidence_pack_".len() + 32);
    }

    #[test]
    fn test_task_id_varies_by_inputs() {
        let base = evidence_task_id(1, "cert-abc", &["json".into()]);
        assert_ne!(base, evidence_task_id(2, "cert-abc", &["json".into()]));
        assert_ne!(base, evidence_task_id(1, "cert-xyz", &["json".into()]));
        assert_ne!(
            base,
            evidence_task_id(1, "cert-abc", &["json".into(), "pdf".into()])
        );
    }

    #[test]
    fn test_retry_task_id_suffix() {
        let id = evidence_task_id(1, "cert-abc", &["json".into()]);
        let retry = retry_task_id(&id, 1_700_000_000);
        assert_eq!(retry, format!("{id}_retry_1700000000"));
    }

    #[test]
    fn test_task_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Started,
            TaskStatus::Retry,
            TaskStatus::Success,
            TaskStatus::Failure,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("RUNNING"), None);
    }

    #[test]
    fn test_status_never_equals_task_id_shape() {
        // The wire states are short uppercase tokens; a task id never is.
        let id = evidence_task_id(1, "cert", &["json".into()]);
        assert!(TaskStatus::parse(&id).is_none());
    }

    #[test]
    fn test_pipeline_event_wire_form() {
        assert_eq!(
            serde_json::to_string(&PipelineEvent::StuckRequeued).unwrap(),
            "\"STUCK_REQUEUED\""
        );
    }
}
