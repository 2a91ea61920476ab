//! Task outcomes, the retry policy, and the cooperative stop flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::{BuildTask, RecordingTask};

/// A row owned through the claim protocol.
pub trait QueuedTask: Clone + Send + Sync + 'static {
    /// Short name used in logs ("build", "recording").
    const KIND: &'static str;

    fn id(&self) -> Uuid;

    /// Failed or recovered attempts recorded so far.
    fn attempt_count(&self) -> i32;
}

impl QueuedTask for BuildTask {
    const KIND: &'static str = "build";

    fn id(&self) -> Uuid {
        self.id
    }

    fn attempt_count(&self) -> i32 {
        self.config.attempt_count
    }
}

impl QueuedTask for RecordingTask {
    const KIND: &'static str = "recording";

    fn id(&self) -> Uuid {
        self.id
    }

    fn attempt_count(&self) -> i32 {
        self.attempt_count
    }
}

/// What a handler reports back for a claimed task.
///
/// Task-level failures are values, not errors: the worker turns them into a
/// retry or a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The stage finished. `source_id` is recorded on build tasks.
    Completed {
        source_id: Option<Uuid>,
        summary: Option<JsonValue>,
    },
    /// Transient failure; retried while attempts remain.
    Failed { reason: String },
    /// Malformed input; moved to error immediately, never retried.
    Rejected { reason: String },
    /// Explicit stop signal observed between steps.
    Stopped,
}

impl TaskOutcome {
    pub fn completed(source_id: Option<Uuid>) -> Self {
        TaskOutcome::Completed {
            source_id,
            summary: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        TaskOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        TaskOutcome::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }

    /// Human-readable reason for anything but success.
    pub fn reason(&self) -> Option<&str> {
        match self {
            TaskOutcome::Completed { .. } => None,
            TaskOutcome::Failed { reason } | TaskOutcome::Rejected { reason } => Some(reason),
            TaskOutcome::Stopped => Some(STOPPED_REASON),
        }
    }
}

/// `lastError` recorded when a task is released by a stop signal.
pub const STOPPED_REASON: &str = "stopped by worker shutdown";

/// Where a reported task ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskDisposition {
    Completed,
    /// Reset to the ready state with the new attempt count.
    Requeued { attempt_count: i32 },
    /// Terminal error with the final attempt count.
    Errored { attempt_count: i32 },
    /// Handed back after a stop, attempt count unchanged.
    Released,
}

impl TaskDisposition {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskDisposition::Completed | TaskDisposition::Errored { .. })
    }
}

/// Retry and terminal-failure policy shared by every task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
}

impl RetryPolicy {
    pub fn new(max_attempts: i32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Decide the disposition for an outcome given the recorded attempt count.
    pub fn decide(&self, attempt_count: i32, outcome: &TaskOutcome) -> TaskDisposition {
        match outcome {
            TaskOutcome::Completed { .. } => TaskDisposition::Completed,
            TaskOutcome::Rejected { .. } => TaskDisposition::Errored {
                attempt_count: attempt_count + 1,
            },
            TaskOutcome::Failed { .. } => {
                let next = attempt_count + 1;
                if next >= self.max_attempts {
                    TaskDisposition::Errored {
                        attempt_count: next,
                    }
                } else {
                    TaskDisposition::Requeued {
                        attempt_count: next,
                    }
                }
            }
            TaskOutcome::Stopped => TaskDisposition::Released,
        }
    }

    /// A stale task with this many attempts is marked terminal instead of reclaimed.
    pub fn is_exhausted(&self, attempt_count: i32) -> bool {
        attempt_count >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::defaults::MAX_ATTEMPTS)
    }
}

/// Cooperative stop signal checked between crawl steps.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_completed() {
        let policy = RetryPolicy::new(3);
        assert_eq!(
            policy.decide(2, &TaskOutcome::completed(None)),
            TaskDisposition::Completed
        );
    }

    #[test]
    fn test_decide_failed_requeues_while_attempts_remain() {
        let policy = RetryPolicy::new(3);
        assert_eq!(
            policy.decide(0, &TaskOutcome::failed("timeout")),
            TaskDisposition::Requeued { attempt_count: 1 }
        );
        assert_eq!(
            policy.decide(1, &TaskOutcome::failed("timeout")),
            TaskDisposition::Requeued { attempt_count: 2 }
        );
    }

    #[test]
    fn test_decide_failed_terminal_at_max() {
        let policy = RetryPolicy::new(3);
        assert_eq!(
            policy.decide(2, &TaskOutcome::failed("timeout")),
            TaskDisposition::Errored { attempt_count: 3 }
        );
    }

    #[test]
    fn test_decide_rejected_never_retries() {
        let policy = RetryPolicy::new(3);
        assert_eq!(
            policy.decide(0, &TaskOutcome::rejected("bad url")),
            TaskDisposition::Errored { attempt_count: 1 }
        );
    }

    #[test]
    fn test_decide_stopped_releases() {
        let policy = RetryPolicy::new(3);
        assert_eq!(
            policy.decide(1, &TaskOutcome::Stopped),
            TaskDisposition::Released
        );
        assert!(!TaskDisposition::Released.is_terminal());
    }

    #[test]
    fn test_is_exhausted() {
        let policy = RetryPolicy::new(3);
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }

    #[test]
    fn test_outcome_reason() {
        assert_eq!(TaskOutcome::completed(None).reason(), None);
        assert_eq!(TaskOutcome::failed("x").reason(), Some("x"));
        assert_eq!(TaskOutcome::Stopped.reason(), Some(STOPPED_REASON));
        assert!(TaskOutcome::completed(None).is_success());
        assert!(!TaskOutcome::rejected("y").is_success());
    }

    #[test]
    fn test_stop_flag_shared_between_clones() {
        let flag = StopFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_stopped());
        flag.stop();
        assert!(clone.is_stopped());
    }

    #[test]
    fn test_disposition_serde_tag() {
        let json = serde_json::to_value(TaskDisposition::Requeued { attempt_count: 2 }).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"state": "requeued", "attempt_count": 2})
        );
    }
}
