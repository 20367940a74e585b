//! Core data model.
//!
//! A task is one unit of enqueued work. It has a dense integer identity,
//! an opaque input payload, a lifecycle status, and the history of every
//! failed attempt. Transitions produce new snapshots instead of mutating
//! shared records in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of work tracked by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Assigned in strictly increasing push order. Never reused.
    pub id: TaskId,

    /// Current lifecycle status.
    pub status: Status,

    /// Caller payload. The engine doesn't interpret it.
    pub input: serde_json::Value,

    /// Value produced by the work function. Only set on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// One summary per failed attempt, oldest first.
    #[serde(default)]
    pub errors: Vec<Failure>,

    /// Number of failed attempts so far.
    #[serde(default)]
    pub fail_count: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A freshly pushed task.
    pub fn new(id: TaskId, input: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: Status::Pending,
            input,
            result: None,
            errors: Vec::new(),
            fail_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Snapshot marked as running.
    pub fn started(&self) -> Self {
        self.transition(Status::Running)
    }

    /// Snapshot of a successful attempt.
    pub fn succeeded(&self, result: serde_json::Value) -> Self {
        let mut next = self.transition(Status::Success);
        next.result = Some(result);
        next
    }

    /// Snapshot of a failed attempt: one more strike, failure appended.
    ///
    /// Whether the task is struck out is the strike policy's call; this
    /// only records the attempt and leaves the task in `fail`.
    pub fn failed(&self, failure: Failure) -> Self {
        let mut next = self.transition(Status::Fail);
        next.fail_count += 1;
        next.errors.push(failure);
        next
    }

    /// Snapshot with a terminal strike-out status.
    pub fn struck_out(&self) -> Self {
        self.transition(Status::Struckout)
    }

    /// Snapshot skipped by an operator.
    pub fn skipped(&self) -> Self {
        self.transition(Status::Skipped)
    }

    /// A task found `running` at load time did not finish: start over.
    pub fn recovered(&self) -> Self {
        self.transition(Status::Pending)
    }

    /// Snapshot with a replaced input. Status is unchanged.
    pub fn with_input(&self, input: serde_json::Value) -> Self {
        let mut next = self.clone();
        next.input = input;
        next.updated_at = Utc::now();
        next
    }

    /// The most recent captured failure, if any.
    pub fn last_error(&self) -> Option<&Failure> {
        self.errors.last()
    }

    fn transition(&self, to: Status) -> Self {
        debug_assert!(
            self.status == to || self.status.can_transition_to(to),
            "invalid task transition {} -> {}",
            self.status,
            to
        );
        let mut next = self.clone();
        next.status = to;
        next.updated_at = Utc::now();
        next
    }
}

/// Newtype for task ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse()
            .map(TaskId)
            .map_err(|_| Error::Other(format!("invalid task id: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Waiting for its turn.
    Pending,
    /// Occupying the processing slot.
    Running,
    /// Done. Terminal.
    Success,
    /// Last attempt failed, strikes remain. Retried as the window head.
    Fail,
    /// Exhausted the strike limit. Only `skip` or `delete` move it on.
    Struckout,
    /// Skipped by an operator. Terminal.
    Skipped,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Pending,
        Status::Running,
        Status::Success,
        Status::Fail,
        Status::Struckout,
        Status::Skipped,
    ];

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Fail, Running)        // retry
                | (Running, Success)
                | (Running, Fail)
                | (Running, Struckout)
                | (Fail, Struckout)
                | (Running, Pending)     // crash recovery
                | (Pending, Skipped)
                | (Fail, Skipped)
                | (Struckout, Skipped)
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Success | Status::Skipped)
    }

    /// Statuses the recovery loader brings back into the window.
    pub fn is_active(self) -> bool {
        matches!(self, Status::Pending | Status::Running | Status::Fail)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Success => "success",
            Status::Fail => "fail",
            Status::Struckout => "struckout",
            Status::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Other(format!("unknown status: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// Summary of one failed attempt, as returned by a work function.
///
/// Any `std::error::Error` converts into a `Failure` with `?`, so work
/// functions can propagate ordinary errors directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            arguments: Vec::new(),
            kind: None,
            name: None,
            code: None,
        }
    }

    pub fn with_argument(mut self, argument: serde_json::Value) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Failure recorded when the work function panicked.
    pub fn panic(message: impl Into<String>) -> Self {
        Self::new(message).with_kind("panic")
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.name, &self.code) {
            (Some(name), Some(code)) => write!(f, "{name} [{code}]: {}", self.message),
            (Some(name), None) => write!(f, "{name}: {}", self.message),
            (None, Some(code)) => write!(f, "[{code}]: {}", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl<E: std::error::Error> From<E> for Failure {
    fn from(err: E) -> Self {
        let full = std::any::type_name::<E>();
        let name = full.rsplit("::").next().unwrap_or(full);
        Self::new(err.to_string()).with_kind("error").with_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_task_is_pending_with_no_history() {
        let task = Task::new(TaskId(7), json!({"n": 1}));
        assert_eq!(task.status, Status::Pending);
        assert_eq!(task.fail_count, 0);
        assert!(task.errors.is_empty());
        assert!(task.result.is_none());
    }

    #[test]
    fn failed_snapshot_leaves_original_untouched() {
        let task = Task::new(TaskId(1), json!(null)).started();
        let failed = task.failed(Failure::new("boom"));

        assert_eq!(task.status, Status::Running);
        assert_eq!(task.fail_count, 0);
        assert_eq!(failed.status, Status::Fail);
        assert_eq!(failed.fail_count, 1);
        assert_eq!(failed.last_error().map(|f| f.message.as_str()), Some("boom"));
    }

    #[test]
    fn persisted_shape_uses_fail_count_key() {
        let task = Task::new(TaskId(3), json!("x"));
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["status"], "pending");
        assert_eq!(value["failCount"], 0);
    }

    #[test]
    fn status_parses_its_display_form() {
        for status in [
            Status::Pending,
            Status::Running,
            Status::Success,
            Status::Fail,
            Status::Struckout,
            Status::Skipped,
        ] {
            assert_eq!(status.to_string().parse::<Status>().unwrap(), status);
        }
        assert!("dead".parse::<Status>().is_err());
    }

    #[test]
    fn terminal_statuses_do_not_transition() {
        for to in [Status::Pending, Status::Running, Status::Fail] {
            assert!(!Status::Success.can_transition_to(to));
            assert!(!Status::Skipped.can_transition_to(to));
        }
        assert!(Status::Struckout.can_transition_to(Status::Skipped));
        assert!(!Status::Struckout.can_transition_to(Status::Running));
    }

    #[test]
    fn std_errors_convert_into_failures() {
        let err = "nope".parse::<u32>().unwrap_err();
        let failure = Failure::from(err);
        assert_eq!(failure.name.as_deref(), Some("ParseIntError"));
        assert_eq!(failure.kind.as_deref(), Some("error"));
    }
}
