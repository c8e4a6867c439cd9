use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Workflow state of a task on the board.
///
/// The set is closed; transitions are restricted to the graph in
/// [`TaskStatus::transitions`]. Same-state "transitions" are treated as
/// no-ops by the ingestor, not as graph edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "INBOX")]
    Inbox,
    #[serde(rename = "ASSIGNED")]
    Assigned,
    #[serde(rename = "IN PROGRESS")]
    InProgress,
    #[serde(rename = "REVIEW")]
    Review,
    #[serde(rename = "DONE")]
    Done,
}

impl TaskStatus {
    /// Canonical board order.
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Inbox,
        TaskStatus::Assigned,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Inbox => "INBOX",
            TaskStatus::Assigned => "ASSIGNED",
            TaskStatus::InProgress => "IN PROGRESS",
            TaskStatus::Review => "REVIEW",
            TaskStatus::Done => "DONE",
        }
    }

    /// Parse an exact (already normalized) status string.
    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "INBOX" => Some(TaskStatus::Inbox),
            "ASSIGNED" => Some(TaskStatus::Assigned),
            "IN PROGRESS" => Some(TaskStatus::InProgress),
            "REVIEW" => Some(TaskStatus::Review),
            "DONE" => Some(TaskStatus::Done),
            _ => None,
        }
    }

    /// Legal next states. DONE is terminal.
    pub fn transitions(&self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Inbox => &[TaskStatus::Assigned],
            TaskStatus::Assigned => &[TaskStatus::InProgress, TaskStatus::Review],
            TaskStatus::InProgress => &[TaskStatus::Review, TaskStatus::Done],
            TaskStatus::Review => &[TaskStatus::InProgress, TaskStatus::Done],
            TaskStatus::Done => &[],
        }
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        self.transitions().contains(&next)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub status: TaskStatus,
    pub assignee: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
