//! The task model.
//!
//! Tasks are persisted as a JSON sequence under the `tasks` key and travel
//! over the page↔worker bridge in [`TASKS_SYNCED`](crate::messages::PageBound)
//! payloads, so the serialized field names are fixed (camelCase).

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique task identifier.
///
/// UUIDv4 rather than a creation timestamp: millisecond clocks collide, and
/// nothing downstream deduplicates.
pub type TaskId = Uuid;

/// A to-do item, optionally associated with a future reminder time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub text: String,
    pub completed: bool,
    /// Reminder time in unix milliseconds; `None` for unscheduled tasks.
    pub scheduled_for: Option<i64>,
    /// Whether the reminder for this task has already fired.
    pub notified: bool,
    pub created_at: i64,
}

impl Task {
    pub fn new(text: impl Into<String>, scheduled_for: Option<i64>) -> Self {
        Task {
            id: Uuid::new_v4(),
            text: text.into(),
            completed: false,
            scheduled_for,
            notified: false,
            created_at: unix_ms(),
        }
    }
}

/// Display order: scheduled tasks ascending by reminder time, then all
/// unscheduled tasks in insertion order.
pub fn sort_for_display(tasks: &mut [Task]) {
    tasks.sort_by_key(|task| match task.scheduled_for {
        Some(at) => (0, at),
        None => (1, 0),
    });
}

/// Current unix time in milliseconds.
pub fn unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduled(text: &str, at: Option<i64>) -> Task {
        Task::new(text, at)
    }

    #[test]
    fn test_new_task_starts_clean() {
        let task = Task::new("Buy milk", None);
        assert!(!task.completed);
        assert!(!task.notified);
        assert_eq!(task.scheduled_for, None);
    }

    #[test]
    fn test_ids_are_unique_within_a_burst() {
        let ids: Vec<TaskId> = (0..100).map(|_| Task::new("x", None).id).collect();
        let mut deduped = ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len());
    }

    #[test]
    fn test_sort_scheduled_ascending_then_unscheduled() {
        let base = 1_700_000_000_000;
        let mut tasks = vec![
            scheduled("later", Some(base + 2_000)),
            scheduled("unscheduled", None),
            scheduled("sooner", Some(base + 1_000)),
        ];
        sort_for_display(&mut tasks);
        let order: Vec<&str> = tasks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(order, ["sooner", "later", "unscheduled"]);
    }

    #[test]
    fn test_sort_keeps_unscheduled_insertion_order() {
        let mut tasks = vec![
            scheduled("a", None),
            scheduled("b", Some(5)),
            scheduled("c", None),
        ];
        sort_for_display(&mut tasks);
        let order: Vec<&str> = tasks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(order, ["b", "a", "c"]);
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let task = Task::new("x", Some(42));
        let json = serde_json::to_value(&task).expect("serialize");
        assert!(json.get("scheduledFor").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("notified").is_some());
    }
}
