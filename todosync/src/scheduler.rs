//! Reminder scheduling.
//!
//! Scheduling a reminder does two things: append it to the persisted
//! `pendingNotifications` list (so it survives reloads) and inform the
//! worker (so it fires even after the page closes). Both schedule and
//! cancel are fire-and-forget; a cancel that races a schedule over the
//! bridge can lose, and the reminder still fires.
//!
//! The 60-second worker tick is the only firing mechanism, so a reminder
//! can fire up to 59 seconds late. That is accepted behavior.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::messages::WorkerBound;
use crate::storage::{self, KeyValueStore, PENDING_NOTIFICATIONS_KEY, StorageError};
use crate::task::{Task, TaskId};
use crate::worker::WorkerHandle;

/// Title used for every task reminder.
pub const REMINDER_TITLE: &str = "Task reminder";

/// A scheduled-but-not-yet-fired reminder tied to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingNotification {
    pub id: TaskId,
    /// Fire time in unix milliseconds.
    pub timestamp: i64,
    pub title: String,
    pub body: String,
    pub tag: String,
}

impl PendingNotification {
    /// Derive the reminder for a task, or `None` for unscheduled tasks.
    pub fn for_task(task: &Task) -> Option<Self> {
        let timestamp = task.scheduled_for?;
        Some(PendingNotification {
            id: task.id,
            timestamp,
            title: REMINDER_TITLE.to_owned(),
            body: task.text.clone(),
            tag: format!("task-{}", task.id),
        })
    }
}

/// Split `pending` at `now`: entries due at or before `now` fire, the rest
/// are kept.
pub fn split_due(
    pending: Vec<PendingNotification>,
    now: i64,
) -> (Vec<PendingNotification>, Vec<PendingNotification>) {
    pending.into_iter().partition(|entry| entry.timestamp <= now)
}

/// Page-side scheduling API.
#[derive(Clone)]
pub struct NotificationScheduler {
    store: Arc<dyn KeyValueStore>,
    worker: WorkerHandle,
}

impl NotificationScheduler {
    pub fn new(store: Arc<dyn KeyValueStore>, worker: WorkerHandle) -> Self {
        NotificationScheduler { store, worker }
    }

    /// Persist a reminder for `task` and inform the worker. Unscheduled
    /// tasks are a no-op.
    pub async fn schedule(&self, task: &Task) -> Result<(), StorageError> {
        let Some(notification) = PendingNotification::for_task(task) else {
            return Ok(());
        };
        let mut pending: Vec<PendingNotification> =
            storage::load_list(self.store.as_ref(), PENDING_NOTIFICATIONS_KEY);
        pending.push(notification.clone());
        storage::save_list(self.store.as_ref(), PENDING_NOTIFICATIONS_KEY, &pending)?;

        self.worker
            .submit(WorkerBound::ScheduleNotification { notification })
            .await;
        Ok(())
    }

    /// Remove every reminder for `task_id` and inform the worker.
    pub async fn cancel(&self, task_id: TaskId) -> Result<(), StorageError> {
        let mut pending: Vec<PendingNotification> =
            storage::load_list(self.store.as_ref(), PENDING_NOTIFICATIONS_KEY);
        let before = pending.len();
        pending.retain(|entry| entry.id != task_id);
        if pending.len() != before {
            storage::save_list(self.store.as_ref(), PENDING_NOTIFICATIONS_KEY, &pending)?;
        }

        self.worker
            .submit(WorkerBound::CancelNotification { task_id })
            .await;
        Ok(())
    }
}
