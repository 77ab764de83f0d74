//! The page↔worker message protocol.
//!
//! Every message is a `type`-tagged JSON object. The worker cannot touch the
//! page's store directly, so reads and writes are proxied over the bridge:
//! `GET_STORAGE` carries a one-shot reply channel, everything else is
//! fire-and-forget. There is no sequence numbering; ordering is whatever a
//! single channel delivers.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::scheduler::PendingNotification;
use crate::task::{Task, TaskId};

/// Messages the page sends to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum WorkerBound {
    /// Append a reminder to the worker's pending list.
    ScheduleNotification { notification: PendingNotification },
    /// Remove every pending reminder for this task.
    CancelNotification { task_id: TaskId },
}

/// Messages the worker sends to a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum PageBound {
    /// Ask the page for a stored value; answered over the event's reply
    /// channel.
    GetStorage { key: String },
    /// Ask the page to persist a value.
    SetStorage { key: String, value: String },
    /// Mark a task completed through the page's normal toggle path.
    CompleteTask { task_id: TaskId },
    /// Refresh the page's copy of the pending reminder list.
    NotificationsUpdated { notifications: Vec<PendingNotification> },
    /// Replace the page's task list after a background sync.
    TasksSynced { tasks: Vec<Task> },
}

/// Identifier for one connected page instance.
pub type PageId = Uuid;

/// One worker→page delivery. `reply` is present only for
/// [`PageBound::GetStorage`].
#[derive(Debug)]
pub struct PageEvent {
    pub message: PageBound,
    pub reply: Option<oneshot::Sender<Option<String>>>,
}

impl PageEvent {
    pub fn new(message: PageBound) -> Self {
        PageEvent { message, reply: None }
    }
}

/// Worker-side handle to a connected page.
#[derive(Debug, Clone)]
pub struct PageHandle {
    pub id: PageId,
    pub tx: mpsc::Sender<PageEvent>,
}
