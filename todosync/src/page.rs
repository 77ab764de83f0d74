//! The foreground page context.
//!
//! A [`Page`] owns the real key/value store and the in-memory task list.
//! It registers itself with the worker on connect and then answers the
//! worker's bridge traffic (storage proxying, completion clicks, sync
//! results) from a background driver task.
//!
//! While offline, mutations update the in-memory list and are recorded in
//! the persisted `pendingActions` queue instead of the task list; going
//! back online drains the queue (see [`crate::sync`]). UI feedback is
//! surfaced as [`Banner`] values for the embedder to render.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::messages::{PageBound, PageEvent, PageHandle, PageId};
use crate::push::PushManager;
use crate::scheduler::{NotificationScheduler, PendingNotification};
use crate::storage::{
    self, DEAD_LETTER_KEY, KeyValueStore, PENDING_ACTIONS_KEY, PENDING_NOTIFICATIONS_KEY,
    StorageError, TASKS_KEY,
};
use crate::sync::{self, PendingAction, QueuedAction};
use crate::task::{self, Task, TaskId};
use crate::worker::WorkerHandle;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("task text is empty")]
    EmptyText,

    #[error("no task with id {0}")]
    UnknownTask(TaskId),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerKind {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient UI message for the embedder to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub kind: BannerKind,
    pub text: String,
}

#[derive(Debug, Default)]
struct PageState {
    tasks: Vec<Task>,
    pending_notifications: Vec<PendingNotification>,
    queued: Vec<QueuedAction>,
    online: bool,
    banners: Vec<Banner>,
}

#[derive(Clone)]
pub struct Page {
    id: PageId,
    store: Arc<dyn KeyValueStore>,
    worker: WorkerHandle,
    scheduler: NotificationScheduler,
    push: Option<PushManager>,
    state: Arc<Mutex<PageState>>,
}

impl Page {
    /// Load state from the store, register with the worker, and start the
    /// bridge driver. Leftover offline actions from a previous session
    /// trigger a background sync request.
    pub async fn connect(
        store: Arc<dyn KeyValueStore>,
        worker: WorkerHandle,
        push: Option<PushManager>,
    ) -> Page {
        let tasks = storage::load_list(store.as_ref(), TASKS_KEY);
        let pending_notifications = storage::load_list(store.as_ref(), PENDING_NOTIFICATIONS_KEY);
        let queued: Vec<QueuedAction> = storage::load_list(store.as_ref(), PENDING_ACTIONS_KEY);
        let has_leftovers = !queued.is_empty();

        let page = Page {
            id: Uuid::new_v4(),
            scheduler: NotificationScheduler::new(store.clone(), worker.clone()),
            store,
            worker: worker.clone(),
            push,
            state: Arc::new(Mutex::new(PageState {
                tasks,
                pending_notifications,
                queued,
                online: true,
                banners: Vec::new(),
            })),
        };

        let (tx, mut rx) = mpsc::channel(32);
        worker.connect(PageHandle { id: page.id, tx }).await;
        if has_leftovers {
            worker.request_sync().await;
        }

        let driver = page.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                driver.handle_event(event).await;
            }
        });

        page
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    /// Page state stays coherent even if a holder panicked mid-update, so
    /// a poisoned lock is recovered rather than propagated.
    fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unregister from the worker.
    pub async fn disconnect(&self) {
        self.worker.disconnect(self.id).await;
    }

    /// Add a task. A scheduled task asks for notification permission
    /// first; denial degrades to a plain task with a warning banner.
    pub async fn add_task(
        &self,
        text: &str,
        scheduled_for: Option<i64>,
    ) -> Result<TaskId, PageError> {
        let text = text.trim();
        if text.is_empty() {
            self.banner(BannerKind::Warning, "Please enter a task");
            return Err(PageError::EmptyText);
        }

        let task = Task::new(text, scheduled_for);
        let mut armed = scheduled_for.is_some();
        if armed {
            let allowed = match &self.push {
                Some(push) => push.ensure_permission().await,
                None => false,
            };
            if !allowed {
                self.banner(
                    BannerKind::Warning,
                    "Notifications are required for scheduled tasks",
                );
                armed = false;
            }
        }

        let online = {
            let mut state = self.state();
            state.tasks.push(task.clone());
            state.online
        };
        if online {
            self.save_tasks()?;
        } else {
            self.record(PendingAction::Add { task: task.clone() })?;
        }

        if armed {
            self.scheduler.schedule(&task).await?;
        }
        self.banner(BannerKind::Success, "Task added");
        Ok(task.id)
    }

    /// Delete a task and cancel any reminder for it. Deleting an unknown
    /// id is a no-op.
    pub async fn delete_task(&self, task_id: TaskId) -> Result<(), PageError> {
        let (removed, online) = {
            let mut state = self.state();
            let before = state.tasks.len();
            state.tasks.retain(|task| task.id != task_id);
            (state.tasks.len() != before, state.online)
        };
        if !removed {
            log::debug!("delete for unknown task {task_id}");
            return Ok(());
        }

        if online {
            self.save_tasks()?;
        } else {
            self.record(PendingAction::Delete { task_id })?;
        }
        self.scheduler.cancel(task_id).await?;
        Ok(())
    }

    /// Flip a task's completed state; returns the new state.
    pub async fn toggle_task(&self, task_id: TaskId) -> Result<bool, PageError> {
        let (task, online) = {
            let mut state = self.state();
            let Some(task) = state.tasks.iter_mut().find(|task| task.id == task_id) else {
                return Err(PageError::UnknownTask(task_id));
            };
            task.completed = !task.completed;
            let snapshot = task.clone();
            (snapshot, state.online)
        };

        if online {
            self.save_tasks()?;
        } else {
            self.record(PendingAction::Update { task: task.clone() })?;
        }
        Ok(task.completed)
    }

    /// Mark a task completed if it is not already (the reminder-click
    /// path). Routes through the normal toggle so the change persists.
    async fn complete_task(&self, task_id: TaskId) {
        let already_done = {
            let state = self.state();
            state
                .tasks
                .iter()
                .find(|task| task.id == task_id)
                .map(|task| task.completed)
        };
        match already_done {
            Some(false) => {
                if let Err(err) = self.toggle_task(task_id).await {
                    log::error!("failed to complete task from reminder: {err}");
                }
            }
            Some(true) => {}
            None => log::debug!("completion for unknown task {task_id}"),
        }
    }

    /// Record an online/offline transition. Going online drains the
    /// offline queue.
    pub async fn set_online(&self, online: bool) -> Result<(), PageError> {
        let was_online = {
            let mut state = self.state();
            let was = state.online;
            state.online = online;
            was
        };
        if online && !was_online {
            self.drain_queued().await?;
        } else if !online && was_online {
            self.banner(BannerKind::Info, "Offline, changes will sync when you reconnect");
        }
        Ok(())
    }

    pub fn is_online(&self) -> bool {
        self.state().online
    }

    /// Tasks in display order.
    pub fn sorted_tasks(&self) -> Vec<Task> {
        let mut tasks = self.state().tasks.clone();
        task::sort_for_display(&mut tasks);
        tasks
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state().tasks.clone()
    }

    pub fn pending_notifications(&self) -> Vec<PendingNotification> {
        self.state().pending_notifications.clone()
    }

    /// Drain accumulated UI banners.
    pub fn take_banners(&self) -> Vec<Banner> {
        std::mem::take(&mut self.state().banners)
    }

    /// Handle one worker→page delivery.
    pub async fn handle_event(&self, event: PageEvent) {
        match event.message {
            PageBound::GetStorage { key } => {
                let value = self.store.get(&key);
                if let Some(reply) = event.reply {
                    let _ = reply.send(value);
                }
            }
            PageBound::SetStorage { key, value } => {
                if let Err(err) = self.store.set(&key, &value) {
                    log::error!("failed to persist {key}: {err}");
                    return;
                }
                // A write to the task list also refreshes the in-page copy.
                if key == TASKS_KEY {
                    match serde_json::from_str(&value) {
                        Ok(tasks) => self.state().tasks = tasks,
                        Err(err) => log::warn!("synced task list is unreadable: {err}"),
                    }
                }
            }
            PageBound::CompleteTask { task_id } => self.complete_task(task_id).await,
            PageBound::NotificationsUpdated { notifications } => {
                self.state().pending_notifications = notifications;
            }
            PageBound::TasksSynced { tasks } => {
                self.state().tasks = tasks;
            }
        }
    }

    /// Replay the offline queue against the stored list and persist the
    /// result. Reminders were already scheduled at add time, so replayed
    /// additions do not get a second entry here.
    async fn drain_queued(&self) -> Result<(), PageError> {
        let queue = self.state().queued.clone();
        if queue.is_empty() {
            return Ok(());
        }

        let stored: Vec<Task> = storage::load_list(self.store.as_ref(), TASKS_KEY);
        let outcome = sync::replay(stored, queue);

        // The in-memory queue keeps the pre-drain actions until every
        // persist has gone through, so a failed write can be retried on
        // the next reconnect.
        storage::save_list(self.store.as_ref(), TASKS_KEY, &outcome.tasks)?;
        storage::save_list(self.store.as_ref(), PENDING_ACTIONS_KEY, &outcome.retry)?;
        if !outcome.dead.is_empty() {
            let mut dead: Vec<QueuedAction> =
                storage::load_list(self.store.as_ref(), DEAD_LETTER_KEY);
            dead.extend(outcome.dead);
            storage::save_list(self.store.as_ref(), DEAD_LETTER_KEY, &dead)?;
        }

        {
            let mut state = self.state();
            state.tasks = outcome.tasks;
            state.queued = outcome.retry;
        }
        self.banner(BannerKind::Success, "Offline changes synced");
        Ok(())
    }

    fn record(&self, action: PendingAction) -> Result<(), StorageError> {
        let queued = {
            let mut state = self.state();
            state.queued.push(action.into());
            state.queued.clone()
        };
        storage::save_list(self.store.as_ref(), PENDING_ACTIONS_KEY, &queued)
    }

    fn save_tasks(&self) -> Result<(), StorageError> {
        let tasks = self.state().tasks.clone();
        storage::save_list(self.store.as_ref(), TASKS_KEY, &tasks)
    }

    fn banner(&self, kind: BannerKind, text: &str) {
        self.state().banners.push(Banner { kind, text: text.to_owned() });
    }
}
