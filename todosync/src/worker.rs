//! The background worker.
//!
//! The worker outlives any page: it hosts the reminder tick, the offline
//! asset cache, the storage shadow, and background task sync. It owns no
//! storage of its own. Reads go through a connected page
//! (`GET_STORAGE` with a one-shot reply) and fall back to the shadow cache
//! when no page is open; writes update the shadow and are pushed to a page
//! with `SET_STORAGE`. The shadow is a cache, never the source of truth
//! while a page is reachable.
//!
//! All state is injected at construction and owned by the run loop. The
//! worker is ephemeral: losing it loses only cached state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};

use crate::cache::{AssetCache, FetchError, Request, Response};
use crate::messages::{PageBound, PageEvent, PageHandle, PageId, WorkerBound};
use crate::scheduler::{self, PendingNotification};
use crate::storage::{
    DEAD_LETTER_KEY, PENDING_ACTIONS_KEY, PENDING_NOTIFICATIONS_KEY, TASKS_KEY,
};
use crate::sync::{self, QueuedAction};
use crate::task::{self, Task, TaskId};

/// Cadence of the reminder scan. Reminders can fire up to one interval
/// late; that is accepted.
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Action buttons attached to a fired reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    View,
    Complete,
}

/// A reminder handed to the platform notification surface.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredNotification {
    pub task_id: TaskId,
    pub title: String,
    pub body: String,
    pub tag: String,
    pub actions: Vec<NotificationAction>,
}

impl FiredNotification {
    fn from_pending(pending: &PendingNotification) -> Self {
        FiredNotification {
            task_id: pending.id,
            title: pending.title.clone(),
            body: pending.body.clone(),
            tag: pending.tag.clone(),
            actions: vec![NotificationAction::View, NotificationAction::Complete],
        }
    }
}

/// The platform notification surface.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &FiredNotification);
}

/// Default notifier: reminders go to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &FiredNotification) {
        log::info!("{}: {}", notification.title, notification.body);
    }
}

#[derive(Debug)]
pub enum WorkerCommand {
    Message(WorkerBound),
    Connect(PageHandle),
    Disconnect(PageId),
    /// Drain the offline mutation queue (`sync-pending-tasks`).
    Sync,
    /// Run a reminder scan at `now` without waiting for the interval.
    Tick { now: i64 },
    /// The user clicked a fired reminder.
    NotificationClick {
        action: NotificationAction,
        task_id: TaskId,
    },
    Fetch {
        request: Request,
        reply: oneshot::Sender<Result<Response, FetchError>>,
    },
}

/// Cloneable handle for talking to a running worker. Everything except
/// `fetch` is fire-and-forget: a dead worker drops the command with a log
/// line, it never errors.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerCommand>,
}

impl WorkerHandle {
    async fn send(&self, command: WorkerCommand) {
        if self.tx.send(command).await.is_err() {
            log::warn!("worker is gone, dropping command");
        }
    }

    pub async fn submit(&self, message: WorkerBound) {
        self.send(WorkerCommand::Message(message)).await;
    }

    pub async fn connect(&self, page: PageHandle) {
        self.send(WorkerCommand::Connect(page)).await;
    }

    pub async fn disconnect(&self, page_id: PageId) {
        self.send(WorkerCommand::Disconnect(page_id)).await;
    }

    /// Request a drain of the offline mutation queue.
    pub async fn request_sync(&self) {
        self.send(WorkerCommand::Sync).await;
    }

    /// Run a reminder scan at `now` immediately.
    pub async fn tick(&self, now: i64) {
        self.send(WorkerCommand::Tick { now }).await;
    }

    pub async fn notification_click(&self, action: NotificationAction, task_id: TaskId) {
        self.send(WorkerCommand::NotificationClick { action, task_id }).await;
    }

    /// Serve a request through the worker's asset cache.
    pub async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(WorkerCommand::Fetch { request, reply: reply_tx }).await;
        reply_rx.await.map_err(|_| FetchError::WorkerGone)?
    }
}

pub struct SyncWorkerBuilder {
    notifier: Arc<dyn Notifier>,
    cache: Option<AssetCache>,
}

impl SyncWorkerBuilder {
    pub fn new() -> Self {
        SyncWorkerBuilder {
            notifier: Arc::new(LogNotifier),
            cache: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Attach an offline asset cache; it is installed and activated when
    /// the worker starts.
    pub fn with_asset_cache(mut self, cache: AssetCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> (SyncWorker, WorkerHandle) {
        let (tx, rx) = mpsc::channel(100);
        let worker = SyncWorker {
            rx,
            pages: Vec::new(),
            shadow: HashMap::new(),
            pending: Vec::new(),
            notifier: self.notifier,
            cache: self.cache,
        };
        (worker, WorkerHandle { tx })
    }
}

impl Default for SyncWorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a bridge read. A page's answer is authoritative either way;
/// only `Unreachable` means the worker is on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StorageRead {
    Value(String),
    /// A page answered: the key is not there.
    Missing,
    /// No page reachable and nothing cached in the shadow.
    Unreachable,
}

pub struct SyncWorker {
    rx: mpsc::Receiver<WorkerCommand>,
    pages: Vec<PageHandle>,
    /// Write-through cache of page storage, used when no page is open.
    shadow: HashMap<String, String>,
    /// In-memory mirror of the pending reminder list, fed by
    /// schedule/cancel messages. Consulted only when storage is
    /// unreachable.
    pending: Vec<PendingNotification>,
    notifier: Arc<dyn Notifier>,
    cache: Option<AssetCache>,
}

impl SyncWorker {
    /// Run the worker in a background task.
    pub fn start(self) {
        tokio::spawn(async move {
            self.run().await;
        });
    }

    async fn run(mut self) {
        if let Some(cache) = self.cache.as_mut() {
            if let Err(err) = cache.install().await {
                log::error!("asset cache install failed: {err}");
            }
            cache.activate();
        }

        let mut ticker = time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // An interval yields immediately; the first scan should wait a
        // full period like setInterval does.
        ticker.tick().await;

        loop {
            select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = ticker.tick() => self.tick_at(task::unix_ms()).await,
            }
        }
        log::debug!("worker stopped: all handles dropped");
    }

    async fn handle_command(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Message(WorkerBound::ScheduleNotification { notification }) => {
                self.pending.push(notification);
            }
            WorkerCommand::Message(WorkerBound::CancelNotification { task_id }) => {
                self.pending.retain(|entry| entry.id != task_id);
            }
            WorkerCommand::Connect(page) => {
                log::info!("page {} connected", page.id);
                self.pages.push(page);
            }
            WorkerCommand::Disconnect(page_id) => {
                self.pages.retain(|page| page.id != page_id);
            }
            WorkerCommand::Sync => self.sync_pending_tasks().await,
            WorkerCommand::Tick { now } => self.tick_at(now).await,
            WorkerCommand::NotificationClick { action, task_id } => {
                self.handle_notification_click(action, task_id).await;
            }
            WorkerCommand::Fetch { request, reply } => {
                let result = match self.cache.as_mut() {
                    Some(cache) => cache.handle(&request).await,
                    None => Err(FetchError::Failed {
                        url: request.url.clone(),
                        reason: "no asset cache configured".into(),
                    }),
                };
                let _ = reply.send(result);
            }
        }
    }

    /// Scan the pending reminder list: fire everything due at or before
    /// `now`, persist the remainder, and tell every open page.
    async fn tick_at(&mut self, now: i64) {
        let pending = match self.get_storage(PENDING_NOTIFICATIONS_KEY).await {
            StorageRead::Value(raw) => match serde_json::from_str(&raw) {
                Ok(list) => list,
                Err(err) => {
                    log::warn!("stored pending reminders are unreadable, resetting: {err}");
                    Vec::new()
                }
            },
            // The page says there are none; the mirror must not resurrect
            // cancelled reminders.
            StorageRead::Missing => Vec::new(),
            // Storage unreachable: the mirror is the best we have.
            StorageRead::Unreachable => self.pending.clone(),
        };

        let (due, remaining) = scheduler::split_due(pending, now);
        for entry in &due {
            log::info!("firing reminder for task {}", entry.id);
            self.notifier.notify(&FiredNotification::from_pending(entry));
        }

        self.pending = remaining.clone();
        match serde_json::to_string(&remaining) {
            Ok(raw) => self.set_storage(PENDING_NOTIFICATIONS_KEY, raw).await,
            Err(err) => log::error!("failed to encode pending reminders: {err}"),
        }
        self.broadcast(PageBound::NotificationsUpdated { notifications: remaining })
            .await;
    }

    /// Drain the offline mutation queue against the stored task list and
    /// push the result to every open page.
    async fn sync_pending_tasks(&mut self) {
        let queue: Vec<QueuedAction> = self.load_list(PENDING_ACTIONS_KEY).await;
        if queue.is_empty() {
            return;
        }
        let tasks: Vec<Task> = self.load_list(TASKS_KEY).await;
        let outcome = sync::replay(tasks, queue);

        if !outcome.dead.is_empty() {
            let mut dead: Vec<QueuedAction> = self.load_list(DEAD_LETTER_KEY).await;
            dead.extend(outcome.dead);
            self.store_list(DEAD_LETTER_KEY, &dead).await;
        }
        self.store_list(TASKS_KEY, &outcome.tasks).await;
        self.store_list(PENDING_ACTIONS_KEY, &outcome.retry).await;

        log::info!(
            "synced {} queued actions ({} kept for retry)",
            outcome.applied.len(),
            outcome.retry.len()
        );
        self.broadcast(PageBound::TasksSynced { tasks: outcome.tasks }).await;
    }

    /// Route a reminder click to an open page. With no page open there is
    /// nothing to focus; the click is dropped.
    async fn handle_notification_click(&mut self, action: NotificationAction, task_id: TaskId) {
        let Some(page) = self.pages.first() else {
            log::info!("reminder clicked with no page open");
            return;
        };
        if action == NotificationAction::Complete {
            let event = PageEvent::new(PageBound::CompleteTask { task_id });
            if page.tx.send(event).await.is_err() {
                log::debug!("page {} went away before the click was delivered", page.id);
            }
        }
    }

    /// Read a key through the first open page; fall back to the shadow
    /// cache when no page answers. A cold shadow reads as unreachable.
    async fn get_storage(&mut self, key: &str) -> StorageRead {
        match self.read_from_page(key).await {
            Some(Some(value)) => {
                self.shadow.insert(key.to_owned(), value.clone());
                StorageRead::Value(value)
            }
            Some(None) => {
                // The page is authoritative: drop any stale cached copy.
                self.shadow.remove(key);
                StorageRead::Missing
            }
            None => match self.shadow.get(key) {
                Some(value) => StorageRead::Value(value.clone()),
                None => StorageRead::Unreachable,
            },
        }
    }

    /// `Some(answer)` if a page replied; `None` if no page is reachable.
    async fn read_from_page(&mut self, key: &str) -> Option<Option<String>> {
        let page = self.pages.first()?.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        let event = PageEvent {
            message: PageBound::GetStorage { key: key.to_owned() },
            reply: Some(reply_tx),
        };
        if page.tx.send(event).await.is_err() {
            log::debug!("page {} went away mid-read", page.id);
            return None;
        }
        reply_rx.await.ok()
    }

    /// Update the shadow and push the write to an open page, if any.
    async fn set_storage(&mut self, key: &str, value: String) {
        self.shadow.insert(key.to_owned(), value.clone());
        if let Some(page) = self.pages.first() {
            let event = PageEvent::new(PageBound::SetStorage {
                key: key.to_owned(),
                value,
            });
            if page.tx.send(event).await.is_err() {
                log::debug!("no page accepted the write for {key}");
            }
        }
    }

    async fn load_list<T: serde::de::DeserializeOwned>(&mut self, key: &str) -> Vec<T> {
        match self.get_storage(key).await {
            StorageRead::Value(raw) => match serde_json::from_str(&raw) {
                Ok(list) => list,
                Err(err) => {
                    log::warn!("stored {key} is unreadable, resetting to empty: {err}");
                    Vec::new()
                }
            },
            StorageRead::Missing | StorageRead::Unreachable => Vec::new(),
        }
    }

    async fn store_list<T: serde::Serialize>(&mut self, key: &str, list: &[T]) {
        match serde_json::to_string(list) {
            Ok(raw) => self.set_storage(key, raw).await,
            Err(err) => log::error!("failed to encode {key}: {err}"),
        }
    }

    async fn broadcast(&mut self, message: PageBound) {
        let mut alive = Vec::new();
        for page in self.pages.drain(..) {
            let event = PageEvent::new(message.clone());
            if page.tx.send(event).await.is_ok() {
                alive.push(page);
            } else {
                log::debug!("dropping disconnected page {}", page.id);
            }
        }
        self.pages = alive;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use uuid::Uuid;

    pub(crate) struct RecordingNotifier {
        pub fired: Mutex<Vec<FiredNotification>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Arc<Self> {
            Arc::new(RecordingNotifier { fired: Mutex::new(Vec::new()) })
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &FiredNotification) {
            self.fired.lock().expect("lock").push(notification.clone());
        }
    }

    fn make_pending(body: &str, timestamp: i64) -> PendingNotification {
        PendingNotification {
            id: Uuid::new_v4(),
            timestamp,
            title: "Task reminder".into(),
            body: body.into(),
            tag: "task-test".into(),
        }
    }

    #[tokio::test]
    async fn test_tick_with_no_page_uses_mirror() {
        let notifier = RecordingNotifier::new();
        let (mut worker, _handle) = SyncWorkerBuilder::new()
            .with_notifier(notifier.clone())
            .build();

        let pending = make_pending("from the mirror", 1_000);
        worker
            .handle_command(WorkerCommand::Message(WorkerBound::ScheduleNotification {
                notification: pending,
            }))
            .await;
        worker.tick_at(2_000).await;

        let fired = notifier.fired.lock().expect("lock");
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].body, "from the mirror");
        assert!(worker.pending.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_clears_mirror_before_fire() {
        let notifier = RecordingNotifier::new();
        let (mut worker, _handle) = SyncWorkerBuilder::new()
            .with_notifier(notifier.clone())
            .build();

        let pending = make_pending("never fires", 1_000);
        let task_id = pending.id;
        worker
            .handle_command(WorkerCommand::Message(WorkerBound::ScheduleNotification {
                notification: pending,
            }))
            .await;
        worker
            .handle_command(WorkerCommand::Message(WorkerBound::CancelNotification { task_id }))
            .await;
        worker.tick_at(2_000).await;

        assert!(notifier.fired.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn test_get_storage_without_page_reads_shadow() {
        let (mut worker, _handle) = SyncWorkerBuilder::new().build();
        assert_eq!(worker.get_storage("anything").await, StorageRead::Unreachable);

        worker.set_storage("anything", "cached".into()).await;
        assert_eq!(
            worker.get_storage("anything").await,
            StorageRead::Value("cached".into())
        );
    }

    #[tokio::test]
    async fn test_fired_reminder_carries_action_buttons() {
        let notifier = RecordingNotifier::new();
        let (mut worker, _handle) = SyncWorkerBuilder::new()
            .with_notifier(notifier.clone())
            .build();

        worker
            .handle_command(WorkerCommand::Message(WorkerBound::ScheduleNotification {
                notification: make_pending("buttons", 500),
            }))
            .await;
        worker.tick_at(500).await;

        let fired = notifier.fired.lock().expect("lock");
        assert_eq!(
            fired[0].actions,
            vec![NotificationAction::View, NotificationAction::Complete]
        );
    }

    #[tokio::test]
    async fn test_page_answer_overrides_shadow() {
        // Shadow says one thing, the connected page another: the page wins.
        let (mut worker, _handle) = SyncWorkerBuilder::new().build();
        worker.shadow.insert("k".into(), "stale".into());

        let (page_tx, mut page_rx) = mpsc::channel(4);
        worker
            .handle_command(WorkerCommand::Connect(PageHandle {
                id: Uuid::new_v4(),
                tx: page_tx,
            }))
            .await;

        let answer = tokio::spawn(async move {
            let event = page_rx.recv().await.expect("event");
            match event.message {
                PageBound::GetStorage { key } => {
                    assert_eq!(key, "k");
                    event.reply.expect("reply channel").send(Some("fresh".into())).ok();
                }
                other => panic!("unexpected message: {other:?}"),
            }
        });

        assert_eq!(worker.get_storage("k").await, StorageRead::Value("fresh".into()));
        assert_eq!(worker.shadow.get("k").map(String::as_str), Some("fresh"));
        answer.await.expect("page task");
    }

    #[tokio::test]
    async fn test_absent_page_reply_beats_shadow_and_mirror() {
        // Shadow and mirror still hold a reminder the page no longer
        // knows about. The page's "not there" answer wins: nothing fires
        // and the stale shadow entry is dropped.
        let notifier = RecordingNotifier::new();
        let (mut worker, _handle) = SyncWorkerBuilder::new()
            .with_notifier(notifier.clone())
            .build();

        let stale = make_pending("already cancelled", 1_000);
        worker.pending.push(stale.clone());
        worker.shadow.insert(
            PENDING_NOTIFICATIONS_KEY.to_owned(),
            serde_json::to_string(&vec![stale]).expect("encode"),
        );

        let (page_tx, mut page_rx) = mpsc::channel(8);
        worker
            .handle_command(WorkerCommand::Connect(PageHandle {
                id: Uuid::new_v4(),
                tx: page_tx,
            }))
            .await;
        tokio::spawn(async move {
            while let Some(event) = page_rx.recv().await {
                if let (PageBound::GetStorage { .. }, Some(reply)) =
                    (&event.message, event.reply)
                {
                    reply.send(None).ok();
                }
            }
        });

        worker.tick_at(2_000).await;

        assert!(notifier.fired.lock().expect("lock").is_empty());
        assert!(worker.pending.is_empty());
    }
}
