//! # Todosync
//!
//! An offline-first to-do engine. A foreground [`Page`] and a background
//! [`SyncWorker`](worker::SyncWorker) run as separate async contexts with
//! no shared memory, coordinating a persisted key/value store, scheduled
//! reminders, and an offline mutation queue over an asynchronous message
//! bridge.
//!
//! The page owns the store; the worker reaches it through the bridge and
//! keeps a shadow cache for when no page is open. Reminders fire from the
//! worker's 60-second scan, so they survive the page closing. Mutations
//! made offline queue up and drain per-action on reconnect, with a
//! dead-letter set for actions that keep failing.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use todosync::{MemoryStore, Page, SyncWorkerBuilder};
//!
//! let (worker, handle) = SyncWorkerBuilder::new().build();
//! worker.start();
//!
//! let store = Arc::new(MemoryStore::new());
//! let page = Page::connect(store, handle, None).await;
//!
//! let in_a_minute = todosync::task::unix_ms() + 60_000;
//! page.add_task("Buy milk", Some(in_a_minute)).await?;
//! ```
//!
//! ## Key types
//!
//! - [`Page`] — the foreground context: task CRUD, offline queue, banners
//! - [`SyncWorkerBuilder`] — configures and builds the background worker
//! - [`WorkerHandle`] — cloneable channel to a running worker
//! - [`PendingNotification`] — a scheduled-but-not-yet-fired reminder
//! - [`KeyValueStore`] — the storage seam ([`MemoryStore`], [`FileStore`])
//! - [`Notifier`] — the platform notification seam

pub mod cache;
pub mod messages;
pub mod page;
pub mod push;
pub mod scheduler;
pub mod storage;
pub mod sync;
pub mod task;
pub mod worker;

pub use cache::{AssetCache, FetchError, Network, Request, Response};
pub use messages::{PageBound, PageEvent, PageHandle, PageId, WorkerBound};
pub use page::{Banner, BannerKind, Page, PageError};
pub use push::{PushManager, PushPlatform, PushStatus, SubscriptionStatus};
pub use scheduler::{NotificationScheduler, PendingNotification};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
pub use sync::{PendingAction, QueuedAction, SyncError};
pub use task::{Task, TaskId};
pub use worker::{
    FiredNotification, LogNotifier, NotificationAction, Notifier, SyncWorker, SyncWorkerBuilder,
    WorkerHandle,
};
