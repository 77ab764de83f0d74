//! Offline mutation queue and replay.
//!
//! While the page is offline, mutations are recorded as [`PendingAction`]s
//! under the `pendingActions` key. On reconnect the queue drains against
//! the stored task list, in queue order, one action at a time: a failing
//! action stays queued with its attempt count bumped and is retried on the
//! next drain, until [`MAX_REPLAY_ATTEMPTS`] moves it to the dead-letter
//! set. Succeeded actions are removed individually, so a bad action never
//! blocks or replays its siblings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{Task, TaskId};

/// Replay attempts before an action is moved to the dead-letter set.
pub const MAX_REPLAY_ATTEMPTS: u32 = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("task {0} already exists")]
    DuplicateTask(TaskId),

    #[error("no task with id {0}")]
    UnknownTask(TaskId),
}

/// A mutation recorded while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum PendingAction {
    Add { task: Task },
    Update { task: Task },
    Delete { task_id: TaskId },
}

/// A queue entry: the action plus how many replays have failed so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    #[serde(flatten)]
    pub action: PendingAction,
    #[serde(default)]
    pub attempts: u32,
}

impl From<PendingAction> for QueuedAction {
    fn from(action: PendingAction) -> Self {
        QueuedAction { action, attempts: 0 }
    }
}

/// Apply one action to a task list.
///
/// `ADD` of an id already present and `UPDATE`/`DELETE` of an unknown id
/// are failures rather than silent no-ops, so replay problems surface in
/// the retry/dead-letter path instead of disappearing.
pub fn apply_action(tasks: &mut Vec<Task>, action: &PendingAction) -> Result<(), SyncError> {
    match action {
        PendingAction::Add { task } => {
            if tasks.iter().any(|existing| existing.id == task.id) {
                return Err(SyncError::DuplicateTask(task.id));
            }
            tasks.push(task.clone());
            Ok(())
        }
        PendingAction::Update { task } => {
            let slot = tasks
                .iter_mut()
                .find(|existing| existing.id == task.id)
                .ok_or(SyncError::UnknownTask(task.id))?;
            *slot = task.clone();
            Ok(())
        }
        PendingAction::Delete { task_id } => {
            let index = tasks
                .iter()
                .position(|existing| existing.id == *task_id)
                .ok_or(SyncError::UnknownTask(*task_id))?;
            tasks.remove(index);
            Ok(())
        }
    }
}

/// The result of draining a queue against a task list.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome {
    /// The task list after every applicable action.
    pub tasks: Vec<Task>,
    /// Actions that succeeded this drain, in replay order.
    pub applied: Vec<PendingAction>,
    /// Actions to keep queued for the next drain.
    pub retry: Vec<QueuedAction>,
    /// Actions that exhausted their attempts this drain.
    pub dead: Vec<QueuedAction>,
}

/// Drain `queue` against `tasks`, action by action, in order.
pub fn replay(mut tasks: Vec<Task>, queue: Vec<QueuedAction>) -> ReplayOutcome {
    let mut applied = Vec::new();
    let mut retry = Vec::new();
    let mut dead = Vec::new();

    for mut queued in queue {
        match apply_action(&mut tasks, &queued.action) {
            Ok(()) => applied.push(queued.action),
            Err(err) => {
                queued.attempts += 1;
                if queued.attempts >= MAX_REPLAY_ATTEMPTS {
                    log::warn!(
                        "dropping action after {} failed replays: {err}",
                        queued.attempts
                    );
                    dead.push(queued);
                } else {
                    log::warn!(
                        "replay failed (attempt {}), keeping queued: {err}",
                        queued.attempts
                    );
                    retry.push(queued);
                }
            }
        }
    }

    ReplayOutcome {
        tasks,
        applied,
        retry,
        dead,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(actions: Vec<PendingAction>) -> Vec<QueuedAction> {
        actions.into_iter().map(QueuedAction::from).collect()
    }

    #[test]
    fn test_replay_matches_direct_application() {
        let a = Task::new("a", None);
        let b = Task::new("b", Some(1_000));
        let mut updated_a = a.clone();
        updated_a.completed = true;

        let actions = vec![
            PendingAction::Add { task: a.clone() },
            PendingAction::Add { task: b.clone() },
            PendingAction::Update { task: updated_a.clone() },
            PendingAction::Delete { task_id: b.id },
        ];

        let mut direct = Vec::new();
        for action in &actions {
            apply_action(&mut direct, action).expect("direct application");
        }

        let outcome = replay(Vec::new(), queue(actions));
        assert_eq!(outcome.tasks, direct);
        assert!(outcome.retry.is_empty());
        assert!(outcome.dead.is_empty());
        assert_eq!(outcome.applied.len(), 4);
    }

    #[test]
    fn test_failing_action_does_not_block_siblings() {
        let a = Task::new("a", None);
        let ghost = Task::new("ghost", None);
        let actions = vec![
            PendingAction::Delete { task_id: ghost.id },
            PendingAction::Add { task: a.clone() },
        ];

        let outcome = replay(Vec::new(), queue(actions));
        assert_eq!(outcome.tasks, vec![a]);
        assert_eq!(outcome.retry.len(), 1);
        assert_eq!(outcome.retry[0].attempts, 1);
        assert_eq!(outcome.applied.len(), 1);
    }

    #[test]
    fn test_retried_siblings_are_not_replayed_again() {
        // Drain once: ADD succeeds, DELETE of a ghost fails. Drain the
        // retry queue again: only the DELETE runs, so the ADD is not
        // duplicated.
        let a = Task::new("a", None);
        let ghost = Task::new("ghost", None);
        let actions = vec![
            PendingAction::Add { task: a.clone() },
            PendingAction::Delete { task_id: ghost.id },
        ];

        let first = replay(Vec::new(), queue(actions));
        assert_eq!(first.tasks.len(), 1);

        let second = replay(first.tasks, first.retry);
        assert_eq!(second.tasks, vec![a]);
        assert_eq!(second.retry.len(), 1);
        assert_eq!(second.retry[0].attempts, 2);
    }

    #[test]
    fn test_third_failure_goes_to_dead_letter() {
        let ghost = Task::new("ghost", None);
        let mut pending = queue(vec![PendingAction::Delete { task_id: ghost.id }]);

        for expected_attempts in 1..MAX_REPLAY_ATTEMPTS {
            let outcome = replay(Vec::new(), pending);
            assert_eq!(outcome.retry.len(), 1);
            assert_eq!(outcome.retry[0].attempts, expected_attempts);
            assert!(outcome.dead.is_empty());
            pending = outcome.retry;
        }

        let outcome = replay(Vec::new(), pending);
        assert!(outcome.retry.is_empty());
        assert_eq!(outcome.dead.len(), 1);
        assert_eq!(outcome.dead[0].attempts, MAX_REPLAY_ATTEMPTS);
    }

    #[test]
    fn test_duplicate_add_is_a_failure() {
        let a = Task::new("a", None);
        let outcome = replay(
            vec![a.clone()],
            queue(vec![PendingAction::Add { task: a.clone() }]),
        );
        assert_eq!(outcome.tasks, vec![a]);
        assert_eq!(outcome.retry.len(), 1);
    }

    #[test]
    fn test_update_replaces_whole_task() {
        let mut task = Task::new("before", None);
        let original = task.clone();
        task.text = "after".into();
        task.completed = true;

        let outcome = replay(
            vec![original],
            queue(vec![PendingAction::Update { task: task.clone() }]),
        );
        assert_eq!(outcome.tasks, vec![task]);
    }

    #[test]
    fn test_action_wire_tags() {
        let task = Task::new("x", None);
        let wire = serde_json::to_value(PendingAction::Delete { task_id: task.id })
            .expect("serialize");
        assert_eq!(wire["type"], "DELETE");
        assert_eq!(wire["taskId"], task.id.to_string());

        let wire = serde_json::to_value(PendingAction::Add { task }).expect("serialize");
        assert_eq!(wire["type"], "ADD");
        assert!(wire["task"]["createdAt"].is_i64());
    }

    #[test]
    fn test_queued_action_attempts_default_to_zero() {
        let task = Task::new("x", None);
        let raw = serde_json::to_string(&PendingAction::Add { task }).expect("serialize");
        let queued: QueuedAction = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(queued.attempts, 0);
    }
}
