use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tavla_core::sync;
use tavla_core::{
    transact, CoreError, Cursor, IdentityId, Order, PersistentTask, Query, ReadTxnExt,
    Repository, TaskId, WriteTxnExt,
};

/// Processes tasks of one kind.
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> &str;

    /// Advance the task. The engine persists the task afterwards, so the
    /// handler must move `next_processing_time` forward (or clear it).
    fn process(&self, task: &mut PersistentTask, now: DateTime<Utc>) -> Result<(), CoreError>;
}

/// Counts from one [`PersistentTaskEngine::run_once`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskRunStats {
    pub deleted: usize,
    pub processed: usize,
}

/// Scheduler for long-lived background work items.
///
/// Each task is handled in its own transaction, so one failing task never
/// aborts the rest of a pass.
pub struct PersistentTaskEngine<R: Repository> {
    repo: Arc<R>,
    handlers: HashMap<String, Box<dyn TaskHandler>>,
    monitor: Mutex<()>,
}

/// Proof that the task engine monitor is held.
pub struct TaskEngineGuard<'a, R: Repository> {
    engine: &'a PersistentTaskEngine<R>,
    _monitor: MutexGuard<'a, ()>,
}

impl<R: Repository> PersistentTaskEngine<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            repo,
            handlers: HashMap::new(),
            monitor: Mutex::new(()),
        }
    }

    pub fn with_handler(mut self, handler: impl TaskHandler + 'static) -> Self {
        self.handlers
            .insert(handler.kind().to_string(), Box::new(handler));
        self
    }

    pub fn lock(&self) -> TaskEngineGuard<'_, R> {
        TaskEngineGuard {
            engine: self,
            _monitor: sync::lock(&self.monitor),
        }
    }

    /// Store a new task. Fails with `Duplicate` if the ID is taken.
    pub fn schedule(&self, task: &PersistentTask) -> Result<(), CoreError> {
        let _monitor = sync::lock(&self.monitor);
        transact(&*self.repo, |txn| -> Result<(), CoreError> {
            txn.insert(task)?;
            Ok(())
        })?;
        debug!(task = %task.id, kind = %task.kind, "Scheduled task");
        Ok(())
    }

    pub fn get_task(&self, id: &TaskId) -> Result<PersistentTask, CoreError> {
        let read = self.repo.begin_read()?;
        read.get::<PersistentTask>(&id.to_string())?
            .ok_or_else(|| CoreError::not_found("task", id))
    }

    /// Delete every task whose delete time has passed. Returns how many
    /// were deleted.
    pub fn delete_expired_tasks(&self, now: DateTime<Utc>) -> Result<usize, CoreError> {
        let _monitor = sync::lock(&self.monitor);
        let expired = self.snapshot(move |t| t.is_expired(now))?;

        let mut deleted = 0;
        for task in expired {
            let result = transact(&*self.repo, |txn| -> Result<bool, CoreError> {
                Ok(txn.remove(&task)?)
            });
            match result {
                Ok(true) => {
                    debug!(task = %task.id, "Deleted expired task");
                    deleted += 1;
                }
                Ok(false) => {}
                Err(e) => warn!(task = %task.id, error = %e, "Deleting expired task failed"),
            }
        }
        Ok(deleted)
    }

    /// Hand every due task to its handler. Returns how many were processed.
    pub fn process_tasks(&self, now: DateTime<Utc>) -> Result<usize, CoreError> {
        let _monitor = sync::lock(&self.monitor);
        let due = self.snapshot(move |t| t.is_due(now))?;

        let mut processed = 0;
        for task in due {
            let Some(handler) = self.handlers.get(&task.kind) else {
                warn!(task = %task.id, kind = %task.kind, "No handler for task kind");
                continue;
            };

            let result = transact(&*self.repo, |txn| -> Result<bool, CoreError> {
                // Re-read: the task may have changed since the snapshot
                let Some(mut current) = txn.get::<PersistentTask>(&task.id.to_string())? else {
                    return Ok(false);
                };
                handler.process(&mut current, now)?;
                txn.put(&current)?;
                Ok(true)
            });
            match result {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(e) => warn!(task = %task.id, error = %e, "Processing task failed"),
            }
        }
        Ok(processed)
    }

    /// One expiry pass, then one processing pass.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<TaskRunStats, CoreError> {
        let deleted = self.delete_expired_tasks(now)?;
        let processed = self.process_tasks(now)?;
        Ok(TaskRunStats { deleted, processed })
    }

    fn snapshot(
        &self,
        predicate: impl Fn(&PersistentTask) -> bool + Send + Sync + 'static,
    ) -> Result<Vec<PersistentTask>, CoreError> {
        let read = self.repo.begin_read()?;
        Ok(Query::all().filter(predicate).run(&read)?.collect())
    }
}

impl<R: Repository> TaskEngineGuard<'_, R> {
    /// Tasks of `owner` currently on display, most recent display time
    /// first.
    pub fn visible_tasks(
        &self,
        owner: &IdentityId,
        now: DateTime<Utc>,
    ) -> Result<Cursor<PersistentTask>, CoreError> {
        let owner = owner.clone();
        let read = self.engine.repo.begin_read()?;
        Ok(Query::all()
            .filter(move |t: &PersistentTask| t.owner == owner && t.is_visible(now))
            .order_by(|t: &PersistentTask| t.next_display_time, Order::Descending)
            .run(&read)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub text: String,
    pub interval_secs: i64,
}

/// Shows a reminder, then shows it again every `interval_secs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReminderHandler;

impl ReminderHandler {
    pub const KIND: &'static str = "reminder";

    /// A reminder first processed at `first`, kept until `delete_at`.
    pub fn task(
        owner: IdentityId,
        text: impl Into<String>,
        interval: Duration,
        first: DateTime<Utc>,
        delete_at: Option<DateTime<Utc>>,
    ) -> PersistentTask {
        let payload = ReminderPayload {
            text: text.into(),
            interval_secs: interval.num_seconds(),
        };
        let mut task = PersistentTask::new(
            owner,
            Self::KIND,
            serde_json::to_value(payload).unwrap_or_default(),
        )
        .process_at(first);
        task.delete_time = delete_at;
        task
    }
}

impl TaskHandler for ReminderHandler {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn process(&self, task: &mut PersistentTask, now: DateTime<Utc>) -> Result<(), CoreError> {
        let payload: ReminderPayload = serde_json::from_value(task.payload.clone())
            .map_err(|e| CoreError::Task(format!("invalid reminder payload: {}", e)))?;
        if payload.interval_secs <= 0 {
            return Err(CoreError::Task(format!(
                "reminder interval must be positive, got {}",
                payload.interval_secs
            )));
        }

        task.next_display_time = Some(now);
        task.next_processing_time = Some(now + Duration::seconds(payload.interval_secs));
        Ok(())
    }
}
