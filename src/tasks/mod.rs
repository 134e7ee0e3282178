//! Task orchestration.
//!
//! The manager accepts job factories, persists a history row per submit,
//! and runs at most one task at a time (single writer). Tasks cooperate
//! through their [`TaskContext`]: progress writes go through the repo,
//! pause/resume is observed at the next progress report, and abort fires a
//! cancellation token checked at every await boundary.
//!
//! A rate-limit pause is not an error: the body returns
//! [`TaskOutcome::PauseForRateLimit`], the manager marks the row paused,
//! sleeps on a cancellable timer and re-invokes the body. Before pausing,
//! a body may stash its position in the context's resume slot — the slot
//! survives re-invocations, so the retry re-enters the download loop at
//! the paused episode instead of starting over.

pub mod auto_import;
pub mod import;
pub mod manual;
pub mod util;

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config_store::ConfigStore;
use crate::constants::tasks as task_constants;
use crate::db::Store;
use self::util::short_error_message;

#[derive(Debug)]
pub enum TaskOutcome {
    /// Terminal success with a human-readable summary.
    Success(String),
    /// Terminal failure with a short message (already stripped).
    Failed(String),
    /// Cooperative rate-limit pause; the manager sleeps and re-runs.
    PauseForRateLimit {
        retry_after_seconds: u64,
        message: String,
    },
}

pub type TaskFuture = BoxFuture<'static, anyhow::Result<TaskOutcome>>;
pub type TaskFactory = Arc<dyn Fn(TaskContext) -> TaskFuture + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("相同任务已在队列中 (状态: {status})")]
    DuplicateActive { status: String },
    #[error("相同任务在 {minutes_ago} 分钟前已提交 (状态: {status})")]
    DuplicateRecent { minutes_ago: i64, status: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Handle a running task body uses to report progress and observe control
/// signals.
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: String,
    store: Store,
    cancel: CancellationToken,
    paused: watch::Receiver<bool>,
    /// Scratch state a body writes before a rate-limit pause and takes
    /// back on the next invocation; shared across re-runs of one task.
    resume_state: Arc<Mutex<Option<serde_json::Value>>>,
}

impl TaskContext {
    /// Write a progress row. Blocks while the task is operator-paused and
    /// errors once the task was aborted.
    pub async fn progress(&self, percent: i32, message: &str) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            anyhow::bail!("任务已取消");
        }

        if *self.paused.borrow() {
            self.store
                .update_task_progress(&self.task_id, "paused", percent, message)
                .await?;

            let mut paused = self.paused.clone();
            loop {
                tokio::select! {
                    () = self.cancel.cancelled() => anyhow::bail!("任务已取消"),
                    changed = paused.changed() => {
                        if changed.is_err() || !*paused.borrow() {
                            break;
                        }
                    }
                }
            }
        }

        self.store
            .update_task_progress(&self.task_id, "running", percent, message)
            .await?;
        Ok(())
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stash state to resume from after a rate-limit pause.
    pub fn set_resume_state(&self, value: serde_json::Value) {
        *self.resume_state.lock().expect("resume state poisoned") = Some(value);
    }

    /// Take the stashed resume state, leaving the slot empty.
    #[must_use]
    pub fn take_resume_state(&self) -> Option<serde_json::Value> {
        self.resume_state
            .lock()
            .expect("resume state poisoned")
            .take()
    }
}

struct TaskControl {
    cancel: CancellationToken,
    paused_tx: watch::Sender<bool>,
    queued: bool,
}

struct QueuedTask {
    id: String,
    title: String,
    factory: TaskFactory,
}

pub struct TaskManager {
    store: Store,
    config: ConfigStore,
    queue_tx: mpsc::UnboundedSender<QueuedTask>,
    controls: Arc<Mutex<HashMap<String, TaskControl>>>,
}

impl TaskManager {
    /// Build the manager and start its single worker loop. Tasks a previous
    /// process left running or paused are force-failed first.
    pub async fn start(store: Store, config: ConfigStore) -> anyhow::Result<Arc<Self>> {
        store.fail_orphaned_tasks().await?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            store,
            config,
            queue_tx,
            controls: Arc::new(Mutex::new(HashMap::new())),
        });

        let worker = manager.clone();
        tokio::spawn(async move {
            worker.run_worker(queue_rx).await;
        });

        Ok(manager)
    }

    /// Submit a job. Rejects when the unique key is held by an active task
    /// or by a terminal task inside the duplicate window.
    pub async fn submit(
        &self,
        factory: TaskFactory,
        title: &str,
        unique_key: Option<&str>,
        task_type: &str,
        parameters: Option<&str>,
        scheduler_task_id: Option<&str>,
    ) -> Result<String, SubmitError> {
        let task_id = Uuid::new_v4().to_string();
        let unique_key = unique_key.map_or_else(|| task_id.clone(), ToString::to_string);

        if let Some(active) = self
            .store
            .find_active_task_by_unique_key(&unique_key)
            .await?
        {
            return Err(SubmitError::DuplicateActive {
                status: active.status,
            });
        }

        let threshold_hours = self
            .config
            .get_i64(
                "taskDuplicateThresholdHours",
                task_constants::DUPLICATE_THRESHOLD_HOURS,
            )
            .await;
        let since = (chrono::Utc::now() - chrono::Duration::hours(threshold_hours)).to_rfc3339();
        if let Some(recent) = self
            .store
            .find_recent_terminal_task(&unique_key, &since)
            .await?
        {
            let minutes_ago = chrono::DateTime::parse_from_rfc3339(&recent.created_at)
                .map(|t| (chrono::Utc::now() - t.with_timezone(&chrono::Utc)).num_minutes())
                .unwrap_or(0);
            return Err(SubmitError::DuplicateRecent {
                minutes_ago,
                status: recent.status,
            });
        }

        self.store
            .create_pending_task(
                &task_id,
                title,
                &unique_key,
                task_type,
                scheduler_task_id,
                parameters,
            )
            .await?;

        let (paused_tx, _) = watch::channel(false);
        self.controls
            .lock()
            .expect("task controls poisoned")
            .insert(
                task_id.clone(),
                TaskControl {
                    cancel: CancellationToken::new(),
                    paused_tx,
                    queued: true,
                },
            );

        self.queue_tx
            .send(QueuedTask {
                id: task_id.clone(),
                title: title.to_string(),
                factory,
            })
            .map_err(|_| SubmitError::Other(anyhow::anyhow!("task queue closed")))?;

        info!("Task '{}' queued as {}", title, task_id);
        Ok(task_id)
    }

    /// Cooperative abort; with `force` the row is failed immediately even
    /// if the body never observes the token.
    pub async fn abort(&self, task_id: &str, force: bool) -> anyhow::Result<bool> {
        let found = {
            let controls = self.controls.lock().expect("task controls poisoned");
            controls.get(task_id).map(|c| c.cancel.clone())
        };

        match found {
            Some(cancel) => {
                cancel.cancel();
                if force {
                    self.store
                        .update_task_progress(task_id, "failed", 100, "任务已被强制中止")
                        .await?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove a still-pending task from the queue.
    pub async fn cancel_pending(&self, task_id: &str) -> anyhow::Result<bool> {
        let cancelled = {
            let controls = self.controls.lock().expect("task controls poisoned");
            controls
                .get(task_id)
                .filter(|c| c.queued)
                .map(|c| c.cancel.clone())
        };

        if let Some(cancel) = cancelled {
            cancel.cancel();
            self.store
                .update_task_progress(task_id, "cancelled", 0, "任务已从队列中移除")
                .await?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn pause(&self, task_id: &str) -> bool {
        self.set_paused(task_id, true)
    }

    pub fn resume(&self, task_id: &str) -> bool {
        self.set_paused(task_id, false)
    }

    fn set_paused(&self, task_id: &str, value: bool) -> bool {
        let controls = self.controls.lock().expect("task controls poisoned");
        controls
            .get(task_id)
            .is_some_and(|c| c.paused_tx.send(value).is_ok())
    }

    #[must_use]
    pub fn is_active(&self, task_id: &str) -> bool {
        self.controls
            .lock()
            .expect("task controls poisoned")
            .contains_key(task_id)
    }

    async fn run_worker(self: &Arc<Self>, mut queue_rx: mpsc::UnboundedReceiver<QueuedTask>) {
        info!("Task worker started");
        while let Some(task) = queue_rx.recv().await {
            self.run_one(task).await;
        }
        warn!("Task queue closed, worker exiting");
    }

    async fn run_one(&self, task: QueuedTask) {
        let (cancel, paused_rx) = {
            let mut controls = self.controls.lock().expect("task controls poisoned");
            let Some(control) = controls.get_mut(&task.id) else {
                return;
            };
            control.queued = false;
            (control.cancel.clone(), control.paused_tx.subscribe())
        };

        if cancel.is_cancelled() {
            self.controls
                .lock()
                .expect("task controls poisoned")
                .remove(&task.id);
            return;
        }

        info!(event = "task_started", task_id = %task.id, title = %task.title, "Task starting");
        let started = std::time::Instant::now();

        if let Err(e) = self
            .store
            .update_task_progress(&task.id, "running", 0, "任务开始")
            .await
        {
            error!("Failed to mark task {} running: {}", task.id, e);
        }

        let ctx = TaskContext {
            task_id: task.id.clone(),
            store: self.store.clone(),
            cancel: cancel.clone(),
            paused: paused_rx,
            resume_state: Arc::new(Mutex::new(None)),
        };

        loop {
            let body = (task.factory)(ctx.clone());

            let run = tokio::select! {
                () = cancel.cancelled() => None,
                result = body => Some(result),
            };

            let (status, message) = match run {
                None => ("cancelled", "任务已中止".to_string()),
                Some(Ok(TaskOutcome::Success(message))) => ("completed", message),
                Some(Ok(TaskOutcome::Failed(message))) => ("failed", message),
                Some(Ok(TaskOutcome::PauseForRateLimit {
                    retry_after_seconds,
                    message,
                })) => {
                    warn!(
                        task_id = %task.id,
                        retry_after_seconds,
                        "Task paused for rate limit"
                    );
                    if let Err(e) = self
                        .store
                        .update_task_progress(&task.id, "paused", 0, &message)
                        .await
                    {
                        error!("Failed to mark task {} paused: {}", task.id, e);
                    }

                    // Cancellable sleep so an abort during the pause
                    // terminates promptly.
                    let slept = tokio::select! {
                        () = cancel.cancelled() => false,
                        () = tokio::time::sleep(std::time::Duration::from_secs(retry_after_seconds)) => true,
                    };
                    if slept {
                        if let Err(e) = self
                            .store
                            .update_task_progress(&task.id, "running", 0, "速率限制解除，继续执行")
                            .await
                        {
                            error!("Failed to resume task {}: {}", task.id, e);
                        }
                        continue;
                    }
                    ("cancelled", "任务在暂停期间被中止".to_string())
                }
                Some(Err(e)) => {
                    if cancel.is_cancelled() {
                        ("cancelled", "任务已中止".to_string())
                    } else {
                        ("failed", short_error_message(&e))
                    }
                }
            };

            if let Err(e) = self
                .store
                .update_task_progress(&task.id, status, 100, &message)
                .await
            {
                error!("Failed to finish task {}: {}", task.id, e);
            }

            info!(
                event = "task_finished",
                task_id = %task.id,
                status,
                duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Task finished"
            );
            break;
        }

        self.controls
            .lock()
            .expect("task controls poisoned")
            .remove(&task.id);
    }
}
