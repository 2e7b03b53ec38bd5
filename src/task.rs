//! Waiting on long-running server-side tasks.
//!
//! [`TaskAwaiter::wait`] polls a task on a fixed interval and logs its status
//! only when it changes. A caller-supplied cancellation future (Ctrl-C in the
//! CLI) stops the polling immediately; the user is then asked once whether
//! the remote task should be cancelled as well. A summary is always logged
//! before returning.

use std::future::Future;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::backend::{Backend, TaskInfo};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Completed,
    /// The remote task was cancelled, by us or by someone else.
    Cancelled,
    /// We stopped waiting; the task keeps running on the backend.
    StillRunning,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Completed => "completed",
            TaskState::Cancelled => "cancelled",
            TaskState::StillRunning => "still running",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSummary {
    pub task_id: String,
    pub state: TaskState,
    pub elapsed: Duration,
    /// The wait was interrupted by the caller.
    pub interrupted: bool,
    pub remote_cancel_requested: bool,
    pub last_status: Map<String, Value>,
}

/// Asks whether an interrupted wait should also cancel the remote task.
pub trait CancelPrompt: Send + Sync {
    fn confirm_cancel(&self, task_id: &str) -> bool;
}

/// Interactive y/n prompt on stdin. End of input counts as "no".
pub struct StdinPrompt;

impl CancelPrompt for StdinPrompt {
    fn confirm_cancel(&self, task_id: &str) -> bool {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            eprint!("Also cancel task {} on the backend? [y/n] ", task_id);
            let _ = std::io::stderr().flush();
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return false,
                Ok(_) => {}
            }
            match line.trim().to_lowercase().as_str() {
                "y" | "yes" => return true,
                "n" | "no" => return false,
                _ => continue,
            }
        }
    }
}

/// Fixed answer, for non-interactive callers.
pub struct FixedAnswer(pub bool);

impl CancelPrompt for FixedAnswer {
    fn confirm_cancel(&self, _task_id: &str) -> bool {
        self.0
    }
}

/// Formats `status.<field>` against `status.total`, e.g. `"updated 120 / 500"`.
pub fn progress_formatter(field: &str) -> impl Fn(&Map<String, Value>) -> String + Send + Sync {
    let field = field.to_string();
    move |status| {
        let value = status.get(&field).cloned().unwrap_or(Value::Null);
        match status.get("total") {
            Some(total) => format!("{} {} / {}", field, value, total),
            None => format!("{} {}", field, value),
        }
    }
}

/// Resolves when `signal` fires. If the signal listener could not be set
/// up, never resolves, so a broken listener is not mistaken for an interrupt.
pub async fn interrupt_on<S>(signal: S)
where
    S: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!(error = %e, "could not listen for interrupts, waiting without them");
        std::future::pending::<()>().await;
    }
}

pub struct TaskAwaiter {
    backend: Arc<dyn Backend>,
    poll_interval: Duration,
}

impl TaskAwaiter {
    pub fn new(backend: Arc<dyn Backend>, poll_interval: Duration) -> Self {
        Self {
            backend,
            poll_interval,
        }
    }

    /// Poll `task_id` until it completes or `cancel` resolves.
    ///
    /// `cancel` is raced against both the status request and the sleep
    /// between polls, so an interrupt never waits on a slow backend.
    pub async fn wait<F>(
        &self,
        task_id: &str,
        formatter: &(dyn Fn(&Map<String, Value>) -> String + Send + Sync),
        cancel: F,
        prompt: Arc<dyn CancelPrompt>,
    ) -> Result<TaskSummary>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let started = Instant::now();
        let mut last_line: Option<String> = None;
        let mut last: Option<TaskInfo> = None;

        loop {
            let task = tokio::select! {
                biased;
                _ = &mut cancel => {
                    return self.interrupted(task_id, last.as_ref(), started, prompt).await;
                }
                task = self.backend.get_task(task_id) => task?,
            };
            let line = formatter(&task.task.status);
            if last_line.as_deref() != Some(line.as_str()) {
                info!(task_id, status = %line, "task status");
                last_line = Some(line);
            }

            if task.completed {
                let state = if task.task.cancelled {
                    TaskState::Cancelled
                } else {
                    TaskState::Completed
                };
                return Ok(summarize(task_id, state, Some(&task), started, false, false));
            }
            last = Some(task);

            tokio::select! {
                biased;
                _ = &mut cancel => {
                    return self.interrupted(task_id, last.as_ref(), started, prompt).await;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn interrupted(
        &self,
        task_id: &str,
        last: Option<&TaskInfo>,
        started: Instant,
        prompt: Arc<dyn CancelPrompt>,
    ) -> Result<TaskSummary> {
        let id = task_id.to_string();
        let remote = match tokio::task::spawn_blocking(move || prompt.confirm_cancel(&id)).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(task_id, error = %e, "cancel prompt failed, leaving task running");
                false
            }
        };
        let state = if remote {
            self.backend.cancel_task(task_id).await?;
            TaskState::Cancelled
        } else {
            TaskState::StillRunning
        };
        Ok(summarize(task_id, state, last, started, true, remote))
    }
}

fn summarize(
    task_id: &str,
    state: TaskState,
    task: Option<&TaskInfo>,
    started: Instant,
    interrupted: bool,
    remote_cancel_requested: bool,
) -> TaskSummary {
    let elapsed = match task.map_or(0, |t| t.task.running_time_in_nanos) {
        0 => started.elapsed(),
        nanos => Duration::from_nanos(nanos),
    };
    info!(
        task_id,
        state = state.as_str(),
        elapsed_secs = elapsed.as_secs(),
        interrupted,
        "task wait finished"
    );
    TaskSummary {
        task_id: task_id.to_string(),
        state,
        elapsed,
        interrupted,
        remote_cancel_requested,
        last_status: task.map(|t| t.task.status.clone()).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::task_status;
    use crate::backend::{BulkOperation, BulkResponse, InMemoryBackend, SearchResponse, UpdateAction};
    use serde_json::json;

    fn awaiter(backend: &Arc<InMemoryBackend>) -> TaskAwaiter {
        TaskAwaiter::new(backend.clone(), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn waits_until_completion() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.add_task(
            "n:1",
            vec![
                task_status(false, json!({ "updated": 0, "total": 10 }), 1),
                task_status(false, json!({ "updated": 5, "total": 10 }), 2),
                task_status(true, json!({ "updated": 10, "total": 10 }), 3),
            ],
        );
        let formatter = progress_formatter("updated");
        let summary = awaiter(&backend)
            .wait("n:1", &formatter, std::future::pending(), Arc::new(FixedAnswer(false)))
            .await
            .unwrap();
        assert_eq!(summary.state, TaskState::Completed);
        assert_eq!(summary.elapsed, Duration::from_secs(3));
        assert_eq!(summary.last_status["updated"], 10);
        assert!(!summary.interrupted);
    }

    #[tokio::test]
    async fn interruption_without_remote_cancel_leaves_task_running() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.add_task("n:2", vec![task_status(false, json!({ "updated": 1 }), 1)]);
        let formatter = progress_formatter("updated");
        let summary = awaiter(&backend)
            .wait("n:2", &formatter, async {}, Arc::new(FixedAnswer(false)))
            .await
            .unwrap();
        assert_eq!(summary.state, TaskState::StillRunning);
        assert!(summary.interrupted);
        assert!(!backend.task_cancel_requested("n:2"));
    }

    #[tokio::test]
    async fn confirmed_interruption_cancels_remote_task() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.add_task("n:3", vec![task_status(false, json!({}), 1)]);
        let formatter = progress_formatter("updated");
        let summary = awaiter(&backend)
            .wait("n:3", &formatter, async {}, Arc::new(FixedAnswer(true)))
            .await
            .unwrap();
        assert_eq!(summary.state, TaskState::Cancelled);
        assert!(summary.remote_cancel_requested);
        assert!(backend.task_cancel_requested("n:3"));
    }

    #[tokio::test]
    async fn unknown_task_is_an_error() {
        let backend = Arc::new(InMemoryBackend::new());
        let formatter = progress_formatter("updated");
        let result = awaiter(&backend)
            .wait("missing", &formatter, std::future::pending(), Arc::new(FixedAnswer(false)))
            .await;
        assert!(result.is_err());
    }

    /// Delegates to the in-memory backend but answers status requests slowly.
    struct SlowTasks {
        inner: InMemoryBackend,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Backend for SlowTasks {
        async fn search(&self, index: Option<&str>, body: &Value) -> Result<SearchResponse> {
            self.inner.search(index, body).await
        }
        async fn open_point_in_time(&self, index: &str, keep_alive: &str) -> Result<String> {
            self.inner.open_point_in_time(index, keep_alive).await
        }
        async fn close_point_in_time(&self, pit_id: &str) -> Result<()> {
            self.inner.close_point_in_time(pit_id).await
        }
        async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
            self.inner.bulk(operations).await
        }
        async fn index_document(
            &self,
            index: &str,
            id: Option<&str>,
            source: &Map<String, Value>,
            pipeline: Option<&str>,
        ) -> Result<String> {
            self.inner.index_document(index, id, source, pipeline).await
        }
        async fn update(&self, index: &str, id: &str, action: &UpdateAction) -> Result<()> {
            self.inner.update(index, id, action).await
        }
        async fn get_task(&self, task_id: &str) -> Result<TaskInfo> {
            tokio::time::sleep(self.delay).await;
            self.inner.get_task(task_id).await
        }
        async fn cancel_task(&self, task_id: &str) -> Result<()> {
            self.inner.cancel_task(task_id).await
        }
        async fn index_exists(&self, index: &str) -> Result<bool> {
            self.inner.index_exists(index).await
        }
        async fn create_index(&self, index: &str, mappings: &Value) -> Result<()> {
            self.inner.create_index(index, mappings).await
        }
    }

    #[tokio::test]
    async fn interrupt_does_not_wait_for_status_request() {
        let backend = Arc::new(SlowTasks {
            inner: InMemoryBackend::new(),
            delay: Duration::from_secs(30),
        });
        backend
            .inner
            .add_task("n:4", vec![task_status(false, json!({ "updated": 1 }), 1)]);
        let awaiter = TaskAwaiter::new(backend.clone(), Duration::from_millis(5));
        let formatter = progress_formatter("updated");

        let started = Instant::now();
        let summary = awaiter
            .wait(
                "n:4",
                &formatter,
                tokio::time::sleep(Duration::from_millis(20)),
                Arc::new(FixedAnswer(true)),
            )
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(summary.state, TaskState::Cancelled);
        assert!(summary.interrupted);
        assert!(summary.last_status.is_empty());
        assert!(backend.inner.task_cancel_requested("n:4"));
    }

    #[tokio::test]
    async fn interrupt_follows_signal() {
        interrupt_on(async { Ok(()) }).await;
    }

    #[tokio::test]
    async fn failed_signal_listener_never_interrupts() {
        let failing = async { Err(std::io::Error::other("no signal handler")) };
        let waited = tokio::time::timeout(Duration::from_millis(50), interrupt_on(failing)).await;
        assert!(waited.is_err());
    }

    #[test]
    fn formatter_shows_total() {
        let status = json!({ "updated": 3, "total": 9 });
        let line = progress_formatter("updated")(status.as_object().unwrap());
        assert_eq!(line, "updated 3 / 9");
    }
}
