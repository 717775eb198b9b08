//! `DigitalTaskService` (spec §4.7): execute/cancel lifecycle, a
//! push-update queue with retry/backoff and durable fallback, and
//! interrupt-previous semantics when a device can only run one active
//! task at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ocn_domain::interfaces::DurableStore;
use ocn_domain::model::{DigitalTaskRow, PushContext, PushQueueRow, PushQueueStatus, TaskStatus};
use ocn_domain::{Error, Result};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::executor::TaskExecutor;

/// One push notification about a task's lifecycle, delivered to a
/// status sink (typically the runtime's southbound adapter) and
/// durably queued as a fallback.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskStatusUpdate {
    pub task_id: String,
    pub device_id: Option<String>,
    pub session_id: String,
    pub event: String,
    pub status: TaskStatus,
    pub error: Option<String>,
}

#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn deliver(&self, update: &TaskStatusUpdate) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ExecuteTaskRequest {
    pub session_id: String,
    pub device_id: Option<String>,
    pub goal: String,
    pub timeout_seconds: Option<u64>,
    pub notify: bool,
    pub speak: bool,
    pub interrupt_previous: bool,
}

struct RunningTask {
    cancel: CancellationToken,
    cancel_reason: Mutex<Option<String>>,
}

pub struct DigitalTaskService {
    store: Arc<dyn DurableStore>,
    executor: Arc<dyn TaskExecutor>,
    default_timeout_seconds: u64,
    status_sink: Option<Arc<dyn StatusSink>>,
    status_retry_count: u32,
    status_retry_backoff_ms: u64,
    running: Mutex<HashMap<String, Arc<RunningTask>>>,
    device_running: Mutex<HashMap<String, String>>,
}

impl DigitalTaskService {
    pub fn new(store: Arc<dyn DurableStore>, executor: Arc<dyn TaskExecutor>, default_timeout_seconds: u64) -> Self {
        Self {
            store,
            executor,
            default_timeout_seconds,
            status_sink: None,
            status_retry_count: 0,
            status_retry_backoff_ms: 200,
            running: Mutex::new(HashMap::new()),
            device_running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>, retry_count: u32, retry_backoff_ms: u64) -> Self {
        self.status_sink = Some(sink);
        self.status_retry_count = retry_count;
        self.status_retry_backoff_ms = retry_backoff_ms;
        self
    }

    pub async fn execute(self: &Arc<Self>, req: ExecuteTaskRequest, now_ms: i64) -> Result<DigitalTaskRow> {
        if req.goal.trim().is_empty() {
            return Err(Error::BadRequest("goal must not be empty".into()));
        }

        if req.interrupt_previous {
            if let Some(device_id) = &req.device_id {
                self.interrupt_running_task_for_device(device_id, now_ms).await?;
            }
        }

        let task_id = Uuid::new_v4().to_string();
        let mut row = DigitalTaskRow {
            task_id: task_id.clone(),
            session_id: req.session_id.clone(),
            device_id: req.device_id.clone(),
            goal: req.goal.clone(),
            status: TaskStatus::Pending,
            steps: vec![],
            result: None,
            error: None,
            timeout_seconds: req.timeout_seconds.unwrap_or(self.default_timeout_seconds),
            push_context: PushContext {
                device_id: req.device_id.clone(),
                notify: req.notify,
                speak: req.speak,
                interrupt_previous: req.interrupt_previous,
            },
            created_at: now_ms,
            updated_at: now_ms,
        };
        row.transition(TaskStatus::Pending, now_ms, None);
        self.store.upsert_task(&row).await?;
        self.notify(&row, "accepted").await;

        let running = Arc::new(RunningTask { cancel: CancellationToken::new(), cancel_reason: Mutex::new(None) });
        self.running.lock().insert(task_id.clone(), running.clone());
        if let Some(device_id) = &req.device_id {
            self.device_running.lock().insert(device_id.clone(), task_id.clone());
        }

        let this = self.clone();
        let goal = req.goal.clone();
        let session_id = req.session_id.clone();
        tokio::spawn(async move {
            this.run_to_completion(task_id, goal, session_id, row.timeout_seconds, running).await;
        });

        Ok(row)
    }

    async fn interrupt_running_task_for_device(&self, device_id: &str, now_ms: i64) -> Result<()> {
        let existing_task_id = self.device_running.lock().get(device_id).cloned();
        let Some(task_id) = existing_task_id else {
            return Ok(());
        };
        let running = self.running.lock().get(&task_id).cloned();
        if let Some(running) = running {
            *running.cancel_reason.lock() = Some("interrupted_by_new_task".to_string());
            running.cancel.cancel();
        }
        let _ = now_ms;
        Ok(())
    }

    async fn run_to_completion(
        self: Arc<Self>,
        task_id: String,
        goal: String,
        session_id: String,
        timeout_seconds: u64,
        running: Arc<RunningTask>,
    ) {
        let Ok(Some(mut row)) = self.store.get_task(&task_id).await else { return };
        row.transition(TaskStatus::Running, now_ms(), None);
        let _ = self.store.upsert_task(&row).await;
        self.notify(&row, "status_update").await;

        let exec_future = self.executor.execute(&goal, &session_id);
        let timeout = Duration::from_secs(timeout_seconds.max(1));

        let outcome = tokio::select! {
            _ = running.cancel.cancelled() => RunOutcome::Canceled,
            result = tokio::time::timeout(timeout, exec_future) => match result {
                Ok(Ok(value)) => RunOutcome::Success(value),
                Ok(Err(e)) => RunOutcome::Failed(e.to_string()),
                Err(_) => RunOutcome::TimedOut,
            },
        };

        let now = now_ms();
        match outcome {
            RunOutcome::Success(value) => {
                row.result = Some(value);
                row.transition(TaskStatus::Success, now, None);
            }
            RunOutcome::Failed(err) => {
                row.error = Some(err.clone());
                row.transition(TaskStatus::Failed, now, Some(err));
            }
            RunOutcome::TimedOut => {
                let msg = format!("timeout after {timeout_seconds}s");
                row.error = Some(msg.clone());
                row.transition(TaskStatus::Timeout, now, Some(msg));
            }
            RunOutcome::Canceled => {
                let reason = running.cancel_reason.lock().clone().unwrap_or_else(|| "canceled".to_string());
                row.error = Some(reason.clone());
                row.transition(TaskStatus::Canceled, now, Some(reason));
            }
        }

        let _ = self.store.upsert_task(&row).await;
        self.notify(&row, "status_update").await;

        self.running.lock().remove(&task_id);
        if let Some(device_id) = &row.device_id {
            let mut device_running = self.device_running.lock();
            if device_running.get(device_id) == Some(&task_id) {
                device_running.remove(device_id);
            }
        }
    }

    pub async fn cancel(&self, task_id: &str, reason: &str) -> Result<DigitalTaskRow> {
        let row = self.store.get_task(task_id).await?.ok_or_else(|| Error::NotFound(task_id.to_string()))?;
        let running = self.running.lock().get(task_id).cloned();
        match running {
            Some(running) => {
                *running.cancel_reason.lock() = Some(reason.to_string());
                running.cancel.cancel();
                Ok(row)
            }
            None => Err(Error::NotFound(format!("task {task_id} is not running"))),
        }
    }

    pub async fn get_task(&self, task_id: &str) -> Result<DigitalTaskRow> {
        self.store.get_task(task_id).await?.ok_or_else(|| Error::NotFound(task_id.to_string()))
    }

    /// On process start, any task still `pending`/`running` could not
    /// have survived the crash. Rather than failing those out, re-run
    /// them to completion with their original goal and push context
    /// restored, the same way a fresh `execute` would.
    pub async fn recover_incomplete(self: &Arc<Self>, now_ms: i64) -> Result<usize> {
        let incomplete = self.store.list_incomplete_tasks().await?;
        let count = incomplete.len();
        for mut row in incomplete {
            row.error = None;
            row.transition(TaskStatus::Pending, now_ms, Some("resumed_after_restart".to_string()));
            self.store.upsert_task(&row).await?;
            self.notify(&row, "status_update").await;

            let running = Arc::new(RunningTask { cancel: CancellationToken::new(), cancel_reason: Mutex::new(None) });
            self.running.lock().insert(row.task_id.clone(), running.clone());
            if let Some(device_id) = &row.device_id {
                self.device_running.lock().insert(device_id.clone(), row.task_id.clone());
            }

            let this = self.clone();
            let task_id = row.task_id.clone();
            let goal = row.goal.clone();
            let session_id = row.session_id.clone();
            let timeout_seconds = row.timeout_seconds;
            tokio::spawn(async move {
                this.run_to_completion(task_id, goal, session_id, timeout_seconds, running).await;
            });
        }
        Ok(count)
    }

    /// Retry delivery of a device's queued-but-undelivered status pushes
    /// (spec §4.7), typically called when a device reconnects and sends
    /// HELLO. Returns the number of pushes successfully redelivered.
    pub async fn flush_pending_updates(&self, device_id: &str, limit: usize) -> Result<usize> {
        let Some(sink) = &self.status_sink else { return Ok(0) };
        let pending = self.store.list_pending_pushes(device_id).await?;
        let mut delivered = 0;
        for push in pending.into_iter().take(limit.max(1)) {
            let update: TaskStatusUpdate = match serde_json::from_value(push.payload.clone()) {
                Ok(update) => update,
                Err(e) => {
                    tracing::warn!(push_id = %push.id, error = %e, "dropping undecodable queued push update");
                    continue;
                }
            };
            if sink.deliver(&update).await.is_ok() {
                let _ = self.store.mark_push_delivered(&push.id).await;
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    async fn notify(&self, row: &DigitalTaskRow, event: &str) {
        let update = TaskStatusUpdate {
            task_id: row.task_id.clone(),
            device_id: row.device_id.clone(),
            session_id: row.session_id.clone(),
            event: event.to_string(),
            status: row.status,
            error: row.error.clone(),
        };

        if !row.push_context.notify && !row.push_context.speak && event != "accepted" {
            return;
        }

        let idempotent_key = format!("task-{}-{:?}-{event}", row.task_id, row.status);
        if let Some(device_id) = &row.device_id {
            let push_row = PushQueueRow {
                id: Uuid::new_v4().to_string(),
                device_id: device_id.clone(),
                session_id: row.session_id.clone(),
                payload: serde_json::to_value(&update).unwrap_or(serde_json::Value::Null),
                status: PushQueueStatus::Pending,
                idempotent_key: idempotent_key.clone(),
                created_at: now_ms(),
            };
            let _ = self.store.enqueue_push(&push_row).await;

            if let Some(sink) = &self.status_sink {
                let mut attempt = 0;
                loop {
                    match sink.deliver(&update).await {
                        Ok(()) => {
                            let _ = self.store.mark_push_delivered(&push_row.id).await;
                            break;
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, task_id = %row.task_id, attempt, "status push delivery failed");
                            if attempt >= self.status_retry_count {
                                break;
                            }
                            attempt += 1;
                            tokio::time::sleep(Duration::from_millis(self.status_retry_backoff_ms)).await;
                        }
                    }
                }
            }
        }
    }
}

enum RunOutcome {
    Success(serde_json::Value),
    Failed(String),
    TimedOut,
    Canceled,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ClosureExecutor;
    use ocn_domain::model::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeStore {
        tasks: StdMutex<HashMap<String, DigitalTaskRow>>,
        pushes: StdMutex<Vec<PushQueueRow>>,
    }

    #[async_trait]
    impl DurableStore for FakeStore {
        async fn upsert_session(&self, _row: &DeviceSessionRow) -> Result<()> {
            Ok(())
        }
        async fn get_session(&self, _d: &str, _s: &str) -> Result<Option<DeviceSessionRow>> {
            Ok(None)
        }
        async fn close_session(&self, _d: &str, _s: &str, _r: &str, _n: i64) -> Result<()> {
            Ok(())
        }
        async fn upsert_binding(&self, _row: &DeviceBindingRow) -> Result<()> {
            Ok(())
        }
        async fn get_binding(&self, _device_id: &str) -> Result<Option<DeviceBindingRow>> {
            Ok(None)
        }
        async fn record_operation(&self, _row: &DeviceOperationRow) -> Result<()> {
            Ok(())
        }
        async fn update_operation(&self, _row: &DeviceOperationRow) -> Result<()> {
            Ok(())
        }
        async fn get_operation(&self, _operation_id: &str) -> Result<Option<DeviceOperationRow>> {
            Ok(None)
        }
        async fn upsert_task(&self, row: &DigitalTaskRow) -> Result<()> {
            self.tasks.lock().unwrap().insert(row.task_id.clone(), row.clone());
            Ok(())
        }
        async fn get_task(&self, task_id: &str) -> Result<Option<DigitalTaskRow>> {
            Ok(self.tasks.lock().unwrap().get(task_id).cloned())
        }
        async fn list_incomplete_tasks(&self) -> Result<Vec<DigitalTaskRow>> {
            Ok(self.tasks.lock().unwrap().values().filter(|t| !t.status.is_terminal()).cloned().collect())
        }
        async fn record_lifelog_image(&self, _row: &LifelogImageRow) -> Result<()> {
            Ok(())
        }
        async fn record_lifelog_context(&self, _row: &LifelogContextRow) -> Result<()> {
            Ok(())
        }
        async fn record_lifelog_event(&self, _row: &LifelogEventRow) -> Result<()> {
            Ok(())
        }
        async fn record_telemetry(&self, _row: &TelemetrySampleRow) -> Result<()> {
            Ok(())
        }
        async fn record_observability_sample(&self, _row: &ObservabilitySampleRow) -> Result<()> {
            Ok(())
        }
        async fn enqueue_push(&self, row: &PushQueueRow) -> Result<()> {
            self.pushes.lock().unwrap().push(row.clone());
            Ok(())
        }
        async fn mark_push_delivered(&self, id: &str) -> Result<()> {
            if let Some(push) = self.pushes.lock().unwrap().iter_mut().find(|p| p.id == id) {
                push.status = PushQueueStatus::Delivered;
            }
            Ok(())
        }
        async fn list_pending_pushes(&self, device_id: &str) -> Result<Vec<PushQueueRow>> {
            Ok(self
                .pushes
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.device_id == device_id && matches!(p.status, PushQueueStatus::Pending))
                .cloned()
                .collect())
        }
        async fn insert_thought_trace(&self, _row: &ocn_domain::trace::ThoughtTraceRow) -> Result<()> {
            Ok(())
        }
        async fn list_thought_traces(&self, _session_id: &str, _limit: usize) -> Result<Vec<ocn_domain::trace::ThoughtTraceRow>> {
            Ok(vec![])
        }
        async fn backup_to(&self, _dest_path: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn wait_terminal(service: &Arc<DigitalTaskService>, task_id: &str) -> DigitalTaskRow {
        for _ in 0..200 {
            let row = service.get_task(task_id).await.unwrap();
            if row.status.is_terminal() {
                return row;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn successful_execution_reaches_success_with_result() {
        let store = Arc::new(FakeStore::default());
        let executor = Arc::new(ClosureExecutor(|goal: String, session_id: String| async move {
            Ok(serde_json::json!({"text": format!("ok:{session_id}:{goal}")}))
        }));
        let service = Arc::new(DigitalTaskService::new(store, executor, 2));
        let req = ExecuteTaskRequest {
            session_id: "s1".into(),
            device_id: None,
            goal: "navigate".into(),
            timeout_seconds: None,
            notify: false,
            speak: false,
            interrupt_previous: false,
        };
        let row = service.execute(req, 0).await.unwrap();
        let done = wait_terminal(&service, &row.task_id).await;
        assert_eq!(done.status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn failing_executor_marks_task_failed_with_error_text() {
        let store = Arc::new(FakeStore::default());
        let executor = Arc::new(ClosureExecutor(|_goal: String, _session_id: String| async move {
            Err(anyhow::anyhow!("boom"))
        }));
        let service = Arc::new(DigitalTaskService::new(store, executor, 2));
        let req = ExecuteTaskRequest {
            session_id: "s1".into(),
            device_id: None,
            goal: "raise error".into(),
            timeout_seconds: None,
            notify: false,
            speak: false,
            interrupt_previous: false,
        };
        let row = service.execute(req, 0).await.unwrap();
        let done = wait_terminal(&service, &row.task_id).await;
        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn slow_executor_times_out() {
        let store = Arc::new(FakeStore::default());
        let executor = Arc::new(ClosureExecutor(|_goal: String, _session_id: String| async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(serde_json::Value::Null)
        }));
        let service = Arc::new(DigitalTaskService::new(store, executor, 1));
        let req = ExecuteTaskRequest {
            session_id: "s1".into(),
            device_id: None,
            goal: "slow".into(),
            timeout_seconds: Some(1),
            notify: false,
            speak: false,
            interrupt_previous: false,
        };
        let row = service.execute(req, 0).await.unwrap();
        let done = wait_terminal(&service, &row.task_id).await;
        assert_eq!(done.status, TaskStatus::Timeout);
    }

    #[tokio::test]
    async fn empty_goal_is_rejected() {
        let store = Arc::new(FakeStore::default());
        let executor = Arc::new(ClosureExecutor(|_g: String, _s: String| async move { Ok(serde_json::Value::Null) }));
        let service = Arc::new(DigitalTaskService::new(store, executor, 2));
        let req = ExecuteTaskRequest {
            session_id: "s1".into(),
            device_id: None,
            goal: "   ".into(),
            timeout_seconds: None,
            notify: false,
            speak: false,
            interrupt_previous: false,
        };
        let err = service.execute(req, 0).await.unwrap_err();
        assert_eq!(err.error_code(), "bad_request");
    }

    #[tokio::test]
    async fn interrupt_previous_cancels_the_running_task_for_that_device() {
        let store = Arc::new(FakeStore::default());
        let executor = Arc::new(ClosureExecutor(|goal: String, session_id: String| async move {
            if goal.contains("long") {
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
            Ok(serde_json::json!({"text": format!("{session_id}:{goal}")}))
        }));
        let service = Arc::new(DigitalTaskService::new(store, executor, 5));

        let first = service
            .execute(
                ExecuteTaskRequest {
                    session_id: "s1".into(),
                    device_id: Some("dev-1".into()),
                    goal: "long task".into(),
                    timeout_seconds: None,
                    notify: true,
                    speak: false,
                    interrupt_previous: false,
                },
                0,
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = service
            .execute(
                ExecuteTaskRequest {
                    session_id: "s2".into(),
                    device_id: Some("dev-1".into()),
                    goal: "short task".into(),
                    timeout_seconds: None,
                    notify: true,
                    speak: false,
                    interrupt_previous: true,
                },
                0,
            )
            .await
            .unwrap();

        let first_done = wait_terminal(&service, &first.task_id).await;
        let second_done = wait_terminal(&service, &second.task_id).await;
        assert_eq!(first_done.status, TaskStatus::Canceled);
        assert_eq!(first_done.error.as_deref(), Some("interrupted_by_new_task"));
        assert_eq!(second_done.status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn cancel_of_unknown_task_is_not_found() {
        let store = Arc::new(FakeStore::default());
        let executor = Arc::new(ClosureExecutor(|_g: String, _s: String| async move { Ok(serde_json::Value::Null) }));
        let service = Arc::new(DigitalTaskService::new(store, executor, 2));
        let err = service.cancel("nope", "user_cancel").await.unwrap_err();
        assert_eq!(err.error_code(), "not_found");
    }

    #[tokio::test]
    async fn recover_incomplete_resumes_and_re_executes_stale_tasks() {
        let store = Arc::new(FakeStore::default());
        let push_context = PushContext { device_id: Some("dev-1".into()), notify: true, speak: false, interrupt_previous: false };
        let stale = DigitalTaskRow {
            task_id: "stale-1".into(),
            session_id: "s1".into(),
            device_id: Some("dev-1".into()),
            goal: "navigate".into(),
            status: TaskStatus::Running,
            steps: vec![],
            result: None,
            error: Some("left_over_error".into()),
            timeout_seconds: 2,
            push_context: push_context.clone(),
            created_at: 0,
            updated_at: 0,
        };
        store.upsert_task(&stale).await.unwrap();
        let executor = Arc::new(ClosureExecutor(|goal: String, session_id: String| async move {
            Ok(serde_json::json!({"text": format!("ok:{session_id}:{goal}")}))
        }));
        let service = Arc::new(DigitalTaskService::new(store.clone(), executor, 2));
        let recovered = service.recover_incomplete(100).await.unwrap();
        assert_eq!(recovered, 1);
        let done = wait_terminal(&service, "stale-1").await;
        assert_eq!(done.status, TaskStatus::Success);
        assert_eq!(done.push_context.device_id.as_deref(), Some("dev-1"));
    }

    #[tokio::test]
    async fn flush_pending_updates_redelivers_queued_pushes_for_a_device() {
        #[derive(Default)]
        struct RecordingSink {
            delivered: StdMutex<Vec<String>>,
        }
        #[async_trait]
        impl StatusSink for RecordingSink {
            async fn deliver(&self, update: &TaskStatusUpdate) -> anyhow::Result<()> {
                self.delivered.lock().unwrap().push(update.task_id.clone());
                Ok(())
            }
        }

        let store = Arc::new(FakeStore::default());
        let update = TaskStatusUpdate {
            task_id: "t1".into(),
            device_id: Some("dev-1".into()),
            session_id: "s1".into(),
            event: "status_update".into(),
            status: TaskStatus::Success,
            error: None,
        };
        store
            .enqueue_push(&PushQueueRow {
                id: "push-1".into(),
                device_id: "dev-1".into(),
                session_id: "s1".into(),
                payload: serde_json::to_value(&update).unwrap(),
                status: PushQueueStatus::Pending,
                idempotent_key: "k1".into(),
                created_at: 0,
            })
            .await
            .unwrap();

        let executor = Arc::new(ClosureExecutor(|_g: String, _s: String| async move { Ok(serde_json::Value::Null) }));
        let sink = Arc::new(RecordingSink::default());
        let service = DigitalTaskService::new(store.clone(), executor, 2).with_status_sink(sink.clone(), 0, 10);
        let flushed = service.flush_pending_updates("dev-1", 10).await.unwrap();
        assert_eq!(flushed, 1);
        assert_eq!(sink.delivered.lock().unwrap().as_slice(), ["t1"]);
    }
}
