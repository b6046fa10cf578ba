use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::{RunOutcome, RunRequest};

/// What happened to a submitted run request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// Queued with nothing running; starts immediately.
    Scheduled,
    /// A run is active; this one starts after it.
    Deferred,
    /// Folded into the request already waiting.
    Coalesced,
}

#[async_trait]
pub trait RunExecutor: Send + Sync {
    async fn execute(&self, request: RunRequest, cancel: CancellationToken) -> RunOutcome;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub active: Option<RunRequest>,
    pub pending: Option<RunRequest>,
}

/// Single-slot run queue: at most one active run and one pending request.
#[derive(Default)]
pub struct RunQueue {
    state: Mutex<QueueSnapshot>,
    wake: Notify,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn submit(&self, request: RunRequest) -> TriggerOutcome {
        let outcome = {
            let mut state = self.state();
            match state.pending {
                Some(waiting) => {
                    state.pending = Some(coalesce(waiting, request));
                    TriggerOutcome::Coalesced
                }
                None => {
                    state.pending = Some(request);
                    if state.active.is_some() {
                        TriggerOutcome::Deferred
                    } else {
                        TriggerOutcome::Scheduled
                    }
                }
            }
        };
        tracing::info!(
            trigger = request.trigger.as_str(),
            scope = request.scope.as_str(),
            outcome = ?outcome,
            "sync run requested"
        );
        self.wake.notify_one();
        outcome
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        *self.state()
    }

    fn begin_next(&self) -> Option<RunRequest> {
        let mut state = self.state();
        let next = state.pending.take()?;
        state.active = Some(next);
        Some(next)
    }

    fn finish_active(&self) {
        self.state().active = None;
    }
}

/// The waiting request absorbs the new one. The wider scope wins and
/// brings its trigger along.
fn coalesce(waiting: RunRequest, incoming: RunRequest) -> RunRequest {
    let trigger = if incoming.scope > waiting.scope {
        incoming.trigger
    } else {
        waiting.trigger
    };
    RunRequest {
        trigger,
        scope: waiting.scope.merge(incoming.scope),
    }
}

/// Execute queued runs one at a time until `shutdown` fires. An active run
/// is handed a child token so shutdown cancels it too.
pub async fn run_worker(
    queue: Arc<RunQueue>,
    executor: Arc<dyn RunExecutor>,
    shutdown: CancellationToken,
) {
    tracing::info!("run worker started");
    loop {
        let Some(request) = queue.begin_next() else {
            tokio::select! {
                _ = queue.wake.notified() => continue,
                _ = shutdown.cancelled() => break,
            }
        };

        let outcome = executor.execute(request, shutdown.child_token()).await;
        queue.finish_active();
        match outcome {
            RunOutcome::Completed(run) => tracing::debug!(
                run_id = %run.id,
                status = run.status.as_str(),
                "queued run completed"
            ),
            RunOutcome::Skipped { reason } => tracing::debug!(%reason, "queued run skipped"),
        }

        if shutdown.is_cancelled() {
            break;
        }
    }
    tracing::info!("run worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use syncline_db::run::models::{RunScope, RunTrigger};
    use tokio::sync::Semaphore;

    fn request(trigger: RunTrigger, scope: RunScope) -> RunRequest {
        RunRequest { trigger, scope }
    }

    struct GatedExecutor {
        started: Notify,
        gate: Semaphore,
        running: AtomicUsize,
        max_running: AtomicUsize,
        calls: Mutex<Vec<RunRequest>>,
    }

    impl GatedExecutor {
        fn new() -> Self {
            Self {
                started: Notify::new(),
                gate: Semaphore::new(0),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<RunRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RunExecutor for GatedExecutor {
        async fn execute(&self, request: RunRequest, _cancel: CancellationToken) -> RunOutcome {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(request);
            self.started.notify_one();
            let _permit = self.gate.acquire().await.unwrap();
            self.running.fetch_sub(1, Ordering::SeqCst);
            RunOutcome::Skipped {
                reason: "test".to_string(),
            }
        }
    }

    #[test]
    fn first_request_is_scheduled_and_later_ones_coalesce() {
        let queue = RunQueue::new();
        assert_eq!(
            queue.submit(request(RunTrigger::Manual, RunScope::PushOnly)),
            TriggerOutcome::Scheduled
        );
        assert_eq!(
            queue.submit(request(RunTrigger::Scheduled, RunScope::Full)),
            TriggerOutcome::Coalesced
        );
        let snapshot = queue.snapshot();
        assert_eq!(
            snapshot.pending,
            Some(request(RunTrigger::Scheduled, RunScope::Full))
        );
        assert!(snapshot.active.is_none());
    }

    #[test]
    fn coalescing_keeps_waiting_trigger_for_equal_scope() {
        let merged = coalesce(
            request(RunTrigger::CatchUp, RunScope::Full),
            request(RunTrigger::Manual, RunScope::PushOnly),
        );
        assert_eq!(merged, request(RunTrigger::CatchUp, RunScope::Full));

        let merged = coalesce(
            request(RunTrigger::Manual, RunScope::Full),
            request(RunTrigger::Scheduled, RunScope::Full),
        );
        assert_eq!(merged.trigger, RunTrigger::Manual);
    }

    #[tokio::test]
    async fn worker_runs_one_at_a_time_and_defers_while_active() {
        let queue = Arc::new(RunQueue::new());
        let executor = Arc::new(GatedExecutor::new());
        let shutdown = CancellationToken::new();

        assert_eq!(
            queue.submit(request(RunTrigger::Scheduled, RunScope::Full)),
            TriggerOutcome::Scheduled
        );
        let worker = tokio::spawn(run_worker(
            queue.clone(),
            executor.clone(),
            shutdown.clone(),
        ));

        executor.started.notified().await;
        assert!(queue.snapshot().active.is_some());
        assert_eq!(
            queue.submit(request(RunTrigger::Manual, RunScope::PushOnly)),
            TriggerOutcome::Deferred
        );
        assert_eq!(
            queue.submit(request(RunTrigger::Manual, RunScope::PushOnly)),
            TriggerOutcome::Coalesced
        );

        executor.gate.add_permits(2);
        tokio::time::timeout(Duration::from_secs(2), async {
            while executor.calls().len() < 2 || queue.snapshot().active.is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both runs should finish");

        assert_eq!(executor.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(
            executor.calls(),
            vec![
                request(RunTrigger::Scheduled, RunScope::Full),
                request(RunTrigger::Manual, RunScope::PushOnly),
            ]
        );

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn worker_stops_on_shutdown_when_idle() {
        let queue = Arc::new(RunQueue::new());
        let executor = Arc::new(GatedExecutor::new());
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run_worker(queue, executor.clone(), shutdown.clone()));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker should stop")
            .unwrap();
        assert!(executor.calls().is_empty());
    }
}
