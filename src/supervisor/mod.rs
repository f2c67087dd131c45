//! Supervisor: run lifecycle, dispatch, retry, and chaining
//!
//! The supervisor owns the run table and drives each run through its state
//! machine. Dispatch is bounded by a semaphore, retried with jittered
//! exponential backoff for retryable failures, and cancellable at any point
//! through a per-run token. Completion is published on a broadcast channel
//! so delivery collaborators observe terminal events without polling.

use crate::agents::{AgentContext, WorkerRegistry};
use crate::config::PulseConfig;
use crate::error::{PulseError, Result};
use crate::memory::MemoryManager;
use crate::retrieval::RetrievalEngine;
use crate::runtime::ExecutionRuntime;
use crate::types::{
    Run, RunEvent, RunId, RunStatus, StepOutcome, Task, TerminalError, WorkerOutput,
};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Orchestrator for worker runs
///
/// Cheap to clone; all clones share one run table, semaphore, and event
/// channel.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    registry: Arc<WorkerRegistry>,
    memory: Arc<MemoryManager>,
    retrieval: Arc<RetrievalEngine>,
    runtime: Arc<ExecutionRuntime>,
    config: PulseConfig,
    runs: RwLock<HashMap<RunId, Run>>,
    cancels: RwLock<HashMap<RunId, CancellationToken>>,
    dispatch_slots: Arc<Semaphore>,
    events: broadcast::Sender<RunEvent>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(
        config: PulseConfig,
        registry: WorkerRegistry,
        memory: Arc<MemoryManager>,
        retrieval: Arc<RetrievalEngine>,
        runtime: Arc<ExecutionRuntime>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let slots = config.supervisor.max_concurrent_runs;
        Self {
            inner: Arc::new(SupervisorInner {
                registry: Arc::new(registry),
                memory,
                retrieval,
                runtime,
                config,
                runs: RwLock::new(HashMap::new()),
                cancels: RwLock::new(HashMap::new()),
                dispatch_slots: Arc::new(Semaphore::new(slots)),
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Submit a standalone task; returns immediately with the run ID
    pub async fn submit(&self, task: Task) -> Result<RunId> {
        // Routing is validated before any run exists
        self.inner.registry.resolve(task.capability)?;

        let run_id = self.inner.track(&task, 0).await;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_one(run_id, task).await;
        });
        Ok(run_id)
    }

    /// Submit an ordered chain sharing one correlation ID
    ///
    /// All runs are created up front in `pending` so the whole chain is
    /// observable immediately. Steps execute sequentially; the first step
    /// that does not complete cancels everything after it. Working memory
    /// for the chain's scope is released once the chain reaches its end.
    pub async fn submit_chain(&self, tasks: Vec<Task>) -> Result<Vec<RunId>> {
        if tasks.is_empty() {
            return Err(PulseError::InvalidInput("empty chain".to_string()));
        }
        for task in &tasks {
            self.inner.registry.resolve(task.capability)?;
        }

        let correlation_id = tasks[0].correlation_id.clone();
        let tasks: Vec<Task> = tasks
            .into_iter()
            .map(|t| t.with_correlation(correlation_id.clone()))
            .collect();

        let mut run_ids = Vec::with_capacity(tasks.len());
        for (step, task) in tasks.iter().enumerate() {
            run_ids.push(self.inner.track(task, step).await);
        }

        let inner = Arc::clone(&self.inner);
        let chain: Vec<(RunId, Task)> = run_ids.iter().copied().zip(tasks).collect();
        let chain_ids = run_ids.clone();
        tokio::spawn(async move {
            let mut halted_at = None;
            for (index, (run_id, task)) in chain.into_iter().enumerate() {
                let status = inner.run_one(run_id, task).await;
                if status != RunStatus::Completed {
                    warn!(%run_id, %status, "chain halted, cancelling remaining steps");
                    halted_at = Some(index);
                    break;
                }
            }

            if let Some(index) = halted_at {
                for run_id in &chain_ids[index + 1..] {
                    inner.mark_cancelled(*run_id).await;
                    inner.cancels.write().await.remove(run_id);
                }
            }

            if let Err(err) = inner.memory.end_session(correlation_id.as_str()).await {
                warn!(error = %err, %correlation_id, "failed to release working memory");
            }
        });

        Ok(run_ids)
    }

    /// Snapshot of a run's current state
    pub async fn status(&self, run_id: RunId) -> Result<Run> {
        self.inner
            .runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or_else(|| PulseError::RunNotFound(run_id.to_string()))
    }

    /// Request cancellation of a run
    ///
    /// Idempotent; cancelling a terminal run is a no-op. The run reaches
    /// `cancelled` asynchronously once its driver observes the token.
    pub async fn cancel(&self, run_id: RunId) -> Result<()> {
        if !self.inner.runs.read().await.contains_key(&run_id) {
            return Err(PulseError::RunNotFound(run_id.to_string()));
        }
        if let Some(token) = self.inner.cancels.read().await.get(&run_id) {
            info!(%run_id, "cancellation requested");
            token.cancel();
        }
        Ok(())
    }

    /// Subscribe to run-completion events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.inner.events.subscribe()
    }

    /// Cancel every in-flight run and stop accepting the rest of their work
    pub async fn shutdown(&self) {
        info!("supervisor shutting down");
        self.inner.shutdown.cancel();
        for token in self.inner.cancels.read().await.values() {
            token.cancel();
        }
    }
}

impl SupervisorInner {
    /// Create and register a pending run with its cancellation token
    async fn track(&self, task: &Task, step: usize) -> RunId {
        let run = Run::new(task, step);
        let run_id = run.id;
        self.runs.write().await.insert(run_id, run);

        let token = self.shutdown.child_token();
        self.cancels.write().await.insert(run_id, token);
        run_id
    }

    /// Drive one run to a terminal status
    async fn run_one(&self, run_id: RunId, task: Task) -> RunStatus {
        let status = self.drive(run_id, task).await;
        self.cancels.write().await.remove(&run_id);
        status
    }

    async fn drive(&self, run_id: RunId, task: Task) -> RunStatus {
        let token = match self.cancels.read().await.get(&run_id) {
            Some(token) => token.clone(),
            None => return RunStatus::Failed,
        };

        // Bounded concurrency: wait for a slot unless cancelled first
        let _permit = tokio::select! {
            _ = token.cancelled() => {
                return self.mark_cancelled(run_id).await;
            }
            permit = self.dispatch_slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return self.mark_cancelled(run_id).await,
            }
        };

        if let Err(err) = self.transition(run_id, RunStatus::Running).await {
            error!(%run_id, error = %err, "run could not start");
            return RunStatus::Failed;
        }

        let (outcome, attempts) = self.dispatch_with_retry(&task, &token).await;
        match outcome {
            Ok(output) => self.finish_completed(run_id, output, attempts).await,
            Err(PulseError::Cancelled(_)) => {
                self.record(run_id, StepOutcome::Cancelled, attempts).await;
                self.mark_cancelled(run_id).await
            }
            Err(err) => {
                warn!(%run_id, reason = err.reason_code(), attempts, "run failed");
                self.record(
                    run_id,
                    StepOutcome::Failed {
                        reason_code: err.reason_code().to_string(),
                        detail: err.to_string(),
                    },
                    attempts,
                )
                .await;
                self.finish_failed(run_id, &err).await
            }
        }
    }

    /// Dispatch to the worker, retrying retryable failures with jittered
    /// exponential backoff
    ///
    /// Each attempt runs under the step deadline with breaker accounting
    /// keyed per capability. Permanent failures and cancellation stop the
    /// loop immediately; the run's attempt count is reported either way.
    async fn dispatch_with_retry(
        &self,
        task: &Task,
        token: &CancellationToken,
    ) -> (Result<WorkerOutput>, u32) {
        let policy = &self.config.supervisor;
        let dependency = format!("agent:{}", task.capability);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = self.dispatch_once(task, &dependency, token).await;

            let err = match result {
                Ok(output) => return (Ok(output), attempts),
                Err(err) => err,
            };

            let cancelled = matches!(err, PulseError::Cancelled(_));
            if cancelled || !err.is_retryable() || attempts >= policy.max_attempts {
                return (Err(err), attempts);
            }

            let delay = policy.backoff_delay(attempts - 1);
            let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
            let delay = delay + Duration::from_millis(jitter_ms);
            warn!(
                capability = %task.capability,
                attempts,
                delay_ms = delay.as_millis() as u64,
                reason = err.reason_code(),
                "retrying after backoff"
            );

            tokio::select! {
                _ = token.cancelled() => {
                    return (Err(PulseError::Cancelled(dependency)), attempts);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn dispatch_once(
        &self,
        task: &Task,
        dependency: &str,
        token: &CancellationToken,
    ) -> Result<WorkerOutput> {
        let worker = self.registry.resolve(task.capability)?;
        let ctx = AgentContext {
            memory: Arc::clone(&self.memory),
            retrieval: Arc::clone(&self.retrieval),
            runtime: Arc::clone(&self.runtime),
            correlation_id: task.correlation_id.clone(),
            cancel: token.clone(),
            call_deadline: self.config.supervisor.step_timeout(),
            retrieval_top_k: self.config.retrieval.top_k,
        };

        self.runtime
            .run(
                dependency,
                self.config.supervisor.step_timeout(),
                token,
                worker.execute(task, &ctx),
            )
            .await
    }

    async fn finish_completed(
        &self,
        run_id: RunId,
        output: WorkerOutput,
        attempts: u32,
    ) -> RunStatus {
        // Durable facts persist before the run turns terminal; a failed
        // write fails the run rather than completing it with lost state
        let scope = match self.runs.read().await.get(&run_id) {
            Some(run) => run.correlation_id.clone(),
            None => return RunStatus::Failed,
        };
        for fact in &output.durable_facts {
            if let Err(err) = self.memory.persist_fact(scope.as_str(), fact).await {
                self.record(
                    run_id,
                    StepOutcome::Failed {
                        reason_code: err.reason_code().to_string(),
                        detail: err.to_string(),
                    },
                    attempts,
                )
                .await;
                return self.finish_failed(run_id, &err).await;
            }
        }

        self.record(
            run_id,
            StepOutcome::Completed {
                degraded: output.degraded,
            },
            attempts,
        )
        .await;

        let mut runs = self.runs.write().await;
        let status = match runs.get_mut(&run_id) {
            Some(run) => {
                run.result = Some(output.payload);
                if let Err(err) = run.transition(RunStatus::Completed) {
                    error!(%run_id, error = %err, "completion transition rejected");
                }
                run.status
            }
            None => return RunStatus::Failed,
        };
        let event = runs.get(&run_id).map(Self::event_for);
        drop(runs);

        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        info!(%run_id, attempts, "run completed");
        status
    }

    async fn finish_failed(&self, run_id: RunId, err: &PulseError) -> RunStatus {
        let mut runs = self.runs.write().await;
        let status = match runs.get_mut(&run_id) {
            Some(run) => {
                run.last_error = Some(TerminalError::from_error(err));
                if let Err(err) = run.transition(RunStatus::Failed) {
                    error!(%run_id, error = %err, "failure transition rejected");
                }
                run.status
            }
            None => return RunStatus::Failed,
        };
        let event = runs.get(&run_id).map(Self::event_for);
        drop(runs);

        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        status
    }

    async fn mark_cancelled(&self, run_id: RunId) -> RunStatus {
        let mut runs = self.runs.write().await;
        let status = match runs.get_mut(&run_id) {
            Some(run) if !run.status.is_terminal() => {
                if let Err(err) = run.transition(RunStatus::Cancelled) {
                    error!(%run_id, error = %err, "cancel transition rejected");
                }
                run.status
            }
            Some(run) => run.status,
            None => return RunStatus::Failed,
        };
        let event = runs.get(&run_id).map(Self::event_for);
        drop(runs);

        if status == RunStatus::Cancelled {
            if let Some(event) = event {
                let _ = self.events.send(event);
            }
            info!(%run_id, "run cancelled");
        }
        status
    }

    async fn transition(&self, run_id: RunId, next: RunStatus) -> Result<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| PulseError::RunNotFound(run_id.to_string()))?;
        run.transition(next)
    }

    async fn record(&self, run_id: RunId, outcome: StepOutcome, attempts: u32) {
        if let Some(run) = self.runs.write().await.get_mut(&run_id) {
            run.record_step(outcome, attempts);
        }
    }

    fn event_for(run: &Run) -> RunEvent {
        RunEvent {
            run_id: run.id,
            correlation_id: run.correlation_id.clone(),
            capability: run.capability,
            status: run.status,
            result: run.result.clone(),
            error: run.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::WorkerAgent;
    use crate::config::{MemoryConfig, RetrievalConfig, RuntimeConfig};
    use crate::services::{MockEmbeddingProvider, MockGraphStore, MockVectorStore};
    use crate::storage::InMemoryStore;
    use crate::types::{Capability, Tier};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedWorker {
        capability: Capability,
        calls: Arc<AtomicU32>,
        fail_first: u32,
        permanent: bool,
    }

    impl ScriptedWorker {
        fn ok(capability: Capability) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    capability,
                    calls: calls.clone(),
                    fail_first: 0,
                    permanent: false,
                },
                calls,
            )
        }

        fn flaky(capability: Capability, fail_first: u32) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    capability,
                    calls: calls.clone(),
                    fail_first,
                    permanent: false,
                },
                calls,
            )
        }

        fn broken(capability: Capability) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    capability,
                    calls: calls.clone(),
                    fail_first: u32::MAX,
                    permanent: true,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl WorkerAgent for ScriptedWorker {
        fn capability(&self) -> Capability {
            self.capability
        }

        async fn execute(&self, task: &Task, _ctx: &AgentContext) -> Result<WorkerOutput> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                if self.permanent {
                    return Err(PulseError::InvalidInput("bad payload".to_string()));
                }
                return Err(PulseError::Transient {
                    dependency: "upstream".to_string(),
                    detail: "503".to_string(),
                });
            }
            Ok(
                WorkerOutput::new("done", json!({"goal": task.goal}))
                    .with_fact(Tier::Episodic, "result", json!({"goal": task.goal})),
            )
        }
    }

    fn supervisor_with(workers: Vec<Arc<dyn WorkerAgent>>) -> Supervisor {
        let mut config = PulseConfig::default();
        config.supervisor.backoff_base_ms = 1;
        config.supervisor.backoff_cap_ms = 5;

        let mut registry = WorkerRegistry::new();
        for worker in workers {
            registry.register(worker);
        }

        let runtime = Arc::new(ExecutionRuntime::new(RuntimeConfig::default(), None));
        let memory = Arc::new(MemoryManager::new(
            Arc::new(InMemoryStore::new()),
            MemoryConfig::default(),
        ));
        let retrieval = Arc::new(RetrievalEngine::new(
            Arc::new(MockEmbeddingProvider::new()),
            Arc::new(MockVectorStore::new()),
            Arc::new(MockGraphStore::new()),
            runtime.clone(),
            RetrievalConfig::default(),
        ));
        Supervisor::new(config, registry, memory, retrieval, runtime)
    }

    async fn wait_terminal(supervisor: &Supervisor, run_id: RunId) -> Run {
        for _ in 0..200 {
            let run = supervisor.status(run_id).await.unwrap();
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run did not reach a terminal status");
    }

    #[tokio::test]
    async fn test_submit_runs_to_completion() {
        let (worker, calls) = ScriptedWorker::ok(Capability::Collector);
        let supervisor = supervisor_with(vec![Arc::new(worker)]);

        let task = Task::new("collect reviews", Capability::Collector, json!({}));
        let run_id = supervisor.submit(task).await.unwrap();

        let run = wait_terminal(&supervisor, run_id).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.result.unwrap()["goal"], "collect reviews");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(run.history.len(), 1);
        assert_eq!(run.history[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_unknown_capability_rejected_before_run_exists() {
        let supervisor = supervisor_with(vec![]);
        let task = Task::new("analyze", Capability::Analyst, json!({}));

        let err = supervisor.submit(task).await.unwrap_err();
        assert_eq!(err.reason_code(), "no_worker");
    }

    #[tokio::test]
    async fn test_retryable_failure_retried_then_succeeds() {
        let (worker, calls) = ScriptedWorker::flaky(Capability::Analyst, 2);
        let supervisor = supervisor_with(vec![Arc::new(worker)]);

        let task = Task::new("analyze", Capability::Analyst, json!({}));
        let run_id = supervisor.submit(task).await.unwrap();

        let run = wait_terminal(&supervisor, run_id).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(run.history[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let (worker, calls) = ScriptedWorker::broken(Capability::Reporter);
        let supervisor = supervisor_with(vec![Arc::new(worker)]);

        let task = Task::new("report", Capability::Reporter, json!({}));
        let run_id = supervisor.submit(task).await.unwrap();

        let run = wait_terminal(&supervisor, run_id).await;
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let terminal = run.last_error.unwrap();
        assert_eq!(terminal.reason_code, "invalid_input");
        assert!(matches!(
            run.history[0].outcome,
            StepOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_cancel_reaches_terminal_cancelled() {
        struct SlowWorker;

        #[async_trait]
        impl WorkerAgent for SlowWorker {
            fn capability(&self) -> Capability {
                Capability::Collector
            }

            async fn execute(&self, _task: &Task, ctx: &AgentContext) -> Result<WorkerOutput> {
                // Observes cancellation the way real workers do, through a
                // dependency call
                ctx.call("slow_source", async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(json!({}))
                })
                .await?;
                Ok(WorkerOutput::new("never", json!({})))
            }
        }

        let supervisor = supervisor_with(vec![Arc::new(SlowWorker)]);
        let task = Task::new("slow collect", Capability::Collector, json!({}));
        let run_id = supervisor.submit(task).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        supervisor.cancel(run_id).await.unwrap();

        let run = wait_terminal(&supervisor, run_id).await;
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_unknown_run_is_error() {
        let supervisor = supervisor_with(vec![]);
        let err = supervisor.cancel(RunId::new()).await.unwrap_err();
        assert_eq!(err.reason_code(), "run_not_found");
    }

    #[tokio::test]
    async fn test_chain_shares_correlation_and_halts_on_failure() {
        let (collector, _) = ScriptedWorker::ok(Capability::Collector);
        let (analyst, analyst_calls) = ScriptedWorker::broken(Capability::Analyst);
        let (reporter, reporter_calls) = ScriptedWorker::ok(Capability::Reporter);
        let supervisor =
            supervisor_with(vec![Arc::new(collector), Arc::new(analyst), Arc::new(reporter)]);

        let run_ids = supervisor
            .submit_chain(vec![
                Task::new("collect", Capability::Collector, json!({})),
                Task::new("analyze", Capability::Analyst, json!({})),
                Task::new("report", Capability::Reporter, json!({})),
            ])
            .await
            .unwrap();
        assert_eq!(run_ids.len(), 3);

        let first = wait_terminal(&supervisor, run_ids[0]).await;
        let second = wait_terminal(&supervisor, run_ids[1]).await;
        let third = wait_terminal(&supervisor, run_ids[2]).await;

        assert_eq!(first.status, RunStatus::Completed);
        assert_eq!(second.status, RunStatus::Failed);
        assert_eq!(third.status, RunStatus::Cancelled);
        assert_eq!(reporter_calls.load(Ordering::SeqCst), 0);
        assert_eq!(analyst_calls.load(Ordering::SeqCst), 1);

        // All three runs share the first task's correlation ID
        assert_eq!(first.correlation_id, second.correlation_id);
        assert_eq!(second.correlation_id, third.correlation_id);
    }

    #[tokio::test]
    async fn test_completion_event_published() {
        let (worker, _) = ScriptedWorker::ok(Capability::Communicator);
        let supervisor = supervisor_with(vec![Arc::new(worker)]);
        let mut events = supervisor.subscribe();

        let task = Task::new("deliver", Capability::Communicator, json!({}));
        let run_id = supervisor.submit(task).await.unwrap();
        wait_terminal(&supervisor, run_id).await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.run_id, run_id);
        assert_eq!(event.status, RunStatus::Completed);
        assert!(event.result.is_some());
        assert!(event.error.is_none());
    }

    #[tokio::test]
    async fn test_empty_chain_rejected() {
        let supervisor = supervisor_with(vec![]);
        let err = supervisor.submit_chain(vec![]).await.unwrap_err();
        assert_eq!(err.reason_code(), "invalid_input");
    }
}
