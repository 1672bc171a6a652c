//! Periodic liveness checking (spec §4.B).
//!
//! Uses the same periodic-task shape as the retry primitives (a
//! `tokio::time::interval` loop driven by a pluggable [`crate::Clock`]/sleeper,
//! the way `sleeper.rs`'s `TokioSleeper` wraps `tokio::time::sleep`) but for a
//! *named set* of health targets rather than one single retry loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::adapters::HealthCheckTarget;
use crate::model::HealthStatus;
use crate::telemetry::{emit_best_effort, HealthEvent, PolicyEvent, TelemetrySink};

/// Default cadence between health-check passes (spec §4.B).
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// How many consecutive failures downgrade a target's status (spec §4.D
/// shares this threshold with the circuit breaker by default, but the
/// prober tracks its own counter independently per target).
const DEGRADED_AFTER: u32 = 1;
const UNHEALTHY_AFTER: u32 = 3;

struct TargetState {
    target: Arc<dyn HealthCheckTarget>,
    consecutive_failures: AtomicU32,
    status: RwLock<HealthStatus>,
}

/// Runs health checks for a registered set of targets on a fixed interval,
/// and lets callers trigger an out-of-band pass (§6: "trigger health-check
/// pass").
pub struct HealthProber<S> {
    targets: RwLock<HashMap<String, Arc<TargetState>>>,
    interval: Duration,
    sink: Arc<S>,
    running: Arc<AtomicBool>,
}

impl<S> HealthProber<S>
where
    S: TelemetrySink + 'static,
{
    pub fn new(sink: Arc<S>) -> Self {
        Self::with_interval(sink, DEFAULT_HEALTH_CHECK_INTERVAL)
    }

    pub fn with_interval(sink: Arc<S>, interval: Duration) -> Self {
        Self {
            targets: RwLock::new(HashMap::new()),
            interval,
            sink,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn register_target(&self, target: Arc<dyn HealthCheckTarget>) {
        let name = target.name().to_string();
        self.targets.write().await.insert(
            name,
            Arc::new(TargetState {
                target,
                consecutive_failures: AtomicU32::new(0),
                status: RwLock::new(HealthStatus::Unknown),
            }),
        );
    }

    pub async fn status_of(&self, name: &str) -> Option<HealthStatus> {
        let targets = self.targets.read().await;
        match targets.get(name) {
            Some(state) => Some(*state.status.read().await),
            None => None,
        }
    }

    /// Run one health-check pass over every registered target, updating
    /// status and emitting transition events. Never returns an error: a
    /// target whose check itself errors is treated as a failed check (spec
    /// §4.B).
    pub async fn check_all(&self) {
        let states: Vec<Arc<TargetState>> = self.targets.read().await.values().cloned().collect();
        for state in states {
            self.check_one(&state).await;
        }
    }

    async fn check_one(&self, state: &Arc<TargetState>) {
        let healthy = match state.target.check().await {
            Ok(healthy) => healthy,
            Err(_) => false,
        };

        let consecutive_failures = if healthy {
            state.consecutive_failures.store(0, Ordering::Relaxed);
            0
        } else {
            state.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
        };

        let new_status = if healthy {
            HealthStatus::Healthy
        } else if consecutive_failures >= UNHEALTHY_AFTER {
            HealthStatus::Unhealthy
        } else if consecutive_failures >= DEGRADED_AFTER {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unknown
        };

        let previous = {
            let mut status = state.status.write().await;
            let previous = *status;
            *status = new_status;
            previous
        };

        emit_best_effort(
            (*self.sink).clone(),
            PolicyEvent::Health(HealthEvent::Checked {
                target: state.target.name().to_string(),
                healthy,
                consecutive_failures,
            }),
        )
        .await;

        if previous != new_status {
            tracing::info!(
                target = state.target.name(),
                from = ?previous,
                to = ?new_status,
                "health status transitioned"
            );
            emit_best_effort(
                (*self.sink).clone(),
                PolicyEvent::Health(HealthEvent::Transitioned {
                    target: state.target.name().to_string(),
                    from: status_label(previous),
                    to: status_label(new_status),
                }),
            )
            .await;
        }
    }

    /// Spawn the periodic loop. Stopping happens within one interval of
    /// dropping the returned handle or calling [`Self::stop`] (spec §4.B:
    /// "stoppable within one interval").
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let prober = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(prober.interval);
            loop {
                ticker.tick().await;
                if !prober.running.load(Ordering::SeqCst) {
                    break;
                }
                prober.check_all().await;
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn status_label(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "HEALTHY",
        HealthStatus::Degraded => "DEGRADED",
        HealthStatus::Unhealthy => "UNHEALTHY",
        HealthStatus::Unknown => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CoreError;
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    struct FlakyTarget {
        healthy: Arc<StdAtomicBool>,
    }

    #[async_trait]
    impl HealthCheckTarget for FlakyTarget {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn check(&self) -> Result<bool, CoreError> {
            Ok(self.healthy.load(Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn healthy_target_reports_healthy() {
        let sink = Arc::new(MemorySink::unbounded());
        let prober = HealthProber::new(sink.clone());
        let healthy = Arc::new(StdAtomicBool::new(true));
        prober.register_target(Arc::new(FlakyTarget { healthy })).await;

        prober.check_all().await;

        assert_eq!(prober.status_of("flaky").await, Some(HealthStatus::Healthy));
    }

    #[tokio::test]
    async fn repeated_failures_escalate_to_unhealthy() {
        let sink = Arc::new(MemorySink::unbounded());
        let prober = HealthProber::new(sink);
        let healthy = Arc::new(StdAtomicBool::new(false));
        prober.register_target(Arc::new(FlakyTarget { healthy })).await;

        prober.check_all().await;
        assert_eq!(prober.status_of("flaky").await, Some(HealthStatus::Degraded));

        prober.check_all().await;
        prober.check_all().await;
        assert_eq!(prober.status_of("flaky").await, Some(HealthStatus::Unhealthy));
    }

    #[tokio::test]
    async fn recovery_resets_consecutive_failures() {
        let sink = Arc::new(MemorySink::unbounded());
        let prober = HealthProber::new(sink);
        let healthy = Arc::new(StdAtomicBool::new(false));
        prober.register_target(Arc::new(FlakyTarget { healthy: healthy.clone() })).await;

        prober.check_all().await;
        prober.check_all().await;
        prober.check_all().await;
        assert_eq!(prober.status_of("flaky").await, Some(HealthStatus::Unhealthy));

        healthy.store(true, Ordering::SeqCst);
        prober.check_all().await;
        assert_eq!(prober.status_of("flaky").await, Some(HealthStatus::Healthy));
    }

    #[tokio::test]
    async fn unknown_target_has_no_status() {
        let sink = Arc::new(MemorySink::unbounded());
        let prober = HealthProber::new(sink);
        assert_eq!(prober.status_of("nonexistent").await, None);
    }
}
