//! Load-balancing dispatcher (spec §4.F).
//!
//! `route` picks one healthy instance per request; `record_outcome` feeds the
//! result back into that instance's [`crate::metrics::ServiceMetrics`] and
//! [`crate::CircuitBreakerPolicy`]. Strategy selection is a data enum (the
//! same "strategy-as-data" pattern as `backoff.rs`'s `Backoff` and
//! `jitter.rs`'s `Jitter`) rather than a trait-object hierarchy, since the set
//! of strategies is closed and each is a pure function of registry state.

mod strategy;

pub use strategy::LoadBalancingStrategy;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::CoreError;
use crate::ids::InstanceId;
use crate::model::ServiceInstance;
use crate::registry::ServiceRegistry;
use crate::telemetry::{emit_best_effort, DispatchEvent, PolicyEvent, TelemetrySink};

/// A dispatcher bound to one [`ServiceRegistry`]. Stateless beyond the
/// round-robin cursor strategy needs; everything else reads the registry
/// fresh on each call (spec §5: non-blocking, safe under high concurrency).
pub struct Dispatcher<S> {
    registry: Arc<ServiceRegistry<S>>,
    sink: Arc<S>,
    round_robin_cursor: std::sync::atomic::AtomicUsize,
}

impl<S> Dispatcher<S>
where
    S: TelemetrySink + 'static,
{
    pub fn new(registry: Arc<ServiceRegistry<S>>, sink: Arc<S>) -> Self {
        Self { registry, sink, round_robin_cursor: std::sync::atomic::AtomicUsize::new(0) }
    }

    /// Select one instance for `service_name` using `strategy`. `key` is only
    /// consulted by [`LoadBalancingStrategy::ConsistentHash`].
    pub async fn route(
        &self,
        service_name: &str,
        strategy: LoadBalancingStrategy,
        key: Option<&str>,
    ) -> Result<ServiceInstance, CoreError> {
        let candidates = self.registry.list_healthy(service_name);
        if candidates.is_empty() {
            emit_best_effort(
                (*self.sink).clone(),
                PolicyEvent::Dispatch(DispatchEvent::NoHealthyInstance {
                    service_name: service_name.to_string(),
                }),
            )
            .await;
            return Err(CoreError::unavailable(format!(
                "no healthy instance for service {service_name}"
            )));
        }

        let chosen = strategy.select(
            &candidates,
            key,
            || self.round_robin_cursor.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            |instance| self.registry.metrics_snapshot(service_name, instance.id),
        );

        emit_best_effort(
            (*self.sink).clone(),
            PolicyEvent::Dispatch(DispatchEvent::Routed {
                service_name: service_name.to_string(),
                instance_id: chosen.id.to_string(),
                strategy: strategy.label(),
            }),
        )
        .await;

        Ok(chosen)
    }

    /// Record the outcome of a completed call, feeding both the instance's
    /// metrics and its circuit breaker (spec §4.F: "record_outcome feeds
    /// Metrics + Breaker").
    pub fn record_outcome(
        &self,
        service_name: &str,
        instance_id: InstanceId,
        success: bool,
        elapsed: Duration,
    ) {
        if let Some(metrics) = self.registry.metrics_of(service_name, instance_id) {
            metrics.record_request(success, elapsed.as_millis() as u64);
        }
        if let Some(policy) = self.registry.breaker_policy(service_name, instance_id) {
            if success {
                policy.on_success_external();
            } else {
                policy.on_failure_external();
            }
        }
    }

    /// Convenience wrapper timing a call and reporting its outcome, mirroring
    /// the shape of `ResilienceStack::execute` but without imposing retry,
    /// timeout, or bulkhead semantics (those remain a caller's choice).
    pub async fn dispatch_and_record<T, Fut, Op>(
        &self,
        service_name: &str,
        strategy: LoadBalancingStrategy,
        key: Option<&str>,
        operation: Op,
    ) -> Result<T, CoreError>
    where
        Fut: std::future::Future<Output = Result<T, CoreError>>,
        Op: FnOnce(ServiceInstance) -> Fut,
    {
        let instance = self.route(service_name, strategy, key).await?;
        let instance_id = instance.id;
        let started = Instant::now();
        let result = operation(instance).await;
        self.record_outcome(service_name, instance_id, result.is_ok(), started.elapsed());
        result
    }
}
