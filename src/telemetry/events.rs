use std::fmt;
use std::time::Duration;

use serde_json::json;

/// Policy and domain events emitted during execution.
///
/// Every policy in the resilience-primitives layer (retry, circuit breaker, bulkhead,
/// timeout) and every fleet-domain component (health prober, registry, dispatcher,
/// cache coordinator, backup/failover/DR) emits structured events through the same
/// `PolicyEvent` enum, so one sink implementation observes the whole system.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    /// Retry policy events
    Retry(RetryEvent),
    /// Circuit breaker events
    CircuitBreaker(CircuitBreakerEvent),
    /// Bulkhead events
    Bulkhead(BulkheadEvent),
    /// Timeout events
    Timeout(TimeoutEvent),
    /// Request outcome events (emitted by all policies)
    Request(RequestOutcome),
    /// Health prober events
    Health(HealthEvent),
    /// Service registry events
    Registry(RegistryEvent),
    /// Dispatcher (load balancer) events
    Dispatch(DispatchEvent),
    /// Cache coordinator events
    Cache(CacheEvent),
    /// Backup engine events
    Backup(BackupEvent),
    /// Failover engine events
    Failover(FailoverEvent),
    /// DR orchestrator events
    Dr(DrEvent),
}

/// Events emitted by retry policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// A retry attempt is about to be made.
    ///
    /// Emitted before sleeping and retrying a failed request.
    Attempt {
        /// The attempt number (1-indexed)
        attempt: usize,
        /// The backoff delay before this retry
        delay: Duration,
    },
    /// All retry attempts have been exhausted.
    ///
    /// Emitted when the maximum number of retries is reached
    /// and the request still fails.
    Exhausted {
        /// Total number of attempts made
        total_attempts: usize,
        /// Total time spent retrying
        total_duration: Duration,
    },
}

/// Events emitted by circuit breaker policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerEvent {
    /// Circuit transitioned to open state.
    ///
    /// Subsequent requests will be rejected immediately without
    /// being forwarded to the inner service.
    Opened {
        /// Number of consecutive failures that triggered the open
        failure_count: usize,
    },
    /// Circuit transitioned to half-open state.
    ///
    /// A limited number of test requests will be allowed through
    /// to determine if the inner service has recovered.
    HalfOpen,
    /// Circuit transitioned to closed state.
    ///
    /// Normal operation resumes - all requests are forwarded.
    Closed,
}

/// Events emitted by bulkhead policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkheadEvent {
    /// A request successfully acquired a bulkhead permit.
    ///
    /// The request will proceed to the inner service.
    Acquired {
        /// Current number of active requests
        active_count: usize,
        /// Maximum concurrency limit
        max_concurrency: usize,
    },
    /// A request was rejected due to bulkhead saturation.
    ///
    /// All available permits are in use.
    Rejected {
        /// Current number of active requests
        active_count: usize,
        /// Maximum concurrency limit
        max_concurrency: usize,
    },
}

/// Events emitted by timeout policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutEvent {
    /// A request exceeded the timeout duration.
    ///
    /// The request was cancelled and an error returned.
    Occurred {
        /// The timeout duration that was exceeded
        timeout: Duration,
    },
}

/// Request outcome events emitted by all policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Request completed successfully.
    Success {
        /// Time taken to complete the request
        duration: Duration,
    },
    /// Request failed with an error.
    Failure {
        /// Time taken before failure
        duration: Duration,
    },
}

/// Events emitted by the health prober (§4.B).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// A single health check completed.
    Checked {
        target: String,
        healthy: bool,
        consecutive_failures: u32,
    },
    /// A target's health status changed bucket (e.g. HEALTHY -> DEGRADED).
    Transitioned {
        target: String,
        from: &'static str,
        to: &'static str,
    },
}

/// Events emitted by the service registry (§4.E).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered { service_name: String, instance_id: String },
    Deregistered { service_name: String, instance_id: String },
}

/// Events emitted by the dispatcher / load balancer (§4.F).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Routed { service_name: String, instance_id: String, strategy: &'static str },
    NoHealthyInstance { service_name: String },
}

/// Events emitted by the cache coordinator (§4.H).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Hit { namespace: String },
    Miss { namespace: String },
    Evicted { namespace: String, count: usize },
    DegradedRange { namespace: String, slot_start: u16, slot_end: u16 },
}

/// Events emitted by the backup engine (§4.I).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupEvent {
    Started { execution_id: String, plan_id: String },
    ComponentCompleted { execution_id: String, component: String, ok: bool },
    Completed { execution_id: String, duration: Duration },
    Failed { execution_id: String, reason: String },
}

/// Events emitted by the failover engine (§4.J).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverEvent {
    Started { execution_id: String, source_site: String, target_site: String },
    StepCompleted { execution_id: String, step: String, ok: bool },
    RolledBack { execution_id: String, reason: String },
    Completed { execution_id: String, duration: Duration },
}

/// Events emitted by the DR orchestrator (§4.K).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrEvent {
    DisasterDetected { event_id: String, severity: &'static str },
    AutoFailoverTriggered { source_site: String, target_site: String },
    Recovered { event_id: String },
    /// A secondary's observed replication lag exceeds the configured RPO
    /// (spec §4.K: "warning when observed replication lag exceeds RPO").
    RpoExceeded { site: String, lag_seconds: u64, rpo_seconds: u64 },
    /// A completed or in-flight failover ran longer than the configured RTO
    /// (spec §4.K: "in-flight recovery is projected to exceed RTO").
    RtoExceeded { execution_id: String, elapsed_seconds: u64, rto_seconds: u64 },
    /// A disaster was detected but no secondary qualified as a failover
    /// target (none HEALTHY); no failover was initiated (spec §4.K).
    FailoverFailed { source_site: String, reason: String },
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::Retry(event) => write!(f, "Retry::{}", event),
            PolicyEvent::CircuitBreaker(event) => write!(f, "CircuitBreaker::{}", event),
            PolicyEvent::Bulkhead(event) => write!(f, "Bulkhead::{}", event),
            PolicyEvent::Timeout(event) => write!(f, "Timeout::{}", event),
            PolicyEvent::Request(event) => write!(f, "Request::{}", event),
            PolicyEvent::Health(event) => write!(f, "Health::{}", event),
            PolicyEvent::Registry(event) => write!(f, "Registry::{}", event),
            PolicyEvent::Dispatch(event) => write!(f, "Dispatch::{}", event),
            PolicyEvent::Cache(event) => write!(f, "Cache::{}", event),
            PolicyEvent::Backup(event) => write!(f, "Backup::{}", event),
            PolicyEvent::Failover(event) => write!(f, "Failover::{}", event),
            PolicyEvent::Dr(event) => write!(f, "Dr::{}", event),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay } => {
                write!(f, "Attempt(#{}, delay={:?})", attempt, delay)
            }
            RetryEvent::Exhausted { total_attempts, total_duration } => {
                write!(f, "Exhausted(attempts={}, duration={:?})", total_attempts, total_duration)
            }
        }
    }
}

impl fmt::Display for CircuitBreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerEvent::Opened { failure_count } => {
                write!(f, "Opened(failures={})", failure_count)
            }
            CircuitBreakerEvent::HalfOpen => write!(f, "HalfOpen"),
            CircuitBreakerEvent::Closed => write!(f, "Closed"),
        }
    }
}

impl fmt::Display for BulkheadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkheadEvent::Acquired { active_count, max_concurrency } => {
                write!(f, "Acquired({}/{})", active_count, max_concurrency)
            }
            BulkheadEvent::Rejected { active_count, max_concurrency } => {
                write!(f, "Rejected({}/{})", active_count, max_concurrency)
            }
        }
    }
}

impl fmt::Display for TimeoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutEvent::Occurred { timeout } => write!(f, "Occurred(timeout={:?})", timeout),
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOutcome::Success { duration } => write!(f, "Success(duration={:?})", duration),
            RequestOutcome::Failure { duration } => write!(f, "Failure(duration={:?})", duration),
        }
    }
}

impl fmt::Display for HealthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthEvent::Checked { target, healthy, consecutive_failures } => write!(
                f,
                "Checked({}, healthy={}, consecutive_failures={})",
                target, healthy, consecutive_failures
            ),
            HealthEvent::Transitioned { target, from, to } => {
                write!(f, "Transitioned({}, {} -> {})", target, from, to)
            }
        }
    }
}

impl fmt::Display for RegistryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryEvent::Registered { service_name, instance_id } => {
                write!(f, "Registered({}/{})", service_name, instance_id)
            }
            RegistryEvent::Deregistered { service_name, instance_id } => {
                write!(f, "Deregistered({}/{})", service_name, instance_id)
            }
        }
    }
}

impl fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchEvent::Routed { service_name, instance_id, strategy } => {
                write!(f, "Routed({}/{}, strategy={})", service_name, instance_id, strategy)
            }
            DispatchEvent::NoHealthyInstance { service_name } => {
                write!(f, "NoHealthyInstance({})", service_name)
            }
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEvent::Hit { namespace } => write!(f, "Hit({})", namespace),
            CacheEvent::Miss { namespace } => write!(f, "Miss({})", namespace),
            CacheEvent::Evicted { namespace, count } => {
                write!(f, "Evicted({}, count={})", namespace, count)
            }
            CacheEvent::DegradedRange { namespace, slot_start, slot_end } => write!(
                f,
                "DegradedRange({}, slots={}..{})",
                namespace, slot_start, slot_end
            ),
        }
    }
}

impl fmt::Display for BackupEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupEvent::Started { execution_id, plan_id } => {
                write!(f, "Started({}, plan={})", execution_id, plan_id)
            }
            BackupEvent::ComponentCompleted { execution_id, component, ok } => {
                write!(f, "ComponentCompleted({}, {}, ok={})", execution_id, component, ok)
            }
            BackupEvent::Completed { execution_id, duration } => {
                write!(f, "Completed({}, duration={:?})", execution_id, duration)
            }
            BackupEvent::Failed { execution_id, reason } => {
                write!(f, "Failed({}, reason={})", execution_id, reason)
            }
        }
    }
}

impl fmt::Display for FailoverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverEvent::Started { execution_id, source_site, target_site } => {
                write!(f, "Started({}, {} -> {})", execution_id, source_site, target_site)
            }
            FailoverEvent::StepCompleted { execution_id, step, ok } => {
                write!(f, "StepCompleted({}, {}, ok={})", execution_id, step, ok)
            }
            FailoverEvent::RolledBack { execution_id, reason } => {
                write!(f, "RolledBack({}, reason={})", execution_id, reason)
            }
            FailoverEvent::Completed { execution_id, duration } => {
                write!(f, "Completed({}, duration={:?})", execution_id, duration)
            }
        }
    }
}

impl fmt::Display for DrEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrEvent::DisasterDetected { event_id, severity } => {
                write!(f, "DisasterDetected({}, severity={})", event_id, severity)
            }
            DrEvent::AutoFailoverTriggered { source_site, target_site } => {
                write!(f, "AutoFailoverTriggered({} -> {})", source_site, target_site)
            }
            DrEvent::Recovered { event_id } => write!(f, "Recovered({})", event_id),
            DrEvent::RpoExceeded { site, lag_seconds, rpo_seconds } => {
                write!(f, "RpoExceeded({}, lag={}s, rpo={}s)", site, lag_seconds, rpo_seconds)
            }
            DrEvent::RtoExceeded { execution_id, elapsed_seconds, rto_seconds } => {
                write!(f, "RtoExceeded({}, elapsed={}s, rto={}s)", execution_id, elapsed_seconds, rto_seconds)
            }
            DrEvent::FailoverFailed { source_site, reason } => {
                write!(f, "FailoverFailed({}, reason={})", source_site, reason)
            }
        }
    }
}

#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a PolicyEvent into a JSON value for sinks (e.g. the admin log stream).
pub fn event_to_json(event: &PolicyEvent) -> serde_json::Value {
    match event {
        PolicyEvent::Retry(r) => match r {
            RetryEvent::Attempt { attempt, delay } => json!({
                "kind": "retry_attempt",
                "attempt": *attempt,
                "delay_ms": clamp_u64(delay.as_millis()),
            }),
            RetryEvent::Exhausted { total_attempts, total_duration } => json!({
                "kind": "retry_exhausted",
                "attempts": *total_attempts,
                "duration_ms": clamp_u64(total_duration.as_millis()),
            }),
        },
        PolicyEvent::CircuitBreaker(c) => match c {
            CircuitBreakerEvent::Opened { failure_count } => {
                json!({ "kind": "circuit_opened", "failures": *failure_count })
            }
            CircuitBreakerEvent::HalfOpen => json!({ "kind": "circuit_half_open" }),
            CircuitBreakerEvent::Closed => json!({ "kind": "circuit_closed" }),
        },
        PolicyEvent::Bulkhead(b) => match b {
            BulkheadEvent::Acquired { active_count, max_concurrency } => json!({
                "kind": "bulkhead_acquired",
                "active": *active_count,
                "max": *max_concurrency
            }),
            BulkheadEvent::Rejected { active_count, max_concurrency } => json!({
                "kind": "bulkhead_rejected",
                "active": *active_count,
                "max": *max_concurrency
            }),
        },
        PolicyEvent::Timeout(t) => match t {
            TimeoutEvent::Occurred { timeout } => json!({
                "kind": "timeout",
                "timeout_ms": clamp_u64(timeout.as_millis())
            }),
        },
        PolicyEvent::Request(r) => match r {
            RequestOutcome::Success { duration } => json!({
                "kind": "request_success",
                "duration_ms": clamp_u64(duration.as_millis())
            }),
            RequestOutcome::Failure { duration } => json!({
                "kind": "request_failure",
                "duration_ms": clamp_u64(duration.as_millis())
            }),
        },
        PolicyEvent::Health(h) => match h {
            HealthEvent::Checked { target, healthy, consecutive_failures } => json!({
                "kind": "health_checked",
                "target": target,
                "healthy": healthy,
                "consecutive_failures": consecutive_failures,
            }),
            HealthEvent::Transitioned { target, from, to } => json!({
                "kind": "health_transitioned",
                "target": target,
                "from": from,
                "to": to,
            }),
        },
        PolicyEvent::Registry(r) => match r {
            RegistryEvent::Registered { service_name, instance_id } => json!({
                "kind": "registry_registered",
                "service_name": service_name,
                "instance_id": instance_id,
            }),
            RegistryEvent::Deregistered { service_name, instance_id } => json!({
                "kind": "registry_deregistered",
                "service_name": service_name,
                "instance_id": instance_id,
            }),
        },
        PolicyEvent::Dispatch(d) => match d {
            DispatchEvent::Routed { service_name, instance_id, strategy } => json!({
                "kind": "dispatch_routed",
                "service_name": service_name,
                "instance_id": instance_id,
                "strategy": strategy,
            }),
            DispatchEvent::NoHealthyInstance { service_name } => json!({
                "kind": "dispatch_no_healthy_instance",
                "service_name": service_name,
            }),
        },
        PolicyEvent::Cache(c) => match c {
            CacheEvent::Hit { namespace } => json!({ "kind": "cache_hit", "namespace": namespace }),
            CacheEvent::Miss { namespace } => json!({ "kind": "cache_miss", "namespace": namespace }),
            CacheEvent::Evicted { namespace, count } => json!({
                "kind": "cache_evicted", "namespace": namespace, "count": count
            }),
            CacheEvent::DegradedRange { namespace, slot_start, slot_end } => json!({
                "kind": "cache_degraded_range",
                "namespace": namespace,
                "slot_start": slot_start,
                "slot_end": slot_end,
            }),
        },
        PolicyEvent::Backup(b) => match b {
            BackupEvent::Started { execution_id, plan_id } => json!({
                "kind": "backup_started", "execution_id": execution_id, "plan_id": plan_id
            }),
            BackupEvent::ComponentCompleted { execution_id, component, ok } => json!({
                "kind": "backup_component_completed",
                "execution_id": execution_id,
                "component": component,
                "ok": ok,
            }),
            BackupEvent::Completed { execution_id, duration } => json!({
                "kind": "backup_completed",
                "execution_id": execution_id,
                "duration_ms": clamp_u64(duration.as_millis()),
            }),
            BackupEvent::Failed { execution_id, reason } => json!({
                "kind": "backup_failed", "execution_id": execution_id, "reason": reason
            }),
        },
        PolicyEvent::Failover(fv) => match fv {
            FailoverEvent::Started { execution_id, source_site, target_site } => json!({
                "kind": "failover_started",
                "execution_id": execution_id,
                "source_site": source_site,
                "target_site": target_site,
            }),
            FailoverEvent::StepCompleted { execution_id, step, ok } => json!({
                "kind": "failover_step_completed",
                "execution_id": execution_id,
                "step": step,
                "ok": ok,
            }),
            FailoverEvent::RolledBack { execution_id, reason } => json!({
                "kind": "failover_rolled_back", "execution_id": execution_id, "reason": reason
            }),
            FailoverEvent::Completed { execution_id, duration } => json!({
                "kind": "failover_completed",
                "execution_id": execution_id,
                "duration_ms": clamp_u64(duration.as_millis()),
            }),
        },
        PolicyEvent::Dr(d) => match d {
            DrEvent::DisasterDetected { event_id, severity } => json!({
                "kind": "dr_disaster_detected", "event_id": event_id, "severity": severity
            }),
            DrEvent::AutoFailoverTriggered { source_site, target_site } => json!({
                "kind": "dr_auto_failover_triggered",
                "source_site": source_site,
                "target_site": target_site,
            }),
            DrEvent::Recovered { event_id } => json!({
                "kind": "dr_recovered", "event_id": event_id
            }),
        },
    }
}

#[cfg(test)]
mod json_tests {
    use super::*;

    #[test]
    fn retry_attempt_json() {
        let v = event_to_json(&PolicyEvent::Retry(RetryEvent::Attempt {
            attempt: 3,
            delay: Duration::from_millis(150),
        }));
        assert_eq!(v["kind"], "retry_attempt");
        assert_eq!(v["attempt"], 3);
        assert_eq!(v["delay_ms"], 150);
    }

    #[test]
    fn health_transitioned_json() {
        let v = event_to_json(&PolicyEvent::Health(HealthEvent::Transitioned {
            target: "payments-svc/i-1".to_string(),
            from: "HEALTHY",
            to: "DEGRADED",
        }));
        assert_eq!(v["kind"], "health_transitioned");
        assert_eq!(v["from"], "HEALTHY");
        assert_eq!(v["to"], "DEGRADED");
    }

    #[test]
    fn dispatch_routed_json() {
        let v = event_to_json(&PolicyEvent::Dispatch(DispatchEvent::Routed {
            service_name: "eligibility-svc".to_string(),
            instance_id: "i-7".to_string(),
            strategy: "ROUND_ROBIN",
        }));
        assert_eq!(v["kind"], "dispatch_routed");
        assert_eq!(v["strategy"], "ROUND_ROBIN");
    }

    #[test]
    fn backup_completed_json() {
        let v = event_to_json(&PolicyEvent::Backup(BackupEvent::Completed {
            execution_id: "bk-1".to_string(),
            duration: Duration::from_secs(42),
        }));
        assert_eq!(v["kind"], "backup_completed");
        assert_eq!(v["duration_ms"], 42000);
    }

    #[test]
    fn telemetry_json_contains_no_auth_fields() {
        let v = event_to_json(&PolicyEvent::Request(RequestOutcome::Success {
            duration: Duration::from_millis(1),
        }));
        let s = serde_json::to_string(&v).unwrap();
        assert!(
            !s.contains("auth"),
            "telemetry JSON should not carry auth payloads; got {s}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_event_display() {
        let event = RetryEvent::Attempt { attempt: 2, delay: Duration::from_millis(100) };
        assert!(event.to_string().contains("Attempt"));
        assert!(event.to_string().contains("#2"));
    }

    #[test]
    fn test_circuit_breaker_event_display() {
        let event = CircuitBreakerEvent::Opened { failure_count: 5 };
        assert!(event.to_string().contains("Opened"));
        assert!(event.to_string().contains("5"));
    }

    #[test]
    fn test_bulkhead_event_display() {
        let event = BulkheadEvent::Rejected { active_count: 10, max_concurrency: 10 };
        assert!(event.to_string().contains("Rejected"));
        assert!(event.to_string().contains("10/10"));
    }

    #[test]
    fn test_policy_event_clone() {
        let event = PolicyEvent::Retry(RetryEvent::Attempt {
            attempt: 1,
            delay: Duration::from_millis(50),
        });
        let cloned = event.clone();
        assert_eq!(event, cloned);
    }

    #[test]
    fn test_policy_event_request_variants_display() {
        let ok =
            PolicyEvent::Request(RequestOutcome::Success { duration: Duration::from_millis(5) });
        let err =
            PolicyEvent::Request(RequestOutcome::Failure { duration: Duration::from_millis(7) });
        assert!(format!("{}", ok).contains("Success"));
        assert!(format!("{}", err).contains("Failure"));
    }

    #[test]
    fn test_registry_event_display() {
        let event = RegistryEvent::Registered {
            service_name: "cache-svc".to_string(),
            instance_id: "i-1".to_string(),
        };
        assert!(event.to_string().contains("Registered"));
        assert!(event.to_string().contains("cache-svc/i-1"));
    }
}
