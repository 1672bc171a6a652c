//! Service → instance registry (spec §4.E).
//!
//! Built on `dashmap` rather than the `Arc<Mutex<HashMap>>` pattern used by
//! `circuit_breaker_registry.rs`: spec §5 requires that one instance's
//! register/deregister never blocks a lookup of another instance under the
//! same or a different service, which a single global mutex cannot give.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::circuit_breaker_registry::{CircuitBreakerHandle, CircuitBreakerRegistry};
use crate::clock::{Clock, MonotonicClock};
use crate::errors::CoreError;
use crate::ids::InstanceId;
use crate::metrics::{MetricsSnapshot, ServiceMetrics};
use crate::model::{HealthStatus, ServiceInstance};
use crate::telemetry::{emit_best_effort, PolicyEvent, RegistryEvent, TelemetrySink};
use crate::{CircuitBreakerConfig, CircuitBreakerPolicy};

/// Registry-level error. Distinct type from the generic [`CoreError`] so
/// callers matching on registry operations don't need to know about kinds
/// (validation, integrity, ...) that can never occur here.
pub type ServiceRegistryError = CoreError;

/// Everything the registry tracks per `(serviceName, instanceId)` entry.
pub struct RegisteredInstance {
    pub instance: ServiceInstance,
    pub metrics: Arc<ServiceMetrics>,
    pub breaker: CircuitBreakerHandle,
}

impl RegisteredInstance {
    /// A policy view of this instance's breaker, sharing the same state the
    /// registry's handle reads/resets (§10.1: one `CircuitBreakerPolicy`, not
    /// a parallel reimplementation).
    pub fn breaker_policy(&self, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> CircuitBreakerPolicy {
        self.breaker.to_policy(config, clock)
    }
}

/// Default per-instance circuit breaker configuration (spec §4.D).
pub fn default_breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 5,
        recovery_timeout: Duration::from_secs(30),
        half_open_max_calls: 1,
    }
}

pub struct ServiceRegistry<S> {
    instances: DashMap<(String, InstanceId), RegisteredInstance>,
    breakers: CircuitBreakerRegistry,
    breaker_config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<S>,
}

impl<S> ServiceRegistry<S>
where
    S: TelemetrySink + 'static,
{
    pub fn new(sink: Arc<S>) -> Self {
        Self::with_breaker_config(sink, default_breaker_config())
    }

    pub fn with_breaker_config(sink: Arc<S>, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            instances: DashMap::new(),
            breakers: CircuitBreakerRegistry::default(),
            breaker_config,
            clock: Arc::new(MonotonicClock::default()),
            sink,
        }
    }

    fn breaker_key(service_name: &str, id: InstanceId) -> String {
        format!("{service_name}/{id}")
    }

    /// Register a new instance, or re-register an existing `(serviceName, id)`
    /// pair. Idempotent: if the pair is already present, metrics and breaker
    /// state are preserved and only the instance record itself is replaced
    /// (spec §4.E: "re-registration preserves metrics/breaker state").
    pub async fn register(&self, instance: ServiceInstance) {
        let key = (instance.service_name.clone(), instance.id);
        let service_name = instance.service_name.clone();
        let instance_id = instance.id;

        if let Some(mut existing) = self.instances.get_mut(&key) {
            existing.instance = instance;
        } else {
            let breaker_id = Self::breaker_key(&service_name, instance_id);
            self.breakers.register_new(breaker_id.clone());
            let breaker = self.breakers.get(&breaker_id).expect("just registered");
            self.instances.insert(
                key,
                RegisteredInstance {
                    instance,
                    metrics: Arc::new(ServiceMetrics::new()),
                    breaker,
                },
            );
        }

        emit_best_effort(
            (*self.sink).clone(),
            PolicyEvent::Registry(RegistryEvent::Registered {
                service_name,
                instance_id: instance_id.to_string(),
            }),
        )
        .await;
    }

    pub async fn deregister(&self, service_name: &str, id: InstanceId) -> Result<(), ServiceRegistryError> {
        let key = (service_name.to_string(), id);
        if self.instances.remove(&key).is_none() {
            return Err(CoreError::not_found(format!(
                "no instance {id} registered for service {service_name}"
            )));
        }
        emit_best_effort(
            (*self.sink).clone(),
            PolicyEvent::Registry(RegistryEvent::Deregistered {
                service_name: service_name.to_string(),
                instance_id: id.to_string(),
            }),
        )
        .await;
        Ok(())
    }

    /// All instances registered for a service, in no particular order.
    pub fn list(&self, service_name: &str) -> Vec<ServiceInstance> {
        self.instances
            .iter()
            .filter(|entry| entry.key().0 == service_name)
            .map(|entry| entry.value().instance.clone())
            .collect()
    }

    /// Instances a dispatcher may route to: last-known health is
    /// HEALTHY/DEGRADED *and* the breaker currently admits calls (§4.E). Uses
    /// `CircuitBreakerPolicy::allow`, not the raw stored state: a breaker that
    /// opened more than `recovery_timeout` ago must admit a HALF_OPEN probe
    /// rather than stay excluded forever (§4.D).
    pub fn list_healthy(&self, service_name: &str) -> Vec<ServiceInstance> {
        self.instances
            .iter()
            .filter(|entry| entry.key().0 == service_name)
            .filter(|entry| {
                let reg = entry.value();
                let policy = reg.breaker_policy(self.breaker_config.clone(), self.clock.clone());
                reg.instance.is_health_eligible() && policy.allow()
            })
            .map(|entry| entry.value().instance.clone())
            .collect()
    }

    pub fn get(&self, service_name: &str, id: InstanceId) -> Option<ServiceInstance> {
        self.instances.get(&(service_name.to_string(), id)).map(|e| e.instance.clone())
    }

    pub fn metrics_of(&self, service_name: &str, id: InstanceId) -> Option<Arc<ServiceMetrics>> {
        self.instances.get(&(service_name.to_string(), id)).map(|e| e.metrics.clone())
    }

    pub fn metrics_snapshot(&self, service_name: &str, id: InstanceId) -> Option<MetricsSnapshot> {
        self.metrics_of(service_name, id).map(|m| m.snapshot())
    }

    pub fn breaker_handle(&self, service_name: &str, id: InstanceId) -> Option<CircuitBreakerHandle> {
        self.instances.get(&(service_name.to_string(), id)).map(|e| e.breaker.clone())
    }

    pub fn breaker_policy(&self, service_name: &str, id: InstanceId) -> Option<CircuitBreakerPolicy> {
        self.instances
            .get(&(service_name.to_string(), id))
            .map(|e| e.breaker_policy(self.breaker_config.clone(), self.clock.clone()))
    }

    /// Update an instance's last-observed health status, normally driven by
    /// the Health Prober (§4.B).
    pub fn update_health(&self, service_name: &str, id: InstanceId, status: HealthStatus) -> bool {
        if let Some(mut entry) = self.instances.get_mut(&(service_name.to_string(), id)) {
            entry.instance.health_status = status;
            entry.instance.last_health_check_millis = Some(crate::ids::wall_now_millis());
            true
        } else {
            false
        }
    }

    /// Total instance count across all services, for admin/debug surfaces.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemorySink;

    fn instance(service: &str) -> ServiceInstance {
        ServiceInstance::new(service, "10.0.0.1", 8080, 1)
    }

    #[tokio::test]
    async fn register_then_list_returns_instance() {
        let registry = ServiceRegistry::new(Arc::new(MemorySink::unbounded()));
        let inst = instance("eligibility");
        let id = inst.id;
        registry.register(inst).await;

        let list = registry.list("eligibility");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, id);
    }

    #[tokio::test]
    async fn reregistration_preserves_metrics() {
        let registry = ServiceRegistry::new(Arc::new(MemorySink::unbounded()));
        let inst = instance("eligibility");
        let id = inst.id;
        registry.register(inst.clone()).await;

        let metrics = registry.metrics_of("eligibility", id).unwrap();
        metrics.record_request(true, 10);

        registry.register(inst).await;
        let metrics_after = registry.metrics_of("eligibility", id).unwrap();
        assert_eq!(metrics_after.snapshot().total_requests, 1);
    }

    #[tokio::test]
    async fn deregister_unknown_instance_is_not_found() {
        let registry: ServiceRegistry<MemorySink> = ServiceRegistry::new(Arc::new(MemorySink::unbounded()));
        let err = registry.deregister("eligibility", InstanceId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_healthy_excludes_unhealthy_instances() {
        let registry = ServiceRegistry::new(Arc::new(MemorySink::unbounded()));
        let inst = instance("eligibility");
        let id = inst.id;
        registry.register(inst).await;

        assert!(registry.list_healthy("eligibility").is_empty());

        registry.update_health("eligibility", id, HealthStatus::Healthy);
        assert_eq!(registry.list_healthy("eligibility").len(), 1);

        registry.update_health("eligibility", id, HealthStatus::Unhealthy);
        assert!(registry.list_healthy("eligibility").is_empty());
    }

    #[tokio::test]
    async fn open_breaker_excludes_instance_from_healthy_list() {
        let registry = ServiceRegistry::new(Arc::new(MemorySink::unbounded()));
        let inst = instance("eligibility");
        let id = inst.id;
        registry.register(inst).await;
        registry.update_health("eligibility", id, HealthStatus::Healthy);

        let policy = registry.breaker_policy("eligibility", id).unwrap();
        for _ in 0..default_breaker_config().failure_threshold {
            policy.on_failure_external();
        }

        assert!(registry.list_healthy("eligibility").is_empty());
    }
}
