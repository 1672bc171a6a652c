//! Administrative facade over the registry, dispatcher, cache coordinator,
//! pool monitor, and DR orchestrator (spec §6).
//!
//! This is a set of plain, directly callable methods, not a transport layer:
//! authentication/authorization and wire encoding are a caller's concern (spec
//! §6 non-goal: "does not implement a command router or RPC framework" — see
//! `control.rs` in the dropped-teacher-modules ledger entry). Every fallible
//! method returns [`AdminError`], a stable `{kind, message, retryable}` shape
//! built directly from [`CoreError`] (spec §7) so a thin HTTP/gRPC/CLI
//! wrapper can serialize it without re-deriving the mapping.

use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{
    BackupStorageAdapter, CacheClusterClient, ComponentBackupAdapter, EncryptionAdapter,
    HealthCheckTarget, PoolTelemetrySource, SiteAdapter,
};
use crate::cache::{all_namespaces, CacheCoordinator, CacheStats, ClusterInfo};
use crate::dispatch::{Dispatcher, LoadBalancingStrategy};
use crate::dr::backup::{BackupResult, RECOGNIZED_COMPONENTS};
use crate::dr::failover::FailoverResult;
use crate::dr::{DrOrchestrator, DrStatus};
use crate::errors::CoreError;
use crate::health::HealthProber;
use crate::ids::{BackupExecutionId, BackupPlanId, InstanceId, wall_now_millis};
use crate::metrics::MetricsSnapshot;
use crate::model::{BackupPlan, BackupType, ServiceInstance};
use crate::pool_monitor::{ConnectionPoolMonitor, PoolRecommendation, PoolWarning};
use crate::registry::ServiceRegistry;
use crate::telemetry::TelemetrySink;
use crate::CircuitState;

/// Stable, serializable error shape for admin responses (spec §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminError {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<CoreError> for AdminError {
    fn from(err: CoreError) -> Self {
        Self { kind: err.kind(), message: err.message().to_string(), retryable: err.retryable() }
    }
}

impl std::fmt::Display for AdminError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AdminError {}

/// One load-balancing strategy's admin-facing description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyDescription {
    pub label: &'static str,
    pub requires_key: bool,
}

/// Circuit breaker status for a single instance (spec §6 "circuit breaker
/// status" endpoint).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStatus {
    pub instance_id: InstanceId,
    pub state: CircuitState,
}

/// Thin read/write surface over every fleet subsystem. Holds an `Arc` of
/// each component rather than owning them, so the same instances can be
/// wired into background loops (`spawn()`) and this facade simultaneously.
pub struct FleetAdmin<S, T, C, CBA, BST, ENC, SA> {
    registry: Arc<ServiceRegistry<S>>,
    dispatcher: Arc<Dispatcher<S>>,
    health_prober: Arc<HealthProber<S>>,
    pool_monitor: Arc<ConnectionPoolMonitor<T>>,
    cache: Arc<CacheCoordinator<C, S>>,
    dr: Arc<DrOrchestrator<CBA, BST, ENC, SA, S>>,
}

impl<S, T, C, CBA, BST, ENC, SA> FleetAdmin<S, T, C, CBA, BST, ENC, SA>
where
    S: TelemetrySink + 'static,
    T: PoolTelemetrySource + 'static,
    C: CacheClusterClient + 'static,
    CBA: ComponentBackupAdapter + 'static,
    BST: BackupStorageAdapter + 'static,
    ENC: EncryptionAdapter + 'static,
    SA: SiteAdapter + 'static,
{
    pub fn new(
        registry: Arc<ServiceRegistry<S>>,
        dispatcher: Arc<Dispatcher<S>>,
        health_prober: Arc<HealthProber<S>>,
        pool_monitor: Arc<ConnectionPoolMonitor<T>>,
        cache: Arc<CacheCoordinator<C, S>>,
        dr: Arc<DrOrchestrator<CBA, BST, ENC, SA, S>>,
    ) -> Self {
        Self { registry, dispatcher, health_prober, pool_monitor, cache, dr }
    }

    // -- Load balancer / registry -------------------------------------

    pub fn instances(&self, service_name: &str) -> Vec<ServiceInstance> {
        self.registry.list(service_name)
    }

    /// Register a new instance (spec §6 `POST .../instances`).
    pub async fn register_instance(&self, instance: ServiceInstance) {
        self.registry.register(instance).await;
    }

    /// Deregister an instance (spec §6 `DELETE .../instances/{id}`).
    pub async fn deregister_instance(&self, service_name: &str, instance_id: InstanceId) -> Result<(), AdminError> {
        self.registry.deregister(service_name, instance_id).await.map_err(Into::into)
    }

    /// Force a breaker back to CLOSED (spec §6 `POST .../circuit-breakers/{id}/reset`).
    pub fn reset_circuit_breaker(&self, service_name: &str, instance_id: InstanceId) -> Result<(), AdminError> {
        match self.registry.breaker_handle(service_name, instance_id) {
            Some(handle) => {
                handle.reset();
                Ok(())
            }
            None => Err(CoreError::not_found(format!(
                "no instance {instance_id} registered for service {service_name}"
            ))
            .into()),
        }
    }

    pub fn healthy_instances(&self, service_name: &str) -> Vec<ServiceInstance> {
        self.registry.list_healthy(service_name)
    }

    pub fn instance_statistics(&self, service_name: &str, instance_id: InstanceId) -> Option<MetricsSnapshot> {
        self.registry.metrics_snapshot(service_name, instance_id)
    }

    pub fn circuit_breaker_status(&self, service_name: &str, instance_id: InstanceId) -> Option<BreakerStatus> {
        self.registry
            .breaker_handle(service_name, instance_id)
            .map(|handle| BreakerStatus { instance_id, state: handle.state() })
    }

    /// Route one request per the given strategy (spec §6 "manual route"
    /// endpoint, mainly useful for diagnostics/dry-runs outside the normal
    /// `dispatch_and_record` call path).
    pub async fn route(
        &self,
        service_name: &str,
        strategy: LoadBalancingStrategy,
        key: Option<&str>,
    ) -> Result<ServiceInstance, AdminError> {
        self.dispatcher.route(service_name, strategy, key).await.map_err(Into::into)
    }

    pub fn record_outcome(&self, service_name: &str, instance_id: InstanceId, success: bool, elapsed: Duration) {
        self.dispatcher.record_outcome(service_name, instance_id, success, elapsed);
    }

    pub fn strategies(&self) -> Vec<StrategyDescription> {
        LoadBalancingStrategy::all_with_capabilities()
            .iter()
            .map(|(strategy, requires_key)| StrategyDescription { label: strategy.label(), requires_key: *requires_key })
            .collect()
    }

    pub fn registry_size(&self) -> usize {
        self.registry.len()
    }

    /// Run an out-of-band health-check pass over every registered target
    /// (spec §6 "trigger health-check pass").
    pub async fn trigger_health_check(&self) {
        self.health_prober.check_all().await;
    }

    // -- Cache ----------------------------------------------------------

    pub fn cache_namespaces(&self) -> Vec<&'static str> {
        all_namespaces().iter().map(|ns| ns.name).collect()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn cache_cluster_info(&self) -> ClusterInfo {
        self.cache.cluster_info().await
    }

    pub async fn cache_healthy(&self) -> bool {
        self.cache.healthy().await
    }

    pub async fn cache_clear(&self, namespace: &str) -> Result<u64, AdminError> {
        self.cache.clear(namespace).await.map_err(Into::into)
    }

    pub async fn cache_evict(&self, namespace: &str, key: &str) -> Result<(), AdminError> {
        self.cache.evict(namespace, key).await.map_err(Into::into)
    }

    /// Per-namespace hit rate (spec §6 `GET .../cache/{name}/hit-rate`).
    pub fn cache_hit_rate(&self, namespace: &str) -> Result<f64, AdminError> {
        self.cache.hit_rate(namespace).map_err(Into::into)
    }

    /// Pre-populate a namespace (spec §6 `POST .../warmup`).
    pub async fn cache_warmup<T: serde::Serialize>(
        &self,
        namespace: &str,
        entries: &std::collections::HashMap<String, T>,
    ) -> Result<(), AdminError> {
        self.cache.warmup(namespace, entries).await.map_err(Into::into)
    }

    // -- Connection pool --------------------------------------------------

    pub async fn pool_warnings(&self) -> Vec<PoolWarning> {
        self.pool_monitor.warnings().await
    }

    pub async fn pool_recommendations(&self) -> Vec<PoolRecommendation> {
        self.pool_monitor.recommendations().await
    }

    pub async fn pool_window(&self) -> Vec<crate::adapters::PoolCounters> {
        self.pool_monitor.window_snapshot().await
    }

    // -- Disaster recovery ------------------------------------------------

    pub async fn dr_status(&self) -> DrStatus {
        self.dr.status().await
    }

    /// Manually trigger a failover to `target_site` (spec §6 "manual
    /// failover trigger").
    pub async fn initiate_failover(&self, target_site: &str) -> Result<FailoverResult, AdminError> {
        self.dr.initiate(target_site).await.map_err(Into::into)
    }

    pub async fn failover_history(&self) -> Vec<FailoverResult> {
        self.dr.failover_history().await
    }

    /// Trigger an ad hoc full backup of `components` right now (spec §6
    /// "trigger backup now"), bypassing the nightly schedule. An empty
    /// `components` list backs up every recognized component.
    pub async fn trigger_backup(&self, components: Vec<String>) -> Result<BackupResult, AdminError> {
        let components = if components.is_empty() {
            RECOGNIZED_COMPONENTS.iter().map(|c| c.to_string()).collect()
        } else {
            components
        };
        let plan = BackupPlan {
            id: BackupPlanId::new(),
            backup_type: BackupType::Full,
            components,
            compression: true,
            encryption: true,
            verification: true,
            retention_days: 30,
            scheduled_at_millis: Some(wall_now_millis()),
        };
        self.dr.run_backup(plan).await.map_err(Into::into)
    }

    pub fn backup_metadata(&self, backup_id: BackupExecutionId) -> Option<crate::model::BackupMetadata> {
        self.dr.backup_metadata(backup_id)
    }

    pub async fn verify_backup_integrity(&self, backup_id: BackupExecutionId) -> Result<(), AdminError> {
        self.dr.verify_backup_integrity(backup_id).await.map_err(Into::into)
    }

    pub async fn restore_backup(&self, backup_id: BackupExecutionId) -> Result<(), AdminError> {
        self.dr.restore_backup(backup_id).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dr::backup::BackupEngine;
    use crate::dr::failover::FailoverEngine;
    use crate::model::SiteRole;
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use std::path::Path;

    struct FileComponentAdapter;

    #[async_trait]
    impl ComponentBackupAdapter for FileComponentAdapter {
        async fn backup(&self, component: &str, destination_dir: &Path) -> Result<(), CoreError> {
            std::fs::write(destination_dir.join(format!("{component}.bin")), b"data")
                .map_err(|e| CoreError::adapter_failure(e.to_string()))
        }
        async fn restore(&self, _component: &str, _source_dir: &Path) -> Result<(), CoreError> {
            Ok(())
        }
    }

    struct NullStorage;

    #[async_trait]
    impl BackupStorageAdapter for NullStorage {
        async fn upload(&self, _local_path: &str, remote_key: &str) -> Result<String, CoreError> {
            Ok(format!("remote://{remote_key}"))
        }
        async fn delete(&self, _remote_key: &str) -> Result<(), CoreError> {
            Ok(())
        }
    }

    struct NullEncryption;

    #[async_trait]
    impl EncryptionAdapter for NullEncryption {
        async fn encrypt_file(&self, path: &str) -> Result<String, CoreError> {
            Ok(path.to_string())
        }
        async fn decrypt_file(&self, path: &str) -> Result<String, CoreError> {
            Ok(path.to_string())
        }
    }

    struct NoopSiteAdapter;

    #[async_trait]
    impl SiteAdapter for NoopSiteAdapter {
        async fn failover_database(&self, _source: &str, _target: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn rollback_database_failover(&self, _source: &str, _target: &str) -> Result<(), CoreError> {
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

    struct NullPoolSource;

    #[async_trait]
    impl PoolTelemetrySource for NullPoolSource {
        async fn sample(&self) -> Result<crate::adapters::PoolCounters, CoreError> {
            Ok(crate::adapters::PoolCounters { active: 1, idle: 9, total: 10, waiting: 0, max: 10, min: 2 })
        }
    }

    #[derive(Default)]
    struct NullCacheClient;

    #[async_trait]
    impl CacheClusterClient for NullCacheClient {
        async fn get(&self, _namespace: &str, _key: &str) -> Result<Option<Vec<u8>>, CoreError> {
            Ok(None)
        }
        async fn put(&self, _namespace: &str, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CoreError> {
            Ok(())
        }
        async fn delete(&self, _namespace: &str, _key: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn clear_namespace(&self, _namespace: &str) -> Result<u64, CoreError> {
            Ok(0)
        }
        async fn slot_healthy(&self, _namespace: &str, _key: &str) -> bool {
            true
        }
        async fn info(&self) -> Result<crate::adapters::ClusterTopology, CoreError> {
            Ok(crate::adapters::ClusterTopology::default())
        }
    }

    type TestAdmin = FleetAdmin<MemorySink, NullPoolSource, NullCacheClient, FileComponentAdapter, NullStorage, NullEncryption, NoopSiteAdapter>;

    fn admin(base: &Path) -> TestAdmin {
        let sink = Arc::new(MemorySink::unbounded());
        let registry = Arc::new(ServiceRegistry::new(sink.clone()));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), sink.clone()));
        let health_prober = Arc::new(HealthProber::new(sink.clone()));
        let pool_monitor = Arc::new(ConnectionPoolMonitor::new(Arc::new(NullPoolSource)));
        let cache = Arc::new(CacheCoordinator::new(Arc::new(NullCacheClient::default()), sink.clone()));

        let site_adapter = Arc::new(NoopSiteAdapter);
        let backup_engine = Arc::new(BackupEngine::new(
            Arc::new(FileComponentAdapter),
            Arc::new(NullStorage),
            Arc::new(NullEncryption),
            sink.clone(),
            base,
        ));
        let failover_engine = Arc::new(FailoverEngine::new(site_adapter.clone(), sink.clone()));
        let dr = Arc::new(DrOrchestrator::new(
            backup_engine,
            failover_engine,
            site_adapter,
            sink,
            false,
            Duration::from_secs(86_400 * 30),
        ));

        FleetAdmin::new(registry, dispatcher, health_prober, pool_monitor, cache, dr)
    }

    #[tokio::test]
    async fn strategies_lists_all_six_with_key_capability() {
        let dir = tempfile::tempdir().unwrap();
        let admin = admin(dir.path());
        let strategies = admin.strategies();
        assert_eq!(strategies.len(), 6);
        assert!(strategies.iter().any(|s| s.label == "CONSISTENT_HASH" && s.requires_key));
    }

    #[tokio::test]
    async fn route_with_no_instances_surfaces_unavailable_admin_error() {
        let dir = tempfile::tempdir().unwrap();
        let admin = admin(dir.path());
        let err = admin.route("eligibility", LoadBalancingStrategy::RoundRobin, None).await.unwrap_err();
        assert_eq!(err.kind, "UNAVAILABLE");
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn cache_namespaces_lists_fixed_table() {
        let dir = tempfile::tempdir().unwrap();
        let admin = admin(dir.path());
        let namespaces = admin.cache_namespaces();
        assert!(namespaces.contains(&"sessions"));
        assert!(namespaces.contains(&"philsys"));
    }

    #[tokio::test]
    async fn trigger_backup_with_empty_components_backs_up_everything() {
        let dir = tempfile::tempdir().unwrap();
        let admin = admin(dir.path());
        let result = admin.trigger_backup(vec![]).await.unwrap();
        assert_eq!(result.manifest.unwrap().components.len(), RECOGNIZED_COMPONENTS.len());
    }

    #[tokio::test]
    async fn register_then_deregister_instance_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let admin = admin(dir.path());
        let instance = ServiceInstance::new("eligibility", "10.0.0.1", 8080, 1);
        let id = instance.id;
        admin.register_instance(instance).await;
        assert_eq!(admin.instances("eligibility").len(), 1);

        admin.deregister_instance("eligibility", id).await.unwrap();
        assert!(admin.instances("eligibility").is_empty());

        let err = admin.deregister_instance("eligibility", id).await.unwrap_err();
        assert_eq!(err.kind, "NOT_FOUND");
    }

    #[tokio::test]
    async fn reset_circuit_breaker_forces_closed() {
        let dir = tempfile::tempdir().unwrap();
        let admin = admin(dir.path());
        let instance = ServiceInstance::new("eligibility", "10.0.0.1", 8080, 1);
        let id = instance.id;
        admin.register_instance(instance).await;

        let handle = admin.registry.breaker_handle("eligibility", id).unwrap();
        for _ in 0..10 {
            handle.to_policy(crate::registry::default_breaker_config(), Arc::new(crate::MonotonicClock::default()))
                .on_failure_external();
        }
        assert_eq!(admin.circuit_breaker_status("eligibility", id).unwrap().state, CircuitState::Open);

        admin.reset_circuit_breaker("eligibility", id).unwrap();
        assert_eq!(admin.circuit_breaker_status("eligibility", id).unwrap().state, CircuitState::Closed);

        let err = admin.reset_circuit_breaker("eligibility", InstanceId::new()).unwrap_err();
        assert_eq!(err.kind, "NOT_FOUND");
    }

    #[tokio::test]
    async fn cache_warmup_then_hit_rate_reflects_reads() {
        let dir = tempfile::tempdir().unwrap();
        let admin = admin(dir.path());
        let mut entries = std::collections::HashMap::new();
        entries.insert("k1".to_string(), "v1".to_string());
        admin.cache_warmup("sessions", &entries).await.unwrap();

        let _: Option<String> = admin.cache.get("sessions", "k1").await.unwrap();
        let _: Option<String> = admin.cache.get("sessions", "missing").await.unwrap();
        assert_eq!(admin.cache_hit_rate("sessions").unwrap(), 0.5);
        assert!(admin.cache_hit_rate("not-a-namespace").is_err());
    }

    #[tokio::test]
    async fn dr_status_reports_registered_sites() {
        let dir = tempfile::tempdir().unwrap();
        let admin = admin(dir.path());
        admin.dr.register_site("site-a", SiteRole::Primary).await;
        let status = admin.dr_status().await;
        assert_eq!(status.sites.len(), 1);
        assert!(!status.failover_in_progress);
    }
}
