//! External collaborators, consumed as opaque trait objects (spec §6, §9).
//!
//! Everything in this module is a seam: the fleet core depends only on these
//! traits, never on a concrete key/value client, cloud storage SDK, or DNS
//! API. Each trait is deliberately small (a capability, not an inheritance
//! hierarchy — spec §9) so a caller can implement only what it needs and wire
//! the rest with `adapters::noop`/test doubles.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::errors::CoreError;

/// A single health probe target: a component, a service, or a database,
/// unified behind one trait so the Health Prober (§4.B) doesn't special-case
/// callers.
#[async_trait]
pub trait HealthCheckTarget: Send + Sync {
    /// Human-readable identifier used in health events and logs.
    fn name(&self) -> &str;

    /// Perform the check. Implementations should never panic; a failing
    /// check returns `Ok(false)` (unhealthy), reserving `Err` for cases where
    /// the check itself could not run (e.g. adapter unreachable), which the
    /// Prober also treats as unhealthy (spec §4.B: "never propagates errors
    /// upward").
    async fn check(&self) -> Result<bool, CoreError>;
}

/// Pool telemetry source consumed by the Connection Pool Monitor (§4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounters {
    pub active: u32,
    pub idle: u32,
    pub total: u32,
    pub waiting: u32,
    pub max: u32,
    pub min: u32,
}

#[async_trait]
pub trait PoolTelemetrySource: Send + Sync {
    async fn sample(&self) -> Result<PoolCounters, CoreError>;
}

/// Cluster topology as reported by the store's own `info`/`cluster-info`
/// command (spec §6: "info/cluster-info" collaborator capability).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterTopology {
    pub total_nodes: u32,
    pub masters: u32,
    pub replicas: u32,
    pub slots_assigned: u32,
}

/// The clustered key/value store backing the Cache Coordinator (§4.H).
/// Deliberately byte-oriented: (de)serialization and compression are the
/// coordinator's job, not the client's.
#[async_trait]
pub trait CacheClusterClient: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CoreError>;
    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CoreError>;
    async fn delete(&self, namespace: &str, key: &str) -> Result<(), CoreError>;
    async fn clear_namespace(&self, namespace: &str) -> Result<u64, CoreError>;
    /// Whether the given key's slot range is currently served. A `false`
    /// return models a single-shard failure without treating the whole
    /// cluster as down (spec §4.H, §10.5).
    async fn slot_healthy(&self, namespace: &str, key: &str) -> bool;
    /// Node/slot topology backing `CacheCoordinator::cluster_info` (spec
    /// §4.H `clusterInfo()`).
    async fn info(&self) -> Result<ClusterTopology, CoreError>;
}

/// One site-level side effect the Failover Engine (§4.J) can apply and,
/// where `FailoverStepKind::has_inverse` is true, undo.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    async fn failover_database(&self, source_site: &str, target_site: &str) -> Result<(), CoreError>;
    async fn rollback_database_failover(&self, source_site: &str, target_site: &str) -> Result<(), CoreError>;

    async fn update_load_balancer(&self, target_site: &str) -> Result<(), CoreError>;
    async fn rollback_load_balancer(&self, source_site: &str) -> Result<(), CoreError>;

    async fn update_dns(&self, target_site: &str) -> Result<(), CoreError>;
    async fn rollback_dns(&self, source_site: &str) -> Result<(), CoreError>;

    async fn restart_services(&self, site: &str) -> Result<(), CoreError>;

    async fn sync_configuration(&self, target_site: &str) -> Result<(), CoreError>;
    async fn rollback_configuration(&self, source_site: &str) -> Result<(), CoreError>;

    /// Post-sequence verification (spec §4.J: "checks target-site health,
    /// database reachability, service responses, and LB routing"). A single
    /// boolean is sufficient for the Failover Engine's decision to complete
    /// or roll back; finer-grained diagnostics belong in the adapter's own
    /// logging, not this return value.
    async fn verify_site_health(&self, site: &str) -> Result<bool, CoreError>;
}

/// One component's backup/restore action (spec §4.I: "the component-specific
/// backup adapter"). `destination_dir`/`source_dir` are directories the
/// Backup Engine has already created/located; the adapter owns what files it
/// writes inside them.
#[async_trait]
pub trait ComponentBackupAdapter: Send + Sync {
    async fn backup(&self, component: &str, destination_dir: &Path) -> Result<(), CoreError>;
    async fn restore(&self, component: &str, source_dir: &Path) -> Result<(), CoreError>;
}

/// Compression/encryption/remote-storage primitives the Backup Engine
/// (§4.I) composes, kept separate from `SiteAdapter` since they apply to
/// backup artifacts, not sites.
#[async_trait]
pub trait BackupStorageAdapter: Send + Sync {
    async fn upload(&self, local_path: &str, remote_key: &str) -> Result<String, CoreError>;
    async fn delete(&self, remote_key: &str) -> Result<(), CoreError>;
}

#[async_trait]
pub trait EncryptionAdapter: Send + Sync {
    async fn encrypt_file(&self, path: &str) -> Result<String, CoreError>;
    async fn decrypt_file(&self, path: &str) -> Result<String, CoreError>;
}

/// Fire-and-forget alerting (spec §6: "notifier"). Best-effort by contract:
/// a notifier failure must never fail the operation that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str);
}

/// A [`Notifier`] that discards everything, for tests and for deployments
/// that have not wired an alerting backend yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _subject: &str, _body: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_notifier_never_panics() {
        let notifier = NullNotifier;
        notifier.notify("subject", "body").await;
    }
}
