//! Plain data types shared across components (spec §3).
//!
//! These are the records components exchange and persist. Behavior lives on
//! the owning component (`metrics.rs`, `registry.rs`, `dr/*`); this module
//! only defines shape and the small enums that classify state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ids::{
    BackupExecutionId, BackupPlanId, DisasterEventId, FailoverExecutionId, FailoverSequenceId,
    InstanceId, SiteId,
};

/// Health as observed by the Health Prober (§4.B) and consumed by the
/// Dispatcher (§4.F) and DR Orchestrator (§4.K).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl Default for HealthStatus {
    fn default() -> Self {
        HealthStatus::Unknown
    }
}

/// One registered service instance (§3 `ServiceInstance`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: InstanceId,
    pub service_name: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub registered_at_millis: i64,
    pub last_health_check_millis: Option<i64>,
    pub health_status: HealthStatus,
}

impl ServiceInstance {
    pub fn new(service_name: impl Into<String>, host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            id: InstanceId::new(),
            service_name: service_name.into(),
            host: host.into(),
            port,
            weight,
            registered_at_millis: crate::ids::wall_now_millis(),
            last_health_check_millis: None,
            health_status: HealthStatus::Unknown,
        }
    }

    /// Whether this instance can currently be considered for dispatch, per
    /// health alone (breaker admission is checked separately by the
    /// Dispatcher, §4.F).
    pub fn is_health_eligible(&self) -> bool {
        matches!(self.health_status, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Derived classification of a [`crate::metrics::ServiceMetrics`] snapshot
/// (§4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceBucket {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl PerformanceBucket {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            PerformanceBucket::Excellent
        } else if score >= 60.0 {
            PerformanceBucket::Good
        } else if score >= 40.0 {
            PerformanceBucket::Fair
        } else if score >= 20.0 {
            PerformanceBucket::Poor
        } else {
            PerformanceBucket::Critical
        }
    }
}

/// A DR site's role, mutated only by the Failover Engine (§4.J).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteRole {
    Primary,
    Secondary,
    Failed,
}

/// One DR site's health/role record (§3 `SiteStatus`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteStatus {
    pub site_id: SiteId,
    pub name: String,
    pub role: SiteRole,
    pub consecutive_health_failures: u32,
    pub last_health_check_millis: Option<i64>,
    pub last_failover_millis: Option<i64>,
    /// Replication lag behind the primary, used to rank failover candidates
    /// (§4.K: lowest lag wins, lexicographic id as tiebreak).
    pub replication_lag: Duration,
}

impl SiteStatus {
    pub fn new_primary(name: impl Into<String>) -> Self {
        Self {
            site_id: SiteId::new(),
            name: name.into(),
            role: SiteRole::Primary,
            consecutive_health_failures: 0,
            last_health_check_millis: None,
            last_failover_millis: None,
            replication_lag: Duration::ZERO,
        }
    }

    pub fn new_secondary(name: impl Into<String>) -> Self {
        Self {
            site_id: SiteId::new(),
            name: name.into(),
            role: SiteRole::Secondary,
            consecutive_health_failures: 0,
            last_health_check_millis: None,
            last_failover_millis: None,
            replication_lag: Duration::ZERO,
        }
    }

    /// Currently HEALTHY per the DR orchestrator's monitoring tick: no
    /// consecutive failed health checks outstanding (§4.K failover-target
    /// eligibility).
    pub fn is_healthy(&self) -> bool {
        self.consecutive_health_failures == 0
    }
}

/// Cache eviction policy for a namespace (§3 `CacheNamespace`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    Lru,
    Lfu,
    /// Entries are only ever removed by TTL expiry, never by size pressure.
    TtlOnly,
}

/// Immutable per-namespace cache configuration (§4.H fixed namespace table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheNamespace {
    pub name: &'static str,
    pub ttl: Duration,
    pub max_entries: usize,
    pub eviction: EvictionPolicy,
    pub compression: bool,
}

/// Backup type (§3 `BackupPlan`). `Incremental` is modeled but rejected by
/// the Backup Engine today (spec §9 open question, DESIGN.md decision 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupType {
    Full,
    Incremental,
}

/// A backup plan definition (§3 `BackupPlan`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPlan {
    pub id: BackupPlanId,
    pub backup_type: BackupType,
    pub components: Vec<String>,
    pub compression: bool,
    pub encryption: bool,
    pub verification: bool,
    pub retention_days: u32,
    pub scheduled_at_millis: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

/// One component's result within a backup run, recorded on the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentResult {
    pub component: String,
    pub ok: bool,
    pub critical: bool,
    pub detail: Option<String>,
}

/// A single backup run (§3 `BackupExecution`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupExecution {
    pub id: BackupExecutionId,
    pub plan_id: BackupPlanId,
    pub start_millis: i64,
    pub end_millis: Option<i64>,
    pub status: ExecutionStatus,
    pub backup_path: Option<String>,
}

/// The manifest written alongside a completed backup archive (§3 `BackupManifest`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_id: BackupExecutionId,
    pub components: Vec<ComponentResult>,
    pub checksum: String,
    pub compressed: bool,
    pub encrypted: bool,
    pub verified: bool,
    pub created_at_millis: i64,
}

/// The backup registry's entry for one completed backup (§3 `BackupMetadata`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup_id: BackupExecutionId,
    pub backup_path: String,
    pub manifest: BackupManifest,
    pub size_bytes: u64,
    pub compressed: bool,
    pub encrypted: bool,
    pub remote_storage_location: Option<String>,
    pub integrity_verified: bool,
}

/// Failover step category (§4.J). `NOTIFICATION` and `HEALTH_CHECK` have no
/// meaningful inverse and are skipped during rollback (DESIGN.md decision 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailoverStepKind {
    DatabaseFailover,
    LoadBalancerUpdate,
    DnsUpdate,
    ServiceRestart,
    ConfigurationUpdate,
    HealthCheck,
    Notification,
}

impl FailoverStepKind {
    /// Whether this step type has a well-defined inverse adapter call that
    /// rollback can invoke. See `dr/failover.rs` for the per-kind rationale.
    pub fn has_inverse(&self) -> bool {
        !matches!(self, FailoverStepKind::Notification | FailoverStepKind::HealthCheck)
    }
}

/// One step in a [`FailoverSequence`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverStep {
    pub name: String,
    pub kind: FailoverStepKind,
    pub critical: bool,
}

/// An ordered failover plan (§3 `FailoverSequence`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverSequence {
    pub id: FailoverSequenceId,
    pub steps: Vec<FailoverStep>,
    pub source_site: String,
    pub target_site: String,
    pub automatic: bool,
}

/// One run of a [`FailoverSequence`] (§3 `FailoverExecution`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverExecution {
    pub id: FailoverExecutionId,
    pub sequence_id: FailoverSequenceId,
    pub source_site: String,
    pub target_site: String,
    pub start_millis: i64,
    pub end_millis: Option<i64>,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisasterSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisasterStatus {
    Detected,
    Mitigating,
    Recovered,
}

/// A detected site-level incident (§3 `DisasterEvent`), tracked by the DR
/// Orchestrator (§4.K).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisasterEvent {
    pub id: DisasterEventId,
    pub event_type: String,
    pub severity: DisasterSeverity,
    pub affected_components: Vec<String>,
    pub detected_at_millis: i64,
    pub status: DisasterStatus,
}
