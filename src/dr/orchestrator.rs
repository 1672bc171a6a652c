//! Disaster recovery orchestrator (spec §4.K).
//!
//! Owns the [`SiteStatus`] map and the active backup/failover executions.
//! Runs two background loops once [`spawn`](Self::spawn) is called: a
//! per-minute site health tick that can trigger automatic failover, and a
//! once-nightly full backup. Both share the same interval-loop shape as
//! [`crate::health::HealthProber`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::adapters::{BackupStorageAdapter, ComponentBackupAdapter, EncryptionAdapter, SiteAdapter};
use crate::dr::backup::{BackupEngine, BackupResult, RECOGNIZED_COMPONENTS};
use crate::dr::failover::{FailoverEngine, FailoverResult};
use crate::errors::CoreError;
use crate::ids::{wall_now_millis, BackupPlanId, DisasterEventId};
use crate::model::{
    BackupPlan, BackupType, DisasterEvent, DisasterSeverity, DisasterStatus, ExecutionStatus,
    FailoverSequence, FailoverStep, FailoverStepKind, SiteRole, SiteStatus,
};
use crate::telemetry::{emit_best_effort, DrEvent, PolicyEvent, TelemetrySink};

/// Cadence of the site-health monitoring tick (spec §4.K).
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(60);
/// Consecutive failed health checks before a primary is considered disastered.
const DISASTER_THRESHOLD: u32 = 3;
/// Hour of day (UTC) the nightly full backup runs by default (spec §4.K "02:00").
const DEFAULT_NIGHTLY_BACKUP_HOUR: u32 = 2;
/// Default recovery point objective (spec §4.K, §6 `DSR_DR_RPO_MINUTES`).
pub const DEFAULT_RPO: Duration = Duration::from_secs(60 * 60);
/// Default recovery time objective (spec §4.K, §6 `DSR_DR_RTO_MINUTES`).
pub const DEFAULT_RTO: Duration = Duration::from_secs(240 * 60);

/// Snapshot returned by [`DrOrchestrator::status`] (spec §6 DR status endpoint).
#[derive(Debug, Clone)]
pub struct DrStatus {
    pub sites: Vec<SiteStatus>,
    pub disaster_events: Vec<DisasterEvent>,
    pub failover_in_progress: bool,
    pub rpo: Duration,
    pub rto: Duration,
}

pub struct DrOrchestrator<CBA, BST, ENC, SA, S> {
    sites: RwLock<HashMap<String, SiteStatus>>,
    disaster_events: RwLock<Vec<DisasterEvent>>,
    backup_engine: Arc<BackupEngine<CBA, BST, ENC, S>>,
    failover_engine: Arc<FailoverEngine<SA, S>>,
    site_adapter: Arc<SA>,
    sink: Arc<S>,
    auto_failover: bool,
    retention: Duration,
    monitor_interval: Duration,
    nightly_backup_hour: u32,
    rpo: Duration,
    rto: Duration,
    failover_in_progress: AtomicBool,
    last_backup_date: RwLock<Option<chrono::NaiveDate>>,
    running: Arc<AtomicBool>,
}

impl<CBA, BST, ENC, SA, S> DrOrchestrator<CBA, BST, ENC, SA, S>
where
    CBA: ComponentBackupAdapter + 'static,
    BST: BackupStorageAdapter + 'static,
    ENC: EncryptionAdapter + 'static,
    SA: SiteAdapter + 'static,
    S: TelemetrySink + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backup_engine: Arc<BackupEngine<CBA, BST, ENC, S>>,
        failover_engine: Arc<FailoverEngine<SA, S>>,
        site_adapter: Arc<SA>,
        sink: Arc<S>,
        auto_failover: bool,
        retention: Duration,
    ) -> Self {
        Self::with_rpo_rto(
            backup_engine,
            failover_engine,
            site_adapter,
            sink,
            auto_failover,
            retention,
            DEFAULT_RPO,
            DEFAULT_RTO,
        )
    }

    /// Like [`Self::new`], but with explicit RPO/RTO (spec §6
    /// `DSR_DR_RPO_MINUTES`/`DSR_DR_RTO_MINUTES`) instead of the defaults.
    #[allow(clippy::too_many_arguments)]
    pub fn with_rpo_rto(
        backup_engine: Arc<BackupEngine<CBA, BST, ENC, S>>,
        failover_engine: Arc<FailoverEngine<SA, S>>,
        site_adapter: Arc<SA>,
        sink: Arc<S>,
        auto_failover: bool,
        retention: Duration,
        rpo: Duration,
        rto: Duration,
    ) -> Self {
        Self {
            sites: RwLock::new(HashMap::new()),
            disaster_events: RwLock::new(Vec::new()),
            backup_engine,
            failover_engine,
            site_adapter,
            sink,
            auto_failover,
            retention,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            nightly_backup_hour: DEFAULT_NIGHTLY_BACKUP_HOUR,
            rpo,
            rto,
            failover_in_progress: AtomicBool::new(false),
            last_backup_date: RwLock::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn register_site(&self, name: impl Into<String>, role: SiteRole) {
        let name = name.into();
        let status = match role {
            SiteRole::Primary => SiteStatus::new_primary(name.clone()),
            _ => SiteStatus::new_secondary(name.clone()),
        };
        self.sites.write().await.insert(name, status);
    }

    pub async fn status(&self) -> DrStatus {
        DrStatus {
            sites: self.sites.read().await.values().cloned().collect(),
            disaster_events: self.disaster_events.read().await.clone(),
            failover_in_progress: self.failover_in_progress.load(Ordering::SeqCst),
            rpo: self.rpo,
            rto: self.rto,
        }
    }

    async fn current_primary(&self) -> Option<String> {
        self.sites
            .read()
            .await
            .values()
            .find(|s| s.role == SiteRole::Primary)
            .map(|s| s.name.clone())
    }

    /// Best secondary to fail over to: filter to currently HEALTHY
    /// secondaries, then lowest replication lag with lexicographic site name
    /// as tiebreak; `None` if no secondary qualifies (spec §4.K).
    async fn best_secondary(&self, exclude: &str) -> Option<String> {
        let sites = self.sites.read().await;
        sites
            .values()
            .filter(|s| s.role == SiteRole::Secondary && s.name != exclude && s.is_healthy())
            .min_by(|a, b| a.replication_lag.cmp(&b.replication_lag).then_with(|| a.name.cmp(&b.name)))
            .map(|s| s.name.clone())
    }

    fn standard_failover_steps() -> Vec<FailoverStep> {
        vec![
            FailoverStep { name: "database failover".to_string(), kind: FailoverStepKind::DatabaseFailover, critical: true },
            FailoverStep { name: "load balancer update".to_string(), kind: FailoverStepKind::LoadBalancerUpdate, critical: true },
            FailoverStep { name: "dns update".to_string(), kind: FailoverStepKind::DnsUpdate, critical: true },
            FailoverStep { name: "service restart".to_string(), kind: FailoverStepKind::ServiceRestart, critical: true },
            FailoverStep { name: "configuration sync".to_string(), kind: FailoverStepKind::ConfigurationUpdate, critical: false },
            FailoverStep { name: "health check".to_string(), kind: FailoverStepKind::HealthCheck, critical: false },
            FailoverStep { name: "notify oncall".to_string(), kind: FailoverStepKind::Notification, critical: false },
        ]
    }

    /// Manually trigger a failover to `target_site` (spec §6 "manual failover
    /// trigger"). Refuses if a failover is already in progress.
    pub async fn initiate(&self, target_site: &str) -> Result<FailoverResult, CoreError> {
        if self.failover_in_progress.swap(true, Ordering::SeqCst) {
            return Err(CoreError::conflict("a failover is already in progress"));
        }
        let result = self.run_failover(target_site, false).await;
        self.failover_in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn run_failover(&self, target_site: &str, automatic: bool) -> Result<FailoverResult, CoreError> {
        let source_site = self
            .current_primary()
            .await
            .ok_or_else(|| CoreError::not_found("no primary site registered"))?;

        let sequence = FailoverSequence {
            id: crate::ids::FailoverSequenceId::new(),
            steps: Self::standard_failover_steps(),
            source_site: source_site.clone(),
            target_site: target_site.to_string(),
            automatic,
        };

        let result = self.failover_engine.execute(sequence).await?;

        if result.execution.status == ExecutionStatus::Completed {
            let mut sites = self.sites.write().await;
            if let Some(old_primary) = sites.get_mut(&source_site) {
                old_primary.role = SiteRole::Failed;
                old_primary.last_failover_millis = Some(wall_now_millis());
            }
            if let Some(new_primary) = sites.get_mut(target_site) {
                new_primary.role = SiteRole::Primary;
                new_primary.last_failover_millis = Some(wall_now_millis());
            }
        }

        let elapsed_millis = result
            .execution
            .end_millis
            .unwrap_or_else(wall_now_millis)
            .saturating_sub(result.execution.start_millis)
            .max(0) as u64;
        if Duration::from_millis(elapsed_millis) > self.rto {
            emit_best_effort(
                (*self.sink).clone(),
                PolicyEvent::Dr(DrEvent::RtoExceeded {
                    execution_id: result.execution.id.to_string(),
                    elapsed_seconds: elapsed_millis / 1000,
                    rto_seconds: self.rto.as_secs(),
                }),
            )
            .await;
        }

        Ok(result)
    }

    /// One site-health monitoring pass (spec §4.K "monitors every minute").
    pub async fn monitor_tick(&self) {
        let snapshot: Vec<SiteStatus> = self.sites.read().await.values().cloned().collect();
        for mut status in snapshot {
            let healthy = self.site_adapter.verify_site_health(&status.name).await.unwrap_or(false);
            if healthy {
                status.consecutive_health_failures = 0;
            } else {
                status.consecutive_health_failures += 1;
            }
            status.last_health_check_millis = Some(wall_now_millis());

            let should_react = !healthy && status.role == SiteRole::Primary && status.consecutive_health_failures >= DISASTER_THRESHOLD;
            if status.role == SiteRole::Secondary && status.replication_lag > self.rpo {
                emit_best_effort(
                    (*self.sink).clone(),
                    PolicyEvent::Dr(DrEvent::RpoExceeded {
                        site: status.name.clone(),
                        lag_seconds: status.replication_lag.as_secs(),
                        rpo_seconds: self.rpo.as_secs(),
                    }),
                )
                .await;
            }
            self.sites.write().await.insert(status.name.clone(), status.clone());

            if should_react {
                self.handle_primary_disaster(&status.name).await;
            }
        }
    }

    async fn handle_primary_disaster(&self, primary_name: &str) {
        let event = DisasterEvent {
            id: DisasterEventId::new(),
            event_type: "primary_unreachable".to_string(),
            severity: DisasterSeverity::Critical,
            affected_components: vec![primary_name.to_string()],
            detected_at_millis: wall_now_millis(),
            status: DisasterStatus::Detected,
        };
        let event_id = event.id;
        self.disaster_events.write().await.push(event);

        emit_best_effort(
            (*self.sink).clone(),
            PolicyEvent::Dr(DrEvent::DisasterDetected { event_id: event_id.to_string(), severity: "CRITICAL" }),
        )
        .await;

        if !self.auto_failover {
            return;
        }
        if self.failover_in_progress.swap(true, Ordering::SeqCst) {
            return;
        }

        let outcome = if let Some(target) = self.best_secondary(primary_name).await {
            emit_best_effort(
                (*self.sink).clone(),
                PolicyEvent::Dr(DrEvent::AutoFailoverTriggered {
                    source_site: primary_name.to_string(),
                    target_site: target.clone(),
                }),
            )
            .await;
            self.run_failover(&target, true).await
        } else {
            emit_best_effort(
                (*self.sink).clone(),
                PolicyEvent::Dr(DrEvent::FailoverFailed {
                    source_site: primary_name.to_string(),
                    reason: "no HEALTHY secondary qualifies as a failover target".to_string(),
                }),
            )
            .await;
            Err(CoreError::unavailable("no eligible secondary site for automatic failover"))
        };
        self.failover_in_progress.store(false, Ordering::SeqCst);

        if matches!(outcome, Ok(ref r) if r.execution.status == ExecutionStatus::Completed) {
            self.mark_recovered(event_id).await;
        }
    }

    async fn mark_recovered(&self, event_id: DisasterEventId) {
        let mut events = self.disaster_events.write().await;
        if let Some(event) = events.iter_mut().find(|e| e.id == event_id) {
            event.status = DisasterStatus::Recovered;
        }
        drop(events);
        emit_best_effort((*self.sink).clone(), PolicyEvent::Dr(DrEvent::Recovered { event_id: event_id.to_string() })).await;
    }

    /// Run the nightly full backup if it has not already run today (spec
    /// §4.K "nightly backup task, default 02:00").
    pub async fn run_nightly_backup_if_due(&self) -> Option<Result<BackupResult, CoreError>> {
        let today = chrono::Utc::now().date_naive();
        let now_hour = chrono::Utc::now().format("%H").to_string().parse::<u32>().unwrap_or(0);
        if now_hour != self.nightly_backup_hour {
            return None;
        }
        {
            let last = self.last_backup_date.read().await;
            if *last == Some(today) {
                return None;
            }
        }
        *self.last_backup_date.write().await = Some(today);

        let plan = BackupPlan {
            id: BackupPlanId::new(),
            backup_type: BackupType::Full,
            components: RECOGNIZED_COMPONENTS.iter().map(|c| c.to_string()).collect(),
            compression: true,
            encryption: true,
            verification: true,
            retention_days: (self.retention.as_secs() / 86_400) as u32,
            scheduled_at_millis: Some(wall_now_millis()),
        };

        let result = self.backup_engine.execute(plan).await;
        self.backup_engine.purge_expired(self.retention).await;
        Some(result)
    }

    /// Run an ad hoc backup outside the nightly schedule (spec §6 "trigger
    /// backup now"), e.g. before a risky maintenance window.
    pub async fn run_backup(&self, plan: BackupPlan) -> Result<BackupResult, CoreError> {
        self.backup_engine.execute(plan).await
    }

    pub fn backup_metadata(&self, backup_id: crate::ids::BackupExecutionId) -> Option<crate::model::BackupMetadata> {
        self.backup_engine.metadata(backup_id)
    }

    pub async fn verify_backup_integrity(&self, backup_id: crate::ids::BackupExecutionId) -> Result<(), CoreError> {
        self.backup_engine.verify_backup_integrity(backup_id).await
    }

    pub async fn restore_backup(&self, backup_id: crate::ids::BackupExecutionId) -> Result<(), CoreError> {
        self.backup_engine.restore(backup_id).await
    }

    pub async fn failover_history(&self) -> Vec<FailoverResult> {
        self.failover_engine.history().await
    }

    /// Spawn the combined monitor/nightly-backup loop.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(orchestrator.monitor_interval);
            loop {
                ticker.tick().await;
                if !orchestrator.running.load(Ordering::SeqCst) {
                    break;
                }
                orchestrator.monitor_tick().await;
                let _ = orchestrator.run_nightly_backup_if_due().await;
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
