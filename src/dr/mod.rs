//! Disaster recovery (spec §4.I, §4.J, §4.K): backup engine, failover
//! engine, and the orchestrator that ties both to site health monitoring.

pub mod backup;
pub mod failover;
pub mod orchestrator;

pub use backup::{BackupEngine, BackupResult, CRITICAL_COMPONENTS, RECOGNIZED_COMPONENTS};
pub use failover::{FailoverEngine, FailoverResult, StepOutcome, DEFAULT_SEQUENCE_TIMEOUT, DEFAULT_STEP_TIMEOUT};
pub use orchestrator::{DrOrchestrator, DrStatus, DEFAULT_MONITOR_INTERVAL, DEFAULT_RPO, DEFAULT_RTO};
