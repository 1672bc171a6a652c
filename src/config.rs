//! Environment/file-driven configuration (spec §6, §10.3).
//!
//! Deserializes the `DSR_*` environment variables (or an optional config
//! file) into [`FleetConfig`] via the `config` crate, the same layered
//! env/file idiom used elsewhere in the broader example corpus (e.g.
//! `hypermesh`'s `ConsensusConfig::from_file`). Defaults match the documented
//! values in spec §4 so a fleet can run unconfigured in development.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

fn default_true() -> bool {
    true
}

/// Disaster-recovery knobs (`DSR_DR_*`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DrSettings {
    pub enabled: bool,
    pub auto_failover: bool,
    pub rto_minutes: u64,
    pub rpo_minutes: u64,
    pub retention_days: u32,
}

impl Default for DrSettings {
    fn default() -> Self {
        Self { enabled: true, auto_failover: false, rto_minutes: 240, rpo_minutes: 60, retention_days: 30 }
    }
}

impl DrSettings {
    pub fn rto(&self) -> Duration {
        Duration::from_secs(self.rto_minutes * 60)
    }

    pub fn rpo(&self) -> Duration {
        Duration::from_secs(self.rpo_minutes * 60)
    }
}

/// Backup engine knobs (`DSR_BACKUP_*`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub base_path: String,
    pub compression: bool,
    pub encryption: bool,
    pub verification: bool,
    pub remote: bool,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            base_path: "/var/lib/dsr/backups".to_string(),
            compression: true,
            encryption: true,
            verification: true,
            remote: false,
        }
    }
}

/// Cache coordinator knobs (`DSR_CACHE_*`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Comma-separated `host:port` list (spec §6 `DSR_CACHE_NODES`).
    pub nodes: String,
    pub default_ttl_seconds: u64,
    pub compression: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { nodes: "localhost:6379".to_string(), default_ttl_seconds: 300, compression: true }
    }
}

impl CacheSettings {
    pub fn node_list(&self) -> Vec<String> {
        self.nodes.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
    }
}

/// Load-balancer/health knobs (`DSR_LB_*`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LbSettings {
    pub healthcheck_interval_seconds: u64,
    pub failure_threshold: usize,
    pub breaker_cooldown_seconds: u64,
}

impl Default for LbSettings {
    fn default() -> Self {
        Self { healthcheck_interval_seconds: 30, failure_threshold: 5, breaker_cooldown_seconds: 30 }
    }
}

impl LbSettings {
    pub fn healthcheck_interval(&self) -> Duration {
        Duration::from_secs(self.healthcheck_interval_seconds)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_seconds)
    }
}

/// Top-level configuration document (spec §6, §10.3).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FleetConfig {
    pub dr: DrSettings,
    pub backup: BackupSettings,
    pub cache: CacheSettings,
    pub lb: LbSettings,
    /// Whether to emit `tracing` at debug level for hot-path detail (spec
    /// §10.2). Opt-in since most deployments want info-level only.
    #[serde(default = "default_true")]
    pub info_logging: bool,
}

impl FleetConfig {
    /// Build configuration from environment variables prefixed `DSR_`
    /// (e.g. `DSR_DR_ENABLED`, `DSR_BACKUP_COMPRESSION`), optionally layered
    /// on top of a config file. Env vars always win over file values.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix("DSR").separator("_").try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = FleetConfig::default();
        assert_eq!(config.dr.rto_minutes, 240);
        assert_eq!(config.dr.rpo_minutes, 60);
        assert_eq!(config.dr.retention_days, 30);
        assert_eq!(config.lb.failure_threshold, 5);
        assert_eq!(config.lb.healthcheck_interval(), Duration::from_secs(30));
    }

    #[test]
    fn cache_node_list_splits_and_trims() {
        let settings = CacheSettings { nodes: "a:1, b:2 ,c:3".to_string(), ..Default::default() };
        assert_eq!(settings.node_list(), vec!["a:1", "b:2", "c:3"]);
    }

    #[test]
    fn load_with_no_file_falls_back_to_defaults_plus_env() {
        std::env::set_var("DSR_DR_RETENTION_DAYS", "14");
        let config = FleetConfig::load(None).expect("config loads");
        assert_eq!(config.dr.retention_days, 14);
        std::env::remove_var("DSR_DR_RETENTION_DAYS");
    }
}
