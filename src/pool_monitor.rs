//! Connection pool sampler and tuning advisor (spec §4.G).
//!
//! Pure observer: the monitor never mutates pool state, only samples it
//! through a [`crate::adapters::PoolTelemetrySource`] on a fixed cadence and
//! keeps a rolling window of the last [`WINDOW_CAPACITY`] snapshots for the
//! recommendation heuristics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::adapters::{PoolCounters, PoolTelemetrySource};

/// Default sampling cadence (spec §4.G).
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(30);

/// Rolling window length: the last 100 snapshots (spec §4.G).
pub const WINDOW_CAPACITY: usize = 100;

const UTILIZATION_WARNING_THRESHOLD: f64 = 0.9;

/// A single recommendation the monitor can emit. These map 1:1 onto the
/// tuning actions spec §4.G enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRecommendation {
    RaisePoolSize,
    LowerPoolSize,
    RaiseConnectionTimeout,
    EnableLeakDetection,
}

impl PoolRecommendation {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RaisePoolSize => "RAISE_POOL_SIZE",
            Self::LowerPoolSize => "LOWER_POOL_SIZE",
            Self::RaiseConnectionTimeout => "RAISE_CONNECTION_TIMEOUT",
            Self::EnableLeakDetection => "ENABLE_LEAK_DETECTION",
        }
    }
}

/// A warning condition raised by the current sample (spec §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolWarning {
    HighUtilization { utilization_pct: u32 },
    CallersWaiting { waiting: u32 },
    IdleStarvation,
}

fn utilization(counters: &PoolCounters) -> f64 {
    if counters.max == 0 {
        0.0
    } else {
        counters.active as f64 / counters.max as f64
    }
}

/// Samples a [`PoolTelemetrySource`] on a fixed cadence, keeping a rolling
/// window for trend-aware recommendations (spec §4.G: "current + window
/// averages").
pub struct ConnectionPoolMonitor<T> {
    source: Arc<T>,
    interval: Duration,
    window: RwLock<VecDeque<PoolCounters>>,
    running: Arc<AtomicBool>,
}

impl<T> ConnectionPoolMonitor<T>
where
    T: PoolTelemetrySource + 'static,
{
    pub fn new(source: Arc<T>) -> Self {
        Self::with_interval(source, DEFAULT_SAMPLE_INTERVAL)
    }

    pub fn with_interval(source: Arc<T>, interval: Duration) -> Self {
        Self {
            source,
            interval,
            window: RwLock::new(VecDeque::with_capacity(WINDOW_CAPACITY)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Take one sample and push it onto the rolling window, evicting the
    /// oldest entry past [`WINDOW_CAPACITY`].
    pub async fn sample_once(&self) -> Result<PoolCounters, crate::errors::CoreError> {
        let counters = self.source.sample().await?;
        let mut window = self.window.write().await;
        if window.len() == WINDOW_CAPACITY {
            window.pop_front();
        }
        window.push_back(counters);
        Ok(counters)
    }

    pub async fn window_snapshot(&self) -> Vec<PoolCounters> {
        self.window.read().await.iter().copied().collect()
    }

    /// Warnings raised by the most recent sample alone (spec §4.G:
    /// utilization > 0.9, waiting > 0, idle == 0 ∧ active > 0).
    pub async fn warnings(&self) -> Vec<PoolWarning> {
        let window = self.window.read().await;
        let Some(latest) = window.back() else {
            return Vec::new();
        };
        let mut warnings = Vec::new();
        let util = utilization(latest);
        if util > UTILIZATION_WARNING_THRESHOLD {
            warnings.push(PoolWarning::HighUtilization { utilization_pct: (util * 100.0) as u32 });
        }
        if latest.waiting > 0 {
            warnings.push(PoolWarning::CallersWaiting { waiting: latest.waiting });
        }
        if latest.idle == 0 && latest.active > 0 {
            warnings.push(PoolWarning::IdleStarvation);
        }
        warnings
    }

    /// Tuning recommendations derived from the latest sample and the
    /// window's rolling average (spec §4.G).
    pub async fn recommendations(&self) -> Vec<PoolRecommendation> {
        let window = self.window.read().await;
        let Some(latest) = window.back() else {
            return Vec::new();
        };

        let window_avg_utilization = if window.is_empty() {
            0.0
        } else {
            window.iter().map(utilization).sum::<f64>() / window.len() as f64
        };

        let mut recommendations = Vec::new();

        if utilization(latest) > UTILIZATION_WARNING_THRESHOLD || window_avg_utilization > UTILIZATION_WARNING_THRESHOLD {
            recommendations.push(PoolRecommendation::RaisePoolSize);
        }

        if latest.waiting > 0 {
            recommendations.push(PoolRecommendation::RaiseConnectionTimeout);
        }

        // Sustained low utilization across the whole window, not just the
        // latest sample, before suggesting a shrink: a single quiet tick is
        // not sustained pressure relief.
        if window.len() == WINDOW_CAPACITY && window_avg_utilization < 0.2 && latest.total > latest.min {
            recommendations.push(PoolRecommendation::LowerPoolSize);
        }

        if latest.idle == 0 && latest.active == latest.max && latest.waiting == 0 && window.len() > 1 {
            // Pool is pinned at capacity with nobody waiting: connections are
            // plausibly leaking rather than being returned.
            recommendations.push(PoolRecommendation::EnableLeakDetection);
        }

        recommendations
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            loop {
                ticker.tick().await;
                if !monitor.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(err) = monitor.sample_once().await {
                    tracing::warn!(error = %err, "pool sample failed");
                }
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
