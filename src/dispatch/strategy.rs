//! The six load-balancing strategies (spec §4.F).

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::Rng;

use crate::metrics::MetricsSnapshot;
use crate::model::ServiceInstance;

/// Virtual nodes per real instance on the consistent-hash ring. More virtual
/// nodes means a more even key distribution and less key movement when
/// membership changes, at the cost of building a bigger ring per call.
const HASH_RING_VIRTUAL_NODES: u32 = 64;

/// Which algorithm [`super::Dispatcher::route`] uses to pick an instance.
/// All strategies only ever see instances the registry has already filtered
/// to "healthy and breaker-admitting" (spec §4.F: "all strategies respect
/// breaker state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancingStrategy {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    WeightedResponseTime,
    Random,
    ConsistentHash,
}

impl LoadBalancingStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RoundRobin => "ROUND_ROBIN",
            Self::WeightedRoundRobin => "WEIGHTED_ROUND_ROBIN",
            Self::LeastConnections => "LEAST_CONNECTIONS",
            Self::WeightedResponseTime => "WEIGHTED_RESPONSE_TIME",
            Self::Random => "RANDOM",
            Self::ConsistentHash => "CONSISTENT_HASH",
        }
    }

    /// All strategy labels paired with whether they require a routing `key`
    /// (spec §6: "list strategies with capability flags").
    pub fn all_with_capabilities() -> &'static [(LoadBalancingStrategy, bool)] {
        &[
            (LoadBalancingStrategy::RoundRobin, false),
            (LoadBalancingStrategy::WeightedRoundRobin, false),
            (LoadBalancingStrategy::LeastConnections, false),
            (LoadBalancingStrategy::WeightedResponseTime, false),
            (LoadBalancingStrategy::Random, false),
            (LoadBalancingStrategy::ConsistentHash, true),
        ]
    }

    pub fn requires_key(&self) -> bool {
        matches!(self, Self::ConsistentHash)
    }

    /// Select one of `candidates` (assumed non-empty; callers check
    /// emptiness before calling). `next_cursor` drives both round-robin
    /// variants; `metrics` looks up the caller's current snapshot for an
    /// instance so this module stays free of any registry dependency.
    pub fn select<R, M>(
        &self,
        candidates: &[ServiceInstance],
        key: Option<&str>,
        next_cursor: R,
        metrics: M,
    ) -> ServiceInstance
    where
        R: FnOnce() -> usize,
        M: Fn(&ServiceInstance) -> Option<MetricsSnapshot>,
    {
        match self {
            Self::RoundRobin => {
                let idx = next_cursor() % candidates.len();
                candidates[idx].clone()
            }
            Self::WeightedRoundRobin => {
                // Zero-weight instances are never chosen (spec §4.F); fall
                // back to the full candidate set only if every one of them
                // is zero-weight, so `route` still returns someone.
                let eligible: Vec<&ServiceInstance> = candidates.iter().filter(|i| i.weight > 0).collect();
                let pool: Vec<&ServiceInstance> =
                    if eligible.is_empty() { candidates.iter().collect() } else { eligible };
                let total_weight: u32 = pool.iter().map(|i| i.weight.max(1)).sum();
                let cursor = next_cursor() as u32 % total_weight.max(1);
                let mut running = 0u32;
                for instance in &pool {
                    running += instance.weight.max(1);
                    if cursor < running {
                        return (*instance).clone();
                    }
                }
                pool[0].clone()
            }
            Self::LeastConnections => candidates
                .iter()
                .min_by(|a, b| {
                    let ma = metrics(a);
                    let mb = metrics(b);
                    let conn_a = ma.map(|m| m.active_connections).unwrap_or(0);
                    let conn_b = mb.map(|m| m.active_connections).unwrap_or(0);
                    conn_a
                        .cmp(&conn_b)
                        .then_with(|| {
                            // Tie-break by higher performance score (spec §4.F).
                            let score_a = ma.map(|m| m.performance_score).unwrap_or(0.0);
                            let score_b = mb.map(|m| m.performance_score).unwrap_or(0.0);
                            score_b.partial_cmp(&score_a).unwrap_or(Ordering::Equal)
                        })
                        .then_with(|| a.id.cmp(&b.id))
                })
                .expect("candidates is non-empty")
                .clone(),
            Self::WeightedResponseTime => {
                // Ignore instances with zero samples; if every candidate is
                // unsampled, fall back to round robin among them (spec §4.F).
                let sampled: Vec<&ServiceInstance> = candidates
                    .iter()
                    .filter(|i| metrics(i).map(|m| m.total_requests > 0).unwrap_or(false))
                    .collect();
                if sampled.is_empty() {
                    let idx = next_cursor() % candidates.len();
                    return candidates[idx].clone();
                }
                sampled
                    .into_iter()
                    .max_by(|a, b| {
                        weighted_response_time_score(a, &metrics)
                            .partial_cmp(&weighted_response_time_score(b, &metrics))
                            .unwrap_or(Ordering::Equal)
                    })
                    .expect("sampled is non-empty")
                    .clone()
            }
            Self::Random => {
                let idx = rand::rng().random_range(0..candidates.len());
                candidates[idx].clone()
            }
            Self::ConsistentHash => {
                let hash_input = key.unwrap_or("");
                hash_ring_pick(candidates, hash_input)
            }
        }
    }
}

/// `weight / avg_response_time`, so the argmax here is equivalent to
/// `argmin(avgResponseTime / weight)`.
fn weighted_response_time_score(
    instance: &ServiceInstance,
    metrics: &impl Fn(&ServiceInstance) -> Option<MetricsSnapshot>,
) -> f64 {
    let rt = metrics(instance).map(|m| m.avg_response_time_ms).unwrap_or(0.0).max(1.0);
    instance.weight.max(1) as f64 / rt
}

fn hash_u64(input: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    input.hash(&mut hasher);
    hasher.finish()
}

/// Stable hash-ring assignment over `candidates` (spec §4.F: "stable
/// hash-ring assignment; on breaker rejection, move clockwise until an
/// admitted instance is found"). Since `candidates` is already filtered to
/// breaker-admitted instances by the caller, building the ring only over
/// `candidates` and walking clockwise from `key`'s position naturally skips
/// rejected instances without a separate retry loop.
fn hash_ring_pick(candidates: &[ServiceInstance], key: &str) -> ServiceInstance {
    let target = hash_u64(key);
    let mut ring: Vec<(u64, usize)> = Vec::with_capacity(candidates.len() * HASH_RING_VIRTUAL_NODES as usize);
    for (idx, instance) in candidates.iter().enumerate() {
        for v in 0..HASH_RING_VIRTUAL_NODES {
            ring.push((hash_u64(&format!("{}-{v}", instance.id)), idx));
        }
    }
    ring.sort_unstable_by_key(|(h, _)| *h);
    let pos = ring.partition_point(|(h, _)| *h < target);
    let (_, idx) = ring[pos % ring.len()];
    candidates[idx].clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(service: &str, weight: u32) -> ServiceInstance {
        ServiceInstance::new(service, "10.0.0.1", 8080, weight)
    }

    #[test]
    fn round_robin_uses_cursor_modulo_len() {
        let candidates = vec![make("svc", 1), make("svc", 1), make("svc", 1)];
        let chosen = LoadBalancingStrategy::RoundRobin.select(&candidates, None, || 4, |_| None);
        assert_eq!(chosen.id, candidates[1].id);
    }

    #[test]
    fn least_connections_picks_minimum() {
        let candidates = vec![make("svc", 1), make("svc", 1)];
        let loads = [10u64, 2u64];
        let chosen = LoadBalancingStrategy::LeastConnections.select(&candidates, None, || 0, |instance| {
            let idx = candidates.iter().position(|c| c.id == instance.id).unwrap();
            Some(MetricsSnapshot {
                total_requests: 1,
                successful_requests: 1,
                failed_requests: 0,
                active_connections: loads[idx],
                avg_response_time_ms: 0.0,
                min_response_time_ms: None,
                max_response_time_ms: None,
                error_rate: 0.0,
                success_rate: 100.0,
                throughput: 0.0,
                performance_score: 100.0,
            })
        });
        assert_eq!(chosen.id, candidates[1].id);
    }

    #[test]
    fn least_connections_tie_breaks_by_performance_then_id() {
        let candidates = vec![make("svc", 1), make("svc", 1)];
        let scores = [50.0, 90.0];
        let chosen = LoadBalancingStrategy::LeastConnections.select(&candidates, None, || 0, |instance| {
            let idx = candidates.iter().position(|c| c.id == instance.id).unwrap();
            Some(MetricsSnapshot {
                total_requests: 1,
                successful_requests: 1,
                failed_requests: 0,
                active_connections: 0,
                avg_response_time_ms: 0.0,
                min_response_time_ms: None,
                max_response_time_ms: None,
                error_rate: 0.0,
                success_rate: 100.0,
                throughput: 0.0,
                performance_score: scores[idx],
            })
        });
        // Equal connections (0 == 0): the higher performance score wins.
        assert_eq!(chosen.id, candidates[1].id);
    }

    #[test]
    fn weighted_round_robin_excludes_zero_weight_instances() {
        let zero = make("svc", 0);
        let normal = make("svc", 1);
        let candidates = vec![zero.clone(), normal.clone()];
        for cursor in 0..20u32 {
            let chosen =
                LoadBalancingStrategy::WeightedRoundRobin.select(&candidates, None, || cursor as usize, |_| None);
            assert_eq!(chosen.id, normal.id);
        }
    }

    #[test]
    fn weighted_response_time_falls_back_to_round_robin_when_unsampled() {
        let candidates = vec![make("svc", 1), make("svc", 1), make("svc", 1)];
        let chosen =
            LoadBalancingStrategy::WeightedResponseTime.select(&candidates, None, || 1, |_| None);
        assert_eq!(chosen.id, candidates[1].id);
    }

    #[test]
    fn consistent_hash_is_deterministic_for_same_key() {
        let candidates = vec![make("svc", 1), make("svc", 1), make("svc", 1), make("svc", 1)];
        let first = LoadBalancingStrategy::ConsistentHash.select(&candidates, Some("user-42"), || 0, |_| None);
        let second = LoadBalancingStrategy::ConsistentHash.select(&candidates, Some("user-42"), || 0, |_| None);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn consistent_hash_mostly_stable_across_membership_change() {
        let mut candidates = vec![make("svc", 1), make("svc", 1), make("svc", 1), make("svc", 1)];
        let before = LoadBalancingStrategy::ConsistentHash.select(&candidates, Some("user-42"), || 0, |_| None);
        candidates.push(make("svc", 1));
        let after = LoadBalancingStrategy::ConsistentHash.select(&candidates, Some("user-42"), || 0, |_| None);
        // Adding one instance moves only a fraction of keys; this key is
        // very likely (though not guaranteed) to stay put, and in any case
        // the pick must still be one of the known instances.
        assert!(candidates.iter().any(|c| c.id == after.id));
        let _ = before;
    }

    #[test]
    fn weighted_round_robin_favors_higher_weight() {
        let heavy = make("svc", 99);
        let light = make("svc", 1);
        let candidates = vec![heavy.clone(), light];

        let mut heavy_picks = 0;
        for cursor in 0..100u32 {
            let chosen =
                LoadBalancingStrategy::WeightedRoundRobin.select(&candidates, None, || cursor as usize, |_| None);
            if chosen.id == heavy.id {
                heavy_picks += 1;
            }
        }
        assert!(heavy_picks > 90);
    }

    #[test]
    fn consistent_hash_requires_key_capability_flag() {
        assert!(LoadBalancingStrategy::ConsistentHash.requires_key());
        assert!(!LoadBalancingStrategy::RoundRobin.requires_key());
    }
}
