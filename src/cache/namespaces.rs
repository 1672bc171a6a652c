//! The fixed namespace table (spec §4.H).
//!
//! Namespace configuration is decided once, at process startup, and never
//! mutated afterward — callers cannot create or reconfigure a namespace at
//! runtime, only use one of these six.

use std::time::Duration;

use crate::model::{CacheNamespace, EvictionPolicy};

/// All namespaces recognized by the cache coordinator, in the order spec
/// §4.H lists them.
pub fn all() -> [CacheNamespace; 6] {
    [
        CacheNamespace {
            name: "users",
            ttl: Duration::from_secs(30 * 60),
            max_entries: 100_000,
            eviction: EvictionPolicy::Lru,
            compression: false,
        },
        CacheNamespace {
            name: "households",
            ttl: Duration::from_secs(2 * 60 * 60),
            max_entries: 250_000,
            eviction: EvictionPolicy::Lru,
            compression: true,
        },
        CacheNamespace {
            name: "philsys",
            ttl: Duration::from_secs(24 * 60 * 60),
            max_entries: 500_000,
            eviction: EvictionPolicy::Lfu,
            compression: true,
        },
        CacheNamespace {
            name: "sessions",
            ttl: Duration::from_secs(15 * 60),
            max_entries: 1_000_000,
            eviction: EvictionPolicy::TtlOnly,
            compression: false,
        },
        CacheNamespace {
            name: "analytics",
            ttl: Duration::from_secs(10 * 60),
            max_entries: 50_000,
            eviction: EvictionPolicy::Lru,
            compression: true,
        },
        CacheNamespace {
            name: "api-responses",
            ttl: Duration::from_secs(5 * 60),
            max_entries: 200_000,
            eviction: EvictionPolicy::Lru,
            compression: false,
        },
    ]
}

pub fn lookup(name: &str) -> Option<CacheNamespace> {
    all().into_iter().find(|ns| ns.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_six_namespaces_present() {
        let names: Vec<&str> = all().iter().map(|ns| ns.name).collect();
        assert_eq!(
            names,
            vec!["users", "households", "philsys", "sessions", "analytics", "api-responses"]
        );
    }

    #[test]
    fn sessions_is_ttl_only_with_no_compression() {
        let sessions = lookup("sessions").unwrap();
        assert_eq!(sessions.eviction, EvictionPolicy::TtlOnly);
        assert!(!sessions.compression);
        assert_eq!(sessions.ttl, Duration::from_secs(15 * 60));
    }

    #[test]
    fn philsys_is_lfu_with_compression_and_longest_ttl() {
        let philsys = lookup("philsys").unwrap();
        assert_eq!(philsys.eviction, EvictionPolicy::Lfu);
        assert!(philsys.compression);
        assert_eq!(philsys.ttl, Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn unknown_namespace_is_none() {
        assert!(lookup("not-a-namespace").is_none());
    }
}
