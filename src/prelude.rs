//! Convenient re-exports for the common fleet-resilience-core types.
pub use crate::{
    adaptive::Adaptive,
    backoff::Backoff,
    bulkhead::BulkheadPolicy,
    circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState},
    circuit_breaker_registry::{CircuitBreakerHandle, CircuitBreakerRegistry},
    errors::CoreError,
    ids::{InstanceId, ServiceName},
    jitter::Jitter,
    retry::{BuildError, RetryPolicy, RetryPolicyBuilder},
    stack::{ResilienceStack, ResilienceStackBuilder, StackError},
    telemetry::{
        BackupEvent, BulkheadEvent, CacheEvent, CircuitBreakerEvent, DispatchEvent, DrEvent,
        FailoverEvent, FallbackSink, HealthEvent, LogSink, MemorySink, MulticastSink, NullSink,
        PolicyEvent, RegistryEvent, RequestOutcome, RetryEvent, StreamingSink, TelemetrySink,
        TimeoutEvent,
    },
    timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT},
    ResilienceError,
};

pub use crate::dispatch::{Dispatcher, LoadBalancingStrategy};
pub use crate::registry::{ServiceRegistry, ServiceRegistryError};

pub use crate::admin::{AdminError, BreakerStatus, FleetAdmin, StrategyDescription};
pub use crate::cache::{all_namespaces, lookup_namespace, CacheCoordinator, CacheStats, ClusterInfo};
pub use crate::config::FleetConfig;
pub use crate::dr::{
    BackupEngine, BackupResult, DrOrchestrator, DrStatus, FailoverEngine, FailoverResult, StepOutcome,
    CRITICAL_COMPONENTS, DEFAULT_RPO, DEFAULT_RTO, DEFAULT_SEQUENCE_TIMEOUT, DEFAULT_STEP_TIMEOUT,
};
pub use crate::health::{HealthProber, DEFAULT_HEALTH_CHECK_INTERVAL};
pub use crate::pool_monitor::{
    ConnectionPoolMonitor, PoolRecommendation, PoolWarning, DEFAULT_SAMPLE_INTERVAL, WINDOW_CAPACITY,
};
