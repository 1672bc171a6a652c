#![forbid(unsafe_code)]

//! # fleet-resilience-core
//!
//! Resilience core for a fleet of social-registry microservices: a service
//! registry, a load-balancing dispatcher, a connection pool monitor, a
//! namespaced cache coordinator, and a disaster recovery orchestrator, all
//! built on the same retry/circuit-breaker/bulkhead/timeout primitives.
//!
//! ## Layers
//!
//! - **Primitives**: retry (with backoff + jitter), circuit breakers, bulkheads,
//!   and timeouts, composable via [`ResilienceStack`].
//! - **Registry & dispatch**: [`registry`] tracks instances per service; [`dispatch`]
//!   routes calls across healthy instances with six load-balancing strategies.
//! - **Pool monitoring**: [`pool_monitor`] samples connection pool utilization on
//!   a rolling window and raises recommendations.
//! - **Cache coordination**: [`cache`] manages namespaced TTL/eviction policy.
//! - **Disaster recovery**: [`dr`] plans and runs backups, executes ordered
//!   failover sequences with rollback, and continuously watches site health.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use fleet_resilience_core::{
//!     Backoff, BulkheadPolicy, CircuitBreakerPolicy, Jitter, ResilienceError, ResilienceStack,
//!     ResilienceStackBuilder, RetryPolicy, TimeoutPolicy,
//! };
//!
//! async fn flaky_operation(
//!     attempts: Arc<AtomicUsize>,
//! ) -> Result<(), ResilienceError<std::io::Error>> {
//!     let n = attempts.fetch_add(1, Ordering::Relaxed);
//!     if n < 2 {
//!         Err(ResilienceError::Inner(std::io::Error::new(
//!             std::io::ErrorKind::Other,
//!             "transient failure",
//!         )))
//!     } else {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ResilienceError<std::io::Error>> {
//!     let attempts = Arc::new(AtomicUsize::new(0));
//!
//!     // Configure individual policies.
//!     let retry = RetryPolicy::builder()
//!         .max_attempts(3)
//!         .expect("valid attempt count")
//!         .backoff(Backoff::exponential(Duration::from_millis(200)))
//!         .with_jitter(Jitter::full())
//!         .build();
//!     let timeout = TimeoutPolicy::new(Duration::from_secs(2)).expect("valid timeout");
//!     let bulkhead = BulkheadPolicy::new(32);
//!     let circuit_breaker = CircuitBreakerPolicy::new(5, Duration::from_secs(30));
//!
//!     // Compose via the stack builder (Retry → CircuitBreaker → Bulkhead → Timeout).
//!     let stack: ResilienceStack<std::io::Error> = ResilienceStackBuilder::new()
//!         .retry(retry)
//!         .circuit_breaker(5, Duration::from_secs(30))
//!         .bulkhead(32)
//!         .timeout(Duration::from_secs(2))
//!         .expect("valid timeout config")
//!         .build();
//!
//!     let _ = (timeout, bulkhead, circuit_breaker);
//!     stack.execute(|| flaky_operation(attempts.clone())).await?;
//!     Ok(())
//! }
//! ```

mod adaptive;
mod backoff;
mod bulkhead;
mod circuit_breaker;
mod circuit_breaker_registry;
mod clock;
mod error;
mod jitter;
mod retry;
mod sleeper;
mod stack;
mod timeout;

pub mod adapters;
pub mod admin;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod dr;
pub mod errors;
pub mod health;
pub mod ids;
pub mod metrics;
pub mod model;
pub mod pool_monitor;
pub mod registry;
pub mod telemetry;

// Re-exports: primitive resilience layer.
pub use adaptive::Adaptive;
pub use backoff::Backoff;
pub use bulkhead::BulkheadPolicy;
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};
pub use circuit_breaker_registry::{CircuitBreakerHandle, CircuitBreakerRegistry};
pub use clock::{Clock, MonotonicClock};
pub use error::ResilienceError;
pub use jitter::Jitter;
pub use retry::{BuildError, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::{ResilienceStack, ResilienceStackBuilder, StackError};
pub use timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT};

// Re-exports: fleet domain layer.
pub use errors::CoreError;
pub use ids::{InstanceId, ServiceName};

pub mod prelude;
