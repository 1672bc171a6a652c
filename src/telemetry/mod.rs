//! Telemetry and observability for the fleet resilience core.
//!
//! This module provides the event system that enables every policy and every
//! fleet component (registry, dispatcher, cache coordinator, backup engine,
//! failover engine, DR orchestrator) to emit structured telemetry. Events flow
//! through `TelemetrySink` implementations which can log, aggregate, or
//! forward events to external systems.
//!
//! # Event Types
//!
//! - **Primitive policies**: `RetryEvent`, `CircuitBreakerEvent`, `BulkheadEvent`,
//!   `TimeoutEvent`, `RequestOutcome`
//! - **Health**: `HealthEvent`
//! - **Registry**: `RegistryEvent`
//! - **Dispatch**: `DispatchEvent`
//! - **Cache**: `CacheEvent`
//! - **Disaster recovery**: `BackupEvent`, `FailoverEvent`, `DrEvent`
//!
//! # Telemetry Sinks
//!
//! The `TelemetrySink` trait defines how events are consumed. It's implemented
//! as a `tower::Service<PolicyEvent>` for composability.

pub mod events;
pub mod sinks;

pub use events::{
    event_to_json, BackupEvent, BulkheadEvent, CacheEvent, CircuitBreakerEvent, DispatchEvent,
    DrEvent, FailoverEvent, HealthEvent, PolicyEvent, RegistryEvent, RequestOutcome, RetryEvent,
    TimeoutEvent,
};
pub use sinks::{
    emit_best_effort, ComposedSinkError, FallbackSink, LogSink, MemorySink, MulticastSink,
    NonBlockingSink, NullSink, StreamingSink, TelemetrySink,
};

#[cfg(test)]
mod tests {
    // Note: Tests have been moved to submodules (events.rs and sinks.rs)
}