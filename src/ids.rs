//! Opaque identifiers and wall-clock timestamps.
//!
//! IDs are collision-resistant (UUIDv4) and never parsed for structure by
//! callers; they are compared, hashed, and displayed, nothing else.

use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            /// Mint a fresh, random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing value, e.g. one loaded from a persisted record.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

opaque_id!(
    /// Identifies one registered instance of a service.
    InstanceId
);
opaque_id!(
    /// Identifies a DR site.
    SiteId
);
opaque_id!(
    /// Identifies a backup plan.
    BackupPlanId
);
opaque_id!(
    /// Identifies one run of a backup plan.
    BackupExecutionId
);
opaque_id!(
    /// Identifies a failover sequence definition.
    FailoverSequenceId
);
opaque_id!(
    /// Identifies one run of a failover sequence.
    FailoverExecutionId
);
opaque_id!(
    /// Identifies a disaster event.
    DisasterEventId
);

/// A service's logical name, e.g. `"eligibility"`. Distinct from [`InstanceId`]
/// so registry keys read as `(ServiceName, InstanceId)` rather than two bare
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Wall-clock "now", in milliseconds since the Unix epoch. Used only for
/// values that get persisted or displayed to an operator; all internal
/// interval math uses [`crate::Clock`].
pub fn wall_now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
