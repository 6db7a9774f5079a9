//! Strongly Typed Identifiers
//!
//! Newtype wrappers around [`Uuid`] for the identifiers that flow through
//! the sync engine. Using distinct types prevents accidental misuse of
//! different ID kinds at compile time.
//!
//! # Example
//!
//! ```
//! use pipesync_core::{AggregateId, SyncErrorId};
//!
//! fn requires_aggregate(id: AggregateId) -> String {
//!     id.to_string()
//! }
//!
//! let aggregate = AggregateId::new();
//! let result = requires_aggregate(aggregate);
//! // requires_aggregate(SyncErrorId::new()); // does not compile
//! # let _ = result;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for ID parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The underlying UUID parse error message.
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to define a strongly-typed ID type.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        message: e.to_string(),
                    })
            }
        }
    };
}

define_id!(
    /// Identifier correlating one orchestration run with the request that
    /// triggered it. Carried on the terminal aggregate sync event.
    AggregateId
);

define_id!(
    /// Identifier of a persisted sync error ledger entry.
    SyncErrorId
);

define_id!(
    /// Identifier of a locally stored webhook registration.
    RegistrationId
);

define_id!(
    /// Identifier of a queued unit of sync work.
    TaskId
);
