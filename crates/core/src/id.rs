//! Identifier newtypes shared by aggregates, events, and commands.
//!
//! Every id wraps a UUIDv7. The v7 layout is time-ordered, so freshly
//! minted ids sort by creation time in the store without a separate
//! sequence column.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_id {
    ($(#[$docs:meta])* $name:ident) => {
        $(#[$docs])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Mint a fresh, time-ordered id. Tests that need stable ids
            /// should build them from a fixed [`Uuid`] instead.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(input: &str) -> Result<Self, Self::Err> {
                match Uuid::from_str(input) {
                    Ok(uuid) => Ok(Self(uuid)),
                    Err(e) => Err(DomainError::validation(format!(
                        concat!("bad ", stringify!($name), ": {}"),
                        e
                    ))),
                }
            }
        }
    };
}

uuid_id! {
    /// Identifier of an aggregate root.
    AggregateId
}

uuid_id! {
    /// Identifier of the user issuing a command (actor identity).
    UserId
}

uuid_id! {
    /// Identifier shared by every event produced in response to one
    /// externally triggered command chain.
    CorrelationId
}
