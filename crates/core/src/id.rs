//! Opaque byte identifiers for events and aggregates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a single event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Vec<u8>);

/// Identifier of the aggregate an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Vec<u8>);

macro_rules! impl_bytes_newtype {
    ($t:ty) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses the bytes of a UUIDv7 (time-ordered). Prefer passing IDs
            /// explicitly in tests for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7().as_bytes().to_vec())
            }

            pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
                Self(bytes.into())
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn into_bytes(self) -> Vec<u8> {
                self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl AsRef<[u8]> for $t {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<Vec<u8>> for $t {
            fn from(value: Vec<u8>) -> Self {
                Self(value)
            }
        }

        impl From<&[u8]> for $t {
            fn from(value: &[u8]) -> Self {
                Self(value.to_vec())
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value.as_bytes().to_vec())
            }
        }
    };
}

impl_bytes_newtype!(EventId);
impl_bytes_newtype!(AggregateId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_distinct() {
        assert_ne!(EventId::new(), EventId::new());
        assert_eq!(AggregateId::new().as_bytes().len(), 16);
    }

    #[test]
    fn bytes_round_trip_through_the_newtype() {
        let raw = b"acct-42".to_vec();
        let id = AggregateId::from_bytes(raw.clone());
        assert_eq!(id.as_bytes(), raw.as_slice());
        assert_eq!(id.into_bytes(), raw);
    }

    #[test]
    fn display_is_lowercase_hex() {
        let id = EventId::from_bytes(vec![0x00, 0xab, 0x10]);
        assert_eq!(id.to_string(), "00ab10");
    }
}
