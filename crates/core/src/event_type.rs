//! Closed registry of event kinds.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Kind of a domain event.
///
/// The set is fixed at compile time; new kinds are added as new variants with a
/// fresh integer tag. Tags are stable and are what routing tables carry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum EventType {
    WalletCredited = 1,
    WalletDebited = 2,

    AccountCreated = 3,
    AccountUpdated = 4,
    AccountDeleted = 5,
}

impl EventType {
    /// Every known type, in tag order.
    pub const ALL: [EventType; 5] = [
        EventType::WalletCredited,
        EventType::WalletDebited,
        EventType::AccountCreated,
        EventType::AccountUpdated,
        EventType::AccountDeleted,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            EventType::WalletCredited => "WalletCredited",
            EventType::WalletDebited => "WalletDebited",
            EventType::AccountCreated => "AccountCreated",
            EventType::AccountUpdated => "AccountUpdated",
            EventType::AccountDeleted => "AccountDeleted",
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<EventType> for u8 {
    fn from(value: EventType) -> Self {
        value.code()
    }
}

impl TryFrom<u8> for EventType {
    type Error = DomainError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        EventType::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or(DomainError::UnknownEventType(code))
    }
}
