//! Device clone slots and account assignment entities
//!
//! A slot ("clone") is one schedulable execution context on a device. It
//! holds at most one managed account at a time; that occupancy rule is the
//! central allocator invariant and is enforced by the slot registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a clone slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    Available,
    Assigned,
    LoggedIn,
    Broken,
    Maintenance,
}

impl SlotStatus {
    /// Whether the slot currently holds an occupant.
    pub fn is_occupied(self) -> bool {
        matches!(self, SlotStatus::Assigned | SlotStatus::LoggedIn)
    }

    /// Whether the slot counts toward usable device capacity.
    pub fn is_usable(self) -> bool {
        !matches!(self, SlotStatus::Broken | SlotStatus::Maintenance)
    }
}

/// Assignment status of a managed account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccountStatus {
    Unassigned,
    Assigned,
}

/// Identity of one slot: (device id, slot number).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub device_id: String,
    pub slot_number: u32,
}

impl SlotKey {
    pub fn new(device_id: impl Into<String>, slot_number: u32) -> Self {
        Self {
            device_id: device_id.into(),
            slot_number,
        }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.device_id, self.slot_number)
    }
}

/// One clone slot on a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub key: SlotKey,
    pub status: SlotStatus,
    /// Account currently bound to this slot, if any.
    pub occupant: Option<String>,
    pub healthy: bool,
}

impl Slot {
    pub fn available(key: SlotKey) -> Self {
        Self {
            key,
            status: SlotStatus::Available,
            occupant: None,
            healthy: true,
        }
    }
}

/// A managed account known to the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    pub status: AccountStatus,
    pub slot: Option<SlotKey>,
}

impl AccountRecord {
    pub fn unassigned(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: AccountStatus::Unassigned,
            slot: None,
        }
    }
}

/// A committed account-to-slot pairing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub account_id: String,
    pub slot: SlotKey,
    pub assigned_at: DateTime<Utc>,
}
