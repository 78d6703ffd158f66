//! In-memory slot/account registry with atomic assignment
//!
//! The registry is the only shared mutable resource in the engine. Every
//! assignment or unassignment updates the slot record and the account record
//! as one unit under a single lock, so no two concurrent allocation requests
//! can bind the same slot twice.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::slot::{
    AccountRecord, AccountStatus, Assignment, Slot, SlotKey, SlotStatus,
};

/// Registry-level failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("slot not found: {0}")]
    SlotNotFound(SlotKey),

    #[error("slot {0} is not available (status {1:?})")]
    SlotUnavailable(SlotKey, SlotStatus),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("account {0} is already assigned to {1}")]
    AccountAlreadyAssigned(String, SlotKey),
}

#[derive(Debug, Default)]
struct RegistryInner {
    slots: HashMap<SlotKey, Slot>,
    accounts: HashMap<String, AccountRecord>,
}

/// Point-in-time view used for allocation planning. One snapshot is taken
/// per allocation call; strategies never query the registry mid-plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Slots currently free to take an occupant.
    pub available_slots: Vec<Slot>,
    /// Occupied slot count per device.
    pub device_load: HashMap<String, u32>,
    /// Usable slot count per device (excludes broken/maintenance).
    pub device_capacity: HashMap<String, u32>,
}

/// Thread-safe in-memory slot/account store.
#[derive(Debug, Default)]
pub struct SlotRegistry {
    inner: Mutex<RegistryInner>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device with `slot_count` available slots (numbered from 1).
    pub fn add_device(&self, device_id: &str, slot_count: u32) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for slot_number in 1..=slot_count {
            let key = SlotKey::new(device_id, slot_number);
            inner.slots.entry(key.clone()).or_insert_with(|| Slot::available(key));
        }
    }

    /// Register a managed account if not already known.
    pub fn upsert_account(&self, account_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .accounts
            .entry(account_id.to_string())
            .or_insert_with(|| AccountRecord::unassigned(account_id));
    }

    /// Force a slot's status (maintenance, broken, repaired...).
    pub fn set_slot_status(&self, key: &SlotKey, status: SlotStatus) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let slot = inner
            .slots
            .get_mut(key)
            .ok_or_else(|| RegistryError::SlotNotFound(key.clone()))?;
        slot.status = status;
        Ok(())
    }

    /// Atomically bind one account to one slot.
    pub fn assign(&self, account_id: &str, key: &SlotKey) -> Result<Assignment, RegistryError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::assign_locked(&mut inner, account_id, key)
    }

    /// Atomically commit a full set of pairings: either every pairing is
    /// applied, or none are and the first validation failure is returned.
    pub fn assign_many(
        &self,
        pairings: &[(String, SlotKey)],
    ) -> Result<Vec<Assignment>, RegistryError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        // Validate everything up front so a failure leaves no partial state.
        for (account_id, key) in pairings {
            let slot = inner
                .slots
                .get(key)
                .ok_or_else(|| RegistryError::SlotNotFound(key.clone()))?;
            if slot.status != SlotStatus::Available || slot.occupant.is_some() {
                return Err(RegistryError::SlotUnavailable(key.clone(), slot.status));
            }
            if let Some(account) = inner.accounts.get(account_id) {
                if let Some(existing) = &account.slot {
                    return Err(RegistryError::AccountAlreadyAssigned(
                        account_id.clone(),
                        existing.clone(),
                    ));
                }
            }
        }

        let mut assignments = Vec::with_capacity(pairings.len());
        for (account_id, key) in pairings {
            assignments.push(Self::assign_locked(&mut inner, account_id, key)?);
        }
        Ok(assignments)
    }

    /// Atomically release a slot, restoring slot and account to their
    /// unassigned state.
    pub fn unassign(&self, key: &SlotKey) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let slot = inner
            .slots
            .get_mut(key)
            .ok_or_else(|| RegistryError::SlotNotFound(key.clone()))?;

        let occupant = slot.occupant.take();
        slot.status = SlotStatus::Available;

        if let Some(account_id) = occupant {
            if let Some(account) = inner.accounts.get_mut(&account_id) {
                account.status = AccountStatus::Unassigned;
                account.slot = None;
            }
            tracing::info!("🔓 Unassigned {account_id} from {key}");
        }
        Ok(())
    }

    /// One consistent view of free slots, per-device load, and capacity.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut available_slots = Vec::new();
        let mut device_load: HashMap<String, u32> = HashMap::new();
        let mut device_capacity: HashMap<String, u32> = HashMap::new();

        for slot in inner.slots.values() {
            if slot.status.is_usable() {
                *device_capacity.entry(slot.key.device_id.clone()).or_insert(0) += 1;
            }
            if slot.status.is_occupied() {
                *device_load.entry(slot.key.device_id.clone()).or_insert(0) += 1;
            }
            if slot.status == SlotStatus::Available && slot.occupant.is_none() {
                available_slots.push(slot.clone());
            }
        }

        available_slots.sort_by(|a, b| a.key.cmp(&b.key));
        RegistrySnapshot {
            available_slots,
            device_load,
            device_capacity,
        }
    }

    pub fn slot(&self, key: &SlotKey) -> Option<Slot> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.slots.get(key).cloned()
    }

    pub fn account(&self, account_id: &str) -> Option<AccountRecord> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.accounts.get(account_id).cloned()
    }

    fn assign_locked(
        inner: &mut RegistryInner,
        account_id: &str,
        key: &SlotKey,
    ) -> Result<Assignment, RegistryError> {
        let slot = inner
            .slots
            .get(key)
            .ok_or_else(|| RegistryError::SlotNotFound(key.clone()))?;
        if slot.status != SlotStatus::Available || slot.occupant.is_some() {
            return Err(RegistryError::SlotUnavailable(key.clone(), slot.status));
        }

        let account = inner
            .accounts
            .entry(account_id.to_string())
            .or_insert_with(|| AccountRecord::unassigned(account_id));
        if let Some(existing) = &account.slot {
            return Err(RegistryError::AccountAlreadyAssigned(
                account_id.to_string(),
                existing.clone(),
            ));
        }
        account.status = AccountStatus::Assigned;
        account.slot = Some(key.clone());

        if let Some(slot) = inner.slots.get_mut(key) {
            slot.status = SlotStatus::Assigned;
            slot.occupant = Some(account_id.to_string());
        }

        tracing::info!("🔗 Assigned {account_id} to {key}");
        Ok(Assignment {
            account_id: account_id.to_string(),
            slot: key.clone(),
            assigned_at: Utc::now(),
        })
    }
}
