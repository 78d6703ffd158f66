//! Slot allocation strategies
//!
//! Maps unassigned accounts onto free clone slots under one of five
//! strategies. Planning is pure over a single registry snapshot taken at the
//! start of the call; the resulting pairings are committed atomically, so an
//! allocation either fully applies or not at all.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::registry::{RegistryError, RegistrySnapshot, SlotRegistry};
use crate::domain::slot::{Assignment, Slot, SlotKey};
use crate::utils::SharedRng;

/// The algorithm used to map accounts to slots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AllocationStrategy {
    RoundRobin,
    FillFirst,
    CapacityBased,
    BalancedLoad,
    OptimalDistribution,
}

impl std::str::FromStr for AllocationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(AllocationStrategy::RoundRobin),
            "fill-first" => Ok(AllocationStrategy::FillFirst),
            "capacity-based" => Ok(AllocationStrategy::CapacityBased),
            "balanced-load" => Ok(AllocationStrategy::BalancedLoad),
            "optimal-distribution" => Ok(AllocationStrategy::OptimalDistribution),
            other => Err(format!("unknown allocation strategy: {other}")),
        }
    }
}

/// One allocation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub account_ids: Vec<String>,
    pub strategy: AllocationStrategy,
    /// When non-empty, only these devices are considered.
    pub preferred_devices: Vec<String>,
    pub excluded_devices: Vec<String>,
    /// Cap on total occupancy per device (existing load counts).
    pub max_per_device: Option<u32>,
    /// Permit assigning fewer accounts than requested when capacity is short.
    pub allow_partial: bool,
}

impl AllocationRequest {
    pub fn new(account_ids: Vec<String>, strategy: AllocationStrategy) -> Self {
        Self {
            account_ids,
            strategy,
            preferred_devices: Vec::new(),
            excluded_devices: Vec::new(),
            max_per_device: None,
            allow_partial: false,
        }
    }
}

/// Result of a committed allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub assignments: Vec<Assignment>,
    /// Accounts left unassigned when partial assignment was permitted.
    pub shortfall: u32,
}

/// Synchronous, session-independent allocation failures.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("insufficient capacity: requested {requested} assignments but only {available} eligible slot(s) available")]
    InsufficientCapacity { requested: usize, available: usize },

    #[error("no eligible devices remain after applying device filters")]
    NoEligibleDevices,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Assigns accounts to slots against the shared registry.
#[derive(Debug)]
pub struct SlotAllocator {
    registry: Arc<SlotRegistry>,
    rng: SharedRng,
}

impl SlotAllocator {
    pub fn new(registry: Arc<SlotRegistry>, rng: SharedRng) -> Self {
        Self { registry, rng }
    }

    /// Plan and atomically commit assignments for the request.
    pub fn allocate(&self, request: &AllocationRequest) -> Result<AllocationOutcome, AllocationError> {
        let snapshot = self.registry.snapshot();
        let candidates = self.filter_candidates(request, &snapshot)?;

        let requested = request.account_ids.len();
        let available = candidates.len();
        let accounts: &[String] = if available < requested {
            if !request.allow_partial || available == 0 {
                return Err(AllocationError::InsufficientCapacity {
                    requested,
                    available,
                });
            }
            tracing::warn!(
                "⚠️ Partial allocation: {available} of {requested} accounts will be assigned"
            );
            &request.account_ids[..available]
        } else {
            &request.account_ids
        };

        let pairings = match request.strategy {
            AllocationStrategy::RoundRobin => plan_round_robin(accounts, &candidates),
            AllocationStrategy::FillFirst => plan_fill_first(accounts, &candidates),
            AllocationStrategy::CapacityBased => plan_capacity_based(accounts, &candidates),
            AllocationStrategy::BalancedLoad => {
                plan_balanced_load(accounts, &candidates, &snapshot.device_load)
            }
            AllocationStrategy::OptimalDistribution => plan_optimal_distribution(
                accounts,
                &candidates,
                &snapshot.device_load,
                &snapshot.device_capacity,
                &self.rng,
            ),
        };

        let assignments = self.registry.assign_many(&pairings)?;
        let shortfall = (requested - assignments.len()) as u32;
        tracing::info!(
            "📦 Allocated {} slot(s) via {:?} (shortfall {shortfall})",
            assignments.len(),
            request.strategy
        );
        Ok(AllocationOutcome {
            assignments,
            shortfall,
        })
    }

    /// Apply device include/exclude filters and the per-device cap to the
    /// snapshot's free slots.
    fn filter_candidates(
        &self,
        request: &AllocationRequest,
        snapshot: &RegistrySnapshot,
    ) -> Result<Vec<Slot>, AllocationError> {
        let mut slots: Vec<Slot> = snapshot
            .available_slots
            .iter()
            .filter(|s| {
                let dev = &s.key.device_id;
                let included = request.preferred_devices.is_empty()
                    || request.preferred_devices.contains(dev);
                included && !request.excluded_devices.contains(dev)
            })
            .cloned()
            .collect();

        if slots.is_empty() {
            // Distinguish "filters removed everything" from plain shortage.
            let had_filters = !request.preferred_devices.is_empty()
                || !request.excluded_devices.is_empty();
            if had_filters && !snapshot.available_slots.is_empty() {
                return Err(AllocationError::NoEligibleDevices);
            }
        }

        if let Some(cap) = request.max_per_device {
            let mut kept_per_device: HashMap<String, u32> = HashMap::new();
            slots.retain(|s| {
                let dev = s.key.device_id.clone();
                let existing = snapshot.device_load.get(&dev).copied().unwrap_or(0);
                let kept = kept_per_device.entry(dev).or_insert(0);
                if existing + *kept < cap {
                    *kept += 1;
                    true
                } else {
                    false
                }
            });
        }

        Ok(slots)
    }
}

/// Visit devices in a fixed cyclic order, taking one slot per visit. The
/// cursor advances on every visit whether or not the device still has a
/// free slot.
fn plan_round_robin(accounts: &[String], slots: &[Slot]) -> Vec<(String, SlotKey)> {
    let mut per_device: BTreeMap<&str, Vec<&SlotKey>> = BTreeMap::new();
    for slot in slots {
        per_device
            .entry(slot.key.device_id.as_str())
            .or_default()
            .push(&slot.key);
    }
    for queue in per_device.values_mut() {
        queue.sort();
        queue.reverse(); // pop() yields the lowest slot number first
    }

    let devices: Vec<&str> = per_device.keys().copied().collect();
    let mut pairings = Vec::with_capacity(accounts.len());
    let mut cursor = 0usize;
    let mut accounts_iter = accounts.iter();
    let mut next_account = accounts_iter.next();

    while next_account.is_some() && per_device.values().any(|q| !q.is_empty()) {
        let device = devices[cursor % devices.len()];
        if let Some(queue) = per_device.get_mut(device) {
            if let Some(key) = queue.pop() {
                if let Some(account) = next_account {
                    pairings.push((account.clone(), key.clone()));
                }
                next_account = accounts_iter.next();
            }
        }
        cursor += 1;
    }
    pairings
}

/// Pair accounts to slots positionally in (device id, slot number) order.
fn plan_fill_first(accounts: &[String], slots: &[Slot]) -> Vec<(String, SlotKey)> {
    let mut sorted: Vec<&SlotKey> = slots.iter().map(|s| &s.key).collect();
    sorted.sort();
    accounts
        .iter()
        .zip(sorted)
        .map(|(account, key)| (account.clone(), key.clone()))
        .collect()
}

/// Drain the device with the most free slots first, ties broken by device id.
fn plan_capacity_based(accounts: &[String], slots: &[Slot]) -> Vec<(String, SlotKey)> {
    let mut per_device: BTreeMap<&str, Vec<&SlotKey>> = BTreeMap::new();
    for slot in slots {
        per_device
            .entry(slot.key.device_id.as_str())
            .or_default()
            .push(&slot.key);
    }

    let mut devices: Vec<(&str, Vec<&SlotKey>)> = per_device.into_iter().collect();
    devices.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(b.0)));

    let mut ordered = Vec::with_capacity(slots.len());
    for (_, mut keys) in devices {
        keys.sort();
        ordered.extend(keys);
    }

    accounts
        .iter()
        .zip(ordered)
        .map(|(account, key)| (account.clone(), key.clone()))
        .collect()
}

/// Always give the next account to the device with the lowest current load.
fn plan_balanced_load(
    accounts: &[String],
    slots: &[Slot],
    device_load: &HashMap<String, u32>,
) -> Vec<(String, SlotKey)> {
    let mut per_device: BTreeMap<&str, Vec<&SlotKey>> = BTreeMap::new();
    for slot in slots {
        per_device
            .entry(slot.key.device_id.as_str())
            .or_default()
            .push(&slot.key);
    }
    for queue in per_device.values_mut() {
        queue.sort();
        queue.reverse();
    }

    let mut loads: Vec<(u32, &str)> = per_device
        .keys()
        .map(|dev| (device_load.get(*dev).copied().unwrap_or(0), *dev))
        .collect();

    let mut pairings = Vec::with_capacity(accounts.len());
    for account in accounts {
        loads.sort(); // keyed by (load, device id)
        let Some(position) = loads
            .iter()
            .position(|(_, dev)| per_device.get(dev).is_some_and(|q| !q.is_empty()))
        else {
            break;
        };
        let (load, dev) = loads[position];
        if let Some(key) = per_device.get_mut(dev).and_then(|q| q.pop()) {
            pairings.push((account.clone(), key.clone()));
        }
        loads[position] = (load + 1, dev);
    }
    pairings
}

/// Weighted-random device selection proportional to remaining efficiency,
/// (capacity - usage) / capacity, recomputed after each pairing.
fn plan_optimal_distribution(
    accounts: &[String],
    slots: &[Slot],
    device_load: &HashMap<String, u32>,
    device_capacity: &HashMap<String, u32>,
    rng: &SharedRng,
) -> Vec<(String, SlotKey)> {
    let mut per_device: BTreeMap<&str, Vec<&SlotKey>> = BTreeMap::new();
    for slot in slots {
        per_device
            .entry(slot.key.device_id.as_str())
            .or_default()
            .push(&slot.key);
    }
    for queue in per_device.values_mut() {
        queue.sort();
        queue.reverse();
    }

    let mut usage: HashMap<&str, u32> = per_device
        .keys()
        .map(|dev| (*dev, device_load.get(*dev).copied().unwrap_or(0)))
        .collect();

    let mut pairings = Vec::with_capacity(accounts.len());
    for account in accounts {
        let weighted: Vec<(&str, f64)> = per_device
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(dev, _)| {
                let capacity = device_capacity.get(*dev).copied().unwrap_or(0).max(1);
                let used = usage.get(dev).copied().unwrap_or(0).min(capacity);
                let efficiency = f64::from(capacity - used) / f64::from(capacity);
                (*dev, efficiency)
            })
            .collect();
        if weighted.is_empty() {
            break;
        }

        let total: f64 = weighted.iter().map(|(_, e)| e).sum();
        let chosen = if total <= f64::EPSILON {
            weighted[0].0
        } else {
            let mut draw = rng.f64() * total;
            let mut selected = weighted[weighted.len() - 1].0;
            for (dev, efficiency) in &weighted {
                if draw < *efficiency {
                    selected = dev;
                    break;
                }
                draw -= efficiency;
            }
            selected
        };

        if let Some(key) = per_device.get_mut(chosen).and_then(|q| q.pop()) {
            pairings.push((account.clone(), key.clone()));
            *usage.entry(chosen).or_insert(0) += 1;
        }
    }
    pairings
}
