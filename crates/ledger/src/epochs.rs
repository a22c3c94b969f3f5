//! Epoch engine: timeline math, observer weighting, and the epoch record
//! types.
//!
//! Everything here is pure; the state transitions (lazy creation,
//! observation intake, distribution) live in `state/internal_epochs.rs`.
//!
//! Per-index lifecycle: none -> created -> observed (0..n) -> distributed
//! -> pruned. All timestamps derive from the epoch-zero start and the fixed
//! duration; nothing reads a clock.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use mgn_common::Address;

use crate::tokenomics::MS_PER_DAY;

/// One epoch per day.
pub const DEFAULT_EPOCH_DURATION_MS: u64 = MS_PER_DAY;

/// Observations may still arrive for a short window after the epoch ends;
/// distribution happens at end + this delay.
pub const DEFAULT_DISTRIBUTION_DELAY_MS: u64 = 40 * 60 * 1000;

/// At most this many gateways are prescribed as observers per epoch.
pub const DEFAULT_MAX_PRESCRIBED_OBSERVERS: usize = 50;

/// Active names sampled per epoch for observation duty.
pub const DEFAULT_PRESCRIBED_NAMES: usize = 5;

/// Distributed epochs older than this many epochs are pruned.
pub const DEFAULT_EPOCH_RETENTION: u64 = 14;

/// Tenure weight grows by 1 per this much continuous membership...
pub const TENURE_PERIOD_MS: u64 = 180 * MS_PER_DAY;

/// ...capped here.
pub const MAX_TENURE_WEIGHT: f64 = 4.0;

// ============================================================
// SETTINGS & TIMELINE
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSettings {
    /// Start of epoch 0; fixed at genesis.
    pub epoch_zero_start: u64,
    pub duration_ms: u64,
    pub distribution_delay_ms: u64,
    pub max_prescribed_observers: usize,
    pub prescribed_names_count: usize,
    pub retention_epochs: u64,
}

impl EpochSettings {
    pub fn new(epoch_zero_start: u64) -> Self {
        Self {
            epoch_zero_start,
            duration_ms: DEFAULT_EPOCH_DURATION_MS,
            distribution_delay_ms: DEFAULT_DISTRIBUTION_DELAY_MS,
            max_prescribed_observers: DEFAULT_MAX_PRESCRIBED_OBSERVERS,
            prescribed_names_count: DEFAULT_PRESCRIBED_NAMES,
            retention_epochs: DEFAULT_EPOCH_RETENTION,
        }
    }

    /// Epoch index containing `now`; None before epoch zero starts.
    pub fn index_at(&self, now: u64) -> Option<u64> {
        if now < self.epoch_zero_start {
            return None;
        }
        Some((now - self.epoch_zero_start) / self.duration_ms)
    }

    pub fn start_of(&self, index: u64) -> u64 {
        self.epoch_zero_start + index * self.duration_ms
    }

    pub fn end_of(&self, index: u64) -> u64 {
        self.start_of(index) + self.duration_ms
    }

    pub fn distribution_of(&self, index: u64) -> u64 {
        self.end_of(index) + self.distribution_delay_ms
    }
}

// ============================================================
// WEIGHTS
// ============================================================

/// Composite selection/reward weights, recomputed for every gateway at
/// epoch creation. Derived state: never authoritative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayWeights {
    /// Total stake (operator + delegated) over the network minimum.
    pub stake_weight: f64,
    /// Continuous-membership weight, fractional tenure periods, capped.
    pub tenure_weight: f64,
    /// Passed epochs over participated epochs.
    pub gateway_performance_ratio: f64,
    /// Submitted observations over prescribed duties.
    pub observer_performance_ratio: f64,
    /// Product of the four factors above.
    pub composite_weight: f64,
    /// Composite weight normalized to sum 1 over the prescribed set.
    pub normalized_composite_weight: f64,
}

/// Tenure weight for a gateway that joined at `start`: elapsed tenure
/// periods (fractional), capped.
pub fn tenure_weight(start: u64, now: u64) -> f64 {
    if now <= start {
        return 0.0;
    }
    let elapsed = (now - start) as f64 / TENURE_PERIOD_MS as f64;
    elapsed.min(MAX_TENURE_WEIGHT)
}

/// Pass/participation ratio; a gateway with no history yet counts as 1.0 so
/// newcomers are selectable.
pub fn performance_ratio(passed: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        passed as f64 / total as f64
    }
}

/// Normalize composite weights to sum 1 over a prescribed set.
pub fn normalize_composite(observers: &mut [PrescribedObserver]) {
    let sum: f64 = observers.iter().map(|o| o.weights.composite_weight).sum();
    for o in observers.iter_mut() {
        o.weights.normalized_composite_weight = if sum > 0.0 {
            o.weights.composite_weight / sum
        } else {
            0.0
        };
    }
}

/// A gateway fails the epoch when more than half of the observers that
/// submitted reports marked it failed.
pub fn gateway_failed(failure_votes: usize, submitted_reports: usize) -> bool {
    submitted_reports > 0 && failure_votes * 2 > submitted_reports
}

// ============================================================
// PRESCRIBED NAME SAMPLE
// ============================================================

/// Deterministic sample of active names for an epoch: order names by
/// sha3-256(epoch index || name) and take the first `count`. Stable across
/// runs, uniform-ish across epochs, no RNG.
pub fn select_prescribed_names<'a, I>(active_names: I, epoch_index: u64, count: usize) -> Vec<String>
where
    I: Iterator<Item = &'a String>,
{
    let mut keyed: Vec<([u8; 32], &'a String)> = active_names
        .map(|name| {
            let mut hasher = Sha3_256::new();
            hasher.update(epoch_index.to_be_bytes());
            hasher.update(name.as_bytes());
            (hasher.finalize().into(), name)
        })
        .collect();
    keyed.sort();
    keyed
        .into_iter()
        .take(count)
        .map(|(_, name)| name.clone())
        .collect()
}

// ============================================================
// EPOCH RECORD
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescribedObserver {
    pub gateway_address: Address,
    pub observer_address: Address,
    pub weights: GatewayWeights,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpochObservations {
    /// Report transaction id per observer address; overwritten on
    /// resubmission.
    pub reports: BTreeMap<Address, String>,
    /// Failed-gateway address -> set of observers that voted it failed.
    pub failure_summaries: BTreeMap<Address, BTreeSet<Address>>,
}

/// Reward accounting: `eligible` is computed at epoch creation from the
/// protocol balance snapshot, `distributed` is filled at payout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpochDistributions {
    pub total_eligible_rewards: u128,
    pub gateway_pool: u128,
    pub observer_pool: u128,
    /// Weight-proportional potential reward per gateway, pre-payout.
    pub eligible_rewards: BTreeMap<Address, u128>,
    pub distributed_timestamp: Option<u64>,
    pub total_distributed: u128,
    /// Actual per-gateway payouts (operator + delegate portions combined).
    pub distributed_rewards: BTreeMap<Address, u128>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epoch {
    pub index: u64,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
    pub distribution_timestamp: u64,
    pub prescribed_observers: Vec<PrescribedObserver>,
    pub prescribed_names: Vec<String>,
    pub observations: EpochObservations,
    pub distributions: EpochDistributions,
}

impl Epoch {
    pub fn is_distributed(&self) -> bool {
        self.distributions.distributed_timestamp.is_some()
    }

    pub fn prescribed_observer_for(&self, observer: &Address) -> Option<&PrescribedObserver> {
        self.prescribed_observers
            .iter()
            .find(|o| &o.observer_address == observer)
    }
}
