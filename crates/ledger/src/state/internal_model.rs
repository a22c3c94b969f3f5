//! Registry entity definitions: vaults, gateways, name records, returned
//! names, auctions, primary names.
//!
//! Pure data plus small invariant helpers; all lifecycle logic lives in the
//! sibling `internal_*` modules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use mgn_common::Address;

use crate::epochs::GatewayWeights;
use crate::pricing::DEFAULT_UNDERNAME_LIMIT;

// ============================================================
// VAULTS
// ============================================================

/// A balance under a timed lock. `end_timestamp` None means permanent
/// (never pruned, never instantly withdrawable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    pub balance: u128,
    pub start_timestamp: u64,
    pub end_timestamp: Option<u64>,
}

impl Vault {
    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.end_timestamp, Some(end) if now >= end)
    }
}

// ============================================================
// GATEWAYS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Joined,
    Leaving,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    pub label: String,
    pub note: String,
    pub fqdn: String,
    pub port: u16,
    pub protocol: String,
    /// Transaction id of the gateway's published properties document.
    pub properties: Address,
    pub allow_delegated_staking: bool,
    pub min_delegated_stake: u128,
    /// Share of epoch rewards forwarded to delegates, 0..=100.
    pub delegate_reward_share_ratio: u8,
    /// Compound operator rewards into stake instead of liquid balance.
    pub auto_stake: bool,
}

/// Per-gateway epoch counters, updated at observation intake and at
/// distribution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayStats {
    /// Epochs this gateway was prescribed as an observer.
    pub prescribed_epoch_count: u64,
    /// Prescribed epochs where it actually submitted a report.
    pub observed_epoch_count: u64,
    pub passed_epoch_count: u64,
    pub failed_epoch_count: u64,
    /// Epochs the gateway participated in at all.
    pub total_epoch_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegate {
    pub delegated_stake: u128,
    pub start_timestamp: u64,
    /// Withdrawal vaults keyed by the originating message id.
    pub vaults: BTreeMap<String, Vault>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gateway {
    pub operator_stake: u128,
    /// Invariant: equals the sum of all delegate stakes.
    pub total_delegated_stake: u128,
    pub observer_address: Address,
    pub settings: GatewaySettings,
    pub status: GatewayStatus,
    pub start_timestamp: u64,
    /// Set on leave; the gateway is pruned once this passes.
    pub end_timestamp: Option<u64>,
    pub stats: GatewayStats,
    /// Recomputed at every epoch creation; derived, never authoritative.
    pub weights: GatewayWeights,
    /// Operator withdrawal vaults keyed by the originating message id.
    pub vaults: BTreeMap<String, Vault>,
    pub delegates: BTreeMap<Address, Delegate>,
}

impl Gateway {
    pub fn total_stake(&self) -> u128 {
        self.operator_stake + self.total_delegated_stake
    }

    pub fn is_leaving(&self) -> bool {
        self.status == GatewayStatus::Leaving
    }

    /// Sum of every vaulted balance held under this gateway (operator and
    /// delegate withdrawal vaults).
    pub fn vaulted_balance(&self) -> u128 {
        let operator: u128 = self.vaults.values().map(|v| v.balance).sum();
        let delegates: u128 = self
            .delegates
            .values()
            .flat_map(|d| d.vaults.values())
            .map(|v| v.balance)
            .sum();
        operator + delegates
    }
}

// ============================================================
// NAME RECORDS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Lease,
    Permabuy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// The process controlling resolution for this name.
    pub process_id: Address,
    pub kind: RecordKind,
    pub purchase_price: u128,
    pub start_timestamp: u64,
    /// None for permabuys.
    pub end_timestamp: Option<u64>,
    pub undername_limit: u64,
}

impl Record {
    pub fn new_lease(
        process_id: Address,
        purchase_price: u128,
        start: u64,
        lease_ms: u64,
    ) -> Self {
        Self {
            process_id,
            kind: RecordKind::Lease,
            purchase_price,
            start_timestamp: start,
            end_timestamp: Some(start + lease_ms),
            undername_limit: DEFAULT_UNDERNAME_LIMIT,
        }
    }

    pub fn new_permabuy(process_id: Address, purchase_price: u128, start: u64) -> Self {
        Self {
            process_id,
            kind: RecordKind::Permabuy,
            purchase_price,
            start_timestamp: start,
            end_timestamp: None,
            undername_limit: DEFAULT_UNDERNAME_LIMIT,
        }
    }

    /// Lease has ended but the record is still inside its grace window.
    pub fn in_grace_period(&self, now: u64, grace_ms: u64) -> bool {
        match self.end_timestamp {
            Some(end) => now >= end && now < end + grace_ms,
            None => false,
        }
    }
}

/// A name held back from open registration. `target` None means never
/// purchasable; otherwise only the target may buy it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservedName {
    pub target: Option<Address>,
}

/// A name recently expired out of the registry, repurchasable at a decaying
/// premium until `end_timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnedName {
    pub start_timestamp: u64,
    pub end_timestamp: u64,
    /// The releasing process for released names; None when the name simply
    /// expired.
    pub initiator: Option<Address>,
}

/// A descending-price auction created by `Release-Name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    pub kind: RecordKind,
    pub years: u64,
    pub start_price: u128,
    pub floor_price: u128,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
    pub initiator: Address,
}

impl Auction {
    /// Price decays linearly from `start_price` to `floor_price` over the
    /// auction window.
    pub fn current_price(&self, now: u64) -> u128 {
        crate::pricing::auction_price(
            self.start_price,
            self.floor_price,
            self.start_timestamp,
            self.end_timestamp,
            now,
        )
    }
}

// ============================================================
// PRIMARY NAMES
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryNameRequest {
    pub name: String,
    pub start_timestamp: u64,
}
