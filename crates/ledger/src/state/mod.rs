//! # Ledger State Module
//!
//! Facade for the single in-memory state tree of the MGN ledger process.
//! `State` owns every registry; there are no globals and no external
//! mutation path. `impl State` is split across focused internal modules,
//! all private and reachable only through `State` methods.
//!
//! | Module | Contents |
//! |--------|----------|
//! | `internal_model` | Entity structs: Vault, Gateway, Record, ReturnedName, Auction |
//! | `internal_balances` | Liquid balance ops: transfer, credit/debit, dirty tracking |
//! | `internal_vaults` | Time-locked vaults: create, extend, increase, instant withdraw |
//! | `internal_gateways` | Gateway lifecycle: join/leave, staking, delegation, settings |
//! | `internal_records` | Name registry: buy, extend, undernames, release, pricing |
//! | `internal_primary` | Primary-name requests and approvals |
//! | `internal_epochs` | Epoch creation, observation intake, reward distribution |
//! | `internal_pruning` | Lazy deadline tracking and `advance_time` sweeps |
//!
//! Supply invariant (checked in tests after every scenario): liquid
//! balances + vault balances + stakes + delegated stakes + withdrawal
//! vaults + protocol balance == `TOTAL_SUPPLY`, always.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use mgn_common::Address;

use crate::demand::DemandFactorState;
use crate::epochs::{Epoch, EpochSettings};

mod internal_model;

mod internal_balances;
mod internal_epochs;
mod internal_gateways;
mod internal_primary;
mod internal_pruning;
mod internal_records;
mod internal_vaults;

#[cfg(test)]
mod tests;

pub use internal_balances::TransferOutcome;
pub use internal_gateways::{GatewaySettingsUpdate, JoinNetworkParams, StakeDecreaseOutcome};
pub use internal_model::{
    Auction, Delegate, Gateway, GatewaySettings, GatewayStats, GatewayStatus, PrimaryNameRequest,
    Record, RecordKind, ReservedName, ReturnedName, Vault,
};
pub use internal_pruning::{PruningReport, PruningTimestamps};
pub use internal_records::{CostIntent, PurchaseReceipt};
pub use internal_vaults::InstantWithdrawal;

/// The whole ledger: one owned tree, mutated only by the request currently
/// executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    // ════════════════════════════════════════════════════════════════
    // TOKEN LEDGER
    // ════════════════════════════════════════════════════════════════
    /// Liquid balance per address, uMERI.
    pub balances: BTreeMap<Address, u128>,
    /// The protocol's own balance: receives fees and penalties, funds
    /// epoch rewards.
    pub protocol_balance: u128,
    /// Time-locked vaults: owner -> vault id (originating message id) ->
    /// vault.
    pub vaults: BTreeMap<Address, BTreeMap<String, Vault>>,

    // ════════════════════════════════════════════════════════════════
    // GATEWAY REGISTRY
    // ════════════════════════════════════════════════════════════════
    pub gateways: BTreeMap<Address, Gateway>,

    // ════════════════════════════════════════════════════════════════
    // NAME REGISTRY
    // ════════════════════════════════════════════════════════════════
    /// Active records keyed by lowercased name.
    pub records: BTreeMap<String, Record>,
    pub reserved_names: BTreeMap<String, ReservedName>,
    pub returned_names: BTreeMap<String, ReturnedName>,
    pub auctions: BTreeMap<String, Auction>,
    /// owner -> primary name; kept in lockstep with `primary_name_owners`.
    pub primary_names: BTreeMap<Address, String>,
    /// name -> owner reverse index.
    pub primary_name_owners: BTreeMap<String, Address>,
    pub primary_name_requests: BTreeMap<Address, PrimaryNameRequest>,

    // ════════════════════════════════════════════════════════════════
    // EPOCHS & CONTROLLERS
    // ════════════════════════════════════════════════════════════════
    pub epochs: BTreeMap<u64, Epoch>,
    pub epoch_settings: EpochSettings,
    pub demand: DemandFactorState,
    pub pruning: PruningTimestamps,

    /// Addresses whose balance changed during the current request; drained
    /// into the response for the boundary's balance-patch notifications.
    #[serde(skip)]
    pub dirty_balances: BTreeSet<Address>,
}

impl State {
    /// Empty state with the full supply in the protocol balance. Genesis
    /// loading (`genesis.rs`) carves initial balances out of this.
    pub fn new(genesis_timestamp: u64) -> Self {
        Self {
            balances: BTreeMap::new(),
            protocol_balance: crate::tokenomics::TOTAL_SUPPLY,
            vaults: BTreeMap::new(),
            gateways: BTreeMap::new(),
            records: BTreeMap::new(),
            reserved_names: BTreeMap::new(),
            returned_names: BTreeMap::new(),
            auctions: BTreeMap::new(),
            primary_names: BTreeMap::new(),
            primary_name_owners: BTreeMap::new(),
            primary_name_requests: BTreeMap::new(),
            epochs: BTreeMap::new(),
            epoch_settings: EpochSettings::new(genesis_timestamp),
            demand: DemandFactorState::new(genesis_timestamp),
            pruning: PruningTimestamps::default(),
            dirty_balances: BTreeSet::new(),
        }
    }

    // ════════════════════════════════════════════════════════════════
    // SUPPLY ACCOUNTING
    // ════════════════════════════════════════════════════════════════

    pub fn total_liquid(&self) -> u128 {
        self.balances.values().sum()
    }

    /// Balances locked in ledger vaults (gateway withdrawal vaults counted
    /// under `total_withdrawal_vaulted`).
    pub fn total_vaulted(&self) -> u128 {
        self.vaults
            .values()
            .flat_map(|m| m.values())
            .map(|v| v.balance)
            .sum()
    }

    pub fn total_operator_staked(&self) -> u128 {
        self.gateways.values().map(|g| g.operator_stake).sum()
    }

    pub fn total_delegated_staked(&self) -> u128 {
        self.gateways.values().map(|g| g.total_delegated_stake).sum()
    }

    pub fn total_withdrawal_vaulted(&self) -> u128 {
        self.gateways.values().map(|g| g.vaulted_balance()).sum()
    }

    /// Sum of every token position; must equal `TOTAL_SUPPLY` in all
    /// reachable states.
    pub fn total_accounted_supply(&self) -> u128 {
        self.total_liquid()
            + self.total_vaulted()
            + self.total_operator_staked()
            + self.total_delegated_staked()
            + self.total_withdrawal_vaulted()
            + self.protocol_balance
    }
}
