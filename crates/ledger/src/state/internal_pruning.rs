//! Lazy pruning scheduler.
//!
//! Nothing in the ledger runs on a timer. Instead every mutating request
//! calls `advance_time(now)` before its handler: each domain keeps the
//! minimum timestamp at which it next has work (`PruningTimestamps`), and a
//! domain sweep only runs once `now` reaches that deadline. A `None` slot
//! means the deadline is unknown and forces a sweep, which is how slots
//! self-heal after deserialization or genesis loading.

use serde::{Deserialize, Serialize};

use crate::epochs::Epoch;

use super::State;

/// Per-domain minimum next-deadline. Raised opportunistically by the
/// mutation that created the deadline, recomputed exactly after each sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruningTimestamps {
    pub vaults: Option<u64>,
    pub gateways: Option<u64>,
    pub records: Option<u64>,
    pub returned_names: Option<u64>,
    pub auctions: Option<u64>,
    pub epochs: Option<u64>,
    pub demand: Option<u64>,
}

/// What one `advance_time` tick actually did.
#[derive(Debug, Clone, Default)]
pub struct PruningReport {
    pub vaults_released: u32,
    pub vault_balance_released: u128,
    pub gateway_vaults_released: u32,
    pub gateways_removed: u32,
    pub records_pruned: u32,
    pub returned_names_pruned: u32,
    pub auctions_pruned: u32,
    pub demand_periods_closed: u32,
    /// Epochs paid out by this tick, for distribution notices.
    pub distributed_epochs: Vec<Epoch>,
}

fn due(slot: Option<u64>, now: u64) -> bool {
    slot.map_or(true, |deadline| now >= deadline)
}

fn bump(slot: &mut Option<u64>, deadline: u64) {
    match slot {
        Some(existing) if *existing <= deadline => {}
        _ => *slot = Some(deadline),
    }
}

impl State {
    /// Run every due domain sweep. Called at the top of each mutating
    /// request, before the handler sees the state.
    pub fn advance_time(&mut self, now: u64) -> PruningReport {
        let mut report = PruningReport::default();

        if due(self.pruning.demand, now) {
            report.demand_periods_closed = self.demand.advance(now);
            self.pruning.demand = Some(self.demand.next_period_start());
        }
        if due(self.pruning.epochs, now) {
            report.distributed_epochs = self.tick_epochs(now);
            self.pruning.epochs = self.earliest_epoch_deadline();
        }
        if due(self.pruning.vaults, now) {
            let (released, balance) = self.prune_vaults(now);
            report.vaults_released = released;
            report.vault_balance_released = balance;
            self.pruning.vaults = self.earliest_vault_deadline();
        }
        if due(self.pruning.gateways, now) {
            let (vaults, gateways) = self.prune_gateways(now);
            report.gateway_vaults_released = vaults;
            report.gateways_removed = gateways;
            self.pruning.gateways = self.earliest_gateway_deadline();
        }
        if due(self.pruning.records, now) {
            report.records_pruned = self.prune_records(now);
            self.pruning.records = self.earliest_record_deadline();
            // the record sweep feeds the returned pool
            self.pruning.returned_names = self.earliest_returned_deadline();
        }
        if due(self.pruning.returned_names, now) {
            report.returned_names_pruned = self.prune_returned_names(now);
            self.pruning.returned_names = self.earliest_returned_deadline();
        }
        if due(self.pruning.auctions, now) {
            report.auctions_pruned = self.prune_auctions(now);
            self.pruning.auctions = self.earliest_auction_deadline();
        }
        report
    }

    /// Recompute every slot from scratch. Used after genesis loading.
    pub(crate) fn recompute_pruning(&mut self) {
        self.pruning = PruningTimestamps {
            vaults: self.earliest_vault_deadline(),
            gateways: self.earliest_gateway_deadline(),
            records: self.earliest_record_deadline(),
            returned_names: self.earliest_returned_deadline(),
            auctions: self.earliest_auction_deadline(),
            epochs: self.earliest_epoch_deadline(),
            demand: Some(self.demand.next_period_start()),
        };
    }

    pub(crate) fn bump_vault_deadline(&mut self, deadline: u64) {
        bump(&mut self.pruning.vaults, deadline);
    }

    pub(crate) fn recompute_vault_deadline(&mut self) {
        self.pruning.vaults = self.earliest_vault_deadline();
    }

    pub(crate) fn bump_gateway_deadline(&mut self, deadline: u64) {
        bump(&mut self.pruning.gateways, deadline);
    }

    pub(crate) fn bump_record_deadline(&mut self, deadline: u64) {
        bump(&mut self.pruning.records, deadline);
    }

    pub(crate) fn recompute_record_deadline(&mut self) {
        self.pruning.records = self.earliest_record_deadline();
    }

    pub(crate) fn bump_auction_deadline(&mut self, deadline: u64) {
        bump(&mut self.pruning.auctions, deadline);
    }

    pub(crate) fn recompute_auction_deadline(&mut self) {
        self.pruning.auctions = self.earliest_auction_deadline();
    }

    pub(crate) fn recompute_returned_deadline(&mut self) {
        self.pruning.returned_names = self.earliest_returned_deadline();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_only_lowers() {
        let mut slot = None;
        bump(&mut slot, 100);
        assert_eq!(slot, Some(100));
        bump(&mut slot, 200);
        assert_eq!(slot, Some(100));
        bump(&mut slot, 50);
        assert_eq!(slot, Some(50));
    }

    #[test]
    fn test_none_slot_is_always_due() {
        assert!(due(None, 0));
        assert!(!due(Some(10), 9));
        assert!(due(Some(10), 10));
    }
}
