//! Name registry: purchases, lease extensions, undername limits, releases,
//! and the pricing entry point shared with the `Token-Cost` read.
//!
//! Every paid operation routes its fee to the protocol balance and records
//! the revenue into the demand controller. Price composition order is
//! fixed: formula price, then demand factor, then (for returned names) the
//! decaying premium. Auctioned names bypass all of that and settle at the
//! auction's current price, on the released record's kind and years.

use serde::{Deserialize, Serialize};

use mgn_common::Address;

use crate::error::{bail_conflict, bail_validation, Result};
use crate::pricing::{
    self, apply_demand_factor, base_fee, returned_name_multiplier, validate_name,
    AUCTION_DURATION_MS, AUCTION_START_MULTIPLIER, GRACE_PERIOD_MS, MAX_LEASE_YEARS,
    MAX_UNDERNAME_LIMIT, MS_PER_YEAR, RETURNED_NAME_PERIOD_MS,
};

use super::{Auction, Record, RecordKind, ReturnedName, State};

/// A priced operation, for `Token-Cost` queries and internal reuse.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "intent", rename_all = "kebab-case")]
pub enum CostIntent {
    BuyRecord {
        name: String,
        kind: RecordKind,
        #[serde(default)]
        years: u64,
    },
    ExtendLease {
        name: String,
        years: u64,
    },
    IncreaseUndernameLimit {
        name: String,
        quantity: u64,
    },
}

/// Response data for a successful `Buy-Record`.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub name: String,
    pub kind: RecordKind,
    pub purchase_price: u128,
    pub start_timestamp: u64,
    pub end_timestamp: Option<u64>,
    pub undername_limit: u64,
}

impl State {
    // ════════════════════════════════════════════════════════════════
    // PURCHASES
    // ════════════════════════════════════════════════════════════════

    pub fn buy_record(
        &mut self,
        buyer: &Address,
        raw_name: &str,
        kind: RecordKind,
        years: u64,
        process_id: Address,
        now: u64,
    ) -> Result<PurchaseReceipt> {
        let name = validate_name(raw_name)?;
        if kind == RecordKind::Lease && !(1..=MAX_LEASE_YEARS).contains(&years) {
            bail_validation!("lease years must be within 1..={MAX_LEASE_YEARS}, got {years}");
        }
        if self.records.contains_key(&name) {
            bail_conflict!("name {name} is already registered");
        }
        match self.reserved_names.get(&name) {
            Some(reserved) if reserved.target.as_ref() == Some(buyer) => {}
            Some(_) => bail_conflict!("name {name} is reserved"),
            None => {}
        }
        // an auctioned name is sold on the released record's terms
        match self.auctions.get(&name) {
            Some(auction) if auction.kind != kind => {
                bail_conflict!("name {name} is auctioned as a {:?} record", auction.kind)
            }
            Some(auction) if auction.kind == RecordKind::Lease && auction.years != years => {
                bail_conflict!("name {name} is auctioned as a {}-year lease", auction.years)
            }
            _ => {}
        }

        let price = self.record_price(&name, kind, years, now);
        self.debit(buyer, price)?;
        self.credit_protocol(price);
        self.demand.record_purchase(price);

        self.reserved_names.remove(&name);
        self.returned_names.remove(&name);
        self.auctions.remove(&name);

        let record = match kind {
            RecordKind::Lease => {
                Record::new_lease(process_id, price, now, years * MS_PER_YEAR)
            }
            RecordKind::Permabuy => Record::new_permabuy(process_id, price, now),
        };
        if let Some(end) = record.end_timestamp {
            self.bump_record_deadline(end + GRACE_PERIOD_MS);
        }
        let receipt = PurchaseReceipt {
            name: name.clone(),
            kind,
            purchase_price: price,
            start_timestamp: record.start_timestamp,
            end_timestamp: record.end_timestamp,
            undername_limit: record.undername_limit,
        };
        self.records.insert(name.clone(), record);
        self.recompute_returned_deadline();
        self.recompute_auction_deadline();
        tracing::info!(%buyer, name, price, ?kind, "record purchased");
        Ok(receipt)
    }

    /// Extend a leased record by whole years; allowed during the grace
    /// window, which revives the lease from its old end.
    pub fn extend_lease(
        &mut self,
        payer: &Address,
        raw_name: &str,
        years: u64,
        now: u64,
    ) -> Result<u64> {
        let name = validate_name(raw_name)?;
        if years == 0 {
            bail_validation!("extension years must be a positive integer");
        }
        let record = match self.records.get(&name) {
            Some(r) => r,
            None => bail_conflict!("name {name} is not registered"),
        };
        let end = match record.end_timestamp {
            Some(end) => end,
            None => bail_conflict!("name {name} is permanently owned and cannot be extended"),
        };
        // any overflowing extension is far past the active-year cap
        let new_end = match years
            .checked_mul(MS_PER_YEAR)
            .and_then(|extension| end.checked_add(extension))
        {
            Some(new_end) => new_end,
            None => bail_validation!("a lease may hold at most {MAX_LEASE_YEARS} active years"),
        };
        if new_end <= now {
            bail_validation!("extension of {years} years does not reach past the expiry");
        }
        if new_end - now > MAX_LEASE_YEARS * MS_PER_YEAR {
            bail_validation!("a lease may hold at most {MAX_LEASE_YEARS} active years");
        }

        let base = base_fee(&self.demand.fees, &name);
        let price = apply_demand_factor(
            pricing::extension_price(base, years),
            self.demand.current_factor,
        );
        self.debit(payer, price)?;
        self.credit_protocol(price);
        self.demand.record_purchase(price);

        if let Some(record) = self.records.get_mut(&name) {
            record.end_timestamp = Some(new_end);
        }
        self.bump_record_deadline(new_end + GRACE_PERIOD_MS);
        Ok(new_end)
    }

    pub fn increase_undername_limit(
        &mut self,
        payer: &Address,
        raw_name: &str,
        quantity: u64,
        now: u64,
    ) -> Result<u64> {
        let name = validate_name(raw_name)?;
        if quantity == 0 {
            bail_validation!("undername quantity must be a positive integer");
        }
        let record = match self.records.get(&name) {
            Some(r) => r,
            None => bail_conflict!("name {name} is not registered"),
        };
        if record.in_grace_period(now, GRACE_PERIOD_MS) {
            bail_conflict!("name {name} has an expired lease in its grace period");
        }
        let new_limit = match record.undername_limit.checked_add(quantity) {
            Some(limit) if limit <= MAX_UNDERNAME_LIMIT => limit,
            _ => bail_validation!("undername limit is capped at {MAX_UNDERNAME_LIMIT}"),
        };
        let remaining = record.end_timestamp.map(|end| end - now);

        let base = base_fee(&self.demand.fees, &name);
        let price = apply_demand_factor(
            pricing::undername_price(base, quantity, remaining),
            self.demand.current_factor,
        );
        self.debit(payer, price)?;
        self.credit_protocol(price);
        self.demand.record_purchase(price);

        if let Some(record) = self.records.get_mut(&name) {
            record.undername_limit = new_limit;
        }
        Ok(new_limit)
    }

    /// Give a name back to the pool. Only the record's controlling process
    /// may release; the name immediately enters a descending-price auction
    /// starting at a steep multiple of the base fee.
    pub fn release_name(&mut self, initiator: &Address, raw_name: &str, now: u64) -> Result<()> {
        let name = validate_name(raw_name)?;
        match self.records.get(&name) {
            Some(r) if r.process_id == *initiator => {}
            Some(_) => bail_conflict!("only the controlling process may release {name}"),
            None => bail_conflict!("name {name} is not registered"),
        }
        let record = match self.records.remove(&name) {
            Some(r) => r,
            None => bail_conflict!("name {name} is not registered"),
        };
        self.remove_primary_names_for(&name);

        let base = base_fee(&self.demand.fees, &name);
        let years = match record.end_timestamp {
            Some(end) => ((end.saturating_sub(now)) as u128)
                .div_ceil(MS_PER_YEAR as u128)
                .max(1) as u64,
            None => 0,
        };
        self.auctions.insert(
            name.clone(),
            Auction {
                kind: record.kind,
                years,
                start_price: base * AUCTION_START_MULTIPLIER,
                floor_price: base,
                start_timestamp: now,
                end_timestamp: now + AUCTION_DURATION_MS,
                initiator: initiator.clone(),
            },
        );
        self.bump_auction_deadline(now + AUCTION_DURATION_MS);
        self.recompute_record_deadline();
        tracing::info!(name, %initiator, "name released into auction");
        Ok(())
    }

    // ════════════════════════════════════════════════════════════════
    // PRICING
    // ════════════════════════════════════════════════════════════════

    /// Price a prospective operation without touching state. Used by the
    /// `Token-Cost` read and mirrored by the paid paths above.
    pub fn token_cost(&self, intent: &CostIntent, now: u64) -> Result<u128> {
        match intent {
            CostIntent::BuyRecord { name, kind, years } => {
                let name = validate_name(name)?;
                if *kind == RecordKind::Lease && !(1..=MAX_LEASE_YEARS).contains(years) {
                    bail_validation!(
                        "lease years must be within 1..={MAX_LEASE_YEARS}, got {years}"
                    );
                }
                if self.records.contains_key(&name) {
                    bail_conflict!("name {name} is already registered");
                }
                Ok(self.record_price(&name, *kind, *years, now))
            }
            CostIntent::ExtendLease { name, years } => {
                let name = validate_name(name)?;
                match self.records.get(&name) {
                    Some(r) if r.kind == RecordKind::Lease => {}
                    Some(_) => bail_conflict!("name {name} is permanently owned"),
                    None => bail_conflict!("name {name} is not registered"),
                }
                let base = base_fee(&self.demand.fees, &name);
                Ok(apply_demand_factor(
                    pricing::extension_price(base, *years),
                    self.demand.current_factor,
                ))
            }
            CostIntent::IncreaseUndernameLimit { name, quantity } => {
                let name = validate_name(name)?;
                let record = match self.records.get(&name) {
                    Some(r) => r,
                    None => bail_conflict!("name {name} is not registered"),
                };
                let remaining = record.end_timestamp.map(|end| end.saturating_sub(now));
                let base = base_fee(&self.demand.fees, &name);
                Ok(apply_demand_factor(
                    pricing::undername_price(base, *quantity, remaining),
                    self.demand.current_factor,
                ))
            }
        }
    }

    /// Purchase price for a currently unregistered name: auction price if
    /// one is running, otherwise the demand-adjusted formula price with the
    /// returned-name premium on top when applicable.
    fn record_price(&self, name: &str, kind: RecordKind, years: u64, now: u64) -> u128 {
        if let Some(auction) = self.auctions.get(name) {
            return auction.current_price(now);
        }
        let base = base_fee(&self.demand.fees, name);
        let raw = match kind {
            RecordKind::Lease => pricing::lease_price(base, years),
            RecordKind::Permabuy => pricing::permabuy_price(base),
        };
        let price = apply_demand_factor(raw, self.demand.current_factor);
        match self.returned_names.get(name) {
            Some(returned) => {
                let premium = returned_name_multiplier(returned.start_timestamp, now);
                (price as f64 * premium).round() as u128
            }
            None => price,
        }
    }

    // ════════════════════════════════════════════════════════════════
    // PRUNING
    // ════════════════════════════════════════════════════════════════

    /// Sweep leases whose grace window has closed into the returned pool.
    /// The return window is anchored at the deterministic grace end, not at
    /// the sweep time.
    pub(crate) fn prune_records(&mut self, now: u64) -> u32 {
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|(_, r)| matches!(r.end_timestamp, Some(end) if now >= end + GRACE_PERIOD_MS))
            .map(|(name, _)| name.clone())
            .collect();
        let count = expired.len() as u32;
        for name in expired {
            let Some(record) = self.records.remove(&name) else {
                continue;
            };
            self.remove_primary_names_for(&name);
            let Some(end) = record.end_timestamp else {
                continue;
            };
            let returned_start = end + GRACE_PERIOD_MS;
            let returned_end = returned_start + RETURNED_NAME_PERIOD_MS;
            if now < returned_end {
                self.returned_names.insert(
                    name.clone(),
                    ReturnedName {
                        start_timestamp: returned_start,
                        end_timestamp: returned_end,
                        initiator: None,
                    },
                );
            }
            tracing::debug!(name, "expired lease pruned into the returned pool");
        }
        count
    }

    pub(crate) fn prune_returned_names(&mut self, now: u64) -> u32 {
        let expired: Vec<String> = self
            .returned_names
            .iter()
            .filter(|(_, r)| now >= r.end_timestamp)
            .map(|(name, _)| name.clone())
            .collect();
        let count = expired.len() as u32;
        for name in expired {
            self.returned_names.remove(&name);
        }
        count
    }

    pub(crate) fn prune_auctions(&mut self, now: u64) -> u32 {
        let expired: Vec<String> = self
            .auctions
            .iter()
            .filter(|(_, a)| now >= a.end_timestamp)
            .map(|(name, _)| name.clone())
            .collect();
        let count = expired.len() as u32;
        for name in expired {
            self.auctions.remove(&name);
        }
        count
    }

    pub(crate) fn earliest_record_deadline(&self) -> Option<u64> {
        self.records
            .values()
            .filter_map(|r| r.end_timestamp)
            .map(|end| end + GRACE_PERIOD_MS)
            .min()
    }

    pub(crate) fn earliest_returned_deadline(&self) -> Option<u64> {
        self.returned_names.values().map(|r| r.end_timestamp).min()
    }

    pub(crate) fn earliest_auction_deadline(&self) -> Option<u64> {
        self.auctions.values().map(|a| a.end_timestamp).min()
    }
}
