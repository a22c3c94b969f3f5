//! Liquid balance management.
//!
//! Every balance mutation in the whole crate funnels through `credit` /
//! `debit` here so the dirty-address side channel stays complete: the
//! boundary patches external balance caches from it after each request.

use serde::Serialize;

use mgn_common::Address;

use crate::error::{bail_insufficient, bail_validation, Result};

use super::State;

/// Balances after a successful transfer, returned as response data.
#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub sender_balance: u128,
    pub recipient_balance: u128,
}

impl State {
    pub fn balance_of(&self, addr: &Address) -> u128 {
        self.balances.get(addr).copied().unwrap_or(0)
    }

    /// Move liquid tokens between addresses. Recipients must pass the
    /// native format check unless the request opted into unsafe addresses.
    pub fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        quantity: u128,
        allow_unsafe: bool,
    ) -> Result<TransferOutcome> {
        if quantity == 0 {
            bail_validation!("transfer quantity must be a positive integer");
        }
        if !allow_unsafe && !to.is_safe() {
            bail_validation!("invalid recipient address: {to}");
        }
        self.debit(from, quantity)?;
        self.credit(to, quantity);
        Ok(TransferOutcome {
            sender_balance: self.balance_of(from),
            recipient_balance: self.balance_of(to),
        })
    }

    /// Debit a liquid balance; the single insufficient-funds gate.
    pub(crate) fn debit(&mut self, addr: &Address, amount: u128) -> Result<()> {
        let balance = self.balances.entry(addr.clone()).or_insert(0);
        if *balance < amount {
            bail_insufficient!(
                "insufficient balance for {addr}: have {balance}, need {amount}"
            );
        }
        *balance -= amount;
        if *balance == 0 {
            self.balances.remove(addr);
        }
        self.mark_dirty(addr);
        Ok(())
    }

    pub(crate) fn credit(&mut self, addr: &Address, amount: u128) {
        if amount == 0 {
            return;
        }
        let balance = self.balances.entry(addr.clone()).or_insert(0);
        *balance = balance.saturating_add(amount);
        self.mark_dirty(addr);
    }

    pub(crate) fn credit_protocol(&mut self, amount: u128) {
        self.protocol_balance = self.protocol_balance.saturating_add(amount);
    }

    /// Protocol balance underflow is a programmer error, not a handled
    /// path: callers size their debits from the balance itself.
    pub(crate) fn debit_protocol(&mut self, amount: u128) {
        debug_assert!(self.protocol_balance >= amount);
        self.protocol_balance = self.protocol_balance.saturating_sub(amount);
    }

    pub(crate) fn mark_dirty(&mut self, addr: &Address) {
        self.dirty_balances.insert(addr.clone());
    }

    /// Drain the per-request dirty set into (address, balance) patches.
    pub fn drain_balance_patches(&mut self) -> Vec<(Address, u128)> {
        let dirty = std::mem::take(&mut self.dirty_balances);
        dirty
            .into_iter()
            .map(|addr| {
                let balance = self.balance_of(&addr);
                (addr, balance)
            })
            .collect()
    }
}
