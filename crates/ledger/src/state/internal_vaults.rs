//! Time-locked ledger vaults.
//!
//! Vaults are keyed by the message id of the request that created them.
//! They leave the tree one of two ways: the pruning sweep releases them to
//! the owner's liquid balance at `end_timestamp`, or the owner withdraws
//! early and pays the linearly decaying penalty to the protocol.

use serde::Serialize;

use mgn_common::Address;

use crate::error::{bail_conflict, bail_validation, Result};
use crate::tokenomics::{
    instant_withdrawal_penalty_bp, split_instant_withdrawal, MAX_VAULT_LOCK_MS, MIN_VAULT_LOCK_MS,
};

use super::{State, Vault};

/// Result of an instant withdrawal, returned as response data.
#[derive(Debug, Clone, Serialize)]
pub struct InstantWithdrawal {
    pub vault_id: String,
    pub amount_withdrawn: u128,
    pub penalty: u128,
    pub penalty_rate_bp: u128,
}

impl State {
    /// Lock `quantity` of the owner's liquid balance until `now +
    /// lock_length_ms`.
    pub fn create_vault(
        &mut self,
        owner: &Address,
        vault_id: &str,
        quantity: u128,
        lock_length_ms: u64,
        now: u64,
    ) -> Result<()> {
        self.create_vault_for(owner, owner, vault_id, quantity, lock_length_ms, now)
    }

    /// Vaulted transfer: debit `from`, create the vault under `to`.
    pub fn vaulted_transfer(
        &mut self,
        from: &Address,
        to: &Address,
        vault_id: &str,
        quantity: u128,
        lock_length_ms: u64,
        now: u64,
    ) -> Result<()> {
        if !to.is_safe() {
            bail_validation!("invalid recipient address: {to}");
        }
        self.create_vault_for(from, to, vault_id, quantity, lock_length_ms, now)
    }

    fn create_vault_for(
        &mut self,
        payer: &Address,
        owner: &Address,
        vault_id: &str,
        quantity: u128,
        lock_length_ms: u64,
        now: u64,
    ) -> Result<()> {
        if quantity == 0 {
            bail_validation!("vault quantity must be a positive integer");
        }
        if !(MIN_VAULT_LOCK_MS..=MAX_VAULT_LOCK_MS).contains(&lock_length_ms) {
            bail_validation!(
                "lock length must be within {MIN_VAULT_LOCK_MS}..={MAX_VAULT_LOCK_MS} ms, got {lock_length_ms}"
            );
        }
        if let Some(existing) = self.vaults.get(owner) {
            if existing.contains_key(vault_id) {
                bail_conflict!("vault {vault_id} already exists for {owner}");
            }
        }
        self.debit(payer, quantity)?;
        self.vaults.entry(owner.clone()).or_default().insert(
            vault_id.to_string(),
            Vault {
                balance: quantity,
                start_timestamp: now,
                end_timestamp: Some(now + lock_length_ms),
            },
        );
        self.bump_vault_deadline(now + lock_length_ms);
        Ok(())
    }

    /// Push an active vault's end further out. Returns the new end
    /// timestamp.
    pub fn extend_vault(
        &mut self,
        owner: &Address,
        vault_id: &str,
        extend_length_ms: u64,
        now: u64,
    ) -> Result<u64> {
        if extend_length_ms == 0 {
            bail_validation!("extend length must be a positive integer");
        }
        let vault = self.active_vault_mut(owner, vault_id, now)?;
        let end = match vault.end_timestamp {
            Some(end) => end,
            None => bail_conflict!("vault {vault_id} is permanent and cannot be extended"),
        };
        let new_end = match end.checked_add(extend_length_ms) {
            Some(new_end) => new_end,
            None => bail_validation!(
                "extension would exceed the maximum lock of {MAX_VAULT_LOCK_MS} ms"
            ),
        };
        if new_end - now > MAX_VAULT_LOCK_MS {
            bail_validation!(
                "extension would exceed the maximum lock of {MAX_VAULT_LOCK_MS} ms"
            );
        }
        vault.end_timestamp = Some(new_end);
        Ok(new_end)
    }

    /// Add liquid tokens to an active vault.
    pub fn increase_vault_balance(
        &mut self,
        owner: &Address,
        vault_id: &str,
        quantity: u128,
        now: u64,
    ) -> Result<u128> {
        if quantity == 0 {
            bail_validation!("vault quantity must be a positive integer");
        }
        // validate existence before taking funds
        self.active_vault_mut(owner, vault_id, now)?;
        self.debit(owner, quantity)?;
        let vault = self.active_vault_mut(owner, vault_id, now)?;
        vault.balance += quantity;
        Ok(vault.balance)
    }

    /// Withdraw a vault before its natural end. The penalty rate decays
    /// linearly from the maximum at creation to zero at `end_timestamp`;
    /// the penalty is routed to the protocol balance and the vault is
    /// deleted immediately, bypassing the pruning sweep.
    pub fn instant_withdraw_vault(
        &mut self,
        owner: &Address,
        vault_id: &str,
        now: u64,
    ) -> Result<InstantWithdrawal> {
        let vault = match self.vaults.get(owner).and_then(|m| m.get(vault_id)) {
            Some(v) => v.clone(),
            None => bail_conflict!("vault {vault_id} not found for {owner}"),
        };
        let end = match vault.end_timestamp {
            Some(end) => end,
            None => bail_conflict!("vault {vault_id} is permanent and cannot be withdrawn"),
        };
        let rate = instant_withdrawal_penalty_bp(vault.start_timestamp, end, now);
        let (withdrawn, penalty) = split_instant_withdrawal(vault.balance, rate);

        if let Some(owner_vaults) = self.vaults.get_mut(owner) {
            owner_vaults.remove(vault_id);
            if owner_vaults.is_empty() {
                self.vaults.remove(owner);
            }
        }
        self.credit(owner, withdrawn);
        self.credit_protocol(penalty);
        self.recompute_vault_deadline();

        tracing::debug!(%owner, vault_id, withdrawn, penalty, "instant vault withdrawal");
        Ok(InstantWithdrawal {
            vault_id: vault_id.to_string(),
            amount_withdrawn: withdrawn,
            penalty,
            penalty_rate_bp: rate,
        })
    }

    fn active_vault_mut(&mut self, owner: &Address, vault_id: &str, now: u64) -> Result<&mut Vault> {
        match self.vaults.get_mut(owner).and_then(|m| m.get_mut(vault_id)) {
            Some(v) if v.is_expired(now) => {
                bail_conflict!("vault {vault_id} has already reached its end timestamp")
            }
            Some(v) => Ok(v),
            None => bail_conflict!("vault {vault_id} not found for {owner}"),
        }
    }

    /// Sweep: release every vault whose end has passed to its owner's
    /// liquid balance. Returns (vaults released, total released).
    pub(crate) fn prune_vaults(&mut self, now: u64) -> (u32, u128) {
        let mut released_count = 0u32;
        let mut released_total = 0u128;
        let owners: Vec<Address> = self.vaults.keys().cloned().collect();
        for owner in owners {
            let expired: Vec<(String, u128)> = self.vaults[&owner]
                .iter()
                .filter(|(_, v)| v.is_expired(now))
                .map(|(id, v)| (id.clone(), v.balance))
                .collect();
            for (id, balance) in expired {
                if let Some(vaults) = self.vaults.get_mut(&owner) {
                    vaults.remove(&id);
                }
                self.credit(&owner, balance);
                released_count += 1;
                released_total += balance;
            }
            if self.vaults.get(&owner).is_some_and(|m| m.is_empty()) {
                self.vaults.remove(&owner);
            }
        }
        (released_count, released_total)
    }

    /// Minimum end timestamp over all ledger vaults.
    pub(crate) fn earliest_vault_deadline(&self) -> Option<u64> {
        self.vaults
            .values()
            .flat_map(|m| m.values())
            .filter_map(|v| v.end_timestamp)
            .min()
    }
}
