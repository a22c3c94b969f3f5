//! Gateway registry lifecycle: join/leave, operator staking, delegation,
//! settings updates, withdrawal vaults.
//!
//! Staked tokens never sit in liquid balances: `Join-Network` and the
//! stake-increase paths debit the caller directly into the gateway entry,
//! and every decrease routes through a withdrawal vault (or pays the
//! maximum instant-withdrawal penalty to skip the lock).

use serde::{Deserialize, Serialize};

use mgn_common::Address;

use crate::error::{bail_conflict, bail_validation, Result};
use crate::tokenomics::{
    instant_withdrawal_penalty_bp, leave_network_stake_split, split_instant_withdrawal,
    GATEWAY_LEAVE_NOTICE_MS, LEAVE_MINIMUM_STAKE_LOCK_MS, MAX_INSTANT_WITHDRAWAL_PENALTY_BP,
    MIN_DELEGATED_STAKE, MIN_OPERATOR_STAKE, STAKE_WITHDRAWAL_LOCK_MS,
};

use super::{Delegate, Gateway, GatewaySettings, GatewayStats, GatewayStatus, State, Vault};

const MAX_LABEL_LEN: usize = 64;
const MAX_NOTE_LEN: usize = 256;
const MAX_FQDN_LEN: usize = 253;

/// Everything `Join-Network` needs beyond the caller's address.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinNetworkParams {
    pub operator_stake: u128,
    /// Defaults to the operator address when absent.
    pub observer_address: Option<Address>,
    pub label: String,
    #[serde(default)]
    pub note: String,
    pub fqdn: String,
    pub port: u16,
    pub protocol: String,
    pub properties: Address,
    #[serde(default)]
    pub allow_delegated_staking: bool,
    pub min_delegated_stake: u128,
    pub delegate_reward_share_ratio: u8,
    #[serde(default)]
    pub auto_stake: bool,
}

/// Partial settings update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewaySettingsUpdate {
    pub observer_address: Option<Address>,
    pub label: Option<String>,
    pub note: Option<String>,
    pub fqdn: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub properties: Option<Address>,
    pub allow_delegated_staking: Option<bool>,
    pub min_delegated_stake: Option<u128>,
    pub delegate_reward_share_ratio: Option<u8>,
    pub auto_stake: Option<bool>,
}

/// Result of a stake decrease, returned as response data.
#[derive(Debug, Clone, Serialize)]
pub struct StakeDecreaseOutcome {
    /// Tokens credited immediately (instant path only).
    pub amount_withdrawn: u128,
    pub penalty: u128,
    /// Withdrawal vault created for the locked path.
    pub vault_id: Option<String>,
}

impl State {
    // ════════════════════════════════════════════════════════════════
    // JOIN / LEAVE
    // ════════════════════════════════════════════════════════════════

    pub fn join_network(
        &mut self,
        operator: &Address,
        params: JoinNetworkParams,
        now: u64,
    ) -> Result<()> {
        if self.gateways.contains_key(operator) {
            bail_conflict!("{operator} is already in the gateway registry");
        }
        if params.operator_stake < MIN_OPERATOR_STAKE {
            bail_validation!(
                "operator stake {} is below the minimum of {MIN_OPERATOR_STAKE}",
                params.operator_stake
            );
        }
        let observer_address = params.observer_address.clone().unwrap_or_else(|| operator.clone());
        if let Some((other, _)) = self
            .gateways
            .iter()
            .find(|(_, g)| g.observer_address == observer_address)
        {
            bail_conflict!("observer address {observer_address} is already used by {other}");
        }
        let settings = GatewaySettings {
            label: params.label,
            note: params.note,
            fqdn: params.fqdn,
            port: params.port,
            protocol: params.protocol,
            properties: params.properties,
            allow_delegated_staking: params.allow_delegated_staking,
            min_delegated_stake: params.min_delegated_stake,
            delegate_reward_share_ratio: params.delegate_reward_share_ratio,
            auto_stake: params.auto_stake,
        };
        validate_settings(&settings)?;

        self.debit(operator, params.operator_stake)?;
        self.gateways.insert(
            operator.clone(),
            Gateway {
                operator_stake: params.operator_stake,
                total_delegated_stake: 0,
                observer_address,
                settings,
                status: GatewayStatus::Joined,
                start_timestamp: now,
                end_timestamp: None,
                stats: GatewayStats::default(),
                weights: Default::default(),
                vaults: Default::default(),
                delegates: Default::default(),
            },
        );
        tracing::info!(%operator, "gateway joined the network");
        Ok(())
    }

    /// Begin the leave procedure: the gateway stops being selectable, the
    /// minimum-stake portion is vaulted for the long lock and the excess
    /// for the short one, and every delegate is kicked into a short-lock
    /// withdrawal vault. The registry entry itself is pruned after the
    /// notice period.
    pub fn leave_network(&mut self, operator: &Address, msg_id: &str, now: u64) -> Result<()> {
        let gateway = self.joined_gateway_mut(operator)?;
        let (minimum, excess) = leave_network_stake_split(gateway.operator_stake);
        gateway.operator_stake = 0;
        gateway.status = GatewayStatus::Leaving;
        gateway.end_timestamp = Some(now + GATEWAY_LEAVE_NOTICE_MS);

        // Minimum portion keyed by the operator address, excess by the
        // message id, so both can coexist.
        gateway.vaults.insert(
            operator.to_string(),
            Vault {
                balance: minimum,
                start_timestamp: now,
                end_timestamp: Some(now + LEAVE_MINIMUM_STAKE_LOCK_MS),
            },
        );
        if excess > 0 {
            gateway.vaults.insert(
                msg_id.to_string(),
                Vault {
                    balance: excess,
                    start_timestamp: now,
                    end_timestamp: Some(now + STAKE_WITHDRAWAL_LOCK_MS),
                },
            );
        }
        for delegate in gateway.delegates.values_mut() {
            if delegate.delegated_stake > 0 {
                delegate.vaults.insert(
                    msg_id.to_string(),
                    Vault {
                        balance: delegate.delegated_stake,
                        start_timestamp: now,
                        end_timestamp: Some(now + STAKE_WITHDRAWAL_LOCK_MS),
                    },
                );
                delegate.delegated_stake = 0;
            }
        }
        gateway.total_delegated_stake = 0;

        self.bump_gateway_deadline(now + STAKE_WITHDRAWAL_LOCK_MS);
        tracing::info!(%operator, "gateway is leaving the network");
        Ok(())
    }

    pub fn update_gateway_settings(
        &mut self,
        operator: &Address,
        update: GatewaySettingsUpdate,
    ) -> Result<()> {
        if let Some(observer_address) = &update.observer_address {
            if let Some((other, _)) = self
                .gateways
                .iter()
                .find(|(addr, g)| g.observer_address == *observer_address && *addr != operator)
            {
                bail_conflict!("observer address {observer_address} is already used by {other}");
            }
        }
        let gateway = match self.gateways.get_mut(operator) {
            Some(g) => g,
            None => bail_conflict!("{operator} is not in the gateway registry"),
        };
        if gateway.is_leaving() {
            bail_conflict!("gateway {operator} is leaving the network");
        }
        let mut settings = gateway.settings.clone();
        if let Some(v) = update.label {
            settings.label = v;
        }
        if let Some(v) = update.note {
            settings.note = v;
        }
        if let Some(v) = update.fqdn {
            settings.fqdn = v;
        }
        if let Some(v) = update.port {
            settings.port = v;
        }
        if let Some(v) = update.protocol {
            settings.protocol = v;
        }
        if let Some(v) = update.properties {
            settings.properties = v;
        }
        if let Some(v) = update.allow_delegated_staking {
            settings.allow_delegated_staking = v;
        }
        if let Some(v) = update.min_delegated_stake {
            settings.min_delegated_stake = v;
        }
        if let Some(v) = update.delegate_reward_share_ratio {
            settings.delegate_reward_share_ratio = v;
        }
        if let Some(v) = update.auto_stake {
            settings.auto_stake = v;
        }
        validate_settings(&settings)?;
        if let Some(observer_address) = update.observer_address {
            gateway.observer_address = observer_address;
        }
        gateway.settings = settings;
        Ok(())
    }

    // ════════════════════════════════════════════════════════════════
    // OPERATOR STAKE
    // ════════════════════════════════════════════════════════════════

    pub fn increase_operator_stake(
        &mut self,
        operator: &Address,
        quantity: u128,
    ) -> Result<u128> {
        if quantity == 0 {
            bail_validation!("stake quantity must be a positive integer");
        }
        self.joined_gateway_mut(operator)?;
        self.debit(operator, quantity)?;
        let gateway = self.joined_gateway_mut(operator)?;
        gateway.operator_stake += quantity;
        Ok(gateway.operator_stake)
    }

    /// Move `quantity` of operator stake out of the gateway. The locked
    /// path creates a withdrawal vault; the instant path pays the maximum
    /// penalty and credits the rest immediately.
    pub fn decrease_operator_stake(
        &mut self,
        operator: &Address,
        quantity: u128,
        instant: bool,
        msg_id: &str,
        now: u64,
    ) -> Result<StakeDecreaseOutcome> {
        if quantity == 0 {
            bail_validation!("stake quantity must be a positive integer");
        }
        let gateway = self.joined_gateway_mut(operator)?;
        if gateway.operator_stake < quantity
            || gateway.operator_stake - quantity < MIN_OPERATOR_STAKE
        {
            bail_validation!(
                "resulting operator stake would fall below the minimum of {MIN_OPERATOR_STAKE}"
            );
        }
        if !instant && gateway.vaults.contains_key(msg_id) {
            bail_conflict!("withdrawal vault {msg_id} already exists");
        }
        gateway.operator_stake -= quantity;

        if instant {
            let (withdrawn, penalty) =
                split_instant_withdrawal(quantity, MAX_INSTANT_WITHDRAWAL_PENALTY_BP);
            self.credit(operator, withdrawn);
            self.credit_protocol(penalty);
            Ok(StakeDecreaseOutcome {
                amount_withdrawn: withdrawn,
                penalty,
                vault_id: None,
            })
        } else {
            gateway.vaults.insert(
                msg_id.to_string(),
                Vault {
                    balance: quantity,
                    start_timestamp: now,
                    end_timestamp: Some(now + STAKE_WITHDRAWAL_LOCK_MS),
                },
            );
            self.bump_gateway_deadline(now + STAKE_WITHDRAWAL_LOCK_MS);
            Ok(StakeDecreaseOutcome {
                amount_withdrawn: 0,
                penalty: 0,
                vault_id: Some(msg_id.to_string()),
            })
        }
    }

    // ════════════════════════════════════════════════════════════════
    // DELEGATION
    // ════════════════════════════════════════════════════════════════

    pub fn delegate_stake(
        &mut self,
        delegator: &Address,
        gateway_address: &Address,
        quantity: u128,
        now: u64,
    ) -> Result<u128> {
        if quantity == 0 {
            bail_validation!("stake quantity must be a positive integer");
        }
        let gateway = match self.gateways.get(gateway_address) {
            Some(g) => g,
            None => bail_conflict!("{gateway_address} is not in the gateway registry"),
        };
        if gateway.is_leaving() {
            bail_conflict!("gateway {gateway_address} is leaving the network");
        }
        if !gateway.settings.allow_delegated_staking {
            bail_conflict!("gateway {gateway_address} does not accept delegated stake");
        }
        let existing = gateway
            .delegates
            .get(delegator)
            .map(|d| d.delegated_stake)
            .unwrap_or(0);
        let total = match existing.checked_add(quantity) {
            Some(total) => total,
            None => bail_validation!("stake quantity is out of range"),
        };
        if total < gateway.settings.min_delegated_stake {
            bail_validation!(
                "delegated stake {total} is below this gateway's minimum of {}",
                gateway.settings.min_delegated_stake
            );
        }
        self.debit(delegator, quantity)?;
        let gateway = self.joined_gateway_mut(gateway_address)?;
        gateway
            .delegates
            .entry(delegator.clone())
            .or_insert_with(|| Delegate {
                delegated_stake: 0,
                start_timestamp: now,
                vaults: Default::default(),
            })
            .delegated_stake += quantity;
        gateway.total_delegated_stake += quantity;
        Ok(total)
    }

    /// Withdraw delegated stake. The remainder must be zero (full exit) or
    /// still meet the gateway's minimum.
    pub fn decrease_delegate_stake(
        &mut self,
        delegator: &Address,
        gateway_address: &Address,
        quantity: u128,
        instant: bool,
        msg_id: &str,
        now: u64,
    ) -> Result<StakeDecreaseOutcome> {
        if quantity == 0 {
            bail_validation!("stake quantity must be a positive integer");
        }
        let gateway = match self.gateways.get_mut(gateway_address) {
            Some(g) => g,
            None => bail_conflict!("{gateway_address} is not in the gateway registry"),
        };
        let min_delegated_stake = gateway.settings.min_delegated_stake;
        let delegate = match gateway.delegates.get_mut(delegator) {
            Some(d) => d,
            None => bail_conflict!("{delegator} has no stake on gateway {gateway_address}"),
        };
        if delegate.delegated_stake < quantity {
            bail_validation!(
                "cannot withdraw {quantity} from a delegated stake of {}",
                delegate.delegated_stake
            );
        }
        let remaining = delegate.delegated_stake - quantity;
        if remaining != 0 && remaining < min_delegated_stake {
            bail_validation!(
                "remaining delegated stake {remaining} would be below this gateway's minimum of {min_delegated_stake}; withdraw all or less"
            );
        }
        if !instant && delegate.vaults.contains_key(msg_id) {
            bail_conflict!("withdrawal vault {msg_id} already exists");
        }
        delegate.delegated_stake = remaining;

        let outcome = if instant {
            gateway.total_delegated_stake -= quantity;
            let (withdrawn, penalty) =
                split_instant_withdrawal(quantity, MAX_INSTANT_WITHDRAWAL_PENALTY_BP);
            self.credit(delegator, withdrawn);
            self.credit_protocol(penalty);
            StakeDecreaseOutcome {
                amount_withdrawn: withdrawn,
                penalty,
                vault_id: None,
            }
        } else {
            delegate.vaults.insert(
                msg_id.to_string(),
                Vault {
                    balance: quantity,
                    start_timestamp: now,
                    end_timestamp: Some(now + STAKE_WITHDRAWAL_LOCK_MS),
                },
            );
            gateway.total_delegated_stake -= quantity;
            self.bump_gateway_deadline(now + STAKE_WITHDRAWAL_LOCK_MS);
            StakeDecreaseOutcome {
                amount_withdrawn: 0,
                penalty: 0,
                vault_id: Some(msg_id.to_string()),
            }
        };
        self.cleanup_delegate(gateway_address, delegator);
        Ok(outcome)
    }

    /// Cash out a pending withdrawal vault (operator or delegate) before
    /// its lock ends, paying the decaying penalty.
    pub fn instant_withdraw_stake(
        &mut self,
        withdrawer: &Address,
        gateway_address: &Address,
        vault_id: &str,
        now: u64,
    ) -> Result<super::InstantWithdrawal> {
        let gateway = match self.gateways.get_mut(gateway_address) {
            Some(g) => g,
            None => bail_conflict!("{gateway_address} is not in the gateway registry"),
        };
        let vaults = if withdrawer == gateway_address {
            &mut gateway.vaults
        } else {
            match gateway.delegates.get_mut(withdrawer) {
                Some(d) => &mut d.vaults,
                None => bail_conflict!("{withdrawer} has no stake on gateway {gateway_address}"),
            }
        };
        let vault = match vaults.remove(vault_id) {
            Some(v) => v,
            None => bail_conflict!("withdrawal vault {vault_id} not found"),
        };
        // Withdrawal vaults always carry an end timestamp.
        let end = vault.end_timestamp.unwrap_or(now);
        let rate = instant_withdrawal_penalty_bp(vault.start_timestamp, end, now);
        let (withdrawn, penalty) = split_instant_withdrawal(vault.balance, rate);
        self.credit(withdrawer, withdrawn);
        self.credit_protocol(penalty);
        self.cleanup_delegate(gateway_address, withdrawer);
        Ok(super::InstantWithdrawal {
            vault_id: vault_id.to_string(),
            amount_withdrawn: withdrawn,
            penalty,
            penalty_rate_bp: rate,
        })
    }

    /// Drop a delegate entry once it holds neither stake nor vaults.
    fn cleanup_delegate(&mut self, gateway_address: &Address, delegator: &Address) {
        if let Some(gateway) = self.gateways.get_mut(gateway_address) {
            let empty = gateway
                .delegates
                .get(delegator)
                .is_some_and(|d| d.delegated_stake == 0 && d.vaults.is_empty());
            if empty {
                gateway.delegates.remove(delegator);
            }
        }
    }

    fn joined_gateway_mut(&mut self, operator: &Address) -> Result<&mut Gateway> {
        match self.gateways.get_mut(operator) {
            Some(g) if g.is_leaving() => {
                bail_conflict!("gateway {operator} is leaving the network")
            }
            Some(g) => Ok(g),
            None => bail_conflict!("{operator} is not in the gateway registry"),
        }
    }

    // ════════════════════════════════════════════════════════════════
    // PRUNING
    // ════════════════════════════════════════════════════════════════

    /// Sweep: release expired withdrawal vaults, drop emptied delegate
    /// entries, and remove leaving gateways whose notice period has
    /// passed. Returns (vaults released, gateways removed).
    pub(crate) fn prune_gateways(&mut self, now: u64) -> (u32, u32) {
        let mut vaults_released = 0u32;
        let mut gateways_removed = 0u32;
        let addresses: Vec<Address> = self.gateways.keys().cloned().collect();
        for address in addresses {
            let mut credits: Vec<(Address, u128)> = Vec::new();
            let Some(gateway) = self.gateways.get_mut(&address) else {
                continue;
            };

            let expired: Vec<String> = gateway
                .vaults
                .iter()
                .filter(|(_, v)| v.is_expired(now))
                .map(|(id, _)| id.clone())
                .collect();
            for id in expired {
                if let Some(vault) = gateway.vaults.remove(&id) {
                    vaults_released += 1;
                    credits.push((address.clone(), vault.balance));
                }
            }

            let delegators: Vec<Address> = gateway.delegates.keys().cloned().collect();
            for delegator in &delegators {
                let Some(delegate) = gateway.delegates.get_mut(delegator) else {
                    continue;
                };
                let expired: Vec<String> = delegate
                    .vaults
                    .iter()
                    .filter(|(_, v)| v.is_expired(now))
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in expired {
                    if let Some(vault) = delegate.vaults.remove(&id) {
                        vaults_released += 1;
                        credits.push((delegator.clone(), vault.balance));
                    }
                }
                if delegate.delegated_stake == 0 && delegate.vaults.is_empty() {
                    gateway.delegates.remove(delegator);
                }
            }

            // still queryable at the end timestamp itself, gone after
            let notice_over =
                gateway.is_leaving() && matches!(gateway.end_timestamp, Some(end) if now > end);
            if notice_over {
                // Residual vaults of a removed gateway are released
                // immediately rather than stranded.
                let Some(gateway) = self.gateways.remove(&address) else {
                    continue;
                };
                gateways_removed += 1;
                let residual: u128 = gateway.vaults.values().map(|v| v.balance).sum();
                credits.push((address.clone(), residual + gateway.operator_stake));
                for (delegator, delegate) in gateway.delegates {
                    let residual: u128 =
                        delegate.vaults.values().map(|v| v.balance).sum();
                    credits.push((delegator, residual + delegate.delegated_stake));
                }
                tracing::info!(%address, "gateway removed after leave notice");
            }
            for (addr, amount) in credits {
                self.credit(&addr, amount);
            }
        }
        (vaults_released, gateways_removed)
    }

    /// Minimum pending deadline across the gateway registry: leave-notice
    /// ends plus every withdrawal vault end.
    pub(crate) fn earliest_gateway_deadline(&self) -> Option<u64> {
        self.gateways
            .iter()
            .flat_map(|(_, g)| {
                g.end_timestamp
                    .into_iter()
                    .chain(g.vaults.values().filter_map(|v| v.end_timestamp))
                    .chain(
                        g.delegates
                            .values()
                            .flat_map(|d| d.vaults.values())
                            .filter_map(|v| v.end_timestamp),
                    )
            })
            .min()
    }
}

fn validate_settings(settings: &GatewaySettings) -> Result<()> {
    if settings.label.is_empty() || settings.label.len() > MAX_LABEL_LEN {
        bail_validation!("label must be 1..={MAX_LABEL_LEN} characters");
    }
    if settings.note.len() > MAX_NOTE_LEN {
        bail_validation!("note must be at most {MAX_NOTE_LEN} characters");
    }
    validate_fqdn(&settings.fqdn)?;
    if settings.port == 0 {
        bail_validation!("port must be a positive integer");
    }
    if settings.protocol != "https" {
        bail_validation!("protocol must be \"https\"");
    }
    if settings.delegate_reward_share_ratio > 100 {
        bail_validation!("delegate reward share ratio must be within 0..=100");
    }
    if settings.min_delegated_stake < MIN_DELEGATED_STAKE {
        bail_validation!(
            "minimum delegated stake must be at least {MIN_DELEGATED_STAKE}"
        );
    }
    Ok(())
}

/// Hostname validation: dot-separated labels of alphanumerics and interior
/// hyphens.
fn validate_fqdn(fqdn: &str) -> Result<()> {
    if fqdn.is_empty() || fqdn.len() > MAX_FQDN_LEN {
        bail_validation!("fqdn must be 1..={MAX_FQDN_LEN} characters");
    }
    let valid = fqdn.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    });
    if !valid {
        bail_validation!("fqdn {fqdn} is not a valid hostname");
    }
    Ok(())
}
