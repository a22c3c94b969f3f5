//! Epoch state transitions: lazy creation, observation intake, reward
//! distribution, retention pruning.
//!
//! Epochs are never created by a timer. `tick_epochs` runs at the top of
//! every mutating request: it first pays out any epoch whose distribution
//! time has passed (so stake changes land before new weights are taken),
//! then creates the epoch containing `now` if it does not exist yet, then
//! drops distributed epochs older than the retention window. Epochs whose
//! whole window passed without a single request are simply never
//! materialized.

use std::collections::{BTreeMap, BTreeSet};

use mgn_common::Address;

use crate::epochs::{
    gateway_failed, normalize_composite, performance_ratio, select_prescribed_names,
    tenure_weight, Epoch, EpochDistributions, EpochObservations, GatewayWeights,
    PrescribedObserver,
};
use crate::error::{bail_conflict, bail_validation, Result};
use crate::tokenomics::{
    epoch_reward_pools, split_gateway_reward, MIN_OPERATOR_STAKE,
    MISSED_OBSERVATION_REWARD_PERCENT,
};

use super::State;

impl State {
    /// Bring the epoch machine up to `now`. Returns the epochs distributed
    /// by this tick, for the boundary's distribution notices.
    pub(crate) fn tick_epochs(&mut self, now: u64) -> Vec<Epoch> {
        let Some(current) = self.epoch_settings.index_at(now) else {
            return Vec::new();
        };
        let mut distributed = Vec::new();

        let due: Vec<u64> = self
            .epochs
            .iter()
            .filter(|(_, e)| !e.is_distributed() && now >= e.distribution_timestamp)
            .map(|(index, _)| *index)
            .collect();
        for index in due {
            self.distribute_epoch(index, now);
            distributed.push(self.epochs[&index].clone());
        }

        if !self.epochs.contains_key(&current) {
            self.create_epoch(current);
        }

        let cutoff = current.saturating_sub(self.epoch_settings.retention_epochs);
        self.epochs
            .retain(|index, epoch| !(epoch.is_distributed() && *index < cutoff));

        distributed
    }

    /// Accept (or replace) a prescribed observer's report for an epoch.
    /// Resubmission drops the observer's earlier failure votes first.
    pub fn save_observations(
        &mut self,
        observer: &Address,
        epoch_index: u64,
        report_tx_id: &str,
        failed_gateways: &[Address],
        now: u64,
    ) -> Result<()> {
        if report_tx_id.is_empty() {
            bail_validation!("report transaction id must not be empty");
        }
        for address in failed_gateways {
            if !self.gateways.contains_key(address) {
                bail_validation!("{address} is not in the gateway registry");
            }
        }
        let epoch = match self.epochs.get_mut(&epoch_index) {
            Some(e) => e,
            None => bail_conflict!("epoch {epoch_index} does not exist"),
        };
        if epoch.is_distributed() || now >= epoch.distribution_timestamp {
            bail_conflict!("observation window for epoch {epoch_index} has closed");
        }
        if now < epoch.start_timestamp {
            bail_conflict!("epoch {epoch_index} has not started");
        }
        let prescribed = match epoch.prescribed_observer_for(observer) {
            Some(p) => p.clone(),
            None => {
                bail_conflict!("{observer} is not a prescribed observer for epoch {epoch_index}")
            }
        };

        let first_report = !epoch.observations.reports.contains_key(observer);
        for voters in epoch.observations.failure_summaries.values_mut() {
            voters.remove(observer);
        }
        epoch
            .observations
            .failure_summaries
            .retain(|_, voters| !voters.is_empty());
        epoch
            .observations
            .reports
            .insert(observer.clone(), report_tx_id.to_string());
        for address in failed_gateways {
            epoch
                .observations
                .failure_summaries
                .entry(address.clone())
                .or_default()
                .insert(observer.clone());
        }

        if first_report {
            if let Some(gateway) = self.gateways.get_mut(&prescribed.gateway_address) {
                gateway.stats.observed_epoch_count += 1;
            }
        }
        tracing::debug!(%observer, epoch_index, "observation report saved");
        Ok(())
    }

    // ════════════════════════════════════════════════════════════════
    // CREATION
    // ════════════════════════════════════════════════════════════════

    /// Materialize epoch `index`: recompute every gateway's weights,
    /// snapshot the prescribed observer set and name sample, and fix the
    /// eligible reward pools from the current protocol balance.
    fn create_epoch(&mut self, index: u64) {
        let start = self.epoch_settings.start_of(index);

        let mut eligible: Vec<(Address, f64)> = Vec::new();
        for (address, gateway) in self.gateways.iter_mut() {
            let stake_weight = gateway.total_stake() as f64 / MIN_OPERATOR_STAKE as f64;
            let tenure = tenure_weight(gateway.start_timestamp, start);
            let gateway_perf = performance_ratio(
                gateway.stats.passed_epoch_count,
                gateway.stats.total_epoch_count,
            );
            let observer_perf = performance_ratio(
                gateway.stats.observed_epoch_count,
                gateway.stats.prescribed_epoch_count,
            );
            let composite = stake_weight * tenure * gateway_perf * observer_perf;
            gateway.weights = GatewayWeights {
                stake_weight,
                tenure_weight: tenure,
                gateway_performance_ratio: gateway_perf,
                observer_performance_ratio: observer_perf,
                composite_weight: composite,
                normalized_composite_weight: 0.0,
            };
            if !gateway.is_leaving() {
                eligible.push((address.clone(), composite));
            }
        }

        // Top gateways by composite weight become the prescribed observer
        // set; address order breaks ties deterministically.
        let mut ranked = eligible.clone();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        let mut prescribed_observers: Vec<PrescribedObserver> = ranked
            .iter()
            .take(self.epoch_settings.max_prescribed_observers)
            .map(|(address, _)| {
                let gateway = &self.gateways[address];
                PrescribedObserver {
                    gateway_address: address.clone(),
                    observer_address: gateway.observer_address.clone(),
                    weights: gateway.weights.clone(),
                }
            })
            .collect();
        normalize_composite(&mut prescribed_observers);
        for observer in &prescribed_observers {
            if let Some(gateway) = self.gateways.get_mut(&observer.gateway_address) {
                gateway.stats.prescribed_epoch_count += 1;
            }
        }

        let prescribed_names = select_prescribed_names(
            self.records.keys(),
            index,
            self.epoch_settings.prescribed_names_count,
        );

        let (gateway_pool, observer_pool) = epoch_reward_pools(self.protocol_balance);
        let composite_sum: f64 = eligible.iter().map(|(_, w)| w).sum();
        let eligible_rewards: BTreeMap<Address, u128> = eligible
            .into_iter()
            .map(|(address, weight)| {
                let share = if composite_sum > 0.0 {
                    (gateway_pool as f64 * weight / composite_sum) as u128
                } else {
                    0
                };
                (address, share)
            })
            .collect();

        let epoch = Epoch {
            index,
            start_timestamp: start,
            end_timestamp: self.epoch_settings.end_of(index),
            distribution_timestamp: self.epoch_settings.distribution_of(index),
            prescribed_observers,
            prescribed_names,
            observations: EpochObservations::default(),
            distributions: EpochDistributions {
                total_eligible_rewards: gateway_pool + observer_pool,
                gateway_pool,
                observer_pool,
                eligible_rewards,
                ..Default::default()
            },
        };
        tracing::info!(
            index,
            observers = epoch.prescribed_observers.len(),
            names = epoch.prescribed_names.len(),
            "epoch created"
        );
        self.epochs.insert(index, epoch);
    }

    // ════════════════════════════════════════════════════════════════
    // DISTRIBUTION
    // ════════════════════════════════════════════════════════════════

    /// Pay out epoch `index`. Passing gateways take their weight share of
    /// the gateway pool (prescribed observers that skipped their report
    /// keep only a fraction); the observer pool goes to prescribed
    /// observers that submitted and passed. Rewards compound into stakes
    /// per gateway settings; whatever is not paid stays in the protocol
    /// balance.
    fn distribute_epoch(&mut self, index: u64, now: u64) {
        let epoch = self.epochs[&index].clone();
        let submitted = epoch.observations.reports.len();

        let failed: BTreeSet<Address> = epoch
            .distributions
            .eligible_rewards
            .keys()
            .filter(|address| {
                let votes = epoch
                    .observations
                    .failure_summaries
                    .get(*address)
                    .map(|voters| voters.len())
                    .unwrap_or(0);
                gateway_failed(votes, submitted)
            })
            .cloned()
            .collect();

        // Observer pool: prescribed observers that submitted a report and
        // whose gateway passed, weight-renormalized among themselves.
        let observer_candidates: Vec<&PrescribedObserver> = epoch
            .prescribed_observers
            .iter()
            .filter(|o| {
                epoch.observations.reports.contains_key(&o.observer_address)
                    && !failed.contains(&o.gateway_address)
            })
            .collect();
        let observer_weight_sum: f64 = observer_candidates
            .iter()
            .map(|o| o.weights.normalized_composite_weight)
            .sum();
        let mut observer_shares: BTreeMap<Address, u128> = BTreeMap::new();
        for observer in &observer_candidates {
            let share = if observer_weight_sum > 0.0 {
                (epoch.distributions.observer_pool as f64
                    * observer.weights.normalized_composite_weight
                    / observer_weight_sum) as u128
            } else {
                0
            };
            observer_shares.insert(observer.gateway_address.clone(), share);
        }

        let mut total_distributed = 0u128;
        let mut distributed_rewards: BTreeMap<Address, u128> = BTreeMap::new();
        for (address, &gateway_share) in &epoch.distributions.eligible_rewards {
            {
                let Some(gateway) = self.gateways.get_mut(address) else {
                    continue; // left and pruned since creation: reward lapses
                };
                gateway.stats.total_epoch_count += 1;
                if failed.contains(address) {
                    gateway.stats.failed_epoch_count += 1;
                    continue;
                }
                gateway.stats.passed_epoch_count += 1;
                if gateway.is_leaving() {
                    continue;
                }
            }

            let mut reward = gateway_share;
            if let Some(prescribed) = epoch
                .prescribed_observers
                .iter()
                .find(|o| o.gateway_address == *address)
            {
                if !epoch
                    .observations
                    .reports
                    .contains_key(&prescribed.observer_address)
                {
                    reward = reward * MISSED_OBSERVATION_REWARD_PERCENT / 100;
                }
            }
            reward += observer_shares.get(address).copied().unwrap_or(0);
            if reward == 0 {
                continue;
            }
            let paid = self.payout_gateway_reward(address, reward);
            total_distributed += paid;
            distributed_rewards.insert(address.clone(), paid);
        }

        self.debit_protocol(total_distributed);
        if let Some(epoch) = self.epochs.get_mut(&index) {
            epoch.distributions.distributed_timestamp = Some(now);
            epoch.distributions.total_distributed = total_distributed;
            epoch.distributions.distributed_rewards = distributed_rewards;
        }
        tracing::info!(index, total_distributed, "epoch distributed");
    }

    /// Split one gateway's reward between operator and delegates. Delegate
    /// shares are stake-prorated and compound into delegated stake;
    /// proration remainders fall to the operator, which either compounds
    /// (`auto_stake`) or lands in the liquid balance.
    fn payout_gateway_reward(&mut self, address: &Address, reward: u128) -> u128 {
        let Some(gateway) = self.gateways.get_mut(address) else {
            return 0;
        };
        let (operator_share, delegate_pool) =
            split_gateway_reward(reward, gateway.settings.delegate_reward_share_ratio);

        let total_delegated = gateway.total_delegated_stake;
        let mut delegated_paid = 0u128;
        if delegate_pool > 0 && total_delegated > 0 {
            for delegate in gateway.delegates.values_mut() {
                if delegate.delegated_stake == 0 {
                    continue;
                }
                let share = delegate_pool * delegate.delegated_stake / total_delegated;
                delegate.delegated_stake += share;
                delegated_paid += share;
            }
            gateway.total_delegated_stake += delegated_paid;
        }

        let operator_total = operator_share + (delegate_pool - delegated_paid);
        if gateway.settings.auto_stake {
            gateway.operator_stake += operator_total;
        } else {
            self.credit(address, operator_total);
        }
        reward
    }

    /// Next epoch event: the start of the first uncreated epoch or the
    /// earliest pending distribution, whichever comes first.
    pub(crate) fn earliest_epoch_deadline(&self) -> Option<u64> {
        let next_creation = match self.epochs.keys().next_back() {
            Some(&last) => self.epoch_settings.start_of(last + 1),
            None => self.epoch_settings.epoch_zero_start,
        };
        let next_distribution = self
            .epochs
            .values()
            .filter(|e| !e.is_distributed())
            .map(|e| e.distribution_timestamp)
            .min();
        Some(match next_distribution {
            Some(d) => d.min(next_creation),
            None => next_creation,
        })
    }
}
