//! MGN protocol constants and token math.
//!
//! Single source of truth for supply, staking minimums, lock durations and
//! reward splits. All amounts are uMERI, all durations are milliseconds.
//! These values are consensus-critical; changing any of them forks the
//! network state.
//!
//! Note the deliberately asymmetric pairs kept as separate named constants:
//! the 90-day vs 30-day vault split on `Leave-Network`, and the different
//! trailing-window lengths in `demand.rs`. They are part of the economic
//! design, not accidents to be "fixed".

pub const MS_PER_DAY: u64 = 86_400_000;

// ============================================================
// SUPPLY
// ============================================================

/// Smallest unit scale: 1 MERI = 10^6 uMERI.
pub const UMERI_PER_MERI: u128 = 1_000_000;

/// Fixed total supply: 1,000,000,000 MERI.
pub const TOTAL_SUPPLY: u128 = 1_000_000_000 * UMERI_PER_MERI;

/// Basis-point denominator used throughout (10_000 = 100%).
pub const BP_DENOM: u128 = 10_000;

// ============================================================
// GATEWAY STAKING
// ============================================================

/// Minimum operator stake to join and remain in the gateway registry.
pub const MIN_OPERATOR_STAKE: u128 = 10_000 * UMERI_PER_MERI;

/// Network floor for a gateway's own `min_delegated_stake` setting.
pub const MIN_DELEGATED_STAKE: u128 = 10 * UMERI_PER_MERI;

/// Notice period between `Leave-Network` and removal from the registry.
pub const GATEWAY_LEAVE_NOTICE_MS: u64 = 90 * MS_PER_DAY;

/// Lock on the minimum-stake portion when an operator leaves (90 days).
pub const LEAVE_MINIMUM_STAKE_LOCK_MS: u64 = 90 * MS_PER_DAY;

/// Lock on everything else: excess operator stake on leave, operator stake
/// decreases, and delegate withdrawals (30 days).
pub const STAKE_WITHDRAWAL_LOCK_MS: u64 = 30 * MS_PER_DAY;

// ============================================================
// VAULTS & INSTANT WITHDRAWAL
// ============================================================

/// Minimum lock length for a manually created vault (14 days).
pub const MIN_VAULT_LOCK_MS: u64 = 14 * MS_PER_DAY;

/// Maximum lock length for a manually created vault (~12 years).
pub const MAX_VAULT_LOCK_MS: u64 = 12 * 365 * MS_PER_DAY;

/// Instant-withdrawal penalty at vault creation: 50%, decaying linearly to
/// 0% at the vault's natural end.
pub const MAX_INSTANT_WITHDRAWAL_PENALTY_BP: u128 = 5_000;

// ============================================================
// EPOCH REWARDS
// ============================================================

/// Per-epoch eligible reward: 0.05% of the protocol balance at epoch start.
pub const EPOCH_REWARD_RATE_BP: u128 = 5;

/// Gateway pool share of the eligible reward (observers get the rest).
pub const GATEWAY_POOL_PERCENT: u128 = 90;

/// Observer pool share of the eligible reward.
pub const OBSERVER_POOL_PERCENT: u128 = 10;

/// A prescribed observer that never submitted its report keeps only this
/// share of its gateway reward for the epoch.
pub const MISSED_OBSERVATION_REWARD_PERCENT: u128 = 75;

// ============================================================
// PURE TOKEN MATH
// ============================================================

/// Penalty rate in basis points for withdrawing a vault early: the maximum
/// at `start`, 0 at `end`, linear in between.
pub fn instant_withdrawal_penalty_bp(start: u64, end: u64, now: u64) -> u128 {
    if now >= end {
        return 0;
    }
    if now <= start || end <= start {
        return MAX_INSTANT_WITHDRAWAL_PENALTY_BP;
    }
    let remaining = (end - now) as u128;
    let total = (end - start) as u128;
    MAX_INSTANT_WITHDRAWAL_PENALTY_BP * remaining / total
}

/// Split a vault balance into (to_owner, to_protocol) for an instant
/// withdrawal. Guarantees `to_owner + to_protocol == balance`.
pub fn split_instant_withdrawal(balance: u128, penalty_bp: u128) -> (u128, u128) {
    let penalty = balance * penalty_bp / BP_DENOM;
    (balance - penalty, penalty)
}

/// Split an operator stake on leave into (minimum-stake portion, excess).
/// The minimum portion takes the long lock, the excess the short one.
pub fn leave_network_stake_split(operator_stake: u128) -> (u128, u128) {
    let minimum = operator_stake.min(MIN_OPERATOR_STAKE);
    (minimum, operator_stake - minimum)
}

/// Eligible reward pools for one epoch given the protocol balance at epoch
/// start. Returns (gateway_pool, observer_pool); their sum is the total
/// eligible reward.
pub fn epoch_reward_pools(protocol_balance: u128) -> (u128, u128) {
    let total = protocol_balance * EPOCH_REWARD_RATE_BP / BP_DENOM;
    let gateway_pool = total * GATEWAY_POOL_PERCENT / 100;
    (gateway_pool, total - gateway_pool)
}

/// Split one gateway's epoch reward between operator and delegate pool by
/// the gateway's `delegate_reward_share_ratio` (0..=100). Remainder from
/// rounding stays with the operator.
pub fn split_gateway_reward(reward: u128, delegate_share_ratio: u8) -> (u128, u128) {
    let delegate_pool = reward * delegate_share_ratio as u128 / 100;
    (reward - delegate_pool, delegate_pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_penalty_endpoints() {
        let start = 1_000;
        let end = start + STAKE_WITHDRAWAL_LOCK_MS;
        assert_eq!(
            instant_withdrawal_penalty_bp(start, end, start),
            MAX_INSTANT_WITHDRAWAL_PENALTY_BP
        );
        assert_eq!(instant_withdrawal_penalty_bp(start, end, end), 0);
        assert_eq!(instant_withdrawal_penalty_bp(start, end, end + 1), 0);
    }

    #[test]
    fn test_penalty_midpoint_is_half_maximum() {
        let start = 0;
        let end = 1_000_000;
        assert_eq!(instant_withdrawal_penalty_bp(start, end, 500_000), 2_500);
    }

    #[test]
    fn test_instant_withdrawal_split_conserves_amount() {
        for balance in [1u128, 999, 1_000_000, 123_456_789] {
            for bp in [0u128, 1, 2_500, 5_000] {
                let (owner, protocol) = split_instant_withdrawal(balance, bp);
                assert_eq!(owner + protocol, balance);
            }
        }
    }

    #[test]
    fn test_leave_split_at_and_above_minimum() {
        let (min_part, excess) = leave_network_stake_split(MIN_OPERATOR_STAKE);
        assert_eq!(min_part, MIN_OPERATOR_STAKE);
        assert_eq!(excess, 0);

        let (min_part, excess) = leave_network_stake_split(MIN_OPERATOR_STAKE + 77);
        assert_eq!(min_part, MIN_OPERATOR_STAKE);
        assert_eq!(excess, 77);
    }

    #[test]
    fn test_epoch_reward_pools_90_10() {
        // 0.05% of 10_000_000: total 5_000, gateway 4_500, observer 500
        let (gw, obs) = epoch_reward_pools(10_000_000);
        assert_eq!(gw, 4_500);
        assert_eq!(obs, 500);
        assert_eq!(gw + obs, 5_000);
    }

    #[test]
    fn test_split_gateway_reward_rounding_to_operator() {
        let (op, del) = split_gateway_reward(1_001, 50);
        assert_eq!(del, 500);
        assert_eq!(op, 501);
        assert_eq!(op + del, 1_001);

        let (op, del) = split_gateway_reward(1_000, 0);
        assert_eq!((op, del), (1_000, 0));
        let (op, del) = split_gateway_reward(1_000, 100);
        assert_eq!((op, del), (0, 1_000));
    }
}
