//! Gateway registry transitions: join/leave lifecycle, staking,
//! delegation, withdrawal vaults.

use super::{addr, assert_supply, funded, T0};
use crate::state::{GatewaySettingsUpdate, GatewayStatus, JoinNetworkParams};
use crate::tokenomics::{
    GATEWAY_LEAVE_NOTICE_MS, LEAVE_MINIMUM_STAKE_LOCK_MS, MAX_INSTANT_WITHDRAWAL_PENALTY_BP,
    MIN_DELEGATED_STAKE, MIN_OPERATOR_STAKE, STAKE_WITHDRAWAL_LOCK_MS, UMERI_PER_MERI,
};

fn join_params(stake: u128) -> JoinNetworkParams {
    JoinNetworkParams {
        operator_stake: stake,
        observer_address: None,
        label: "mgn-gateway-1".to_string(),
        note: String::new(),
        fqdn: "gw1.example.com".to_string(),
        port: 443,
        protocol: "https".to_string(),
        properties: addr('p'),
        allow_delegated_staking: true,
        min_delegated_stake: MIN_DELEGATED_STAKE,
        delegate_reward_share_ratio: 25,
        auto_stake: false,
    }
}

// ════════════════════════════════════════════════════════════════
// JOIN / LEAVE
// ════════════════════════════════════════════════════════════════

#[test]
fn test_join_at_exact_minimum_stake() {
    let mut state = funded(&[('g', MIN_OPERATOR_STAKE)]);
    state
        .join_network(&addr('g'), join_params(MIN_OPERATOR_STAKE), T0)
        .unwrap();
    let gateway = &state.gateways[&addr('g')];
    assert_eq!(gateway.operator_stake, MIN_OPERATOR_STAKE);
    assert_eq!(gateway.status, GatewayStatus::Joined);
    assert_eq!(state.balance_of(&addr('g')), 0);
    assert_supply(&state);
}

#[test]
fn test_join_one_unit_below_minimum_fails() {
    let mut state = funded(&[('g', MIN_OPERATOR_STAKE)]);
    let err = state
        .join_network(&addr('g'), join_params(MIN_OPERATOR_STAKE - 1), T0)
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    assert!(state.gateways.is_empty());
    assert_eq!(state.balance_of(&addr('g')), MIN_OPERATOR_STAKE);
}

#[test]
fn test_join_twice_conflicts() {
    let mut state = funded(&[('g', 3 * MIN_OPERATOR_STAKE)]);
    state
        .join_network(&addr('g'), join_params(MIN_OPERATOR_STAKE), T0)
        .unwrap();
    let err = state
        .join_network(&addr('g'), join_params(MIN_OPERATOR_STAKE), T0)
        .unwrap_err();
    assert_eq!(err.kind(), "StateConflictError");
}

#[test]
fn test_join_rejects_invalid_settings() {
    let mut state = funded(&[('g', 2 * MIN_OPERATOR_STAKE)]);
    let mut params = join_params(MIN_OPERATOR_STAKE);
    params.protocol = "http".to_string();
    assert!(state.join_network(&addr('g'), params, T0).is_err());
    let mut params = join_params(MIN_OPERATOR_STAKE);
    params.delegate_reward_share_ratio = 101;
    assert!(state.join_network(&addr('g'), params, T0).is_err());
    let mut params = join_params(MIN_OPERATOR_STAKE);
    params.fqdn = "not a hostname".to_string();
    assert!(state.join_network(&addr('g'), params, T0).is_err());
    assert!(state.gateways.is_empty());
}

#[test]
fn test_leave_splits_stake_asymmetrically() {
    let excess = 5_000 * UMERI_PER_MERI;
    let mut state = funded(&[
        ('g', MIN_OPERATOR_STAKE + excess),
        ('d', MIN_DELEGATED_STAKE),
    ]);
    state
        .join_network(&addr('g'), join_params(MIN_OPERATOR_STAKE + excess), T0)
        .unwrap();
    state
        .delegate_stake(&addr('d'), &addr('g'), MIN_DELEGATED_STAKE, T0)
        .unwrap();

    state.leave_network(&addr('g'), "leave-msg", T0).unwrap();
    let gateway = &state.gateways[&addr('g')];
    assert_eq!(gateway.status, GatewayStatus::Leaving);
    assert_eq!(gateway.end_timestamp, Some(T0 + GATEWAY_LEAVE_NOTICE_MS));
    assert_eq!(gateway.operator_stake, 0);
    // minimum portion: long lock, keyed by the operator address
    let min_vault = &gateway.vaults[&addr('g').to_string()];
    assert_eq!(min_vault.balance, MIN_OPERATOR_STAKE);
    assert_eq!(min_vault.end_timestamp, Some(T0 + LEAVE_MINIMUM_STAKE_LOCK_MS));
    // excess: short lock, keyed by the message id
    let excess_vault = &gateway.vaults["leave-msg"];
    assert_eq!(excess_vault.balance, excess);
    assert_eq!(excess_vault.end_timestamp, Some(T0 + STAKE_WITHDRAWAL_LOCK_MS));
    // delegates are kicked into short-lock vaults
    let delegate = &gateway.delegates[&addr('d')];
    assert_eq!(delegate.delegated_stake, 0);
    assert_eq!(delegate.vaults["leave-msg"].balance, MIN_DELEGATED_STAKE);
    assert_eq!(gateway.total_delegated_stake, 0);
    assert_supply(&state);
}

#[test]
fn test_leaving_gateway_queryable_until_end_then_pruned() {
    let mut state = funded(&[('g', MIN_OPERATOR_STAKE)]);
    state
        .join_network(&addr('g'), join_params(MIN_OPERATOR_STAKE), T0)
        .unwrap();
    state.leave_network(&addr('g'), "leave-msg", T0).unwrap();
    let end = T0 + GATEWAY_LEAVE_NOTICE_MS;

    state.advance_time(end);
    let gateway = state.gateways.get(&addr('g')).expect("still queryable at end");
    assert!(gateway.is_leaving());

    let report = state.advance_time(end + 1);
    assert_eq!(report.gateways_removed, 1);
    assert!(state.gateways.get(&addr('g')).is_none());
    // the 90-day minimum-stake vault was already released at its own end
    assert_eq!(state.balance_of(&addr('g')), MIN_OPERATOR_STAKE);
    assert_supply(&state);
}

// ════════════════════════════════════════════════════════════════
// OPERATOR STAKE
// ════════════════════════════════════════════════════════════════

#[test]
fn test_decrease_below_minimum_fails() {
    let mut state = funded(&[('g', MIN_OPERATOR_STAKE + 100)]);
    state
        .join_network(&addr('g'), join_params(MIN_OPERATOR_STAKE + 100), T0)
        .unwrap();
    let err = state
        .decrease_operator_stake(&addr('g'), 101, false, "m1", T0)
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    assert_eq!(state.gateways[&addr('g')].operator_stake, MIN_OPERATOR_STAKE + 100);
}

#[test]
fn test_decrease_creates_withdrawal_vault() {
    let extra = 1_000 * UMERI_PER_MERI;
    let mut state = funded(&[('g', MIN_OPERATOR_STAKE + extra)]);
    state
        .join_network(&addr('g'), join_params(MIN_OPERATOR_STAKE + extra), T0)
        .unwrap();
    let outcome = state
        .decrease_operator_stake(&addr('g'), extra, false, "m1", T0)
        .unwrap();
    assert_eq!(outcome.vault_id.as_deref(), Some("m1"));
    assert_eq!(outcome.amount_withdrawn, 0);
    let vault = &state.gateways[&addr('g')].vaults["m1"];
    assert_eq!(vault.balance, extra);
    assert_eq!(vault.end_timestamp, Some(T0 + STAKE_WITHDRAWAL_LOCK_MS));
    assert_supply(&state);
}

#[test]
fn test_instant_decrease_pays_maximum_penalty() {
    let extra = 1_000 * UMERI_PER_MERI;
    let mut state = funded(&[('g', MIN_OPERATOR_STAKE + extra)]);
    state
        .join_network(&addr('g'), join_params(MIN_OPERATOR_STAKE + extra), T0)
        .unwrap();
    let protocol_before = state.protocol_balance;
    let outcome = state
        .decrease_operator_stake(&addr('g'), extra, true, "m1", T0)
        .unwrap();
    assert_eq!(outcome.penalty, extra * MAX_INSTANT_WITHDRAWAL_PENALTY_BP / 10_000);
    assert_eq!(outcome.amount_withdrawn + outcome.penalty, extra);
    assert_eq!(state.balance_of(&addr('g')), outcome.amount_withdrawn);
    assert_eq!(state.protocol_balance, protocol_before + outcome.penalty);
    assert_supply(&state);
}

#[test]
fn test_instant_withdraw_pending_vault_at_midpoint() {
    let extra = 1_000 * UMERI_PER_MERI;
    let mut state = funded(&[('g', MIN_OPERATOR_STAKE + extra)]);
    state
        .join_network(&addr('g'), join_params(MIN_OPERATOR_STAKE + extra), T0)
        .unwrap();
    state
        .decrease_operator_stake(&addr('g'), extra, false, "m1", T0)
        .unwrap();
    let midpoint = T0 + STAKE_WITHDRAWAL_LOCK_MS / 2;
    let withdrawal = state
        .instant_withdraw_stake(&addr('g'), &addr('g'), "m1", midpoint)
        .unwrap();
    assert!(withdrawal.penalty_rate_bp > 0);
    assert!(withdrawal.penalty_rate_bp < MAX_INSTANT_WITHDRAWAL_PENALTY_BP);
    assert_eq!(withdrawal.amount_withdrawn + withdrawal.penalty, extra);
    assert!(state.gateways[&addr('g')].vaults.get("m1").is_none());
    assert_supply(&state);
}

// ════════════════════════════════════════════════════════════════
// DELEGATION
// ════════════════════════════════════════════════════════════════

#[test]
fn test_delegation_gates() {
    let mut state = funded(&[('g', MIN_OPERATOR_STAKE), ('d', MIN_DELEGATED_STAKE * 10)]);
    let mut params = join_params(MIN_OPERATOR_STAKE);
    params.allow_delegated_staking = false;
    state.join_network(&addr('g'), params, T0).unwrap();

    let err = state
        .delegate_stake(&addr('d'), &addr('g'), MIN_DELEGATED_STAKE, T0)
        .unwrap_err();
    assert_eq!(err.kind(), "StateConflictError");

    state
        .update_gateway_settings(
            &addr('g'),
            GatewaySettingsUpdate {
                allow_delegated_staking: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
    let err = state
        .delegate_stake(&addr('d'), &addr('g'), MIN_DELEGATED_STAKE - 1, T0)
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationError");

    let total = state
        .delegate_stake(&addr('d'), &addr('g'), MIN_DELEGATED_STAKE, T0)
        .unwrap();
    assert_eq!(total, MIN_DELEGATED_STAKE);
    assert_eq!(state.gateways[&addr('g')].total_delegated_stake, MIN_DELEGATED_STAKE);
    assert_supply(&state);
}

#[test]
fn test_delegate_stake_rejects_out_of_range_quantity() {
    let mut state = funded(&[('g', MIN_OPERATOR_STAKE), ('d', 2 * MIN_DELEGATED_STAKE)]);
    state
        .join_network(&addr('g'), join_params(MIN_OPERATOR_STAKE), T0)
        .unwrap();
    state
        .delegate_stake(&addr('d'), &addr('g'), MIN_DELEGATED_STAKE, T0)
        .unwrap();
    let err = state
        .delegate_stake(&addr('d'), &addr('g'), u128::MAX, T0)
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    assert_eq!(
        state.gateways[&addr('g')].total_delegated_stake,
        MIN_DELEGATED_STAKE
    );
    assert_eq!(state.balance_of(&addr('d')), MIN_DELEGATED_STAKE);
    assert_supply(&state);
}

#[test]
fn test_partial_delegate_withdrawal_must_keep_minimum() {
    let mut state = funded(&[('g', MIN_OPERATOR_STAKE), ('d', 2 * MIN_DELEGATED_STAKE)]);
    state
        .join_network(&addr('g'), join_params(MIN_OPERATOR_STAKE), T0)
        .unwrap();
    state
        .delegate_stake(&addr('d'), &addr('g'), 2 * MIN_DELEGATED_STAKE, T0)
        .unwrap();
    // leaving less than the minimum (but more than zero) is rejected
    let err = state
        .decrease_delegate_stake(&addr('d'), &addr('g'), MIN_DELEGATED_STAKE + 1, false, "m1", T0)
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    // full exit is fine and the entry disappears once the vault clears
    state
        .decrease_delegate_stake(&addr('d'), &addr('g'), 2 * MIN_DELEGATED_STAKE, false, "m1", T0)
        .unwrap();
    let end = T0 + STAKE_WITHDRAWAL_LOCK_MS;
    state.advance_time(end);
    assert!(state.gateways[&addr('g')].delegates.get(&addr('d')).is_none());
    assert_eq!(state.balance_of(&addr('d')), 2 * MIN_DELEGATED_STAKE);
    assert_supply(&state);
}

#[test]
fn test_observer_address_must_be_unique() {
    let mut state = funded(&[('g', MIN_OPERATOR_STAKE), ('h', MIN_OPERATOR_STAKE)]);
    let mut params = join_params(MIN_OPERATOR_STAKE);
    params.observer_address = Some(addr('o'));
    state.join_network(&addr('g'), params, T0).unwrap();
    let mut params = join_params(MIN_OPERATOR_STAKE);
    params.observer_address = Some(addr('o'));
    let err = state.join_network(&addr('h'), params, T0).unwrap_err();
    assert_eq!(err.kind(), "StateConflictError");
}
