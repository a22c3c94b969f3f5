//! End-to-end scenarios through the request boundary: parse, tick,
//! dispatch, notices, balance patches, atomicity.

use std::collections::BTreeMap;

use serde_json::json;

use mgn_common::Address;

use crate::genesis::GenesisConfig;
use crate::handlers::Engine;
use crate::request::{Request, MAX_REQUEST_BYTES};
use crate::state::State;
use crate::tokenomics::{
    MIN_OPERATOR_STAKE, MIN_VAULT_LOCK_MS, MS_PER_DAY, TOTAL_SUPPLY, UMERI_PER_MERI,
};

const T0: u64 = 1_700_000_000_000;

fn addr(fill: char) -> Address {
    Address::parse(&fill.to_string().repeat(43)).unwrap()
}

fn engine(balances: &[(char, u128)]) -> Engine {
    let config = GenesisConfig {
        genesis_timestamp: T0,
        balances: balances
            .iter()
            .map(|(fill, amount)| (addr(*fill), *amount))
            .collect(),
        reserved_names: BTreeMap::new(),
    };
    Engine::new(State::from_genesis(&config).unwrap())
}

fn request(
    origin: char,
    action: &str,
    msg_id: &str,
    timestamp: u64,
    params: &[(&str, &str)],
) -> Request {
    Request {
        origin: addr(origin),
        timestamp,
        action: action.to_string(),
        params: params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        message_id: msg_id.to_string(),
    }
}

fn assert_supply(engine: &Engine) {
    assert_eq!(engine.state().total_accounted_supply(), TOTAL_SUPPLY);
}

// ════════════════════════════════════════════════════════════════
// TRANSFERS
// ════════════════════════════════════════════════════════════════

#[test]
fn test_transfer_request_emits_notices_and_patches() {
    let mut engine = engine(&[('a', 500 * UMERI_PER_MERI)]);
    let recipient = "b".repeat(43);
    let response = engine.handle(&request(
        'a',
        "Transfer",
        "msg-1",
        T0 + 1,
        &[("Recipient", &recipient), ("Quantity", "100000000")],
    ));
    assert!(response.is_success());
    assert_eq!(response.message_id, "msg-1");

    let actions: Vec<&str> = response
        .notifications
        .iter()
        .map(|n| n.action.as_str())
        .collect();
    assert_eq!(actions, vec!["Debit-Notice", "Credit-Notice"]);
    assert_eq!(response.notifications[0].target, addr('a'));
    assert_eq!(response.notifications[1].target, addr('b'));
    assert_eq!(response.notifications[1].tags["Quantity"], "100000000");

    let patched: Vec<&Address> = response
        .balance_patches
        .iter()
        .map(|p| &p.address)
        .collect();
    assert!(patched.contains(&&addr('a')));
    assert!(patched.contains(&&addr('b')));

    assert_eq!(engine.state().balance_of(&addr('a')), 400 * UMERI_PER_MERI);
    assert_eq!(engine.state().balance_of(&addr('b')), 100 * UMERI_PER_MERI);
    assert_supply(&engine);
}

#[test]
fn test_failed_request_observes_no_state_change_at_all() {
    let mut engine = engine(&[('a', 500 * UMERI_PER_MERI)]);
    let lock = MIN_VAULT_LOCK_MS.to_string();
    let response = engine.handle(&request(
        'a',
        "Create-Vault",
        "vault-1",
        T0,
        &[("Quantity", "100000000"), ("Lock-Length", &lock)],
    ));
    assert!(response.is_success());

    // past the vault's end: a successful write would release it, but this
    // one fails, so even the pruning tick must be rolled back
    let later = T0 + MIN_VAULT_LOCK_MS + MS_PER_DAY;
    let before = serde_json::to_value(engine.state()).unwrap();
    let recipient = "b".repeat(43);
    let response = engine.handle(&request(
        'a',
        "Transfer",
        "msg-2",
        later,
        &[
            ("Recipient", &recipient),
            ("Quantity", &(1_000 * UMERI_PER_MERI).to_string()),
        ],
    ));
    assert!(!response.is_success());
    assert_eq!(
        response.error.as_ref().unwrap().kind,
        "InsufficientBalanceError"
    );
    assert!(response.notifications.is_empty());
    assert!(response.balance_patches.is_empty());
    assert_eq!(serde_json::to_value(engine.state()).unwrap(), before);

    // the same tick under a successful write does release the vault
    let response = engine.handle(&request(
        'a',
        "Transfer",
        "msg-3",
        later,
        &[("Recipient", &recipient), ("Quantity", "1")],
    ));
    assert!(response.is_success());
    assert!(engine.state().vaults.get(&addr('a')).is_none());
    assert_eq!(
        engine.state().balance_of(&addr('a')),
        500 * UMERI_PER_MERI - 1
    );
    assert_supply(&engine);
}

#[test]
fn test_oversized_request_is_rejected_before_dispatch() {
    let mut engine = engine(&[('a', 500 * UMERI_PER_MERI)]);
    let recipient = "b".repeat(43);
    let padding = "x".repeat(5_000);
    let response = engine.handle(&request(
        'a',
        "Transfer",
        "msg-1",
        T0 + 1,
        &[
            ("Recipient", &recipient),
            ("Quantity", "1"),
            ("Note", &padding),
        ],
    ));
    assert!(!response.is_success());
    assert_eq!(response.error.as_ref().unwrap().kind, "ValidationError");
    assert_eq!(engine.state().balance_of(&addr('a')), 500 * UMERI_PER_MERI);
}

#[test]
fn test_size_gate_counts_action_and_message_id() {
    let mut engine = engine(&[('a', 500 * UMERI_PER_MERI)]);
    // params alone stay under the cap; a long message id pushes past it
    let filler = "x".repeat(MAX_REQUEST_BYTES - 70);
    let long_id = "m".repeat(100);
    let response = engine.handle(&request(
        'a',
        "Balance",
        &long_id,
        T0,
        &[("Filler", &filler)],
    ));
    assert!(!response.is_success());
    assert_eq!(response.error.as_ref().unwrap().kind, "ValidationError");

    let response = engine.handle(&request('a', "Balance", "msg-1", T0, &[("Filler", &filler)]));
    assert!(response.is_success());
}

#[test]
fn test_huge_numeric_params_are_rejected_not_fatal() {
    let mut engine = engine(&[('a', 1_000 * UMERI_PER_MERI)]);
    let lock = (2 * MIN_VAULT_LOCK_MS).to_string();
    let response = engine.handle(&request(
        'a',
        "Create-Vault",
        "vault-1",
        T0,
        &[("Quantity", "100000000"), ("Lock-Length", &lock)],
    ));
    assert!(response.is_success());

    let huge = u64::MAX.to_string();
    let response = engine.handle(&request(
        'a',
        "Extend-Vault",
        "msg-2",
        T0 + 1,
        &[("Vault-Id", "vault-1"), ("Extend-Length", &huge)],
    ));
    assert!(!response.is_success());
    assert_eq!(response.error.as_ref().unwrap().kind, "ValidationError");

    let process = "p".repeat(43);
    engine.handle(&request(
        'a',
        "Buy-Record",
        "msg-3",
        T0 + 1,
        &[("Name", "ninechars"), ("Process-Id", &process)],
    ));
    let response = engine.handle(&request(
        'a',
        "Extend-Lease",
        "msg-4",
        T0 + 2,
        &[("Name", "ninechars"), ("Years", &huge)],
    ));
    assert!(!response.is_success());
    assert_eq!(response.error.as_ref().unwrap().kind, "ValidationError");
    assert_supply(&engine);
}

#[test]
fn test_unknown_action_is_a_validation_error() {
    let mut engine = engine(&[]);
    let response = engine.handle(&request('a', "Mint", "msg-1", T0, &[]));
    assert!(!response.is_success());
    assert_eq!(response.error.as_ref().unwrap().kind, "ValidationError");
}

// ════════════════════════════════════════════════════════════════
// NAME REGISTRY
// ════════════════════════════════════════════════════════════════

#[test]
fn test_quote_buy_read_round_trip() {
    let mut engine = engine(&[('a', 1_000 * UMERI_PER_MERI)]);
    let process = "p".repeat(43);

    let quote = engine.handle(&request(
        'a',
        "Token-Cost",
        "msg-0",
        T0,
        &[("Intent", "Buy-Record"), ("Name", "ninechars"), ("Years", "1")],
    ));
    assert!(quote.is_success());
    let quoted = quote.data.unwrap()["Token-Cost"].as_u64().unwrap();
    assert_eq!(quoted as u128, 400 * UMERI_PER_MERI);

    let response = engine.handle(&request(
        'a',
        "Buy-Record",
        "msg-1",
        T0,
        &[
            ("Name", "NineChars"),
            ("Purchase-Type", "lease"),
            ("Years", "1"),
            ("Process-Id", &process),
        ],
    ));
    assert!(response.is_success());
    let data = response.data.unwrap();
    assert_eq!(data["name"], json!("ninechars"));
    assert_eq!(data["purchase_price"].as_u64().unwrap() as u128, quoted as u128);
    assert_eq!(response.notifications.len(), 1);
    assert_eq!(response.notifications[0].action, "Buy-Record-Notice");
    assert_eq!(response.notifications[0].target, addr('p'));

    let read = engine.handle(&request('a', "Record", "msg-2", T0 + 1, &[("Name", "ninechars")]));
    assert!(read.is_success());
    let record = read.data.unwrap();
    assert_eq!(record["process_id"], json!(process));
    assert_eq!(record["kind"], json!("lease"));
    assert_supply(&engine);
}

#[test]
fn test_read_does_not_tick_the_clock() {
    let mut engine = engine(&[('a', 1_000 * UMERI_PER_MERI)]);
    let process = "p".repeat(43);
    engine.handle(&request(
        'a',
        "Buy-Record",
        "msg-1",
        T0,
        &[("Name", "ninechars"), ("Process-Id", &process)],
    ));

    // long after the lease and grace have passed, a read still sees the
    // record because reads never run the pruning tick
    let far = T0 + 10 * 365 * MS_PER_DAY;
    let read = engine.handle(&request('a', "Record", "msg-2", far, &[("Name", "ninechars")]));
    assert!(read.is_success());
    assert!(engine.state().records.contains_key("ninechars"));
}

// ════════════════════════════════════════════════════════════════
// VAULTS
// ════════════════════════════════════════════════════════════════

#[test]
fn test_vault_instant_withdrawal_via_requests() {
    let mut engine = engine(&[('a', 1_000 * UMERI_PER_MERI)]);
    let lock = (2 * MIN_VAULT_LOCK_MS).to_string();
    let amount = 100 * UMERI_PER_MERI;
    engine.handle(&request(
        'a',
        "Create-Vault",
        "vault-1",
        T0,
        &[("Quantity", &amount.to_string()), ("Lock-Length", &lock)],
    ));
    assert_eq!(engine.state().balance_of(&addr('a')), 900 * UMERI_PER_MERI);

    let midpoint = T0 + MIN_VAULT_LOCK_MS;
    let response = engine.handle(&request(
        'a',
        "Instant-Withdrawal",
        "msg-2",
        midpoint,
        &[("Vault-Id", "vault-1")],
    ));
    assert!(response.is_success());
    let data = response.data.unwrap();
    let withdrawn = data["amount_withdrawn"].as_u64().unwrap() as u128;
    let penalty = data["penalty"].as_u64().unwrap() as u128;
    assert_eq!(withdrawn + penalty, amount);
    assert!(penalty > 0);
    assert_eq!(
        engine.state().balance_of(&addr('a')),
        900 * UMERI_PER_MERI + withdrawn
    );
    assert!(engine.state().vaults.get(&addr('a')).is_none());
    assert_supply(&engine);
}

// ════════════════════════════════════════════════════════════════
// EPOCHS
// ════════════════════════════════════════════════════════════════

#[test]
fn test_distribution_notice_reaches_the_triggering_origin() {
    let mut engine = engine(&[('g', 2 * MIN_OPERATOR_STAKE)]);
    let properties = "p".repeat(43);
    let response = engine.handle(&request(
        'g',
        "Join-Network",
        "join-1",
        T0,
        &[
            ("Operator-Stake", &MIN_OPERATOR_STAKE.to_string()),
            ("Label", "mgn-gateway-g"),
            ("FQDN", "gw-g.example.com"),
            ("Port", "443"),
            ("Protocol", "https"),
            ("Properties", &properties),
            ("Min-Delegated-Stake", &(10 * UMERI_PER_MERI).to_string()),
            ("Delegate-Reward-Share-Ratio", "0"),
        ],
    ));
    assert!(response.is_success());
    assert!(engine.state().epochs.contains_key(&0));

    // any write past the distribution time triggers payout and the notice
    let due = engine.state().epochs[&0].distribution_timestamp;
    let response = engine.handle(&request(
        'g',
        "Increase-Operator-Stake",
        "msg-2",
        due,
        &[("Quantity", &UMERI_PER_MERI.to_string())],
    ));
    assert!(response.is_success());
    let notice = response
        .notifications
        .iter()
        .find(|n| n.action == "Epoch-Distribution-Notice")
        .expect("distribution notice");
    assert_eq!(notice.target, addr('g'));
    assert_eq!(notice.tags["Epoch-Index"], "0");
    let snapshot = notice.data.as_ref().unwrap();
    assert_eq!(snapshot["index"], json!(0));
    assert!(engine.state().epochs[&0].is_distributed());
    assert_supply(&engine);
}

#[test]
fn test_observation_requests_are_idempotent_on_stats() {
    let mut engine = engine(&[('g', 2 * MIN_OPERATOR_STAKE)]);
    let properties = "p".repeat(43);
    engine.handle(&request(
        'g',
        "Join-Network",
        "join-1",
        T0,
        &[
            ("Operator-Stake", &MIN_OPERATOR_STAKE.to_string()),
            ("Label", "mgn-gateway-g"),
            ("FQDN", "gw-g.example.com"),
            ("Port", "443"),
            ("Protocol", "https"),
            ("Properties", &properties),
            ("Min-Delegated-Stake", &(10 * UMERI_PER_MERI).to_string()),
            ("Delegate-Reward-Share-Ratio", "0"),
        ],
    ));

    // epoch 0 was materialized by the join request's own tick, before the
    // gateway existed; it becomes a prescribed observer from epoch 1 on
    let in_epoch_1 = T0 + MS_PER_DAY + 1;
    for (msg, tx) in [("obs-1", "tx-1"), ("obs-2", "tx-2")] {
        let response = engine.handle(&request(
            'g',
            "Save-Observations",
            msg,
            in_epoch_1,
            &[("Epoch-Index", "1"), ("Report-Tx-Id", tx)],
        ));
        assert!(response.is_success());
    }
    let stats = &engine.state().gateways[&addr('g')].stats;
    assert_eq!(stats.observed_epoch_count, 1);
    let epoch = &engine.state().epochs[&1];
    assert_eq!(epoch.observations.reports[&addr('g')], "tx-2");
}

#[test]
fn test_total_token_supply_breakdown_always_sums() {
    let mut engine = engine(&[('a', 1_000 * UMERI_PER_MERI), ('g', 2 * MIN_OPERATOR_STAKE)]);
    let properties = "p".repeat(43);
    engine.handle(&request(
        'g',
        "Join-Network",
        "join-1",
        T0,
        &[
            ("Operator-Stake", &MIN_OPERATOR_STAKE.to_string()),
            ("Label", "mgn-gateway-g"),
            ("FQDN", "gw-g.example.com"),
            ("Port", "443"),
            ("Protocol", "https"),
            ("Properties", &properties),
            ("Min-Delegated-Stake", &(10 * UMERI_PER_MERI).to_string()),
            ("Delegate-Reward-Share-Ratio", "0"),
        ],
    ));
    let lock = MIN_VAULT_LOCK_MS.to_string();
    engine.handle(&request(
        'a',
        "Create-Vault",
        "vault-1",
        T0 + 1,
        &[("Quantity", "100000000"), ("Lock-Length", &lock)],
    ));

    let response = engine.handle(&request('a', "Total-Token-Supply", "msg-1", T0 + 2, &[]));
    assert!(response.is_success());
    let data = response.data.unwrap();
    let total: u128 = ["Liquid", "Vaulted", "Staked", "Delegated", "Withdrawing", "Protocol"]
        .iter()
        .map(|key| data[*key].as_u64().unwrap() as u128)
        .sum();
    assert_eq!(total, TOTAL_SUPPLY);
    assert_supply(&engine);
}
