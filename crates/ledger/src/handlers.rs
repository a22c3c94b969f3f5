//! Request engine: size gate, command dispatch, atomicity.
//!
//! Writes run against a clone of the state. The pruning tick and the
//! handler both apply to the clone; only a successful handler swaps it in,
//! so a failed request observes no state change at all, pruning included.
//! Reads skip the tick entirely and answer from the live state.

use serde::Serialize;
use serde_json::{json, Value};

use mgn_common::Address;

use crate::epochs::Epoch;
use crate::error::{bail_conflict, bail_validation, LedgerError, Result};
use crate::pricing::returned_name_multiplier;
use crate::request::{
    BalancePatch, Command, Notification, Request, Response, MAX_REQUEST_BYTES,
};
use crate::state::State;
use crate::tokenomics::TOTAL_SUPPLY;

pub struct Engine {
    state: State,
}

impl Engine {
    pub fn new(state: State) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Apply one request. Never panics; every failure comes back as a
    /// structured error response.
    pub fn handle(&mut self, request: &Request) -> Response {
        match self.try_handle(request) {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(
                    action = %request.action,
                    origin = %request.origin,
                    kind = error.kind(),
                    %error,
                    "request rejected"
                );
                Response::failure(&request.message_id, &error)
            }
        }
    }

    fn try_handle(&mut self, request: &Request) -> Result<Response> {
        check_size(request)?;
        let command = Command::parse(request)?;

        if command.is_read() {
            let data = read(&self.state, &command, request)?;
            return Ok(Response {
                message_id: request.message_id.clone(),
                data: Some(data),
                notifications: Vec::new(),
                balance_patches: Vec::new(),
                error: None,
            });
        }

        let mut next = self.state.clone();
        let report = next.advance_time(request.timestamp);
        let (data, mut notifications) = write(&mut next, &command, request)?;
        for epoch in &report.distributed_epochs {
            notifications.push(distribution_notice(&request.origin, epoch)?);
        }
        let balance_patches = next
            .drain_balance_patches()
            .into_iter()
            .map(|(address, balance)| BalancePatch { address, balance })
            .collect();
        self.state = next;
        Ok(Response {
            message_id: request.message_id.clone(),
            data,
            notifications,
            balance_patches,
            error: None,
        })
    }
}

/// The size gate covers the caller-controlled payload: action, message id,
/// and every parameter key and value.
fn check_size(request: &Request) -> Result<()> {
    let size: usize = request.action.len()
        + request.message_id.len()
        + request
            .params
            .iter()
            .map(|(key, value)| key.len() + value.len())
            .sum::<usize>();
    if size > MAX_REQUEST_BYTES {
        bail_validation!("request exceeds the {MAX_REQUEST_BYTES} byte limit");
    }
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| LedgerError::Validation(format!("failed to encode response data: {e}")))
}

fn notice(target: &Address, action: &str, tags: &[(&str, String)]) -> Notification {
    Notification {
        target: target.clone(),
        action: action.to_string(),
        tags: tags
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect(),
        data: None,
    }
}

/// The single notice carrying a paid-out epoch's full snapshot.
fn distribution_notice(target: &Address, epoch: &Epoch) -> Result<Notification> {
    Ok(Notification {
        target: target.clone(),
        action: "Epoch-Distribution-Notice".to_string(),
        tags: [
            ("Epoch-Index".to_string(), epoch.index.to_string()),
            (
                "Total-Distributed".to_string(),
                epoch.distributions.total_distributed.to_string(),
            ),
        ]
        .into_iter()
        .collect(),
        data: Some(to_json(epoch)?),
    })
}

// ============================================================
// WRITE DISPATCH
// ============================================================

fn write(
    state: &mut State,
    command: &Command,
    request: &Request,
) -> Result<(Option<Value>, Vec<Notification>)> {
    let origin = &request.origin;
    let now = request.timestamp;
    let msg_id = request.message_id.as_str();

    match command {
        Command::Transfer {
            recipient,
            quantity,
            allow_unsafe,
        } => {
            let outcome = state.transfer(origin, recipient, *quantity, *allow_unsafe)?;
            let notifications = vec![
                notice(
                    origin,
                    "Debit-Notice",
                    &[
                        ("Recipient", recipient.to_string()),
                        ("Quantity", quantity.to_string()),
                    ],
                ),
                notice(
                    recipient,
                    "Credit-Notice",
                    &[
                        ("Sender", origin.to_string()),
                        ("Quantity", quantity.to_string()),
                    ],
                ),
            ];
            Ok((Some(to_json(&outcome)?), notifications))
        }
        Command::VaultedTransfer {
            recipient,
            quantity,
            lock_length_ms,
        } => {
            state.vaulted_transfer(origin, recipient, msg_id, *quantity, *lock_length_ms, now)?;
            let notifications = vec![notice(
                recipient,
                "Vaulted-Credit-Notice",
                &[
                    ("Sender", origin.to_string()),
                    ("Quantity", quantity.to_string()),
                    ("Vault-Id", msg_id.to_string()),
                ],
            )];
            Ok((Some(json!({ "Vault-Id": msg_id })), notifications))
        }
        Command::CreateVault {
            quantity,
            lock_length_ms,
        } => {
            state.create_vault(origin, msg_id, *quantity, *lock_length_ms, now)?;
            let vault = &state.vaults[origin][msg_id];
            Ok((
                Some(json!({ "Vault-Id": msg_id, "Vault": to_json(vault)? })),
                Vec::new(),
            ))
        }
        Command::ExtendVault {
            vault_id,
            extend_length_ms,
        } => {
            let new_end = state.extend_vault(origin, vault_id, *extend_length_ms, now)?;
            Ok((Some(json!({ "End-Timestamp": new_end })), Vec::new()))
        }
        Command::IncreaseVault { vault_id, quantity } => {
            let balance = state.increase_vault_balance(origin, vault_id, *quantity, now)?;
            Ok((Some(json!({ "Balance": balance })), Vec::new()))
        }
        Command::InstantWithdrawal { vault_id, gateway } => {
            let withdrawal = match gateway {
                Some(gateway) => state.instant_withdraw_stake(origin, gateway, vault_id, now)?,
                None => state.instant_withdraw_vault(origin, vault_id, now)?,
            };
            Ok((Some(to_json(&withdrawal)?), Vec::new()))
        }
        Command::JoinNetwork(params) => {
            state.join_network(origin, params.clone(), now)?;
            Ok((Some(to_json(&state.gateways[origin])?), Vec::new()))
        }
        Command::LeaveNetwork => {
            state.leave_network(origin, msg_id, now)?;
            Ok((Some(to_json(&state.gateways[origin])?), Vec::new()))
        }
        Command::UpdateGatewaySettings(update) => {
            state.update_gateway_settings(origin, update.clone())?;
            Ok((Some(to_json(&state.gateways[origin])?), Vec::new()))
        }
        Command::IncreaseOperatorStake { quantity } => {
            let stake = state.increase_operator_stake(origin, *quantity)?;
            Ok((Some(json!({ "Operator-Stake": stake })), Vec::new()))
        }
        Command::DecreaseOperatorStake { quantity, instant } => {
            let outcome =
                state.decrease_operator_stake(origin, *quantity, *instant, msg_id, now)?;
            Ok((Some(to_json(&outcome)?), Vec::new()))
        }
        Command::DelegateStake { gateway, quantity } => {
            let stake = state.delegate_stake(origin, gateway, *quantity, now)?;
            Ok((Some(json!({ "Delegated-Stake": stake })), Vec::new()))
        }
        Command::DecreaseDelegateStake {
            gateway,
            quantity,
            instant,
        } => {
            let outcome =
                state.decrease_delegate_stake(origin, gateway, *quantity, *instant, msg_id, now)?;
            Ok((Some(to_json(&outcome)?), Vec::new()))
        }
        Command::SaveObservations {
            epoch_index,
            report_tx_id,
            failed_gateways,
        } => {
            state.save_observations(origin, *epoch_index, report_tx_id, failed_gateways, now)?;
            Ok((Some(json!({ "Epoch-Index": epoch_index })), Vec::new()))
        }
        Command::BuyRecord {
            name,
            kind,
            years,
            process_id,
        } => {
            let receipt =
                state.buy_record(origin, name, *kind, *years, process_id.clone(), now)?;
            let notifications = vec![notice(
                process_id,
                "Buy-Record-Notice",
                &[
                    ("Name", receipt.name.clone()),
                    ("Purchase-Price", receipt.purchase_price.to_string()),
                ],
            )];
            Ok((Some(to_json(&receipt)?), notifications))
        }
        Command::ExtendLease { name, years } => {
            let new_end = state.extend_lease(origin, name, *years, now)?;
            Ok((Some(json!({ "End-Timestamp": new_end })), Vec::new()))
        }
        Command::IncreaseUndernameLimit { name, quantity } => {
            let limit = state.increase_undername_limit(origin, name, *quantity, now)?;
            Ok((Some(json!({ "Undername-Limit": limit })), Vec::new()))
        }
        Command::ReleaseName { name } => {
            state.release_name(origin, name, now)?;
            let auction = &state.auctions[&name.to_ascii_lowercase()];
            Ok((Some(to_json(auction)?), Vec::new()))
        }
        Command::RequestPrimaryName { name } => {
            state.request_primary_name(origin, name, now)?;
            let normalized = name.to_ascii_lowercase();
            let process_id = state.records[&normalized].process_id.clone();
            let notifications = vec![notice(
                &process_id,
                "Primary-Name-Request-Notice",
                &[
                    ("Name", normalized.clone()),
                    ("Initiator", origin.to_string()),
                ],
            )];
            Ok((Some(json!({ "Name": normalized })), notifications))
        }
        Command::ApprovePrimaryNameRequest { recipient } => {
            let name = state.approve_primary_name_request(origin, recipient)?;
            let notifications = vec![notice(
                recipient,
                "Primary-Name-Notice",
                &[("Name", name.clone())],
            )];
            Ok((Some(json!({ "Name": name, "Owner": recipient })), notifications))
        }
        Command::RemovePrimaryName { owner } => {
            let name = state.remove_primary_name(origin, owner)?;
            Ok((Some(json!({ "Name": name, "Owner": owner })), Vec::new()))
        }
        _ => bail_validation!("not a write action: {}", request.action),
    }
}

// ============================================================
// READ DISPATCH
// ============================================================

fn read(state: &State, command: &Command, request: &Request) -> Result<Value> {
    let origin = &request.origin;
    let now = request.timestamp;

    match command {
        Command::Balance { target } => {
            let target = target.as_ref().unwrap_or(origin);
            Ok(json!({
                "Target": target,
                "Balance": state.balance_of(target),
            }))
        }
        Command::Balances => to_json(&state.balances),
        Command::Vault { owner, vault_id } => {
            let owner = owner.as_ref().unwrap_or(origin);
            match state.vaults.get(owner).and_then(|m| m.get(vault_id)) {
                Some(vault) => to_json(vault),
                None => bail_conflict!("vault {vault_id} not found for {owner}"),
            }
        }
        Command::Vaults { owner } => match owner {
            Some(owner) => to_json(&state.vaults.get(owner).cloned().unwrap_or_default()),
            None => to_json(&state.vaults),
        },
        Command::Gateway { target } => {
            let target = target.as_ref().unwrap_or(origin);
            match state.gateways.get(target) {
                Some(gateway) => to_json(gateway),
                None => bail_conflict!("{target} is not in the gateway registry"),
            }
        }
        Command::Gateways => to_json(&state.gateways),
        Command::Delegations { gateway } => match state.gateways.get(gateway) {
            Some(gateway) => to_json(&gateway.delegates),
            None => bail_conflict!("{gateway} is not in the gateway registry"),
        },
        Command::Record { name } => {
            let name = name.to_ascii_lowercase();
            match state.records.get(&name) {
                Some(record) => to_json(record),
                None => bail_conflict!("name {name} is not registered"),
            }
        }
        Command::Records => to_json(&state.records),
        Command::ReturnedName { name } => {
            let name = name.to_ascii_lowercase();
            match state.returned_names.get(&name) {
                Some(returned) => Ok(json!({
                    "Name": name,
                    "Start-Timestamp": returned.start_timestamp,
                    "End-Timestamp": returned.end_timestamp,
                    "Initiator": returned.initiator,
                    "Premium-Multiplier": returned_name_multiplier(returned.start_timestamp, now),
                })),
                None => bail_conflict!("name {name} is not in the returned pool"),
            }
        }
        Command::Epoch { index } => {
            let index = match index.or_else(|| state.epoch_settings.index_at(now)) {
                Some(index) => index,
                None => bail_conflict!("no epoch exists yet"),
            };
            match state.epochs.get(&index) {
                Some(epoch) => to_json(epoch),
                None => bail_conflict!("epoch {index} does not exist"),
            }
        }
        Command::EpochSettings => to_json(&state.epoch_settings),
        Command::DemandFactor => to_json(&state.demand),
        Command::TokenCost(intent) => {
            let cost = state.token_cost(intent, now)?;
            Ok(json!({ "Token-Cost": cost }))
        }
        Command::TotalTokenSupply => Ok(json!({
            "Total": TOTAL_SUPPLY,
            "Liquid": state.total_liquid(),
            "Vaulted": state.total_vaulted(),
            "Staked": state.total_operator_staked(),
            "Delegated": state.total_delegated_staked(),
            "Withdrawing": state.total_withdrawal_vaulted(),
            "Protocol": state.protocol_balance,
        })),
        _ => bail_validation!("not a read action: {}", request.action),
    }
}
