//! Request/response boundary types and command parsing.
//!
//! The boundary delivers loosely-typed requests: an action name plus a
//! string-to-string parameter map. `Command::parse` turns one into a
//! strongly-typed command (or a validation error) before any handler logic
//! runs; handlers never touch raw parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mgn_common::Address;

use crate::error::{bail_validation, LedgerError, Result};
use crate::state::{CostIntent, GatewaySettingsUpdate, JoinNetworkParams, RecordKind};

/// Hard cap on a serialized request, enforced before dispatch.
pub const MAX_REQUEST_BYTES: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub origin: Address,
    pub timestamp: u64,
    pub action: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub message_id: String,
}

/// An outbound message the boundary should deliver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub target: Address,
    pub action: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Payload for notices that carry more than tags (epoch snapshots).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A liquid balance that changed during the request, for the boundary's
/// balance-patch stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancePatch {
    pub address: Address,
    pub balance: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub message_id: String,
    pub data: Option<Value>,
    pub notifications: Vec<Notification>,
    pub balance_patches: Vec<BalancePatch>,
    pub error: Option<ErrorInfo>,
}

impl Response {
    pub fn failure(message_id: &str, error: &LedgerError) -> Self {
        Self {
            message_id: message_id.to_string(),
            data: None,
            notifications: Vec::new(),
            balance_patches: Vec::new(),
            error: Some(ErrorInfo {
                kind: error.kind().to_string(),
                message: error.to_string(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

// ============================================================
// COMMANDS
// ============================================================

/// One fully-validated action. Write commands mutate state; read commands
/// are pure and skip the pruning tick.
#[derive(Debug, Clone)]
pub enum Command {
    // writes
    Transfer {
        recipient: Address,
        quantity: u128,
        allow_unsafe: bool,
    },
    VaultedTransfer {
        recipient: Address,
        quantity: u128,
        lock_length_ms: u64,
    },
    CreateVault {
        quantity: u128,
        lock_length_ms: u64,
    },
    ExtendVault {
        vault_id: String,
        extend_length_ms: u64,
    },
    IncreaseVault {
        vault_id: String,
        quantity: u128,
    },
    InstantWithdrawal {
        vault_id: String,
        /// When set, the vault lives under this gateway (operator or
        /// delegate withdrawal vault) instead of the ledger vault map.
        gateway: Option<Address>,
    },
    JoinNetwork(JoinNetworkParams),
    LeaveNetwork,
    UpdateGatewaySettings(GatewaySettingsUpdate),
    IncreaseOperatorStake {
        quantity: u128,
    },
    DecreaseOperatorStake {
        quantity: u128,
        instant: bool,
    },
    DelegateStake {
        gateway: Address,
        quantity: u128,
    },
    DecreaseDelegateStake {
        gateway: Address,
        quantity: u128,
        instant: bool,
    },
    SaveObservations {
        epoch_index: u64,
        report_tx_id: String,
        failed_gateways: Vec<Address>,
    },
    BuyRecord {
        name: String,
        kind: RecordKind,
        years: u64,
        process_id: Address,
    },
    ExtendLease {
        name: String,
        years: u64,
    },
    IncreaseUndernameLimit {
        name: String,
        quantity: u64,
    },
    ReleaseName {
        name: String,
    },
    RequestPrimaryName {
        name: String,
    },
    ApprovePrimaryNameRequest {
        recipient: Address,
    },
    RemovePrimaryName {
        owner: Address,
    },

    // reads
    Balance {
        target: Option<Address>,
    },
    Balances,
    Vault {
        owner: Option<Address>,
        vault_id: String,
    },
    Vaults {
        owner: Option<Address>,
    },
    Gateway {
        target: Option<Address>,
    },
    Gateways,
    Delegations {
        gateway: Address,
    },
    Record {
        name: String,
    },
    Records,
    ReturnedName {
        name: String,
    },
    Epoch {
        index: Option<u64>,
    },
    EpochSettings,
    DemandFactor,
    TokenCost(CostIntent),
    TotalTokenSupply,
}

impl Command {
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Command::Balance { .. }
                | Command::Balances
                | Command::Vault { .. }
                | Command::Vaults { .. }
                | Command::Gateway { .. }
                | Command::Gateways
                | Command::Delegations { .. }
                | Command::Record { .. }
                | Command::Records
                | Command::ReturnedName { .. }
                | Command::Epoch { .. }
                | Command::EpochSettings
                | Command::DemandFactor
                | Command::TokenCost(_)
                | Command::TotalTokenSupply
        )
    }

    /// Parse and validate a raw request into a typed command.
    pub fn parse(request: &Request) -> Result<Command> {
        let p = &request.params;
        let command = match request.action.as_str() {
            "Transfer" => Command::Transfer {
                recipient: address(p, "Recipient")?,
                quantity: u128_param(p, "Quantity")?,
                allow_unsafe: bool_param(p, "Allow-Unsafe-Addresses")?.unwrap_or(false),
            },
            "Vaulted-Transfer" => Command::VaultedTransfer {
                recipient: address(p, "Recipient")?,
                quantity: u128_param(p, "Quantity")?,
                lock_length_ms: u64_param(p, "Lock-Length")?,
            },
            "Create-Vault" => Command::CreateVault {
                quantity: u128_param(p, "Quantity")?,
                lock_length_ms: u64_param(p, "Lock-Length")?,
            },
            "Extend-Vault" => Command::ExtendVault {
                vault_id: required(p, "Vault-Id")?.to_string(),
                extend_length_ms: u64_param(p, "Extend-Length")?,
            },
            "Increase-Vault" => Command::IncreaseVault {
                vault_id: required(p, "Vault-Id")?.to_string(),
                quantity: u128_param(p, "Quantity")?,
            },
            "Instant-Withdrawal" => Command::InstantWithdrawal {
                vault_id: required(p, "Vault-Id")?.to_string(),
                gateway: optional_address(p, "Gateway")?,
            },
            "Join-Network" => Command::JoinNetwork(JoinNetworkParams {
                operator_stake: u128_param(p, "Operator-Stake")?,
                observer_address: optional_address(p, "Observer-Address")?,
                label: required(p, "Label")?.to_string(),
                note: optional(p, "Note").unwrap_or_default().to_string(),
                fqdn: required(p, "FQDN")?.to_string(),
                port: u64_param(p, "Port")?
                    .try_into()
                    .map_err(|_| LedgerError::Validation("port is out of range".into()))?,
                protocol: required(p, "Protocol")?.to_string(),
                properties: address(p, "Properties")?,
                allow_delegated_staking: bool_param(p, "Allow-Delegated-Staking")?
                    .unwrap_or(false),
                min_delegated_stake: u128_param(p, "Min-Delegated-Stake")?,
                delegate_reward_share_ratio: u64_param(p, "Delegate-Reward-Share-Ratio")?
                    .try_into()
                    .map_err(|_| {
                        LedgerError::Validation(
                            "delegate reward share ratio is out of range".into(),
                        )
                    })?,
                auto_stake: bool_param(p, "Auto-Stake")?.unwrap_or(false),
            }),
            "Leave-Network" => Command::LeaveNetwork,
            "Update-Gateway-Settings" => Command::UpdateGatewaySettings(GatewaySettingsUpdate {
                observer_address: optional_address(p, "Observer-Address")?,
                label: optional(p, "Label").map(str::to_string),
                note: optional(p, "Note").map(str::to_string),
                fqdn: optional(p, "FQDN").map(str::to_string),
                port: optional_u64(p, "Port")?
                    .map(|v| {
                        v.try_into()
                            .map_err(|_| LedgerError::Validation("port is out of range".into()))
                    })
                    .transpose()?,
                protocol: optional(p, "Protocol").map(str::to_string),
                properties: optional_address(p, "Properties")?,
                allow_delegated_staking: bool_param(p, "Allow-Delegated-Staking")?,
                min_delegated_stake: optional_u128(p, "Min-Delegated-Stake")?,
                delegate_reward_share_ratio: optional_u64(p, "Delegate-Reward-Share-Ratio")?
                    .map(|v| {
                        v.try_into().map_err(|_| {
                            LedgerError::Validation(
                                "delegate reward share ratio is out of range".into(),
                            )
                        })
                    })
                    .transpose()?,
                auto_stake: bool_param(p, "Auto-Stake")?,
            }),
            "Increase-Operator-Stake" => Command::IncreaseOperatorStake {
                quantity: u128_param(p, "Quantity")?,
            },
            "Decrease-Operator-Stake" => Command::DecreaseOperatorStake {
                quantity: u128_param(p, "Quantity")?,
                instant: bool_param(p, "Instant")?.unwrap_or(false),
            },
            "Delegate-Stake" => Command::DelegateStake {
                gateway: address(p, "Address")?,
                quantity: u128_param(p, "Quantity")?,
            },
            "Decrease-Delegate-Stake" => Command::DecreaseDelegateStake {
                gateway: address(p, "Address")?,
                quantity: u128_param(p, "Quantity")?,
                instant: bool_param(p, "Instant")?.unwrap_or(false),
            },
            "Save-Observations" => Command::SaveObservations {
                epoch_index: u64_param(p, "Epoch-Index")?,
                report_tx_id: required(p, "Report-Tx-Id")?.to_string(),
                failed_gateways: address_list(p, "Failed-Gateways")?,
            },
            "Buy-Record" => Command::BuyRecord {
                name: required(p, "Name")?.to_string(),
                kind: purchase_type(p)?,
                years: optional_u64(p, "Years")?.unwrap_or(1),
                process_id: address(p, "Process-Id")?,
            },
            "Extend-Lease" => Command::ExtendLease {
                name: required(p, "Name")?.to_string(),
                years: u64_param(p, "Years")?,
            },
            "Increase-Undername-Limit" => Command::IncreaseUndernameLimit {
                name: required(p, "Name")?.to_string(),
                quantity: u64_param(p, "Quantity")?,
            },
            "Release-Name" => Command::ReleaseName {
                name: required(p, "Name")?.to_string(),
            },
            "Request-Primary-Name" => Command::RequestPrimaryName {
                name: required(p, "Name")?.to_string(),
            },
            "Approve-Primary-Name-Request" => Command::ApprovePrimaryNameRequest {
                recipient: address(p, "Recipient")?,
            },
            "Remove-Primary-Name" => Command::RemovePrimaryName {
                owner: address(p, "Owner")?,
            },

            "Balance" => Command::Balance {
                target: optional_address(p, "Target")?,
            },
            "Balances" => Command::Balances,
            "Vault" => Command::Vault {
                owner: optional_address(p, "Owner")?,
                vault_id: required(p, "Vault-Id")?.to_string(),
            },
            "Vaults" => Command::Vaults {
                owner: optional_address(p, "Owner")?,
            },
            "Gateway" => Command::Gateway {
                target: optional_address(p, "Target")?,
            },
            "Gateways" => Command::Gateways,
            "Delegations" => Command::Delegations {
                gateway: address(p, "Address")?,
            },
            "Record" => Command::Record {
                name: required(p, "Name")?.to_string(),
            },
            "Records" => Command::Records,
            "Returned-Name" => Command::ReturnedName {
                name: required(p, "Name")?.to_string(),
            },
            "Epoch" => Command::Epoch {
                index: optional_u64(p, "Epoch-Index")?,
            },
            "Epoch-Settings" => Command::EpochSettings,
            "Demand-Factor" => Command::DemandFactor,
            "Token-Cost" => Command::TokenCost(cost_intent(p)?),
            "Total-Token-Supply" => Command::TotalTokenSupply,

            other => bail_validation!("unknown action: {other}"),
        };
        Ok(command)
    }
}

// ============================================================
// PARAMETER HELPERS
// ============================================================

fn optional<'a>(params: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str)
}

fn required<'a>(params: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    match optional(params, key) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => bail_validation!("missing required parameter {key}"),
    }
}

fn u128_param(params: &BTreeMap<String, String>, key: &str) -> Result<u128> {
    let raw = required(params, key)?;
    raw.parse()
        .map_err(|_| LedgerError::Validation(format!("{key} must be a non-negative integer, got {raw}")))
}

fn optional_u128(params: &BTreeMap<String, String>, key: &str) -> Result<Option<u128>> {
    match optional(params, key) {
        Some(_) => u128_param(params, key).map(Some),
        None => Ok(None),
    }
}

fn u64_param(params: &BTreeMap<String, String>, key: &str) -> Result<u64> {
    let raw = required(params, key)?;
    raw.parse()
        .map_err(|_| LedgerError::Validation(format!("{key} must be a non-negative integer, got {raw}")))
}

fn optional_u64(params: &BTreeMap<String, String>, key: &str) -> Result<Option<u64>> {
    match optional(params, key) {
        Some(_) => u64_param(params, key).map(Some),
        None => Ok(None),
    }
}

fn bool_param(params: &BTreeMap<String, String>, key: &str) -> Result<Option<bool>> {
    match optional(params, key) {
        None => Ok(None),
        Some("true") => Ok(Some(true)),
        Some("false") => Ok(Some(false)),
        Some(other) => bail_validation!("{key} must be \"true\" or \"false\", got {other}"),
    }
}

fn address(params: &BTreeMap<String, String>, key: &str) -> Result<Address> {
    let raw = required(params, key)?;
    Address::parse(raw).map_err(|e| LedgerError::Validation(format!("{key}: {e}")))
}

fn optional_address(params: &BTreeMap<String, String>, key: &str) -> Result<Option<Address>> {
    match optional(params, key) {
        Some(_) => address(params, key).map(Some),
        None => Ok(None),
    }
}

/// Comma-separated address list; an absent or empty parameter is an empty
/// list.
fn address_list(params: &BTreeMap<String, String>, key: &str) -> Result<Vec<Address>> {
    match optional(params, key) {
        None | Some("") => Ok(Vec::new()),
        Some(raw) => raw
            .split(',')
            .map(|part| {
                Address::parse(part.trim())
                    .map_err(|e| LedgerError::Validation(format!("{key}: {e}")))
            })
            .collect(),
    }
}

fn purchase_type(params: &BTreeMap<String, String>) -> Result<RecordKind> {
    match optional(params, "Purchase-Type").unwrap_or("lease") {
        "lease" => Ok(RecordKind::Lease),
        "permabuy" => Ok(RecordKind::Permabuy),
        other => bail_validation!("Purchase-Type must be \"lease\" or \"permabuy\", got {other}"),
    }
}

fn cost_intent(params: &BTreeMap<String, String>) -> Result<CostIntent> {
    let name = required(params, "Name")?.to_string();
    match required(params, "Intent")? {
        "Buy-Record" => Ok(CostIntent::BuyRecord {
            name,
            kind: purchase_type(params)?,
            years: optional_u64(params, "Years")?.unwrap_or(1),
        }),
        "Extend-Lease" => Ok(CostIntent::ExtendLease {
            name,
            years: u64_param(params, "Years")?,
        }),
        "Increase-Undername-Limit" => Ok(CostIntent::IncreaseUndernameLimit {
            name,
            quantity: u64_param(params, "Quantity")?,
        }),
        other => bail_validation!("unknown Token-Cost intent: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(action: &str, params: &[(&str, &str)]) -> Request {
        Request {
            origin: Address::parse(&"s".repeat(43)).unwrap(),
            timestamp: 1_700_000_000_000,
            action: action.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            message_id: "msg-1".to_string(),
        }
    }

    #[test]
    fn test_parse_transfer() {
        let recipient = "r".repeat(43);
        let req = request("Transfer", &[("Recipient", &recipient), ("Quantity", "500")]);
        match Command::parse(&req).unwrap() {
            Command::Transfer {
                recipient,
                quantity,
                allow_unsafe,
            } => {
                assert_eq!(recipient.as_str(), "r".repeat(43));
                assert_eq!(quantity, 500);
                assert!(!allow_unsafe);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_quantity() {
        let recipient = "r".repeat(43);
        for bad in ["-5", "1.5", "abc", ""] {
            let req = request("Transfer", &[("Recipient", &recipient), ("Quantity", bad)]);
            let err = Command::parse(&req).unwrap_err();
            assert_eq!(err.kind(), "ValidationError");
        }
    }

    #[test]
    fn test_parse_unknown_action() {
        let err = Command::parse(&request("Mint", &[])).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn test_failed_gateways_list() {
        let a = "a".repeat(43);
        let b = "b".repeat(43);
        let joined = format!("{a},{b}");
        let req = request(
            "Save-Observations",
            &[
                ("Epoch-Index", "3"),
                ("Report-Tx-Id", "tx-1"),
                ("Failed-Gateways", &joined),
            ],
        );
        match Command::parse(&req).unwrap() {
            Command::SaveObservations {
                failed_gateways, ..
            } => assert_eq!(failed_gateways.len(), 2),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_reads_are_reads() {
        for action in ["Balance", "Gateways", "Demand-Factor", "Total-Token-Supply"] {
            let cmd = Command::parse(&request(action, &[])).unwrap();
            assert!(cmd.is_read());
        }
        let recipient = "r".repeat(43);
        let cmd = Command::parse(&request(
            "Transfer",
            &[("Recipient", &recipient), ("Quantity", "1")],
        ))
        .unwrap();
        assert!(!cmd.is_read());
    }
}
