//! Genesis loading: carve initial balances and reserved names out of the
//! freshly-minted supply.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use mgn_common::Address;

use crate::error::{bail_validation, Result};
use crate::pricing::validate_name;
use crate::state::{ReservedName, State};
use crate::tokenomics::TOTAL_SUPPLY;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub genesis_timestamp: u64,
    /// Initial liquid balances; everything unallocated stays with the
    /// protocol.
    #[serde(default)]
    pub balances: BTreeMap<Address, u128>,
    /// Name -> optional exclusive purchaser. `None` reserves outright.
    #[serde(default)]
    pub reserved_names: BTreeMap<String, Option<Address>>,
}

impl State {
    pub fn from_genesis(config: &GenesisConfig) -> Result<State> {
        let mut state = State::new(config.genesis_timestamp);
        let allocated: u128 = config.balances.values().sum();
        if allocated > TOTAL_SUPPLY {
            bail_validation!(
                "genesis balances allocate {allocated}, more than the total supply of {TOTAL_SUPPLY}"
            );
        }
        for (address, &balance) in &config.balances {
            if balance == 0 {
                bail_validation!("genesis balance for {address} must be positive");
            }
            state.balances.insert(address.clone(), balance);
        }
        state.protocol_balance = TOTAL_SUPPLY - allocated;

        for (raw_name, target) in &config.reserved_names {
            let name = validate_name(raw_name)?;
            state.reserved_names.insert(
                name,
                ReservedName {
                    target: target.clone(),
                },
            );
        }

        state.recompute_pruning();
        tracing::info!(
            accounts = state.balances.len(),
            reserved = state.reserved_names.len(),
            protocol_balance = state.protocol_balance,
            "genesis state loaded"
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(fill: char) -> Address {
        Address::parse(&fill.to_string().repeat(43)).unwrap()
    }

    #[test]
    fn test_genesis_allocates_remainder_to_protocol() {
        let mut config = GenesisConfig {
            genesis_timestamp: 1_700_000_000_000,
            ..Default::default()
        };
        config.balances.insert(addr('a'), 1_000);
        config.balances.insert(addr('b'), 2_000);
        let state = State::from_genesis(&config).unwrap();
        assert_eq!(state.protocol_balance, TOTAL_SUPPLY - 3_000);
        assert_eq!(state.total_accounted_supply(), TOTAL_SUPPLY);
    }

    #[test]
    fn test_genesis_rejects_overallocation() {
        let mut config = GenesisConfig::default();
        config.balances.insert(addr('a'), TOTAL_SUPPLY);
        config.balances.insert(addr('b'), 1);
        assert!(State::from_genesis(&config).is_err());
    }

    #[test]
    fn test_genesis_reserved_names_are_normalized() {
        let mut config = GenesisConfig::default();
        config.reserved_names.insert("MGN".to_string(), None);
        config
            .reserved_names
            .insert("partner".to_string(), Some(addr('p')));
        let state = State::from_genesis(&config).unwrap();
        assert!(state.reserved_names.contains_key("mgn"));
        assert_eq!(
            state.reserved_names["partner"].target.as_ref().unwrap(),
            &addr('p')
        );
    }
}
