//! State transition tests, grouped by registry. Shared fixtures live
//! here; every scenario finishes by checking the supply invariant.

mod gateway_tests;

use mgn_common::Address;

use crate::state::State;
use crate::tokenomics::TOTAL_SUPPLY;

/// Fixed fixture genesis timestamp.
pub const T0: u64 = 1_700_000_000_000;

pub fn addr(fill: char) -> Address {
    Address::parse(&fill.to_string().repeat(43)).unwrap()
}

/// Fresh state with the given liquid balances carved out of the protocol
/// balance, so the supply invariant holds from the start.
pub fn funded(accounts: &[(char, u128)]) -> State {
    let mut state = State::new(T0);
    for (fill, amount) in accounts {
        state.balances.insert(addr(*fill), *amount);
        state.protocol_balance -= amount;
    }
    state
}

/// Every token position must sum to the fixed supply in all reachable
/// states.
pub fn assert_supply(state: &State) {
    assert_eq!(state.total_accounted_supply(), TOTAL_SUPPLY);
}
