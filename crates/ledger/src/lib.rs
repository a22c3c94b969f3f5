//! # MGN Ledger
//!
//! The economic state machine of the Meridian Gateway Network: token
//! ledger and time-locked vaults, gateway registry with staking and
//! delegation, epoch-based observer selection and reward distribution, the
//! leasable name registry with demand-driven pricing, and the lazy pruning
//! scheduler that expires everything time-bound.
//!
//! The crate is a pure, single-threaded transition function. The boundary
//! runtime feeds totally-ordered [`request::Request`]s into an
//! [`handlers::Engine`], which applies each one atomically and returns a
//! [`request::Response`] with result data, outbound notifications, and
//! balance patches. Nothing here reads a clock, spawns a thread, or
//! touches the network; the request timestamp is the only source of time.
//!
//! | Module | Contents |
//! |--------|----------|
//! | `tokenomics` | Supply, staking and vault constants, reward math |
//! | `pricing` | Name fee table, price formulas, decay curves |
//! | `demand` | Demand-factor controller |
//! | `epochs` | Epoch timeline, weights, record types |
//! | `state` | The owned state tree and all transitions |
//! | `genesis` | Initial-state loading |
//! | `request` | Boundary types and command parsing |
//! | `handlers` | The engine: dispatch and atomicity |

pub mod demand;
pub mod epochs;
pub mod error;
pub mod genesis;
pub mod handlers;
pub mod pricing;
pub mod request;
pub mod state;
pub mod tokenomics;

#[cfg(test)]
mod e2e_tests;

pub use error::{LedgerError, Result};
pub use genesis::GenesisConfig;
pub use handlers::Engine;
pub use request::{Command, Notification, Request, Response};
pub use state::State;
