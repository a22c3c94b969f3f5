//! # MGN Common Crate
//!
//! Shared leaf types for the Meridian Gateway Network ledger.
//!
//! ## Modules
//! - `address`: wallet/process `Address` newtype and its format rules
//!
//! Everything here is part of the ledger's public surface; keep this crate
//! dependency-light.

pub mod address;

pub use address::{Address, AddressParseError};
