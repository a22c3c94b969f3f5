//! Wallet and process addresses.
//!
//! Native MGN identifiers are 43-character base64url strings (the text form
//! of a 32-byte key digest). The ledger also has to hold balances for
//! foreign-chain recipients, so `Address` itself only enforces a loose shape
//! and `is_safe()` performs the strict native check. Callers that accept
//! user-supplied recipients gate on `is_safe()` unless the request opted in
//! to unsafe addresses.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a native MGN address string.
pub const NATIVE_ADDRESS_LEN: usize = 43;

/// Upper bound accepted for any address-like string (foreign formats
/// included).
pub const MAX_ADDRESS_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("address is empty")]
    Empty,
    #[error("address length {0} exceeds maximum {MAX_ADDRESS_LEN}")]
    TooLong(usize),
    #[error("address contains whitespace or control characters")]
    InvalidCharacters,
}

/// An account key in the ledger: a wallet, a gateway, or a name's
/// controlling process.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    /// Parse any address-like string. Rejects only strings that could never
    /// be a key: empty, oversized, or containing whitespace/control bytes.
    pub fn parse(s: &str) -> Result<Self, AddressParseError> {
        if s.is_empty() {
            return Err(AddressParseError::Empty);
        }
        if s.len() > MAX_ADDRESS_LEN {
            return Err(AddressParseError::TooLong(s.len()));
        }
        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(AddressParseError::InvalidCharacters);
        }
        Ok(Address(s.to_string()))
    }

    /// Strict native-format check: exactly 43 base64url characters.
    pub fn is_safe(&self) -> bool {
        self.0.len() == NATIVE_ADDRESS_LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.0).finish()
    }
}

impl FromStr for Address {
    type Err = AddressParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

/* serde serialize/deserialize for Address as plain string */
impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}
