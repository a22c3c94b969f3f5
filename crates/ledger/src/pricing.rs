//! Name registration pricing.
//!
//! Pure math only: the base-fee table keyed by name length, lease/permabuy
//! pricing, undername fees, and the two decay curves (returned-name premium
//! and release auctions). Demand-factor application happens here too; the
//! stateful controller that produces the factor lives in `demand.rs`.
//!
//! Both decay curves are linear between their endpoints. Prices are
//! computed in u128 basis-point math; the demand factor is the single
//! fractional input and is applied last with rounding.

use crate::error::{bail_validation, Result};
use crate::tokenomics::{BP_DENOM, MS_PER_DAY, UMERI_PER_MERI};

pub const MS_PER_YEAR: u64 = 365 * MS_PER_DAY;

/// Longest registrable name.
pub const MAX_NAME_LEN: usize = 51;

/// Most lease years a record may hold at once (initial purchase plus
/// extensions).
pub const MAX_LEASE_YEARS: u64 = 5;

/// Every record starts with this many undernames included.
pub const DEFAULT_UNDERNAME_LIMIT: u64 = 10;

/// Hard cap on a record's undername limit.
pub const MAX_UNDERNAME_LIMIT: u64 = 10_000;

/// Window after a lease expires during which the record is inert but not
/// yet returned to the pool.
pub const GRACE_PERIOD_MS: u64 = 14 * MS_PER_DAY;

/// How long a pruned name stays in the returned pool with a price premium.
pub const RETURNED_NAME_PERIOD_MS: u64 = 14 * MS_PER_DAY;

/// Premium multiplier on a freshly returned name; decays to 1 over the
/// return period.
pub const RETURNED_NAME_MAX_MULTIPLIER: f64 = 50.0;

/// Release auctions run for this long before settling at the floor.
pub const AUCTION_DURATION_MS: u64 = 14 * MS_PER_DAY;

/// Auction start price as a multiple of the base fee; the floor is the base
/// fee itself.
pub const AUCTION_START_MULTIPLIER: u128 = 50;

/// Each lease year past the first costs this fraction of the base fee, so a
/// 1-year lease costs exactly the table fee.
pub const ANNUAL_LEASE_FEE_BP: u128 = 2_000;

/// Permabuy costs this multiple of the 1-year lease.
pub const PERMABUY_LEASE_MULTIPLE: u128 = 4;

/// Per-undername fee on leased records: 0.1% of base per remaining lease
/// year (started years count whole).
pub const UNDERNAME_LEASE_FEE_BP: u128 = 10;

/// Per-undername fee on permabought records: flat 0.5% of base.
pub const UNDERNAME_PERMABUY_FEE_BP: u128 = 50;

// ============================================================
// NAME VALIDATION
// ============================================================

/// Normalize and validate a registrable name. Names are stored lowercased;
/// allowed characters are a-z, 0-9 and interior dashes.
pub fn validate_name(raw: &str) -> Result<String> {
    let name = raw.to_ascii_lowercase();
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        bail_validation!(
            "name must be 1..={} characters, got {}",
            MAX_NAME_LEN,
            name.len()
        );
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        bail_validation!("name contains characters outside [a-z0-9-]: {raw}");
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail_validation!("name must not start or end with a dash: {raw}");
    }
    Ok(name)
}

// ============================================================
// BASE FEE TABLE
// ============================================================

/// Genesis base registration fees by name length, in uMERI, index = len-1.
/// Short names carry steep premiums; everything from 13 characters up is
/// flat.
pub fn genesis_fee_table() -> Vec<u128> {
    (1..=MAX_NAME_LEN)
        .map(|len| {
            let meri: u128 = match len {
                1 => 1_000_000,
                2 => 200_000,
                3 => 40_000,
                4 => 10_000,
                5 => 4_000,
                6 => 2_000,
                7 => 1_000,
                8 => 600,
                9 => 400,
                10 => 350,
                11 => 300,
                12 => 250,
                _ => 200,
            };
            meri * UMERI_PER_MERI
        })
        .collect()
}

/// Base fee for a (validated) name against the current fee table.
pub fn base_fee(fees: &[u128], name: &str) -> u128 {
    fees[name.len() - 1]
}

// ============================================================
// PRICE FORMULAS
// ============================================================

/// Lease price before demand factor: the base fee covers the first year,
/// each additional year adds `ANNUAL_LEASE_FEE_BP` of base.
pub fn lease_price(base: u128, years: u64) -> u128 {
    base + base * ANNUAL_LEASE_FEE_BP * (years.saturating_sub(1) as u128) / BP_DENOM
}

/// Permabuy price before demand factor.
pub fn permabuy_price(base: u128) -> u128 {
    lease_price(base, 1) * PERMABUY_LEASE_MULTIPLE
}

/// Price of extending an existing lease by whole years, pro-rated at the
/// annual rate (no first-year base component).
pub fn extension_price(base: u128, years: u64) -> u128 {
    base * ANNUAL_LEASE_FEE_BP * years as u128 / BP_DENOM
}

/// Price of raising the undername limit by `quantity`. Leases pay per
/// remaining year (started years count whole); permabuys pay a flat rate.
pub fn undername_price(base: u128, quantity: u64, remaining_lease_ms: Option<u64>) -> u128 {
    match remaining_lease_ms {
        Some(remaining) => {
            let years = (remaining as u128).div_ceil(MS_PER_YEAR as u128).max(1);
            base * UNDERNAME_LEASE_FEE_BP * quantity as u128 * years / BP_DENOM
        }
        None => base * UNDERNAME_PERMABUY_FEE_BP * quantity as u128 / BP_DENOM,
    }
}

/// Apply the demand factor to a raw price, rounding to the nearest uMERI.
pub fn apply_demand_factor(raw: u128, factor: f64) -> u128 {
    (raw as f64 * factor).round() as u128
}

// ============================================================
// DECAY CURVES
// ============================================================

/// Premium multiplier on a returned name: maximum at return time, 1.0 at
/// the end of the return period.
pub fn returned_name_multiplier(start: u64, now: u64) -> f64 {
    if now <= start {
        return RETURNED_NAME_MAX_MULTIPLIER;
    }
    let elapsed = (now - start).min(RETURNED_NAME_PERIOD_MS) as f64;
    let span = RETURNED_NAME_PERIOD_MS as f64;
    RETURNED_NAME_MAX_MULTIPLIER - (RETURNED_NAME_MAX_MULTIPLIER - 1.0) * elapsed / span
}

/// Current auction price: linear from start price down to the floor.
pub fn auction_price(start_price: u128, floor_price: u128, start: u64, end: u64, now: u64) -> u128 {
    if now <= start {
        return start_price;
    }
    if now >= end || start_price <= floor_price {
        return floor_price;
    }
    let elapsed = (now - start) as u128;
    let span = (end - start) as u128;
    start_price - (start_price - floor_price) * elapsed / span
}
