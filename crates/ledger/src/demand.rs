//! Demand-factor controller.
//!
//! Tracks name-purchase activity in fixed trailing windows and produces the
//! multiplicative fee adjustment applied by `pricing`. Period boundaries
//! are detected lazily from request timestamps, the same way the pruning
//! scheduler works; there is no background clock.
//!
//! The purchase window (7 periods) and revenue window (6 periods) are
//! intentionally different lengths.

use serde::{Deserialize, Serialize};

use crate::pricing::genesis_fee_table;
use crate::tokenomics::MS_PER_DAY;

/// Length of one demand accounting period.
pub const DEMAND_PERIOD_MS: u64 = MS_PER_DAY;

/// Trailing window of per-period purchase counts.
pub const PURCHASE_WINDOW: usize = 7;

/// Trailing window of per-period revenue. Deliberately one period shorter
/// than the purchase window.
pub const REVENUE_WINDOW: usize = 6;

/// Multiplier applied when a period's purchases beat the trailing average.
pub const DEMAND_FACTOR_UP: f64 = 1.05;

/// Multiplier applied otherwise.
pub const DEMAND_FACTOR_DOWN: f64 = 0.95;

/// Hard floor for the factor.
pub const DEMAND_FACTOR_FLOOR: f64 = 0.5;

/// After this many consecutive periods pinned at the floor, the controller
/// resets: factor back to 1.0 and the fee table back to genesis values.
pub const MAX_PERIODS_AT_FLOOR: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandFactorState {
    /// Index of the period currently accumulating.
    pub current_period: u64,
    /// Timestamp the zeroth period started at (genesis).
    pub period_zero_start: u64,
    /// Purchases recorded in the current, still-open period.
    pub purchases_this_period: u64,
    /// Revenue recorded in the current, still-open period.
    pub revenue_this_period: u128,
    /// Completed-period purchase counts, oldest first.
    pub trailing_purchases: [u64; PURCHASE_WINDOW],
    /// Completed-period revenue, oldest first.
    pub trailing_revenue: [u128; REVENUE_WINDOW],
    /// Current multiplicative fee adjustment, >= DEMAND_FACTOR_FLOOR.
    pub current_factor: f64,
    pub consecutive_periods_at_floor: u32,
    /// Effective base-fee table (uMERI by name length). Reset to genesis by
    /// the anti-stagnation rule.
    pub fees: Vec<u128>,
}

impl DemandFactorState {
    pub fn new(genesis_timestamp: u64) -> Self {
        Self {
            current_period: 0,
            period_zero_start: genesis_timestamp,
            purchases_this_period: 0,
            revenue_this_period: 0,
            trailing_purchases: [0; PURCHASE_WINDOW],
            trailing_revenue: [0; REVENUE_WINDOW],
            current_factor: 1.0,
            consecutive_periods_at_floor: 0,
            fees: genesis_fee_table(),
        }
    }

    /// Record one completed name purchase into the open period.
    pub fn record_purchase(&mut self, revenue: u128) {
        self.purchases_this_period += 1;
        self.revenue_this_period = self.revenue_this_period.saturating_add(revenue);
    }

    /// When the open period closes; this is the controller's pruning
    /// deadline.
    pub fn next_period_start(&self) -> u64 {
        self.period_zero_start + (self.current_period + 1) * DEMAND_PERIOD_MS
    }

    /// Roll over every period boundary at or before `now`. Returns how many
    /// periods closed (0 almost always; several after quiet stretches).
    pub fn advance(&mut self, now: u64) -> u32 {
        let mut rolled = 0;
        while self.next_period_start() <= now {
            self.close_period();
            rolled += 1;
        }
        if rolled > 0 {
            tracing::debug!(
                periods = rolled,
                factor = self.current_factor,
                "demand factor period rollover"
            );
        }
        rolled
    }

    fn close_period(&mut self) {
        let avg = self.trailing_purchases.iter().sum::<u64>() as f64
            / PURCHASE_WINDOW as f64;

        if (self.purchases_this_period as f64) > avg {
            self.current_factor *= DEMAND_FACTOR_UP;
        } else {
            self.current_factor =
                (self.current_factor * DEMAND_FACTOR_DOWN).max(DEMAND_FACTOR_FLOOR);
        }

        // shift the windows, oldest out
        self.trailing_purchases.rotate_left(1);
        self.trailing_purchases[PURCHASE_WINDOW - 1] = self.purchases_this_period;
        self.trailing_revenue.rotate_left(1);
        self.trailing_revenue[REVENUE_WINDOW - 1] = self.revenue_this_period;
        self.purchases_this_period = 0;
        self.revenue_this_period = 0;
        self.current_period += 1;

        if self.current_factor <= DEMAND_FACTOR_FLOOR {
            self.consecutive_periods_at_floor += 1;
            if self.consecutive_periods_at_floor >= MAX_PERIODS_AT_FLOOR {
                // anti-stagnation reset
                self.current_factor = 1.0;
                self.fees = genesis_fee_table();
                self.consecutive_periods_at_floor = 0;
                tracing::info!(period = self.current_period, "demand factor floor reset");
            }
        } else {
            self.consecutive_periods_at_floor = 0;
        }
    }
}
