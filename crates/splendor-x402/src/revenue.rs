//! Off-state revenue accounting for settled payments.
//!
//! Settled volume is attributed to the validator that sealed the block and
//! split among developer, validator pool, and protocol treasury shares.
//! These numbers feed dashboards through the RPC surface only; no balances
//! move in this revision.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use splendor_types::Address;

/// How the validator pool's share is attributed across validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionMode {
    /// Weight by each validator's settled volume.
    #[default]
    Proportional,
    /// Equal weight per validator that settled anything.
    EqualPerValidator,
    /// Weight by settlement count rather than volume.
    PerformanceWeighted,
}

impl DistributionMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "proportional" => Some(DistributionMode::Proportional),
            "equal-per-validator" => Some(DistributionMode::EqualPerValidator),
            "performance-weighted" => Some(DistributionMode::PerformanceWeighted),
            _ => None,
        }
    }
}

/// Revenue split fractions; must sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueShares {
    pub developer: f64,
    pub validator_pool: f64,
    pub treasury: f64,
}

impl Default for RevenueShares {
    fn default() -> Self {
        Self { developer: 0.90, validator_pool: 0.05, treasury: 0.05 }
    }
}

/// Per-validator accounting.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorRevenue {
    pub settled_volume: u128,
    pub settled_count: u64,
    /// This validator's slice of the pool under the current mode, in wei.
    pub pool_share: u128,
}

/// Global revenue snapshot for `x402_getRevenueStats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueStats {
    pub total_volume: u128,
    pub total_settlements: u64,
    pub validator_count: usize,
    pub shares: RevenueShares,
    pub distribution_mode: DistributionMode,
}

#[derive(Default)]
struct Totals {
    volume: u128,
    count: u64,
}

/// Tracks settled volume per validator and the configured split.
pub struct RevenueTracker {
    validators: DashMap<Address, (u128, u64)>,
    totals: RwLock<Totals>,
    shares: RwLock<RevenueShares>,
    mode: RwLock<DistributionMode>,
}

impl RevenueTracker {
    pub fn new() -> Self {
        Self {
            validators: DashMap::new(),
            totals: RwLock::new(Totals::default()),
            shares: RwLock::new(RevenueShares::default()),
            mode: RwLock::new(DistributionMode::default()),
        }
    }

    pub fn record_settlement(&self, validator: Address, amount: u128) {
        let mut entry = self.validators.entry(validator).or_insert((0, 0));
        entry.0 += amount;
        entry.1 += 1;
        let mut totals = self.totals.write();
        totals.volume += amount;
        totals.count += 1;
    }

    /// Adjust the validator pool fraction; the developer share absorbs the
    /// difference so the split keeps summing to 1.
    pub fn set_validator_share(&self, fraction: f64) -> Result<(), String> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(format!("fraction {fraction} out of [0, 1]"));
        }
        let mut shares = self.shares.write();
        if fraction + shares.treasury > 1.0 {
            return Err("validator share plus treasury exceeds 1".to_string());
        }
        shares.validator_pool = fraction;
        shares.developer = 1.0 - shares.validator_pool - shares.treasury;
        Ok(())
    }

    pub fn set_distribution_mode(&self, mode: DistributionMode) {
        *self.mode.write() = mode;
    }

    pub fn validator_revenue(&self, validator: &Address) -> ValidatorRevenue {
        let (volume, count) =
            self.validators.get(validator).map(|e| *e.value()).unwrap_or((0, 0));
        ValidatorRevenue { settled_volume: volume, settled_count: count, pool_share: self.pool_share(volume, count) }
    }

    /// Validators ordered by settled volume, highest first.
    pub fn top_validators(&self, limit: usize) -> Vec<(Address, ValidatorRevenue)> {
        let mut all: Vec<(Address, (u128, u64))> =
            self.validators.iter().map(|e| (*e.key(), *e.value())).collect();
        all.sort_by(|a, b| b.1 .0.cmp(&a.1 .0));
        all.truncate(limit);
        all.into_iter()
            .map(|(addr, (volume, count))| {
                (
                    addr,
                    ValidatorRevenue {
                        settled_volume: volume,
                        settled_count: count,
                        pool_share: self.pool_share(volume, count),
                    },
                )
            })
            .collect()
    }

    pub fn stats(&self) -> RevenueStats {
        let totals = self.totals.read();
        RevenueStats {
            total_volume: totals.volume,
            total_settlements: totals.count,
            validator_count: self.validators.len(),
            shares: *self.shares.read(),
            distribution_mode: *self.mode.read(),
        }
    }

    fn pool_share(&self, volume: u128, count: u64) -> u128 {
        let totals = self.totals.read();
        if totals.volume == 0 {
            return 0;
        }
        let pool_total = (totals.volume as f64) * self.shares.read().validator_pool;
        let weight = match *self.mode.read() {
            DistributionMode::Proportional => volume as f64 / totals.volume as f64,
            DistributionMode::EqualPerValidator => {
                let n = self.validators.len().max(1) as f64;
                if count > 0 {
                    1.0 / n
                } else {
                    0.0
                }
            }
            DistributionMode::PerformanceWeighted => {
                if totals.count == 0 {
                    0.0
                } else {
                    count as f64 / totals.count as f64
                }
            }
        };
        (pool_total * weight) as u128
    }
}

impl Default for RevenueTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    #[test]
    fn default_split_is_ninety_five_five() {
        let shares = RevenueShares::default();
        assert!((shares.developer - 0.90).abs() < f64::EPSILON);
        assert!((shares.validator_pool - 0.05).abs() < f64::EPSILON);
        assert!((shares.treasury - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn settlements_accumulate_per_validator() {
        let tracker = RevenueTracker::new();
        tracker.record_settlement(addr(1), 1_000);
        tracker.record_settlement(addr(1), 2_000);
        tracker.record_settlement(addr(2), 7_000);

        let v1 = tracker.validator_revenue(&addr(1));
        assert_eq!(v1.settled_volume, 3_000);
        assert_eq!(v1.settled_count, 2);

        let stats = tracker.stats();
        assert_eq!(stats.total_volume, 10_000);
        assert_eq!(stats.total_settlements, 3);
        assert_eq!(stats.validator_count, 2);
    }

    #[test]
    fn proportional_pool_share_follows_volume() {
        let tracker = RevenueTracker::new();
        tracker.record_settlement(addr(1), 3_000);
        tracker.record_settlement(addr(2), 7_000);

        // Pool = 5% of 10_000 = 500; addr(2) takes 70% of it.
        assert_eq!(tracker.validator_revenue(&addr(2)).pool_share, 350);
        assert_eq!(tracker.validator_revenue(&addr(1)).pool_share, 150);
    }

    #[test]
    fn top_validators_sorted_by_volume() {
        let tracker = RevenueTracker::new();
        tracker.record_settlement(addr(1), 100);
        tracker.record_settlement(addr(2), 300);
        tracker.record_settlement(addr(3), 200);

        let top = tracker.top_validators(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, addr(2));
        assert_eq!(top[1].0, addr(3));
    }

    #[test]
    fn share_update_keeps_sum_at_one() {
        let tracker = RevenueTracker::new();
        tracker.set_validator_share(0.20).unwrap();
        let shares = tracker.stats().shares;
        assert!((shares.validator_pool - 0.20).abs() < f64::EPSILON);
        assert!((shares.developer - 0.75).abs() < f64::EPSILON);
        assert!((shares.developer + shares.validator_pool + shares.treasury - 1.0).abs() < 1e-9);

        assert!(tracker.set_validator_share(1.5).is_err());
        assert!(tracker.set_validator_share(0.97).is_err());
    }

    #[test]
    fn distribution_modes_change_weighting() {
        let tracker = RevenueTracker::new();
        tracker.record_settlement(addr(1), 9_000); // one big settlement
        tracker.record_settlement(addr(2), 500); // two small ones
        tracker.record_settlement(addr(2), 500);

        tracker.set_distribution_mode(DistributionMode::EqualPerValidator);
        let equal_1 = tracker.validator_revenue(&addr(1)).pool_share;
        let equal_2 = tracker.validator_revenue(&addr(2)).pool_share;
        assert_eq!(equal_1, equal_2);

        tracker.set_distribution_mode(DistributionMode::PerformanceWeighted);
        let perf_2 = tracker.validator_revenue(&addr(2)).pool_share;
        let perf_1 = tracker.validator_revenue(&addr(1)).pool_share;
        assert!(perf_2 > perf_1);
    }
}
