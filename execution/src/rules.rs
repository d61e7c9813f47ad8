//! Fixed game rules the engine is constructed with.
//!
//! These are deployment constants (prices, commission, engagement tuning,
//! cancellation margin, credit policy). The RTP targets and round duration
//! that an operator adjusts at runtime live in [`GameSettings`] instead and are
//! read from the ledger.
//!
//! [`GameSettings`]: tenspot_types::GameSettings

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tenspot_types::{
    Amount, SpotLabels, DEFAULT_CANCEL_MARGIN_SECS, DEFAULT_CLOSE_HOUR, DEFAULT_COMMISSION_BPS,
    DEFAULT_CONTROL_FACTOR, DEFAULT_ENGAGEMENT_THRESHOLD, DEFAULT_OPEN_HOUR,
    DEFAULT_PAYOUT_MULTIPLIER, DEFAULT_UNIT_PRICE, DEFAULT_WIN_PROBABILITY_PERCENT,
};

/// Who pays winning tickets.
///
/// Exactly one path credits winnings. Under [`PayoutPolicy::OnSettlement`] the
/// settlement transaction credits every winning ticket and marks it claimed, so
/// a later claim can never pay again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutPolicy {
    #[default]
    OnSettlement,
    OnClaim,
}

/// Local hours (inclusive on both ends) during which tickets may be sold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShopHours {
    pub open_hour: u32,
    pub close_hour: u32,
}

impl ShopHours {
    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.open_hour && hour <= self.close_hour
    }

    /// Whether sales are open at `now` in the operator's local time.
    pub fn is_open_at(&self, now: DateTime<Utc>, offset: FixedOffset) -> bool {
        self.contains(offset.from_utc_datetime(&now.naive_utc()).hour())
    }
}

impl Default for ShopHours {
    fn default() -> Self {
        Self {
            open_hour: DEFAULT_OPEN_HOUR,
            close_hour: DEFAULT_CLOSE_HOUR,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GameRules {
    pub labels: SpotLabels,
    /// Price of one unit staked on one spot.
    pub unit_price: Amount,
    /// A winning unit pays `unit_price * payout_multiplier`.
    pub payout_multiplier: u64,
    /// Commission retained by the retailer on each sale, in basis points.
    pub commission_bps: u64,
    /// Rounds collecting at most this much use engagement mode.
    pub engagement_threshold: Amount,
    /// Percent chance an engagement round pays a staked spot.
    pub win_probability_percent: u32,
    /// Proportional gain applied to the daily RTP gap.
    pub control_factor: f64,
    pub cancel_margin: Duration,
    pub shop_hours: ShopHours,
    pub payout_policy: PayoutPolicy,
}

impl GameRules {
    /// Amount paid per winning unit.
    pub fn unit_payout(&self) -> Amount {
        self.unit_price
            .checked_mul(self.payout_multiplier)
            .unwrap_or(Amount::from_minor(u64::MAX))
    }

    /// Amount debited from a retailer for a sale of `total` (gross less commission).
    pub fn deduction(&self, total: Amount) -> Amount {
        total
            .checked_sub(total.bps(self.commission_bps))
            .unwrap_or(Amount::ZERO)
    }
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            labels: SpotLabels::default(),
            unit_price: Amount::from_minor(DEFAULT_UNIT_PRICE),
            payout_multiplier: DEFAULT_PAYOUT_MULTIPLIER,
            commission_bps: DEFAULT_COMMISSION_BPS,
            engagement_threshold: Amount::from_minor(DEFAULT_ENGAGEMENT_THRESHOLD),
            win_probability_percent: DEFAULT_WIN_PROBABILITY_PERCENT,
            control_factor: DEFAULT_CONTROL_FACTOR,
            cancel_margin: Duration::seconds(DEFAULT_CANCEL_MARGIN_SECS as i64),
            shop_hours: ShopHours::default(),
            payout_policy: PayoutPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_unit_payout() {
        let rules = GameRules::default();
        assert_eq!(rules.unit_price, Amount::from_major(10));
        assert_eq!(rules.unit_payout(), Amount::from_major(90));
    }

    #[test]
    fn test_deduction_nets_commission() {
        let rules = GameRules::default();
        // 100.00 sale at 9% commission debits 91.00
        assert_eq!(
            rules.deduction(Amount::from_major(100)),
            Amount::from_major(91)
        );
        let free = GameRules {
            commission_bps: 0,
            ..GameRules::default()
        };
        assert_eq!(free.deduction(Amount::from_major(100)), Amount::from_major(100));
    }

    #[test]
    fn test_shop_hours_inclusive() {
        let hours = ShopHours::default();
        assert!(!hours.contains(5));
        assert!(hours.contains(6));
        assert!(hours.contains(23));
        assert!(!hours.contains(0));
    }

    #[test]
    fn test_shop_hours_use_local_time() {
        let hours = ShopHours::default();
        let ist = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        // 00:15 UTC is 05:45 IST: still closed
        let early = DateTime::parse_from_rfc3339("2026-03-01T00:15:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(!hours.is_open_at(early, ist));
        assert!(hours.is_open_at(early + Duration::minutes(15), ist));
    }

    #[test]
    fn test_payout_policy_serde() {
        let policy: PayoutPolicy = serde_json::from_str("\"on_claim\"").unwrap();
        assert_eq!(policy, PayoutPolicy::OnClaim);
        assert_eq!(
            serde_json::to_string(&PayoutPolicy::OnSettlement).unwrap(),
            "\"on_settlement\""
        );
    }
}
