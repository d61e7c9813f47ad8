use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::{Amount, Spot, Wager};

macro_rules! row_id {
    ($name:ident) => {
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

row_id!(AccountId);
row_id!(RoundId);
row_id!(TicketId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Retailer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Retailer => "retailer",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "retailer" => Ok(Role::Retailer),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Retailer or operator identity holding a balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub role: Role,
    pub balance: Amount,
    pub active: bool,
}

/// A single betting period, keyed by its close instant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub end_time: DateTime<Utc>,
    /// `None` until the round is settled.
    pub winning_spot: Option<Spot>,
    pub collection: Amount,
    pub payout: Amount,
    pub processed: bool,
}

impl Round {
    /// A freshly created, unsettled round.
    pub fn pending(id: RoundId, end_time: DateTime<Utc>) -> Self {
        Self {
            id,
            end_time,
            winning_spot: None,
            collection: Amount::ZERO,
            payout: Amount::ZERO,
            processed: false,
        }
    }
}

/// One stake slip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub account_id: AccountId,
    pub round_id: RoundId,
    pub wager: Wager,
    /// Gross amount: units staked times the unit price.
    pub total_amount: Amount,
    /// What was actually debited from the account (gross less commission).
    pub charged: Amount,
    pub cancelled: bool,
    pub claimed: bool,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    /// Whether the ticket still counts toward collection and liability.
    pub fn is_live(&self) -> bool {
        !self.cancelled
    }
}

/// Ticket row to insert; the store assigns the id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTicket {
    pub account_id: AccountId,
    pub round_id: RoundId,
    pub wager: Wager,
    pub total_amount: Amount,
    pub charged: Amount,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TicketFlag {
    Cancelled,
    Claimed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceChange {
    Credit(Amount),
    Debit(Amount),
}

/// Final bookkeeping written to a round when it settles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundOutcome {
    pub spot: Spot,
    pub collection: Amount,
    pub payout: Amount,
}

/// Operator configuration consulted by profit-controlled rounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSettings {
    /// Target daily return-to-player, in percent.
    pub target_rtp: u32,
    /// Lowest RTP a single round may aim for.
    pub min_round_rtp: u32,
    /// Highest RTP a single round may aim for.
    pub max_round_rtp: u32,
    pub round_minutes: u32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            target_rtp: crate::DEFAULT_TARGET_RTP,
            min_round_rtp: crate::DEFAULT_MIN_ROUND_RTP,
            max_round_rtp: crate::DEFAULT_MAX_ROUND_RTP,
            round_minutes: crate::DEFAULT_ROUND_MINUTES,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("min_round_rtp ({min}) must not exceed max_round_rtp ({max})")]
    InvertedBounds { min: u32, max: u32 },
    #[error("round_minutes must be a divisor of 1440 (got {0})")]
    RoundMinutes(u32),
}

impl GameSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.min_round_rtp > self.max_round_rtp {
            return Err(SettingsError::InvertedBounds {
                min: self.min_round_rtp,
                max: self.max_round_rtp,
            });
        }
        if self.round_minutes == 0 || 1440 % self.round_minutes != 0 {
            return Err(SettingsError::RoundMinutes(self.round_minutes));
        }
        Ok(())
    }
}

/// Sales and payout of the rounds settled so far on one local calendar day.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub sales: Amount,
    pub payout: Amount,
}

/// Settled round as shown on public result boards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicResult {
    pub round_id: RoundId,
    pub spot: Spot,
    pub end_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("retailer".parse::<Role>(), Ok(Role::Retailer));
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert!("owner".parse::<Role>().is_err());
        assert_eq!(Role::Admin.as_str(), "admin");
    }

    #[test]
    fn test_settings_validation() {
        assert!(GameSettings::default().validate().is_ok());

        let inverted = GameSettings {
            min_round_rtp: 95,
            max_round_rtp: 85,
            ..Default::default()
        };
        assert_eq!(
            inverted.validate(),
            Err(SettingsError::InvertedBounds { min: 95, max: 85 })
        );

        let zero = GameSettings {
            round_minutes: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let uneven = GameSettings {
            round_minutes: 7,
            ..Default::default()
        };
        assert_eq!(uneven.validate(), Err(SettingsError::RoundMinutes(7)));
    }
}
