//! Common types used throughout tenspot.
//!
//! Everything here is plain data: the spot vocabulary, fixed-point amounts,
//! wager slips and the ledger rows the settlement engine reads and writes.

mod amount;
mod constants;
mod ledger;
mod spot;
mod wager;

pub use amount::{Amount, ParseAmountError};
pub use constants::*;
pub use ledger::{
    Account, AccountId, BalanceChange, DailyStats, GameSettings, NewTicket, PublicResult, Role,
    Round, RoundId, RoundOutcome, SettingsError, Ticket, TicketFlag, TicketId, UnknownRole,
};
pub use spot::{LabelError, Spot, SpotLabels};
pub use wager::{Wager, WagerError, MAX_QUANTITY_PER_SPOT};
