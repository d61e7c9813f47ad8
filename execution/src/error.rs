use chrono::{DateTime, Utc};
use tenspot_types::{AccountId, Amount, RoundId, TicketId, WagerError};
use thiserror::Error;

use crate::StoreError;

/// Why a ticket operation was refused or failed.
///
/// Every variant except [`TicketError::Store`] is a business-rule refusal that
/// left the ledger untouched and is reported back to the retailer.
#[derive(Debug, Error)]
pub enum TicketError {
    #[error("insufficient balance: {needed} needed, {available} available")]
    InsufficientFunds { needed: Amount, available: Amount },
    #[error("shop is closed (open {open_hour}:00 to {close_hour}:59)")]
    ShopClosed { open_hour: u32, close_hour: u32 },
    #[error("ticket {0} not found")]
    InvalidTicket(TicketId),
    #[error("ticket {0} is already cancelled")]
    AlreadyCancelled(TicketId),
    #[error("ticket {0} is already claimed")]
    AlreadyClaimed(TicketId),
    #[error("betting window for round {0} is closed")]
    WindowClosed(String),
    #[error("ticket {0} has no stake on the winning spot")]
    NoWin(TicketId),
    #[error("round {0} is not settled yet")]
    NotYetDetermined(RoundId),
    #[error("account {0} not found")]
    UnknownAccount(AccountId),
    #[error("account {0} is blocked")]
    AccountInactive(AccountId),
    #[error("invalid wager: {0}")]
    InvalidWager(#[from] WagerError),
    #[error("{0} is not a round boundary")]
    InvalidRound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TicketError {
    /// Rule violation (as opposed to a store fault).
    pub fn is_business(&self) -> bool {
        !matches!(self, TicketError::Store(_))
    }

    /// Safe to retry the whole operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, TicketError::Store(err) if err.is_transient())
    }
}

#[derive(Debug, Error)]
pub enum SettleError {
    #[error("round ending {0} is still open")]
    RoundOpen(DateTime<Utc>),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("round {round}: credited {credited} but selection pays {expected}")]
    Accounting {
        round: RoundId,
        credited: Amount,
        expected: Amount,
    },
}

impl SettleError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SettleError::Store(err) if err.is_transient())
    }
}
