//! Store abstraction the engine runs against.
//!
//! A [`Ledger`] hands out transactions; every engine operation (submit, cancel,
//! claim, settle) runs inside exactly one [`LedgerTx`]. Implementations must
//! guarantee:
//! - `lock_account` takes an exclusive lock on the account row that is held
//!   until the transaction ends.
//! - `get_or_create_round` returns the round locked against concurrent
//!   settlement, creating it pending if absent.
//! - A transaction that is dropped without [`LedgerTx::commit`] rolls back
//!   completely.
//! - No committed balance is negative: `update_balance` rejects a debit the
//!   balance cannot cover.

use chrono::{DateTime, Utc};
use tenspot_types::{
    Account, AccountId, Amount, BalanceChange, DailyStats, GameSettings, NewTicket, PublicResult,
    Role, Round, RoundId, RoundOutcome, Ticket, TicketFlag, TicketId,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Lock timeout, serialization conflict or lost connection. Nothing was
    /// committed; the whole operation may be retried.
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error("balance of account {account} cannot cover debit of {debit}")]
    NegativeBalance { account: AccountId, debit: Amount },
    #[error("{kind} {id} not found")]
    Missing { kind: &'static str, id: u64 },
    #[error("corrupt {field}: {reason}")]
    Corrupt { field: &'static str, reason: String },
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    pub fn corrupt(field: &'static str, reason: impl ToString) -> Self {
        StoreError::Corrupt {
            field,
            reason: reason.to_string(),
        }
    }
}

pub trait Ledger: Send + Sync {
    type Tx<'a>: LedgerTx
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError>;
}

pub trait LedgerTx {
    /// Load an account and hold its row lock until the transaction ends.
    fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError>;

    fn account_by_name(&mut self, name: &str) -> Result<Option<Account>, StoreError>;

    /// Load a round, holding a shared lock that conflicts with settlement.
    fn round(&mut self, id: RoundId) -> Result<Option<Round>, StoreError>;

    fn round_by_end_time(&mut self, end_time: DateTime<Utc>) -> Result<Option<Round>, StoreError>;

    /// Resolve the round closing at `end_time`, inserting it pending if absent.
    fn get_or_create_round(&mut self, end_time: DateTime<Utc>) -> Result<Round, StoreError>;

    /// End times of unprocessed rounds closing strictly before `before`, oldest first.
    fn pending_rounds_before(
        &mut self,
        before: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError>;

    fn ticket(&mut self, id: TicketId) -> Result<Option<Ticket>, StoreError>;

    /// All tickets bound to a round, cancelled ones included.
    fn list_tickets(&mut self, round: RoundId) -> Result<Vec<Ticket>, StoreError>;

    fn insert_ticket(&mut self, ticket: NewTicket) -> Result<TicketId, StoreError>;

    /// Apply a balance change and return the new balance.
    fn update_balance(
        &mut self,
        account: AccountId,
        change: BalanceChange,
    ) -> Result<Amount, StoreError>;

    fn set_ticket_flag(&mut self, ticket: TicketId, flag: TicketFlag) -> Result<(), StoreError>;

    /// Record the outcome and mark the round processed.
    fn finalize_round(&mut self, round: RoundId, outcome: &RoundOutcome)
        -> Result<(), StoreError>;

    /// Collection and payout of processed rounds ending in `[start, end)`.
    fn daily_stats(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DailyStats, StoreError>;

    fn settings(&mut self) -> Result<GameSettings, StoreError>;

    fn put_settings(&mut self, settings: &GameSettings) -> Result<(), StoreError>;

    fn create_account(
        &mut self,
        name: &str,
        role: Role,
        balance: Amount,
    ) -> Result<AccountId, StoreError>;

    /// Block or unblock an account. Callers hold its row lock.
    fn set_account_active(&mut self, account: AccountId, active: bool) -> Result<(), StoreError>;

    /// Most recent processed rounds, newest first.
    fn recent_results(&mut self, limit: usize) -> Result<Vec<PublicResult>, StoreError>;

    /// Most recent processed rounds with their bookkeeping, newest first.
    fn round_history(&mut self, limit: usize) -> Result<Vec<Round>, StoreError>;

    fn commit(self) -> Result<(), StoreError>;
}

impl<L: Ledger + ?Sized> Ledger for &L {
    type Tx<'a>
        = L::Tx<'a>
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError> {
        (**self).begin()
    }
}

impl<L: Ledger + ?Sized> Ledger for std::sync::Arc<L> {
    type Tx<'a>
        = L::Tx<'a>
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError> {
        (**self).begin()
    }
}
