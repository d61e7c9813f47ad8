//! Operator actions behind `tenspot-admin`: account management, day totals
//! and settled-round history.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tenspot_execution::{Ledger, LedgerTx, StoreError};
use tenspot_types::{Account, Amount, BalanceChange, DailyStats, Role, Round};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("account {0} already exists")]
    DuplicateAccount(String),
    #[error("unknown account {0}")]
    UnknownAccount(String),
    #[error("top-up amount must be positive")]
    ZeroTopUp,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn create_account<L: Ledger>(
    ledger: &L,
    name: &str,
    role: Role,
    balance: Amount,
) -> Result<Account, OperatorError> {
    let mut tx = ledger.begin()?;
    if tx.account_by_name(name)?.is_some() {
        return Err(OperatorError::DuplicateAccount(name.to_string()));
    }
    let id = tx.create_account(name, role, balance)?;
    let account = tx.lock_account(id)?.ok_or(StoreError::Missing {
        kind: "account",
        id: id.0,
    })?;
    tx.commit()?;
    info!(%id, %name, role = role.as_str(), %balance, "account created");
    Ok(account)
}

pub fn top_up<L: Ledger>(ledger: &L, name: &str, amount: Amount) -> Result<Account, OperatorError> {
    if amount.is_zero() {
        return Err(OperatorError::ZeroTopUp);
    }
    let mut tx = ledger.begin()?;
    let account = locked_by_name(&mut tx, name)?;
    let balance = tx.update_balance(account.id, BalanceChange::Credit(amount))?;
    tx.commit()?;
    info!(id = %account.id, %name, %amount, %balance, "account topped up");
    Ok(Account { balance, ..account })
}

/// Block (`active = false`) or unblock an account. A blocked account keeps
/// its balance and tickets but cannot submit new ones.
pub fn set_active<L: Ledger>(
    ledger: &L,
    name: &str,
    active: bool,
) -> Result<Account, OperatorError> {
    let mut tx = ledger.begin()?;
    let account = locked_by_name(&mut tx, name)?;
    tx.set_account_active(account.id, active)?;
    tx.commit()?;
    info!(id = %account.id, %name, active, "account status changed");
    Ok(Account { active, ..account })
}

fn locked_by_name<T: LedgerTx>(tx: &mut T, name: &str) -> Result<Account, OperatorError> {
    let unknown = || OperatorError::UnknownAccount(name.to_string());
    let id = tx.account_by_name(name)?.ok_or_else(unknown)?.id;
    tx.lock_account(id)?.ok_or_else(unknown)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DayReport {
    pub date: NaiveDate,
    pub sales: Amount,
    pub payout: Amount,
    pub rtp_percent: f64,
}

/// Local calendar date of `now` at `offset`.
pub fn local_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// Totals of the rounds settled on the local calendar day `date`.
pub fn day_report<L: Ledger>(
    ledger: &L,
    offset: FixedOffset,
    date: NaiveDate,
) -> Result<DayReport, OperatorError> {
    let local_midnight = date.and_time(NaiveTime::MIN);
    let start = DateTime::<Utc>::from_naive_utc_and_offset(
        local_midnight - Duration::seconds(offset.local_minus_utc() as i64),
        Utc,
    );
    let DailyStats { sales, payout } = ledger.begin()?.daily_stats(start, start + Duration::days(1))?;
    Ok(DayReport {
        date,
        sales,
        payout,
        rtp_percent: payout.percent_of(sales),
    })
}

/// Settled rounds, newest first.
pub fn history<L: Ledger>(ledger: &L, limit: usize) -> Result<Vec<Round>, OperatorError> {
    Ok(ledger.begin()?.round_history(limit)?)
}
