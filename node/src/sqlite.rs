//! SQLite ledger.
//!
//! One connection behind a mutex. Every transaction starts with
//! `BEGIN IMMEDIATE`, which takes the database write lock up front, so
//! mutating transactions (across processes too) run one at a time and row
//! locks are implied. Waiting on another process is bounded by the busy
//! timeout; `SQLITE_BUSY`/`SQLITE_LOCKED` surface as transient errors.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tenspot_execution::{Ledger, LedgerTx, StoreError};
use tenspot_types::{
    Account, AccountId, Amount, BalanceChange, DailyStats, GameSettings, NewTicket, PublicResult,
    Role, Round, RoundId, RoundOutcome, Ticket, TicketFlag, TicketId,
};
use tracing::warn;

use crate::rows;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS accounts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        role TEXT NOT NULL,
        balance INTEGER NOT NULL CHECK (balance >= 0),
        active INTEGER NOT NULL DEFAULT 1
    );
    CREATE TABLE IF NOT EXISTS rounds (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        end_time INTEGER NOT NULL UNIQUE,
        winning_spot INTEGER,
        collection INTEGER NOT NULL DEFAULT 0,
        payout INTEGER NOT NULL DEFAULT 0,
        processed INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS rounds_pending ON rounds(processed, end_time);
    CREATE TABLE IF NOT EXISTS tickets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id INTEGER NOT NULL REFERENCES accounts(id),
        round_id INTEGER NOT NULL REFERENCES rounds(id),
        wager TEXT NOT NULL,
        total_amount INTEGER NOT NULL,
        charged INTEGER NOT NULL,
        cancelled INTEGER NOT NULL DEFAULT 0,
        claimed INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        CHECK (NOT (cancelled AND claimed))
    );
    CREATE INDEX IF NOT EXISTS tickets_round ON tickets(round_id);
    CREATE TABLE IF NOT EXISTS settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        target_rtp INTEGER NOT NULL,
        min_round_rtp INTEGER NOT NULL,
        max_round_rtp INTEGER NOT NULL,
        round_minutes INTEGER NOT NULL
    );";

const ACCOUNT_COLUMNS: &str = "id, name, role, balance, active";
const ROUND_COLUMNS: &str = "id, end_time, winning_spot, collection, payout, processed";
const TICKET_COLUMNS: &str =
    "id, account_id, round_id, wager, total_amount, charged, cancelled, claimed, created_at";

fn store_err(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            StoreError::Transient(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(store_err)?;
        conn.busy_timeout(busy_timeout).map_err(store_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )
        .map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Ledger for SqliteLedger {
    type Tx<'a> = SqliteTx<'a>;

    fn begin(&self) -> Result<SqliteTx<'_>, StoreError> {
        let conn = self.connection();
        conn.execute_batch("BEGIN IMMEDIATE").map_err(store_err)?;
        Ok(SqliteTx { conn, done: false })
    }
}

pub struct SqliteTx<'a> {
    conn: MutexGuard<'a, Connection>,
    done: bool,
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            warn!(?err, "sqlite rollback failed");
        }
    }
}

fn account_from_row(row: &Row<'_>) -> Result<Account, StoreError> {
    let id: i64 = row.get(0).map_err(store_err)?;
    let role: String = row.get(2).map_err(store_err)?;
    Ok(Account {
        id: AccountId(rows::to_u64(id, "accounts.id")?),
        name: row.get(1).map_err(store_err)?,
        role: rows::role(&role)?,
        balance: rows::amount(row.get(3).map_err(store_err)?, "accounts.balance")?,
        active: row.get(4).map_err(store_err)?,
    })
}

fn round_from_row(row: &Row<'_>) -> Result<Round, StoreError> {
    let id: i64 = row.get(0).map_err(store_err)?;
    Ok(Round {
        id: RoundId(rows::to_u64(id, "rounds.id")?),
        end_time: rows::instant(row.get(1).map_err(store_err)?, "rounds.end_time")?,
        winning_spot: rows::spot(row.get(2).map_err(store_err)?)?,
        collection: rows::amount(row.get(3).map_err(store_err)?, "rounds.collection")?,
        payout: rows::amount(row.get(4).map_err(store_err)?, "rounds.payout")?,
        processed: row.get(5).map_err(store_err)?,
    })
}

fn ticket_from_row(row: &Row<'_>) -> Result<Ticket, StoreError> {
    let id: i64 = row.get(0).map_err(store_err)?;
    let account_id: i64 = row.get(1).map_err(store_err)?;
    let round_id: i64 = row.get(2).map_err(store_err)?;
    let wager: String = row.get(3).map_err(store_err)?;
    Ok(Ticket {
        id: TicketId(rows::to_u64(id, "tickets.id")?),
        account_id: AccountId(rows::to_u64(account_id, "tickets.account_id")?),
        round_id: RoundId(rows::to_u64(round_id, "tickets.round_id")?),
        wager: rows::wager(&wager)?,
        total_amount: rows::amount(row.get(4).map_err(store_err)?, "tickets.total_amount")?,
        charged: rows::amount(row.get(5).map_err(store_err)?, "tickets.charged")?,
        cancelled: row.get(6).map_err(store_err)?,
        claimed: row.get(7).map_err(store_err)?,
        created_at: rows::instant(row.get(8).map_err(store_err)?, "tickets.created_at")?,
    })
}

impl SqliteTx<'_> {
    fn query_opt<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: fn(&Row<'_>) -> Result<T, StoreError>,
    ) -> Result<Option<T>, StoreError> {
        self.conn
            .query_row(sql, params, |row| Ok(map(row)))
            .optional()
            .map_err(store_err)?
            .transpose()
    }

    fn query_all<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: fn(&Row<'_>) -> Result<T, StoreError>,
    ) -> Result<Vec<T>, StoreError> {
        let mut stmt = self.conn.prepare(sql).map_err(store_err)?;
        let mapped = stmt
            .query_map(params, |row| Ok(map(row)))
            .map_err(store_err)?;
        let mut out = Vec::new();
        for row in mapped {
            out.push(row.map_err(store_err)??);
        }
        Ok(out)
    }
}

impl LedgerTx for SqliteTx<'_> {
    fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        // The write lock taken at BEGIN IMMEDIATE already excludes other writers
        self.query_opt(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
            params![rows::to_i64(id.0, "accounts.id")?],
            account_from_row,
        )
    }

    fn account_by_name(&mut self, name: &str) -> Result<Option<Account>, StoreError> {
        self.query_opt(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE name = ?1"),
            params![name],
            account_from_row,
        )
    }

    fn round(&mut self, id: RoundId) -> Result<Option<Round>, StoreError> {
        self.query_opt(
            &format!("SELECT {ROUND_COLUMNS} FROM rounds WHERE id = ?1"),
            params![rows::to_i64(id.0, "rounds.id")?],
            round_from_row,
        )
    }

    fn round_by_end_time(&mut self, end_time: DateTime<Utc>) -> Result<Option<Round>, StoreError> {
        self.query_opt(
            &format!("SELECT {ROUND_COLUMNS} FROM rounds WHERE end_time = ?1"),
            params![end_time.timestamp()],
            round_from_row,
        )
    }

    fn get_or_create_round(&mut self, end_time: DateTime<Utc>) -> Result<Round, StoreError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO rounds (end_time) VALUES (?1)",
                params![end_time.timestamp()],
            )
            .map_err(store_err)?;
        self.round_by_end_time(end_time)?.ok_or(StoreError::Missing {
            kind: "round",
            id: end_time.timestamp().unsigned_abs(),
        })
    }

    fn pending_rounds_before(
        &mut self,
        before: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        self.query_all(
            "SELECT end_time FROM rounds
             WHERE processed = 0 AND end_time < ?1
             ORDER BY end_time ASC",
            params![before.timestamp()],
            |row| rows::instant(row.get(0).map_err(store_err)?, "rounds.end_time"),
        )
    }

    fn ticket(&mut self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        self.query_opt(
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1"),
            params![rows::to_i64(id.0, "tickets.id")?],
            ticket_from_row,
        )
    }

    fn list_tickets(&mut self, round: RoundId) -> Result<Vec<Ticket>, StoreError> {
        self.query_all(
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE round_id = ?1 ORDER BY id"),
            params![rows::to_i64(round.0, "rounds.id")?],
            ticket_from_row,
        )
    }

    fn insert_ticket(&mut self, ticket: NewTicket) -> Result<TicketId, StoreError> {
        self.conn
            .execute(
                "INSERT INTO tickets
                     (account_id, round_id, wager, total_amount, charged, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    rows::to_i64(ticket.account_id.0, "tickets.account_id")?,
                    rows::to_i64(ticket.round_id.0, "tickets.round_id")?,
                    rows::wager_column(&ticket.wager)?,
                    rows::amount_column(ticket.total_amount, "tickets.total_amount")?,
                    rows::amount_column(ticket.charged, "tickets.charged")?,
                    ticket.created_at.timestamp(),
                ],
            )
            .map_err(store_err)?;
        let id = self.conn.last_insert_rowid();
        Ok(TicketId(rows::to_u64(id, "tickets.id")?))
    }

    fn update_balance(
        &mut self,
        account: AccountId,
        change: BalanceChange,
    ) -> Result<Amount, StoreError> {
        let id = rows::to_i64(account.0, "accounts.id")?;
        let (sql, amount) = match change {
            BalanceChange::Credit(amount) => (
                "UPDATE accounts SET balance = balance + ?1 WHERE id = ?2 RETURNING balance",
                amount,
            ),
            BalanceChange::Debit(amount) => (
                "UPDATE accounts SET balance = balance - ?1
                 WHERE id = ?2 AND balance >= ?1 RETURNING balance",
                amount,
            ),
        };
        let value = rows::amount_column(amount, "balance change")?;
        let updated: Option<i64> = self
            .conn
            .query_row(sql, params![value, id], |row| row.get(0))
            .optional()
            .map_err(store_err)?;
        match updated {
            Some(balance) => rows::amount(balance, "accounts.balance"),
            None if self.lock_account(account)?.is_some() => Err(StoreError::NegativeBalance {
                account,
                debit: amount,
            }),
            None => Err(StoreError::Missing {
                kind: "account",
                id: account.0,
            }),
        }
    }

    fn set_ticket_flag(&mut self, ticket: TicketId, flag: TicketFlag) -> Result<(), StoreError> {
        let sql = match flag {
            TicketFlag::Cancelled => "UPDATE tickets SET cancelled = 1 WHERE id = ?1",
            TicketFlag::Claimed => "UPDATE tickets SET claimed = 1 WHERE id = ?1",
        };
        let changed = self
            .conn
            .execute(sql, params![rows::to_i64(ticket.0, "tickets.id")?])
            .map_err(store_err)?;
        if changed == 0 {
            return Err(StoreError::Missing {
                kind: "ticket",
                id: ticket.0,
            });
        }
        Ok(())
    }

    fn finalize_round(&mut self, round: RoundId, outcome: &RoundOutcome) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE rounds
                 SET winning_spot = ?1, collection = ?2, payout = ?3, processed = 1
                 WHERE id = ?4",
                params![
                    rows::spot_column(outcome.spot),
                    rows::amount_column(outcome.collection, "rounds.collection")?,
                    rows::amount_column(outcome.payout, "rounds.payout")?,
                    rows::to_i64(round.0, "rounds.id")?,
                ],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(StoreError::Missing {
                kind: "round",
                id: round.0,
            });
        }
        Ok(())
    }

    fn daily_stats(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DailyStats, StoreError> {
        let (sales, payout): (i64, i64) = self
            .conn
            .query_row(
                "SELECT COALESCE(SUM(collection), 0), COALESCE(SUM(payout), 0) FROM rounds
                 WHERE processed = 1 AND end_time >= ?1 AND end_time < ?2",
                params![start.timestamp(), end.timestamp()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(store_err)?;
        Ok(DailyStats {
            sales: rows::amount(sales, "daily sales")?,
            payout: rows::amount(payout, "daily payout")?,
        })
    }

    fn settings(&mut self) -> Result<GameSettings, StoreError> {
        self.conn
            .query_row(
                "SELECT target_rtp, min_round_rtp, max_round_rtp, round_minutes
                 FROM settings WHERE id = 1",
                [],
                |row| {
                    Ok(GameSettings {
                        target_rtp: row.get(0)?,
                        min_round_rtp: row.get(1)?,
                        max_round_rtp: row.get(2)?,
                        round_minutes: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(store_err)?
            .ok_or(StoreError::Missing {
                kind: "settings",
                id: 1,
            })
    }

    fn put_settings(&mut self, settings: &GameSettings) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO settings (id, target_rtp, min_round_rtp, max_round_rtp, round_minutes)
                 VALUES (1, ?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     target_rtp = excluded.target_rtp,
                     min_round_rtp = excluded.min_round_rtp,
                     max_round_rtp = excluded.max_round_rtp,
                     round_minutes = excluded.round_minutes",
                params![
                    settings.target_rtp,
                    settings.min_round_rtp,
                    settings.max_round_rtp,
                    settings.round_minutes
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn create_account(
        &mut self,
        name: &str,
        role: Role,
        balance: Amount,
    ) -> Result<AccountId, StoreError> {
        self.conn
            .execute(
                "INSERT INTO accounts (name, role, balance) VALUES (?1, ?2, ?3)",
                params![
                    name,
                    role.as_str(),
                    rows::amount_column(balance, "accounts.balance")?
                ],
            )
            .map_err(store_err)?;
        let id = self.conn.last_insert_rowid();
        Ok(AccountId(rows::to_u64(id, "accounts.id")?))
    }

    fn set_account_active(&mut self, account: AccountId, active: bool) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE accounts SET active = ?1 WHERE id = ?2",
                params![active, rows::to_i64(account.0, "accounts.id")?],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(StoreError::Missing {
                kind: "account",
                id: account.0,
            });
        }
        Ok(())
    }

    fn round_history(&mut self, limit: usize) -> Result<Vec<Round>, StoreError> {
        let limit = rows::to_i64(limit as u64, "limit")?;
        self.query_all(
            &format!(
                "SELECT {ROUND_COLUMNS} FROM rounds WHERE processed = 1
                 ORDER BY end_time DESC LIMIT ?1"
            ),
            params![limit],
            round_from_row,
        )
    }

    fn recent_results(&mut self, limit: usize) -> Result<Vec<PublicResult>, StoreError> {
        let limit = rows::to_i64(limit as u64, "limit")?;
        self.query_all(
            "SELECT id, winning_spot, end_time FROM rounds
             WHERE processed = 1 AND winning_spot IS NOT NULL
             ORDER BY end_time DESC LIMIT ?1",
            params![limit],
            |row| {
                let id: i64 = row.get(0).map_err(store_err)?;
                let spot = rows::spot(row.get(1).map_err(store_err)?)?
                    .ok_or_else(|| StoreError::corrupt("rounds.winning_spot", "null"))?;
                Ok(PublicResult {
                    round_id: RoundId(rows::to_u64(id, "rounds.id")?),
                    spot,
                    end_time: rows::instant(row.get(2).map_err(store_err)?, "rounds.end_time")?,
                })
            },
        )
    }

    fn commit(mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT").map_err(store_err)?;
        self.done = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;
    use tenspot_types::{Spot, Wager};

    fn open(dir: &TempDir) -> SqliteLedger {
        let ledger =
            SqliteLedger::open(&dir.path().join("ledger.db"), Duration::from_secs(5)).unwrap();
        assert!(crate::seed_settings(&ledger, &GameSettings::default()).unwrap());
        ledger
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_772_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_seed_settings_only_once() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir);
        let custom = GameSettings {
            target_rtp: 85,
            ..GameSettings::default()
        };
        assert!(!crate::seed_settings(&ledger, &custom).unwrap());

        let mut tx = ledger.begin().unwrap();
        assert_eq!(tx.settings().unwrap(), GameSettings::default());
        tx.put_settings(&custom).unwrap();
        tx.commit().unwrap();

        let mut tx = ledger.begin().unwrap();
        assert_eq!(tx.settings().unwrap().target_rtp, 85);
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir);
        let id = {
            let mut tx = ledger.begin().unwrap();
            let id = tx
                .create_account("alice", Role::Retailer, Amount::from_major(10))
                .unwrap();
            tx.commit().unwrap();
            id
        };
        {
            let mut tx = ledger.begin().unwrap();
            tx.update_balance(id, BalanceChange::Credit(Amount::from_major(5)))
                .unwrap();
            tx.get_or_create_round(at(600)).unwrap();
        }
        let mut tx = ledger.begin().unwrap();
        assert_eq!(
            tx.lock_account(id).unwrap().unwrap().balance,
            Amount::from_major(10)
        );
        assert!(tx.round_by_end_time(at(600)).unwrap().is_none());
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir);
        let mut tx = ledger.begin().unwrap();
        let id = tx
            .create_account("alice", Role::Retailer, Amount::from_major(10))
            .unwrap();
        let err = tx
            .update_balance(id, BalanceChange::Debit(Amount::from_minor(1001)))
            .unwrap_err();
        assert!(matches!(err, StoreError::NegativeBalance { .. }));
        assert_eq!(
            tx.update_balance(id, BalanceChange::Debit(Amount::from_major(10)))
                .unwrap(),
            Amount::ZERO
        );
        let missing = tx
            .update_balance(AccountId(99), BalanceChange::Credit(Amount::from_major(1)))
            .unwrap_err();
        assert!(matches!(missing, StoreError::Missing { kind: "account", .. }));
    }

    #[test]
    fn test_round_and_ticket_rows() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir);
        let mut tx = ledger.begin().unwrap();
        let account = tx
            .create_account("alice", Role::Retailer, Amount::from_major(100))
            .unwrap();
        let round = tx.get_or_create_round(at(600)).unwrap();
        assert_eq!(tx.get_or_create_round(at(600)).unwrap(), round);
        assert!(!round.processed);
        assert_eq!(round.winning_spot, None);

        let mut quantities = [0; tenspot_types::SPOT_COUNT];
        quantities[3] = 2;
        let wager = Wager::from_quantities(quantities).unwrap();
        let ticket = tx
            .insert_ticket(NewTicket {
                account_id: account,
                round_id: round.id,
                wager,
                total_amount: Amount::from_major(20),
                charged: Amount::from_minor(1820),
                created_at: at(30),
            })
            .unwrap();
        tx.set_ticket_flag(ticket, TicketFlag::Claimed).unwrap();

        let stored = tx.ticket(ticket).unwrap().unwrap();
        assert_eq!(stored.wager, wager);
        assert_eq!(stored.charged, Amount::from_minor(1820));
        assert!(stored.claimed && !stored.cancelled);
        assert_eq!(tx.list_tickets(round.id).unwrap(), vec![stored]);

        tx.finalize_round(
            round.id,
            &RoundOutcome {
                spot: Spot::ALL[3],
                collection: Amount::from_major(20),
                payout: Amount::from_major(180),
            },
        )
        .unwrap();
        let settled = tx.round(round.id).unwrap().unwrap();
        assert!(settled.processed);
        assert_eq!(settled.winning_spot, Some(Spot::ALL[3]));
        tx.commit().unwrap();
    }

    #[test]
    fn test_pending_daily_and_recent_queries() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir);
        let mut tx = ledger.begin().unwrap();
        for (minutes, settled) in [(10, true), (20, false), (30, true), (40, false)] {
            let round = tx.get_or_create_round(at(minutes * 60)).unwrap();
            if settled {
                tx.finalize_round(
                    round.id,
                    &RoundOutcome {
                        spot: Spot::ALL[minutes as usize / 10],
                        collection: Amount::from_major(100),
                        payout: Amount::from_major(minutes as u64),
                    },
                )
                .unwrap();
            }
        }

        assert_eq!(
            tx.pending_rounds_before(at(40 * 60)).unwrap(),
            vec![at(20 * 60)]
        );
        let stats = tx
            .daily_stats(at(0), at(0) + ChronoDuration::days(1))
            .unwrap();
        assert_eq!(stats.sales, Amount::from_major(200));
        assert_eq!(stats.payout, Amount::from_major(40));
        let recent = tx.recent_results(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].end_time, at(30 * 60));
        assert_eq!(recent[0].spot, Spot::ALL[3]);
    }

    #[test]
    fn test_account_by_name() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir);
        let mut tx = ledger.begin().unwrap();
        let id = tx
            .create_account("ops", Role::Admin, Amount::ZERO)
            .unwrap();
        let account = tx.account_by_name("ops").unwrap().unwrap();
        assert_eq!(account.id, id);
        assert_eq!(account.role, Role::Admin);
        assert!(account.active);
        assert!(tx.account_by_name("nobody").unwrap().is_none());
        assert!(tx
            .create_account("ops", Role::Retailer, Amount::ZERO)
            .is_err());
    }
}
