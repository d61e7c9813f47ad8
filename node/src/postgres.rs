//! Postgres ledger.
//!
//! A small fixed pool of blocking clients. Transactions run at SERIALIZABLE
//! isolation with explicit row locks (`FOR UPDATE` on accounts and rounds,
//! `FOR SHARE` on round reads), so submissions serialize against settlement of
//! the same round. Serialization failures, deadlocks, lock timeouts and lost
//! connections are reported as transient.
//!
//! The `postgres` client drives its own runtime internally: call it from a
//! blocking thread, never directly from async code.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

use chrono::{DateTime, Utc};
use postgres::error::SqlState;
use postgres::{Client, NoTls, Row};
use tenspot_execution::{Ledger, LedgerTx, StoreError};
use tenspot_types::{
    Account, AccountId, Amount, BalanceChange, DailyStats, GameSettings, NewTicket, PublicResult,
    Role, Round, RoundId, RoundOutcome, Ticket, TicketFlag, TicketId,
};
use tracing::{info, warn};

use crate::rows;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS accounts (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        role TEXT NOT NULL,
        balance BIGINT NOT NULL CHECK (balance >= 0),
        active BOOLEAN NOT NULL DEFAULT TRUE
    );
    CREATE TABLE IF NOT EXISTS rounds (
        id BIGSERIAL PRIMARY KEY,
        end_time BIGINT NOT NULL UNIQUE,
        winning_spot BIGINT,
        collection BIGINT NOT NULL DEFAULT 0,
        payout BIGINT NOT NULL DEFAULT 0,
        processed BOOLEAN NOT NULL DEFAULT FALSE
    );
    CREATE INDEX IF NOT EXISTS rounds_pending ON rounds(processed, end_time);
    CREATE TABLE IF NOT EXISTS tickets (
        id BIGSERIAL PRIMARY KEY,
        account_id BIGINT NOT NULL REFERENCES accounts(id),
        round_id BIGINT NOT NULL REFERENCES rounds(id),
        wager TEXT NOT NULL,
        total_amount BIGINT NOT NULL,
        charged BIGINT NOT NULL,
        cancelled BOOLEAN NOT NULL DEFAULT FALSE,
        claimed BOOLEAN NOT NULL DEFAULT FALSE,
        created_at BIGINT NOT NULL,
        CHECK (NOT (cancelled AND claimed))
    );
    CREATE INDEX IF NOT EXISTS tickets_round ON tickets(round_id);
    CREATE TABLE IF NOT EXISTS settings (
        id BIGINT PRIMARY KEY CHECK (id = 1),
        target_rtp BIGINT NOT NULL,
        min_round_rtp BIGINT NOT NULL,
        max_round_rtp BIGINT NOT NULL,
        round_minutes BIGINT NOT NULL
    );";

const ACCOUNT_COLUMNS: &str = "id, name, role, balance, active";
const ROUND_COLUMNS: &str = "id, end_time, winning_spot, collection, payout, processed";
const TICKET_COLUMNS: &str =
    "id, account_id, round_id, wager, total_amount, charged, cancelled, claimed, created_at";

fn store_err(err: postgres::Error) -> StoreError {
    let transient = err.is_closed()
        || matches!(
            err.code(),
            Some(code) if *code == SqlState::T_R_SERIALIZATION_FAILURE
                || *code == SqlState::T_R_DEADLOCK_DETECTED
                || *code == SqlState::LOCK_NOT_AVAILABLE
        );
    if transient {
        StoreError::Transient(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

fn u32_column(value: i64, field: &'static str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::corrupt(field, value))
}

pub struct PostgresLedger {
    url: String,
    pool: Vec<Mutex<Client>>,
    next: AtomicUsize,
}

impl PostgresLedger {
    /// Connect `pool_size` clients to `url` and ensure the schema.
    ///
    /// The URL should already have passed [`crate::validate_postgres_url`].
    pub fn connect(url: &str, pool_size: usize) -> Result<Self, StoreError> {
        let mut pool = Vec::with_capacity(pool_size.max(1));
        for _ in 0..pool_size.max(1) {
            pool.push(Mutex::new(Client::connect(url, NoTls).map_err(store_err)?));
        }
        if let Some(first) = pool.first() {
            lock(first).batch_execute(SCHEMA).map_err(store_err)?;
        }
        info!(
            url = %crate::redact_url(url),
            pool_size = pool.len(),
            "connected to postgres"
        );
        Ok(Self {
            url: url.to_string(),
            pool,
            next: AtomicUsize::new(0),
        })
    }

    /// Check out a client: the first idle one, else wait on the next in turn.
    fn client(&self) -> Result<MutexGuard<'_, Client>, StoreError> {
        let mut guard = self
            .pool
            .iter()
            .find_map(|slot| match slot.try_lock() {
                Ok(guard) => Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => None,
            })
            .unwrap_or_else(|| {
                let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len();
                lock(&self.pool[idx])
            });
        if guard.is_closed() {
            warn!("postgres connection closed, reconnecting");
            *guard = Client::connect(&self.url, NoTls).map_err(store_err)?;
        }
        Ok(guard)
    }
}

fn lock(slot: &Mutex<Client>) -> MutexGuard<'_, Client> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Ledger for PostgresLedger {
    type Tx<'a> = PostgresTx<'a>;

    fn begin(&self) -> Result<PostgresTx<'_>, StoreError> {
        let mut client = self.client()?;
        client
            .batch_execute("BEGIN ISOLATION LEVEL SERIALIZABLE")
            .map_err(store_err)?;
        Ok(PostgresTx {
            client,
            done: false,
        })
    }
}

pub struct PostgresTx<'a> {
    client: MutexGuard<'a, Client>,
    done: bool,
}

impl Drop for PostgresTx<'_> {
    fn drop(&mut self) {
        if self.done || self.client.is_closed() {
            return;
        }
        if let Err(err) = self.client.batch_execute("ROLLBACK") {
            warn!(?err, "postgres rollback failed");
        }
    }
}

fn account_from_row(row: &Row) -> Result<Account, StoreError> {
    let role: String = row.get(2);
    Ok(Account {
        id: AccountId(rows::to_u64(row.get(0), "accounts.id")?),
        name: row.get(1),
        role: rows::role(&role)?,
        balance: rows::amount(row.get(3), "accounts.balance")?,
        active: row.get(4),
    })
}

fn round_from_row(row: &Row) -> Result<Round, StoreError> {
    Ok(Round {
        id: RoundId(rows::to_u64(row.get(0), "rounds.id")?),
        end_time: rows::instant(row.get(1), "rounds.end_time")?,
        winning_spot: rows::spot(row.get(2))?,
        collection: rows::amount(row.get(3), "rounds.collection")?,
        payout: rows::amount(row.get(4), "rounds.payout")?,
        processed: row.get(5),
    })
}

fn ticket_from_row(row: &Row) -> Result<Ticket, StoreError> {
    let wager: String = row.get(3);
    Ok(Ticket {
        id: TicketId(rows::to_u64(row.get(0), "tickets.id")?),
        account_id: AccountId(rows::to_u64(row.get(1), "tickets.account_id")?),
        round_id: RoundId(rows::to_u64(row.get(2), "tickets.round_id")?),
        wager: rows::wager(&wager)?,
        total_amount: rows::amount(row.get(4), "tickets.total_amount")?,
        charged: rows::amount(row.get(5), "tickets.charged")?,
        cancelled: row.get(6),
        claimed: row.get(7),
        created_at: rows::instant(row.get(8), "tickets.created_at")?,
    })
}

impl PostgresTx<'_> {
    fn query_opt<T>(
        &mut self,
        sql: &str,
        params: &[&(dyn postgres::types::ToSql + Sync)],
        map: fn(&Row) -> Result<T, StoreError>,
    ) -> Result<Option<T>, StoreError> {
        self.client
            .query_opt(sql, params)
            .map_err(store_err)?
            .as_ref()
            .map(map)
            .transpose()
    }

    fn query_all<T>(
        &mut self,
        sql: &str,
        params: &[&(dyn postgres::types::ToSql + Sync)],
        map: fn(&Row) -> Result<T, StoreError>,
    ) -> Result<Vec<T>, StoreError> {
        self.client
            .query(sql, params)
            .map_err(store_err)?
            .iter()
            .map(map)
            .collect()
    }
}

impl LedgerTx for PostgresTx<'_> {
    fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let id = rows::to_i64(id.0, "accounts.id")?;
        self.query_opt(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR UPDATE"),
            &[&id],
            account_from_row,
        )
    }

    fn account_by_name(&mut self, name: &str) -> Result<Option<Account>, StoreError> {
        self.query_opt(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE name = $1"),
            &[&name],
            account_from_row,
        )
    }

    fn round(&mut self, id: RoundId) -> Result<Option<Round>, StoreError> {
        let id = rows::to_i64(id.0, "rounds.id")?;
        self.query_opt(
            &format!("SELECT {ROUND_COLUMNS} FROM rounds WHERE id = $1 FOR SHARE"),
            &[&id],
            round_from_row,
        )
    }

    fn round_by_end_time(&mut self, end_time: DateTime<Utc>) -> Result<Option<Round>, StoreError> {
        self.query_opt(
            &format!("SELECT {ROUND_COLUMNS} FROM rounds WHERE end_time = $1 FOR SHARE"),
            &[&end_time.timestamp()],
            round_from_row,
        )
    }

    fn get_or_create_round(&mut self, end_time: DateTime<Utc>) -> Result<Round, StoreError> {
        let secs = end_time.timestamp();
        self.client
            .execute(
                "INSERT INTO rounds (end_time) VALUES ($1) ON CONFLICT (end_time) DO NOTHING",
                &[&secs],
            )
            .map_err(store_err)?;
        self.query_opt(
            &format!("SELECT {ROUND_COLUMNS} FROM rounds WHERE end_time = $1 FOR UPDATE"),
            &[&secs],
            round_from_row,
        )?
        .ok_or(StoreError::Missing {
            kind: "round",
            id: secs.unsigned_abs(),
        })
    }

    fn pending_rounds_before(
        &mut self,
        before: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        self.query_all(
            "SELECT end_time FROM rounds
             WHERE NOT processed AND end_time < $1
             ORDER BY end_time ASC",
            &[&before.timestamp()],
            |row| rows::instant(row.get(0), "rounds.end_time"),
        )
    }

    fn ticket(&mut self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        let id = rows::to_i64(id.0, "tickets.id")?;
        self.query_opt(
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1 FOR UPDATE"),
            &[&id],
            ticket_from_row,
        )
    }

    fn list_tickets(&mut self, round: RoundId) -> Result<Vec<Ticket>, StoreError> {
        let round = rows::to_i64(round.0, "rounds.id")?;
        self.query_all(
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE round_id = $1 ORDER BY id"),
            &[&round],
            ticket_from_row,
        )
    }

    fn insert_ticket(&mut self, ticket: NewTicket) -> Result<TicketId, StoreError> {
        let row = self
            .client
            .query_one(
                "INSERT INTO tickets
                     (account_id, round_id, wager, total_amount, charged, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING id",
                &[
                    &rows::to_i64(ticket.account_id.0, "tickets.account_id")?,
                    &rows::to_i64(ticket.round_id.0, "tickets.round_id")?,
                    &rows::wager_column(&ticket.wager)?,
                    &rows::amount_column(ticket.total_amount, "tickets.total_amount")?,
                    &rows::amount_column(ticket.charged, "tickets.charged")?,
                    &ticket.created_at.timestamp(),
                ],
            )
            .map_err(store_err)?;
        Ok(TicketId(rows::to_u64(row.get(0), "tickets.id")?))
    }

    fn update_balance(
        &mut self,
        account: AccountId,
        change: BalanceChange,
    ) -> Result<Amount, StoreError> {
        let id = rows::to_i64(account.0, "accounts.id")?;
        let (sql, amount) = match change {
            BalanceChange::Credit(amount) => (
                "UPDATE accounts SET balance = balance + $1 WHERE id = $2 RETURNING balance",
                amount,
            ),
            BalanceChange::Debit(amount) => (
                "UPDATE accounts SET balance = balance - $1
                 WHERE id = $2 AND balance >= $1 RETURNING balance",
                amount,
            ),
        };
        let value = rows::amount_column(amount, "balance change")?;
        let updated = self
            .client
            .query_opt(sql, &[&value, &id])
            .map_err(store_err)?;
        match updated {
            Some(row) => rows::amount(row.get(0), "accounts.balance"),
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
            TicketFlag::Cancelled => "UPDATE tickets SET cancelled = TRUE WHERE id = $1",
            TicketFlag::Claimed => "UPDATE tickets SET claimed = TRUE WHERE id = $1",
        };
        let id = rows::to_i64(ticket.0, "tickets.id")?;
        let changed = self.client.execute(sql, &[&id]).map_err(store_err)?;
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
            .client
            .execute(
                "UPDATE rounds
                 SET winning_spot = $1, collection = $2, payout = $3, processed = TRUE
                 WHERE id = $4",
                &[
                    &rows::spot_column(outcome.spot),
                    &rows::amount_column(outcome.collection, "rounds.collection")?,
                    &rows::amount_column(outcome.payout, "rounds.payout")?,
                    &rows::to_i64(round.0, "rounds.id")?,
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
        // SUM(bigint) is NUMERIC in postgres; cast back for the driver
        let row = self
            .client
            .query_one(
                "SELECT COALESCE(SUM(collection), 0)::BIGINT, COALESCE(SUM(payout), 0)::BIGINT
                 FROM rounds
                 WHERE processed AND end_time >= $1 AND end_time < $2",
                &[&start.timestamp(), &end.timestamp()],
            )
            .map_err(store_err)?;
        Ok(DailyStats {
            sales: rows::amount(row.get(0), "daily sales")?,
            payout: rows::amount(row.get(1), "daily payout")?,
        })
    }

    fn settings(&mut self) -> Result<GameSettings, StoreError> {
        self.query_opt(
            "SELECT target_rtp, min_round_rtp, max_round_rtp, round_minutes
             FROM settings WHERE id = 1",
            &[],
            |row| {
                Ok(GameSettings {
                    target_rtp: u32_column(row.get(0), "settings.target_rtp")?,
                    min_round_rtp: u32_column(row.get(1), "settings.min_round_rtp")?,
                    max_round_rtp: u32_column(row.get(2), "settings.max_round_rtp")?,
                    round_minutes: u32_column(row.get(3), "settings.round_minutes")?,
                })
            },
        )?
        .ok_or(StoreError::Missing {
            kind: "settings",
            id: 1,
        })
    }

    fn put_settings(&mut self, settings: &GameSettings) -> Result<(), StoreError> {
        self.client
            .execute(
                "INSERT INTO settings (id, target_rtp, min_round_rtp, max_round_rtp, round_minutes)
                 VALUES (1, $1, $2, $3, $4)
                 ON CONFLICT (id) DO UPDATE SET
                     target_rtp = EXCLUDED.target_rtp,
                     min_round_rtp = EXCLUDED.min_round_rtp,
                     max_round_rtp = EXCLUDED.max_round_rtp,
                     round_minutes = EXCLUDED.round_minutes",
                &[
                    &i64::from(settings.target_rtp),
                    &i64::from(settings.min_round_rtp),
                    &i64::from(settings.max_round_rtp),
                    &i64::from(settings.round_minutes),
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
        let row = self
            .client
            .query_one(
                "INSERT INTO accounts (name, role, balance) VALUES ($1, $2, $3) RETURNING id",
                &[
                    &name,
                    &role.as_str(),
                    &rows::amount_column(balance, "accounts.balance")?,
                ],
            )
            .map_err(store_err)?;
        Ok(AccountId(rows::to_u64(row.get(0), "accounts.id")?))
    }

    fn set_account_active(&mut self, account: AccountId, active: bool) -> Result<(), StoreError> {
        let id = rows::to_i64(account.0, "accounts.id")?;
        let changed = self
            .client
            .execute("UPDATE accounts SET active = $1 WHERE id = $2", &[&active, &id])
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
                "SELECT {ROUND_COLUMNS} FROM rounds WHERE processed
                 ORDER BY end_time DESC LIMIT $1"
            ),
            &[&limit],
            round_from_row,
        )
    }

    fn recent_results(&mut self, limit: usize) -> Result<Vec<PublicResult>, StoreError> {
        let limit = rows::to_i64(limit as u64, "limit")?;
        self.query_all(
            "SELECT id, winning_spot, end_time FROM rounds
             WHERE processed AND winning_spot IS NOT NULL
             ORDER BY end_time DESC LIMIT $1",
            &[&limit],
            |row| {
                let spot = rows::spot(row.get(1))?
                    .ok_or_else(|| StoreError::corrupt("rounds.winning_spot", "null"))?;
                Ok(PublicResult {
                    round_id: RoundId(rows::to_u64(row.get(0), "rounds.id")?),
                    spot,
                    end_time: rows::instant(row.get(2), "rounds.end_time")?,
                })
            },
        )
    }

    fn commit(mut self) -> Result<(), StoreError> {
        self.client.batch_execute("COMMIT").map_err(store_err)?;
        self.done = true;
        Ok(())
    }
}
