//! In-memory ledger and scripted randomness for tests.
//!
//! [`Memory`] serializes transactions on a mutex (the same discipline as the
//! SQLite backend's `BEGIN IMMEDIATE`). A transaction works on a copy of the
//! state and writes it back on commit, so dropping it rolls back.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use tenspot_types::{
    Account, AccountId, Amount, BalanceChange, DailyStats, GameSettings, NewTicket, PublicResult,
    Role, Round, RoundId, RoundOutcome, Ticket, TicketFlag, TicketId, Wager,
    DEFAULT_UTC_OFFSET_MINUTES, SPOT_COUNT,
};

use crate::{Entropy, GameRules, Ledger, LedgerTx, StoreError};

#[derive(Clone, Debug, Default)]
struct State {
    accounts: BTreeMap<AccountId, Account>,
    rounds: BTreeMap<RoundId, Round>,
    tickets: BTreeMap<TicketId, Ticket>,
    settings: GameSettings,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn round_at(&self, end_time: DateTime<Utc>) -> Option<&Round> {
        self.rounds.values().find(|round| round.end_time == end_time)
    }

    fn get_or_create_round(&mut self, end_time: DateTime<Utc>) -> Round {
        if let Some(round) = self.round_at(end_time) {
            return round.clone();
        }
        let id = RoundId(self.next_id());
        let round = Round::pending(id, end_time);
        self.rounds.insert(id, round.clone());
        round
    }
}

pub struct Memory {
    state: Mutex<State>,
    failing_commits: AtomicU32,
    offset: FixedOffset,
}

impl Default for Memory {
    fn default() -> Self {
        let offset = FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60).unwrap_or(Utc.fix());
        Self::with_offset(offset)
    }
}

impl Memory {
    pub fn with_offset(offset: FixedOffset) -> Self {
        Self {
            state: Mutex::new(State::default()),
            failing_commits: AtomicU32::new(0),
            offset,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `count` commits fail with a transient error.
    pub fn fail_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    pub fn account(&self, name: &str, balance: Amount) -> AccountId {
        self.account_with_role(name, Role::Retailer, balance)
    }

    pub fn account_with_role(&self, name: &str, role: Role, balance: Amount) -> AccountId {
        let mut state = self.state();
        let id = AccountId(state.next_id());
        state.accounts.insert(
            id,
            Account {
                id,
                name: name.to_string(),
                role,
                balance,
                active: true,
            },
        );
        id
    }

    pub fn block(&self, id: AccountId) {
        if let Some(account) = self.state().accounts.get_mut(&id) {
            account.active = false;
        }
    }

    pub fn balance(&self, id: AccountId) -> Amount {
        self.state()
            .accounts
            .get(&id)
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    pub fn total_balance(&self) -> Amount {
        self.state()
            .accounts
            .values()
            .map(|account| account.balance)
            .sum()
    }

    pub fn set_settings(&self, settings: GameSettings) {
        self.state().settings = settings;
    }

    /// Insert a ticket directly, bypassing the desk (no balance change).
    pub fn place(
        &self,
        account: AccountId,
        end_time: DateTime<Utc>,
        wager: Wager,
        rules: &GameRules,
    ) -> TicketId {
        let mut state = self.state();
        let round = state.get_or_create_round(end_time);
        let id = TicketId(state.next_id());
        let total_amount = wager.total(rules.unit_price).unwrap_or_default();
        state.tickets.insert(
            id,
            Ticket {
                id,
                account_id: account,
                round_id: round.id,
                wager,
                total_amount,
                charged: rules.deduction(total_amount),
                cancelled: false,
                claimed: false,
                created_at: end_time,
            },
        );
        id
    }

    /// Flag a ticket cancelled without refunding it.
    pub fn cancel_in_place(&self, id: TicketId) {
        if let Some(ticket) = self.state().tickets.get_mut(&id) {
            ticket.cancelled = true;
        }
    }

    /// Insert an already processed round carrying the given totals.
    pub fn processed_round(&self, end_time: DateTime<Utc>, collection: Amount, payout: Amount) {
        let mut state = self.state();
        let round = state.get_or_create_round(end_time);
        if let Some(stored) = state.rounds.get_mut(&round.id) {
            stored.winning_spot = tenspot_types::Spot::new(0);
            stored.collection = collection;
            stored.payout = payout;
            stored.processed = true;
        }
    }

    pub fn round_at(&self, end_time: DateTime<Utc>) -> Option<Round> {
        self.state().round_at(end_time).cloned()
    }

    pub fn ticket(&self, id: TicketId) -> Option<Ticket> {
        self.state().tickets.get(&id).cloned()
    }

    pub fn tickets_for(&self, end_time: DateTime<Utc>) -> Vec<Ticket> {
        let state = self.state();
        let Some(round) = state.round_at(end_time) else {
            return Vec::new();
        };
        state
            .tickets
            .values()
            .filter(|ticket| ticket.round_id == round.id)
            .cloned()
            .collect()
    }
}

impl Ledger for Memory {
    type Tx<'a> = MemoryTx<'a>;

    fn begin(&self) -> Result<MemoryTx<'_>, StoreError> {
        let guard = self.state();
        let work = guard.clone();
        Ok(MemoryTx {
            guard,
            work,
            failing_commits: &self.failing_commits,
        })
    }
}

pub struct MemoryTx<'a> {
    guard: MutexGuard<'a, State>,
    work: State,
    failing_commits: &'a AtomicU32,
}

impl LedgerTx for MemoryTx<'_> {
    fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.work.accounts.get(&id).cloned())
    }

    fn account_by_name(&mut self, name: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .work
            .accounts
            .values()
            .find(|account| account.name == name)
            .cloned())
    }

    fn round(&mut self, id: RoundId) -> Result<Option<Round>, StoreError> {
        Ok(self.work.rounds.get(&id).cloned())
    }

    fn round_by_end_time(&mut self, end_time: DateTime<Utc>) -> Result<Option<Round>, StoreError> {
        Ok(self.work.round_at(end_time).cloned())
    }

    fn get_or_create_round(&mut self, end_time: DateTime<Utc>) -> Result<Round, StoreError> {
        Ok(self.work.get_or_create_round(end_time))
    }

    fn pending_rounds_before(
        &mut self,
        before: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let mut pending: Vec<_> = self
            .work
            .rounds
            .values()
            .filter(|round| !round.processed && round.end_time < before)
            .map(|round| round.end_time)
            .collect();
        pending.sort();
        Ok(pending)
    }

    fn ticket(&mut self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        Ok(self.work.tickets.get(&id).cloned())
    }

    fn list_tickets(&mut self, round: RoundId) -> Result<Vec<Ticket>, StoreError> {
        Ok(self
            .work
            .tickets
            .values()
            .filter(|ticket| ticket.round_id == round)
            .cloned()
            .collect())
    }

    fn insert_ticket(&mut self, ticket: NewTicket) -> Result<TicketId, StoreError> {
        let id = TicketId(self.work.next_id());
        self.work.tickets.insert(
            id,
            Ticket {
                id,
                account_id: ticket.account_id,
                round_id: ticket.round_id,
                wager: ticket.wager,
                total_amount: ticket.total_amount,
                charged: ticket.charged,
                cancelled: false,
                claimed: false,
                created_at: ticket.created_at,
            },
        );
        Ok(id)
    }

    fn update_balance(
        &mut self,
        account: AccountId,
        change: BalanceChange,
    ) -> Result<Amount, StoreError> {
        let row = self
            .work
            .accounts
            .get_mut(&account)
            .ok_or(StoreError::Missing {
                kind: "account",
                id: account.0,
            })?;
        row.balance = match change {
            BalanceChange::Credit(amount) => row
                .balance
                .checked_add(amount)
                .ok_or_else(|| StoreError::corrupt("account.balance", "credit overflows"))?,
            BalanceChange::Debit(amount) => row.balance.checked_sub(amount).ok_or(
                StoreError::NegativeBalance {
                    account,
                    debit: amount,
                },
            )?,
        };
        Ok(row.balance)
    }

    fn set_ticket_flag(&mut self, ticket: TicketId, flag: TicketFlag) -> Result<(), StoreError> {
        let row = self.work.tickets.get_mut(&ticket).ok_or(StoreError::Missing {
            kind: "ticket",
            id: ticket.0,
        })?;
        match flag {
            TicketFlag::Cancelled => row.cancelled = true,
            TicketFlag::Claimed => row.claimed = true,
        }
        Ok(())
    }

    fn finalize_round(&mut self, round: RoundId, outcome: &RoundOutcome) -> Result<(), StoreError> {
        let row = self.work.rounds.get_mut(&round).ok_or(StoreError::Missing {
            kind: "round",
            id: round.0,
        })?;
        row.winning_spot = Some(outcome.spot);
        row.collection = outcome.collection;
        row.payout = outcome.payout;
        row.processed = true;
        Ok(())
    }

    fn daily_stats(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DailyStats, StoreError> {
        let day = self
            .work
            .rounds
            .values()
            .filter(|round| round.processed && round.end_time >= start && round.end_time < end);
        let mut stats = DailyStats::default();
        for round in day {
            stats.sales = stats.sales.saturating_add(round.collection);
            stats.payout = stats.payout.saturating_add(round.payout);
        }
        Ok(stats)
    }

    fn settings(&mut self) -> Result<GameSettings, StoreError> {
        Ok(self.work.settings)
    }

    fn put_settings(&mut self, settings: &GameSettings) -> Result<(), StoreError> {
        self.work.settings = *settings;
        Ok(())
    }

    fn create_account(
        &mut self,
        name: &str,
        role: Role,
        balance: Amount,
    ) -> Result<AccountId, StoreError> {
        if self.work.accounts.values().any(|account| account.name == name) {
            return Err(StoreError::Backend(format!("account {name} already exists")));
        }
        let id = AccountId(self.work.next_id());
        self.work.accounts.insert(
            id,
            Account {
                id,
                name: name.to_string(),
                role,
                balance,
                active: true,
            },
        );
        Ok(id)
    }

    fn set_account_active(&mut self, account: AccountId, active: bool) -> Result<(), StoreError> {
        let row = self.work.accounts.get_mut(&account).ok_or(StoreError::Missing {
            kind: "account",
            id: account.0,
        })?;
        row.active = active;
        Ok(())
    }

    fn round_history(&mut self, limit: usize) -> Result<Vec<Round>, StoreError> {
        let mut settled: Vec<_> = self
            .work
            .rounds
            .values()
            .filter(|round| round.processed)
            .cloned()
            .collect();
        settled.sort_by(|a, b| b.end_time.cmp(&a.end_time));
        settled.truncate(limit);
        Ok(settled)
    }

    fn recent_results(&mut self, limit: usize) -> Result<Vec<PublicResult>, StoreError> {
        let mut settled: Vec<_> = self
            .work
            .rounds
            .values()
            .filter_map(|round| {
                round.winning_spot.map(|spot| PublicResult {
                    round_id: round.id,
                    spot,
                    end_time: round.end_time,
                })
            })
            .collect();
        settled.sort_by(|a, b| b.end_time.cmp(&a.end_time));
        settled.truncate(limit);
        Ok(settled)
    }

    fn commit(mut self) -> Result<(), StoreError> {
        let pending = self.failing_commits.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_commits.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Transient("injected commit failure".to_string()));
        }
        *self.guard = std::mem::take(&mut self.work);
        Ok(())
    }
}

/// Entropy replaying a fixed script, each value reduced modulo the bound.
/// Once the script is exhausted it keeps returning the fallback.
#[derive(Clone, Debug)]
pub struct ScriptedEntropy {
    script: VecDeque<u32>,
    fallback: u32,
}

impl ScriptedEntropy {
    pub fn new(script: impl IntoIterator<Item = u32>) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback: 0,
        }
    }

    pub fn repeating(value: u32) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: value,
        }
    }
}

impl Entropy for ScriptedEntropy {
    fn below(&mut self, bound: u32) -> u32 {
        self.script.pop_front().unwrap_or(self.fallback) % bound
    }
}

/// Standalone live ticket with the given `(spot index, quantity)` stakes.
pub fn ticket_fixture(id: u64, stakes: &[(usize, u32)], rules: &GameRules) -> Ticket {
    let mut quantities = [0; SPOT_COUNT];
    for (idx, qty) in stakes {
        quantities[*idx] = *qty;
    }
    let wager = Wager::from_quantities(quantities).unwrap_or_default();
    let total_amount = wager.total(rules.unit_price).unwrap_or_default();
    Ticket {
        id: TicketId(id),
        account_id: AccountId(1),
        round_id: RoundId(1),
        wager,
        total_amount,
        charged: rules.deduction(total_amount),
        cancelled: false,
        claimed: false,
        created_at: DateTime::<Utc>::UNIX_EPOCH,
    }
}

/// Parse an RFC 3339 instant.
pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .map(|instant| instant.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
