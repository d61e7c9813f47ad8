//! Ticket lifecycle: submit, claim, cancel.
//!
//! Each operation locks the caller's account row first and runs to completion
//! inside one ledger transaction. Any refusal returns before commit, so the
//! dropped transaction leaves balances and flags untouched.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tenspot_types::{
    Account, AccountId, Amount, BalanceChange, NewTicket, RoundId, Spot, Ticket, TicketFlag,
    TicketId, Wager,
};
use tracing::info;

use crate::{GameRules, Ledger, LedgerTx, RoundCalendar, StoreError, TicketError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub ticket_id: TicketId,
    pub round_id: RoundId,
    pub round_end: DateTime<Utc>,
    pub total_amount: Amount,
    pub charged: Amount,
    pub new_balance: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClaimReceipt {
    pub ticket_id: TicketId,
    pub spot: String,
    pub quantity: u32,
    pub win_amount: Amount,
    pub new_balance: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CancelReceipt {
    pub ticket_id: TicketId,
    pub refunded: Amount,
    pub new_balance: Amount,
}

pub struct TicketDesk<L> {
    ledger: L,
    rules: GameRules,
    offset: FixedOffset,
}

impl<L: Ledger> TicketDesk<L> {
    pub fn new(ledger: L, rules: GameRules, offset: FixedOffset) -> Self {
        Self {
            ledger,
            rules,
            offset,
        }
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    /// Parse a retailer's label → quantity map.
    pub fn parse_wager<I, S>(&self, entries: I) -> Result<Wager, TicketError>
    where
        I: IntoIterator<Item = (S, i64)>,
        S: AsRef<str>,
    {
        Ok(Wager::from_labeled(&self.rules.labels, entries)?)
    }

    /// End of the round currently accepting stakes.
    pub fn open_round_end(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        let mut tx = self.ledger.begin()?;
        let settings = tx.settings()?;
        Ok(RoundCalendar::new(settings.round_minutes, self.offset).open_round_end(now))
    }

    pub fn submit(
        &self,
        account: AccountId,
        wager: &Wager,
        round_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SubmitReceipt, TicketError> {
        let hours = self.rules.shop_hours;
        if !hours.is_open_at(now, self.offset) {
            return Err(TicketError::ShopClosed {
                open_hour: hours.open_hour,
                close_hour: hours.close_hour,
            });
        }
        let total_amount = wager.total(self.rules.unit_price)?;
        let charged = self.rules.deduction(total_amount);

        let mut tx = self.ledger.begin()?;
        let settings = tx.settings()?;
        if !RoundCalendar::new(settings.round_minutes, self.offset).is_boundary(round_end) {
            return Err(TicketError::InvalidRound(round_end.to_rfc3339()));
        }
        if round_end <= now {
            return Err(TicketError::WindowClosed(round_end.to_rfc3339()));
        }

        let holder = active_account(&mut tx, account)?;
        if holder.balance < charged {
            return Err(TicketError::InsufficientFunds {
                needed: charged,
                available: holder.balance,
            });
        }

        let round = tx.get_or_create_round(round_end)?;
        if round.processed {
            return Err(TicketError::WindowClosed(round_end.to_rfc3339()));
        }

        let ticket_id = tx.insert_ticket(NewTicket {
            account_id: account,
            round_id: round.id,
            wager: *wager,
            total_amount,
            charged,
            created_at: now,
        })?;
        let new_balance = tx.update_balance(account, BalanceChange::Debit(charged))?;
        tx.commit()?;

        info!(
            ticket_id = %ticket_id,
            account_id = %account,
            round_id = %round.id,
            total = %total_amount,
            charged = %charged,
            "ticket submitted"
        );
        Ok(SubmitReceipt {
            ticket_id,
            round_id: round.id,
            round_end,
            total_amount,
            charged,
            new_balance,
        })
    }

    /// Pay a winning ticket. Tickets already paid by settlement report
    /// `AlreadyClaimed`.
    pub fn claim(
        &self,
        account: AccountId,
        ticket_id: TicketId,
    ) -> Result<ClaimReceipt, TicketError> {
        let mut tx = self.ledger.begin()?;
        tx.lock_account(account)?
            .ok_or(TicketError::UnknownAccount(account))?;
        let ticket = owned_ticket(&mut tx, account, ticket_id)?;

        let round = tx.round(ticket.round_id)?.ok_or(StoreError::Missing {
            kind: "round",
            id: ticket.round_id.0,
        })?;
        if !round.processed {
            return Err(TicketError::NotYetDetermined(round.id));
        }
        let spot: Spot = round
            .winning_spot
            .ok_or_else(|| StoreError::corrupt("round.winning_spot", "processed without a spot"))?;
        let quantity = ticket.wager.quantity(spot);
        if quantity == 0 {
            return Err(TicketError::NoWin(ticket_id));
        }

        let win_amount = self
            .rules
            .unit_payout()
            .checked_mul(quantity as u64)
            .ok_or_else(|| StoreError::corrupt("ticket.wager", "winning overflows"))?;
        let new_balance = tx.update_balance(account, BalanceChange::Credit(win_amount))?;
        tx.set_ticket_flag(ticket_id, TicketFlag::Claimed)?;
        tx.commit()?;

        info!(ticket_id = %ticket_id, account_id = %account, win = %win_amount, "ticket claimed");
        Ok(ClaimReceipt {
            ticket_id,
            spot: self.rules.labels.label(spot).to_string(),
            quantity,
            win_amount,
            new_balance,
        })
    }

    /// Refund an unsettled ticket's full wager while more than the cancel
    /// margin remains. The commission withheld at submit is refunded too.
    pub fn cancel(
        &self,
        account: AccountId,
        ticket_id: TicketId,
        now: DateTime<Utc>,
    ) -> Result<CancelReceipt, TicketError> {
        let mut tx = self.ledger.begin()?;
        tx.lock_account(account)?
            .ok_or(TicketError::UnknownAccount(account))?;
        let ticket = owned_ticket(&mut tx, account, ticket_id)?;

        let round = tx.round(ticket.round_id)?.ok_or(StoreError::Missing {
            kind: "round",
            id: ticket.round_id.0,
        })?;
        if round.processed || round.end_time - now <= self.rules.cancel_margin {
            return Err(TicketError::WindowClosed(round.end_time.to_rfc3339()));
        }

        let new_balance = tx.update_balance(account, BalanceChange::Credit(ticket.total_amount))?;
        tx.set_ticket_flag(ticket_id, TicketFlag::Cancelled)?;
        tx.commit()?;

        info!(ticket_id = %ticket_id, account_id = %account, refunded = %ticket.total_amount, "ticket cancelled");
        Ok(CancelReceipt {
            ticket_id,
            refunded: ticket.total_amount,
            new_balance,
        })
    }
}

fn active_account<T: LedgerTx>(tx: &mut T, id: AccountId) -> Result<Account, TicketError> {
    let account = tx.lock_account(id)?.ok_or(TicketError::UnknownAccount(id))?;
    if !account.active {
        return Err(TicketError::AccountInactive(id));
    }
    Ok(account)
}

/// Load a live, unpaid ticket owned by `account`.
fn owned_ticket<T: LedgerTx>(
    tx: &mut T,
    account: AccountId,
    id: TicketId,
) -> Result<Ticket, TicketError> {
    let ticket = tx
        .ticket(id)?
        .filter(|ticket| ticket.account_id == account)
        .ok_or(TicketError::InvalidTicket(id))?;
    if ticket.cancelled {
        return Err(TicketError::AlreadyCancelled(id));
    }
    if ticket.claimed {
        return Err(TicketError::AlreadyClaimed(id));
    }
    Ok(ticket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{at, Memory};

    fn desk(memory: &Memory) -> TicketDesk<&Memory> {
        TicketDesk::new(memory, GameRules::default(), memory.offset())
    }

    #[test]
    fn test_parse_wager_uses_configured_labels() {
        let memory = Memory::default();
        let desk = desk(&memory);
        let wager = desk.parse_wager([("B1", 3), ("J9", 1)]).unwrap();
        assert_eq!(wager.units(), 4);
        assert!(matches!(
            desk.parse_wager([("K10", 1)]),
            Err(TicketError::InvalidWager(_))
        ));
    }

    #[test]
    fn test_open_round_end_follows_settings() {
        let memory = Memory::default();
        let desk = desk(&memory);
        assert_eq!(
            desk.open_round_end(at("2026-03-01T10:03:00+05:30")).unwrap(),
            at("2026-03-01T10:10:00+05:30")
        );
    }

    #[test]
    fn test_submit_refuses_off_boundary_round() {
        let memory = Memory::default();
        let alice = memory.account("alice", Amount::from_major(100));
        let desk = desk(&memory);
        let wager = desk.parse_wager([("A0", 1)]).unwrap();
        let result = desk.submit(
            alice,
            &wager,
            at("2026-03-01T10:05:00+05:30"),
            at("2026-03-01T10:01:00+05:30"),
        );
        assert!(matches!(result, Err(TicketError::InvalidRound(_))));
        assert_eq!(memory.balance(alice), Amount::from_major(100));
    }

    #[test]
    fn test_unknown_account() {
        let memory = Memory::default();
        let desk = desk(&memory);
        let wager = desk.parse_wager([("A0", 1)]).unwrap();
        let result = desk.submit(
            AccountId(404),
            &wager,
            at("2026-03-01T10:10:00+05:30"),
            at("2026-03-01T10:01:00+05:30"),
        );
        assert!(matches!(result, Err(TicketError::UnknownAccount(AccountId(404)))));
    }
}
