//! Settlement orchestrator.
//!
//! Settling a round is one ledger transaction: resolve the round, skip it if
//! already processed, aggregate live tickets, select the winner, credit
//! winners (under [`PayoutPolicy::OnSettlement`]), finalize bookkeeping and
//! commit. The processed flag checked under the round lock is the only guard
//! against double settlement, so overlapping scheduler ticks, retries and
//! manual runs all collapse to a single effect.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};
use tenspot_types::{
    AccountId, Amount, BalanceChange, RoundId, RoundOutcome, Spot, TicketFlag,
};
use tracing::{debug, info, warn};

use crate::{
    Entropy, GameRules, Ledger, LedgerTx, PayoutPolicy, RoundCalendar, RtpContext, SelectionMode,
    SettleError, StakeSummary, StoreError, WinnerSelector,
};

/// Bookkeeping of one freshly settled round.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundReport {
    pub round_id: RoundId,
    pub end_time: DateTime<Utc>,
    pub spot: Spot,
    pub collection: Amount,
    pub payout: Amount,
    pub mode: SelectionMode,
    /// Winning live tickets.
    pub winners: usize,
    /// Amount credited by this settlement (zero under `OnClaim`).
    pub credited: Amount,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SettlementOutcome {
    Settled(RoundReport),
    /// The round was already processed; nothing changed.
    AlreadyProcessed(RoundId),
}

impl SettlementOutcome {
    pub fn report(&self) -> Option<&RoundReport> {
        match self {
            SettlementOutcome::Settled(report) => Some(report),
            SettlementOutcome::AlreadyProcessed(_) => None,
        }
    }
}

/// Result of a catch-up sweep over every round that is due.
#[derive(Debug, Default)]
pub struct Sweep {
    pub outcomes: Vec<SettlementOutcome>,
    /// Rounds that failed and stay pending for the next sweep.
    pub failed: Vec<(DateTime<Utc>, SettleError)>,
}

impl Sweep {
    pub fn settled(&self) -> impl Iterator<Item = &RoundReport> {
        self.outcomes.iter().filter_map(SettlementOutcome::report)
    }
}

pub struct Settlement<L> {
    ledger: L,
    rules: GameRules,
    offset: FixedOffset,
    selector: WinnerSelector,
}

impl<L: Ledger> Settlement<L> {
    pub fn new(ledger: L, rules: GameRules, offset: FixedOffset) -> Self {
        let selector = WinnerSelector::new(&rules);
        Self {
            ledger,
            rules,
            offset,
            selector,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    /// Settle the round closing at `end_time`, creating it if no ticket ever
    /// referenced it. A round still open at `now` is refused untouched.
    pub fn settle_round<E: Entropy>(
        &self,
        end_time: DateTime<Utc>,
        now: DateTime<Utc>,
        entropy: &mut E,
    ) -> Result<SettlementOutcome, SettleError> {
        if end_time > now {
            return Err(SettleError::RoundOpen(end_time));
        }
        let mut tx = self.ledger.begin()?;

        let round = tx.get_or_create_round(end_time)?;
        if round.processed {
            debug!(round_id = %round.id, %end_time, "round already processed");
            return Ok(SettlementOutcome::AlreadyProcessed(round.id));
        }

        let tickets = tx.list_tickets(round.id)?;
        let summary = StakeSummary::from_tickets(&tickets, &self.rules);

        let offset = self.offset;
        let selection = self.selector.select(&summary, entropy, || {
            let settings = tx.settings()?;
            let (start, end) = RoundCalendar::new(settings.round_minutes, offset).local_day(end_time);
            let day = tx.daily_stats(start, end)?;
            Ok::<_, StoreError>(RtpContext { settings, day })
        })?;

        let spot = selection.spot;
        let unit_payout = self.rules.unit_payout();
        let mut winners = 0;
        let mut owed: BTreeMap<AccountId, Amount> = BTreeMap::new();
        let mut claimed = Vec::new();
        for ticket in tickets.iter().filter(|ticket| ticket.is_live()) {
            let quantity = ticket.wager.quantity(spot);
            if quantity == 0 {
                continue;
            }
            winners += 1;
            if self.rules.payout_policy == PayoutPolicy::OnSettlement && !ticket.claimed {
                let win = unit_payout
                    .checked_mul(quantity as u64)
                    .ok_or_else(|| StoreError::corrupt("ticket.wager", "winning overflows"))?;
                let entry = owed.entry(ticket.account_id).or_default();
                *entry = entry.saturating_add(win);
                claimed.push(ticket.id);
            }
        }

        // Credit in account order so concurrent settlements lock rows consistently
        let mut credited = Amount::ZERO;
        for (account, amount) in &owed {
            tx.update_balance(*account, BalanceChange::Credit(*amount))?;
            credited = credited.saturating_add(*amount);
        }
        for ticket in claimed {
            tx.set_ticket_flag(ticket, TicketFlag::Claimed)?;
        }

        if self.rules.payout_policy == PayoutPolicy::OnSettlement && credited != selection.payout {
            return Err(SettleError::Accounting {
                round: round.id,
                credited,
                expected: selection.payout,
            });
        }

        let outcome = RoundOutcome {
            spot,
            collection: summary.collection,
            payout: selection.payout,
        };
        tx.finalize_round(round.id, &outcome)?;
        tx.commit()?;

        if let SelectionMode::ProfitControl {
            current_rtp,
            allowed_rtp,
        } = selection.mode
        {
            debug!(round_id = %round.id, current_rtp, allowed_rtp, "profit control");
        }
        info!(
            round_id = %round.id,
            %end_time,
            spot = self.rules.labels.label(spot),
            collection = %summary.collection,
            payout = %selection.payout,
            mode = selection.mode.as_str(),
            live_tickets = summary.live_tickets,
            cancelled_tickets = summary.cancelled_tickets,
            winners,
            "round settled"
        );

        Ok(SettlementOutcome::Settled(RoundReport {
            round_id: round.id,
            end_time,
            spot,
            collection: summary.collection,
            payout: selection.payout,
            mode: selection.mode,
            winners,
            credited,
        }))
    }

    /// Settle the round that closed at or before `now`, after first retrying
    /// every older round still pending (oldest first).
    ///
    /// A failing round is logged and left pending; the sweep moves on.
    pub fn settle_due<E: Entropy>(
        &self,
        now: DateTime<Utc>,
        entropy: &mut E,
    ) -> Result<Sweep, SettleError> {
        let (latest, stale) = {
            let mut tx = self.ledger.begin()?;
            let settings = tx.settings()?;
            let latest = RoundCalendar::new(settings.round_minutes, self.offset).last_boundary(now);
            let stale = tx.pending_rounds_before(latest)?;
            (latest, stale)
        };
        if !stale.is_empty() {
            warn!(count = stale.len(), "settling stale pending rounds");
        }

        let mut sweep = Sweep::default();
        for end_time in stale.into_iter().chain(std::iter::once(latest)) {
            match self.settle_round(end_time, now, entropy) {
                Ok(outcome) => sweep.outcomes.push(outcome),
                Err(err) => {
                    warn!(%end_time, ?err, "round settlement failed");
                    sweep.failed.push((end_time, err));
                }
            }
        }
        Ok(sweep)
    }
}
