//! Stake aggregation for one round.

use tenspot_types::{Amount, Spot, Ticket, SPOT_COUNT};

use crate::GameRules;

/// What a round collected and what each spot would pay if it won.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StakeSummary {
    /// Sum of live (non-cancelled) ticket amounts.
    pub collection: Amount,
    /// Payout owed to live tickets if the spot wins.
    pub liability: [Amount; SPOT_COUNT],
    pub live_tickets: usize,
    pub cancelled_tickets: usize,
}

impl StakeSummary {
    /// Summarize a round's tickets. Cancelled tickets were refunded and count
    /// toward neither collection nor liability.
    pub fn from_tickets<'a, I>(tickets: I, rules: &GameRules) -> Self
    where
        I: IntoIterator<Item = &'a Ticket>,
    {
        let unit_payout = rules.unit_payout().minor();
        let mut summary = StakeSummary::default();
        for ticket in tickets {
            if !ticket.is_live() {
                summary.cancelled_tickets += 1;
                continue;
            }
            summary.live_tickets += 1;
            summary.collection = summary.collection.saturating_add(ticket.total_amount);
            for (spot, quantity) in ticket.wager.staked() {
                let owed = Amount::from_minor(unit_payout.saturating_mul(quantity as u64));
                summary.liability[spot.index()] =
                    summary.liability[spot.index()].saturating_add(owed);
            }
        }
        summary
    }

    pub fn liability(&self, spot: Spot) -> Amount {
        self.liability[spot.index()]
    }

    /// Spots that would pay something, in spot order.
    pub fn exposed_spots(&self) -> Vec<Spot> {
        Spot::ALL
            .into_iter()
            .filter(|spot| !self.liability(*spot).is_zero())
            .collect()
    }

    /// Spots that would pay nothing, in spot order.
    pub fn free_spots(&self) -> Vec<Spot> {
        Spot::ALL
            .into_iter()
            .filter(|spot| self.liability(*spot).is_zero())
            .collect()
    }
}
