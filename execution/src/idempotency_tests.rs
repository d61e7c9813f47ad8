//! Idempotency tests for settlement.
//!
//! These tests verify that settling a round again (retry, overlapping
//! scheduler ticks, a second scheduler instance) is a no-op, and that a
//! settlement that fails partway leaves the round pending for the next sweep.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;
    use tenspot_types::{Amount, Spot, Wager, SPOT_COUNT};

    use crate::mocks::{at, Memory, ScriptedEntropy};
    use crate::{GameRules, Settlement, SettlementOutcome, SystemEntropy};

    fn wager(entries: &[(usize, u32)]) -> Wager {
        let mut quantities = [0; SPOT_COUNT];
        for (idx, qty) in entries {
            quantities[*idx] = *qty;
        }
        Wager::from_quantities(quantities).unwrap()
    }

    #[test]
    fn test_settling_twice_is_noop() {
        let memory = Memory::default();
        let rules = GameRules::default();
        let alice = memory.account("alice", Amount::from_major(100));
        let end = at("2026-03-01T10:00:00+05:30");
        memory.place(alice, end, wager(&[(0, 5)]), &rules);
        let settlement = Settlement::new(&memory, rules, memory.offset());

        let first = settlement
            .settle_round(end, end, &mut ScriptedEntropy::new([0, 0]))
            .unwrap();
        let round_after_first = memory.round_at(end).unwrap();
        let balance_after_first = memory.balance(alice);
        assert_eq!(balance_after_first, Amount::from_major(100 + 450));

        // A different script would pick differently if the guard failed
        let second = settlement
            .settle_round(end, end, &mut ScriptedEntropy::new([99, 3]))
            .unwrap();
        assert_eq!(
            second,
            SettlementOutcome::AlreadyProcessed(first.report().unwrap().round_id)
        );
        assert_eq!(memory.round_at(end).unwrap(), round_after_first);
        assert_eq!(memory.balance(alice), balance_after_first);
    }

    #[test]
    fn test_concurrent_settlements_credit_once() {
        let memory = Arc::new(Memory::default());
        let rules = GameRules::default();
        let alice = memory.account("alice", Amount::ZERO);
        let end = at("2026-03-01T10:00:00+05:30");
        memory.place(alice, end, wager(&[(0, 1), (1, 1)]), &rules);

        let settlement = Arc::new(Settlement::new(memory.clone(), rules, memory.offset()));
        let outcomes: Vec<SettlementOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let settlement = settlement.clone();
                    scope.spawn(move || settlement.settle_round(end, end, &mut SystemEntropy).unwrap())
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        let settled = outcomes
            .iter()
            .filter(|outcome| outcome.report().is_some())
            .count();
        assert_eq!(settled, 1);
        let round = memory.round_at(end).unwrap();
        assert_eq!(memory.balance(alice), round.payout);
    }

    #[test]
    fn test_failed_commit_rolls_back_and_sweep_retries() {
        let memory = Memory::default();
        let rules = GameRules::default();
        let alice = memory.account("alice", Amount::from_major(100));
        let stale = at("2026-03-01T10:00:00+05:30");
        memory.place(alice, stale, wager(&[(3, 2)]), &rules);
        let settlement = Settlement::new(&memory, rules, memory.offset());

        memory.fail_commits(1);
        let err = settlement
            .settle_round(stale, stale, &mut ScriptedEntropy::new([0, 0]))
            .unwrap_err();
        assert!(err.is_transient());
        let round = memory.round_at(stale).unwrap();
        assert!(!round.processed);
        assert_eq!(round.winning_spot, None);
        assert_eq!(memory.balance(alice), Amount::from_major(100));
        assert!(memory.tickets_for(stale).iter().all(|ticket| !ticket.claimed));

        // Two ticks later the sweep picks up the stranded round first
        let now = at("2026-03-01T10:20:05+05:30");
        let sweep = settlement
            .settle_due(now, &mut ScriptedEntropy::new([0, 0, 0]))
            .unwrap();
        let settled: Vec<_> = sweep.settled().map(|report| report.end_time).collect();
        assert_eq!(settled, vec![stale, at("2026-03-01T10:20:00+05:30")]);
        assert!(memory.round_at(stale).unwrap().processed);
        assert_eq!(memory.balance(alice), Amount::from_major(100 + 180));
    }

    #[test]
    fn test_sweep_records_failure_and_leaves_round_pending() {
        let memory = Memory::default();
        let settlement = Settlement::new(&memory, GameRules::default(), memory.offset());
        let now = at("2026-03-01T10:10:05+05:30");

        memory.fail_commits(1);
        let sweep = settlement
            .settle_due(now, &mut ScriptedEntropy::repeating(0))
            .unwrap();
        assert_eq!(sweep.failed.len(), 1);
        assert_eq!(sweep.failed[0].0, at("2026-03-01T10:10:00+05:30"));
        assert!(sweep.outcomes.is_empty());

        let sweep = settlement
            .settle_due(now, &mut ScriptedEntropy::repeating(0))
            .unwrap();
        assert_eq!(sweep.settled().count(), 1);
        assert!(sweep.failed.is_empty());
    }

    #[test]
    fn test_overlapping_sweeps_are_noops() {
        let memory = Memory::default();
        let settlement = Settlement::new(&memory, GameRules::default(), memory.offset());
        let now = at("2026-03-01T10:10:05+05:30");
        let first = settlement
            .settle_due(now, &mut ScriptedEntropy::repeating(2))
            .unwrap();
        let second = settlement
            .settle_due(now + chrono::Duration::seconds(1), &mut ScriptedEntropy::repeating(5))
            .unwrap();
        assert_eq!(first.settled().count(), 1);
        assert_eq!(second.settled().count(), 0);
        assert!(matches!(
            second.outcomes.as_slice(),
            [SettlementOutcome::AlreadyProcessed(_)]
        ));
        let round = memory.round_at(at("2026-03-01T10:10:00+05:30")).unwrap();
        assert_eq!(round.winning_spot, Some(Spot::ALL[2]));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_payout_matches_winning_stakes(
            stakes in prop::collection::vec(
                (prop::array::uniform10(0u32..30), any::<bool>()),
                0..12,
            ),
            script in prop::collection::vec(any::<u32>(), 0..16),
        ) {
            let memory = Memory::default();
            let rules = GameRules::default();
            let end = at("2026-03-01T10:00:00+05:30");
            let mut accounts = Vec::new();
            for (idx, (quantities, cancel)) in stakes.iter().enumerate() {
                let Ok(wager) = Wager::from_quantities(*quantities) else {
                    continue;
                };
                let account = memory.account(&format!("r{idx}"), Amount::ZERO);
                let ticket = memory.place(account, end, wager, &rules);
                if *cancel {
                    memory.cancel_in_place(ticket);
                }
                accounts.push(account);
            }

            let settlement = Settlement::new(&memory, rules.clone(), memory.offset());
            let outcome = settlement
                .settle_round(end, end, &mut ScriptedEntropy::new(script))
                .unwrap();
            let report = outcome.report().unwrap();

            let expected: u64 = memory
                .tickets_for(end)
                .iter()
                .filter(|ticket| !ticket.cancelled)
                .map(|ticket| {
                    ticket.wager.quantity(report.spot) as u64 * rules.unit_payout().minor()
                })
                .sum();
            prop_assert_eq!(report.payout.minor(), expected);
            prop_assert_eq!(report.credited, report.payout);
            let balances: u64 = accounts.iter().map(|id| memory.balance(*id).minor()).sum();
            prop_assert_eq!(balances, expected);

            for ticket in memory.tickets_for(end) {
                prop_assert_eq!(
                    ticket.total_amount,
                    rules.unit_price.checked_mul(ticket.wager.units()).unwrap()
                );
                prop_assert!(!(ticket.cancelled && ticket.claimed));
            }
        }
    }
}
