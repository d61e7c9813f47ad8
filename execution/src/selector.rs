//! Winner selection.
//!
//! Given a round's [`StakeSummary`], pick the winning spot. Three paths:
//!
//! 1. **Empty** - nothing collected: any spot, chosen uniformly, pays nothing.
//! 2. **Engagement** - collection at or below the engagement threshold. With
//!    probability `win_probability_percent` a staked spot wins (uniformly among
//!    spots with liability); otherwise an unstaked spot wins, or, when every
//!    spot is staked, the cheapest one.
//! 3. **Profit control** - larger rounds steer the day's realized RTP toward
//!    the operator target with a proportional controller:
//!
//! ```text
//! current = day_payout / day_sales * 100        (target when day_sales == 0)
//! allowed = clamp(target + (target - current) * control_factor, min, max)
//! winner  = argmin |liability[spot] / collection * 100 - allowed|
//! ```
//!
//! Spots are scanned in a shuffled order so ties do not favor low positions.
//! The settings and day statistics are only needed for profit control and are
//! loaded lazily through the `context` callback.

use tenspot_types::{Amount, DailyStats, GameSettings, Spot};

use crate::{Entropy, GameRules, StakeSummary};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SelectionMode {
    Empty,
    Engagement { luck: u32, paid: bool },
    ProfitControl { current_rtp: f64, allowed_rtp: f64 },
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionMode::Empty => "empty",
            SelectionMode::Engagement { .. } => "engagement",
            SelectionMode::ProfitControl { .. } => "profit_control",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Selection {
    pub spot: Spot,
    pub payout: Amount,
    pub mode: SelectionMode,
}

/// Inputs for profit-controlled rounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtpContext {
    pub settings: GameSettings,
    pub day: DailyStats,
}

impl RtpContext {
    /// Realized RTP so far today, falling back to the target before any sales.
    pub fn current_rtp(&self) -> f64 {
        if self.day.sales.is_zero() {
            return self.settings.target_rtp as f64;
        }
        self.day.payout.percent_of(self.day.sales)
    }

    /// RTP this round should aim for.
    pub fn allowed_rtp(&self, control_factor: f64) -> f64 {
        let target = self.settings.target_rtp as f64;
        let gap = target - self.current_rtp();
        let allowed = target + gap * control_factor;
        // min-then-max: inverted bounds resolve to min_round_rtp instead of panicking
        allowed
            .min(self.settings.max_round_rtp as f64)
            .max(self.settings.min_round_rtp as f64)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WinnerSelector {
    engagement_threshold: Amount,
    win_probability_percent: u32,
    control_factor: f64,
}

impl WinnerSelector {
    pub fn new(rules: &GameRules) -> Self {
        Self {
            engagement_threshold: rules.engagement_threshold,
            win_probability_percent: rules.win_probability_percent,
            control_factor: rules.control_factor,
        }
    }

    pub fn select<E, F, Err>(
        &self,
        summary: &StakeSummary,
        entropy: &mut E,
        context: F,
    ) -> Result<Selection, Err>
    where
        E: Entropy,
        F: FnOnce() -> Result<RtpContext, Err>,
    {
        if summary.collection.is_zero() {
            return Ok(self.empty(entropy));
        }
        if summary.collection <= self.engagement_threshold {
            return Ok(self.engagement(summary, entropy));
        }
        let context = context()?;
        Ok(self.profit_control(summary, &context, entropy))
    }

    pub fn empty<E: Entropy>(&self, entropy: &mut E) -> Selection {
        Selection {
            spot: entropy.pick(&Spot::ALL),
            payout: Amount::ZERO,
            mode: SelectionMode::Empty,
        }
    }

    pub fn engagement<E: Entropy>(&self, summary: &StakeSummary, entropy: &mut E) -> Selection {
        let exposed = summary.exposed_spots();
        let free = summary.free_spots();

        let luck = entropy.below(100);
        let paid = luck < self.win_probability_percent && !exposed.is_empty();
        let spot = if paid {
            entropy.pick(&exposed)
        } else if !free.is_empty() {
            entropy.pick(&free)
        } else {
            cheapest_spot(summary, entropy)
        };

        Selection {
            spot,
            payout: summary.liability(spot),
            mode: SelectionMode::Engagement { luck, paid },
        }
    }

    pub fn profit_control<E: Entropy>(
        &self,
        summary: &StakeSummary,
        context: &RtpContext,
        entropy: &mut E,
    ) -> Selection {
        let current_rtp = context.current_rtp();
        let allowed_rtp = context.allowed_rtp(self.control_factor);

        let mut order = Spot::ALL;
        entropy.shuffle(&mut order);

        let mut best = order[0];
        let mut best_diff = f64::INFINITY;
        for spot in order {
            let potential = summary.liability(spot).percent_of(summary.collection);
            let diff = (potential - allowed_rtp).abs();
            if diff < best_diff {
                best_diff = diff;
                best = spot;
            }
        }

        Selection {
            spot: best,
            payout: summary.liability(best),
            mode: SelectionMode::ProfitControl {
                current_rtp,
                allowed_rtp,
            },
        }
    }
}

/// Minimum-liability spot, ties broken uniformly.
fn cheapest_spot<E: Entropy>(summary: &StakeSummary, entropy: &mut E) -> Spot {
    let floor = Spot::ALL
        .into_iter()
        .map(|spot| summary.liability(spot))
        .min()
        .unwrap_or(Amount::ZERO);
    let cheapest: Vec<Spot> = Spot::ALL
        .into_iter()
        .filter(|spot| summary.liability(*spot) == floor)
        .collect();
    entropy.pick(&cheapest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ScriptedEntropy;
    use std::convert::Infallible;
    use tenspot_types::SPOT_COUNT;

    fn summary(collection: u64, liability: &[(usize, u64)]) -> StakeSummary {
        let mut summary = StakeSummary {
            collection: Amount::from_major(collection),
            ..Default::default()
        };
        for (idx, amount) in liability {
            summary.liability[*idx] = Amount::from_major(*amount);
        }
        summary
    }

    fn context(target: u32, sales: u64, payout: u64) -> RtpContext {
        RtpContext {
            settings: GameSettings {
                target_rtp: target,
                ..GameSettings::default()
            },
            day: DailyStats {
                sales: Amount::from_major(sales),
                payout: Amount::from_major(payout),
            },
        }
    }

    fn no_context() -> Result<RtpContext, Infallible> {
        panic!("context must not be loaded for this round")
    }

    #[test]
    fn test_empty_round_pays_nothing() {
        let selector = WinnerSelector::new(&GameRules::default());
        let mut entropy = ScriptedEntropy::new([7]);
        let selection = selector
            .select(&StakeSummary::default(), &mut entropy, no_context)
            .unwrap();
        assert_eq!(selection.spot, Spot::ALL[7]);
        assert_eq!(selection.payout, Amount::ZERO);
        assert_eq!(selection.mode, SelectionMode::Empty);
    }

    #[test]
    fn test_engagement_forced_win_picks_staked_spot() {
        let selector = WinnerSelector::new(&GameRules::default());
        // collection 150 <= 200; A0 carries 450 of liability
        let stakes = summary(150, &[(0, 450)]);
        // luck 0 < 60, then index 0 of the single exposed spot
        let mut entropy = ScriptedEntropy::new([0, 0]);
        let selection = selector.select(&stakes, &mut entropy, no_context).unwrap();
        assert_eq!(selection.spot, Spot::ALL[0]);
        assert_eq!(selection.payout, Amount::from_major(450));
        assert_eq!(
            selection.mode,
            SelectionMode::Engagement { luck: 0, paid: true }
        );
    }

    #[test]
    fn test_engagement_forced_loss_avoids_staked_spot() {
        let selector = WinnerSelector::new(&GameRules::default());
        let stakes = summary(150, &[(0, 450)]);
        for pick in 0..(SPOT_COUNT as u32 - 1) {
            // luck 99 >= 60 forces the loss branch
            let mut entropy = ScriptedEntropy::new([99, pick]);
            let selection = selector.select(&stakes, &mut entropy, no_context).unwrap();
            assert_ne!(selection.spot, Spot::ALL[0]);
            assert_eq!(selection.payout, Amount::ZERO);
        }
    }

    #[test]
    fn test_engagement_all_spots_staked_falls_back_to_cheapest() {
        let selector = WinnerSelector::new(&GameRules::default());
        let liability: Vec<(usize, u64)> = (0..SPOT_COUNT)
            .map(|idx| (idx, if idx == 6 { 90 } else { 180 }))
            .collect();
        let stakes = summary(190, &liability);
        let mut entropy = ScriptedEntropy::new([99, 0]);
        let selection = selector.select(&stakes, &mut entropy, no_context).unwrap();
        assert_eq!(selection.spot, Spot::ALL[6]);
        assert_eq!(selection.payout, Amount::from_major(90));
    }

    #[test]
    fn test_engagement_win_branch_without_stakes_uses_free_spots() {
        // luck would grant a win but no spot is exposed (liability all zero)
        let selector = WinnerSelector::new(&GameRules::default());
        let stakes = summary(10, &[]);
        let mut entropy = ScriptedEntropy::new([0, 3]);
        let selection = selector.engagement(&stakes, &mut entropy);
        assert_eq!(selection.spot, Spot::ALL[3]);
        assert_eq!(
            selection.mode,
            SelectionMode::Engagement { luck: 0, paid: false }
        );
    }

    #[test]
    fn test_profit_control_picks_spot_closest_to_target() {
        let selector = WinnerSelector::new(&GameRules::default());
        // collection 1000: spot RTPs 0, 45, 88, 95, 180 percent
        let stakes = summary(1000, &[(1, 450), (2, 880), (3, 950), (4, 1800)]);
        let mut loaded = false;
        let mut entropy = ScriptedEntropy::repeating(0);
        let selection = selector
            .select(&stakes, &mut entropy, || {
                loaded = true;
                Ok::<_, Infallible>(context(90, 0, 0))
            })
            .unwrap();
        assert!(loaded);
        // |88 - 90| = 2 beats |95 - 90| = 5
        assert_eq!(selection.spot, Spot::ALL[2]);
        assert_eq!(selection.payout, Amount::from_major(880));
        assert_eq!(
            selection.mode,
            SelectionMode::ProfitControl {
                current_rtp: 90.0,
                allowed_rtp: 90.0
            }
        );
    }

    #[test]
    fn test_profit_control_is_independent_of_shuffle_without_ties() {
        let selector = WinnerSelector::new(&GameRules::default());
        let stakes = summary(1000, &[(5, 910), (8, 500)]);
        for seed in 0..20u32 {
            let mut entropy = ScriptedEntropy::repeating(seed);
            let selection =
                selector.profit_control(&stakes, &context(90, 0, 0), &mut entropy);
            assert_eq!(selection.spot, Spot::ALL[5]);
        }
    }

    #[test]
    fn test_controller_compensates_for_generous_day() {
        // Day paid 120% so far: gap -30, allowed 90 - 9 = 81
        let ctx = context(90, 1000, 1200);
        assert_eq!(ctx.current_rtp(), 120.0);
        assert!((ctx.allowed_rtp(0.3) - 81.0).abs() < 1e-9);

        // Day paid 10%: allowed 90 + 24 = 114, clamped to max 100
        let ctx = context(90, 1000, 100);
        assert_eq!(ctx.allowed_rtp(0.3), 100.0);

        // Very generous day clamps to the floor
        let ctx = context(90, 100, 1000);
        assert_eq!(ctx.allowed_rtp(0.3), 80.0);
    }

    #[test]
    fn test_inverted_bounds_do_not_panic() {
        let ctx = RtpContext {
            settings: GameSettings {
                target_rtp: 90,
                min_round_rtp: 95,
                max_round_rtp: 85,
                round_minutes: 10,
            },
            day: DailyStats::default(),
        };
        assert_eq!(ctx.allowed_rtp(0.3), 95.0);
        // Whatever the controller asks for, the result is min_round_rtp
        let far_below = RtpContext {
            settings: GameSettings {
                target_rtp: 10,
                ..ctx.settings
            },
            ..ctx
        };
        assert_eq!(far_below.allowed_rtp(0.3), 95.0);
    }

    #[test]
    fn test_context_error_propagates() {
        let selector = WinnerSelector::new(&GameRules::default());
        let stakes = summary(1000, &[(0, 900)]);
        let mut entropy = ScriptedEntropy::repeating(0);
        let result: Result<Selection, &str> =
            selector.select(&stakes, &mut entropy, || Err("store down"));
        assert_eq!(result, Err("store down"));
    }
}
