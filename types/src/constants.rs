/// Number of bettable spots per round.
pub const SPOT_COUNT: usize = 10;

/// Default spot labels, in spot order.
pub const DEFAULT_SPOT_LABELS: [&str; SPOT_COUNT] =
    ["A0", "B1", "C2", "D3", "E4", "F5", "G6", "H7", "I8", "J9"];

/// Minor units per major currency unit (amounts are stored in 1/100ths).
pub const MINOR_PER_MAJOR: u64 = 100;

/// Price of one wager unit on one spot (10.00).
pub const DEFAULT_UNIT_PRICE: u64 = 10 * MINOR_PER_MAJOR;

/// A winning unit returns this many unit prices (10.00 staked pays 90.00).
pub const DEFAULT_PAYOUT_MULTIPLIER: u64 = 9;

/// Retailer commission retained on every sale, in basis points (9%).
pub const DEFAULT_COMMISSION_BPS: u64 = 900;

/// Rounds collecting at most this much are settled in engagement mode (200.00).
pub const DEFAULT_ENGAGEMENT_THRESHOLD: u64 = 200 * MINOR_PER_MAJOR;

/// Chance, in percent, that an engagement round pays a staked spot.
pub const DEFAULT_WIN_PROBABILITY_PERCENT: u32 = 60;

/// Proportional gain applied to the daily RTP gap.
pub const DEFAULT_CONTROL_FACTOR: f64 = 0.3;

/// Round duration in minutes.
pub const DEFAULT_ROUND_MINUTES: u32 = 10;

/// Target daily return-to-player, in percent.
pub const DEFAULT_TARGET_RTP: u32 = 90;
/// Lowest RTP a single profit-controlled round may aim for.
pub const DEFAULT_MIN_ROUND_RTP: u32 = 80;
/// Highest RTP a single profit-controlled round may aim for.
pub const DEFAULT_MAX_ROUND_RTP: u32 = 100;

/// Tickets can no longer be cancelled this close to the round's end.
pub const DEFAULT_CANCEL_MARGIN_SECS: u64 = 60;

/// Settlement runs this long after a round boundary so late stakes land first.
pub const DEFAULT_SETTLE_DELAY_SECS: u64 = 5;

/// Local hours (inclusive) during which tickets may be sold.
pub const DEFAULT_OPEN_HOUR: u32 = 6;
pub const DEFAULT_CLOSE_HOUR: u32 = 23;

/// Operator's local offset from UTC (IST, +05:30).
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 5 * 60 + 30;

/// Number of results served to public boards by default.
pub const DEFAULT_PUBLIC_RESULTS: usize = 7;
