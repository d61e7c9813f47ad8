//! Round calendar: boundary arithmetic for fixed-duration rounds.
//!
//! Rounds close on wall-clock boundaries in the operator's local time (every
//! `round_minutes` starting at local midnight). Because `round_minutes` divides a
//! day, aligning to the Unix epoch in local time is the same as aligning to
//! local midnight, so all boundary math reduces to integer seconds.
//!
//! Nothing here reads the clock; callers pass `now`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tenspot_execution::round_clock::RoundCalendar;
//!
//! let calendar = RoundCalendar::new(10, offset);
//! let closing = calendar.open_round_end(now);    // round currently taking stakes
//! let closed = calendar.last_boundary(now);      // round that just closed
//! let wake = calendar.next_settlement(now, delay);
//! ```

use chrono::{DateTime, Duration, FixedOffset, Utc};

const SECS_PER_DAY: i64 = 86_400;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundCalendar {
    round_secs: i64,
    offset: FixedOffset,
}

impl RoundCalendar {
    /// `round_minutes` must divide 1440; callers validate via `GameSettings::validate`.
    pub fn new(round_minutes: u32, offset: FixedOffset) -> Self {
        Self {
            round_secs: (round_minutes.max(1) as i64) * 60,
            offset,
        }
    }

    pub fn round_length(&self) -> Duration {
        Duration::seconds(self.round_secs)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Latest round boundary at or before `now`.
    pub fn last_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.floor(now, self.round_secs)
    }

    /// End of the round currently open for stakes.
    pub fn open_round_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.last_boundary(now) + self.round_length()
    }

    pub fn is_boundary(&self, instant: DateTime<Utc>) -> bool {
        self.last_boundary(instant) == instant
    }

    /// Next instant strictly after `now` at which settlement should fire
    /// (a boundary plus `delay`).
    pub fn next_settlement(&self, now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
        self.last_boundary(now - delay) + self.round_length() + delay
    }

    /// UTC bounds `[start, end)` of the operator-local calendar day holding `instant`.
    pub fn local_day(&self, instant: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.floor(instant, SECS_PER_DAY);
        (start, start + Duration::seconds(SECS_PER_DAY))
    }

    fn floor(&self, instant: DateTime<Utc>, step: i64) -> DateTime<Utc> {
        let shift = self.offset.local_minus_utc() as i64;
        let local = instant.timestamp() + shift;
        let floored = local - local.rem_euclid(step);
        DateTime::from_timestamp(floored - shift, 0).unwrap_or(instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap()
    }

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_last_boundary_in_local_time() {
        let calendar = RoundCalendar::new(10, ist());
        // 14:37:12 IST falls in the round closing at 14:40 IST
        let now = at("2026-03-01T14:37:12+05:30");
        assert_eq!(calendar.last_boundary(now), at("2026-03-01T14:30:00+05:30"));
        assert_eq!(calendar.open_round_end(now), at("2026-03-01T14:40:00+05:30"));
    }

    #[test]
    fn test_boundary_is_its_own_floor() {
        let calendar = RoundCalendar::new(10, ist());
        let boundary = at("2026-03-01T14:40:00+05:30");
        assert!(calendar.is_boundary(boundary));
        assert!(!calendar.is_boundary(boundary + Duration::seconds(1)));
        assert_eq!(calendar.last_boundary(boundary), boundary);
    }

    #[test]
    fn test_hour_long_rounds_align_to_local_hours() {
        // A half-hour offset must not shift hourly rounds onto UTC hours
        let calendar = RoundCalendar::new(60, ist());
        let now = at("2026-03-01T09:59:59+05:30");
        assert_eq!(calendar.last_boundary(now), at("2026-03-01T09:00:00+05:30"));
    }

    #[test]
    fn test_next_settlement_applies_delay() {
        let calendar = RoundCalendar::new(10, ist());
        let delay = Duration::seconds(5);

        let now = at("2026-03-01T14:37:12+05:30");
        assert_eq!(
            calendar.next_settlement(now, delay),
            at("2026-03-01T14:40:05+05:30")
        );

        // Inside the delay window the pending boundary has not fired yet
        let now = at("2026-03-01T14:40:02+05:30");
        assert_eq!(
            calendar.next_settlement(now, delay),
            at("2026-03-01T14:40:05+05:30")
        );

        // Exactly at the firing instant the next one is a full round later
        let now = at("2026-03-01T14:40:05+05:30");
        assert_eq!(
            calendar.next_settlement(now, delay),
            at("2026-03-01T14:50:05+05:30")
        );
    }

    #[test]
    fn test_local_day_bounds() {
        let calendar = RoundCalendar::new(10, ist());
        // 01:00 IST on the 2nd is still 19:30 UTC on the 1st
        let (start, end) = calendar.local_day(at("2026-03-02T01:00:00+05:30"));
        assert_eq!(start, at("2026-03-02T00:00:00+05:30"));
        assert_eq!(end, at("2026-03-03T00:00:00+05:30"));
    }
}
