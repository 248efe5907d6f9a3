use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use serde::Serialize;

/// Midnight of the calendar day containing `now`, as seen from `offset`,
/// expressed in UTC.
pub fn start_of_day(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_midnight = now
        .with_timezone(&offset)
        .date_naive()
        .and_time(NaiveTime::MIN);

    match offset.from_local_datetime(&local_midnight).single() {
        Some(t) => t.with_timezone(&Utc),
        // fixed offsets never produce ambiguous local times
        None => now - Duration::hours(24),
    }
}

/// Parse `+9`, `-5`, `0` style hour offsets.
pub fn offset_from_hours(hours: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(hours.checked_mul(3600)?)
}

/// How much of today's send allowance is already used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyBudget {
    pub sent_today: i64,
    pub daily_limit: i64,
}

impl DailyBudget {
    pub fn exhausted(&self) -> bool {
        self.sent_today >= self.daily_limit
    }

    pub fn remaining(&self) -> i64 {
        (self.daily_limit - self.sent_today).max(0)
    }
}
