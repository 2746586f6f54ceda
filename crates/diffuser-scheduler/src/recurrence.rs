//! Day matching and time-window membership.

use chrono::{NaiveTime, Weekday};
use diffuser_core::types::RecurrencePattern;

/// Does a rule with `pattern` apply on `today`?
pub fn applies_today(pattern: RecurrencePattern, today: Weekday) -> bool {
    match pattern {
        RecurrencePattern::Daily => true,
        RecurrencePattern::Weekdays => !is_weekend(today),
        RecurrencePattern::Weekends => is_weekend(today),
        RecurrencePattern::SpecificDay(day) => day == today,
    }
}

fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

/// Is `now` inside `[start, end)`? A window with `start > end` wraps past
/// midnight. The end minute itself never belongs to the window.
pub fn in_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        start <= now && now < end
    } else {
        now >= start || now < end
    }
}
