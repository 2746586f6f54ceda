//! "What runs next" lookup for status displays.

use chrono::{Datelike, Days, NaiveDateTime};
use diffuser_core::types::ScheduleRule;

use crate::recurrence::applies_today;

/// When does `rule` next start strictly after `now`? Looks up to a week
/// ahead so weekly rules are found too.
pub fn next_start(rule: &ScheduleRule, now: NaiveDateTime) -> Option<NaiveDateTime> {
    (0..=7u64).find_map(|offset| {
        let date = now.date().checked_add_days(Days::new(offset))?;
        let start = date.and_time(rule.start_time());
        (start > now && applies_today(rule.recurrence(), date.weekday())).then_some(start)
    })
}

/// The enabled rule whose next start is soonest after `now`. Ties go to the
/// rule listed first.
pub fn next_rule(rules: &[ScheduleRule], now: NaiveDateTime) -> Option<(ScheduleRule, NaiveDateTime)> {
    let mut best: Option<(&ScheduleRule, NaiveDateTime)> = None;
    for rule in rules.iter().filter(|r| r.enabled()) {
        let Some(start) = next_start(rule, now) else {
            continue;
        };
        if best.is_none_or(|(_, at)| start < at) {
            best = Some((rule, start));
        }
    }
    best.map(|(rule, at)| (rule.clone(), at))
}
