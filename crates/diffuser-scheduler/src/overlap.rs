//! Conflict detection between schedule rules.
//!
//! Two rules conflict when they share an eligible weekday and their windows
//! share a minute. Windows are compared as minute intervals on a 48-hour
//! line: an overnight window `[s, e)` becomes `[s, e + 1440)`, and each pair
//! is tested as-is and with either side shifted one day later.

use std::collections::HashSet;
use std::ops::Range;

use chrono::{NaiveTime, Timelike, Weekday};

use diffuser_core::error::Result;
use diffuser_core::types::{RecurrencePattern, RuleDraft, ScheduleRule, format_hhmm, parse_hhmm};

const MINUTES_PER_DAY: u32 = 24 * 60;

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Weekdays on which `pattern` is eligible.
pub fn active_days_of(pattern: RecurrencePattern) -> HashSet<Weekday> {
    WEEK.into_iter()
        .filter(|day| crate::recurrence::applies_today(pattern, *day))
        .collect()
}

pub fn days_overlap(a: RecurrencePattern, b: RecurrencePattern) -> bool {
    !active_days_of(a).is_disjoint(&active_days_of(b))
}

fn minute_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

/// Occupied minutes of a window, unrolled past midnight when `end <= start`.
fn unrolled(start: NaiveTime, end: NaiveTime) -> Range<u32> {
    let s = minute_of_day(start);
    let e = minute_of_day(end);
    if e <= s { s..e + MINUTES_PER_DAY } else { s..e }
}

fn intersects(a: &Range<u32>, b: &Range<u32>) -> bool {
    a.start < b.end && b.start < a.end
}

fn shifted(r: &Range<u32>) -> Range<u32> {
    r.start + MINUTES_PER_DAY..r.end + MINUTES_PER_DAY
}

/// Do two time-of-day windows share at least one minute? Symmetric.
pub fn time_ranges_overlap(s1: NaiveTime, e1: NaiveTime, s2: NaiveTime, e2: NaiveTime) -> bool {
    let a = unrolled(s1, e1);
    let b = unrolled(s2, e2);
    intersects(&a, &b) || intersects(&a, &shifted(&b)) || intersects(&shifted(&a), &b)
}

/// Text form of [`time_ranges_overlap`]. Unparseable input counts as overlap.
pub fn time_ranges_overlap_str(s1: &str, e1: &str, s2: &str, e2: &str) -> bool {
    match (parse_hhmm(s1), parse_hhmm(e1), parse_hhmm(s2), parse_hhmm(e2)) {
        (Ok(s1), Ok(e1), Ok(s2), Ok(e2)) => time_ranges_overlap(s1, e1, s2, e2),
        _ => {
            tracing::warn!("⚠️ Unparseable window ({s1}-{e1} vs {s2}-{e2}), assuming overlap");
            true
        }
    }
}

/// Every enabled rule in `existing` (other than `exclude_id`) that conflicts
/// with `candidate`.
pub fn find_conflicts(
    candidate: &ScheduleRule,
    existing: &[ScheduleRule],
    exclude_id: Option<u64>,
) -> Vec<ScheduleRule> {
    existing
        .iter()
        .filter(|rule| rule.enabled() && Some(rule.id()) != exclude_id)
        .filter(|rule| days_overlap(candidate.recurrence(), rule.recurrence()))
        .filter(|rule| {
            time_ranges_overlap(
                candidate.start_time(),
                candidate.end_time(),
                rule.start_time(),
                rule.end_time(),
            )
        })
        .cloned()
        .collect()
}

/// Dry-run check for a rule that has not been validated yet.
///
/// Only the window and recurrence are inspected. An unknown recurrence is a
/// `MalformedRule`; unparseable times conflict with every day-sharing rule.
pub fn find_conflicts_for_draft(
    draft: &RuleDraft,
    existing: &[ScheduleRule],
    exclude_id: Option<u64>,
) -> Result<Vec<ScheduleRule>> {
    let recurrence: RecurrencePattern = draft.recurrence.parse()?;
    Ok(existing
        .iter()
        .filter(|rule| rule.enabled() && Some(rule.id()) != exclude_id)
        .filter(|rule| days_overlap(recurrence, rule.recurrence()))
        .filter(|rule| {
            time_ranges_overlap_str(
                &draft.start_time,
                &draft.end_time,
                &format_hhmm(rule.start_time()),
                &format_hhmm(rule.end_time()),
            )
        })
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use diffuser_core::error::DiffuserError;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn rule(id: u64, start: &str, end: &str, recurrence: &str) -> ScheduleRule {
        let mut draft = RuleDraft::new(start, end, "red", recurrence);
        draft.id = Some(id);
        draft.validate().unwrap()
    }

    #[test]
    fn test_active_days() {
        assert_eq!(active_days_of(RecurrencePattern::Daily).len(), 7);
        assert_eq!(active_days_of(RecurrencePattern::Weekdays).len(), 5);
        assert_eq!(
            active_days_of(RecurrencePattern::Weekends),
            HashSet::from([Weekday::Sat, Weekday::Sun])
        );
        assert_eq!(
            active_days_of(RecurrencePattern::SpecificDay(Weekday::Tue)),
            HashSet::from([Weekday::Tue])
        );
    }

    #[test]
    fn test_days_overlap() {
        assert!(days_overlap(RecurrencePattern::Daily, RecurrencePattern::Weekends));
        assert!(!days_overlap(RecurrencePattern::Weekdays, RecurrencePattern::Weekends));
        assert!(days_overlap(
            RecurrencePattern::Weekdays,
            RecurrencePattern::SpecificDay(Weekday::Mon)
        ));
        assert!(!days_overlap(
            RecurrencePattern::SpecificDay(Weekday::Mon),
            RecurrencePattern::SpecificDay(Weekday::Tue)
        ));
    }

    #[test]
    fn test_same_day_ranges() {
        assert!(time_ranges_overlap(hm(9, 0), hm(10, 0), hm(9, 30), hm(10, 30)));
        assert!(!time_ranges_overlap(hm(9, 0), hm(10, 0), hm(10, 0), hm(11, 0)));
        assert!(time_ranges_overlap(hm(9, 0), hm(12, 0), hm(10, 0), hm(11, 0)));
    }

    #[test]
    fn test_overnight_ranges() {
        // 22:00-23:00 vs 23:30-00:30
        assert!(!time_ranges_overlap(hm(22, 0), hm(23, 0), hm(23, 30), hm(0, 30)));
        // 23:00-01:00 vs 00:30-02:00
        assert!(time_ranges_overlap(hm(23, 0), hm(1, 0), hm(0, 30), hm(2, 0)));
        // 23:00-01:00 vs 01:00-02:00
        assert!(!time_ranges_overlap(hm(23, 0), hm(1, 0), hm(1, 0), hm(2, 0)));
        // two overnight windows
        assert!(time_ranges_overlap(hm(22, 0), hm(2, 0), hm(23, 0), hm(3, 0)));
        assert!(time_ranges_overlap(hm(22, 0), hm(1, 0), hm(0, 0), hm(0, 30)));
    }

    #[test]
    fn test_overlap_is_symmetric() {
        let times = [hm(0, 0), hm(0, 30), hm(9, 0), hm(10, 0), hm(22, 0), hm(23, 30)];
        for &s1 in &times {
            for &e1 in &times {
                for &s2 in &times {
                    for &e2 in &times {
                        assert_eq!(
                            time_ranges_overlap(s1, e1, s2, e2),
                            time_ranges_overlap(s2, e2, s1, e1),
                            "{s1}-{e1} vs {s2}-{e2}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_unparseable_assumes_overlap() {
        assert!(time_ranges_overlap_str("9:00", "bogus", "18:00", "19:00"));
        assert!(!time_ranges_overlap_str("9:00", "10:00", "18:00", "19:00"));
    }

    #[test]
    fn test_find_conflicts_reports_all() {
        let candidate = rule(1, "09:00", "10:00", "daily");
        let existing = vec![
            candidate.clone(),
            rule(2, "09:30", "10:30", "daily"),
            rule(3, "08:00", "09:15", "weekdays"),
            rule(4, "09:30", "10:30", "daily").with_enabled(false),
            rule(5, "12:00", "13:00", "daily"),
        ];
        let ids: Vec<u64> = find_conflicts(&candidate, &existing, Some(1))
            .iter()
            .map(|r| r.id())
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_find_conflicts_respects_days() {
        let candidate = rule(1, "09:00", "10:00", "saturday");
        let existing = vec![rule(2, "09:00", "10:00", "weekdays")];
        assert!(find_conflicts(&candidate, &existing, None).is_empty());
    }

    #[test]
    fn test_draft_check() {
        let existing = vec![rule(7, "22:00", "23:00", "daily")];

        let ok = RuleDraft::new("23:30", "0:30", "blue", "daily");
        assert!(find_conflicts_for_draft(&ok, &existing, None).unwrap().is_empty());

        let bad_time = RuleDraft::new("23:30", "later", "blue", "daily");
        assert_eq!(find_conflicts_for_draft(&bad_time, &existing, None).unwrap().len(), 1);

        let bad_recurrence = RuleDraft::new("23:30", "0:30", "blue", "fortnightly");
        assert!(matches!(
            find_conflicts_for_draft(&bad_recurrence, &existing, None),
            Err(DiffuserError::MalformedRule(_))
        ));

        let editing = RuleDraft::new("22:30", "23:30", "red", "daily");
        assert!(find_conflicts_for_draft(&editing, &existing, Some(7)).unwrap().is_empty());
    }
}
