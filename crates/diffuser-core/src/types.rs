//! Schedule rule data model: channels, recurrence patterns and rules.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{DiffuserError, Result};

/// Minimum cycle period a rule may request, in seconds.
pub const MIN_CYCLE_TIME: u32 = 5;
/// Minimum HIGH pulse a rule may request, in seconds.
pub const MIN_PULSE_DURATION: u32 = 1;

/// One addressable output of the dispenser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Yellow,
    Green,
    Red,
    Blue,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Yellow, Channel::Green, Channel::Red, Channel::Blue];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Yellow => "yellow",
            Channel::Green => "green",
            Channel::Red => "red",
            Channel::Blue => "blue",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = DiffuserError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yellow" => Ok(Channel::Yellow),
            "green" => Ok(Channel::Green),
            "red" => Ok(Channel::Red),
            "blue" => Ok(Channel::Blue),
            other => Err(DiffuserError::InvalidChannel(format!(
                "'{other}' (must be one of: yellow, green, red, blue)"
            ))),
        }
    }
}

/// Channel → BCM pin number.
pub type ChannelMap = BTreeMap<Channel, u8>;

/// Pin layout of the reference dispenser board.
pub fn default_channel_map() -> ChannelMap {
    BTreeMap::from([
        (Channel::Yellow, 18),
        (Channel::Green, 19),
        (Channel::Red, 20),
        (Channel::Blue, 21),
    ])
}

/// Which calendar days a rule is eligible on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RecurrencePattern {
    Daily,
    Weekdays,
    Weekends,
    SpecificDay(Weekday),
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecurrencePattern::Daily => f.write_str("daily"),
            RecurrencePattern::Weekdays => f.write_str("weekdays"),
            RecurrencePattern::Weekends => f.write_str("weekends"),
            RecurrencePattern::SpecificDay(day) => f.write_str(weekday_name(*day)),
        }
    }
}

impl FromStr for RecurrencePattern {
    type Err = DiffuserError;

    fn from_str(s: &str) -> Result<Self> {
        let pattern = match s.trim().to_ascii_lowercase().as_str() {
            "daily" => RecurrencePattern::Daily,
            "weekdays" => RecurrencePattern::Weekdays,
            "weekends" => RecurrencePattern::Weekends,
            "monday" => RecurrencePattern::SpecificDay(Weekday::Mon),
            "tuesday" => RecurrencePattern::SpecificDay(Weekday::Tue),
            "wednesday" => RecurrencePattern::SpecificDay(Weekday::Wed),
            "thursday" => RecurrencePattern::SpecificDay(Weekday::Thu),
            "friday" => RecurrencePattern::SpecificDay(Weekday::Fri),
            "saturday" => RecurrencePattern::SpecificDay(Weekday::Sat),
            "sunday" => RecurrencePattern::SpecificDay(Weekday::Sun),
            other => {
                return Err(DiffuserError::MalformedRule(format!(
                    "invalid recurrence '{other}' (must be daily, weekdays, weekends or a day name)"
                )));
            }
        };
        Ok(pattern)
    }
}

impl TryFrom<String> for RecurrencePattern {
    type Error = DiffuserError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RecurrencePattern> for String {
    fn from(pattern: RecurrencePattern) -> Self {
        pattern.to_string()
    }
}

/// Parse a time-of-day in `HH:MM` or `H:MM` form.
pub fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    let malformed = || DiffuserError::MalformedRule(format!("invalid time '{s}' (use HH:MM or H:MM)"));
    let (hour, minute) = s.trim().split_once(':').ok_or_else(malformed)?;
    let digits = |part: &str| !part.is_empty() && part.len() <= 2 && part.bytes().all(|b| b.is_ascii_digit());
    if !digits(hour) || !digits(minute) {
        return Err(malformed());
    }
    let hour: u32 = hour.parse().map_err(|_| malformed())?;
    let minute: u32 = minute.parse().map_err(|_| malformed())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(malformed)
}

/// Format a time-of-day as `HH:MM`.
pub fn format_hhmm(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

/// A validated, recurring time-windowed rule.
///
/// Only constructible through [`ScheduleRule::new`] or by validating a
/// [`RuleDraft`], so `start_time != end_time` and
/// `pulse_duration < cycle_time` always hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RuleDraft", into = "RuleDraft")]
pub struct ScheduleRule {
    id: u64,
    start_time: NaiveTime,
    end_time: NaiveTime,
    channel: Channel,
    cycle_time: u32,
    pulse_duration: u32,
    recurrence: RecurrencePattern,
    enabled: bool,
}

impl ScheduleRule {
    /// Build an enabled rule. Times are truncated to the minute.
    pub fn new(
        id: u64,
        start_time: NaiveTime,
        end_time: NaiveTime,
        channel: Channel,
        cycle_time: u32,
        pulse_duration: u32,
        recurrence: RecurrencePattern,
    ) -> Result<Self> {
        let start_time = truncate_to_minute(start_time);
        let end_time = truncate_to_minute(end_time);

        if start_time == end_time {
            return Err(DiffuserError::MalformedRule(
                "start time and end time cannot be the same".into(),
            ));
        }
        if cycle_time < MIN_CYCLE_TIME {
            return Err(DiffuserError::MalformedRule(format!(
                "cycle time must be >= {MIN_CYCLE_TIME} seconds (got {cycle_time})"
            )));
        }
        if pulse_duration < MIN_PULSE_DURATION {
            return Err(DiffuserError::MalformedRule(format!(
                "pulse duration must be >= {MIN_PULSE_DURATION} second (got {pulse_duration})"
            )));
        }
        if pulse_duration >= cycle_time {
            return Err(DiffuserError::MalformedRule(format!(
                "pulse duration ({pulse_duration}s) must be less than cycle time ({cycle_time}s)"
            )));
        }

        Ok(Self {
            id,
            start_time,
            end_time,
            channel,
            cycle_time,
            pulse_duration,
            recurrence,
            enabled: true,
        })
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn start_time(&self) -> NaiveTime {
        self.start_time
    }

    pub fn end_time(&self) -> NaiveTime {
        self.end_time
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn cycle_time(&self) -> u32 {
        self.cycle_time
    }

    pub fn pulse_duration(&self) -> u32 {
        self.pulse_duration
    }

    pub fn recurrence(&self) -> RecurrencePattern {
        self.recurrence
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// The window wraps past midnight.
    pub fn is_overnight(&self) -> bool {
        self.end_time <= self.start_time
    }

    /// `HH:MM-HH:MM`, for logs and conflict reports.
    pub fn window_label(&self) -> String {
        format!("{}-{}", format_hhmm(self.start_time), format_hhmm(self.end_time))
    }
}

fn truncate_to_minute(t: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}

fn default_cycle_time() -> i64 { 60 }
fn default_pulse_duration() -> i64 { 10 }
fn default_recurrence() -> String { "daily".into() }
fn bool_true() -> bool { true }

/// Unvalidated rule as it arrives from a rule file or an API payload.
///
/// Accepts the legacy field names `formula` (channel) and `duration`
/// (pulse duration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default, alias = "formula")]
    pub channel: String,
    #[serde(default = "default_cycle_time")]
    pub cycle_time: i64,
    #[serde(default = "default_pulse_duration", alias = "duration")]
    pub pulse_duration: i64,
    #[serde(default = "default_recurrence")]
    pub recurrence: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

impl RuleDraft {
    /// A draft for a new window with default timing (60s cycle, 10s pulse).
    pub fn new(start_time: &str, end_time: &str, channel: &str, recurrence: &str) -> Self {
        Self {
            id: None,
            start_time: start_time.into(),
            end_time: end_time.into(),
            channel: channel.into(),
            cycle_time: default_cycle_time(),
            pulse_duration: default_pulse_duration(),
            recurrence: recurrence.into(),
            enabled: true,
        }
    }

    /// Check required fields, normalize times and enforce rule invariants.
    /// A draft without an id validates to id `0` (not yet assigned).
    pub fn validate(self) -> Result<ScheduleRule> {
        for (field, value) in [
            ("start_time", &self.start_time),
            ("end_time", &self.end_time),
            ("channel", &self.channel),
            ("recurrence", &self.recurrence),
        ] {
            if value.trim().is_empty() {
                return Err(DiffuserError::MalformedRule(format!("missing required field: {field}")));
            }
        }

        let start = parse_hhmm(&self.start_time)?;
        let end = parse_hhmm(&self.end_time)?;
        let channel: Channel = self
            .channel
            .parse()
            .map_err(|e: DiffuserError| DiffuserError::MalformedRule(e.to_string()))?;
        let recurrence: RecurrencePattern = self.recurrence.parse()?;

        let cycle_time = u32::try_from(self.cycle_time).map_err(|_| {
            DiffuserError::MalformedRule(format!("cycle time must be >= {MIN_CYCLE_TIME} seconds"))
        })?;
        let pulse_duration = u32::try_from(self.pulse_duration).map_err(|_| {
            DiffuserError::MalformedRule(format!("pulse duration must be >= {MIN_PULSE_DURATION} second"))
        })?;

        Ok(ScheduleRule::new(
            self.id.unwrap_or(0),
            start,
            end,
            channel,
            cycle_time,
            pulse_duration,
            recurrence,
        )?
        .with_enabled(self.enabled))
    }
}

impl TryFrom<RuleDraft> for ScheduleRule {
    type Error = DiffuserError;

    fn try_from(draft: RuleDraft) -> Result<Self> {
        draft.validate()
    }
}

impl From<ScheduleRule> for RuleDraft {
    fn from(rule: ScheduleRule) -> Self {
        Self {
            id: Some(rule.id),
            start_time: format_hhmm(rule.start_time),
            end_time: format_hhmm(rule.end_time),
            channel: rule.channel.to_string(),
            cycle_time: rule.cycle_time as i64,
            pulse_duration: rule.pulse_duration as i64,
            recurrence: rule.recurrence.to_string(),
            enabled: rule.enabled,
        }
    }
}
