//! RFC 5545 `dur-value` handling for the task `duration` field.
//!
//! Durations are kept as an absolute number of seconds. Nominal days and
//! weeks are folded into 86 400 / 604 800 seconds because every calculation
//! in the engine happens on UTC instants, never on wall-clock fields.

use crate::error::CoreError;
use chrono::Duration;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskDuration {
    seconds: i64,
}

impl TaskDuration {
    pub fn from_seconds(seconds: i64) -> Self {
        Self { seconds }
    }

    pub fn from_millis(millis: i64) -> Self {
        Self { seconds: millis / 1000 }
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn millis(&self) -> i64 {
        self.seconds.saturating_mul(1000)
    }

    pub fn is_negative(&self) -> bool {
        self.seconds < 0
    }

    /// `None` when the duration exceeds what `chrono` can represent.
    pub fn to_chrono(&self) -> Option<Duration> {
        Duration::try_seconds(self.seconds)
    }
}

impl From<Duration> for TaskDuration {
    fn from(d: Duration) -> Self {
        Self { seconds: d.num_seconds() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Unit {
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

impl Unit {
    fn seconds(self) -> i64 {
        match self {
            Unit::Week => WEEK,
            Unit::Day => DAY,
            Unit::Hour => HOUR,
            Unit::Minute => MINUTE,
            Unit::Second => 1,
        }
    }
}

impl FromStr for TaskDuration {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidDuration(s.to_string());
        let trimmed = s.trim();

        let (negative, rest) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        let rest = rest
            .strip_prefix('P')
            .or_else(|| rest.strip_prefix('p'))
            .ok_or_else(invalid)?;

        let mut total: i64 = 0;
        let mut in_time = false;
        let mut last: Option<Unit> = None;
        let mut digits = String::new();
        let mut components = 0;

        for c in rest.chars() {
            match c.to_ascii_uppercase() {
                d if d.is_ascii_digit() => digits.push(d),
                'T' => {
                    if in_time || !digits.is_empty() {
                        return Err(invalid());
                    }
                    in_time = true;
                }
                u => {
                    let unit = match (u, in_time) {
                        ('W', false) => Unit::Week,
                        ('D', false) => Unit::Day,
                        ('H', true) => Unit::Hour,
                        ('M', true) => Unit::Minute,
                        ('S', true) => Unit::Second,
                        _ => return Err(invalid()),
                    };
                    // Units must appear at most once and in descending order; weeks stand alone.
                    if digits.is_empty() || last.map_or(false, |l| l >= unit) || last == Some(Unit::Week) {
                        return Err(invalid());
                    }
                    let value: i64 = digits.parse().map_err(|_| invalid())?;
                    total = value
                        .checked_mul(unit.seconds())
                        .and_then(|v| total.checked_add(v))
                        .ok_or_else(invalid)?;
                    digits.clear();
                    last = Some(unit);
                    components += 1;
                }
            }
        }

        let dangling_time = in_time && last.map_or(true, |l| l < Unit::Hour);
        if !digits.is_empty() || components == 0 || dangling_time {
            return Err(invalid());
        }
        Duration::try_seconds(total).ok_or_else(invalid)?;

        Ok(Self { seconds: if negative { -total } else { total } })
    }
}

impl fmt::Display for TaskDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.seconds < 0 { "-" } else { "" };
        let mut rest = self.seconds.abs();

        if rest == 0 {
            return write!(f, "PT0S");
        }
        if rest % WEEK == 0 {
            return write!(f, "{}P{}W", sign, rest / WEEK);
        }

        write!(f, "{}P", sign)?;
        let days = rest / DAY;
        rest %= DAY;
        if days > 0 {
            write!(f, "{}D", days)?;
        }
        if rest > 0 {
            write!(f, "T")?;
            let (hours, minutes, seconds) = (rest / HOUR, rest % HOUR / MINUTE, rest % MINUTE);
            if hours > 0 {
                write!(f, "{}H", hours)?;
            }
            if minutes > 0 {
                write!(f, "{}M", minutes)?;
            }
            if seconds > 0 {
                write!(f, "{}S", seconds)?;
            }
        }
        Ok(())
    }
}

impl Serialize for TaskDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
