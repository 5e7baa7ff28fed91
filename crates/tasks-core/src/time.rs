//! Time resolution: turns a task's (start, due, duration, timezone) fields
//! into one canonical shape the rest of the engine works with.

use crate::duration::TaskDuration;
use crate::error::CoreError;
use crate::models::Task;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use std::cell::OnceCell;
use std::str::FromStr;

/// The zone a task's instants are displayed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// No zone: the wall-clock value is shown as-is in the viewer's zone.
    Floating,
    Named(Tz),
}

impl Zone {
    /// Parses an optional IANA zone name. Absence means floating.
    pub fn parse(name: Option<&str>) -> Result<Self, CoreError> {
        match name {
            None => Ok(Zone::Floating),
            Some(name) => Tz::from_str(name)
                .map(Zone::Named)
                .map_err(|_| CoreError::InvalidTimezone(name.to_string())),
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        match self {
            Zone::Floating => None,
            Zone::Named(tz) => Some(tz.name()),
        }
    }

    /// Wall-clock reading of an instant in this zone.
    pub fn wall_clock(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Zone::Floating => instant.naive_utc(),
            Zone::Named(tz) => instant.with_timezone(tz).naive_local(),
        }
    }
}

/// Validate IANA timezone name
pub fn validate_timezone(timezone: &str) -> Result<(), CoreError> {
    Zone::parse(Some(timezone)).map(|_| ())
}

/// The temporal extent of a single occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    DueOnly { due: DateTime<Utc> },
    StartOnly { start: DateTime<Utc> },
    Bounded { start: DateTime<Utc>, due: DateTime<Utc> },
}

impl Span {
    /// The instant recurrences are anchored on.
    pub fn anchor(&self) -> DateTime<Utc> {
        match *self {
            Span::DueOnly { due } => due,
            Span::StartOnly { start } | Span::Bounded { start, .. } => start,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match *self {
            Span::Bounded { start, due } => Some(due - start),
            _ => None,
        }
    }

    /// The same span moved so that its anchor sits on `anchor`.
    ///
    /// Fails when the moved due would fall outside the representable range.
    pub fn shifted_to(&self, anchor: DateTime<Utc>) -> Result<Span, CoreError> {
        Ok(match *self {
            Span::DueOnly { .. } => Span::DueOnly { due: anchor },
            Span::StartOnly { .. } => Span::StartOnly { start: anchor },
            Span::Bounded { start, due } => {
                let due = anchor.checked_add_signed(due - start).ok_or_else(|| {
                    CoreError::InvalidTimeRange(format!("occurrence at {} ends past the representable range", anchor))
                })?;
                Span::Bounded { start: anchor, due }
            }
        })
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        match *self {
            Span::DueOnly { .. } => None,
            Span::StartOnly { start } | Span::Bounded { start, .. } => Some(start),
        }
    }

    pub fn due(&self) -> Option<DateTime<Utc>> {
        match *self {
            Span::StartOnly { .. } => None,
            Span::DueOnly { due } | Span::Bounded { due, .. } => Some(due),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTime {
    /// No start, no due: the task has no temporal instance.
    Untimed,
    Timed { span: Span, zone: Zone },
}

impl ResolvedTime {
    pub fn span(&self) -> Option<&Span> {
        match self {
            ResolvedTime::Untimed => None,
            ResolvedTime::Timed { span, .. } => Some(span),
        }
    }

    pub fn zone(&self) -> Option<Zone> {
        match self {
            ResolvedTime::Untimed => None,
            ResolvedTime::Timed { zone, .. } => Some(*zone),
        }
    }
}

/// Normalizes raw time fields into a [`ResolvedTime`].
///
/// When start, due and duration are all present, due is authoritative and the
/// duration is ignored. Use [`resolve_task`] to also reject a disagreeing
/// duration on recurring tasks.
pub fn resolve(
    start: Option<DateTime<Utc>>,
    due: Option<DateTime<Utc>>,
    duration: Option<TaskDuration>,
    timezone: Option<&str>,
) -> Result<ResolvedTime, CoreError> {
    let zone = Zone::parse(timezone)?;

    let span = match (start, due, duration) {
        (None, None, None) => return Ok(ResolvedTime::Untimed),
        (None, _, Some(d)) => {
            return Err(CoreError::InvalidTimeRange(format!(
                "duration {} given without a start",
                d
            )))
        }
        (Some(start), Some(due), _) => {
            if due < start {
                return Err(CoreError::InvalidTimeRange(format!(
                    "due {} precedes start {}",
                    due, start
                )));
            }
            Span::Bounded { start, due }
        }
        (Some(start), None, Some(d)) => {
            if d.is_negative() {
                return Err(CoreError::InvalidTimeRange(format!("negative duration {}", d)));
            }
            let due = d.to_chrono().and_then(|delta| start.checked_add_signed(delta)).ok_or_else(|| {
                CoreError::InvalidTimeRange(format!("duration {} from {} ends past the representable range", d, start))
            })?;
            Span::Bounded { start, due }
        }
        (Some(start), None, None) => Span::StartOnly { start },
        (None, Some(due), None) => Span::DueOnly { due },
    };

    Ok(ResolvedTime::Timed { span, zone })
}

/// Resolves a task row, rejecting recurring tasks whose stored due and
/// duration disagree on the length of the first occurrence.
pub fn resolve_task(task: &Task) -> Result<ResolvedTime, CoreError> {
    let resolved = resolve(task.start, task.due, task.duration, task.timezone.as_deref())?;

    if let (true, Some(stored), Some(span)) = (task.is_recurring(), task.duration, resolved.span()) {
        if let Some(actual) = span.duration() {
            if TaskDuration::from(actual) != stored {
                return Err(CoreError::InvalidTimeRange(format!(
                    "recurring task {} has due-start of {} but a duration of {}",
                    task.id,
                    TaskDuration::from(actual),
                    stored
                )));
            }
        }
    }

    Ok(resolved)
}

/// A task paired with its resolved time, computed on first access and reused
/// for the rest of a reconciliation pass.
pub struct ResolvedCell<'a> {
    task: &'a Task,
    resolved: OnceCell<ResolvedTime>,
}

impl<'a> ResolvedCell<'a> {
    pub fn new(task: &'a Task) -> Self {
        Self { task, resolved: OnceCell::new() }
    }

    pub fn task(&self) -> &'a Task {
        self.task
    }

    pub fn get(&self) -> Result<&ResolvedTime, CoreError> {
        if let Some(resolved) = self.resolved.get() {
            return Ok(resolved);
        }
        let resolved = resolve_task(self.task)?;
        Ok(self.resolved.get_or_init(|| resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_validate_timezone() {
        assert!(validate_timezone("UTC").is_ok());
        assert!(validate_timezone("America/New_York").is_ok());
        assert!(validate_timezone("Invalid/Timezone").is_err());
    }

    #[test]
    fn test_start_and_due_give_duration() {
        let due = t0() + Duration::days(1);
        let resolved = resolve(Some(t0()), Some(due), None, Some("UTC")).unwrap();
        let span = resolved.span().unwrap();
        assert_eq!(span.duration(), Some(Duration::milliseconds(86_400_000)));
        assert_eq!(resolved.zone(), Some(Zone::Named(Tz::UTC)));
    }

    #[test]
    fn test_start_and_duration_give_due() {
        let resolved = resolve(Some(t0()), None, Some("PT1H".parse().unwrap()), None).unwrap();
        assert_eq!(resolved.span().unwrap().due(), Some(t0() + Duration::hours(1)));
        assert_eq!(resolved.zone(), Some(Zone::Floating));
    }

    #[test]
    fn test_due_before_start_is_rejected() {
        let err = resolve(Some(t0()), Some(t0() - Duration::seconds(1)), None, None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTimeRange(_)));
    }

    #[rstest]
    #[case(None, None, ResolvedTime::Untimed)]
    #[case(Some(t0()), None, ResolvedTime::Timed { span: Span::StartOnly { start: t0() }, zone: Zone::Floating })]
    #[case(None, Some(t0()), ResolvedTime::Timed { span: Span::DueOnly { due: t0() }, zone: Zone::Floating })]
    fn test_partial_shapes(
        #[case] start: Option<DateTime<Utc>>,
        #[case] due: Option<DateTime<Utc>>,
        #[case] expected: ResolvedTime,
    ) {
        assert_eq!(resolve(start, due, None, None).unwrap(), expected);
    }

    #[test]
    fn test_duration_without_start_is_rejected() {
        let err = resolve(None, Some(t0()), Some("PT1H".parse().unwrap()), None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTimeRange(_)));
    }

    #[test]
    fn test_negative_duration_is_rejected() {
        let err = resolve(Some(t0()), None, Some("-PT1H".parse().unwrap()), None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTimeRange(_)));
    }

    #[test]
    fn test_duration_past_representable_range_is_rejected() {
        let err = resolve(Some(t0()), None, Some("P100000000D".parse().unwrap()), None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTimeRange(_)));

        let task = Task { start: Some(t0()), duration: Some(TaskDuration::from_seconds(i64::MAX)), ..Default::default() };
        assert!(matches!(resolve_task(&task), Err(CoreError::InvalidTimeRange(_))));
    }

    #[test]
    fn test_shift_near_the_end_of_time() {
        let span = Span::Bounded { start: t0(), due: t0() + Duration::days(1) };
        assert!(matches!(span.shifted_to(DateTime::<Utc>::MAX_UTC), Err(CoreError::InvalidTimeRange(_))));
        assert_eq!(
            Span::StartOnly { start: t0() }.shifted_to(DateTime::<Utc>::MAX_UTC).unwrap(),
            Span::StartOnly { start: DateTime::<Utc>::MAX_UTC }
        );
        assert_eq!(
            span.shifted_to(t0() + Duration::days(7)).unwrap(),
            Span::Bounded { start: t0() + Duration::days(7), due: t0() + Duration::days(8) }
        );
    }

    #[test]
    fn test_invalid_timezone() {
        let err = resolve(Some(t0()), None, None, Some("Mars/Olympus")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTimezone(_)));
    }

    #[test]
    fn test_arithmetic_ignores_dst() {
        // 2024-03-10 is the US spring-forward day; one day later is 24 real hours later.
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 5, 0, 0).unwrap();
        let resolved = resolve(Some(start), None, Some("P1D".parse().unwrap()), Some("America/New_York")).unwrap();
        assert_eq!(resolved.span().unwrap().due(), Some(start + Duration::hours(24)));
    }

    #[test]
    fn test_recurring_due_duration_conflict() {
        let task = Task {
            start: Some(t0()),
            due: Some(t0() + Duration::hours(2)),
            duration: Some("PT1H".parse().unwrap()),
            rrule: Some("FREQ=DAILY".to_string()),
            ..Default::default()
        };
        assert!(matches!(resolve_task(&task), Err(CoreError::InvalidTimeRange(_))));

        let agreeing = Task { duration: Some("PT2H".parse().unwrap()), ..task.clone() };
        assert!(resolve_task(&agreeing).is_ok());

        let not_recurring = Task { rrule: None, ..task };
        assert_eq!(
            resolve_task(&not_recurring).unwrap().span().unwrap().due(),
            Some(t0() + Duration::hours(2))
        );
    }

    #[test]
    fn test_floating_wall_clock_is_not_converted() {
        let zone = Zone::parse(None).unwrap();
        assert_eq!(zone.wall_clock(t0()), t0().naive_utc());

        let ny = Zone::parse(Some("America/New_York")).unwrap();
        assert_ne!(ny.wall_clock(t0()), t0().naive_utc());
    }

    #[test]
    fn test_resolved_cell_memoizes() {
        let task = Task { due: Some(t0()), ..Default::default() };
        let cell = ResolvedCell::new(&task);
        let first = cell.get().unwrap() as *const ResolvedTime;
        let second = cell.get().unwrap() as *const ResolvedTime;
        assert_eq!(first, second);
    }
}
