use crate::error::CoreError;
use crate::models::InstanceValues;
use crate::time::{ResolvedTime, Span, Zone};
use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, SubsecRound, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use rrule::{RRule, RRuleSet, Tz as RRuleTz, Unvalidated};
use tracing::debug;

/// Default cap on the number of occurrences a single task may materialize.
pub const DEFAULT_MAX_INSTANCES: usize = 1000;

/// How far ahead recurring tasks are expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    /// Inclusive upper bound for recurring occurrence anchors.
    pub until: DateTime<Utc>,
    /// Hard cap on occurrences per task.
    pub max_instances: usize,
}

impl Horizon {
    pub fn until(until: DateTime<Utc>) -> Self {
        Self { until, max_instances: DEFAULT_MAX_INSTANCES }
    }

    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances;
        self
    }
}

/// A single concrete occurrence of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub start: Option<DateTime<Utc>>,
    pub due: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub timezone: Option<String>,
}

impl Occurrence {
    fn new(span: Span, zone: Zone) -> Self {
        Self {
            start: span.start(),
            due: span.due(),
            duration: span.duration(),
            timezone: zone.name().map(str::to_string),
        }
    }

    pub fn anchor(&self) -> Option<DateTime<Utc>> {
        self.start.or(self.due)
    }

    pub fn values(&self) -> InstanceValues {
        InstanceValues {
            start: self.start,
            due: self.due,
            duration_ms: self.duration.map(|d| d.num_milliseconds()),
            timezone: self.timezone.clone(),
        }
    }
}

/// The recurrence expansion capability.
///
/// Maps an opaque rule plus an anchor instant to an increasing sequence of
/// occurrence anchors. Implementations may stop at `horizon` but are not
/// required to; the generator clips anyway.
pub trait RuleExpander: Send + Sync {
    fn expand<'a>(
        &'a self,
        rule: &str,
        anchor: DateTime<Utc>,
        zone: Zone,
        horizon: &Horizon,
    ) -> Result<Box<dyn Iterator<Item = DateTime<Utc>> + Send + 'a>, CoreError>;
}

/// [`RuleExpander`] backed by the `rrule` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct RRuleExpander;

impl RRuleExpander {
    /// Builds the full rule text with a DTSTART taken from the anchor.
    ///
    /// Named zones are expanded in wall-clock time so DST shifts follow the
    /// zone; floating tasks expand in UTC.
    pub fn normalize_rrule(rule: &str, anchor: DateTime<Utc>, zone: Zone) -> String {
        let rule = rule.trim();
        if rule.contains("DTSTART") {
            return rule.to_string();
        }
        let rule = rule.strip_prefix("RRULE:").unwrap_or(rule);

        match zone {
            Zone::Named(tz) if tz != Tz::UTC => format!(
                "DTSTART;TZID={}:{}\nRRULE:{}",
                tz.name(),
                zone.wall_clock(anchor).format("%Y%m%dT%H%M%S"),
                rule
            ),
            _ => format!("DTSTART:{}\nRRULE:{}", anchor.format("%Y%m%dT%H%M%SZ"), rule),
        }
    }

    pub fn validate_rrule(rule: &str, anchor: DateTime<Utc>, zone: Zone) -> Result<(), CoreError> {
        match Self::repeated_wall_clock(rule, anchor, zone) {
            Some(tz) => Self::parse_wall_clock(rule, anchor, tz).map(|_| ()),
            None => Self::parse(rule, anchor, zone).map(|_| ()),
        }
    }

    fn parse(rule: &str, anchor: DateTime<Utc>, zone: Zone) -> Result<RRuleSet, CoreError> {
        let rrule_string = Self::normalize_rrule(rule, anchor, zone);
        rrule_string
            .parse::<RRuleSet>()
            .map_err(|e| CoreError::InvalidRule(format!("Failed to parse RRULE '{}': {}", rrule_string, e)))
    }

    /// The anchor's zone, when its wall-clock reading occurs twice there (a
    /// DST fall-back hour). A `TZID` DTSTART cannot name such an instant.
    fn repeated_wall_clock(rule: &str, anchor: DateTime<Utc>, zone: Zone) -> Option<Tz> {
        match zone {
            Zone::Named(tz) if !rule.contains("DTSTART") => match tz.from_local_datetime(&zone.wall_clock(anchor)) {
                LocalResult::Ambiguous(..) => Some(tz),
                _ => None,
            },
            _ => None,
        }
    }

    /// Builds the rule over wall-clock readings in `tz`, written as UTC so
    /// the rule engine never resolves offsets itself. UNTIL is moved onto the
    /// same wall clock.
    fn parse_wall_clock(rule: &str, anchor: DateTime<Utc>, tz: Tz) -> Result<RRuleSet, CoreError> {
        let invalid = |e: rrule::RRuleError| CoreError::InvalidRule(format!("Failed to parse RRULE '{}': {}", rule, e));
        let body = rule.trim();
        let body = body.strip_prefix("RRULE:").unwrap_or(body);

        let mut rrule: RRule<Unvalidated> = body.parse().map_err(invalid)?;
        if let Some(until) = rrule.get_until().map(|until| until.with_timezone(&tz).naive_local()) {
            rrule = rrule.until(RRuleTz::UTC.from_utc_datetime(&until));
        }

        let start = Zone::Named(tz).wall_clock(anchor).trunc_subsecs(0);
        rrule.build(RRuleTz::UTC.from_utc_datetime(&start)).map_err(invalid)
    }
}

/// Places a wall-clock reading back on the timeline of `tz`.
///
/// A repeated reading resolves to `anchor` when it is one of the two
/// candidates and to the earlier one otherwise. A skipped reading uses the
/// offset in force before the gap.
fn localize(tz: Tz, wall: NaiveDateTime, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&wall) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earlier, later) => {
            let later = later.with_timezone(&Utc);
            if later == anchor.trunc_subsecs(0) {
                Some(later)
            } else {
                Some(earlier.with_timezone(&Utc))
            }
        }
        LocalResult::None => {
            let before = wall.checked_sub_signed(Duration::hours(1))?;
            tz.from_local_datetime(&before)
                .earliest()
                .and_then(|dt| dt.with_timezone(&Utc).checked_add_signed(Duration::hours(1)))
        }
    }
}

/// Expansion is eager: anchors up to `horizon.until`, at most
/// `horizon.max_instances` of them, are computed before `expand` returns,
/// since the `rrule` iterator borrows its rule set.
impl RuleExpander for RRuleExpander {
    fn expand<'a>(
        &'a self,
        rule: &str,
        anchor: DateTime<Utc>,
        zone: Zone,
        horizon: &Horizon,
    ) -> Result<Box<dyn Iterator<Item = DateTime<Utc>> + Send + 'a>, CoreError> {
        // The rule engine works in whole seconds; put the anchor's fraction back.
        let fraction = if rule.contains("DTSTART") {
            Duration::zero()
        } else {
            Duration::nanoseconds(i64::from(anchor.nanosecond()))
        };

        let until = horizon.until;
        let dates: Vec<DateTime<Utc>> = match Self::repeated_wall_clock(rule, anchor, zone) {
            Some(tz) => {
                let rrule_set = Self::parse_wall_clock(rule, anchor, tz)?;
                debug!(zone = tz.name(), %anchor, "expand: anchor on a repeated wall-clock hour");
                rrule_set
                    .into_iter()
                    .filter_map(|wall| localize(tz, wall.naive_utc(), anchor))
                    .map(|dt| dt + fraction)
                    .take_while(|dt| *dt <= until)
                    .take(horizon.max_instances)
                    .collect()
            }
            None => Self::parse(rule, anchor, zone)?
                .into_iter()
                .map(|dt| dt.with_timezone(&Utc) + fraction)
                .take_while(|dt| *dt <= until)
                .take(horizon.max_instances)
                .collect(),
        };

        Ok(Box::new(dates.into_iter()))
    }
}

enum Source<'a> {
    Single(Option<DateTime<Utc>>),
    Rule(Box<dyn Iterator<Item = DateTime<Utc>> + Send + 'a>),
}

/// Lazy, strictly increasing sequence of occurrences for one task.
///
/// Holds no external handles; dropping it mid-iteration is always fine.
pub struct Occurrences<'a> {
    source: Source<'a>,
    span: Option<Span>,
    zone: Zone,
    horizon: Horizon,
    emitted: usize,
    last: Option<DateTime<Utc>>,
    done: bool,
}

impl<'a> Iterator for Occurrences<'a> {
    type Item = Result<Occurrence, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let span = self.span?;

        let next = match &mut self.source {
            Source::Single(anchor) => anchor.take()?,
            Source::Rule(raw) => {
                let next = raw.next();
                match next {
                    Some(dt) if dt <= self.horizon.until && self.emitted < self.horizon.max_instances => dt,
                    _ => {
                        self.done = true;
                        return None;
                    }
                }
            }
        };

        if let Some(last) = self.last {
            if next <= last {
                self.done = true;
                let what = if next == last { "duplicate" } else { "out-of-order" };
                return Some(Err(CoreError::InconsistentRule(format!(
                    "{} occurrence {} after {}",
                    what, next, last
                ))));
            }
        }

        self.last = Some(next);
        self.emitted += 1;
        match span.shifted_to(next) {
            Ok(shifted) => Some(Ok(Occurrence::new(shifted, self.zone))),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Expands a resolved task time into its occurrences.
///
/// Without a rule the sequence holds the single resolved occurrence (never
/// clipped). With a rule, anchors come from `expander` and are clipped to
/// `horizon`. An untimed task yields nothing.
pub fn occurrences<'a>(
    resolved: &ResolvedTime,
    rule: Option<&str>,
    expander: &'a dyn RuleExpander,
    horizon: &Horizon,
) -> Result<Occurrences<'a>, CoreError> {
    let (span, zone) = match resolved {
        ResolvedTime::Untimed => {
            if rule.is_some() {
                debug!("occurrences: recurrence rule on untimed task ignored");
            }
            return Ok(Occurrences {
                source: Source::Single(None),
                span: None,
                zone: Zone::Floating,
                horizon: *horizon,
                emitted: 0,
                last: None,
                done: true,
            });
        }
        ResolvedTime::Timed { span, zone } => (*span, *zone),
    };

    let source = match rule {
        None => Source::Single(Some(span.anchor())),
        Some(rule) => Source::Rule(expander.expand(rule, span.anchor(), zone, horizon)?),
    };

    Ok(Occurrences {
        source,
        span: Some(span),
        zone,
        horizon: *horizon,
        emitted: 0,
        last: None,
        done: false,
    })
}
