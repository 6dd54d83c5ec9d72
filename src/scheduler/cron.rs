// dbbackup/src/scheduler/cron.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, NaiveDate, NaiveTime, TimeZone, Timelike};
use thiserror::Error;

// Leap days repeat every four years, so five years covers every satisfiable expression.
const MAX_DAYS_AHEAD: u32 = 5 * 366;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("cron expression must have 5 or 6 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid {field} field '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    // Offset added to a name's index to get its numeric value.
    name_base: u32,
}

const SECOND: FieldSpec = FieldSpec { name: "second", min: 0, max: 59, names: &[], name_base: 0 };
const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[], name_base: 0 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[], name_base: 0 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[], name_base: 0 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12, names: &MONTH_NAMES, name_base: 1 };
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7, names: &WEEKDAY_NAMES, name_base: 0 };

/// Set of allowed values for one cron field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    bits: u64,
    // `*` or `?`: matters for the day-of-month/day-of-week OR rule.
    unrestricted: bool,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        self.bits & (1u64 << value) != 0
    }

    /// Smallest allowed value `>= from`.
    fn first_from(&self, from: u32) -> Option<u32> {
        if from >= 64 {
            return None;
        }
        let masked = self.bits & (u64::MAX << from);
        (masked != 0).then(|| masked.trailing_zeros())
    }
}

/// A parsed cron expression.
///
/// Six fields (`sec min hour day-of-month month day-of-week`) or the classic five
/// (seconds fixed at 0). Each field takes `*`, `?`, numbers, `a-b` ranges, `/n` steps,
/// comma lists, and month/weekday names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    raw: String,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let (second, rest) = match parts.len() {
            6 => (parts[0], &parts[1..]),
            5 => ("0", &parts[..]),
            n => return Err(ScheduleError::FieldCount(n)),
        };

        let mut days_of_week = parse_field(rest[4], DAY_OF_WEEK)?;
        // 7 is an alias for Sunday.
        if days_of_week.contains(7) {
            days_of_week.bits = (days_of_week.bits | 1) & !(1u64 << 7);
        }

        Ok(CronSchedule {
            seconds: parse_field(second, SECOND)?,
            minutes: parse_field(rest[0], MINUTE)?,
            hours: parse_field(rest[1], HOUR)?,
            days_of_month: parse_field(rest[2], DAY_OF_MONTH)?,
            months: parse_field(rest[3], MONTH)?,
            days_of_week,
            raw: parts.join(" "),
        })
    }

    /// First firing strictly after `after`, or `None` if the expression never fires
    /// again (e.g. February 30th).
    ///
    /// Local times that fall into a DST gap are skipped; ambiguous times fire on their
    /// first occurrence.
    pub fn next_after(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        let start = after.naive_local().with_nanosecond(0)? + ChronoDuration::seconds(1);
        let mut date = start.date();

        for _ in 0..MAX_DAYS_AHEAD {
            if self.matches_date(date) {
                let from = if date == start.date() { start.time() } else { NaiveTime::MIN };
                if let Some(found) = self.first_on(date, from, after) {
                    return Some(found);
                }
            }
            date = date.succ_opt()?;
        }
        None
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.months.contains(date.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(date.day());
        let dow = self.days_of_week.contains(date.weekday().num_days_from_sunday());

        if !self.days_of_month.unrestricted && !self.days_of_week.unrestricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    fn first_on(&self, date: NaiveDate, from: NaiveTime, after: DateTime<Local>) -> Option<DateTime<Local>> {
        let mut hour = self.hours.first_from(from.hour())?;
        loop {
            let minute_floor = if hour == from.hour() { from.minute() } else { 0 };
            let mut minute = self.minutes.first_from(minute_floor);
            while let Some(m) = minute {
                let second_floor = if hour == from.hour() && m == from.minute() { from.second() } else { 0 };
                let mut second = self.seconds.first_from(second_floor);
                while let Some(s) = second {
                    let naive = date.and_hms_opt(hour, m, s)?;
                    if let Some(local) = Local.from_local_datetime(&naive).earliest() {
                        if local > after {
                            return Some(local);
                        }
                    }
                    second = self.seconds.first_from(s + 1);
                }
                minute = self.minutes.first_from(m + 1);
            }
            hour = self.hours.first_from(hour + 1)?;
        }
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronSchedule::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_field(raw: &str, spec: FieldSpec) -> Result<FieldSet, ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidField {
        field: spec.name,
        value: raw.to_string(),
        reason,
    };

    if raw == "*" || (raw == "?" && (spec.name == DAY_OF_MONTH.name || spec.name == DAY_OF_WEEK.name)) {
        return Ok(FieldSet {
            bits: range_bits(spec.min, spec.max, 1),
            unrestricted: true,
        });
    }

    let mut bits = 0u64;
    for item in raw.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("step '{}' is not a number", step)))?;
                if step == 0 {
                    return Err(invalid("step must be greater than zero".to_string()));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (low, high) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((low, high)) = range.split_once('-') {
            (parse_value(low, spec).map_err(&invalid)?, parse_value(high, spec).map_err(&invalid)?)
        } else {
            let value = parse_value(range, spec).map_err(&invalid)?;
            // `5/15` means "from 5 to the end, every 15".
            (value, if step.is_some() { spec.max } else { value })
        };

        if low > high {
            return Err(invalid(format!("range {}-{} is reversed", low, high)));
        }
        bits |= range_bits(low, high, step.unwrap_or(1));
    }

    Ok(FieldSet {
        bits,
        unrestricted: false,
    })
}

fn parse_value(token: &str, spec: FieldSpec) -> Result<u32, String> {
    let value = match token.parse::<u32>() {
        Ok(value) => value,
        Err(_) => spec
            .names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(token))
            .map(|idx| idx as u32 + spec.name_base)
            .ok_or_else(|| format!("'{}' is not a number or name", token))?,
    };
    if value < spec.min || value > spec.max {
        return Err(format!("{} is out of range {}-{}", value, spec.min, spec.max));
    }
    Ok(value)
}

fn range_bits(low: u32, high: u32, step: u32) -> u64 {
    (low..=high).step_by(step as usize).fold(0u64, |acc, v| acc | (1u64 << v))
}
