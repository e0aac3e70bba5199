//! ISO-8601 time-string algebra
//!
//! HAPI times are ISO-8601 strings in one of two shapes: calendar
//! (`2020-09-25T08:38:00Z`) or ordinal (`2020-269T08:38:00Z`). The cache and
//! the record pipeline order and partition data by comparing these strings
//! lexicographically, which is only valid when both sides share the same
//! shape and precision. This module provides the parsing, normalization and
//! reformatting that makes those comparisons safe, plus the day arithmetic
//! used to pick cache granules.
//!
//! Everything here is integer arithmetic on the decomposed fields. Leap
//! seconds are not modelled.

use crate::error::{HapiError, Result};

const DAYS_IN_MONTH: [[i32; 14]; 2] = [
    [0, 31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31, 0],
    [0, 31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31, 0],
];

const DAY_OFFSET: [[i32; 14]; 2] = [
    [0, 0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334, 365],
    [0, 0, 31, 60, 91, 121, 152, 182, 213, 244, 274, 305, 335, 366],
];

const MIDNIGHT_SUFFIX: &str = "T00:00:00.000000000Z";

const NANOS_PER_MILLI: i64 = 1_000_000;
const MILLIS_PER_DAY: i64 = 86_400_000;

/// A decomposed instant
///
/// After [`normalize`], `month` is in `1..=12`, `day` is within the month and
/// `hour` is in `0..=23`. Before normalization `day` may hold a day-of-year
/// (with `month == 1`) and `hour` may be 24.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeComponents {
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub hour: i32,
    pub minute: i32,
    pub second: i32,
    pub nanos: i32,
}

impl TimeComponents {
    /// Builds components from a `[year, month, day, hour, minute, second, nanos]` array
    pub fn from_array(a: [i32; 7]) -> Self {
        Self {
            year: a[0],
            month: a[1],
            day: a[2],
            hour: a[3],
            minute: a[4],
            second: a[5],
            nanos: a[6],
        }
    }

    pub fn to_array(&self) -> [i32; 7] {
        [
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.nanos,
        ]
    }
}

pub fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 400 == 0 || year % 100 != 0)
}

fn days_in_month(year: i32, month: i32) -> i32 {
    DAYS_IN_MONTH[is_leap_year(year) as usize][month as usize]
}

fn format_error(time: &str, why: &str) -> HapiError {
    HapiError::Format(format!("'{}': {}", time, why))
}

/// Parses a run of ASCII digits without going through `str::parse`, which
/// would accept a leading sign.
fn parse_digits(time: &str, field: &str) -> Result<i32> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format_error(time, "expected digits"));
    }
    let mut result: i32 = 0;
    for b in field.bytes() {
        result = result
            .checked_mul(10)
            .and_then(|r| r.checked_add((b - b'0') as i32))
            .ok_or_else(|| format_error(time, "numeric field too large"))?;
    }
    Ok(result)
}

/// True when the string uses the ordinal `Y-DOY` shape rather than `Y-MM-DD`
fn is_ordinal(time: &str) -> bool {
    let b = time.as_bytes();
    b.len() >= 8 && b[4] == b'-' && b[7] != b'-'
}

/// Parses the clock part of a time string, everything after the `T`
fn parse_clock(time: &str, clock: &str, c: &mut TimeComponents) -> Result<()> {
    let clock = clock.strip_suffix('Z').unwrap_or(clock);
    let len = clock.len();
    if !clock.is_ascii() {
        return Err(format_error(time, "unrecognized time of day"));
    }
    // HH, HH:MM, HH:MM:SS or HH:MM:SS.f with at least one fraction digit
    if !matches!(len, 2 | 5 | 8) && len < 10 {
        return Err(format_error(time, "time of day must be HH[:MM[:SS[.f]]]"));
    }
    c.hour = parse_digits(time, &clock[0..2])?;
    if len >= 5 {
        if &clock[2..3] != ":" {
            return Err(format_error(time, "expected ':' after hour"));
        }
        c.minute = parse_digits(time, &clock[3..5])?;
    }
    if len >= 8 {
        if &clock[5..6] != ":" {
            return Err(format_error(time, "expected ':' after minute"));
        }
        c.second = parse_digits(time, &clock[6..8])?;
    }
    if len > 9 {
        if &clock[8..9] != "." {
            return Err(format_error(time, "expected '.' before fractional seconds"));
        }
        let frac = &clock[9..];
        let digits = &frac[..frac.len().min(9)];
        let mut nanos = parse_digits(time, digits)?;
        for _ in digits.len()..9 {
            nanos *= 10;
        }
        if frac.len() > 9 {
            // validate the truncated tail even though it is discarded
            parse_digits(time, &frac[9..])?;
        }
        c.nanos = nanos;
    }
    Ok(())
}

/// Decomposes an ISO-8601 time string into normalized components
///
/// Accepts a bare four-digit year, `Y-DOY[THH:MM:SS.frac][Z]` and
/// `Y-MM-DD[THH:MM:SS.frac][Z]`. Fractional seconds of any length are padded
/// or truncated to nanoseconds. Day-of-year input is resolved to month and
/// day.
///
/// # Errors
/// `HapiError::Format` if the string is shorter than 8 characters (other than
/// the year form) or is not one of the recognized shapes.
pub fn parse(time: &str) -> Result<TimeComponents> {
    let mut c = TimeComponents {
        month: 1,
        day: 1,
        ..Default::default()
    };
    if time.len() == 4 {
        c.year = parse_digits(time, time)?;
        return Ok(c);
    }
    if time.len() < 8 {
        return Err(format_error(time, "time must have 4 or more than 7 characters"));
    }
    if !time.is_ascii() || time.as_bytes()[4] != b'-' {
        return Err(format_error(time, "unrecognized time shape"));
    }
    c.year = parse_digits(time, &time[0..4])?;

    let rest = if is_ordinal(time) {
        c.day = parse_digits(time, &time[5..8])?;
        &time[8..]
    } else {
        if time.len() < 10 {
            return Err(format_error(time, "calendar date needs Y-MM-DD"));
        }
        c.month = parse_digits(time, &time[5..7])?;
        c.day = parse_digits(time, &time[8..10])?;
        &time[10..]
    };

    match rest.as_bytes().first() {
        None => {}
        Some(b'Z') if rest.len() == 1 => {}
        Some(b'T') => parse_clock(time, &rest[1..], &mut c)?,
        Some(_) => return Err(format_error(time, "expected 'T' or 'Z' after the date")),
    }

    normalize(&mut c).map_err(|_| format_error(time, "fields out of range"))?;
    Ok(c)
}

/// Normalizes decomposed time in place
///
/// Hour 24 carries into the next day (once). Day overflow and underflow are
/// resolved against the leap-year aware month table, rolling the year when
/// needed, so `12-32` becomes January 1 of the following year and day 0
/// becomes the last day of the previous month.
pub fn normalize(c: &mut TimeComponents) -> Result<()> {
    if c.hour == 24 {
        c.day += 1;
        c.hour = 0;
    }
    if c.hour > 24 || c.hour < 0 {
        return Err(HapiError::Format(format!("hour {} is out of range", c.hour)));
    }
    if c.month < 1 || c.month > 12 {
        return Err(HapiError::Format(format!("month {} is out of range", c.month)));
    }
    while c.day < 1 {
        c.month -= 1;
        if c.month < 1 {
            c.month = 12;
            c.year -= 1;
        }
        c.day += days_in_month(c.year, c.month);
    }
    loop {
        let d = days_in_month(c.year, c.month);
        if c.day <= d {
            break;
        }
        c.day -= d;
        c.month += 1;
        if c.month > 12 {
            c.month = 1;
            c.year += 1;
        }
    }
    Ok(())
}

/// Formats components as `Y-MM-DDTHH:MM:SS.NNNNNNNNNZ`
pub fn format_components(c: &TimeComponents) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
        c.year, c.month, c.day, c.hour, c.minute, c.second, c.nanos
    )
}

fn format_ordinal(c: &TimeComponents) -> Result<String> {
    let doy = day_of_year(c.year, c.month, c.day)?;
    Ok(format!(
        "{:04}-{:03}T{:02}:{:02}:{:02}.{:09}Z",
        c.year, doy, c.hour, c.minute, c.second, c.nanos
    ))
}

/// Returns the time in the canonical form `Y-MM-DDTHH:MM:SS.NNNNNNNNNZ`
pub fn normalize_time_string(time: &str) -> Result<String> {
    Ok(format_components(&parse(time)?))
}

/// Re-renders `time` in the shape of `example`
///
/// The result uses the same date style (calendar or ordinal), the same
/// number of characters and the same trailing `Z` as `example`, so the two
/// can be compared as strings.
///
/// ```
/// use hapi_client::time::reformat;
/// assert_eq!(reformat("2020-01-01T00:00Z", "2020-112Z").unwrap(), "2020-04-21T00:00Z");
/// ```
pub fn reformat(example: &str, time: &str) -> Result<String> {
    let c = parse(time)?;
    let full = if is_ordinal(example) {
        format_ordinal(&c)?
    } else {
        format_components(&c)
    };
    let has_z = example.ends_with('Z');
    let body = example.len() - usize::from(has_z);
    // full always ends with 'Z'; digits past nanoseconds are zero
    let n = body.min(full.len() - 1);
    let mut result = full[..n].to_string();
    for _ in n..body {
        result.push('0');
    }
    if has_z {
        result.push('Z');
    }
    Ok(result)
}

/// Returns the day of year for a calendar date, e.g. `day_of_year(2000, 5, 29) == 150`
pub fn day_of_year(year: i32, month: i32, day: i32) -> Result<i32> {
    if !(1..=12).contains(&month) {
        return Err(HapiError::Format(format!(
            "month must be between 1 and 12, not {}",
            month
        )));
    }
    Ok(DAY_OFFSET[is_leap_year(year) as usize][month as usize] + day)
}

/// Start of the day containing `time`, in canonical form
pub fn floor(time: &str) -> Result<String> {
    let c = parse(time)?;
    Ok(format_components(&TimeComponents {
        year: c.year,
        month: c.month,
        day: c.day,
        ..Default::default()
    }))
}

/// The next midnight after `time`, or `time` itself (normalized) if it is
/// already a midnight
pub fn ceil(time: &str) -> Result<String> {
    let normalized = normalize_time_string(time)?;
    if normalized.ends_with(MIDNIGHT_SUFFIX) {
        return Ok(normalized);
    }
    let next = next_day(&normalized)?;
    Ok(format!("{}{}", &next[..next.len() - 1], MIDNIGHT_SUFFIX))
}

fn shift_day(time: &str, delta: i32) -> Result<String> {
    let mut c = parse(time)?;
    c.day += delta;
    normalize(&mut c)?;
    Ok(format!("{:04}-{:02}-{:02}Z", c.year, c.month, c.day))
}

/// The day after the one containing `time`, as a day boundary `Y-MM-DDZ`
pub fn next_day(time: &str) -> Result<String> {
    shift_day(time, 1)
}

/// The day before the one containing `time`, as a day boundary `Y-MM-DDZ`
pub fn previous_day(time: &str) -> Result<String> {
    shift_day(time, -1)
}

/// Lists the day boundaries (`Y-MM-DDZ`) of every day whose 24 hours
/// intersect `[start, stop)`
///
/// # Arguments
/// * `start` - inclusive start of the interval
/// * `stop` - exclusive end of the interval
///
/// # Returns
/// One entry per calendar day, in order. Empty when `stop <= start`.
pub fn count_off_days(start: &str, stop: &str) -> Result<Vec<String>> {
    let first = floor(start)?;
    let last = ceil(stop)?;
    let mut day = format!("{}Z", &first[..10]);
    let end = format!("{}Z", &last[..10]);
    let mut result = Vec::new();
    while day < end {
        let next = next_day(&day)?;
        result.push(day);
        day = next;
    }
    Ok(result)
}

/// Days since 1970-01-01 for a proleptic Gregorian date
fn days_from_civil(year: i32, month: i32, day: i32) -> i64 {
    let y = i64::from(if month <= 2 { year - 1 } else { year });
    let m = i64::from(month);
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i32, i32, i32) {
    let z = days + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year as i32, month as i32, day as i32)
}

/// Milliseconds since 1970-01-01T00:00Z, not counting leap seconds
pub fn to_milliseconds_since_1970(time: &str) -> Result<i64> {
    let c = parse(time)?;
    let days = days_from_civil(c.year, c.month, c.day);
    Ok(days * MILLIS_PER_DAY
        + i64::from(c.hour) * 3_600_000
        + i64::from(c.minute) * 60_000
        + i64::from(c.second) * 1000
        + i64::from(c.nanos) / NANOS_PER_MILLI)
}

/// Canonical time string for milliseconds since 1970-01-01T00:00Z
pub fn from_milliseconds_since_1970(millis: i64) -> String {
    let days = millis.div_euclid(MILLIS_PER_DAY);
    let ms = millis.rem_euclid(MILLIS_PER_DAY);
    let (year, month, day) = civil_from_days(days);
    format_components(&TimeComponents {
        year,
        month,
        day,
        hour: (ms / 3_600_000) as i32,
        minute: (ms / 60_000 % 60) as i32,
        second: (ms / 1000 % 60) as i32,
        nanos: (ms % 1000 * NANOS_PER_MILLI) as i32,
    })
}
