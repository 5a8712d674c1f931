use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimeError {
    #[error("Unknown calendar: {0}")]
    UnknownCalendar(String),

    #[error("Calendar {0} cannot be decoded onto the proleptic Gregorian timeline")]
    UnsupportedCalendar(String),

    #[error("Invalid time units: {0}")]
    InvalidUnits(String),

    #[error("Invalid date {year}-{month:02}")]
    InvalidMonth { year: i32, month: u32 },

    #[error("Time value {0} is not finite")]
    NonFiniteValue(f64),
}

/// CF calendar attached to a variable's time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Calendar {
    /// "standard" or "gregorian"
    Standard,
    ProlepticGregorian,
    /// "noleap" or "365_day"
    NoLeap,
    /// "all_leap" or "366_day"
    AllLeap,
    Day360,
    Julian,
}

impl Calendar {
    /// Standard calendars keep Feb-29 in leap years.
    pub fn is_standard(&self) -> bool {
        matches!(self, Calendar::Standard | Calendar::ProlepticGregorian)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Calendar::Standard => "standard",
            Calendar::ProlepticGregorian => "proleptic_gregorian",
            Calendar::NoLeap => "noleap",
            Calendar::AllLeap => "all_leap",
            Calendar::Day360 => "360_day",
            Calendar::Julian => "julian",
        }
    }
}

impl Default for Calendar {
    fn default() -> Self {
        Calendar::Standard
    }
}

impl fmt::Display for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Calendar {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "gregorian" => Ok(Calendar::Standard),
            "proleptic_gregorian" => Ok(Calendar::ProlepticGregorian),
            "noleap" | "365_day" => Ok(Calendar::NoLeap),
            "all_leap" | "366_day" => Ok(Calendar::AllLeap),
            "360_day" => Ok(Calendar::Day360),
            "julian" => Ok(Calendar::Julian),
            other => Err(TimeError::UnknownCalendar(other.to_string())),
        }
    }
}

/// Calculate the number of days in a given month
pub fn days_in_month(year: i32, month: u32) -> Result<u32, TimeError> {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => Ok(31),
        4 | 6 | 9 | 11 => Ok(30),
        2 if is_leap_year(year) => Ok(29),
        2 => Ok(28),
        _ => Err(TimeError::InvalidMonth { year, month }),
    }
}

/// Check if a year is a leap year
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

fn is_feb_29(t: &NaiveDateTime) -> bool {
    t.month() == 2 && t.day() == 29
}

/// First instant of a month.
pub fn month_start(year: i32, month: u32) -> Result<NaiveDateTime, TimeError> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|d| d.and_time(NaiveTime::MIN))
        .ok_or(TimeError::InvalidMonth { year, month })
}

/// `(year, month)` of the following month, rolling December into January.
pub fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// `(year, month)` of the preceding month, rolling January into December.
pub fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// Selection window for one calendar month.
///
/// Meteorological fields are read over `[start, end)`. Radiative fields are
/// read from the start of the previous month's last day, so interpolation
/// onto `start` has a left neighbour. That day depends on the calendar of
/// the field: a 365-day axis ends February on the 28th even in leap years.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub year: i32,
    pub month: u32,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Padded start for the shortest calendar, the earliest of all padded starts
    pub lookback_start: NaiveDateTime,
}

impl MonthWindow {
    pub fn new(year: i32, month: u32) -> Result<Self, TimeError> {
        let start = month_start(year, month)?;
        let (ny, nm) = next_month(year, month);
        let end = month_start(ny, nm)?;
        let lookback_start = last_day_start(year, month, Calendar::NoLeap)?;

        Ok(Self {
            year,
            month,
            start,
            end,
            lookback_start,
        })
    }

    /// Midnight of the previous month's last day as labelled in `calendar`.
    pub fn padded_start(&self, calendar: Calendar) -> NaiveDateTime {
        last_day_start(self.year, self.month, calendar).unwrap_or(self.lookback_start)
    }

    pub fn days(&self) -> u32 {
        (self.end - self.start).num_days() as u32
    }
}

fn last_day_start(year: i32, month: u32, calendar: Calendar) -> Result<NaiveDateTime, TimeError> {
    let (py, pm) = previous_month(year, month);
    let mut day = days_in_month(py, pm)?;
    if calendar == Calendar::NoLeap && pm == 2 {
        day = 28;
    }
    NaiveDate::from_ymd_opt(py, pm, day)
        .map(|d| d.and_time(NaiveTime::MIN))
        .ok_or(TimeError::InvalidMonth { year: py, month: pm })
}

/// Hourly timestamps covering a whole calendar month.
///
/// For non-standard calendars every Feb-29 hour is removed, so the result has
/// `24 * days_in_month` entries, less 24 when Feb-29 was dropped.
pub fn hourly_axis(year: i32, month: u32, calendar: Calendar) -> Result<Vec<NaiveDateTime>, TimeError> {
    let start = month_start(year, month)?;
    let (ny, nm) = next_month(year, month);
    let end = month_start(ny, nm)?;

    let mut axis = Vec::with_capacity(24 * days_in_month(year, month)? as usize);
    let mut current = start;
    while current < end {
        if calendar.is_standard() || !is_feb_29(&current) {
            axis.push(current);
        }
        current += Duration::hours(1);
    }

    Ok(axis)
}

/// Seconds since the Unix epoch, as used for interpolation weights.
pub fn epoch_seconds(t: &NaiveDateTime) -> i64 {
    t.and_utc().timestamp()
}

/// Seconds since the Unix epoch counted in `calendar`.
///
/// A 365-day calendar has no Feb-29, so those days are not counted and
/// Feb-28 23:00 to Mar-01 00:00 is one hour apart in every year.
pub fn calendar_seconds(t: &NaiveDateTime, calendar: Calendar) -> i64 {
    match calendar {
        Calendar::NoLeap => {
            epoch_seconds(t) - 86400 * (leap_days_before(t.date()) - EPOCH_LEAP_DAYS)
        }
        _ => epoch_seconds(t),
    }
}

/// Gregorian Feb-29s before 1970-01-01
const EPOCH_LEAP_DAYS: i64 = 477;

/// Gregorian Feb-29s strictly before `date`, counted from year zero.
fn leap_days_before(date: NaiveDate) -> i64 {
    let y = date.year() as i64 - 1;
    let mut count = y.div_euclid(4) - y.div_euclid(100) + y.div_euclid(400);
    if is_leap_year(date.year()) && date.month() > 2 {
        count += 1;
    }
    count
}

/// Fractional hour of day (UTC).
pub fn fractional_hour(t: &NaiveDateTime) -> f64 {
    t.hour() as f64 + t.minute() as f64 / 60.0 + t.second() as f64 / 3600.0
}

/// Parsed CF time units, e.g. `hours since 1970-01-01 00:00:00`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeUnits {
    pub seconds_per_unit: f64,
    pub reference: NaiveDateTime,
}

impl TimeUnits {
    pub fn parse(units: &str) -> Result<Self, TimeError> {
        let lower = units.trim().to_ascii_lowercase();
        let (unit, reference) = lower
            .split_once(" since ")
            .ok_or_else(|| TimeError::InvalidUnits(units.to_string()))?;

        let seconds_per_unit = match unit.trim() {
            "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3600.0,
            "days" | "day" | "d" => 86400.0,
            _ => return Err(TimeError::InvalidUnits(units.to_string())),
        };

        let reference = parse_reference(reference.trim())
            .ok_or_else(|| TimeError::InvalidUnits(units.to_string()))?;

        Ok(Self {
            seconds_per_unit,
            reference,
        })
    }
}

fn parse_reference(text: &str) -> Option<NaiveDateTime> {
    // Drop a trailing time zone designator such as "UTC" or "Z"
    let text = text
        .trim_end_matches(" utc")
        .trim_end_matches('z')
        .trim();

    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dt%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dt%H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

const NOLEAP_CUMULATIVE_DAYS: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
const ALL_LEAP_CUMULATIVE_DAYS: [i64; 12] = [0, 31, 60, 91, 121, 152, 182, 213, 244, 274, 305, 335];

/// Decode raw CF time values into timestamps on the proleptic Gregorian timeline.
///
/// Dates of 365/366-day calendars keep their labels; a 365-day axis therefore
/// never contains Feb-29. A 366-day Feb-29 that falls in a Gregorian common
/// year has no counterpart and decodes to `None`, so callers can drop the
/// sample together with its data.
pub fn decode_time_values(
    values: &[f64],
    units: &TimeUnits,
    calendar: Calendar,
) -> Result<Vec<Option<NaiveDateTime>>, TimeError> {
    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                return Err(TimeError::NonFiniteValue(v));
            }
            let offset = (v * units.seconds_per_unit).round() as i64;
            match calendar {
                Calendar::Standard | Calendar::ProlepticGregorian => {
                    Ok(Some(units.reference + Duration::seconds(offset)))
                }
                Calendar::NoLeap => fixed_year_offset(&units.reference, offset, 365),
                Calendar::AllLeap => fixed_year_offset(&units.reference, offset, 366),
                Calendar::Day360 | Calendar::Julian => {
                    Err(TimeError::UnsupportedCalendar(calendar.name().to_string()))
                }
            }
        })
        .collect()
}

fn fixed_year_offset(
    reference: &NaiveDateTime,
    offset_seconds: i64,
    year_length: i64,
) -> Result<Option<NaiveDateTime>, TimeError> {
    let cumulative = if year_length == 365 {
        &NOLEAP_CUMULATIVE_DAYS
    } else {
        &ALL_LEAP_CUMULATIVE_DAYS
    };

    let ref_day = reference.year() as i64 * year_length
        + cumulative[reference.month0() as usize]
        + reference.day0() as i64;
    let ref_seconds = ref_day * 86400 + reference.num_seconds_from_midnight() as i64;
    let total = ref_seconds + offset_seconds;

    let day_number = total.div_euclid(86400);
    let second_of_day = total.rem_euclid(86400);
    let year = day_number.div_euclid(year_length) as i32;
    let day_of_year = day_number.rem_euclid(year_length);
    let month0 = cumulative
        .iter()
        .rposition(|&c| c <= day_of_year)
        .unwrap_or(0);
    let month = month0 as u32 + 1;
    let day = (day_of_year - cumulative[month0] + 1) as u32;

    if month == 2 && day == 29 && !is_leap_year(year) {
        return Ok(None);
    }

    let invalid = TimeError::InvalidMonth { year, month };
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or(invalid.clone())?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(second_of_day as u32, 0)
        .ok_or(invalid)?;

    Ok(Some(date.and_time(time)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymdh(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_leap_year() {
        assert!(is_leap_year(2000));
        assert!(!is_leap_year(1900));
        assert!(is_leap_year(2004));
        assert!(!is_leap_year(2001));
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2024, 2), Ok(29));
        assert_eq!(days_in_month(2023, 2), Ok(28));
        assert_eq!(days_in_month(2023, 4), Ok(30));
        assert_eq!(days_in_month(2023, 12), Ok(31));
        assert_eq!(
            days_in_month(2023, 13),
            Err(TimeError::InvalidMonth { year: 2023, month: 13 })
        );
        assert!(days_in_month(2023, 0).is_err());
    }

    #[test]
    fn test_calendar_parsing() {
        assert_eq!("gregorian".parse::<Calendar>().unwrap(), Calendar::Standard);
        assert_eq!("365_day".parse::<Calendar>().unwrap(), Calendar::NoLeap);
        assert_eq!(
            "proleptic_gregorian".parse::<Calendar>().unwrap(),
            Calendar::ProlepticGregorian
        );
        assert!("lunar".parse::<Calendar>().is_err());
        assert!(!Calendar::NoLeap.is_standard());
        assert!(Calendar::Standard.is_standard());
    }

    #[test]
    fn test_month_window_january_pads_into_december() {
        let window = MonthWindow::new(2030, 1).unwrap();
        assert_eq!(window.start, ymdh(2030, 1, 1, 0));
        assert_eq!(window.end, ymdh(2030, 2, 1, 0));
        assert_eq!(window.padded_start(Calendar::Standard), ymdh(2029, 12, 31, 0));
        assert_eq!(window.lookback_start, ymdh(2029, 12, 31, 0));
        assert_eq!(window.days(), 31);
    }

    #[test]
    fn test_month_window_leap_march_padding_follows_calendar() {
        let window = MonthWindow::new(2024, 3).unwrap();
        assert_eq!(window.padded_start(Calendar::Standard), ymdh(2024, 2, 29, 0));
        assert_eq!(window.padded_start(Calendar::AllLeap), ymdh(2024, 2, 29, 0));
        assert_eq!(window.padded_start(Calendar::NoLeap), ymdh(2024, 2, 28, 0));
        assert_eq!(window.lookback_start, ymdh(2024, 2, 28, 0));
    }

    #[test]
    fn test_calendar_seconds_skip_feb_29_for_noleap() {
        let before = ymdh(2024, 2, 28, 23);
        let after = ymdh(2024, 3, 1, 0);
        assert_eq!(
            calendar_seconds(&after, Calendar::NoLeap) - calendar_seconds(&before, Calendar::NoLeap),
            3600
        );
        assert_eq!(
            calendar_seconds(&after, Calendar::Standard) - calendar_seconds(&before, Calendar::Standard),
            25 * 3600
        );
        let epoch = ymdh(1970, 1, 1, 0);
        assert_eq!(calendar_seconds(&epoch, Calendar::NoLeap), 0);
        assert_eq!(
            calendar_seconds(&ymdh(1971, 1, 1, 0), Calendar::NoLeap),
            365 * 86400
        );
    }

    #[test]
    fn test_hourly_axis_december_rollover() {
        let axis = hourly_axis(2030, 12, Calendar::Standard).unwrap();
        assert_eq!(axis.len(), 31 * 24);
        assert_eq!(axis.last().copied(), Some(ymdh(2030, 12, 31, 23)));
    }

    #[test]
    fn test_noleap_decode_skips_feb_29() {
        let units = TimeUnits::parse("days since 2024-02-28 00:00:00").unwrap();
        let times = decode_time_values(&[0.0, 1.0], &units, Calendar::NoLeap).unwrap();
        assert_eq!(times[0], Some(ymdh(2024, 2, 28, 0)));
        assert_eq!(times[1], Some(ymdh(2024, 3, 1, 0)));
    }

    #[test]
    fn test_all_leap_feb_29_in_common_year_has_no_date() {
        let units = TimeUnits::parse("days since 2023-02-28 00:00:00").unwrap();
        let times = decode_time_values(&[0.0, 1.0, 1.5, 2.0], &units, Calendar::AllLeap).unwrap();
        assert_eq!(
            times,
            vec![Some(ymdh(2023, 2, 28, 0)), None, None, Some(ymdh(2023, 3, 1, 0))]
        );

        // Leap years keep the day
        let units = TimeUnits::parse("days since 2024-02-28 00:00:00").unwrap();
        let times = decode_time_values(&[1.0], &units, Calendar::AllLeap).unwrap();
        assert_eq!(times, vec![Some(ymdh(2024, 2, 29, 0))]);
    }
}
