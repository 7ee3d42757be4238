use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::error::{Result, ScheduleError};

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];

/// A symbolic request for a start time, resolved against the clock with [`TimeSpec::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    /// Offset from now.
    In(Duration),
    /// Hour of day; rolls over to tomorrow when that hour has already started.
    TodayAt(u32),
    TomorrowAt(u32),
    At(NaiveDateTime),
}

impl TimeSpec {
    /// Builds a preset from a (type, value, unit) triple as used by preset buttons.
    ///
    /// `relative` takes `seconds`, `minutes` or `hours`; `absolute` and `tomorrow` take an hour
    /// of day and ignore the unit.
    pub fn from_parts(time_type: &str, value: i64, unit: &str) -> Result<Self> {
        match time_type {
            "relative" => relative_offset(value, unit).map(TimeSpec::In),
            "absolute" => Ok(TimeSpec::TodayAt(check_hour(value)?)),
            "tomorrow" => Ok(TimeSpec::TomorrowAt(check_hour(value)?)),
            _ => Err(ScheduleError::InvalidParameter(format!(
                "Unsupported time type: {}",
                time_type
            ))),
        }
    }

    pub fn resolve(&self, now: NaiveDateTime) -> Result<NaiveDateTime> {
        match *self {
            TimeSpec::In(offset) => now.checked_add_signed(offset).ok_or_else(out_of_range),
            TimeSpec::TodayAt(hour) => {
                let today = at_hour(now.date(), hour)?;
                if today <= now {
                    today
                        .checked_add_signed(Duration::days(1))
                        .ok_or_else(out_of_range)
                } else {
                    Ok(today)
                }
            }
            TimeSpec::TomorrowAt(hour) => {
                let tomorrow = now.date().succ_opt().ok_or_else(out_of_range)?;
                at_hour(tomorrow, hour)
            }
            TimeSpec::At(target) => Ok(target),
        }
    }
}

/// Parses operator input into a [`TimeSpec`].
///
/// Accepted forms: `5s`, `in 10m`, `2h`, `at 22`, `today at 10pm`, `tomorrow at 2`,
/// `2026-10-17 02:00[:SS]`.
pub fn parse_time_spec(s: &str) -> Result<TimeSpec> {
    let raw = s.trim();
    let s = raw.to_lowercase();

    if let Some(hour) = s.strip_prefix("tomorrow at ") {
        return Ok(TimeSpec::TomorrowAt(parse_hour(hour)?));
    }
    if let Some(hour) = s
        .strip_prefix("today at ")
        .or_else(|| s.strip_prefix("at "))
    {
        return Ok(TimeSpec::TodayAt(parse_hour(hour)?));
    }

    let relative = s.strip_prefix("in ").unwrap_or(s.as_str()).trim();
    if relative.ends_with(['s', 'm', 'h'])
        && relative[..relative.len() - 1].parse::<i64>().is_ok()
    {
        return Ok(TimeSpec::In(parse_duration(relative)?));
    }

    for format in DATETIME_FORMATS {
        if let Ok(target) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(TimeSpec::At(target));
        }
    }

    Err(ScheduleError::InvalidParameter(format!(
        "Unrecognized time: {}",
        raw
    )))
}

fn parse_duration(s: &str) -> Result<Duration> {
    let (num, unit) = s.split_at(s.len() - 1);
    let n: i64 = num
        .parse()
        .map_err(|_| ScheduleError::InvalidParameter(format!("Invalid amount: {}", num)))?;
    let unit = match unit {
        "s" => "seconds",
        "m" => "minutes",
        "h" => "hours",
        _ => unit,
    };
    relative_offset(n, unit)
}

fn relative_offset(value: i64, unit: &str) -> Result<Duration> {
    if value < 0 {
        return Err(ScheduleError::InvalidParameter(format!(
            "Relative offset must not be negative: {}",
            value
        )));
    }
    let offset = match unit {
        "seconds" => Duration::try_seconds(value),
        "minutes" => Duration::try_minutes(value),
        "hours" => Duration::try_hours(value),
        _ => {
            return Err(ScheduleError::InvalidParameter(format!(
                "Unsupported unit: {}",
                unit
            )))
        }
    };
    offset.ok_or_else(|| {
        ScheduleError::InvalidParameter(format!("Offset too large: {} {}", value, unit))
    })
}

fn out_of_range() -> ScheduleError {
    ScheduleError::InvalidParameter("Date out of range".to_string())
}

/// Hour of day, either `0`..`23` or `1`..`12` with an `am`/`pm` suffix.
fn parse_hour(s: &str) -> Result<u32> {
    let s = s.trim();
    let (digits, meridiem) = if let Some(d) = s.strip_suffix("am") {
        (d.trim(), Some(0))
    } else if let Some(d) = s.strip_suffix("pm") {
        (d.trim(), Some(12))
    } else {
        (s, None)
    };

    let value: i64 = digits
        .parse()
        .map_err(|_| ScheduleError::InvalidParameter(format!("Invalid hour: {}", s)))?;

    match meridiem {
        Some(offset) => {
            if !(1..=12).contains(&value) {
                return Err(ScheduleError::InvalidParameter(format!(
                    "Hour must be between 1 and 12 with am/pm: {}",
                    s
                )));
            }
            check_hour(value % 12 + offset)
        }
        None => check_hour(value),
    }
}

fn check_hour(value: i64) -> Result<u32> {
    if !(0..=23).contains(&value) {
        return Err(ScheduleError::InvalidParameter(format!(
            "Hour must be between 0 and 23, got {}",
            value
        )));
    }
    Ok(value as u32)
}

fn at_hour(date: NaiveDate, hour: u32) -> Result<NaiveDateTime> {
    date.and_hms_opt(hour, 0, 0)
        .ok_or_else(|| ScheduleError::InvalidParameter(format!("Invalid hour: {}", hour)))
}

/// Renders a countdown as `{d}d {h}h {m}m {s}s`; negative spans render as zero.
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ten_am() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn on(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn later_hour_stays_today() {
        let spec = TimeSpec::from_parts("absolute", 22, "seconds").unwrap();
        assert_eq!(spec.resolve(ten_am()).unwrap(), on(16, 22));
    }

    #[test]
    fn earlier_hour_rolls_to_tomorrow() {
        let spec = TimeSpec::from_parts("absolute", 2, "seconds").unwrap();
        assert_eq!(spec.resolve(ten_am()).unwrap(), on(17, 2));
    }

    #[test]
    fn current_hour_rolls_to_tomorrow() {
        let spec = TimeSpec::TodayAt(10);
        assert_eq!(spec.resolve(ten_am()).unwrap(), on(17, 10));
    }

    #[test]
    fn tomorrow_never_rolls() {
        assert_eq!(TimeSpec::TomorrowAt(22).resolve(ten_am()).unwrap(), on(17, 22));
    }

    #[test]
    fn out_of_range_hours_rejected() {
        for hour in [24, -1] {
            assert!(matches!(
                TimeSpec::from_parts("absolute", hour, "seconds"),
                Err(ScheduleError::InvalidParameter(_))
            ));
        }
        assert!(matches!(
            parse_time_spec("at 24"),
            Err(ScheduleError::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_time_spec("tomorrow at -1"),
            Err(ScheduleError::InvalidParameter(_))
        ));
    }

    #[test]
    fn unknown_type_or_unit_rejected() {
        assert!(matches!(
            TimeSpec::from_parts("relative", 5, "days"),
            Err(ScheduleError::InvalidParameter(_))
        ));
        assert!(matches!(
            TimeSpec::from_parts("sometime", 5, "seconds"),
            Err(ScheduleError::InvalidParameter(_))
        ));
        assert!(matches!(
            TimeSpec::from_parts("relative", -5, "seconds"),
            Err(ScheduleError::InvalidParameter(_))
        ));
    }

    #[test]
    fn relative_offsets() {
        let now = ten_am();
        assert_eq!(
            parse_time_spec("5s").unwrap().resolve(now).unwrap(),
            now + Duration::seconds(5)
        );
        assert_eq!(
            parse_time_spec("in 10m").unwrap().resolve(now).unwrap(),
            now + Duration::minutes(10)
        );
        assert_eq!(
            TimeSpec::from_parts("relative", 2, "hours").unwrap(),
            TimeSpec::In(Duration::hours(2))
        );
    }

    #[test]
    fn oversized_offsets_rejected() {
        assert!(matches!(
            parse_time_spec("99999999999999999h"),
            Err(ScheduleError::InvalidParameter(_))
        ));
        assert!(matches!(
            TimeSpec::from_parts("relative", i64::MAX, "seconds"),
            Err(ScheduleError::InvalidParameter(_))
        ));

        // Representable as an offset, but lands past the last representable date.
        let far = TimeSpec::In(Duration::days(100_000_000));
        assert!(matches!(far.resolve(ten_am()), Err(ScheduleError::InvalidParameter(_))));
    }

    #[test]
    fn parses_hour_forms() {
        assert_eq!(parse_time_spec("at 22").unwrap(), TimeSpec::TodayAt(22));
        assert_eq!(parse_time_spec("today at 10pm").unwrap(), TimeSpec::TodayAt(22));
        assert_eq!(parse_time_spec("Tomorrow at 2 AM").unwrap(), TimeSpec::TomorrowAt(2));
        assert_eq!(parse_time_spec("at 12am").unwrap(), TimeSpec::TodayAt(0));
        assert!(parse_time_spec("at 13pm").is_err());
    }

    #[test]
    fn parses_absolute_datetime() {
        assert_eq!(
            parse_time_spec("2026-10-17 02:00").unwrap(),
            TimeSpec::At(on(17, 2))
        );
        assert!(matches!(
            parse_time_spec("next week"),
            Err(ScheduleError::InvalidParameter(_))
        ));
    }

    #[test]
    fn countdown_format() {
        let remaining = Duration::days(1) + Duration::hours(2) + Duration::seconds(65);
        assert_eq!(format_remaining(remaining), "1d 2h 1m 5s");
        assert_eq!(format_remaining(Duration::seconds(-3)), "0d 0h 0m 0s");
    }
}
