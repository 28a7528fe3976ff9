//! Human-readable renderings of delays and fire times.

use chrono::{Local, TimeZone};

const UNITS: [(u64, &str); 3] = [(3600, "hour"), (60, "minute"), (1, "second")];

/// Renders a delay as e.g. `"1 hour, 1 minute and 1 second"`.
///
/// Sub-second remainders are dropped and zero-valued units are omitted, so
/// anything under one second renders as an empty string.
pub fn humanize_millis(millis: u64) -> String {
    let mut remaining = millis / 1000;
    let mut parts = Vec::new();

    for (unit_secs, name) in UNITS {
        let value = remaining / unit_secs;
        remaining %= unit_secs;
        if value > 0 {
            parts.push(pluralize(value, name));
        }
    }

    match parts.as_slice() {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

fn pluralize(value: u64, unit: &str) -> String {
    if value == 1 {
        format!("{} {}", value, unit)
    } else {
        format!("{} {}s", value, unit)
    }
}

/// 24-hour `HH:MM` in the local time zone.
pub fn clock_time(epoch_millis: i64) -> String {
    clock_time_in(epoch_millis, &Local)
}

pub fn clock_time_in<Tz: TimeZone>(epoch_millis: i64, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match tz.timestamp_millis_opt(epoch_millis).earliest() {
        Some(time) => time.format("%H:%M").to_string(),
        None => String::from("--:--"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn test_humanize_examples() {
        assert_eq!(humanize_millis(0), "");
        assert_eq!(humanize_millis(1000), "1 second");
        assert_eq!(humanize_millis(61_000), "1 minute and 1 second");
        assert_eq!(humanize_millis(3_661_000), "1 hour, 1 minute and 1 second");
        assert_eq!(humanize_millis(3_600_000), "1 hour");
        assert_eq!(humanize_millis(7_200_000), "2 hours");
    }

    #[test]
    fn test_humanize_partial_units() {
        assert_eq!(humanize_millis(999), "");
        assert_eq!(humanize_millis(1_999), "1 second");
        assert_eq!(humanize_millis(3_660_000), "1 hour and 1 minute");
        assert_eq!(humanize_millis(3_605_000), "1 hour and 5 seconds");
        assert_eq!(humanize_millis(600_000), "10 minutes");
        assert_eq!(humanize_millis(90_061_000), "25 hours, 1 minute and 1 second");
    }

    #[test]
    fn test_clock_time_is_24_hour() {
        // 2023-11-14T22:13:20Z
        let millis = 1_700_000_000_000;
        assert_eq!(clock_time_in(millis, &Utc), "22:13");

        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(clock_time_in(millis, &plus_two), "00:13");
    }
}
