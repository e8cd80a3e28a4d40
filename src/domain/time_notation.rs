use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

const MINUTES_PER_HOUR: u32 = 60;
const HOURS_UNIT: &str = "u";
const MINUTES_UNIT: &str = "m";

pub const REQUIRED_FIELD_MESSAGE: &str = "Dit veld is verplicht";
pub const UNSUPPORTED_TIME_NOTATION_MESSAGE: &str = "Niet ondersteunde tijdsnotatie";

static HOURS_AND_MINUTES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+)[hu]\s*([0-9]+)m$").expect("hardcoded regex should be valid")
});
static HOURS_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)[hu]$").expect("hardcoded regex should be valid"));
static MINUTES_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)m$").expect("hardcoded regex should be valid"));
static COLON_SEPARATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]?[0-9]):([0-5][0-9])$").expect("hardcoded regex should be valid")
});
static BARE_HOURS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)$").expect("hardcoded regex should be valid"));

pub fn to_short_iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn to_short_dutch_date(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

/// `130` → `"2u10m"`, `0` → `""`.
pub fn to_hours_minutes_notation(minutes: u32) -> String {
    let hours = minutes / MINUTES_PER_HOUR;
    let remainder = minutes % MINUTES_PER_HOUR;
    let mut result = String::new();
    if hours > 0 {
        result.push_str(&format!("{hours}{HOURS_UNIT}"));
    }
    if remainder > 0 {
        result.push_str(&format!("{remainder}{MINUTES_UNIT}"));
    }
    result
}

pub fn to_colon_separated_time(minutes: u32) -> String {
    format!(
        "{:02}:{:02}",
        minutes / MINUTES_PER_HOUR,
        minutes % MINUTES_PER_HOUR
    )
}

/// Turns user input into minutes. Accepts suffix notation, colon notation or
/// a bare number of hours.
pub fn try_parse_time_notation(value: &str) -> Option<u32> {
    if let Some(minutes) = try_parse_suffix_time_notation(value) {
        return Some(minutes);
    }
    if let Some(minutes) = try_parse_colon_time_notation(value) {
        return Some(minutes);
    }
    let captures = BARE_HOURS.captures(value.trim())?;
    hours_to_minutes(&captures[1])
}

pub fn try_parse_suffix_time_notation(value: &str) -> Option<u32> {
    let trimmed = value.trim();
    if let Some(captures) = HOURS_AND_MINUTES.captures(trimmed) {
        let hours = hours_to_minutes(&captures[1])?;
        let minutes = captures[2].parse::<u32>().ok()?;
        return hours.checked_add(minutes);
    }
    if let Some(captures) = HOURS_ONLY.captures(trimmed) {
        return hours_to_minutes(&captures[1]);
    }
    let captures = MINUTES_ONLY.captures(trimmed)?;
    captures[1].parse::<u32>().ok()
}

pub fn try_parse_colon_time_notation(value: &str) -> Option<u32> {
    let captures = COLON_SEPARATED.captures(value.trim())?;
    let hours = hours_to_minutes(&captures[1])?;
    let minutes = captures[2].parse::<u32>().ok()?;
    Some(hours + minutes)
}

/// Empty string when valid.
pub fn required_input_message(value: &str) -> &'static str {
    if value.is_empty() {
        REQUIRED_FIELD_MESSAGE
    } else {
        ""
    }
}

pub fn optional_time_input_message(value: &str) -> &'static str {
    if !value.is_empty() && try_parse_time_notation(value).is_none() {
        UNSUPPORTED_TIME_NOTATION_MESSAGE
    } else {
        ""
    }
}

fn hours_to_minutes(digits: &str) -> Option<u32> {
    digits.parse::<u32>().ok()?.checked_mul(MINUTES_PER_HOUR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn formats_dates() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).expect("valid date");
        assert_eq!(to_short_iso_date(date), "2024-03-07");
        assert_eq!(to_short_dutch_date(date), "07-03-2024");
    }

    #[test]
    fn formats_hours_minutes_notation() {
        assert_eq!(to_hours_minutes_notation(0), "");
        assert_eq!(to_hours_minutes_notation(1), "1m");
        assert_eq!(to_hours_minutes_notation(59), "59m");
        assert_eq!(to_hours_minutes_notation(60), "1u");
        assert_eq!(to_hours_minutes_notation(130), "2u10m");
        assert_eq!(to_hours_minutes_notation(1500), "25u");
    }

    #[test]
    fn formats_colon_separated_time() {
        assert_eq!(to_colon_separated_time(0), "00:00");
        assert_eq!(to_colon_separated_time(130), "02:10");
        assert_eq!(to_colon_separated_time(600), "10:00");
    }

    #[test]
    fn parses_suffix_notation() {
        assert_eq!(try_parse_suffix_time_notation("1h30m"), Some(90));
        assert_eq!(try_parse_suffix_time_notation("1u30m"), Some(90));
        assert_eq!(try_parse_suffix_time_notation(" 2u 5m "), Some(125));
        assert_eq!(try_parse_suffix_time_notation("8h"), Some(480));
        assert_eq!(try_parse_suffix_time_notation("45m"), Some(45));
        assert_eq!(try_parse_suffix_time_notation("1:30"), None);
        assert_eq!(try_parse_suffix_time_notation("h30m"), None);
        assert_eq!(try_parse_suffix_time_notation("1m30h"), None);
    }

    #[test]
    fn parses_colon_notation() {
        assert_eq!(try_parse_colon_time_notation("9:35"), Some(575));
        assert_eq!(try_parse_colon_time_notation("0:30"), Some(30));
        assert_eq!(try_parse_colon_time_notation("10:00"), Some(600));
        assert_eq!(try_parse_colon_time_notation("1:60"), None);
        assert_eq!(try_parse_colon_time_notation("100:00"), None);
        assert_eq!(try_parse_colon_time_notation("1:5"), None);
    }

    #[test]
    fn parses_any_supported_notation() {
        assert_eq!(try_parse_time_notation("1h30m"), Some(90));
        assert_eq!(try_parse_time_notation("1:30"), Some(90));
        assert_eq!(try_parse_time_notation("2"), Some(120));
        assert_eq!(try_parse_time_notation(" 0 "), Some(0));
        assert_eq!(try_parse_time_notation(""), None);
        assert_eq!(try_parse_time_notation("1.5"), None);
        assert_eq!(try_parse_time_notation("abc"), None);
        assert_eq!(try_parse_time_notation("-1"), None);
    }

    #[test]
    fn overflowing_input_is_rejected() {
        assert_eq!(try_parse_time_notation("99999999999"), None);
        assert_eq!(try_parse_time_notation("99999999h"), None);
    }

    #[test]
    fn validation_messages() {
        assert_eq!(required_input_message(""), REQUIRED_FIELD_MESSAGE);
        assert_eq!(required_input_message("x"), "");
        assert_eq!(optional_time_input_message(""), "");
        assert_eq!(optional_time_input_message("1u"), "");
        assert_eq!(
            optional_time_input_message("anderhalf"),
            UNSUPPORTED_TIME_NOTATION_MESSAGE
        );
    }

    proptest! {
        #[test]
        fn hours_minutes_notation_parses_back(minutes in 1u32..100_000) {
            let notation = to_hours_minutes_notation(minutes);
            prop_assert_eq!(try_parse_time_notation(&notation), Some(minutes));
        }

        #[test]
        fn colon_time_parses_back(minutes in 0u32..(100 * 60)) {
            let notation = to_colon_separated_time(minutes);
            prop_assert_eq!(try_parse_time_notation(&notation), Some(minutes));
        }
    }
}
