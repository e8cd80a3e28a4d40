use crate::domain::models::WeekRange;
use chrono::{Datelike, Days, NaiveDate};

const DAYS_PER_WEEK: u64 = 7;

/// ISO 8601 week number (Monday first, Thursday anchored).
pub fn iso_week_number(date: NaiveDate) -> u32 {
    date.iso_week().week()
}

/// The Monday..Sunday week containing `reference`.
///
/// `year` is the calendar year of the earliest date in the range, so
/// 2022-01-01 yields week 52 of 2021.
pub fn week_range_for(reference: NaiveDate) -> WeekRange {
    let week_number = iso_week_number(reference);

    let mut dates = Vec::with_capacity(DAYS_PER_WEEK as usize);
    for offset in 1..DAYS_PER_WEEK {
        match reference.checked_sub_days(Days::new(offset)) {
            Some(candidate) if iso_week_number(candidate) == week_number => dates.push(candidate),
            _ => break,
        }
    }
    dates.reverse();
    dates.push(reference);
    for offset in 1..DAYS_PER_WEEK {
        match reference.checked_add_days(Days::new(offset)) {
            Some(candidate) if iso_week_number(candidate) == week_number => dates.push(candidate),
            _ => break,
        }
    }

    let year = dates
        .first()
        .map(|date| date.year())
        .unwrap_or_else(|| reference.year());

    WeekRange {
        dates,
        week_number,
        year,
    }
}
