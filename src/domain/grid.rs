use crate::domain::models::{Category, LoggableDay, RemoteEntry, TimeTableEntry, WeekRange};
use crate::domain::time_notation::to_short_iso_date;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

pub const DAYS_IN_GRID: usize = LoggableDay::ALL.len();

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidWeekRange {
    #[error("expected the date range to be 1 week ({expected} days), but it was {actual} day(s)")]
    WrongLength { expected: usize, actual: usize },
    #[error("expected the date range dates to be sorted ascendingly and unique")]
    NotSortedOrUnique,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("invalid week range: {0}")]
    InvalidWeekRange(#[from] InvalidWeekRange),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimeTableGrid {
    pub entries: Vec<TimeTableEntry>,
    pub unmapped_entries: Vec<TimeTableEntry>,
}

impl TimeTableGrid {
    pub fn cell(&self, category_name: &str, day: LoggableDay) -> Option<&TimeTableEntry> {
        self.entries
            .iter()
            .find(|entry| entry.category.name == category_name && entry.day_name == day)
    }

    pub fn cell_mut(&mut self, category_name: &str, day: LoggableDay) -> Option<&mut TimeTableEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.category.name == category_name && entry.day_name == day)
    }

    pub fn total_input_minutes(&self) -> u32 {
        sum_minutes(
            self.entries
                .iter()
                .chain(self.unmapped_entries.iter())
                .map(|entry| entry.input_minutes),
        )
    }
}

/// Saturates at `u32::MAX` instead of overflowing.
pub fn sum_minutes(minutes: impl IntoIterator<Item = u32>) -> u32 {
    minutes.into_iter().fold(0, u32::saturating_add)
}

pub fn validate_week_range(range: &WeekRange) -> Result<(), InvalidWeekRange> {
    if range.dates.len() != DAYS_IN_GRID {
        return Err(InvalidWeekRange::WrongLength {
            expected: DAYS_IN_GRID,
            actual: range.dates.len(),
        });
    }
    if range.dates.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(InvalidWeekRange::NotSortedOrUnique);
    }
    Ok(())
}

/// Builds one cell per (category, day), grouped by category in input order and
/// by date within each category, plus per-day totals of remote entries that
/// no category claimed.
pub fn build_grid(
    range: &WeekRange,
    categories: &[Category],
    remote_entries: &[RemoteEntry],
) -> Result<TimeTableGrid, GridError> {
    validate_week_range(range)?;

    let iso_dates = range
        .dates
        .iter()
        .map(|date| to_short_iso_date(*date))
        .collect::<Vec<_>>();

    let mut mapped_ids = HashSet::new();
    let mut entries = Vec::with_capacity(categories.len() * DAYS_IN_GRID);
    for category in categories {
        for (index, date) in range.dates.iter().enumerate() {
            let iso_date = &iso_dates[index];
            let initial_minutes = sum_minutes(
                remote_entries
                    .iter()
                    .filter(|remote| remote.is_for_on(category, iso_date))
                    .inspect(|remote| {
                        mapped_ids.insert(remote.id);
                    })
                    .map(|remote| remote.minutes),
            );

            entries.push(TimeTableEntry {
                date: *date,
                day_name: LoggableDay::ALL[index],
                category: category.clone(),
                initial_minutes,
                input_minutes: initial_minutes,
            });
        }
    }

    let unmapped = remote_entries
        .iter()
        .filter(|remote| !mapped_ids.contains(&remote.id))
        .collect::<Vec<_>>();
    if unmapped.is_empty() {
        return Ok(TimeTableGrid {
            entries,
            unmapped_entries: Vec::new(),
        });
    }

    tracing::debug!(count = unmapped.len(), "remote entries did not match any category");
    let unmapped_category = Category::unmapped();
    let unmapped_entries = range
        .dates
        .iter()
        .enumerate()
        .map(|(index, date)| {
            let total_minutes = sum_minutes(
                unmapped
                    .iter()
                    .filter(|remote| remote.date == iso_dates[index])
                    .map(|remote| remote.minutes),
            );
            TimeTableEntry {
                date: *date,
                day_name: LoggableDay::ALL[index],
                category: unmapped_category.clone(),
                initial_minutes: total_minutes,
                input_minutes: total_minutes,
            }
        })
        .collect();

    Ok(TimeTableGrid {
        entries,
        unmapped_entries,
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use chrono::NaiveDate;

    fn minutes_of(grid: &TimeTableGrid, category: &str) -> Vec<u32> {
        grid.entries
            .iter()
            .filter(|entry| entry.category.name == category)
            .map(|entry| entry.input_minutes)
            .collect()
    }

    #[test]
    fn rejects_unsorted_dates() {
        let mut range = test_week_range();
        range.dates.swap(0, 1);
        let result = build_grid(&range, &test_categories(), &[]);
        assert_eq!(
            result,
            Err(GridError::InvalidWeekRange(InvalidWeekRange::NotSortedOrUnique))
        );
    }

    #[test]
    fn rejects_ranges_that_are_not_one_week() {
        let mut range = test_week_range();
        range.dates.pop();
        let error = build_grid(&range, &test_categories(), &[]).expect_err("six days");
        assert_eq!(
            error,
            GridError::InvalidWeekRange(InvalidWeekRange::WrongLength {
                expected: 7,
                actual: 6
            })
        );
        assert!(error.to_string().contains("7"));
        assert!(error.to_string().contains("6 day(s)"));
    }

    #[test]
    fn rejects_duplicate_dates() {
        let mut range = test_week_range();
        range.dates[2] = range.dates[1];
        let result = build_grid(&range, &test_categories(), &[]);
        assert_eq!(
            result,
            Err(GridError::InvalidWeekRange(InvalidWeekRange::NotSortedOrUnique))
        );
    }

    #[test]
    fn entries_are_grouped_by_category_then_date() {
        let mut shuffled = average_workweek_entries();
        shuffled.reverse();
        let grid = build_grid(&test_week_range(), &test_categories(), &shuffled).expect("grid");

        assert_eq!(grid.entries.len(), 28);
        let expected_names = ["Development", "Vacation", "National holiday", "Presentation"];
        for (group, name) in expected_names.iter().enumerate() {
            for day in 0..7 {
                let entry = &grid.entries[group * 7 + day];
                assert_eq!(entry.category.name, *name);
                assert_eq!(entry.date, test_weekdays()[day]);
                assert_eq!(entry.day_name, LoggableDay::ALL[day]);
            }
        }
    }

    #[test]
    fn average_workweek_is_mapped() {
        let grid = build_grid(
            &test_week_range(),
            &test_categories(),
            &average_workweek_entries(),
        )
        .expect("grid");

        assert_eq!(minutes_of(&grid, "Development"), vec![480, 480, 420, 0, 480, 0, 0]);
        assert_eq!(minutes_of(&grid, "Vacation"), vec![0; 7]);
        assert_eq!(minutes_of(&grid, "National holiday"), vec![0, 0, 0, 480, 0, 0, 0]);
        assert_eq!(minutes_of(&grid, "Presentation"), vec![0, 0, 60, 0, 0, 0, 0]);
        assert!(grid.entries.iter().all(|entry| !entry.is_modified()));
        assert!(grid.unmapped_entries.is_empty());
    }

    #[test]
    fn vacation_week_is_mapped() {
        let grid = build_grid(
            &test_week_range(),
            &test_categories(),
            &vacation_week_entries(),
        )
        .expect("grid");

        assert_eq!(minutes_of(&grid, "Vacation"), vec![480, 480, 480, 480, 480, 0, 0]);
        assert_eq!(minutes_of(&grid, "Development"), vec![0; 7]);
    }

    #[test]
    fn single_entry_fills_exactly_one_cell() {
        let categories = test_categories()[..2].to_vec();
        let remote = vec![remote_entry(1, "2024-01-22", 480, 1, &["#Development"])];
        let grid = build_grid(&test_week_range(), &categories, &remote).expect("grid");

        assert_eq!(grid.entries.len(), 14);
        let monday = grid
            .cell("Development", LoggableDay::Monday)
            .expect("monday development cell");
        assert_eq!(monday.initial_minutes, 480);
        assert_eq!(monday.input_minutes, 480);
        let non_zero = grid
            .entries
            .iter()
            .filter(|entry| entry.input_minutes > 0)
            .count();
        assert_eq!(non_zero, 1);
    }

    #[test]
    fn multiple_entries_for_same_cell_are_summed() {
        let remote = vec![
            remote_entry(1, "2024-01-22", 120, 1, &["#Development"]),
            remote_entry(2, "2024-01-22", 90, 1, &["#Development"]),
        ];
        let grid = build_grid(&test_week_range(), &test_categories(), &remote).expect("grid");
        let monday = grid.cell("Development", LoggableDay::Monday).expect("cell");
        assert_eq!(monday.initial_minutes, 210);
    }

    #[test]
    fn entries_with_extra_tags_are_reported_as_unmapped() {
        let remote = vec![
            remote_entry(1, "2024-01-22", 480, 1, &["#Development"]),
            remote_entry(2, "2024-01-22", 60, 1, &["#Development", "#Special"]),
            remote_entry(3, "2024-01-24", 30, 99, &["#Development"]),
        ];
        let grid = build_grid(&test_week_range(), &test_categories(), &remote).expect("grid");

        assert_eq!(
            grid.cell("Development", LoggableDay::Monday)
                .expect("cell")
                .initial_minutes,
            480
        );
        assert_eq!(grid.unmapped_entries.len(), 7);
        let unmapped_minutes = grid
            .unmapped_entries
            .iter()
            .map(|entry| entry.input_minutes)
            .collect::<Vec<_>>();
        assert_eq!(unmapped_minutes, vec![60, 0, 30, 0, 0, 0, 0]);
        assert!(grid.unmapped_entries.iter().all(|entry| entry.category.readonly));
        assert!(
            grid.unmapped_entries
                .iter()
                .all(|entry| entry.category.name == crate::domain::models::UNMAPPED_CATEGORY_NAME)
        );
    }

    #[test]
    fn category_without_remote_identity_yields_zero_cells() {
        let mut categories = test_categories();
        categories[0].project_id = None;
        let grid = build_grid(
            &test_week_range(),
            &categories,
            &average_workweek_entries(),
        )
        .expect("grid");

        assert_eq!(minutes_of(&grid, "Development"), vec![0; 7]);
        assert_eq!(
            grid.unmapped_entries
                .iter()
                .map(|entry| entry.input_minutes)
                .collect::<Vec<_>>(),
            vec![480, 480, 420, 0, 480, 0, 0]
        );
    }

    #[test]
    fn entries_without_project_count_as_unmapped() {
        let mut without_project = remote_entry(2, "2024-01-22", 90, 1, &[]);
        without_project.project = None;
        let remote = vec![
            remote_entry(1, "2024-01-22", 480, 1, &["#Development"]),
            without_project,
        ];
        let grid = build_grid(&test_week_range(), &test_categories(), &remote).expect("grid");

        assert_eq!(
            grid.cell("Development", LoggableDay::Monday)
                .expect("cell")
                .initial_minutes,
            480
        );
        assert_eq!(grid.unmapped_entries[0].initial_minutes, 90);
        assert_eq!(grid.total_input_minutes(), 570);
    }

    #[test]
    fn minute_totals_saturate_instead_of_overflowing() {
        let remote = vec![
            remote_entry(1, "2024-01-22", u32::MAX, 1, &["#Development"]),
            remote_entry(2, "2024-01-22", 60, 1, &["#Development"]),
            remote_entry(3, "2024-01-23", u32::MAX - 1, 99, &["#Development"]),
            remote_entry(4, "2024-01-23", 10, 99, &["#Development"]),
        ];
        let grid = build_grid(&test_week_range(), &test_categories(), &remote).expect("grid");

        let monday = grid.cell("Development", LoggableDay::Monday).expect("cell");
        assert_eq!(monday.initial_minutes, u32::MAX);
        assert_eq!(grid.unmapped_entries[1].initial_minutes, u32::MAX);
        assert_eq!(grid.total_input_minutes(), u32::MAX);
    }

    #[test]
    fn empty_inputs_produce_empty_grid() {
        let grid = build_grid(&test_week_range(), &[], &[]).expect("grid");
        assert!(grid.entries.is_empty());
        assert!(grid.unmapped_entries.is_empty());
    }

    #[test]
    fn entries_outside_the_week_are_unmapped_but_not_counted_per_day() {
        let remote = vec![remote_entry(1, "2024-02-01", 60, 1, &["#Development"])];
        let grid = build_grid(&test_week_range(), &test_categories(), &remote).expect("grid");
        assert_eq!(grid.unmapped_entries.len(), 7);
        assert_eq!(grid.total_input_minutes(), 0);
    }

    #[test]
    fn grid_does_not_require_monday_start() {
        let dates = (0..7)
            .map(|offset| {
                NaiveDate::from_ymd_opt(2024, 1, 24).expect("valid date")
                    + chrono::Duration::days(offset)
            })
            .collect();
        let range = WeekRange {
            dates,
            week_number: 4,
            year: 2024,
        };
        let grid = build_grid(&range, &test_categories(), &[]).expect("grid");
        assert_eq!(grid.entries[0].day_name, LoggableDay::Monday);
    }
}
