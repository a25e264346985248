//! Reporting window arithmetic on ISO calendar weeks.
//!
//! A run covers the span from 3 ISO weeks ago up to the current week. The
//! window is computed once at run start and held fixed for the whole run so
//! a week boundary crossing mid-run cannot split the steps across two
//! different windows.

use chrono::{Datelike, NaiveDate};

/// Number of ISO weeks the reporting window reaches into the past.
pub const WINDOW_WEEKS: u32 = 3;

/// An ISO year/week pair plus the pair exactly [`WINDOW_WEEKS`] earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingWindow {
    pub current_year: i32,
    pub current_week: u32,
    pub start_year: i32,
    pub start_week: u32,
}

impl ReportingWindow {
    /// Window for the ISO week containing `date`.
    pub fn for_date(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        Self::from_iso(iso.year(), iso.week())
    }

    /// Window for an explicit ISO year/week pair.
    ///
    /// `week` must be a valid week of `year` (1 to 52 or 53); anything else
    /// is a caller bug, not a runtime condition.
    pub fn from_iso(year: i32, week: u32) -> Self {
        let (start_year, start_week) = weeks_earlier(year, week, WINDOW_WEEKS);
        Self {
            current_year: year,
            current_week: week,
            start_year,
            start_week,
        }
    }
}

/// The ISO year/week pair exactly `n` weeks before `(year, week)`.
///
/// When the subtraction leaves the current ISO year, the previous year's
/// real week count is used. ISO years have 53 weeks iff their December 28
/// falls into week 53, so the count is read off that date rather than
/// assumed to be 52.
fn weeks_earlier(year: i32, week: u32, n: u32) -> (i32, u32) {
    if week > n {
        (year, week - n)
    } else {
        let previous_year = year - 1;
        (previous_year, weeks_in_iso_year(previous_year) - (n - week))
    }
}

/// Number of ISO weeks (52 or 53) in `year`.
pub fn weeks_in_iso_year(year: i32) -> u32 {
    NaiveDate::from_ymd_opt(year, 12, 28)
        .expect("december 28th exists in every year")
        .iso_week()
        .week()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, Weekday};

    #[test]
    fn test_window_without_rollover() {
        let window = ReportingWindow::from_iso(2023, 34);
        assert_eq!((window.start_year, window.start_week), (2023, 31));
    }

    #[test]
    fn test_window_rolls_into_previous_year() {
        // 2024 has 52 ISO weeks (checked below via the Dec-28 rule).
        assert_eq!(weeks_in_iso_year(2024), 52);
        let window = ReportingWindow::from_iso(2025, 1);
        assert_eq!((window.start_year, window.start_week), (2024, 50));
        let window = ReportingWindow::from_iso(2025, 2);
        assert_eq!((window.start_year, window.start_week), (2024, 51));
    }

    #[test]
    fn test_window_rolls_into_53_week_year() {
        // 2020 is a 53-week ISO year.
        assert_eq!(weeks_in_iso_year(2020), 53);
        let window = ReportingWindow::from_iso(2021, 1);
        assert_eq!((window.start_year, window.start_week), (2020, 51));
        let window = ReportingWindow::from_iso(2021, 3);
        assert_eq!((window.start_year, window.start_week), (2020, 53));
    }

    #[test]
    fn test_window_start_of_year_boundary_week() {
        // Week 4 is the first week that stays within its own year.
        let window = ReportingWindow::from_iso(2025, 4);
        assert_eq!((window.start_year, window.start_week), (2025, 1));
    }

    /// Adding the window width back onto the start pair must reproduce the
    /// current pair, for every week of several years around leap and
    /// 53-week boundaries.
    #[test]
    fn test_window_round_trips_through_date_arithmetic() {
        for year in 2019..=2027 {
            for week in 1..=weeks_in_iso_year(year) {
                let window = ReportingWindow::from_iso(year, week);
                let start_monday = NaiveDate::from_isoywd_opt(
                    window.start_year,
                    window.start_week,
                    Weekday::Mon,
                )
                .unwrap();
                let forward = start_monday
                    .checked_add_days(Days::new(u64::from(WINDOW_WEEKS) * 7))
                    .unwrap();
                let iso = forward.iso_week();
                assert_eq!(
                    (iso.year(), iso.week()),
                    (year, week),
                    "window {window:?} does not round-trip"
                );
            }
        }
    }

    #[test]
    fn test_for_date_uses_iso_week_of_date() {
        // 2024-12-30 is a Monday belonging to ISO week 1 of 2025.
        let date = NaiveDate::from_ymd_opt(2024, 12, 30).unwrap();
        let window = ReportingWindow::for_date(date);
        assert_eq!((window.current_year, window.current_week), (2025, 1));
        assert_eq!((window.start_year, window.start_week), (2024, 50));
    }
}
