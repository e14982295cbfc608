use chrono::{Datelike, NaiveDate};
use tracing::info;

use crate::models::DateWindow;

/// Strip spaces, periods, and commas from an institution display name so it
/// can be embedded in the company directory name.
pub fn sanitize_company_name(name: &str) -> String {
    name.chars().filter(|c| !matches!(c, ' ' | '.' | ',')).collect()
}

/// Compute the query window: January 1st of `start_year` when configured,
/// otherwise today minus exactly three years.
pub fn calculate_window(start_year: Option<i32>, today: NaiveDate) -> DateWindow {
    let (start, label) = match start_year {
        Some(year) => (
            NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(today),
            "fixed start year",
        ),
        None => (shift_years_back(today, 3), "3-year rolling window"),
    };

    let total_days = (today - start).num_days();
    info!(
        "{label}: {start} to {today} ({total_days} days, ~{:.1} years)",
        total_days as f64 / 365.25
    );

    DateWindow { start, end: today }
}

fn shift_years_back(date: NaiveDate, years: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year() - years, date.month(), date.day()).unwrap_or_else(|| {
        // Feb 29 with no counterpart in the target year clamps to Feb 28.
        NaiveDate::from_ymd_opt(date.year() - years, date.month(), date.day() - 1)
            .unwrap_or(date)
    })
}
