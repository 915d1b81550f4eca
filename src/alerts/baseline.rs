use chrono::{Days, NaiveDate};

/// Mean daily mention count over the `days` days before `date`.
///
/// A symbol first seen less than `days` ago averages over the days since its
/// first recorded day. Days without a row count as zero. Returns None when the
/// symbol has no earlier history or the mean is zero.
pub fn rolling_baseline(
    first_day: Option<NaiveDate>,
    window: &[(NaiveDate, i64)],
    date: NaiveDate,
    days: u32,
) -> Option<f64> {
    let first_day = first_day.filter(|d| *d < date)?;
    let window_start = date.checked_sub_days(Days::new(u64::from(days)))?;
    let start = window_start.max(first_day);
    let span = (date - start).num_days();
    if span <= 0 {
        return None;
    }
    let total: i64 = window
        .iter()
        .filter(|(d, _)| *d >= start && *d < date)
        .map(|(_, count)| count)
        .sum();
    let mean = total as f64 / span as f64;
    (mean > 0.0).then_some(mean)
}

/// Percent change of `current` over `baseline`; None without a baseline.
pub fn percent_change(current: i64, baseline: Option<f64>) -> Option<f64> {
    baseline.map(|b| (current as f64 - b) / b * 100.0)
}
