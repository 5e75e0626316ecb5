//! Reporting-week and deadline calendar math.
//!
//! Pure functions over `NaiveDateTime` so every rule is unit-testable without
//! touching the wall clock; callers pass `Local::now().naive_local()`.
//!
//! Week numbering follows the platform convention: week N covers the Nth
//! seven-day span counted from Jan 1 of the current year (ceiling division),
//! and the submission deadline for a week is the most recent Monday at local
//! midnight. Day-of-week indexing is counted from Sunday, matching the
//! platform's existing wire data.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

const WEEK_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Current reporting week: ceil(seconds since Jan 1 of `now`'s year / one week).
///
/// Jan 1 00:00:01 is week 1; any instant past midnight on Jan 8 is week 2.
pub fn reporting_week(now: NaiveDateTime) -> u32 {
    let jan_first = NaiveDate::from_ymd_opt(now.year(), 1, 1)
        .expect("Jan 1 exists in every year")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time");
    let elapsed = (now - jan_first).num_seconds().max(0);
    elapsed.div_ceil(WEEK_SECONDS) as u32
}

/// The submission deadline boundary: the most recent Monday (today, if today
/// is Monday), as a date — interpreted as local midnight.
pub fn most_recent_monday(now: NaiveDateTime) -> NaiveDate {
    let days_back = (now.weekday().num_days_from_sunday() + 6) % 7;
    now.date() - Duration::days(i64::from(days_back))
}

/// The next weekly-broadcast instant: the upcoming Monday at 09:00.
///
/// When `now` is a Monday the result is *today* 09:00, which may already be
/// in the past; `delay_until_weekly_run` clamps that to a fire-now zero delay.
pub fn next_weekly_run(now: NaiveDateTime) -> NaiveDateTime {
    let days_ahead = (8 - i64::from(now.weekday().num_days_from_sunday())).rem_euclid(7);
    (now.date() + Duration::days(days_ahead))
        .and_hms_opt(9, 0, 0)
        .expect("09:00 is a valid time")
}

/// Delay from `now` until the next weekly broadcast, clamped to zero.
pub fn delay_until_weekly_run(now: NaiveDateTime) -> std::time::Duration {
    (next_weekly_run(now) - now).to_std().unwrap_or_default()
}

/// Render a deadline date the way notification bodies cite it,
/// e.g. `"Mon Jan 01 2024"`.
pub fn format_deadline(date: NaiveDate) -> String {
    date.format("%a %b %d %Y").to_string()
}
