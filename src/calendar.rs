use chrono::{Datelike, Duration, Months, NaiveDate};
use chrono_tz::Tz;

use crate::models::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarView {
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Prev,
    Next,
}

/// Short names offered by the settings view that are not IANA zone names (or
/// are fixed-offset zones where users mean the US regional time).
const TIMEZONE_ALIASES: &[(&str, Tz)] = &[
    ("UTC", Tz::UTC),
    ("GMT", Tz::GMT),
    ("PST", Tz::America__Los_Angeles),
    ("MST", Tz::America__Denver),
    ("CST", Tz::America__Chicago),
    ("EST", Tz::America__New_York),
];

pub fn parse_timezone(name: &str) -> Option<Tz> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    TIMEZONE_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map(|(_, tz)| *tz)
        .or_else(|| name.parse::<Tz>().ok())
}

/// Resolves a stored timezone name; unknown names fall back to UTC.
pub fn resolve_timezone(name: &str) -> Tz {
    parse_timezone(name).unwrap_or_else(|| {
        log::warn!("calendar: unknown timezone={name:?}, using UTC");
        Tz::UTC
    })
}

/// Zone name seeded into fresh settings: the OS zone, then `TZ`, then UTC.
pub fn system_timezone_name() -> String {
    let os_zone = match iana_time_zone::get_timezone() {
        Ok(zone) => Some(zone),
        Err(err) => {
            log::debug!("calendar: os timezone unavailable error={err}");
            None
        }
    };
    pick_system_timezone(os_zone, std::env::var("TZ").ok())
}

/// First candidate that names a known zone wins; `TZ` may carry a leading `:`.
fn pick_system_timezone(os_zone: Option<String>, tz_var: Option<String>) -> String {
    let tz_var = tz_var.map(|value| value.trim().trim_start_matches(':').to_string());
    [os_zone, tz_var]
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| parse_timezone(value).is_some())
        .unwrap_or_else(|| "UTC".to_string())
}

pub fn tasks_on(tasks: &[Task], date: NaiveDate, tz: Tz) -> Vec<Task> {
    tasks
        .iter()
        .filter(|task| task.deadline_date(tz) == Some(date))
        .cloned()
        .collect()
}

/// Tasks due between `start` and `end`, both inclusive. An inverted range is empty.
pub fn tasks_between(tasks: &[Task], start: NaiveDate, end: NaiveDate, tz: Tz) -> Vec<Task> {
    tasks
        .iter()
        .filter(|task| match task.deadline_date(tz) {
            Some(day) => day >= start && day <= end,
            None => false,
        })
        .cloned()
        .collect()
}

/// Monday through Sunday of the week containing `date`.
pub fn week_of(date: NaiveDate) -> Vec<NaiveDate> {
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
    monday.iter_days().take(7).collect()
}

pub fn month_grid(date: NaiveDate) -> Vec<NaiveDate> {
    let first = date.with_day(1).unwrap_or(date);
    first
        .iter_days()
        .take_while(|day| day.month() == first.month())
        .collect()
}

/// Number of deadlines per month of `year`, January first.
pub fn year_summary(tasks: &[Task], year: i32, tz: Tz) -> [usize; 12] {
    let mut counts = [0usize; 12];
    for day in tasks.iter().filter_map(|task| task.deadline_date(tz)) {
        if day.year() == year {
            counts[day.month0() as usize] += 1;
        }
    }
    counts
}

/// Moves the calendar anchor one period back or forward. Month and year steps
/// clamp the day to the length of the target month.
pub fn shift(date: NaiveDate, view: CalendarView, direction: Direction) -> NaiveDate {
    let shifted = match (view, direction) {
        (CalendarView::Week, Direction::Prev) => date.checked_sub_signed(Duration::days(7)),
        (CalendarView::Week, Direction::Next) => date.checked_add_signed(Duration::days(7)),
        (CalendarView::Month, Direction::Prev) => date.checked_sub_months(Months::new(1)),
        (CalendarView::Month, Direction::Next) => date.checked_add_months(Months::new(1)),
        (CalendarView::Year, Direction::Prev) => date.checked_sub_months(Months::new(12)),
        (CalendarView::Year, Direction::Next) => date.checked_add_months(Months::new(12)),
    };
    shifted.unwrap_or(date)
}
