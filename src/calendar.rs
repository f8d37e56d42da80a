//! Date and month arithmetic.
//!
//! Everything is computed from a [`Calendar`] built off an injected clock, so
//! "today" is fixed for the lifetime of one invocation.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};

use crate::clock::Clock;
use crate::error::{Error, Result};

pub const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Calendar view of a single instant in the roster's local time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    today: NaiveDate,
}

impl Calendar {
    pub fn new(clock: &dyn Clock, offset: FixedOffset) -> Self {
        Self::at(clock.now(), offset)
    }

    pub fn at(instant: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            today: instant.with_timezone(&offset).date_naive(),
        }
    }

    pub fn from_date(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Day of month, 1-based.
    pub fn day(&self) -> u32 {
        self.today.day()
    }

    /// Month, 1-based.
    pub fn month(&self) -> u32 {
        self.today.month()
    }

    pub fn year(&self) -> i32 {
        self.today.year()
    }

    /// (year, month) of the month after today, rolling over December.
    pub fn next_month(&self) -> (i32, u32) {
        if self.month() == 12 {
            (self.year() + 1, 1)
        } else {
            (self.year(), self.month() + 1)
        }
    }

    pub fn next_year(&self) -> i32 {
        self.year() + 1
    }
}

/// The day the yearly housekeeping trigger fires.
pub fn year_end(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 12, 10)
}

/// Full month name for a 1-based month. Out-of-range months clamp to December.
pub fn month_name(month: u32) -> &'static str {
    MONTHS[(month.clamp(1, 12) - 1) as usize]
}

pub fn short_month(month: u32) -> &'static str {
    &month_name(month)[..3]
}

/// 1-based month index for a full or three-letter month name.
pub fn month_index(name: &str) -> Result<u32> {
    let name = name.trim();
    let prefix = name.get(..3).unwrap_or(name);
    MONTHS
        .iter()
        .position(|m| m[..3].eq_ignore_ascii_case(prefix))
        .map(|i| i as u32 + 1)
        .ok_or_else(|| Error::Validation(format!("month is not in the correct name: {name}")))
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Days in a month. `month` is 1-based.
pub fn days_in_month(year: i32, month: u32) -> Result<u32> {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => Ok(31),
        4 | 6 | 9 | 11 => Ok(30),
        2 if is_leap_year(year) => Ok(29),
        2 => Ok(28),
        _ => Err(Error::Validation(format!("month out of range: {month}"))),
    }
}

/// "1 Jun" style label used on roster and availability date axes.
pub fn date_label(date: NaiveDate) -> String {
    format!("{} {}", date.day(), short_month(date.month()))
}

/// "Jun 26" style sheet name used in individual spreadsheets.
pub fn month_sheet_name(year: i32, month: u32) -> String {
    format!("{} {:02}", short_month(month), year.rem_euclid(100))
}
