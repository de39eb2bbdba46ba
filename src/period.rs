//! Calendar periods and date helpers.
//!
//! A [`Period`] is a named date range relative to "today", or a custom
//! range. Bounds are inclusive on both ends and weeks start on Monday.
//!
//! [`resolve_period`] is the inverse of [`Period::bounds`]: a range that
//! matches a named period exactly resolves to that period, any other range
//! resolves to [`Period::Custom`] with its bounds unchanged.

use std::fmt;

use time::{
    format_description::{well_known::Rfc3339, FormatItem},
    macros::format_description,
    Date, Duration, Month, OffsetDateTime,
};

use crate::error::{Error, Result};

/// `YYYY-MM-DD`
const ISO_DATE: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Period {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    ThisYear,
    LastYear,
    Custom { from: Date, until: Date },
}

impl Period {
    /// Named periods in resolution order.
    pub const PREDEFINED: [Self; 8] = [
        Self::Today,
        Self::Yesterday,
        Self::ThisWeek,
        Self::LastWeek,
        Self::ThisMonth,
        Self::LastMonth,
        Self::ThisYear,
        Self::LastYear,
    ];

    /// Inclusive first and last day of the period as seen on `today`.
    ///
    /// # Errors
    ///
    /// Returns a date parse error when the period falls outside the
    /// representable calendar.
    pub fn bounds(self, today: Date) -> Result<(Date, Date)> {
        match self {
            Self::Today => Ok((today, today)),
            Self::Yesterday => {
                let yesterday = days_before(today, 1)?;
                Ok((yesterday, yesterday))
            }
            Self::ThisWeek => week_of(today),
            Self::LastWeek => week_of(days_before(today, 7)?),
            Self::ThisMonth => month_of(today.year(), today.month()),
            Self::LastMonth => {
                let year = if today.month() == Month::January {
                    today.year() - 1
                } else {
                    today.year()
                };
                month_of(year, today.month().previous())
            }
            Self::ThisYear => year_of(today.year()),
            Self::LastYear => year_of(today.year() - 1),
            Self::Custom { from, until } => Ok((from, until)),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Today => write!(f, "today"),
            Self::Yesterday => write!(f, "yesterday"),
            Self::ThisWeek => write!(f, "this week"),
            Self::LastWeek => write!(f, "last week"),
            Self::ThisMonth => write!(f, "this month"),
            Self::LastMonth => write!(f, "last month"),
            Self::ThisYear => write!(f, "this year"),
            Self::LastYear => write!(f, "last year"),
            Self::Custom { from, until } => write!(f, "{from} to {until}"),
        }
    }
}

/// Names the range `from..=until` as seen on `today`.
#[must_use]
pub fn resolve_period(from: Date, until: Date, today: Date) -> Period {
    Period::PREDEFINED
        .into_iter()
        .find(|period| {
            period
                .bounds(today)
                .is_ok_and(|bounds| bounds == (from, until))
        })
        .unwrap_or(Period::Custom { from, until })
}

fn days_before(date: Date, days: i64) -> Result<Date> {
    date.checked_sub(Duration::days(days))
        .ok_or_else(|| Error::date_parse(format!("{days} days before {date} is out of range")))
}

fn week_of(date: Date) -> Result<(Date, Date)> {
    let monday = days_before(date, date.weekday().number_days_from_monday().into())?;
    let sunday = monday
        .checked_add(Duration::days(6))
        .ok_or_else(|| Error::date_parse(format!("week of {date} is out of range")))?;
    Ok((monday, sunday))
}

fn month_of(year: i32, month: Month) -> Result<(Date, Date)> {
    let first = Date::from_calendar_date(year, month, 1)?;
    let last = Date::from_calendar_date(year, month, month.length(year))?;
    Ok((first, last))
}

fn year_of(year: i32) -> Result<(Date, Date)> {
    let first = Date::from_calendar_date(year, Month::January, 1)?;
    let last = Date::from_calendar_date(year, Month::December, 31)?;
    Ok((first, last))
}

/// Parses an ISO `YYYY-MM-DD` date.
pub fn parse_date(input: &str) -> Result<Date> {
    Date::parse(input, ISO_DATE).map_err(Into::into)
}

/// Formats a date as ISO `YYYY-MM-DD`.
pub fn format_date(date: Date) -> Result<String> {
    date.format(ISO_DATE).map_err(Into::into)
}

/// Parses an RFC 3339 timestamp such as `2024-03-01T12:00:00Z`.
pub fn parse_timestamp(input: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(input, &Rfc3339).map_err(Into::into)
}
