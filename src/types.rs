use derive_more::{Display, From, FromStr, Into};
use serde::{Deserialize, Serialize};
use time::Date;
use time::macros::format_description;

use crate::error::Error;

/// Vendor pupil identifier (`Pupil.Id`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[serde(transparent)]
pub struct PupilId(pub i64);

/// Constituent unit (school) identifier (`ConstituentUnit.Id`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[serde(transparent)]
pub struct ConstituentId(pub i64);

/// Reporting unit identifier (`Unit.Id`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[serde(transparent)]
pub struct UnitId(pub i64);

/// Grading period identifier (`Periods[].Id`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[serde(transparent)]
pub struct PeriodId(pub i64);

/// Message folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageBox {
    Received,
    Sent,
    Deleted,
}

impl MessageBox {
    /// Path segment of the folder's endpoint.
    #[must_use]
    pub fn as_path(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Sent => "sent",
            Self::Deleted => "deleted",
        }
    }
}

impl TryFrom<u8> for MessageBox {
    type Error = Error;

    /// `0` received, `1` sent, `2` deleted.
    fn try_from(kind: u8) -> Result<Self, Self::Error> {
        match kind {
            0 => Ok(Self::Received),
            1 => Ok(Self::Sent),
            2 => Ok(Self::Deleted),
            other => Err(Error::InvalidArgument(format!("unknown message box {other}"))),
        }
    }
}

/// Inclusive date range of a resource query.
///
/// `from` is never after `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    from: Date,
    to: Date,
}

impl DateRange {
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `from` is after `to`.
    pub fn new(from: Date, to: Date) -> Result<Self, Error> {
        if from > to {
            return Err(Error::InvalidArgument(format!(
                "date range starts after it ends ({from} > {to})"
            )));
        }
        Ok(Self { from, to })
    }

    #[must_use]
    pub fn day(day: Date) -> Self {
        Self { from: day, to: day }
    }

    /// Builds a range from `YYYY-MM-DD` query parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDateRange`] if either bound is absent or blank,
    /// [`Error::InvalidArgument`] if a bound does not parse or the range is inverted.
    pub fn from_query(from: Option<&str>, to: Option<&str>) -> Result<Self, Error> {
        let from = from.map(str::trim).filter(|s| !s.is_empty());
        let to = to.map(str::trim).filter(|s| !s.is_empty());
        let (Some(from), Some(to)) = (from, to) else {
            return Err(Error::MissingDateRange);
        };
        Self::new(parse_day(from)?, parse_day(to)?)
    }

    #[must_use]
    pub fn from(&self) -> Date {
        self.from
    }

    #[must_use]
    pub fn to(&self) -> Date {
        self.to
    }
}

/// `YYYY-MM-DD`
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `day` cannot be formatted.
pub fn format_day(day: Date) -> Result<String, Error> {
    day.format(format_description!("[year]-[month]-[day]"))
        .map_err(|e| Error::InvalidArgument(format!("unformattable date: {e}")))
}

fn parse_day(day: &str) -> Result<Date, Error> {
    Date::parse(day, format_description!("[year]-[month]-[day]"))
        .map_err(|e| Error::InvalidArgument(format!("invalid date {day:?}: {e}")))
}
