// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ScheduleParseError};

/// The `23:59` end-of-day sentinel used for open-ended outages.
#[must_use]
pub fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN)
}

// ============================================================================
// QueueId
// ============================================================================

/// A rotation group such as `4` or `4.1`.
///
/// # Examples
///
/// ```
/// use mainswatch::schedule::QueueId;
///
/// let queue: QueueId = "4.1".parse().unwrap();
/// assert_eq!(queue.group(), 4);
/// assert_eq!(queue.sub(), Some(1));
/// assert!(queue.covers(&"4".parse().unwrap()));
/// assert!(!queue.covers(&"4.2".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueId {
    group: u16,
    sub: Option<u16>,
}

impl QueueId {
    /// Creates a queue id.
    #[must_use]
    pub const fn new(group: u16, sub: Option<u16>) -> Self {
        Self { group, sub }
    }

    /// Returns the group number.
    #[must_use]
    pub const fn group(&self) -> u16 {
        self.group
    }

    /// Returns the sub-group number.
    #[must_use]
    pub const fn sub(&self) -> Option<u16> {
        self.sub
    }

    /// Returns `true` if an announcement for `mentioned` applies to this
    /// queue. A bare group number applies to all of its sub-groups.
    #[must_use]
    pub fn covers(&self, mentioned: &Self) -> bool {
        self.group == mentioned.group
            && (self.sub.is_none() || mentioned.sub.is_none() || self.sub == mentioned.sub)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub {
            Some(sub) => write!(f, "{}.{sub}", self.group),
            None => write!(f, "{}", self.group),
        }
    }
}

impl FromStr for QueueId {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleParseError::InvalidQueue(s.to_string());
        let trimmed = s.trim();
        let (group, sub) = match trimmed.split_once('.') {
            Some((g, sub)) => (g, Some(sub)),
            None => (trimmed, None),
        };
        let group = group.parse().map_err(|_| invalid())?;
        let sub = sub
            .map(|sub| sub.parse().map_err(|_| invalid()))
            .transpose()?;
        Ok(Self { group, sub })
    }
}

impl TryFrom<String> for QueueId {
    type Error = ScheduleParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QueueId> for String {
    fn from(value: QueueId) -> Self {
        value.to_string()
    }
}

// ============================================================================
// IntervalSource
// ============================================================================

/// Where an interval came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalSource {
    /// Entered by an administrator.
    Manual,
    /// Extracted from an announcement.
    Parsed,
}

impl IntervalSource {
    /// Returns the stored name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Parsed => "parsed",
        }
    }
}

impl FromStr for IntervalSource {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "parsed" => Ok(Self::Parsed),
            other => Err(ParseError::InvalidValue {
                field: "source".to_string(),
                message: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// ScheduleInterval
// ============================================================================

/// A planned outage window in local time.
///
/// `end < start` means the window crosses midnight into the next day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleInterval {
    /// Day the window starts on.
    pub date: NaiveDate,
    /// Start time.
    pub start: NaiveTime,
    /// End time.
    pub end: NaiveTime,
    /// Queue the window applies to.
    pub queue: QueueId,
    /// Origin of the row.
    pub source: IntervalSource,
}

impl ScheduleInterval {
    /// Creates an interval.
    #[must_use]
    pub fn new(
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        queue: QueueId,
        source: IntervalSource,
    ) -> Self {
        Self {
            date,
            start,
            end,
            queue,
            source,
        }
    }

    /// Returns `true` if the window ends on the following day.
    #[must_use]
    pub fn crosses_midnight(&self) -> bool {
        self.end < self.start
    }

    /// Returns `true` if `time` on `date` falls inside the window.
    ///
    /// The start is inclusive and the end exclusive, except that an end of
    /// `23:59` covers the rest of the day.
    #[must_use]
    pub fn contains(&self, date: NaiveDate, time: NaiveTime) -> bool {
        if self.crosses_midnight() {
            (date == self.date && time >= self.start)
                || (self.date.checked_add_days(Days::new(1)) == Some(date) && time < self.end)
        } else if date == self.date {
            time >= self.start && (self.end == end_of_day() || time < self.end)
        } else {
            false
        }
    }

    /// Absolute start and end of the window.
    #[must_use]
    pub fn window(&self) -> (NaiveDateTime, NaiveDateTime) {
        let start = self.date.and_time(self.start);
        let end_date = if self.crosses_midnight() {
            self.date.checked_add_days(Days::new(1)).unwrap_or(self.date)
        } else {
            self.date
        };
        (start, end_date.and_time(self.end))
    }
}

/// An interval as stored, with its row id and pre-warning flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredInterval {
    /// Row id.
    pub id: i64,
    /// The interval.
    #[serde(flatten)]
    pub interval: ScheduleInterval,
    /// Whether the pre-outage warning was sent.
    pub warned: bool,
}
