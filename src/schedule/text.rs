// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Text helpers for outage announcements.

use std::sync::LazyLock;

use chrono::{Datelike, Days, NaiveDate, NaiveTime};
use regex::Regex;

use super::interval::end_of_day;
use crate::error::ScheduleParseError;

static FULL_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4}|\d{2})\b").expect("static pattern"));

static WORD_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2})\s+(січня|лютого|березня|квітня|травня|червня|липня|серпня|вересня|жовтня|листопада|грудня)(?:\s+(\d{4}))?",
    )
    .expect("static pattern")
});

static SHORT_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})\.(\d{2})\b").expect("static pattern"));

const MONTHS: [&str; 12] = [
    "січня",
    "лютого",
    "березня",
    "квітня",
    "травня",
    "червня",
    "липня",
    "серпня",
    "вересня",
    "жовтня",
    "листопада",
    "грудня",
];

/// Replaces non-breaking and zero-width spaces with plain spaces.
///
/// # Examples
///
/// ```
/// use mainswatch::schedule::normalize_whitespace;
///
/// assert_eq!(normalize_whitespace("08:00\u{a0}відключення\u{200b}"), "08:00 відключення ");
/// ```
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{00A0}' | '\u{202F}' | '\u{2007}' | '\u{200B}' | '\u{200C}' | '\u{200D}'
            | '\u{2060}' | '\u{FEFF}' => ' ',
            other => other,
        })
        .collect()
}

/// Finds the date an announcement refers to.
///
/// Recognises `DD.MM.YYYY`, `04 лютого 2026`, `DD.MM` and the words
/// `сьогодні`/`завтра`, in that order. A missing year is taken from `today`.
#[must_use]
pub fn extract_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    if let Some(caps) = FULL_DATE.captures(text) {
        let year: i32 = caps[3].parse().ok()?;
        let year = if year < 100 { 2000 + year } else { year };
        if let Some(date) = ymd(year, &caps[2], &caps[1]) {
            return Some(date);
        }
    }

    if let Some(caps) = WORD_DATE.captures(text) {
        let month_name = caps[2].to_lowercase();
        let month = MONTHS.iter().position(|m| *m == month_name)? + 1;
        let year = caps
            .get(3)
            .and_then(|y| y.as_str().parse().ok())
            .unwrap_or_else(|| today.year());
        if let Some(date) = ymd(year, &month.to_string(), &caps[1]) {
            return Some(date);
        }
    }

    if let Some(date) = SHORT_DATE
        .captures_iter(text)
        .find_map(|caps| ymd(today.year(), &caps[2], &caps[1]))
    {
        return Some(date);
    }

    let lower = text.to_lowercase();
    if lower.contains("сьогодні") {
        Some(today)
    } else if lower.contains("завтра") {
        today.checked_add_days(Days::new(1))
    } else {
        None
    }
}

fn ymd(year: i32, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
}

/// Builds a time of day, mapping `24:00` to `23:59`.
///
/// # Errors
///
/// Returns [`ScheduleParseError::InvalidTime`] when out of range.
pub fn clock_time(hour: u32, minute: u32) -> Result<NaiveTime, ScheduleParseError> {
    if hour == 24 && minute == 0 {
        return Ok(end_of_day());
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| ScheduleParseError::InvalidTime(format!("{hour:02}:{minute:02}")))
}
