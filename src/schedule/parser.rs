// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outage announcement parser.
//!
//! Parsing is a pure function of the text, the configured queue and the
//! current date. Each known announcement layout is a [`ScheduleFormat`]
//! variant; the layout is detected first and then parsed by its own
//! routine.
//!
//! # Group markers
//!
//! ```text
//! Групи 4.1 і 4.2
//! ⚫️08:00 відключення
//! 🟢10:00 увімкнення (4.2)
//! ```
//!
//! A header names the groups its section applies to. Marker lines carry a
//! time and an off/on action; an optional `(N.M)` tag restricts the line to
//! one sub-group. Off/on pairs become intervals; a trailing off runs to
//! `23:59`.
//!
//! # Queue ranges
//!
//! ```text
//! Черга 1: 00:00-06:00, 12:00-18:00
//! 2 черга: 8-12
//! Черга 3: з 08:00 до 12:00
//! Черга 4: без відключень
//! ```

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveTime};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::interval::{IntervalSource, QueueId, ScheduleInterval};
use super::text::{clock_time, extract_date, normalize_whitespace};
use crate::error::ScheduleParseError;

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:груп|черг)[аиіу]?\s*№?\s*(\d+(?:\.\d+)?(?:\s*(?:,|і|й|та|и|&)\s*\d+(?:\.\d+)?)*)",
    )
    .expect("static pattern")
});
static TRAILING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:груп|черг)").expect("static pattern")
});
static LEADING_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{1,2}(?:\.\d)?)\s*[:)]\s+").expect("static pattern"));
static QUEUE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("static pattern"));
static TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2}):(\d{2})").expect("static pattern"));
static TIME_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,2}):(\d{2})\s*[-–—]\s*(\d{1,2}):(\d{2})").expect("static pattern")
});
static HOUR_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})\s*[-–—]\s*(\d{1,2})\b").expect("static pattern")
});
static FROM_TO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|\s)з\s*(\d{1,2})(?::(\d{2}))?\s*до\s*(\d{1,2})(?::(\d{2}))?")
        .expect("static pattern")
});
static SUB_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+(?:\.\d+)?)\)").expect("static pattern"));

const OFF_WORDS: [&str; 4] = ["відключ", "вимкн", "вимик", "знеструм"];
const ON_WORDS: [&str; 5] = ["увімкн", "включ", "вмикан", "відновл", "подач"];
const OFF_MARKS: [&str; 4] = ["⚫", "🔴", "❌", "🪫"];
const ON_MARKS: [&str; 4] = ["🟢", "✅", "💡", "🔋"];
const NO_OUTAGE: [&str; 2] = ["без відключень", "відключень не"];

/// Announcement layouts the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleFormat {
    /// Group header followed by timed off/on marker lines.
    GroupMarkers,
    /// One line of time ranges per queue.
    QueueRanges,
}

/// Intervals extracted from one announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedSchedule {
    /// Date mentioned in the text, if any.
    pub date: Option<NaiveDate>,
    /// Detected layout.
    pub format: ScheduleFormat,
    /// Queue the intervals belong to.
    pub queue: QueueId,
    /// Outage windows sorted by start.
    pub intervals: Vec<(NaiveTime, NaiveTime)>,
}

impl ParsedSchedule {
    /// The mentioned date, or `today` if none.
    #[must_use]
    pub fn effective_date(&self, today: NaiveDate) -> NaiveDate {
        self.date.unwrap_or(today)
    }

    /// Converts to storable intervals.
    #[must_use]
    pub fn to_intervals(&self, today: NaiveDate) -> Vec<ScheduleInterval> {
        let date = self.effective_date(today);
        self.intervals
            .iter()
            .map(|(start, end)| {
                ScheduleInterval::new(date, *start, *end, self.queue, IntervalSource::Parsed)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Off,
    On,
}

/// Detects which layout `text` uses.
#[must_use]
pub fn detect_format(text: &str) -> Option<ScheduleFormat> {
    let text = normalize_whitespace(text);
    let has_header = text.lines().any(is_header);
    let has_marker = text.lines().any(|line| marker(line).is_some());
    if has_header && has_marker {
        return Some(ScheduleFormat::GroupMarkers);
    }

    let lower = text.to_lowercase();
    let has_ranges = text
        .lines()
        .any(|line| !line_ranges(line).is_empty());
    if has_ranges || NO_OUTAGE.iter().any(|p| lower.contains(p)) {
        Some(ScheduleFormat::QueueRanges)
    } else {
        None
    }
}

/// Extracts the outage windows for `queue` from an announcement.
///
/// # Examples
///
/// ```
/// use chrono::{NaiveDate, NaiveTime};
/// use mainswatch::schedule::{parse_schedule, ScheduleFormat};
///
/// let text = "Групи 4.1 і 4.2\n⚫️08:00 відключення\n🟢10:00 увімкнення";
/// let today = NaiveDate::from_ymd_opt(2026, 2, 4).unwrap();
/// let parsed = parse_schedule(text, &"4.1".parse().unwrap(), today).unwrap();
///
/// assert_eq!(parsed.format, ScheduleFormat::GroupMarkers);
/// assert_eq!(
///     parsed.intervals,
///     vec![(NaiveTime::from_hms_opt(8, 0, 0).unwrap(), NaiveTime::from_hms_opt(10, 0, 0).unwrap())]
/// );
/// ```
///
/// # Errors
///
/// Returns [`ScheduleParseError::NoSchedule`] if no layout is recognised and
/// [`ScheduleParseError::QueueNotFound`] if the text does not mention the
/// queue.
pub fn parse_schedule(
    text: &str,
    queue: &QueueId,
    today: NaiveDate,
) -> Result<ParsedSchedule, ScheduleParseError> {
    let normalized = normalize_whitespace(text);
    let format = detect_format(&normalized).ok_or(ScheduleParseError::NoSchedule)?;

    let mut intervals = match format {
        ScheduleFormat::GroupMarkers => parse_group_markers(&normalized, queue)?,
        ScheduleFormat::QueueRanges => parse_queue_ranges(&normalized, queue)?,
    };
    intervals.sort();
    intervals.dedup();

    Ok(ParsedSchedule {
        date: extract_date(&normalized, today),
        format,
        queue: *queue,
        intervals,
    })
}

// ============================================================================
// Group markers
// ============================================================================

fn parse_group_markers(
    text: &str,
    queue: &QueueId,
) -> Result<Vec<(NaiveTime, NaiveTime)>, ScheduleParseError> {
    let mut in_section = false;
    let mut matched = false;
    let mut markers: Vec<(NaiveTime, Action)> = Vec::new();

    for line in text.lines() {
        if is_header(line) {
            in_section = header_queues(line).iter().any(|q| queue.covers(q));
            matched |= in_section;
            continue;
        }
        if !in_section {
            continue;
        }
        let Some((time, action)) = marker(line) else {
            continue;
        };
        if let Some(tag) = sub_tag(line, queue)
            && !queue.covers(&tag)
        {
            tracing::trace!(line, %tag, "Marker for another sub-group");
            continue;
        }
        match time {
            Ok(time) => markers.push((time, action)),
            Err(e) => tracing::debug!(line, error = %e, "Skipping marker"),
        }
    }

    if !matched {
        return Err(ScheduleParseError::QueueNotFound(queue.to_string()));
    }
    Ok(pair_markers(&markers))
}

fn pair_markers(markers: &[(NaiveTime, Action)]) -> Vec<(NaiveTime, NaiveTime)> {
    let mut intervals = Vec::new();
    let mut open: Option<NaiveTime> = None;

    for (time, action) in markers {
        match (action, open) {
            (Action::Off, None) => open = Some(*time),
            (Action::Off, Some(_)) => {}
            (Action::On, Some(start)) => {
                intervals.push((start, *time));
                open = None;
            }
            (Action::On, None) if intervals.is_empty() => {
                // Power returns before any outage is listed: it started at midnight.
                intervals.push((NaiveTime::MIN, *time));
            }
            (Action::On, None) => {}
        }
    }
    if let Some(start) = open {
        intervals.push((start, super::interval::end_of_day()));
    }
    intervals
}

fn is_header(line: &str) -> bool {
    HEADER.is_match(line) && !TIME.is_match(line)
}

fn header_queues(line: &str) -> Vec<QueueId> {
    HEADER
        .captures_iter(line)
        .flat_map(|caps| {
            QUEUE_NUMBER
                .find_iter(caps.get(1).map_or("", |m| m.as_str()))
                .filter_map(|m| m.as_str().parse().ok())
                .collect::<Vec<QueueId>>()
        })
        .collect()
}

fn marker(line: &str) -> Option<(Result<NaiveTime, ScheduleParseError>, Action)> {
    if TIME_RANGE.is_match(line) || FROM_TO.is_match(line) {
        return None;
    }
    let caps = TIME.captures(line)?;
    let action = action(line)?;
    Some((time_from(&caps, 1, Some(2)), action))
}

fn action(line: &str) -> Option<Action> {
    let lower = line.to_lowercase();
    if OFF_WORDS.iter().any(|w| lower.contains(w)) {
        Some(Action::Off)
    } else if ON_WORDS.iter().any(|w| lower.contains(w)) {
        Some(Action::On)
    } else if OFF_MARKS.iter().any(|m| line.contains(m)) {
        Some(Action::Off)
    } else if ON_MARKS.iter().any(|m| line.contains(m)) {
        Some(Action::On)
    } else {
        None
    }
}

fn sub_tag(line: &str, queue: &QueueId) -> Option<QueueId> {
    let raw = SUB_TAG.captures(line)?.get(1)?.as_str();
    if raw.contains('.') {
        raw.parse().ok()
    } else {
        raw.parse().ok().map(|sub| QueueId::new(queue.group(), Some(sub)))
    }
}

// ============================================================================
// Queue ranges
// ============================================================================

fn parse_queue_ranges(
    text: &str,
    queue: &QueueId,
) -> Result<Vec<(NaiveTime, NaiveTime)>, ScheduleParseError> {
    let mut labelled: Vec<(QueueId, Vec<(NaiveTime, NaiveTime)>)> = Vec::new();
    let mut unlabelled: Vec<(NaiveTime, NaiveTime)> = Vec::new();
    let mut unlabelled_none = false;
    let mut current: Vec<QueueId> = Vec::new();

    for line in text.lines() {
        let labels = line_labels(line);
        if !labels.is_empty() {
            for label in &labels {
                if !labelled.iter().any(|(q, _)| q == label) {
                    labelled.push((*label, Vec::new()));
                }
            }
            current = labels;
        }

        let ranges = line_ranges(line);
        let lower = line.to_lowercase();
        let no_outage = NO_OUTAGE.iter().any(|p| lower.contains(p));

        if current.is_empty() {
            unlabelled.extend(ranges);
            unlabelled_none |= no_outage;
            continue;
        }
        for (label, intervals) in &mut labelled {
            if current.contains(label) {
                intervals.extend(ranges.iter().copied());
            }
        }
    }

    let mut found = false;
    let mut intervals = Vec::new();
    for (label, ranges) in &labelled {
        if queue.covers(label) {
            found = true;
            intervals.extend(ranges.iter().copied());
        }
    }

    if found {
        Ok(intervals)
    } else if labelled.is_empty() && (!unlabelled.is_empty() || unlabelled_none) {
        Ok(unlabelled)
    } else if labelled.is_empty() {
        Err(ScheduleParseError::NoSchedule)
    } else {
        Err(ScheduleParseError::QueueNotFound(queue.to_string()))
    }
}

fn line_labels(line: &str) -> Vec<QueueId> {
    let from_header = header_queues(line);
    if !from_header.is_empty() {
        return from_header;
    }
    TRAILING_LABEL
        .captures(line)
        .or_else(|| LEADING_LABEL.captures(line))
        .and_then(|caps| caps.get(1)?.as_str().parse().ok())
        .into_iter()
        .collect()
}

fn line_ranges(line: &str) -> Vec<(NaiveTime, NaiveTime)> {
    let mut ranges: Vec<(NaiveTime, NaiveTime)> = TIME_RANGE
        .captures_iter(line)
        .filter_map(|caps| range_from(&caps, (1, Some(2)), (3, Some(4))))
        .collect();

    if ranges.is_empty() {
        let stripped = TRAILING_LABEL.replace_all(line, " ");
        let stripped = LEADING_LABEL.replace(&stripped, " ");
        ranges.extend(
            HOUR_RANGE
                .captures_iter(&stripped)
                .filter(|caps| !has_time_suffix(&stripped, caps))
                .filter_map(|caps| range_from(&caps, (1, None), (2, None))),
        );
    }

    ranges.extend(
        FROM_TO
            .captures_iter(line)
            .filter_map(|caps| range_from(&caps, (1, Some(2)), (3, Some(4)))),
    );
    ranges
}

fn has_time_suffix(line: &str, caps: &Captures<'_>) -> bool {
    caps.get(0)
        .is_some_and(|m| line[m.end()..].starts_with(':') || line[..m.start()].ends_with(':'))
}

fn range_from(
    caps: &Captures<'_>,
    start: (usize, Option<usize>),
    end: (usize, Option<usize>),
) -> Option<(NaiveTime, NaiveTime)> {
    let start = time_from(caps, start.0, start.1).ok()?;
    let end = time_from(caps, end.0, end.1).ok()?;
    (start != end).then_some((start, end))
}

fn time_from(
    caps: &Captures<'_>,
    hour: usize,
    minute: Option<usize>,
) -> Result<NaiveTime, ScheduleParseError> {
    let raw_hour = caps.get(hour).map_or("", |m| m.as_str());
    let raw_minute = minute.and_then(|i| caps.get(i)).map_or("0", |m| m.as_str());
    let invalid = || ScheduleParseError::InvalidTime(format!("{raw_hour}:{raw_minute}"));
    let h = raw_hour.parse().map_err(|_| invalid())?;
    let m = raw_minute.parse().map_err(|_| invalid())?;
    clock_time(h, m)
}
