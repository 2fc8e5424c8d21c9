// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Point-in-time queries over stored outage windows.

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

use super::interval::{QueueId, ScheduleInterval, StoredInterval};

/// Returns `true` if an outage for `queue` is scheduled at `time` on `date`.
///
/// Windows that cross midnight are matched on both days they touch.
///
/// # Examples
///
/// ```
/// use chrono::{NaiveDate, NaiveTime};
/// use mainswatch::schedule::{is_outage_now, IntervalSource, ScheduleInterval};
///
/// let date = NaiveDate::from_ymd_opt(2026, 2, 4).unwrap();
/// let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
/// let queue = "4.1".parse().unwrap();
/// let windows = vec![ScheduleInterval::new(date, t(8, 0), t(10, 0), queue, IntervalSource::Parsed)];
///
/// assert!(is_outage_now(&windows, date, t(9, 0), &queue));
/// assert!(!is_outage_now(&windows, date, t(10, 30), &queue));
/// ```
#[must_use]
pub fn is_outage_now(
    intervals: &[ScheduleInterval],
    date: NaiveDate,
    time: NaiveTime,
    queue: &QueueId,
) -> bool {
    intervals
        .iter()
        .any(|iv| iv.queue == *queue && iv.contains(date, time))
}

/// Kind of the next schedule boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// An outage begins.
    OutageStart,
    /// The current outage ends.
    OutageEnd,
}

/// The next boundary after a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcomingChange {
    /// What happens.
    pub kind: ChangeKind,
    /// When it happens.
    pub at: NaiveDateTime,
    /// The window involved.
    pub interval: ScheduleInterval,
}

/// Finds the next outage start or end for `queue` after `now`.
///
/// While inside a window the answer is that window's end; otherwise it is
/// the earliest start still ahead.
#[must_use]
pub fn next_change(
    intervals: &[ScheduleInterval],
    now: NaiveDateTime,
    queue: &QueueId,
) -> Option<UpcomingChange> {
    let mine = intervals.iter().filter(|iv| iv.queue == *queue);

    let current_end = mine
        .clone()
        .filter(|iv| iv.contains(now.date(), now.time()))
        .map(|iv| (iv.window().1, iv))
        .max_by_key(|(end, _)| *end);
    if let Some((at, iv)) = current_end {
        return Some(UpcomingChange {
            kind: ChangeKind::OutageEnd,
            at,
            interval: iv.clone(),
        });
    }

    mine.map(|iv| (iv.window().0, iv))
        .filter(|(start, _)| *start > now)
        .min_by_key(|(start, _)| *start)
        .map(|(at, iv)| UpcomingChange {
            kind: ChangeKind::OutageStart,
            at,
            interval: iv.clone(),
        })
}

/// Returns the stored windows whose pre-outage warning is due at `now`.
///
/// A warning is due when the window starts within `lead` from now and has
/// not been warned about yet.
#[must_use]
pub fn due_warnings<'a>(
    intervals: &'a [StoredInterval],
    now: NaiveDateTime,
    lead: Duration,
    queue: &QueueId,
) -> Vec<&'a StoredInterval> {
    let lead = TimeDelta::from_std(lead).unwrap_or(TimeDelta::MAX);
    intervals
        .iter()
        .filter(|stored| !stored.warned && stored.interval.queue == *queue)
        .filter(|stored| {
            let start = stored.interval.window().0;
            start > now && start.checked_sub_signed(lead).is_none_or(|at| at <= now)
        })
        .collect()
}
