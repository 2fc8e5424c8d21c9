// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::NaiveDate;

use super::parser::ParsedSchedule;

/// Picks the announcement to trust among several parsed candidates.
///
/// `candidates` must be ordered newest message first. Dates today or later
/// beat past dates; within the same class the latest date wins; on a tie
/// the newest message wins. Candidates without a date count as `today`.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use mainswatch::schedule::{parse_schedule, select_preferred};
///
/// let today = NaiveDate::from_ymd_opt(2026, 2, 4).unwrap();
/// let queue = "1".parse().unwrap();
/// let stale = parse_schedule("03.02.2026\nЧерга 1: 08:00-10:00", &queue, today).unwrap();
/// let fresh = parse_schedule("05.02.2026\nЧерга 1: 12:00-14:00", &queue, today).unwrap();
///
/// let chosen = select_preferred(vec![stale, fresh.clone()], today).unwrap();
/// assert_eq!(chosen, fresh);
/// ```
#[must_use]
pub fn select_preferred(
    candidates: impl IntoIterator<Item = ParsedSchedule>,
    today: NaiveDate,
) -> Option<ParsedSchedule> {
    let rank = |candidate: &ParsedSchedule| {
        let date = candidate.effective_date(today);
        (date >= today, date)
    };

    candidates.into_iter().fold(None, |best, candidate| match best {
        Some(current) if rank(&candidate) <= rank(&current) => Some(current),
        _ => Some(candidate),
    })
}
