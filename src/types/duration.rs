// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Human-readable durations for notification text.

use std::fmt;
use std::time::Duration;

/// A duration rendered with its two largest non-zero units.
///
/// Hours are the largest unit; long outages read as `"30 год 5 хв"`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mainswatch::types::HumanDuration;
///
/// assert_eq!(HumanDuration::from_secs(42).to_string(), "42 сек");
/// assert_eq!(HumanDuration::from_secs(125).to_string(), "2 хв 5 сек");
/// assert_eq!(HumanDuration::new(Duration::from_secs(7260)).to_string(), "2 год 1 хв");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct HumanDuration(Duration);

impl HumanDuration {
    /// Wraps a [`Duration`].
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// Creates a duration from whole seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Creates a duration between two unix timestamps, clamping negatives to zero.
    #[must_use]
    pub fn between(from_ts: i64, to_ts: i64) -> Self {
        Self::from_secs(u64::try_from(to_ts - from_ts).unwrap_or(0))
    }

    /// Returns the wrapped duration.
    #[must_use]
    pub const fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for HumanDuration {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.0.as_secs();
        let units = [
            (total / 3600, "год"),
            ((total % 3600) / 60, "хв"),
            (total % 60, "сек"),
        ];

        let parts: Vec<String> = units
            .iter()
            .filter(|(value, _)| *value > 0)
            .take(2)
            .map(|(value, unit)| format!("{value} {unit}"))
            .collect();

        if parts.is_empty() {
            f.write_str("0 сек")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}
