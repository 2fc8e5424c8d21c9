// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transitions detected by the state machine and their event-log rows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::types::{PowerState, VoltageState};

/// A detected change worth recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    /// Mains went on or off.
    Power {
        /// Previous state (always known).
        from: PowerState,
        /// New state (always known).
        to: PowerState,
        /// When the previous state began.
        since_ts: Option<i64>,
        /// Voltage at the time of the change.
        voltage: Option<f64>,
    },
    /// Voltage band changed, or an abnormal band persisted long enough to
    /// be repeated.
    Voltage {
        /// Previous band.
        from: VoltageState,
        /// Current band.
        to: VoltageState,
        /// Voltage at the time of the change.
        voltage: Option<f64>,
        /// `true` when the band did not change and this is a reminder.
        repeat: bool,
    },
}

impl Transition {
    /// Builds the event-log row for this transition.
    #[must_use]
    pub fn to_event(&self, ts: i64) -> Event {
        match self {
            Self::Power { from, to, voltage, .. } => Event {
                id: None,
                ts,
                kind: EventKind::Power,
                state: to.as_str().to_string(),
                voltage: *voltage,
                note: Some(format!("{from} -> {to}")),
            },
            Self::Voltage {
                from,
                to,
                voltage,
                repeat,
            } => Event {
                id: None,
                ts,
                kind: EventKind::Voltage,
                state: to.as_str().to_string(),
                voltage: *voltage,
                note: Some(if *repeat {
                    "repeat".to_string()
                } else {
                    format!("{from} -> {to}")
                }),
            },
        }
    }
}

/// Category of an event-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    /// Power transition.
    Power,
    /// Voltage transition or reminder.
    Voltage,
}

impl EventKind {
    /// Returns the stored name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Power => "POWER",
            Self::Voltage => "VOLTAGE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "POWER" => Ok(Self::Power),
            "VOLTAGE" => Ok(Self::Voltage),
            other => Err(ParseError::InvalidValue {
                field: "event_type".to_string(),
                message: other.to_string(),
            }),
        }
    }
}

/// One append-only event-log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Row id once stored.
    pub id: Option<i64>,
    /// Unix seconds.
    pub ts: i64,
    /// Event category.
    pub kind: EventKind,
    /// New state name.
    pub state: String,
    /// Voltage at the time.
    pub voltage: Option<f64>,
    /// Free-form note.
    pub note: Option<String>,
}

impl Event {
    /// Parses the `state` column of a power event.
    #[must_use]
    pub fn power_state(&self) -> Option<PowerState> {
        match self.kind {
            EventKind::Power => self.state.parse().ok(),
            EventKind::Voltage => None,
        }
    }
}
