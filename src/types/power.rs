// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mains power state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Whether mains power is present at the monitored socket.
///
/// # Examples
///
/// ```
/// use mainswatch::types::PowerState;
///
/// assert_eq!(PowerState::On.as_str(), "ON");
/// assert_eq!("off".parse::<PowerState>().unwrap(), PowerState::Off);
/// assert!(!PowerState::Unknown.is_known());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerState {
    /// Voltage is at or above the "on" threshold.
    On,
    /// The device answered but voltage is below the "on" threshold.
    Off,
    /// No reading is available.
    #[default]
    Unknown,
}

impl PowerState {
    /// Returns the persisted string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Returns `true` for `On` and `Off`.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Classifies a reading.
    ///
    /// `On` when the device is online and `voltage >= on_threshold`, `Off`
    /// when it is online and below, `Unknown` otherwise.
    #[must_use]
    pub fn classify(online: bool, voltage: Option<f64>, on_threshold: f64) -> Self {
        match (online, voltage) {
            (true, Some(v)) if v >= on_threshold => Self::On,
            (true, Some(_)) => Self::Off,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ON" | "1" | "TRUE" => Ok(Self::On),
            "OFF" | "0" | "FALSE" => Ok(Self::Off),
            "UNKNOWN" | "" => Ok(Self::Unknown),
            _ => Err(ParseError::InvalidValue {
                field: "power_state".to_string(),
                message: s.to_string(),
            }),
        }
    }
}
