// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Line voltage classification.
//!
//! A reading is classified with an ordered rule set where the first match
//! wins:
//!
//! | Condition               | State       |
//! |-------------------------|-------------|
//! | `v <= 0`                | `ZERO`      |
//! | `v < on`                | `OFF`       |
//! | `v < crit_low`          | `CRIT_LOW`  |
//! | `v < warn_low`          | `LOW`       |
//! | `v > crit_high`         | `CRIT_HIGH` |
//! | `v > warn_high`         | `HIGH`      |
//! | otherwise               | `NORMAL`    |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ParseError};

/// Classified line voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoltageState {
    /// Within the warning band.
    Normal,
    /// Below the low warning threshold.
    Low,
    /// Above the high warning threshold.
    High,
    /// Below the critical low threshold.
    CritLow,
    /// Above the critical high threshold.
    CritHigh,
    /// The device reports zero or negative voltage.
    Zero,
    /// Voltage is below the "power on" threshold.
    Off,
    /// No reading is available.
    #[default]
    Unknown,
}

impl VoltageState {
    /// All states, in classification order.
    pub const ALL: [Self; 8] = [
        Self::Zero,
        Self::Off,
        Self::CritLow,
        Self::Low,
        Self::CritHigh,
        Self::High,
        Self::Normal,
        Self::Unknown,
    ];

    /// Returns the persisted string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
            Self::High => "HIGH",
            Self::CritLow => "CRIT_LOW",
            Self::CritHigh => "CRIT_HIGH",
            Self::Zero => "ZERO",
            Self::Off => "OFF",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Returns `true` for the states that are re-notified while they last.
    #[must_use]
    pub const fn is_abnormal(&self) -> bool {
        matches!(self, Self::Low | Self::High | Self::CritLow | Self::CritHigh)
    }

    /// Returns `true` for the critical states.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::CritLow | Self::CritHigh)
    }

    /// Returns `true` if entering this state may produce outbound text.
    ///
    /// `UNKNOWN` and `ZERO` are recorded but never announced; they mostly
    /// show up while the device is dropping off the network.
    #[must_use]
    pub const fn is_announced(&self) -> bool {
        !matches!(self, Self::Unknown | Self::Zero)
    }

    /// Short human label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Normal => "Норма",
            Self::Low => "Занижена",
            Self::High => "Завищена",
            Self::CritLow => "Критично низька",
            Self::CritHigh => "Критично висока",
            Self::Zero | Self::Off => "Немає",
            Self::Unknown => "Невідомо",
        }
    }

    /// Status emoji used in titles.
    #[must_use]
    pub const fn emoji(&self) -> &'static str {
        match self {
            Self::Normal => "✅",
            Self::Low | Self::High => "⚠️",
            Self::CritLow | Self::CritHigh => "🆘",
            Self::Zero | Self::Off => "❌",
            Self::Unknown => "❓",
        }
    }
}

impl fmt::Display for VoltageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoltageState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| ParseError::InvalidValue {
                field: "voltage_state".to_string(),
                message: s.to_string(),
            })
    }
}

/// Voltage thresholds in volts.
///
/// # Examples
///
/// ```
/// use mainswatch::types::{VoltageState, VoltageThresholds};
///
/// let thresholds = VoltageThresholds::default();
/// assert_eq!(thresholds.classify(230.0), VoltageState::Normal);
/// assert_eq!(thresholds.classify(200.0), VoltageState::Low);
/// assert_eq!(thresholds.classify(265.0), VoltageState::CritHigh);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoltageThresholds {
    /// At or above this, mains power is considered present.
    pub on: f64,
    /// Critical low bound.
    pub crit_low: f64,
    /// Warning low bound.
    pub warn_low: f64,
    /// Warning high bound.
    pub warn_high: f64,
    /// Critical high bound.
    pub crit_high: f64,
}

impl Default for VoltageThresholds {
    fn default() -> Self {
        Self {
            on: 50.0,
            crit_low: 190.0,
            warn_low: 207.0,
            warn_high: 253.0,
            crit_high: 260.0,
        }
    }
}

impl VoltageThresholds {
    /// Checks that the bounds are strictly increasing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ThresholdOrder`] if they are not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = self.on < self.crit_low
            && self.crit_low < self.warn_low
            && self.warn_low < self.warn_high
            && self.warn_high < self.crit_high;
        if ordered {
            Ok(())
        } else {
            Err(ConfigError::ThresholdOrder)
        }
    }

    /// Classifies a voltage reading; the first matching rule wins.
    #[must_use]
    pub fn classify(&self, voltage: f64) -> VoltageState {
        if voltage <= 0.0 {
            VoltageState::Zero
        } else if voltage < self.on {
            VoltageState::Off
        } else if voltage < self.crit_low {
            VoltageState::CritLow
        } else if voltage < self.warn_low {
            VoltageState::Low
        } else if voltage > self.crit_high {
            VoltageState::CritHigh
        } else if voltage > self.warn_high {
            VoltageState::High
        } else {
            VoltageState::Normal
        }
    }

    /// Classifies an optional reading, mapping `None` to `UNKNOWN`.
    #[must_use]
    pub fn classify_reading(&self, voltage: Option<f64>) -> VoltageState {
        voltage.map_or(VoltageState::Unknown, |v| self.classify(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_fall_on_the_expected_side() {
        let t = VoltageThresholds::default();
        assert_eq!(t.classify(0.0), VoltageState::Zero);
        assert_eq!(t.classify(-3.0), VoltageState::Zero);
        assert_eq!(t.classify(49.9), VoltageState::Off);
        assert_eq!(t.classify(50.0), VoltageState::CritLow);
        assert_eq!(t.classify(189.9), VoltageState::CritLow);
        assert_eq!(t.classify(190.0), VoltageState::Low);
        assert_eq!(t.classify(207.0), VoltageState::Normal);
        assert_eq!(t.classify(253.0), VoltageState::Normal);
        assert_eq!(t.classify(253.1), VoltageState::High);
        assert_eq!(t.classify(260.0), VoltageState::High);
        assert_eq!(t.classify(260.1), VoltageState::CritHigh);
    }

    #[test]
    fn classification_is_total_and_monotonic() {
        // Walking upward through the voltage range, the state sequence must
        // visit the bands in order without ever returning to an earlier one.
        let t = VoltageThresholds::default();
        let order = [
            VoltageState::Zero,
            VoltageState::Off,
            VoltageState::CritLow,
            VoltageState::Low,
            VoltageState::Normal,
            VoltageState::High,
            VoltageState::CritHigh,
        ];
        let mut last_rank = 0;
        let mut v = -10.0_f64;
        while v < 400.0 {
            let state = t.classify(v);
            let rank = order
                .iter()
                .position(|s| *s == state)
                .expect("every reading maps to a band");
            assert!(rank >= last_rank, "{v} V went back to {state}");
            last_rank = rank;
            v += 0.25;
        }
        assert_eq!(last_rank, order.len() - 1);
    }

    #[test]
    fn missing_reading_is_unknown() {
        let t = VoltageThresholds::default();
        assert_eq!(t.classify_reading(None), VoltageState::Unknown);
        assert_eq!(t.classify_reading(Some(230.0)), VoltageState::Normal);
    }

    #[test]
    fn validate_rejects_overlapping_bands() {
        assert!(VoltageThresholds::default().validate().is_ok());
        let bad = VoltageThresholds {
            warn_low: 180.0,
            ..VoltageThresholds::default()
        };
        assert_eq!(bad.validate(), Err(ConfigError::ThresholdOrder));
    }

    #[test]
    fn state_strings_round_trip() {
        for state in VoltageState::ALL {
            assert_eq!(state.as_str().parse::<VoltageState>().unwrap(), state);
        }
        assert_eq!(
            serde_json::to_string(&VoltageState::CritLow).unwrap(),
            "\"CRIT_LOW\""
        );
    }

    #[test]
    fn only_warning_bands_repeat() {
        let repeating: Vec<_> = VoltageState::ALL
            .into_iter()
            .filter(VoltageState::is_abnormal)
            .collect();
        assert_eq!(
            repeating,
            vec![
                VoltageState::CritLow,
                VoltageState::Low,
                VoltageState::CritHigh,
                VoltageState::High
            ]
        );
        assert!(!VoltageState::Zero.is_announced());
        assert!(!VoltageState::Unknown.is_announced());
    }
}
