// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data-point decoding shared by the local and cloud clients.
//!
//! Metering plugs report electrical values as integers whose scale depends
//! on firmware. Values above a per-channel threshold are treated as raw
//! tenths (or thousandths) and scaled down; values at or below it are taken
//! as already in physical units.
//!
//! | DP code | Cloud codes                      | Unit | Raw when   | Divisor |
//! |---------|----------------------------------|------|------------|---------|
//! | `20`    | `cur_voltage`, `voltage`         | V    | `> 1000`   | 10      |
//! | `19`    | `cur_power`, `power`             | W    | `> 100`    | 10      |
//! | `18`    | `cur_current`, `current`         | A    | `> 10`     | 1000    |
//! | `1`     | `switch`, `switch_1`             | bool | -          | -       |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Local data-point code for line voltage.
pub const DP_VOLTAGE: &str = "20";
/// Local data-point code for active power.
pub const DP_POWER: &str = "19";
/// Local data-point code for current.
pub const DP_CURRENT: &str = "18";
/// Local data-point code for the relay.
pub const DP_SWITCH: &str = "1";

const CLOUD_VOLTAGE: [&str; 3] = ["cur_voltage", "voltage", DP_VOLTAGE];
const CLOUD_POWER: [&str; 3] = ["cur_power", "power", DP_POWER];
const CLOUD_CURRENT: [&str; 3] = ["cur_current", "current", DP_CURRENT];
const CLOUD_SWITCH: [&str; 3] = ["switch", "switch_1", DP_SWITCH];

/// Electrical readings in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Readings {
    /// Line voltage in volts.
    pub voltage: Option<f64>,
    /// Active power in watts.
    pub power: Option<f64>,
    /// Current in amperes.
    pub current: Option<f64>,
    /// Relay state.
    pub switch_on: Option<bool>,
}

/// One entry of the cloud status list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusItem {
    /// Function code, e.g. `cur_voltage`.
    pub code: String,
    /// Raw value.
    #[serde(default)]
    pub value: Value,
}

impl Readings {
    /// Decodes the `dps` object of a local status payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use mainswatch::protocol::Readings;
    ///
    /// let dps = serde_json::json!({"1": true, "18": 412, "19": 905, "20": 2312});
    /// let readings = Readings::from_dps(dps.as_object().unwrap());
    /// assert_eq!(readings.voltage, Some(231.2));
    /// assert_eq!(readings.power, Some(90.5));
    /// assert_eq!(readings.current, Some(0.412));
    /// assert_eq!(readings.switch_on, Some(true));
    /// ```
    #[must_use]
    pub fn from_dps(dps: &Map<String, Value>) -> Self {
        Self {
            voltage: dps.get(DP_VOLTAGE).and_then(numeric).map(scale_voltage),
            power: dps.get(DP_POWER).and_then(numeric).map(scale_power),
            current: dps.get(DP_CURRENT).and_then(numeric).map(scale_current),
            switch_on: dps.get(DP_SWITCH).and_then(boolean),
        }
    }

    /// Decodes the cloud status list.
    ///
    /// When a channel appears under several codes, the last one wins.
    #[must_use]
    pub fn from_cloud_status(items: &[StatusItem]) -> Self {
        let mut readings = Self::default();
        for item in items {
            let code = item.code.as_str();
            if CLOUD_VOLTAGE.contains(&code) {
                if let Some(v) = numeric(&item.value) {
                    readings.voltage = Some(scale_voltage(v));
                }
            } else if CLOUD_POWER.contains(&code) {
                if let Some(p) = numeric(&item.value) {
                    readings.power = Some(scale_power(p));
                }
            } else if CLOUD_CURRENT.contains(&code) {
                if let Some(c) = numeric(&item.value) {
                    readings.current = Some(scale_current(c));
                }
            } else if CLOUD_SWITCH.contains(&code) {
                readings.switch_on = boolean(&item.value);
            }
        }
        readings
    }
}

/// Scales a raw voltage value to volts, rounded to 0.1 V.
#[must_use]
pub fn scale_voltage(raw: f64) -> f64 {
    let volts = if raw > 1000.0 { raw / 10.0 } else { raw };
    round_to(volts, 1)
}

/// Scales a raw power value to watts, rounded to 0.1 W.
#[must_use]
pub fn scale_power(raw: f64) -> f64 {
    let watts = if raw > 100.0 { raw / 10.0 } else { raw };
    round_to(watts, 1)
}

/// Scales a raw current value to amperes, rounded to 1 mA.
#[must_use]
pub fn scale_current(raw: f64) -> f64 {
    let amps = if raw > 10.0 { raw / 1000.0 } else { raw };
    round_to(amps, 3)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" => Some(true),
            "false" | "0" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
