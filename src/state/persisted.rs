// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

use crate::protocol::PollMethod;
use crate::types::{PowerState, VoltageState};

/// Monitor state carried between ticks.
///
/// Timestamps are unix seconds. A fresh install starts with both states
/// `UNKNOWN`, so the first successful reading is recorded silently.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PersistedState {
    /// Last known mains state.
    pub last_power_state: PowerState,
    /// When `last_power_state` last changed.
    pub last_power_change_ts: Option<i64>,
    /// Last voltage reading.
    pub last_voltage: Option<f64>,
    /// Last classified voltage band.
    pub last_voltage_state: VoltageState,
    /// When `last_voltage_state` last changed.
    pub last_voltage_change_ts: Option<i64>,
    /// When a voltage event was last emitted.
    pub last_voltage_notify_ts: Option<i64>,
    /// When the device was last polled.
    pub last_check_ts: Option<i64>,
    /// Device reachability on the last poll.
    pub device_online: bool,
    /// Transport that answered the last poll.
    pub connection_mode: PollMethod,
}

impl PersistedState {
    /// Seconds since the last poll, if there was one.
    #[must_use]
    pub fn seconds_since_check(&self, now_ts: i64) -> Option<i64> {
        self.last_check_ts.map(|ts| now_ts - ts)
    }
}
