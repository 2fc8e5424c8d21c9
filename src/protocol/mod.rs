// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Clients for reading telemetry from the smart plug.
//!
//! Two transports are supported:
//!
//! - [`local::LocalClient`]: encrypted TCP protocol on the LAN
//! - [`CloudClient`]: signed REST calls to the vendor cloud
//!
//! Both produce a [`PollResult`]. Transport failures never escape as errors
//! from the polling entry points; they come back as an offline result with
//! the error text attached.

mod cloud;
pub(crate) mod dps;
pub mod local;

pub use cloud::{CloudClient, CloudConfig, DeviceInfo, string_to_sign, sign};
pub use dps::{Readings, StatusItem};

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Which source answered a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollMethod {
    /// LAN protocol.
    Local,
    /// Vendor cloud.
    Cloud,
    /// No source answered.
    #[default]
    None,
}

impl PollMethod {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
            Self::None => "none",
        }
    }
}

impl fmt::Display for PollMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollMethod {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cloud" => Ok(Self::Cloud),
            "none" | "" => Ok(Self::None),
            other => Err(ParseError::InvalidValue {
                field: "connection_mode".to_string(),
                message: other.to_string(),
            }),
        }
    }
}

/// Outcome of one telemetry read.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PollResult {
    /// Whether the device is reachable and reporting.
    pub online: bool,
    /// Line voltage in volts.
    pub voltage: Option<f64>,
    /// Active power in watts.
    pub power: Option<f64>,
    /// Current in amperes.
    pub current: Option<f64>,
    /// Relay state.
    pub switch_on: Option<bool>,
    /// Source that answered.
    pub method: PollMethod,
    /// Wall time spent on the read.
    pub latency_ms: u64,
    /// Failure description when the read did not succeed.
    pub error: Option<String>,
}

impl PollResult {
    /// A successful read.
    #[must_use]
    pub fn from_readings(readings: Readings, method: PollMethod, latency_ms: u64) -> Self {
        Self {
            online: true,
            voltage: readings.voltage,
            power: readings.power,
            current: readings.current,
            switch_on: readings.switch_on,
            method,
            latency_ms,
            error: None,
        }
    }

    /// A failed read from `method`.
    #[must_use]
    pub fn failed(method: PollMethod, latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            method,
            latency_ms,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// No source could be tried.
    #[must_use]
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self::failed(PollMethod::None, 0, error)
    }

    /// The electrical readings carried by this result.
    #[must_use]
    pub fn readings(&self) -> Readings {
        Readings {
            voltage: self.voltage,
            power: self.power,
            current: self.current,
            switch_on: self.switch_on,
        }
    }
}

/// A source of device telemetry.
///
/// Implementations must not fail: unreachable devices are reported as an
/// offline [`PollResult`].
#[allow(async_fn_in_trait)]
pub trait TelemetrySource {
    /// Reads the device once.
    async fn poll(&self) -> PollResult;
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    duration_ms(started.elapsed())
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
