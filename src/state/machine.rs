// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Debounced power and voltage state machine.
//!
//! [`StateMachine::evaluate`] is pure: it takes the state persisted by the
//! previous tick and the current poll, and returns the next state together
//! with the transitions to log and announce. Nothing is written here.
//!
//! # Rules
//!
//! - Power: a transition needs a known previous state (`ON`/`OFF`) and a
//!   known, different new state. `UNKNOWN -> X` is recorded silently, and
//!   an `UNKNOWN` reading keeps the last known state.
//! - Voltage: a band change from a known band is a transition; leaving
//!   `UNKNOWN` is recorded silently. While the band stays abnormal
//!   (`LOW`, `HIGH`, `CRIT_LOW`, `CRIT_HIGH`), a reminder transition is
//!   produced once per repeat interval, measured from the last voltage
//!   event.
//! - A poll without a voltage reading leaves the voltage band unchanged.

use std::time::Duration;

use super::{Event, PersistedState, Transition};
use crate::protocol::PollResult;
use crate::types::{PowerState, VoltageState, VoltageThresholds};

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// State to persist.
    pub state: PersistedState,
    /// Classified power state of this poll.
    pub power: PowerState,
    /// Classified voltage band of this poll.
    pub voltage: VoltageState,
    /// Detected transitions, power first.
    pub transitions: Vec<Transition>,
    /// Event-log rows, one per transition.
    pub events: Vec<Event>,
}

impl Evaluation {
    /// Returns `true` if a power transition was detected.
    #[must_use]
    pub fn power_changed(&self) -> bool {
        self.transitions
            .iter()
            .any(|t| matches!(t, Transition::Power { .. }))
    }

    /// Returns `true` if a voltage transition or reminder was produced.
    #[must_use]
    pub fn voltage_changed(&self) -> bool {
        self.transitions
            .iter()
            .any(|t| matches!(t, Transition::Voltage { .. }))
    }
}

/// Classifier with its thresholds and repeat interval.
///
/// # Examples
///
/// ```
/// use mainswatch::protocol::{PollMethod, PollResult};
/// use mainswatch::state::{PersistedState, StateMachine};
/// use mainswatch::types::{PowerState, VoltageThresholds};
///
/// let machine = StateMachine::new(VoltageThresholds::default());
/// let prev = PersistedState {
///     last_power_state: PowerState::Off,
///     ..PersistedState::default()
/// };
/// let poll = PollResult {
///     online: true,
///     voltage: Some(230.0),
///     method: PollMethod::Local,
///     ..PollResult::default()
/// };
///
/// let eval = machine.evaluate(&prev, &poll, 1_700_000_000);
/// assert_eq!(eval.power, PowerState::On);
/// assert_eq!(eval.events.len(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateMachine {
    thresholds: VoltageThresholds,
    repeat_interval: Duration,
}

impl StateMachine {
    /// Default reminder interval for abnormal voltage.
    pub const DEFAULT_REPEAT: Duration = Duration::from_secs(60 * 60);

    /// Creates a machine with the default repeat interval.
    #[must_use]
    pub fn new(thresholds: VoltageThresholds) -> Self {
        Self {
            thresholds,
            repeat_interval: Self::DEFAULT_REPEAT,
        }
    }

    /// Sets the reminder interval for abnormal voltage.
    #[must_use]
    pub fn with_repeat_interval(mut self, interval: Duration) -> Self {
        self.repeat_interval = interval;
        self
    }

    /// Returns the thresholds.
    #[must_use]
    pub fn thresholds(&self) -> &VoltageThresholds {
        &self.thresholds
    }

    /// Computes the next state and the transitions for one poll.
    #[must_use]
    pub fn evaluate(&self, prev: &PersistedState, poll: &PollResult, now_ts: i64) -> Evaluation {
        let power = PowerState::classify(poll.online, poll.voltage, self.thresholds.on);
        let voltage = self.thresholds.classify_reading(poll.voltage);

        let mut next = prev.clone();
        next.last_check_ts = Some(now_ts);
        next.device_online = poll.online;
        next.connection_mode = poll.method;
        if poll.voltage.is_some() {
            next.last_voltage = poll.voltage;
        }

        let mut transitions = Vec::new();

        if power.is_known() && power != prev.last_power_state {
            if prev.last_power_state.is_known() {
                transitions.push(Transition::Power {
                    from: prev.last_power_state,
                    to: power,
                    since_ts: prev.last_power_change_ts,
                    voltage: poll.voltage,
                });
            } else {
                tracing::debug!(state = %power, "Initial power state recorded");
            }
            next.last_power_state = power;
            next.last_power_change_ts = Some(now_ts);
        }

        if voltage != VoltageState::Unknown {
            let previous = prev.last_voltage_state;
            let changed = previous != VoltageState::Unknown && voltage != previous;
            let reminder_due = voltage.is_abnormal()
                && prev
                    .last_voltage_notify_ts
                    .is_none_or(|ts| now_ts - ts >= self.repeat_secs());

            if changed || reminder_due {
                transitions.push(Transition::Voltage {
                    from: previous,
                    to: voltage,
                    voltage: poll.voltage,
                    repeat: !changed && voltage == previous,
                });
                next.last_voltage_notify_ts = Some(now_ts);
            }
            if voltage != previous {
                next.last_voltage_change_ts = Some(now_ts);
            }
            next.last_voltage_state = voltage;
        }

        let events = transitions.iter().map(|t| t.to_event(now_ts)).collect();

        Evaluation {
            state: next,
            power,
            voltage,
            transitions,
            events,
        }
    }

    fn repeat_secs(&self) -> i64 {
        i64::try_from(self.repeat_interval.as_secs()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PollMethod;

    fn reading(voltage: f64) -> PollResult {
        PollResult {
            online: true,
            voltage: Some(voltage),
            method: PollMethod::Local,
            ..PollResult::default()
        }
    }

    fn machine() -> StateMachine {
        StateMachine::new(VoltageThresholds::default())
    }

    #[test]
    fn first_observation_is_silent() {
        let eval = machine().evaluate(&PersistedState::default(), &reading(230.0), 100);
        assert_eq!(eval.power, PowerState::On);
        assert!(eval.transitions.is_empty());
        assert_eq!(eval.state.last_power_state, PowerState::On);
        assert_eq!(eval.state.last_power_change_ts, Some(100));
        assert_eq!(eval.state.last_voltage_state, VoltageState::Normal);
    }

    #[test]
    fn startup_never_emits_power_transition() {
        for v in [0.0, 10.0, 180.0, 230.0, 270.0] {
            let eval = machine().evaluate(&PersistedState::default(), &reading(v), 1);
            assert!(!eval.power_changed(), "{v} V produced a power transition");
        }
    }

    #[test]
    fn off_to_on_emits_one_power_event() {
        let prev = PersistedState {
            last_power_state: PowerState::Off,
            last_power_change_ts: Some(40),
            last_voltage_state: VoltageState::Off,
            ..PersistedState::default()
        };
        let eval = machine().evaluate(&prev, &reading(230.0), 100);

        assert_eq!(eval.events.iter().filter(|e| e.state == "ON").count(), 1);
        assert!(matches!(
            eval.transitions[0],
            Transition::Power {
                from: PowerState::Off,
                to: PowerState::On,
                since_ts: Some(40),
                ..
            }
        ));
        assert_eq!(eval.state.last_power_change_ts, Some(100));
    }

    #[test]
    fn unreachable_device_keeps_last_power_state() {
        let prev = PersistedState {
            last_power_state: PowerState::On,
            last_power_change_ts: Some(10),
            last_voltage: Some(230.0),
            last_voltage_state: VoltageState::Normal,
            ..PersistedState::default()
        };
        let offline = PollResult::failed(PollMethod::None, 5, "timeout");
        let eval = machine().evaluate(&prev, &offline, 50);

        assert_eq!(eval.power, PowerState::Unknown);
        assert!(eval.transitions.is_empty());
        assert_eq!(eval.state.last_power_state, PowerState::On);
        assert_eq!(eval.state.last_voltage_state, VoltageState::Normal);
        assert_eq!(eval.state.last_voltage, Some(230.0));
        assert!(!eval.state.device_online);
        assert_eq!(eval.state.last_check_ts, Some(50));
    }

    #[test]
    fn low_voltage_repeats_every_interval_and_no_sooner() {
        let machine = machine().with_repeat_interval(Duration::from_secs(600));
        let mut state = PersistedState {
            last_power_state: PowerState::On,
            last_voltage_state: VoltageState::Normal,
            ..PersistedState::default()
        };

        let mut fired = Vec::new();
        for t in (0..=3000).step_by(30) {
            let eval = machine.evaluate(&state, &reading(200.0), t);
            if eval.voltage_changed() {
                fired.push(t);
            }
            state = eval.state;
        }
        assert_eq!(fired, vec![0, 600, 1200, 1800, 2400, 3000]);
    }

    #[test]
    fn abnormal_on_startup_fires_immediately() {
        let eval = machine().evaluate(&PersistedState::default(), &reading(185.0), 7);
        assert_eq!(eval.transitions.len(), 1);
        assert!(matches!(
            eval.transitions[0],
            Transition::Voltage {
                to: VoltageState::CritLow,
                repeat: false,
                ..
            }
        ));
    }

    #[test]
    fn band_change_resets_reminder_clock() {
        let machine = machine();
        let prev = PersistedState {
            last_power_state: PowerState::On,
            last_voltage_state: VoltageState::Low,
            last_voltage_notify_ts: Some(0),
            ..PersistedState::default()
        };
        let eval = machine.evaluate(&prev, &reading(230.0), 60);
        assert!(matches!(
            eval.transitions[0],
            Transition::Voltage {
                from: VoltageState::Low,
                to: VoltageState::Normal,
                repeat: false,
                ..
            }
        ));
        assert_eq!(eval.state.last_voltage_notify_ts, Some(60));
        assert_eq!(eval.state.last_voltage_change_ts, Some(60));
    }

    #[test]
    fn power_and_voltage_may_both_fire() {
        let prev = PersistedState {
            last_power_state: PowerState::On,
            last_voltage_state: VoltageState::Normal,
            ..PersistedState::default()
        };
        let eval = machine().evaluate(&prev, &reading(0.0), 10);
        assert_eq!(eval.power, PowerState::Off);
        assert_eq!(eval.voltage, VoltageState::Zero);
        assert!(eval.power_changed());
        assert!(eval.voltage_changed());
        assert_eq!(eval.events.len(), 2);
    }
}
