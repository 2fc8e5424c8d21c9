// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Uptime statistics derived from the event log.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde::Serialize;

use crate::error::StorageError;
use crate::state::{Event, EventKind};
use crate::store::EventLog;
use crate::types::{HumanDuration, PowerState};

/// Time with and without mains over a period.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct UptimeStats {
    /// Period start (unix seconds).
    pub from_ts: i64,
    /// Period end (unix seconds).
    pub to_ts: i64,
    /// Seconds with mains present.
    pub on_secs: u64,
    /// Seconds without mains.
    pub off_secs: u64,
    /// Power events in the period.
    pub power_changes: usize,
    /// Voltage events in the period.
    pub voltage_changes: usize,
}

impl UptimeStats {
    /// Share of the period with mains present, in percent with one decimal.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn uptime_percent(&self) -> f64 {
        let total = self.on_secs + self.off_secs;
        if total == 0 {
            return 0.0;
        }
        (self.on_secs as f64 / total as f64 * 1000.0).round() / 10.0
    }

    /// Text summary in the notification language.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "📊 Статистика\n⚡ Зміни стану світла: {}\n📈 Зміни напруги: {}\n\
             ✅ Час зі світлом: {}\n❌ Час без світла: {}\n📊 Uptime: {}%",
            self.power_changes,
            self.voltage_changes,
            HumanDuration::from_secs(self.on_secs),
            HumanDuration::from_secs(self.off_secs),
            self.uptime_percent(),
        )
    }
}

/// Splits `from_ts..to_ts` into on and off time.
///
/// `initial` is the mains state at `from_ts`; `events` must be sorted by
/// time. Events outside the period are ignored and `UNKNOWN` power events
/// keep the previous state.
#[must_use]
pub fn uptime_from_events(
    events: &[Event],
    from_ts: i64,
    to_ts: i64,
    initial: PowerState,
) -> UptimeStats {
    let mut stats = UptimeStats {
        from_ts,
        to_ts,
        ..UptimeStats::default()
    };
    let mut state = initial;
    let mut since = from_ts;

    for event in events.iter().filter(|e| e.ts >= from_ts && e.ts < to_ts) {
        match event.kind {
            EventKind::Voltage => stats.voltage_changes += 1,
            EventKind::Power => {
                stats.power_changes += 1;
                let Some(next) = event.power_state().filter(PowerState::is_known) else {
                    continue;
                };
                account(&mut stats, state, since, event.ts);
                state = next;
                since = event.ts;
            }
        }
    }
    account(&mut stats, state, since, to_ts);
    stats
}

fn account(stats: &mut UptimeStats, state: PowerState, from: i64, to: i64) {
    let secs = u64::try_from(to - from).unwrap_or(0);
    match state {
        PowerState::Off => stats.off_secs += secs,
        _ => stats.on_secs += secs,
    }
}

fn local_ts(naive: NaiveDateTime) -> i64 {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map_or_else(|| naive.and_utc().timestamp(), |dt| dt.timestamp())
}

/// Uptime for local calendar day `day`, up to `now` if the day is not over.
///
/// The state at midnight comes from the last power event before it. With
/// no earlier event the mains are assumed to have been on.
///
/// # Errors
///
/// Returns an error if the event log cannot be read.
pub fn daily_uptime<L: EventLog + ?Sized>(
    log: &L,
    day: NaiveDate,
    now: DateTime<Local>,
) -> Result<UptimeStats, StorageError> {
    let from_ts = local_ts(day.and_time(chrono::NaiveTime::MIN));
    let next_day = day.succ_opt().unwrap_or(day);
    let to_ts = local_ts(next_day.and_time(chrono::NaiveTime::MIN))
        .min(now.timestamp())
        .max(from_ts);

    let initial = log
        .last_power_event_before(from_ts)?
        .and_then(|e| e.power_state())
        .filter(PowerState::is_known)
        .unwrap_or(PowerState::On);

    let events = log.events_between(from_ts, to_ts)?;
    Ok(uptime_from_events(&events, from_ts, to_ts, initial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn event(ts: i64, kind: EventKind, state: &str) -> Event {
        Event {
            id: None,
            ts,
            kind,
            state: state.to_string(),
            voltage: None,
            note: None,
        }
    }

    #[test]
    fn assumes_on_without_history() {
        let stats = uptime_from_events(&[], 0, 3600, PowerState::On);
        assert_eq!(stats.on_secs, 3600);
        assert_eq!(stats.off_secs, 0);
        assert!((stats.uptime_percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn splits_time_at_power_events() {
        let events = vec![
            event(1000, EventKind::Power, "OFF"),
            event(1500, EventKind::Voltage, "LOW"),
            event(4000, EventKind::Power, "ON"),
        ];
        let stats = uptime_from_events(&events, 0, 5000, PowerState::On);
        assert_eq!(stats.on_secs, 2000);
        assert_eq!(stats.off_secs, 3000);
        assert_eq!(stats.power_changes, 2);
        assert_eq!(stats.voltage_changes, 1);
        assert!((stats.uptime_percent() - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn daily_uptime_uses_state_before_midnight() {
        let store = SqliteStore::open_in_memory().unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 2, 4).unwrap();
        let midnight = local_ts(day.and_time(chrono::NaiveTime::MIN));
        store.append(&event(midnight - 600, EventKind::Power, "OFF")).unwrap();
        store.append(&event(midnight + 1800, EventKind::Power, "ON")).unwrap();

        let now = Local.timestamp_opt(midnight + 3600, 0).unwrap();
        let stats = daily_uptime(&store, day, now).unwrap();
        assert_eq!(stats.off_secs, 1800);
        assert_eq!(stats.on_secs, 1800);
        assert_eq!(stats.power_changes, 1);
    }
}
