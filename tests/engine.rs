// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end ticks with a scripted plug and a recording outbox.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone};
use mainswatch::notify::{Dispatcher, MessageSender, NotificationTargets};
use mainswatch::schedule::{QueueId, is_outage_now, parse_schedule};
use mainswatch::state::EventKind;
use mainswatch::stats::daily_uptime;
use mainswatch::store::{EventLog, ScheduleRepository, SqliteStore, StateRepository};
use mainswatch::{
    ConfigError, ConnectionMode, DispatchError, Engine, MonitorConfig, PersistedState, PollMethod,
    PollResult, PowerState, StateMachine, TelemetrySource, TickLock, VoltageState,
    VoltageThresholds,
};
use parking_lot::Mutex;

// ============================================================================
// Fakes
// ============================================================================

/// A plug whose next reading is set by the test.
#[derive(Default)]
struct ScriptedPlug(Mutex<PollResult>);

impl ScriptedPlug {
    fn set(&self, reading: PollResult) {
        *self.0.lock() = reading;
    }
}

impl TelemetrySource for ScriptedPlug {
    async fn poll(&self) -> PollResult {
        self.0.lock().clone()
    }
}

/// Records every message; chats listed in `blocked` fail.
#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
    blocked: Vec<String>,
}

impl Outbox {
    fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

impl MessageSender for Outbox {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), DispatchError> {
        if self.blocked.iter().any(|c| c == chat_id) {
            return Err(DispatchError::Rejected("bot was blocked by the user".to_string()));
        }
        self.sent.lock().push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn reading(voltage: f64) -> PollResult {
    PollResult {
        online: true,
        voltage: Some(voltage),
        power: Some(12.0),
        method: PollMethod::Local,
        ..PollResult::default()
    }
}

fn at(day: u32, h: u32, m: u32) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(2026, 2, day, h, m, 0)
        .earliest()
        .unwrap()
}

struct Harness {
    _dir: tempfile::TempDir,
    lock_path: std::path::PathBuf,
    engine: Engine<ScriptedPlug, Outbox>,
}

impl Harness {
    fn new(outbox: Outbox) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("tick.lock");
        let store = Arc::new(SqliteStore::open(dir.path().join("monitor.db")).unwrap());
        let engine = Engine::new(
            ScriptedPlug::default(),
            Dispatcher::new(outbox).with_send_delay(Duration::ZERO),
            store,
            StateMachine::new(VoltageThresholds::default())
                .with_repeat_interval(Duration::from_secs(30 * 60)),
            &lock_path,
        )
        .with_targets(NotificationTargets::new(
            Some("@mains".to_string()),
            vec!["1001".to_string()],
        ));
        Self {
            _dir: dir,
            lock_path,
            engine,
        }
    }

    fn store(&self) -> &SqliteStore {
        self.engine.store()
    }

    fn misconfigured(self, error: ConfigError) -> Self {
        Self {
            engine: self.engine.with_config_error(error),
            ..self
        }
    }

    fn seed(&self, state: &PersistedState) {
        self.store().commit(state, &[]).unwrap();
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.engine.dispatcher().sender().messages()
    }
}

fn was_off_since(ts: i64) -> PersistedState {
    PersistedState {
        last_power_state: PowerState::Off,
        last_power_change_ts: Some(ts),
        last_voltage: Some(0.0),
        last_voltage_state: VoltageState::Zero,
        device_online: true,
        ..PersistedState::default()
    }
}

// ============================================================================
// Power
// ============================================================================

mod power {
    use super::*;

    #[tokio::test]
    async fn restored_mains_logs_one_event_and_notifies_each_target() {
        let h = Harness::new(Outbox::default());
        h.seed(&was_off_since(at(4, 7, 0).timestamp()));
        h.engine.source().set(reading(230.0));

        let report = h.engine.tick_at(at(4, 9, 30)).await;
        assert!(report.ok, "{:?}", report.error);
        assert_eq!(report.power_state, Some(PowerState::On));

        let events = h
            .store()
            .events_between(at(4, 0, 0).timestamp(), at(5, 0, 0).timestamp())
            .unwrap();
        let power: Vec<_> = events.iter().filter(|e| e.kind == EventKind::Power).collect();
        assert_eq!(power.len(), 1);
        assert_eq!(power[0].state, "ON");

        let sent = h.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "@mains");
        assert_eq!(sent[1].0, "1001");
        assert!(sent[0].1.starts_with("✅ Світло з'явилося!"));
        assert!(sent[0].1.contains("230.0V"));
        assert!(sent[0].1.contains("2 год 30 хв"));
        assert_eq!(report.notifications_sent, 2);
    }

    #[tokio::test]
    async fn lost_mains_is_reported_once() {
        let h = Harness::new(Outbox::default());
        h.engine.source().set(reading(231.0));
        h.engine.tick_at(at(4, 10, 0)).await;
        assert!(h.sent().is_empty(), "first reading must be silent");

        h.engine.source().set(reading(0.0));
        let off = h.engine.tick_at(at(4, 10, 1)).await;
        assert_eq!(off.power_state, Some(PowerState::Off));
        assert_eq!(h.sent().len(), 2);
        assert!(h.sent()[0].1.starts_with("❌ Світло зникло!"));

        let again = h.engine.tick_at(at(4, 10, 2)).await;
        assert!(again.changes.is_empty());
        assert_eq!(h.sent().len(), 2);
    }

    #[tokio::test]
    async fn unreachable_plug_changes_nothing() {
        let h = Harness::new(Outbox::default());
        h.seed(&was_off_since(at(4, 7, 0).timestamp()));
        h.engine
            .source()
            .set(PollResult::failed(PollMethod::None, 5000, "local: timed out"));

        let report = h.engine.tick_at(at(4, 8, 0)).await;
        assert!(report.ok);
        assert!(!report.online);
        assert_eq!(report.power_state, Some(PowerState::Unknown));
        assert!(report.error.unwrap().contains("timed out"));

        let state = h.store().load().unwrap();
        assert_eq!(state.last_power_state, PowerState::Off);
        assert!(!state.device_online);
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn missing_cloud_credentials_fail_each_tick_without_stopping() {
        let dir = tempfile::tempdir().unwrap();
        let config = MonitorConfig::default()
            .with_mode(ConnectionMode::Cloud)
            .with_device("dev1")
            .with_storage(dir.path().join("monitor.db"), dir.path().join("tick.lock"));
        let engine = Engine::from_config(&config).unwrap();
        assert!(matches!(
            engine.config_error(),
            Some(ConfigError::Missing { key, .. }) if key == "cloud.client_id"
        ));

        for minute in [0, 5] {
            let report = engine.tick_at(at(4, 9, minute)).await;
            assert!(!report.ok);
            assert!(!report.busy);
            assert!(!report.online);
            assert_eq!(report.method, PollMethod::None);
            let error = report.error.unwrap();
            assert!(error.starts_with("configuration error"), "{error}");
            assert!(error.contains("cloud.client_id"), "{error}");
        }

        let state = engine.store().load().unwrap();
        assert!(!state.device_online);
        assert_eq!(state.last_check_ts, Some(at(4, 9, 5).timestamp()));
    }

    #[tokio::test]
    async fn misconfigured_engine_never_polls_the_plug() {
        let h = Harness::new(Outbox::default()).misconfigured(ConfigError::Missing {
            mode: "local".to_string(),
            key: "device.host".to_string(),
        });
        h.seed(&was_off_since(at(4, 7, 0).timestamp()));
        h.engine.source().set(reading(230.0));

        let report = h.engine.tick_at(at(4, 8, 0)).await;
        assert!(!report.ok);
        assert!(!report.online);
        assert_eq!(report.voltage, None);
        assert!(report.changes.is_empty());
        assert!(report.error.unwrap().contains("device.host"));

        let state = h.store().load().unwrap();
        assert_eq!(state.last_power_state, PowerState::Off);
        assert!(!state.device_online);
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_keeps_committed_state() {
        let outbox = Outbox {
            blocked: vec!["@mains".to_string()],
            ..Outbox::default()
        };
        let h = Harness::new(outbox);
        h.seed(&was_off_since(at(4, 7, 0).timestamp()));
        h.engine.source().set(reading(229.0));

        let report = h.engine.tick_at(at(4, 8, 0)).await;
        assert_eq!(report.notifications_failed, 1);
        assert_eq!(report.notifications_sent, 1);
        assert_eq!(h.store().load().unwrap().last_power_state, PowerState::On);
    }
}

// ============================================================================
// Voltage
// ============================================================================

mod voltage {
    use super::*;

    #[tokio::test]
    async fn sustained_low_voltage_is_repeated_then_cleared() {
        let h = Harness::new(Outbox::default());
        h.engine.source().set(reading(230.0));
        h.engine.tick_at(at(4, 12, 0)).await;

        h.engine.source().set(reading(198.0));
        let low = h.engine.tick_at(at(4, 12, 1)).await;
        assert_eq!(low.voltage_state, Some(VoltageState::Low));
        assert_eq!(h.sent().len(), 2);

        // inside the repeat interval
        h.engine.tick_at(at(4, 12, 20)).await;
        assert_eq!(h.sent().len(), 2);

        let reminder = h.engine.tick_at(at(4, 12, 31)).await;
        assert_eq!(reminder.changes.len(), 1);
        assert_eq!(h.sent().len(), 4);

        h.engine.source().set(reading(228.0));
        h.engine.tick_at(at(4, 12, 40)).await;
        let sent = h.sent();
        assert_eq!(sent.len(), 6);
        assert!(sent[5].1.starts_with("✅ Напруга нормалізувалась"));
    }

    #[tokio::test]
    async fn critical_high_voltage_uses_critical_template() {
        let h = Harness::new(Outbox::default());
        h.engine.source().set(reading(230.0));
        h.engine.tick_at(at(4, 12, 0)).await;

        h.engine.source().set(reading(266.0));
        h.engine.tick_at(at(4, 12, 1)).await;
        let sent = h.sent();
        assert!(sent[0].1.starts_with("🆘 Критична напруга!"));
        assert!(sent[0].1.contains("Критично висока"));
        assert!(sent[0].1.contains("до стабілізації напруги"));
    }
}

// ============================================================================
// Locking
// ============================================================================

mod locking {
    use super::*;

    #[tokio::test]
    async fn held_lock_yields_busy_report_without_side_effects() {
        let h = Harness::new(Outbox::default());
        h.seed(&was_off_since(100));
        h.engine.source().set(reading(230.0));

        let held = TickLock::try_acquire(&h.lock_path).unwrap().unwrap();
        let report = h.engine.tick_at(at(4, 9, 0)).await;
        assert!(report.busy);
        assert!(!report.ok);
        assert!(report.error.is_some());

        assert_eq!(h.store().load().unwrap(), was_off_since(100));
        assert!(h.store().events_between(0, i64::MAX).unwrap().is_empty());
        assert!(h.sent().is_empty());

        drop(held);
        let report = h.engine.tick_at(at(4, 9, 1)).await;
        assert!(report.ok && !report.busy);
        assert_eq!(report.power_state, Some(PowerState::On));
    }
}

// ============================================================================
// Schedules
// ============================================================================

mod schedules {
    use super::*;

    const ANNOUNCEMENT: &str = "Оновлений графік на 04.02.2026\n\
        Групи 4.1 і 4.2\n\
        ⚫️08:00 відключення\n\
        🟢10:00 увімкнення\n\
        ⚫️17:00 відключення\n\
        🟢24:00 увімкнення\n";

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn group_announcement_becomes_outage_windows() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 4).unwrap();
        let queue: QueueId = "4.1".parse().unwrap();
        let parsed = parse_schedule(ANNOUNCEMENT, &queue, today).unwrap();
        assert_eq!(parsed.intervals, vec![(hm(8, 0), hm(10, 0)), (hm(17, 0), hm(23, 59))]);

        let windows = parsed.to_intervals(today);
        assert!(is_outage_now(&windows, today, hm(9, 0), &queue));
        assert!(!is_outage_now(&windows, today, hm(12, 0), &queue));
        assert!(is_outage_now(&windows, today, hm(23, 59), &queue));
    }

    #[tokio::test]
    async fn stored_schedule_warns_before_outage_even_when_skipped() {
        let queue: QueueId = "4.2".parse().unwrap();
        let mut h = Harness::new(Outbox::default());
        h.engine = h
            .engine
            .with_schedule_warnings(queue, Duration::from_secs(15 * 60))
            .with_min_poll_interval(Duration::from_secs(3600));

        let today = NaiveDate::from_ymd_opt(2026, 2, 4).unwrap();
        let chosen = h
            .engine
            .update_schedule(&[ANNOUNCEMENT.to_string()], today)
            .unwrap()
            .unwrap();
        assert_eq!(chosen.date, Some(today));
        assert_eq!(h.store().intervals_for(today, today, &queue).unwrap().len(), 2);

        h.engine.source().set(reading(230.0));
        h.engine.tick_at(at(4, 16, 30)).await;

        let report = h.engine.tick_at(at(4, 16, 50)).await;
        assert!(report.skipped);
        assert_eq!(report.schedule_warnings, 1);
        let sent = h.sent();
        assert!(sent[0].1.contains("17:00 - 23:59"));
        assert!(sent[0].1.contains("Через 10 хв"));

        let later = h.engine.tick_at(at(4, 16, 55)).await;
        assert_eq!(later.schedule_warnings, 0);
    }
}

// ============================================================================
// Statistics
// ============================================================================

mod statistics {
    use super::*;

    #[tokio::test]
    async fn daily_uptime_follows_logged_transitions() {
        let h = Harness::new(Outbox::default());
        h.engine.source().set(reading(230.0));
        h.engine.tick_at(at(4, 10, 0)).await;
        h.engine.source().set(reading(0.0));
        h.engine.tick_at(at(4, 12, 0)).await;
        h.engine.source().set(reading(230.0));
        h.engine.tick_at(at(4, 13, 0)).await;

        let day = NaiveDate::from_ymd_opt(2026, 2, 4).unwrap();
        let stats = daily_uptime(h.store(), day, at(4, 14, 0)).unwrap();
        assert_eq!(stats.power_changes, 2);
        assert_eq!(stats.off_secs, 3600);
        assert_eq!(stats.on_secs, 13 * 3600);
    }
}
