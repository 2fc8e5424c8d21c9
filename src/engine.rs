// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The periodic tick.
//!
//! One [`Engine::tick`] takes the tick lock, reads the persisted state,
//! polls the device, classifies the reading, commits state and events in one
//! transaction and only then sends notifications. Every outcome, including
//! failures and lock contention, is reported as a [`TickReport`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, TimeDelta};
use serde::Serialize;

use crate::config::MonitorConfig;
use crate::error::{ConfigError, Error, Result};
use crate::lock::TickLock;
use crate::notify::{
    Dispatcher, MessageSender, NotificationKind, NotificationTargets, NotifyContext,
    TelegramSender,
};
use crate::poller::{LocalKeyCache, Poller};
use crate::protocol::{PollMethod, PollResult, TelemetrySource};
use crate::schedule::{ParsedSchedule, QueueId, due_warnings, parse_schedule, select_preferred};
use crate::state::{Evaluation, StateMachine, Transition};
use crate::store::{ScheduleRepository, SqliteStore, StateRepository};
use crate::types::{HumanDuration, PowerState, VoltageState};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// TickReport
// ============================================================================

/// Structured outcome of one tick.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TickReport {
    /// The tick ran to completion without a storage or configuration error.
    ///
    /// An incomplete configuration still completes the tick, recording the
    /// device as offline, but reports `ok = false`.
    pub ok: bool,
    /// Another tick held the lock; nothing was read or written.
    pub busy: bool,
    /// The minimum poll interval had not elapsed; the device was not polled.
    pub skipped: bool,
    /// A collaborator requested this poll.
    pub forced: bool,
    /// Tick time (unix seconds).
    pub ts: i64,
    /// Tick time in local time.
    pub datetime: String,
    /// Device reachability.
    pub online: bool,
    /// Line voltage.
    pub voltage: Option<f64>,
    /// Active power.
    pub power: Option<f64>,
    /// Current.
    pub current: Option<f64>,
    /// Classified mains state.
    pub power_state: Option<PowerState>,
    /// Classified voltage band.
    pub voltage_state: Option<VoltageState>,
    /// Transport that answered.
    pub method: PollMethod,
    /// Poll latency.
    pub latency_ms: u64,
    /// Detected transitions.
    pub changes: Vec<Transition>,
    /// Messages delivered across all targets.
    pub notifications_sent: usize,
    /// Messages that failed.
    pub notifications_failed: usize,
    /// Pre-outage warnings sent.
    pub schedule_warnings: usize,
    /// Poll, storage or configuration failure.
    pub error: Option<String>,
}

impl TickReport {
    fn at(now: DateTime<Local>) -> Self {
        Self {
            ts: now.timestamp(),
            datetime: now.format(DATETIME_FORMAT).to_string(),
            ..Self::default()
        }
    }

    fn record_poll(&mut self, poll: &PollResult) {
        self.online = poll.online;
        self.voltage = poll.voltage;
        self.power = poll.power;
        self.current = poll.current;
        self.method = poll.method;
        self.latency_ms = poll.latency_ms;
        self.error.clone_from(&poll.error);
    }

    fn fail(mut self, error: &Error) -> Self {
        tracing::error!(error = %error, "Tick failed");
        self.ok = false;
        self.error = Some(error.to_string());
        self
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct ScheduleWatch {
    queue: QueueId,
    lead: Duration,
}

/// Runs ticks against one device, one store and one dispatcher.
pub struct Engine<S, M> {
    source: S,
    dispatcher: Dispatcher<M>,
    store: Arc<SqliteStore>,
    machine: StateMachine,
    lock_path: PathBuf,
    targets: NotificationTargets,
    min_interval: Duration,
    schedule: Option<ScheduleWatch>,
    config_error: Option<ConfigError>,
}

impl Engine<Poller, TelegramSender> {
    /// Wires an engine from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or an HTTP client
    /// cannot be built. Missing credentials are not an error here; they
    /// surface in each [`TickReport`].
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.storage.database)?);
        let cache: Arc<dyn LocalKeyCache> = store.clone();
        let poller = config.poller(Some(cache))?;
        let dispatcher = Dispatcher::new(config.telegram_sender()?)
            .with_send_delay(Duration::from_millis(config.notify.send_delay_ms));

        let mut engine = Self::new(
            poller,
            dispatcher,
            store,
            config.state_machine(),
            &config.storage.lock_file,
        )
        .with_targets(config.targets())
        .with_min_poll_interval(config.min_poll_interval());

        if let Err(e) = config.validate() {
            tracing::warn!(error = %e, "Configuration incomplete, polling disabled");
            engine = engine.with_config_error(e);
        }

        if config.schedule.enabled
            && let Some(queue) = config.schedule.queue
        {
            engine = engine.with_schedule_warnings(queue, config.warning_lead());
        }
        Ok(engine)
    }
}

impl<S: TelemetrySource, M: MessageSender> Engine<S, M> {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        source: S,
        dispatcher: Dispatcher<M>,
        store: Arc<SqliteStore>,
        machine: StateMachine,
        lock_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            dispatcher,
            store,
            machine,
            lock_path: lock_path.into(),
            targets: NotificationTargets::default(),
            min_interval: Duration::ZERO,
            schedule: None,
            config_error: None,
        }
    }

    /// Marks the configuration as unusable for polling.
    ///
    /// Every tick then skips the device, records it as offline and reports
    /// `error` with `ok = false`. Schedule warnings are still sent.
    #[must_use]
    pub fn with_config_error(mut self, error: ConfigError) -> Self {
        self.config_error = Some(error);
        self
    }

    /// Returns the configuration problem that disables polling, if any.
    #[must_use]
    pub fn config_error(&self) -> Option<&ConfigError> {
        self.config_error.as_ref()
    }

    /// Sets the fixed targets; active subscribers are added on every tick.
    #[must_use]
    pub fn with_targets(mut self, targets: NotificationTargets) -> Self {
        self.targets = targets;
        self
    }

    /// Skips polling when the last poll is more recent than `interval`.
    #[must_use]
    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Sends a warning `lead` before each stored outage of `queue`.
    #[must_use]
    pub fn with_schedule_warnings(mut self, queue: QueueId, lead: Duration) -> Self {
        self.schedule = Some(ScheduleWatch { queue, lead });
        self
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    /// Returns the telemetry source.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns the dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher<M> {
        &self.dispatcher
    }

    /// Runs one tick at the current time.
    pub async fn tick(&self) -> TickReport {
        self.tick_at(Local::now()).await
    }

    /// Runs one tick as if the time were `now`.
    pub async fn tick_at(&self, now: DateTime<Local>) -> TickReport {
        let report = TickReport::at(now);

        let _lock = match TickLock::try_acquire(&self.lock_path) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                tracing::info!("Another tick is running, skipping");
                return TickReport {
                    busy: true,
                    error: Some(Error::Busy.to_string()),
                    ..report
                };
            }
            Err(e) => return report.fail(&e.into()),
        };

        match self.run_locked(now, report.clone()).await {
            Ok(report) => report,
            Err(e) => report.fail(&e),
        }
    }

    async fn run_locked(&self, now: DateTime<Local>, mut report: TickReport) -> Result<TickReport> {
        let now_ts = now.timestamp();

        report.forced = self.store.take_force_poll().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Cannot read force-poll flag");
            false
        });
        let prev = self.store.load()?;

        let due = report.forced
            || self.min_interval.is_zero()
            || prev.seconds_since_check(now_ts).is_none_or(|elapsed| {
                elapsed < 0 || elapsed.unsigned_abs() >= self.min_interval.as_secs()
            });

        if due {
            self.refresh_targets();
            let poll = match &self.config_error {
                Some(e) => PollResult::unavailable(e.to_string()),
                None => self.source.poll().await,
            };
            report.record_poll(&poll);

            let eval = self.machine.evaluate(&prev, &poll, now_ts);
            self.store.commit(&eval.state, &eval.events)?;
            report.power_state = Some(eval.power);
            report.voltage_state = Some(eval.voltage);

            if !eval.transitions.is_empty() {
                tracing::info!(
                    count = eval.transitions.len(),
                    power = %eval.power,
                    voltage = %eval.voltage,
                    "State changed"
                );
            }
            self.notify_transitions(&eval, now, &mut report).await;
            report.changes = eval.transitions;
        } else {
            tracing::debug!(
                min_interval_secs = self.min_interval.as_secs(),
                "Poll interval not elapsed"
            );
            report.skipped = true;
            report.power_state = Some(prev.last_power_state);
            report.voltage_state = Some(prev.last_voltage_state);
            report.voltage = prev.last_voltage;
            report.online = prev.device_online;
            report.method = prev.connection_mode;
            self.refresh_targets();
        }

        self.send_schedule_warnings(now, &mut report).await?;

        if let Some(e) = &self.config_error {
            report.ok = false;
            report.error = Some(Error::Config(e.clone()).to_string());
            return Ok(report);
        }
        report.ok = true;
        Ok(report)
    }

    fn refresh_targets(&self) {
        match self.store.templates() {
            Ok(templates) => self.dispatcher.set_templates(templates),
            Err(e) => tracing::warn!(error = %e, "Cannot load templates, keeping previous"),
        }

        let mut targets = self.targets.clone();
        match self.store.active_subscribers() {
            Ok(subscribers) => targets.chat_ids.extend(subscribers),
            Err(e) => tracing::warn!(error = %e, "Cannot load subscribers"),
        }
        self.dispatcher.set_targets(targets);
    }

    async fn notify_transitions(&self, eval: &Evaluation, now: DateTime<Local>, report: &mut TickReport) {
        let now_ts = now.timestamp();
        for transition in &eval.transitions {
            let Some(kind) = NotificationKind::for_transition(transition) else {
                continue;
            };
            let ctx = match transition {
                Transition::Power {
                    since_ts, voltage, ..
                } => {
                    let mut ctx = NotifyContext::at(now.naive_local())
                        .with_voltage(*voltage, eval.voltage);
                    if let Some(since) = since_ts {
                        ctx = ctx.with_duration(HumanDuration::between(*since, now_ts));
                    }
                    ctx
                }
                Transition::Voltage { to, voltage, .. } => {
                    NotifyContext::at(now.naive_local()).with_voltage(*voltage, *to)
                }
            };

            let sent = self.dispatcher.notify(kind, &ctx).await;
            report.notifications_sent += sent.delivered.len();
            report.notifications_failed += sent.failed.len();
        }
    }

    async fn send_schedule_warnings(&self, now: DateTime<Local>, report: &mut TickReport) -> Result<()> {
        let Some(watch) = self.schedule else {
            return Ok(());
        };

        let local = now.naive_local();
        let today = local.date();
        let from = today.pred_opt().unwrap_or(today);
        let to = today.succ_opt().unwrap_or(today);
        let stored = self.store.intervals_for(from, to, &watch.queue)?;

        for due in due_warnings(&stored, local, watch.lead, &watch.queue) {
            let (start, _) = due.interval.window();
            let minutes = (start - local + TimeDelta::seconds(59)).num_minutes();
            let ctx = NotifyContext::at(local).with_window(
                due.interval.start,
                due.interval.end,
                u64::try_from(minutes).unwrap_or(0),
            );

            tracing::info!(
                queue = %watch.queue,
                start = %due.interval.start,
                minutes,
                "Planned outage ahead"
            );
            let sent = self.dispatcher.notify(NotificationKind::ScheduleWarning, &ctx).await;
            report.notifications_sent += sent.delivered.len();
            report.notifications_failed += sent.failed.len();
            report.schedule_warnings += 1;
            self.store.mark_warned(due.id)?;
        }
        Ok(())
    }

    /// Parses recent announcements (newest first) for the watched queue and
    /// stores the preferred one.
    ///
    /// Returns `Ok(None)` when schedule warnings are not enabled or no
    /// announcement mentions the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn update_schedule(
        &self,
        messages: &[String],
        today: NaiveDate,
    ) -> Result<Option<ParsedSchedule>> {
        let Some(watch) = self.schedule else {
            return Ok(None);
        };

        let candidates = messages.iter().filter_map(|text| {
            parse_schedule(text, &watch.queue, today)
                .inspect_err(|e| tracing::debug!(error = %e, "Announcement skipped"))
                .ok()
        });
        let Some(chosen) = select_preferred(candidates, today) else {
            return Ok(None);
        };

        let date = chosen.effective_date(today);
        let intervals = chosen.to_intervals(today);
        self.store.replace_parsed(date, &watch.queue, &intervals)?;
        tracing::info!(date = %date, queue = %watch.queue, count = intervals.len(), "Schedule updated");
        Ok(Some(chosen))
    }
}
