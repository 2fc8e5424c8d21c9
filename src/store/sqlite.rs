// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SQLite implementation of the repositories.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{EventLog, ScheduleRepository, StateRepository};
use crate::error::StorageError;
use crate::notify::{NotificationKind, Template, TemplateSet};
use crate::poller::LocalKeyCache;
use crate::schedule::{QueueId, ScheduleInterval, StoredInterval};
use crate::state::{Event, PersistedState};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";
const FORCE_POLL_KEY: &str = "force_poll";
const LOCAL_KEY_KEY: &str = "local_key";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS monitor_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        last_power_state TEXT NOT NULL,
        last_power_change_ts INTEGER,
        last_voltage REAL,
        last_voltage_state TEXT NOT NULL,
        last_voltage_change_ts INTEGER,
        last_voltage_notify_ts INTEGER,
        last_check_ts INTEGER,
        device_online INTEGER NOT NULL,
        connection_mode TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        type TEXT NOT NULL,
        state TEXT NOT NULL,
        voltage REAL,
        note TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_events_ts ON events (ts);
    CREATE TABLE IF NOT EXISTS power_schedule (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        queue TEXT NOT NULL,
        source TEXT NOT NULL,
        warned INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_power_schedule_date_queue
    ON power_schedule (date, queue);
    CREATE TABLE IF NOT EXISTS subscribers (
        chat_id TEXT PRIMARY KEY,
        active INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS notification_templates (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1
    );
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

fn corrupt(column: &str, value: impl Into<String>) -> StorageError {
    StorageError::Corrupt {
        column: column.to_string(),
        value: value.into(),
    }
}

fn parse_column<T: FromStr>(column: &str, value: &str) -> Result<T, StorageError> {
    value.parse().map_err(|_| corrupt(column, value))
}

fn parse_date(column: &str, value: &str) -> Result<NaiveDate, StorageError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| corrupt(column, value))
}

fn parse_time(column: &str, value: &str) -> Result<NaiveTime, StorageError> {
    NaiveTime::parse_from_str(value, TIME_FORMAT).map_err(|_| corrupt(column, value))
}

fn now_ts() -> i64 {
    Utc::now().timestamp()
}

// ============================================================================
// Raw rows
// ============================================================================

struct EventRow {
    id: i64,
    ts: i64,
    kind: String,
    state: String,
    voltage: Option<f64>,
    note: Option<String>,
}

impl EventRow {
    const COLUMNS: &'static str = "id, ts, type, state, voltage, note";

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            ts: row.get(1)?,
            kind: row.get(2)?,
            state: row.get(3)?,
            voltage: row.get(4)?,
            note: row.get(5)?,
        })
    }

    fn into_event(self) -> Result<Event, StorageError> {
        Ok(Event {
            id: Some(self.id),
            ts: self.ts,
            kind: parse_column("events.type", &self.kind)?,
            state: self.state,
            voltage: self.voltage,
            note: self.note,
        })
    }
}

struct IntervalRow {
    id: i64,
    date: String,
    start: String,
    end: String,
    queue: String,
    source: String,
    warned: bool,
}

impl IntervalRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            date: row.get(1)?,
            start: row.get(2)?,
            end: row.get(3)?,
            queue: row.get(4)?,
            source: row.get(5)?,
            warned: row.get(6)?,
        })
    }

    fn into_stored(self) -> Result<StoredInterval, StorageError> {
        Ok(StoredInterval {
            id: self.id,
            interval: ScheduleInterval {
                date: parse_date("power_schedule.date", &self.date)?,
                start: parse_time("power_schedule.start_time", &self.start)?,
                end: parse_time("power_schedule.end_time", &self.end)?,
                queue: parse_column("power_schedule.queue", &self.queue)?,
                source: parse_column("power_schedule.source", &self.source)?,
            },
            warned: self.warned,
        })
    }
}

// ============================================================================
// SqliteStore
// ============================================================================

/// Repositories backed by one SQLite database.
///
/// # Examples
///
/// ```
/// use mainswatch::store::{SqliteStore, StateRepository};
///
/// let store = SqliteStore::open_in_memory().unwrap();
/// let state = store.load().unwrap();
/// assert_eq!(state.last_power_state.as_str(), "UNKNOWN");
/// ```
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot
    /// be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.seed_templates()?;
        tracing::debug!("State store ready");
        Ok(store)
    }

    fn seed_templates(&self) -> Result<(), StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for kind in NotificationKind::ALL {
            let template = Template::default_for(kind);
            tx.execute(
                "INSERT OR IGNORE INTO notification_templates (id, title, body, enabled)
                 VALUES (?1, ?2, ?3, 1)",
                params![kind.as_str(), template.title, template.body],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    /// Reads the stored templates.
    ///
    /// Rows with an unknown id are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the query failed.
    pub fn templates(&self) -> Result<TemplateSet, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, title, body, enabled FROM notification_templates")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Template {
                    title: row.get(1)?,
                    body: row.get(2)?,
                    enabled: row.get(3)?,
                },
            ))
        })?;

        let mut set = TemplateSet::default();
        for row in rows {
            let (id, template) = row?;
            match id.parse::<NotificationKind>() {
                Ok(kind) => set.set(kind, template),
                Err(_) => tracing::debug!(id = %id, "Ignoring unknown template"),
            }
        }
        Ok(set)
    }

    /// Stores the template for `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write failed.
    pub fn set_template(&self, kind: NotificationKind, template: &Template) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "INSERT INTO notification_templates (id, title, body, enabled)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET title = ?2, body = ?3, enabled = ?4",
            params![kind.as_str(), template.title, template.body, template.enabled],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Subscribers
    // ------------------------------------------------------------------

    /// Active subscriber chat ids in subscription order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query failed.
    pub fn active_subscribers(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT chat_id FROM subscribers WHERE active = 1 ORDER BY created_at, rowid",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Adds or reactivates a subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the write failed.
    pub fn add_subscriber(&self, chat_id: &str) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "INSERT INTO subscribers (chat_id, active, created_at) VALUES (?1, 1, ?2)
             ON CONFLICT(chat_id) DO UPDATE SET active = 1",
            params![chat_id, now_ts()],
        )?;
        Ok(())
    }

    /// Deactivates a subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the write failed.
    pub fn remove_subscriber(&self, chat_id: &str) -> Result<(), StorageError> {
        self.conn
            .lock()
            .execute("UPDATE subscribers SET active = 0 WHERE chat_id = ?1", params![chat_id])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    fn setting(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .lock()
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    /// Caches the device local key for later LAN polls.
    ///
    /// # Errors
    ///
    /// Returns an error if the write failed.
    pub fn save_local_key(&self, key: &str) -> Result<(), StorageError> {
        self.put_setting(LOCAL_KEY_KEY, key)
    }

    /// Asks the next tick to poll regardless of the minimum interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the write failed.
    pub fn request_force_poll(&self) -> Result<(), StorageError> {
        self.put_setting(FORCE_POLL_KEY, "1")
    }

    /// Reads and clears the force-poll flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction failed.
    pub fn take_force_poll(&self) -> Result<bool, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value: Option<String> = tx
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![FORCE_POLL_KEY],
                |row| row.get(0),
            )
            .optional()?;
        tx.execute("DELETE FROM settings WHERE key = ?1", params![FORCE_POLL_KEY])?;
        tx.commit()?;
        Ok(value.is_some_and(|v| v == "1"))
    }
}

// ============================================================================
// Repository implementations
// ============================================================================

impl StateRepository for SqliteStore {
    fn load(&self) -> Result<PersistedState, StorageError> {
        let row = self
            .conn
            .lock()
            .query_row(
                "SELECT last_power_state, last_power_change_ts, last_voltage,
                        last_voltage_state, last_voltage_change_ts, last_voltage_notify_ts,
                        last_check_ts, device_online, connection_mode
                 FROM monitor_state WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                        row.get::<_, Option<i64>>(6)?,
                        row.get::<_, bool>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((power, power_ts, voltage, band, band_ts, notify_ts, check_ts, online, mode)) = row
        else {
            return Ok(PersistedState::default());
        };

        Ok(PersistedState {
            last_power_state: parse_column("monitor_state.last_power_state", &power)?,
            last_power_change_ts: power_ts,
            last_voltage: voltage,
            last_voltage_state: parse_column("monitor_state.last_voltage_state", &band)?,
            last_voltage_change_ts: band_ts,
            last_voltage_notify_ts: notify_ts,
            last_check_ts: check_ts,
            device_online: online,
            connection_mode: parse_column("monitor_state.connection_mode", &mode)?,
        })
    }

    fn commit(&self, state: &PersistedState, events: &[Event]) -> Result<Vec<i64>, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            tx.execute(
                "INSERT INTO events (ts, type, state, voltage, note) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![event.ts, event.kind.as_str(), event.state, event.voltage, event.note],
            )?;
            ids.push(tx.last_insert_rowid());
        }

        tx.execute(
            "INSERT INTO monitor_state (
                 id, last_power_state, last_power_change_ts, last_voltage,
                 last_voltage_state, last_voltage_change_ts, last_voltage_notify_ts,
                 last_check_ts, device_online, connection_mode)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 last_power_state = ?1, last_power_change_ts = ?2, last_voltage = ?3,
                 last_voltage_state = ?4, last_voltage_change_ts = ?5,
                 last_voltage_notify_ts = ?6, last_check_ts = ?7, device_online = ?8,
                 connection_mode = ?9",
            params![
                state.last_power_state.as_str(),
                state.last_power_change_ts,
                state.last_voltage,
                state.last_voltage_state.as_str(),
                state.last_voltage_change_ts,
                state.last_voltage_notify_ts,
                state.last_check_ts,
                state.device_online,
                state.connection_mode.as_str(),
            ],
        )?;

        tx.commit()?;
        Ok(ids)
    }
}

impl EventLog for SqliteStore {
    fn append(&self, event: &Event) -> Result<i64, StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (ts, type, state, voltage, note) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![event.ts, event.kind.as_str(), event.state, event.voltage, event.note],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn events_between(&self, from_ts: i64, to_ts: i64) -> Result<Vec<Event>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events WHERE ts >= ?1 AND ts < ?2 ORDER BY ts, id",
            EventRow::COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![from_ts, to_ts], EventRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    fn last_power_event_before(&self, ts: i64) -> Result<Option<Event>, StorageError> {
        let row = self
            .conn
            .lock()
            .query_row(
                &format!(
                    "SELECT {} FROM events WHERE type = 'POWER' AND ts < ?1
                     ORDER BY ts DESC, id DESC LIMIT 1",
                    EventRow::COLUMNS
                ),
                params![ts],
                EventRow::read,
            )
            .optional()?;
        row.map(EventRow::into_event).transpose()
    }
}

impl ScheduleRepository for SqliteStore {
    fn replace_parsed(
        &self,
        date: NaiveDate,
        queue: &QueueId,
        intervals: &[ScheduleInterval],
    ) -> Result<usize, StorageError> {
        let date_text = date.format(DATE_FORMAT).to_string();
        let queue_text = queue.to_string();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let warned: HashMap<(String, String), bool> = {
            let mut stmt = tx.prepare(
                "SELECT start_time, end_time, warned FROM power_schedule
                 WHERE date = ?1 AND queue = ?2 AND source = 'parsed'",
            )?;
            stmt.query_map(params![date_text, queue_text], |row| {
                Ok((
                    (row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                    row.get::<_, bool>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<_>>()?
        };

        tx.execute(
            "DELETE FROM power_schedule WHERE date = ?1 AND queue = ?2 AND source = 'parsed'",
            params![date_text, queue_text],
        )?;

        let created = now_ts();
        for interval in intervals {
            let start = interval.start.format(TIME_FORMAT).to_string();
            let end = interval.end.format(TIME_FORMAT).to_string();
            let was_warned = warned
                .get(&(start.clone(), end.clone()))
                .copied()
                .unwrap_or(false);
            tx.execute(
                "INSERT INTO power_schedule
                     (date, start_time, end_time, queue, source, warned, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'parsed', ?5, ?6)",
                params![date_text, start, end, queue_text, was_warned, created],
            )?;
        }

        tx.commit()?;
        tracing::debug!(date = %date, queue = %queue, count = intervals.len(), "Replaced parsed schedule");
        Ok(intervals.len())
    }

    fn add_manual(&self, interval: &ScheduleInterval) -> Result<i64, StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO power_schedule
                 (date, start_time, end_time, queue, source, warned, created_at)
             VALUES (?1, ?2, ?3, ?4, 'manual', 0, ?5)",
            params![
                interval.date.format(DATE_FORMAT).to_string(),
                interval.start.format(TIME_FORMAT).to_string(),
                interval.end.format(TIME_FORMAT).to_string(),
                interval.queue.to_string(),
                now_ts(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn intervals_for(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        queue: &QueueId,
    ) -> Result<Vec<StoredInterval>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, date, start_time, end_time, queue, source, warned FROM power_schedule
             WHERE date >= ?1 AND date <= ?2 AND queue = ?3
             ORDER BY date, start_time, id",
        )?;
        let rows = stmt
            .query_map(
                params![
                    from.format(DATE_FORMAT).to_string(),
                    to.format(DATE_FORMAT).to_string(),
                    queue.to_string(),
                ],
                IntervalRow::read,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(IntervalRow::into_stored).collect()
    }

    fn mark_warned(&self, id: i64) -> Result<(), StorageError> {
        self.conn
            .lock()
            .execute("UPDATE power_schedule SET warned = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }
}

impl LocalKeyCache for SqliteStore {
    fn cached_local_key(&self) -> Option<String> {
        match self.setting(LOCAL_KEY_KEY) {
            Ok(key) => key.filter(|k| !k.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read cached local key");
                None
            }
        }
    }

    fn store_local_key(&self, key: &str) {
        if let Err(e) = self.save_local_key(key) {
            tracing::warn!(error = %e, "Failed to cache local key");
        }
    }
}
