// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistence of monitor state, the event log and outage windows.
//!
//! The engine only depends on the narrow repository traits below;
//! [`SqliteStore`] implements all of them on one database file that the
//! admin dashboard and the chat bot also read.

mod sqlite;

use chrono::NaiveDate;

use crate::error::StorageError;
use crate::schedule::{QueueId, ScheduleInterval, StoredInterval};
use crate::state::{Event, PersistedState};

pub use sqlite::SqliteStore;

/// Typed single-record monitor state.
pub trait StateRepository {
    /// Reads the state, or the default for a fresh install.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or holds corrupt values.
    fn load(&self) -> Result<PersistedState, StorageError>;

    /// Writes `state` and appends `events` in one transaction.
    ///
    /// Returns the ids assigned to the events.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction failed; nothing is written then.
    fn commit(&self, state: &PersistedState, events: &[Event]) -> Result<Vec<i64>, StorageError>;
}

/// Append-only transition history.
pub trait EventLog {
    /// Appends one event and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert failed.
    fn append(&self, event: &Event) -> Result<i64, StorageError>;

    /// Events with `from_ts <= ts < to_ts`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query failed.
    fn events_between(&self, from_ts: i64, to_ts: i64) -> Result<Vec<Event>, StorageError>;

    /// The newest power event strictly before `ts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query failed.
    fn last_power_event_before(&self, ts: i64) -> Result<Option<Event>, StorageError>;
}

/// Stored outage windows.
pub trait ScheduleRepository {
    /// Replaces the parsed windows for `date` and `queue` with `intervals`.
    ///
    /// Manual windows are left untouched. A window identical to one already
    /// stored keeps its warned flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction failed.
    fn replace_parsed(
        &self,
        date: NaiveDate,
        queue: &QueueId,
        intervals: &[ScheduleInterval],
    ) -> Result<usize, StorageError>;

    /// Adds a manually entered window.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert failed.
    fn add_manual(&self, interval: &ScheduleInterval) -> Result<i64, StorageError>;

    /// Windows for `queue` dated within `from..=to`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query failed or a row is corrupt.
    fn intervals_for(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        queue: &QueueId,
    ) -> Result<Vec<StoredInterval>, StorageError>;

    /// Records that the pre-outage warning for window `id` was sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the update failed.
    fn mark_warned(&self, id: i64) -> Result<(), StorageError>;
}
