// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Planned outage schedules.
//!
//! Announcements posted by the utility are parsed into
//! [`ScheduleInterval`]s for one queue ([`parse_schedule`]); when several
//! announcements are available, [`select_preferred`] picks the one to
//! trust. Stored intervals answer "is an outage scheduled now"
//! ([`is_outage_now`]), "what changes next" ([`next_change`]) and "which
//! pre-outage warnings are due" ([`due_warnings`]).

mod interval;
mod matcher;
mod parser;
mod select;
mod text;

pub use interval::{IntervalSource, QueueId, ScheduleInterval, StoredInterval, end_of_day};
pub use matcher::{ChangeKind, UpcomingChange, due_warnings, is_outage_now, next_change};
pub use parser::{ParsedSchedule, ScheduleFormat, detect_format, parse_schedule};
pub use select::select_preferred;
pub use text::{extract_date, normalize_whitespace};
