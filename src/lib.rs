// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `mainswatch` - mains power and line voltage monitoring through a Tuya
//! smart plug.
//!
//! The plug is read over its encrypted LAN protocol or through the vendor
//! cloud. Each reading is classified into a power state and a voltage band;
//! changes are logged to SQLite and announced to Telegram chats. Planned
//! outage announcements can be parsed into schedules that trigger a warning
//! shortly before the lights go out.
//!
//! # Features
//!
//! - **Telemetry**: LAN protocol 3.3/3.4/3.5 and signed cloud REST, with
//!   `cloud`, `local` and `hybrid` connection modes
//! - **State tracking**: debounced power transitions, voltage bands with
//!   reminders for sustained abnormal voltage
//! - **Notifications**: editable templates, broadcast channel plus
//!   subscribers, per-target failure isolation
//! - **Schedules**: two announcement layouts, date extraction, pre-outage
//!   warnings
//!
//! # Quick Start
//!
//! ```no_run
//! use mainswatch::{Engine, MonitorConfig};
//!
//! #[tokio::main]
//! async fn main() -> mainswatch::Result<()> {
//!     let config = MonitorConfig::load("mainswatch.json")?;
//!     let engine = Engine::from_config(&config)?;
//!
//!     let report = engine.tick().await;
//!     println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! ## Reading the plug directly
//!
//! ```no_run
//! use mainswatch::protocol::local::LocalConfig;
//!
//! # async fn example() -> mainswatch::Result<()> {
//! let client = LocalConfig::new("bf3a1c0d9e8f7a6b5c4d", "192.168.1.40")
//!     .with_local_key("0123456789abcdef")
//!     .into_client()?;
//!
//! let result = client.get_status().await;
//! println!("online={} voltage={:?}", result.online, result.voltage);
//! # Ok(())
//! # }
//! ```

pub mod config;
mod engine;
pub mod error;
mod lock;
pub mod notify;
pub mod poller;
pub mod protocol;
pub mod schedule;
pub mod state;
pub mod stats;
pub mod store;
pub mod types;

pub use config::MonitorConfig;
pub use engine::{Engine, TickReport};
pub use error::{
    ConfigError, DispatchError, Error, ParseError, ProtocolError, Result, ScheduleParseError,
    StorageError,
};
pub use lock::TickLock;
pub use poller::{ConnectionMode, Poller};
pub use protocol::{PollMethod, PollResult, TelemetrySource};
pub use state::{PersistedState, StateMachine, Transition};
pub use types::{HumanDuration, PowerState, VoltageState, VoltageThresholds};
