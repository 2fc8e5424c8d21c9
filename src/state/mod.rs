// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Monitor state and transition detection.
//!
//! [`PersistedState`] is read once at the start of a tick and written once at
//! the end. [`StateMachine`] turns a poll into the next state plus the
//! [`Transition`]s to announce; each transition becomes one [`Event`] row.
//!
//! # Examples
//!
//! ```
//! use mainswatch::protocol::PollResult;
//! use mainswatch::state::{PersistedState, StateMachine};
//! use mainswatch::types::{PowerState, VoltageThresholds};
//!
//! let machine = StateMachine::new(VoltageThresholds::default());
//! let poll = PollResult { online: true, voltage: Some(231.0), ..PollResult::default() };
//!
//! // The first reading after startup is recorded without a transition.
//! let eval = machine.evaluate(&PersistedState::default(), &poll, 0);
//! assert_eq!(eval.state.last_power_state, PowerState::On);
//! assert!(eval.transitions.is_empty());
//! ```

mod machine;
mod persisted;
mod transition;

pub use machine::{Evaluation, StateMachine};
pub use persisted::PersistedState;
pub use transition::{Event, EventKind, Transition};
