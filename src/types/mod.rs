// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types shared across the engine.
//!
//! # Types
//!
//! - [`PowerState`] - Mains present / absent / unknown
//! - [`VoltageState`] - Classified line voltage band
//! - [`VoltageThresholds`] - Configurable band boundaries
//! - [`HumanDuration`] - Duration text for notifications

mod duration;
mod power;
mod voltage;

pub use duration::HumanDuration;
pub use power::PowerState;
pub use voltage::{VoltageState, VoltageThresholds};
