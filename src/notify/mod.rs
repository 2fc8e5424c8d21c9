// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound notifications.
//!
//! A [`Transition`](crate::state::Transition) maps to a
//! [`NotificationKind`], whose [`Template`] is rendered with a
//! [`NotifyContext`] and sent by a [`Dispatcher`] to every target through a
//! [`MessageSender`] such as [`TelegramSender`].

mod dispatcher;
mod telegram;
mod template;

pub use dispatcher::{DispatchReport, Dispatcher, MessageSender, NotificationTargets};
pub use telegram::{DEFAULT_API_BASE, TelegramSender};
pub use template::{NotificationKind, NotifyContext, Template, TemplateSet, voltage_advice};
