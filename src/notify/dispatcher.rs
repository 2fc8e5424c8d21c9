// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fan-out of rendered messages to every target.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;

use super::template::{NotificationKind, NotifyContext, TemplateSet};
use crate::error::DispatchError;

// ============================================================================
// MessageSender
// ============================================================================

/// A chat transport able to deliver one text message to one chat.
#[allow(async_fn_in_trait)]
pub trait MessageSender {
    /// Sends `text` to `chat_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejected or failed the delivery.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), DispatchError>;
}

// ============================================================================
// Targets and report
// ============================================================================

/// Who receives notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationTargets {
    /// A channel or group that gets every message.
    pub broadcast: Option<String>,
    /// Individual subscribers.
    pub chat_ids: Vec<String>,
}

impl NotificationTargets {
    /// Creates targets from a broadcast chat and subscriber ids.
    #[must_use]
    pub fn new(broadcast: Option<String>, chat_ids: Vec<String>) -> Self {
        Self {
            broadcast,
            chat_ids,
        }
    }

    /// Returns the distinct non-empty chat ids, broadcast first.
    #[must_use]
    pub fn resolve(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.broadcast
            .iter()
            .chain(self.chat_ids.iter())
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .filter(|id| seen.insert(id.to_string()))
            .map(str::to_string)
            .collect()
    }
}

/// Outcome of sending one message to all targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Chats that received the message.
    pub delivered: Vec<String>,
    /// Chats that failed, with the error text.
    pub failed: Vec<(String, String)>,
}

impl DispatchReport {
    /// Number of attempted deliveries.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    /// Returns `true` if nothing was attempted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempted() == 0
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Renders notifications and delivers them to every target in turn.
///
/// A failure for one chat is logged and does not stop delivery to the rest.
/// Consecutive sends are spaced by the send delay, also across separate
/// [`notify`](Self::notify) calls.
#[derive(Debug)]
pub struct Dispatcher<S> {
    sender: S,
    templates: RwLock<TemplateSet>,
    targets: RwLock<NotificationTargets>,
    send_delay: Duration,
    last_send: Mutex<Option<Instant>>,
}

impl<S: MessageSender> Dispatcher<S> {
    /// Pause between consecutive sends.
    pub const DEFAULT_SEND_DELAY: Duration = Duration::from_millis(50);

    /// Creates a dispatcher with built-in templates and no targets.
    #[must_use]
    pub fn new(sender: S) -> Self {
        Self {
            sender,
            templates: RwLock::new(TemplateSet::default()),
            targets: RwLock::new(NotificationTargets::default()),
            send_delay: Self::DEFAULT_SEND_DELAY,
            last_send: Mutex::new(None),
        }
    }

    /// Sets the initial targets.
    #[must_use]
    pub fn with_targets(self, targets: NotificationTargets) -> Self {
        *self.targets.write() = targets;
        self
    }

    /// Sets the pause between consecutive sends.
    #[must_use]
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// Returns the underlying transport.
    #[must_use]
    pub fn sender(&self) -> &S {
        &self.sender
    }

    /// Replaces the template set.
    pub fn set_templates(&self, templates: TemplateSet) {
        *self.templates.write() = templates;
    }

    /// Replaces the targets.
    pub fn set_targets(&self, targets: NotificationTargets) {
        *self.targets.write() = targets;
    }

    /// Returns the current targets.
    #[must_use]
    pub fn targets(&self) -> NotificationTargets {
        self.targets.read().clone()
    }

    /// Renders `kind` with `ctx` and sends it to every target.
    ///
    /// A disabled template yields an empty report.
    pub async fn notify(&self, kind: NotificationKind, ctx: &NotifyContext) -> DispatchReport {
        let text = self.templates.read().render(kind, ctx);
        match text {
            Some(text) => {
                tracing::debug!(kind = %kind, "Dispatching notification");
                self.broadcast(&text).await
            }
            None => {
                tracing::debug!(kind = %kind, "Template disabled, skipping");
                DispatchReport::default()
            }
        }
    }

    /// Sends `text` to every target sequentially.
    pub async fn broadcast(&self, text: &str) -> DispatchReport {
        let chats = self.targets.read().resolve();
        let mut report = DispatchReport::default();

        for chat_id in chats {
            self.pace().await;
            let result = self.sender.send_message(&chat_id, text).await;
            *self.last_send.lock() = Some(Instant::now());
            match result {
                Ok(()) => report.delivered.push(chat_id),
                Err(e) => {
                    tracing::warn!(chat_id = %chat_id, error = %e, "Notification delivery failed");
                    report.failed.push((chat_id, e.to_string()));
                }
            }
        }
        report
    }

    async fn pace(&self) {
        if self.send_delay.is_zero() {
            return;
        }
        let previous = *self.last_send.lock();
        if let Some(previous) = previous {
            tokio::time::sleep_until(previous + self.send_delay).await;
        }
    }
}
