// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Telegram Bot API transport.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::dispatcher::MessageSender;
use crate::error::DispatchError;

/// Default Bot API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ReplyParameters>,
}

#[derive(Debug, Deserialize)]
struct ReplyParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Sends plain-text messages through a bot.
///
/// # Examples
///
/// ```
/// use mainswatch::notify::TelegramSender;
///
/// let sender = TelegramSender::new("123:abc").unwrap()
///     .with_api_base("http://127.0.0.1:9000");
/// assert!(sender.is_configured());
/// ```
#[derive(Debug, Clone)]
pub struct TelegramSender {
    http: Client,
    api_base: String,
    token: String,
}

impl TelegramSender {
    /// Per-request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a sender for the bot `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(token: impl Into<String>) -> Result<Self, DispatchError> {
        let http = Client::builder().timeout(Self::DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.into(),
        })
    }

    /// Overrides the API base URL.
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Returns `true` if a bot token is set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.token.trim().is_empty()
    }
}

impl MessageSender for TelegramSender {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), DispatchError> {
        if !self.is_configured() {
            return Err(DispatchError::NotConfigured);
        }

        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let response = self
            .http
            .post(&url)
            .json(&SendMessage {
                chat_id,
                text,
                disable_web_page_preview: true,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let reply: Option<ApiReply> = serde_json::from_str(&body).ok();
        let retry_after = reply
            .as_ref()
            .and_then(|r| r.parameters.as_ref())
            .and_then(|p| p.retry_after);

        if status == StatusCode::TOO_MANY_REQUESTS || retry_after.is_some() {
            return Err(DispatchError::RateLimited(retry_after.unwrap_or(1)));
        }

        match reply {
            Some(reply) if reply.ok => {
                tracing::trace!(chat_id, "Message delivered");
                Ok(())
            }
            Some(reply) => Err(DispatchError::Rejected(
                reply
                    .description
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            )),
            None => Err(DispatchError::Rejected(format!(
                "HTTP {} with unreadable body",
                status.as_u16()
            ))),
        }
    }
}
