// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Monitor configuration.
//!
//! A [`MonitorConfig`] is usually loaded from a JSON file; every section and
//! every field has a default, so a minimal file only names the device and
//! its credentials:
//!
//! ```json
//! {
//!   "mode": "hybrid",
//!   "device": { "device_id": "bf3a1c0d9e8f7a6b5c4d", "host": "192.168.1.40" },
//!   "cloud": { "client_id": "abc", "secret": "def" },
//!   "notify": { "bot_token": "123:xyz", "broadcast_chat": "@my_channel" },
//!   "schedule": { "enabled": true, "queue": "4.1" }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DispatchError, ProtocolError};
use crate::notify::{DEFAULT_API_BASE, NotificationTargets, TelegramSender};
use crate::poller::{ConnectionMode, LocalKeyCache, Poller};
use crate::protocol::local::{LocalConfig, ProtocolVersion};
use crate::protocol::{CloudClient, CloudConfig};
use crate::schedule::QueueId;
use crate::state::StateMachine;
use crate::types::VoltageThresholds;

// ============================================================================
// Sections
// ============================================================================

/// Smart plug identity and LAN access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    /// Vendor device id.
    pub device_id: String,
    /// 16-character local key; fetched from the cloud when empty.
    pub local_key: String,
    /// LAN address. Empty disables LAN polling.
    pub host: String,
    /// LAN port.
    pub port: u16,
    /// LAN protocol revision.
    pub version: ProtocolVersion,
    /// LAN exchange timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            local_key: String::new(),
            host: String::new(),
            port: LocalConfig::DEFAULT_PORT,
            version: ProtocolVersion::default(),
            timeout_secs: LocalConfig::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

/// Vendor cloud credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSection {
    /// Regional API endpoint.
    pub endpoint: String,
    /// Project client id.
    pub client_id: String,
    /// Project secret.
    pub secret: String,
    /// File the access token is cached in between runs.
    pub token_cache_file: Option<PathBuf>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for CloudSection {
    fn default() -> Self {
        Self {
            endpoint: CloudConfig::DEFAULT_ENDPOINT.to_string(),
            client_id: String::new(),
            secret: String::new(),
            token_cache_file: None,
            timeout_secs: CloudConfig::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl CloudSection {
    /// Returns `true` if both credentials are set.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.secret.trim().is_empty()
    }
}

/// Chat notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySection {
    /// Bot token. Empty disables sending.
    pub bot_token: String,
    /// Chat ids that always receive notifications.
    pub chat_ids: Vec<String>,
    /// Channel or group receiving every message.
    pub broadcast_chat: Option<String>,
    /// Reminder interval for sustained abnormal voltage, in minutes.
    pub repeat_minutes: u64,
    /// Pause between consecutive sends, in milliseconds.
    pub send_delay_ms: u64,
    /// Bot API base URL.
    pub api_base: String,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_ids: Vec::new(),
            broadcast_chat: None,
            repeat_minutes: 60,
            send_delay_ms: 50,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

/// Planned outage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    /// Whether pre-outage warnings are sent.
    pub enabled: bool,
    /// Queue the premises belongs to.
    pub queue: Option<QueueId>,
    /// How long before an outage to warn, in minutes.
    pub warn_before_minutes: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            enabled: false,
            queue: None,
            warn_before_minutes: 15,
        }
    }
}

/// File locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// SQLite database.
    pub database: PathBuf,
    /// Tick lock file.
    pub lock_file: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            database: PathBuf::from("data/mainswatch.db"),
            lock_file: PathBuf::from("data/tick.lock"),
        }
    }
}

// ============================================================================
// MonitorConfig
// ============================================================================

/// Complete monitor configuration.
///
/// # Examples
///
/// ```
/// use mainswatch::config::MonitorConfig;
/// use mainswatch::poller::ConnectionMode;
///
/// let config = MonitorConfig::default()
///     .with_mode(ConnectionMode::Cloud)
///     .with_device("bf3a1c0d9e8f7a6b5c4d")
///     .with_cloud_credentials("client", "secret");
/// assert!(config.validate().is_ok());
///
/// let missing = MonitorConfig::default().with_mode(ConnectionMode::Local);
/// assert!(missing.validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Smart plug.
    pub device: DeviceSection,
    /// Vendor cloud.
    pub cloud: CloudSection,
    /// Transport selection.
    pub mode: ConnectionMode,
    /// Voltage band boundaries.
    pub thresholds: VoltageThresholds,
    /// Chat notifications.
    pub notify: NotifySection,
    /// Planned outages.
    pub schedule: ScheduleSection,
    /// Files.
    pub storage: StorageSection,
    /// Minimum seconds between polls; `0` polls on every tick.
    pub min_poll_interval_secs: u64,
}

impl MonitorConfig {
    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| ConfigError::Read(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), mode = %config.mode, "Configuration loaded");
        Ok(config)
    }

    /// Sets the connection mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ConnectionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the device id.
    #[must_use]
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device.device_id = device_id.into();
        self
    }

    /// Sets the LAN address and local key.
    #[must_use]
    pub fn with_lan(mut self, host: impl Into<String>, local_key: impl Into<String>) -> Self {
        self.device.host = host.into();
        self.device.local_key = local_key.into();
        self
    }

    /// Sets the cloud credentials.
    #[must_use]
    pub fn with_cloud_credentials(
        mut self,
        client_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        self.cloud.client_id = client_id.into();
        self.cloud.secret = secret.into();
        self
    }

    /// Sets the voltage thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: VoltageThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Sets the bot token and fixed chat ids.
    #[must_use]
    pub fn with_telegram(mut self, bot_token: impl Into<String>, chat_ids: Vec<String>) -> Self {
        self.notify.bot_token = bot_token.into();
        self.notify.chat_ids = chat_ids;
        self
    }

    /// Enables pre-outage warnings for `queue`.
    #[must_use]
    pub fn with_schedule_queue(mut self, queue: QueueId) -> Self {
        self.schedule.enabled = true;
        self.schedule.queue = Some(queue);
        self
    }

    /// Sets the database and lock file paths.
    #[must_use]
    pub fn with_storage(mut self, database: impl Into<PathBuf>, lock_file: impl Into<PathBuf>) -> Self {
        self.storage.database = database.into();
        self.storage.lock_file = lock_file.into();
        self
    }

    /// Sets the minimum poll interval.
    #[must_use]
    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval_secs = interval.as_secs();
        self
    }

    /// Checks that the settings needed by the selected mode are present.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;

        let mode = self.mode.as_str();
        let missing = |key: &str| ConfigError::Missing {
            mode: mode.to_string(),
            key: key.to_string(),
        };

        if self.device.device_id.trim().is_empty() {
            return Err(missing("device.device_id"));
        }
        if self.mode.uses_cloud() {
            if self.cloud.client_id.trim().is_empty() {
                return Err(missing("cloud.client_id"));
            }
            if self.cloud.secret.trim().is_empty() {
                return Err(missing("cloud.secret"));
            }
        }
        if self.mode.uses_local() {
            if self.device.host.trim().is_empty() {
                return Err(missing("device.host"));
            }
            if self.device.local_key.is_empty() && !self.cloud.has_credentials() {
                return Err(missing("device.local_key"));
            }
            if !self.device.local_key.is_empty() && self.device.local_key.len() != 16 {
                return Err(ConfigError::Invalid {
                    key: "device.local_key".to_string(),
                    message: format!("expected 16 bytes, got {}", self.device.local_key.len()),
                });
            }
        }
        if self.schedule.enabled && self.schedule.queue.is_none() {
            return Err(ConfigError::Missing {
                mode: "schedule".to_string(),
                key: "schedule.queue".to_string(),
            });
        }
        Ok(())
    }

    /// LAN settings, if a host is configured.
    #[must_use]
    pub fn local_config(&self) -> Option<LocalConfig> {
        if self.device.host.trim().is_empty() {
            return None;
        }
        Some(
            LocalConfig::new(&self.device.device_id, self.device.host.trim())
                .with_port(self.device.port)
                .with_local_key(&self.device.local_key)
                .with_version(self.device.version)
                .with_timeout(Duration::from_secs(self.device.timeout_secs)),
        )
    }

    /// Cloud client, if credentials are configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn cloud_client(&self) -> Result<Option<CloudClient>, ProtocolError> {
        if !self.cloud.has_credentials() {
            return Ok(None);
        }
        let mut config = CloudConfig::new(self.cloud.client_id.trim(), self.cloud.secret.trim())
            .with_endpoint(&self.cloud.endpoint)
            .with_timeout(Duration::from_secs(self.cloud.timeout_secs));
        if let Some(path) = &self.cloud.token_cache_file {
            config = config.with_token_cache_file(path);
        }
        config.into_client().map(Some)
    }

    /// Builds the poller for the configured mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the cloud HTTP client cannot be built.
    pub fn poller(&self, key_cache: Option<Arc<dyn LocalKeyCache>>) -> Result<Poller, ProtocolError> {
        let mut poller = Poller::new(self.mode, &self.device.device_id);
        if let Some(local) = self.local_config() {
            poller = poller.with_local(local);
        }
        if let Some(cloud) = self.cloud_client()? {
            poller = poller.with_cloud(cloud);
        }
        if let Some(cache) = key_cache {
            poller = poller.with_key_cache(cache);
        }
        Ok(poller)
    }

    /// State machine with the configured thresholds and repeat interval.
    #[must_use]
    pub fn state_machine(&self) -> StateMachine {
        StateMachine::new(self.thresholds)
            .with_repeat_interval(Duration::from_secs(self.notify.repeat_minutes * 60))
    }

    /// Telegram transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn telegram_sender(&self) -> Result<TelegramSender, DispatchError> {
        Ok(TelegramSender::new(self.notify.bot_token.trim())?.with_api_base(&self.notify.api_base))
    }

    /// Fixed notification targets; subscribers are added at dispatch time.
    #[must_use]
    pub fn targets(&self) -> NotificationTargets {
        NotificationTargets::new(
            self.notify
                .broadcast_chat
                .clone()
                .filter(|c| !c.trim().is_empty()),
            self.notify.chat_ids.clone(),
        )
    }

    /// Minimum interval between polls.
    #[must_use]
    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_secs(self.min_poll_interval_secs)
    }

    /// Lead time for pre-outage warnings.
    #[must_use]
    pub fn warning_lead(&self) -> Duration {
        Duration::from_secs(self.schedule.warn_before_minutes * 60)
    }
}
