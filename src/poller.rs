// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection-mode orchestration.
//!
//! The [`Poller`] chooses between the LAN client and the cloud client
//! according to [`ConnectionMode`] and always returns a [`PollResult`]:
//!
//! | Mode     | Order                                      |
//! |----------|--------------------------------------------|
//! | `cloud`  | cloud only                                 |
//! | `local`  | LAN only                                   |
//! | `hybrid` | LAN first, cloud when LAN is not online    |
//!
//! For LAN reads the local key is taken from configuration, then from the
//! [`LocalKeyCache`], then from the cloud (and written back to the cache).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ProtocolError};
use crate::protocol::local::{LocalClient, LocalConfig};
use crate::protocol::{
    CloudClient, PollMethod, PollResult, TelemetrySource, duration_ms, elapsed_ms,
};

/// Message used when no transport could be tried.
pub const NO_METHOD_AVAILABLE: &str = "No connection method available";

/// Which transports the poller may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Vendor cloud only.
    #[default]
    Cloud,
    /// LAN only.
    Local,
    /// LAN with cloud fallback.
    Hybrid,
}

impl ConnectionMode {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::Local => "local",
            Self::Hybrid => "hybrid",
        }
    }

    /// Returns `true` if the LAN client is tried.
    #[must_use]
    pub const fn uses_local(&self) -> bool {
        matches!(self, Self::Local | Self::Hybrid)
    }

    /// Returns `true` if the cloud client is tried.
    #[must_use]
    pub const fn uses_cloud(&self) -> bool {
        matches!(self, Self::Cloud | Self::Hybrid)
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cloud" => Ok(Self::Cloud),
            "local" => Ok(Self::Local),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(ConfigError::Invalid {
                key: "connection_mode".to_string(),
                message: format!("unknown mode {other:?}"),
            }),
        }
    }
}

/// Persistent slot for a local key fetched from the cloud.
pub trait LocalKeyCache: Send + Sync {
    /// Returns the cached key.
    fn cached_local_key(&self) -> Option<String>;

    /// Stores a key.
    fn store_local_key(&self, key: &str);
}

/// Reads telemetry using the configured connection mode.
///
/// # Examples
///
/// ```no_run
/// use mainswatch::poller::{ConnectionMode, Poller};
/// use mainswatch::protocol::CloudConfig;
///
/// # async fn example() -> Result<(), mainswatch::ProtocolError> {
/// let cloud = CloudConfig::new("client-id", "secret").into_client()?;
/// let poller = Poller::new(ConnectionMode::Cloud, "bf3a1c0d9e8f7a6b5c4d").with_cloud(cloud);
/// let result = poller.poll_device().await;
/// println!("{:?} via {}", result.voltage, result.method);
/// # Ok(())
/// # }
/// ```
pub struct Poller {
    mode: ConnectionMode,
    device_id: String,
    local: Option<LocalConfig>,
    cloud: Option<CloudClient>,
    key_cache: Option<Arc<dyn LocalKeyCache>>,
    resolved_key: Mutex<Option<String>>,
    budget: Duration,
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("mode", &self.mode)
            .field("device_id", &self.device_id)
            .field("local", &self.local.as_ref().map(LocalConfig::host))
            .field("cloud", &self.cloud.is_some())
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Default upper bound for one transport call.
    pub const DEFAULT_BUDGET: Duration = Duration::from_secs(15);

    /// Creates a poller with no transports attached.
    #[must_use]
    pub fn new(mode: ConnectionMode, device_id: impl Into<String>) -> Self {
        Self {
            mode,
            device_id: device_id.into(),
            local: None,
            cloud: None,
            key_cache: None,
            resolved_key: Mutex::new(None),
            budget: Self::DEFAULT_BUDGET,
        }
    }

    /// Attaches LAN settings. An empty local key is resolved at poll time.
    #[must_use]
    pub fn with_local(mut self, config: LocalConfig) -> Self {
        self.local = Some(config);
        self
    }

    /// Attaches the cloud client.
    #[must_use]
    pub fn with_cloud(mut self, client: CloudClient) -> Self {
        self.cloud = Some(client);
        self
    }

    /// Attaches a persistent local-key cache.
    #[must_use]
    pub fn with_key_cache(mut self, cache: Arc<dyn LocalKeyCache>) -> Self {
        self.key_cache = Some(cache);
        self
    }

    /// Sets the per-transport time budget.
    #[must_use]
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Returns the connection mode.
    #[must_use]
    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    /// Returns the cloud client, if attached.
    #[must_use]
    pub fn cloud(&self) -> Option<&CloudClient> {
        self.cloud.as_ref()
    }

    /// Polls the device once.
    ///
    /// The returned `method` names the transport that answered; it is
    /// `none` whenever the answering transport failed. Earlier transport
    /// failures are kept in `error` even when a later one answered offline.
    pub async fn poll_device(&self) -> PollResult {
        let started = Instant::now();
        let mut errors: Vec<String> = Vec::new();
        let mut result: Option<PollResult> = None;

        if self.mode.uses_local() {
            match self.local_client().await {
                Ok(client) => {
                    let local = self.bounded(PollMethod::Local, client.get_status()).await;
                    if let Some(e) = &local.error {
                        errors.push(format!("local: {e}"));
                    }
                    result = Some(local);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "LAN polling unavailable");
                    errors.push(format!("local: {e}"));
                }
            }
        }

        let local_online = result.as_ref().is_some_and(|r| r.online);
        if self.mode.uses_cloud() && !local_online {
            if let Some(cloud) = &self.cloud {
                if self.mode == ConnectionMode::Hybrid {
                    tracing::debug!("Falling back to cloud");
                }
                let remote = self
                    .bounded(PollMethod::Cloud, cloud.get_device_data(&self.device_id))
                    .await;
                if let Some(e) = &remote.error {
                    errors.push(format!("cloud: {e}"));
                }
                result = Some(remote);
            } else {
                errors.push("cloud: client not configured".to_string());
            }
        }

        let mut result = match result {
            Some(r) => r,
            None => {
                let mut r = PollResult::unavailable(NO_METHOD_AVAILABLE);
                if !errors.is_empty() {
                    r.error = Some(format!("{NO_METHOD_AVAILABLE} ({})", errors.join("; ")));
                }
                r
            }
        };

        if result.error.is_some() {
            result.method = PollMethod::None;
            if errors.len() > 1 {
                result.error = Some(errors.join("; "));
            }
        } else if !result.online && !errors.is_empty() {
            // the cloud answered but reports the device offline
            result.error = Some(errors.join("; "));
        }
        result.latency_ms = elapsed_ms(started);

        tracing::info!(
            mode = %self.mode,
            method = %result.method,
            online = result.online,
            voltage = ?result.voltage,
            latency_ms = result.latency_ms,
            "Poll finished"
        );
        result
    }

    async fn bounded(
        &self,
        method: PollMethod,
        call: impl Future<Output = PollResult>,
    ) -> PollResult {
        match tokio::time::timeout(self.budget, call).await {
            Ok(result) => result,
            Err(_) => {
                let budget = duration_ms(self.budget);
                PollResult::failed(method, budget, ProtocolError::Timeout(budget).to_string())
            }
        }
    }

    async fn local_client(&self) -> Result<LocalClient, ProtocolError> {
        let config = self.local.as_ref().ok_or_else(|| {
            ProtocolError::InvalidAddress("LAN settings not configured".to_string())
        })?;
        if config.host().trim().is_empty() {
            return Err(ProtocolError::InvalidAddress("empty host".to_string()));
        }

        let key = self.resolve_local_key(config).await?;
        config.clone().with_local_key(key).into_client()
    }

    async fn resolve_local_key(&self, config: &LocalConfig) -> Result<String, ProtocolError> {
        if !config.local_key().is_empty() {
            return Ok(config.local_key().to_string());
        }
        if let Some(key) = self.resolved_key.lock().clone() {
            return Ok(key);
        }
        if let Some(key) = self
            .key_cache
            .as_ref()
            .and_then(|cache| cache.cached_local_key())
            .filter(|k| !k.is_empty())
        {
            *self.resolved_key.lock() = Some(key.clone());
            return Ok(key);
        }

        let cloud = self.cloud.as_ref().ok_or_else(|| {
            ProtocolError::InvalidKey("no local key and no cloud client to fetch it".to_string())
        })?;
        tracing::info!(device_id = %self.device_id, "Fetching local key from cloud");
        let key = tokio::time::timeout(self.budget, cloud.get_local_key(&self.device_id))
            .await
            .map_err(|_| ProtocolError::Timeout(duration_ms(self.budget)))??
            .ok_or_else(|| ProtocolError::InvalidKey("cloud returned no local key".to_string()))?;

        if let Some(cache) = &self.key_cache {
            cache.store_local_key(&key);
        }
        *self.resolved_key.lock() = Some(key.clone());
        Ok(key)
    }
}

impl TelemetrySource for Poller {
    async fn poll(&self) -> PollResult {
        self.poll_device().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MemoryCache(Mutex<Option<String>>);

    impl LocalKeyCache for MemoryCache {
        fn cached_local_key(&self) -> Option<String> {
            self.0.lock().clone()
        }

        fn store_local_key(&self, key: &str) {
            *self.0.lock() = Some(key.to_string());
        }
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("Hybrid".parse::<ConnectionMode>().unwrap(), ConnectionMode::Hybrid);
        assert!("lan".parse::<ConnectionMode>().is_err());
        assert!(ConnectionMode::Hybrid.uses_local() && ConnectionMode::Hybrid.uses_cloud());
        assert!(!ConnectionMode::Local.uses_cloud());
    }

    #[tokio::test]
    async fn nothing_configured_reports_no_method() {
        let poller = Poller::new(ConnectionMode::Cloud, "dev");
        let result = poller.poll_device().await;
        assert!(!result.online);
        assert_eq!(result.method, PollMethod::None);
        assert!(result.error.unwrap().starts_with(NO_METHOD_AVAILABLE));
    }

    #[tokio::test]
    async fn local_mode_without_key_source_is_unavailable() {
        let poller = Poller::new(ConnectionMode::Local, "dev")
            .with_local(LocalConfig::new("dev", "127.0.0.1"));
        let result = poller.poll_device().await;
        assert!(!result.online);
        assert_eq!(result.method, PollMethod::None);
        assert!(result.error.unwrap().contains("local"));
    }

    #[tokio::test]
    async fn cached_key_is_used_before_cloud() {
        let cache = Arc::new(MemoryCache::default());
        cache.store_local_key("0123456789abcdef");
        let poller = Poller::new(ConnectionMode::Local, "dev")
            .with_local(LocalConfig::new("dev", "127.0.0.1"))
            .with_key_cache(cache);

        let key = poller
            .resolve_local_key(&LocalConfig::new("dev", "127.0.0.1"))
            .await
            .unwrap();
        assert_eq!(key, "0123456789abcdef");
    }
}
