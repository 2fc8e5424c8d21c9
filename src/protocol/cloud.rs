// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Vendor cloud REST client.
//!
//! Every request carries an HMAC-SHA256 signature over a canonical string:
//!
//! ```text
//! client_id [access_token] t nonce METHOD "\n" sha256(body) "\n" "" "\n" path
//! ```
//!
//! The token request is signed without an access token. The access token is
//! cached in memory (and optionally in a JSON file) and reused until 60
//! seconds before it expires.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ParseError, ProtocolError};
use crate::protocol::{PollMethod, PollResult, Readings, StatusItem, elapsed_ms};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_PATH: &str = "/v1.0/token?grant_type=1";
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 7200;

// ============================================================================
// Signing
// ============================================================================

/// Builds the canonical string that gets signed.
///
/// # Examples
///
/// ```
/// use mainswatch::protocol::string_to_sign;
///
/// let s = string_to_sign("cid", Some("tok"), "1700000000000", "n1", "GET", "", "/v1.0/devices/d1");
/// assert_eq!(
///     s,
///     "cidtok1700000000000n1GET\ne3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855\n\n/v1.0/devices/d1"
/// );
/// ```
#[must_use]
pub fn string_to_sign(
    client_id: &str,
    access_token: Option<&str>,
    timestamp_ms: &str,
    nonce: &str,
    method: &str,
    body: &str,
    path: &str,
) -> String {
    let body_hash = hex::encode(Sha256::digest(body.as_bytes()));
    let token = access_token.unwrap_or_default();
    format!(
        "{client_id}{token}{timestamp_ms}{nonce}{}\n{body_hash}\n\n{path}",
        method.to_uppercase()
    )
}

/// Signs `data` with HMAC-SHA256 and returns uppercase hex.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidKey`] if the secret cannot key the MAC.
pub fn sign(secret: &str, data: &str) -> Result<String, ProtocolError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    code: Option<i64>,
    msg: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TokenResult {
    access_token: String,
    #[serde(default = "default_token_lifetime")]
    expire_time: i64,
}

fn default_token_lifetime() -> i64 {
    DEFAULT_TOKEN_LIFETIME_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CachedToken {
    access_token: String,
    /// Unix seconds.
    expire_time: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        now < self.expire_time - TOKEN_REFRESH_MARGIN_SECS
    }
}

/// Device metadata from the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Whether the cloud currently sees the device.
    #[serde(default)]
    pub online: bool,
    /// LAN encryption key.
    #[serde(default)]
    pub local_key: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Last known public IP.
    #[serde(default)]
    pub ip: Option<String>,
}

// ============================================================================
// CloudConfig
// ============================================================================

/// Credentials and endpoint for the vendor cloud.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mainswatch::protocol::CloudConfig;
///
/// let config = CloudConfig::new("client-id", "secret")
///     .with_endpoint("https://openapi.tuyaus.com")
///     .with_timeout(Duration::from_secs(5));
/// assert_eq!(config.endpoint(), "https://openapi.tuyaus.com");
/// ```
#[derive(Debug, Clone)]
pub struct CloudConfig {
    endpoint: String,
    client_id: String,
    secret: String,
    timeout: Duration,
    token_cache_file: Option<PathBuf>,
}

impl CloudConfig {
    /// Default regional endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://openapi.tuyaeu.com";
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a configuration for the default endpoint.
    #[must_use]
    pub fn new(client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            client_id: client_id.into(),
            secret: secret.into(),
            timeout: Self::DEFAULT_TIMEOUT,
            token_cache_file: None,
        }
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Persists the access token to `path` between process runs.
    #[must_use]
    pub fn with_token_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_cache_file = Some(path.into());
        self
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Creates a [`CloudClient`].
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn into_client(self) -> Result<CloudClient, ProtocolError> {
        let http = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(ProtocolError::Http)?;
        Ok(CloudClient {
            config: self,
            http,
            token: Mutex::new(None),
            requests: AtomicU64::new(0),
        })
    }
}

// ============================================================================
// CloudClient
// ============================================================================

/// Signed REST client for the vendor cloud.
///
/// # Examples
///
/// ```no_run
/// use mainswatch::protocol::CloudConfig;
///
/// # async fn example() -> Result<(), mainswatch::ProtocolError> {
/// let client = CloudConfig::new("client-id", "secret").into_client()?;
/// let info = client.get_device_info("bf3a1c0d9e8f7a6b5c4d").await?;
/// println!("online: {}", info.online);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CloudClient {
    config: CloudConfig,
    http: Client,
    token: Mutex<Option<CachedToken>>,
    requests: AtomicU64,
}

impl CloudClient {
    /// Returns the number of HTTP requests issued so far, token requests
    /// included.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Fetches device metadata.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-2xx status or `success: false`.
    pub async fn get_device_info(&self, device_id: &str) -> Result<DeviceInfo, ProtocolError> {
        let path = format!("/v1.0/devices/{}", urlencoding::encode(device_id));
        self.request(Method::GET, &path, None).await
    }

    /// Fetches the data-point status list.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-2xx status or `success: false`.
    pub async fn get_device_status(&self, device_id: &str) -> Result<Vec<StatusItem>, ProtocolError> {
        let path = format!("/v1.0/devices/{}/status", urlencoding::encode(device_id));
        self.request(Method::GET, &path, None).await
    }

    /// Returns the device's LAN key, if the cloud exposes one.
    ///
    /// # Errors
    ///
    /// Returns error if the device info request fails.
    pub async fn get_local_key(&self, device_id: &str) -> Result<Option<String>, ProtocolError> {
        let info = self.get_device_info(device_id).await?;
        Ok(info.local_key.filter(|key| !key.is_empty()))
    }

    /// Reads device telemetry.
    ///
    /// # Errors
    ///
    /// Returns error if either the info or the status request fails.
    pub async fn fetch_readings(&self, device_id: &str) -> Result<(bool, Readings), ProtocolError> {
        let info = self.get_device_info(device_id).await?;
        let status = self.get_device_status(device_id).await?;
        Ok((info.online, Readings::from_cloud_status(&status)))
    }

    /// Reads device telemetry, converting every failure into an offline
    /// result.
    pub async fn get_device_data(&self, device_id: &str) -> PollResult {
        let started = Instant::now();
        match self.fetch_readings(device_id).await {
            Ok((online, readings)) => {
                let mut result =
                    PollResult::from_readings(readings, PollMethod::Cloud, elapsed_ms(started));
                result.online = online;
                result
            }
            Err(e) => {
                tracing::warn!(device_id, error = %e, "Cloud status failed");
                PollResult::failed(PollMethod::Cloud, elapsed_ms(started), e.to_string())
            }
        }
    }

    /// Drops the cached access token so the next request fetches a new one.
    pub fn invalidate_token(&self) {
        *self.token.lock() = None;
        if let Some(path) = &self.config.token_cache_file {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Cannot remove token cache"),
            }
        }
    }

    async fn access_token(&self) -> Result<String, ProtocolError> {
        let now = chrono::Utc::now().timestamp();

        let cached = self.token.lock().clone();
        if let Some(token) = cached.filter(|t| t.is_fresh(now)) {
            return Ok(token.access_token);
        }

        if let Some(token) = self.read_token_file().filter(|t| t.is_fresh(now)) {
            tracing::debug!("Using access token from cache file");
            let access_token = token.access_token.clone();
            *self.token.lock() = Some(token);
            return Ok(access_token);
        }

        let token = self.fetch_token(now).await?;
        let access_token = token.access_token.clone();
        self.write_token_file(&token);
        *self.token.lock() = Some(token);
        Ok(access_token)
    }

    async fn fetch_token(&self, now: i64) -> Result<CachedToken, ProtocolError> {
        tracing::debug!(endpoint = %self.config.endpoint, "Requesting access token");
        let response = self.send(Method::GET, TOKEN_PATH, None, None).await?;
        let envelope: ApiEnvelope<TokenResult> = decode(response).await?;
        let result = unwrap_envelope(envelope)?;
        Ok(CachedToken {
            access_token: result.access_token,
            expire_time: now + result.expire_time,
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, ProtocolError> {
        let token = self.access_token().await?;
        let response = self.send(method, path, Some(&token), body).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.invalidate_token();
            return Err(ProtocolError::AuthenticationFailed);
        }

        let envelope: ApiEnvelope<T> = decode(response).await?;
        unwrap_envelope(envelope).inspect_err(|e| {
            if e.is_auth() {
                tracing::info!(error = %e, "Access token rejected");
                self.invalidate_token();
            }
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        access_token: Option<&str>,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ProtocolError> {
        let body_text = body.map(ToString::to_string).unwrap_or_default();
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let nonce = uuid::Uuid::new_v4().to_string();
        let payload = string_to_sign(
            &self.config.client_id,
            access_token,
            &timestamp,
            &nonce,
            method.as_str(),
            &body_text,
            path,
        );
        let signature = sign(&self.config.secret, &payload)?;

        let url = format!("{}{path}", self.config.endpoint);
        let mut request = self
            .http
            .request(method, &url)
            .header("client_id", &self.config.client_id)
            .header("sign", signature)
            .header("t", &timestamp)
            .header("sign_method", "HMAC-SHA256")
            .header("nonce", &nonce);
        if let Some(token) = access_token {
            request = request.header("access_token", token);
        }
        if body.is_some() {
            request = request
                .header("Content-Type", "application/json")
                .body(body_text);
        }

        self.requests.fetch_add(1, Ordering::Relaxed);
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::UNAUTHORIZED {
            return Err(ProtocolError::ConnectionFailed(format!(
                "HTTP {} from {path}",
                status.as_u16()
            )));
        }
        Ok(response)
    }

    fn read_token_file(&self) -> Option<CachedToken> {
        let path = self.config.token_cache_file.as_deref()?;
        let text = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&text)
            .inspect_err(|e| tracing::debug!(path = %path.display(), error = %e, "Ignoring token cache"))
            .ok()
    }

    fn write_token_file(&self, token: &CachedToken) {
        let Some(path) = self.config.token_cache_file.as_deref() else {
            return;
        };
        if let Err(e) = write_json(path, token) {
            tracing::warn!(path = %path.display(), error = %e, "Cannot write token cache");
        }
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProtocolError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ProtocolError::Payload(ParseError::Json(e)))
}

fn unwrap_envelope<T>(envelope: ApiEnvelope<T>) -> Result<T, ProtocolError> {
    if !envelope.success {
        return Err(ProtocolError::Api {
            code: envelope.code.unwrap_or_default(),
            message: envelope.msg.unwrap_or_else(|| "unknown error".to_string()),
        });
    }
    envelope
        .result
        .ok_or_else(|| ProtocolError::Payload(ParseError::MissingField("result".to_string())))
}

fn write_json(path: &Path, token: &CachedToken) -> std::io::Result<()> {
    let text = serde_json::to_string(token).map_err(std::io::Error::other)?;
    std::fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_uppercase_hex_hmac() {
        // RFC 4231 test case 2.
        let sig = sign("Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5BDCC146BF60754E6A042426089575C75A003F089D2739839DEC58B964EC3843"
        );
    }

    #[test]
    fn token_request_string_has_no_token() {
        let s = string_to_sign("cid", None, "1", "n", "get", "", TOKEN_PATH);
        assert!(s.starts_with("cid1nGET\n"));
        assert!(s.ends_with("\n\n/v1.0/token?grant_type=1"));
    }

    #[test]
    fn body_hash_covers_payload() {
        let empty = string_to_sign("c", Some("t"), "1", "n", "POST", "", "/p");
        let full = string_to_sign("c", Some("t"), "1", "n", "POST", "{\"a\":1}", "/p");
        assert_ne!(empty, full);
    }

    #[test]
    fn cached_token_refreshes_before_expiry() {
        let token = CachedToken {
            access_token: "abc".to_string(),
            expire_time: 1_000,
        };
        assert!(token.is_fresh(939));
        assert!(!token.is_fresh(940));
    }

    #[test]
    fn envelope_failure_maps_to_api_error() {
        let envelope: ApiEnvelope<DeviceInfo> = serde_json::from_str(
            r#"{"success":false,"code":1010,"msg":"token invalid","t":1}"#,
        )
        .unwrap();
        let err = unwrap_envelope(envelope).unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn token_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let client = CloudConfig::new("cid", "secret")
            .with_token_cache_file(&path)
            .into_client()
            .unwrap();
        let token = CachedToken {
            access_token: "tok".to_string(),
            expire_time: 42,
        };
        client.write_token_file(&token);
        assert_eq!(client.read_token_file(), Some(token));

        client.invalidate_token();
        assert!(!path.exists());
    }
}
