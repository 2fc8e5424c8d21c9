// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::cipher::{PayloadCipher, ProtocolVersion};
use super::frame::{CommandCode, Frame, HEADER_LEN};
use crate::error::{ParseError, ProtocolError};
use crate::protocol::{PollMethod, PollResult, Readings, TelemetrySource, duration_ms, elapsed_ms};

// ============================================================================
// LocalConfig
// ============================================================================

/// Connection settings for a plug on the LAN.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mainswatch::protocol::local::{LocalConfig, ProtocolVersion};
///
/// let config = LocalConfig::new("bf3a1c0d9e8f7a6b5c4d", "192.168.1.50")
///     .with_local_key("0123456789abcdef")
///     .with_version(ProtocolVersion::V34)
///     .with_timeout(Duration::from_secs(3));
/// assert_eq!(config.port(), 6668);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    device_id: String,
    host: String,
    port: u16,
    local_key: String,
    version: ProtocolVersion,
    timeout: Duration,
}

impl LocalConfig {
    /// Default LAN port.
    pub const DEFAULT_PORT: u16 = 6668;
    /// Default timeout for connect and for the whole exchange.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a configuration with an empty local key.
    #[must_use]
    pub fn new(device_id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            host: host.into(),
            port: Self::DEFAULT_PORT,
            local_key: String::new(),
            version: ProtocolVersion::default(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the 16-character local key.
    #[must_use]
    pub fn with_local_key(mut self, local_key: impl Into<String>) -> Self {
        self.local_key = local_key.into();
        self
    }

    /// Sets the protocol version.
    #[must_use]
    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the device id.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the local key, which may be empty.
    #[must_use]
    pub fn local_key(&self) -> &str {
        &self.local_key
    }

    /// Returns the protocol version.
    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Returns the timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Creates a [`LocalClient`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidKey`] if the local key is not 16 bytes
    /// and [`ProtocolError::InvalidAddress`] if the host is empty.
    pub fn into_client(self) -> Result<LocalClient, ProtocolError> {
        if self.host.trim().is_empty() {
            return Err(ProtocolError::InvalidAddress("empty host".to_string()));
        }
        let cipher = PayloadCipher::new(&self.local_key, self.version)?;
        Ok(LocalClient {
            config: self,
            cipher,
            sequence: AtomicU32::new(1),
        })
    }
}

// ============================================================================
// LocalClient
// ============================================================================

/// Reads status from a plug over the LAN.
///
/// # Examples
///
/// ```no_run
/// use mainswatch::protocol::local::LocalConfig;
///
/// # async fn example() -> Result<(), mainswatch::ProtocolError> {
/// let client = LocalConfig::new("bf3a1c0d9e8f7a6b5c4d", "192.168.1.50")
///     .with_local_key("0123456789abcdef")
///     .into_client()?;
/// let result = client.get_status().await;
/// println!("online={} voltage={:?}", result.online, result.voltage);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LocalClient {
    config: LocalConfig,
    cipher: PayloadCipher,
    sequence: AtomicU32,
}

impl LocalClient {
    /// Queries the device, converting every failure into an offline result.
    pub async fn get_status(&self) -> PollResult {
        let started = Instant::now();
        match tokio::time::timeout(self.config.timeout, self.query()).await {
            Ok(Ok(readings)) => {
                let latency = elapsed_ms(started);
                tracing::debug!(
                    host = %self.config.host,
                    latency_ms = latency,
                    voltage = ?readings.voltage,
                    "Local status read"
                );
                PollResult::from_readings(readings, PollMethod::Local, latency)
            }
            Ok(Err(e)) => {
                tracing::debug!(host = %self.config.host, error = %e, "Local status failed");
                PollResult::failed(PollMethod::Local, elapsed_ms(started), e.to_string())
            }
            Err(_) => {
                let budget = duration_ms(self.config.timeout);
                tracing::debug!(host = %self.config.host, budget_ms = budget, "Local status timed out");
                PollResult::failed(
                    PollMethod::Local,
                    elapsed_ms(started),
                    ProtocolError::Timeout(budget).to_string(),
                )
            }
        }
    }

    /// Queries the device, returning errors.
    ///
    /// # Errors
    ///
    /// Returns an error on connect, framing, decryption or JSON failures.
    pub async fn query(&self) -> Result<Readings, ProtocolError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let mut stream = tokio::time::timeout(self.config.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProtocolError::Timeout(duration_ms(self.config.timeout)))?
            .map_err(|e| ProtocolError::ConnectionFailed(format!("{addr}: {e}")))?;

        let request = self.build_request()?;
        stream.write_all(&request).await?;
        stream.flush().await?;

        let plaintext = self.read_status(&mut stream).await?;
        parse_status(&plaintext)
    }

    fn build_request(&self) -> Result<Vec<u8>, ProtocolError> {
        let id = self.config.device_id.as_str();
        let body = json!({
            "gwId": id,
            "devId": id,
            "uid": id,
            "t": chrono::Utc::now().timestamp().to_string(),
            "dps": {},
        });
        let plaintext = serde_json::to_vec(&body)
            .map_err(|e| ProtocolError::Frame(format!("cannot encode request: {e}")))?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        Frame::new(sequence, CommandCode::DP_QUERY, self.cipher.seal(&plaintext)).encode()
    }

    /// Reads frames until one carries a non-empty payload.
    async fn read_status(&self, stream: &mut TcpStream) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(256);
        let mut chunk = [0u8; 1024];
        loop {
            while let Some(total) = Frame::expected_len(&buf) {
                if buf.len() < total {
                    break;
                }
                let (frame, used) = Frame::decode(&buf)?;
                buf.drain(..used);
                if frame.payload.len() > 4 {
                    return self.cipher.open(&frame.payload);
                }
                tracing::trace!(command = frame.command.0, "Skipping empty frame");
            }

            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ProtocolError::ConnectionFailed(
                    "connection closed before status frame".to_string(),
                ));
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.len() >= HEADER_LEN && Frame::expected_len(&buf).is_none() {
                return Err(ProtocolError::Frame("bad prefix".to_string()));
            }
        }
    }
}

impl TelemetrySource for LocalClient {
    async fn poll(&self) -> PollResult {
        self.get_status().await
    }
}

fn parse_status(plaintext: &[u8]) -> Result<Readings, ProtocolError> {
    let value: Value = serde_json::from_slice(plaintext).map_err(ParseError::from)?;

    let dps = value
        .get("dps")
        .or_else(|| value.get("data").and_then(|data| data.get("dps")))
        .and_then(Value::as_object)
        .ok_or_else(|| ParseError::MissingField("dps".to_string()))?;

    Ok(Readings::from_dps(dps))
}
