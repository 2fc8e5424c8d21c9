// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the monitoring engine.
//!
//! Errors are grouped by where they originate: device communication,
//! payload parsing, configuration, storage, notification delivery and
//! outage-schedule parsing. Client boundaries convert protocol errors into
//! an offline [`PollResult`](crate::PollResult) so a single tick never
//! fails because the device is unreachable.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred while talking to the device or the vendor cloud.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while parsing a device or cloud payload.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The configuration is incomplete or inconsistent.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The state store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A notification could not be delivered.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// An outage announcement could not be parsed.
    #[error("schedule error: {0}")]
    Schedule(#[from] ScheduleParseError),

    /// Another tick currently holds the lock.
    #[error("another tick is already running")]
    Busy,
}

/// Errors related to device and cloud communication.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection to the device failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Invalid URL or host.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Key material has the wrong shape.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A local-protocol frame was malformed.
    #[error("malformed frame: {0}")]
    Frame(String),

    /// The frame checksum did not match its content.
    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    Crc {
        /// Checksum carried in the frame trailer.
        expected: u32,
        /// Checksum computed over header and payload.
        actual: u32,
    },

    /// The payload could not be decrypted.
    #[error("decrypt failed: {0}")]
    Decrypt(String),

    /// The decrypted or downloaded payload has an unexpected shape.
    #[error("bad payload: {0}")]
    Payload(#[from] ParseError),

    /// The cloud API answered with `success: false`.
    #[error("cloud API error {code}: {message}")]
    Api {
        /// Vendor error code.
        code: i64,
        /// Vendor error message.
        message: String,
    },

    /// Authentication failed.
    #[error("authentication failed")]
    AuthenticationFailed,
}

impl ProtocolError {
    /// Vendor codes meaning the access token is no longer accepted.
    const TOKEN_REJECTED_CODES: [i64; 3] = [1010, 1011, 1012];

    /// Returns `true` if this error means the cloud token was rejected.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        match self {
            Self::AuthenticationFailed => true,
            Self::Api { code, .. } => Self::TOKEN_REJECTED_CODES.contains(code),
            _ => false,
        }
    }
}

/// Errors related to parsing payloads.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the payload.
    #[error("missing field in response: {0}")]
    MissingField(String),

    /// Failed to parse a specific value.
    #[error("failed to parse {field}: {message}")]
    InvalidValue {
        /// The field that failed to parse.
        field: String,
        /// Description of the parsing failure.
        message: String,
    },
}

/// Errors in the monitor configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting is empty.
    #[error("missing {mode} config: {key}")]
    Missing {
        /// Connection mode that needs the setting.
        mode: String,
        /// Name of the missing setting.
        key: String,
    },

    /// Voltage thresholds are not strictly ordered.
    #[error("voltage thresholds must satisfy on < crit_low < warn_low < warn_high < crit_high")]
    ThresholdOrder,

    /// A setting has an unusable value.
    #[error("invalid value for {key}: {message}")]
    Invalid {
        /// Name of the setting.
        key: String,
        /// Why it was rejected.
        message: String,
    },

    /// The configuration file could not be read.
    #[error("cannot read configuration: {0}")]
    Read(String),
}

/// Errors from the SQLite state store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database reported an error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored value could not be decoded.
    #[error("corrupt value in {column}: {value}")]
    Corrupt {
        /// Column holding the value.
        column: String,
        /// The raw value.
        value: String,
    },

    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors delivering a notification to one target.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// HTTP request to the messaging API failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The messaging API rejected the message.
    #[error("messaging API error: {0}")]
    Rejected(String),

    /// The messaging API asked to slow down.
    #[error("rate limited, retry after {0} s")]
    RateLimited(u64),

    /// No bot token is configured.
    #[error("messaging is not configured")]
    NotConfigured,
}

/// Errors from outage-announcement parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleParseError {
    /// The queue identifier is not of the form `N` or `N.M`.
    #[error("invalid queue id: {0}")]
    InvalidQueue(String),

    /// A time literal is out of range.
    #[error("invalid time: {0}")]
    InvalidTime(String),

    /// Neither known announcement format was recognised.
    #[error("no schedule found in message")]
    NoSchedule,

    /// The message does not mention the configured queue.
    #[error("queue {0} is not mentioned in message")]
    QueueNotFound(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
