// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binary framing for the LAN protocol.
//!
//! ```text
//! +----------+----------+----------+----------+---------+----------+----------+
//! | 000055AA | sequence | command  | length   | payload | CRC32    | 0000AA55 |
//! | 4 bytes  | u32 BE   | u32 BE   | u32 BE   | n bytes | u32 BE   | 4 bytes  |
//! +----------+----------+----------+----------+---------+----------+----------+
//! ```
//!
//! `length` counts the payload plus the 8-byte trailer. The CRC covers the
//! header and the payload.

use crate::error::ProtocolError;

/// Frame start marker.
pub const PREFIX: u32 = 0x0000_55AA;
/// Frame end marker.
pub const SUFFIX: u32 = 0x0000_AA55;
/// Bytes before the payload.
pub const HEADER_LEN: usize = 16;
/// Bytes after the payload (CRC + suffix).
pub const TRAILER_LEN: usize = 8;

/// Command codes used by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandCode(pub u32);

impl CommandCode {
    /// Status push from the device.
    pub const STATUS: Self = Self(0x08);
    /// Keep-alive.
    pub const HEART_BEAT: Self = Self(0x09);
    /// Query all data points.
    pub const DP_QUERY: Self = Self(0x0a);
    /// Set data points on 3.4+ firmware.
    pub const CONTROL_NEW: Self = Self(0x0d);
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sequence number chosen by the sender.
    pub sequence: u32,
    /// Command code.
    pub command: CommandCode,
    /// Raw payload, usually encrypted.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a frame.
    #[must_use]
    pub fn new(sequence: u32, command: CommandCode, payload: Vec<u8>) -> Self {
        Self {
            sequence,
            command,
            payload,
        }
    }

    /// Serializes the frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Frame`] if the payload does not fit the
    /// 32-bit length field.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let length = u32::try_from(self.payload.len() + TRAILER_LEN)
            .map_err(|_| ProtocolError::Frame("payload too large".to_string()))?;

        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len() + TRAILER_LEN);
        buf.extend_from_slice(&PREFIX.to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.command.0.to_be_bytes());
        buf.extend_from_slice(&length.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf.extend_from_slice(&SUFFIX.to_be_bytes());
        Ok(buf)
    }

    /// Returns the full size of the frame at the start of `bytes`, once the
    /// header is available.
    #[must_use]
    pub fn expected_len(bytes: &[u8]) -> Option<usize> {
        if bytes.len() < HEADER_LEN || read_u32(bytes, 0) != PREFIX {
            return None;
        }
        usize::try_from(read_u32(bytes, 12))
            .ok()
            .map(|length| HEADER_LEN + length)
    }

    /// Decodes the frame at the start of `bytes`.
    ///
    /// Returns the frame and the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Frame`] for bad markers or truncated input
    /// and [`ProtocolError::Crc`] when the checksum does not match.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), ProtocolError> {
        if bytes.len() < HEADER_LEN + TRAILER_LEN {
            return Err(ProtocolError::Frame(format!(
                "need at least {} bytes, got {}",
                HEADER_LEN + TRAILER_LEN,
                bytes.len()
            )));
        }
        if read_u32(bytes, 0) != PREFIX {
            return Err(ProtocolError::Frame("bad prefix".to_string()));
        }

        let length = usize::try_from(read_u32(bytes, 12))
            .map_err(|_| ProtocolError::Frame("length overflow".to_string()))?;
        if length < TRAILER_LEN {
            return Err(ProtocolError::Frame(format!("length {length} too small")));
        }
        let total = HEADER_LEN + length;
        if bytes.len() < total {
            return Err(ProtocolError::Frame(format!(
                "truncated: need {total} bytes, got {}",
                bytes.len()
            )));
        }

        let crc_at = total - TRAILER_LEN;
        let expected = read_u32(bytes, crc_at);
        let actual = crc32fast::hash(&bytes[..crc_at]);
        if expected != actual {
            return Err(ProtocolError::Crc { expected, actual });
        }
        if read_u32(bytes, total - 4) != SUFFIX {
            return Err(ProtocolError::Frame("bad suffix".to_string()));
        }

        let frame = Self {
            sequence: read_u32(bytes, 4),
            command: CommandCode(read_u32(bytes, 8)),
            payload: bytes[HEADER_LEN..crc_at].to_vec(),
        };
        Ok((frame, total))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_be_bytes(word)
}
