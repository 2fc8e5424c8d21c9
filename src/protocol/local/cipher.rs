// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Payload encryption for the LAN protocol.
//!
//! Payloads are AES-128-ECB with PKCS#7 padding under the device's 16-byte
//! local key. Firmware 3.4 and later put a 15-byte version header (the
//! version string followed by zero bytes) in front of the ciphertext.
//! Device replies may also start with a 4-byte return code.

use std::fmt;
use std::str::FromStr;

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ProtocolError};

const BLOCK: usize = 16;
/// Size of the version header on 3.4+ payloads.
pub const VERSION_HEADER_LEN: usize = 15;
const RETURN_CODE_LEN: usize = 4;

/// LAN protocol revision spoken by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// 3.3
    #[serde(rename = "3.3")]
    #[default]
    V33,
    /// 3.4
    #[serde(rename = "3.4")]
    V34,
    /// 3.5
    #[serde(rename = "3.5")]
    V35,
}

impl ProtocolVersion {
    /// Returns the version string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::V33 => "3.3",
            Self::V34 => "3.4",
            Self::V35 => "3.5",
        }
    }

    /// Returns `true` if payloads carry the 15-byte version header.
    #[must_use]
    pub const fn has_version_header(&self) -> bool {
        matches!(self, Self::V34 | Self::V35)
    }

    fn version_header(self) -> [u8; VERSION_HEADER_LEN] {
        let mut header = [0u8; VERSION_HEADER_LEN];
        header[..3].copy_from_slice(self.as_str().as_bytes());
        header
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "3.3" => Ok(Self::V33),
            "3.4" => Ok(Self::V34),
            "3.5" => Ok(Self::V35),
            other => Err(ParseError::InvalidValue {
                field: "protocol_version".to_string(),
                message: format!("unsupported version {other}"),
            }),
        }
    }
}

/// Symmetric cipher for one device.
///
/// # Examples
///
/// ```
/// use mainswatch::protocol::local::{PayloadCipher, ProtocolVersion};
///
/// let cipher = PayloadCipher::new("0123456789abcdef", ProtocolVersion::V34).unwrap();
/// let sealed = cipher.seal(br#"{"dps":{}}"#);
/// assert_eq!(cipher.open(&sealed).unwrap(), br#"{"dps":{}}"#);
/// ```
#[derive(Clone)]
pub struct PayloadCipher {
    aes: Aes128,
    version: ProtocolVersion,
}

impl fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadCipher")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl PayloadCipher {
    /// Creates a cipher from the ASCII local key.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidKey`] unless the key is exactly 16 bytes.
    pub fn new(local_key: &str, version: ProtocolVersion) -> Result<Self, ProtocolError> {
        let key = local_key.as_bytes();
        if key.len() != BLOCK {
            return Err(ProtocolError::InvalidKey(format!(
                "local key must be {BLOCK} bytes, got {}",
                key.len()
            )));
        }
        let aes = Aes128::new_from_slice(key)
            .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
        Ok(Self { aes, version })
    }

    /// Returns the protocol version.
    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Pads and encrypts a plaintext payload.
    #[must_use]
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        let pad = BLOCK - plaintext.len() % BLOCK;
        let mut data = Vec::with_capacity(plaintext.len() + pad);
        data.extend_from_slice(plaintext);
        let pad_byte = u8::try_from(pad).unwrap_or(16);
        data.resize(plaintext.len() + pad, pad_byte);

        for chunk in data.chunks_exact_mut(BLOCK) {
            self.aes.encrypt_block(GenericArray::from_mut_slice(chunk));
        }

        if self.version.has_version_header() {
            let mut out = Vec::with_capacity(VERSION_HEADER_LEN + data.len());
            out.extend_from_slice(&self.version.version_header());
            out.extend_from_slice(&data);
            out
        } else {
            data
        }
    }

    /// Strips framing extras, decrypts and unpads a payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decrypt`] when the ciphertext is not a
    /// whole number of blocks.
    pub fn open(&self, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut body = payload;

        if self.version.has_version_header() {
            if body.len() % BLOCK == (RETURN_CODE_LEN + VERSION_HEADER_LEN) % BLOCK {
                body = &body[RETURN_CODE_LEN..];
            }
            if body.len() < VERSION_HEADER_LEN {
                return Err(ProtocolError::Decrypt(
                    "payload shorter than version header".to_string(),
                ));
            }
            body = &body[VERSION_HEADER_LEN..];
        } else if body.len() % BLOCK == RETURN_CODE_LEN {
            body = &body[RETURN_CODE_LEN..];
        }

        if body.is_empty() || body.len() % BLOCK != 0 {
            return Err(ProtocolError::Decrypt(format!(
                "ciphertext length {} is not a multiple of {BLOCK}",
                body.len()
            )));
        }

        let mut data = body.to_vec();
        for chunk in data.chunks_exact_mut(BLOCK) {
            self.aes.decrypt_block(GenericArray::from_mut_slice(chunk));
        }

        if let Some(&pad) = data.last() {
            let pad = usize::from(pad);
            if (1..=BLOCK).contains(&pad) && pad <= data.len() {
                data.truncate(data.len() - pad);
            }
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef";

    #[test]
    fn rejects_short_keys() {
        assert!(matches!(
            PayloadCipher::new("short", ProtocolVersion::V33),
            Err(ProtocolError::InvalidKey(_))
        ));
    }

    #[test]
    fn seal_open_restores_plaintext_of_any_length() {
        for version in [ProtocolVersion::V33, ProtocolVersion::V34, ProtocolVersion::V35] {
            let cipher = PayloadCipher::new(KEY, version).unwrap();
            for len in [0usize, 1, 15, 16, 17, 31, 32, 255, 4096] {
                let plain: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
                let sealed = cipher.seal(&plain);
                assert_eq!(cipher.open(&sealed).unwrap(), plain, "{version} len {len}");
            }
        }
    }

    #[test]
    fn version_header_prefixes_ciphertext() {
        let cipher = PayloadCipher::new(KEY, ProtocolVersion::V35).unwrap();
        let sealed = cipher.seal(b"{}");
        assert_eq!(&sealed[..3], b"3.5");
        assert!(sealed[3..VERSION_HEADER_LEN].iter().all(|b| *b == 0));
        assert_eq!(sealed.len(), VERSION_HEADER_LEN + BLOCK);
    }

    #[test]
    fn return_code_is_skipped() {
        let plain = br#"{"dps":{"20":2301}}"#;
        for version in [ProtocolVersion::V33, ProtocolVersion::V34] {
            let cipher = PayloadCipher::new(KEY, version).unwrap();
            let mut reply = vec![0, 0, 0, 0];
            reply.extend_from_slice(&cipher.seal(plain));
            assert_eq!(cipher.open(&reply).unwrap(), plain);
        }
    }

    #[test]
    fn ragged_ciphertext_is_an_error() {
        let cipher = PayloadCipher::new(KEY, ProtocolVersion::V33).unwrap();
        assert!(matches!(
            cipher.open(&[1, 2, 3, 4, 5, 6, 7]),
            Err(ProtocolError::Decrypt(_))
        ));
    }

    #[test]
    fn version_strings_parse() {
        assert_eq!("3.4".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V34);
        assert!("3.1".parse::<ProtocolVersion>().is_err());
        assert_eq!(
            serde_json::to_string(&ProtocolVersion::V35).unwrap(),
            "\"3.5\""
        );
    }
}
