// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! LAN protocol client.
//!
//! The device listens on TCP port 6668. A status read is a single
//! request/response exchange: one `DP_QUERY` frame out, one frame back
//! carrying the encrypted data-point map.

mod cipher;
mod client;
mod frame;

pub use cipher::{PayloadCipher, ProtocolVersion, VERSION_HEADER_LEN};
pub use client::{LocalClient, LocalConfig};
pub use frame::{CommandCode, Frame, HEADER_LEN, PREFIX, SUFFIX, TRAILER_LEN};
