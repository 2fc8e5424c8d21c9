// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! LAN client tests against a fake plug listening on localhost.

use std::time::Duration;

use mainswatch::PollMethod;
use mainswatch::protocol::local::{
    CommandCode, Frame, LocalConfig, PayloadCipher, ProtocolVersion,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const KEY: &str = "0123456789abcdef";
const DEVICE: &str = "bf3a1c0d9e8f7a6b5c4d";

async fn read_frame(stream: &mut TcpStream) -> Frame {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        if let Some(total) = Frame::expected_len(&buf) {
            if buf.len() >= total {
                return Frame::decode(&buf).unwrap().0;
            }
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending a frame");
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn reply_payload(cipher: &PayloadCipher, body: &Value) -> Vec<u8> {
    let mut payload = 0u32.to_be_bytes().to_vec();
    payload.extend(cipher.seal(body.to_string().as_bytes()));
    payload
}

/// Spawns a fake plug that answers one query. Returns its port and a
/// handle yielding the decrypted request body.
async fn fake_plug(version: ProtocolVersion, dps: Value) -> (u16, tokio::task::JoinHandle<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let cipher = PayloadCipher::new(KEY, version).unwrap();

        let request = read_frame(&mut stream).await;
        assert_eq!(request.command, CommandCode::DP_QUERY);
        let body: Value = serde_json::from_slice(&cipher.open(&request.payload).unwrap()).unwrap();

        // bare acknowledgement first, as real firmware sometimes does
        let ack = Frame::new(request.sequence, CommandCode::DP_QUERY, vec![0, 0, 0, 0]);
        stream.write_all(&ack.encode().unwrap()).await.unwrap();

        let status = json!({ "devId": DEVICE, "dps": dps });
        let reply = Frame::new(
            request.sequence,
            CommandCode::DP_QUERY,
            reply_payload(&cipher, &status),
        );
        stream.write_all(&reply.encode().unwrap()).await.unwrap();
        stream.flush().await.unwrap();
        body
    });
    (port, handle)
}

fn config(port: u16, version: ProtocolVersion) -> LocalConfig {
    LocalConfig::new(DEVICE, "127.0.0.1")
        .with_port(port)
        .with_local_key(KEY)
        .with_version(version)
        .with_timeout(Duration::from_secs(2))
}

mod status {
    use super::*;

    #[tokio::test]
    async fn reads_scaled_values_over_v33() {
        let (port, plug) = fake_plug(
            ProtocolVersion::V33,
            json!({ "1": true, "18": 1250, "19": 2875, "20": 2301 }),
        )
        .await;
        let client = config(port, ProtocolVersion::V33).into_client().unwrap();

        let result = client.get_status().await;
        assert!(result.online, "{:?}", result.error);
        assert_eq!(result.method, PollMethod::Local);
        assert_eq!(result.voltage, Some(230.1));
        assert_eq!(result.power, Some(287.5));
        assert_eq!(result.current, Some(1.25));
        assert_eq!(result.switch_on, Some(true));

        let request = plug.await.unwrap();
        assert_eq!(request["devId"], DEVICE);
        assert_eq!(request["gwId"], DEVICE);
    }

    #[tokio::test]
    async fn reads_over_v34_with_version_header() {
        let (port, plug) = fake_plug(ProtocolVersion::V34, json!({ "20": 1870 })).await;
        let client = config(port, ProtocolVersion::V34).into_client().unwrap();

        let result = client.get_status().await;
        assert!(result.online, "{:?}", result.error);
        assert_eq!(result.voltage, Some(187.0));
        assert_eq!(result.power, None);
        plug.await.unwrap();
    }

    #[tokio::test]
    async fn zero_voltage_is_still_online() {
        let (port, plug) = fake_plug(ProtocolVersion::V33, json!({ "1": true, "20": 0 })).await;
        let client = config(port, ProtocolVersion::V33).into_client().unwrap();

        let result = client.get_status().await;
        assert!(result.online);
        assert_eq!(result.voltage, Some(0.0));
        plug.await.unwrap();
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn refused_connection_is_offline() {
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = config(port, ProtocolVersion::V33).into_client().unwrap();

        let result = client.get_status().await;
        assert!(!result.online);
        assert_eq!(result.method, PollMethod::Local);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn early_close_is_offline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_frame(&mut stream).await;
        });
        let client = config(port, ProtocolVersion::V33).into_client().unwrap();

        let result = client.get_status().await;
        assert!(!result.online);
        assert!(result.error.unwrap().contains("closed"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn silent_device_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(stream);
        });
        let client = config(port, ProtocolVersion::V33)
            .with_timeout(Duration::from_millis(200))
            .into_client()
            .unwrap();

        let result = client.get_status().await;
        assert!(!result.online);
        assert!(result.error.is_some());
        server.abort();
    }

    #[test]
    fn short_key_is_rejected_up_front() {
        let err = LocalConfig::new(DEVICE, "127.0.0.1")
            .with_local_key("short")
            .into_client()
            .unwrap_err();
        assert!(matches!(err, mainswatch::ProtocolError::InvalidKey(_)));
    }
}
