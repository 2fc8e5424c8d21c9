// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the cloud client using wiremock.

use mainswatch::poller::{ConnectionMode, Poller};
use mainswatch::protocol::{CloudClient, CloudConfig};
use mainswatch::{PollMethod, ProtocolError};
use serde_json::json;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DEVICE: &str = "bf3a1c0d9e8f7a6b5c4d";

fn client(server: &MockServer) -> CloudClient {
    CloudConfig::new("client-id", "secret")
        .with_endpoint(server.uri())
        .into_client()
        .unwrap()
}

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/v1.0/token"))
        .and(query_param("grant_type", "1"))
        .and(header("client_id", "client-id"))
        .and(header("sign_method", "HMAC-SHA256"))
        .and(header_exists("sign"))
        .and(header_exists("t"))
        .and(header_exists("nonce"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": { "access_token": "tok-1", "expire_time": 7200 }
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_device(server: &MockServer, online: bool) {
    Mock::given(method("GET"))
        .and(path(format!("/v1.0/devices/{DEVICE}")))
        .and(header("access_token", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": { "online": online, "local_key": "0123456789abcdef", "name": "Plug" }
        })))
        .mount(server)
        .await;
}

async fn mount_status(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/v1.0/devices/{DEVICE}/status")))
        .and(header("access_token", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": [
                { "code": "switch_1", "value": true },
                { "code": "cur_current", "value": 412 },
                { "code": "cur_power", "value": 874 },
                { "code": "cur_voltage", "value": 2297 }
            ]
        })))
        .mount(server)
        .await;
}

mod device_data {
    use super::*;

    #[tokio::test]
    async fn readings_are_scaled() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        mount_device(&server, true).await;
        mount_status(&server).await;

        let result = client(&server).get_device_data(DEVICE).await;
        assert!(result.online);
        assert_eq!(result.method, PollMethod::Cloud);
        assert_eq!(result.voltage, Some(229.7));
        assert_eq!(result.power, Some(87.4));
        assert_eq!(result.current, Some(0.412));
        assert_eq!(result.switch_on, Some(true));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn token_is_reused_across_requests() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        mount_device(&server, true).await;
        mount_status(&server).await;

        let cloud = client(&server);
        for _ in 0..3 {
            assert!(cloud.get_device_data(DEVICE).await.online);
        }
        // one token call plus two calls per poll
        assert_eq!(cloud.request_count(), 7);
    }

    #[tokio::test]
    async fn offline_device_is_reported_offline() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        mount_device(&server, false).await;
        mount_status(&server).await;

        let result = client(&server).get_device_data(DEVICE).await;
        assert!(!result.online);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn api_failure_becomes_offline_result() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path(format!("/v1.0/devices/{DEVICE}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false, "code": 2008, "msg": "command or value not support"
            })))
            .mount(&server)
            .await;

        let result = client(&server).get_device_data(DEVICE).await;
        assert!(!result.online);
        assert_eq!(result.method, PollMethod::Cloud);
        assert!(result.error.unwrap().contains("2008"));
    }

    #[tokio::test]
    async fn server_error_becomes_offline_result() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path(format!("/v1.0/devices/{DEVICE}")))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = client(&server).get_device_data(DEVICE).await;
        assert!(!result.online);
        assert!(result.error.unwrap().contains("503"));
    }
}

mod auth {
    use super::*;

    #[tokio::test]
    async fn rejected_token_is_refetched_on_next_call() {
        let server = MockServer::start().await;
        mount_token(&server, 2).await;
        Mock::given(method("GET"))
            .and(path(format!("/v1.0/devices/{DEVICE}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false, "code": 1010, "msg": "token invalid"
            })))
            .mount(&server)
            .await;

        let cloud = client(&server);
        let err = cloud.get_device_info(DEVICE).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Api { code: 1010, .. }));
        assert!(err.is_auth());

        let _ = cloud.get_device_info(DEVICE).await;
    }

    #[tokio::test]
    async fn token_cache_file_survives_a_new_client() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        mount_device(&server, true).await;

        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("token.json");
        let make = || {
            CloudConfig::new("client-id", "secret")
                .with_endpoint(server.uri())
                .with_token_cache_file(&cache)
                .into_client()
                .unwrap()
        };

        make().get_device_info(DEVICE).await.unwrap();
        assert!(cache.exists());
        make().get_device_info(DEVICE).await.unwrap();
    }

    #[tokio::test]
    async fn local_key_is_read_from_device_info() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        mount_device(&server, true).await;

        let key = client(&server).get_local_key(DEVICE).await.unwrap();
        assert_eq!(key.as_deref(), Some("0123456789abcdef"));
    }
}

mod poller {
    use super::*;

    #[tokio::test]
    async fn cloud_mode_answers_through_cloud() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        mount_device(&server, true).await;
        mount_status(&server).await;

        let poller = Poller::new(ConnectionMode::Cloud, DEVICE).with_cloud(client(&server));
        let result = poller.poll_device().await;
        assert!(result.online);
        assert_eq!(result.method, PollMethod::Cloud);
    }

    #[tokio::test]
    async fn hybrid_falls_back_when_lan_is_unreachable() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        mount_device(&server, true).await;
        mount_status(&server).await;

        // nothing listens on this port
        let lan = mainswatch::protocol::local::LocalConfig::new(DEVICE, "127.0.0.1")
            .with_port(9)
            .with_local_key("0123456789abcdef")
            .with_timeout(std::time::Duration::from_millis(300));
        let poller = Poller::new(ConnectionMode::Hybrid, DEVICE)
            .with_local(lan)
            .with_cloud(client(&server));

        let result = poller.poll_device().await;
        assert!(result.online);
        assert_eq!(result.method, PollMethod::Cloud);
        assert_eq!(result.voltage, Some(229.7));
    }

    #[tokio::test]
    async fn hybrid_keeps_lan_error_when_cloud_sees_device_offline() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        mount_device(&server, false).await;
        mount_status(&server).await;

        let lan = mainswatch::protocol::local::LocalConfig::new(DEVICE, "127.0.0.1")
            .with_port(9)
            .with_local_key("0123456789abcdef")
            .with_timeout(std::time::Duration::from_millis(300));
        let poller = Poller::new(ConnectionMode::Hybrid, DEVICE)
            .with_local(lan)
            .with_cloud(client(&server));

        let result = poller.poll_device().await;
        assert!(!result.online);
        assert_eq!(result.method, PollMethod::Cloud);
        assert!(result.error.unwrap().starts_with("local: "));
    }

    #[tokio::test]
    async fn cloud_mode_without_client_reports_no_method() {
        let result = Poller::new(ConnectionMode::Cloud, DEVICE).poll_device().await;
        assert!(!result.online);
        assert_eq!(result.method, PollMethod::None);
        assert!(result.error.is_some());
    }
}
