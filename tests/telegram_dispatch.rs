// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Notification delivery through a mocked Bot API.

use std::time::Duration;

use chrono::NaiveDate;
use mainswatch::DispatchError;
use mainswatch::notify::{
    Dispatcher, MessageSender, NotificationKind, NotificationTargets, NotifyContext, Template,
    TemplateSet, TelegramSender,
};
use mainswatch::types::HumanDuration;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "123456:TEST";

fn sender(server: &MockServer) -> TelegramSender {
    TelegramSender::new(TOKEN).unwrap().with_api_base(server.uri())
}

fn send_path() -> String {
    format!("/bot{TOKEN}/sendMessage")
}

async fn mount_ok(server: &MockServer, chat_id: &str, expected: u64) {
    Mock::given(method("POST"))
        .and(path(send_path()))
        .and(body_partial_json(json!({ "chat_id": chat_id })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true, "result": { "message_id": 1 }
        })))
        .expect(expected)
        .mount(server)
        .await;
}

fn outage_context() -> NotifyContext {
    let at = NaiveDate::from_ymd_opt(2026, 3, 1)
        .unwrap()
        .and_hms_opt(21, 5, 0)
        .unwrap();
    NotifyContext::at(at).with_duration(HumanDuration::from_secs(3 * 3600 + 600))
}

mod sender {
    use super::*;

    #[tokio::test]
    async fn posts_chat_and_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(send_path()))
            .and(body_partial_json(json!({
                "chat_id": "-1001",
                "text": "hello",
                "disable_web_page_preview": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        sender(&server).send_message("-1001", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn too_many_requests_reports_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(send_path()))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "ok": false,
                "error_code": 429,
                "description": "Too Many Requests: retry after 7",
                "parameters": { "retry_after": 7 }
            })))
            .mount(&server)
            .await;

        let err = sender(&server).send_message("1", "x").await.unwrap_err();
        assert!(matches!(err, DispatchError::RateLimited(7)));
    }

    #[tokio::test]
    async fn api_rejection_carries_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(send_path()))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let err = sender(&server).send_message("1", "x").await.unwrap_err();
        match err {
            DispatchError::Rejected(text) => assert!(text.contains("chat not found")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn garbage_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(send_path()))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let err = sender(&server).send_message("1", "x").await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected(_)));
    }
}

mod dispatcher {
    use super::*;

    #[tokio::test]
    async fn one_failing_chat_does_not_block_others() {
        let server = MockServer::start().await;
        mount_ok(&server, "@channel", 1).await;
        mount_ok(&server, "222", 1).await;
        Mock::given(method("POST"))
            .and(path(send_path()))
            .and(body_partial_json(json!({ "chat_id": "111" })))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "ok": false, "description": "Forbidden: bot was blocked by the user"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new(sender(&server))
            .with_send_delay(Duration::ZERO)
            .with_targets(NotificationTargets::new(
                Some("@channel".to_string()),
                vec!["111".to_string(), "222".to_string(), "@channel".to_string()],
            ));

        let report = dispatcher
            .notify(NotificationKind::PowerOff, &outage_context())
            .await;
        assert_eq!(report.delivered, vec!["@channel", "222"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "111");
        assert!(report.failed[0].1.contains("blocked"));
    }

    #[tokio::test]
    async fn rendered_text_reaches_the_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(send_path()))
            .and(body_partial_json(json!({
                "chat_id": "42",
                "text": "❌ Світло зникло!\n\n🕒 2026-03-01 21:05:00\n⏱ Було увімкнено: 3 год 10 хв"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new(sender(&server))
            .with_targets(NotificationTargets::new(None, vec!["42".to_string()]));
        let report = dispatcher
            .notify(NotificationKind::PowerOff, &outage_context())
            .await;
        assert_eq!(report.delivered, vec!["42"]);
    }

    #[tokio::test]
    async fn disabled_template_sends_nothing() {
        let server = MockServer::start().await;
        mount_ok(&server, "42", 0).await;

        let mut templates = TemplateSet::default();
        let mut off = Template::default_for(NotificationKind::PowerOff);
        off.enabled = false;
        templates.set(NotificationKind::PowerOff, off);

        let dispatcher = Dispatcher::new(sender(&server))
            .with_targets(NotificationTargets::new(None, vec!["42".to_string()]));
        dispatcher.set_templates(templates);

        let report = dispatcher
            .notify(NotificationKind::PowerOff, &outage_context())
            .await;
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_bot_fails_every_target_without_requests() {
        let server = MockServer::start().await;
        mount_ok(&server, "1", 0).await;

        let dispatcher = Dispatcher::new(TelegramSender::new("").unwrap().with_api_base(server.uri()))
            .with_send_delay(Duration::ZERO)
            .with_targets(NotificationTargets::new(None, vec!["1".to_string(), "2".to_string()]));

        let report = dispatcher.broadcast("ping").await;
        assert!(report.delivered.is_empty());
        assert_eq!(report.failed.len(), 2);
    }
}
