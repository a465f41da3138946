//! Integration tests for the signed HTTP caller against a mock API

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xhs_crawler::executor::{BatchConfig, BatchExecutor, ErrorKind, ItemStatus};
use xhs_crawler::remote::{HttpCaller, RemoteCaller, StaticSigner, NOTE_FEED_PATH};
use xhs_crawler::shutdown::StopSignal;

fn caller(server: &MockServer) -> HttpCaller {
    let signer = StaticSigner::with_cookies("a1=abc; web_session=xyz").header("x-s", "signed");
    HttpCaller::new(server.uri(), Arc::new(signer), "a1=abc", Duration::from_secs(5)).unwrap()
}

async fn respond_with(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(NOTE_FEED_PATH))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_success_returns_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(NOTE_FEED_PATH))
        .and(header("x-s", "signed"))
        .and(header("cookie", "a1=abc; web_session=xyz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "code": 0,
            "data": {"items": [{"id": "abc123"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let data = caller(&server).call(&"abc123".to_string()).await.unwrap();
    assert_eq!(data["items"][0]["id"], "abc123");
}

#[tokio::test]
async fn test_429_with_retry_after() {
    let server = MockServer::start().await;
    respond_with(
        &server,
        ResponseTemplate::new(429).insert_header("retry-after", "12"),
    )
    .await;

    let failure = caller(&server).call(&"n1".to_string()).await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::RateLimited);
    assert_eq!(failure.retry_after, Some(Duration::from_secs(12)));
}

#[tokio::test]
async fn test_status_classification() {
    for (status, expected) in [
        (401, ErrorKind::AuthInvalid),
        (503, ErrorKind::Transient),
        (404, ErrorKind::Fatal),
    ] {
        let server = MockServer::start().await;
        respond_with(&server, ResponseTemplate::new(status)).await;
        let failure = caller(&server).call(&"n1".to_string()).await.unwrap_err();
        assert_eq!(failure.status, Some(status));
        assert_eq!(failure.kind(), expected, "status {status}");
    }
}

#[tokio::test]
async fn test_business_codes() {
    for (code, msg, expected) in [
        (300013, "访问频次异常，请勿频繁操作", ErrorKind::RateLimited),
        (-100, "登录已过期", ErrorKind::AuthInvalid),
        (-1, "参数错误", ErrorKind::Fatal),
    ] {
        let server = MockServer::start().await;
        respond_with(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "code": code,
                "msg": msg
            })),
        )
        .await;
        let failure = caller(&server).call(&"n1".to_string()).await.unwrap_err();
        assert_eq!(failure.platform_code, Some(code));
        assert_eq!(failure.kind(), expected, "code {code}");
    }
}

#[tokio::test]
async fn test_missing_data_is_malformed() {
    let server = MockServer::start().await;
    respond_with(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"success": true, "code": 0})),
    )
    .await;
    let failure = caller(&server).call(&"n1".to_string()).await.unwrap_err();
    assert_eq!(failure.missing_field.as_deref(), Some("data"));
    assert_eq!(failure.kind(), ErrorKind::MalformedResponse);
}

#[tokio::test]
async fn test_undecodable_body_is_malformed() {
    let server = MockServer::start().await;
    respond_with(&server, ResponseTemplate::new(200).set_body_string("<html>")).await;
    let failure = caller(&server).call(&"n1".to_string()).await.unwrap_err();
    assert!(failure.decode_error);
    assert_eq!(failure.kind(), ErrorKind::MalformedResponse);
}

#[tokio::test]
async fn test_slow_server_times_out_as_transient() {
    let server = MockServer::start().await;
    respond_with(
        &server,
        ResponseTemplate::new(200)
            .set_delay(Duration::from_secs(2))
            .set_body_json(json!({"success": true, "data": {}})),
    )
    .await;

    let signer = StaticSigner::default();
    let caller =
        HttpCaller::new(server.uri(), Arc::new(signer), "", Duration::from_millis(100)).unwrap();
    let failure = caller.call(&"n1".to_string()).await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::Transient);
}

#[tokio::test]
async fn test_batch_over_http_aborts_on_expired_session() {
    let server = MockServer::start().await;
    respond_with(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "code": -100,
            "msg": "登录已过期"
        })),
    )
    .await;

    let config = BatchConfig::default()
        .with_rate(100.0, 5)
        .with_resume(false);
    let executor = BatchExecutor::new().with_stop(StopSignal::shared());
    let items = vec!["n1".to_string(), "n2".to_string()];
    let result = executor.run(items, &caller(&server), &config).await.unwrap();

    assert_eq!(result.outcome("n1").unwrap().status, ItemStatus::Failed);
    assert_eq!(result.outcome("n2").unwrap().status, ItemStatus::NotAttempted);
    assert_eq!(result.abort.unwrap().kind, ErrorKind::AuthInvalid);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
