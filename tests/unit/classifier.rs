//! Unit tests for failure classification

use std::time::Duration;
use xhs_crawler::executor::classify::{SESSION_CODES, THROTTLE_CODES};
use xhs_crawler::executor::{classify, ErrorKind, Failure, TransportKind};

#[test]
fn test_every_failure_maps_to_one_kind() {
    let samples = [
        Failure::default(),
        Failure::new("boom"),
        Failure::http(418, "teapot"),
        Failure::transport(TransportKind::Other, "tls handshake"),
        Failure::decode("expected value at line 1"),
    ];
    for failure in &samples {
        assert!(ErrorKind::ALL.contains(&classify(failure)));
    }
}

#[test]
fn test_throttle_codes() {
    for &code in THROTTLE_CODES {
        let failure = Failure::new("blocked").with_platform_code(code);
        assert_eq!(classify(&failure), ErrorKind::RateLimited, "code {code}");
    }
}

#[test]
fn test_session_codes() {
    for &code in SESSION_CODES {
        let failure = Failure::new("no session").with_platform_code(code);
        assert_eq!(classify(&failure), ErrorKind::AuthInvalid, "code {code}");
    }
}

#[test]
fn test_unknown_platform_code_is_fatal() {
    let failure = Failure::new("参数错误").with_platform_code(-1);
    assert_eq!(classify(&failure), ErrorKind::Fatal);
}

#[test]
fn test_message_wording() {
    assert_eq!(classify(&Failure::new("Too Many Requests")), ErrorKind::RateLimited);
    assert_eq!(classify(&Failure::new("访问频次异常")), ErrorKind::RateLimited);
    assert_eq!(classify(&Failure::new("please login first")), ErrorKind::AuthInvalid);
    assert_eq!(classify(&Failure::new("connection reset by peer")), ErrorKind::Transient);
}

#[test]
fn test_transport_kinds() {
    assert_eq!(classify(&Failure::timeout("slow")), ErrorKind::Transient);
    assert_eq!(
        classify(&Failure::transport(TransportKind::Connect, "refused")),
        ErrorKind::Transient
    );
    assert_eq!(
        classify(&Failure::transport(TransportKind::Other, "weird")),
        ErrorKind::Fatal
    );
}

#[test]
fn test_throttling_beats_auth_and_transient() {
    let failure = Failure::http(503, "login required").with_platform_code(300013);
    assert_eq!(classify(&failure), ErrorKind::RateLimited);
}

#[test]
fn test_kind_hint_is_authoritative() {
    let failure = Failure::http(429, "x")
        .with_retry_after(Duration::from_secs(3))
        .with_kind(ErrorKind::Transient);
    assert_eq!(classify(&failure), ErrorKind::Transient);
    assert_eq!(failure.kind(), ErrorKind::Transient);
}

#[test]
fn test_kind_properties() {
    assert!(ErrorKind::RateLimited.is_retryable());
    assert!(ErrorKind::MalformedResponse.is_retryable());
    assert!(!ErrorKind::AuthInvalid.is_retryable());
    assert!(ErrorKind::AuthInvalid.aborts_batch());
    assert!(ErrorKind::Fatal.aborts_batch());
    assert!(!ErrorKind::Transient.aborts_batch());
    assert_eq!(
        serde_json::to_string(&ErrorKind::MalformedResponse).unwrap(),
        "\"malformed_response\""
    );
}
