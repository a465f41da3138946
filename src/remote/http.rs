//! HTTP remote caller for the web API
//!
//! Sends signed requests and turns every way a call can go wrong into a
//! [`Failure`] with the hints the classifier needs:
//! - transport errors (timeout, connect)
//! - non-2xx status, with `Retry-After` when present
//! - undecodable bodies
//! - `{success: false, code, msg}` business errors
//! - a successful envelope without `data`

use super::signer::{SignRequest, Signer, SignerError};
use super::RemoteCaller;
use crate::executor::{ErrorKind, Failure, TransportKind};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Production API host.
pub const DEFAULT_BASE_URL: &str = "https://edith.xiaohongshu.com";

/// Note detail endpoint.
pub const NOTE_FEED_PATH: &str = "/api/sns/web/v1/feed";

/// A request ready to be signed and sent.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Path relative to the base URL
    pub path: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// JSON body
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Note detail request for a note URL or bare note id.
    ///
    /// `xsec_token` and `xsec_source` are taken from the URL query when present.
    pub fn note_feed(item: &str) -> Result<Self, Failure> {
        let item = item.trim();
        let (note_id, token, source) = if item.starts_with("http://") || item.starts_with("https://") {
            let url = Url::parse(item)
                .map_err(|e| Failure::of_kind(ErrorKind::Fatal, format!("invalid note URL {item}: {e}")))?;
            let note_id = url
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(str::to_string)
                .ok_or_else(|| Failure::of_kind(ErrorKind::Fatal, format!("no note id in {item}")))?;
            let mut token = String::new();
            let mut source = None;
            for (key, value) in url.query_pairs() {
                match key.as_ref() {
                    "xsec_token" => token = value.into_owned(),
                    "xsec_source" => source = Some(value.into_owned()),
                    _ => {}
                }
            }
            (note_id, token, source)
        } else {
            (item.to_string(), String::new(), None)
        };

        Ok(Self {
            method: Method::POST,
            path: NOTE_FEED_PATH.to_string(),
            query: Vec::new(),
            body: Some(json!({
                "source_note_id": note_id,
                "image_formats": ["jpg", "webp", "avif"],
                "extra": {"need_body_topic": "1"},
                "xsec_source": source.unwrap_or_else(|| "pc_search".to_string()),
                "xsec_token": token,
            })),
        })
    }

    fn uri(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query: Vec<String> = self.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}?{}", self.path, query.join("&"))
    }
}

/// Platform response envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

fn default_success() -> bool {
    true
}

/// Signed HTTP caller.
pub struct HttpCaller {
    client: Client,
    base_url: String,
    signer: Arc<dyn Signer>,
    cookies: String,
}

impl HttpCaller {
    /// Create a caller.
    ///
    /// # Arguments
    /// * `base_url` - API host, e.g. [`DEFAULT_BASE_URL`]
    /// * `signer` - Produces authentication headers per request
    /// * `cookies` - Session cookie string handed to the signer
    /// * `timeout` - Transport-level timeout per request
    pub fn new(
        base_url: impl Into<String>,
        signer: Arc<dyn Signer>,
        cookies: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
            cookies: cookies.into(),
        })
    }

    /// Sign and send `request`, returning the envelope's `data`.
    pub async fn send(&self, request: &ApiRequest) -> Result<Value, Failure> {
        let url = format!("{}{}", self.base_url, request.path);
        let sign_request = SignRequest {
            method: request.method.to_string(),
            uri: request.uri(),
            body: request.body.clone(),
            cookies: self.cookies.clone(),
        };
        let headers = self
            .signer
            .sign(&sign_request)
            .await
            .map_err(signer_failure)?;

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(to_header_map(&headers)?)
            .header("origin", "https://www.xiaohongshu.com")
            .header("referer", "https://www.xiaohongshu.com/");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, url = %url, "Sending request");

        let response = builder.send().await.map_err(|e| transport_failure(&url, &e))?;
        let status = response.status();

        if !status.is_success() {
            let mut failure = Failure::http(status.as_u16(), format!("HTTP error {status}: {url}"));
            if let Some(delay) = retry_after(response.headers()) {
                failure = failure.with_retry_after(delay);
            }
            return Err(failure);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_failure(&url, &e))?;
        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| Failure::decode(format!("response format error: {e}")).with_status(status.as_u16()))?;

        if !envelope.success {
            let mut failure = Failure::new(
                envelope
                    .msg
                    .unwrap_or_else(|| "unknown business error".to_string()),
            );
            if let Some(code) = envelope.code {
                failure = failure.with_platform_code(code);
            }
            return Err(failure);
        }

        match envelope.data {
            Some(Value::Null) | None => Err(Failure::missing_field("data")),
            Some(data) => Ok(data),
        }
    }
}

#[async_trait]
impl RemoteCaller<String> for HttpCaller {
    type Output = Value;

    async fn call(&self, item: &String) -> Result<Value, Failure> {
        let request = ApiRequest::note_feed(item)?;
        self.send(&request).await
    }
}

fn to_header_map(
    headers: &std::collections::BTreeMap<String, String>,
) -> Result<HeaderMap, Failure> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            Failure::of_kind(ErrorKind::Fatal, format!("invalid signing header name {name}: {e}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            Failure::of_kind(ErrorKind::Fatal, format!("invalid signing header value: {e}"))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

fn transport_failure(url: &str, err: &reqwest::Error) -> Failure {
    if err.is_timeout() {
        Failure::timeout(format!("request timed out: {url}"))
    } else if err.is_connect() {
        Failure::transport(TransportKind::Connect, format!("connection failed: {url}: {err}"))
    } else if err.is_decode() || err.is_body() {
        Failure::decode(format!("failed to read response body: {err}"))
    } else {
        Failure::transport(TransportKind::Other, format!("request failed: {err}"))
    }
}

/// A signer that times out may succeed next time; anything else is a setup problem.
fn signer_failure(err: SignerError) -> Failure {
    let kind = match err {
        SignerError::Timeout(_) => ErrorKind::Transient,
        _ => ErrorKind::Fatal,
    };
    Failure::of_kind(kind, err.to_string())
}

/// `Retry-After` in delta-seconds form.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
