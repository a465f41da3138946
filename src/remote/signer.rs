//! Request signing
//!
//! The web API rejects unsigned requests. Signature generation lives outside
//! this crate: [`CommandSigner`] runs an external program that receives the
//! request as JSON on stdin and prints a JSON object of headers on stdout.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Default time allowed for the external signer.
pub const DEFAULT_SIGNER_TIMEOUT_SECS: u64 = 10;

/// What the signer needs to know about a request.
#[derive(Debug, Clone, Serialize)]
pub struct SignRequest {
    /// HTTP method
    pub method: String,
    /// Path plus query string, e.g. `/api/sns/web/v1/feed`
    pub uri: String,
    /// JSON body for POST requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Raw cookie string of the session
    pub cookies: String,
}

/// Produces the headers that authenticate a request.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Compute headers for `request`.
    async fn sign(&self, request: &SignRequest) -> Result<BTreeMap<String, String>, SignerError>;
}

/// Fixed headers, typically just the session cookie.
#[derive(Debug, Clone, Default)]
pub struct StaticSigner {
    headers: BTreeMap<String, String>,
}

impl StaticSigner {
    /// Signer that only sends the cookie header.
    pub fn with_cookies(cookies: impl Into<String>) -> Self {
        let mut headers = BTreeMap::new();
        let cookies = cookies.into();
        if !cookies.is_empty() {
            headers.insert("cookie".to_string(), cookies);
        }
        Self { headers }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }
}

#[async_trait]
impl Signer for StaticSigner {
    async fn sign(&self, _request: &SignRequest) -> Result<BTreeMap<String, String>, SignerError> {
        Ok(self.headers.clone())
    }
}

/// Runs an external signing program per request.
#[derive(Debug, Clone)]
pub struct CommandSigner {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSigner {
    /// Signer running `program` with `args`.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(DEFAULT_SIGNER_TIMEOUT_SECS),
        }
    }

    /// Override the time allowed per invocation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, input: Vec<u8>) -> Result<std::process::Output, SignerError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            SignerError::Spawn(format!("{}: {e}", self.program.display()))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| SignerError::Io(e.to_string()))?;
        }

        child
            .wait_with_output()
            .await
            .map_err(|e| SignerError::Io(e.to_string()))
    }
}

#[async_trait]
impl Signer for CommandSigner {
    async fn sign(&self, request: &SignRequest) -> Result<BTreeMap<String, String>, SignerError> {
        let input =
            serde_json::to_vec(request).map_err(|e| SignerError::InvalidOutput(e.to_string()))?;

        let output = timeout(self.timeout, self.run(input))
            .await
            .map_err(|_| SignerError::Timeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stderr = if stderr.is_empty() {
                "(no stderr output)".to_string()
            } else {
                stderr
            };
            return Err(SignerError::Failed(stderr));
        }

        let headers = parse_headers(&output.stdout)?;
        debug!(uri = %request.uri, headers = headers.len(), "Request signed");
        Ok(headers)
    }
}

fn parse_headers(stdout: &[u8]) -> Result<BTreeMap<String, String>, SignerError> {
    let value: Value =
        serde_json::from_slice(stdout).map_err(|e| SignerError::InvalidOutput(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(SignerError::InvalidOutput(
            "expected a JSON object of headers".to_string(),
        ));
    };

    map.into_iter()
        .map(|(name, value)| match value {
            Value::String(s) => Ok((name.to_ascii_lowercase(), s)),
            Value::Number(n) => Ok((name.to_ascii_lowercase(), n.to_string())),
            other => Err(SignerError::InvalidOutput(format!(
                "header {name} has non-scalar value {other}"
            ))),
        })
        .collect()
}

/// Signing errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignerError {
    /// The signer program could not be started
    #[error("failed to start signer: {0}")]
    Spawn(String),

    /// Pipe I/O with the signer failed
    #[error("signer I/O error: {0}")]
    Io(String),

    /// The signer exceeded its time budget
    #[error("signer timed out after {0:?}")]
    Timeout(Duration),

    /// The signer exited unsuccessfully
    #[error("signer failed: {0}")]
    Failed(String),

    /// The signer printed something other than a header object
    #[error("invalid signer output: {0}")]
    InvalidOutput(String),
}
