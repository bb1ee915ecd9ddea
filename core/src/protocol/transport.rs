// HTTP transport — port used for every sign/join round trip, plus a ureq adapter

use async_trait::async_trait;
use std::io::Read;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const PROTOBUF_CONTENT_TYPE: &str = "application/protobuf";
pub const OHTTP_REQUEST_CONTENT_TYPE: &str = "message/ohttp-req";

/// Response bodies above this size are cut off
const MAX_RESPONSE_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Server responded with status {0}")]
    Status(u16),
    #[error("Network error: {0}")]
    Network(String),
}

impl TransportError {
    pub fn is_server_error(&self) -> bool {
        matches!(self, TransportError::Status(code) if *code >= 500)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn get(url: &str, content_type: &str) -> Self {
        Self {
            url: url.to_string(),
            method: HttpMethod::Get,
            content_type: content_type.to_string(),
            body: Vec::new(),
        }
    }

    pub fn post(url: &str, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            url: url.to_string(),
            method: HttpMethod::Post,
            content_type: content_type.to_string(),
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    /// Non-2xx responses become `TransportError::Status`
    pub fn into_success(self) -> Result<Self, TransportError> {
        if (200..300).contains(&self.status) {
            Ok(self)
        } else {
            Err(TransportError::Status(self.status))
        }
    }
}

/// Performs one HTTP exchange. Timeouts are the implementation's concern.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Blocking ureq agent driven from tokio's blocking pool
#[derive(Clone)]
pub struct UreqHttpClient {
    agent: ureq::Agent,
}

impl UreqHttpClient {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

#[async_trait]
impl HttpClient for UreqHttpClient {
    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || perform_blocking(&agent, request))
            .await
            .map_err(|e| TransportError::Network(format!("transport task failed: {}", e)))?
    }
}

fn perform_blocking(
    agent: &ureq::Agent,
    request: HttpRequest,
) -> Result<HttpResponse, TransportError> {
    debug!("{:?} {}", request.method, request.url);
    let result = match request.method {
        HttpMethod::Get => agent
            .get(&request.url)
            .set("Content-Type", &request.content_type)
            .call(),
        HttpMethod::Post => agent
            .post(&request.url)
            .set("Content-Type", &request.content_type)
            .send_bytes(&request.body),
    };

    match result {
        Ok(response) => {
            let status = response.status();
            let body = read_body(response.into_reader())?;
            HttpResponse { status, body }.into_success()
        }
        Err(ureq::Error::Status(code, _)) => Err(TransportError::Status(code)),
        Err(ureq::Error::Transport(transport)) => {
            Err(TransportError::Network(transport.to_string()))
        }
    }
}

/// Read a whole body; anything past `MAX_RESPONSE_BYTES` is an error, not a cut.
fn read_body(reader: impl Read) -> Result<Vec<u8>, TransportError> {
    let mut body = Vec::new();
    reader
        .take(MAX_RESPONSE_BYTES + 1)
        .read_to_end(&mut body)
        .map_err(|e| TransportError::Network(e.to_string()))?;
    if body.len() as u64 > MAX_RESPONSE_BYTES {
        return Err(TransportError::Network(format!(
            "response body exceeds {} bytes",
            MAX_RESPONSE_BYTES
        )));
    }
    Ok(body)
}
