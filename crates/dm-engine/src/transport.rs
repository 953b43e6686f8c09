use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;

/// Raw outcome of one HTTP exchange. Status interpretation is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Seam between the generation client and the network.
pub trait Transport: Send + Sync {
    fn post_json(&self, url: &str, body: &Value, timeout: Duration) -> Result<TransportResponse>;
    fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
        }
    }
}

impl Transport for HttpTransport {
    fn post_json(&self, url: &str, body: &Value, timeout: Duration) -> Result<TransportResponse> {
        let response = self
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .json(body)
            .send()
            .with_context(|| format!("request failed ({url})"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .with_context(|| format!("response body read failed ({url})"))?;
        Ok(TransportResponse { status, body })
    }

    fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse> {
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .with_context(|| format!("request failed ({url})"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .with_context(|| format!("response body read failed ({url})"))?;
        Ok(TransportResponse { status, body })
    }
}

/// Timeouts and connection failures are worth another attempt; anything the server
/// actually answered is not.
pub(crate) fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
            return reqwest_err.is_timeout() || reqwest_err.is_connect();
        }
        cause
            .downcast_ref::<io::Error>()
            .map(|io_err| is_transport_io_error_kind(io_err.kind()))
            .unwrap_or(false)
    })
}

fn is_transport_io_error_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use anyhow::anyhow;
    use serde_json::json;

    use super::*;

    #[test]
    fn io_connection_errors_are_retryable() {
        let refused = anyhow::Error::new(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "refused",
        ))
        .context("request failed (http://localhost:1025/generate)");
        assert!(is_retryable_transport_error(&refused));

        let parse = anyhow!("returned invalid JSON payload");
        assert!(!is_retryable_transport_error(&parse));
    }

    #[test]
    fn error_chain_text_joins_and_dedupes_causes() {
        let err = anyhow::Error::new(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
            .context("request failed")
            .context("request failed");
        assert_eq!(
            error_chain_text(&err, 200),
            "request failed | caused by: timed out"
        );
        assert_eq!(error_chain_text(&err, 7), "request…");
    }

    #[test]
    fn closed_port_surfaces_as_transport_error() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        let transport = HttpTransport::new();
        let err = transport
            .post_json(
                &format!("http://{addr}/generate"),
                &json!({"prompt": "x"}),
                Duration::from_secs(2),
            )
            .err()
            .ok_or_else(|| anyhow!("expected a connection failure"))?;
        assert!(is_retryable_transport_error(&err));
        Ok(())
    }

    #[test]
    fn success_range_is_2xx() {
        assert!(TransportResponse::new(200, "").is_success());
        assert!(TransportResponse::new(204, "").is_success());
        assert!(!TransportResponse::new(302, "").is_success());
        assert!(!TransportResponse::new(500, "").is_success());
    }
}
