use std::env;
use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dm_contracts::{GenerationError, ImageAttachment};
use image::ImageReader;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::transport::{
    error_chain_text, is_retryable_transport_error, truncate_text, HttpTransport, Transport,
    TransportResponse,
};

pub const DEFAULT_API_BASE: &str = "http://localhost:1025";
const ERROR_BODY_MAX_CHARS: usize = 512;
const DEFAULT_NEGATIVE_PROMPT: &str =
    "blurry, low quality, distorted, deformed, disfigured, bad anatomy, ugly, duplicate, error";

/// Fixed diffusion parameters sent with every image request.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDefaults {
    pub negative_prompt: String,
    pub num_steps: u32,
    pub guidance_scale: f64,
    pub height: u32,
    pub width: u32,
}

impl Default for ImageDefaults {
    fn default() -> Self {
        Self {
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            num_steps: 30,
            guidance_scale: 7.5,
            height: 768,
            width: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_base: String,
    pub text_timeout: Duration,
    pub image_timeout: Duration,
    pub health_timeout: Duration,
    pub max_retries: usize,
    pub retry_backoff: Duration,
    pub image: ImageDefaults,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            text_timeout: Duration::from_secs(30),
            image_timeout: Duration::from_secs(120),
            health_timeout: Duration::from_secs(5),
            max_retries: 0,
            retry_backoff: Duration::from_millis(350),
            image: ImageDefaults::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from `DM_*` variables resolved through `lookup`, falling back to
    /// the defaults for anything unset, blank or unparseable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let read_u64 = |key: &str| read(key).and_then(|raw| raw.parse::<u64>().ok());

        Self {
            api_base: read("DM_API_BASE")
                .map(|value| normalize_api_base(&value))
                .unwrap_or(defaults.api_base),
            text_timeout: read_u64("DM_TEXT_TIMEOUT_SECS")
                .map(|value| Duration::from_secs(value.clamp(1, 600)))
                .unwrap_or(defaults.text_timeout),
            image_timeout: read_u64("DM_IMAGE_TIMEOUT_SECS")
                .map(|value| Duration::from_secs(value.clamp(1, 900)))
                .unwrap_or(defaults.image_timeout),
            health_timeout: defaults.health_timeout,
            max_retries: read_u64("DM_TRANSPORT_RETRIES")
                .map(|value| value.min(4) as usize)
                .unwrap_or(defaults.max_retries),
            retry_backoff: read_u64("DM_TRANSPORT_RETRY_BACKOFF_MS")
                .map(|value| Duration::from_millis(value.clamp(50, 5000)))
                .unwrap_or(defaults.retry_backoff),
            image: defaults.image,
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }
}

pub fn normalize_api_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    prompt: &'a str,
    system_message: &'a str,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    num_steps: u32,
    guidance_scale: f64,
    height: u32,
    width: u32,
}

/// Result of `GET /health`. The endpoint reports problems in-band, so a failed check
/// is a status rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub backend_running: bool,
    pub backend_version: Option<String>,
    pub timestamp: Option<String>,
    pub error: Option<String>,
}

impl HealthStatus {
    fn unreachable(error: String) -> Self {
        Self {
            healthy: false,
            backend_running: false,
            backend_version: None,
            timestamp: None,
            error: Some(error),
        }
    }
}

/// Client for the `/generate` and `/generate-image` endpoints.
///
/// Cheap to clone; clones share the transport, so one can be handed to a worker thread
/// while the session stays on the caller's side.
#[derive(Clone)]
pub struct GenerationClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
}

impl GenerationClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(HttpTransport::new()))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends the user's text and the composed prompt; returns the assistant text.
    pub fn generate_text(
        &self,
        user_text: &str,
        system_message: &str,
    ) -> Result<String, GenerationError> {
        let url = self.config.endpoint("generate");
        let body = serde_json::to_value(TextRequest {
            prompt: user_text,
            system_message,
        })
        .map_err(|err| GenerationError::request_failed(format!("request encoding failed: {err}")))?;

        let response = self.send_with_retry(|| {
            self.transport
                .post_json(&url, &body, self.config.text_timeout)
        })?;
        let payload = success_json_object("/generate", &response)?;
        reject_explicit_failure("/generate", &payload)?;

        match payload.get("response") {
            None | Some(Value::Null) => Err(GenerationError::missing_payload("response")),
            Some(Value::String(text)) => Ok(text.clone()),
            Some(other) => Err(GenerationError::request_failed(format!(
                "/generate returned a non-string `response`: {}",
                truncate_text(&other.to_string(), 120)
            ))),
        }
    }

    /// Sends `prompt` verbatim as the image prompt along with the configured defaults.
    pub fn generate_image(&self, prompt: &str) -> Result<ImageAttachment, GenerationError> {
        let url = self.config.endpoint("generate-image");
        let defaults = &self.config.image;
        let body = serde_json::to_value(ImageRequest {
            prompt,
            negative_prompt: &defaults.negative_prompt,
            num_steps: defaults.num_steps,
            guidance_scale: defaults.guidance_scale,
            height: defaults.height,
            width: defaults.width,
        })
        .map_err(|err| GenerationError::request_failed(format!("request encoding failed: {err}")))?;

        let response = self.send_with_retry(|| {
            self.transport
                .post_json(&url, &body, self.config.image_timeout)
        })?;
        let payload = success_json_object("/generate-image", &response)?;
        reject_explicit_failure("/generate-image", &payload)?;
        if payload.get("success").and_then(Value::as_bool) != Some(true) {
            return Err(GenerationError::missing_payload("success"));
        }

        let encoded = ["image_base64", "image", "base64"]
            .iter()
            .find_map(|key| payload.get(*key))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| GenerationError::missing_payload("image_base64"))?;
        decode_image_payload(encoded)
    }

    pub fn health(&self) -> HealthStatus {
        let url = self.config.endpoint("health");
        let response = match self.transport.get(&url, self.config.health_timeout) {
            Ok(response) => response,
            Err(err) => return HealthStatus::unreachable(error_chain_text(&err, 240)),
        };
        if !response.is_success() {
            return HealthStatus::unreachable(format!(
                "/health returned {}: {}",
                response.status,
                truncate_text(&response.body, 240)
            ));
        }
        let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(&response.body) else {
            return HealthStatus::unreachable("/health returned invalid JSON".to_string());
        };

        let healthy = payload
            .get("status")
            .and_then(Value::as_str)
            .map(|status| status.eq_ignore_ascii_case("healthy"))
            .unwrap_or(false);
        HealthStatus {
            healthy,
            backend_running: payload
                .get("ollama_running")
                .and_then(Value::as_bool)
                .unwrap_or(healthy),
            backend_version: payload
                .get("ollama_version")
                .and_then(Value::as_str)
                .map(str::to_string),
            timestamp: payload
                .get("timestamp")
                .and_then(Value::as_str)
                .map(str::to_string),
            error: payload
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    fn send_with_retry(
        &self,
        send: impl Fn() -> Result<TransportResponse>,
    ) -> Result<TransportResponse, GenerationError> {
        let max_retries = self.config.max_retries;
        let mut attempt = 0;
        loop {
            match send() {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !is_retryable_transport_error(&err) || attempt >= max_retries {
                        return Err(GenerationError::request_failed(error_chain_text(&err, 480)));
                    }
                    attempt += 1;
                    log::warn!(
                        "transport error, retrying ({attempt}/{max_retries}): {}",
                        error_chain_text(&err, 240)
                    );
                    let multiplier = u32::try_from(attempt).unwrap_or(u32::MAX);
                    thread::sleep(self.config.retry_backoff.saturating_mul(multiplier));
                }
            }
        }
    }
}

fn success_json_object(
    endpoint: &str,
    response: &TransportResponse,
) -> Result<Map<String, Value>, GenerationError> {
    if !response.is_success() {
        return Err(GenerationError::request_failed(format!(
            "{endpoint} returned {}: {}",
            response.status,
            truncate_text(&response.body, ERROR_BODY_MAX_CHARS)
        )));
    }
    match serde_json::from_str::<Value>(&response.body) {
        Ok(Value::Object(payload)) => Ok(payload),
        Ok(other) => Err(GenerationError::request_failed(format!(
            "{endpoint} returned a non-object payload: {}",
            truncate_text(&other.to_string(), 120)
        ))),
        Err(err) => Err(GenerationError::request_failed(format!(
            "{endpoint} returned invalid JSON payload: {err}"
        ))),
    }
}

fn reject_explicit_failure(
    endpoint: &str,
    payload: &Map<String, Value>,
) -> Result<(), GenerationError> {
    if payload.get("success").and_then(Value::as_bool) != Some(false) {
        return Ok(());
    }
    let detail = ["error", "detail", "message"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .unwrap_or("no detail");
    Err(GenerationError::request_failed(format!(
        "{endpoint} reported failure: {}",
        truncate_text(detail, ERROR_BODY_MAX_CHARS)
    )))
}

/// Decodes a base64 (optionally data-URL) image and reads its format and size.
pub fn decode_image_payload(encoded: &str) -> Result<ImageAttachment, GenerationError> {
    let data = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let bytes = BASE64
        .decode(data.trim().as_bytes())
        .map_err(|err| GenerationError::request_failed(format!("image base64 decode failed: {err}")))?;

    let reader = ImageReader::new(Cursor::new(bytes.as_slice()))
        .with_guessed_format()
        .map_err(|err| GenerationError::request_failed(format!("image decode failed: {err}")))?;
    let format = reader.format().ok_or_else(|| {
        GenerationError::request_failed("image payload is not a recognised image format")
    })?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|err| GenerationError::request_failed(format!("image header unreadable: {err}")))?;

    Ok(ImageAttachment {
        mime_type: format.to_mime_type().to_string(),
        width,
        height,
        bytes,
    })
}
