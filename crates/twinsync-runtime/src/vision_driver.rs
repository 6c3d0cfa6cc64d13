//! [`VisionDriver`] – OpenAI-compatible vision classifier.
//!
//! Sends one image plus the spot's definition to a `/chat/completions`
//! endpoint and parses the reply into a [`ClassifierVerdict`]. Works with any
//! server speaking the OpenAI chat format with image parts, e.g. Gemini's
//! compatibility endpoint (the default) or a local Ollama (`http://localhost:11434/v1`).
//!
//! The [`ClassifierVerdict`] JSON Schema is injected via `response_format` so
//! the model is forced into the shape the comparator expects. Requests are
//! throttled by a `governor` rate limiter to stay inside the provider quota.
//!
//! # Example
//!
//! ```rust,no_run
//! use twinsync_runtime::vision_driver::{VisionDriver, VisionDriverConfig};
//!
//! let driver = VisionDriver::new(VisionDriverConfig {
//!     api_key: Some("secret".into()),
//!     ..VisionDriverConfig::default()
//! });
//! // driver.evaluate(&capture, &definition).await
//! ```

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use twinsync_hal::ImageCapture;
use twinsync_types::{ClassifierError, ClassifierVerdict, Definition};

use crate::observation::ObservationAdapter;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_TIMEOUT_SECS: u64 = 90;
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 15;

/// Instructions sent with every request. The model sees the current image
/// and definition only; it is never given past results.
pub const SYSTEM_PROMPT: &str = "\
You compare a photo of a physical spot against the owner's description of how it should look.
List every notable item you can see. For each item:
- phrase: a specific name (\"coffee mug\", not \"items\")
- qualifier: where it is, if useful (\"left side of desk\"), otherwise omit
- matches_definition: true if the description expects or allows it here, false if it should be put away
Reuse the owner's own words when an item corresponds to something they named.
Put one or two plain sentences of observation in notes.
Return only JSON matching the schema.";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct VisionDriverConfig {
    /// Base URL up to (not including) `/chat/completions`.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub requests_per_minute: u32,
}

impl Default for VisionDriverConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
        }
    }
}

impl std::fmt::Debug for VisionDriverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionDriverConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("timeout", &self.timeout)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage>,
    stream: bool,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct RequestMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

/// `response_format` field that enforces structured JSON Schema output.
#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaSpec,
}

#[derive(Serialize)]
struct JsonSchemaSpec {
    name: &'static str,
    schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// VisionDriver
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for an OpenAI-compatible vision endpoint.
///
/// Construct once and share between spots; the rate limiter is global to the
/// driver.
pub struct VisionDriver {
    config: VisionDriverConfig,
    client: reqwest::Client,
    limiter: DefaultDirectRateLimiter,
}

impl VisionDriver {
    pub fn new(config: VisionDriverConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self::with_client(config, client)
    }

    /// Use a preconfigured HTTP client. Its own timeout applies.
    pub fn with_client(config: VisionDriverConfig, client: reqwest::Client) -> Self {
        let rpm = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(rpm)),
            config,
            client,
        }
    }

    pub fn config(&self) -> &VisionDriverConfig {
        &self.config
    }

    fn build_request<'a>(&'a self, capture: &ImageCapture, definition: &Definition) -> ChatRequest<'a> {
        let schema = serde_json::to_value(schema_for!(ClassifierVerdict))
            .unwrap_or(serde_json::Value::Null);
        let data_url = format!(
            "data:{};base64,{}",
            capture.content_type,
            BASE64.encode(&capture.data)
        );
        ChatRequest {
            model: &self.config.model,
            messages: vec![
                RequestMessage {
                    role: "system",
                    content: vec![ContentPart::Text {
                        text: SYSTEM_PROMPT.to_string(),
                    }],
                },
                RequestMessage {
                    role: "user",
                    content: vec![
                        ContentPart::Text {
                            text: user_prompt(definition),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl { url: data_url },
                        },
                    ],
                },
            ],
            stream: false,
            temperature: 0.4,
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaSpec {
                    name: "classifier_verdict",
                    schema,
                },
            },
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> ClassifierError {
        if err.is_timeout() {
            ClassifierError::Timeout {
                after_secs: self.config.timeout.as_secs(),
            }
        } else {
            ClassifierError::Http(err.to_string())
        }
    }
}

#[async_trait]
impl ObservationAdapter for VisionDriver {
    async fn evaluate(
        &self,
        capture: &ImageCapture,
        definition: &Definition,
    ) -> Result<ClassifierVerdict, ClassifierError> {
        self.limiter.until_ready().await;
        let started = Instant::now();

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = self.build_request(capture, definition);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!(model = %self.config.model, "vision quota exceeded");
            return Err(ClassifierError::QuotaExceeded);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(ClassifierError::Http(format!("HTTP {status}: {snippet}")));
        }

        let response: ChatResponse = resp.json().await.map_err(|e| {
            if e.is_decode() {
                ClassifierError::Malformed(e.to_string())
            } else {
                self.map_send_error(e)
            }
        })?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClassifierError::Malformed("empty choices array".into()))?;

        let verdict = parse_verdict(&content)?;
        debug!(
            model = %self.config.model,
            items = verdict.items.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "verdict received"
        );
        Ok(verdict)
    }
}

fn user_prompt(definition: &Definition) -> String {
    let mut prompt = format!("How the spot should look:\n{}\n", definition.text.trim());
    if !definition.expected.is_empty() {
        prompt.push_str(&format!("\nExpected here: {}", definition.expected.join(", ")));
    }
    if !definition.excluded.is_empty() {
        prompt.push_str(&format!("\nShould not be here: {}", definition.excluded.join(", ")));
    }
    prompt
}

/// Strip optional Markdown code fences around a JSON reply.
fn strip_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```json").or_else(|| body.strip_prefix("```")) {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

fn parse_verdict(content: &str) -> Result<ClassifierVerdict, ClassifierError> {
    serde_json::from_str(strip_fences(content)).map_err(|e| ClassifierError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    async fn read_request(sock: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = sock.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Serve one response and hand the raw request back to the test.
    async fn serve_once(status: &'static str, body: String) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let request = read_request(&mut sock).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            sock.shutdown().await.ok();
            let _ = tx.send(request);
        });
        (format!("http://{addr}/v1"), rx)
    }

    fn driver(base_url: String, timeout: Duration) -> VisionDriver {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .unwrap();
        VisionDriver::with_client(
            VisionDriverConfig {
                base_url,
                model: "test-model".into(),
                api_key: Some("k-123".into()),
                timeout,
                requests_per_minute: 60,
            },
            client,
        )
    }

    fn completion(content: &str) -> String {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
        .to_string()
    }

    fn fixtures() -> (ImageCapture, Definition) {
        (
            ImageCapture::new("image/jpeg", vec![0xFF, 0xD8, 0xFF]),
            Definition::parse("Expected: laptop\nNo dishes").unwrap(),
        )
    }

    #[test]
    fn strip_fences_variants() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_fences("  {} "), "{}");
    }

    #[test]
    fn request_body_carries_image_and_schema() {
        let d = driver("http://localhost".into(), Duration::from_secs(1));
        let (capture, def) = fixtures();
        let body = serde_json::to_value(d.build_request(&capture, &def)).unwrap();
        let text = body.to_string();
        assert!(text.contains("data:image/jpeg;base64,/9j/"));
        assert!(text.contains("\"json_schema\""));
        assert!(text.contains("matches_definition"));
        assert!(text.contains("Should not be here: dishes"));
        assert_eq!(body["messages"][1]["content"][1]["type"], "image_url");
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = VisionDriverConfig {
            api_key: Some("super-secret".into()),
            ..VisionDriverConfig::default()
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("[redacted]"));
    }

    #[tokio::test]
    async fn parses_fenced_verdict() {
        let content = "```json\n{\"items\":[{\"phrase\":\"mug\",\"qualifier\":\"left\",\"matches_definition\":false}],\"notes\":\"One mug.\"}\n```";
        let (url, request) = serve_once("200 OK", completion(content)).await;
        let (capture, def) = fixtures();

        let verdict = driver(url, Duration::from_secs(5)).evaluate(&capture, &def).await.unwrap();
        assert_eq!(verdict.items.len(), 1);
        assert_eq!(verdict.items[0].phrase, "mug");
        assert_eq!(verdict.notes, "One mug.");

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /v1/chat/completions"));
        assert!(raw.to_lowercase().contains("authorization: bearer k-123"));
    }

    #[tokio::test]
    async fn quota_and_http_errors() {
        let (url, _rx) = serve_once("429 Too Many Requests", "{}".into()).await;
        let (capture, def) = fixtures();
        let err = driver(url, Duration::from_secs(5)).evaluate(&capture, &def).await.unwrap_err();
        assert_eq!(err, ClassifierError::QuotaExceeded);

        let (url, _rx) = serve_once("500 Internal Server Error", "boom".into()).await;
        let err = driver(url, Duration::from_secs(5)).evaluate(&capture, &def).await.unwrap_err();
        assert!(matches!(err, ClassifierError::Http(ref m) if m.contains("500")));
    }

    #[tokio::test]
    async fn non_json_content_is_malformed() {
        let (url, _rx) = serve_once("200 OK", completion("the desk looks fine")).await;
        let (capture, def) = fixtures();
        let err = driver(url, Duration::from_secs(5)).evaluate(&capture, &def).await.unwrap_err();
        assert!(matches!(err, ClassifierError::Malformed(_)));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let _ = read_request(&mut sock).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let (capture, def) = fixtures();
        let err = driver(format!("http://{addr}"), Duration::from_millis(200))
            .evaluate(&capture, &def)
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Timeout { .. }));
    }
}
