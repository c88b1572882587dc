//! Replicate prediction API transport
//!
//! One call creates a prediction with the source image inlined as a data URI,
//! polls it until it settles and returns a handle to the output file. Output
//! URLs are streamed lazily so the caller decides when the download happens.

use crate::config::ClientConfig;
use crate::error::{RemovalError, Result};
use crate::models::ModelIdentifier;
use crate::transport::{InferenceRequest, InferenceTransport, PredictionOutput};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::StreamExt;
use futures_util::stream::TryStreamExt;
use reqwest::{Client, Response};
use serde_json::{json, Value};

/// Lifecycle state of a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl PredictionStatus {
    /// Parse the `status` field of a prediction
    ///
    /// # Errors
    /// - Unknown status string
    pub fn parse(status: &str) -> Result<Self> {
        match status {
            "starting" => Ok(Self::Starting),
            "processing" => Ok(Self::Processing),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(RemovalError::service(format!(
                "Unknown prediction status '{}'",
                other
            ))),
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Where a finished prediction's output lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputRef {
    /// File to download
    Url(String),
    /// Payload carried inline as a data URI
    Inline(Vec<u8>),
}

/// Relative path of the prediction creation endpoint for a model
#[must_use]
pub fn prediction_path(model: &ModelIdentifier) -> String {
    match model.version() {
        Some(_) => "predictions".to_string(),
        None => format!("models/{}/{}/predictions", model.owner(), model.name()),
    }
}

/// JSON body of the prediction creation request
#[must_use]
pub fn prediction_body(model: &ModelIdentifier, image_png: &[u8]) -> Value {
    let input = json!({ "image": encode_data_uri("image/png", image_png) });
    match model.version() {
        Some(version) => json!({ "version": version, "input": input }),
        None => json!({ "input": input }),
    }
}

/// Encode bytes as a base64 data URI
#[must_use]
pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

/// Decode a `data:` URI payload
///
/// # Errors
/// - Missing `,` separator or invalid base64
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| RemovalError::service("Output is not a data URI"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| RemovalError::service("Malformed data URI in output"))?;

    if header.ends_with(";base64") {
        BASE64
            .decode(payload.trim())
            .map_err(|e| RemovalError::service(format!("Invalid base64 output: {}", e)))
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

/// Read the `status` field of a prediction
///
/// # Errors
/// - Field missing or unknown
pub fn prediction_status(prediction: &Value) -> Result<PredictionStatus> {
    let status = prediction
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| RemovalError::service("Prediction response has no status"))?;
    PredictionStatus::parse(status)
}

/// Locate the output of a succeeded prediction
///
/// A list output resolves to its first element. `Ok(None)` means no output.
///
/// # Errors
/// - Output of an unsupported JSON type or an undecodable data URI
pub fn output_ref(output: &Value) -> Result<Option<OutputRef>> {
    match output {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) if s.starts_with("data:") => Ok(Some(OutputRef::Inline(decode_data_uri(s)?))),
        Value::String(s) => Ok(Some(OutputRef::Url(s.clone()))),
        Value::Array(items) => match items.first() {
            Some(first) => output_ref(first),
            None => Ok(None),
        },
        other => Err(RemovalError::service(format!(
            "Unsupported output type: {}",
            json_type_name(other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Error for a prediction that settled as `failed`
#[must_use]
pub fn failure_error(prediction: &Value) -> RemovalError {
    let message = match prediction.get("error") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Null) | None => "Prediction failed".to_string(),
        Some(other) => other.to_string(),
    };
    let logs = prediction
        .get("logs")
        .and_then(Value::as_str)
        .filter(|logs| !logs.trim().is_empty())
        .map(str::to_string);
    RemovalError::model(message, logs)
}

/// Human-readable reason from a non-success response body
#[must_use]
pub fn error_detail(status: u16, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let detail = parsed.as_ref().and_then(|value| {
        ["detail", "title", "error"]
            .iter()
            .find_map(|field| value.get(*field).and_then(Value::as_str))
            .map(str::to_string)
    });

    match detail {
        Some(detail) => format!("{} (HTTP {})", detail, status),
        None if body.trim().is_empty() => format!("HTTP {}", status),
        None => format!("HTTP {}: {}", status, body.trim()),
    }
}

/// Polling URL of a prediction
#[must_use]
pub fn poll_url(prediction: &Value, config: &ClientConfig) -> Option<String> {
    prediction
        .pointer("/urls/get")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            prediction
                .get("id")
                .and_then(Value::as_str)
                .map(|id| config.endpoint(&format!("predictions/{}", id)))
        })
}

/// [`InferenceTransport`] backed by the Replicate HTTP API
#[derive(Debug, Clone)]
pub struct ReplicateTransport {
    client: Client,
    config: ClientConfig,
}

impl ReplicateTransport {
    /// Create a transport
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Failed to create HTTP client
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("dream-bgremove/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemovalError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn create_prediction(&self, request: &InferenceRequest) -> Result<Value> {
        let url = self.config.endpoint(&prediction_path(&request.model));
        let body = prediction_body(&request.model, &request.source_image_bytes);

        tracing::debug!(url = %url, model = %request.model, bytes = request.source_image_bytes.len(), "Creating prediction");
        let response = self
            .client
            .post(&url)
            .bearer_auth(request.api_key.expose())
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .await
            .map_err(|e| RemovalError::transport(e.to_string()))?;

        Self::read_json(response).await
    }

    async fn get_prediction(&self, url: &str, request: &InferenceRequest) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .bearer_auth(request.api_key.expose())
            .send()
            .await
            .map_err(|e| RemovalError::transport(e.to_string()))?;

        Self::read_json(response).await
    }

    async fn read_json(response: Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemovalError::service(error_detail(status.as_u16(), &body)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| RemovalError::service(format!("Invalid response body: {}", e)))
    }

    async fn wait_for_prediction(&self, mut prediction: Value, request: &InferenceRequest) -> Result<Value> {
        let mut status = prediction_status(&prediction)?;
        while !status.is_terminal() {
            let url = poll_url(&prediction, &self.config)
                .ok_or_else(|| RemovalError::service("Prediction response has no polling URL"))?;

            tokio::time::sleep(self.config.poll_interval).await;
            prediction = self.get_prediction(&url, request).await?;
            status = prediction_status(&prediction)?;
            tracing::trace!(status = ?status, "Polled prediction");
        }
        Ok(prediction)
    }

    async fn download(&self, url: String) -> Result<PredictionOutput> {
        tracing::debug!(url = %url, "Downloading prediction output");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RemovalError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemovalError::service(format!(
                "HTTP error {} for {}",
                status, url
            )));
        }

        let chunks = response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(|e| RemovalError::transport(e.to_string()))
            .boxed();
        Ok(PredictionOutput::from_stream(chunks))
    }
}

#[async_trait]
impl InferenceTransport for ReplicateTransport {
    async fn run(&self, request: &InferenceRequest) -> Result<Option<PredictionOutput>> {
        let created = self.create_prediction(request).await?;
        if let Some(id) = created.get("id").and_then(Value::as_str) {
            tracing::info!(prediction = %id, model = %request.model, "Prediction created");
        }

        let prediction = self.wait_for_prediction(created, request).await?;
        match prediction_status(&prediction)? {
            PredictionStatus::Succeeded => {},
            PredictionStatus::Failed => return Err(failure_error(&prediction)),
            PredictionStatus::Canceled => {
                return Err(RemovalError::service("Prediction was canceled"))
            },
            PredictionStatus::Starting | PredictionStatus::Processing => {
                return Err(RemovalError::unexpected("Prediction did not settle"))
            },
        }

        match output_ref(prediction.get("output").unwrap_or(&Value::Null))? {
            None => Ok(None),
            Some(OutputRef::Inline(bytes)) => Ok(Some(PredictionOutput::from_bytes(bytes))),
            Some(OutputRef::Url(url)) => self.download(url).await.map(Some),
        }
    }

    fn name(&self) -> &'static str {
        "replicate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pinned() -> ModelIdentifier {
        ModelIdentifier::parse("owner/model:abc123").unwrap()
    }

    fn latest() -> ModelIdentifier {
        ModelIdentifier::parse("owner/model").unwrap()
    }

    #[test]
    fn test_prediction_path() {
        assert_eq!(prediction_path(&pinned()), "predictions");
        assert_eq!(prediction_path(&latest()), "models/owner/model/predictions");
    }

    #[test]
    fn test_prediction_body() {
        let body = prediction_body(&pinned(), b"png");
        assert_eq!(body["version"], "abc123");
        assert_eq!(body["input"]["image"], "data:image/png;base64,cG5n");

        let body = prediction_body(&latest(), b"png");
        assert!(body.get("version").is_none());
        assert_eq!(body["input"]["image"], "data:image/png;base64,cG5n");
    }

    #[test]
    fn test_data_uri_decoding() {
        assert_eq!(decode_data_uri("data:image/png;base64,cG5n").unwrap(), b"png");
        assert_eq!(decode_data_uri("data:text/plain,hello").unwrap(), b"hello");
        assert!(decode_data_uri("data:image/png;base64").is_err());
        assert!(decode_data_uri("data:image/png;base64,!!!").is_err());
        assert!(decode_data_uri("https://example.com").is_err());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            prediction_status(&json!({"status": "processing"})).unwrap(),
            PredictionStatus::Processing
        );
        assert!(PredictionStatus::Succeeded.is_terminal());
        assert!(PredictionStatus::Canceled.is_terminal());
        assert!(!PredictionStatus::Starting.is_terminal());
        assert!(prediction_status(&json!({"status": "queued-ish"})).is_err());
        assert!(prediction_status(&json!({})).is_err());
    }

    #[test]
    fn test_output_ref() {
        assert_eq!(output_ref(&Value::Null).unwrap(), None);
        assert_eq!(output_ref(&json!([])).unwrap(), None);
        assert_eq!(
            output_ref(&json!("https://replicate.delivery/out.png")).unwrap(),
            Some(OutputRef::Url("https://replicate.delivery/out.png".to_string()))
        );
        assert_eq!(
            output_ref(&json!(["https://a/1.png", "https://a/2.png"])).unwrap(),
            Some(OutputRef::Url("https://a/1.png".to_string()))
        );
        assert_eq!(
            output_ref(&json!("data:image/png;base64,cG5n")).unwrap(),
            Some(OutputRef::Inline(b"png".to_vec()))
        );
        assert!(output_ref(&json!({"image": "x"})).is_err());
    }

    #[test]
    fn test_failure_error_carries_logs() {
        let err = failure_error(&json!({
            "status": "failed",
            "error": "CUDA out of memory",
            "logs": "loading weights\n"
        }));
        assert_eq!(
            err.to_string(),
            "Model error: CUDA out of memory\nLogs: loading weights"
        );

        let err = failure_error(&json!({"status": "failed", "error": null}));
        assert_eq!(err.to_string(), "Model error: Prediction failed");
    }

    #[test]
    fn test_error_detail() {
        assert_eq!(
            error_detail(401, r#"{"detail": "Invalid token."}"#),
            "Invalid token. (HTTP 401)"
        );
        assert_eq!(error_detail(502, ""), "HTTP 502");
        assert_eq!(error_detail(500, "oops"), "HTTP 500: oops");
    }

    #[test]
    fn test_poll_url() {
        let config = ClientConfig::default();
        assert_eq!(
            poll_url(&json!({"urls": {"get": "https://x/p/1"}}), &config).as_deref(),
            Some("https://x/p/1")
        );
        assert_eq!(
            poll_url(&json!({"id": "abc"}), &config).as_deref(),
            Some("https://api.replicate.com/v1/predictions/abc")
        );
        assert_eq!(poll_url(&json!({}), &config), None);
    }

    #[test]
    fn test_transport_rejects_invalid_config() {
        let config = ClientConfig {
            api_base: "not-a-url".to_string(),
            ..ClientConfig::default()
        };
        assert!(ReplicateTransport::new(config).is_err());
        assert!(ReplicateTransport::new(ClientConfig::default()).is_ok());
    }
}
