//! Gemini (Google) Files API + generateContent client.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::analysis::AnalysisPrompt;
use crate::api::{MediaApi, MediaUpload, UploadBody};
use crate::error::{redact, sanitize_error_message, MediaSightError, Result};
use crate::media::{MediaHandle, MediaState, RemoteFile};

/// Public endpoint of the Gemini Developer API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for GeminiClient.
#[derive(Debug, Clone)]
pub struct GeminiClientBuilder {
    api_key: Option<String>,
    model: String,
    base_url: String,
    request_timeout: Duration,
}

impl Default for GeminiClientBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl GeminiClientBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `GEMINI_API_KEY`, then `GOOGLE_API_KEY`.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the model, with or without the `models/` prefix.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.model = model
            .strip_prefix("models/")
            .map(str::to_string)
            .unwrap_or(model);
        self
    }

    /// Sets the API root, e.g. a proxy or a local stub.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the timeout applied to each HTTP request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builds the client, resolving the API key.
    pub fn build(self) -> Result<GeminiClient> {
        let api_key = self
            .api_key
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or(MediaSightError::MissingApiKey {
                var: "GEMINI_API_KEY",
            })?;

        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(self.request_timeout))
            .build()?;

        Ok(GeminiClient {
            client,
            api_key,
            model: self.model,
            base_url: self.base_url,
        })
    }
}

/// Gemini client covering upload, state polling, generation and cleanup.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Creates a new `GeminiClientBuilder`.
    pub fn builder() -> GeminiClientBuilder {
        GeminiClientBuilder::new()
    }

    /// Model identifier used for generation.
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn upload_impl(&self, upload: MediaUpload) -> Result<RemoteFile> {
        let start = Instant::now();
        let size = upload.size;

        // Resumable protocol: open a session, then send all bytes and finalize.
        let response = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", &upload.mime_type)
            .json(&StartUploadRequest {
                file: FileMetadata {
                    display_name: &upload.display_name,
                },
            })
            .send()
            .await?;
        let response = self.check(response).await?;

        let session_url = response
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| MediaSightError::Api {
                status: response.status().as_u16(),
                message: "upload session response has no x-goog-upload-url header".into(),
            })?;

        let body = match upload.body {
            UploadBody::Bytes(data) => reqwest::Body::from(data),
            UploadBody::File(path) => reqwest::Body::from(tokio::fs::File::open(&path).await?),
        };
        let response = self
            .client
            .post(&session_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await?;
        let uploaded: UploadResponse = self.read_json(response).await?;

        tracing::debug!(
            file = %uploaded.file.name,
            bytes = size,
            duration_ms = start.elapsed().as_millis() as u64,
            "upload finalized"
        );
        Ok(uploaded.file.into_remote(&upload.mime_type))
    }

    async fn fetch_state_impl(&self, handle: &MediaHandle) -> Result<MediaState> {
        let response = self
            .client
            .get(format!("{}/v1beta/{}", self.base_url, handle.id()))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        let file: FileResource = self.read_json(response).await?;

        let state = file.media_state();
        if state == MediaState::Failed {
            if let Some(err) = file.error.and_then(|e| e.message) {
                tracing::warn!(file = %handle.id(), reason = %err, "remote processing failed");
            }
        }
        Ok(state)
    }

    async fn generate_impl(&self, prompt: &AnalysisPrompt<'_>) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = GenerateContentRequest::from_prompt(prompt);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let reply: GenerateContentResponse = self.read_json(response).await?;
        reply.into_text()
    }

    async fn delete_impl(&self, handle: &MediaHandle) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/v1beta/{}", self.base_url, handle.id()))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    /// Passes successful responses through and converts the rest into errors.
    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(self.parse_error(status.as_u16(), &text))
    }

    async fn read_json<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = self.check(response).await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        decode_body(status, &text)
    }

    fn parse_error(&self, status: u16, text: &str) -> MediaSightError {
        let message = redact(&sanitize_error_message(text), &self.api_key);
        let lower = message.to_lowercase();
        if status == 401
            || status == 403
            || lower.contains("api key not valid")
            || lower.contains("api_key_invalid")
        {
            return MediaSightError::InvalidApiKey(message);
        }
        if status == 404 {
            return MediaSightError::Api {
                status,
                message: format!("{message} (check the model name and file id)"),
            };
        }
        MediaSightError::Api { status, message }
    }
}

/// Decodes a successful response body. A body that does not match the
/// expected wire shape is an API fault, not a model-output parse failure.
fn decode_body<T: DeserializeOwned>(status: u16, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| MediaSightError::Api {
        status,
        message: format!("unexpected Gemini response body: {e}"),
    })
}

#[async_trait]
impl MediaApi for GeminiClient {
    async fn upload(&self, upload: MediaUpload) -> Result<RemoteFile> {
        self.upload_impl(upload).await
    }

    async fn fetch_state(&self, handle: &MediaHandle) -> Result<MediaState> {
        self.fetch_state_impl(handle).await
    }

    async fn generate(&self, prompt: &AnalysisPrompt<'_>) -> Result<String> {
        self.generate_impl(prompt).await
    }

    async fn delete(&self, handle: &MediaHandle) -> Result<()> {
        self.delete_impl(handle).await
    }

    fn name(&self) -> &str {
        "Gemini (Google)"
    }
}

// Request/Response types
#[derive(Debug, Serialize)]
struct StartUploadRequest<'a> {
    file: FileMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct FileMetadata<'a> {
    display_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: FileResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<StatusMessage>,
}

#[derive(Debug, Deserialize)]
struct StatusMessage {
    #[serde(default)]
    message: Option<String>,
}

impl FileResource {
    fn media_state(&self) -> MediaState {
        match self.state.as_deref() {
            Some("ACTIVE") => MediaState::Ready,
            Some("FAILED") => MediaState::Failed,
            // PROCESSING, STATE_UNSPECIFIED or absent
            _ => MediaState::Processing,
        }
    }

    fn into_remote(self, fallback_mime: &str) -> RemoteFile {
        RemoteFile {
            uri: self.uri.unwrap_or_else(|| self.name.clone()),
            mime_type: self.mime_type.unwrap_or_else(|| fallback_mime.to_string()),
            id: self.name,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<RequestPart<'a>>,
}

/// A part in a Gemini request - text or a reference to an uploaded file.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: &'a str },
    FileData { file_data: FileData<'a> },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

impl<'a> GenerateContentRequest<'a> {
    fn from_prompt(prompt: &'a AnalysisPrompt<'_>) -> Self {
        let handle = prompt.handle();
        let parts = vec![
            RequestPart::Text {
                text: prompt.instruction(),
            },
            RequestPart::FileData {
                file_data: FileData {
                    mime_type: handle.mime_type(),
                    file_uri: handle.uri(),
                },
            },
        ];

        let generation_config = if prompt.temperature().is_some() || prompt.json_output() {
            Some(GenerationConfig {
                temperature: prompt.temperature(),
                response_mime_type: prompt.json_output().then_some("application/json"),
            })
        } else {
            None
        };

        // Detection prompts routinely mention people; only block clear harm.
        let safety_settings = if prompt.json_output() {
            vec![SafetySetting {
                category: "HARM_CATEGORY_DANGEROUS_CONTENT",
                threshold: "BLOCK_ONLY_HIGH",
            }]
        } else {
            Vec::new()
        };

        Self {
            contents: vec![Content {
                role: "user",
                parts,
            }],
            system_instruction: prompt.system_instruction().map(|text| SystemInstruction {
                parts: vec![RequestPart::Text { text }],
            }),
            generation_config,
            safety_settings,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    block_reason_message: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenates the text parts of the first candidate.
    fn into_text(self) -> Result<String> {
        // Blocks are reported in-band with HTTP 200.
        if let Some(feedback) = self.prompt_feedback {
            if let Some(reason) = feedback.block_reason {
                let message = feedback
                    .block_reason_message
                    .unwrap_or_else(|| format!("prompt blocked: {reason}"));
                return Err(MediaSightError::Api {
                    status: 200,
                    message,
                });
            }
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| MediaSightError::Api {
                status: 200,
                message: "no candidates in Gemini response".into(),
            })?;

        if let Some(reason) = candidate.finish_reason.as_deref() {
            if matches!(
                reason,
                "SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "SPII"
            ) {
                return Err(MediaSightError::Api {
                    status: 200,
                    message: format!("response blocked by Gemini safety filter: {reason}"),
                });
            }
        }

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(MediaSightError::Api {
                status: 200,
                message: "Gemini returned no text".into(),
            });
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::DetectionPreset;
    use crate::error::ErrorKind;
    use crate::media::MediaKind;

    fn ready_handle() -> MediaHandle {
        let mut handle = MediaHandle::new(
            RemoteFile {
                id: "files/abc".into(),
                uri: "https://generativelanguage.googleapis.com/v1beta/files/abc".into(),
                mime_type: "image/jpeg".into(),
            },
            "cat.jpg",
            MediaKind::Image,
        );
        handle.state = MediaState::Ready;
        handle
    }

    fn client() -> GeminiClient {
        GeminiClientBuilder::new()
            .api_key("test-key")
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_with_explicit_key() {
        let client = GeminiClientBuilder::new()
            .api_key("test-key")
            .model("models/gemini-1.5-pro")
            .base_url("http://localhost:8080/")
            .build()
            .unwrap();
        assert_eq!(client.model(), "gemini-1.5-pro");
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_debug_hides_key() {
        let debug = format!("{:?}", client());
        assert!(!debug.contains("test-key"));
        assert!(debug.contains("gemini-2.0-flash"));
    }

    #[test]
    fn test_summary_request_construction() {
        let handle = ready_handle();
        let prompt = AnalysisPrompt::summary(&handle, "Summarize");
        let json = serde_json::to_value(GenerateContentRequest::from_prompt(&prompt)).unwrap();

        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Summarize");
        assert_eq!(
            json["contents"][0]["parts"][1]["file_data"]["fileUri"],
            handle.uri()
        );
        assert_eq!(
            json["contents"][0]["parts"][1]["file_data"]["mimeType"],
            "image/jpeg"
        );
        assert!(json.get("generationConfig").is_none());
        assert!(json.get("systemInstruction").is_none());
        assert!(json.get("safetySettings").is_none());
    }

    #[test]
    fn test_detection_request_construction() {
        let handle = ready_handle();
        let prompt = AnalysisPrompt::detection(&handle, "Find cats", DetectionPreset::Objects);
        let json = serde_json::to_value(GenerateContentRequest::from_prompt(&prompt)).unwrap();

        assert_eq!(json["generationConfig"]["temperature"], 0.5);
        assert_eq!(
            json["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert!(json["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("JSON array"));
        assert_eq!(json["safetySettings"][0]["threshold"], "BLOCK_ONLY_HIGH");
        // Should use camelCase per serde config
        assert!(json.get("generation_config").is_none());
    }

    #[test]
    fn test_upload_response_deserialization() {
        let json = r#"{
            "file": {
                "name": "files/abc-123",
                "displayName": "clip.mp4",
                "mimeType": "video/mp4",
                "sizeBytes": "1024",
                "uri": "https://generativelanguage.googleapis.com/v1beta/files/abc-123",
                "state": "PROCESSING"
            }
        }"#;
        let resp: UploadResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.file.media_state(), MediaState::Processing);
        let remote = resp.file.into_remote("application/octet-stream");
        assert_eq!(remote.id, "files/abc-123");
        assert_eq!(remote.mime_type, "video/mp4");
        assert!(remote.uri.ends_with("files/abc-123"));
    }

    #[test]
    fn test_file_state_mapping() {
        let state = |s: &str| {
            let json = format!(r#"{{"name": "files/x", "state": "{s}"}}"#);
            serde_json::from_str::<FileResource>(&json)
                .unwrap()
                .media_state()
        };
        assert_eq!(state("ACTIVE"), MediaState::Ready);
        assert_eq!(state("FAILED"), MediaState::Failed);
        assert_eq!(state("PROCESSING"), MediaState::Processing);
        assert_eq!(state("STATE_UNSPECIFIED"), MediaState::Processing);
    }

    #[test]
    fn test_response_text_is_joined() {
        let json = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "A cat "}, {"text": "plays."}], "role": "model"},
                "finishReason": "STOP"
            }]
        }"#;
        let resp: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.into_text().unwrap(), "A cat plays.");
    }

    #[test]
    fn test_response_with_prompt_feedback_block() {
        let json = r#"{
            "candidates": [],
            "promptFeedback": {"blockReason": "SAFETY"}
        }"#;
        let resp: GenerateContentResponse = serde_json::from_str(json).unwrap();
        let err = resp.into_text().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Api);
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_response_safety_finish_reason() {
        let json = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        let resp: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.into_text().unwrap_err().kind(), ErrorKind::Api);
    }

    #[test]
    fn test_response_without_text() {
        let json = r#"{"candidates": [{"content": {"parts": [{}]}}]}"#;
        let resp: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert!(resp.into_text().is_err());
    }

    #[test]
    fn test_undecodable_body_is_api_error() {
        let err =
            decode_body::<GenerateContentResponse>(200, "<html>gateway</html>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Api);
        assert!(!err.is_retryable());
        match err {
            MediaSightError::Api { status, message } => {
                assert_eq!(status, 200);
                assert!(message.starts_with("unexpected Gemini response body"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let file: FileResource =
            decode_body(200, r#"{"name": "files/abc", "state": "ACTIVE"}"#).unwrap();
        assert_eq!(file.media_state(), MediaState::Ready);
    }

    #[test]
    fn test_parse_error_mapping() {
        let client = client();

        let err = client.parse_error(403, "forbidden");
        assert_eq!(err.kind_label(), "ConfigError: InvalidAPIKey");

        let body = r#"{"error": {"code": 400, "message": "API key not valid. Please pass a valid API key.", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(
            client.parse_error(400, body).kind_label(),
            "ConfigError: InvalidAPIKey"
        );

        let err = client.parse_error(500, "internal test-key failure");
        match err {
            MediaSightError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "internal [REDACTED] failure");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
