//! Error types for media analysis runs.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::media::MediaState;

/// Longest API error body passed through to the user.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Errors that can occur while analyzing media.
#[derive(Debug, thiserror::Error)]
pub enum MediaSightError {
    /// No API key in flags, environment or env file.
    #[error("API key not configured: set {var} or pass --api-key")]
    MissingApiKey {
        /// Primary environment variable consulted.
        var: &'static str,
    },

    /// The remote API rejected the credentials.
    #[error("API key rejected: {0}")]
    InvalidApiKey(String),

    /// A setting could not be parsed.
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting {
        /// Setting or environment variable name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Input file does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Input file has no content.
    #[error("file is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    /// Input file type is not supported by the remote API.
    #[error("unsupported media file: {}", .0.display())]
    UnsupportedMedia(PathBuf),

    /// I/O error (reading input, writing output).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode or encode failure.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Network or HTTP transport error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status (200 for in-band failures such as safety blocks).
        status: u16,
        /// Message from the provider.
        message: String,
    },

    /// Remote processing of an uploaded file failed.
    #[error("remote processing failed for {id}: {message}")]
    ProcessingFailed {
        /// Remote file id.
        id: String,
        /// Reason reported by the provider, if any.
        message: String,
    },

    /// Polling exceeded the configured maximum wait.
    #[error("media was not ready after {0:?}")]
    Timeout(Duration),

    /// Response could not be parsed as structured data.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Analysis requested on a handle that is not ready.
    #[error("media handle {id} is not ready (state: {state})")]
    HandleNotReady {
        /// Remote file id.
        id: String,
        /// State the handle was in.
        state: MediaState,
    },
}

/// Broad error category reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid credentials or settings.
    Config,
    /// File missing, empty, unreadable or unwritable.
    Io,
    /// Transport-level failure.
    Network,
    /// Remote API reported a failure.
    Api,
    /// Poll loop exceeded its maximum wait.
    Timeout,
    /// Response not structurally parseable.
    Parse,
    /// Internal misuse.
    State,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "ConfigError",
            Self::Io => "IOError",
            Self::Network => "NetworkError",
            Self::Api => "APIError",
            Self::Timeout => "TimeoutError",
            Self::Parse => "ParseError",
            Self::State => "StateError",
        };
        f.write_str(name)
    }
}

impl MediaSightError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingApiKey { .. } | Self::InvalidApiKey(_) | Self::InvalidSetting { .. } => {
                ErrorKind::Config
            }
            Self::FileNotFound(_)
            | Self::EmptyFile(_)
            | Self::UnsupportedMedia(_)
            | Self::Io(_)
            | Self::Image(_) => ErrorKind::Io,
            Self::Network(_) => ErrorKind::Network,
            Self::Api { .. } | Self::ProcessingFailed { .. } => ErrorKind::Api,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::MalformedResponse(_) | Self::Json(_) => ErrorKind::Parse,
            Self::HandleNotReady { .. } => ErrorKind::State,
        }
    }

    /// Returns the specific error name within its kind, if there is one.
    pub fn detail(&self) -> Option<&'static str> {
        match self {
            Self::MissingApiKey { .. } => Some("MissingAPIKey"),
            Self::InvalidApiKey(_) => Some("InvalidAPIKey"),
            Self::InvalidSetting { .. } => Some("InvalidSetting"),
            Self::FileNotFound(_) => Some("FileNotFound"),
            Self::EmptyFile(_) => Some("EmptyFile"),
            Self::UnsupportedMedia(_) => Some("UnsupportedMedia"),
            Self::Network(e) if e.is_timeout() => Some("Timeout"),
            Self::ProcessingFailed { .. } => Some("ProcessingFailed"),
            Self::MalformedResponse(_) | Self::Json(_) => Some("MalformedResponse"),
            Self::HandleNotReady { .. } => Some("HandleNotReady"),
            _ => None,
        }
    }

    /// Returns `"Kind: Detail"` or just `"Kind"`, e.g. `"IOError: FileNotFound"`.
    pub fn kind_label(&self) -> String {
        match self.detail() {
            Some(detail) => format!("{}: {}", self.kind(), detail),
            None => self.kind().to_string(),
        }
    }

    /// Returns true if a status re-check is worth attempting after this error.
    ///
    /// Only the poll loop acts on this; uploads and analysis requests are never
    /// retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Trims an API error body down to its message and caps its length.
///
/// Google error bodies look like `{"error": {"code": 400, "message": "..."}}`;
/// the inner message is extracted when present.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| text.trim().to_string());

    if message.chars().count() > MAX_ERROR_MESSAGE_LEN {
        let truncated: String = message.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        format!("{truncated}...")
    } else {
        message
    }
}

/// Removes every occurrence of the API key from a message.
pub(crate) fn redact(message: &str, secret: &str) -> String {
    if secret.is_empty() {
        return message.to_string();
    }
    message.replace(secret, "[REDACTED]")
}

/// Result type alias for media analysis operations.
pub type Result<T> = std::result::Result<T, MediaSightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            MediaSightError::MissingApiKey { var: "GEMINI_API_KEY" }.kind(),
            ErrorKind::Config
        );
        assert_eq!(
            MediaSightError::FileNotFound("a.mp4".into()).kind(),
            ErrorKind::Io
        );
        assert_eq!(
            MediaSightError::ProcessingFailed {
                id: "files/x".into(),
                message: String::new(),
            }
            .kind(),
            ErrorKind::Api
        );
        assert_eq!(
            MediaSightError::Timeout(Duration::from_secs(5)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            MediaSightError::MalformedResponse("x".into()).kind(),
            ErrorKind::Parse
        );
        assert_eq!(
            MediaSightError::HandleNotReady {
                id: "files/x".into(),
                state: MediaState::Processing,
            }
            .kind(),
            ErrorKind::State
        );
    }

    #[test]
    fn test_kind_label() {
        let err = MediaSightError::MissingApiKey { var: "GEMINI_API_KEY" };
        assert_eq!(err.kind_label(), "ConfigError: MissingAPIKey");

        let err = MediaSightError::EmptyFile("clip.mp4".into());
        assert_eq!(err.kind_label(), "IOError: EmptyFile");

        let err = MediaSightError::Api {
            status: 500,
            message: "boom".into(),
        };
        assert_eq!(err.kind_label(), "APIError");
    }

    #[test]
    fn test_is_retryable() {
        assert!(MediaSightError::Api {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(MediaSightError::Api {
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());

        assert!(!MediaSightError::Api {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!MediaSightError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!MediaSightError::InvalidApiKey("nope".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = MediaSightError::Api {
            status: 404,
            message: "Not found".into(),
        };
        assert_eq!(err.to_string(), "API error: 404 - Not found");

        let err = MediaSightError::FileNotFound("missing.mp4".into());
        assert_eq!(err.to_string(), "file not found: missing.mp4");
    }

    #[test]
    fn test_sanitize_extracts_google_message() {
        let body = r#"{"error": {"code": 400, "message": "Invalid argument", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(sanitize_error_message(body), "Invalid argument");
        assert_eq!(sanitize_error_message("  plain text \n"), "plain text");
    }

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(2_000);
        let msg = sanitize_error_message(&body);
        assert_eq!(msg.chars().count(), MAX_ERROR_MESSAGE_LEN + 3);
        assert!(msg.ends_with("..."));
    }

    #[test]
    fn test_redact() {
        assert_eq!(
            redact("bad key abc123 in url ?key=abc123", "abc123"),
            "bad key [REDACTED] in url ?key=[REDACTED]"
        );
        assert_eq!(redact("nothing", ""), "nothing");
    }
}
