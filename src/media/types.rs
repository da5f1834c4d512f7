//! Core types for uploaded media.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Kind of media being analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// A video clip, summarized as text.
    Video,
    /// A still image, analyzed for object detections.
    Image,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// Processing state of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaState {
    /// Bytes sent, server state not yet observed.
    Uploading,
    /// Server is still processing the file.
    Processing,
    /// File can be referenced in prompts.
    Ready,
    /// Server gave up on the file.
    Failed,
}

impl MediaState {
    /// Returns true for `Ready` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl std::fmt::Display for MediaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uploading => write!(f, "uploading"),
            Self::Processing => write!(f, "processing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Reference to a file stored by the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Resource name, e.g. `files/abc123`.
    pub id: String,
    /// URI used to reference the file in prompts.
    pub uri: String,
    /// MIME type recorded by the server.
    pub mime_type: String,
}

/// A local file uploaded for analysis, tracked through its remote lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle {
    remote: RemoteFile,
    path: PathBuf,
    kind: MediaKind,
    sent_size: Option<(u32, u32)>,
    /// Last observed processing state.
    pub state: MediaState,
}

impl MediaHandle {
    /// Creates a handle for a freshly uploaded file, in the `Uploading` state.
    pub fn new(remote: RemoteFile, path: impl Into<PathBuf>, kind: MediaKind) -> Self {
        Self {
            remote,
            path: path.into(),
            kind,
            sent_size: None,
            state: MediaState::Uploading,
        }
    }

    /// Records the `(width, height)` of a resized image that was sent in
    /// place of the original.
    pub fn with_sent_size(mut self, width: u32, height: u32) -> Self {
        self.sent_size = Some((width, height));
        self
    }

    /// Dimensions of the uploaded image when it differs from the local file.
    /// Pixel coordinates in replies refer to this size.
    pub fn sent_size(&self) -> Option<(u32, u32)> {
        self.sent_size
    }

    /// Remote resource name.
    pub fn id(&self) -> &str {
        &self.remote.id
    }

    /// URI used when referencing the file in a prompt.
    pub fn uri(&self) -> &str {
        &self.remote.uri
    }

    /// MIME type of the uploaded bytes.
    pub fn mime_type(&self) -> &str {
        &self.remote.mime_type
    }

    /// Local file this handle was created from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Kind of media behind this handle.
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Returns true if the file can be referenced in a prompt.
    pub fn is_ready(&self) -> bool {
        self.state == MediaState::Ready
    }
}

/// Image formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (lossless).
    Png,
    /// JPEG format (lossy).
    Jpeg,
    /// WebP format.
    WebP,
    /// GIF format.
    Gif,
}

impl ImageFormat {
    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
            Self::Gif => "image/gif",
        }
    }

    /// Attempts to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::WebP),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            return Some(Self::Gif);
        }

        None
    }
}

/// Returns the MIME type for a video file, based on its extension.
pub fn video_mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let mime = match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mpeg" | "mpg" => "video/mpeg",
        "3gp" => "video/3gpp",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        _ => return None,
    };
    Some(mime)
}

/// Returns the MIME type for an image, preferring its magic bytes over its extension.
pub fn image_mime_type(path: &Path, data: &[u8]) -> Option<&'static str> {
    ImageFormat::from_magic_bytes(data)
        .or_else(|| {
            path.extension()
                .and_then(|e| e.to_str())
                .and_then(ImageFormat::from_extension)
        })
        .map(|f| f.mime_type())
}
