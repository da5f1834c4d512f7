//! Remote multimodal API seam.

pub mod gemini;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::analysis::AnalysisPrompt;
use crate::error::Result;
use crate::media::{MediaHandle, MediaState, RemoteFile};

pub use gemini::{GeminiClient, GeminiClientBuilder};

/// Contents of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadBody {
    /// Bytes already in memory, e.g. a re-encoded image.
    Bytes(Vec<u8>),
    /// A local file, streamed from disk when sent.
    File(PathBuf),
}

/// A file to upload, with the metadata the server needs.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    /// Human-readable name shown in the provider's console.
    pub display_name: String,
    /// MIME type of the body.
    pub mime_type: String,
    /// Body length in bytes.
    pub size: u64,
    /// File contents.
    pub body: UploadBody,
}

/// Operations required of a hosted multimodal API.
#[async_trait]
pub trait MediaApi: Send + Sync {
    /// Uploads a file and returns its remote reference.
    async fn upload(&self, upload: MediaUpload) -> Result<RemoteFile>;

    /// Reads the current processing state of an uploaded file.
    async fn fetch_state(&self, handle: &MediaHandle) -> Result<MediaState>;

    /// Sends a prompt referencing a ready file and returns the reply text.
    async fn generate(&self, prompt: &AnalysisPrompt<'_>) -> Result<String>;

    /// Removes an uploaded file from remote storage.
    async fn delete(&self, handle: &MediaHandle) -> Result<()>;

    /// Returns the name of this provider for display.
    fn name(&self) -> &str;
}
