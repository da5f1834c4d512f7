//! Validates local media and sends it to the remote API.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::api::{MediaApi, MediaUpload, UploadBody};
use crate::error::{MediaSightError, Result};
use crate::media::{image_mime_type, video_mime_type, MediaHandle, MediaKind};

/// Longest image side sent to the API; larger images are downscaled first.
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 1024;

const UPLOAD_JPEG_QUALITY: u8 = 90;

/// Uploads local files and hands back handles in the `Uploading` state.
#[derive(Debug, Clone)]
pub struct MediaUploader {
    max_image_dimension: Option<u32>,
}

impl Default for MediaUploader {
    fn default() -> Self {
        Self {
            max_image_dimension: Some(DEFAULT_MAX_IMAGE_DIMENSION),
        }
    }
}

impl MediaUploader {
    /// Creates an uploader with the default image size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the longest image side to upload; `None` uploads images unchanged.
    pub fn max_image_dimension(mut self, limit: Option<u32>) -> Self {
        self.max_image_dimension = limit;
        self
    }

    /// Validates `path` and uploads it as `kind`.
    ///
    /// Fails with `FileNotFound` or `EmptyFile` before any network traffic.
    /// A failed upload never produces a handle.
    pub async fn upload<A>(&self, api: &A, path: &Path, kind: MediaKind) -> Result<MediaHandle>
    where
        A: MediaApi + ?Sized,
    {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(MediaSightError::FileNotFound(path.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MediaSightError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.len() == 0 {
            return Err(MediaSightError::EmptyFile(path.to_path_buf()));
        }

        let (body, size, mime_type, sent_size) = match kind {
            MediaKind::Video => {
                let mime = video_mime_type(path)
                    .ok_or_else(|| MediaSightError::UnsupportedMedia(path.to_path_buf()))?;
                (UploadBody::File(path.to_path_buf()), metadata.len(), mime, None)
            }
            MediaKind::Image => {
                let data = tokio::fs::read(path).await?;
                let mime = image_mime_type(path, &data)
                    .ok_or_else(|| MediaSightError::UnsupportedMedia(path.to_path_buf()))?;
                let (data, mime, sent_size) = match self.max_image_dimension {
                    Some(limit) => shrink_image(data, mime, limit)?,
                    None => (data, mime, None),
                };
                let size = data.len() as u64;
                (UploadBody::Bytes(data), size, mime, sent_size)
            }
        };

        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        tracing::info!(
            file = %path.display(),
            %kind,
            mime_type,
            bytes = size,
            "uploading media"
        );
        let remote = api
            .upload(MediaUpload {
                display_name,
                mime_type: mime_type.to_string(),
                size,
                body,
            })
            .await?;
        tracing::info!(file = %remote.id, uri = %remote.uri, "upload complete");

        let handle = MediaHandle::new(remote, path, kind);
        Ok(match sent_size {
            Some((width, height)) => handle.with_sent_size(width, height),
            None => handle,
        })
    }
}

/// Re-encodes an image as JPEG if its longer side exceeds `limit`, returning
/// the new dimensions when it did.
fn shrink_image(
    data: Vec<u8>,
    mime: &'static str,
    limit: u32,
) -> Result<(Vec<u8>, &'static str, Option<(u32, u32)>)> {
    let image = image::load_from_memory(&data)?;
    if image.width().max(image.height()) <= limit {
        return Ok((data, mime, None));
    }

    let resized = image.resize(limit, limit, FilterType::Lanczos3).to_rgb8();
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, UPLOAD_JPEG_QUALITY).encode_image(&resized)?;
    tracing::debug!(
        from = %format!("{}x{}", image.width(), image.height()),
        to = %format!("{}x{}", resized.width(), resized.height()),
        "downscaled image for upload"
    );
    Ok((out.into_inner(), "image/jpeg", Some(resized.dimensions())))
}
