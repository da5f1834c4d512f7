//! Stage-by-stage runs of the video and image tools.
//!
//! Every run walks `Upload -> Poll -> Request -> Parse -> (Annotate) ->
//! Write`. A failure at any step stops the run and is reported as a
//! [`StageError`] naming that step; nothing is written unless every earlier
//! step succeeded.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::analysis::{
    parse_detections, parse_summary, request_analysis, AnalysisPrompt, AnalysisResult, Detection,
    DetectionPreset, DEFAULT_VIDEO_PROMPT,
};
use crate::annotate::{encode_image, Annotator};
use crate::api::MediaApi;
use crate::error::{ErrorKind, MediaSightError, Result};
use crate::media::{MediaHandle, MediaKind};
use crate::output::{OutputArtifact, OutputWriter};
use crate::poll::JobPoller;
use crate::upload::MediaUploader;

/// Step of a run, used to report where it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    /// Reading settings and credentials.
    LoadConfig,
    /// Sending the file.
    Upload,
    /// Waiting for server-side processing.
    Poll,
    /// Prompting the model.
    Request,
    /// Interpreting the reply.
    Parse,
    /// Drawing detections.
    Annotate,
    /// Saving the output file.
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoadConfig => "LoadConfig",
            Self::Upload => "Upload",
            Self::Poll => "Poll",
            Self::Request => "Request",
            Self::Parse => "Parse",
            Self::Annotate => "Annotate",
            Self::Write => "Write",
        };
        f.write_str(name)
    }
}

/// An error tagged with the step that produced it.
#[derive(Debug, thiserror::Error)]
#[error("{stage} step failed ({}): {source}", .source.kind_label())]
pub struct StageError {
    /// Step that failed.
    pub stage: Stage,
    /// Underlying error.
    pub source: MediaSightError,
}

/// Result of a pipeline step.
pub type StageResult<T> = std::result::Result<T, StageError>;

impl StageError {
    /// Broad category of the underlying error.
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

impl From<StageError> for MediaSightError {
    fn from(e: StageError) -> Self {
        e.source
    }
}

/// Tags a library result with the stage it came from.
pub trait StageExt<T> {
    /// Wraps an error in a [`StageError`] for `stage`.
    fn at(self, stage: Stage) -> StageResult<T>;
}

impl<T> StageExt<T> for crate::error::Result<T> {
    fn at(self, stage: Stage) -> StageResult<T> {
        self.map_err(|source| StageError { stage, source })
    }
}

/// Inputs for a video summary run.
#[derive(Debug, Clone)]
pub struct VideoJob {
    /// Local video file.
    pub path: PathBuf,
    /// Instruction; the default summary prompt when `None`.
    pub prompt: Option<String>,
    /// Explicit output path; `<stem>_summary.txt` in the output directory when `None`.
    pub output: Option<PathBuf>,
}

impl VideoJob {
    /// A job with the default prompt and output location.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            prompt: None,
            output: None,
        }
    }
}

/// Inputs for an image detection run.
#[derive(Debug, Clone)]
pub struct ImageJob {
    /// Local image file.
    pub path: PathBuf,
    /// Instruction; the preset's default prompt when `None`.
    pub prompt: Option<String>,
    /// What to look for.
    pub preset: DetectionPreset,
    /// Explicit output path; `<stem>_analyzed.jpg` or `<stem>_emotions.jpg` when `None`.
    pub output: Option<PathBuf>,
}

impl ImageJob {
    /// A job with the given preset's defaults.
    pub fn new(path: impl Into<PathBuf>, preset: DetectionPreset) -> Self {
        Self {
            path: path.into(),
            prompt: None,
            preset,
            output: None,
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Path actually written.
    pub output: PathBuf,
    /// Parsed analysis.
    pub result: AnalysisResult,
    /// Remote file the analysis referred to.
    pub remote_file: String,
}

/// Drives uploads, polling, prompting and output for one API client.
pub struct Pipeline<A> {
    api: A,
    uploader: MediaUploader,
    poller: JobPoller,
    writer: OutputWriter,
    keep_remote: bool,
}

impl<A: MediaApi> Pipeline<A> {
    /// Creates a pipeline with default settings, writing to the current directory.
    pub fn new(api: A) -> Self {
        Self {
            api,
            uploader: MediaUploader::default(),
            poller: JobPoller::default(),
            writer: OutputWriter::default(),
            keep_remote: false,
        }
    }

    /// Sets the uploader.
    pub fn uploader(mut self, uploader: MediaUploader) -> Self {
        self.uploader = uploader;
        self
    }

    /// Sets the poll interval and maximum wait.
    pub fn poller(mut self, poller: JobPoller) -> Self {
        self.poller = poller;
        self
    }

    /// Sets where output files go.
    pub fn writer(mut self, writer: OutputWriter) -> Self {
        self.writer = writer;
        self
    }

    /// Keeps uploaded files on the server after the request.
    pub fn keep_remote(mut self, keep: bool) -> Self {
        self.keep_remote = keep;
        self
    }

    /// The API client in use.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Summarizes a video and writes the summary as text.
    pub async fn run_video(&self, job: &VideoJob) -> StageResult<RunReport> {
        let handle = self
            .uploader
            .upload(&self.api, &job.path, MediaKind::Video)
            .await
            .at(Stage::Upload)?;

        let instruction = job.prompt.as_deref().unwrap_or(DEFAULT_VIDEO_PROMPT);
        let (handle, raw) = self
            .analyze(handle, |h| AnalysisPrompt::summary(h, instruction))
            .await?;

        let result = parse_summary(&raw);
        let text = result.summary().unwrap_or_default();

        let target = job
            .output
            .clone()
            .unwrap_or_else(|| self.writer.candidate(&job.path, "_summary", "txt"));
        let output = self
            .writer
            .write(&OutputArtifact::text(target, text))
            .at(Stage::Write)?;

        tracing::info!(output = %output.display(), "summary written");
        Ok(RunReport {
            output,
            result,
            remote_file: handle.id().to_string(),
        })
    }

    /// Detects objects or emotions in an image and writes an annotated copy.
    pub async fn run_image(&self, job: &ImageJob) -> StageResult<RunReport> {
        let handle = self
            .uploader
            .upload(&self.api, &job.path, MediaKind::Image)
            .await
            .at(Stage::Upload)?;

        let instruction = job.prompt.as_deref().unwrap_or(job.preset.default_prompt());
        let (handle, raw) = self
            .analyze(handle, |h| AnalysisPrompt::detection(h, instruction, job.preset))
            .await?;

        let result = parse_detections(&raw).at(Stage::Parse)?;
        let detections = result.detections().unwrap_or_default();
        tracing::info!(count = detections.len(), preset = %job.preset, "detections parsed");

        let target = job.output.clone().unwrap_or_else(|| {
            self.writer.candidate(&job.path, job.preset.output_suffix(), "jpg")
        });
        let encoded = annotate_file(
            &job.path,
            detections,
            handle.sent_size(),
            job.preset,
            &target,
        )
        .await
        .at(Stage::Annotate)?;

        let output = self
            .writer
            .write(&OutputArtifact::image(target, encoded))
            .at(Stage::Write)?;

        tracing::info!(output = %output.display(), "annotated image written");
        Ok(RunReport {
            output,
            result,
            remote_file: handle.id().to_string(),
        })
    }

    /// Polls until ready, sends the prompt, then removes the remote file.
    async fn analyze<F>(&self, handle: MediaHandle, prompt: F) -> StageResult<(MediaHandle, String)>
    where
        F: for<'a> FnOnce(&'a MediaHandle) -> AnalysisPrompt<'a>,
    {
        let uploaded = handle.clone();
        let handle = match self.poller.wait_until_ready(&self.api, handle).await {
            Ok(handle) => handle,
            Err(e) => {
                self.cleanup(&uploaded).await;
                return Err(StageError {
                    stage: Stage::Poll,
                    source: e,
                });
            }
        };

        let reply = request_analysis(&self.api, &prompt(&handle)).await;
        self.cleanup(&handle).await;
        let raw = reply.at(Stage::Request)?;
        Ok((handle, raw))
    }

    /// Best-effort removal of an uploaded file.
    async fn cleanup(&self, handle: &MediaHandle) {
        if self.keep_remote {
            tracing::debug!(file = %handle.id(), "keeping remote file");
            return;
        }
        match self.api.delete(handle).await {
            Ok(()) => tracing::debug!(file = %handle.id(), "remote file deleted"),
            Err(e) => {
                tracing::warn!(file = %handle.id(), error = %e, "failed to delete remote file")
            }
        }
    }
}

/// Draws `detections` on the full-resolution original and encodes it for `target`.
///
/// Pixel boxes refer to the image the model saw; when that was a downscaled
/// copy of `sent_size`, they are stretched back onto the original.
async fn annotate_file(
    source: &Path,
    detections: &[Detection],
    sent_size: Option<(u32, u32)>,
    preset: DetectionPreset,
    target: &Path,
) -> Result<Vec<u8>> {
    let bytes = tokio::fs::read(source).await?;
    let original = image::load_from_memory(&bytes)?;

    let rescaled: Vec<Detection>;
    let detections = match sent_size {
        Some((width, height)) if width > 0 && height > 0 => {
            let sx = original.width() as f32 / width as f32;
            let sy = original.height() as f32 / height as f32;
            rescaled = detections
                .iter()
                .map(|d| Detection {
                    bbox: d.bbox.scaled(sx, sy),
                    ..d.clone()
                })
                .collect();
            &rescaled[..]
        }
        _ => detections,
    };

    let annotated = Annotator::new(preset.into()).annotate(&original, detections);
    encode_image(&annotated, target)
}
