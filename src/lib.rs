#![warn(missing_docs)]
//! MediaSight - Gemini-powered video summaries and image detection.
//!
//! This crate uploads local media to the Gemini Files API, waits for
//! server-side processing, prompts the model about the file, and writes the
//! result next to the input: a text summary for videos, or an annotated copy
//! of the image with labeled bounding boxes.
//!
//! # Quick Start - Video Summary
//!
//! ```no_run
//! use mediasight::{Config, ConfigOverrides, Pipeline, VideoJob};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> mediasight::Result<()> {
//!     let config = Config::load(ConfigOverrides::default())?;
//!     let pipeline = Pipeline::new(config.gemini_client()?);
//!     let report = pipeline.run_video(&VideoJob::new("clip.mp4")).await?;
//!     println!("summary written to {}", report.output.display());
//!     Ok(())
//! }
//! ```
//!
//! # Quick Start - Image Detection
//!
//! ```no_run
//! use mediasight::{DetectionPreset, GeminiClient, ImageJob, Pipeline};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> mediasight::Result<()> {
//!     let client = GeminiClient::builder().build()?;
//!     let job = ImageJob::new("party.jpg", DetectionPreset::Emotions);
//!     let report = Pipeline::new(client).run_image(&job).await?;
//!     for detection in report.result.detections().unwrap_or_default() {
//!         println!("{}", detection.label);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `cli` (default): the `mediasight` command-line tool

mod error;

pub mod analysis;
pub mod annotate;
pub mod api;
pub mod config;
pub mod media;
pub mod output;
pub mod pipeline;
pub mod poll;
pub mod samples;
pub mod upload;

// Re-export error types at crate root
pub use error::{ErrorKind, MediaSightError, Result};

pub use analysis::{
    AnalysisPrompt, AnalysisResult, BoundingBox, CoordinateSpace, Detection, DetectionPreset,
};
pub use annotate::{Annotator, LabelStyle};
pub use api::{GeminiClient, GeminiClientBuilder, MediaApi, MediaUpload, UploadBody};
pub use config::{Config, ConfigOverrides};
pub use media::{MediaHandle, MediaKind, MediaState, RemoteFile};
pub use output::{OutputArtifact, OutputWriter};
pub use pipeline::{
    ImageJob, Pipeline, RunReport, Stage, StageError, StageExt, StageResult, VideoJob,
};
pub use poll::JobPoller;
pub use samples::{DownloadReport, SampleDownloader, SAMPLE_IMAGES};
pub use upload::MediaUploader;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{MediaSightError, Result};
    pub use crate::{
        AnalysisResult, Config, ConfigOverrides, DetectionPreset, GeminiClient, ImageJob,
        MediaApi, Pipeline, VideoJob,
    };
}
