//! Prompting the remote model and interpreting its replies.

pub mod parser;
mod prompt;
mod types;

pub use parser::{parse_detections, parse_summary};
pub use prompt::{request_analysis, AnalysisPrompt, DetectionPreset, DEFAULT_VIDEO_PROMPT};
pub use types::{AnalysisResult, BoundingBox, CoordinateSpace, Detection};
