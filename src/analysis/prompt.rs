//! Prompts sent alongside uploaded media, and the request step itself.

use serde::{Deserialize, Serialize};

use crate::api::MediaApi;
use crate::error::{MediaSightError, Result};
use crate::media::MediaHandle;

/// Default instruction for video summaries.
pub const DEFAULT_VIDEO_PROMPT: &str = "Please analyze this video and provide a detailed summary \
     of the main story, including key points and any significant quotes or statements.";

/// Sampling temperature used for detection prompts.
const DETECTION_TEMPERATURE: f32 = 0.5;

const OBJECTS_SYSTEM_INSTRUCTION: &str = "Return bounding boxes as a JSON array with labels. \
     Never return masks or code fencing. Limit to 25 objects. If an object is present multiple \
     times, name them according to their unique characteristic (colors, size, position, unique \
     characteristics, etc.).";

const EMOTIONS_SYSTEM_INSTRUCTION: &str = "Return bounding boxes as a JSON array with labels. \
     Never return masks or code fencing. Limit to 25 objects. For each person detected, analyze \
     their facial expression and select exactly one emotion from: [happy, sad, angry, surprise, \
     disgust, fear, neutral]. Label format should be \"Person: [emotion]\".";

/// What an image analysis looks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionPreset {
    /// Every distinguishable object, labeled with a description.
    #[default]
    Objects,
    /// People, labeled `Person: <emotion>`.
    Emotions,
}

impl DetectionPreset {
    /// Instruction used when the user does not supply one.
    pub fn default_prompt(&self) -> &'static str {
        match self {
            Self::Objects => "Detect all objects in this image and label them with descriptions",
            Self::Emotions => "Detect all people and analyze their emotions",
        }
    }

    /// Format rules prepended to every request with this preset.
    pub fn system_instruction(&self) -> &'static str {
        match self {
            Self::Objects => OBJECTS_SYSTEM_INSTRUCTION,
            Self::Emotions => EMOTIONS_SYSTEM_INSTRUCTION,
        }
    }

    /// Suffix for the annotated output file name.
    pub fn output_suffix(&self) -> &'static str {
        match self {
            Self::Objects => "_analyzed",
            Self::Emotions => "_emotions",
        }
    }
}

impl std::fmt::Display for DetectionPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Objects => write!(f, "objects"),
            Self::Emotions => write!(f, "emotions"),
        }
    }
}

/// An instruction paired with the media it refers to.
#[derive(Debug, Clone)]
pub struct AnalysisPrompt<'a> {
    handle: &'a MediaHandle,
    instruction: String,
    system_instruction: Option<&'static str>,
    temperature: Option<f32>,
    json_output: bool,
}

impl<'a> AnalysisPrompt<'a> {
    /// Free-text summary prompt.
    pub fn summary(handle: &'a MediaHandle, instruction: impl Into<String>) -> Self {
        Self {
            handle,
            instruction: instruction.into(),
            system_instruction: None,
            temperature: None,
            json_output: false,
        }
    }

    /// Bounding-box detection prompt using the given preset's format rules.
    pub fn detection(
        handle: &'a MediaHandle,
        instruction: impl Into<String>,
        preset: DetectionPreset,
    ) -> Self {
        Self {
            handle,
            instruction: instruction.into(),
            system_instruction: Some(preset.system_instruction()),
            temperature: Some(DETECTION_TEMPERATURE),
            json_output: true,
        }
    }

    /// Media the prompt refers to.
    pub fn handle(&self) -> &MediaHandle {
        self.handle
    }

    /// User instruction.
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Format rules sent as the system instruction.
    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction
    }

    /// Sampling temperature, when the prompt pins one.
    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    /// Whether the reply should be JSON.
    pub fn json_output(&self) -> bool {
        self.json_output
    }
}

/// Sends a prompt for a ready handle and returns the raw reply.
pub async fn request_analysis<A>(api: &A, prompt: &AnalysisPrompt<'_>) -> Result<String>
where
    A: MediaApi + ?Sized,
{
    let handle = prompt.handle();
    if !handle.is_ready() {
        return Err(MediaSightError::HandleNotReady {
            id: handle.id().to_string(),
            state: handle.state,
        });
    }

    tracing::info!(
        file = %handle.id(),
        kind = %handle.kind(),
        provider = api.name(),
        "requesting analysis"
    );
    let reply = api.generate(prompt).await?;
    tracing::debug!(bytes = reply.len(), "analysis reply received");
    Ok(reply)
}
