use crate::classifier::ClassifierError;
use crate::diffusion::SynthesisError;
use crate::submission::SubmissionError;
use crate::tools::{ExternalTool, ToolError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Steps of a request, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Input,
    Classification,
    Naming,
    MusicGeneration,
    AudioRendering,
    AudioTranscoding,
    ScoreEngraving,
    Illustration,
    Presentation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Input => "Form validation",
            Stage::Classification => "Emotion classification",
            Stage::Naming => "Output allocation",
            Stage::MusicGeneration => "Music generation",
            Stage::AudioRendering => "Audio rendering",
            Stage::AudioTranscoding => "MP3 encoding",
            Stage::ScoreEngraving => "Score engraving",
            Stage::Illustration => "Illustration",
            Stage::Presentation => "Result presentation",
        };
        f.write_str(name)
    }
}

impl From<ExternalTool> for Stage {
    fn from(tool: ExternalTool) -> Self {
        match tool {
            ExternalTool::MusicGenerator => Stage::MusicGeneration,
            ExternalTool::MidiRenderer => Stage::AudioRendering,
            ExternalTool::AudioTranscoder => Stage::AudioTranscoding,
            ExternalTool::ScoreEngraver => Stage::ScoreEngraving,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Classification failed: {0}")]
    Classification(#[from] ClassifierError),

    #[error("The {tool} failed: {source}")]
    ExternalTool {
        tool: ExternalTool,
        exit_code: Option<i32>,
        #[source]
        source: ToolError,
    },

    #[error("Missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("Invalid artifact {}: {reason}", .path.display())]
    InvalidArtifact { path: PathBuf, reason: String },

    #[error("Image model inference failed: {0}")]
    ModelInference(#[from] SynthesisError),

    #[error("Invalid submission: {0}")]
    InvalidSubmission(#[from] SubmissionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn tool(tool: ExternalTool, source: ToolError) -> Self {
        PipelineError::ExternalTool {
            tool,
            exit_code: source.exit_code(),
            source,
        }
    }
}

/// A failed request, with the stage that broke it
#[derive(Error, Debug)]
#[error("{stage} failed: {error}")]
pub struct RequestFailure {
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
}

impl RequestFailure {
    pub fn new(stage: Stage, error: impl Into<PipelineError>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }
}

impl From<RequestFailure> for String {
    fn from(e: RequestFailure) -> Self {
        e.to_string()
    }
}

impl From<PipelineError> for String {
    fn from(e: PipelineError) -> Self {
        e.to_string()
    }
}
