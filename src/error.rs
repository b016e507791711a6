//! Error taxonomy for the job engine, grounded in the stage-failure categories
//! the filesystem contract distinguishes: invalid input, external tool
//! failure, transient/permanent HTTP failure, malformed responses and
//! orchestration failure.

use thiserror::Error;

/// One of the four points at which a job can fail, matching the
/// `job_failed.json` stage vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Upload,
    Chunking,
    Transcription,
    Summary,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Chunking => "chunking",
            Stage::Transcription => "transcription",
            Stage::Summary => "summary",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the artifact store (C1).
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed artifact at {path}: {reason}")]
    MalformedArtifact { path: String, reason: String },
}

/// Errors raised by the media pipeline (C2).
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("transcoder binary not found: {0}")]
    TranscoderMissing(String),
    #[error("transcoder failed: {0}")]
    TranscodeFailed(String),
    #[error("probe failed: {0}")]
    ProbeFailed(String),
    #[error("source audio is empty")]
    EmptyAudio,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by the transcription driver (C4).
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("chunk file missing: {path}")]
    ChunkFileMissing { path: String },
    #[error("unsupported audio format: {extension}")]
    UnsupportedAudioFormat { extension: String },
    #[error("transcription response was empty for asset {asset_id}")]
    EmptyTranscription { asset_id: String },
    #[error("transcription failed for asset {asset_id}: {message}")]
    TranscriptionFailed {
        asset_id: String,
        message: String,
        status_code: Option<u16>,
    },
}

/// Errors raised by the transcript assembler (C5).
#[derive(Debug, Error)]
#[error("malformed transcription for asset {asset_id} in window [{start_ms}, {end_ms}): {reason}")]
pub struct MalformedTranscription {
    pub asset_id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub reason: String,
}

/// Errors raised by the summarization driver (C6).
#[derive(Debug, Error)]
pub enum SummarizationError {
    #[error("summarization call failed: {message}")]
    CallFailed {
        message: String,
        status_code: Option<u16>,
    },
    #[error("malformed summary response: {0}")]
    MalformedSummary(String),
    #[error("cannot summarize a meeting without transcript segments")]
    EmptyTranscript,
}

/// Top-level error taxonomy (§7), used at the orchestrator boundary to decide
/// which stage key a failure marker gets written under.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("external tool failure: {0}")]
    ExternalToolFailure(String),
    #[error("transient http failure (status {status_code:?}): {message}")]
    TransientHttpFailure {
        message: String,
        status_code: Option<u16>,
    },
    #[error("permanent http failure (status {status_code:?}): {message}")]
    PermanentHttpFailure {
        message: String,
        status_code: Option<u16>,
    },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("orchestration failure: {0}")]
    OrchestrationFailure(String),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Media(#[from] MediaError),
}

impl From<TranscriptionError> for CoreError {
    fn from(value: TranscriptionError) -> Self {
        match value {
            TranscriptionError::ChunkFileMissing { path } => {
                CoreError::InvalidInput(format!("chunk file missing: {path}"))
            }
            TranscriptionError::UnsupportedAudioFormat { extension } => {
                CoreError::InvalidInput(format!("unsupported audio format: {extension}"))
            }
            TranscriptionError::EmptyTranscription { asset_id } => {
                CoreError::MalformedResponse(format!("empty transcription for {asset_id}"))
            }
            TranscriptionError::TranscriptionFailed {
                asset_id,
                message,
                status_code,
            } => CoreError::TransientHttpFailure {
                message: format!("asset {asset_id}: {message}"),
                status_code,
            },
        }
    }
}

impl From<MalformedTranscription> for CoreError {
    fn from(value: MalformedTranscription) -> Self {
        CoreError::MalformedResponse(value.to_string())
    }
}

impl From<SummarizationError> for CoreError {
    fn from(value: SummarizationError) -> Self {
        match value {
            SummarizationError::CallFailed {
                message,
                status_code,
            } => CoreError::TransientHttpFailure {
                message,
                status_code,
            },
            SummarizationError::MalformedSummary(reason) => CoreError::MalformedResponse(reason),
            SummarizationError::EmptyTranscript => {
                CoreError::InvalidInput("empty transcript".to_string())
            }
        }
    }
}
