//! Error types for the lesson pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LessonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Synthesis failed for line {line_id}: {reason}")]
    Synthesis { line_id: u32, reason: String },

    #[error("Synthesis failed for lines: {line_ids:?}")]
    SynthesisFailed { line_ids: Vec<u32> },

    #[error("TTS engine error: {0}")]
    Engine(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Subtitle error: {0}")]
    Subtitle(String),

    #[error("{what} timed out after {after_ms}ms")]
    Timeout { what: String, after_ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, LessonError>;
