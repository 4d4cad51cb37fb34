//! LessonVox Core Library
//!
//! Turns a dialogue script into one lesson audio track with per-line
//! timings: synthesis with retry, stitching, forced alignment against a
//! transcription, quality scoring, and subtitle/manifest export.

pub mod aligner;
pub mod audio;
pub mod config;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod quality;
pub mod retry;
pub mod script;
pub mod stitcher;
pub mod subtitle;
pub mod synthesis;
pub mod transcription;

pub use aligner::{AlignedSegment, Aligner, AlignmentOptions, AlignmentResult};
pub use audio::Waveform;
pub use config::Config;
pub use error::{LessonError, Result};
pub use manifest::{FinalSegment, LessonManifest, LessonMetadata};
pub use pipeline::{LessonBuild, LessonOutput, LessonPipeline, PipelineCallback, PipelineEvent};
pub use quality::quality_score;
pub use retry::{LineOutcome, RetryPolicy};
pub use script::{Emotion, Line, Script, ScriptSettings};
pub use stitcher::{ProvisionalSegment, StitchResult, Stitcher, StitcherOptions};
pub use synthesis::{
    KokoroSynthesizer, RenderRequest, RenderedLine, ScriptedSynthesizer, SpeechSynthesizer,
};
pub use transcription::{
    OpenAiTranscriptionBackend, StaticTranscriptionBackend, Transcriber, TranscriptionBackend,
    WordTiming,
};
