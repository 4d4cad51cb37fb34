//! Word-level transcription backends used by the aligner.
//!
//! A [`TranscriptionBackend`] knows how to load a model; the loaded
//! [`Transcriber`] turns a waveform into timed words.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::audio::{self, Waveform};
use crate::config::TranscriptionConfig;
use crate::error::LessonError;

/// One transcribed word with its position in the track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl WordTiming {
    pub fn new(word: impl Into<String>, start_ms: u64, end_ms: u64) -> Self {
        Self {
            word: word.into(),
            start_ms,
            end_ms,
        }
    }
}

/// Trait for speech-to-text with word timestamps.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the whole waveform into words ordered by start time.
    async fn transcribe(&self, waveform: &Waveform) -> Result<Vec<WordTiming>, LessonError>;
}

/// Loads a [`Transcriber`]. Called at most once per aligner.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    type Model: Transcriber;

    async fn load(&self) -> Result<Self::Model, LessonError>;

    fn name(&self) -> &str;
}

/// Backend for an OpenAI-compatible `/audio/transcriptions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiTranscriptionBackend {
    config: TranscriptionConfig,
    language: String,
}

impl OpenAiTranscriptionBackend {
    pub fn new(config: TranscriptionConfig, language: impl Into<String>) -> Self {
        Self {
            config,
            language: language.into(),
        }
    }
}

#[async_trait]
impl TranscriptionBackend for OpenAiTranscriptionBackend {
    type Model = OpenAiTranscriber;

    async fn load(&self) -> Result<OpenAiTranscriber, LessonError> {
        let api_key = if self.config.api_key.is_empty() {
            std::env::var("OPENAI_API_KEY").map_err(|_| {
                LessonError::Transcription(
                    "No API key configured and OPENAI_API_KEY is not set".to_string(),
                )
            })?
        } else {
            self.config.api_key.clone()
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                LessonError::Transcription(format!("Failed to create HTTP client: {}", e))
            })?;

        info!(
            api_base = %self.config.api_base,
            model = %self.config.model,
            "transcription client ready"
        );

        Ok(OpenAiTranscriber {
            client,
            endpoint: format!(
                "{}/audio/transcriptions",
                self.config.api_base.trim_end_matches('/')
            ),
            api_key,
            model: self.config.model.clone(),
            language: self.language.clone(),
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// A configured HTTP client for one transcription endpoint.
#[derive(Debug)]
pub struct OpenAiTranscriber {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    language: String,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    words: Vec<ApiWord>,
}

#[derive(Debug, Deserialize)]
struct ApiWord {
    word: String,
    start: f64,
    end: f64,
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, waveform: &Waveform) -> Result<Vec<WordTiming>, LessonError> {
        let wav = audio::encode_wav(waveform)?;
        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("lesson.wav")
            .mime_str("audio/wav")?;

        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word")
            .part("file", file);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LessonError::Transcription(format!(
                "Transcription request failed with {}: {}",
                status, body
            )));
        }

        let body: VerboseTranscription = response.json().await?;
        let words = to_word_timings(body.words);
        debug!(words = words.len(), "transcription received");
        Ok(words)
    }
}

/// Seconds to integer milliseconds (truncating), trimmed words, ordered by start.
fn to_word_timings(words: Vec<ApiWord>) -> Vec<WordTiming> {
    let mut timings: Vec<WordTiming> = words
        .into_iter()
        .map(|w| WordTiming {
            word: w.word.trim().to_string(),
            start_ms: (w.start.max(0.0) * 1000.0) as u64,
            end_ms: (w.end.max(0.0) * 1000.0) as u64,
        })
        .filter(|w| !w.word.is_empty())
        .collect();
    timings.sort_by_key(|w| w.start_ms);
    timings
}

/// Backend that returns a fixed transcript, or a fixed failure.
///
/// Counts how often it is loaded and queried.
#[derive(Debug, Clone, Default)]
pub struct StaticTranscriptionBackend {
    words: Vec<WordTiming>,
    fail_load: Option<String>,
    fail_transcribe: Option<String>,
    loads: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl StaticTranscriptionBackend {
    pub fn new(words: Vec<WordTiming>) -> Self {
        Self {
            words,
            ..Self::default()
        }
    }

    /// Make `load` fail, as when the model is missing.
    pub fn failing_load(reason: impl Into<String>) -> Self {
        Self {
            fail_load: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Load fine but fail every transcription.
    pub fn failing_transcribe(reason: impl Into<String>) -> Self {
        Self {
            fail_transcribe: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn transcribe_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionBackend for StaticTranscriptionBackend {
    type Model = StaticTranscriber;

    async fn load(&self) -> Result<StaticTranscriber, LessonError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.fail_load {
            return Err(LessonError::Transcription(reason.clone()));
        }
        Ok(StaticTranscriber {
            words: self.words.clone(),
            failure: self.fail_transcribe.clone(),
            calls: Arc::clone(&self.calls),
        })
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[derive(Debug)]
pub struct StaticTranscriber {
    words: Vec<WordTiming>,
    failure: Option<String>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Transcriber for StaticTranscriber {
    async fn transcribe(&self, _waveform: &Waveform) -> Result<Vec<WordTiming>, LessonError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(reason) => Err(LessonError::Transcription(reason.clone())),
            None => Ok(self.words.clone()),
        }
    }
}
