//! Speech synthesis backends.
//!
//! The pipeline only sees [`SpeechSynthesizer`]; `KokoroSynthesizer` is the
//! production engine and `ScriptedSynthesizer` a deterministic stand-in.

use async_trait::async_trait;
use kokoro_tiny::TtsEngine;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::audio::{self, Waveform};
use crate::error::LessonError;
use crate::script::Emotion;

/// Output sample rate of the kokoro model.
pub const KOKORO_SAMPLE_RATE: u32 = 24_000;

/// Kokoro has a strict limit on input length per call.
const KOKORO_MAX_CHUNK_CHARS: usize = 200;

/// Pause inserted between chunks of one line.
const CHUNK_PAUSE_MS: u64 = 300;

/// One render call: a line's text in a given voice.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub line_id: u32,
    pub text: String,
    pub voice_id: String,
    pub emotion: Emotion,
    pub speed: f32,
}

/// Result of synthesizing one line, possibly after retries.
#[derive(Debug, Clone)]
pub struct RenderedLine {
    pub line_id: u32,
    pub audio: Waveform,
    pub success: bool,
    pub error: Option<String>,
}

impl RenderedLine {
    pub fn ok(line_id: u32, audio: Waveform) -> Self {
        Self {
            line_id,
            audio,
            success: true,
            error: None,
        }
    }

    pub fn failed(line_id: u32, sample_rate: u32, reason: impl Into<String>) -> Self {
        Self {
            line_id,
            audio: Waveform::empty(sample_rate),
            success: false,
            error: Some(reason.into()),
        }
    }
}

/// Trait for text-to-speech engines.
///
/// Engines hold model state that is not shareable across threads, so
/// rendering takes `&mut self` and the futures are not required to be `Send`.
#[async_trait(?Send)]
pub trait SpeechSynthesizer {
    /// Render text to mono audio.
    async fn render(&mut self, request: &RenderRequest) -> Result<Waveform, LessonError>;

    /// Voice IDs the engine accepts.
    fn available_voices(&self) -> Vec<String>;

    fn name(&self) -> &str;
}

/// Synthesizer backed by the kokoro-tiny engine.
pub struct KokoroSynthesizer {
    engine: TtsEngine,
    available_voices: Vec<String>,
}

impl KokoroSynthesizer {
    /// Initialize the engine (downloads the model on first run).
    pub async fn new() -> Result<Self, LessonError> {
        let engine = TtsEngine::new()
            .await
            .map_err(|e| LessonError::Engine(format!("Failed to initialize TTS: {}", e)))?;

        let available_voices = engine.voices();

        Ok(Self {
            engine,
            available_voices,
        })
    }

    /// Validate that a voice ID exists.
    pub fn validate_voice(&self, voice_id: &str) -> Result<(), String> {
        if voice_id.is_empty() {
            return Err(format!(
                "Voice ID cannot be empty. Available voices:\n{}",
                self.format_available_voices()
            ));
        }

        if !self.available_voices.iter().any(|v| v == voice_id) {
            return Err(format!(
                "Unknown voice '{}'. Available voices:\n{}",
                voice_id,
                self.format_available_voices()
            ));
        }

        Ok(())
    }

    fn format_available_voices(&self) -> String {
        let mut english_voices: Vec<&String> = self
            .available_voices
            .iter()
            .filter(|v| {
                v.starts_with("af_")
                    || v.starts_with("am_")
                    || v.starts_with("bf_")
                    || v.starts_with("bm_")
            })
            .collect();
        english_voices.sort();

        english_voices
            .iter()
            .map(|v| format!("  - {}", v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait(?Send)]
impl SpeechSynthesizer for KokoroSynthesizer {
    async fn render(&mut self, request: &RenderRequest) -> Result<Waveform, LessonError> {
        let fail = |reason: String| LessonError::Synthesis {
            line_id: request.line_id,
            reason,
        };

        self.validate_voice(&request.voice_id).map_err(fail)?;

        if request.emotion != Emotion::Neutral {
            debug!(
                line_id = request.line_id,
                emotion = request.emotion.as_str(),
                "kokoro has no emotion control, rendering neutral"
            );
        }

        let chunks = split_into_chunks(&request.text, KOKORO_MAX_CHUNK_CHARS);
        let chunk_pause = audio::silence(CHUNK_PAUSE_MS, KOKORO_SAMPLE_RATE);
        let mut samples = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                samples.extend_from_slice(&chunk_pause);
            }
            let rendered = self
                .engine
                .synthesize(chunk, Some(request.voice_id.as_str()))
                .map_err(|e| fail(format!("Synthesis failed: {}", e)))?;
            samples.extend(rendered);
        }

        let samples = audio::adjust_speed(samples, request.speed);
        Ok(Waveform::new(samples, KOKORO_SAMPLE_RATE))
    }

    fn available_voices(&self) -> Vec<String> {
        self.available_voices.clone()
    }

    fn name(&self) -> &str {
        "kokoro"
    }
}

/// Split text into chunks that are safe for TTS synthesis.
fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current_chunk = String::new();

    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if current_chunk.len() + sentence.len() > max_chars {
            if !current_chunk.trim().is_empty() {
                chunks.push(current_chunk.trim().to_string());
                current_chunk.clear();
            }

            // A single overlong sentence is split at commas.
            if sentence.len() > max_chars {
                for part in sentence.split_inclusive(',') {
                    if current_chunk.len() + part.len() > max_chars
                        && !current_chunk.trim().is_empty()
                    {
                        chunks.push(current_chunk.trim().to_string());
                        current_chunk.clear();
                    }
                    current_chunk.push_str(part.trim());
                    current_chunk.push(' ');
                }
                continue;
            }
        }

        current_chunk.push_str(sentence);
        current_chunk.push(' ');
    }

    if !current_chunk.trim().is_empty() {
        chunks.push(current_chunk.trim().to_string());
    }

    chunks
}

/// Deterministic synthesizer: renders a constant tone per line and can be
/// told to fail or stall for specific lines.
#[derive(Debug, Clone)]
pub struct ScriptedSynthesizer {
    sample_rate: u32,
    default_duration_ms: u64,
    durations: HashMap<u32, u64>,
    failures: HashMap<u32, u32>,
    delays: HashMap<u32, Duration>,
    calls: HashMap<u32, u32>,
    speeds: HashMap<u32, f32>,
    voices: HashMap<u32, String>,
}

impl ScriptedSynthesizer {
    pub fn new(sample_rate: u32, default_duration_ms: u64) -> Self {
        Self {
            sample_rate,
            default_duration_ms,
            durations: HashMap::new(),
            failures: HashMap::new(),
            delays: HashMap::new(),
            calls: HashMap::new(),
            speeds: HashMap::new(),
            voices: HashMap::new(),
        }
    }

    /// Render `line_id` with a specific duration.
    pub fn with_duration(mut self, line_id: u32, duration_ms: u64) -> Self {
        self.durations.insert(line_id, duration_ms);
        self
    }

    /// Fail the first `count` attempts for `line_id`.
    pub fn with_failures(mut self, line_id: u32, count: u32) -> Self {
        self.failures.insert(line_id, count);
        self
    }

    /// Sleep before every render of `line_id`.
    pub fn with_delay(mut self, line_id: u32, delay: Duration) -> Self {
        self.delays.insert(line_id, delay);
        self
    }

    /// Number of render calls made for `line_id`.
    pub fn attempts(&self, line_id: u32) -> u32 {
        self.calls.get(&line_id).copied().unwrap_or(0)
    }

    /// Speed of the most recent request for `line_id`.
    pub fn requested_speed(&self, line_id: u32) -> Option<f32> {
        self.speeds.get(&line_id).copied()
    }

    /// Voice of the most recent request for `line_id`.
    pub fn requested_voice(&self, line_id: u32) -> Option<String> {
        self.voices.get(&line_id).cloned()
    }
}

#[async_trait(?Send)]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn render(&mut self, request: &RenderRequest) -> Result<Waveform, LessonError> {
        let call = {
            let count = self.calls.entry(request.line_id).or_insert(0);
            *count += 1;
            *count
        };
        self.speeds.insert(request.line_id, request.speed);
        self.voices
            .insert(request.line_id, request.voice_id.clone());

        if let Some(delay) = self.delays.get(&request.line_id) {
            tokio::time::sleep(*delay).await;
        }

        let failures = self.failures.get(&request.line_id).copied().unwrap_or(0);
        if call <= failures {
            return Err(LessonError::Synthesis {
                line_id: request.line_id,
                reason: format!("scripted failure on attempt {}", call),
            });
        }

        let duration_ms = self
            .durations
            .get(&request.line_id)
            .copied()
            .unwrap_or(self.default_duration_ms);
        let samples = vec![0.25; audio::ms_to_samples(duration_ms, self.sample_rate)];
        Ok(Waveform::new(samples, self.sample_rate))
    }

    fn available_voices(&self) -> Vec<String> {
        Vec::new()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(line_id: u32) -> RenderRequest {
        RenderRequest {
            line_id,
            text: "Hello there.".to_string(),
            voice_id: "af_sky".to_string(),
            emotion: Emotion::Neutral,
            speed: 1.0,
        }
    }

    #[test]
    fn test_split_into_chunks() {
        let text = "Hello world. This is a test. Another sentence here.";
        let chunks = split_into_chunks(text, 30);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= 35);
        }
    }

    #[test]
    fn test_split_short_text_single_chunk() {
        assert_eq!(split_into_chunks("Hi.", 200), vec!["Hi."]);
        assert!(split_into_chunks("   ", 200).is_empty());
    }

    #[test]
    fn test_split_long_sentence_on_commas() {
        let text = "one two three, four five six, seven eight nine, ten eleven twelve.";
        let chunks = split_into_chunks(text, 30);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks.join(" ").split_whitespace().count(), 12);
    }

    #[test]
    fn test_rendered_line_constructors() {
        let ok = RenderedLine::ok(3, Waveform::new(vec![0.1; 10], 1000));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = RenderedLine::failed(4, 1000, "boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.audio.is_empty());
    }

    #[tokio::test]
    async fn test_scripted_synthesizer_durations_and_failures() {
        let mut synth = ScriptedSynthesizer::new(1000, 500)
            .with_duration(2, 1200)
            .with_failures(3, 1);

        assert_eq!(synth.render(&request(1)).await.unwrap().duration_ms(), 500);
        assert_eq!(synth.render(&request(2)).await.unwrap().duration_ms(), 1200);
        assert!(synth.render(&request(3)).await.is_err());
        assert!(synth.render(&request(3)).await.is_ok());
        assert_eq!(synth.attempts(3), 2);
        assert_eq!(synth.attempts(9), 0);
    }
}
