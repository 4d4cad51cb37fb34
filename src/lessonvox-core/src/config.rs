//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::aligner::AlignmentOptions;
use crate::audio::TrimOptions;
use crate::error::LessonError;
use crate::retry::RetryPolicy;
use crate::script::ScriptSettings;
use crate::stitcher::StitcherOptions;

/// Commented default configuration written by `init-config`.
pub const DEFAULT_CONFIG_TOML: &str = r##"# LessonVox configuration

[audio]
sample_rate = 24000
normalize = true
target_dbfs = -16.0
silence_threshold_dbfs = -50.0
min_silence_ms = 10
guard_ms = 50

[synthesis]
initial_silence_ms = 300   # max 2000
default_pause_ms = 400     # max 5000
speech_rate = 1.0
timeout_secs = 60

[alignment]
enabled = true
drift_threshold_ms = 200   # 50-500
language = "en"

[retry]
max_attempts = 3           # 1-10

[tts]
engine = "kokoro"

[voices]
default_voice = "af_heart"

# Speaker aliases used in scripts. Built in: female_us_1..4, male_us_1..2,
# female_uk_1, male_uk_1.
[voices.aliases]
# narrator = "bm_george"

[transcription]
api_base = "https://api.openai.com/v1"
api_key = ""               # empty reads OPENAI_API_KEY
model = "whisper-1"
timeout_secs = 120
"##;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub synthesis: SynthesisConfig,
    pub alignment: AlignmentConfig,
    pub retry: RetryConfig,
    pub tts: TtsConfig,
    pub voices: VoicesConfig,
    pub transcription: TranscriptionConfig,
}

/// Output audio and trimming parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub normalize: bool,
    pub target_dbfs: f32,
    pub silence_threshold_dbfs: f32,
    pub min_silence_ms: u32,
    pub guard_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            normalize: true,
            target_dbfs: -16.0,
            silence_threshold_dbfs: -50.0,
            min_silence_ms: 10,
            guard_ms: 50,
        }
    }
}

/// Timing defaults applied when the script carries no settings of its own.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub initial_silence_ms: u32,
    pub default_pause_ms: u32,
    pub speech_rate: f32,
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            initial_silence_ms: 300,
            default_pause_ms: 400,
            speech_rate: 1.0,
            timeout_secs: 60,
        }
    }
}

/// Forced alignment configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub enabled: bool,
    pub drift_threshold_ms: u32,
    pub language: String,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            drift_threshold_ms: 200,
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Synthesis engine selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub engine: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            engine: "kokoro".to_string(),
        }
    }
}

/// Built-in speaker aliases, overridable from `[voices.aliases]`.
const DEFAULT_VOICE_ALIASES: &[(&str, &str)] = &[
    ("female_us_1", "af_heart"),
    ("female_us_2", "af_bella"),
    ("female_us_3", "af_nicole"),
    ("female_us_4", "af_sarah"),
    ("male_us_1", "am_adam"),
    ("male_us_2", "am_michael"),
    ("female_uk_1", "bf_emma"),
    ("male_uk_1", "bm_george"),
];

/// Prefixes of kokoro's English voice names.
const VOICE_PREFIXES: [&str; 4] = ["af_", "am_", "bf_", "bm_"];

/// Speaker-to-voice mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoicesConfig {
    /// Voice for speakers that are neither a voice name nor a known alias.
    pub default_voice: String,
    /// Extra aliases; these win over the built-in ones.
    pub aliases: HashMap<String, String>,
}

impl Default for VoicesConfig {
    fn default() -> Self {
        Self {
            default_voice: "af_heart".to_string(),
            aliases: HashMap::new(),
        }
    }
}

impl VoicesConfig {
    /// Engine voice for a script speaker.
    ///
    /// Names that already look like a voice are used as-is.
    pub fn resolve(&self, speaker: &str) -> String {
        if VOICE_PREFIXES.iter().any(|p| speaker.starts_with(p)) {
            return speaker.to_string();
        }

        self.aliases
            .get(speaker)
            .map(String::as_str)
            .or_else(|| {
                DEFAULT_VOICE_ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == speaker)
                    .map(|(_, voice)| *voice)
            })
            .unwrap_or(self.default_voice.as_str())
            .to_string()
    }
}

/// OpenAI-compatible transcription endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub api_base: String,
    /// Empty means "read OPENAI_API_KEY at load time".
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "whisper-1".to_string(),
            timeout_secs: 120,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LessonError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| LessonError::Config(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, LessonError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| LessonError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default configuration, creating parent directories.
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), LessonError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TOML)?;
        Ok(())
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), LessonError> {
        if self.audio.sample_rate == 0 {
            return Err(LessonError::Config(
                "audio.sample_rate must be positive".to_string(),
            ));
        }
        if !(50..=500).contains(&self.alignment.drift_threshold_ms) {
            return Err(LessonError::Config(format!(
                "alignment.drift_threshold_ms must be between 50 and 500, got {}",
                self.alignment.drift_threshold_ms
            )));
        }
        if !(1..=10).contains(&self.retry.max_attempts) {
            return Err(LessonError::Config(format!(
                "retry.max_attempts must be between 1 and 10, got {}",
                self.retry.max_attempts
            )));
        }
        if !(0.5..=2.0).contains(&self.synthesis.speech_rate) {
            return Err(LessonError::Config(format!(
                "synthesis.speech_rate must be between 0.5 and 2.0, got {}",
                self.synthesis.speech_rate
            )));
        }
        if self.synthesis.initial_silence_ms > 2_000 {
            return Err(LessonError::Config(format!(
                "synthesis.initial_silence_ms must be at most 2000, got {}",
                self.synthesis.initial_silence_ms
            )));
        }
        if self.synthesis.default_pause_ms > 5_000 {
            return Err(LessonError::Config(format!(
                "synthesis.default_pause_ms must be at most 5000, got {}",
                self.synthesis.default_pause_ms
            )));
        }
        if self.voices.default_voice.trim().is_empty() {
            return Err(LessonError::Config(
                "voices.default_voice must not be empty".to_string(),
            ));
        }
        if self.tts.engine != "kokoro" {
            return Err(LessonError::Config(format!(
                "Unsupported tts.engine '{}'. Available engines: kokoro",
                self.tts.engine
            )));
        }
        Ok(())
    }

    /// Stitcher options for a run, with script-level settings taking precedence.
    pub fn stitcher_options(&self, settings: Option<&ScriptSettings>) -> StitcherOptions {
        let (initial_silence_ms, default_pause_ms) = match settings {
            Some(s) => (s.initial_silence_ms, s.default_pause_ms),
            None => (
                self.synthesis.initial_silence_ms,
                self.synthesis.default_pause_ms,
            ),
        };

        StitcherOptions {
            sample_rate: self.audio.sample_rate,
            initial_silence_ms,
            default_pause_ms,
            target_dbfs: self.audio.normalize.then_some(self.audio.target_dbfs),
            trim: TrimOptions {
                threshold_dbfs: self.audio.silence_threshold_dbfs,
                min_silence_ms: self.audio.min_silence_ms,
                guard_ms: self.audio.guard_ms,
            },
        }
    }

    pub fn alignment_options(&self) -> AlignmentOptions {
        AlignmentOptions {
            enabled: self.alignment.enabled,
            drift_threshold_ms: self.alignment.drift_threshold_ms,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            timeout: Duration::from_secs(self.synthesis.timeout_secs),
        }
    }
}
