//! Dialogue script definitions.
//!
//! A script is an ordered list of spoken lines, each tied to a speaker voice.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::LessonError;

const MAX_TEXT_CHARS: usize = 5000;
const MAX_PAUSE_MS: u32 = 10_000;
const MAX_INITIAL_SILENCE_MS: u32 = 2_000;
const MAX_DEFAULT_PAUSE_MS: u32 = 5_000;

/// Emotion hint passed through to the synthesis engine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Friendly,
    Cheerful,
    Serious,
    Excited,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Friendly => "friendly",
            Emotion::Cheerful => "cheerful",
            Emotion::Serious => "serious",
            Emotion::Excited => "excited",
        }
    }
}

/// A single line of dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    /// Unique within the script.
    pub id: u32,
    /// Voice ID for the speaker.
    pub speaker: String,
    pub text: String,
    #[serde(default)]
    pub emotion: Emotion,
    /// Pause after this line; `None` falls back to the script-wide default.
    #[serde(default)]
    pub pause_after_ms: Option<u32>,
    /// Speech-rate multiplier override.
    #[serde(default)]
    pub speech_rate: Option<f32>,
}

impl Line {
    pub fn new(id: u32, speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            speaker: speaker.into(),
            text: text.into(),
            emotion: Emotion::Neutral,
            pause_after_ms: None,
            speech_rate: None,
        }
    }

    pub fn with_pause(mut self, pause_after_ms: u32) -> Self {
        self.pause_after_ms = Some(pause_after_ms);
        self
    }

    pub fn with_emotion(mut self, emotion: Emotion) -> Self {
        self.emotion = emotion;
        self
    }

    pub fn with_speech_rate(mut self, rate: f32) -> Self {
        self.speech_rate = Some(rate);
        self
    }
}

/// Script-wide timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    pub speech_rate: f32,
    pub initial_silence_ms: u32,
    pub default_pause_ms: u32,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            speech_rate: 1.0,
            initial_silence_ms: 300,
            default_pause_ms: 400,
        }
    }
}

/// A complete lesson script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub lesson_id: String,
    pub title: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_language")]
    pub language: String,
    pub lines: Vec<Line>,
    #[serde(default)]
    pub settings: Option<ScriptSettings>,
}

fn default_level() -> String {
    "B1".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

impl Script {
    pub fn new(lesson_id: impl Into<String>, title: impl Into<String>, lines: Vec<Line>) -> Self {
        Self {
            lesson_id: lesson_id.into(),
            title: title.into(),
            level: default_level(),
            language: default_language(),
            lines,
            settings: None,
        }
    }

    /// Load a script from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LessonError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            LessonError::Script(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse a script from JSON content.
    pub fn from_json(content: &str) -> Result<Self, LessonError> {
        serde_json::from_str(content)
            .map_err(|e| LessonError::Script(format!("Invalid script data: {}", e)))
    }

    /// Effective speech rate for a line.
    pub fn speech_rate_for(&self, line: &Line, config_default: f32) -> f32 {
        line.speech_rate.unwrap_or_else(|| {
            self.settings
                .as_ref()
                .map(|s| s.speech_rate)
                .unwrap_or(config_default)
        })
    }
}

/// Validate a script and return every problem found (empty if valid).
pub fn validate(script: &Script) -> Vec<String> {
    let mut errors = Vec::new();

    if script.lesson_id.is_empty() {
        errors.push("lesson_id is required".to_string());
    } else if !script
        .lesson_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        errors.push(
            "lesson_id must contain only alphanumeric characters, underscores, and hyphens"
                .to_string(),
        );
    }

    if script.title.trim().is_empty() {
        errors.push("title is required".to_string());
    }

    if script.lines.is_empty() {
        errors.push("Script must have at least one line".to_string());
    }

    if let Some(settings) = &script.settings {
        if !(0.5..=1.5).contains(&settings.speech_rate) {
            errors.push("settings.speech_rate must be between 0.5 and 1.5".to_string());
        }
        if settings.initial_silence_ms > MAX_INITIAL_SILENCE_MS {
            errors.push(format!(
                "settings.initial_silence_ms too long (max {}ms)",
                MAX_INITIAL_SILENCE_MS
            ));
        }
        if settings.default_pause_ms > MAX_DEFAULT_PAUSE_MS {
            errors.push(format!(
                "settings.default_pause_ms too long (max {}ms)",
                MAX_DEFAULT_PAUSE_MS
            ));
        }
    }

    let mut seen_ids = HashSet::new();
    for (i, line) in script.lines.iter().enumerate() {
        let prefix = format!("Line {} (id={})", i + 1, line.id);

        if !seen_ids.insert(line.id) {
            errors.push(format!("{}: Duplicate line ID", prefix));
        }

        if line.speaker.trim().is_empty() {
            errors.push(format!("{}: speaker is required", prefix));
        }

        if line.text.trim().is_empty() {
            errors.push(format!("{}: text is required", prefix));
        } else if line.text.chars().count() > MAX_TEXT_CHARS {
            errors.push(format!(
                "{}: text is too long (max {} characters)",
                prefix, MAX_TEXT_CHARS
            ));
        }

        if line.pause_after_ms.is_some_and(|pause| pause > MAX_PAUSE_MS) {
            errors.push(format!(
                "{}: pause_after_ms too long (max {}ms)",
                prefix, MAX_PAUSE_MS
            ));
        }

        if line
            .speech_rate
            .is_some_and(|rate| !(0.5..=2.0).contains(&rate))
        {
            errors.push(format!(
                "{}: speech_rate must be between 0.5 and 2.0",
                prefix
            ));
        }
    }

    errors
}

/// Validate a script, folding all problems into one error.
pub fn validate_or_err(script: &Script) -> Result<(), LessonError> {
    let errors = validate(script);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(LessonError::Script(format!(
            "Validation failed: {}",
            errors.join("; ")
        )))
    }
}

/// JSON scripts directly inside `dir`, sorted by file name.
pub fn find_scripts<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, LessonError> {
    let mut scripts = Vec::new();
    for entry in fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_script() -> Script {
        Script::new(
            "lesson_01",
            "Greetings",
            vec![
                Line::new(1, "af_sky", "Hi."),
                Line::new(2, "bm_george", "How are you?"),
            ],
        )
    }

    #[test]
    fn test_valid_script_has_no_errors() {
        assert!(validate(&sample_script()).is_empty());
    }

    #[test]
    fn test_parse_json_defaults() {
        let script = Script::from_json(
            r#"{
                "lesson_id": "l1",
                "title": "Test",
                "lines": [
                    {"id": 1, "speaker": "af_sky", "text": "Hello", "emotion": "cheerful"},
                    {"id": 2, "speaker": "bm_george", "text": "Hi", "pause_after_ms": 800}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(script.level, "B1");
        assert_eq!(script.lines[0].emotion, Emotion::Cheerful);
        assert_eq!(script.lines[0].pause_after_ms, None);
        assert_eq!(script.lines[1].pause_after_ms, Some(800));
        assert!(script.settings.is_none());
    }

    #[test]
    fn test_unknown_emotion_rejected() {
        let result = Script::from_json(
            r#"{"lesson_id": "l1", "title": "T",
                "lines": [{"id": 1, "speaker": "a", "text": "x", "emotion": "angry"}]}"#,
        );
        assert!(matches!(result, Err(LessonError::Script(_))));
    }

    #[test]
    fn test_duplicate_ids() {
        let mut script = sample_script();
        script.lines[1].id = 1;
        let errors = validate(&script);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Duplicate line ID"));
    }

    #[test]
    fn test_collects_multiple_errors() {
        let mut script = sample_script();
        script.lesson_id = "bad id!".to_string();
        script.lines[0].text = "   ".to_string();
        script.lines[1] = script.lines[1].clone().with_pause(20_000).with_speech_rate(3.0);

        let errors = validate(&script);
        assert_eq!(errors.len(), 4);
        assert!(validate_or_err(&script).is_err());
    }

    #[test]
    fn test_empty_lines_rejected() {
        let script = Script::new("l1", "Empty", vec![]);
        assert_eq!(validate(&script), vec!["Script must have at least one line"]);
    }

    #[test]
    fn test_speech_rate_precedence() {
        let mut script = sample_script();
        assert_eq!(script.speech_rate_for(&script.lines[0], 1.0), 1.0);

        script.settings = Some(ScriptSettings {
            speech_rate: 0.8,
            ..ScriptSettings::default()
        });
        assert_eq!(script.speech_rate_for(&script.lines[0], 1.0), 0.8);

        let line = script.lines[0].clone().with_speech_rate(1.25);
        assert_eq!(script.speech_rate_for(&line, 1.0), 1.25);
    }

    #[test]
    fn test_out_of_range_settings_rejected() {
        let mut script = sample_script();
        script.settings = Some(ScriptSettings {
            speech_rate: 0.0001,
            initial_silence_ms: 4_000_000_000,
            default_pause_ms: 5_001,
        });

        let errors = validate(&script);
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|e| e.starts_with("settings.")));
        assert!(validate_or_err(&script).is_err());
    }

    #[test]
    fn test_settings_at_limits_accepted() {
        let mut script = sample_script();
        script.settings = Some(ScriptSettings {
            speech_rate: 1.5,
            initial_silence_ms: 2_000,
            default_pause_ms: 5_000,
        });
        assert!(validate(&script).is_empty());
    }

    #[test]
    fn test_find_scripts_only_json_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.json"), "{}").unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::create_dir(dir.path().join("nested.json")).unwrap();

        let scripts = find_scripts(dir.path()).unwrap();
        let names: Vec<_> = scripts
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }
}
