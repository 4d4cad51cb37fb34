//! Lesson manifest: the final timeline written next to the audio.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use crate::aligner::AlignmentResult;
use crate::error::LessonError;
use crate::script::Script;
use crate::subtitle;

/// A line's final placement in the lesson audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSegment {
    pub id: u32,
    pub speaker: String,
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub duration_ms: u64,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonMetadata {
    /// Synthesis engine that produced the audio.
    pub engine: String,
    /// RFC 3339, UTC.
    pub generated_at: String,
    pub quality_score: f64,
    pub alignment_success: bool,
    pub needs_review: bool,
    pub total_drift_ms: u64,
}

/// Complete timeline for a generated lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonManifest {
    pub lesson_id: String,
    pub title: String,
    pub level: String,
    pub duration_ms: u64,
    pub segments: Vec<FinalSegment>,
    pub metadata: LessonMetadata,
}

impl LessonManifest {
    /// Build the manifest from aligned timings.
    pub fn build(
        script: &Script,
        alignment: &AlignmentResult,
        duration_ms: u64,
        quality_score: f64,
        engine: &str,
    ) -> Self {
        let speakers: HashMap<u32, &str> = script
            .lines
            .iter()
            .map(|line| (line.id, line.speaker.as_str()))
            .collect();

        let segments = alignment
            .segments
            .iter()
            .map(|seg| FinalSegment {
                id: seg.line_id,
                speaker: speakers
                    .get(&seg.line_id)
                    .copied()
                    .unwrap_or("unknown")
                    .to_string(),
                text: seg.text.clone(),
                start_ms: seg.aligned_start_ms,
                end_ms: seg.aligned_end_ms,
                duration_ms: seg.aligned_end_ms.saturating_sub(seg.aligned_start_ms),
                confidence: seg.confidence,
            })
            .collect();

        Self {
            lesson_id: script.lesson_id.clone(),
            title: script.title.clone(),
            level: script.level.clone(),
            duration_ms,
            segments,
            metadata: LessonMetadata {
                engine: engine.to_string(),
                generated_at: humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
                quality_score,
                alignment_success: alignment.success,
                needs_review: alignment.needs_review,
                total_drift_ms: alignment.total_drift_ms,
            },
        }
    }

    pub fn to_srt(&self) -> String {
        subtitle::generate_srt(
            self.segments
                .iter()
                .map(|s| (s.start_ms, s.end_ms, s.text.as_str())),
        )
    }

    pub fn to_json(&self) -> Result<String, LessonError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), LessonError> {
        fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LessonError> {
        let content = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }
}
