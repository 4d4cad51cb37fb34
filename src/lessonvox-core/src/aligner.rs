//! Forced alignment of provisional timings against a transcription.
//!
//! The stitcher's timings are computed from audio durations alone. The
//! aligner transcribes the stitched track with word timestamps, walks the
//! words with a single forward cursor, and replaces a line's timing with the
//! transcribed one when the two disagree by more than a threshold.
//!
//! Alignment never fails the pipeline: if the transcription backend cannot
//! be loaded or errors, every line keeps its provisional timing and the
//! result is flagged unsuccessful.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::audio::Waveform;
use crate::error::LessonError;
use crate::stitcher::ProvisionalSegment;
use crate::transcription::{Transcriber, TranscriptionBackend, WordTiming};

/// Confidence assigned to a line whose timing was replaced.
pub const CORRECTED_CONFIDENCE: f32 = 0.9;

/// Settings for the alignment pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentOptions {
    /// When false, provisional timings pass through untouched.
    pub enabled: bool,
    /// Drift magnitudes strictly above this adopt the transcribed timing.
    pub drift_threshold_ms: u32,
}

impl Default for AlignmentOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            drift_threshold_ms: 200,
        }
    }
}

/// A line's timing before and after alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedSegment {
    pub line_id: u32,
    pub original_start_ms: u64,
    pub original_end_ms: u64,
    pub aligned_start_ms: u64,
    pub aligned_end_ms: u64,
    /// Mean of the start and end deltas (transcribed minus provisional), floored.
    pub drift_ms: i64,
    pub confidence: f32,
    pub text: String,
}

impl AlignedSegment {
    /// Provisional timing carried over unchanged.
    fn unchanged(segment: &ProvisionalSegment, text: String) -> Self {
        Self {
            line_id: segment.line_id,
            original_start_ms: segment.start_ms,
            original_end_ms: segment.end_ms,
            aligned_start_ms: segment.start_ms,
            aligned_end_ms: segment.end_ms,
            drift_ms: 0,
            confidence: 1.0,
            text,
        }
    }

    /// Whether alignment moved this line's start or end.
    pub fn was_corrected(&self) -> bool {
        self.aligned_start_ms != self.original_start_ms
            || self.aligned_end_ms != self.original_end_ms
    }
}

/// Result of alignment process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    /// False only when transcription was attempted and failed.
    pub success: bool,
    /// Whether a transcription was actually compared against the timings.
    pub transcribed: bool,
    pub segments: Vec<AlignedSegment>,
    /// Sum of absolute per-line drift.
    pub total_drift_ms: u64,
    /// Some line drifted past the threshold.
    pub needs_review: bool,
    pub error: Option<String>,
}

/// Adjusts timestamps using a word-level transcription.
///
/// The transcription model is loaded on first use and shared by every later
/// call on this instance.
pub struct Aligner<B: TranscriptionBackend> {
    options: AlignmentOptions,
    backend: B,
    model: OnceCell<B::Model>,
}

impl<B: TranscriptionBackend> Aligner<B> {
    pub fn new(options: AlignmentOptions, backend: B) -> Self {
        Self {
            options,
            backend,
            model: OnceCell::new(),
        }
    }

    /// Options this aligner was created with.
    pub fn options(&self) -> &AlignmentOptions {
        &self.options
    }

    /// The transcription backend used to load the model.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether the transcription model has been loaded yet.
    pub fn is_model_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// Align every provisional segment, preserving order.
    pub async fn align(
        &self,
        waveform: &Waveform,
        segments: &[ProvisionalSegment],
        texts: &HashMap<u32, String>,
    ) -> AlignmentResult {
        if !self.options.enabled {
            debug!("alignment disabled, keeping provisional timings");
            return AlignmentResult {
                success: true,
                transcribed: false,
                segments: passthrough(segments, texts),
                total_drift_ms: 0,
                needs_review: false,
                error: None,
            };
        }

        let words = match self.transcribe(waveform).await {
            Ok(words) => words,
            Err(e) => {
                error!(error = %e, "alignment failed, falling back to provisional timings");
                return AlignmentResult {
                    success: false,
                    transcribed: false,
                    segments: passthrough(segments, texts),
                    total_drift_ms: 0,
                    needs_review: false,
                    error: Some(e.to_string()),
                };
            }
        };

        let aligned = match_segments(segments, texts, &words, self.options.drift_threshold_ms);
        let total_drift_ms = aligned.iter().map(|s| s.drift_ms.unsigned_abs()).sum();
        let needs_review = aligned
            .iter()
            .any(|s| s.drift_ms.unsigned_abs() > self.options.drift_threshold_ms as u64);

        info!(
            lines = aligned.len(),
            corrected = aligned.iter().filter(|s| s.was_corrected()).count(),
            total_drift_ms,
            needs_review,
            "alignment complete"
        );

        AlignmentResult {
            success: true,
            transcribed: true,
            segments: aligned,
            total_drift_ms,
            needs_review,
            error: None,
        }
    }

    async fn transcribe(&self, waveform: &Waveform) -> Result<Vec<WordTiming>, LessonError> {
        let model = self
            .model
            .get_or_try_init(|| async {
                info!(backend = self.backend.name(), "loading transcription model");
                self.backend.load().await
            })
            .await?;
        model.transcribe(waveform).await
    }
}

/// Provisional timings as aligned segments with zero drift and full confidence.
pub fn passthrough(
    segments: &[ProvisionalSegment],
    texts: &HashMap<u32, String>,
) -> Vec<AlignedSegment> {
    segments
        .iter()
        .map(|seg| AlignedSegment::unchanged(seg, text_for(texts, seg.line_id)))
        .collect()
}

fn text_for(texts: &HashMap<u32, String>, line_id: u32) -> String {
    texts.get(&line_id).cloned().unwrap_or_default()
}

/// Match provisional segments to transcribed words.
///
/// Each line consumes as many words as its text has whitespace-separated
/// tokens, starting where the previous line stopped. The cursor never moves
/// back, so lines must be spoken in order without words bleeding across
/// line boundaries. Once the words run out, remaining lines keep their
/// provisional timing.
pub fn match_segments(
    segments: &[ProvisionalSegment],
    texts: &HashMap<u32, String>,
    words: &[WordTiming],
    drift_threshold_ms: u32,
) -> Vec<AlignedSegment> {
    let mut aligned = Vec::with_capacity(segments.len());
    let mut cursor = 0usize;

    for seg in segments {
        let text = text_for(texts, seg.line_id);
        let token_count = text.split_whitespace().count();

        if token_count == 0 {
            aligned.push(AlignedSegment::unchanged(seg, text));
            continue;
        }

        let (candidate_start, candidate_end) = if cursor < words.len() {
            let last = (cursor + token_count).min(words.len()) - 1;
            let bounds = (words[cursor].start_ms, words[last].end_ms);
            cursor = last + 1;
            bounds
        } else {
            (seg.start_ms, seg.end_ms)
        };

        let start_delta = candidate_start as i64 - seg.start_ms as i64;
        let end_delta = candidate_end as i64 - seg.end_ms as i64;
        let drift_ms = (start_delta + end_delta).div_euclid(2);

        let corrected = drift_ms.unsigned_abs() > drift_threshold_ms as u64;
        if corrected {
            debug!(
                line_id = seg.line_id,
                drift_ms,
                candidate_start, candidate_end, "adopting transcribed timing"
            );
        }

        aligned.push(AlignedSegment {
            line_id: seg.line_id,
            original_start_ms: seg.start_ms,
            original_end_ms: seg.end_ms,
            aligned_start_ms: if corrected { candidate_start } else { seg.start_ms },
            aligned_end_ms: if corrected { candidate_end } else { seg.end_ms },
            drift_ms,
            confidence: if corrected { CORRECTED_CONFIDENCE } else { 1.0 },
            text,
        });
    }

    aligned
}
