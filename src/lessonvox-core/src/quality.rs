//! Lesson quality score.

use crate::aligner::AlignedSegment;

/// Drift that would cost a segment its whole score, before capping.
const DRIFT_SCALE_MS: f64 = 500.0;
/// A single segment can lose at most half its score to drift.
const MAX_DRIFT_PENALTY: f64 = 0.5;

/// Reduce per-segment confidence and drift to one score in [0, 1].
///
/// Each segment scores `confidence * (1 - min(|drift| / 500, 0.5))`; the
/// lesson score is their mean. No segments scores 1.0.
pub fn quality_score(segments: &[AlignedSegment]) -> f64 {
    if segments.is_empty() {
        return 1.0;
    }

    let total: f64 = segments
        .iter()
        .map(|seg| seg.confidence as f64 * (1.0 - drift_penalty(seg.drift_ms)))
        .sum();

    (total / segments.len() as f64).clamp(0.0, 1.0)
}

fn drift_penalty(drift_ms: i64) -> f64 {
    (drift_ms.unsigned_abs() as f64 / DRIFT_SCALE_MS).min(MAX_DRIFT_PENALTY)
}
