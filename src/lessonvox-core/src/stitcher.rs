//! Audio stitching.
//!
//! Concatenates trimmed per-line renders with a lead-in silence and
//! inter-line gaps, then normalizes the whole track with one gain. The
//! segment table it produces is the provisional timing later checked by the
//! aligner.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::{self, TrimOptions, Waveform};
use crate::synthesis::RenderedLine;

/// Timing of one line in the stitched track, derived from audio durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionalSegment {
    pub line_id: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    /// Always `end_ms - start_ms`.
    pub audio_duration_ms: u64,
}

/// A rendered line plus the pause that should follow it.
#[derive(Debug, Clone)]
pub struct StitchEntry {
    pub rendered: RenderedLine,
    /// `None` uses the stitcher's default pause.
    pub pause_after_ms: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StitcherOptions {
    pub sample_rate: u32,
    pub initial_silence_ms: u32,
    pub default_pause_ms: u32,
    /// Loudness target for the final gain pass; `None` skips normalization.
    pub target_dbfs: Option<f32>,
    pub trim: TrimOptions,
}

impl Default for StitcherOptions {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            initial_silence_ms: 300,
            default_pause_ms: 400,
            target_dbfs: Some(-16.0),
            trim: TrimOptions::default(),
        }
    }
}

/// Result of stitching audio segments.
#[derive(Debug, Clone)]
pub struct StitchResult {
    pub waveform: Waveform,
    pub segments: Vec<ProvisionalSegment>,
    pub total_duration_ms: u64,
    /// Gain applied by normalization, in dB.
    pub gain_db: f32,
}

pub struct Stitcher {
    options: StitcherOptions,
}

impl Stitcher {
    pub fn new(options: StitcherOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &StitcherOptions {
        &self.options
    }

    /// Stitch rendered lines, in order, into one waveform.
    ///
    /// Failed renders are skipped with a warning. Zero usable lines yields an
    /// empty waveform and an empty table.
    pub fn stitch(&self, entries: Vec<StitchEntry>) -> StitchResult {
        let sample_rate = self.options.sample_rate;

        let usable: Vec<StitchEntry> = entries
            .into_iter()
            .filter(|entry| {
                if !entry.rendered.success {
                    warn!(
                        line_id = entry.rendered.line_id,
                        error = entry.rendered.error.as_deref().unwrap_or("unknown"),
                        "skipping line with failed synthesis"
                    );
                }
                entry.rendered.success
            })
            .collect();

        if usable.is_empty() {
            return StitchResult {
                waveform: Waveform::empty(sample_rate),
                segments: Vec::new(),
                total_duration_ms: 0,
                gain_db: 0.0,
            };
        }

        let mut buffer = audio::silence(self.options.initial_silence_ms as u64, sample_rate);
        let mut segments = Vec::with_capacity(usable.len());
        let last = usable.len() - 1;

        for (i, entry) in usable.into_iter().enumerate() {
            let line_id = entry.rendered.line_id;
            let audio = entry.rendered.audio;
            let samples =
                audio::resample_linear(audio.samples, audio.sample_rate, sample_rate);
            let trimmed = audio::trim_silence(&samples, sample_rate, &self.options.trim);

            let start_ms = audio::samples_to_ms(buffer.len(), sample_rate);
            buffer.extend_from_slice(&trimmed);
            let end_ms = audio::samples_to_ms(buffer.len(), sample_rate);

            debug!(
                line_id,
                start_ms,
                end_ms,
                trimmed_ms = samples.len().saturating_sub(trimmed.len()) as u64 * 1000
                    / sample_rate.max(1) as u64,
                "line placed"
            );

            segments.push(ProvisionalSegment {
                line_id,
                start_ms,
                end_ms,
                audio_duration_ms: end_ms - start_ms,
            });

            if i < last {
                let pause_ms = entry.pause_after_ms.unwrap_or(self.options.default_pause_ms);
                buffer.extend(audio::silence(pause_ms as u64, sample_rate));
            }
        }

        let gain_db = match self.options.target_dbfs {
            Some(target) => audio::normalize_loudness(&mut buffer, target),
            None => 0.0,
        };

        let waveform = Waveform::new(buffer, sample_rate);
        let total_duration_ms = waveform.duration_ms();

        StitchResult {
            waveform,
            segments,
            total_duration_ms,
            gain_db,
        }
    }
}
