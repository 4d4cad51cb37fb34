//! Lesson pipeline orchestration.
//!
//! Runs validate, synthesize with retry, stitch, align, score and export in
//! that order. Every stage finishes before the next one starts.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::aligner::{Aligner, AlignmentResult};
use crate::audio::{self, Waveform};
use crate::config::Config;
use crate::error::LessonError;
use crate::manifest::LessonManifest;
use crate::quality::quality_score;
use crate::retry::{self, LineOutcome};
use crate::script::{self, Script};
use crate::stitcher::{ProvisionalSegment, StitchEntry, Stitcher};
use crate::subtitle;
use crate::synthesis::{RenderRequest, RenderedLine, SpeechSynthesizer};
use crate::transcription::TranscriptionBackend;

/// Callback for pipeline events.
pub type PipelineCallback = Box<dyn Fn(PipelineEvent) + Send + Sync>;

/// Events emitted while a lesson is built.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The script passed validation.
    Validated { lesson_id: String, lines: usize },
    /// A line was synthesized.
    LineRendered {
        line_id: u32,
        attempts: u32,
        duration_ms: u64,
    },
    /// A line could not be synthesized within the retry budget.
    LineFailed {
        line_id: u32,
        attempts: u32,
        error: String,
    },
    /// All lines were placed on the timeline.
    Stitched { duration_ms: u64, gain_db: f32 },
    /// Alignment finished (or fell back).
    Aligned {
        success: bool,
        corrected: usize,
        total_drift_ms: u64,
        needs_review: bool,
    },
    /// The lesson is complete.
    Finished { duration_ms: u64, quality_score: f64 },
}

/// A lesson built in memory.
#[derive(Debug, Clone)]
pub struct LessonBuild {
    pub waveform: Waveform,
    /// Timings as laid out by the stitcher, before alignment.
    pub provisional: Vec<ProvisionalSegment>,
    pub alignment: AlignmentResult,
    pub quality_score: f64,
    pub manifest: LessonManifest,
}

/// Files written for a lesson.
#[derive(Debug, Clone)]
pub struct LessonOutput {
    pub audio_path: PathBuf,
    pub subtitle_path: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: LessonManifest,
}

/// Builds lesson audio and timings from scripts.
///
/// The transcription model is loaded on the first aligned lesson and reused
/// for every later one.
pub struct LessonPipeline<S, B: TranscriptionBackend> {
    config: Config,
    synthesizer: S,
    aligner: Aligner<B>,
    callback: Option<PipelineCallback>,
}

impl<S, B> LessonPipeline<S, B>
where
    S: SpeechSynthesizer,
    B: TranscriptionBackend,
{
    /// Create a pipeline. Fails if the configuration is out of range.
    pub fn new(config: Config, synthesizer: S, backend: B) -> Result<Self, LessonError> {
        config.validate()?;
        let aligner = Aligner::new(config.alignment_options(), backend);

        Ok(Self {
            config,
            synthesizer,
            aligner,
            callback: None,
        })
    }

    /// Set a callback for pipeline events.
    pub fn with_callback(mut self, callback: PipelineCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Configuration the pipeline was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The synthesis backend.
    pub fn synthesizer(&self) -> &S {
        &self.synthesizer
    }

    /// The aligner, which owns the transcription backend.
    pub fn aligner(&self) -> &Aligner<B> {
        &self.aligner
    }

    /// Render every line with retries, in script order.
    ///
    /// Fails with the ids of every line that exhausted its attempts.
    pub async fn synthesize(&mut self, script: &Script) -> Result<Vec<RenderedLine>, LessonError> {
        let policy = self.config.retry_policy();
        let sample_rate = self.config.audio.sample_rate;
        let mut outcomes: Vec<LineOutcome> = Vec::with_capacity(script.lines.len());

        for line in &script.lines {
            let request = RenderRequest {
                line_id: line.id,
                text: line.text.clone(),
                voice_id: self.config.voices.resolve(&line.speaker),
                emotion: line.emotion,
                speed: script.speech_rate_for(line, self.config.synthesis.speech_rate),
            };

            let outcome =
                retry::render_with_retry(&mut self.synthesizer, &request, &policy, sample_rate)
                    .await;

            if outcome.rendered.success {
                self.emit_event(PipelineEvent::LineRendered {
                    line_id: line.id,
                    attempts: outcome.attempts,
                    duration_ms: outcome.rendered.audio.duration_ms(),
                });
            } else {
                self.emit_event(PipelineEvent::LineFailed {
                    line_id: line.id,
                    attempts: outcome.attempts,
                    error: outcome.rendered.error.clone().unwrap_or_default(),
                });
            }
            outcomes.push(outcome);
        }

        retry::collect_rendered(outcomes)
    }

    /// Build a lesson in memory without writing anything.
    pub async fn build(&mut self, script: &Script) -> Result<LessonBuild, LessonError> {
        script::validate_or_err(script)?;
        self.emit_event(PipelineEvent::Validated {
            lesson_id: script.lesson_id.clone(),
            lines: script.lines.len(),
        });
        info!(lesson_id = %script.lesson_id, lines = script.lines.len(), "building lesson");

        let rendered = self.synthesize(script).await?;

        let pauses: HashMap<u32, Option<u32>> = script
            .lines
            .iter()
            .map(|line| (line.id, line.pause_after_ms))
            .collect();
        let entries = rendered
            .into_iter()
            .map(|rendered| StitchEntry {
                pause_after_ms: pauses.get(&rendered.line_id).copied().flatten(),
                rendered,
            })
            .collect();

        let stitcher = Stitcher::new(self.config.stitcher_options(script.settings.as_ref()));
        let stitched = stitcher.stitch(entries);
        self.emit_event(PipelineEvent::Stitched {
            duration_ms: stitched.total_duration_ms,
            gain_db: stitched.gain_db,
        });

        let texts: HashMap<u32, String> = script
            .lines
            .iter()
            .map(|line| (line.id, line.text.clone()))
            .collect();
        let alignment = self
            .aligner
            .align(&stitched.waveform, &stitched.segments, &texts)
            .await;
        if !alignment.success {
            warn!(
                error = alignment.error.as_deref().unwrap_or("unknown"),
                "alignment unavailable, using provisional timings"
            );
        }
        self.emit_event(PipelineEvent::Aligned {
            success: alignment.success,
            corrected: alignment.segments.iter().filter(|s| s.was_corrected()).count(),
            total_drift_ms: alignment.total_drift_ms,
            needs_review: alignment.needs_review,
        });

        let score = quality_score(&alignment.segments);
        let manifest = LessonManifest::build(
            script,
            &alignment,
            stitched.total_duration_ms,
            score,
            self.synthesizer.name(),
        );

        info!(
            lesson_id = %script.lesson_id,
            duration_ms = stitched.total_duration_ms,
            quality_score = score,
            "lesson built"
        );
        self.emit_event(PipelineEvent::Finished {
            duration_ms: stitched.total_duration_ms,
            quality_score: score,
        });

        Ok(LessonBuild {
            waveform: stitched.waveform,
            provisional: stitched.segments,
            alignment,
            quality_score: score,
            manifest,
        })
    }

    /// Build a lesson and write `<lesson_id>.wav`, `.srt` and `.json` into
    /// `output_dir`.
    pub async fn generate<P: AsRef<Path>>(
        &mut self,
        script: &Script,
        output_dir: P,
    ) -> Result<LessonOutput, LessonError> {
        let output_dir = output_dir.as_ref();
        let lesson = self.build(script).await?;

        fs::create_dir_all(output_dir)?;
        let audio_path = output_dir.join(format!("{}.wav", script.lesson_id));
        let subtitle_path = output_dir.join(format!("{}.srt", script.lesson_id));
        let manifest_path = output_dir.join(format!("{}.json", script.lesson_id));

        audio::write_wav(&audio_path, &lesson.waveform)?;
        subtitle::save_srt(&lesson.manifest.to_srt(), &subtitle_path)?;
        lesson.manifest.save(&manifest_path)?;

        info!(output = %output_dir.display(), "lesson written");

        Ok(LessonOutput {
            audio_path,
            subtitle_path,
            manifest_path,
            manifest: lesson.manifest,
        })
    }

    /// Emit an event if a callback is registered.
    fn emit_event(&self, event: PipelineEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Line;
    use crate::synthesis::ScriptedSynthesizer;
    use crate::transcription::StaticTranscriptionBackend;
    use std::sync::{Arc, Mutex};

    fn script() -> Script {
        Script::new(
            "lesson_01",
            "Greetings",
            vec![
                Line::new(1, "af_sky", "Hi.").with_pause(400),
                Line::new(2, "bm_george", "How are you?").with_pause(400),
            ],
        )
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.alignment.enabled = false;
        config
    }

    fn recorder() -> (Arc<Mutex<Vec<PipelineEvent>>>, PipelineCallback) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: PipelineCallback = Box::new(move |event| {
            sink.lock().unwrap().push(event);
        });
        (events, callback)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        let result = LessonPipeline::new(
            config,
            ScriptedSynthesizer::new(24_000, 1000),
            StaticTranscriptionBackend::default(),
        );
        assert!(matches!(result, Err(LessonError::Config(_))));
    }

    #[tokio::test]
    async fn test_events_in_stage_order() {
        let (events, callback) = recorder();
        let mut pipeline = LessonPipeline::new(
            config(),
            ScriptedSynthesizer::new(24_000, 1000).with_failures(2, 1),
            StaticTranscriptionBackend::default(),
        )
        .unwrap()
        .with_callback(callback);

        pipeline.build(&script()).await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 6);
        assert!(matches!(events[0], PipelineEvent::Validated { lines: 2, .. }));
        assert_eq!(
            events[1],
            PipelineEvent::LineRendered {
                line_id: 1,
                attempts: 1,
                duration_ms: 1000
            }
        );
        assert!(matches!(
            events[2],
            PipelineEvent::LineRendered {
                line_id: 2,
                attempts: 2,
                ..
            }
        ));
        assert!(matches!(
            events[3],
            PipelineEvent::Stitched {
                duration_ms: 2700,
                ..
            }
        ));
        assert!(matches!(events[4], PipelineEvent::Aligned { success: true, .. }));
        assert!(matches!(
            events[5],
            PipelineEvent::Finished {
                duration_ms: 2700,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_script_not_synthesized() {
        let mut pipeline = LessonPipeline::new(
            config(),
            ScriptedSynthesizer::new(24_000, 1000),
            StaticTranscriptionBackend::default(),
        )
        .unwrap();

        let mut bad = script();
        bad.lines[1].id = 1;

        assert!(matches!(
            pipeline.build(&bad).await,
            Err(LessonError::Script(_))
        ));
        assert_eq!(pipeline.synthesizer().attempts(1), 0);
    }

    #[tokio::test]
    async fn test_failed_line_aborts_before_stitching() {
        let (events, callback) = recorder();
        let mut pipeline = LessonPipeline::new(
            config(),
            ScriptedSynthesizer::new(24_000, 1000).with_failures(1, 10),
            StaticTranscriptionBackend::default(),
        )
        .unwrap()
        .with_callback(callback);

        let err = pipeline.build(&script()).await.unwrap_err();
        assert!(matches!(err, LessonError::SynthesisFailed { ref line_ids } if line_ids == &[1]));
        assert_eq!(pipeline.synthesizer().attempts(1), 3);

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::LineFailed {
                line_id: 1,
                attempts: 3,
                ..
            }
        )));
        assert!(!events.iter().any(|e| matches!(e, PipelineEvent::Stitched { .. })));
    }

    #[tokio::test]
    async fn test_speakers_resolved_to_voices() {
        let mut config = config();
        config
            .voices
            .aliases
            .insert("narrator".to_string(), "bm_lewis".to_string());
        let mut pipeline = LessonPipeline::new(
            config,
            ScriptedSynthesizer::new(24_000, 500),
            StaticTranscriptionBackend::default(),
        )
        .unwrap();

        let script = Script::new(
            "voices",
            "Voices",
            vec![
                Line::new(1, "female_us_1", "Hello."),
                Line::new(2, "bm_george", "Hi."),
                Line::new(3, "narrator", "Later."),
                Line::new(4, "somebody", "Bye."),
            ],
        );
        pipeline.synthesize(&script).await.unwrap();

        let synth = pipeline.synthesizer();
        assert_eq!(synth.requested_voice(1).as_deref(), Some("af_heart"));
        assert_eq!(synth.requested_voice(2).as_deref(), Some("bm_george"));
        assert_eq!(synth.requested_voice(3).as_deref(), Some("bm_lewis"));
        assert_eq!(synth.requested_voice(4).as_deref(), Some("af_heart"));
    }

    #[tokio::test]
    async fn test_speech_rate_precedence() {
        let mut config = config();
        config.synthesis.speech_rate = 0.8;
        let mut pipeline = LessonPipeline::new(
            config,
            ScriptedSynthesizer::new(24_000, 500),
            StaticTranscriptionBackend::default(),
        )
        .unwrap();

        let mut script = script();
        script.lines[0].speech_rate = Some(1.5);
        let rendered = pipeline.synthesize(&script).await.unwrap();

        assert_eq!(rendered.len(), 2);
        assert_eq!(pipeline.synthesizer().requested_speed(1), Some(1.5));
        assert_eq!(pipeline.synthesizer().requested_speed(2), Some(0.8));
    }
}
