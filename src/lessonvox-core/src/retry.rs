//! Per-line synthesis with bounded retries.

use std::time::Duration;
use tracing::{debug, warn};

use crate::error::LessonError;
use crate::synthesis::{RenderRequest, RenderedLine, SpeechSynthesizer};

/// How many times a line is rendered before it is given up on.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total tries per line, including the first.
    pub max_attempts: u32,
    /// Ceiling for a single render call; hitting it counts as a failed attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Outcome of rendering one line.
#[derive(Debug, Clone)]
pub struct LineOutcome {
    pub rendered: RenderedLine,
    pub attempts: u32,
}

/// Render one line, retrying immediately on failure until it succeeds or
/// `max_attempts` tries are spent.
pub async fn render_with_retry<S>(
    synthesizer: &mut S,
    request: &RenderRequest,
    policy: &RetryPolicy,
    sample_rate: u32,
) -> LineOutcome
where
    S: SpeechSynthesizer + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        let result = match tokio::time::timeout(policy.timeout, synthesizer.render(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(LessonError::Timeout {
                what: format!("Synthesis of line {}", request.line_id),
                after_ms: policy.timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(audio) => {
                debug!(
                    line_id = request.line_id,
                    attempt,
                    duration_ms = audio.duration_ms(),
                    "line synthesized"
                );
                return LineOutcome {
                    rendered: RenderedLine::ok(request.line_id, audio),
                    attempts: attempt,
                };
            }
            Err(e) => {
                warn!(
                    line_id = request.line_id,
                    attempt,
                    max_attempts,
                    error = %e,
                    "synthesis attempt failed"
                );
                last_error = e.to_string();
            }
        }
    }

    LineOutcome {
        rendered: RenderedLine::failed(
            request.line_id,
            sample_rate,
            format!("Failed after {} attempts: {}", max_attempts, last_error),
        ),
        attempts: max_attempts,
    }
}

/// Turn per-line outcomes into rendered audio, or the ids of every line that
/// could not be synthesized.
pub fn collect_rendered(outcomes: Vec<LineOutcome>) -> Result<Vec<RenderedLine>, LessonError> {
    let failed: Vec<u32> = outcomes
        .iter()
        .filter(|o| !o.rendered.success)
        .map(|o| o.rendered.line_id)
        .collect();

    if !failed.is_empty() {
        return Err(LessonError::SynthesisFailed { line_ids: failed });
    }

    Ok(outcomes.into_iter().map(|o| o.rendered).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Emotion;
    use crate::synthesis::ScriptedSynthesizer;

    fn request(line_id: u32) -> RenderRequest {
        RenderRequest {
            line_id,
            text: "Hi.".to_string(),
            voice_id: "af_sky".to_string(),
            emotion: Emotion::Neutral,
            speed: 1.0,
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_first_try_success() {
        let mut synth = ScriptedSynthesizer::new(1000, 100);
        let outcome = render_with_retry(&mut synth, &request(1), &policy(3), 1000).await;

        assert!(outcome.rendered.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(synth.attempts(1), 1);
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let mut synth = ScriptedSynthesizer::new(1000, 100).with_failures(1, 2);
        let outcome = render_with_retry(&mut synth, &request(1), &policy(5), 1000).await;

        assert!(outcome.rendered.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(synth.attempts(1), 3);
    }

    #[tokio::test]
    async fn test_success_on_last_attempt() {
        let mut synth = ScriptedSynthesizer::new(1000, 100).with_failures(1, 2);
        let outcome = render_with_retry(&mut synth, &request(1), &policy(3), 1000).await;

        assert!(outcome.rendered.success);
        assert_eq!(synth.attempts(1), 3);
    }

    #[tokio::test]
    async fn test_exhausts_exactly_max_attempts() {
        let mut synth = ScriptedSynthesizer::new(1000, 100).with_failures(1, 100);
        let outcome = render_with_retry(&mut synth, &request(1), &policy(4), 1000).await;

        assert!(!outcome.rendered.success);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(synth.attempts(1), 4);
        assert!(
            outcome
                .rendered
                .error
                .unwrap()
                .contains("Failed after 4 attempts")
        );
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let mut synth = ScriptedSynthesizer::new(1000, 100);
        let outcome = render_with_retry(&mut synth, &request(1), &policy(0), 1000).await;
        assert!(outcome.rendered.success);
        assert_eq!(synth.attempts(1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let mut synth =
            ScriptedSynthesizer::new(1000, 100).with_delay(1, Duration::from_secs(30));
        let policy = RetryPolicy {
            max_attempts: 2,
            timeout: Duration::from_secs(1),
        };

        let outcome = render_with_retry(&mut synth, &request(1), &policy, 1000).await;

        assert!(!outcome.rendered.success);
        assert_eq!(synth.attempts(1), 2);
        assert!(outcome.rendered.error.unwrap().contains("timed out"));
    }

    #[test]
    fn test_collect_rendered_reports_all_failures() {
        let outcomes = vec![
            LineOutcome {
                rendered: RenderedLine::failed(1, 1000, "x"),
                attempts: 3,
            },
            LineOutcome {
                rendered: RenderedLine::ok(2, crate::audio::Waveform::empty(1000)),
                attempts: 1,
            },
            LineOutcome {
                rendered: RenderedLine::failed(3, 1000, "y"),
                attempts: 3,
            },
        ];

        match collect_rendered(outcomes) {
            Err(LessonError::SynthesisFailed { line_ids }) => assert_eq!(line_ids, vec![1, 3]),
            other => panic!("unexpected: {:?}", other.map(|v| v.len())),
        }
    }
}
