//! SRT subtitle generation and parsing.

use regex::Regex;
use std::fs;
use std::path::Path;

use crate::error::LessonError;

const TIME_RANGE_PATTERN: &str =
    r"^(\d+):(\d{2}):(\d{2}),(\d{3})\s*-->\s*(\d+):(\d{2}):(\d{2}),(\d{3})$";

/// One subtitle entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleCue {
    /// 1-based position in the file.
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Format milliseconds as `HH:MM:SS,mmm`.
pub fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// Render `(start_ms, end_ms, text)` entries as SRT, numbered from 1.
///
/// Blank lines inside a text would end the block early, so they are dropped.
pub fn generate_srt<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (u64, u64, &'a str)>,
{
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (start_ms, end_ms, text))| {
            format!(
                "{}\n{} --> {}\n{}\n",
                i + 1,
                format_timestamp(start_ms),
                format_timestamp(end_ms),
                cue_text(text)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn cue_text(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Write SRT content, creating parent directories as needed.
pub fn save_srt<P: AsRef<Path>>(content: &str, path: P) -> Result<(), LessonError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

/// Parse SRT content. Blocks with fewer than three lines are skipped.
pub fn parse_srt(content: &str) -> Result<Vec<SubtitleCue>, LessonError> {
    let time_range = Regex::new(TIME_RANGE_PATTERN)
        .map_err(|e| LessonError::Subtitle(format!("Invalid timing pattern: {}", e)))?;
    let normalized = content.replace("\r\n", "\n");
    let mut cues = Vec::new();

    for block in normalized.trim().split("\n\n") {
        let lines: Vec<&str> = block.trim().lines().collect();
        if lines.len() < 3 {
            continue;
        }

        let index = lines[0].trim().parse::<usize>().map_err(|_| {
            LessonError::Subtitle(format!("Invalid subtitle index: {}", lines[0]))
        })?;
        let (start_ms, end_ms) = parse_time_range(&time_range, lines[1].trim())?;

        cues.push(SubtitleCue {
            index,
            start_ms,
            end_ms,
            text: lines[2..].join("\n"),
        });
    }

    Ok(cues)
}

fn parse_time_range(pattern: &Regex, line: &str) -> Result<(u64, u64), LessonError> {
    let caps = pattern
        .captures(line)
        .ok_or_else(|| LessonError::Subtitle(format!("Invalid subtitle timing: {}", line)))?;

    let timestamp = |first: usize| -> Result<u64, LessonError> {
        let mut total: u64 = 0;
        for (offset, unit) in [3_600_000u64, 60_000, 1000, 1].into_iter().enumerate() {
            let value: u64 = caps[first + offset].parse().map_err(|e| {
                LessonError::Subtitle(format!("Invalid subtitle timing {}: {}", line, e))
            })?;
            total = value
                .checked_mul(unit)
                .and_then(|part| total.checked_add(part))
                .ok_or_else(|| {
                    LessonError::Subtitle(format!("Subtitle timing out of range: {}", line))
                })?;
        }
        Ok(total)
    };

    Ok((timestamp(1)?, timestamp(5)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "00:00:00,000");
        assert_eq!(format_timestamp(500), "00:00:00,500");
        assert_eq!(format_timestamp(90_000), "00:01:30,000");
        assert_eq!(format_timestamp(3_661_500), "01:01:01,500");
        assert_eq!(
            format_timestamp(3_600_000 + 23 * 60_000 + 45_000 + 678),
            "01:23:45,678"
        );
    }

    #[test]
    fn test_generate_empty() {
        assert_eq!(generate_srt(Vec::<(u64, u64, &str)>::new()), "");
    }

    #[test]
    fn test_generate_blocks() {
        let srt = generate_srt(vec![(300, 1500, "Hello!"), (2000, 3500, "Hi there!")]);
        assert_eq!(
            srt,
            "1\n00:00:00,300 --> 00:00:01,500\nHello!\n\n2\n00:00:02,000 --> 00:00:03,500\nHi there!\n"
        );
    }

    #[test]
    fn test_round_trip() {
        let entries = vec![
            (300, 1300, "Hi."),
            (1700, 2700, "How are you?"),
            (3_100, 3_723_456, "Good, thanks."),
        ];
        let cues = parse_srt(&generate_srt(entries.clone())).unwrap();

        assert_eq!(cues.len(), entries.len());
        for (i, (cue, (start, end, text))) in cues.iter().zip(&entries).enumerate() {
            assert_eq!(cue.index, i + 1);
            assert_eq!(cue.start_ms, *start);
            assert_eq!(cue.end_ms, *end);
            assert_eq!(cue.text, *text);
        }
    }

    #[test]
    fn test_parse_crlf_and_multiline() {
        let content = "1\r\n00:00:01,000 --> 00:00:02,000\r\nfirst\r\nsecond\r\n\r\n2\r\nbroken\r\n";
        let cues = parse_srt(content).unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "first\nsecond");
    }

    #[test]
    fn test_parse_bad_timing() {
        let content = "1\n00:00:01.000 --> 00:00:02.000\ntext\n";
        assert!(matches!(parse_srt(content), Err(LessonError::Subtitle(_))));

        let content = "x\n00:00:01,000 --> 00:00:02,000\ntext\n";
        assert!(matches!(parse_srt(content), Err(LessonError::Subtitle(_))));
    }

    #[test]
    fn test_parse_overflowing_timing() {
        let content = "1\n99999999999999999999:00:00,000 --> 00:00:02,000\ntext\n";
        assert!(matches!(parse_srt(content), Err(LessonError::Subtitle(_))));

        let content = "1\n00:00:01,000 --> 9999999999999999:00:00,000\ntext\n";
        assert!(matches!(parse_srt(content), Err(LessonError::Subtitle(_))));
    }

    #[test]
    fn test_blank_lines_in_text_collapsed() {
        let srt = generate_srt(vec![(0, 1000, "first\n\n  \nsecond"), (1000, 2000, "third")]);
        let cues = parse_srt(&srt).unwrap();

        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "first\nsecond");
        assert_eq!(cues[1].index, 2);
        assert_eq!(cues[1].text, "third");
    }

    #[test]
    fn test_save_srt_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lesson.srt");
        save_srt("1\n00:00:00,000 --> 00:00:01,000\nx\n", &path).unwrap();
        assert!(path.exists());
    }
}
