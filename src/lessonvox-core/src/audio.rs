//! Audio buffer primitives: silence, loudness, trimming, resampling and WAV I/O.
//!
//! Samples are mono `f32` in [-1.0, 1.0]. Millisecond conversions floor.

use std::io::Cursor;
use std::path::Path;

use crate::error::LessonError;

/// A mono waveform at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn empty(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        samples_to_ms(self.samples.len(), self.sample_rate)
    }
}

pub fn ms_to_samples(ms: u64, sample_rate: u32) -> usize {
    (ms * sample_rate as u64 / 1000) as usize
}

pub fn samples_to_ms(samples: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    samples as u64 * 1000 / sample_rate as u64
}

/// Zero-amplitude buffer of the requested duration.
pub fn silence(duration_ms: u64, sample_rate: u32) -> Vec<f32> {
    vec![0.0; ms_to_samples(duration_ms, sample_rate)]
}

/// RMS loudness relative to full scale. Silence (or no samples) is `-inf`.
pub fn dbfs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let mean_square =
        samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / samples.len() as f64;
    if mean_square <= 0.0 {
        return f32::NEG_INFINITY;
    }
    (10.0 * mean_square.log10()) as f32
}

/// Scale every sample by a gain expressed in dB.
pub fn apply_gain_db(samples: &mut [f32], gain_db: f32) {
    let factor = 10f32.powf(gain_db / 20.0);
    for sample in samples.iter_mut() {
        *sample *= factor;
    }
}

/// Apply one uniform gain so the buffer's loudness matches `target_dbfs`.
///
/// Returns the gain applied in dB. Silent buffers are left untouched.
pub fn normalize_loudness(samples: &mut [f32], target_dbfs: f32) -> f32 {
    let current = dbfs(samples);
    if !current.is_finite() {
        return 0.0;
    }
    let gain_db = target_dbfs - current;
    apply_gain_db(samples, gain_db);
    gain_db
}

/// Parameters for edge-silence trimming.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimOptions {
    /// Chunks quieter than this count as silence.
    pub threshold_dbfs: f32,
    /// Analysis chunk length; shorter silent runs are never removed.
    pub min_silence_ms: u32,
    /// Silence retained on each side of the detected speech.
    pub guard_ms: u32,
}

impl Default for TrimOptions {
    fn default() -> Self {
        Self {
            threshold_dbfs: -50.0,
            min_silence_ms: 10,
            guard_ms: 50,
        }
    }
}

/// Remove leading and trailing near-silence, keeping a guard band around speech.
///
/// An all-silent input trims to an empty buffer.
pub fn trim_silence(samples: &[f32], sample_rate: u32, options: &TrimOptions) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let chunk = ms_to_samples(options.min_silence_ms as u64, sample_rate).max(1);
    let lead = leading_silence(samples, chunk, options.threshold_dbfs);
    if lead >= samples.len() {
        return Vec::new();
    }
    let speech_end = samples.len() - trailing_silence(samples, chunk, options.threshold_dbfs);

    let guard = ms_to_samples(options.guard_ms as u64, sample_rate);
    let start = lead.saturating_sub(guard);
    let end = (speech_end + guard).min(samples.len());

    samples[start..end].to_vec()
}

fn leading_silence(samples: &[f32], chunk: usize, threshold_dbfs: f32) -> usize {
    let mut pos = 0;
    while pos < samples.len() {
        let end = (pos + chunk).min(samples.len());
        if dbfs(&samples[pos..end]) >= threshold_dbfs {
            break;
        }
        pos = end;
    }
    pos
}

fn trailing_silence(samples: &[f32], chunk: usize, threshold_dbfs: f32) -> usize {
    let mut end = samples.len();
    while end > 0 {
        let start = end.saturating_sub(chunk);
        if dbfs(&samples[start..end]) >= threshold_dbfs {
            break;
        }
        end = start;
    }
    samples.len() - end
}

/// Adjust playback speed using linear interpolation.
/// Rate < 1.0 = slower (longer output), Rate > 1.0 = faster.
pub fn adjust_speed(samples: Vec<f32>, rate: f32) -> Vec<f32> {
    if (rate - 1.0).abs() < 0.001 || rate <= 0.0 {
        return samples;
    }

    let new_len = (samples.len() as f32 / rate) as usize;
    let mut result = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_pos = i as f32 * rate;
        let src_idx = src_pos as usize;
        let frac = src_pos - src_idx as f32;

        if src_idx + 1 < samples.len() {
            result.push(samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac);
        } else if src_idx < samples.len() {
            result.push(samples[src_idx]);
        }
    }

    result
}

/// Convert between sample rates by linear interpolation.
pub fn resample_linear(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples;
    }

    let output_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;

    (0..output_len)
        .map(|i| {
            let src_pos = i as f64 * step;
            let src_idx = src_pos as usize;
            let frac = (src_pos - src_idx as f64) as f32;
            match (samples.get(src_idx), samples.get(src_idx + 1)) {
                (Some(&a), Some(&b)) => a * (1.0 - frac) + b * frac,
                (Some(&a), None) => a,
                _ => 0.0,
            }
        })
        .collect()
}

fn wav_spec(sample_rate: u32) -> Result<hound::WavSpec, LessonError> {
    if sample_rate == 0 {
        return Err(LessonError::Audio(
            "Cannot encode audio with a zero sample rate".to_string(),
        ));
    }
    Ok(hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    })
}

fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Write a waveform as 16-bit PCM mono, clipping out-of-range samples.
pub fn write_wav<P: AsRef<Path>>(path: P, waveform: &Waveform) -> Result<(), LessonError> {
    let mut writer = hound::WavWriter::create(path.as_ref(), wav_spec(waveform.sample_rate)?)?;
    for &sample in &waveform.samples {
        writer.write_sample(to_pcm16(sample))?;
    }
    writer.finalize()?;
    Ok(())
}

/// Encode a waveform into in-memory WAV bytes.
pub fn encode_wav(waveform: &Waveform) -> Result<Vec<u8>, LessonError> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(waveform.sample_rate)?)?;
        for &sample in &waveform.samples {
            writer.write_sample(to_pcm16(sample))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Read a WAV file, mixing multi-channel audio down to mono.
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<Waveform, LessonError> {
    let mut reader = hound::WavReader::open(path.as_ref())?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(Waveform::new(samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(duration_ms: u64, sample_rate: u32, amplitude: f32) -> Vec<f32> {
        let n = ms_to_samples(duration_ms, sample_rate);
        (0..n)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_silence_length() {
        assert_eq!(silence(300, 24_000).len(), 7200);
        assert!(silence(300, 24_000).iter().all(|&s| s == 0.0));
        assert!(silence(0, 24_000).is_empty());
    }

    #[test]
    fn test_ms_conversions() {
        assert_eq!(ms_to_samples(1000, 24_000), 24_000);
        assert_eq!(samples_to_ms(24_000, 24_000), 1000);
        assert_eq!(samples_to_ms(100, 0), 0);
        assert_eq!(Waveform::new(vec![0.0; 2205], 22_050).duration_ms(), 100);
    }

    #[test]
    fn test_dbfs() {
        assert_eq!(dbfs(&[]), f32::NEG_INFINITY);
        assert_eq!(dbfs(&[0.0; 10]), f32::NEG_INFINITY);
        assert!(dbfs(&[1.0, -1.0, 1.0, -1.0]).abs() < 1e-4);
        assert!((dbfs(&[0.5; 100]) - (-6.0206)).abs() < 1e-3);
    }

    #[test]
    fn test_normalize_loudness_hits_target() {
        let mut samples = tone(500, 16_000, 0.05);
        normalize_loudness(&mut samples, -16.0);
        assert!((dbfs(&samples) - (-16.0)).abs() < 0.01);
    }

    #[test]
    fn test_normalize_silence_is_noop() {
        let mut samples = vec![0.0; 100];
        assert_eq!(normalize_loudness(&mut samples, -16.0), 0.0);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_trim_keeps_guard_band() {
        let sr = 16_000;
        let mut samples = silence(200, sr);
        samples.extend(tone(500, sr, 0.5));
        samples.extend(silence(300, sr));

        let trimmed = trim_silence(&samples, sr, &TrimOptions::default());
        // 50ms guard on each side of the 500ms tone.
        assert_eq!(samples_to_ms(trimmed.len(), sr), 600);
    }

    #[test]
    fn test_trim_guard_clamped_at_edges() {
        let sr = 16_000;
        let mut samples = silence(20, sr);
        samples.extend(tone(400, sr, 0.5));

        let trimmed = trim_silence(&samples, sr, &TrimOptions::default());
        assert_eq!(trimmed.len(), samples.len());
    }

    #[test]
    fn test_trim_all_silence_is_empty() {
        let samples = silence(500, 16_000);
        assert!(trim_silence(&samples, 16_000, &TrimOptions::default()).is_empty());
        assert!(trim_silence(&[], 16_000, &TrimOptions::default()).is_empty());
    }

    #[test]
    fn test_trim_leaves_continuous_speech_alone() {
        let samples = vec![0.3; 24_000];
        let trimmed = trim_silence(&samples, 24_000, &TrimOptions::default());
        assert_eq!(trimmed.len(), 24_000);
    }

    #[test]
    fn test_adjust_speed() {
        let samples = vec![0.1; 1000];
        assert_eq!(adjust_speed(samples.clone(), 1.0).len(), 1000);
        assert_eq!(adjust_speed(samples.clone(), 2.0).len(), 500);
        assert_eq!(adjust_speed(samples, 0.5).len(), 2000);
    }

    #[test]
    fn test_resample_linear() {
        let samples = vec![0.2; 16_000];
        let out = resample_linear(samples, 16_000, 24_000);
        assert_eq!(out.len(), 24_000);
    }

    #[test]
    fn test_wav_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let waveform = Waveform::new(tone(100, 8_000, 0.5), 8_000);

        write_wav(&path, &waveform).unwrap();
        let read = read_wav(&path).unwrap();

        assert_eq!(read.sample_rate, 8_000);
        assert_eq!(read.len(), waveform.len());
        for (a, b) in read.samples.iter().zip(&waveform.samples) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_encode_wav_clips() {
        let waveform = Waveform::new(vec![2.0, -2.0], 8_000);
        let bytes = encode_wav(&waveform).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![i16::MAX, -i16::MAX]);
    }

    #[test]
    fn test_encode_wav_rejects_zero_rate() {
        let waveform = Waveform::new(vec![0.1], 0);
        assert!(matches!(encode_wav(&waveform), Err(LessonError::Audio(_))));
    }
}
