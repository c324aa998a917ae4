//! Audio buffer implementation
//!
//! AudioBuffer holds interleaved samples plus the format needed to interpret
//! them. Cropping and resampling return new buffers; nothing aliases.

use crate::error::{Result, TalkError};

/// Audio sample data with metadata
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved audio samples normalized to -1.0..1.0
    samples: Vec<f32>,
    /// Number of audio channels (1 = mono, 2 = stereo)
    channels: u16,
    /// Sample rate in Hz
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a new audio buffer with the given parameters
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Result<Self> {
        if samples.is_empty() {
            return Err(TalkError::EmptyBuffer);
        }
        if channels == 0 || samples.len() % channels as usize != 0 {
            return Err(TalkError::UnsupportedFormat {
                details: format!(
                    "sample count {} is not divisible by channel count {}",
                    samples.len(),
                    channels
                ),
            });
        }
        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    /// Create a silent buffer with the given duration
    pub fn silence(duration_secs: f32, channels: u16, sample_rate: u32) -> Self {
        let num_samples = (duration_secs * sample_rate as f32) as usize * channels as usize;
        Self {
            samples: vec![0.0; num_samples],
            channels,
            sample_rate,
        }
    }

    /// Create a mono sine wave test tone
    pub fn sine_wave(frequency: f32, duration_secs: f32, sample_rate: u32) -> Self {
        let num_samples = (duration_secs * sample_rate as f32) as usize;
        let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
        let samples = (0..num_samples)
            .map(|i| (angular_freq * i as f32).sin())
            .collect();

        Self {
            samples,
            channels: 1,
            sample_rate,
        }
    }

    /// Get a reference to the samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Consume the buffer and return its samples
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Get the number of channels
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Get the sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the number of frames (samples per channel)
    pub fn num_frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Get the duration in seconds
    pub fn duration(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }

    /// Copy the frames between `start_secs` and `end_secs`.
    ///
    /// Both bounds are clamped to the buffer, so cropping past the end yields
    /// whatever audio remains (possibly nothing).
    pub fn crop(&self, start_secs: f64, end_secs: f64) -> AudioBuffer {
        let frames = self.num_frames();
        let to_frame = |secs: f64| ((secs.max(0.0) * self.sample_rate as f64).round() as usize).min(frames);
        let start = to_frame(start_secs);
        let end = to_frame(end_secs).max(start);
        let ch = self.channels as usize;

        AudioBuffer {
            samples: self.samples[start * ch..end * ch].to_vec(),
            channels: self.channels,
            sample_rate: self.sample_rate,
        }
    }

    /// Convert to another sample rate using linear interpolation.
    pub fn resample(&self, target_rate: u32) -> AudioBuffer {
        if target_rate == self.sample_rate {
            return self.clone();
        }
        let ratio = target_rate as f64 / self.sample_rate as f64;
        let ch = self.channels as usize;

        let channels: Vec<Vec<f32>> = (0..ch)
            .map(|c| resample_linear(&self.channel_samples(c as u16), ratio))
            .collect();
        let frames = channels.first().map(Vec::len).unwrap_or(0);

        let mut samples = Vec::with_capacity(frames * ch);
        for frame in 0..frames {
            for channel in &channels {
                samples.push(channel[frame]);
            }
        }

        AudioBuffer {
            samples,
            channels: self.channels,
            sample_rate: target_rate,
        }
    }

    /// Get samples for a specific channel (0-indexed)
    pub fn channel_samples(&self, channel: u16) -> Vec<f32> {
        if channel >= self.channels {
            return Vec::new();
        }
        self.samples
            .iter()
            .skip(channel as usize)
            .step_by(self.channels as usize)
            .copied()
            .collect()
    }

    /// Check if buffers are approximately equal within tolerance
    pub fn is_approx_equal(&self, other: &AudioBuffer, tolerance: f32) -> bool {
        if self.channels != other.channels || self.sample_rate != other.sample_rate {
            return false;
        }
        if self.samples.len() != other.samples.len() {
            return false;
        }
        self.samples
            .iter()
            .zip(other.samples.iter())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

/// Linear interpolation resampling
///
/// Linear interpolation aliases when downsampling; it is only used to bring
/// priming clips to the model's rate.
fn resample_linear(samples: &[f32], ratio: f64) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let source_len = samples.len();
    let target_len = ((source_len as f64) * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(target_len);

    for i in 0..target_len {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < source_len {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else if src_idx < source_len {
            samples[src_idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_wave_generation() {
        let buffer = AudioBuffer::sine_wave(440.0, 1.0, 44100);
        assert_eq!(buffer.channels(), 1);
        assert_eq!(buffer.sample_rate(), 44100);
        assert_eq!(buffer.num_frames(), 44100);
        assert!((buffer.duration() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_silence_generation() {
        let buffer = AudioBuffer::silence(2.0, 2, 8000);
        assert_eq!(buffer.num_frames(), 16000);
        assert!(buffer.samples().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_channel_extraction() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // L, R, L, R, L, R
        let buffer = AudioBuffer::new(samples, 2, 44100).unwrap();

        assert_eq!(buffer.channel_samples(0), vec![1.0, 3.0, 5.0]);
        assert_eq!(buffer.channel_samples(1), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_empty_buffer_error() {
        let result = AudioBuffer::new(vec![], 1, 44100);
        assert!(matches!(result, Err(TalkError::EmptyBuffer)));
    }

    #[test]
    fn test_crop_keeps_frames_together() {
        let samples: Vec<f32> = (0..20).map(|i| i as f32).collect();
        let buffer = AudioBuffer::new(samples, 2, 10).unwrap();

        let cropped = buffer.crop(0.2, 0.5);
        assert_eq!(cropped.num_frames(), 3);
        assert_eq!(cropped.samples(), &[4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_crop_past_end_is_clamped() {
        let buffer = AudioBuffer::sine_wave(100.0, 1.0, 100);
        let cropped = buffer.crop(0.5, 60.0);
        assert_eq!(cropped.num_frames(), 50);
        assert!(buffer.crop(2.0, 3.0).samples().is_empty());
    }

    #[test]
    fn test_resample_doubles_length() {
        let buffer = AudioBuffer::new(vec![0.0, 1.0, 0.0], 1, 100).unwrap();
        let resampled = buffer.resample(200);

        assert_eq!(resampled.sample_rate(), 200);
        assert_eq!(resampled.num_frames(), 6);
        assert!((resampled.samples()[1] - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let buffer = AudioBuffer::sine_wave(440.0, 0.1, 8000);
        assert_eq!(buffer.resample(8000), buffer);
    }
}
