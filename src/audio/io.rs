//! Audio file I/O operations
//!
//! Handles loading and saving WAV files using the hound crate.

use crate::audio::AudioBuffer;
use crate::error::{Result, TalkError};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

/// Load a WAV file into an AudioBuffer
pub fn read_sound_file<P: AsRef<Path>>(path: P) -> Result<AudioBuffer> {
    let path = path.as_ref();
    let read_error = |e: hound::Error| TalkError::AudioReadError {
        path: path.display().to_string(),
        source: e,
    };
    let reader = WavReader::open(path).map_err(read_error)?;

    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map_err(read_error))
            .collect::<Result<Vec<f32>>>()?,
        SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            if bits == 0 || bits > 32 {
                return Err(TalkError::UnsupportedFormat {
                    details: format!("{}-bit integer audio", bits),
                });
            }
            let max_val = (1u64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val).map_err(read_error))
                .collect::<Result<Vec<f32>>>()?
        }
    };

    AudioBuffer::new(samples, spec.channels, spec.sample_rate)
}

/// Save an AudioBuffer to a WAV file with the given bit depth.
///
/// 32 bits writes IEEE float; 8, 16 and 24 bits write clamped PCM.
pub fn write_sound_file<P: AsRef<Path>>(buffer: &AudioBuffer, path: P, bits: u16) -> Result<()> {
    let path = path.as_ref();
    let write_error = |e: hound::Error| TalkError::AudioWriteError {
        path: path.display().to_string(),
        source: e,
    };

    let sample_format = match bits {
        32 => SampleFormat::Float,
        8 | 16 | 24 => SampleFormat::Int,
        _ => {
            return Err(TalkError::UnsupportedFormat {
                details: format!("{}-bit output (only 8, 16, 24, 32 supported)", bits),
            })
        }
    };
    let spec = WavSpec {
        channels: buffer.channels(),
        sample_rate: buffer.sample_rate(),
        bits_per_sample: bits,
        sample_format,
    };

    let mut writer = WavWriter::create(path, spec).map_err(write_error)?;

    match sample_format {
        SampleFormat::Float => {
            for &sample in buffer.samples() {
                writer.write_sample(sample).map_err(write_error)?;
            }
        }
        SampleFormat::Int => {
            let max_val = ((1u32 << (bits - 1)) - 1) as f32;
            for &sample in buffer.samples() {
                let int_sample = (sample.clamp(-1.0, 1.0) * max_val) as i32;
                writer.write_sample(int_sample).map_err(write_error)?;
            }
        }
    }

    writer.finalize().map_err(write_error)?;

    Ok(())
}
