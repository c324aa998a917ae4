//! Sample directory → training sequences
//!
//! Reads every WAV file in a directory, chops it into fixed-duration chunks,
//! frames each chunk for the codec and normalizes the result with one global
//! range.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use walkdir::WalkDir;

use super::cache::SampleCache;
use super::codec::{SampleCodec, TargetKind};
use super::sequence::{
    AudioFormat, LazySampleSet, NormalizationStats, RangeAccumulator, SampleInfo, SampleSet,
    Sequence, SliceSampleSet,
};
use crate::audio::AudioBuffer;
use crate::config::SampleConfig;
use crate::error::{Result, TalkError};

/// Everything the trainer needs from a sample directory
pub struct BuiltSamples {
    pub set: Box<dyn SampleSet>,
    pub stats: NormalizationStats,
    pub format: AudioFormat,
}

/// List the WAV files directly inside `dir`, sorted by name.
///
/// Hidden entries and other extensions are skipped.
pub fn list_audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| match e.into_io_error() {
            Some(io) => TalkError::IoError(io),
            None => TalkError::NoAudioFiles {
                dir: dir.display().to_string(),
            },
        })?;
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || !entry.file_type().is_file() {
            continue;
        }
        let is_wav = entry
            .path()
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if is_wav {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Read every audio file of a directory through the cache, checking that
/// they share one format.
pub fn read_sounds(dir: &Path, cache: &SampleCache) -> Result<Vec<(PathBuf, AudioBuffer)>> {
    let files = list_audio_files(dir)?;
    if files.is_empty() {
        return Err(TalkError::NoAudioFiles {
            dir: dir.display().to_string(),
        });
    }

    let mut sounds = Vec::with_capacity(files.len());
    for path in files {
        let sound = cache.read_file(&path)?;
        sounds.push((path, sound));
    }

    let (first_path, first) = &sounds[0];
    for (path, sound) in &sounds[1..] {
        if sound.channels() != first.channels() {
            return Err(TalkError::FormatMismatch {
                reason: format!(
                    "{} has {} channels but {} has {}",
                    path.display(),
                    sound.channels(),
                    first_path.display(),
                    first.channels()
                ),
            });
        }
        if sound.sample_rate() != first.sample_rate() {
            return Err(TalkError::FormatMismatch {
                reason: format!(
                    "{} is {} Hz but {} is {} Hz",
                    path.display(),
                    sound.sample_rate(),
                    first_path.display(),
                    first.sample_rate()
                ),
            });
        }
    }

    Ok(sounds)
}

/// Chunk boundaries in seconds for a clip of `duration` seconds.
///
/// A trailing partial chunk is dropped unless the clip is shorter than one
/// chunk, in which case the whole clip is a single chunk.
pub fn chunk_spans(duration: f64, chunk_seconds: f64) -> Vec<(f64, f64)> {
    if duration <= 0.0 {
        return Vec::new();
    }
    if duration < chunk_seconds {
        return vec![(0.0, duration)];
    }
    let count = (duration / chunk_seconds).floor() as usize;
    (0..count)
        .map(|i| (i as f64 * chunk_seconds, (i + 1) as f64 * chunk_seconds))
        .collect()
}

/// Turns a directory of audio files into a normalized sample set
pub struct SequenceBuilder {
    codec: Arc<dyn SampleCodec>,
    cache: Arc<SampleCache>,
    config: SampleConfig,
    fixed_stats: Option<NormalizationStats>,
}

impl SequenceBuilder {
    pub fn new(codec: Arc<dyn SampleCodec>, cache: Arc<SampleCache>, config: SampleConfig) -> Self {
        Self {
            codec,
            cache,
            config,
            fixed_stats: None,
        }
    }

    /// Normalize with an existing range instead of measuring one, so that
    /// a saved model keeps seeing data on the scale it was trained on
    pub fn with_stats(mut self, stats: NormalizationStats) -> Self {
        self.fixed_stats = Some(stats);
        self
    }

    /// Chunk duration for this builder's codec
    pub fn chunk_seconds(&self) -> f64 {
        match self.codec.target_kind() {
            TargetKind::Continuous => self.config.chunk_seconds,
            TargetKind::Categorical => self.config.discrete_chunk_seconds,
        }
    }

    /// Build sequences, normalization range and format for `dir`
    pub fn build(&self, dir: &Path) -> Result<BuiltSamples> {
        let sounds = read_sounds(dir, &self.cache)?;
        let format = AudioFormat {
            channels: sounds[0].1.channels(),
            sample_rate: sounds[0].1.sample_rate(),
        };
        let chunk_seconds = self.chunk_seconds();

        let (set, stats): (Box<dyn SampleSet>, NormalizationStats) = if self.config.lazy {
            let infos: Vec<SampleInfo> = sounds
                .iter()
                .flat_map(|(path, sound)| {
                    chunk_spans(sound.duration(), chunk_seconds)
                        .into_iter()
                        .map(move |(start, end)| SampleInfo {
                            path: path.clone(),
                            start,
                            end,
                        })
                })
                .collect();
            let mut set = LazySampleSet::new(infos, Arc::clone(&self.cache), Arc::clone(&self.codec));
            let stats = match self.fixed_stats {
                Some(stats) => stats,
                None => {
                    let mut range = RangeAccumulator::default();
                    for i in 0..set.len() {
                        range.observe(&set.sequence(i)?);
                    }
                    range.finish()
                }
            };
            set.set_stats(stats);
            (Box::new(set), stats)
        } else {
            let mut sequences = Vec::new();
            for (_, sound) in &sounds {
                for (start, end) in chunk_spans(sound.duration(), chunk_seconds) {
                    let chunk = sound.crop(start, end);
                    sequences.push(Sequence::from_buffer(&chunk, self.codec.as_ref())?);
                }
            }
            let stats = self
                .fixed_stats
                .unwrap_or_else(|| NormalizationStats::measure(&sequences));
            for sequence in &mut sequences {
                stats.apply(sequence);
            }
            (Box::new(SliceSampleSet::new(sequences)), stats)
        };

        info!(
            "Built {} sequences from {} files ({} ch, {} Hz)",
            set.len(),
            sounds.len(),
            format.channels,
            format.sample_rate
        );

        Ok(BuiltSamples { set, stats, format })
    }
}
