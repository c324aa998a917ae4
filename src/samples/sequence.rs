//! Training sequences and sample sets

use std::path::PathBuf;
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};

use super::cache::SampleCache;
use super::codec::{SampleCodec, TargetKind};
use crate::audio::AudioBuffer;
use crate::error::Result;

/// Range added to `max` when every observed value is identical
pub const RANGE_EPSILON: f64 = 1e-6;

/// One training example: `outputs[t]` is predicted from `inputs[t]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence {
    pub inputs: Vec<Vec<f32>>,
    pub outputs: Vec<Vec<f32>>,
}

impl Sequence {
    /// Number of timesteps
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Vector width, if the sequence has at least one step
    pub fn width(&self) -> Option<usize> {
        self.outputs.first().map(Vec::len)
    }

    /// Frame a buffer for the codec's prediction task.
    ///
    /// Continuous codecs predict window `t` from window `t-1` (zeros at the
    /// start). Categorical codecs predict sample `t+1` from sample `t`.
    pub fn from_buffer(buffer: &AudioBuffer, codec: &dyn SampleCodec) -> Result<Self> {
        let samples = buffer.samples();
        let mut sequence = Sequence::default();

        match codec.target_kind() {
            TargetKind::Continuous => {
                let mut previous = vec![0.0; codec.encoded_size()];
                for window in samples.chunks_exact(codec.window_size()) {
                    let encoded = codec.encode(window)?;
                    sequence.inputs.push(std::mem::replace(&mut previous, encoded.clone()));
                    sequence.outputs.push(encoded);
                }
            }
            TargetKind::Categorical => {
                let encoded = samples
                    .chunks_exact(codec.window_size())
                    .map(|window| codec.encode(window))
                    .collect::<Result<Vec<_>>>()?;
                if encoded.len() > 1 {
                    sequence.inputs = encoded[..encoded.len() - 1].to_vec();
                    sequence.outputs = encoded[1..].to_vec();
                }
            }
        }

        Ok(sequence)
    }
}

/// Shared format of every file in a sample directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub channels: u16,
    pub sample_rate: u32,
}

/// Global output range used to map values into `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub min: f64,
    pub max: f64,
}

impl NormalizationStats {
    /// Build from an observed range, widening a degenerate one
    pub fn from_range(min: f64, max: f64) -> Self {
        if max > min {
            Self { min, max }
        } else {
            Self {
                min,
                max: min + RANGE_EPSILON,
            }
        }
    }

    /// Measure the range of every output component of a sequence list
    pub fn measure<'a, I>(sequences: I) -> Self
    where
        I: IntoIterator<Item = &'a Sequence>,
    {
        let mut range = RangeAccumulator::default();
        for sequence in sequences {
            range.observe(sequence);
        }
        range.finish()
    }

    pub fn normalize(&self, x: f32) -> f32 {
        ((x as f64 - self.min) / (self.max - self.min)) as f32
    }

    pub fn denormalize(&self, x: f32) -> f32 {
        (self.min + x as f64 * (self.max - self.min)) as f32
    }

    /// Normalize every vector of a sequence in place
    pub fn apply(&self, sequence: &mut Sequence) {
        for vec in sequence.inputs.iter_mut().chain(sequence.outputs.iter_mut()) {
            for x in vec.iter_mut() {
                *x = self.normalize(*x);
            }
        }
    }
}

/// Running min/max over output components, one sequence at a time
#[derive(Debug, Clone, Copy)]
pub struct RangeAccumulator {
    min: f64,
    max: f64,
}

impl Default for RangeAccumulator {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl RangeAccumulator {
    pub fn observe(&mut self, sequence: &Sequence) {
        for &x in sequence.outputs.iter().flatten() {
            self.min = self.min.min(x as f64);
            self.max = self.max.max(x as f64);
        }
    }

    /// Range seen so far; an empty range becomes `[0, epsilon]`
    pub fn finish(self) -> NormalizationStats {
        if self.min > self.max {
            return NormalizationStats::from_range(0.0, 0.0);
        }
        NormalizationStats::from_range(self.min, self.max)
    }
}

/// Mean and standard deviation of all output components
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleMoments {
    pub mean: f64,
    pub stddev: f64,
}

impl SampleMoments {
    /// Measure over every sequence of a sample set
    pub fn measure(set: &dyn SampleSet) -> Result<Self> {
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut count = 0usize;
        for i in 0..set.len() {
            let sequence = set.sequence(i)?;
            for &x in sequence.outputs.iter().flatten() {
                sum += x as f64;
                sum_sq += (x as f64) * (x as f64);
                count += 1;
            }
        }
        if count == 0 {
            return Ok(Self {
                mean: 0.0,
                stddev: 1.0,
            });
        }
        let mean = sum / count as f64;
        let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
        let mut stddev = variance.sqrt();
        if stddev == 0.0 {
            warn!("Sample outputs have zero variance, using unit scale");
            stddev = 1.0;
        }
        Ok(Self { mean, stddev })
    }
}

/// Indexed collection of training sequences
pub trait SampleSet: Send + Sync {
    fn len(&self) -> usize;

    /// Materialize the sequence at `index`
    fn sequence(&self, index: usize) -> Result<Sequence>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sample set whose sequences are held in memory
#[derive(Debug, Clone, Default)]
pub struct SliceSampleSet {
    sequences: Vec<Sequence>,
}

impl SliceSampleSet {
    pub fn new(sequences: Vec<Sequence>) -> Self {
        Self { sequences }
    }

    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }
}

impl SampleSet for SliceSampleSet {
    fn len(&self) -> usize {
        self.sequences.len()
    }

    fn sequence(&self, index: usize) -> Result<Sequence> {
        Ok(self.sequences[index].clone())
    }
}

/// Where a lazily materialized chunk lives
#[derive(Debug, Clone, PartialEq)]
pub struct SampleInfo {
    pub path: PathBuf,
    /// Start offset in seconds
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
}

/// Sample set that decodes chunks through the cache on demand
#[derive(Debug)]
pub struct LazySampleSet {
    infos: Vec<SampleInfo>,
    cache: Arc<SampleCache>,
    codec: Arc<dyn SampleCodec>,
    stats: Option<NormalizationStats>,
}

impl LazySampleSet {
    pub fn new(infos: Vec<SampleInfo>, cache: Arc<SampleCache>, codec: Arc<dyn SampleCodec>) -> Self {
        Self {
            infos,
            cache,
            codec,
            stats: None,
        }
    }

    pub fn infos(&self) -> &[SampleInfo] {
        &self.infos
    }

    /// Normalize every sequence materialized from now on
    pub fn set_stats(&mut self, stats: NormalizationStats) {
        self.stats = Some(stats);
    }
}

impl SampleSet for LazySampleSet {
    fn len(&self) -> usize {
        self.infos.len()
    }

    fn sequence(&self, index: usize) -> Result<Sequence> {
        let info = &self.infos[index];
        let buffer = self.cache.read_file(&info.path)?.crop(info.start, info.end);
        let mut sequence = Sequence::from_buffer(&buffer, self.codec.as_ref())?;
        if let Some(stats) = &self.stats {
            stats.apply(&mut sequence);
        }
        Ok(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::codec::{OneHotCodec, PcaCodec};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_continuous_framing_shifts_by_one_window() {
        let buffer = AudioBuffer::new((0..10).map(|i| i as f32 / 10.0).collect(), 1, 8000).unwrap();
        let codec = PcaCodec::truncating(3, 2).unwrap();

        let sequence = Sequence::from_buffer(&buffer, &codec).unwrap();
        assert_eq!(sequence.len(), 3);
        assert_eq!(sequence.inputs.len(), sequence.outputs.len());
        assert_eq!(sequence.inputs[0], vec![0.0, 0.0]);
        assert_eq!(sequence.inputs[1], sequence.outputs[0]);
        assert_eq!(sequence.inputs[2], sequence.outputs[1]);
        assert_abs_diff_eq!(sequence.outputs[1][0], 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_categorical_framing_predicts_next_sample() {
        let buffer = AudioBuffer::new(vec![-1.0, 0.0, 1.0, 0.0], 1, 8000).unwrap();
        let codec = OneHotCodec::new(3);

        let sequence = Sequence::from_buffer(&buffer, &codec).unwrap();
        assert_eq!(sequence.len(), 3);
        assert_eq!(sequence.inputs[0], vec![1.0, 0.0, 0.0]);
        assert_eq!(sequence.outputs[0], vec![0.0, 1.0, 0.0]);
        assert_eq!(sequence.inputs[1], sequence.outputs[0]);
        assert_eq!(sequence.outputs[2], vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_stats_map_into_unit_range() {
        let mut sequence = Sequence {
            inputs: vec![vec![0.0, 2.0], vec![-2.0, 4.0]],
            outputs: vec![vec![-2.0, 4.0], vec![1.0, -1.0]],
        };
        let stats = NormalizationStats::measure([&sequence]);
        assert_eq!(stats, NormalizationStats { min: -2.0, max: 4.0 });

        stats.apply(&mut sequence);
        for x in sequence.outputs.iter().flatten() {
            assert!((0.0..=1.0).contains(x));
        }
        assert_abs_diff_eq!(stats.denormalize(stats.normalize(1.5)), 1.5, epsilon = 1e-6);
    }

    #[test]
    fn test_degenerate_range_is_widened() {
        let sequence = Sequence {
            inputs: vec![vec![0.5; 3]],
            outputs: vec![vec![0.5; 3]],
        };
        let stats = NormalizationStats::measure([&sequence]);
        assert_eq!(stats.min, 0.5);
        assert_eq!(stats.max, 0.5 + RANGE_EPSILON);
        assert_eq!(stats.normalize(0.5), 0.0);
    }

    #[test]
    fn test_moments() {
        let set = SliceSampleSet::new(vec![Sequence {
            inputs: vec![vec![0.0, 0.0], vec![0.0, 0.0]],
            outputs: vec![vec![1.0, 3.0], vec![1.0, 3.0]],
        }]);
        let moments = SampleMoments::measure(&set).unwrap();
        assert_abs_diff_eq!(moments.mean, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(moments.stddev, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_streaming_range_matches_batch() {
        let a = Sequence {
            inputs: vec![vec![0.0]],
            outputs: vec![vec![0.25], vec![-0.5]],
        };
        let b = Sequence {
            inputs: vec![vec![0.0]],
            outputs: vec![vec![0.75]],
        };
        let mut range = RangeAccumulator::default();
        range.observe(&a);
        range.observe(&b);
        assert_eq!(range.finish(), NormalizationStats::measure([&a, &b]));
        assert_eq!(range.finish(), NormalizationStats { min: -0.5, max: 0.75 });
        assert_eq!(RangeAccumulator::default().finish().min, 0.0);
    }
}
