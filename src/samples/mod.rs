//! Sample pipeline
//!
//! Turns a directory of WAV files into fixed-width training sequences:
//! codecs encode raw windows, the cache memoizes decoded files, and the
//! builder chops, frames and normalizes.

pub mod builder;
pub mod cache;
pub mod codec;
pub mod sequence;

pub use builder::{chunk_spans, list_audio_files, read_sounds, BuiltSamples, SequenceBuilder};
pub use cache::SampleCache;
pub use codec::{CodecRecord, OneHotCodec, PcaCodec, SampleCodec, TargetKind};
pub use sequence::{
    AudioFormat, LazySampleSet, NormalizationStats, RangeAccumulator, SampleInfo,
    SampleMoments, SampleSet, Sequence, SliceSampleSet, RANGE_EPSILON,
};
