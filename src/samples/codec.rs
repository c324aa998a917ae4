//! Sample codecs
//!
//! A codec maps raw waveform windows into the vectors the network works with
//! and back. Two variants exist: a compressive linear codec whose outputs are
//! continuous, and a one-hot amplitude quantizer whose outputs are
//! categorical.

use std::fmt::Debug;
use std::fs;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::audio::AudioBuffer;
use crate::error::{Result, TalkError};

/// What kind of target a codec produces, which fixes the network head, the
/// cost function, the sequence framing and the decode policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Bounded real vectors, reconstructed deterministically
    Continuous,
    /// One-hot symbols, predicted as a categorical distribution
    Categorical,
}

/// Encode/decode capability shared by every codec
pub trait SampleCodec: Send + Sync + Debug {
    /// Get the codec type identifier
    fn codec_type(&self) -> &'static str;

    /// Raw samples consumed per encoded vector
    fn window_size(&self) -> usize;

    /// Width of an encoded vector
    fn encoded_size(&self) -> usize;

    fn target_kind(&self) -> TargetKind;

    /// Encode exactly `window_size()` raw samples
    fn encode(&self, window: &[f32]) -> Result<Vec<f32>>;

    /// Turn an encoded vector back into `window_size()` raw samples
    fn decode(&self, encoded: &[f32]) -> Result<Vec<f32>>;

    /// Serializable form of this codec
    fn to_record(&self) -> Result<CodecRecord>;
}

/// Serialized codec parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodecRecord {
    Pca {
        chunk_size: usize,
        components: usize,
        /// Row-major `components x chunk_size` basis
        basis: Vec<f32>,
    },
    OneHot {
        bins: usize,
    },
}

impl CodecRecord {
    /// Rebuild the codec, rejecting inconsistent shapes
    pub fn into_codec(self) -> Result<Box<dyn SampleCodec>> {
        match self {
            CodecRecord::Pca {
                chunk_size,
                components,
                basis,
            } => {
                if chunk_size == 0
                    || components == 0
                    || components > chunk_size
                    || basis.len() != chunk_size * components
                    || basis.iter().any(|x| !x.is_finite())
                {
                    return Err(TalkError::InvalidModelData);
                }
                let basis = Tensor::from_vec(basis, (components, chunk_size), &Device::Cpu)?;
                Ok(Box::new(PcaCodec {
                    chunk_size,
                    components,
                    basis,
                }))
            }
            CodecRecord::OneHot { bins } => {
                if bins < 2 {
                    return Err(TalkError::InvalidModelData);
                }
                Ok(Box::new(OneHotCodec::new(bins)))
            }
        }
    }
}

fn check_width(window: &[f32], expected: usize) -> Result<()> {
    if window.len() != expected {
        return Err(TalkError::DimensionMismatch {
            expected,
            actual: window.len(),
        });
    }
    Ok(())
}

// ============================================================================
// Compressive codec
// ============================================================================

/// Linear compressive codec with an orthonormal basis.
///
/// `encode(x) = B x` and `decode(v) = Bᵀ v`, so decoding an encoding projects
/// the window onto the span of the basis.
#[derive(Debug, Clone)]
pub struct PcaCodec {
    chunk_size: usize,
    components: usize,
    /// `components x chunk_size`, f32
    basis: Tensor,
}

const POWER_ITERATIONS: usize = 64;
const DEGENERATE_NORM: f64 = 1e-9;

impl PcaCodec {
    /// Identity basis keeping the first `components` samples of each window
    pub fn truncating(chunk_size: usize, components: usize) -> Result<Self> {
        let components = components.min(chunk_size);
        let mut rows = vec![0.0f32; components * chunk_size];
        for k in 0..components {
            rows[k * chunk_size + k] = 1.0;
        }
        let basis = Tensor::from_vec(rows, (components, chunk_size), &Device::Cpu)?;
        Ok(Self {
            chunk_size,
            components,
            basis,
        })
    }

    /// Learn a basis from non-overlapping windows of the given buffers.
    ///
    /// The basis is the top `components` eigenvectors of the uncentered
    /// second-moment matrix, found by power iteration. At most `max_windows`
    /// evenly spaced windows are used.
    pub fn fit(
        buffers: &[AudioBuffer],
        chunk_size: usize,
        components: usize,
        max_windows: usize,
    ) -> Result<Self> {
        if chunk_size == 0 || components == 0 || components > chunk_size {
            return Err(TalkError::InvalidConfig {
                reason: format!(
                    "cannot fit {} components over {}-sample windows",
                    components, chunk_size
                ),
            });
        }

        let windows: Vec<&[f32]> = buffers
            .iter()
            .flat_map(|b| b.samples().chunks_exact(chunk_size))
            .collect();
        if windows.is_empty() {
            return Err(TalkError::EmptyBuffer);
        }
        let stride = windows.len().div_ceil(max_windows.max(1));

        let device = Device::Cpu;
        let n = chunk_size;
        let picked: Vec<f64> = windows
            .iter()
            .step_by(stride)
            .flat_map(|w| w.iter().map(|&x| x as f64))
            .collect();
        let count = picked.len() / n;
        let x = Tensor::from_vec(picked, (count, n), &device)?;
        let moment = x.t()?.matmul(&x)?.affine(1.0 / count as f64, 0.0)?;

        let mut found: Vec<Tensor> = Vec::with_capacity(components);
        for k in 0..components {
            let start: Vec<f64> = (0..n).map(|i| 1.0 + ((i + k) % 7) as f64 * 0.1).collect();
            let mut v = orthogonalize(&Tensor::from_vec(start, (n, 1), &device)?, &found)?;
            for _ in 0..POWER_ITERATIONS {
                let next = orthogonalize(&moment.matmul(&v)?, &found)?;
                let (next, norm) = unit(&next)?;
                if norm < DEGENERATE_NORM {
                    break;
                }
                v = next;
            }
            let (mut v, norm) = unit(&orthogonalize(&v, &found)?)?;
            if norm < DEGENERATE_NORM {
                v = fallback_direction(n, &found, &device)?;
            }
            found.push(v.reshape((1, n))?);
        }

        let basis = Tensor::cat(&found, 0)?.to_dtype(DType::F32)?;
        Ok(Self {
            chunk_size,
            components,
            basis,
        })
    }

    /// Load a codec saved with [`PcaCodec::save`]
    pub fn load(path: &Path) -> Result<Box<dyn SampleCodec>> {
        let content = fs::read_to_string(path)?;
        let record: CodecRecord = serde_json::from_str(&content)?;
        match record {
            CodecRecord::Pca { .. } => record.into_codec(),
            CodecRecord::OneHot { .. } => Err(TalkError::InvalidConfig {
                reason: format!("{} does not hold a compressive codec", path.display()),
            }),
        }
    }

    /// Save the codec as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string(&self.to_record()?)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn basis(&self) -> &Tensor {
        &self.basis
    }
}

/// Remove the components of column `v` along the rows in `found`
fn orthogonalize(v: &Tensor, found: &[Tensor]) -> Result<Tensor> {
    if found.is_empty() {
        return Ok(v.clone());
    }
    let q = Tensor::cat(found, 0)?;
    let coefficients = q.matmul(v)?;
    Ok(v.sub(&q.t()?.matmul(&coefficients)?)?)
}

/// Scale to unit length, returning the original norm
fn unit(v: &Tensor) -> Result<(Tensor, f64)> {
    let norm = v.sqr()?.sum_all()?.sqrt()?.to_scalar::<f64>()?;
    if norm >= DEGENERATE_NORM {
        Ok((v.affine(1.0 / norm, 0.0)?, norm))
    } else {
        Ok((v.clone(), norm))
    }
}

/// First unit vector that is not already spanned by `found`
fn fallback_direction(n: usize, found: &[Tensor], device: &Device) -> Result<Tensor> {
    for i in 0..n {
        let mut e = vec![0.0f64; n];
        e[i] = 1.0;
        let (v, norm) = unit(&orthogonalize(&Tensor::from_vec(e, (n, 1), device)?, found)?)?;
        if norm > 1e-3 {
            return Ok(v);
        }
    }
    Ok(Tensor::zeros((n, 1), DType::F64, device)?)
}

impl SampleCodec for PcaCodec {
    fn codec_type(&self) -> &'static str {
        "pca"
    }

    fn window_size(&self) -> usize {
        self.chunk_size
    }

    fn encoded_size(&self) -> usize {
        self.components
    }

    fn target_kind(&self) -> TargetKind {
        TargetKind::Continuous
    }

    fn encode(&self, window: &[f32]) -> Result<Vec<f32>> {
        check_width(window, self.chunk_size)?;
        let x = Tensor::from_slice(window, (self.chunk_size, 1), self.basis.device())?;
        let encoded = self.basis.matmul(&x)?.flatten_all()?.to_vec1::<f32>()?;
        Ok(encoded
            .into_iter()
            .map(|v| if v.is_finite() { v } else { 0.0 })
            .collect())
    }

    fn decode(&self, encoded: &[f32]) -> Result<Vec<f32>> {
        check_width(encoded, self.components)?;
        let v = Tensor::from_slice(encoded, (1, self.components), self.basis.device())?;
        Ok(v.matmul(&self.basis)?.flatten_all()?.to_vec1::<f32>()?)
    }

    fn to_record(&self) -> Result<CodecRecord> {
        Ok(CodecRecord::Pca {
            chunk_size: self.chunk_size,
            components: self.components,
            basis: self.basis.flatten_all()?.to_vec1::<f32>()?,
        })
    }
}

// ============================================================================
// One-hot codec
// ============================================================================

/// Quantizes single samples to `bins` evenly spaced levels in [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneHotCodec {
    bins: usize,
}

impl OneHotCodec {
    pub fn new(bins: usize) -> Self {
        Self { bins: bins.max(2) }
    }

    /// Quantization level for a sample
    pub fn index_of(&self, sample: f32) -> usize {
        let clamped = if sample.is_finite() {
            sample.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let scaled = (clamped + 1.0) / 2.0 * (self.bins - 1) as f32;
        (scaled.round() as usize).min(self.bins - 1)
    }

    /// Sample value at a quantization level
    pub fn sample_at(&self, index: usize) -> f32 {
        let index = index.min(self.bins - 1);
        index as f32 / (self.bins - 1) as f32 * 2.0 - 1.0
    }

    /// Unit vector for a quantization level
    pub fn one_hot(&self, index: usize) -> Vec<f32> {
        let mut v = vec![0.0; self.bins];
        v[index.min(self.bins - 1)] = 1.0;
        v
    }
}

impl SampleCodec for OneHotCodec {
    fn codec_type(&self) -> &'static str {
        "one_hot"
    }

    fn window_size(&self) -> usize {
        1
    }

    fn encoded_size(&self) -> usize {
        self.bins
    }

    fn target_kind(&self) -> TargetKind {
        TargetKind::Categorical
    }

    fn encode(&self, window: &[f32]) -> Result<Vec<f32>> {
        check_width(window, 1)?;
        Ok(self.one_hot(self.index_of(window[0])))
    }

    fn decode(&self, encoded: &[f32]) -> Result<Vec<f32>> {
        let index = encoded
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &x)| {
                if x > best.1 {
                    (i, x)
                } else {
                    best
                }
            })
            .0;
        Ok(vec![self.sample_at(index)])
    }

    fn to_record(&self) -> Result<CodecRecord> {
        Ok(CodecRecord::OneHot { bins: self.bins })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;
    use test_case::test_case;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test_case(-1.0, 0 ; "bottom")]
    #[test_case(1.0, 255 ; "top")]
    #[test_case(5.0, 255 ; "clamped above")]
    #[test_case(-3.0, 0 ; "clamped below")]
    fn test_one_hot_index(sample: f32, expected: usize) {
        assert_eq!(OneHotCodec::new(256).index_of(sample), expected);
    }

    #[test]
    fn test_one_hot_single_nonzero() {
        let codec = OneHotCodec::new(128);
        for &s in &[-0.9f32, -0.1, 0.0, 0.33, 0.99] {
            let encoded = codec.encode(&[s]).unwrap();
            assert_eq!(encoded.len(), 128);
            assert_eq!(encoded.iter().filter(|&&x| x != 0.0).count(), 1);

            let decoded = codec.decode(&encoded).unwrap();
            assert_eq!(decoded.len(), 1);
            assert!((decoded[0] - s).abs() <= 1.0 / 127.0 + 1e-6);
        }
    }

    #[test]
    fn test_one_hot_rejects_wide_window() {
        let codec = OneHotCodec::new(256);
        assert!(matches!(
            codec.encode(&[0.0, 0.0]),
            Err(TalkError::DimensionMismatch { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn test_full_rank_pca_is_exact() {
        let tone = AudioBuffer::sine_wave(440.0, 0.2, 8000);
        let codec = PcaCodec::fit(&[tone.clone()], 16, 16, 1000).unwrap();

        for window in tone.samples().chunks_exact(16).take(10) {
            let decoded = codec.decode(&codec.encode(window).unwrap()).unwrap();
            assert_eq!(decoded.len(), 16);
            for (a, b) in window.iter().zip(&decoded) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_pca_reconstruction_is_bounded() {
        let tone = AudioBuffer::sine_wave(300.0, 0.5, 8000);
        let codec = PcaCodec::fit(&[tone.clone()], 32, 4, 1000).unwrap();

        for window in tone.samples().chunks_exact(32).take(20) {
            let encoded = codec.encode(window).unwrap();
            assert_eq!(encoded.len(), 4);
            assert!(encoded.iter().all(|x| x.is_finite()));

            let decoded = codec.decode(&encoded).unwrap();
            let error: Vec<f32> = window.iter().zip(&decoded).map(|(a, b)| a - b).collect();
            assert!(norm(&error) <= norm(window) + 1e-4);
        }
    }

    #[test]
    fn test_pca_basis_is_orthonormal_on_silence() {
        let silence = AudioBuffer::silence(0.1, 1, 8000);
        let codec = PcaCodec::fit(&[silence], 8, 3, 100).unwrap();
        let basis = codec.basis();
        let gram = basis.matmul(&basis.t().unwrap()).unwrap().to_vec2::<f32>().unwrap();
        for (i, row) in gram.iter().enumerate() {
            for (j, &dot) in row.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(dot, expected, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_truncating_codec() {
        let codec = PcaCodec::truncating(4, 2).unwrap();
        assert_eq!(codec.encode(&[0.5, -0.5, 0.25, 0.1]).unwrap(), vec![0.5, -0.5]);
        assert_eq!(codec.decode(&[0.5, -0.5]).unwrap(), vec![0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_decode_rejects_wrong_width() {
        let codec = PcaCodec::truncating(4, 2).unwrap();
        assert!(matches!(
            codec.decode(&[1.0, 2.0, 3.0]),
            Err(TalkError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_codec_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("codec.json");
        let codec = PcaCodec::truncating(8, 3).unwrap();
        codec.save(&path).unwrap();

        let loaded = PcaCodec::load(&path).unwrap();
        assert_eq!(loaded.to_record().unwrap(), codec.to_record().unwrap());
    }

    #[test]
    fn test_bad_record_rejected() {
        let record = CodecRecord::Pca {
            chunk_size: 4,
            components: 2,
            basis: vec![0.0; 7],
        };
        assert!(matches!(
            record.into_codec(),
            Err(TalkError::InvalidModelData)
        ));
    }
}
