//! Model persistence
//!
//! A model file is a JSON envelope around an ordered list of tagged fields:
//!
//! ```text
//! { "type_tag": "rnn-talk.Talker", "version": 1, "saved_at": ..., "checksum": ...,
//!   "fields": [ {"type": "block", "value": [...]}, {"type": "codec", "value": {...}},
//!               {"type": "int", "value": rate}, {"type": "int", "value": channels},
//!               {"type": "float", "value": min}, {"type": "float", "value": max} ] }
//! ```
//!
//! Loading dispatches on `type_tag` through a [`DeserializerRegistry`]. Any
//! problem with the blob surfaces as [`TalkError::InvalidModelData`].

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use candle_core::Device;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::block::StackedBlock;
use super::stage::StageRecord;
use super::talker::Talker;
use crate::error::{Result, TalkError};
use crate::samples::{AudioFormat, CodecRecord, NormalizationStats, RANGE_EPSILON};

/// Type tag written for talker models
pub const TALKER_TYPE_TAG: &str = "rnn-talk.Talker";

/// Current envelope version
pub const FORMAT_VERSION: u32 = 1;

/// One tagged value of a serialized object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Field {
    Block(Vec<StageRecord>),
    Codec(CodecRecord),
    Int(i64),
    Float(f64),
}

impl Field {
    fn type_name(&self) -> &'static str {
        match self {
            Field::Block(_) => "block",
            Field::Codec(_) => "codec",
            Field::Int(_) => "int",
            Field::Float(_) => "float",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    type_tag: String,
    version: u32,
    saved_at: DateTime<Utc>,
    checksum: String,
    fields: Vec<Field>,
}

/// SHA-256 over the bit patterns of every field, hex encoded
pub fn fields_checksum(fields: &[Field]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((fields.len() as u64).to_le_bytes());
    for field in fields {
        hasher.update(field.type_name().as_bytes());
        match field {
            Field::Block(records) => {
                hasher.update((records.len() as u64).to_le_bytes());
                for record in records {
                    record.hash_into(&mut hasher);
                }
            }
            Field::Codec(CodecRecord::Pca {
                chunk_size,
                components,
                basis,
            }) => {
                hasher.update(b"pca");
                hasher.update((*chunk_size as u64).to_le_bytes());
                hasher.update((*components as u64).to_le_bytes());
                for v in basis {
                    hasher.update(v.to_bits().to_le_bytes());
                }
            }
            Field::Codec(CodecRecord::OneHot { bins }) => {
                hasher.update(b"one_hot");
                hasher.update((*bins as u64).to_le_bytes());
            }
            Field::Int(v) => hasher.update(v.to_le_bytes()),
            Field::Float(v) => hasher.update(v.to_bits().to_le_bytes()),
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Field list for a talker, in persisted order
pub fn talker_fields(talker: &Talker) -> Result<Vec<Field>> {
    Ok(vec![
        Field::Block(talker.block.to_records()?),
        Field::Codec(talker.codec.to_record()?),
        Field::Int(talker.sample_rate as i64),
        Field::Int(talker.channels as i64),
        Field::Float(talker.min),
        Field::Float(talker.max),
    ])
}

/// Serialize a talker into a self-describing blob
pub fn serialize_talker(talker: &Talker) -> Result<Vec<u8>> {
    let fields = talker_fields(talker)?;
    let envelope = Envelope {
        type_tag: TALKER_TYPE_TAG.to_string(),
        version: FORMAT_VERSION,
        saved_at: Utc::now(),
        checksum: fields_checksum(&fields),
        fields,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

fn talker_from_fields(fields: Vec<Field>) -> Result<Talker> {
    let [block, codec, rate, channels, min, max]: [Field; 6] =
        fields.try_into().map_err(|_| TalkError::InvalidModelData)?;

    let (
        Field::Block(records),
        Field::Codec(codec),
        Field::Int(rate),
        Field::Int(channels),
        Field::Float(min),
        Field::Float(max),
    ) = (block, codec, rate, channels, min, max)
    else {
        return Err(TalkError::InvalidModelData);
    };

    let sample_rate = u32::try_from(rate).map_err(|_| TalkError::InvalidModelData)?;
    let channels = u16::try_from(channels).map_err(|_| TalkError::InvalidModelData)?;
    if sample_rate == 0 || channels == 0 || !min.is_finite() || !max.is_finite() || max < min {
        return Err(TalkError::InvalidModelData);
    }

    let codec = codec.into_codec()?;
    let block = StackedBlock::from_records(records, Device::Cpu)?;
    if block.input_width() != codec.encoded_size() || block.output_width() != codec.encoded_size() {
        return Err(TalkError::InvalidModelData);
    }

    let stats = if max > min {
        NormalizationStats { min, max }
    } else {
        NormalizationStats {
            min,
            max: min + RANGE_EPSILON,
        }
    };
    Ok(Talker::from_parts(
        block,
        Arc::from(codec),
        AudioFormat {
            channels,
            sample_rate,
        },
        stats,
    ))
}

/// Builds a talker from a checked field list
pub type Constructor = fn(Vec<Field>) -> Result<Talker>;

/// Static table from type tag to constructor
pub struct DeserializerRegistry {
    table: HashMap<&'static str, Constructor>,
}

impl DeserializerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Registry knowing every persisted type of this crate
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TALKER_TYPE_TAG, talker_from_fields);
        registry
    }

    pub fn register(&mut self, type_tag: &'static str, constructor: Constructor) {
        self.table.insert(type_tag, constructor);
    }

    pub fn has_type(&self, type_tag: &str) -> bool {
        self.table.contains_key(type_tag)
    }

    /// Decode a blob, verifying tag, version and checksum before
    /// constructing anything
    pub fn deserialize(&self, data: &[u8]) -> Result<Talker> {
        self.try_deserialize(data).map_err(|e| {
            debug!("Rejected model data: {}", e);
            TalkError::InvalidModelData
        })
    }

    fn try_deserialize(&self, data: &[u8]) -> Result<Talker> {
        let envelope: Envelope = serde_json::from_slice(data)?;
        let constructor = self
            .table
            .get(envelope.type_tag.as_str())
            .ok_or(TalkError::InvalidModelData)?;
        if envelope.version != FORMAT_VERSION {
            return Err(TalkError::InvalidModelData);
        }
        if fields_checksum(&envelope.fields) != envelope.checksum {
            return Err(TalkError::InvalidModelData);
        }
        constructor(envelope.fields)
    }
}

impl Default for DeserializerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Write a talker to `path`
pub fn save_talker(talker: &Talker, path: &Path) -> Result<()> {
    let data = serialize_talker(talker)?;
    fs::write(path, data)?;
    info!("Saved model to {}", path.display());
    Ok(())
}

/// Read a talker from `path`
pub fn load_talker(path: &Path) -> Result<Talker> {
    let data = fs::read(path)?;
    DeserializerRegistry::with_defaults().deserialize(&data)
}
