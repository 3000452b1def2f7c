//! # Serializer
//!
//! Type-aware value encoding. Vector data types are stored as packed
//! little-endian `f64` so embeddings round-trip bit-exactly; everything
//! else is JSON.
//!
//! Array-like inputs reach the vector path through the [`Flattenable`]
//! capability. Device-resident tensors implement [`HostTransfer`] and are
//! wrapped in [`OnHost`], which detaches to host memory before flattening.

use crate::config::SerializerConfig;
use crate::error::{CacheError, CacheResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

const F64_WIDTH: usize = std::mem::size_of::<f64>();

/// A cached value as seen by callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheValue {
    /// Flat numeric vector (embeddings)
    Vector(Vec<f64>),
    /// Any JSON-shaped value
    Structured(serde_json::Value),
}

impl CacheValue {
    /// Serialize any `Serialize` type into a structured value
    pub fn structured<T: Serialize>(value: &T) -> CacheResult<Self> {
        serde_json::to_value(value)
            .map(CacheValue::Structured)
            .map_err(|e| CacheError::serialization("structured", e))
    }

    /// Normalize an array-like input into a flat vector
    pub fn vector<F: Flattenable + ?Sized>(value: &F) -> CacheResult<Self> {
        value
            .flatten()
            .map(CacheValue::Vector)
            .map_err(|e| CacheError::serialization("vector", e))
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            CacheValue::Structured(value) => Some(value),
            CacheValue::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            CacheValue::Vector(values) => Some(values),
            CacheValue::Structured(_) => None,
        }
    }

    pub fn into_vector(self) -> CacheResult<Vec<f64>> {
        match self {
            CacheValue::Vector(values) => Ok(values),
            CacheValue::Structured(json) => json
                .flatten()
                .map_err(|e| CacheError::serialization("vector", e)),
        }
    }

    /// Deserialize into a caller type
    pub fn into_typed<T: DeserializeOwned>(self) -> CacheResult<T> {
        let json = match self {
            CacheValue::Structured(json) => json,
            CacheValue::Vector(values) => serde_json::Value::from(values),
        };
        serde_json::from_value(json).map_err(|e| CacheError::serialization("structured", e))
    }
}

impl From<serde_json::Value> for CacheValue {
    fn from(value: serde_json::Value) -> Self {
        CacheValue::Structured(value)
    }
}

impl From<Vec<f64>> for CacheValue {
    fn from(values: Vec<f64>) -> Self {
        CacheValue::Vector(values)
    }
}

#[derive(Debug, Error)]
#[error("cannot flatten value: {0}")]
pub struct FlattenError(pub String);

/// Capability of producing a flat, ordered sequence of `f64`.
///
/// Nested containers flatten row-major.
pub trait Flattenable {
    fn flatten(&self) -> Result<Vec<f64>, FlattenError> {
        let mut out = Vec::new();
        self.flatten_into(&mut out)?;
        Ok(out)
    }

    fn flatten_into(&self, out: &mut Vec<f64>) -> Result<(), FlattenError>;
}

impl Flattenable for f64 {
    fn flatten_into(&self, out: &mut Vec<f64>) -> Result<(), FlattenError> {
        out.push(*self);
        Ok(())
    }
}

impl Flattenable for f32 {
    fn flatten_into(&self, out: &mut Vec<f64>) -> Result<(), FlattenError> {
        out.push(f64::from(*self));
        Ok(())
    }
}

impl<T: Flattenable> Flattenable for [T] {
    fn flatten_into(&self, out: &mut Vec<f64>) -> Result<(), FlattenError> {
        self.iter().try_for_each(|item| item.flatten_into(out))
    }
}

impl<T: Flattenable, const N: usize> Flattenable for [T; N] {
    fn flatten_into(&self, out: &mut Vec<f64>) -> Result<(), FlattenError> {
        self.as_slice().flatten_into(out)
    }
}

impl<T: Flattenable> Flattenable for Vec<T> {
    fn flatten_into(&self, out: &mut Vec<f64>) -> Result<(), FlattenError> {
        self.as_slice().flatten_into(out)
    }
}

impl Flattenable for serde_json::Value {
    fn flatten_into(&self, out: &mut Vec<f64>) -> Result<(), FlattenError> {
        match self {
            serde_json::Value::Number(number) => {
                let value = number
                    .as_f64()
                    .ok_or_else(|| FlattenError(format!("non-finite number {number}")))?;
                out.push(value);
                Ok(())
            }
            serde_json::Value::Array(items) => items.as_slice().flatten_into(out),
            other => Err(FlattenError(format!(
                "expected number or array, found {}",
                json_kind(other)
            ))),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Tensors living in device memory that must be copied to the host before
/// their contents can be listed
pub trait HostTransfer {
    type Host: Flattenable;

    fn to_host(&self) -> Result<Self::Host, FlattenError>;
}

/// Adapter giving any [`HostTransfer`] type the [`Flattenable`] capability
#[derive(Debug, Clone)]
pub struct OnHost<T>(pub T);

impl<T: HostTransfer> Flattenable for OnHost<T> {
    fn flatten_into(&self, out: &mut Vec<f64>) -> Result<(), FlattenError> {
        self.0.to_host()?.flatten_into(out)
    }
}

/// Encode/decode pair. A caller-supplied codec replaces the default
/// [`Serializer`] for one orchestrator call.
pub trait ValueCodec: Send + Sync {
    fn encode(&self, value: &CacheValue, data_type: &str) -> CacheResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8], data_type: &str) -> CacheResult<CacheValue>;
}

/// Default codec: packed floats for vector types, JSON otherwise
#[derive(Debug, Clone)]
pub struct Serializer {
    vector_types: HashSet<String>,
}

impl Default for Serializer {
    fn default() -> Self {
        Self::from_config(&SerializerConfig::default())
    }
}

impl Serializer {
    pub fn new<I, S>(vector_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            vector_types: vector_types.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &SerializerConfig) -> Self {
        Self::new(config.vector_data_types.iter().cloned())
    }

    pub fn is_vector_type(&self, data_type: &str) -> bool {
        self.vector_types.contains(data_type)
    }

    pub fn encode_vector(values: &[f64]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(values.len() * F64_WIDTH);
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    pub fn decode_vector(bytes: &[u8], data_type: &str) -> CacheResult<Vec<f64>> {
        if bytes.len() % F64_WIDTH != 0 {
            return Err(CacheError::serialization(
                data_type,
                format!(
                    "vector payload of {} bytes is not a multiple of {F64_WIDTH}",
                    bytes.len()
                ),
            ));
        }
        Ok(bytes
            .chunks_exact(F64_WIDTH)
            .map(|chunk| {
                let mut raw = [0u8; F64_WIDTH];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect())
    }
}

impl ValueCodec for Serializer {
    fn encode(&self, value: &CacheValue, data_type: &str) -> CacheResult<Vec<u8>> {
        if self.is_vector_type(data_type) {
            let flat = match value {
                CacheValue::Vector(values) => return Ok(Self::encode_vector(values)),
                CacheValue::Structured(json) => json
                    .flatten()
                    .map_err(|e| CacheError::serialization(data_type, e))?,
            };
            return Ok(Self::encode_vector(&flat));
        }

        match value {
            CacheValue::Structured(json) => {
                serde_json::to_vec(json).map_err(|e| CacheError::serialization(data_type, e))
            }
            // Would decode as a structured array, not the vector that went in
            CacheValue::Vector(_) => Err(CacheError::serialization(
                data_type,
                "vector values are only stored under vector data types",
            )),
        }
    }

    fn decode(&self, bytes: &[u8], data_type: &str) -> CacheResult<CacheValue> {
        if self.is_vector_type(data_type) {
            return Self::decode_vector(bytes, data_type).map(CacheValue::Vector);
        }

        serde_json::from_slice(bytes)
            .map(CacheValue::Structured)
            .map_err(|e| CacheError::serialization(data_type, e))
    }
}
