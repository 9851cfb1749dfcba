// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Vector field metadata and the vectorizer capability.
//!
//! Embedding backends (hosted models, local models) live outside this crate.
//! They plug in through [`Vectorizer`]; the core only ever asks for the blob
//! that goes into the `PARAMS` section of a KNN query.
//!
//! ```text
//! FT.CREATE idx ... SCHEMA $.Embedding AS Embedding VECTOR HNSW 6
//!     TYPE FLOAT32 DIM 384 DISTANCE_METRIC COSINE
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SearchError};

/// Index algorithm for a vector field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorAlgorithm {
    /// Brute force
    Flat,
    /// Hierarchical navigable small world graph
    Hnsw,
}

impl fmt::Display for VectorAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorAlgorithm::Flat => write!(f, "FLAT"),
            VectorAlgorithm::Hnsw => write!(f, "HNSW"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    L2,
    InnerProduct,
    Cosine,
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::L2 => write!(f, "L2"),
            DistanceMetric::InnerProduct => write!(f, "IP"),
            DistanceMetric::Cosine => write!(f, "COSINE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorElementType {
    Float32,
    Float64,
}

impl VectorElementType {
    pub fn width(self) -> usize {
        match self {
            VectorElementType::Float32 => 4,
            VectorElementType::Float64 => 8,
        }
    }
}

impl fmt::Display for VectorElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorElementType::Float32 => write!(f, "FLOAT32"),
            VectorElementType::Float64 => write!(f, "FLOAT64"),
        }
    }
}

/// Declared parameters of a VECTOR field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorParams {
    pub algorithm: Option<VectorAlgorithm>,
    pub dimensions: Option<usize>,
    pub element_type: VectorElementType,
    pub distance_metric: DistanceMetric,
    /// HNSW: max outgoing edges per node
    pub m: Option<usize>,
    /// HNSW: candidate list size during construction
    pub ef_construction: Option<usize>,
    pub initial_cap: Option<usize>,
    /// FLAT: block size for the brute-force index
    pub block_size: Option<usize>,
}

impl VectorParams {
    pub fn new(algorithm: VectorAlgorithm, dimensions: usize) -> Self {
        Self {
            algorithm: Some(algorithm),
            dimensions: Some(dimensions),
            element_type: VectorElementType::Float32,
            distance_metric: DistanceMetric::Cosine,
            m: None,
            ef_construction: None,
            initial_cap: None,
            block_size: None,
        }
    }

    pub fn hnsw(dimensions: usize) -> Self {
        Self::new(VectorAlgorithm::Hnsw, dimensions)
    }

    pub fn flat(dimensions: usize) -> Self {
        Self::new(VectorAlgorithm::Flat, dimensions)
    }

    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.distance_metric = metric;
        self
    }

    pub fn element_type(mut self, element_type: VectorElementType) -> Self {
        self.element_type = element_type;
        self
    }

    pub fn hnsw_graph(mut self, m: usize, ef_construction: usize) -> Self {
        self.m = Some(m);
        self.ef_construction = Some(ef_construction);
        self
    }

    /// Check that the metadata required by FT.CREATE is present.
    pub(crate) fn validate(&self, field: &str) -> Result<(VectorAlgorithm, usize)> {
        let algorithm = self.algorithm.ok_or_else(|| {
            SearchError::schema(format!("vector field '{}' has no algorithm", field))
        })?;
        let dimensions = self
            .dimensions
            .filter(|d| *d > 0)
            .ok_or_else(|| SearchError::schema(format!("vector field '{}' has no dimension", field)))?;
        Ok((algorithm, dimensions))
    }

    /// The attribute tokens that follow `VECTOR {ALG} {n}`.
    pub(crate) fn attribute_args(&self, dimensions: usize) -> Vec<String> {
        let mut attrs = vec![
            "TYPE".to_string(),
            self.element_type.to_string(),
            "DIM".to_string(),
            dimensions.to_string(),
            "DISTANCE_METRIC".to_string(),
            self.distance_metric.to_string(),
        ];
        let optional = [
            ("INITIAL_CAP", self.initial_cap),
            ("BLOCK_SIZE", self.block_size),
            ("M", self.m),
            ("EF_CONSTRUCTION", self.ef_construction),
        ];
        for (name, value) in optional {
            if let Some(v) = value {
                attrs.push(name.to_string());
                attrs.push(v.to_string());
            }
        }
        attrs
    }

    /// Byte length of one encoded vector, when the dimension is known.
    pub fn blob_len(&self) -> Option<usize> {
        self.dimensions.map(|d| d * self.element_type.width())
    }
}

/// Input handed to a vectorizer.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorInput {
    Text(String),
    Floats(Vec<f64>),
}

/// Capability interface for embedding backends.
pub trait Vectorizer: Send + Sync {
    fn dimensions(&self) -> usize;
    fn element_type(&self) -> VectorElementType;
    fn encode(&self, input: &VectorInput) -> Result<Vec<u8>>;
}

/// Encodes caller-supplied floats as-is. Rejects text.
#[derive(Debug, Clone)]
pub struct RawFloatVectorizer {
    dimensions: usize,
    element_type: VectorElementType,
}

impl RawFloatVectorizer {
    pub fn float32(dimensions: usize) -> Self {
        Self {
            dimensions,
            element_type: VectorElementType::Float32,
        }
    }

    pub fn float64(dimensions: usize) -> Self {
        Self {
            dimensions,
            element_type: VectorElementType::Float64,
        }
    }
}

impl Vectorizer for RawFloatVectorizer {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn element_type(&self) -> VectorElementType {
        self.element_type
    }

    fn encode(&self, input: &VectorInput) -> Result<Vec<u8>> {
        match input {
            VectorInput::Floats(values) if values.len() == self.dimensions => {
                Ok(encode_floats(values, self.element_type))
            }
            VectorInput::Floats(values) => Err(SearchError::translation(format!(
                "vector has {} elements, expected {}",
                values.len(),
                self.dimensions
            ))),
            VectorInput::Text(_) => Err(SearchError::translation(
                "raw float vectorizer cannot embed text",
            )),
        }
    }
}

/// Little-endian packing as expected by RediSearch.
pub fn encode_floats(values: &[f64], element_type: VectorElementType) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * element_type.width());
    for v in values {
        match element_type {
            VectorElementType::Float32 => out.extend_from_slice(&(*v as f32).to_le_bytes()),
            VectorElementType::Float64 => out.extend_from_slice(&v.to_le_bytes()),
        }
    }
    out
}

pub fn decode_floats(bytes: &[u8], element_type: VectorElementType) -> Result<Vec<f64>> {
    let width = element_type.width();
    if bytes.len() % width != 0 {
        return Err(SearchError::protocol(format!(
            "vector blob of {} bytes is not a multiple of {}",
            bytes.len(),
            width
        )));
    }
    Ok(bytes
        .chunks_exact(width)
        .map(|chunk| match element_type {
            VectorElementType::Float32 => {
                f64::from(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            }
            VectorElementType::Float64 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                f64::from_le_bytes(buf)
            }
        })
        .collect())
}
