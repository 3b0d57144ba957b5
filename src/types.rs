//! Core types for the sparse inverted index

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Dense document id, assigned in ingestion order
pub type TableId = u32;

/// Result label; `-1` marks an unfilled slot
pub type Label = i64;

/// Label written into result slots that have no document
pub const INVALID_LABEL: Label = -1;

/// A sparse vector: (dimension id, value) pairs with unique dimensions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseRow {
    entries: Vec<(TableId, f32)>,
}

impl SparseRow {
    /// Size of one serialized entry: `u32` dimension followed by `f32` value.
    pub const ELEMENT_SIZE: usize = std::mem::size_of::<TableId>() + std::mem::size_of::<f32>();

    /// Rows with repeated dimensions are rejected by `add`.
    pub fn new(entries: Vec<(TableId, f32)>) -> Self {
        Self { entries }
    }

    /// First dimension that appears more than once, if any.
    pub fn duplicate_dim(&self) -> Option<TableId> {
        let mut dims: Vec<TableId> = self.entries.iter().map(|(d, _)| *d).collect();
        dims.sort_unstable();
        dims.windows(2).find(|w| w[0] == w[1]).map(|w| w[0])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(TableId, f32)] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (TableId, f32)> + '_ {
        self.entries.iter().copied()
    }

    /// Sum of raw values; the BM25 document length proxy.
    pub fn value_sum(&self) -> f32 {
        self.entries.iter().map(|(_, v)| v).sum()
    }
}

impl From<Vec<(TableId, f32)>> for SparseRow {
    fn from(entries: Vec<(TableId, f32)>) -> Self {
        Self::new(entries)
    }
}

/// Scoring metric an index is built for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    #[default]
    #[serde(alias = "IP")]
    Ip,
    #[serde(alias = "BM25")]
    Bm25,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricType::Ip => write!(f, "IP"),
            MetricType::Bm25 => write!(f, "BM25"),
        }
    }
}

impl FromStr for MetricType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IP" => Ok(MetricType::Ip),
            "BM25" => Ok(MetricType::Bm25),
            other => Err(Error::InvalidMetricType(format!(
                "unsupported metric type: {}",
                other
            ))),
        }
    }
}

/// Stored (quantized) posting value type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuantType {
    #[default]
    F32,
    F16,
    Bf16,
    U8,
    U16,
}

/// BM25 build parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
    /// Average document length used for WAND upper bounds at build time
    pub avgdl: f32,
    /// Multiplier applied to per-entry BM25 scores when tracking column max scores
    pub max_score_ratio: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            avgdl: 100.0,
            max_score_ratio: 1.05,
        }
    }
}

impl Bm25Params {
    pub fn validate(&self) -> Result<()> {
        if !(self.k1 > 0.0) {
            return Err(Error::invalid_args(format!(
                "bm25 k1 must be positive, got {}",
                self.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(Error::invalid_args(format!(
                "bm25 b must be within [0, 1], got {}",
                self.b
            )));
        }
        if !(self.avgdl > 0.0) {
            return Err(Error::invalid_args(format!(
                "bm25 avgdl must be positive, got {}",
                self.avgdl
            )));
        }
        if !(self.max_score_ratio > 0.0) {
            return Err(Error::invalid_args(format!(
                "bm25 max_score_ratio must be positive, got {}",
                self.max_score_ratio
            )));
        }
        Ok(())
    }
}

/// Construction-time index mode. Fixed for the lifetime of an index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct IndexOptions {
    pub metric: MetricType,
    pub use_wand: bool,
    pub quantization: QuantType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25: Option<Bm25Params>,
}

impl IndexOptions {
    /// Plain inner-product index.
    pub fn ip() -> Self {
        Self::default()
    }

    /// BM25 index with the given build parameters.
    pub fn bm25(params: Bm25Params) -> Self {
        Self {
            metric: MetricType::Bm25,
            bm25: Some(params),
            ..Self::default()
        }
    }

    pub fn with_wand(mut self, use_wand: bool) -> Self {
        self.use_wand = use_wand;
        self
    }

    pub fn with_quantization(mut self, quantization: QuantType) -> Self {
        self.quantization = quantization;
        self
    }

    pub fn validate(&self) -> Result<()> {
        match (self.metric, &self.bm25) {
            (MetricType::Bm25, None) => Err(Error::invalid_args(
                "bm25 index requires bm25 parameters",
            )),
            (MetricType::Bm25, Some(params)) => params.validate(),
            (MetricType::Ip, _) => Ok(()),
        }
    }
}
