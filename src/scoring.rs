//! Per-document value scoring.
//!
//! A [`DocValueComputer`] turns a stored posting value and the document's
//! length proxy (BM25 row sum) into the contribution multiplied by the query
//! weight. Search-time parameters are validated against the build mode.

use serde::{Deserialize, Serialize};

use crate::types::{Bm25Params, IndexOptions, MetricType};
use crate::{Error, Result};

/// Scoring function applied to every posting visited during search
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DocValueComputer {
    /// Plain inner product: the stored value itself.
    Original,
    /// BM25 term-frequency saturation with document length normalisation.
    Bm25 { k1: f32, b: f32, avgdl: f32 },
}

impl DocValueComputer {
    pub fn bm25(k1: f32, b: f32, avgdl: f32) -> Self {
        DocValueComputer::Bm25 { k1, b, avgdl }
    }

    /// Contribution of a posting with value `tf` in a document of length `doc_len`.
    #[inline]
    pub fn compute(&self, tf: f32, doc_len: f32) -> f32 {
        match *self {
            DocValueComputer::Original => tf,
            DocValueComputer::Bm25 { k1, b, avgdl } => bm25_tf(tf, doc_len, k1, b, avgdl),
        }
    }
}

/// Statically dispatched form of [`DocValueComputer`] used inside search loops.
pub(crate) trait Scorer: Copy {
    /// Whether the score depends on the document length proxy.
    const NEEDS_DOC_LEN: bool;

    fn score(self, tf: f32, doc_len: f32) -> f32;
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct OriginalScorer;

impl Scorer for OriginalScorer {
    const NEEDS_DOC_LEN: bool = false;

    #[inline(always)]
    fn score(self, tf: f32, _doc_len: f32) -> f32 {
        tf
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Bm25Scorer {
    pub(crate) k1: f32,
    pub(crate) b: f32,
    pub(crate) avgdl: f32,
}

impl Scorer for Bm25Scorer {
    const NEEDS_DOC_LEN: bool = true;

    #[inline(always)]
    fn score(self, tf: f32, doc_len: f32) -> f32 {
        bm25_tf(tf, doc_len, self.k1, self.b, self.avgdl)
    }
}

/// Resolve a [`DocValueComputer`] once and run `$body` with a concrete scorer.
macro_rules! with_scorer {
    ($computer:expr, $scorer:ident => $body:expr) => {
        match *$computer {
            $crate::scoring::DocValueComputer::Original => {
                let $scorer = $crate::scoring::OriginalScorer;
                $body
            }
            $crate::scoring::DocValueComputer::Bm25 { k1, b, avgdl } => {
                let $scorer = $crate::scoring::Bm25Scorer { k1, b, avgdl };
                $body
            }
        }
    };
}
pub(crate) use with_scorer;

#[inline]
pub(crate) fn bm25_tf(tf: f32, doc_len: f32, k1: f32, b: f32, avgdl: f32) -> f32 {
    tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * (doc_len / avgdl)))
}

/// Search-time scorer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_k1: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_b: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_avgdl: Option<f32>,
}

impl SearchParams {
    pub fn ip() -> Self {
        Self {
            metric_type: Some(MetricType::Ip.to_string()),
            ..Self::default()
        }
    }

    pub fn bm25(avgdl: f32) -> Self {
        Self {
            metric_type: Some(MetricType::Bm25.to_string()),
            bm25_avgdl: Some(avgdl),
            ..Self::default()
        }
    }

    pub fn with_k1(mut self, k1: f32) -> Self {
        self.bm25_k1 = Some(k1);
        self
    }

    pub fn with_b(mut self, b: f32) -> Self {
        self.bm25_b = Some(b);
        self
    }
}

fn check_metric(requested: Option<&str>, expected: MetricType) -> Result<()> {
    let Some(requested) = requested else {
        return Ok(());
    };
    if requested.eq_ignore_ascii_case(&expected.to_string()) {
        return Ok(());
    }
    Err(Error::InvalidMetricType(format!(
        "metric type not match, expected: {}, got: {}",
        expected, requested
    )))
}

/// Build the scorer for a search against an index built with `options`.
pub(crate) fn doc_value_computer(
    options: &IndexOptions,
    params: &SearchParams,
) -> Result<DocValueComputer> {
    let metric = params.metric_type.as_deref();
    let build = match (options.metric, options.bm25) {
        (MetricType::Ip, _) => {
            check_metric(metric, MetricType::Ip)?;
            return Ok(DocValueComputer::Original);
        }
        (MetricType::Bm25, Some(build)) => build,
        (MetricType::Bm25, None) => {
            return Err(Error::invalid_args("bm25 index was built without bm25 parameters"))
        }
    };
    check_metric(metric, MetricType::Bm25)?;

    let avgdl = params
        .bm25_avgdl
        .ok_or_else(|| Error::invalid_args("avgdl must be supplied during searching"))?;

    if options.use_wand {
        // Column upper bounds were computed with the build-time k1/b.
        let k1_differs = params.bm25_k1.is_some_and(|k1| k1 != build.k1);
        let b_differs = params.bm25_b.is_some_and(|b| b != build.b);
        if k1_differs || b_differs {
            return Err(Error::invalid_args(
                "search time k1/b must equal load time config for WAND index.",
            ));
        }
        return Ok(DocValueComputer::bm25(build.k1, build.b, avgdl));
    }

    let k1 = params.bm25_k1.unwrap_or(build.k1);
    let b = params.bm25_b.unwrap_or(build.b);
    Ok(DocValueComputer::bm25(k1, b, avgdl))
}

/// Scorer used to derive WAND column upper bounds while ingesting BM25 rows.
pub(crate) fn wand_max_score_computer(params: &Bm25Params) -> DocValueComputer {
    DocValueComputer::bm25(params.k1, params.b, params.avgdl)
}
