//! Corpus generators shared by the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;

use elacsym_sparse::{SparseRow, TableId};
use proptest::prelude::*;

/// Random rows with up to `max_nnz` distinct dimensions below `dim` and positive values.
pub fn random_corpus(rng: &mut fastrand::Rng, rows: usize, dim: u32, max_nnz: usize) -> Vec<SparseRow> {
    (0..rows).map(|_| random_row(rng, dim, max_nnz)).collect()
}

pub fn random_row(rng: &mut fastrand::Rng, dim: u32, max_nnz: usize) -> SparseRow {
    let nnz = rng.usize(0..=max_nnz);
    let mut entries = BTreeMap::new();
    for _ in 0..nnz {
        entries.insert(rng.u32(0..dim), 0.1 + rng.f32() * 4.9);
    }
    SparseRow::new(entries.into_iter().collect())
}

pub fn row_strategy(dim: TableId, max_nnz: usize) -> impl Strategy<Value = SparseRow> {
    prop::collection::btree_map(0..dim, 0.1f32..5.0, 0..=max_nnz)
        .prop_map(|entries| SparseRow::new(entries.into_iter().collect()))
}

pub fn corpus_strategy(
    dim: TableId,
    max_nnz: usize,
    max_rows: usize,
) -> impl Strategy<Value = Vec<SparseRow>> {
    prop::collection::vec(row_strategy(dim, max_nnz), 1..max_rows)
}

pub fn assert_close(actual: f32, expected: f32, context: &str) {
    let tolerance = 1e-4 * expected.abs().max(1.0);
    assert!(
        (actual - expected).abs() <= tolerance,
        "{}: {} != {}",
        context,
        actual,
        expected
    );
}
