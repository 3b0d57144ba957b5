//! Sparse inverted index
//!
//! Maps raw sparse dimensions to dense internal columns, keeps one posting
//! list per column and answers top-k queries by brute force or WAND.
//!
//! Two storage backends are provided:
//! - [`HeapStore`]: growable posting lists, supports incremental `add`
//! - [`MmapStore`]: posting lists laid out once inside a memory-mapped
//!   region at `load` time; read-only afterwards

mod cursor;
pub mod handle;
pub mod mmap;
mod persist;
mod search;
pub mod store;

pub use handle::{Backing, DefaultIndexFactory, IndexFactory, SparseIndex};
pub use mmap::MapOptions;
pub use search::SearchResult;
pub use store::{HeapStore, MmapStore, PostingStore};

use std::collections::HashMap;
use std::marker::PhantomData;
use std::mem::size_of;

use crate::quant::StoredValue;
use crate::scoring::{self, DocValueComputer, SearchParams};
use crate::types::{IndexOptions, MetricType, SparseRow, TableId};
use crate::{Error, Result};

/// Heap-backed index storing values as `Q`
pub type HeapInvertedIndex<Q = f32> = InvertedIndex<Q, HeapStore<Q>>;

/// Read-only mmap-backed index storing values as `Q`
pub type MmapInvertedIndex<Q = f32> = InvertedIndex<Q, MmapStore<Q>>;

/// Sparse inverted index over stored value type `Q` and posting store `S`
///
/// The mode in [`IndexOptions`] (WAND vs brute force, BM25 vs inner
/// product) is fixed at construction.
#[derive(Debug)]
pub struct InvertedIndex<Q: StoredValue, S: PostingStore<Q>> {
    options: IndexOptions,

    /// Raw sparse dimension -> internal column id
    dim_map: HashMap<TableId, u32>,

    store: S,

    n_rows: usize,
    max_dim: usize,
    next_dim_id: u32,

    _marker: PhantomData<Q>,
}

impl<Q: StoredValue, S: PostingStore<Q>> InvertedIndex<Q, S> {
    pub fn new(options: IndexOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            dim_map: HashMap::new(),
            store: Self::empty_store(&options),
            n_rows: 0,
            max_dim: 0,
            next_dim_id: 0,
            _marker: PhantomData,
        })
    }

    fn empty_store(options: &IndexOptions) -> S {
        S::empty(options.use_wand, options.metric == MetricType::Bm25)
    }

    /// Drop all content, releasing any mapped region.
    fn reset(&mut self) {
        self.dim_map.clear();
        self.store = Self::empty_store(&self.options);
        self.n_rows = 0;
        self.max_dim = 0;
        self.next_dim_id = 0;
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn is_mmapped(&self) -> bool {
        !S::MUTABLE
    }

    fn is_bm25(&self) -> bool {
        self.options.metric == MetricType::Bm25
    }

    /// Validate search-time scorer parameters against the build mode.
    pub fn get_doc_value_computer(&self, params: &SearchParams) -> Result<DocValueComputer> {
        scoring::doc_value_computer(&self.options, params)
    }

    /// Heap indexes need no training; mmap indexes reject it.
    pub fn train(&mut self, _rows: &[SparseRow]) -> Result<()> {
        if !S::MUTABLE {
            return Err(Error::contract("mmap-backed InvertedIndex does not support train"));
        }
        Ok(())
    }

    /// Append `rows`; row `i` receives document id `n_rows() + i`.
    pub fn add(&mut self, rows: &[SparseRow], dim: usize) -> Result<()> {
        if !S::MUTABLE {
            return Err(Error::contract("mmap-backed InvertedIndex does not support add"));
        }
        let current_rows = self.n_rows;
        let end_rows = current_rows
            .checked_add(rows.len())
            .filter(|&n| n <= TableId::MAX as usize)
            .ok_or_else(|| {
                Error::invalid_args(format!(
                    "adding {} rows to {} would overflow document ids",
                    rows.len(),
                    current_rows
                ))
            })?;

        for (i, row) in rows.iter().enumerate() {
            if let Some(idx) = row.duplicate_dim() {
                return Err(Error::invalid_args(format!(
                    "row {} repeats dimension {}",
                    i, idx
                )));
            }
        }

        self.max_dim = self.max_dim.max(dim);
        self.store.reserve_rows(rows.len());
        for (i, row) in rows.iter().enumerate() {
            self.add_row_to_index(row.entries(), (current_rows + i) as TableId)?;
        }
        self.n_rows = end_rows;

        tracing::debug!(added = rows.len(), total = self.n_rows, columns = self.n_columns(), "added rows");
        Ok(())
    }

    pub(crate) fn add_row_to_index(&mut self, row: &[(TableId, f32)], vec_id: TableId) -> Result<()> {
        let bm25 = self.options.bm25.filter(|_| self.is_bm25());
        let use_wand = self.options.use_wand;
        let mut row_sum = 0.0f32;

        for &(idx, val) in row {
            if bm25.is_some() {
                row_sum += val;
            }
            // Exact zeros contribute nothing to an inner product.
            if val == 0.0 {
                continue;
            }
            let col = match self.dim_map.get(&idx) {
                Some(&col) => col as usize,
                None => {
                    if !S::MUTABLE {
                        return Err(Error::contract(format!(
                            "unexpected vector dimension {} in mmap-backed InvertedIndex",
                            idx
                        )));
                    }
                    let col = self.store.push_column()?;
                    debug_assert_eq!(col, self.next_dim_id as usize);
                    self.dim_map.insert(idx, col as u32);
                    self.next_dim_id += 1;
                    col
                }
            };
            // Posting ids must stay strictly ascending.
            if self.store.ids(col).last() == Some(&vec_id) {
                return Err(Error::corrupted(format!(
                    "document {} repeats dimension {}",
                    vec_id, idx
                )));
            }
            self.store.append(col, vec_id, Q::quantize(val))?;

            if use_wand {
                let score = match &bm25 {
                    Some(params) => {
                        params.max_score_ratio
                            * scoring::wand_max_score_computer(params).compute(val, row_sum)
                    }
                    None => val,
                };
                self.store.raise_max_score(col, score);
            }
        }

        if bm25.is_some() {
            self.store.push_row_sum(row_sum)?;
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn column(&self, raw_dim: TableId) -> Option<usize> {
        self.dim_map.get(&raw_dim).map(|&col| col as usize)
    }

    /// Approximate memory footprint in bytes.
    pub fn size(&self) -> usize {
        size_of::<Self>()
            + self.dim_map.len() * (size_of::<TableId>() + size_of::<u32>())
            + self.store.byte_size()
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Widest `dim` ever passed to `add` or read from a serialized header.
    pub fn n_cols(&self) -> usize {
        self.max_dim
    }

    /// Number of internal columns (distinct stored dimensions).
    pub fn n_columns(&self) -> usize {
        self.store.n_columns()
    }
}
