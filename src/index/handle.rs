//! Object-safe index handle and the factory that picks a concrete variant.

use std::path::Path;

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use super::mmap::MapOptions;
use super::search::SearchResult;
use super::store::{HeapStore, MmapStore, PostingStore};
use super::InvertedIndex;
use crate::filter::DocFilter;
use crate::io::{MemoryReader, MemoryWriter};
use crate::quant::StoredValue;
use crate::scoring::{DocValueComputer, SearchParams};
use crate::types::{IndexOptions, Label, QuantType, SparseRow, TableId};
use crate::Result;

/// Type-erased sparse index, independent of value type and storage backend.
///
/// Read methods take `&self` and may run concurrently; `add`, `train` and
/// `load` need exclusive access.
pub trait SparseIndex: Send + Sync {
    fn save(&self, writer: &mut MemoryWriter) -> Result<()>;

    fn load(
        &mut self,
        reader: &mut MemoryReader<'_>,
        map: MapOptions,
        backing_path: &Path,
    ) -> Result<()>;

    fn train(&mut self, rows: &[SparseRow]) -> Result<()>;

    fn add(&mut self, rows: &[SparseRow], dim: usize) -> Result<()>;

    fn search(
        &self,
        query: &SparseRow,
        k: usize,
        drop_ratio: f32,
        refine_factor: usize,
        filter: &dyn DocFilter,
        computer: &DocValueComputer,
    ) -> SearchResult;

    fn get_all_distances(
        &self,
        query: &SparseRow,
        drop_ratio: f32,
        filter: &dyn DocFilter,
        computer: &DocValueComputer,
    ) -> Vec<f32>;

    fn range_search(
        &self,
        query: &SparseRow,
        radius: f32,
        range_filter: Option<f32>,
        drop_ratio: f32,
        filter: &dyn DocFilter,
        computer: &DocValueComputer,
    ) -> Vec<(Label, f32)>;

    fn get_raw_distance(
        &self,
        vec_id: TableId,
        query: &SparseRow,
        computer: &DocValueComputer,
    ) -> f32;

    fn get_doc_value_computer(&self, params: &SearchParams) -> Result<DocValueComputer>;

    fn size(&self) -> usize;

    fn n_rows(&self) -> usize;

    fn n_cols(&self) -> usize;

    fn options(&self) -> &IndexOptions;

    fn is_mmapped(&self) -> bool;
}

impl<Q: StoredValue, S: PostingStore<Q>> SparseIndex for InvertedIndex<Q, S> {
    fn save(&self, writer: &mut MemoryWriter) -> Result<()> {
        InvertedIndex::save(self, writer)
    }

    fn load(
        &mut self,
        reader: &mut MemoryReader<'_>,
        map: MapOptions,
        backing_path: &Path,
    ) -> Result<()> {
        InvertedIndex::load(self, reader, map, backing_path)
    }

    fn train(&mut self, rows: &[SparseRow]) -> Result<()> {
        InvertedIndex::train(self, rows)
    }

    fn add(&mut self, rows: &[SparseRow], dim: usize) -> Result<()> {
        InvertedIndex::add(self, rows, dim)
    }

    fn search(
        &self,
        query: &SparseRow,
        k: usize,
        drop_ratio: f32,
        refine_factor: usize,
        filter: &dyn DocFilter,
        computer: &DocValueComputer,
    ) -> SearchResult {
        InvertedIndex::search(self, query, k, drop_ratio, refine_factor, filter, computer)
    }

    fn get_all_distances(
        &self,
        query: &SparseRow,
        drop_ratio: f32,
        filter: &dyn DocFilter,
        computer: &DocValueComputer,
    ) -> Vec<f32> {
        InvertedIndex::get_all_distances(self, query, drop_ratio, filter, computer)
    }

    fn range_search(
        &self,
        query: &SparseRow,
        radius: f32,
        range_filter: Option<f32>,
        drop_ratio: f32,
        filter: &dyn DocFilter,
        computer: &DocValueComputer,
    ) -> Vec<(Label, f32)> {
        InvertedIndex::range_search(self, query, radius, range_filter, drop_ratio, filter, computer)
    }

    fn get_raw_distance(
        &self,
        vec_id: TableId,
        query: &SparseRow,
        computer: &DocValueComputer,
    ) -> f32 {
        InvertedIndex::get_raw_distance(self, vec_id, query, computer)
    }

    fn get_doc_value_computer(&self, params: &SearchParams) -> Result<DocValueComputer> {
        InvertedIndex::get_doc_value_computer(self, params)
    }

    fn size(&self) -> usize {
        InvertedIndex::size(self)
    }

    fn n_rows(&self) -> usize {
        InvertedIndex::n_rows(self)
    }

    fn n_cols(&self) -> usize {
        InvertedIndex::n_cols(self)
    }

    fn options(&self) -> &IndexOptions {
        InvertedIndex::options(self)
    }

    fn is_mmapped(&self) -> bool {
        InvertedIndex::is_mmapped(self)
    }
}

/// Where an index keeps its posting lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backing {
    /// Growable heap storage; supports `add`.
    #[default]
    Heap,
    /// Read-only storage mapped from a backing file at `load` time.
    Mmap,
}

/// Builds boxed indexes from construction options.
pub trait IndexFactory: Send + Sync {
    fn create(&self, options: &IndexOptions, backing: Backing) -> Result<Box<dyn SparseIndex>>;
}

/// Maps `options.quantization` and `backing` onto the concrete index type.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultIndexFactory;

fn boxed<Q, S>(options: &IndexOptions) -> Result<Box<dyn SparseIndex>>
where
    Q: StoredValue,
    S: PostingStore<Q> + 'static,
{
    Ok(Box::new(InvertedIndex::<Q, S>::new(*options)?))
}

impl IndexFactory for DefaultIndexFactory {
    fn create(&self, options: &IndexOptions, backing: Backing) -> Result<Box<dyn SparseIndex>> {
        tracing::debug!(
            metric = %options.metric,
            use_wand = options.use_wand,
            quantization = ?options.quantization,
            backing = ?backing,
            "creating sparse index"
        );
        match (options.quantization, backing) {
            (QuantType::F32, Backing::Heap) => boxed::<f32, HeapStore<f32>>(options),
            (QuantType::F32, Backing::Mmap) => boxed::<f32, MmapStore<f32>>(options),
            (QuantType::F16, Backing::Heap) => boxed::<f16, HeapStore<f16>>(options),
            (QuantType::F16, Backing::Mmap) => boxed::<f16, MmapStore<f16>>(options),
            (QuantType::Bf16, Backing::Heap) => boxed::<bf16, HeapStore<bf16>>(options),
            (QuantType::Bf16, Backing::Mmap) => boxed::<bf16, MmapStore<bf16>>(options),
            (QuantType::U8, Backing::Heap) => boxed::<u8, HeapStore<u8>>(options),
            (QuantType::U8, Backing::Mmap) => boxed::<u8, MmapStore<u8>>(options),
            (QuantType::U16, Backing::Heap) => boxed::<u16, HeapStore<u16>>(options),
            (QuantType::U16, Backing::Mmap) => boxed::<u16, MmapStore<u16>>(options),
        }
    }
}
