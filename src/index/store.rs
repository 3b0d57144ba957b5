//! Column storage for posting lists.
//!
//! Each internal column owns two parallel sequences: ascending document ids
//! and their quantized values. Alongside live the per-column WAND max scores
//! and the per-document BM25 row sums. [`HeapStore`] grows on demand;
//! [`MmapStore`] lays everything out once inside a [`MappedRegion`] and never
//! grows afterwards.

use std::marker::PhantomData;
use std::mem::size_of;
use std::path::Path;

use super::mmap::{MapOptions, MappedRegion};
use crate::quant::StoredValue;
use crate::types::TableId;
use crate::{Error, Result};

pub trait PostingStore<Q: StoredValue>: Send + Sync + Sized {
    /// Whether columns and rows may be appended after construction.
    const MUTABLE: bool;

    /// An empty store. `track_max_scores` keeps one WAND bound per column,
    /// `track_row_sums` one BM25 length proxy per row.
    fn empty(track_max_scores: bool, track_row_sums: bool) -> Self;

    fn n_columns(&self) -> usize;

    fn ids(&self, col: usize) -> &[TableId];

    fn vals(&self, col: usize) -> &[Q];

    fn max_score(&self, col: usize) -> f32;

    /// Length proxy of `doc`; `0.0` when row sums are not tracked.
    fn row_sum(&self, doc: TableId) -> f32;

    /// Append an empty column and return its id.
    fn push_column(&mut self) -> Result<usize>;

    fn append(&mut self, col: usize, id: TableId, val: Q) -> Result<()>;

    fn raise_max_score(&mut self, col: usize, score: f32);

    fn push_row_sum(&mut self, sum: f32) -> Result<()>;

    fn reserve_rows(&mut self, additional: usize);

    /// Size every column up front from the number of entries it will hold.
    fn preallocate(
        &mut self,
        _backing_path: &Path,
        _options: MapOptions,
        _column_counts: &[usize],
        _rows: usize,
    ) -> Result<()> {
        Err(Error::contract("posting store does not support preallocation"))
    }

    /// Bytes held by the store.
    fn byte_size(&self) -> usize;
}

/// Heap-allocated, growable posting lists
#[derive(Debug, Default)]
pub struct HeapStore<Q> {
    ids: Vec<Vec<TableId>>,
    vals: Vec<Vec<Q>>,
    max_scores: Vec<f32>,
    row_sums: Vec<f32>,
    track_max_scores: bool,
    track_row_sums: bool,
}

impl<Q: StoredValue> PostingStore<Q> for HeapStore<Q> {
    const MUTABLE: bool = true;

    fn empty(track_max_scores: bool, track_row_sums: bool) -> Self {
        Self {
            ids: Vec::new(),
            vals: Vec::new(),
            max_scores: Vec::new(),
            row_sums: Vec::new(),
            track_max_scores,
            track_row_sums,
        }
    }

    fn n_columns(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    fn ids(&self, col: usize) -> &[TableId] {
        &self.ids[col]
    }

    #[inline]
    fn vals(&self, col: usize) -> &[Q] {
        &self.vals[col]
    }

    #[inline]
    fn max_score(&self, col: usize) -> f32 {
        self.max_scores.get(col).copied().unwrap_or(0.0)
    }

    #[inline]
    fn row_sum(&self, doc: TableId) -> f32 {
        self.row_sums.get(doc as usize).copied().unwrap_or(0.0)
    }

    fn push_column(&mut self) -> Result<usize> {
        self.ids.push(Vec::new());
        self.vals.push(Vec::new());
        if self.track_max_scores {
            self.max_scores.push(0.0);
        }
        Ok(self.ids.len() - 1)
    }

    #[inline]
    fn append(&mut self, col: usize, id: TableId, val: Q) -> Result<()> {
        self.ids[col].push(id);
        self.vals[col].push(val);
        Ok(())
    }

    #[inline]
    fn raise_max_score(&mut self, col: usize, score: f32) {
        if let Some(slot) = self.max_scores.get_mut(col) {
            *slot = slot.max(score);
        }
    }

    fn push_row_sum(&mut self, sum: f32) -> Result<()> {
        if self.track_row_sums {
            self.row_sums.push(sum);
        }
        Ok(())
    }

    fn reserve_rows(&mut self, additional: usize) {
        if self.track_row_sums {
            self.row_sums.reserve(additional);
        }
    }

    fn byte_size(&self) -> usize {
        let mut res = size_of::<Vec<TableId>>() * self.ids.capacity();
        res += self
            .ids
            .iter()
            .map(|ids| ids.capacity() * size_of::<TableId>())
            .sum::<usize>();
        res += size_of::<Vec<Q>>() * self.vals.capacity();
        res += self
            .vals
            .iter()
            .map(|vals| vals.capacity() * size_of::<Q>())
            .sum::<usize>();
        res += self.max_scores.capacity() * size_of::<f32>();
        res += self.row_sums.capacity() * size_of::<f32>();
        res
    }
}

/// A fixed-capacity sequence living at `offset` bytes into a mapped region.
///
/// Holds no pointer: element access always goes through the owning region,
/// so the slice can never outlive or reallocate the mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappedSlice {
    offset: usize,
    capacity: usize,
    len: usize,
}

impl MappedSlice {
    fn new(offset: usize, capacity: usize) -> Self {
        Self {
            offset,
            capacity,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn byte_len<T>(&self) -> usize {
        self.capacity * size_of::<T>()
    }

    #[inline]
    fn view<'r, T: bytemuck::Pod>(&self, region: &'r [u8]) -> &'r [T] {
        if self.len == 0 {
            return &[];
        }
        let end = self.offset + self.len * size_of::<T>();
        bytemuck::cast_slice(&region[self.offset..end])
    }

    #[inline]
    fn view_mut<'r, T: bytemuck::Pod>(&self, region: &'r mut [u8]) -> &'r mut [T] {
        if self.len == 0 {
            return &mut [];
        }
        let end = self.offset + self.len * size_of::<T>();
        bytemuck::cast_slice_mut(&mut region[self.offset..end])
    }

    #[inline]
    fn push<T: bytemuck::Pod>(&mut self, region: &mut [u8], value: T) -> Result<()> {
        if self.len == self.capacity {
            return Err(Error::contract(format!(
                "mapped slice at offset {} is full ({} elements)",
                self.offset, self.capacity
            )));
        }
        let start = self.offset + self.len * size_of::<T>();
        region[start..start + size_of::<T>()].copy_from_slice(bytemuck::bytes_of(&value));
        self.len += 1;
        Ok(())
    }
}

/// Posting lists laid out inside one memory-mapped region.
///
/// Region layout, in order: row sums (`f32` per row), column max scores
/// (`f32` per column), every column's ids (`u32`), every column's values
/// (`Q`). Each block starts on a multiple of its element size, so the page
/// aligned mapping keeps every typed view aligned.
#[derive(Debug)]
pub struct MmapStore<Q> {
    region: MappedRegion,
    ids: Vec<MappedSlice>,
    vals: Vec<MappedSlice>,
    max_scores: MappedSlice,
    row_sums: MappedSlice,
    track_max_scores: bool,
    track_row_sums: bool,
    _marker: PhantomData<Q>,
}

impl<Q> MmapStore<Q> {
    pub fn region(&self) -> &MappedRegion {
        &self.region
    }
}

impl<Q: StoredValue> PostingStore<Q> for MmapStore<Q> {
    const MUTABLE: bool = false;

    fn empty(track_max_scores: bool, track_row_sums: bool) -> Self {
        Self {
            region: MappedRegion::unmapped(),
            ids: Vec::new(),
            vals: Vec::new(),
            max_scores: MappedSlice::default(),
            row_sums: MappedSlice::default(),
            track_max_scores,
            track_row_sums,
            _marker: PhantomData,
        }
    }

    fn n_columns(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    fn ids(&self, col: usize) -> &[TableId] {
        self.ids[col].view(self.region.bytes())
    }

    #[inline]
    fn vals(&self, col: usize) -> &[Q] {
        self.vals[col].view(self.region.bytes())
    }

    #[inline]
    fn max_score(&self, col: usize) -> f32 {
        self.max_scores
            .view::<f32>(self.region.bytes())
            .get(col)
            .copied()
            .unwrap_or(0.0)
    }

    #[inline]
    fn row_sum(&self, doc: TableId) -> f32 {
        self.row_sums
            .view::<f32>(self.region.bytes())
            .get(doc as usize)
            .copied()
            .unwrap_or(0.0)
    }

    fn push_column(&mut self) -> Result<usize> {
        Err(Error::contract(
            "mmap-backed posting store cannot grow new columns",
        ))
    }

    #[inline]
    fn append(&mut self, col: usize, id: TableId, val: Q) -> Result<()> {
        let bytes = self.region.bytes_mut();
        self.ids[col].push(bytes, id)?;
        self.vals[col].push(bytes, val)
    }

    #[inline]
    fn raise_max_score(&mut self, col: usize, score: f32) {
        let scores = self.max_scores.view_mut::<f32>(self.region.bytes_mut());
        if let Some(slot) = scores.get_mut(col) {
            *slot = slot.max(score);
        }
    }

    fn push_row_sum(&mut self, sum: f32) -> Result<()> {
        if !self.track_row_sums {
            return Ok(());
        }
        self.row_sums.push(self.region.bytes_mut(), sum)
    }

    fn reserve_rows(&mut self, _additional: usize) {}

    fn preallocate(
        &mut self,
        backing_path: &Path,
        options: MapOptions,
        column_counts: &[usize],
        rows: usize,
    ) -> Result<()> {
        if self.region.is_mapped() || !self.ids.is_empty() {
            return Err(Error::contract("mmap-backed posting store is already laid out"));
        }

        let n_cols = column_counts.len();
        let nnz: usize = column_counts.iter().sum();
        let row_sums_len = if self.track_row_sums { rows } else { 0 };
        let max_scores_len = if self.track_max_scores { n_cols } else { 0 };

        let mut offset = 0usize;
        let row_sums = MappedSlice::new(offset, row_sums_len);
        offset += row_sums.byte_len::<f32>();

        let mut max_scores = MappedSlice::new(offset, max_scores_len);
        // The zero-filled file already holds 0.0 for every column bound.
        max_scores.len = max_scores_len;
        offset += max_scores.byte_len::<f32>();

        let mut ids = Vec::with_capacity(n_cols);
        for &count in column_counts {
            let slice = MappedSlice::new(offset, count);
            offset += slice.byte_len::<TableId>();
            ids.push(slice);
        }
        let mut vals = Vec::with_capacity(n_cols);
        for &count in column_counts {
            let slice = MappedSlice::new(offset, count);
            offset += slice.byte_len::<Q>();
            vals.push(slice);
        }

        tracing::debug!(
            columns = n_cols,
            nnz,
            rows,
            value_type = Q::NAME,
            bytes = offset,
            "laying out mmap-backed posting store"
        );

        self.region = MappedRegion::create(backing_path, offset, options)?;
        self.ids = ids;
        self.vals = vals;
        self.max_scores = max_scores;
        self.row_sums = row_sums;
        Ok(())
    }

    fn byte_size(&self) -> usize {
        self.region.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_store_grows() {
        let mut store = HeapStore::<f32>::empty(true, true);
        let col = store.push_column().unwrap();
        assert_eq!(col, 0);
        store.append(col, 0, 1.5).unwrap();
        store.append(col, 4, 2.5).unwrap();
        store.raise_max_score(col, 2.5);
        store.raise_max_score(col, 1.0);
        store.push_row_sum(3.0).unwrap();

        assert_eq!(store.ids(0), &[0, 4]);
        assert_eq!(store.vals(0), &[1.5, 2.5]);
        assert_eq!(store.max_score(0), 2.5);
        assert_eq!(store.row_sum(0), 3.0);
        assert_eq!(store.row_sum(9), 0.0);
        assert!(store.byte_size() > 0);
    }

    #[test]
    fn test_heap_store_without_tracking() {
        let mut store = HeapStore::<u8>::empty(false, false);
        store.push_column().unwrap();
        store.raise_max_score(0, 9.0);
        store.push_row_sum(9.0).unwrap();
        assert_eq!(store.max_score(0), 0.0);
        assert_eq!(store.row_sum(0), 0.0);
    }

    #[test]
    fn test_mmap_store_fills_preallocated_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postings.bin");

        let mut store = MmapStore::<u16>::empty(true, true);
        store
            .preallocate(&path, MapOptions::default(), &[2, 1], 2)
            .unwrap();
        // 2 row sums + 2 max scores + 3 ids, all 4 bytes, then 3 u16 values.
        assert_eq!(store.byte_size(), 4 * 2 + 4 * 2 + 4 * 3 + 2 * 3);

        store.append(0, 0, 7).unwrap();
        store.append(1, 0, 3).unwrap();
        store.append(0, 1, 9).unwrap();
        store.raise_max_score(1, 4.0);
        store.push_row_sum(10.0).unwrap();
        store.push_row_sum(9.0).unwrap();

        assert_eq!(store.ids(0), &[0, 1]);
        assert_eq!(store.vals(0), &[7, 9]);
        assert_eq!(store.ids(1), &[0]);
        assert_eq!(store.vals(1), &[3]);
        assert_eq!(store.max_score(0), 0.0);
        assert_eq!(store.max_score(1), 4.0);
        assert_eq!(store.row_sum(1), 9.0);
    }

    #[test]
    fn test_mmap_store_never_grows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postings.bin");

        let mut store = MmapStore::<f32>::empty(false, false);
        store
            .preallocate(&path, MapOptions::default(), &[1], 1)
            .unwrap();
        store.append(0, 0, 1.0).unwrap();

        let err = store.append(0, 1, 1.0).unwrap_err();
        assert!(!err.is_recoverable());
        assert!(!store.push_column().unwrap_err().is_recoverable());
        assert!(store
            .preallocate(&path, MapOptions::default(), &[1], 1)
            .is_err());
    }

    #[test]
    fn test_unloaded_mmap_store_is_empty() {
        let store = MmapStore::<f32>::empty(true, true);
        assert_eq!(store.n_columns(), 0);
        assert_eq!(store.byte_size(), 0);
        assert!(!store.region().is_mapped());
    }
}
