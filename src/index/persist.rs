//! Row-oriented save / load, including the two-pass mmap loader.
//!
//! Layout: `i64` row count, `u64` max dimension, `f32` deprecated field,
//! then per row a `u64` entry count followed by `(u32 dim, f32 value)` pairs.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::Path;

use tracing::{info, instrument, warn};

use super::mmap::MapOptions;
use super::store::PostingStore;
use super::InvertedIndex;
use crate::io::{MemoryReader, MemoryWriter};
use crate::quant::StoredValue;
use crate::types::{SparseRow, TableId};
use crate::{Error, Result};

/// Bytes of the fixed header.
const HEADER_SIZE: usize = 8 + 8 + 4;

impl<Q: StoredValue, S: PostingStore<Q>> InvertedIndex<Q, S> {
    /// Write every row, rebuilt from the stored columns in document order.
    #[instrument(skip_all, fields(rows = self.n_rows, columns = self.store.n_columns()))]
    pub fn save(&self, writer: &mut MemoryWriter) -> Result<()> {
        let start = writer.len();
        writer.write_i64(self.n_rows as i64);
        writer.write_u64(self.max_dim as u64);
        // Deprecated threshold, kept for format compatibility.
        writer.write_f32(0.0);

        let n_cols = self.store.n_columns();
        let mut raw_dims = vec![0 as TableId; n_cols];
        for (&raw, &col) in &self.dim_map {
            raw_dims[col as usize] = raw;
        }

        // One cursor per column, merged by (doc id, column).
        let mut positions = vec![0usize; n_cols];
        let mut heads: BinaryHeap<Reverse<(TableId, usize)>> = (0..n_cols)
            .filter_map(|col| self.store.ids(col).first().map(|&id| Reverse((id, col))))
            .collect();

        let mut row = Vec::new();
        for doc in 0..self.n_rows as TableId {
            row.clear();
            while let Some(&Reverse((id, col))) = heads.peek() {
                if id != doc {
                    break;
                }
                heads.pop();
                let pos = positions[col];
                row.push((raw_dims[col], self.store.vals(col)[pos].to_f32()));
                positions[col] = pos + 1;
                if let Some(&next) = self.store.ids(col).get(pos + 1) {
                    heads.push(Reverse((next, col)));
                }
            }

            writer.write_u64(row.len() as u64);
            for &(dim, val) in &row {
                writer.write_u32(dim);
                writer.write_f32(val);
            }
        }

        info!(bytes = writer.len() - start, "saved sparse inverted index");
        Ok(())
    }

    /// Rebuild an empty index from a stream written by [`save`](Self::save).
    ///
    /// Mmap-backed indexes lay their posting lists out inside a file created
    /// at `backing_path`, which is unlinked before this returns. Heap-backed
    /// indexes ignore `map` and `backing_path`. On failure the index is left
    /// empty.
    #[instrument(skip_all, fields(mmap = !S::MUTABLE, value_type = Q::NAME))]
    pub fn load(
        &mut self,
        reader: &mut MemoryReader<'_>,
        map: MapOptions,
        backing_path: &Path,
    ) -> Result<()> {
        if self.n_rows != 0 || !self.dim_map.is_empty() || self.store.n_columns() != 0 {
            return Err(Error::contract("load requires an empty InvertedIndex"));
        }

        let result = self.load_rows(reader, map, backing_path);
        if let Err(e) = &result {
            warn!(error = %e, "failed to load sparse inverted index");
            self.reset();
        }
        result
    }

    fn load_rows(
        &mut self,
        reader: &mut MemoryReader<'_>,
        map: MapOptions,
        backing_path: &Path,
    ) -> Result<()> {
        reader.ensure(HEADER_SIZE)?;
        // Older writers flagged WAND indexes with a negative row count.
        let rows = reader.read_i64()?.unsigned_abs();
        let max_dim = reader.read_u64()?;
        let _deprecated = reader.read_f32()?;

        let rows = usize::try_from(rows)
            .ok()
            .filter(|&n| n <= TableId::MAX as usize)
            .ok_or_else(|| Error::corrupted(format!("row count {} out of range", rows)))?;
        let max_dim = usize::try_from(max_dim)
            .map_err(|_| Error::corrupted(format!("max dimension {} out of range", max_dim)))?;
        // Every row carries at least its entry count.
        let min_bytes = rows
            .checked_mul(8)
            .ok_or_else(|| Error::corrupted(format!("row count {} out of range", rows)))?;
        reader.ensure(min_bytes)?;

        let mut buf = Vec::new();
        if S::MUTABLE {
            self.store.reserve_rows(rows);
        } else {
            self.prepare_mmap(reader, rows, map, backing_path, &mut buf)?;
        }

        for vec_id in 0..rows {
            read_row(reader, &mut buf)?;
            self.add_row_to_index(&buf, vec_id as TableId)?;
        }
        self.n_rows = rows;
        self.max_dim = max_dim;

        info!(
            rows,
            max_dim,
            columns = self.n_columns(),
            bytes = self.size(),
            "loaded sparse inverted index"
        );
        Ok(())
    }

    /// First pass of the mmap loader: assign columns, count their entries and
    /// lay out the mapped store, then rewind `reader` to the first row.
    fn prepare_mmap(
        &mut self,
        reader: &mut MemoryReader<'_>,
        rows: usize,
        map: MapOptions,
        backing_path: &Path,
        buf: &mut Vec<(TableId, f32)>,
    ) -> Result<()> {
        let start = reader.tell();
        let mut counts: Vec<usize> = Vec::new();
        for _ in 0..rows {
            read_row(reader, buf)?;
            for &(idx, val) in buf.iter() {
                // Matches the zero skip during ingestion.
                if val == 0.0 {
                    continue;
                }
                let col = *self.dim_map.entry(idx).or_insert_with(|| {
                    counts.push(0);
                    (counts.len() - 1) as u32
                });
                counts[col as usize] += 1;
            }
        }
        reader.seek(start)?;

        self.next_dim_id = counts.len() as u32;
        self.store.preallocate(backing_path, map, &counts, rows)
    }
}

/// Read one length-prefixed row into `buf`, replacing its contents.
fn read_row(reader: &mut MemoryReader<'_>, buf: &mut Vec<(TableId, f32)>) -> Result<()> {
    let count = reader.read_u64()?;
    let len = usize::try_from(count)
        .ok()
        .filter(|&n| n.checked_mul(SparseRow::ELEMENT_SIZE).is_some())
        .ok_or_else(|| Error::corrupted(format!("row entry count {} out of range", count)))?;
    reader.ensure(len * SparseRow::ELEMENT_SIZE)?;

    buf.clear();
    buf.reserve(len);
    for _ in 0..len {
        let dim = reader.read_u32()?;
        let val = reader.read_f32()?;
        buf.push((dim, val));
    }
    Ok(())
}
