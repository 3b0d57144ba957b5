//! Document filters applied during search.
//!
//! A filter answers "is this document excluded?". An empty filter excludes
//! nothing and lets the engines skip the per-document check.

use roaring::RoaringBitmap;

use crate::types::TableId;

pub trait DocFilter {
    /// True when the filter excludes nothing.
    fn is_empty(&self) -> bool;

    /// True when `id` is filtered out.
    fn test(&self, id: TableId) -> bool;

    #[inline]
    fn excludes(&self, id: TableId) -> bool {
        !self.is_empty() && self.test(id)
    }
}

impl<F: DocFilter + ?Sized> DocFilter for &F {
    #[inline]
    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    #[inline]
    fn test(&self, id: TableId) -> bool {
        (**self).test(id)
    }
}

/// Borrowed bitset where a set bit marks a filtered-out document.
///
/// Bits are LSB-first within each byte. Ids beyond `num_bits` are never filtered.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitsetView<'a> {
    bits: &'a [u8],
    num_bits: usize,
}

impl<'a> BitsetView<'a> {
    pub fn new(bits: &'a [u8], num_bits: usize) -> Self {
        let num_bits = num_bits.min(bits.len() * 8);
        Self { bits, num_bits }
    }

    /// A view that filters nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.num_bits
    }

    /// Number of filtered-out documents.
    pub fn count(&self) -> usize {
        (0..self.num_bits)
            .filter(|&i| self.bits[i >> 3] & (1 << (i & 7)) != 0)
            .count()
    }
}

impl DocFilter for BitsetView<'_> {
    #[inline]
    fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    #[inline]
    fn test(&self, id: TableId) -> bool {
        let i = id as usize;
        i < self.num_bits && self.bits[i >> 3] & (1 << (i & 7)) != 0
    }
}

/// Deleted-document sets kept as roaring bitmaps.
impl DocFilter for RoaringBitmap {
    #[inline]
    fn is_empty(&self) -> bool {
        RoaringBitmap::is_empty(self)
    }

    #[inline]
    fn test(&self, id: TableId) -> bool {
        self.contains(id)
    }
}

/// Admits only the listed documents; everything else is filtered out.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    ids: Vec<TableId>,
}

impl AllowList {
    pub fn new(mut ids: Vec<TableId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    /// Admitted ids, ascending.
    pub fn ids(&self) -> &[TableId] {
        &self.ids
    }
}

impl DocFilter for AllowList {
    // An empty allow list still filters: it admits nothing.
    #[inline]
    fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    fn test(&self, id: TableId) -> bool {
        self.ids.binary_search(&id).is_err()
    }
}
