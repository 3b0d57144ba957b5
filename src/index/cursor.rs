//! Filtered cursor over one posting list.

use crate::filter::DocFilter;
use crate::quant::StoredValue;
use crate::types::TableId;

/// Walks a column's postings in id order, skipping filtered-out documents.
///
/// Once exhausted, `cur_id` reports the total row count so exhausted cursors
/// sort after every live one.
pub(crate) struct Cursor<'a, Q, F: ?Sized> {
    ids: &'a [TableId],
    vals: &'a [Q],
    loc: usize,
    total_rows: TableId,
    filter: &'a F,
    /// Upper bound on this cursor's contribution to any document score.
    pub(crate) max_score: f32,
    pub(crate) q_value: f32,
    pub(crate) cur_id: TableId,
}

impl<'a, Q: StoredValue, F: DocFilter + ?Sized> Cursor<'a, Q, F> {
    pub(crate) fn new(
        ids: &'a [TableId],
        vals: &'a [Q],
        total_rows: TableId,
        max_score: f32,
        q_value: f32,
        filter: &'a F,
    ) -> Self {
        debug_assert_eq!(ids.len(), vals.len());
        let mut cursor = Self {
            ids,
            vals,
            loc: 0,
            total_rows,
            filter,
            max_score,
            q_value,
            cur_id: 0,
        };
        cursor.skip_filtered_ids();
        cursor.update_cur_id();
        cursor
    }

    #[inline]
    pub(crate) fn next(&mut self) {
        self.loc += 1;
        self.skip_filtered_ids();
        self.update_cur_id();
    }

    /// Move to the first unfiltered posting with id >= `target`.
    #[inline]
    pub(crate) fn seek(&mut self, target: TableId) {
        if self.loc < self.ids.len() {
            self.loc += self.ids[self.loc..].partition_point(|&id| id < target);
        }
        self.skip_filtered_ids();
        self.update_cur_id();
    }

    #[inline]
    pub(crate) fn cur_val(&self) -> f32 {
        self.vals[self.loc].to_f32()
    }

    #[inline]
    pub(crate) fn is_exhausted(&self) -> bool {
        self.loc >= self.ids.len()
    }

    #[inline]
    fn update_cur_id(&mut self) {
        self.cur_id = if self.is_exhausted() {
            self.total_rows
        } else {
            self.ids[self.loc]
        };
    }

    #[inline]
    fn skip_filtered_ids(&mut self) {
        if self.filter.is_empty() {
            return;
        }
        while self.loc < self.ids.len() && self.filter.test(self.ids[self.loc]) {
            self.loc += 1;
        }
    }
}
