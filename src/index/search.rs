//! Query evaluation: brute force, WAND, refinement and raw distances.

use super::cursor::Cursor;
use super::store::PostingStore;
use super::InvertedIndex;
use crate::filter::{AllowList, DocFilter};
use crate::heap::MaxMinHeap;
use crate::quant::StoredValue;
use crate::scoring::{with_scorer, DocValueComputer, Scorer};
use crate::types::{Label, SparseRow, TableId, INVALID_LABEL};

/// Fixed-size top-k output ordered by descending score.
///
/// Slots without a document hold `NaN` and [`INVALID_LABEL`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub distances: Vec<f32>,
    pub labels: Vec<Label>,
}

impl SearchResult {
    pub fn sentinel(k: usize) -> Self {
        Self {
            distances: vec![f32::NAN; k],
            labels: vec![INVALID_LABEL; k],
        }
    }

    pub fn k(&self) -> usize {
        self.labels.len()
    }

    /// Filled (label, score) pairs in rank order.
    pub fn hits(&self) -> impl Iterator<Item = (Label, f32)> + '_ {
        self.labels
            .iter()
            .zip(self.distances.iter())
            .filter(|(&label, _)| label != INVALID_LABEL)
            .map(|(&label, &score)| (label, score))
    }
}

/// Value at rank `floor(drop_ratio * len)` of the query magnitudes; entries
/// strictly below it are ignored. Reorders `values`.
pub(crate) fn get_threshold(values: &mut [f32], drop_ratio: f32) -> f32 {
    // `as` saturates, so a negative or NaN ratio drops nothing.
    let drop_count = (drop_ratio * values.len() as f32) as usize;
    if drop_count == 0 || values.is_empty() {
        return 0.0;
    }
    let pos = drop_count.min(values.len() - 1);
    let (_, nth, _) = values.select_nth_unstable_by(pos, f32::total_cmp);
    *nth
}

fn query_threshold(query: &SparseRow, drop_ratio: f32) -> f32 {
    let mut values: Vec<f32> = query.iter().map(|(_, v)| v.abs()).collect();
    get_threshold(&mut values, drop_ratio)
}

impl<Q: StoredValue, S: PostingStore<Q>> InvertedIndex<Q, S> {
    /// Top-k documents for `query`.
    ///
    /// Query entries whose magnitude falls below the `drop_ratio` threshold
    /// are ignored. With `refine_factor > 1` (and a non-zero drop ratio),
    /// `k * refine_factor` candidates are rescored exactly before the final
    /// top-k is taken.
    pub fn search<F: DocFilter + ?Sized>(
        &self,
        query: &SparseRow,
        k: usize,
        drop_ratio: f32,
        refine_factor: usize,
        filter: &F,
        computer: &DocValueComputer,
    ) -> SearchResult {
        let mut result = SearchResult::sentinel(k);
        if k == 0 || query.is_empty() {
            return result;
        }

        let q_threshold = query_threshold(query, drop_ratio);
        // Nothing was dropped, so there is nothing to refine.
        let refine_factor = if drop_ratio == 0.0 {
            1
        } else {
            refine_factor.max(1)
        };

        with_scorer!(computer, scorer => {
            let mut heap = MaxMinHeap::with_reserve(k.saturating_mul(refine_factor), self.n_rows);
            self.search_into_heap(query, q_threshold, &mut heap, filter, scorer);
            if refine_factor == 1 {
                heap.drain_into(&mut result.distances, &mut result.labels);
            } else {
                self.refine_and_collect(query, heap, k, &mut result, scorer);
            }
        });

        tracing::trace!(
            k,
            drop_ratio,
            refine_factor,
            q_threshold,
            hits = result.hits().count(),
            "sparse search"
        );
        result
    }

    /// Scores for every document, zeroed where `filter` excludes them.
    /// Scores are approximate once `drop_ratio` drops query entries.
    pub fn get_all_distances<F: DocFilter + ?Sized>(
        &self,
        query: &SparseRow,
        drop_ratio: f32,
        filter: &F,
        computer: &DocValueComputer,
    ) -> Vec<f32> {
        let q_threshold = query_threshold(query, drop_ratio);
        let mut distances =
            with_scorer!(computer, scorer => self.compute_all_distances(query, q_threshold, scorer));
        if !filter.is_empty() {
            for (i, distance) in distances.iter_mut().enumerate() {
                if filter.test(i as TableId) {
                    *distance = 0.0;
                }
            }
        }
        distances
    }

    /// Every unfiltered document with `radius < score <= range_filter`,
    /// ordered by descending score.
    pub fn range_search<F: DocFilter + ?Sized>(
        &self,
        query: &SparseRow,
        radius: f32,
        range_filter: Option<f32>,
        drop_ratio: f32,
        filter: &F,
        computer: &DocValueComputer,
    ) -> Vec<(Label, f32)> {
        let upper = range_filter.unwrap_or(f32::INFINITY);
        let distances = self.get_all_distances(query, drop_ratio, filter, computer);
        let mut hits: Vec<(Label, f32)> = distances
            .into_iter()
            .enumerate()
            .filter(|&(i, score)| {
                score > radius && score <= upper && !filter.excludes(i as TableId)
            })
            .map(|(i, score)| (i as Label, score))
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hits
    }

    /// Exact score of document `vec_id`, ignoring any drop ratio.
    pub fn get_raw_distance(
        &self,
        vec_id: TableId,
        query: &SparseRow,
        computer: &DocValueComputer,
    ) -> f32 {
        let doc_len = self.store.row_sum(vec_id);
        let mut distance = 0.0f32;
        for (idx, val) in query.iter() {
            let Some(col) = self.column(idx) else {
                continue;
            };
            let ids = self.store.ids(col);
            if let Ok(pos) = ids.binary_search(&vec_id) {
                distance += val * computer.compute(self.store.vals(col)[pos].to_f32(), doc_len);
            }
        }
        distance
    }

    fn search_into_heap<F: DocFilter + ?Sized, C: Scorer>(
        &self,
        query: &SparseRow,
        q_threshold: f32,
        heap: &mut MaxMinHeap,
        filter: &F,
        scorer: C,
    ) {
        if self.options.use_wand {
            self.search_wand(query, q_threshold, heap, filter, scorer);
        } else {
            self.search_brute_force(query, q_threshold, heap, filter, scorer);
        }
    }

    #[inline]
    fn doc_len<C: Scorer>(&self, doc: TableId) -> f32 {
        if C::NEEDS_DOC_LEN {
            self.store.row_sum(doc)
        } else {
            0.0
        }
    }

    fn compute_all_distances<C: Scorer>(
        &self,
        query: &SparseRow,
        q_threshold: f32,
        scorer: C,
    ) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.n_rows];
        for (idx, v) in query.iter() {
            if v.abs() < q_threshold {
                continue;
            }
            let Some(col) = self.column(idx) else {
                continue;
            };
            let ids = self.store.ids(col);
            let vals = self.store.vals(col);
            for (&doc_id, &val) in ids.iter().zip(vals) {
                scores[doc_id as usize] += v * scorer.score(val.to_f32(), self.doc_len::<C>(doc_id));
            }
        }
        scores
    }

    fn search_brute_force<F: DocFilter + ?Sized, C: Scorer>(
        &self,
        query: &SparseRow,
        q_threshold: f32,
        heap: &mut MaxMinHeap,
        filter: &F,
        scorer: C,
    ) {
        let scores = self.compute_all_distances(query, q_threshold, scorer);
        for (i, &score) in scores.iter().enumerate() {
            if score != 0.0 && !filter.excludes(i as TableId) {
                heap.push(i as TableId, score);
            }
        }
    }

    fn search_wand<F: DocFilter + ?Sized, C: Scorer>(
        &self,
        query: &SparseRow,
        q_threshold: f32,
        heap: &mut MaxMinHeap,
        filter: &F,
        scorer: C,
    ) {
        let total_rows = self.n_rows as TableId;
        let mut cursors: Vec<Cursor<'_, Q, F>> = query
            .iter()
            .filter(|(_, val)| val.abs() >= q_threshold)
            .filter_map(|(idx, val)| {
                let col = self.column(idx)?;
                Some(Cursor::new(
                    self.store.ids(col),
                    self.store.vals(col),
                    total_rows,
                    self.store.max_score(col) * val,
                    val,
                    filter,
                ))
            })
            .collect();
        if cursors.is_empty() {
            return;
        }

        cursors.sort_by_key(|c| c.cur_id);
        loop {
            let threshold = if heap.full() {
                heap.top().map_or(0.0, |top| top.score)
            } else {
                0.0
            };

            // Pivot: first cursor at which the summed upper bounds beat the threshold.
            let mut upper_bound = 0.0f32;
            let mut pivot = None;
            for (i, cursor) in cursors.iter().enumerate() {
                if cursor.is_exhausted() {
                    break;
                }
                upper_bound += cursor.max_score;
                if upper_bound > threshold {
                    pivot = Some(i);
                    break;
                }
            }
            let Some(pivot) = pivot else {
                break;
            };

            let pivot_id = cursors[pivot].cur_id;
            if pivot_id == cursors[0].cur_id {
                let doc_len = self.doc_len::<C>(pivot_id);
                let mut score = 0.0f32;
                for cursor in cursors.iter_mut() {
                    if cursor.cur_id != pivot_id {
                        break;
                    }
                    score += cursor.q_value * scorer.score(cursor.cur_val(), doc_len);
                    cursor.next();
                }
                heap.push(pivot_id, score);
                cursors.sort_by_key(|c| c.cur_id);
            } else {
                // Advance the last cursor before the pivot's run of equal ids.
                let mut next_list = pivot;
                while cursors[next_list].cur_id == pivot_id {
                    next_list -= 1;
                }
                cursors[next_list].seek(pivot_id);
                for i in next_list + 1..cursors.len() {
                    if cursors[i].cur_id >= cursors[i - 1].cur_id {
                        break;
                    }
                    cursors.swap(i, i - 1);
                }
            }
        }
    }

    fn refine_and_collect<C: Scorer>(
        &self,
        query: &SparseRow,
        mut candidates: MaxMinHeap,
        k: usize,
        result: &mut SearchResult,
        scorer: C,
    ) {
        let mut docids = Vec::with_capacity(candidates.len());
        while let Some(doc) = candidates.pop() {
            docids.push(doc.id);
        }

        let allow = AllowList::new(docids);
        let mut heap = MaxMinHeap::with_reserve(k, allow.ids().len());
        self.search_into_heap(query, 0.0, &mut heap, &allow, scorer);
        heap.drain_into(&mut result.distances, &mut result.labels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::BitsetView;
    use crate::index::HeapInvertedIndex;
    use crate::types::{Bm25Params, IndexOptions};

    fn row(entries: &[(TableId, f32)]) -> SparseRow {
        SparseRow::new(entries.to_vec())
    }

    fn two_row_index(use_wand: bool) -> HeapInvertedIndex<f32> {
        let mut index =
            HeapInvertedIndex::<f32>::new(IndexOptions::ip().with_wand(use_wand)).unwrap();
        index
            .add(&[row(&[(3, 1.0), (7, 2.0)]), row(&[(3, 0.5)])], 8)
            .unwrap();
        index
    }

    #[test]
    fn test_threshold() {
        let mut values = vec![0.4, 0.1, 0.3, 0.2];
        assert_eq!(get_threshold(&mut values, 0.0), 0.0);
        assert_eq!(get_threshold(&mut values, 0.5), 0.3);
        assert_eq!(get_threshold(&mut values, 0.25), 0.2);
        // Too small a ratio to drop a single entry.
        assert_eq!(get_threshold(&mut values, 0.2), 0.0);
        assert_eq!(get_threshold(&mut [], 0.9), 0.0);
    }

    #[test]
    fn test_two_row_scenario_on_both_engines() {
        let query = row(&[(3, 1.0), (7, 1.0)]);
        for use_wand in [false, true] {
            let index = two_row_index(use_wand);
            let result = index.search(
                &query,
                2,
                0.0,
                1,
                &BitsetView::empty(),
                &DocValueComputer::Original,
            );
            assert_eq!(result.labels, vec![0, 1], "use_wand = {}", use_wand);
            assert_eq!(result.distances, vec![3.0, 0.5], "use_wand = {}", use_wand);
        }
    }

    #[test]
    fn test_unfilled_slots_are_sentinels() {
        let index = two_row_index(true);
        let result = index.search(
            &row(&[(7, 1.0)]),
            3,
            0.0,
            1,
            &BitsetView::empty(),
            &DocValueComputer::Original,
        );
        assert_eq!(result.labels, vec![0, INVALID_LABEL, INVALID_LABEL]);
        assert_eq!(result.distances[0], 2.0);
        assert!(result.distances[1].is_nan() && result.distances[2].is_nan());
        assert_eq!(result.hits().count(), 1);
    }

    #[test]
    fn test_empty_query_and_zero_k() {
        let index = two_row_index(false);
        let filter = BitsetView::empty();
        let result = index.search(&row(&[]), 2, 0.0, 1, &filter, &DocValueComputer::Original);
        assert_eq!(result.hits().count(), 0);
        assert_eq!(result.k(), 2);

        let result = index.search(
            &row(&[(3, 1.0)]),
            0,
            0.0,
            1,
            &filter,
            &DocValueComputer::Original,
        );
        assert_eq!(result.k(), 0);
    }

    #[test]
    fn test_filter_excludes_documents() {
        let bits = [0b0000_0001u8];
        let filter = BitsetView::new(&bits, 2);
        let query = row(&[(3, 1.0), (7, 1.0)]);
        for use_wand in [false, true] {
            let index = two_row_index(use_wand);
            let result = index.search(&query, 2, 0.0, 1, &filter, &DocValueComputer::Original);
            assert_eq!(result.labels[0], 1);
            assert_eq!(result.distances[0], 0.5);
            assert_eq!(result.labels[1], INVALID_LABEL);
        }
    }

    #[test]
    fn test_unknown_query_dimensions_are_ignored() {
        let index = two_row_index(true);
        let result = index.search(
            &row(&[(1000, 5.0), (3, 2.0)]),
            1,
            0.0,
            1,
            &BitsetView::empty(),
            &DocValueComputer::Original,
        );
        assert_eq!(result.labels, vec![0]);
        assert_eq!(result.distances, vec![2.0]);
    }

    #[test]
    fn test_get_all_distances_zeroes_filtered() {
        let index = two_row_index(false);
        let query = row(&[(3, 1.0), (7, 1.0)]);
        let all = index.get_all_distances(&query, 0.0, &BitsetView::empty(), &DocValueComputer::Original);
        assert_eq!(all, vec![3.0, 0.5]);

        let bits = [0b0000_0010u8];
        let all = index.get_all_distances(
            &query,
            0.0,
            &BitsetView::new(&bits, 2),
            &DocValueComputer::Original,
        );
        assert_eq!(all, vec![3.0, 0.0]);

        let all = index.get_all_distances(&row(&[]), 0.0, &BitsetView::empty(), &DocValueComputer::Original);
        assert_eq!(all, vec![0.0, 0.0]);
    }

    #[test]
    fn test_drop_ratio_prunes_small_query_entries() {
        let index = two_row_index(false);
        // Drops the 0.1 entry on dim 7.
        let query = row(&[(3, 1.0), (7, 0.1)]);
        let all = index.get_all_distances(&query, 0.5, &BitsetView::empty(), &DocValueComputer::Original);
        assert_eq!(all, vec![1.0, 0.5]);
    }

    #[test]
    fn test_raw_distance_is_exact() {
        let index = two_row_index(true);
        let query = row(&[(3, 1.0), (7, 1.0), (42, 9.0)]);
        assert_eq!(index.get_raw_distance(0, &query, &DocValueComputer::Original), 3.0);
        assert_eq!(index.get_raw_distance(1, &query, &DocValueComputer::Original), 0.5);
        assert_eq!(index.get_raw_distance(5, &query, &DocValueComputer::Original), 0.0);
    }

    #[test]
    fn test_refine_recovers_pruned_scores() {
        let mut index = HeapInvertedIndex::<f32>::new(IndexOptions::ip()).unwrap();
        index
            .add(
                &[
                    row(&[(0, 1.0)]),
                    row(&[(0, 0.9), (1, 0.5)]),
                    row(&[(1, 1.0)]),
                ],
                2,
            )
            .unwrap();
        let query = row(&[(0, 1.0), (1, 0.5)]);
        let filter = BitsetView::empty();

        // Without refinement the dropped dim 1 is missing from the scores.
        let coarse = index.search(&query, 1, 0.5, 1, &filter, &DocValueComputer::Original);
        assert_eq!(coarse.labels, vec![0]);
        assert_eq!(coarse.distances, vec![1.0]);

        let refined = index.search(&query, 1, 0.5, 3, &filter, &DocValueComputer::Original);
        assert_eq!(refined.labels, vec![1]);
        assert!((refined.distances[0] - 1.15).abs() < 1e-6);
    }

    #[test]
    fn test_huge_refine_factor_is_bounded_by_rows() {
        let index = two_row_index(false);
        let query = row(&[(3, 1.0), (7, 1.0)]);
        let result = index.search(
            &query,
            2,
            0.5,
            usize::MAX / 2,
            &BitsetView::empty(),
            &DocValueComputer::Original,
        );
        assert_eq!(result.labels, vec![0, 1]);
        assert_eq!(result.distances, vec![3.0, 0.5]);
    }

    #[test]
    fn test_range_search() {
        let index = two_row_index(false);
        let query = row(&[(3, 1.0), (7, 1.0)]);
        let filter = BitsetView::empty();
        let hits = index.range_search(&query, 0.0, None, 0.0, &filter, &DocValueComputer::Original);
        assert_eq!(hits, vec![(0, 3.0), (1, 0.5)]);

        let hits =
            index.range_search(&query, 0.4, Some(1.0), 0.0, &filter, &DocValueComputer::Original);
        assert_eq!(hits, vec![(1, 0.5)]);
    }

    #[test]
    fn test_bm25_engines_agree() {
        let params = Bm25Params {
            k1: 1.2,
            b: 0.75,
            avgdl: 3.0,
            max_score_ratio: 1.0,
        };
        let rows = vec![
            row(&[(0, 2.0), (1, 1.0)]),
            row(&[(0, 1.0)]),
            row(&[(1, 3.0), (2, 1.0), (0, 1.0)]),
        ];
        let query = row(&[(0, 1.0), (1, 1.0)]);
        let computer = DocValueComputer::bm25(1.2, 0.75, 3.0);

        let mut results = Vec::new();
        for use_wand in [false, true] {
            let mut index =
                HeapInvertedIndex::<f32>::new(IndexOptions::bm25(params).with_wand(use_wand))
                    .unwrap();
            index.add(&rows, 3).unwrap();
            results.push(index.search(&query, 3, 0.0, 1, &BitsetView::empty(), &computer));

            let raw = index.get_raw_distance(0, &query, &computer);
            let expected = computer.compute(2.0, 3.0) + computer.compute(1.0, 3.0);
            assert!((raw - expected).abs() < 1e-6);
        }
        assert_eq!(results[0].labels, results[1].labels);
        for (a, b) in results[0].distances.iter().zip(&results[1].distances) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
