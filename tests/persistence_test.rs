//! Save / load round trips onto heap and mmap backends.

mod common;

use std::path::Path;

use common::{assert_close, corpus_strategy, random_corpus, random_row, row_strategy};
use elacsym_sparse::{
    Backing, BitsetView, Bm25Params, DefaultIndexFactory, Error, IndexFactory, IndexOptions,
    MapOptions, MemoryReader, MemoryWriter, QuantType, SearchParams, SparseIndex, SparseRow,
};
use proptest::prelude::*;
use tempfile::TempDir;

const DIM: u32 = 32;

fn build(options: &IndexOptions, rows: &[SparseRow]) -> Box<dyn SparseIndex> {
    let mut index = DefaultIndexFactory.create(options, Backing::Heap).unwrap();
    index.add(rows, DIM as usize).unwrap();
    index
}

fn save(index: &dyn SparseIndex) -> Vec<u8> {
    let mut writer = MemoryWriter::new();
    index.save(&mut writer).unwrap();
    writer.into_bytes().to_vec()
}

fn load(options: &IndexOptions, backing: Backing, bytes: &[u8], dir: &TempDir) -> Box<dyn SparseIndex> {
    let mut index = DefaultIndexFactory.create(options, backing).unwrap();
    index
        .load(
            &mut MemoryReader::new(bytes),
            MapOptions::default(),
            &dir.path().join("index.mmap"),
        )
        .unwrap();
    index
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn round_trip_preserves_raw_distances(
        rows in corpus_strategy(DIM, 10, 40),
        query in row_strategy(DIM, 10),
        use_wand in any::<bool>(),
        mmap in any::<bool>(),
    ) {
        let options = IndexOptions::ip().with_wand(use_wand);
        let original = build(&options, &rows);
        let bytes = save(original.as_ref());

        let dir = TempDir::new().unwrap();
        let backing = if mmap { Backing::Mmap } else { Backing::Heap };
        let loaded = load(&options, backing, &bytes, &dir);
        prop_assert_eq!(loaded.n_rows(), rows.len());
        prop_assert_eq!(loaded.n_cols(), DIM as usize);

        let computer = loaded.get_doc_value_computer(&SearchParams::ip()).unwrap();
        for (doc, _) in rows.iter().enumerate() {
            let expected = original.get_raw_distance(doc as u32, &query, &computer);
            let actual = loaded.get_raw_distance(doc as u32, &query, &computer);
            assert_close(actual, expected, "raw distance after load");
        }
        prop_assert_eq!(save(loaded.as_ref()), bytes);
    }
}

#[test]
fn test_quantized_round_trip_stays_within_tolerance() {
    let mut rng = fastrand::Rng::with_seed(21);
    let rows = random_corpus(&mut rng, 100, DIM, 10);
    let dir = TempDir::new().unwrap();

    for quantization in [QuantType::F16, QuantType::Bf16] {
        let options = IndexOptions::ip().with_quantization(quantization);
        let original = build(&options, &rows);
        let bytes = save(original.as_ref());
        let loaded = load(&options, Backing::Mmap, &bytes, &dir);

        let computer = loaded.get_doc_value_computer(&SearchParams::ip()).unwrap();
        let query = random_row(&mut rng, DIM, 10);
        for doc in 0..rows.len() as u32 {
            let exact: f32 = rows[doc as usize]
                .iter()
                .filter_map(|(d, v)| query.iter().find(|(qd, _)| *qd == d).map(|(_, qv)| qv * v))
                .sum();
            let actual = loaded.get_raw_distance(doc, &query, &computer);
            // bf16 keeps 8 mantissa bits.
            assert!(
                (actual - exact).abs() <= 0.02 * exact.abs().max(1.0),
                "{:?} doc {}: {} vs {}",
                quantization,
                doc,
                actual,
                exact
            );
        }
    }
}

#[test]
fn test_mmap_bm25_wand_search_matches_heap() {
    let mut rng = fastrand::Rng::with_seed(34);
    let rows = random_corpus(&mut rng, 250, DIM, 10);
    let params = Bm25Params {
        avgdl: 15.0,
        ..Bm25Params::default()
    };
    let options = IndexOptions::bm25(params).with_wand(true);
    let heap = build(&options, &rows);
    let bytes = save(heap.as_ref());
    let dir = TempDir::new().unwrap();
    let mapped = load(&options, Backing::Mmap, &bytes, &dir);

    assert!(mapped.is_mmapped());
    // The backing file is unlinked as soon as it is mapped.
    assert!(!dir.path().join("index.mmap").exists());

    let computer = mapped
        .get_doc_value_computer(&SearchParams::bm25(params.avgdl))
        .unwrap();
    for _ in 0..20 {
        let query = random_row(&mut rng, DIM, 6);
        let a = heap.search(&query, 10, 0.0, 1, &BitsetView::empty(), &computer);
        let b = mapped.search(&query, 10, 0.0, 1, &BitsetView::empty(), &computer);
        assert_eq!(a.labels, b.labels);
    }
}

#[test]
fn test_mmap_index_is_read_only() {
    let rows = vec![SparseRow::new(vec![(1, 1.0)])];
    let options = IndexOptions::ip();
    let bytes = save(build(&options, &rows).as_ref());
    let dir = TempDir::new().unwrap();
    let mut mapped = load(&options, Backing::Mmap, &bytes, &dir);

    let err = mapped.add(&rows, DIM as usize).unwrap_err();
    assert!(matches!(err, Error::ContractViolation(_)));
    assert!(!err.is_recoverable());
    assert_eq!(mapped.n_rows(), 1);
}

#[test]
fn test_empty_index_round_trip() {
    let options = IndexOptions::ip();
    let empty = DefaultIndexFactory.create(&options, Backing::Heap).unwrap();
    let bytes = save(empty.as_ref());
    assert_eq!(bytes.len(), 20);

    let dir = TempDir::new().unwrap();
    let mapped = load(&options, Backing::Mmap, &bytes, &dir);
    assert_eq!(mapped.n_rows(), 0);
    let result = mapped.search(
        &SparseRow::new(vec![(0, 1.0)]),
        3,
        0.0,
        1,
        &BitsetView::empty(),
        &mapped.get_doc_value_computer(&SearchParams::default()).unwrap(),
    );
    assert_eq!(result.hits().count(), 0);
}

#[test]
fn test_heap_load_ignores_backing_path() {
    let rows = vec![SparseRow::new(vec![(2, 3.0)])];
    let options = IndexOptions::ip();
    let bytes = save(build(&options, &rows).as_ref());

    let mut index = DefaultIndexFactory.create(&options, Backing::Heap).unwrap();
    index
        .load(
            &mut MemoryReader::new(&bytes),
            MapOptions::populate(),
            Path::new("/nonexistent/dir/file"),
        )
        .unwrap();
    assert_eq!(index.n_rows(), 1);
}
