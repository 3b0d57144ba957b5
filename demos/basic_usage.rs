//! Build a small BM25 index, persist it, reload it onto an mmap backend and query it.
//!
//! Run with `cargo run --example basic_usage`. Configuration is read from
//! `sparse_index.toml` (or `SPARSE_INDEX_CONFIG`) and `SPARSE_INDEX_*` variables.

use anyhow::Result;

use elacsym_sparse::config::{init_tracing, AppConfig};
use elacsym_sparse::{
    Backing, BitsetView, DefaultIndexFactory, IndexFactory, MemoryReader, MemoryWriter,
    MetricType, SparseRow,
};

fn main() -> Result<()> {
    let mut config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    // Tiny vocabulary: term id -> term frequency per document.
    let docs = vec![
        SparseRow::new(vec![(0, 2.0), (3, 1.0)]),
        SparseRow::new(vec![(1, 1.0), (3, 3.0)]),
        SparseRow::new(vec![(0, 1.0), (1, 1.0), (2, 1.0)]),
        SparseRow::new(vec![(2, 4.0)]),
    ];
    let avgdl = docs.iter().map(SparseRow::value_sum).sum::<f32>() / docs.len() as f32;

    config.index.metric = MetricType::Bm25;
    config.index.bm25.avgdl = avgdl;
    let options = config.index.to_options();

    let factory = DefaultIndexFactory;
    let mut index = factory.create(&options, Backing::Heap)?;
    index.add(&docs, 4)?;

    let mut writer = MemoryWriter::new();
    index.save(&mut writer)?;
    let bytes = writer.into_bytes();
    tracing::info!(bytes = bytes.len(), "serialized index");

    std::fs::create_dir_all(&config.mmap.backing_dir)?;
    let mut mapped = factory.create(&options, Backing::Mmap)?;
    mapped.load(
        &mut MemoryReader::new(&bytes),
        config.mmap.map_options(),
        &config.mmap.backing_path("basic_usage.mmap"),
    )?;

    let computer = mapped.get_doc_value_computer(&config.search_params())?;
    let query = SparseRow::new(vec![(0, 1.0), (3, 1.0)]);
    let result = mapped.search(
        &query,
        config.search.top_k,
        config.search.drop_ratio,
        config.search.refine_factor,
        &BitsetView::empty(),
        &computer,
    );

    for (rank, (label, score)) in result.hits().enumerate() {
        println!("#{} doc {} score {:.4}", rank + 1, label, score);
    }
    Ok(())
}
