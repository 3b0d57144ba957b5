//! Elacsym sparse - an inverted index for sparse vectors
//!
//! Provides:
//! - Inner-product and BM25 scoring over sparse rows
//! - Brute-force and WAND top-k search with optional refinement
//! - Quantized posting values (f32, f16, bf16, u8, u16)
//! - A row-oriented binary format, loadable onto the heap or into a
//!   memory-mapped region

pub mod config;
pub mod error;
pub mod filter;
pub mod heap;
pub mod index;
pub mod io;
pub mod quant;
pub mod scoring;
pub mod types;

pub use error::{Error, Result};
pub use filter::{AllowList, BitsetView, DocFilter};
pub use index::{
    Backing, DefaultIndexFactory, HeapInvertedIndex, IndexFactory, InvertedIndex, MapOptions,
    MmapInvertedIndex, SearchResult, SparseIndex,
};
pub use io::{MemoryReader, MemoryWriter};
pub use scoring::{DocValueComputer, SearchParams};
pub use types::{
    Bm25Params, IndexOptions, Label, MetricType, QuantType, SparseRow, TableId, INVALID_LABEL,
};
