use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::index::{Backing, MapOptions};
use crate::scoring::SearchParams;
use crate::types::{Bm25Params, IndexOptions, MetricType, QuantType};

const CONFIG_PATH_VAR: &str = "SPARSE_INDEX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "sparse_index.toml";
const ENV_PREFIX: &str = "SPARSE_INDEX";

/// Top-level configuration loaded from file + environment.
///
/// Environment overrides use `SPARSE_INDEX_<SECTION>__<KEY>`, e.g.
/// `SPARSE_INDEX_SEARCH__DROP_RATIO=0.2`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub index: IndexSection,
    pub search: SearchSection,
    pub mmap: MmapSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Load configuration from disk and environment, then validate it.
    pub fn load() -> Result<Self> {
        let config_path =
            env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config = Self::from_sources(Some(Path::new(&config_path)))
            .with_context(|| format!("failed to load configuration from {}", config_path))?;
        config.validate()?;
        Ok(config)
    }

    /// Build from an optional TOML file overlaid by environment variables.
    /// A missing file is skipped.
    pub fn from_sources(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path.filter(|p| p.exists()) {
            builder = builder.add_source(config::File::from(PathBuf::from(path)));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build()?;
        let mut config: Self = settings.try_deserialize()?;

        if config.logging.level.trim().is_empty() {
            config.logging.level = "info".to_string();
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let search = &self.search;
        if !(0.0..1.0).contains(&search.drop_ratio) {
            bail!(
                "search.drop_ratio must be within [0, 1), got {}",
                search.drop_ratio
            );
        }
        if search.refine_factor == 0 {
            bail!("search.refine_factor must be at least 1");
        }
        self.index
            .to_options()
            .validate()
            .context("invalid index section")?;
        if self.mmap.enabled && self.mmap.backing_dir.trim().is_empty() {
            bail!("mmap.backing_dir must be specified when mmap is enabled");
        }
        Ok(())
    }

    /// Search-time scorer parameters matching the configured index.
    pub fn search_params(&self) -> SearchParams {
        match self.index.metric {
            MetricType::Ip => SearchParams::ip(),
            MetricType::Bm25 => SearchParams::bm25(self.index.bm25.avgdl),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct IndexSection {
    pub metric: MetricType,
    pub use_wand: bool,
    pub quantization: QuantType,
    /// Only consulted when `metric` is `bm25`.
    pub bm25: Bm25Params,
}

impl IndexSection {
    pub fn to_options(&self) -> IndexOptions {
        let options = match self.metric {
            MetricType::Ip => IndexOptions::ip(),
            MetricType::Bm25 => IndexOptions::bm25(self.bm25),
        };
        options
            .with_wand(self.use_wand)
            .with_quantization(self.quantization)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub top_k: usize,
    pub drop_ratio: f32,
    pub refine_factor: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            top_k: 10,
            drop_ratio: 0.0,
            refine_factor: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MmapSection {
    pub enabled: bool,
    /// Directory for the transient backing files of mmap loads.
    pub backing_dir: String,
    pub populate: bool,
}

impl Default for MmapSection {
    fn default() -> Self {
        Self {
            enabled: false,
            backing_dir: "./data".to_string(),
            populate: false,
        }
    }
}

impl MmapSection {
    pub fn backing(&self) -> Backing {
        if self.enabled {
            Backing::Mmap
        } else {
            Backing::Heap
        }
    }

    pub fn map_options(&self) -> MapOptions {
        MapOptions {
            populate: self.populate,
        }
    }

    pub fn backing_path(&self, name: &str) -> PathBuf {
        PathBuf::from(&self.backing_dir).join(name)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `logging.level`.
pub fn init_tracing(logging: &LoggingSection) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging.level.clone()))
        .unwrap_or_else(|_| EnvFilter::new("elacsym_sparse=info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match logging.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
    .context("failed to install tracing subscriber")?;

    Ok(())
}
