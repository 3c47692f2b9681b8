//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (nested keys separated by `__`, e.g. `APP_SEARCH__MULTI_TENANT=false`).
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against the directory the configuration was loaded from.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::document::IndexingPolicy;
use crate::error::{Error, Result};
use crate::types::FusionConfig;

pub struct Config {
    figment: Figment,
    base_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Load `config.toml` and the `RUST_ENV` overlay from `dir`, then `APP_*` env vars.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file(dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment, base_dir: dir.to_path_buf() };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment, base_dir: &Path) -> Self {
        Self { figment: Figment::from(Serialized::defaults(Settings::default())).merge(figment), base_dir: base_dir.to_path_buf() }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    /// Extract and validate the full typed settings.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn validate_for_env(&self, env: &str) -> Result<()> {
        if matches!(env, "prod" | "production") {
            let multi_tenant: bool = self.get("search.multi_tenant")?;
            if !multi_tenant {
                return Err(Error::InvalidConfig("search.multi_tenant must stay enabled in production".into()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub search: SearchSettings,
    pub indexing: IndexingSettings,
    pub embedding: EmbeddingSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.search.validate()?;
        if self.indexing.batch_size == 0 {
            return Err(Error::InvalidConfig("indexing.batch_size must be positive".into()));
        }
        if self.embedding.dim == 0 {
            return Err(Error::InvalidConfig("embedding.dim must be positive".into()));
        }
        if self.storage.vector_table.trim().is_empty() {
            return Err(Error::InvalidConfig("storage.vector_table must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub text_index_dir: String,
    pub vector_db_dir: String,
    pub vector_table: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            text_index_dir: "data/indexes/tantivy".into(),
            vector_db_dir: "data/indexes/lancedb".into(),
            vector_table: "documents".into(),
        }
    }
}

impl StorageSettings {
    pub fn text_index_path(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.text_index_dir)
    }

    pub fn vector_db_path(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.vector_db_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// When enabled every request must name a tenant.
    pub multi_tenant: bool,
    pub top_k_cap: usize,
    pub default_top_k: usize,
    pub per_source_fetch_k: usize,
    pub weight_keyword: f32,
    pub weight_vector: f32,
    pub rank_offset_constant: f32,
    pub retriever_timeout_ms: u64,
    pub min_relevance_score: Option<f32>,
    pub min_similarity_score: Option<f32>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        let fusion = FusionConfig::default();
        Self {
            multi_tenant: true,
            top_k_cap: 100,
            default_top_k: fusion.top_k,
            per_source_fetch_k: fusion.per_source_fetch_k,
            weight_keyword: fusion.weight_keyword,
            weight_vector: fusion.weight_vector,
            rank_offset_constant: fusion.rank_offset_constant,
            retriever_timeout_ms: 5_000,
            min_relevance_score: None,
            min_similarity_score: None,
        }
    }
}

impl SearchSettings {
    pub fn retriever_timeout(&self) -> Duration {
        Duration::from_millis(self.retriever_timeout_ms)
    }

    /// Fusion parameters for the configured defaults.
    pub fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            top_k: self.default_top_k,
            per_source_fetch_k: self.per_source_fetch_k,
            weight_keyword: self.weight_keyword,
            weight_vector: self.weight_vector,
            rank_offset_constant: self.rank_offset_constant,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.top_k_cap == 0 {
            return Err(Error::InvalidConfig("search.top_k_cap must be positive".into()));
        }
        if self.default_top_k > self.top_k_cap {
            return Err(Error::InvalidConfig(format!(
                "search.default_top_k ({}) exceeds search.top_k_cap ({})",
                self.default_top_k, self.top_k_cap
            )));
        }
        if self.retriever_timeout_ms == 0 {
            return Err(Error::InvalidConfig("search.retriever_timeout_ms must be positive".into()));
        }
        if let Some(s) = self.min_similarity_score {
            if !(0.0..=1.0).contains(&s) {
                return Err(Error::InvalidConfig(format!("search.min_similarity_score must be in [0,1], got {s}")));
            }
        }
        self.fusion_config()
            .validate()
            .map_err(|e| Error::InvalidConfig(format!("search fusion defaults: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingSettings {
    pub policy: IndexingPolicy,
    pub batch_size: usize,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self { policy: IndexingPolicy::Unweighted, batch_size: 256 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    /// Deterministic feature hashing; no model files required.
    #[default]
    Hashing,
    /// Local transformer model loaded from `model_dir`.
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderKind,
    pub dim: usize,
    pub model_dir: Option<String>,
    /// Prefix prepended to queries in query mode; `None` disables query mode.
    pub query_instruction: Option<String>,
    pub max_len: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { provider: EmbeddingProviderKind::Hashing, dim: 1024, model_dir: None, query_instruction: None, max_len: 256 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}
