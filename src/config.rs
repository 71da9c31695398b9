use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::embedding::RetryPolicy;
use crate::verse::EmbeddingType;

const CONFIG_FILE: &str = "config.yaml";

/// Default remote embedding model and its output size
const DEFAULT_REMOTE_MODEL: &str = "text-embedding-ada-002";
const DEFAULT_REMOTE_DIMENSIONS: usize = 1536;
const DEFAULT_REMOTE_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;
/// Default local sentence-embedding model
const DEFAULT_LOCAL_MODEL: &str = "all-MiniLM-L6-v2";

const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_CHUNK_SIZE: usize = 300;
const DEFAULT_POD_TYPE: &str = "p2.x1";
const DEFAULT_READY_TIMEOUT_SECS: u64 = 600;
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const DEFAULT_TOP_K: usize = 10;
const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

/// Which vector store answers queries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Corpus tables with inline embeddings, scored in process
    #[default]
    Memory,
    /// Verse CSVs locally, vectors in the managed index
    Remote,
}

/// How vectors are identified inside the remote index
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdScheme {
    /// Row offset in the verse table
    #[default]
    Offset,
    /// Hash of `book:chapter:verse`
    Location,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteEmbeddingConfig {
    #[serde(default = "default_remote_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_remote_model")]
    pub model: String,

    /// Output size of `model`
    #[serde(default = "default_remote_dimensions")]
    pub dimensions: usize,

    /// Falls back to OPENAI_API_KEY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for RemoteEmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_remote_endpoint(),
            model: default_remote_model(),
            dimensions: DEFAULT_REMOTE_DIMENSIONS,
            api_key: None,
            timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalEmbeddingConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_local_model")]
    pub model: String,
}

impl Default for LocalEmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_local_model(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Managed vector index settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Falls back to PINECONE_API_KEY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Falls back to PINECONE_ENV
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    #[serde(default = "default_pod_type")]
    pub pod_type: String,

    /// Index name -> embedding column it holds
    #[serde(default = "default_indexes")]
    pub indexes: BTreeMap<String, EmbeddingType>,

    /// Target rows per upsert request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default)]
    pub id_scheme: IdScheme,

    /// How long to wait for a created index to become ready, or a deleted
    /// one to disappear
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            environment: None,
            pod_type: default_pod_type(),
            indexes: default_indexes(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            id_scheme: IdScheme::default(),
            ready_timeout_secs: DEFAULT_READY_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_top_k")]
    pub default_k: usize,

    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            default_k: DEFAULT_TOP_K,
            listen: default_listen(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Translation name -> corpus file.
    ///
    /// Memory backend: parquet corpus table with embeddings.
    /// Remote backend: cleaned verse CSV.
    /// Relative paths resolve against the base directory.
    #[serde(default = "default_translations")]
    pub translations: BTreeMap<String, String>,

    #[serde(default = "default_translation")]
    pub default_translation: String,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub remote_embedding: RemoteEmbeddingConfig,

    #[serde(default)]
    pub local_embedding: LocalEmbeddingConfig,

    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            translations: default_translations(),
            default_translation: default_translation(),
            search: SearchConfig::default(),
            remote_embedding: RemoteEmbeddingConfig::default(),
            local_embedding: LocalEmbeddingConfig::default(),
            encoder: EncoderConfig::default(),
            index: IndexConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_remote_endpoint() -> String {
    DEFAULT_REMOTE_ENDPOINT.to_string()
}

fn default_remote_model() -> String {
    DEFAULT_REMOTE_MODEL.to_string()
}

fn default_remote_dimensions() -> usize {
    DEFAULT_REMOTE_DIMENSIONS
}

fn default_remote_timeout_secs() -> u64 {
    DEFAULT_REMOTE_TIMEOUT_SECS
}

fn default_local_model() -> String {
    DEFAULT_LOCAL_MODEL.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_pod_type() -> String {
    DEFAULT_POD_TYPE.to_string()
}

fn default_ready_timeout_secs() -> u64 {
    DEFAULT_READY_TIMEOUT_SECS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

// free tier pods only allow a single index
fn default_indexes() -> BTreeMap<String, EmbeddingType> {
    BTreeMap::from([("ada".to_string(), EmbeddingType::Remote)])
}

fn default_translations() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("NIV".to_string(), "data/NIV_clean.parquet".to_string()),
        ("NKJV".to_string(), "data/NKJV_clean.parquet".to_string()),
    ])
}

fn default_translation() -> String {
    "NIV".to_string()
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if self.translations.is_empty() {
            bail!("at least one translation must be configured");
        }

        if !self.translations.contains_key(&self.default_translation) {
            bail!(
                "default_translation {:?} is not one of the configured translations",
                self.default_translation
            );
        }

        if self.encoder.batch_size == 0 {
            bail!("encoder.batch_size must be greater than 0");
        }

        if self.index.chunk_size == 0 {
            bail!("index.chunk_size must be greater than 0");
        }

        if self.index.poll_interval_ms == 0 {
            bail!("index.poll_interval_ms must be greater than 0");
        }

        if self.search.default_k == 0 {
            bail!("search.default_k must be greater than 0");
        }

        if self.remote_embedding.dimensions == 0 {
            bail!("remote_embedding.dimensions must be greater than 0");
        }

        let retry = &self.remote_embedding.retry;
        if retry.max_attempts == 0 {
            bail!("remote_embedding.retry.max_attempts must be greater than 0");
        }
        if retry.min_wait_ms > retry.max_wait_ms {
            bail!(
                "remote_embedding.retry.min_wait_ms ({}) exceeds max_wait_ms ({})",
                retry.min_wait_ms,
                retry.max_wait_ms
            );
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults when
    /// missing.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            log::info!("Writing default config to {}", path.display());
            write_atomic(&path, &serde_yml::to_string(&Self::default())?)?;
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        write_atomic(&self.base_path.join(CONFIG_FILE), &config_str)
    }

    /// Corpus file for a translation, resolved against the base directory.
    pub fn translation_path(&self, translation: &str) -> Option<PathBuf> {
        self.translations
            .get(translation)
            .map(|p| self.resolve_path(p))
    }

    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    let temp_path = path.with_extension("yaml-tmp");
    std::fs::write(&temp_path, contents)
        .with_context(|| format!("failed to write {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
