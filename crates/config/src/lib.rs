use anyhow::{Context, Result};
use config_rs::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Compression codecs accepted for `block.encoding`
pub const SUPPORTED_ENCODINGS: &[&str] = &["none", "gzip", "snappy", "zstd", "lz4"];

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Block writing and reading configuration
    #[serde(default)]
    pub block: BlockConfig,
}

/// Which backend blocks are stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Memory,
    S3,
}

/// Configuration for the object storage backend
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Backend kind: local, memory or s3
    #[serde(default)]
    pub backend: BackendKind,

    /// Local filesystem backend settings
    #[serde(default)]
    pub local: LocalConfig,

    /// S3 backend settings
    #[serde(default)]
    pub s3: S3Config,
}

/// Configuration for the local filesystem backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Root directory; blocks live at <path>/<tenant>/<block>/
    #[serde(default = "default_local_path")]
    pub path: String,
}

/// Configuration for S3-compatible object storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// S3 endpoint URL (e.g., "http://localhost:9000")
    /// Optional - if not provided, uses AWS SDK default endpoint for the region
    #[serde(default)]
    pub endpoint: String,

    /// S3 bucket name (e.g., "tempo")
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Prefix/path within the bucket (e.g., "traces")
    #[serde(default)]
    pub prefix: String,

    /// AWS region (required but ignored by Minio)
    #[serde(default = "default_region")]
    pub region: String,

    /// S3 access key ID
    #[serde(default)]
    pub access_key_id: String,

    /// S3 secret access key
    #[serde(default)]
    pub secret_access_key: String,

    /// S3 session token (optional, for temporary credentials)
    #[serde(default)]
    pub session_token: Option<String>,

    /// Allow HTTP connections (true for Minio, false for AWS S3)
    #[serde(default)]
    pub allow_http: bool,

    /// Use AWS environment credentials via AmazonS3Builder::from_env()
    #[serde(default)]
    pub use_env_credentials: bool,

    /// Maximum number of idle connections per host (default: 30)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Pool idle timeout in seconds (default: 120)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

/// Configuration for writing and reading blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockConfig {
    /// Target false positive rate of the trace id bloom filter (default: 0.01)
    #[serde(default = "default_bloom_fp")]
    pub bloom_fp: f64,

    /// Upper bound for the serialized size of one bloom shard (default: 100 KiB)
    #[serde(default = "default_bloom_shard_size_bytes")]
    pub bloom_shard_size_bytes: usize,

    /// Compression codec for data pages: none, gzip, snappy, zstd or lz4
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Maximum number of traces per parquet row group (default: 10000)
    #[serde(default = "default_row_group_size_rows")]
    pub row_group_size_rows: usize,

    /// Number of traces buffered before rows are handed to the column writer (default: 1000)
    #[serde(default = "default_flush_traces")]
    pub flush_traces: usize,

    /// Read-ahead segment size of the buffered range reader (default: 512 KiB)
    #[serde(default = "default_read_buffer_size_bytes")]
    pub read_buffer_size_bytes: usize,

    /// Number of segments the buffered range reader keeps (default: 32)
    #[serde(default = "default_read_buffer_count")]
    pub read_buffer_count: usize,

    /// Rows per record batch when scanning a block (default: 1024)
    #[serde(default = "default_search_batch_size")]
    pub search_batch_size: usize,
}

// Default value functions
fn default_local_path() -> String {
    "/var/tempo/traces".to_string()
}

fn default_bucket() -> String {
    "tempo".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_pool_max_idle_per_host() -> usize {
    30
}

fn default_pool_idle_timeout() -> u64 {
    120
}

fn default_bloom_fp() -> f64 {
    0.01
}

fn default_bloom_shard_size_bytes() -> usize {
    100 * 1024
}

fn default_encoding() -> String {
    "none".to_string()
}

fn default_row_group_size_rows() -> usize {
    10_000
}

fn default_flush_traces() -> usize {
    1_000
}

fn default_read_buffer_size_bytes() -> usize {
    512 * 1024
}

fn default_read_buffer_count() -> usize {
    32
}

fn default_search_batch_size() -> usize {
    1024
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            path: default_local_path(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: default_bucket(),
            prefix: String::new(),
            region: default_region(),
            access_key_id: "tempo".to_string(),
            secret_access_key: "supersecret".to_string(),
            session_token: None,
            allow_http: true,
            use_env_credentials: false,
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            bloom_fp: default_bloom_fp(),
            bloom_shard_size_bytes: default_bloom_shard_size_bytes(),
            encoding: default_encoding(),
            row_group_size_rows: default_row_group_size_rows(),
            flush_traces: default_flush_traces(),
            read_buffer_size_bytes: default_read_buffer_size_bytes(),
            read_buffer_count: default_read_buffer_count(),
            search_batch_size: default_search_batch_size(),
        }
    }
}

impl Config {
    /// Load Config with layered configuration priority:
    /// 1. Default values
    /// 2. TOML file (if provided)
    /// 3. Environment variables (TEMPO_ prefix, `__` between nested keys)
    /// 4. Explicit AWS credentials from environment (fallback for empty credentials)
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder()
            // Storage defaults
            .set_default("storage.backend", "local")?
            .set_default("storage.local.path", default_local_path())?
            .set_default("storage.s3.endpoint", "http://localhost:9000")?
            .set_default("storage.s3.bucket", "tempo")?
            .set_default("storage.s3.prefix", "")?
            .set_default("storage.s3.region", "us-east-1")?
            .set_default("storage.s3.access_key_id", "tempo")?
            .set_default("storage.s3.secret_access_key", "supersecret")?
            .set_default("storage.s3.allow_http", true)?
            .set_default("storage.s3.use_env_credentials", false)?
            .set_default("storage.s3.pool_max_idle_per_host", 30)?
            .set_default("storage.s3.pool_idle_timeout_secs", 120)?
            // Block defaults
            .set_default("block.bloom_fp", default_bloom_fp())?
            .set_default("block.bloom_shard_size_bytes", default_bloom_shard_size_bytes() as u64)?
            .set_default("block.encoding", default_encoding())?
            .set_default("block.row_group_size_rows", default_row_group_size_rows() as u64)?
            .set_default("block.flush_traces", default_flush_traces() as u64)?
            .set_default("block.read_buffer_size_bytes", default_read_buffer_size_bytes() as u64)?
            .set_default("block.read_buffer_count", default_read_buffer_count() as u64)?
            .set_default("block.search_batch_size", default_search_batch_size() as u64)?;

        // Add TOML file if provided
        if let Some(file_path) = config_file {
            let path = Path::new(file_path);
            if !path.exists() {
                anyhow::bail!("Configuration file not found: {}", path.display());
            }
            builder = builder.add_source(File::from(path));
        }

        // TEMPO_BLOCK__BLOOM_FP=0.05 overrides block.bloom_fp
        builder = builder.add_source(
            Environment::with_prefix("TEMPO")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut app_config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Fallback: If credentials are still empty, try AWS_* environment variables
        let s3 = &mut app_config.storage.s3;
        if s3.access_key_id.is_empty() {
            if let Ok(key) = std::env::var("AWS_ACCESS_KEY_ID") {
                s3.access_key_id = key;
            }
        }

        if s3.secret_access_key.is_empty() {
            if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
                s3.secret_access_key = secret;
            }
        }

        if s3.session_token.is_none() {
            if let Ok(token) = std::env::var("AWS_SESSION_TOKEN") {
                s3.session_token = Some(token);
            }
        }

        Ok(app_config)
    }

    /// Load Config from a TOML file
    ///
    /// Environment variables can still override values from the file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path
            .as_ref()
            .to_str()
            .context("Configuration path is not valid UTF-8")?;
        Self::load(Some(path))
    }

    /// Create a new Config from environment variables with defaults
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.block.validate()?;
        Ok(())
    }
}

impl StorageConfig {
    /// Validate the storage configuration
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            BackendKind::Local => {
                anyhow::ensure!(!self.local.path.is_empty(), "Local storage path cannot be empty");
                Ok(())
            }
            BackendKind::Memory => Ok(()),
            BackendKind::S3 => self.s3.validate(),
        }
    }
}

impl S3Config {
    /// Validate the S3 configuration
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.bucket.is_empty(), "S3 bucket cannot be empty");

        // If not using env credentials, validate that credentials are provided
        if !self.use_env_credentials {
            anyhow::ensure!(
                !self.endpoint.is_empty(),
                "S3 endpoint cannot be empty (unless use_env_credentials=true)"
            );
            anyhow::ensure!(
                !self.access_key_id.is_empty(),
                "S3 access key ID cannot be empty (unless use_env_credentials=true)"
            );
            anyhow::ensure!(
                !self.secret_access_key.is_empty(),
                "S3 secret access key cannot be empty (unless use_env_credentials=true)"
            );
        }

        Ok(())
    }
}

impl BlockConfig {
    /// Validate the block configuration
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.bloom_fp > 0.0 && self.bloom_fp < 1.0,
            "bloom_fp must be in (0, 1), got {}",
            self.bloom_fp
        );
        anyhow::ensure!(
            self.bloom_shard_size_bytes > 0,
            "bloom_shard_size_bytes must be positive"
        );
        anyhow::ensure!(
            SUPPORTED_ENCODINGS.contains(&self.encoding.as_str()),
            "unsupported block encoding '{}', expected one of {:?}",
            self.encoding,
            SUPPORTED_ENCODINGS
        );
        anyhow::ensure!(self.row_group_size_rows > 0, "row_group_size_rows must be positive");
        anyhow::ensure!(self.flush_traces > 0, "flush_traces must be positive");
        anyhow::ensure!(
            self.read_buffer_size_bytes > 0,
            "read_buffer_size_bytes must be positive"
        );
        anyhow::ensure!(self.read_buffer_count > 0, "read_buffer_count must be positive");
        anyhow::ensure!(self.search_batch_size > 0, "search_batch_size must be positive");
        Ok(())
    }
}
