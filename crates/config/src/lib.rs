//! Layered configuration.
//!
//! Sources, later ones winning:
//! 1. built-in defaults;
//! 2. a TOML file: the one given on the command line, else
//!    `config.toml` in the platform config directory if it exists;
//! 3. `UADE_*` environment variables, `__` separating sections
//!    (`UADE_SERVING__MAX_CHUNK_BYTES=1048576`);
//! 4. `PORT`, as set by container platforms.
//!
//! The result is validated once and then passed by reference to whatever
//! needs it. There is no global configuration.

pub mod error;
mod examples;

pub use crate::examples::{Example, ExampleSource, default_examples};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub s3: S3Config,
    pub tools: ToolsConfig,
    pub timeouts: TimeoutsConfig,
    pub serving: ServingConfig,
    pub retention: RetentionConfig,
    pub fetch: FetchConfig,
    pub log: LogConfig,
    pub examples: Vec<Example>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            s3: S3Config::default(),
            tools: ToolsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            serving: ServingConfig::default(),
            retention: RetentionConfig::default(),
            fetch: FetchConfig::default(),
            log: LogConfig::default(),
            examples: default_examples(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding `index.html` and the player's assets.
    pub static_dir: PathBuf,
    pub max_upload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            static_dir: PathBuf::from("static"),
            max_upload_bytes: 10 * MIB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of everything written locally: staging, published artifacts,
    /// the local cache tier and the sample index.
    pub scratch_dir: PathBuf,
    /// Durable cache tier: `s3://bucket/prefix`, or an absolute path (for
    /// example a mounted bucket). Unset means local-only caching.
    pub durable: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("/tmp/uade-web"),
            durable: None,
        }
    }
}

impl StorageConfig {
    pub fn staging_dir(&self) -> PathBuf {
        self.scratch_dir.join("uploads")
    }

    /// Where artifacts are published under their per-request id.
    pub fn published_dir(&self) -> PathBuf {
        self.scratch_dir.join("converted")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.scratch_dir.join("cache")
    }

    /// Lives outside the cache directory so retention never sweeps it.
    pub fn sample_index_path(&self) -> PathBuf {
        self.scratch_dir.join("samples.sqlite")
    }
}

/// Credentials and endpoint for an `s3://` durable tier.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<String>,
    pub key_id: String,
    pub key_secret: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "auto".to_string(),
            endpoint: None,
            key_id: String::new(),
            key_secret: String::new(),
        }
    }
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .finish()
    }
}

/// Explicit binary locations. Unset tools are searched for on `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub uade: Option<PathBuf>,
    pub flac: Option<PathBuf>,
    pub lha: Option<PathBuf>,
}

/// Time budgets, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub fetch_secs: u64,
    pub decode_secs: u64,
    pub encode_secs: u64,
    pub extract_secs: u64,
    pub probe_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            fetch_secs: 30,
            decode_secs: 300,
            encode_secs: 60,
            extract_secs: 30,
            probe_secs: 10,
        }
    }
}

impl TimeoutsConfig {
    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }

    pub fn decode(&self) -> Duration {
        Duration::from_secs(self.decode_secs)
    }

    pub fn encode(&self) -> Duration {
        Duration::from_secs(self.encode_secs)
    }

    pub fn extract(&self) -> Duration {
        Duration::from_secs(self.extract_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }
}

/// Limits of the range-serving layer. Some hosting platforms cap response
/// bodies (32 MiB on Cloud Run), hence both numbers sit below that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Above this size a request without `Range` gets an empty 206.
    pub large_file_threshold_bytes: u64,
    /// Longest span a single range response will carry.
    pub max_chunk_bytes: u64,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            large_file_threshold_bytes: 20 * MIB,
            max_chunk_bytes: 20 * MIB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Age after which local files (staging, published, cache) are removed.
    pub max_age_secs: u64,
    /// Age after which durable cache entries are removed. Unset keeps them
    /// forever (leaving expiry to bucket lifecycle rules).
    pub durable_max_age_secs: Option<u64>,
    /// How often the background sweep runs. Zero disables it.
    pub interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 3600,
            durable_max_age_secs: None,
            interval_secs: 600,
        }
    }
}

impl RetentionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn durable_max_age(&self) -> Option<Duration> {
        self.durable_max_age_secs.map(Duration::from_secs)
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_bytes: u64,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * MIB,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives, used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: [
                "uade_web=info",
                "uade_pipeline=info",
                "uade_cache=info",
                "uade_fetch=info",
                "uade_archive=info",
                "uade_decoder=info",
                "uade_storage=info",
                "tower_http=info",
            ]
            .join(","),
        }
    }
}

impl Config {
    /// Load from every source. An explicit `path` must exist; the default
    /// location is only used when it does.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::FileNotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => default_config_file().filter(|p| p.is_file()),
        };
        if let Some(file) = &file {
            tracing::debug!(path = %file.display(), "Loading configuration file");
        }
        Self::from_figment(Self::figment(file.as_deref()))
    }

    /// The merged sources, before extraction.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment
            .merge(Env::prefixed("UADE_").split("__"))
            .merge(Env::raw().only(&["PORT"]).map(|_| "server.port".into()))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.storage.scratch_dir.is_absolute() {
            exn::bail!(ErrorKind::Invalid("storage.scratch_dir must be an absolute path".to_string()));
        }
        if self.serving.max_chunk_bytes == 0 {
            exn::bail!(ErrorKind::Invalid("serving.max_chunk_bytes must be greater than zero".to_string()));
        }
        if self.server.max_upload_bytes == 0 || self.fetch.max_bytes == 0 {
            exn::bail!(ErrorKind::Invalid("upload and fetch size limits must be greater than zero".to_string()));
        }
        let timeouts = &self.timeouts;
        let budgets = [
            timeouts.fetch_secs,
            timeouts.decode_secs,
            timeouts.encode_secs,
            timeouts.extract_secs,
            timeouts.probe_secs,
        ];
        if budgets.contains(&0) {
            exn::bail!(ErrorKind::Invalid("timeouts must be greater than zero".to_string()));
        }
        if let Some(durable) = &self.storage.durable
            && durable.trim_start().starts_with("s3://")
            && (self.s3.key_id.is_empty() || self.s3.key_secret.is_empty())
        {
            exn::bail!(ErrorKind::Invalid("an s3:// durable tier needs s3.key_id and s3.key_secret".to_string()));
        }
        let mut seen = HashSet::new();
        for example in &self.examples {
            if example.id.is_empty() || !seen.insert(example.id.as_str()) {
                exn::bail!(ErrorKind::Invalid(format!("duplicate or empty example id `{}`", example.id)));
            }
        }
        Ok(())
    }

    pub fn example(&self, id: &str) -> Option<&Example> {
        self.examples.iter().find(|e| e.id == id)
    }
}

fn default_config_file() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "uade-web").map(|dirs| dirs.config_dir().join("config.toml"))
}
