use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::sync::Arc;
use uade_archive::Inspector;
use uade_cache::{ConversionCache, Database, SampleIndex};
use uade_config::Config;
use uade_decoder::{Decoder, Encoder, Flac, Uade};
use uade_fetch::{Fetcher, UrlGuard};
use uade_pipeline::{Orchestrator, StagingArea, Sweeper};
use uade_process::Tool;
use uade_storage::backend::LocalBackend;
use uade_storage::{BackendHandle, Location};

/// Where `uade123` is installed by the upstream packaging.
const UADE_FALLBACK: &str = "/usr/local/bin/uade123";

/// Everything a request handler needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Orchestrator,
    /// Conversions handed out to clients, as `{file_id}.{wav|flac}`.
    pub published: BackendHandle,
    pub uade_available: bool,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("orchestrator", &self.orchestrator)
            .field("published", &self.published.name())
            .field("uade_available", &self.uade_available)
            .finish_non_exhaustive()
    }
}

/// The assembled server: request state plus what the retention sweeper
/// needs to look after.
#[derive(Debug)]
pub struct Components {
    pub state: AppState,
    pub sweeper: Sweeper,
    pub database: Database,
}

impl AppState {
    pub fn new(config: Config, orchestrator: Orchestrator, published: BackendHandle, uade_available: bool) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
            published,
            uade_available,
        }
    }
}

impl Components {
    /// Discover tools, open storage tiers and the sample index, and wire
    /// them into an [`Orchestrator`].
    ///
    /// Missing `flac` or `lha` binaries disable FLAC output or LHA archives.
    /// A missing `uade123` still starts the server (health reports it) but
    /// every conversion fails.
    pub async fn build(config: Config) -> Result<Self> {
        let storage = &config.storage;
        let staging = StagingArea::new(storage.staging_dir()).or_raise(|| ErrorKind::Staging)?;
        let published = LocalBackend::new("published", storage.published_dir())
            .or_raise(|| ErrorKind::Storage("published artifacts".to_string()))?;
        let local = LocalBackend::new("cache", storage.cache_dir())
            .or_raise(|| ErrorKind::Storage("local cache tier".to_string()))?;
        let durable = match &storage.durable {
            Some(uri) => Some(durable_backend(&config, uri).await?),
            None => None,
        };

        let tools = &config.tools;
        let timeouts = &config.timeouts;
        let (uade, uade_available) = match Tool::discover("uade123", tools.uade.as_deref(), &["uade123"]) {
            Ok(tool) => (tool, true),
            Err(err) => {
                tracing::warn!(error = %*err, "uade123 not found; conversions will fail");
                (Tool::at("uade123", UADE_FALLBACK), false)
            },
        };
        let decoder: Arc<dyn Decoder> = Arc::new(Uade::new(uade, timeouts.probe(), timeouts.decode()));
        let encoder: Option<Arc<dyn Encoder>> = match Tool::discover("flac", tools.flac.as_deref(), &["flac"]) {
            Ok(tool) => Some(Arc::new(Flac::new(tool, timeouts.encode()))),
            Err(_) => {
                tracing::warn!("flac not found; serving WAV only");
                None
            },
        };
        let lha = Tool::discover("lha", tools.lha.as_deref(), &["lha", "lhasa"]).ok();
        if lha.is_none() {
            tracing::warn!("lha not found; LHA archives will be refused");
        }

        let cache = ConversionCache::new(local.clone(), durable.clone(), encoder.clone());
        let database = Database::connect(storage.sample_index_path())
            .await
            .or_raise(|| ErrorKind::Database)?;
        let samples = SampleIndex::new(&database, &cache);
        let fetcher = Fetcher::new(
            UrlGuard::default(),
            timeouts.fetch(),
            config.fetch.max_bytes,
            config.fetch.max_redirects,
        );
        let orchestrator = Orchestrator::new(
            staging.clone(),
            Inspector::new(lha, timeouts.extract()),
            fetcher,
            decoder,
            encoder,
            cache,
        )
        .with_samples(samples);

        let retention = &config.retention;
        let published: BackendHandle = Arc::new(published);
        let mut sweeper = Sweeper::new()
            .target(Arc::new(local), retention.max_age())
            .target(published.clone(), retention.max_age())
            .staging(staging, retention.max_age());
        if let (Some(durable), Some(max_age)) = (durable, retention.durable_max_age()) {
            sweeper = sweeper.target(durable, max_age);
        }

        tracing::info!(?orchestrator, uade_available, "Components ready");
        Ok(Self {
            state: AppState::new(config, orchestrator, published, uade_available),
            sweeper,
            database,
        })
    }
}

async fn durable_backend(config: &Config, uri: &str) -> Result<BackendHandle> {
    let location = Location::parse(uri).or_raise(|| ErrorKind::Config)?;
    let backend: BackendHandle = match location {
        Location::Local(root) => Arc::new(
            LocalBackend::new("durable", root).or_raise(|| ErrorKind::Storage("durable cache tier".to_string()))?,
        ),
        #[cfg(feature = "s3")]
        Location::S3 { bucket, prefix } => {
            let s3 = &config.s3;
            Arc::new(
                uade_storage::backend::S3Backend::new(
                    "durable",
                    bucket,
                    prefix,
                    s3.region.clone(),
                    s3.endpoint.clone(),
                    s3.key_id.clone(),
                    s3.key_secret.clone(),
                )
                .await
                .or_raise(|| ErrorKind::Storage("durable cache tier".to_string()))?,
            )
        },
        #[cfg(not(feature = "s3"))]
        Location::S3 { .. } => {
            let _ = config;
            exn::bail!(ErrorKind::Storage("built without S3 support".to_string()))
        },
    };
    tracing::info!(backend = backend.name(), "Durable cache tier configured");
    Ok(backend)
}
