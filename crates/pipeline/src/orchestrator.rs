use crate::error::{ErrorKind, Result};
use crate::staging::{StagedInput, StagingArea};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;
use uade_archive::{Container, Inspector, sample_companion_name};
use uade_cache::{Artifact, AudioFormat, ConversionCache, Fingerprint, SampleIndex};
use uade_decoder::{Decoder, Encoder};
use uade_fetch::Fetcher;

const EXTRACT_DIR: &str = "extracted";
const SAMPLE_DIR: &str = "sample";
const DECODED_WAV: &str = "output.wav";
const ENCODED_FLAC: &str = "output.flac";

/// Outcome of [`Orchestrator::convert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    pub fingerprint: Fingerprint,
    /// Replayer label reported by the decoder, e.g. `"TFMX"` or `"Module"`.
    pub player_format: String,
    pub artifact: Artifact,
    /// Whether the artifact came from the cache rather than a fresh decode.
    pub cached: bool,
}

/// Drives a module from staged input to a cached audio artifact.
#[derive(Clone)]
pub struct Orchestrator {
    staging: StagingArea,
    inspector: Inspector,
    fetcher: Fetcher,
    decoder: Arc<dyn Decoder>,
    encoder: Option<Arc<dyn Encoder>>,
    cache: ConversionCache,
    samples: Option<SampleIndex>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("staging", &self.staging.root())
            .field("cache", &self.cache)
            .field("encoder", &self.encoder.is_some())
            .field("samples", &self.samples.is_some())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        staging: StagingArea,
        inspector: Inspector,
        fetcher: Fetcher,
        decoder: Arc<dyn Decoder>,
        encoder: Option<Arc<dyn Encoder>>,
        cache: ConversionCache,
    ) -> Self {
        Self {
            staging,
            inspector,
            fetcher,
            decoder,
            encoder,
            cache,
            samples: None,
        }
    }

    /// Remember companion samples of two-part modules across requests.
    pub fn with_samples(mut self, samples: SampleIndex) -> Self {
        self.samples = Some(samples);
        self
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn cache(&self) -> &ConversionCache {
        &self.cache
    }

    pub fn can_encode(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn stage(&self) -> Result<StagedInput> {
        self.staging.stage()
    }

    /// Make the file at `path` (inside `staged`) the module to convert,
    /// unpacking it first if it is an archive. `display_name` is dropped for
    /// archives in favour of the extracted module's name.
    ///
    /// An archive's own companion sample is used when present; otherwise a
    /// sample remembered from an earlier paired conversion is recalled.
    #[instrument(skip(self, staged, path), fields(path = %path.display()))]
    pub async fn ingest(&self, staged: &mut StagedInput, path: &Path, display_name: Option<String>) -> Result<()> {
        let container = Container::detect(path).await.map_err(ErrorKind::archive)?;
        let (module, display_name) = match container.is_archive() {
            true => {
                let dest = staged.path().join(EXTRACT_DIR);
                tokio::fs::create_dir_all(&dest)
                    .await
                    .or_raise(|| ErrorKind::Staging("creating extraction directory".to_string()))?;
                let extracted = self.inspector.extract(container, path, &dest).await.map_err(ErrorKind::archive)?;
                tracing::info!(?container, candidates = extracted.count, "Unpacked archive");
                // Report the tune, not the archive it came in.
                (extracted.module, None)
            },
            false => (path.to_path_buf(), display_name),
        };
        staged.set_module(&module, display_name);
        if let Some(companion) = sample_companion_name(&module) {
            let sibling = module.parent().unwrap_or(staged.path()).join(companion);
            match tokio::fs::try_exists(&sibling).await.unwrap_or(false) {
                true => staged.set_sample(sibling),
                false => self.recall_sample(staged, &module, sibling).await,
            }
        }
        Ok(())
    }

    async fn recall_sample(&self, staged: &mut StagedInput, module: &Path, dest: PathBuf) {
        let Some(samples) = &self.samples else {
            return;
        };
        let recalled = async {
            let fingerprint = Fingerprint::of_file(module).await?;
            samples.recall(&fingerprint, &dest).await
        };
        match recalled.await {
            Ok(Some(sample)) => {
                tracing::info!(sample = %sample.display(), "Recovered companion sample from an earlier conversion");
                staged.set_sample(sample);
            },
            Ok(None) => tracing::debug!("No companion sample known for this module"),
            Err(err) => tracing::warn!(error = %*err, "Companion sample lookup failed"),
        }
    }

    /// Download `url` into `staged` and ingest it.
    #[instrument(skip_all)]
    pub async fn fetch(&self, staged: &mut StagedInput, url: &str) -> Result<()> {
        let fetched = self.fetcher.fetch_into(url, staged.path()).await.map_err(ErrorKind::fetch)?;
        self.ingest(staged, &fetched.path, Some(fetched.filename)).await
    }

    /// Download a two-part module. The pair is cached under the identity of
    /// its URLs, and the sample is remembered for later uploads of the
    /// module half alone.
    #[instrument(skip_all)]
    pub async fn fetch_pair(&self, staged: &mut StagedInput, module_url: &str, sample_url: &str) -> Result<()> {
        let module = self.fetcher.fetch_into(module_url, staged.path()).await.map_err(ErrorKind::fetch)?;
        let sample_dir = staged.path().join(SAMPLE_DIR);
        tokio::fs::create_dir_all(&sample_dir)
            .await
            .or_raise(|| ErrorKind::Staging("creating sample directory".to_string()))?;
        let sample = self.fetcher.fetch_into(sample_url, &sample_dir).await.map_err(ErrorKind::fetch)?;
        staged.set_module(&module.path, Some(module.filename));
        let sample = staged.attach_sample(&sample.path).await?.to_path_buf();
        staged.set_fingerprint(Fingerprint::of_url_pair(module_url, sample_url));
        if let (Some(samples), Some(module)) = (&self.samples, staged.module()) {
            let remembered = async {
                let fingerprint = Fingerprint::of_file(module).await?;
                samples.remember(&fingerprint, &sample).await
            };
            if let Err(err) = remembered.await {
                tracing::warn!(error = %*err, "Could not remember companion sample");
            }
        }
        Ok(())
    }

    /// Turn the staged module into audio, from the cache when possible.
    ///
    /// FLAC is produced only when `want_flac` is set and an encoder is
    /// configured; an encoder failure falls back to the decoded WAV.
    #[instrument(skip(self, staged))]
    pub async fn convert(&self, staged: &StagedInput, want_flac: bool) -> Result<Conversion> {
        let module = staged.module().ok_or_else(|| exn::Exn::from(ErrorKind::NothingStaged))?;
        if !self.staging.contains(module).await {
            tracing::warn!(module = %module.display(), "Refusing to convert a file outside the staging area");
            exn::bail!(ErrorKind::IllegalPath);
        }
        let want_flac = want_flac && self.encoder.is_some();
        let player_format = self.decoder.probe(module).await;

        tracing::debug!(state = "hashing", player = %player_format);
        let fingerprint = match staged.fingerprint() {
            Some(fingerprint) => fingerprint.clone(),
            None => {
                let mut inputs = vec![module.to_path_buf()];
                inputs.extend(staged.sample().map(Path::to_path_buf));
                Fingerprint::of_files(&inputs).await.or_raise(|| ErrorKind::Cache)?
            },
        };

        tracing::debug!(state = "cache_lookup", %fingerprint);
        if let Some(artifact) = self.cache.lookup(&fingerprint, want_flac).await.or_raise(|| ErrorKind::Cache)? {
            tracing::debug!(state = "cache_hit", format = %artifact.format);
            return Ok(Conversion {
                fingerprint,
                player_format,
                artifact,
                cached: true,
            });
        }

        tracing::debug!(state = "decoding");
        let wav = staged.path().join(DECODED_WAV);
        if let Err(err) = self.decoder.decode(module, &wav).await {
            tracing::debug!(state = "failed", error = %*err);
            return Err(ErrorKind::decode(err));
        }
        tracing::debug!(state = "decoded");

        let (format, output) = match (&self.encoder, want_flac) {
            (Some(encoder), true) => {
                tracing::debug!(state = "compressing");
                let flac = staged.path().join(ENCODED_FLAC);
                match encoder.encode(&wav, &flac).await {
                    Ok(()) => (AudioFormat::Flac, flac),
                    Err(err) => {
                        tracing::warn!(error = %*err, "FLAC compression failed; keeping WAV");
                        (AudioFormat::Wav, wav)
                    },
                }
            },
            _ => (AudioFormat::Wav, wav),
        };

        tracing::debug!(state = "storing", %format);
        let artifact = self.cache.store(&fingerprint, format, &output).await.or_raise(|| ErrorKind::Cache)?;
        tracing::info!(%fingerprint, %format, size = artifact.size, player = %player_format, "Converted module");
        Ok(Conversion {
            fingerprint,
            player_format,
            artifact,
            cached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uade_cache::{Database, Tier};
    use uade_decoder::ErrorKind as DecoderErrorKind;
    use uade_fetch::UrlGuard;
    use uade_storage::backend::LocalBackend;

    /// Writes a WAV whose body is the module's bytes, so different inputs
    /// give different outputs.
    #[derive(Default)]
    struct FakeDecoder {
        fail: Option<DecoderErrorKind>,
        silent: bool,
        decodes: AtomicUsize,
    }

    #[async_trait]
    impl Decoder for FakeDecoder {
        async fn probe(&self, module: &Path) -> String {
            match module.file_name().and_then(|n| n.to_str()) {
                Some(name) if name.starts_with("mdat.") => "TFMX".to_string(),
                _ => "Protracker".to_string(),
            }
        }

        async fn decode(&self, module: &Path, output: &Path) -> uade_decoder::Result<()> {
            self.decodes.fetch_add(1, Ordering::SeqCst);
            if let Some(kind) = &self.fail {
                exn::bail!(kind.clone());
            }
            if self.silent {
                exn::bail!(DecoderErrorKind::OutputMissing);
            }
            let mut body = b"RIFF".to_vec();
            body.extend(std::fs::read(module).unwrap());
            std::fs::write(output, body).unwrap();
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeEncoder {
        fail: bool,
    }

    #[async_trait]
    impl Encoder for FakeEncoder {
        async fn encode(&self, input: &Path, output: &Path) -> uade_decoder::Result<()> {
            if self.fail {
                exn::bail!(DecoderErrorKind::Failed("bad wav".to_string()));
            }
            let mut body = b"fLaC".to_vec();
            body.extend(std::fs::read(input).unwrap());
            std::fs::write(output, body).unwrap();
            Ok(())
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        decoder: Arc<FakeDecoder>,
        orchestrator: Orchestrator,
    }

    fn harness_with(decoder: FakeDecoder, encoder: Option<FakeEncoder>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("uploads")).unwrap();
        let local = LocalBackend::new("cache", dir.path().join("cache")).unwrap();
        let encoder = encoder.map(|e| Arc::new(e) as Arc<dyn Encoder>);
        let cache = ConversionCache::new(local, None, encoder.clone());
        let fetcher = Fetcher::new(UrlGuard::default(), Duration::from_secs(5), 1024, 2);
        let decoder = Arc::new(decoder);
        let orchestrator = Orchestrator::new(
            staging,
            Inspector::new(None, Duration::from_secs(5)),
            fetcher,
            decoder.clone(),
            encoder,
            cache,
        );
        Harness {
            dir,
            decoder,
            orchestrator,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeDecoder::default(), Some(FakeEncoder::default()))
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        for (name, data) in entries {
            writer.start_file(*name, zip::write::SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    async fn staged_upload(orchestrator: &Orchestrator, name: &str, body: &[u8]) -> StagedInput {
        let mut staged = orchestrator.stage().unwrap();
        let path = staged.file_path(name);
        std::fs::write(&path, body).unwrap();
        orchestrator.ingest(&mut staged, &path, Some(name.to_string())).await.unwrap();
        staged
    }

    #[tokio::test]
    async fn test_convert_then_cache_hit() {
        let h = harness();
        let staged = staged_upload(&h.orchestrator, "song.mod", b"M.K.").await;
        let first = h.orchestrator.convert(&staged, false).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.player_format, "Protracker");
        assert_eq!(first.artifact.format, AudioFormat::Wav);
        assert_eq!(std::fs::read(&first.artifact.path).unwrap(), b"RIFFM.K.");

        let again = staged_upload(&h.orchestrator, "renamed.mod", b"M.K.").await;
        let second = h.orchestrator.convert(&again, false).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!(second.artifact.tier, Tier::Local);
        assert_eq!(h.decoder.decodes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_convert_flac() {
        let h = harness();
        let staged = staged_upload(&h.orchestrator, "song.mod", b"M.K.").await;
        let conversion = h.orchestrator.convert(&staged, true).await.unwrap();
        assert_eq!(conversion.artifact.format, AudioFormat::Flac);
        assert_eq!(std::fs::read(&conversion.artifact.path).unwrap(), b"fLaCRIFFM.K.");
    }

    #[tokio::test]
    async fn test_wav_cache_hit_promoted_for_flac_client() {
        let h = harness();
        let staged = staged_upload(&h.orchestrator, "song.mod", b"M.K.").await;
        h.orchestrator.convert(&staged, false).await.unwrap();
        let conversion = h.orchestrator.convert(&staged, true).await.unwrap();
        assert!(conversion.cached);
        assert_eq!(conversion.artifact.format, AudioFormat::Flac);
        assert_eq!(h.decoder.decodes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_encoder_failure_keeps_wav() {
        let h = harness_with(FakeDecoder::default(), Some(FakeEncoder { fail: true }));
        let staged = staged_upload(&h.orchestrator, "song.mod", b"M.K.").await;
        let conversion = h.orchestrator.convert(&staged, true).await.unwrap();
        assert_eq!(conversion.artifact.format, AudioFormat::Wav);
    }

    #[tokio::test]
    async fn test_without_encoder_flac_request_yields_wav() {
        let h = harness_with(FakeDecoder::default(), None);
        assert!(!h.orchestrator.can_encode());
        let staged = staged_upload(&h.orchestrator, "song.mod", b"M.K.").await;
        let conversion = h.orchestrator.convert(&staged, true).await.unwrap();
        assert_eq!(conversion.artifact.format, AudioFormat::Wav);
    }

    #[tokio::test]
    async fn test_decoder_diagnostic_surfaces() {
        let decoder = FakeDecoder {
            fail: Some(DecoderErrorKind::Failed("Unknown format".to_string())),
            ..Default::default()
        };
        let h = harness_with(decoder, None);
        let staged = staged_upload(&h.orchestrator, "song.mod", b"junk").await;
        let err = h.orchestrator.convert(&staged, false).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Decode(DecoderErrorKind::Failed("Unknown format".to_string())));
        assert!(!err.is_input_error());
    }

    #[tokio::test]
    async fn test_missing_output_is_reported() {
        let decoder = FakeDecoder {
            silent: true,
            ..Default::default()
        };
        let h = harness_with(decoder, None);
        let staged = staged_upload(&h.orchestrator, "song.mod", b"M.K.").await;
        let err = h.orchestrator.convert(&staged, false).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Decode(DecoderErrorKind::OutputMissing));
    }

    #[tokio::test]
    async fn test_module_outside_staging_is_illegal() {
        let h = harness();
        let outside = h.dir.path().join("outside.mod");
        std::fs::write(&outside, b"M.K.").unwrap();
        let mut staged = h.orchestrator.stage().unwrap();
        staged.set_module(&outside, None);
        let err = h.orchestrator.convert(&staged, false).await.unwrap_err();
        assert_eq!(*err, ErrorKind::IllegalPath);
        assert!(err.is_input_error());
        assert_eq!(h.decoder.decodes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_convert_without_module() {
        let h = harness();
        let staged = h.orchestrator.stage().unwrap();
        let err = h.orchestrator.convert(&staged, false).await.unwrap_err();
        assert_eq!(*err, ErrorKind::NothingStaged);
    }

    #[tokio::test]
    async fn test_ingest_zip_picks_module_and_companion() {
        let h = harness();
        let mut staged = h.orchestrator.stage().unwrap();
        let archive = staged.file_path("pack.zip");
        write_zip(
            &archive,
            &[
                ("readme.txt", b"hello".as_slice()),
                ("smpl.storm", b"samples".as_slice()),
                ("mdat.storm", b"patterns".as_slice()),
            ],
        );
        h.orchestrator.ingest(&mut staged, &archive, Some("pack.zip".to_string())).await.unwrap();
        let module = staged.module().unwrap();
        assert_eq!(module.file_name().unwrap(), "mdat.storm");
        assert_eq!(staged.sample().unwrap().file_name().unwrap(), "smpl.storm");
        assert_eq!(staged.display_name(), Some("mdat.storm"));

        let conversion = h.orchestrator.convert(&staged, false).await.unwrap();
        assert_eq!(conversion.player_format, "TFMX");
    }

    #[tokio::test]
    async fn test_ingest_zip_without_modules() {
        let h = harness();
        let mut staged = h.orchestrator.stage().unwrap();
        let archive = staged.file_path("docs.zip");
        write_zip(&archive, &[("readme.txt", b"hello".as_slice())]);
        let err = h.orchestrator.ingest(&mut staged, &archive, None).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Archive(uade_archive::error::ErrorKind::NoMusicFile));
    }

    #[tokio::test]
    async fn test_sample_fingerprint_changes_identity() {
        let h = harness();
        let mut with_sample = h.orchestrator.stage().unwrap();
        let module = with_sample.file_path("mdat.tune");
        std::fs::write(&module, b"patterns").unwrap();
        let sample = with_sample.file_path("smpl.tune");
        std::fs::write(&sample, b"samples").unwrap();
        h.orchestrator.ingest(&mut with_sample, &module, None).await.unwrap();
        assert_eq!(with_sample.sample(), Some(sample.as_path()));
        let alone = staged_upload(&h.orchestrator, "mdat.tune", b"patterns").await;
        assert_eq!(alone.sample(), None);

        let paired = h.orchestrator.convert(&with_sample, false).await.unwrap();
        let single = h.orchestrator.convert(&alone, false).await.unwrap();
        assert_ne!(paired.fingerprint, single.fingerprint);
    }

    #[tokio::test]
    async fn test_remembered_sample_is_recalled_for_module_alone() {
        let h = harness();
        let db = Database::connect_in_memory().await.unwrap();
        let samples = SampleIndex::new(&db, h.orchestrator.cache());
        let orchestrator = h.orchestrator.clone().with_samples(samples.clone());

        let module_fp = Fingerprint::of_reader(b"patterns".as_slice()).unwrap();
        let sample = h.dir.path().join("smpl.storm");
        std::fs::write(&sample, b"samples").unwrap();
        samples.remember(&module_fp, &sample).await.unwrap();

        let staged = staged_upload(&orchestrator, "mdat.storm", b"patterns").await;
        let recalled = staged.sample().unwrap();
        assert_eq!(recalled, staged.path().join("smpl.storm"));
        assert_eq!(std::fs::read(recalled).unwrap(), b"samples");
    }
}
