use crate::error::{ErrorKind, Result};
use crate::models::{Artifact, AudioFormat, Tier};
use crate::tiers::Tiers;
use crate::Fingerprint;
use exn::ResultExt;
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;
use uade_decoder::Encoder;
use uade_storage::backend::LocalBackend;
use uade_storage::{BackendHandle, FileInfo};

/// Conversion results keyed by [`Fingerprint`], in a fast local tier backed
/// by an optional durable tier.
///
/// There is no locking: concurrent conversions of the same input both decode
/// and both store, which is harmless because stores are atomic and the
/// content is identical.
#[derive(Clone)]
pub struct ConversionCache {
    tiers: Tiers,
    encoder: Option<Arc<dyn Encoder>>,
}

impl std::fmt::Debug for ConversionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionCache")
            .field("local", &self.tiers.local.root())
            .field("durable", &self.tiers.durable.as_ref().map(|d| d.name().to_string()))
            .field("encoder", &self.encoder.is_some())
            .finish()
    }
}

impl ConversionCache {
    /// `encoder` promotes cached WAVs to FLAC on lookup; without one, a FLAC
    /// request is answered with the WAV.
    pub fn new(local: LocalBackend, durable: Option<BackendHandle>, encoder: Option<Arc<dyn Encoder>>) -> Self {
        Self {
            tiers: Tiers { local, durable },
            encoder,
        }
    }

    pub fn local(&self) -> &LocalBackend {
        &self.tiers.local
    }

    pub(crate) fn tiers(&self) -> &Tiers {
        &self.tiers
    }

    /// Find a previous conversion.
    ///
    /// With `prefer_flac`, the search order is local FLAC, local WAV
    /// (promoted), durable FLAC, durable WAV (promoted). Otherwise only WAV
    /// is considered, local then durable. Every hit is touched so retention
    /// keeps it.
    #[instrument(skip(self), fields(fingerprint = %fingerprint))]
    pub async fn lookup(&self, fingerprint: &Fingerprint, prefer_flac: bool) -> Result<Option<Artifact>> {
        let wav = AudioFormat::Wav.key(fingerprint);
        let flac = AudioFormat::Flac.key(fingerprint);
        if prefer_flac && let Some(info) = self.tiers.local_info(&flac).await? {
            self.tiers.touch_local(&flac).await;
            return self.hit(info, AudioFormat::Flac, Tier::Local).map(Some);
        }
        if let Some(info) = self.tiers.local_info(&wav).await? {
            self.tiers.touch_local(&wav).await;
            let artifact = self.hit(info, AudioFormat::Wav, Tier::Local)?;
            return match prefer_flac {
                true => self.promote(fingerprint, artifact).await.map(Some),
                false => Ok(Some(artifact)),
            };
        }
        if prefer_flac && let Some(info) = self.tiers.pull(&flac).await? {
            return self.hit(info, AudioFormat::Flac, Tier::Durable).map(Some);
        }
        if let Some(info) = self.tiers.pull(&wav).await? {
            let artifact = self.hit(info, AudioFormat::Wav, Tier::Durable)?;
            return match prefer_flac {
                true => self.promote(fingerprint, artifact).await.map(Some),
                false => Ok(Some(artifact)),
            };
        }
        tracing::debug!("Cache miss");
        Ok(None)
    }

    /// Record a finished conversion. The local write is atomic (last writer
    /// wins); the durable tier is only written when it lacks the key.
    #[instrument(skip(self, source), fields(fingerprint = %fingerprint, format = %format))]
    pub async fn store(&self, fingerprint: &Fingerprint, format: AudioFormat, source: &Path) -> Result<Artifact> {
        let key = format.key(fingerprint);
        let info = self.tiers.put(&key, source).await?;
        tracing::info!(size = info.size, "Cached conversion");
        self.hit(info, format, Tier::Local)
    }

    fn hit(&self, info: FileInfo, format: AudioFormat, tier: Tier) -> Result<Artifact> {
        tracing::debug!(key = %info.path.display(), ?tier, "Cache hit");
        Ok(Artifact {
            path: self.tiers.local_path(&info.path)?,
            format,
            size: info.size,
            tier,
        })
    }

    /// Turn a cached WAV into a cached FLAC. The WAV entry stays; encoder
    /// failure is not an error, the WAV is served instead.
    async fn promote(&self, fingerprint: &Fingerprint, wav: Artifact) -> Result<Artifact> {
        let Some(encoder) = &self.encoder else {
            return Ok(wav);
        };
        let key = AudioFormat::Flac.key(fingerprint);
        let staged = tempfile::Builder::new()
            .prefix(".promote-")
            .suffix(".flac.part")
            .tempfile_in(self.tiers.local.root())
            .or_raise(|| ErrorKind::Storage)?
            .into_temp_path();
        if let Err(err) = encoder.encode(&wav.path, &staged).await {
            tracing::warn!(error = %*err, "FLAC promotion failed; serving WAV");
            return Ok(wav);
        }
        let info = self.tiers.put(&key, &staged).await?;
        tracing::info!(wav = wav.size, flac = info.size, "Promoted cached WAV to FLAC");
        self.hit(info, AudioFormat::Flac, wav.tier)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uade_storage::StorageBackend;
    use uade_storage::backend::MockBackend;

    /// Copies input to output, prefixed with `fLaC`; or fails on demand.
    #[derive(Default)]
    pub(crate) struct FakeEncoder {
        pub(crate) fail: bool,
        pub(crate) calls: AtomicUsize,
    }

    #[async_trait]
    impl Encoder for FakeEncoder {
        async fn encode(&self, input: &Path, output: &Path) -> uade_decoder::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                exn::bail!(uade_decoder::ErrorKind::Failed("encoder exploded".to_string()));
            }
            let mut data = b"fLaC".to_vec();
            data.extend(std::fs::read(input).unwrap());
            std::fs::write(output, data).unwrap();
            Ok(())
        }
    }

    pub(crate) fn fingerprint() -> Fingerprint {
        Fingerprint::of_reader(&b"space debris"[..]).unwrap()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        cache: ConversionCache,
        durable: Arc<MockBackend>,
        encoder: Arc<FakeEncoder>,
        source: std::path::PathBuf,
    }

    fn fixture(encoder: FakeEncoder) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalBackend::new("local", dir.path().join("cache")).unwrap();
        let durable = Arc::new(MockBackend::default().with_name("durable"));
        let encoder = Arc::new(encoder);
        let source = dir.path().join("decoded.wav");
        std::fs::write(&source, b"RIFFdecoded").unwrap();
        let cache = ConversionCache::new(local, Some(durable.clone() as BackendHandle), Some(encoder.clone() as Arc<dyn Encoder>));
        Fixture {
            _dir: dir,
            cache,
            durable,
            encoder,
            source,
        }
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let f = fixture(FakeEncoder::default());
        let fp = fingerprint();
        assert_eq!(f.cache.lookup(&fp, false).await.unwrap(), None);
        let stored = f.cache.store(&fp, AudioFormat::Wav, &f.source).await.unwrap();
        assert_eq!(stored.size, 11);
        let found = f.cache.lookup(&fp, false).await.unwrap().unwrap();
        assert_eq!(found.format, AudioFormat::Wav);
        assert_eq!(found.tier, Tier::Local);
        assert_eq!(std::fs::read(&found.path).unwrap(), b"RIFFdecoded");
    }

    #[tokio::test]
    async fn test_durable_store_is_idempotent() {
        let f = fixture(FakeEncoder::default());
        let fp = fingerprint();
        f.cache.store(&fp, AudioFormat::Wav, &f.source).await.unwrap();
        f.cache.store(&fp, AudioFormat::Wav, &f.source).await.unwrap();
        assert_eq!(f.durable.write_count(), 1);
        assert!(f.durable.exists(&AudioFormat::Wav.key(&fp)).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_wav_promoted_to_flac() {
        let f = fixture(FakeEncoder::default());
        let fp = fingerprint();
        f.cache.store(&fp, AudioFormat::Wav, &f.source).await.unwrap();
        let found = f.cache.lookup(&fp, true).await.unwrap().unwrap();
        assert_eq!(found.format, AudioFormat::Flac);
        assert_eq!(std::fs::read(&found.path).unwrap(), b"fLaCRIFFdecoded");
        // The WAV stays, and the FLAC is now a direct hit.
        assert!(f.cache.local().resolve(AudioFormat::Wav.key(&fp)).unwrap().exists());
        f.cache.lookup(&fp, true).await.unwrap().unwrap();
        assert_eq!(f.encoder.calls.load(Ordering::SeqCst), 1);
        assert!(f.durable.exists(&AudioFormat::Flac.key(&fp)).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_promotion_serves_wav() {
        let f = fixture(FakeEncoder {
            fail: true,
            ..Default::default()
        });
        let fp = fingerprint();
        f.cache.store(&fp, AudioFormat::Wav, &f.source).await.unwrap();
        let found = f.cache.lookup(&fp, true).await.unwrap().unwrap();
        assert_eq!(found.format, AudioFormat::Wav);
    }

    #[tokio::test]
    async fn test_durable_hit_copied_locally() {
        let f = fixture(FakeEncoder::default());
        let fp = fingerprint();
        f.durable.write(&AudioFormat::Flac.key(&fp), b"fLaCremote").await.unwrap();
        let found = f.cache.lookup(&fp, true).await.unwrap().unwrap();
        assert_eq!(found.tier, Tier::Durable);
        assert_eq!(found.format, AudioFormat::Flac);
        assert_eq!(std::fs::read(&found.path).unwrap(), b"fLaCremote");
        let again = f.cache.lookup(&fp, true).await.unwrap().unwrap();
        assert_eq!(again.tier, Tier::Local);
    }

    #[tokio::test]
    async fn test_durable_wav_ignored_unless_wanted() {
        let f = fixture(FakeEncoder::default());
        let fp = fingerprint();
        f.durable.write(&AudioFormat::Flac.key(&fp), b"fLaCremote").await.unwrap();
        assert_eq!(f.cache.lookup(&fp, false).await.unwrap(), None);
        f.durable.write(&AudioFormat::Wav.key(&fp), b"RIFFremote").await.unwrap();
        let found = f.cache.lookup(&fp, true).await.unwrap().unwrap();
        // Durable FLAC beats durable WAV.
        assert_eq!(std::fs::read(&found.path).unwrap(), b"fLaCremote");
    }

    #[tokio::test]
    async fn test_durable_wav_promoted() {
        let f = fixture(FakeEncoder::default());
        let fp = fingerprint();
        f.durable.write(&AudioFormat::Wav.key(&fp), b"RIFFremote").await.unwrap();
        let found = f.cache.lookup(&fp, true).await.unwrap().unwrap();
        assert_eq!(found.format, AudioFormat::Flac);
        assert_eq!(found.tier, Tier::Durable);
        assert_eq!(std::fs::read(&found.path).unwrap(), b"fLaCRIFFremote");
    }

    #[tokio::test]
    async fn test_unreachable_durable_tier_degrades() {
        let f = fixture(FakeEncoder::default());
        let fp = fingerprint();
        f.durable.set_failing(true);
        assert_eq!(f.cache.lookup(&fp, true).await.unwrap(), None);
        let stored = f.cache.store(&fp, AudioFormat::Wav, &f.source).await.unwrap();
        assert_eq!(stored.tier, Tier::Local);
        assert_eq!(f.durable.write_count(), 0);
    }

    #[tokio::test]
    async fn test_no_partial_files_left_behind() {
        let f = fixture(FakeEncoder::default());
        let fp = fingerprint();
        f.cache.store(&fp, AudioFormat::Wav, &f.source).await.unwrap();
        f.cache.lookup(&fp, true).await.unwrap();
        let mut names: Vec<_> = std::fs::read_dir(f.cache.local().root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![format!("{fp}.flac"), format!("{fp}.wav")]);
    }
}
