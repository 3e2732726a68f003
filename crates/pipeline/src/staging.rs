use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uade_archive::{PAIRED_DATA_TAG, PAIRED_SAMPLE_TAG, sample_companion_name};
use uade_cache::Fingerprint;
use uade_fetch::sanitize_filename;

const REQUEST_PREFIX: &str = "req-";

/// Root directory under which every request gets its own scratch directory.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Create `root` if needed. The stored root is canonical, so containment
    /// checks compare like with like.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).or_raise(|| ErrorKind::Staging(format!("creating {}", root.display())))?;
        let root = root
            .canonicalize()
            .or_raise(|| ErrorKind::Staging(format!("resolving {}", root.display())))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A fresh request directory, removed when the returned value is dropped.
    pub fn stage(&self) -> Result<StagedInput> {
        let dir = tempfile::Builder::new()
            .prefix(REQUEST_PREFIX)
            .tempdir_in(&self.root)
            .or_raise(|| ErrorKind::Staging("creating request directory".to_string()))?;
        Ok(StagedInput {
            dir,
            module: None,
            sample: None,
            display_name: None,
            fingerprint: None,
        })
    }

    /// Whether `path` resolves (symlinks included) to somewhere below the
    /// staging root. Paths that cannot be resolved are not contained.
    pub async fn contains(&self, path: &Path) -> bool {
        match tokio::fs::canonicalize(path).await {
            Ok(resolved) => resolved.starts_with(&self.root) && resolved != self.root,
            Err(_) => false,
        }
    }

    /// Whether `name` is a request directory created by [`stage`](Self::stage).
    pub(crate) fn is_request_dir(name: &str) -> bool {
        name.starts_with(REQUEST_PREFIX)
    }
}

/// Everything one request has put on disk: the module to play, an optional
/// companion sample, and whatever else extraction produced.
#[derive(Debug)]
pub struct StagedInput {
    dir: TempDir,
    module: Option<PathBuf>,
    sample: Option<PathBuf>,
    display_name: Option<String>,
    fingerprint: Option<Fingerprint>,
}

impl StagedInput {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where to save an uploaded file called `name`. The name is reduced to
    /// a single safe path component.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(sanitize_filename(name))
    }

    pub fn module(&self) -> Option<&Path> {
        self.module.as_deref()
    }

    pub fn sample(&self) -> Option<&Path> {
        self.sample.as_deref()
    }

    /// Name to report back to the client: the uploaded or downloaded file
    /// name, falling back to the module's own name.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .or_else(|| self.module.as_deref()?.file_name()?.to_str())
    }

    /// Identity to cache under instead of the content of the staged files.
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn set_module(&mut self, module: impl Into<PathBuf>, display_name: Option<String>) {
        self.module = Some(module.into());
        if display_name.is_some() {
            self.display_name = display_name;
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub(crate) fn set_fingerprint(&mut self, fingerprint: Fingerprint) {
        self.fingerprint = Some(fingerprint);
    }

    pub(crate) fn set_sample(&mut self, sample: PathBuf) {
        self.sample = Some(sample);
    }

    /// Place `sample` next to the module under the name a two-part player
    /// expects. A module that does not carry the `mdat` tag is renamed to
    /// `mdat.<name>` first, and the sample becomes `smpl.<name>`.
    pub async fn attach_sample(&mut self, sample: &Path) -> Result<&Path> {
        let module = self.module.clone().ok_or_else(|| exn::Exn::from(ErrorKind::NothingStaged))?;
        let dir = module.parent().unwrap_or(self.dir.path()).to_path_buf();
        let (module, companion) = match sample_companion_name(&module) {
            Some(companion) => (module, companion),
            None => {
                let name = module
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(sanitize_filename)
                    .unwrap_or_default();
                let renamed = dir.join(format!("{PAIRED_DATA_TAG}.{name}"));
                rename(&module, &renamed).await?;
                (renamed, format!("{PAIRED_SAMPLE_TAG}.{name}"))
            },
        };
        let target = dir.join(companion);
        if sample != target {
            rename(sample, &target).await?;
        }
        tracing::debug!(module = %module.display(), sample = %target.display(), "Attached companion sample");
        self.module = Some(module);
        Ok(self.sample.insert(target).as_path())
    }
}

async fn rename(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::rename(from, to)
        .await
        .or_raise(|| ErrorKind::Staging(format!("moving {} into place", from.display())))
}
