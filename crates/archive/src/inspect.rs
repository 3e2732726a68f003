use crate::container::Container;
use crate::error::{ErrorKind, Result};
use crate::tags::is_module_name;
use exn::ResultExt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::instrument;
use uade_process::Tool;

/// Bounds on in-process ZIP extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZipLimits {
    pub max_entries: usize,
    pub max_total_bytes: u64,
}
impl Default for ZipLimits {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            max_total_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Outcome of unpacking an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// The chosen module, inside the extraction directory.
    pub module: PathBuf,
    /// How many candidate modules the archive contained.
    pub count: usize,
}

/// Unpacks archives and picks the module to play.
#[derive(Debug, Clone)]
pub struct Inspector {
    lha: Option<Tool>,
    timeout: Duration,
    zip_limits: ZipLimits,
}

impl Inspector {
    /// `lha` is optional: without it LHA archives are refused, ZIP still works.
    pub fn new(lha: Option<Tool>, timeout: Duration) -> Self {
        Self {
            lha,
            timeout,
            zip_limits: ZipLimits::default(),
        }
    }

    pub fn with_zip_limits(mut self, limits: ZipLimits) -> Self {
        self.zip_limits = limits;
        self
    }

    /// Unpack `archive` into `dest` (which must exist) and choose a module.
    ///
    /// Candidates are sorted by their path relative to `dest` and the first
    /// one wins, so archives with several tunes always yield the same one.
    #[instrument(skip(self), fields(archive = %archive.display()))]
    pub async fn extract(&self, container: Container, archive: &Path, dest: &Path) -> Result<Extracted> {
        match container {
            Container::None => exn::bail!(ErrorKind::ExtractionFailed("not an archive".to_string())),
            Container::Lha => self.extract_lha(archive, dest).await?,
            Container::Zip => self.extract_zip(archive, dest).await?,
        }
        let mut candidates = find_modules(dest).await?;
        candidates.sort();
        let count = candidates.len();
        let Some(first) = candidates.into_iter().next() else {
            tracing::info!("Archive contained no recognisable module");
            exn::bail!(ErrorKind::NoMusicFile);
        };
        let module = dest.join(first);
        tracing::info!(count, module = %module.display(), "Extracted archive");
        Ok(Extracted { module, count })
    }

    async fn extract_lha(&self, archive: &Path, dest: &Path) -> Result<()> {
        let tool = self.lha.as_ref().ok_or_else(|| exn::Exn::from(ErrorKind::ToolMissing("lha".to_string())))?;
        let mut cmd = tool.command();
        // x: extract with paths, q: quiet, w=: into directory.
        let mut target = std::ffi::OsString::from("xqw=");
        target.push(dest.as_os_str());
        cmd.arg(target).arg(archive);
        uade_process::run(cmd, self.timeout).await.map_err(ErrorKind::process)?;
        Ok(())
    }

    async fn extract_zip(&self, archive: &Path, dest: &Path) -> Result<()> {
        let (archive, dest, limits) = (archive.to_path_buf(), dest.to_path_buf(), self.zip_limits);
        let task = tokio::task::spawn_blocking(move || unzip(&archive, &dest, limits));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined.or_raise(|| ErrorKind::Io("zip extraction task panicked".to_string()))?,
            // The blocking thread cannot be cancelled; its output directory is
            // discarded with the staging area.
            Err(_elapsed) => exn::bail!(ErrorKind::Timeout(self.timeout)),
        }
    }
}

fn zip_error(err: zip::result::ZipError) -> ErrorKind {
    ErrorKind::ExtractionFailed(err.to_string())
}

fn io_error(err: std::io::Error) -> ErrorKind {
    ErrorKind::Io(err.to_string())
}

fn unzip(archive: &Path, dest: &Path, limits: ZipLimits) -> Result<()> {
    let file = File::open(archive).map_err(io_error)?;
    let mut zip = zip::ZipArchive::new(file).map_err(zip_error)?;
    if zip.len() > limits.max_entries {
        exn::bail!(ErrorKind::TooLarge(format!("{} entries (limit {})", zip.len(), limits.max_entries)));
    }
    let mut budget = limits.max_total_bytes;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(zip_error)?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(name = %entry.name(), "Skipping archive entry that escapes the extraction directory");
            continue;
        };
        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let mut out = File::create(&target).map_err(io_error)?;
        // Declared sizes can lie; count what is actually inflated.
        let written = std::io::copy(&mut (&mut entry).take(budget + 1), &mut out).map_err(io_error)?;
        if written > budget {
            exn::bail!(ErrorKind::TooLarge(format!("more than {} bytes uncompressed", limits.max_total_bytes)));
        }
        budget -= written;
        out.flush().map_err(io_error)?;
    }
    Ok(())
}

/// Every regular file under `root` whose name matches a module tag, as paths
/// relative to `root`. Symlinks are never followed.
async fn find_modules(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&current).await.map_err(io_error)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let file_type = entry.file_type().await.map_err(io_error)?;
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() && is_module_name(&path) {
                let relative = path
                    .strip_prefix(root)
                    .or_raise(|| ErrorKind::Io(format!("{} escaped {}", path.display(), root.display())))?;
                found.push(relative.to_path_buf());
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn inspector() -> Inspector {
        Inspector::new(None, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_find_modules_in_extracted_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Storm/docs")).unwrap();
        std::fs::write(dir.path().join("Storm/docs/readme.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("Storm/file_id.diz"), b"desc").unwrap();
        std::fs::write(dir.path().join("Storm/title.mod"), b"M.K.").unwrap();
        let found = find_modules(dir.path()).await.unwrap();
        assert_eq!(found, vec![PathBuf::from("Storm/title.mod")]);
    }

    #[tokio::test]
    async fn test_zip_single_module() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("upload.bin");
        write_zip(&archive, &[("readme.txt", b"hi"), ("music/song.mod", b"M.K."), ("info.nfo", b"x")]);
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();
        let extracted = inspector().extract(Container::Zip, &archive, &dest).await.unwrap();
        assert_eq!(extracted.count, 1);
        assert_eq!(extracted.module, dest.join("music/song.mod"));
        assert_eq!(std::fs::read(&extracted.module).unwrap(), b"M.K.");
    }

    #[tokio::test]
    async fn test_zip_tie_break_is_sorted_path() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("upload.zip");
        write_zip(&archive, &[("zz.mod", b"2"), ("b/mdat.tune", b"1"), ("smpl.tune", b"3"), ("a.ahx", b"0")]);
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();
        let extracted = inspector().extract(Container::Zip, &archive, &dest).await.unwrap();
        assert_eq!(extracted.count, 4);
        assert_eq!(extracted.module, dest.join("a.ahx"));
    }

    #[tokio::test]
    async fn test_zip_without_modules() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("upload.zip");
        write_zip(&archive, &[("readme.txt", b"nothing to play")]);
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();
        let err = inspector().extract(Container::Zip, &archive, &dest).await.unwrap_err();
        assert_eq!(*err, ErrorKind::NoMusicFile);
    }

    #[tokio::test]
    async fn test_zip_entry_limit() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("upload.zip");
        write_zip(&archive, &[("a.mod", b"1"), ("b.mod", b"2"), ("c.mod", b"3")]);
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();
        let limited = inspector().with_zip_limits(ZipLimits { max_entries: 2, max_total_bytes: 1024 });
        let err = limited.extract(Container::Zip, &archive, &dest).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::TooLarge(_)));
    }

    #[tokio::test]
    async fn test_zip_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("upload.zip");
        let big = vec![0u8; 4096];
        write_zip(&archive, &[("a.mod", &big)]);
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();
        let limited = inspector().with_zip_limits(ZipLimits { max_entries: 8, max_total_bytes: 1000 });
        let err = limited.extract(Container::Zip, &archive, &dest).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::TooLarge(_)));
    }

    #[tokio::test]
    async fn test_corrupt_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("upload.zip");
        std::fs::write(&archive, b"PK\x03\x04garbage").unwrap();
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();
        let err = inspector().extract(Container::Zip, &archive, &dest).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ExtractionFailed(_)));
    }

    #[tokio::test]
    async fn test_lha_without_archiver() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("upload.lha");
        std::fs::write(&archive, b"\x24\x1a-lh5-\x10\x00\x00\x00").unwrap();
        let err = inspector().extract(Container::Lha, &archive, dir.path()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::ToolMissing("lha".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lha_failure_carries_diagnostic() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("lha");
        std::fs::write(&fake, "#!/bin/sh\necho 'bad archive header' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        let archive = dir.path().join("upload.lha");
        std::fs::write(&archive, b"\x24\x1a-lh5-\x10\x00\x00\x00").unwrap();
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();
        let inspector = Inspector::new(Some(Tool::at("lha", &fake)), Duration::from_secs(5));
        let err = inspector.extract(Container::Lha, &archive, &dest).await.unwrap_err();
        assert_eq!(*err, ErrorKind::ExtractionFailed("bad archive header".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lha_single_module_among_extras() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("lha");
        // Unpacks a fixed listing into the `w=` directory of an `xqw=<dir>` call.
        let script = concat!(
            "#!/bin/sh\n",
            "case \"$1\" in xqw=*) out=\"${1#xqw=}\" ;; *) echo \"unexpected: $1\" >&2; exit 2 ;; esac\n",
            "[ -f \"$2\" ] || { echo \"missing archive\" >&2; exit 3; }\n",
            "printf hello > \"$out/readme.txt\"\n",
            "printf desc > \"$out/file_id.diz\"\n",
            "printf M.K. > \"$out/song.mod\"\n",
        );
        std::fs::write(&fake, script).unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        let archive = dir.path().join("pack.lha");
        std::fs::write(&archive, b"\x24\x1a-lh5-\x10\x00\x00\x00").unwrap();
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();

        let extracted = Inspector::new(Some(Tool::at("lha", &fake)), Duration::from_secs(5))
            .extract(Container::Lha, &archive, &dest)
            .await
            .unwrap();
        assert_eq!(extracted.count, 1);
        assert_eq!(extracted.module, dest.join("song.mod"));
        assert!(dest.join("readme.txt").is_file());
    }

    #[tokio::test]
    #[ignore = "requires lha on PATH"]
    async fn test_real_lha() {
        let lha = Tool::discover("lha", None, &["lha"]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("readme.txt"), b"hello").unwrap();
        std::fs::write(src.join("file_id.diz"), b"desc").unwrap();
        std::fs::write(src.join("song.mod"), b"M.K.").unwrap();
        let archive = dir.path().join("pack.lha");
        let status = std::process::Command::new(lha.path())
            .current_dir(&src)
            .arg("aq")
            .arg(&archive)
            .args(["readme.txt", "file_id.diz", "song.mod"])
            .status()
            .unwrap();
        assert!(status.success());
        assert_eq!(Container::detect(&archive).await.unwrap(), Container::Lha);
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();
        let extracted = Inspector::new(Some(lha), Duration::from_secs(30))
            .extract(Container::Lha, &archive, &dest)
            .await
            .unwrap();
        assert_eq!(extracted.count, 1);
        assert_eq!(extracted.module, dest.join("song.mod"));
    }
}
