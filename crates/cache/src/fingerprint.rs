use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const BLOCK_SIZE: usize = 64 * 1024;
/// Joins the two URLs of a pair. A newline never survives URL validation, so
/// no pair of accepted URLs can collide with another.
const URL_PAIR_SEPARATOR: &str = "\n";

/// Cache key of a conversion: 64 lowercase hex characters of a BLAKE3 digest.
///
/// Only identity matters here. Nothing relies on the digest being
/// collision-resistant against an adversary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash everything `reader` yields, in bounded blocks.
    pub fn of_reader(mut reader: impl Read) -> io::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        update_from(&mut hasher, &mut reader)?;
        Ok(Self::from_hasher(&hasher))
    }

    /// Hash a file's content on a blocking thread.
    pub async fn of_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let display = path.display().to_string();
        tokio::task::spawn_blocking(move || File::open(&path).and_then(Self::of_reader))
            .await
            .or_raise(|| ErrorKind::Io("hashing task panicked".to_string()))?
            .map_err(|e| ErrorKind::Io(format!("{display}: {e}")).into())
    }

    /// Hash several files in order. Each file is prefixed by its length, so
    /// moving bytes from one file to the next changes the result.
    pub async fn of_files(paths: &[PathBuf]) -> Result<Self> {
        let paths = paths.to_vec();
        tokio::task::spawn_blocking(move || -> Result<Self> {
            let mut hasher = blake3::Hasher::new();
            for path in &paths {
                let mut file = File::open(path).map_err(|e| ErrorKind::Io(format!("{}: {e}", path.display())))?;
                let length = file.metadata().map_err(|e| ErrorKind::Io(e.to_string()))?.len();
                hasher.update(&length.to_le_bytes());
                update_from(&mut hasher, &mut (&mut file).take(length))
                    .map_err(|e| ErrorKind::Io(format!("{}: {e}", path.display())))?;
            }
            Ok(Self::from_hasher(&hasher))
        })
        .await
        .or_raise(|| ErrorKind::Io("hashing task panicked".to_string()))?
    }

    /// Key for a conversion fetched from two URLs (module and sample).
    /// Both are trimmed and lower-cased; order matters.
    pub fn of_url_pair(module_url: &str, sample_url: &str) -> Self {
        let joined = [module_url.trim().to_lowercase(), sample_url.trim().to_lowercase()].join(URL_PAIR_SEPARATOR);
        Self(blake3::hash(joined.as_bytes()).to_string())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let valid = raw.len() == 64 && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !valid {
            exn::bail!(ErrorKind::InvalidFingerprint(raw.chars().take(80).collect()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_hasher(hasher: &blake3::Hasher) -> Self {
        Self(hasher.finalize().to_string())
    }
}

fn update_from(hasher: &mut blake3::Hasher, reader: &mut impl Read) -> io::Result<()> {
    let mut buffer = vec![0u8; BLOCK_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                hasher.update(&buffer[..n]);
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
