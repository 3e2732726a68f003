use crate::error::{ErrorKind, Result};
use std::path::Path;
use tokio::io::AsyncReadExt;

const LHA_MAGIC: [&[u8; 3]; 2] = [b"-lh", b"-lz"];
const ZIP_MAGIC: [&[u8; 4]; 2] = [b"PK\x03\x04", b"PK\x05\x06"];
/// LHA level-0 headers put the method id at offset 2; anything shorter than
/// the smallest header is not an archive.
const LHA_MIN_HEADER: usize = 7;
const SNIFF_BYTES: u64 = 20;

/// Container format of an uploaded or fetched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// Not an archive; treat the file itself as the module.
    None,
    Lha,
    Zip,
}

impl Container {
    /// Detect the container from magic bytes. File names are never trusted.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Self {
        if bytes.len() >= LHA_MIN_HEADER && LHA_MAGIC.iter().any(|magic| &bytes[2..5] == magic.as_slice()) {
            return Container::Lha;
        }
        if ZIP_MAGIC.iter().any(|magic| bytes.starts_with(magic.as_slice())) {
            return Container::Zip;
        }
        Container::None
    }

    /// Read the head of a file and detect its container.
    pub async fn detect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await.map_err(|e| ErrorKind::Io(e.to_string()))?;
        let mut head = Vec::with_capacity(SNIFF_BYTES as usize);
        file.take(SNIFF_BYTES).read_to_end(&mut head).await.map_err(|e| ErrorKind::Io(e.to_string()))?;
        let container = Self::from_magic_bytes(&head);
        tracing::debug!(path = %path.display(), ?container, "Detected container");
        Ok(container)
    }

    pub fn is_archive(self) -> bool {
        self != Container::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"", Container::None)]
    #[case(b"M.K.", Container::None)]
    #[case(b"\x24\x1a-lh5-\x10\x00\x00\x00", Container::Lha)]
    #[case(b"\x24\x1a-lz4-\x10\x00\x00\x00", Container::Lha)]
    #[case(b"\x24\x1a-lh5", Container::None)]
    #[case(b"xx-lx5-\x00\x00", Container::None)]
    #[case(b"PK\x03\x04\x14\x00", Container::Zip)]
    #[case(b"PK\x05\x06\x00\x00", Container::Zip)]
    #[case(b"PK\x07\x08", Container::None)]
    fn test_from_magic_bytes(#[case] bytes: &[u8], #[case] expected: Container) {
        assert_eq!(Container::from_magic_bytes(bytes), expected);
    }

    #[tokio::test]
    async fn test_detect_ignores_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tune.mod");
        std::fs::write(&path, b"\x24\x1a-lh5-\x10\x00\x00\x00rest").unwrap();
        assert_eq!(Container::detect(&path).await.unwrap(), Container::Lha);
        let plain = dir.path().join("archive.lha");
        std::fs::write(&plain, b"not an archive at all").unwrap();
        assert_eq!(Container::detect(&plain).await.unwrap(), Container::None);
    }
}
