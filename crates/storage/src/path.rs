//! Storage key normalisation.
//!
//! Every key handed to a backend (`{fingerprint}.flac`, `samples/{fp}.smpl`,
//! `{file_id}.wav`) passes through [`validate`] first, so a backend only ever
//! sees relative keys that stay below its root.

use crate::error::{ErrorKind, Result};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Normalise `key` to a relative path below the storage root.
///
/// `.` segments, repeated and trailing separators, and a leading `/` are
/// dropped; `..` is resolved lexically and may not climb above the root.
/// Empty keys, NUL bytes and Windows drive prefixes are refused.
///
/// ```
/// use std::path::Path;
/// use uade_storage::validate_path;
///
/// assert_eq!(validate_path("samples//0f3a.smpl").unwrap(), Path::new("samples/0f3a.smpl"));
/// assert_eq!(validate_path("tmp/../3f2a.wav").unwrap(), Path::new("3f2a.wav"));
/// assert!(validate_path("../etc/passwd").is_err());
/// ```
pub fn validate(key: impl AsRef<Path>) -> Result<PathBuf> {
    let key = key.as_ref();
    let refuse = || exn::Exn::from(ErrorKind::InvalidPath(key.to_path_buf()));
    let mut segments: Vec<&OsStr> = Vec::new();
    for component in key.components() {
        match component {
            // Path::components keeps NUL on Unix; the syscalls would truncate at it.
            Component::Normal(segment) if segment.as_encoded_bytes().contains(&0) => return Err(refuse()),
            Component::Normal(segment) => segments.push(segment),
            Component::ParentDir => {
                segments.pop().ok_or_else(refuse)?;
            },
            Component::Prefix(_) => return Err(refuse()),
            Component::CurDir | Component::RootDir => {},
        }
    }
    if segments.is_empty() {
        return Err(refuse());
    }
    Ok(segments.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0123abcd.flac", "0123abcd.flac")]
    #[case("samples/0f3a.smpl", "samples/0f3a.smpl")]
    #[case("/3f2a.wav", "3f2a.wav")]
    #[case("samples//./0f3a.smpl", "samples/0f3a.smpl")]
    #[case("samples///", "samples")]
    #[case("tmp/partial/../../3f2a.wav", "3f2a.wav")]
    fn test_normalises(#[case] key: &str, #[case] expected: &str) {
        assert_eq!(validate(key).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("//")]
    #[case("..")]
    #[case("samples/..")]
    #[case("../etc/passwd")]
    #[case("samples/../../cache.sqlite")]
    #[case("3f2a\0.wav")]
    fn test_refuses(#[case] key: &str) {
        let err = validate(key).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(path) if path == Path::new(key)));
    }

    #[cfg(windows)]
    #[test]
    fn test_backslashes_are_separators() {
        assert_eq!(validate("samples\\0f3a.smpl").unwrap(), Path::new("samples/0f3a.smpl"));
    }
}
