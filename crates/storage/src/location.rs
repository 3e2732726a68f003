//! Storage location URIs.
//!
//! A durable tier is configured as a single string: `s3://bucket/prefix` for
//! an S3-compatible bucket, or an absolute filesystem path (bare or as a
//! `file://` URI) for a local directory.

use crate::error::{ErrorKind, Result};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    S3 { bucket: String, prefix: Option<String> },
}

impl Location {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if let Some(rest) = uri.strip_prefix("s3://") {
            let (bucket, prefix) = match rest.split_once('/') {
                Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
                None => (rest, ""),
            };
            if bucket.is_empty() {
                exn::bail!(ErrorKind::InvalidLocation(uri.to_string()));
            }
            let prefix = (!prefix.is_empty()).then(|| prefix.to_string());
            return Ok(Self::S3 { bucket: bucket.to_string(), prefix });
        }
        let path = PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri));
        if !path.is_absolute() {
            exn::bail!(ErrorKind::InvalidLocation(uri.to_string()));
        }
        Ok(Self::Local(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("s3://bucket", Location::S3 { bucket: "bucket".into(), prefix: None })]
    #[case("s3://bucket/", Location::S3 { bucket: "bucket".into(), prefix: None })]
    #[case("s3://bucket/cache/wav/", Location::S3 { bucket: "bucket".into(), prefix: Some("cache/wav".into()) })]
    #[case("/var/cache/uade", Location::Local(PathBuf::from("/var/cache/uade")))]
    #[case("file:///mnt/gcs", Location::Local(PathBuf::from("/mnt/gcs")))]
    fn test_parse(#[case] uri: &str, #[case] expected: Location) {
        assert_eq!(Location::parse(uri).unwrap(), expected);
    }

    #[rstest]
    #[case("s3://")]
    #[case("s3:///prefix")]
    #[case("relative/dir")]
    #[case("gs://bucket")]
    #[case("")]
    fn test_parse_invalid(#[case] uri: &str) {
        let err = Location::parse(uri).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidLocation(_)));
    }
}
