use crate::error::{ErrorKind, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// An external binary that collaborators shell out to.
///
/// Resolution happens once at startup. A configured path always wins over a
/// `PATH` search, and is rejected outright if it does not point at a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    name: String,
    path: PathBuf,
}

impl Tool {
    /// Locate a binary, preferring the configured path, then each of the
    /// `candidates` on `PATH` in order.
    pub fn discover(name: impl Into<String>, configured: Option<&Path>, candidates: &[&str]) -> Result<Self> {
        let name = name.into();
        if let Some(path) = configured {
            if path.is_file() {
                return Ok(Self { name, path: path.to_path_buf() });
            }
            tracing::warn!(tool = %name, path = %path.display(), "Configured binary does not exist");
            exn::bail!(ErrorKind::NotFound(name));
        }
        for candidate in candidates {
            if let Ok(path) = which::which(candidate) {
                tracing::debug!(tool = %name, path = %path.display(), "Discovered binary on PATH");
                return Ok(Self { name, path });
            }
        }
        tracing::info!(tool = %name, ?candidates, "Binary not found on PATH");
        exn::bail!(ErrorKind::NotFound(name))
    }

    /// Wrap a known path without any existence checks.
    pub fn at(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), path: path.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A fresh [`Command`] for this binary. Arguments must be added with
    /// `arg`/`args`; nothing is ever passed through a shell.
    pub fn command(&self) -> Command {
        Command::new(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use rstest::rstest;

    #[test]
    fn test_configured_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("uade123");
        let err = Tool::discover("uade", Some(&missing), &[]).unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound("uade".to_string()));
    }

    #[test]
    fn test_configured_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("flac");
        std::fs::write(&binary, b"#!/bin/sh\n").unwrap();
        let tool = Tool::discover("flac", Some(&binary), &["definitely-not-on-path"]).unwrap();
        assert_eq!(tool.path(), binary);
        assert_eq!(tool.name(), "flac");
    }

    #[cfg(unix)]
    #[rstest]
    #[case::none_known(&["no-such-binary-1", "no-such-binary-2"], None)]
    #[case::no_candidates(&[], None)]
    #[case::first_found_wins(&["no-such-binary", "sh", "true"], Some("sh"))]
    fn test_path_candidates(#[case] candidates: &[&str], #[case] found: Option<&str>) {
        match (Tool::discover("lha", None, candidates), found) {
            (Ok(tool), Some(binary)) => {
                assert_eq!(tool.name(), "lha");
                assert_eq!(tool.path().file_name().unwrap(), binary);
            },
            (Err(err), None) => assert_eq!(*err, ErrorKind::NotFound("lha".to_string())),
            (result, expected) => panic!("expected {expected:?}, got {result:?}"),
        }
    }
}
