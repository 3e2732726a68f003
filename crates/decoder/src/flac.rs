use crate::error::{ErrorKind, Result};
use crate::{Encoder, require_output};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::instrument;
use uade_process::Tool;

/// The reference FLAC encoder.
#[derive(Debug, Clone)]
pub struct Flac {
    tool: Tool,
    timeout: Duration,
}

impl Flac {
    pub fn new(tool: Tool, timeout: Duration) -> Self {
        Self { tool, timeout }
    }
}

#[async_trait]
impl Encoder for Flac {
    #[instrument(skip(self), fields(input = %input.display(), output = %output.display()))]
    async fn encode(&self, input: &Path, output: &Path) -> Result<()> {
        let mut cmd = self.tool.command();
        cmd.args(["--best", "--silent", "-f", "-o"]).arg(output).arg(input);
        uade_process::run(cmd, self.timeout).await.map_err(ErrorKind::process)?;
        require_output(output).await?;
        if let (Ok(wav), Ok(flac)) = (tokio::fs::metadata(input).await, tokio::fs::metadata(output).await) {
            tracing::info!(wav = wav.len(), flac = flac.len(), "Compressed to FLAC");
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fake_flac(dir: &Path, script: &str) -> Flac {
        let path = dir.join("flac");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Flac::new(Tool::at("flac", path), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_encode_argument_order() {
        let dir = tempfile::tempdir().unwrap();
        // flac --best --silent -f -o <out> <in>
        let flac = fake_flac(dir.path(), r#"[ "$1" = "--best" ] && cp "$6" "$5""#);
        let input = dir.path().join("in.wav");
        std::fs::write(&input, b"RIFFdata").unwrap();
        let output = dir.path().join("out.flac");
        flac.encode(&input, &output).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"RIFFdata");
    }

    #[tokio::test]
    async fn test_encode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let flac = fake_flac(dir.path(), "echo 'ERROR: input is not a WAVE file' >&2\nexit 1");
        let err = flac.encode(&dir.path().join("in.wav"), &dir.path().join("out.flac")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Failed("ERROR: input is not a WAVE file".to_string()));
    }
}
