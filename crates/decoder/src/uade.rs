use crate::error::{ErrorKind, Result};
use crate::{Decoder, require_output};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::instrument;
use uade_process::Tool;

/// Label reported when the replayer cannot be identified.
pub const DEFAULT_PLAYER_LABEL: &str = "Module";

/// `uade123`, the Unix Amiga Delitracker Emulator front-end.
#[derive(Debug, Clone)]
pub struct Uade {
    tool: Tool,
    probe_timeout: Duration,
    decode_timeout: Duration,
}

impl Uade {
    pub fn new(tool: Tool, probe_timeout: Duration, decode_timeout: Duration) -> Self {
        Self {
            tool,
            probe_timeout,
            decode_timeout,
        }
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }
}

#[async_trait]
impl Decoder for Uade {
    #[instrument(skip(self), fields(module = %module.display()))]
    async fn probe(&self, module: &Path) -> String {
        let mut cmd = self.tool.command();
        cmd.arg("-g").arg(module);
        // uade123 -g exits non-zero for some formats it still names.
        match uade_process::output(cmd, self.probe_timeout).await {
            Ok(finished) => parse_player_name(&finished.stdout).unwrap_or_else(|| DEFAULT_PLAYER_LABEL.to_string()),
            Err(err) => {
                tracing::warn!(error = %*err, "Could not detect player format");
                DEFAULT_PLAYER_LABEL.to_string()
            },
        }
    }

    #[instrument(skip(self), fields(module = %module.display(), output = %output.display()))]
    async fn decode(&self, module: &Path, output: &Path) -> Result<()> {
        let mut cmd = self.tool.command();
        cmd.arg("-c").arg("-f").arg(output).arg(module);
        uade_process::run(cmd, self.decode_timeout).await.map_err(ErrorKind::process)?;
        require_output(output).await?;
        tracing::debug!("Decoded module to WAV");
        Ok(())
    }
}

/// Extract the replayer name from `uade123 -g` output (`playername: AHX`).
pub fn parse_player_name(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("playername:"))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("formatname: foo\nplayername: TFMX\nsubsongs: 1\n", Some("TFMX"))]
    #[case("playername:   Protracker 3.15  \n", Some("Protracker 3.15"))]
    #[case("playername:\n", None)]
    #[case("nothing useful\n", None)]
    #[case("", None)]
    fn test_parse_player_name(#[case] stdout: &str, #[case] expected: Option<&str>) {
        assert_eq!(parse_player_name(stdout).as_deref(), expected);
    }

    #[cfg(unix)]
    fn fake_uade(dir: &Path, script: &str) -> Uade {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("uade123");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Uade::new(Tool::at("uade123", path), Duration::from_secs(5), Duration::from_secs(5))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_reads_player_name() {
        let dir = tempfile::tempdir().unwrap();
        let uade = fake_uade(dir.path(), r#"[ "$1" = "-g" ] && echo "playername: AHX" && exit 1"#);
        assert_eq!(uade.probe(&dir.path().join("tune.ahx")).await, "AHX");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let uade = Uade::new(
            Tool::at("uade123", dir.path().join("missing")),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        assert_eq!(uade.probe(&dir.path().join("tune.mod")).await, DEFAULT_PLAYER_LABEL);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_decode_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        // uade123 -c -f <out> <module>
        let uade = fake_uade(dir.path(), r#"printf 'RIFF' > "$3""#);
        let output = dir.path().join("out.wav");
        uade.decode(&dir.path().join("tune.mod"), &output).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"RIFF");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_decode_failure_carries_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let uade = fake_uade(dir.path(), "echo 'Unknown format: tune.xyz' >&2\nexit 1");
        let err = uade.decode(&dir.path().join("tune.xyz"), &dir.path().join("out.wav")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Failed("Unknown format: tune.xyz".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_decode_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let uade = fake_uade(dir.path(), "exit 0");
        let err = uade.decode(&dir.path().join("tune.mod"), &dir.path().join("out.wav")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::OutputMissing);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_decode_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let slow = fake_uade(dir.path(), "sleep 5");
        let uade = Uade::new(slow.tool().clone(), Duration::from_secs(5), Duration::from_millis(100));
        let err = uade.decode(&dir.path().join("tune.mod"), &dir.path().join("out.wav")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Timeout(Duration::from_millis(100)));
    }
}
