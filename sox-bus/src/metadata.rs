//! Bitrate probing (like `sox --info -B`).

use std::path::Path;

use crate::tool::AudioTool;

/// Parses the textual bitrate sox prints, e.g. "128k", "1.41M" or "96000".
/// The result is in bits per second.
pub fn parse_bitrate(text: &str) -> anyhow::Result<u64> {
    let text = text.trim();
    let (number, scale) = match text.char_indices().last() {
        Some((i, 'k' | 'K')) => (&text[..i], 1_000.0),
        Some((i, 'M')) => (&text[..i], 1_000_000.0),
        Some(_) => (text, 1.0),
        None => anyhow::bail!("empty bitrate"),
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bitrate {:?}: {}", text, e))?;
    if !value.is_finite() || value <= 0.0 {
        anyhow::bail!("invalid bitrate {:?}", text);
    }
    Ok((value * scale).round() as u64)
}

async fn try_probe(tool: &dyn AudioTool, path: &Path) -> anyhow::Result<u64> {
    let output = tool.bitrate_info(path).await?;
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        anyhow::bail!("{}", stderr);
    }
    if !output.success {
        anyhow::bail!("bitrate query exited unsuccessfully");
    }
    parse_bitrate(&output.stdout)
}

/// Returns the bitrate of `path` in bits per second, or `default_bits` when
/// probing fails for any reason. Never retried.
pub async fn probe_bitrate(tool: &dyn AudioTool, path: &Path, default_bits: u64) -> u64 {
    match try_probe(tool, path).await {
        Ok(bits) => {
            log::debug!("probed bitrate of {}: {} bps", path.display(), bits);
            bits
        }
        Err(e) => {
            log::warn!(
                "error getting bitrate of {}: {:#}, using default {}",
                path.display(),
                e,
                default_bits
            );
            default_bits
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::{FutureExt, future::BoxFuture};

    use super::*;
    use crate::tool::{MixSpec, MixerProcess, ToolOutput};

    struct InfoOnly(anyhow::Result<ToolOutput>);

    impl AudioTool for InfoOnly {
        fn bitrate_info<'a>(
            &'a self,
            _path: &'a Path,
        ) -> BoxFuture<'a, anyhow::Result<ToolOutput>> {
            let result = match &self.0 {
                Ok(out) => Ok(out.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            };
            async move { result }.boxed()
        }

        fn spawn_mixer(&self, _spec: &MixSpec) -> anyhow::Result<MixerProcess> {
            anyhow::bail!("not a mixer")
        }
    }

    fn stdout(text: &str) -> InfoOnly {
        InfoOnly(Ok(ToolOutput {
            success: true,
            stdout: text.to_string(),
            stderr: String::new(),
        }))
    }

    #[test]
    fn test_parse_bitrate() -> anyhow::Result<()> {
        assert_eq!(parse_bitrate("1k")?, 1_000);
        assert_eq!(parse_bitrate("128k\n")?, 128_000);
        assert_eq!(parse_bitrate(" 1.5k ")?, 1_500);
        assert_eq!(parse_bitrate("1.41M")?, 1_410_000);
        assert_eq!(parse_bitrate("96000")?, 96_000);
        Ok(())
    }

    #[test]
    fn test_parse_bitrate_rejects_garbage() {
        assert!(parse_bitrate("").is_err());
        assert!(parse_bitrate("k").is_err());
        assert!(parse_bitrate("fast").is_err());
        assert!(parse_bitrate("-3k").is_err());
    }

    #[tokio::test]
    async fn test_probe_normalizes_k_suffix() {
        let bits = probe_bitrate(&stdout("1k"), Path::new("file.mp3"), 128_000).await;
        assert_eq!(bits, 1_000);
    }

    #[tokio::test]
    async fn test_probe_stderr_falls_back_to_default() {
        let tool = InfoOnly(Ok(ToolOutput {
            success: true,
            stdout: String::new(),
            stderr: "error!".to_string(),
        }));
        assert_eq!(probe_bitrate(&tool, Path::new("file.mp3"), 128_000).await, 128_000);
    }

    #[tokio::test]
    async fn test_probe_failures_fall_back_to_default() {
        let spawn_err = InfoOnly(Err(anyhow::anyhow!("no such program")));
        assert_eq!(probe_bitrate(&spawn_err, Path::new("a"), 64_000).await, 64_000);

        let bad_exit = InfoOnly(Ok(ToolOutput {
            success: false,
            stdout: "128k".to_string(),
            stderr: String::new(),
        }));
        assert_eq!(probe_bitrate(&bad_exit, Path::new("a"), 64_000).await, 64_000);

        assert_eq!(probe_bitrate(&stdout("???"), Path::new("a"), 64_000).await, 64_000);
    }
}
