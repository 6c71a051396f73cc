use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::Context as _;
use futures::{FutureExt, future::BoxFuture};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    process::Command,
};

/// Captured result of a short-lived tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Parameters of a two-input overlay mix.
#[derive(Debug, Clone)]
pub struct MixSpec {
    /// sox file type of both inputs and the output, e.g. "mp3"
    pub media_type: String,
    /// volume factor applied to the primary stream (stdin)
    pub volume: String,
    /// volume factor applied to the effect file
    pub fx_volume: String,
    pub effect: PathBuf,
}

/// A running mixer process. The primary stream is written to `stdin`,
/// merged audio is read from `stdout`. `exit` resolves when the process is
/// gone and fails on a non-zero exit; dropping it kills the process.
pub struct MixerProcess {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub exit: BoxFuture<'static, anyhow::Result<()>>,
}

/// The external audio capability the engine depends on.
pub trait AudioTool: Send + Sync + 'static {
    /// Reports the encoded bitrate of `path` as text, e.g. "128k".
    fn bitrate_info<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, anyhow::Result<ToolOutput>>;

    fn spawn_mixer(&self, spec: &MixSpec) -> anyhow::Result<MixerProcess>;
}

/// [`AudioTool`] backed by the `sox` binary.
#[derive(Debug, Clone)]
pub struct Sox {
    program: PathBuf,
}

impl Sox {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn info_args(path: &Path) -> Vec<OsString> {
        vec!["--info".into(), "-B".into(), path.into()]
    }

    /// `sox -t T -v V -m - -t T -v FXV <effect> -t T -`
    pub fn mix_args(spec: &MixSpec) -> Vec<OsString> {
        let t = spec.media_type.as_str();
        vec![
            "--type".into(),
            t.into(),
            "--volume".into(),
            spec.volume.as_str().into(),
            "-m".into(),
            "-".into(),
            "--type".into(),
            t.into(),
            "--volume".into(),
            spec.fx_volume.as_str().into(),
            spec.effect.as_os_str().into(),
            "--type".into(),
            t.into(),
            "-".into(),
        ]
    }

    /// First line of `sox --version`, used as a startup sanity check.
    pub async fn version(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("run {} --version", self.program.display()))?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().next().unwrap_or_default().trim().to_string())
    }
}

impl Default for Sox {
    fn default() -> Self {
        Self::new("sox")
    }
}

impl AudioTool for Sox {
    fn bitrate_info<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, anyhow::Result<ToolOutput>> {
        async move {
            let output = Command::new(&self.program)
                .args(Self::info_args(path))
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .with_context(|| format!("spawn {}", self.program.display()))?;
            Ok(ToolOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        .boxed()
    }

    fn spawn_mixer(&self, spec: &MixSpec) -> anyhow::Result<MixerProcess> {
        let mut child = Command::new(&self.program)
            .args(Self::mix_args(spec))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn {} mixer", self.program.display()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("mixer stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("mixer stdout not captured"))?;

        let exit = async move {
            // stdin/stdout are taken, so this only drains stderr while waiting
            let output = child.wait_with_output().await?;
            if !output.status.success() {
                anyhow::bail!(
                    "sox exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(())
        }
        .boxed();

        Ok(MixerProcess {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            exit,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::{
        io,
        path::{Path, PathBuf},
        sync::{Arc, Mutex},
    };

    use futures::{FutureExt, future::BoxFuture};
    use tokio::{io::AsyncWriteExt, sync::watch};

    use super::{AudioTool, MixSpec, MixerProcess, ToolOutput};

    /// In-memory stand-in for sox. The "mix" writes `[<effect>]` and then
    /// copies stdin to stdout.
    #[derive(Clone)]
    pub(crate) struct FakeSox {
        bitrate: String,
        fail_mixer: bool,
        break_mid_stream: bool,
        mixes: Arc<Mutex<Vec<PathBuf>>>,
        released: Arc<watch::Sender<usize>>,
    }

    struct ReleaseGuard(Arc<watch::Sender<usize>>);

    impl Drop for ReleaseGuard {
        fn drop(&mut self) {
            self.0.send_modify(|n| *n += 1);
        }
    }

    impl FakeSox {
        pub(crate) fn new(bitrate: &str) -> Self {
            Self {
                bitrate: bitrate.to_string(),
                fail_mixer: false,
                break_mid_stream: false,
                mixes: Arc::default(),
                released: Arc::new(watch::channel(0).0),
            }
        }

        pub(crate) fn fail_mixer(mut self) -> Self {
            self.fail_mixer = true;
            self
        }

        /// The mixer emits its marker, then dies with a broken pipe.
        pub(crate) fn break_mid_stream(mut self) -> Self {
            self.break_mid_stream = true;
            self
        }

        pub(crate) fn mixes(&self) -> Vec<PathBuf> {
            self.mixes.lock().unwrap().clone()
        }

        /// Waits until `n` mixer processes have exited or been released.
        pub(crate) async fn wait_released(&self, n: usize) {
            let mut rx = self.released.subscribe();
            let _ = rx.wait_for(|count| *count >= n).await;
        }
    }

    impl AudioTool for FakeSox {
        fn bitrate_info<'a>(
            &'a self,
            _path: &'a Path,
        ) -> BoxFuture<'a, anyhow::Result<ToolOutput>> {
            let output = ToolOutput {
                success: true,
                stdout: format!("{}\n", self.bitrate),
                stderr: String::new(),
            };
            async move { Ok(output) }.boxed()
        }

        fn spawn_mixer(&self, spec: &MixSpec) -> anyhow::Result<MixerProcess> {
            if self.fail_mixer {
                anyhow::bail!("sox: not installed");
            }
            self.mixes.lock().unwrap().push(spec.effect.clone());

            let (stdin, mut stdin_rx) = tokio::io::duplex(64 * 1024);
            let (mut stdout_tx, stdout) = tokio::io::duplex(64 * 1024);
            let marker = format!("[{}]", spec.effect.display());
            let break_mid_stream = self.break_mid_stream;
            let task = tokio::spawn(async move {
                stdout_tx.write_all(marker.as_bytes()).await?;
                if break_mid_stream {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mixer crashed"));
                }
                tokio::io::copy(&mut stdin_rx, &mut stdout_tx).await?;
                stdout_tx.shutdown().await
            });

            let guard = ReleaseGuard(self.released.clone());
            let exit = async move {
                let _guard = guard;
                task.await??;
                Ok(())
            }
            .boxed();

            Ok(MixerProcess {
                stdin: Box::new(stdin),
                stdout: Box::new(stdout),
                exit,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_args() {
        let args = Sox::info_args(Path::new("file.mp3"));
        assert_eq!(args, vec!["--info", "-B", "file.mp3"]);
    }

    #[test]
    fn test_mix_args() {
        let spec = MixSpec {
            media_type: "mp3".to_string(),
            volume: "0.99".to_string(),
            fx_volume: "0.1".to_string(),
            effect: PathBuf::from("fx/applause.mp3"),
        };
        let args = Sox::mix_args(&spec);
        assert_eq!(
            args,
            vec![
                "--type",
                "mp3",
                "--volume",
                "0.99",
                "-m",
                "-",
                "--type",
                "mp3",
                "--volume",
                "0.1",
                "fx/applause.mp3",
                "--type",
                "mp3",
                "-",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let sox = Sox::new("/nonexistent/sox-binary");
        assert!(sox.bitrate_info(Path::new("a.mp3")).await.is_err());
        let spec = MixSpec {
            media_type: "mp3".to_string(),
            volume: "1".to_string(),
            fx_volume: "1".to_string(),
            effect: PathBuf::from("a.mp3"),
        };
        assert!(sox.spawn_mixer(&spec).is_err());
    }
}
