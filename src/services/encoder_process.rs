//! Encoder subprocess abstraction
//!
//! The supervisor only sees [`EncoderLauncher`] and [`EncoderProcess`]; the
//! ffmpeg implementation spawns through `tokio::process` with `kill_on_drop`
//! so an encoder never outlives its handle.

use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as TokioCommand};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::EncoderConfig;
use crate::services::encoder_command::{EncoderCommandBuilder, EncoderInvocation};

/// How an encoder process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderExit {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub success: bool,
    /// Last error-looking line the encoder printed
    pub last_error: Option<String>,
}

impl EncoderExit {
    pub fn describe(&self) -> String {
        match (&self.last_error, self.code) {
            (Some(line), _) => line.clone(),
            (None, Some(code)) => format!("encoder exited with code {code}"),
            (None, None) => "encoder terminated by signal".to_string(),
        }
    }
}

/// A running encoder
#[async_trait]
pub trait EncoderProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Resolves when the process exits. Must be cancel safe.
    async fn wait(&mut self) -> io::Result<EncoderExit>;

    /// Ask the process to quit, killing it if it is still running after `grace`
    async fn terminate(&mut self, grace: Duration) -> io::Result<()>;
}

/// Spawns encoder processes
#[async_trait]
pub trait EncoderLauncher: Send + Sync {
    async fn launch(
        &self,
        stream_id: Uuid,
        invocation: &EncoderInvocation,
    ) -> io::Result<Box<dyn EncoderProcess>>;
}

/// Launches ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    command: String,
    builder: EncoderCommandBuilder,
}

impl FfmpegLauncher {
    pub fn new(config: &EncoderConfig) -> Self {
        Self {
            command: config.command.clone(),
            builder: EncoderCommandBuilder::new(config),
        }
    }
}

#[async_trait]
impl EncoderLauncher for FfmpegLauncher {
    async fn launch(
        &self,
        stream_id: Uuid,
        invocation: &EncoderInvocation,
    ) -> io::Result<Box<dyn EncoderProcess>> {
        let args = self.builder.build_args(invocation);

        let mut cmd = TokioCommand::new(&self.command);
        cmd.args(&args);
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take();
        let last_error = Arc::new(Mutex::new(None));

        let stderr_task = child.stderr.take().map(|stderr| {
            let last_error = last_error.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if is_error_line(&line) {
                        warn!("Encoder for stream {}: {}", stream_id, line);
                        if let Ok(mut slot) = last_error.lock() {
                            *slot = Some(line);
                        }
                    } else {
                        trace!("Encoder for stream {}: {}", stream_id, line);
                    }
                }
                debug!("Encoder stderr closed for stream {}", stream_id);
            })
        });

        info!(
            "Started encoder for stream {} with PID {:?}: {} {:?}",
            stream_id,
            child.id(),
            self.command,
            args
        );

        Ok(Box::new(FfmpegProcess {
            stream_id,
            child,
            stdin,
            last_error,
            stderr_task,
        }))
    }
}

fn is_error_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    ["error", "failed", "invalid", "could not", "unable to", "not found"]
        .iter()
        .any(|marker| lower.contains(marker))
}

struct FfmpegProcess {
    stream_id: Uuid,
    child: Child,
    stdin: Option<ChildStdin>,
    last_error: Arc<Mutex<Option<String>>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl FfmpegProcess {
    fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|slot| slot.clone())
    }
}

#[async_trait]
impl EncoderProcess for FfmpegProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> io::Result<EncoderExit> {
        let status = self.child.wait().await?;

        // Let the reader drain the pipe so the final error line is captured
        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }

        Ok(EncoderExit {
            code: status.code(),
            success: status.success(),
            last_error: self.last_error(),
        })
    }

    async fn terminate(&mut self, grace: Duration) -> io::Result<()> {
        // ffmpeg finishes the output cleanly on "q"
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                debug!(
                    "Could not send quit to encoder for stream {}: {}",
                    self.stream_id, e
                );
            }
            drop(stdin);
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(
                    "Encoder for stream {} exited after quit: {}",
                    self.stream_id, status
                );
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    "Encoder for stream {} ignored quit for {:?}, killing",
                    self.stream_id, grace
                );
                self.child.kill().await
            }
        }
    }
}
