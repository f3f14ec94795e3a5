use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader as TokioBufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::{mpsc, Notify};

use crate::domain::error::SpawnError;

/// Lines buffered between the pipe readers and the sink.
const LINE_QUEUE: usize = 256;

/// A fully resolved process invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.envs.extend(vars);
        self
    }
}

/// Receives each output line, in the order the runner read it, while the
/// process is still running.
#[async_trait]
pub trait LineSink: Send {
    async fn on_line(&mut self, line: &str);
}

/// Spawns a process with stdout and stderr merged into one line stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Runs `spec` to completion and returns its exit code (`-1` when it was
    /// killed by a signal). Lines are handed to `sink` and not retained. When
    /// `stop` is notified the process is killed and its remaining output is
    /// still drained.
    pub async fn run(
        &self,
        spec: &CommandSpec,
        sink: &mut dyn LineSink,
        stop: Option<&Notify>,
    ) -> Result<i32, SpawnError> {
        let mut cmd = TokioCommand::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| SpawnError {
            program: spec.program.clone(),
            reason: e.to_string(),
        })?;
        tracing::debug!(program = %spec.program, pid = ?child.id(), "process spawned");

        let (tx, mut rx) = mpsc::channel::<String>(LINE_QUEUE);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, tx.clone());
        }
        drop(tx);

        let mut stop_sent = false;
        loop {
            tokio::select! {
                line = rx.recv() => match line {
                    Some(line) => sink.on_line(&line).await,
                    None => break,
                },
                _ = wait_for_stop(stop), if !stop_sent => {
                    stop_sent = true;
                    if let Err(err) = child.start_kill() {
                        tracing::warn!(program = %spec.program, error = %err, "failed to kill process");
                    }
                }
            }
        }

        let status = child.wait().await.map_err(|e| SpawnError {
            program: spec.program.clone(),
            reason: format!("failed waiting for exit: {e}"),
        })?;
        Ok(status.code().unwrap_or(-1))
    }
}

async fn wait_for_stop(stop: Option<&Notify>) {
    match stop {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

fn spawn_line_reader<R>(stream: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = TokioBufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
                    if tx.send(line.to_string()).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed reading process output");
                    break;
                }
            }
        }
    });
}
