//! Running the workload inside a container.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt as _, AsyncRead, AsyncWriteExt as _, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::command::StagedFile;
use super::error::{ProcessFault, Result};

const LINE_CHANNEL_CAPACITY: usize = 1024;
const SIDECAR_IP_FORMAT: &str = "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}";

#[derive(Debug, Clone)]
pub struct ContainerRequest {
    pub name: String,
    pub image: String,
    /// Shell command run inside the container.
    pub command: String,
    pub extra_opts: Vec<String>,
    pub staged_files: Vec<StagedFile>,
    /// Hard limit; the container is killed when it elapses.
    pub timeout: Duration,
    /// Every output line is appended here as it arrives.
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The last `max_lines` lines of stderr, joined by newlines.
    pub fn stderr_tail(&self, max_lines: usize) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }
}

/// Sees every output line of a running container, in arrival order.
pub trait LineObserver: Send + Sync {
    fn on_line(&self, line: &str);
}

impl<F> LineObserver for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_line(&self, line: &str) {
        self(line);
    }
}

/// A helper container that lives for the duration of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidecar {
    pub id: String,
    pub internal_ip: String,
}

pub trait ContainerRunner: Send + Sync {
    /// Runs `request` to completion. A non-zero exit is reported through
    /// [`ExecResult::exit_code`]; only timeouts, launch and I/O problems are
    /// errors.
    fn run(
        &self,
        request: &ContainerRequest,
        observer: &dyn LineObserver,
    ) -> impl Future<Output = Result<ExecResult>> + Send;

    fn start_sidecar(
        &self,
        image: &str,
        command: &str,
        extra_opts: &[String],
    ) -> impl Future<Output = Result<Sidecar>> + Send;

    fn remove_sidecar(&self, sidecar: &Sidecar) -> impl Future<Output = Result<()>> + Send;
}

/// [`ContainerRunner`] backed by the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerRunner {
    docker_bin: PathBuf,
}

impl Default for DockerRunner {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerRunner {
    pub fn new(docker_bin: impl Into<PathBuf>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
        }
    }

    /// Runs a short docker subcommand and returns its trimmed stdout.
    async fn docker(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.docker_bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ProcessFault::Launch(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProcessFault::Launch(format!(
                "docker {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            ))
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn force_remove(&self, name: &str) {
        if let Err(err) = self.docker(&["rm", "-f", name]).await {
            tracing::warn!(container = name, error = %err, "failed to remove container");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

async fn forward_lines<R>(reader: R, stream: Stream, tx: mpsc::Sender<(Stream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send((stream, line)).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, ?stream, "container output read failed");
                break;
            }
        }
    }
}

impl ContainerRunner for DockerRunner {
    async fn run(
        &self,
        request: &ContainerRequest,
        observer: &dyn LineObserver,
    ) -> Result<ExecResult> {
        // Host copies of staged files, mounted read-only; removed on drop.
        let staging = tempfile::tempdir()?;

        let mut cmd = Command::new(&self.docker_bin);
        cmd.arg("run").arg("--rm").arg("--name").arg(&request.name);
        cmd.args(&request.extra_opts);
        for (idx, file) in request.staged_files.iter().enumerate() {
            let host_path = staging.path().join(format!("staged-{idx}"));
            tokio::fs::write(&host_path, &file.contents).await?;
            cmd.arg("-v")
                .arg(format!("{}:{}:ro", host_path.display(), file.container_path));
        }
        cmd.arg(&request.image)
            .arg("sh")
            .arg("-c")
            .arg(&request.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            container = %request.name,
            image = %request.image,
            command = %request.command,
            "starting container"
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| ProcessFault::Launch(e.to_string()))?;

        let (tx, mut rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, Stream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, Stream::Stderr, tx.clone()));
        }
        drop(tx);

        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.log_file)
            .await?;

        let deadline = tokio::time::Instant::now() + request.timeout;
        let mut result = ExecResult::default();
        let mut status = None;
        let mut output_open = true;

        while status.is_none() || output_open {
            tokio::select! {
                line = rx.recv(), if output_open => match line {
                    Some((stream, line)) => {
                        log.write_all(line.as_bytes()).await?;
                        log.write_all(b"\n").await?;
                        log.flush().await?;
                        observer.on_line(&line);
                        let buf = match stream {
                            Stream::Stdout => &mut result.stdout,
                            Stream::Stderr => &mut result.stderr,
                        };
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                    None => output_open = false,
                },
                exit = child.wait(), if status.is_none() => {
                    status = Some(exit?);
                }
                () = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(
                        container = %request.name,
                        timeout_secs = request.timeout.as_secs(),
                        "container timed out; killing"
                    );
                    if let Err(err) = child.kill().await {
                        tracing::warn!(container = %request.name, error = %err, "failed to kill docker client");
                    }
                    self.force_remove(&request.name).await;
                    return Err(ProcessFault::Timeout {
                        after: request.timeout,
                    }
                    .into());
                }
            }
        }

        result.exit_code = status.and_then(|s| s.code()).unwrap_or(-1);
        tracing::debug!(
            container = %request.name,
            exit_code = result.exit_code,
            "container exited"
        );
        Ok(result)
    }

    async fn start_sidecar(
        &self,
        image: &str,
        command: &str,
        extra_opts: &[String],
    ) -> Result<Sidecar> {
        let mut args = vec!["run", "-d"];
        args.extend(extra_opts.iter().map(String::as_str));
        args.extend([image, "sh", "-c", command]);
        let id = self.docker(&args).await?;

        let internal_ip = self.docker(&["inspect", "-f", SIDECAR_IP_FORMAT, &id]).await?;
        if internal_ip.is_empty() {
            self.force_remove(&id).await;
            return Err(ProcessFault::Launch(format!("sidecar {id} has no internal address")).into());
        }

        tracing::debug!(sidecar = %id, ip = %internal_ip, image, "sidecar started");
        Ok(Sidecar { id, internal_ip })
    }

    async fn remove_sidecar(&self, sidecar: &Sidecar) -> Result<()> {
        self.docker(&["rm", "-f", &sidecar.id]).await?;
        Ok(())
    }
}
