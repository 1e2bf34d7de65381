use std::collections::VecDeque;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _};
use tokio_util::sync::CancellationToken;

use super::error::Result;

/// How often to check whether a not-yet-created file has appeared.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How often to look for newly appended content once the file is open.
pub const DEFAULT_READ_INTERVAL: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 8 * 1024;

/// Tails a file that another process appends to.
///
/// The file is followed from the end of the content present when it is
/// first opened; only newline-terminated lines are returned. Rotation and
/// truncation are not detected.
#[derive(Debug)]
pub struct LogFollower {
    path: PathBuf,
    cancel: CancellationToken,
    poll_interval: Duration,
    read_interval: Duration,
    file: Option<File>,
    partial: Vec<u8>,
    ready: VecDeque<String>,
}

impl LogFollower {
    pub fn new(path: impl Into<PathBuf>, cancel: CancellationToken) -> Self {
        Self {
            path: path.into(),
            cancel,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_interval: DEFAULT_READ_INTERVAL,
            file: None,
            partial: Vec::new(),
            ready: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn with_intervals(mut self, poll_interval: Duration, read_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.read_interval = read_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// A handle that stops this follower when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Idempotent; safe before the file exists.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Opens the file if it exists and is not open yet, positioned at its
    /// current end. Returns whether the file is open. Calling this before
    /// the writer starts pins the starting offset.
    pub async fn open(&mut self) -> Result<bool> {
        if self.file.is_some() {
            return Ok(true);
        }
        match File::open(&self.path).await {
            Ok(mut file) => {
                file.seek(SeekFrom::End(0)).await?;
                tracing::debug!(path = %self.path.display(), "following log file");
                self.file = Some(file);
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Waits for the next complete line. Returns `Ok(None)` once stopped.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }

            if !self.open().await? {
                self.pause(self.poll_interval).await;
                continue;
            }

            let Some(file) = self.file.as_mut() else {
                continue;
            };

            let mut buf = [0u8; READ_CHUNK];
            let n = file.read(&mut buf).await?;
            if n == 0 {
                self.pause(self.read_interval).await;
                continue;
            }
            self.push_bytes(&buf[..n]);
        }
    }

    async fn pause(&self, interval: Duration) {
        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = tokio::time::sleep(interval) => {}
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            if self.partial.last() == Some(&b'\r') {
                self.partial.pop();
            }
            let line = String::from_utf8_lossy(&self.partial).into_owned();
            self.partial.clear();
            self.ready.push_back(line);
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);
    }
}
