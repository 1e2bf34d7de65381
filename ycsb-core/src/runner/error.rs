use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid stress config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("missing required parameter `{0}`")]
    MissingParam(&'static str),

    #[error("invalid parameter `{key}`: {reason}")]
    InvalidParam { key: &'static str, reason: String },

    #[error(transparent)]
    Process(#[from] ProcessFault),
}

impl Error {
    /// True for errors raised while assembling a run, before anything launched.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Yaml(_) | Self::MissingParam(_) | Self::InvalidParam { .. }
        )
    }
}

/// A fault of the workload process itself. `Display` is the normalized
/// detail carried by `failure` events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessFault {
    #[error("Stress command did not complete within {} seconds!", .after.as_secs())]
    Timeout { after: Duration },

    #[error("Stress command completed with bad status {code}: {stderr_tail}")]
    BadExit { code: i32, stderr_tail: String },

    #[error("Stress command failed to launch: {0}")]
    Launch(String),

    /// The run stopped before the command completed: its task panicked or
    /// its future was dropped.
    #[error("Stress run aborted: {0}")]
    Aborted(String),
}
