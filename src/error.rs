use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Typed failures surfaced to the user.
///
/// Filesystem paths return `anyhow::Result` and carry these inside the error
/// chain; callers recover them with `downcast_ref::<DeadlineError>()`.
#[derive(Debug, Error)]
pub enum DeadlineError {
    #[error("deadline store {} is malformed: {source}", .path.display())]
    MalformedStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid deadline `{input}` ({reason}); expected MM/DD/YYYY - HH:MM")]
    InvalidDeadlineFormat { input: String, reason: String },

    #[error("unknown time zone `{0}`")]
    UnknownZone(String),

    #[error("invalid deadline ID `{0}`")]
    OutOfRange(String),

    #[error("deadline store {} is temporarily unreadable: {source}", .path.display())]
    TransientRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DeadlineError {
    pub fn invalid_format(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDeadlineFormat {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    /// Short message for the menu and CLI, without the error chain.
    pub fn user_message(&self) -> String {
        match self {
            Self::OutOfRange(_) => "Invalid deadline ID".to_string(),
            Self::MalformedStore { path, .. } => format!(
                "Deadline file {} could not be parsed; it was left untouched",
                path.display()
            ),
            other => other.to_string(),
        }
    }

    /// Errors the alert loop retries on its next tick instead of reporting as fatal.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientRead { .. } | Self::MalformedStore { .. })
    }
}

/// Find the first `DeadlineError` in an anyhow chain.
pub fn find_deadline_error(err: &anyhow::Error) -> Option<&DeadlineError> {
    err.chain().find_map(|cause| cause.downcast_ref::<DeadlineError>())
}
