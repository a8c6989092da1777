use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by a language-model backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited by backend")]
    RateLimited,

    #[error("backend request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed backend response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("nothing to translate: input is empty")]
    EmptyInput,

    #[error("refusing unsafe command `{command}` (matched rule: {rule})")]
    UnsafeCommand { command: String, rule: String },

    #[error("language model unavailable: {0}")]
    BackendUnavailable(BackendError),

    #[error("language model gave an unusable answer: {0}")]
    MalformedResponse(String),
}

impl TranslateError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TranslateError::BackendUnavailable(_))
    }
}

impl From<BackendError> for TranslateError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Malformed(reason) => TranslateError::MalformedResponse(reason),
            other => TranslateError::BackendUnavailable(other),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("no such directory: {}", .0.display())]
    DirectoryNotFound(PathBuf),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("failed to launch command: {0}")]
    LaunchFailed(String),

    /// Output captured before the child was killed is kept so it can still be shown.
    #[error("command timed out after {}s", .after.as_secs_f64())]
    Timeout {
        after: Duration,
        stdout: Vec<String>,
        stderr: Vec<String>,
    },
}

/// Which half of a request went wrong, so callers can render the two differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Translation,
    Execution,
    Busy,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is busy with another request")]
    Busy,

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Busy => ErrorKind::Busy,
            SessionError::Translate(_) => ErrorKind::Translation,
            SessionError::Directory(_) | SessionError::Exec(_) => ErrorKind::Execution,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Translate(err) if err.is_retryable())
    }
}
