//! Run failure taxonomy

use std::fmt;

use serde::Serialize;

use orderfeed_store::CheckpointError;

use crate::fetch::FetchError;
use crate::publish::PublishError;
use crate::runner::RunState;
use crate::transform::TransformError;
use crate::writer::WriteError;

/// Coarse failure class reported to callers (HTTP status, exit message).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    AuthError,
    FetchError,
    TransformError,
    WriteError,
    PublishError,
    CheckpointError,
    Cancelled,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthError => "AuthError",
            Self::FetchError => "FetchError",
            Self::TransformError => "TransformError",
            Self::WriteError => "WriteError",
            Self::PublishError => "PublishError",
            Self::CheckpointError => "CheckpointError",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any failure that aborts a run.
#[derive(Debug)]
pub enum PipelineError {
    Auth(String),
    Fetch(FetchError),
    Transform(TransformError),
    Write(WriteError),
    Publish(PublishError),
    Checkpoint(CheckpointError),
    /// Shutdown was requested before the given state was entered
    Cancelled(RunState),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth(_) => ErrorCategory::AuthError,
            Self::Fetch(_) => ErrorCategory::FetchError,
            Self::Transform(_) => ErrorCategory::TransformError,
            Self::Write(_) => ErrorCategory::WriteError,
            Self::Publish(_) => ErrorCategory::PublishError,
            Self::Checkpoint(_) => ErrorCategory::CheckpointError,
            Self::Cancelled(_) => ErrorCategory::Cancelled,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(msg) => write!(f, "Shopify rejected credentials: {msg}"),
            Self::Fetch(e) => write!(f, "fetch failed: {e}"),
            Self::Transform(e) => write!(f, "transform failed: {e}"),
            Self::Write(e) => write!(f, "write failed: {e}"),
            Self::Publish(e) => write!(f, "publish failed: {e}"),
            Self::Checkpoint(e) => write!(f, "{e}"),
            Self::Cancelled(state) => write!(f, "shutdown requested before {state}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fetch(e) => Some(e),
            Self::Transform(e) => Some(e),
            Self::Write(e) => Some(e),
            Self::Publish(e) => Some(e),
            Self::Checkpoint(e) => Some(e),
            Self::Auth(_) | Self::Cancelled(_) => None,
        }
    }
}

impl From<FetchError> for PipelineError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Auth(msg) => Self::Auth(msg),
            other => Self::Fetch(other),
        }
    }
}

impl From<TransformError> for PipelineError {
    fn from(e: TransformError) -> Self {
        Self::Transform(e)
    }
}

impl From<WriteError> for PipelineError {
    fn from(e: WriteError) -> Self {
        Self::Write(e)
    }
}

impl From<PublishError> for PipelineError {
    fn from(e: PublishError) -> Self {
        Self::Publish(e)
    }
}

impl From<CheckpointError> for PipelineError {
    fn from(e: CheckpointError) -> Self {
        Self::Checkpoint(e)
    }
}
