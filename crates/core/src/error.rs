//! Typed errors for core operations and their user-facing categories.

use providers::ProviderError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("path does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("path is not a file: {}", .0.display())]
    NotAFile(PathBuf),

    /// Deletion and similar destructive calls are confined to the working root.
    #[error("refusing to touch a path outside the working directory: {}", .0.display())]
    OutsideWorkingRoot(PathBuf),

    #[error("unsupported media file: {}", .0.display())]
    UnsupportedMedia(PathBuf),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0} is not installed or not in PATH")]
    ToolMissing(String),

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Io,
    Network,
    Input,
    Tool,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Io => "io",
            ErrorCategory::Network => "network",
            ErrorCategory::Input => "input",
            ErrorCategory::Tool => "tool",
        }
    }
}

/// Walks the error chain and reports the first recognised category; I/O otherwise.
pub fn categorize(err: &anyhow::Error) -> ErrorCategory {
    for cause in err.chain() {
        if let Some(core) = cause.downcast_ref::<CoreError>() {
            return match core {
                CoreError::NotFound(_) | CoreError::NotADirectory(_) | CoreError::NotAFile(_) => {
                    ErrorCategory::Io
                }
                CoreError::OutsideWorkingRoot(_)
                | CoreError::UnsupportedMedia(_)
                | CoreError::InvalidInput(_) => ErrorCategory::Input,
                CoreError::ToolMissing(_) | CoreError::ToolFailed { .. } => ErrorCategory::Tool,
                CoreError::Provider(p) => provider_category(p),
            };
        }
        if let Some(p) = cause.downcast_ref::<ProviderError>() {
            return provider_category(p);
        }
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return ErrorCategory::Io;
        }
    }
    ErrorCategory::Io
}

fn provider_category(err: &ProviderError) -> ErrorCategory {
    match err {
        ProviderError::UnknownProvider(_) => ErrorCategory::Input,
        _ => ErrorCategory::Network,
    }
}
