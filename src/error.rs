//! Error types for the rotational search.
//!
//! Every failure in a run is fatal except a not-a-number correlation score,
//! which the grid driver absorbs locally and never reports here.

use std::path::PathBuf;
use thiserror::Error;

/// Exit status for input errors (missing file, corrupt mask, bad configuration).
pub const EXIT_INPUT_ERROR: i32 = 2;
/// Exit status when an external tool could not be run or failed.
pub const EXIT_TOOL_ERROR: i32 = 3;
/// Exit status for a run stopped by SIGINT/SIGTERM.
pub const EXIT_CANCELLED: i32 = 143;

#[derive(Error, Debug)]
pub enum AlignError {
    /// A required input volume does not exist.
    #[error("input volume not found: {}", .0.display())]
    MissingInput(PathBuf),

    /// A mask whose voxel sum is not a number (its valid range collapsed to a single value).
    #[error("mask {} is corrupt: voxel sum is not a number (valid range collapsed to a single value)", .0.display())]
    CorruptMask(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("could not launch `{command}`: {source}")]
    ToolLaunch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed with {status}: {stderr}")]
    ToolFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected output from `{command}`: {detail}")]
    ToolOutput { command: String, detail: String },

    #[error("search finished without evaluating a single candidate")]
    NoCandidates,

    #[error("terminated: run cancelled by signal")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for search operations.
pub type Result<T> = std::result::Result<T, AlignError>;

impl AlignError {
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn tool_output(command: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ToolOutput {
            command: command.into(),
            detail: detail.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingInput(_) | Self::CorruptMask(_) | Self::InvalidConfiguration(_) => {
                EXIT_INPUT_ERROR
            }
            Self::ToolLaunch { .. } | Self::ToolFailed { .. } | Self::ToolOutput { .. } => {
                EXIT_TOOL_ERROR
            }
            Self::Cancelled => EXIT_CANCELLED,
            Self::NoCandidates | Self::Io(_) => 1,
        }
    }
}
