//! Custom error types for the application.
//!
//! This module defines the primary error type, `DeckError`, for the whole crate.
//! Using the `thiserror` crate, it provides a single, consistent vocabulary for the
//! failures that can occur while allocating labware positions, consuming stacks,
//! persisting run state and talking to the liquid-handling robot.
//!
//! ## Error Hierarchy
//!
//! - **`Format`**: An invalid well label or linear index for a labware format. Always
//!   fatal at the call site, never clamped.
//! - **`StackEmpty`**: A deck stack was asked for an item it no longer holds.
//! - **`AllocationExhausted`**: A resource frame could not satisfy the requested
//!   allocation shape, even after the single-column fallback. Frame-level, as opposed
//!   to the stack-level `StackEmpty`.
//! - **`StateNotFound`** / **`StateCorrupt`**: The former is recoverable (start fresh
//!   state), the latter is fatal and must never be silently repaired.
//! - **`DeviceTimeout`** / **`DeviceCommand`**: Raised at the device driver boundary.
//! - **`Aborted`**: The operator aborted the run (prompt answer or Ctrl-C).
//!
//! By using `#[from]`, `DeckError` can be created from `std::io::Error` directly,
//! so file handling composes with the `?` operator.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type DeckResult<T> = std::result::Result<T, DeckError>;

#[derive(Error, Debug)]
pub enum DeckError {
    #[error("Format error: {0}")]
    Format(String),

    #[error("Stack at {slot} is empty")]
    StackEmpty { slot: String },

    #[error("Allocation exhausted on '{labware}': {request}")]
    AllocationExhausted { labware: String, request: String },

    #[error("Run state not found at {}", .0.display())]
    StateNotFound(PathBuf),

    #[error("Run state at {} is corrupt: {reason}", .path.display())]
    StateCorrupt { path: PathBuf, reason: String },

    #[error("Device did not complete '{command}' within {timeout:?}")]
    DeviceTimeout { command: String, timeout: Duration },

    #[error("Device command '{command}' failed: {reason}")]
    DeviceCommand { command: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Layout error: {0}")]
    Layout(String),

    #[error("Well map error: {0}")]
    Mapping(String),

    #[error("Unknown protocol '{0}'")]
    UnknownProtocol(String),

    #[error("Run aborted by operator: {0}")]
    Aborted(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

/// Process exit codes, one per fatal category.
pub mod exit {
    /// Generic failure.
    pub const FAILURE: i32 = 1;
    /// The run state file for the requested run/protocol does not exist.
    pub const STATE_NOT_FOUND: i32 = 3;
    /// The run state file exists but cannot be parsed.
    pub const STATE_CORRUPT: i32 = 4;
    /// The device did not acknowledge a command in time.
    pub const DEVICE_TIMEOUT: i32 = 5;
    /// The device rejected or failed a command.
    pub const DEVICE_COMMAND: i32 = 6;
    /// A frame or stack ran out of positions/items.
    pub const EXHAUSTED: i32 = 7;
    /// Operator abort, matching the shell convention for SIGINT.
    pub const USER_ABORT: i32 = 130;
}

impl DeckError {
    /// Shorthand for [`DeckError::Format`].
    pub fn format(msg: impl Into<String>) -> Self {
        DeckError::Format(msg.into())
    }

    /// Shorthand for [`DeckError::AllocationExhausted`].
    pub fn exhausted(labware: impl Into<String>, request: impl Into<String>) -> Self {
        DeckError::AllocationExhausted {
            labware: labware.into(),
            request: request.into(),
        }
    }

    /// Exit code the CLI reports when this error ends a run.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeckError::StateNotFound(_) => exit::STATE_NOT_FOUND,
            DeckError::StateCorrupt { .. } => exit::STATE_CORRUPT,
            DeckError::DeviceTimeout { .. } => exit::DEVICE_TIMEOUT,
            DeckError::DeviceCommand { .. } => exit::DEVICE_COMMAND,
            DeckError::AllocationExhausted { .. } | DeckError::StackEmpty { .. } => {
                exit::EXHAUSTED
            }
            DeckError::Aborted(_) => exit::USER_ABORT,
            _ => exit::FAILURE,
        }
    }

    /// Whether retrying the whole protocol method could help.
    ///
    /// Operator aborts and corrupt state are final.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            DeckError::Aborted(_) | DeckError::StateCorrupt { .. } | DeckError::Config(_)
        )
    }
}

/// Picks the exit code for an `anyhow` error chain, falling back to [`exit::FAILURE`].
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<DeckError>())
        .map_or(exit::FAILURE, DeckError::exit_code)
}
