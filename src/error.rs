//! Error types for remote command execution
use std::fmt;

/// Failure raised by a command while computing a new bucket state.
///
/// Returning this from [`RemoteCommand::execute`](crate::command::RemoteCommand::execute)
/// leaves the stored state untouched.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommandError {
    /// The bucket configuration supplied to the command is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Caller provided arguments the command cannot honor.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    /// Catch-all failure inside the command.
    #[error("{0}")]
    Internal(String),
}

/// Unified error type for the execution backend and the stores it drives.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackendError {
    /// The store could not read or atomically apply at a key.
    #[error("state access failed for key {key}: {reason}")]
    StateAccess {
        /// Rendered key the operation targeted.
        key: String,
        /// Reason reported by the store.
        reason: String,
    },
    /// The command failed while computing a new state.
    #[error("command `{label}` failed: {source}")]
    CommandExecution {
        /// Label of the failing command.
        label: &'static str,
        /// Failure returned by the command.
        source: CommandError,
    },
    /// An asynchronous operation was requested against a store without async support.
    #[error("{operation} is not supported: store has no asynchronous mode")]
    UnsupportedOperation {
        /// Name of the rejected operation.
        operation: &'static str,
    },
    /// No bucket state exists at the key and the operation requires one.
    #[error("no bucket state at key {key}")]
    MissingState {
        /// Rendered key that had no state.
        key: String,
    },
    /// The store handed back a response of a different type than the mutator produces.
    #[error("unexpected response from store (expected {expected})")]
    UnexpectedResponse {
        /// Type name the backend expected.
        expected: &'static str,
    },
}

impl BackendError {
    /// Build a `StateAccess` error, rendering the key with its `Debug` form.
    pub fn state_access<K: fmt::Debug + ?Sized>(key: &K, reason: impl Into<String>) -> Self {
        BackendError::StateAccess { key: format!("{key:?}"), reason: reason.into() }
    }

    /// Build a `MissingState` error, rendering the key with its `Debug` form.
    pub fn missing_state<K: fmt::Debug + ?Sized>(key: &K) -> Self {
        BackendError::MissingState { key: format!("{key:?}") }
    }

    /// Check if the store failed to reach or apply at the key.
    pub fn is_state_access(&self) -> bool {
        matches!(self, Self::StateAccess { .. })
    }

    /// Check if the command itself failed.
    pub fn is_command_execution(&self) -> bool {
        matches!(self, Self::CommandExecution { .. })
    }

    /// Check if an unsupported async operation was requested.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedOperation { .. })
    }

    /// Check if the key had no state.
    pub fn is_missing_state(&self) -> bool {
        matches!(self, Self::MissingState { .. })
    }

    /// Borrow the command failure if this is a `CommandExecution` error.
    pub fn command_error(&self) -> Option<&CommandError> {
        match self {
            Self::CommandExecution { source, .. } => Some(source),
            _ => None,
        }
    }
}
