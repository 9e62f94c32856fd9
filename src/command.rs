//! Command abstraction for remote bucket operations.
//!
//! A [`RemoteCommand`] is the unit of work shipped to the grid node owning a
//! key. It is handed the current [`RemoteBucketState`] and the time, mutates
//! its own copy, and returns a typed result. The grid persists the mutated
//! copy only when the command succeeds.

use crate::bucket::RemoteBucketState;
use crate::error::{BackendError, CommandError};
use std::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Result of init-only operations and commands that produce no value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Nothing;

/// Trait for commands applied atomically against the state stored at a key.
///
/// # Implementation Requirements
///
/// - Must be `Send + Sync + Debug`; the grid may run it on any thread.
/// - `execute` must depend only on its inputs. The grid may apply it purely as
///   a function under its own synchronization.
///
/// # Example
///
/// ```rust
/// use bucket_grid::bucket::RemoteBucketState;
/// use bucket_grid::command::RemoteCommand;
/// use bucket_grid::error::CommandError;
///
/// #[derive(Debug)]
/// struct Peek;
///
/// impl RemoteCommand for Peek {
///     type Output = u64;
///
///     fn label(&self) -> &'static str {
///         "peek"
///     }
///
///     fn execute(&self, state: &mut RemoteBucketState, now_nanos: u64) -> Result<u64, CommandError> {
///         state.refill_all(now_nanos);
///         Ok(state.available_tokens())
///     }
/// }
/// ```
pub trait RemoteCommand: Send + Sync + Debug + 'static {
    /// Value handed back to the caller.
    type Output: Send + 'static;

    /// Stable, human-readable label used in logs and errors.
    fn label(&self) -> &'static str;

    /// Apply the command to `state`.
    ///
    /// On `Err` the caller's copy is discarded and the stored state stays unchanged.
    fn execute(
        &self,
        state: &mut RemoteBucketState,
        now_nanos: u64,
    ) -> Result<Self::Output, CommandError>;
}

/// Outcome of applying a command at a key.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CommandResult<T> {
    /// The command ran against existing (or freshly created) state.
    Success(T),
    /// No state existed at the key and the command was not allowed to create it.
    BucketNotFound,
}

impl<T> CommandResult<T> {
    pub fn is_bucket_not_found(&self) -> bool {
        matches!(self, CommandResult::BucketNotFound)
    }

    /// Borrow the result value, if the command ran.
    pub fn data(&self) -> Option<&T> {
        match self {
            CommandResult::Success(data) => Some(data),
            CommandResult::BucketNotFound => None,
        }
    }

    /// Unwrap the result value, reporting a missing bucket as `MissingState` for `key`.
    pub fn into_data<K: Debug + ?Sized>(self, key: &K) -> Result<T, BackendError> {
        match self {
            CommandResult::Success(data) => Ok(data),
            CommandResult::BucketNotFound => Err(BackendError::missing_state(key)),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> CommandResult<U> {
        match self {
            CommandResult::Success(data) => CommandResult::Success(f(data)),
            CommandResult::BucketNotFound => CommandResult::BucketNotFound,
        }
    }
}
