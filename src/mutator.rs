//! Entry mutators: commands packaged for the grid's "apply atomically" primitive.
//!
//! The grid only knows [`EntryProcessor`]: given the value currently stored at
//! a key (or its absence) it returns the complete value to persist and a
//! type-erased response. [`EntryMutator`] is the one implementation, with a
//! constructor per flavor:
//!
//! - [`EntryMutator::execute`]: state must exist; runs the command.
//! - [`EntryMutator::init_state`]: creates state from a configuration if absent.
//! - [`EntryMutator::init_state_and_execute`]: creates state if absent, then runs the command,
//!   all in one atomic step.

use crate::bucket::{BucketConfiguration, RemoteBucketState};
use crate::clock::Clock;
use crate::command::{CommandResult, Nothing, RemoteCommand};
use crate::error::BackendError;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// What a processor hands back to the grid.
pub struct ProcessedEntry {
    /// Complete replacement value, or `None` to leave the stored value as it is.
    pub new_state: Option<RemoteBucketState>,
    /// Value returned to whoever submitted the processor.
    pub response: Box<dyn Any + Send>,
}

impl fmt::Debug for ProcessedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessedEntry")
            .field("new_state", &self.new_state)
            .field("response", &"<dyn Any>")
            .finish()
    }
}

/// Store-facing contract for a function applied atomically at one key.
///
/// Implementations must not keep state between invocations or assume a thread:
/// the grid may call `process` more than once (for example against a backup
/// replica) and from any of its workers.
pub trait EntryProcessor: Send + Sync + fmt::Debug {
    /// Label of the wrapped operation, for logs.
    fn label(&self) -> &'static str;

    /// Compute the new value for the entry.
    ///
    /// On `Err` the grid must leave the entry unchanged.
    fn process(&self, current: Option<&RemoteBucketState>) -> Result<ProcessedEntry, BackendError>;
}

enum Flavor<T> {
    Execute {
        command: Arc<dyn RemoteCommand<Output = T>>,
    },
    // Only constructible as `EntryMutator<Nothing>`.
    InitState {
        configuration: BucketConfiguration,
        _result: PhantomData<fn() -> T>,
    },
    InitStateAndExecute {
        command: Arc<dyn RemoteCommand<Output = T>>,
        configuration: BucketConfiguration,
    },
}

/// Wraps a command (and optionally an initial configuration) as an [`EntryProcessor`].
///
/// The response it produces is always a `CommandResult<T>`.
pub struct EntryMutator<T> {
    flavor: Flavor<T>,
    clock: Arc<dyn Clock>,
}

impl<T: Send + 'static> EntryMutator<T> {
    /// Run `command` against existing state; absent state yields `BucketNotFound`.
    pub fn execute<C>(command: C, clock: Arc<dyn Clock>) -> Self
    where
        C: RemoteCommand<Output = T>,
    {
        Self { flavor: Flavor::Execute { command: Arc::new(command) }, clock }
    }

    /// Create state from `configuration` when absent, then run `command`.
    pub fn init_state_and_execute<C>(
        command: C,
        configuration: BucketConfiguration,
        clock: Arc<dyn Clock>,
    ) -> Self
    where
        C: RemoteCommand<Output = T>,
    {
        Self {
            flavor: Flavor::InitStateAndExecute { command: Arc::new(command), configuration },
            clock,
        }
    }

    fn run_command(
        command: &dyn RemoteCommand<Output = T>,
        mut state: RemoteBucketState,
        now_nanos: u64,
    ) -> Result<ProcessedEntry, BackendError> {
        let data = command
            .execute(&mut state, now_nanos)
            .map_err(|source| BackendError::CommandExecution { label: command.label(), source })?;
        Ok(ProcessedEntry {
            new_state: Some(state),
            response: Box::new(CommandResult::Success(data)),
        })
    }
}

impl EntryMutator<Nothing> {
    /// Create state from `configuration` when absent; existing state is left alone.
    pub fn init_state(configuration: BucketConfiguration, clock: Arc<dyn Clock>) -> Self {
        Self { flavor: Flavor::InitState { configuration, _result: PhantomData }, clock }
    }
}

impl<T: Send + 'static> EntryProcessor for EntryMutator<T> {
    fn label(&self) -> &'static str {
        match &self.flavor {
            Flavor::Execute { command } | Flavor::InitStateAndExecute { command, .. } => {
                command.label()
            }
            Flavor::InitState { .. } => "init_state",
        }
    }

    fn process(&self, current: Option<&RemoteBucketState>) -> Result<ProcessedEntry, BackendError> {
        let now_nanos = self.clock.now_nanos();
        match &self.flavor {
            Flavor::Execute { command } => match current {
                Some(state) => Self::run_command(command.as_ref(), state.clone(), now_nanos),
                None => Ok(ProcessedEntry {
                    new_state: None,
                    response: Box::new(CommandResult::<T>::BucketNotFound),
                }),
            },
            Flavor::InitState { configuration, .. } => {
                let new_state = match current {
                    Some(_) => None,
                    None => Some(RemoteBucketState::new(configuration.clone(), now_nanos)),
                };
                Ok(ProcessedEntry { new_state, response: Box::new(CommandResult::Success(Nothing)) })
            }
            Flavor::InitStateAndExecute { command, configuration } => {
                let state = match current {
                    Some(state) => state.clone(),
                    None => RemoteBucketState::new(configuration.clone(), now_nanos),
                };
                Self::run_command(command.as_ref(), state, now_nanos)
            }
        }
    }
}

impl<T> fmt::Debug for EntryMutator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("EntryMutator");
        match &self.flavor {
            Flavor::Execute { command } => out.field("execute", command),
            Flavor::InitState { configuration, .. } => out.field("init_state", configuration),
            Flavor::InitStateAndExecute { command, configuration } => {
                out.field("init_state", configuration).field("execute", command)
            }
        };
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::Bandwidth;
    use crate::clock::ManualClock;
    use crate::commands::{GetAvailableTokens, TryConsume};
    use crate::error::CommandError;
    use std::time::Duration;

    fn config(capacity: u64) -> BucketConfiguration {
        BucketConfiguration::single(Bandwidth::simple(capacity, Duration::from_secs(10))).unwrap()
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(0))
    }

    fn response<T: 'static>(entry: ProcessedEntry) -> CommandResult<T> {
        *entry.response.downcast::<CommandResult<T>>().expect("typed response")
    }

    #[derive(Debug)]
    struct Failing;

    impl RemoteCommand for Failing {
        type Output = u64;

        fn label(&self) -> &'static str {
            "failing"
        }

        fn execute(&self, state: &mut RemoteBucketState, _now: u64) -> Result<u64, CommandError> {
            state.consume(1);
            Err(CommandError::Internal("boom".into()))
        }
    }

    #[test]
    fn execute_on_absent_state_reports_not_found_without_writing() {
        let mutator = EntryMutator::execute(TryConsume { tokens: 1 }, clock());
        let entry = mutator.process(None).unwrap();
        assert!(entry.new_state.is_none());
        assert!(response::<bool>(entry).is_bucket_not_found());
    }

    #[test]
    fn execute_returns_complete_new_state() {
        let current = RemoteBucketState::new(config(10), 0);
        let mutator = EntryMutator::execute(TryConsume { tokens: 4 }, clock());
        let entry = mutator.process(Some(&current)).unwrap();
        let new_state = entry.new_state.clone().expect("state replaced");
        assert_eq!(new_state.available_tokens(), 6);
        assert_eq!(current.available_tokens(), 10, "input state is never touched");
        assert_eq!(response::<bool>(entry), CommandResult::Success(true));
    }

    #[test]
    fn init_state_is_a_no_op_on_existing_state() {
        let mutator = EntryMutator::init_state(config(10), clock());
        assert_eq!(mutator.label(), "init_state");
        let created = mutator.process(None).unwrap();
        assert_eq!(created.new_state, Some(RemoteBucketState::new(config(10), 0)));

        let existing = RemoteBucketState::new(config(3), 0);
        let entry = mutator.process(Some(&existing)).unwrap();
        assert!(entry.new_state.is_none());
        assert_eq!(response::<Nothing>(entry), CommandResult::Success(Nothing));
    }

    #[test]
    fn init_and_execute_applies_command_to_fresh_state() {
        let mutator = EntryMutator::init_state_and_execute(GetAvailableTokens, config(10), clock());
        let entry = mutator.process(None).unwrap();
        assert_eq!(entry.new_state.as_ref().map(|s| s.configuration()), Some(&config(10)));
        assert_eq!(response::<u64>(entry), CommandResult::Success(10));
    }

    #[test]
    fn init_and_execute_keeps_existing_configuration() {
        let existing = RemoteBucketState::new(config(5), 0);
        let mutator =
            EntryMutator::init_state_and_execute(TryConsume { tokens: 2 }, config(10), clock());
        let entry = mutator.process(Some(&existing)).unwrap();
        let new_state = entry.new_state.as_ref().unwrap();
        assert_eq!(new_state.configuration(), &config(5));
        assert_eq!(new_state.available_tokens(), 3);
    }

    #[test]
    fn command_failure_surfaces_as_command_execution() {
        let current = RemoteBucketState::new(config(10), 0);
        let err = EntryMutator::execute(Failing, clock()).process(Some(&current)).unwrap_err();
        assert_eq!(
            err,
            BackendError::CommandExecution {
                label: "failing",
                source: CommandError::Internal("boom".into())
            }
        );
        assert_eq!(current.available_tokens(), 10);
    }

    #[test]
    fn processor_reads_clock_at_apply_time() {
        let manual = ManualClock::new(0);
        let mutator = EntryMutator::execute(GetAvailableTokens, Arc::new(manual.clone()));
        let mut current = RemoteBucketState::new(config(10), 0);
        current.consume(10);
        manual.advance(Duration::from_secs(4));
        let entry = mutator.process(Some(&current)).unwrap();
        assert_eq!(response::<u64>(entry), CommandResult::Success(4));
    }
}
