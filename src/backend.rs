//! Execution backend: the public entry point for running commands against the grid.
//!
//! # Architecture
//!
//! - **Backend**: packages a command into an [`EntryMutator`], hands it to the
//!   store's atomic apply and unwraps the typed response. It holds no locks of
//!   its own; per-key serialization is the store's job.
//! - **Store**: any [`BucketStateStore`] (an in-memory grid, or an adapter over a
//!   real distributed map).
//! - **Async**: asynchronous calls go through the store's callback mechanism and
//!   come back as a [`CommandFuture`].
//!
//! Nothing here retries. Retry and timeout policies belong to the caller (see
//! [`crate::service`]).

use crate::bucket::BucketConfiguration;
use crate::clock::{Clock, SystemClock};
use crate::command::{CommandResult, RemoteCommand};
use crate::error::BackendError;
use crate::future::{downcast_response, CommandFuture, CompletionCallback, DataFuture};
use crate::mutator::{EntryMutator, EntryProcessor};
use crate::store::BucketStateStore;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Operations every execution backend offers for keys of type `K`.
pub trait Backend<K> {
    /// Apply `command` atomically at `key`.
    ///
    /// A key without state yields `CommandResult::BucketNotFound`.
    fn execute<C: RemoteCommand>(
        &self,
        key: &K,
        command: C,
    ) -> Result<CommandResult<C::Output>, BackendError>;

    /// Create state at `key` from `configuration` unless some already exists.
    fn create_initial_state(
        &self,
        key: &K,
        configuration: BucketConfiguration,
    ) -> Result<(), BackendError>;

    /// Ensure state exists and apply `command` in one atomic step, returning the bare result.
    fn create_initial_state_and_execute<C: RemoteCommand>(
        &self,
        key: &K,
        configuration: BucketConfiguration,
        command: C,
    ) -> Result<C::Output, BackendError>;

    /// Asynchronous [`execute`](Self::execute). Fails with `UnsupportedOperation`
    /// when async mode is unavailable.
    fn execute_async<C: RemoteCommand>(&self, key: &K, command: C) -> CommandFuture<C::Output>;

    /// Asynchronous [`create_initial_state_and_execute`](Self::create_initial_state_and_execute).
    fn create_initial_state_and_execute_async<C: RemoteCommand>(
        &self,
        key: &K,
        configuration: BucketConfiguration,
        command: C,
    ) -> DataFuture<C::Output>;

    /// Plain read of the configuration at `key`; not linearized with concurrent applies.
    fn get_configuration(&self, key: &K) -> Result<Option<BucketConfiguration>, BackendError>;

    /// Whether the async operations are available.
    fn is_async_mode_supported(&self) -> bool;
}

/// [`Backend`] over any [`BucketStateStore`].
pub struct GridBackend<K, S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    _key: PhantomData<fn(&K)>,
}

impl<K, S> Clone for GridBackend<K, S> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), clock: self.clock.clone(), _key: PhantomData }
    }
}

impl<K, S: Debug> Debug for GridBackend<K, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridBackend")
            .field("store", &self.store)
            .field("clock", &self.clock)
            .finish()
    }
}

impl<K, S> GridBackend<K, S>
where
    K: Debug,
    S: BucketStateStore<K>,
{
    /// Backend over `store`, timestamping commands with the system clock.
    pub fn new(store: S) -> Self {
        Self::builder(store).build()
    }

    pub fn builder(store: S) -> GridBackendBuilder<K, S> {
        GridBackendBuilder { store, clock: Arc::new(SystemClock), _key: PhantomData }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn apply<T: Send + 'static>(
        &self,
        key: &K,
        mutator: EntryMutator<T>,
    ) -> Result<CommandResult<T>, BackendError> {
        debug!(target: "bucket_grid::backend", key = ?key, label = mutator.label(), "apply");
        let response = self.store.apply_atomically(key, Box::new(mutator))?;
        downcast_response(response)
    }

    fn submit<T: Send + 'static>(
        &self,
        key: &K,
        mutator: EntryMutator<T>,
        operation: &'static str,
    ) -> CommandFuture<T> {
        let rendered = format!("{key:?}");
        if !self.store.supports_async() {
            return CommandFuture::failed(rendered, BackendError::UnsupportedOperation { operation });
        }
        debug!(target: "bucket_grid::backend", key = %rendered, label = mutator.label(), "submit");
        let (callback, future) = CompletionCallback::pair(rendered.clone());
        match self.store.apply_atomically_async(key, Box::new(mutator), Arc::new(callback)) {
            Ok(()) => future,
            Err(error) => CommandFuture::failed(rendered, error),
        }
    }
}

impl<K, S> Backend<K> for GridBackend<K, S>
where
    K: Debug,
    S: BucketStateStore<K>,
{
    fn execute<C: RemoteCommand>(
        &self,
        key: &K,
        command: C,
    ) -> Result<CommandResult<C::Output>, BackendError> {
        self.apply(key, EntryMutator::execute(command, self.clock.clone()))
    }

    fn create_initial_state(
        &self,
        key: &K,
        configuration: BucketConfiguration,
    ) -> Result<(), BackendError> {
        self.apply(key, EntryMutator::init_state(configuration, self.clock.clone()))?;
        Ok(())
    }

    fn create_initial_state_and_execute<C: RemoteCommand>(
        &self,
        key: &K,
        configuration: BucketConfiguration,
        command: C,
    ) -> Result<C::Output, BackendError> {
        let mutator =
            EntryMutator::init_state_and_execute(command, configuration, self.clock.clone());
        self.apply(key, mutator)?.into_data(key)
    }

    fn execute_async<C: RemoteCommand>(&self, key: &K, command: C) -> CommandFuture<C::Output> {
        self.submit(key, EntryMutator::execute(command, self.clock.clone()), "execute_async")
    }

    fn create_initial_state_and_execute_async<C: RemoteCommand>(
        &self,
        key: &K,
        configuration: BucketConfiguration,
        command: C,
    ) -> DataFuture<C::Output> {
        let mutator =
            EntryMutator::init_state_and_execute(command, configuration, self.clock.clone());
        self.submit(key, mutator, "create_initial_state_and_execute_async").into_data()
    }

    fn get_configuration(&self, key: &K) -> Result<Option<BucketConfiguration>, BackendError> {
        Ok(self.store.get(key)?.map(|state| state.configuration().clone()))
    }

    fn is_async_mode_supported(&self) -> bool {
        self.store.supports_async()
    }
}

/// Builder for [`GridBackend`].
pub struct GridBackendBuilder<K, S> {
    store: S,
    clock: Arc<dyn Clock>,
    _key: PhantomData<fn(&K)>,
}

impl<K, S> GridBackendBuilder<K, S>
where
    K: Debug,
    S: BucketStateStore<K>,
{
    /// Clock used to timestamp commands when the store applies them.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> GridBackend<K, S> {
        GridBackend { store: Arc::new(self.store), clock: self.clock, _key: PhantomData }
    }
}
