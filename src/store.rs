//! Bucket state store: the keyed grid the backend executes against.
//!
//! [`BucketStateStore`] is the injected collaborator. It exposes exactly the
//! operations the backend needs: a plain read, a synchronous atomic apply and
//! an optional callback-based asynchronous apply. Implementations own routing,
//! replication and transport; they must guarantee at most one processor runs
//! against a given key at a time.
//!
//! [`InMemoryGrid`] is a single-process implementation for tests and local use.

use crate::bucket::RemoteBucketState;
use crate::error::BackendError;
use crate::mutator::EntryProcessor;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, LockResult, Mutex, RwLock};
use tokio::runtime::Handle;
use tracing::{trace, warn};

/// Completion notification for an asynchronous apply.
///
/// A well-behaved store invokes exactly one of the two methods exactly once.
/// Both may be called from any thread.
pub trait ExecutionCallback: Send + Sync {
    /// The processor ran and the store persisted its result.
    fn on_response(&self, response: Box<dyn Any + Send>);
    /// The apply failed; the entry is unchanged.
    fn on_failure(&self, error: BackendError);
}

/// Abstract keyed store holding [`RemoteBucketState`] values.
pub trait BucketStateStore<K>: Send + Sync {
    /// Read the value at `key`. Not ordered with respect to concurrent applies.
    fn get(&self, key: &K) -> Result<Option<RemoteBucketState>, BackendError>;

    /// Run `processor` atomically at `key` and return its response.
    ///
    /// Blocks until the new value is persisted or the failure is known. When the
    /// processor fails, its error is returned and the entry is left unchanged.
    fn apply_atomically(
        &self,
        key: &K,
        processor: Box<dyn EntryProcessor>,
    ) -> Result<Box<dyn Any + Send>, BackendError>;

    /// Whether [`apply_atomically_async`](Self::apply_atomically_async) is available.
    fn supports_async(&self) -> bool {
        false
    }

    /// Submit `processor` for `key` and return immediately; `callback` learns the outcome.
    ///
    /// An `Err` means the submission itself was refused and `callback` will not fire.
    fn apply_atomically_async(
        &self,
        key: &K,
        processor: Box<dyn EntryProcessor>,
        callback: Arc<dyn ExecutionCallback>,
    ) -> Result<(), BackendError> {
        let _ = (key, processor, callback);
        Err(BackendError::UnsupportedOperation { operation: "apply_atomically_async" })
    }
}

type Slot = Arc<Mutex<Option<RemoteBucketState>>>;

/// In-memory grid with one lock per key.
///
/// Async mode is only available when built with [`InMemoryGrid::with_runtime`];
/// async applies then run on the runtime's blocking pool.
pub struct InMemoryGrid<K> {
    entries: Arc<RwLock<HashMap<K, Slot>>>,
    runtime: Option<Handle>,
    faults: Arc<Mutex<VecDeque<String>>>,
}

impl<K> Clone for InMemoryGrid<K> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            runtime: self.runtime.clone(),
            faults: self.faults.clone(),
        }
    }
}

impl<K> Default for InMemoryGrid<K> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            runtime: None,
            faults: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl<K> Debug for InMemoryGrid<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = recover("entry map", self.entries.read()).len();
        f.debug_struct("InMemoryGrid")
            .field("keys", &keys)
            .field("async", &self.runtime.is_some())
            .finish()
    }
}

impl<K> InMemoryGrid<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    /// Synchronous-only grid.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grid with async mode, running async applies on `runtime`.
    pub fn with_runtime(runtime: Handle) -> Self {
        Self { runtime: Some(runtime), ..Self::default() }
    }

    /// Make the next read or apply fail with a `StateAccess` error carrying `reason`.
    ///
    /// Queued failures are consumed in order, one per operation.
    pub fn fail_next_with(&self, reason: impl Into<String>) {
        recover("fault queue", self.faults.lock()).push_back(reason.into());
    }

    /// Number of keys holding bucket state.
    pub fn len(&self) -> usize {
        recover("entry map", self.entries.read()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn injected_fault(&self, key: &K) -> Result<(), BackendError> {
        match recover("fault queue", self.faults.lock()).pop_front() {
            Some(reason) => Err(BackendError::state_access(key, reason)),
            None => Ok(()),
        }
    }

    fn existing_slot(&self, key: &K) -> Option<Slot> {
        recover("entry map", self.entries.read()).get(key).cloned()
    }

    fn apply_locked(
        &self,
        key: &K,
        processor: &dyn EntryProcessor,
    ) -> Result<Box<dyn Any + Send>, BackendError> {
        self.injected_fault(key)?;
        if let Some(slot) = self.existing_slot(key) {
            return apply_to_slot(key, &slot, processor);
        }
        let mut entries = recover("entry map", self.entries.write());
        if let Some(slot) = entries.get(key).cloned() {
            drop(entries);
            return apply_to_slot(key, &slot, processor);
        }
        // Absent keys only get a slot once a processor produces state for them.
        let processed = processor.process(None)?;
        if let Some(new_state) = processed.new_state {
            trace!(target: "bucket_grid::store", key = ?key, label = processor.label(), "entry created");
            entries.insert(key.clone(), Arc::new(Mutex::new(Some(new_state))));
        }
        Ok(processed.response)
    }
}

fn apply_to_slot<K: Debug>(
    key: &K,
    slot: &Slot,
    processor: &dyn EntryProcessor,
) -> Result<Box<dyn Any + Send>, BackendError> {
    let mut entry = recover("entry", slot.lock());
    let processed = processor.process(entry.as_ref())?;
    if let Some(new_state) = processed.new_state {
        trace!(target: "bucket_grid::store", key = ?key, label = processor.label(), "entry replaced");
        *entry = Some(new_state);
    }
    Ok(processed.response)
}

/// Entries are only ever overwritten with a complete state, so a lock poisoned
/// by a panicking processor still guards a consistent value.
fn recover<G>(what: &'static str, result: LockResult<G>) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(target: "bucket_grid::store", what, "lock poisoned, recovering");
        poisoned.into_inner()
    })
}

impl<K> BucketStateStore<K> for InMemoryGrid<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Result<Option<RemoteBucketState>, BackendError> {
        self.injected_fault(key)?;
        let Some(slot) = self.existing_slot(key) else {
            return Ok(None);
        };
        let entry = recover("entry", slot.lock());
        Ok(entry.clone())
    }

    fn apply_atomically(
        &self,
        key: &K,
        processor: Box<dyn EntryProcessor>,
    ) -> Result<Box<dyn Any + Send>, BackendError> {
        self.apply_locked(key, processor.as_ref())
    }

    fn supports_async(&self) -> bool {
        self.runtime.is_some()
    }

    fn apply_atomically_async(
        &self,
        key: &K,
        processor: Box<dyn EntryProcessor>,
        callback: Arc<dyn ExecutionCallback>,
    ) -> Result<(), BackendError> {
        let Some(runtime) = self.runtime.as_ref() else {
            return Err(BackendError::UnsupportedOperation { operation: "apply_atomically_async" });
        };
        let grid = self.clone();
        let key = key.clone();
        runtime.spawn_blocking(move || match grid.apply_locked(&key, processor.as_ref()) {
            Ok(response) => callback.on_response(response),
            Err(error) => callback.on_failure(error),
        });
        Ok(())
    }
}
