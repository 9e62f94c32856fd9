//! `tower::Service` view of a [`GridBackend`].
//!
//! The backend never retries or times out on its own. Exposing the async
//! operations as services lets callers stack tower middleware (timeouts,
//! retries, concurrency limits) in front of the grid.
//!
//! ```rust
//! use bucket_grid::backend::GridBackend;
//! use bucket_grid::commands::GetAvailableTokens;
//! use bucket_grid::service::ExecuteRequest;
//! use bucket_grid::store::InMemoryGrid;
//! use std::time::Duration;
//! use tower::ServiceExt;
//!
//! #[tokio::main]
//! async fn main() {
//!     let grid: InMemoryGrid<String> = InMemoryGrid::with_runtime(tokio::runtime::Handle::current());
//!     let backend = GridBackend::new(grid);
//!     let svc = tower::timeout::Timeout::new(backend, Duration::from_secs(1));
//!     let result = svc
//!         .oneshot(ExecuteRequest::new("user-42".to_string(), GetAvailableTokens))
//!         .await
//!         .expect("grid reachable");
//!     assert!(result.is_bucket_not_found());
//! }
//! ```

use crate::backend::{Backend, GridBackend};
use crate::bucket::BucketConfiguration;
use crate::command::{CommandResult, RemoteCommand};
use crate::error::BackendError;
use crate::future::{CommandFuture, DataFuture};
use crate::store::BucketStateStore;
use std::fmt::Debug;
use std::task::{Context, Poll};
use tower::Service;

/// Request for [`Backend::execute_async`].
#[derive(Debug, Clone)]
pub struct ExecuteRequest<K, C> {
    pub key: K,
    pub command: C,
}

impl<K, C> ExecuteRequest<K, C> {
    pub fn new(key: K, command: C) -> Self {
        Self { key, command }
    }
}

/// Request for [`Backend::create_initial_state_and_execute_async`].
#[derive(Debug, Clone)]
pub struct InitAndExecuteRequest<K, C> {
    pub key: K,
    pub configuration: BucketConfiguration,
    pub command: C,
}

impl<K, C> InitAndExecuteRequest<K, C> {
    pub fn new(key: K, configuration: BucketConfiguration, command: C) -> Self {
        Self { key, configuration, command }
    }
}

fn ready<K, S>(backend: &GridBackend<K, S>, operation: &'static str) -> Poll<Result<(), BackendError>>
where
    K: Debug,
    S: BucketStateStore<K>,
{
    if backend.is_async_mode_supported() {
        Poll::Ready(Ok(()))
    } else {
        Poll::Ready(Err(BackendError::UnsupportedOperation { operation }))
    }
}

impl<K, S, C> Service<ExecuteRequest<K, C>> for GridBackend<K, S>
where
    K: Debug,
    S: BucketStateStore<K>,
    C: RemoteCommand,
{
    type Response = CommandResult<C::Output>;
    type Error = BackendError;
    type Future = CommandFuture<C::Output>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        ready(self, "execute_async")
    }

    fn call(&mut self, req: ExecuteRequest<K, C>) -> Self::Future {
        self.execute_async(&req.key, req.command)
    }
}

impl<K, S, C> Service<InitAndExecuteRequest<K, C>> for GridBackend<K, S>
where
    K: Debug,
    S: BucketStateStore<K>,
    C: RemoteCommand,
{
    type Response = C::Output;
    type Error = BackendError;
    type Future = DataFuture<C::Output>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        ready(self, "create_initial_state_and_execute_async")
    }

    fn call(&mut self, req: InitAndExecuteRequest<K, C>) -> Self::Future {
        self.create_initial_state_and_execute_async(&req.key, req.configuration, req.command)
    }
}
