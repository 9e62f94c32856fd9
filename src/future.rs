//! Async adapter: bridges store completion callbacks into futures.
//!
//! The store reports asynchronous outcomes through an [`ExecutionCallback`].
//! [`CompletionCallback`] is that callback: it holds the sending half of a
//! oneshot channel in a take-once cell, so whichever of `on_response` /
//! `on_failure` fires first resolves the paired [`CommandFuture`] and any
//! later call is dropped.

use crate::command::CommandResult;
use crate::error::BackendError;
use crate::store::ExecutionCallback;
use pin_project::pin_project;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::warn;

type Outcome<T> = Result<CommandResult<T>, BackendError>;

/// Check a type-erased store response against the result type the mutator produces.
pub(crate) fn downcast_response<T: 'static>(
    response: Box<dyn Any + Send>,
) -> Result<CommandResult<T>, BackendError> {
    response.downcast::<CommandResult<T>>().map(|result| *result).map_err(|_| {
        BackendError::UnexpectedResponse { expected: std::any::type_name::<CommandResult<T>>() }
    })
}

/// [`ExecutionCallback`] that resolves a [`CommandFuture`] exactly once.
pub struct CompletionCallback<T> {
    sender: Mutex<Option<oneshot::Sender<Outcome<T>>>>,
    key: String,
}

impl<T: Send + 'static> CompletionCallback<T> {
    /// Create a callback and the future it resolves. `key` is the rendered bucket key.
    pub fn pair(key: impl Into<String>) -> (Self, CommandFuture<T>) {
        let key = key.into();
        let (sender, receiver) = oneshot::channel();
        let future = CommandFuture { receiver, key: key.clone() };
        (Self { sender: Mutex::new(Some(sender)), key }, future)
    }

    fn complete(&self, outcome: Outcome<T>) {
        let sender = match self.sender.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            // The caller may have dropped the future; nothing left to notify.
            Some(sender) => {
                let _ = sender.send(outcome);
            }
            None => {
                warn!(target: "bucket_grid::future", key = %self.key, "duplicate completion ignored");
            }
        }
    }
}

impl<T: Send + 'static> ExecutionCallback for CompletionCallback<T> {
    fn on_response(&self, response: Box<dyn Any + Send>) {
        self.complete(downcast_response(response));
    }

    fn on_failure(&self, error: BackendError) {
        self.complete(Err(error));
    }
}

/// Future resolving to the [`CommandResult`] of an asynchronous apply.
///
/// If the store drops the callback without invoking it, the future fails with
/// `StateAccess`.
#[pin_project]
#[must_use = "futures do nothing unless polled"]
pub struct CommandFuture<T> {
    #[pin]
    receiver: oneshot::Receiver<Outcome<T>>,
    key: String,
}

impl<T> CommandFuture<T> {
    /// A future that is already failed with `error`.
    pub fn failed(key: impl Into<String>, error: BackendError) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(Err(error));
        Self { receiver, key: key.into() }
    }

    /// Resolve to the bare result value; a missing bucket becomes `MissingState`.
    pub fn into_data(self) -> DataFuture<T> {
        DataFuture { inner: self }
    }
}

impl<T> Future for CommandFuture<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.receiver.poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BackendError::StateAccess {
                key: this.key.clone(),
                reason: "store dropped the completion callback".into(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for CommandFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandFuture").field("key", &self.key).finish()
    }
}

/// Future returned by [`CommandFuture::into_data`].
#[pin_project]
#[must_use = "futures do nothing unless polled"]
pub struct DataFuture<T> {
    #[pin]
    inner: CommandFuture<T>,
}

impl<T> Future for DataFuture<T> {
    type Output = Result<T, BackendError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let key = this.inner.key.clone();
        match this.inner.poll(cx) {
            Poll::Ready(Ok(CommandResult::Success(data))) => Poll::Ready(Ok(data)),
            Poll::Ready(Ok(CommandResult::BucketNotFound)) => {
                Poll::Ready(Err(BackendError::MissingState { key }))
            }
            Poll::Ready(Err(error)) => Poll::Ready(Err(error)),
            Poll::Pending => Poll::Pending,
        }
    }
}
